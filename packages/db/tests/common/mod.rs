use serde_json::{Map, Value};

use sentinel_db::{DbConfig, StoreError, SurrealStore};

/// Fresh SurrealDB store on its own in-memory datastore.
pub async fn surreal_store() -> Result<SurrealStore, StoreError> {
    SurrealStore::connect(&DbConfig::memory()).await
}

pub fn payload_with_message(message: &str) -> Value {
    let mut map = Map::new();
    map.insert("msg".to_string(), Value::String(message.to_string()));
    Value::Object(map)
}
