//! Database schema definitions using SurrealQL.

use crate::{Database, StoreError, keys};

/// Initialize the database schema.
///
/// Defines the tables backing the job table, the ready list and the sorted
/// sets. Safe to run on every startup.
pub async fn init_schema(db: &Database) -> Result<(), StoreError> {
    tracing::info!("Initializing database schema...");

    db.query(hash_schema(keys::JOBS)).await?.check()?;
    db.query(hash_schema(keys::IDEMPOTENCY)).await?.check()?;
    db.query(list_schema(keys::READY_QUEUE)).await?.check()?;
    db.query(zset_schema(keys::SCHEDULED)).await?.check()?;
    db.query(zset_schema(keys::LEASES)).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Hash tables: one record per key, the value kept as an opaque string.
fn hash_schema(table: &str) -> String {
    format!(
        r#"
DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;
DEFINE FIELD IF NOT EXISTS entry_key ON {table} TYPE string;
DEFINE FIELD IF NOT EXISTS body ON {table} TYPE string;
"#
    )
}

/// Lists: one record per item, ordered by its sequence key.
fn list_schema(table: &str) -> String {
    format!(
        r#"
DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;
DEFINE FIELD IF NOT EXISTS seq ON {table} TYPE string;
DEFINE FIELD IF NOT EXISTS value ON {table} TYPE string;
DEFINE INDEX IF NOT EXISTS {table}_seq ON {table} FIELDS seq;
"#
    )
}

/// Sorted sets: one record per member, indexed by score for pop-minimum.
fn zset_schema(table: &str) -> String {
    format!(
        r#"
DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;
DEFINE FIELD IF NOT EXISTS member ON {table} TYPE string;
DEFINE FIELD IF NOT EXISTS score ON {table} TYPE number;
DEFINE INDEX IF NOT EXISTS {table}_score ON {table} FIELDS score;
"#
    )
}
