//! Storage for the job queue.
//!
//! The engine talks to a [`Store`]: atomic primitives over hash tables, FIFO
//! lists and sorted sets. Two adapters are provided, [`MemoryStore`] for tests
//! and single-process runs, and [`SurrealStore`] over SurrealDB.
//!
//! # Features
//!
//! - `memory` (default): SurrealDB in-memory engine
//! - `rocksdb`: RocksDB for persistent file-based storage
//! - `remote`: connect to a SurrealDB server over WebSocket

mod connection;
pub mod keys;
mod memory;
pub mod repositories;
mod schema;
mod store;
mod surreal;

pub use connection::{Database, DbConfig, connect};
pub use memory::MemoryStore;
pub use repositories::{JobFilter, JobRepository, QueueDepths};
pub use schema::init_schema;
pub use store::{Store, StoreError, StoreResult};
pub use surreal::SurrealStore;
