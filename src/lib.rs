//! FerrumKV - an in-memory key-value server speaking RESP, with master/replica replication
//!
//! Modules, leaves first:
//! - `protocol`: RESP2 values, incremental parser, encoder and `tokio-util` codec
//! - `store`: key/value map with lazy expiry and the RDB snapshot format
//! - `metadata`: replication role, id, offset and the connected replicas
//! - `commands` / `dispatch`: command handlers and routing, write propagation
//! - `server`: accept loop and per-connection handling
//! - `replication`: the replica's link to its master

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod metadata;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod store;

/// Re-export commonly used types
pub use dispatch::Dispatcher;
pub use metadata::{Role, ServerMetadata};
pub use protocol::{RespError, RespValue};
pub use store::{Entry, MemoryStore};
