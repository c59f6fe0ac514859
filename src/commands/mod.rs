//! Command execution module
//!
//! Provides a unified interface for all commands through the Command trait.
//! Each family of commands lives in its own file.

mod context;
mod registry;

// Command implementations
mod admin;
mod replication;
mod search;
mod string;

pub use context::CommandContext;
pub use registry::CommandRegistry;

use crate::protocol::RespValue;
use crate::store::MemoryStore;
use bytes::Bytes;
use tokio::sync::OwnedMutexGuard;

/// Command execution trait
///
/// All commands implement this trait with a single execute method.
pub trait Command: Send + Sync {
    /// Execute the command with the given context and arguments
    ///
    /// Arguments:
    /// - ctx: the store and server metadata
    /// - args: command arguments (excluding the command name itself)
    fn execute(&self, ctx: &mut CommandContext, args: &[RespValue]) -> Reply;

    /// Get the command name (for debugging/logging)
    fn name(&self) -> &'static str;

    /// Get the minimum number of arguments required
    fn min_args(&self) -> usize {
        0
    }

    /// Get the maximum number of arguments (None = unlimited)
    fn max_args(&self) -> Option<usize> {
        None
    }

    /// Whether a successful execution mutates the keyspace and must reach replicas
    fn is_write(&self) -> bool {
        false
    }

    /// Whether a replica answers this command when its master sends it
    fn replies_to_master(&self) -> bool {
        false
    }
}

/// Result of executing a command
pub enum Reply {
    /// A single value, encoded once
    Value(RespValue),

    /// Pre-encoded chunks written in order
    Stream(ChunkStream),
}

impl Reply {
    /// The single value, if this is not a stream
    pub fn as_value(&self) -> Option<&RespValue> {
        match self {
            Reply::Value(value) => Some(value),
            Reply::Stream(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.as_value().map_or(false, RespValue::is_error)
    }
}

impl From<RespValue> for Reply {
    fn from(value: RespValue) -> Self {
        Reply::Value(value)
    }
}

/// A finite, one-shot sequence of encoded chunks
///
/// It can carry the store guard, keeping the keyspace frozen until the stream is dropped.
pub struct ChunkStream {
    chunks: std::vec::IntoIter<Bytes>,
    guard: Option<OwnedMutexGuard<MemoryStore>>,
}

impl ChunkStream {
    pub fn new(chunks: Vec<Bytes>) -> Self {
        ChunkStream {
            chunks: chunks.into_iter(),
            guard: None,
        }
    }

    /// Keep the store locked for as long as this stream lives
    pub fn hold(mut self, guard: OwnedMutexGuard<MemoryStore>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn is_holding_store(&self) -> bool {
        self.guard.is_some()
    }
}

impl Iterator for ChunkStream {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.chunks.next()
    }
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("remaining", &self.chunks.len())
            .field("holding_store", &self.guard.is_some())
            .finish()
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Value(value) => write!(f, "Value({})", value),
            Reply::Stream(stream) => stream.fmt(f),
        }
    }
}

/// Helper function to extract bulk string from RespValue
pub(crate) fn extract_bulk_string(value: &RespValue) -> Result<&Bytes, &'static str> {
    value.as_bulk_string().ok_or("Expected bulk string")
}

/// Helper function to extract integer from RespValue or parse from bulk string
pub(crate) fn extract_integer(value: &RespValue) -> Result<i64, &'static str> {
    match value {
        RespValue::Integer(i) => Ok(*i),
        RespValue::BulkString(bytes) => {
            let s = std::str::from_utf8(bytes).map_err(|_| "Invalid UTF-8")?;
            s.parse::<i64>().map_err(|_| "Invalid integer")
        }
        _ => Err("Expected integer or bulk string"),
    }
}
