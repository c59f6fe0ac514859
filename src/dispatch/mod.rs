//! Command dispatcher
//!
//! Routes incoming commands to the appropriate handler and forwards successful
//! writes to the connected replicas.

use crate::commands::{CommandContext, CommandRegistry, Reply};
use crate::metadata::ServerMetadata;
use crate::protocol::{RespEncoder, RespValue};
use crate::store::{MemoryStore, SnapshotError};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Reply to a command name the registry does not know
pub const UNKNOWN_COMMAND: &str = "ERR: Unknown command";

/// Reply to input that is not a decodable command
pub const INVALID_INPUT: &str = "ERR: Invalid input";

/// What a dispatched request produced
#[derive(Debug)]
pub struct Outcome {
    /// Upper-cased command name, when the request named a known command
    pub command: Option<&'static str>,

    pub reply: Reply,

    /// Whether a replica writes this reply back to its master
    pub replies_to_master: bool,
}

impl Outcome {
    fn rejected(reply: RespValue) -> Self {
        Outcome {
            command: None,
            reply: reply.into(),
            replies_to_master: false,
        }
    }

    /// Whether this outcome is the start of a full resync
    pub fn is_psync(&self) -> bool {
        self.command == Some("PSYNC")
    }
}

/// Command dispatcher
///
/// Shared by every connection and the replication client.
pub struct Dispatcher {
    /// Command registry
    registry: CommandRegistry,

    store: Arc<Mutex<MemoryStore>>,

    metadata: Arc<ServerMetadata>,
}

impl Dispatcher {
    pub fn new(store: MemoryStore, metadata: Arc<ServerMetadata>) -> Self {
        Dispatcher {
            registry: CommandRegistry::new(),
            store: Arc::new(Mutex::new(store)),
            metadata,
        }
    }

    pub fn metadata(&self) -> &Arc<ServerMetadata> {
        &self.metadata
    }

    pub fn store(&self) -> &Arc<Mutex<MemoryStore>> {
        &self.store
    }

    /// Merge a snapshot blob into the store
    pub async fn load_snapshot(&self, data: Bytes) -> Result<usize, SnapshotError> {
        self.store.lock().await.load_snapshot_bytes(data)
    }

    /// Dispatch a command
    ///
    /// The command runs under the store lock. A stream reply keeps that lock
    /// until the stream is dropped.
    pub async fn dispatch(&self, request: RespValue) -> Outcome {
        let (name, args) = match split_command(&request) {
            Some(parts) => parts,
            None => {
                warn!("Invalid input: {}", request);
                return Outcome::rejected(RespValue::error(INVALID_INPUT));
            }
        };

        debug!("Dispatching command: {}", name);

        // Look up the command
        let command = match self.registry.get(&name) {
            Some(cmd) => cmd,
            None => {
                warn!("Unknown command: {}", name);
                return Outcome::rejected(RespValue::error(UNKNOWN_COMMAND));
            }
        };

        // Validate argument count
        let too_many = command.max_args().map_or(false, |max| args.len() > max);
        if args.len() < command.min_args() || too_many {
            return Outcome {
                command: Some(command.name()),
                reply: RespValue::error(format!(
                    "ERR wrong number of arguments for '{}' command",
                    name.to_lowercase()
                ))
                .into(),
                replies_to_master: command.replies_to_master(),
            };
        }

        let mut store = self.store.clone().lock_owned().await;

        let reply = {
            let mut ctx = CommandContext::new(&mut *store, &self.metadata);
            command.execute(&mut ctx, args)
        };

        if command.is_write() && !reply.is_error() && self.metadata.is_master() {
            self.propagate(&request).await;
        }

        let reply = match reply {
            Reply::Stream(stream) => Reply::Stream(stream.hold(store)),
            value => value,
        };

        Outcome {
            command: Some(command.name()),
            reply,
            replies_to_master: command.replies_to_master(),
        }
    }

    /// Send an applied write to every replica; called with the store locked
    ///
    /// The replication offset only moves while at least one replica is attached.
    async fn propagate(&self, request: &RespValue) {
        let mut replicas = self.metadata.replicas().lock().await;
        if replicas.is_empty() {
            return;
        }

        let payload = RespEncoder::encode(request);
        let delivered = replicas.propagate(&payload);
        let offset = self.metadata.advance_offset(payload.len() as u64);

        debug!("Propagated {} bytes to {} replicas (offset {})", payload.len(), delivered, offset);
    }
}

/// Split a request into an upper-cased command name and its arguments
///
/// A request headed by PING is PING with no arguments, whatever follows. A bare
/// `PING` string outside an array is accepted too.
fn split_command(request: &RespValue) -> Option<(String, &[RespValue])> {
    match request {
        RespValue::Array(items) => {
            let (head, rest) = items.split_first()?;
            let name = head.as_text()?.to_uppercase();

            if name == "PING" {
                Some((name, &[][..]))
            } else {
                Some((name, rest))
            }
        }
        RespValue::SimpleString(_) | RespValue::BulkString(_) => {
            let name = request.as_text()?.to_uppercase();
            (name == "PING").then_some((name, &[][..]))
        }
        _ => None,
    }
}
