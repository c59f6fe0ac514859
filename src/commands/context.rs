//! Command execution context

use crate::metadata::ServerMetadata;
use crate::store::MemoryStore;

/// Context provided to commands during execution
///
/// Borrowed for one command while the dispatcher holds the store lock.
pub struct CommandContext<'a> {
    /// The memory store
    pub store: &'a mut MemoryStore,

    /// Replication role and identity
    pub metadata: &'a ServerMetadata,
}

impl<'a> CommandContext<'a> {
    pub fn new(store: &'a mut MemoryStore, metadata: &'a ServerMetadata) -> Self {
        CommandContext { store, metadata }
    }
}
