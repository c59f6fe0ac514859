//! Output channels and the set of connected replicas

use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Chunks a connection may have queued before its writer catches up
pub const OUTPUT_CAPACITY: usize = 1024;

/// Failure to hand bytes to a connection's writer
#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("output channel {id} is closed")]
    ChannelClosed { id: u64 },

    #[error("output channel {id} is full")]
    Lagging { id: u64 },
}

/// Sending side of a connection's outbound byte queue
///
/// The connection's writer task owns the receiver; once it stops, sends fail.
#[derive(Debug, Clone)]
pub struct OutputChannel {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

impl OutputChannel {
    /// Create a channel and the receiver its writer task will drain
    pub fn new(id: u64) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);
        (OutputChannel { id, tx }, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue bytes for the peer, waiting while the queue is full
    pub async fn send(&self, data: Bytes) -> Result<(), PropagationError> {
        self.tx
            .send(data)
            .await
            .map_err(|_| PropagationError::ChannelClosed { id: self.id })
    }

    /// Queue bytes for the peer without waiting
    pub fn try_send(&self, data: Bytes) -> Result<(), PropagationError> {
        self.tx.try_send(data).map_err(|e| match e {
            TrySendError::Full(_) => PropagationError::Lagging { id: self.id },
            TrySendError::Closed(_) => PropagationError::ChannelClosed { id: self.id },
        })
    }
}

/// Output channels of connections promoted to replica links
#[derive(Debug, Default)]
pub struct ReplicaSet {
    channels: HashMap<u64, OutputChannel>,
}

impl ReplicaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: OutputChannel) {
        debug!("Registering replica channel {}", channel.id());
        self.channels.insert(channel.id(), channel);
    }

    /// Remove a channel, returning whether it was registered
    pub fn remove(&mut self, id: u64) -> bool {
        self.channels.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Send an encoded command to every replica
    ///
    /// Channels that are closed or full are dropped from the set. Returns how many
    /// replicas received it.
    pub fn propagate(&mut self, payload: &Bytes) -> usize {
        self.channels.retain(|_, channel| match channel.try_send(payload.clone()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping replica: {}", e);
                false
            }
        });

        self.channels.len()
    }
}
