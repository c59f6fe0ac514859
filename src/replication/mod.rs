//! Replica side of master/replica replication
//!
//! A replica connects to its master, performs the handshake, loads the snapshot
//! sent with FULLRESYNC and then applies every command the master streams.

mod client;

pub use client::ReplicationClient;

use crate::protocol::RespError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Phase of the replication link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Handshake,
    AwaitFullResync,
    Streaming,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Handshake => "handshake",
            Stage::AwaitFullResync => "full resync",
            Stage::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Errors that end the replication task
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("failed to connect to master {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on master link: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error on master link during {stage}: {source}")]
    Protocol {
        stage: Stage,
        #[source]
        source: RespError,
    },

    #[error("master closed the connection during {stage}")]
    ConnectionClosed { stage: Stage },

    #[error("unexpected reply during {stage}: {reply}")]
    UnexpectedReply { stage: Stage, reply: String },
}

impl ReplicationError {
    /// Classify a codec failure seen during `stage`
    pub fn link(err: RespError, stage: Stage) -> Self {
        match err {
            RespError::Io(e) => ReplicationError::Io(e),
            source => ReplicationError::Protocol { stage, source },
        }
    }
}
