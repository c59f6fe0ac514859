//! Process-wide replication state
//!
//! One `ServerMetadata` is built at startup and shared by the dispatcher, the
//! connection handlers and the replication client.

mod replicas;

pub use replicas::{OutputChannel, PropagationError, ReplicaSet, OUTPUT_CAPACITY};

use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Replication role, fixed for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

impl Role {
    /// Name reported by INFO
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "slave",
        }
    }
}

/// Address of the master a replica follows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaOf {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ReplicaOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Replication identity, offset and connected replicas
pub struct ServerMetadata {
    role: Role,
    replication_id: String,
    replication_offset: AtomicU64,
    replica_of: Option<ReplicaOf>,
    listening_port: u16,
    next_connection_id: AtomicU64,
    replicas: Mutex<ReplicaSet>,
}

impl ServerMetadata {
    /// Build the metadata; the role follows from whether a master is configured
    pub fn new(replica_of: Option<ReplicaOf>, listening_port: u16) -> Self {
        let role = if replica_of.is_some() {
            Role::Replica
        } else {
            Role::Master
        };

        ServerMetadata {
            role,
            replication_id: generate_replication_id(),
            replication_offset: AtomicU64::new(0),
            replica_of,
            listening_port,
            next_connection_id: AtomicU64::new(1),
            replicas: Mutex::new(ReplicaSet::new()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn replication_id(&self) -> &str {
        &self.replication_id
    }

    pub fn replication_offset(&self) -> u64 {
        self.replication_offset.load(Ordering::SeqCst)
    }

    /// Account for `bytes` of replication stream sent or processed
    pub fn advance_offset(&self, bytes: u64) -> u64 {
        self.replication_offset.fetch_add(bytes, Ordering::SeqCst) + bytes
    }

    pub fn replica_of(&self) -> Option<&ReplicaOf> {
        self.replica_of.as_ref()
    }

    pub fn listening_port(&self) -> u16 {
        self.listening_port
    }

    /// Allocate an id for a new connection's output channel
    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The connected replica channels
    ///
    /// When the store lock is also needed, take it first.
    pub fn replicas(&self) -> &Mutex<ReplicaSet> {
        &self.replicas
    }

    /// Replication section of INFO
    pub fn info(&self) -> String {
        format!(
            "role:{}\nmaster_replid:{}\nmaster_repl_offset:{}",
            self.role.as_str(),
            self.replication_id,
            self.replication_offset()
        )
    }
}

fn generate_replication_id() -> String {
    let mut rng = rand::thread_rng();
    (0..40)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}
