//! In-memory storage module
//!
//! Provides the key-value map with per-key expiry and the RDB snapshot format.
//! This module is independent of protocol and command handling.

mod clock;
mod entry;
mod memory;
mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::Entry;
pub use memory::MemoryStore;
pub use snapshot::{encode_records, SnapshotError, SnapshotReader, SnapshotRecord};
