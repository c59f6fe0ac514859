//! Entry structure for key-value pairs

use bytes::Bytes;

/// Represents a single entry in the store
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The value (binary-safe)
    pub value: Bytes,

    /// Optional expiration time (absolute, milliseconds since the UNIX epoch)
    pub expires_at: Option<u64>,
}

impl Entry {
    /// Create a new entry with an absolute deadline
    pub fn with_deadline(value: impl Into<Bytes>, expires_at: Option<u64>) -> Self {
        Entry {
            value: value.into(),
            expires_at,
        }
    }

    /// Create an entry that lives for `ttl_ms` from `now`; zero or negative means no expiry
    pub fn with_ttl(value: impl Into<Bytes>, ttl_ms: i64, now: u64) -> Self {
        let expires_at = if ttl_ms > 0 {
            Some(now.saturating_add(ttl_ms as u64))
        } else {
            None
        };

        Entry::with_deadline(value, expires_at)
    }

    /// Check if the entry has expired at `now`
    ///
    /// An entry is still readable at its exact deadline.
    pub fn is_expired(&self, now: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }
}
