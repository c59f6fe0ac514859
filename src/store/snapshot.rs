//! RDB snapshot reading and writing
//!
//! Supports the subset of the RDB layout needed to import string keys with expiries:
//!
//! ```text
//! "REDIS" <4 digit version>
//! 0xFA <aux key> <aux value>          metadata, skipped
//! 0xFE <db index>                     database selector, skipped
//! 0xFB <table size> <expires size>    resize hints, skipped
//! 0xFC <u64 LE ms> | 0xFD <u32 LE s>  expiry of the next key
//! 0x00 <key> <value>                  string pair
//! 0xFF                                end of file (checksum follows, ignored)
//! ```
//!
//! Lengths carry a 2-bit size class in the high bits of their first byte.

use bytes::{BufMut, Bytes, BytesMut};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

const MAGIC: &[u8] = b"REDIS";
const VERSION: &[u8] = b"0011";
const HEADER_LEN: usize = 9;

const OP_AUX: u8 = 0xFA;
const OP_RESIZE_DB: u8 = 0xFB;
const OP_EXPIRE_MS: u8 = 0xFC;
const OP_EXPIRE_SECS: u8 = 0xFD;
const OP_SELECT_DB: u8 = 0xFE;
const OP_EOF: u8 = 0xFF;
const TYPE_STRING: u8 = 0x00;

/// Snapshot loading errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid snapshot header")]
    InvalidHeader,

    #[error("snapshot truncated at byte {offset}")]
    Truncated { offset: usize },
}

/// One key imported from a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub key: Bytes,
    pub value: Bytes,
    /// Absolute deadline in milliseconds since the UNIX epoch
    pub expires_at: Option<u64>,
}

/// Snapshot reader
pub struct SnapshotReader {
    data: Bytes,
}

impl SnapshotReader {
    /// Load a snapshot file and validate its header
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    /// Wrap an in-memory snapshot (e.g. one received from a master)
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self, SnapshotError> {
        let data = data.into();

        let header_ok = data.len() >= HEADER_LEN
            && data.starts_with(MAGIC)
            && data[MAGIC.len()..HEADER_LEN].iter().all(u8::is_ascii_digit);

        if !header_ok {
            return Err(SnapshotError::InvalidHeader);
        }

        Ok(SnapshotReader { data })
    }

    /// Parse all string records from the snapshot
    ///
    /// Records read before a truncation are kept; the truncation is logged.
    pub fn parse_records(&self) -> Vec<SnapshotRecord> {
        let mut records = Vec::new();

        match self.read_records(&mut records) {
            Ok(()) => info!("Snapshot parsed: {} records", records.len()),
            Err(e) => warn!(
                "Snapshot parsing stopped early: {}. {} records recovered.",
                e,
                records.len()
            ),
        }

        records
    }

    fn read_records(&self, records: &mut Vec<SnapshotRecord>) -> Result<(), SnapshotError> {
        let mut cursor = Cursor::new(&self.data, HEADER_LEN);
        let mut pending_expiry = None;

        while let Some(opcode) = cursor.next_byte() {
            match opcode {
                OP_EOF => break,
                OP_SELECT_DB => {
                    cursor.length()?;
                }
                OP_RESIZE_DB => {
                    cursor.length()?;
                    cursor.length()?;
                }
                OP_AUX => {
                    cursor.string()?;
                    cursor.string()?;
                }
                OP_EXPIRE_MS => {
                    pending_expiry = Some(cursor.u64_le()?);
                }
                OP_EXPIRE_SECS => {
                    pending_expiry = Some(cursor.u32_le()? as u64 * 1000);
                }
                TYPE_STRING => {
                    let key = cursor.string()?;
                    let value = cursor.string()?;
                    records.push(SnapshotRecord {
                        key,
                        value,
                        expires_at: pending_expiry.take(),
                    });
                }
                other => {
                    debug!("Skipping unknown snapshot opcode 0x{:02X} at byte {}", other, cursor.pos - 1);
                }
            }
        }

        Ok(())
    }
}

/// Serialize records into a snapshot blob
pub fn encode_records(records: &[SnapshotRecord]) -> Bytes {
    let mut buf = BytesMut::new();
    let expiring = records.iter().filter(|r| r.expires_at.is_some()).count();

    buf.put_slice(MAGIC);
    buf.put_slice(VERSION);

    buf.put_u8(OP_SELECT_DB);
    put_length(&mut buf, 0);
    buf.put_u8(OP_RESIZE_DB);
    put_length(&mut buf, records.len());
    put_length(&mut buf, expiring);

    for record in records {
        if let Some(expires_at) = record.expires_at {
            buf.put_u8(OP_EXPIRE_MS);
            buf.put_u64_le(expires_at);
        }
        buf.put_u8(TYPE_STRING);
        put_string(&mut buf, &record.key);
        put_string(&mut buf, &record.value);
    }

    buf.put_u8(OP_EOF);
    // Checksum; zero means "not computed"
    buf.put_u64_le(0);

    buf.freeze()
}

fn put_length(buf: &mut BytesMut, len: usize) {
    if len < 1 << 6 {
        buf.put_u8(len as u8);
    } else if len < 1 << 14 {
        buf.put_u8(0x40 | (len >> 8) as u8);
        buf.put_u8(len as u8);
    } else {
        buf.put_u8(0x80);
        buf.put_u32(len as u32);
    }
}

fn put_string(buf: &mut BytesMut, data: &[u8]) {
    put_length(buf, data.len());
    buf.put_slice(data);
}

/// Decoded length prefix
enum Length {
    Plain(usize),
    /// `11` size class; the low 6 bits select a special encoding
    Special(u8),
}

struct Cursor<'a> {
    data: &'a Bytes,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a Bytes, pos: usize) -> Self {
        Cursor { data, pos }
    }

    fn next_byte(&mut self) -> Option<u8> {
        let byte = self.data.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }

    fn take(&mut self, n: usize) -> Result<Bytes, SnapshotError> {
        if self.data.len() - self.pos < n {
            return Err(SnapshotError::Truncated { offset: self.pos });
        }
        let slice = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, SnapshotError> {
        self.next_byte()
            .ok_or(SnapshotError::Truncated { offset: self.pos })
    }

    fn u32_le(&mut self) -> Result<u32, SnapshotError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64_le(&mut self) -> Result<u64, SnapshotError> {
        let raw = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&raw);
        Ok(u64::from_le_bytes(bytes))
    }

    fn length_prefix(&mut self) -> Result<Length, SnapshotError> {
        let first = self.byte()?;

        match first >> 6 {
            0b00 => Ok(Length::Plain((first & 0x3F) as usize)),
            0b01 => {
                let second = self.byte()?;
                Ok(Length::Plain((((first & 0x3F) as usize) << 8) | second as usize))
            }
            0b10 => {
                let raw = self.take(4)?;
                Ok(Length::Plain(
                    u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                ))
            }
            _ => Ok(Length::Special(first & 0x3F)),
        }
    }

    /// Length field; special encodings count as zero
    fn length(&mut self) -> Result<usize, SnapshotError> {
        match self.length_prefix()? {
            Length::Plain(len) => Ok(len),
            Length::Special(_) => Ok(0),
        }
    }

    /// Length-prefixed string, including the integer encodings
    fn string(&mut self) -> Result<Bytes, SnapshotError> {
        match self.length_prefix()? {
            Length::Plain(len) => self.take(len),
            Length::Special(0) => {
                let value = self.byte()? as i8;
                Ok(Bytes::from(value.to_string()))
            }
            Length::Special(1) => {
                let raw = self.take(2)?;
                Ok(Bytes::from(i16::from_le_bytes([raw[0], raw[1]]).to_string()))
            }
            Length::Special(2) => {
                let raw = self.u32_le()?;
                Ok(Bytes::from((raw as i32).to_string()))
            }
            Length::Special(kind) => {
                debug!("Unsupported string encoding 0x{:02X}, reading as empty", 0xC0 | kind);
                Ok(Bytes::new())
            }
        }
    }
}
