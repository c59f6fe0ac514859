//! In-memory storage implementation

use super::clock::{Clock, SystemClock};
use super::entry::Entry;
use super::snapshot::{self, SnapshotError, SnapshotReader, SnapshotRecord};
use bytes::Bytes;
use siphasher::sip::SipHasher13;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Type alias for our hash map with SipHasher
type StoreMap = HashMap<Bytes, Entry, BuildHasherDefault<SipHasher13>>;

/// In-memory key-value store
///
/// Expiry is lazy: reads mask expired entries, nothing purges them.
pub struct MemoryStore {
    /// The main storage map
    store: StoreMap,

    /// Snapshot directory, as configured
    dir: Option<String>,

    /// Snapshot file name, as configured
    dbfilename: Option<String>,

    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store reading time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        MemoryStore {
            store: HashMap::with_capacity_and_hasher(
                1024,
                BuildHasherDefault::<SipHasher13>::default(),
            ),
            dir: None,
            dbfilename: None,
            clock,
        }
    }

    /// Create a store for the configured snapshot location and import the file if it exists
    ///
    /// A missing or unreadable snapshot leaves the store empty.
    pub fn open(dir: Option<String>, dbfilename: Option<String>, clock: Arc<dyn Clock>) -> Self {
        let mut store = Self::with_clock(clock);
        store.dir = dir;
        store.dbfilename = dbfilename;

        if let Some(path) = store.snapshot_path() {
            if path.exists() {
                match store.load_snapshot(&path) {
                    Ok(count) => info!("Loaded {} keys from {}", count, path.display()),
                    Err(e) => warn!("Ignoring snapshot {}: {}", path.display(), e),
                }
            } else {
                info!("No snapshot at {}, starting empty", path.display());
            }
        }

        store
    }

    fn snapshot_path(&self) -> Option<PathBuf> {
        match (&self.dir, &self.dbfilename) {
            (Some(dir), Some(file)) => Some(Path::new(dir).join(file)),
            _ => None,
        }
    }

    /// Store a value; `ttl_ms <= 0` means no expiry
    pub fn store(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>, ttl_ms: i64) {
        let now = self.clock.now_millis();
        self.store
            .insert(key.into(), Entry::with_ttl(value, ttl_ms, now));
    }

    /// Insert an entry with an absolute deadline, as read from a snapshot
    pub fn insert_entry(&mut self, key: impl Into<Bytes>, entry: Entry) {
        self.store.insert(key.into(), entry);
    }

    /// Get a value by key; expired entries read as absent but stay in the map
    pub fn fetch(&self, key: &[u8]) -> Option<Bytes> {
        let now = self.clock.now_millis();

        self.store
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Every key present, expired or not
    pub fn list_keys(&self) -> Vec<Bytes> {
        self.store.keys().cloned().collect()
    }

    /// Import a snapshot file, returning the number of keys loaded
    pub fn load_snapshot<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, SnapshotError> {
        let reader = SnapshotReader::load(path)?;
        Ok(self.apply_records(reader.parse_records()))
    }

    /// Import a snapshot held in memory (e.g. one sent by a master)
    pub fn load_snapshot_bytes(&mut self, data: impl Into<Bytes>) -> Result<usize, SnapshotError> {
        let reader = SnapshotReader::from_bytes(data)?;
        Ok(self.apply_records(reader.parse_records()))
    }

    fn apply_records(&mut self, records: Vec<SnapshotRecord>) -> usize {
        let count = records.len();

        // Past deadlines are kept; reads mask them
        for record in records {
            self.insert_entry(record.key, Entry::with_deadline(record.value, record.expires_at));
        }

        count
    }

    /// Serialize the whole store as a snapshot blob
    pub fn snapshot(&self) -> Bytes {
        let records: Vec<SnapshotRecord> = self
            .store
            .iter()
            .map(|(key, entry)| SnapshotRecord {
                key: key.clone(),
                value: entry.value.clone(),
                expires_at: entry.expires_at,
            })
            .collect();

        snapshot::encode_records(&records)
    }

    /// Report a snapshot setting as `(name, value)`
    ///
    /// `dir` selects the directory; anything else selects the file name.
    pub fn describe_config(&self, option: &str) -> (&'static str, Option<&str>) {
        if option.eq_ignore_ascii_case("dir") {
            ("dir", self.dir.as_deref())
        } else {
            ("dbfilename", self.dbfilename.as_deref())
        }
    }

    /// Number of entries, including expired ones
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;

    fn store_at(start: u64) -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(start);
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_basic_store_fetch() {
        let (mut store, _) = store_at(0);
        store.store("key1", "value1", 0);

        assert_eq!(store.fetch(b"key1"), Some(Bytes::from("value1")));
        assert_eq!(store.fetch(b"missing"), None);
    }

    #[test]
    fn test_overwrite_replaces_entry() {
        let (mut store, clock) = store_at(1_000);
        store.store("k", "old", 10);
        store.store("k", "new", -1);
        clock.advance(50);

        assert_eq!(store.fetch(b"k"), Some(Bytes::from("new")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expiration_is_lazy() {
        let (mut store, clock) = store_at(1_000);
        store.store("k", "v", 100);
        assert_eq!(store.fetch(b"k"), Some(Bytes::from("v")));

        clock.advance(150);

        assert_eq!(store.fetch(b"k"), None);
        assert_eq!(store.list_keys(), vec![Bytes::from("k")]);
    }

    #[test]
    fn test_no_expiry() {
        let (mut store, clock) = store_at(1_000);
        store.store("k", "v", -1);
        clock.advance(u32::MAX as u64);

        assert_eq!(store.fetch(b"k"), Some(Bytes::from("v")));
    }

    #[test]
    fn test_load_snapshot_with_expiry() {
        let (mut store, clock) = store_at(1_000);

        let mut blob = b"REDIS0011".to_vec();
        blob.extend_from_slice(&[0xFE, 0x00, 0xFB, 0x02, 0x01, 0xFC]);
        blob.extend_from_slice(&2_000u64.to_le_bytes());
        blob.extend_from_slice(&[0x00, 0x03, b't', b'm', b'p', 0x01, b'a']);
        blob.extend_from_slice(&[0x00, 0x04, b'k', b'e', b'e', b'p', 0x01, b'b']);
        blob.push(0xFF);

        let dir = std::env::temp_dir().join(format!("ferrumkv-store-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dump.rdb");
        std::fs::write(&path, &blob).unwrap();

        assert_eq!(store.load_snapshot(&path).unwrap(), 2);
        assert_eq!(store.fetch(b"tmp"), Some(Bytes::from("a")));
        assert_eq!(store.fetch(b"keep"), Some(Bytes::from("b")));

        clock.set(2_001);
        assert_eq!(store.fetch(b"tmp"), None);
        assert_eq!(store.fetch(b"keep"), Some(Bytes::from("b")));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_open_without_snapshot_file() {
        let dir = std::env::temp_dir().join("ferrumkv-does-not-exist");
        let store = MemoryStore::open(
            Some(dir.to_string_lossy().into_owned()),
            Some("dump.rdb".to_string()),
            Arc::new(ManualClock::new(0)),
        );

        assert!(store.is_empty());
        assert_eq!(store.describe_config("dbfilename"), ("dbfilename", Some("dump.rdb")));
    }

    #[test]
    fn test_bad_header_is_reported() {
        let (mut store, _) = store_at(0);
        assert!(matches!(
            store.load_snapshot_bytes(&b"GARBAGE!!"[..]),
            Err(SnapshotError::InvalidHeader)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_past_deadline_is_still_loaded() {
        let (mut store, _) = store_at(5_000);

        let mut blob = b"REDIS0011".to_vec();
        blob.extend_from_slice(&[0xFE, 0x00, 0xFB, 0x01, 0x01, 0xFC]);
        blob.extend_from_slice(&1_000u64.to_le_bytes());
        blob.extend_from_slice(&[0x00, 0x04, b'g', b'o', b'n', b'e', 0x01, b'x']);
        blob.push(0xFF);

        assert_eq!(store.load_snapshot_bytes(blob).unwrap(), 1);
        assert_eq!(store.fetch(b"gone"), None);
        assert_eq!(store.list_keys(), vec![Bytes::from("gone")]);
    }

    #[test]
    fn test_open_with_bad_header_starts_empty() {
        let dir = std::env::temp_dir().join(format!("ferrumkv-bad-header-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("dump.rdb"), b"GARBAGE!!\xfe\x00").unwrap();

        let store = MemoryStore::open(
            Some(dir.to_string_lossy().into_owned()),
            Some("dump.rdb".to_string()),
            Arc::new(ManualClock::new(0)),
        );

        assert!(store.is_empty());
        assert_eq!(store.describe_config("dbfilename"), ("dbfilename", Some("dump.rdb")));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_snapshot_carries_deadlines() {
        let (mut store, _) = store_at(500);
        store.store("a", "1", 100);
        store.store("b", "2", 0);

        let (mut copy, _) = store_at(500);
        assert_eq!(copy.load_snapshot_bytes(store.snapshot()).unwrap(), 2);
        assert_eq!(copy.fetch(b"a"), Some(Bytes::from("1")));

        let later: Arc<dyn Clock> = Arc::new(ManualClock::new(601));
        copy.clock = later;
        assert_eq!(copy.fetch(b"a"), None);
        assert_eq!(copy.fetch(b"b"), Some(Bytes::from("2")));
    }

    #[test]
    fn test_describe_config() {
        let mut store = MemoryStore::new();
        store.dir = Some("/tmp/data".to_string());

        assert_eq!(store.describe_config("dir"), ("dir", Some("/tmp/data")));
        assert_eq!(store.describe_config("dbfilename"), ("dbfilename", None));
        assert_eq!(store.describe_config("anything"), ("dbfilename", None));
    }
}
