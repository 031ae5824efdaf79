use std::path::Path;

use sled::Db;
use tracing::warn;

use super::{DeadLetterEntry, DeadLetterError, DeadLetterSink};

const TREE: &str = "dead_letters";

/// Dead letters stored in an embedded `sled` database.
///
/// Keys are the record time in milliseconds followed by a database-unique
/// id, both big-endian, so iteration order is recording order. When
/// `max_entries` is set the oldest entries are removed to stay within it.
#[derive(Clone)]
pub struct SledDeadLetterStore {
    db: Db,
    max_entries: Option<usize>,
}

impl SledDeadLetterStore {
    pub fn open(path: impl AsRef<Path>, max_entries: Option<usize>) -> Result<Self, DeadLetterError> {
        let db = sled::open(path)?;
        Ok(Self { db, max_entries })
    }

    /// Loads up to `limit` entries, oldest first.
    pub fn load_entries(&self, limit: Option<usize>) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let tree = self.db.open_tree(TREE)?;
        let mut entries = Vec::new();
        for item in tree.iter() {
            if limit.is_some_and(|limit| entries.len() >= limit) {
                break;
            }
            let (key, value) = item?;
            match serde_json::from_slice(&value) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(key = ?key, error = %err, "skipping unreadable dead-letter entry"),
            }
        }
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize, DeadLetterError> {
        Ok(self.db.open_tree(TREE)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, DeadLetterError> {
        Ok(self.len()? == 0)
    }

    fn trim(&self, tree: &sled::Tree) -> Result<(), DeadLetterError> {
        let Some(max) = self.max_entries else {
            return Ok(());
        };
        let excess = tree.len().saturating_sub(max);
        for _ in 0..excess {
            if tree.pop_min()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

impl DeadLetterSink for SledDeadLetterStore {
    fn record(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        let serialized = serde_json::to_vec(entry)?;
        let tree = self.db.open_tree(TREE)?;

        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&entry.recorded_at.timestamp_millis().to_be_bytes());
        key[8..].copy_from_slice(&self.db.generate_id()?.to_be_bytes());
        tree.insert(key, serialized)?;

        self.trim(&tree)
    }

    fn flush(&self) -> Result<(), DeadLetterError> {
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SledDeadLetterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledDeadLetterStore")
            .field("db", &"sled::Db")
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
