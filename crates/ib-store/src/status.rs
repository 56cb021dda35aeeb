use std::path::{Path, PathBuf};

use ib_core::{HOT_WINDOW, LedgerSnapshot, ReplyLedger, ReplyRecord};

use crate::error::{Result, StoreError};
use crate::fsutil::{read_optional, write_atomic};

/// The reply ledger backed by `status.toml`.
///
/// Every mutation is written through before returning, so a crash never
/// loses a posted reply. An in-memory store (no path) skips the writes.
#[derive(Debug)]
pub struct ReplyStateStore {
    ledger: ReplyLedger,
    path: Option<PathBuf>,
}

impl ReplyStateStore {
    /// Load `path`; a missing file is an empty ledger and is created on first save.
    pub fn open(path: &Path) -> Result<Self> {
        let snapshot = match read_optional(path)? {
            Some(content) => parse_snapshot(&content, path)?,
            None => LedgerSnapshot::default(),
        };
        let ledger = ReplyLedger::from_snapshot(snapshot, HOT_WINDOW);
        tracing::debug!(
            path = %path.display(),
            hot = ledger.hot_len(),
            cold = ledger.cold_records().len(),
            "reply ledger loaded"
        );
        Ok(Self {
            ledger,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            ledger: ReplyLedger::default(),
            path: None,
        }
    }

    pub fn find_active(&self, parent_id: &str) -> Option<&ReplyRecord> {
        self.ledger.find_active(parent_id)
    }

    /// Remember a posted reply and persist.
    pub fn record(&mut self, record: ReplyRecord) -> Result<()> {
        self.ledger.insert(record);
        self.save()
    }

    /// Flag the reply to `parent_id` as deleted. Persists only when something changed.
    pub fn mark_deleted(&mut self, parent_id: &str) -> Result<bool> {
        let changed = self.ledger.mark_deleted(parent_id);
        if changed {
            self.save()?;
        }
        Ok(changed)
    }

    pub fn save(&mut self) -> Result<()> {
        let snapshot = self.ledger.snapshot();
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = toml::to_string(&snapshot)?;
        write_atomic(path, &content)
    }

    pub fn ledger(&self) -> &ReplyLedger {
        &self.ledger
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn parse_snapshot(content: &str, origin: &Path) -> Result<LedgerSnapshot> {
    toml::from_str(content).map_err(|e| StoreError::TomlDecode(origin.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Base-36 style ids that sort in insertion order.
    fn reply_id(n: usize) -> String {
        format!("r{n:06}")
    }

    #[test]
    fn test_missing_file_is_empty_and_created_on_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.toml");
        let mut store = ReplyStateStore::open(&path).unwrap();
        assert_eq!(store.ledger().hot_len(), 0);

        store.record(ReplyRecord::new("r1", "c1", "alice")).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.toml");
        {
            let mut store = ReplyStateStore::open(&path).unwrap();
            store.record(ReplyRecord::new("r1", "c1", "alice")).unwrap();
            store.record(ReplyRecord::new("r2", "c2", "bob")).unwrap();
            assert!(store.mark_deleted("c2").unwrap());
        }
        let store = ReplyStateStore::open(&path).unwrap();
        assert_eq!(store.find_active("c1").unwrap().id, "r1");
        assert!(store.find_active("c2").is_none());
        assert_eq!(store.ledger().hot_len(), 2);
    }

    #[test]
    fn test_round_trip_keeps_every_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.toml");
        let mut rich = ReplyRecord::new("r3", "c3", "Carol");
        rich.richtext = true;
        let mut gone = ReplyRecord::new("r4", "c4", "dave");
        gone.deleted = true;
        gone.richtext = true;
        {
            let mut store = ReplyStateStore::open(&path).unwrap();
            store.record(ReplyRecord::new("r1", "c1", "alice")).unwrap();
            store.record(rich.clone()).unwrap();
            store.record(gone.clone()).unwrap();
        }

        let store = ReplyStateStore::open(&path).unwrap();
        let hot: Vec<ReplyRecord> = store.ledger().hot_records().into_iter().cloned().collect();
        assert_eq!(
            hot,
            vec![gone, rich.clone(), ReplyRecord::new("r1", "c1", "alice")]
        );
        assert_eq!(store.find_active("c3"), Some(&rich));
    }

    #[test]
    fn test_cold_list_order_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.toml");
        {
            let mut store = ReplyStateStore::open(&path).unwrap();
            for n in 0..(HOT_WINDOW + 3) {
                store
                    .record(ReplyRecord::new(&reply_id(n), &format!("c{n}"), "u"))
                    .unwrap();
            }
        }

        let store = ReplyStateStore::open(&path).unwrap();
        let cold: Vec<&ReplyRecord> = store.ledger().cold_records().iter().collect();
        assert_eq!(
            cold,
            vec![
                &ReplyRecord::new(&reply_id(2), "c2", "u"),
                &ReplyRecord::new(&reply_id(1), "c1", "u"),
                &ReplyRecord::new(&reply_id(0), "c0", "u"),
            ]
        );
    }

    #[test]
    fn test_mark_deleted_unknown_is_false() {
        let mut store = ReplyStateStore::in_memory();
        assert!(!store.mark_deleted("nope").unwrap());
    }

    #[test]
    fn test_overflow_kept_but_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.toml");
        let mut store = ReplyStateStore::open(&path).unwrap();
        for n in 0..(HOT_WINDOW + 5) {
            store
                .record(ReplyRecord::new(&reply_id(n), &format!("c{n}"), "u"))
                .unwrap();
        }
        assert_eq!(store.ledger().hot_len(), HOT_WINDOW);
        assert_eq!(store.ledger().cold_records().len(), 5);
        assert!(store.find_active("c0").is_none());
        assert!(store.find_active(&format!("c{}", HOT_WINDOW + 4)).is_some());

        let reloaded = ReplyStateStore::open(&path).unwrap();
        assert_eq!(reloaded.ledger().cold_records().len(), 5);
        assert!(reloaded.find_active("c0").is_none());
    }

    #[test]
    fn test_legacy_records_without_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.toml");
        fs::write(
            &path,
            r#"
[[comments]]
id = "abc1234"
parent_id = "def5678"
parent_author = "carol"
"#,
        )
        .unwrap();
        let store = ReplyStateStore::open(&path).unwrap();
        let record = store.find_active("def5678").unwrap();
        assert!(!record.deleted);
        assert!(!record.richtext);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.toml");
        fs::write(&path, "comments = 3").unwrap();
        assert!(matches!(
            ReplyStateStore::open(&path).unwrap_err(),
            StoreError::TomlDecode(_, _)
        ));
    }
}
