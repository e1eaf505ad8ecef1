use rocksdb::{DB, Direction, IteratorMode, Options, ReadOptions, WriteBatch, WriteOptions};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeSet;
use std::{path::Path, sync::Arc};

use common::constants::BLOCK_KEY_PREFIX;

const MAX_OPEN_FILES: i32 = 512;

#[derive(Clone)]
pub struct KvDb {
    inner: Arc<DB>,
}

/// One page of a prefix scan. `next` is the cursor to resume from, `None`
/// once the prefix is exhausted.
#[derive(Debug)]
pub struct ScanPage<T> {
    pub entries: Vec<(String, T)>,
    pub next: Option<String>,
}

impl KvDb {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_level_compaction_dynamic_level_bytes(true);
        opts.set_max_open_files(MAX_OPEN_FILES);
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);

        let db = DB::open(&opts, path)?;
        Ok(Self {
            inner: Arc::new(db),
        })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let v = self.inner.get(key.as_bytes())?;
        if let Some(raw) = v {
            let t = serde_json::from_slice::<T>(&raw)?;
            Ok(Some(t))
        } else {
            Ok(None)
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let buf = serde_json::to_vec(value)?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.inner.put_opt(key.as_bytes(), buf, &write_opts)?;
        Ok(())
    }

    pub fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.inner.get_pinned(key.as_bytes())?.is_some())
    }

    pub fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner.delete(key.as_bytes())?;
        Ok(())
    }

    /// Reads at most `limit` entries under `prefix`, strictly after `after`
    /// when a cursor is given.
    pub fn scan_prefix<T: DeserializeOwned>(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<T>> {
        let limit = limit.max(1);
        let start = after.unwrap_or(prefix);
        let iter = self.inner.iterator_opt(
            IteratorMode::From(start.as_bytes(), Direction::Forward),
            ReadOptions::default(),
        );

        let mut entries = Vec::new();
        let mut more = false;
        for kv in iter {
            let (k, v) = kv?;
            if !k.starts_with(prefix.as_bytes()) {
                break;
            }
            if after.is_some_and(|a| a.as_bytes() == &*k) {
                continue;
            }
            // a full page only yields a cursor when another key follows
            if entries.len() == limit {
                more = true;
                break;
            }
            let key = std::str::from_utf8(&k)?.to_string();
            entries.push((key, serde_json::from_slice::<T>(&v)?));
        }

        let next = if more {
            entries.last().map(|(k, _)| k.clone())
        } else {
            None
        };

        Ok(ScanPage { entries, next })
    }

    /// Deletes every key under `prefix`; returns how many were removed.
    pub fn delete_prefix(&self, prefix: &str) -> anyhow::Result<usize> {
        let iter = self.inner.iterator_opt(
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
            ReadOptions::default(),
        );

        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for kv in iter {
            let (k, _) = kv?;
            if !k.starts_with(prefix.as_bytes()) {
                break;
            }
            batch.delete(&k);
            removed += 1;
        }

        self.inner.write(batch)?;
        Ok(removed)
    }
}

pub fn block_scan_prefix() -> String {
    format!("{}:", BLOCK_KEY_PREFIX)
}

pub fn block_key_for(block_hash: &str) -> String {
    format!("{}:{}", BLOCK_KEY_PREFIX, block_hash)
}

/// Persisted fact "`block_hash` is held by `holder_ids`". Never stored with
/// an empty holder set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockLocationRecord {
    pub block_hash: String,
    pub holder_ids: BTreeSet<String>,
}

impl BlockLocationRecord {
    pub fn new(block_hash: impl Into<String>) -> Self {
        Self {
            block_hash: block_hash.into(),
            holder_ids: BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, KvDb) {
        let dir = TempDir::new().unwrap();
        let db = KvDb::open(&dir.path().join("index")).unwrap();
        (dir, db)
    }

    #[test]
    fn scan_prefix_resumes_from_cursor() {
        let (_dir, db) = open_tmp();
        for i in 0..5 {
            db.put(&block_key_for(&format!("h{i}")), &i).unwrap();
        }
        db.put("other:zzz", &99).unwrap();
        db.put("a-before", &98).unwrap();

        let prefix = block_scan_prefix();
        let first = db.scan_prefix::<i32>(&prefix, None, 2).unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.entries[0].0, "block:h0");
        assert_eq!(first.next.as_deref(), Some("block:h1"));

        let second = db
            .scan_prefix::<i32>(&prefix, first.next.as_deref(), 2)
            .unwrap();
        assert_eq!(
            second.entries.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
            vec![2, 3]
        );

        let third = db
            .scan_prefix::<i32>(&prefix, second.next.as_deref(), 2)
            .unwrap();
        assert_eq!(third.entries.len(), 1);
        assert_eq!(third.entries[0].1, 4);
        assert!(third.next.is_none());
    }

    #[test]
    fn exactly_full_last_page_has_no_cursor() {
        let (_dir, db) = open_tmp();
        for i in 0..4 {
            db.put(&block_key_for(&format!("h{i}")), &i).unwrap();
        }
        db.put("other:zzz", &99).unwrap();

        let prefix = block_scan_prefix();
        let first = db.scan_prefix::<i32>(&prefix, None, 2).unwrap();
        assert_eq!(first.next.as_deref(), Some("block:h1"));

        let second = db
            .scan_prefix::<i32>(&prefix, first.next.as_deref(), 2)
            .unwrap();
        assert_eq!(second.entries.len(), 2);
        assert!(second.next.is_none());

        let empty = db.scan_prefix::<i32>("none:", None, 2).unwrap();
        assert!(empty.entries.is_empty());
        assert!(empty.next.is_none());
    }

    #[test]
    fn delete_prefix_leaves_other_keys() {
        let (_dir, db) = open_tmp();
        db.put(&block_key_for("a"), &1).unwrap();
        db.put(&block_key_for("b"), &2).unwrap();
        db.put("other:a", &3).unwrap();

        assert_eq!(db.delete_prefix(&block_scan_prefix()).unwrap(), 2);
        assert!(!db.exists(&block_key_for("a")).unwrap());
        assert_eq!(db.get::<i32>("other:a").unwrap(), Some(3));
    }
}
