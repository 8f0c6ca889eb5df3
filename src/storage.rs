//! RocksDB key/value layer used by the durable game store

use crate::errors::{StorageError, StorageResult};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::{path::Path, sync::Arc};

#[derive(Clone)]
pub struct RocksStorage {
    db: Arc<DB>,
}

impl RocksStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path.as_ref()).map_err(|e| {
            StorageError::DatabaseOpenFailed(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Open, wiping any existing data first when `clear` is set
    pub fn open(path: &str, clear: bool) -> StorageResult<Self> {
        if clear && Path::new(path).exists() {
            DB::destroy(&Options::default(), path)
                .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        }
        Self::new(path)
    }

    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        Ok(self.db.put(key, value)?)
    }

    pub fn batch_write<K, V>(&self, items: &[(K, V)]) -> StorageResult<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        Ok(self.db.write(batch)?)
    }

    /// Up to `limit` entries whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8], limit: usize) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) || rows.len() >= limit {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    /// Up to `limit` entries whose key starts with `prefix`, last key first
    pub fn scan_prefix_rev(&self, prefix: &[u8], limit: usize) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        // Seek from the first key past the prefix range
        let mut upper = prefix.to_vec();
        match upper.last_mut() {
            Some(last) if *last < u8::MAX => *last += 1,
            _ => {
                return Err(StorageError::ReadFailed(
                    "reverse scan needs a prefix ending below 0xff".to_string(),
                ))
            }
        }

        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(upper.as_slice(), Direction::Reverse)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if &key[..] >= upper.as_slice() {
                continue;
            }
            if !key.starts_with(prefix) || rows.len() >= limit {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }
}
