// src/storage/encrypted/store.rs
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

use super::cipher::StorageCipher;
use super::errors::{Result, StorageError};

/// One write unit of an atomic batch. Values are plaintext serialized
/// rows; the store encrypts them before they touch the database.
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Encrypted key-value store over RocksDB. Keys are plaintext (they carry
/// only identifiers); values are sealed by the row cipher, bound to the
/// key they are stored under.
pub struct EncryptedStore {
    db: DB,
    cipher: StorageCipher,
}

impl EncryptedStore {
    pub fn new<P: AsRef<Path>>(path: P, key_material: &[u8]) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path).map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(Self {
            db,
            cipher: StorageCipher::new(key_material),
        })
    }

    pub fn put<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        let serialized =
            serde_json::to_vec(value).map_err(|e| StorageError::InvalidFormat(e.to_string()))?;
        let encrypted = self.cipher.encrypt(key, &serialized)?;

        self.db
            .put(key, encrypted)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        let encrypted = match self
            .db
            .get(key)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?
        {
            Some(data) => data,
            None => return Ok(None),
        };

        let decrypted = self.cipher.decrypt(key, &encrypted)?;
        let value = serde_json::from_slice(&decrypted)
            .map_err(|e| StorageError::InvalidFormat(e.to_string()))?;

        Ok(Some(value))
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.db
            .delete(key)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// All values whose key starts with `prefix`, in key order.
    pub fn scan_prefix<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        let mut results = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));

        for item in iter {
            let (key, encrypted) =
                item.map_err(|e| StorageError::DatabaseError(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            let decrypted = self.cipher.decrypt(&key, &encrypted)?;
            let value = serde_json::from_slice(&decrypted)
                .map_err(|e| StorageError::InvalidFormat(e.to_string()))?;
            results.push(value);
        }

        Ok(results)
    }

    /// Applies puts and deletes in one atomic RocksDB write.
    pub fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    let encrypted = self.cipher.encrypt(&key, &value)?;
                    batch.put(&key, &encrypted);
                }
                BatchOp::Delete { key } => batch.delete(&key),
            }
        }

        self.db
            .write(batch)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestRow {
        field1: String,
        field2: i32,
    }

    #[test]
    fn test_put_and_get() {
        let temp_dir = tempdir().unwrap();
        let store = EncryptedStore::new(temp_dir.path(), b"test key").unwrap();

        let row = TestRow {
            field1: "test".to_string(),
            field2: 42,
        };

        store.put(b"test_key", &row).unwrap();
        let retrieved: TestRow = store.get(b"test_key").unwrap().unwrap();
        assert_eq!(row, retrieved);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let temp_dir = tempdir().unwrap();
        let store = EncryptedStore::new(temp_dir.path(), b"test key").unwrap();
        let missing: Option<TestRow> = store.get(b"no_such_key").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_delete() {
        let temp_dir = tempdir().unwrap();
        let store = EncryptedStore::new(temp_dir.path(), b"test key").unwrap();

        store.put(b"k", &"v").unwrap();
        store.delete(b"k").unwrap();
        let gone: Option<String> = store.get(b"k").unwrap();
        assert!(gone.is_none());
    }

    #[test]
    fn test_scan_prefix_ordered_and_bounded() {
        let temp_dir = tempdir().unwrap();
        let store = EncryptedStore::new(temp_dir.path(), b"test key").unwrap();

        store.put(b"row/a", &"first").unwrap();
        store.put(b"row/b", &"second").unwrap();
        store.put(b"other/c", &"outside").unwrap();

        let rows: Vec<String> = store.scan_prefix(b"row/").unwrap();
        assert_eq!(rows, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_apply_batch_atomic_ops() {
        let temp_dir = tempdir().unwrap();
        let store = EncryptedStore::new(temp_dir.path(), b"test key").unwrap();

        store.put(b"stale", &"old").unwrap();
        store
            .apply_batch(vec![
                BatchOp::Put {
                    key: b"fresh".to_vec(),
                    value: serde_json::to_vec(&"new").unwrap(),
                },
                BatchOp::Delete {
                    key: b"stale".to_vec(),
                },
            ])
            .unwrap();

        let fresh: Option<String> = store.get(b"fresh").unwrap();
        assert_eq!(fresh.as_deref(), Some("new"));
        let stale: Option<String> = store.get(b"stale").unwrap();
        assert!(stale.is_none());
    }

    #[test]
    fn test_values_are_encrypted_at_rest() {
        let temp_dir = tempdir().unwrap();
        {
            let store = EncryptedStore::new(temp_dir.path(), b"right key").unwrap();
            store.put(b"k", &"sensitive").unwrap();
        }
        let store = EncryptedStore::new(temp_dir.path(), b"wrong key").unwrap();
        let result: Result<Option<String>> = store.get(b"k");
        assert!(result.is_err());
    }
}
