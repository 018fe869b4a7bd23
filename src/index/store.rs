//! Ordered persistent key-value store backing disk segments.
//!
//! `FileStore` keeps two files per base name:
//! - `{base}.idx`: entry count (u32), then entries sorted by key:
//!   `key_len:u16 | key | offset:u64 | len:u32`
//! - `{base}.kv`: value blob, appended on every drain, memory-mapped for reads
//!
//! Inserts land in a dirty map and only become visible to `lookup` after
//! `drain`. `lookup_dirty` sees both.

use crate::error::{IndexError, Result};
use crate::index::types::StoreConfig;
use lru::LruCache;
use memmap2::Mmap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Append `suffix` to a base path without treating it as an extension
pub fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Store contract the disk segment is written against
pub trait KvStore: Send + Sync {
    /// Stage a value; replaces any staged value for the key
    fn insert(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Committed values for `key`, newest first (empty when absent)
    fn lookup(&self, key: &str) -> Result<Vec<Vec<u8>>>;

    /// Like `lookup`, but staged values shadow committed ones
    fn lookup_dirty(&self, key: &str) -> Result<Vec<Vec<u8>>>;

    /// Every key, committed or staged, in ascending order
    fn keys(&self) -> Vec<String>;

    /// Ordered `(key, value)` pairs over the dirty view
    fn full_key_set(&self) -> Box<dyn Iterator<Item = Result<(String, Vec<u8>)>> + '_>;

    /// Number of staged, not yet drained keys
    fn dirty_len(&self) -> usize;

    /// Persist staged values and make them visible to `lookup`
    fn drain(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Forget every key and remove the backing files
    fn destroy(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct ValueRef {
    offset: u64,
    len: u32,
}

/// `KvStore` over a sorted key dictionary plus an append-only value file
pub struct FileStore {
    base: PathBuf,
    config: StoreConfig,
    committed: BTreeMap<String, ValueRef>,
    dirty: BTreeMap<String, Vec<u8>>,
    /// None while the value file is empty
    data: Option<Mmap>,
    cache: Option<Mutex<LruCache<String, Vec<u8>>>>,
}

impl FileStore {
    /// Open the store at `base`, creating nothing until the first drain
    pub fn open(base: &Path, config: &StoreConfig) -> Result<Self> {
        let data = map_values(&suffixed(base, ".kv"))?;
        let committed = read_dict(&suffixed(base, ".idx"))?;

        let data_len = data.as_ref().map_or(0, |m| m.len() as u64);
        for (key, value) in &committed {
            if value.offset + value.len as u64 > data_len {
                return Err(IndexError::corrupt(
                    base.display().to_string(),
                    format!("value of '{}' lies past the end of the value file", key),
                ));
            }
        }

        let cache = NonZeroUsize::new(config.cache_size).map(|n| Mutex::new(LruCache::new(n)));

        Ok(Self {
            base: base.to_path_buf(),
            config: config.clone(),
            committed,
            dirty: BTreeMap::new(),
            data,
            cache,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }

    /// Size of the value file in bytes
    pub fn data_len(&self) -> u64 {
        self.data.as_ref().map_or(0, |m| m.len() as u64)
    }

    fn read_committed(&self, key: &str) -> Option<Vec<u8>> {
        let value = self.committed.get(key)?;
        if value.len == 0 {
            return Some(Vec::new());
        }

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().get(key) {
                return Some(hit.clone());
            }
        }

        let data = self.data.as_ref()?;
        let start = value.offset as usize;
        let bytes = data[start..start + value.len as usize].to_vec();

        if let Some(cache) = &self.cache {
            cache.lock().put(key.to_string(), bytes.clone());
        }
        Some(bytes)
    }

    fn write_dict(&self) -> Result<()> {
        let dict_path = suffixed(&self.base, ".idx");
        let tmp_path = suffixed(&self.base, ".idx.tmp");

        let mut file = BufWriter::new(File::create(&tmp_path)?);
        file.write_all(&(self.committed.len() as u32).to_le_bytes())?;
        for (key, value) in &self.committed {
            let key_bytes = key.as_bytes();
            let key_len = u16::try_from(key_bytes.len()).map_err(|_| {
                IndexError::Config(format!("key of {} bytes is too long", key_bytes.len()))
            })?;
            file.write_all(&key_len.to_le_bytes())?;
            file.write_all(key_bytes)?;
            file.write_all(&value.offset.to_le_bytes())?;
            file.write_all(&value.len.to_le_bytes())?;
        }
        file.flush()?;
        if self.config.sync {
            file.get_ref().sync_all()?;
        }
        drop(file);

        fs::rename(&tmp_path, &dict_path)?;
        Ok(())
    }
}

impl KvStore for FileStore {
    fn insert(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        if u32::try_from(value.len()).is_err() {
            return Err(IndexError::Config(format!(
                "value for '{}' exceeds 4GiB",
                key
            )));
        }
        self.dirty.insert(key.to_string(), value);
        Ok(())
    }

    fn lookup(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        Ok(self.read_committed(key).into_iter().collect())
    }

    fn lookup_dirty(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        if let Some(value) = self.dirty.get(key) {
            return Ok(vec![value.clone()]);
        }
        self.lookup(key)
    }

    fn keys(&self) -> Vec<String> {
        let keys: BTreeSet<&String> = self.committed.keys().chain(self.dirty.keys()).collect();
        keys.into_iter().cloned().collect()
    }

    fn full_key_set(&self) -> Box<dyn Iterator<Item = Result<(String, Vec<u8>)>> + '_> {
        Box::new(self.keys().into_iter().filter_map(move |key| {
            match self.lookup_dirty(&key) {
                Ok(values) => values.into_iter().next().map(|v| Ok((key, v))),
                Err(e) => Some(Err(e)),
            }
        }))
    }

    fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    fn drain(&mut self) -> Result<()> {
        let dict_exists = suffixed(&self.base, ".idx").exists();
        if self.dirty.is_empty() && dict_exists {
            return Ok(());
        }

        let kv_path = suffixed(&self.base, ".kv");
        let file = OpenOptions::new().create(true).append(true).open(&kv_path)?;
        let mut offset = file.metadata()?.len();
        let mut writer = BufWriter::with_capacity(self.config.block_size, file);

        let dirty = std::mem::take(&mut self.dirty);
        for (key, value) in dirty {
            writer.write_all(&value)?;
            if let Some(cache) = &self.cache {
                cache.lock().pop(&key);
            }
            self.committed.insert(
                key,
                ValueRef {
                    offset,
                    len: value.len() as u32,
                },
            );
            offset += value.len() as u64;
        }
        writer.flush()?;
        if self.config.sync {
            writer.get_ref().sync_all()?;
        }
        drop(writer);

        self.data = map_values(&kv_path)?;
        self.write_dict()
    }

    fn close(&mut self) -> Result<()> {
        self.drain()
    }

    fn destroy(&mut self) -> Result<()> {
        self.data = None;
        self.committed.clear();
        self.dirty.clear();
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
        for suffix in [".idx", ".kv", ".idx.tmp"] {
            remove_if_exists(&suffixed(&self.base, suffix))?;
        }
        Ok(())
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn map_values(path: &Path) -> Result<Option<Mmap>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    // SAFETY: value files are append-only; bytes already mapped never change
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(Some(mmap))
}

fn read_dict(path: &Path) -> Result<BTreeMap<String, ValueRef>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    let mut file = BufReader::new(file);
    let context = path.display().to_string();
    let truncated = |e: std::io::Error| IndexError::corrupt(context.clone(), e.to_string());

    let mut buf2 = [0u8; 2];
    let mut buf4 = [0u8; 4];
    let mut buf8 = [0u8; 8];

    file.read_exact(&mut buf4).map_err(truncated)?;
    let count = u32::from_le_bytes(buf4) as usize;

    let mut entries = BTreeMap::new();
    for _ in 0..count {
        file.read_exact(&mut buf2).map_err(truncated)?;
        let key_len = u16::from_le_bytes(buf2) as usize;

        let mut key_bytes = vec![0u8; key_len];
        file.read_exact(&mut key_bytes).map_err(truncated)?;
        let key = String::from_utf8(key_bytes)
            .map_err(|e| IndexError::corrupt(context.clone(), e.to_string()))?;

        file.read_exact(&mut buf8).map_err(truncated)?;
        let offset = u64::from_le_bytes(buf8);

        file.read_exact(&mut buf4).map_err(truncated)?;
        let len = u32::from_le_bytes(buf4);

        entries.insert(key, ValueRef { offset, len });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> FileStore {
        FileStore::open(&dir.path().join("store"), &StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_dirty_values_hidden_until_drain() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);

        store.insert("donut", b"one".to_vec()).unwrap();
        assert!(store.lookup("donut").unwrap().is_empty());
        assert_eq!(store.lookup_dirty("donut").unwrap(), vec![b"one".to_vec()]);

        store.drain().unwrap();
        assert_eq!(store.lookup("donut").unwrap(), vec![b"one".to_vec()]);
        assert_eq!(store.dirty_len(), 0);
    }

    #[test]
    fn test_reopen_sees_committed_values() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open(&dir);
            store.insert("plate", b"p".to_vec()).unwrap();
            store.insert("glass", b"gg".to_vec()).unwrap();
            store.close().unwrap();
        }

        let store = open(&dir);
        assert_eq!(store.keys(), vec!["glass".to_string(), "plate".to_string()]);
        assert_eq!(store.lookup("glass").unwrap(), vec![b"gg".to_vec()]);
        assert_eq!(store.data_len(), 3);
    }

    #[test]
    fn test_overwrite_after_drain() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.insert("donut", b"old".to_vec()).unwrap();
        store.drain().unwrap();
        assert_eq!(store.lookup("donut").unwrap(), vec![b"old".to_vec()]);

        store.insert("donut", b"newer".to_vec()).unwrap();
        assert_eq!(store.lookup("donut").unwrap(), vec![b"old".to_vec()]);
        store.drain().unwrap();
        assert_eq!(store.lookup("donut").unwrap(), vec![b"newer".to_vec()]);
    }

    #[test]
    fn test_full_key_set_is_ordered_and_merged() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.insert("b", b"2".to_vec()).unwrap();
        store.drain().unwrap();
        store.insert("a", b"1".to_vec()).unwrap();
        store.insert("b", b"3".to_vec()).unwrap();

        let pairs: Vec<_> = store.full_key_set().collect::<Result<_>>().unwrap();
        assert_eq!(
            pairs,
            vec![("a".to_string(), b"1".to_vec()), ("b".to_string(), b"3".to_vec())]
        );
    }

    #[test]
    fn test_destroy_removes_files() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("store");
        let mut store = FileStore::open(&base, &StoreConfig::default()).unwrap();
        store.insert("donut", b"x".to_vec()).unwrap();
        store.drain().unwrap();
        assert!(suffixed(&base, ".idx").exists());

        store.destroy().unwrap();
        assert!(!suffixed(&base, ".idx").exists());
        assert!(!suffixed(&base, ".kv").exists());
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_truncated_dict_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("store");
        fs::write(suffixed(&base, ".idx"), [3u8, 0, 0, 0, 5]).unwrap();

        let err = FileStore::open(&base, &StoreConfig::default()).err().unwrap();
        assert!(matches!(err, IndexError::CorruptData { .. }));
    }

    #[test]
    fn test_cache_disabled() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            cache_size: 0,
            ..Default::default()
        };
        let mut store = FileStore::open(&dir.path().join("store"), &config).unwrap();
        store.insert("donut", b"x".to_vec()).unwrap();
        store.drain().unwrap();
        assert_eq!(store.lookup("donut").unwrap(), vec![b"x".to_vec()]);
    }
}
