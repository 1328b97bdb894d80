//! Persisted pipeline cache storage
//!
//! Compiled pipeline blobs are keyed by a 64-bit identifier and stored
//! verbatim. The store is a warm-start optimization only; a missing entry
//! is an ordinary `Ok(None)` and the caller compiles from scratch.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Pipeline cache storage failures
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The cache root could not be created or a blob could not be
    /// read or written
    #[error("pipeline cache i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Keyed blob storage for compiled pipeline data
pub trait PipelineCacheStore {
    /// Persist `bytes` under `id`, replacing any previous entry
    fn store(&mut self, id: u64, bytes: &[u8]) -> Result<(), CacheError>;

    /// Fetch the blob stored under `id`; `None` when absent
    fn load(&self, id: u64) -> Result<Option<Vec<u8>>, CacheError>;
}

/// One file per identifier under a root directory, raw bytes
pub struct DiskPipelineCache {
    root: PathBuf,
}

impl DiskPipelineCache {
    /// Open a cache rooted at `root`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, CacheError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        log::debug!("Pipeline cache root: {:?}", root);
        Ok(Self { root })
    }

    fn entry_path(&self, id: u64) -> PathBuf {
        self.root.join(format!("{id:016x}.bin"))
    }
}

impl PipelineCacheStore for DiskPipelineCache {
    fn store(&mut self, id: u64, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.entry_path(id);
        fs::write(&path, bytes)?;
        log::debug!("Stored {} cache bytes under {:016x}", bytes.len(), id);
        Ok(())
    }

    fn load(&self, id: u64) -> Result<Option<Vec<u8>>, CacheError> {
        match fs::read(self.entry_path(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("render_core_cache_{tag}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn missing_entries_load_as_none() {
        let cache = DiskPipelineCache::new(scratch_dir("missing")).unwrap();
        assert!(cache.load(0xdead_beef).unwrap().is_none());
    }

    #[test]
    fn stored_blobs_round_trip() {
        let mut cache = DiskPipelineCache::new(scratch_dir("round_trip")).unwrap();
        cache.store(42, &[7, 8, 9]).unwrap();
        assert_eq!(cache.load(42).unwrap(), Some(vec![7, 8, 9]));
    }

    #[test]
    fn storing_twice_replaces_the_entry() {
        let mut cache = DiskPipelineCache::new(scratch_dir("replace")).unwrap();
        cache.store(1, &[1, 1, 1, 1]).unwrap();
        cache.store(1, &[2]).unwrap();
        assert_eq!(cache.load(1).unwrap(), Some(vec![2]));
    }

    #[test]
    fn identifiers_do_not_collide() {
        let mut cache = DiskPipelineCache::new(scratch_dir("distinct")).unwrap();
        cache.store(0x10, &[1]).unwrap();
        cache.store(0x01, &[2]).unwrap();
        assert_eq!(cache.load(0x10).unwrap(), Some(vec![1]));
        assert_eq!(cache.load(0x01).unwrap(), Some(vec![2]));
    }
}
