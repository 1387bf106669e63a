//! Flat on-disk image cache shared by hub and node processes.
//!
//! File contents are verbatim image bytes; file names are the
//! command-supplied image names. There is no index file — the directory
//! is the inventory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{MuralError, Result};
use crate::hash;
use crate::protocol::FileInfo;

/// Directory name under the OS temp dir used by default on both sides.
const CACHE_DIR_NAME: &str = "mural-images";

pub struct ImageCache {
    dir: PathBuf,
}

impl ImageCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The default cache location for this machine.
    pub fn default_dir() -> PathBuf {
        std::env::temp_dir().join(CACHE_DIR_NAME)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute path for a cached image name. Names carrying path
    /// separators are rejected — they would escape the cache directory.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(MuralError::app(format!("invalid image name: {name:?}")));
        }
        Ok(self.dir.join(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Write image bytes verbatim.
    pub fn save(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Read a cached image and its hex digest; errors if absent.
    pub fn read(&self, name: &str) -> Result<(Vec<u8>, String)> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Err(MuralError::app(format!("no cached image named {name}")));
        }
        hash::read_hash_file(&path)
    }

    /// Total bytes held in the cache. Cheap (no hashing); suitable for
    /// gauge updates on every write.
    pub fn total_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.dir)? {
            let meta = entry?.metadata()?;
            if meta.is_file() {
                total += meta.len();
            }
        }
        Ok(total)
    }

    /// Inventory of every cached file with sizes, modes, mtimes, and
    /// hashes. Subdirectories are skipped; the cache is flat by design.
    pub fn scan(&self) -> Result<Vec<FileInfo>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let (_, digest) = hash::read_hash_file(&entry.path())?;
            let mod_time: DateTime<Utc> = meta.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());
            files.push(FileInfo {
                name,
                size: meta.len(),
                mode: file_mode(&meta),
                mod_time,
                hash: digest,
            });
        }
        Ok(files)
    }
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> u32 {
    0
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn temp_cache(tag: &str) -> ImageCache {
        let dir = std::env::temp_dir().join(format!("mural-cache-test-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        ImageCache::open(dir).unwrap()
    }

    #[test]
    fn save_read_round_trip() {
        let cache = temp_cache("rt");
        cache.save("a.png", b"abc").unwrap();
        let (bytes, digest) = cache.read("a.png").unwrap();
        assert_eq!(bytes, b"abc");
        assert_eq!(digest, hash::hash_bytes(b"abc"));
    }

    #[test]
    fn read_missing_is_an_error() {
        let cache = temp_cache("missing");
        assert!(cache.read("ghost.png").is_err());
    }

    #[test]
    fn rejects_escaping_names() {
        let cache = temp_cache("escape");
        assert!(cache.save("../evil", b"x").is_err());
        assert!(cache.save("a/b", b"x").is_err());
    }

    #[test]
    fn scan_lists_files_with_hashes() {
        let cache = temp_cache("scan");
        cache.save("one", b"1").unwrap();
        cache.save("two", b"22").unwrap();
        let mut files = cache.scan().unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "one");
        assert_eq!(files[1].size, 2);
        assert_eq!(files[1].hash, hash::hash_bytes(b"22"));
        assert_eq!(cache.total_bytes().unwrap(), 3);
    }
}
