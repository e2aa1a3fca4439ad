//! Resolution of keystore and password file locations

use crate::error::Result;
use dashmap::DashMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "file:";

/// Opens byte streams for configured resource locations
pub trait ResourceResolver: Send + Sync {
    /// Open `location`, or `None` if nothing exists there
    fn open(&self, location: &str) -> Result<Option<Box<dyn Read + Send>>>;
}

/// Resolves locations against the file system
///
/// Locations may carry a `file:` prefix; relative paths are resolved
/// against the base directory.
#[derive(Clone, Debug)]
pub struct FileSystemResolver {
    base_dir: PathBuf,
}

impl FileSystemResolver {
    /// Resolver relative to the current working directory
    pub fn new() -> Self {
        Self {
            base_dir: PathBuf::from("."),
        }
    }

    /// Resolver relative to `base_dir`
    pub fn with_base_dir(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// File system path for `location`
    pub fn path(&self, location: &str) -> PathBuf {
        let location = location.strip_prefix(FILE_PREFIX).unwrap_or(location);
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl Default for FileSystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceResolver for FileSystemResolver {
    fn open(&self, location: &str) -> Result<Option<Box<dyn Read + Send>>> {
        let path = self.path(location);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(Box::new(File::open(path)?)))
    }
}

/// Resolves locations against in-memory resources
#[derive(Debug, Default)]
pub struct MemoryResolver {
    resources: DashMap<String, Vec<u8>>,
}

impl MemoryResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the bytes served for `location`
    pub fn insert(&self, location: impl Into<String>, bytes: Vec<u8>) {
        self.resources.insert(location.into(), bytes);
    }

    /// Remove a resource
    pub fn remove(&self, location: &str) {
        self.resources.remove(location);
    }
}

impl ResourceResolver for MemoryResolver {
    fn open(&self, location: &str) -> Result<Option<Box<dyn Read + Send>>> {
        Ok(self
            .resources
            .get(location)
            .map(|bytes| Box::new(Cursor::new(bytes.value().clone())) as Box<dyn Read + Send>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_system_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keys.json"), b"{}").unwrap();
        let resolver = FileSystemResolver::with_base_dir(dir.path());

        let mut content = String::new();
        resolver
            .open("file:keys.json")
            .unwrap()
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "{}");

        let absolute = dir.path().join("keys.json");
        assert!(resolver.open(absolute.to_str().unwrap()).unwrap().is_some());
        assert!(resolver.open("missing.json").unwrap().is_none());
    }

    #[test]
    fn test_memory_resolution() {
        let resolver = MemoryResolver::new();
        resolver.insert("keys", b"abc".to_vec());
        assert!(resolver.open("keys").unwrap().is_some());
        resolver.remove("keys");
        assert!(resolver.open("keys").unwrap().is_none());
    }
}
