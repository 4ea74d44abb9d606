//! Key-value storage for snapshots and counter records
//!
//! The durable layer is an opaque ordered byte-string store with prefix
//! scans and rename. Snapshots and durable counter records both go through
//! this trait.
//!
//! Implementations:
//! - `InMemoryObjectStore`: For unit tests and deterministic tests
//! - `LocalFsObjectStore`: One file per key under a base directory, written
//!   with `File` + `sync_all()` and a directory fsync after rename

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::File;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

pub type IoFuture<'a, T> = Pin<Box<dyn Future<Output = IoResult<T>> + Send + 'a>>;

/// Object store abstraction trait
pub trait ObjectStore: Send + Sync + 'static {
    /// Put an object (create or overwrite)
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> IoFuture<'a, ()>;

    /// Get an object's contents; `ErrorKind::NotFound` if absent
    fn get<'a>(&'a self, key: &'a str) -> IoFuture<'a, Vec<u8>>;

    /// Check if an object exists
    fn exists<'a>(&'a self, key: &'a str) -> IoFuture<'a, bool>;

    /// Delete an object (absent is not an error)
    fn delete<'a>(&'a self, key: &'a str) -> IoFuture<'a, ()>;

    /// Keys starting with `prefix`, sorted
    fn list<'a>(&'a self, prefix: &'a str) -> IoFuture<'a, Vec<String>>;

    /// Atomically replace `to` with `from`
    fn rename<'a>(&'a self, from: &'a str, to: &'a str) -> IoFuture<'a, ()>;
}

// ============================================================================
// InMemoryObjectStore
// ============================================================================

/// In-memory object store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Overwrite raw bytes without going through the async API (for testing)
    pub fn insert_raw(&self, key: &str, data: Vec<u8>) {
        self.data.write().insert(key.to_string(), data);
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> IoFuture<'a, ()> {
        Box::pin(async move {
            self.data.write().insert(key.to_string(), data.to_vec());
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> IoFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.data
                .read()
                .get(key)
                .cloned()
                .ok_or_else(|| IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key)))
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> IoFuture<'a, bool> {
        Box::pin(async move { Ok(self.data.read().contains_key(key)) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> IoFuture<'a, ()> {
        Box::pin(async move {
            self.data.write().remove(key);
            Ok(())
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> IoFuture<'a, Vec<String>> {
        Box::pin(async move {
            Ok(self
                .data
                .read()
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect())
        })
    }

    fn rename<'a>(&'a self, from: &'a str, to: &'a str) -> IoFuture<'a, ()> {
        Box::pin(async move {
            let mut data = self.data.write();
            match data.remove(from) {
                Some(obj) => {
                    data.insert(to.to_string(), obj);
                    Ok(())
                }
                None => Err(IoError::new(
                    ErrorKind::NotFound,
                    format!("Source key not found: {}", from),
                )),
            }
        })
    }
}

// ============================================================================
// LocalFsObjectStore
// ============================================================================

/// Local filesystem object store; keys are paths relative to `base_path`
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
}

impl LocalFsObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalFsObjectStore {
            base_path: base_path.into(),
        }
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Write `data` to `path` and fsync it before returning
fn write_synced(path: &Path, data: &[u8]) -> IoResult<()> {
    std::fs::create_dir_all(parent_dir(path))?;
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Rename, then fsync the destination directory so the new entry survives power loss
fn rename_synced(from: &Path, to: &Path) -> IoResult<()> {
    let dir = parent_dir(to);
    std::fs::create_dir_all(dir)?;
    std::fs::rename(from, to)?;
    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> IoResult<()> {
    File::open(dir)?.sync_all()
}

// Directories cannot be opened for fsync here.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> IoResult<()> {
    Ok(())
}

async fn blocking<T, F>(f: F) -> IoResult<T>
where
    F: FnOnce() -> IoResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IoError::other(e.to_string()))?
}

fn walk_dir(dir: &Path, base: &Path, prefix: &str, keys: &mut Vec<String>) -> IoResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(&path, base, prefix, keys)?;
        } else if path.is_file() {
            let Ok(relative) = path.strip_prefix(base) else {
                continue;
            };
            let key = relative.to_string_lossy().replace('\\', "/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
    }
    Ok(())
}

impl ObjectStore for LocalFsObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> IoFuture<'a, ()> {
        Box::pin(async move {
            let path = self.full_path(key);
            let data = data.to_vec();
            blocking(move || write_synced(&path, &data)).await
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> IoFuture<'a, Vec<u8>> {
        Box::pin(async move { tokio::fs::read(self.full_path(key)).await })
    }

    fn exists<'a>(&'a self, key: &'a str) -> IoFuture<'a, bool> {
        Box::pin(async move { tokio::fs::try_exists(self.full_path(key)).await })
    }

    fn delete<'a>(&'a self, key: &'a str) -> IoFuture<'a, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.full_path(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> IoFuture<'a, Vec<String>> {
        Box::pin(async move {
            let base = self.base_path.clone();
            let prefix = prefix.to_string();
            // Search from the deepest directory the prefix names.
            let search_dir = match prefix.rfind('/') {
                Some(idx) => base.join(&prefix[..idx]),
                None => base.clone(),
            };

            blocking(move || {
                let mut keys = Vec::new();
                if search_dir.is_dir() {
                    walk_dir(&search_dir, &base, &prefix, &mut keys)?;
                }
                keys.sort();
                Ok(keys)
            })
            .await
        })
    }

    fn rename<'a>(&'a self, from: &'a str, to: &'a str) -> IoFuture<'a, ()> {
        Box::pin(async move {
            let from_path = self.full_path(from);
            let to_path = self.full_path(to);
            blocking(move || rename_synced(&from_path, &to_path)).await
        })
    }
}
