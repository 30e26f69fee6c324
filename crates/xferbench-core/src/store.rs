//! Remote store interface and an in-memory implementation.
//!
//! The benchmark only ever talks to the store through [`RemoteStore`]; the real
//! client (iRODS, S3 gateway, mounted share) lives behind it.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object metadata, key to value.
pub type Metadata = BTreeMap<String, String>;

/// Operations the benchmark needs from a remote object store.
pub trait RemoteStore: Send + Sync {
    /// Upload a local file to `remote_path`. Without `force`, an existing object is an error.
    fn put<'a>(&'a self, local_path: &'a Path, remote_path: &'a str, force: bool) -> BoxFuture<'a, StoreResult<()>>;
    /// Download `remote_path` into a local file. Without `force`, an existing file is an error.
    fn get<'a>(&'a self, remote_path: &'a str, local_path: &'a Path, force: bool) -> BoxFuture<'a, StoreResult<()>>;
    /// Delete an object. With `force`, a missing object is not an error.
    fn unlink<'a>(&'a self, remote_path: &'a str, force: bool) -> BoxFuture<'a, StoreResult<()>>;
    /// Size in bytes of a stored object.
    fn stat_size<'a>(&'a self, remote_path: &'a str) -> BoxFuture<'a, StoreResult<u64>>;
    /// Attach one metadata attribute to an object.
    fn add_metadata<'a>(&'a self, remote_path: &'a str, key: &'a str, value: &'a str) -> BoxFuture<'a, StoreResult<()>>;
    /// Read all metadata attributes of an object.
    fn read_metadata<'a>(&'a self, remote_path: &'a str) -> BoxFuture<'a, StoreResult<Metadata>>;
    /// Names (not full paths) of the objects directly under `remote_dir`.
    fn list<'a>(&'a self, remote_dir: &'a str) -> BoxFuture<'a, StoreResult<Vec<String>>>;
    /// Release the session. Further operations fail.
    fn close(&self) -> BoxFuture<'_, StoreResult<()>>;
}

impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    fn put<'a>(&'a self, local_path: &'a Path, remote_path: &'a str, force: bool) -> BoxFuture<'a, StoreResult<()>> {
        (**self).put(local_path, remote_path, force)
    }
    fn get<'a>(&'a self, remote_path: &'a str, local_path: &'a Path, force: bool) -> BoxFuture<'a, StoreResult<()>> {
        (**self).get(remote_path, local_path, force)
    }
    fn unlink<'a>(&'a self, remote_path: &'a str, force: bool) -> BoxFuture<'a, StoreResult<()>> {
        (**self).unlink(remote_path, force)
    }
    fn stat_size<'a>(&'a self, remote_path: &'a str) -> BoxFuture<'a, StoreResult<u64>> {
        (**self).stat_size(remote_path)
    }
    fn add_metadata<'a>(&'a self, remote_path: &'a str, key: &'a str, value: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        (**self).add_metadata(remote_path, key, value)
    }
    fn read_metadata<'a>(&'a self, remote_path: &'a str) -> BoxFuture<'a, StoreResult<Metadata>> {
        (**self).read_metadata(remote_path)
    }
    fn list<'a>(&'a self, remote_dir: &'a str) -> BoxFuture<'a, StoreResult<Vec<String>>> {
        (**self).list(remote_dir)
    }
    fn close(&self) -> BoxFuture<'_, StoreResult<()>> {
        (**self).close()
    }
}

/// Join a remote directory and an object name with exactly one slash.
pub fn join_remote(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Statistics for the in-memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStoreStats {
    /// Number of put operations.
    pub puts: u64,
    /// Number of get operations.
    pub gets: u64,
    /// Number of unlink operations.
    pub unlinks: u64,
    /// Number of metadata attributes written.
    pub metadata_writes: u64,
    /// Total bytes currently stored.
    pub total_bytes_stored: u64,
}

/// Faults the in-memory store injects on demand.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Fail this many upcoming puts.
    pub fail_puts: u32,
    /// Fail every put whose remote path contains this string.
    pub fail_puts_containing: Option<String>,
    /// Store one byte less than uploaded.
    pub truncate_puts: bool,
    /// Flip the first byte of every downloaded object.
    pub corrupt_gets: bool,
    /// Reject every metadata write.
    pub fail_metadata: bool,
    /// Reject every operation as if the server were down.
    pub unavailable: bool,
}

#[derive(Debug, Clone, Default)]
struct StoredObject {
    data: Vec<u8>,
    metadata: Metadata,
}

/// In-memory store for tests and dry runs, with fault injection.
pub struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    stats: Mutex<MemoryStoreStats>,
    faults: Mutex<FaultPlan>,
    closed: Mutex<bool>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            stats: Mutex::new(MemoryStoreStats::default()),
            faults: Mutex::new(FaultPlan::default()),
            closed: Mutex::new(false),
        }
    }

    /// Create a store that injects the given faults.
    pub fn with_faults(faults: FaultPlan) -> Self {
        let store = Self::new();
        *store.faults.lock() = faults;
        store
    }

    /// Replace the active fault plan.
    pub fn set_faults(&self, faults: FaultPlan) {
        *self.faults.lock() = faults;
    }

    /// Get statistics about store operations.
    pub fn stats(&self) -> MemoryStoreStats {
        self.stats.lock().clone()
    }

    /// Number of stored objects.
    pub fn stored_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Insert an object directly, bypassing faults.
    pub fn insert(&self, remote_path: &str, data: Vec<u8>) {
        let len = data.len() as u64;
        self.objects.lock().insert(
            remote_path.to_string(),
            StoredObject {
                data,
                metadata: Metadata::new(),
            },
        );
        self.stats.lock().total_bytes_stored += len;
    }

    /// True once [`RemoteStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    fn check_open(&self) -> StoreResult<()> {
        if *self.closed.lock() {
            return Err(StoreError::new(StoreError::UNAVAILABLE, "session closed"));
        }
        if self.faults.lock().unavailable {
            return Err(StoreError::new(StoreError::UNAVAILABLE, "connection refused"));
        }
        Ok(())
    }

    fn put_fault(&self, remote_path: &str) -> Option<StoreError> {
        let mut faults = self.faults.lock();
        if faults.fail_puts > 0 {
            faults.fail_puts -= 1;
            return Some(StoreError::new(-27000, format!("injected put failure for {}", remote_path)));
        }
        match &faults.fail_puts_containing {
            Some(pattern) if remote_path.contains(pattern.as_str()) => Some(StoreError::new(
                -27000,
                format!("injected put failure for {}", remote_path),
            )),
            _ => None,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryStore {
    fn put<'a>(&'a self, local_path: &'a Path, remote_path: &'a str, force: bool) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.check_open()?;
            if let Some(err) = self.put_fault(remote_path) {
                return Err(err);
            }
            let mut data = tokio::fs::read(local_path).await?;
            if self.faults.lock().truncate_puts {
                data.pop();
            }
            let bytes = data.len() as u64;

            let mut objects = self.objects.lock();
            if !force && objects.contains_key(remote_path) {
                return Err(StoreError::new(
                    StoreError::OVERWRITE_WITHOUT_FORCE,
                    format!("{} already exists", remote_path),
                ));
            }
            let replaced = objects
                .insert(
                    remote_path.to_string(),
                    StoredObject {
                        data,
                        metadata: Metadata::new(),
                    },
                )
                .map(|o| o.data.len() as u64)
                .unwrap_or(0);
            drop(objects);

            let mut stats = self.stats.lock();
            stats.puts += 1;
            stats.total_bytes_stored = stats.total_bytes_stored.saturating_sub(replaced).saturating_add(bytes);
            debug!(remote_path, bytes, "memory store put");
            Ok(())
        })
    }

    fn get<'a>(&'a self, remote_path: &'a str, local_path: &'a Path, force: bool) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.check_open()?;
            let mut data = self
                .objects
                .lock()
                .get(remote_path)
                .map(|o| o.data.clone())
                .ok_or_else(|| StoreError::not_found(remote_path))?;
            if self.faults.lock().corrupt_gets {
                if let Some(first) = data.first_mut() {
                    *first ^= 0xFF;
                }
            }
            if !force && tokio::fs::try_exists(local_path).await.unwrap_or(false) {
                return Err(StoreError::new(
                    StoreError::OVERWRITE_WITHOUT_FORCE,
                    format!("{} already exists", local_path.display()),
                ));
            }
            tokio::fs::write(local_path, &data).await?;
            self.stats.lock().gets += 1;
            debug!(remote_path, bytes = data.len(), "memory store get");
            Ok(())
        })
    }

    fn unlink<'a>(&'a self, remote_path: &'a str, force: bool) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.check_open()?;
            let removed = self.objects.lock().remove(remote_path);
            match removed {
                Some(obj) => {
                    let mut stats = self.stats.lock();
                    stats.unlinks += 1;
                    stats.total_bytes_stored = stats.total_bytes_stored.saturating_sub(obj.data.len() as u64);
                    Ok(())
                }
                None if force => Ok(()),
                None => Err(StoreError::not_found(remote_path)),
            }
        })
    }

    fn stat_size<'a>(&'a self, remote_path: &'a str) -> BoxFuture<'a, StoreResult<u64>> {
        Box::pin(async move {
            self.check_open()?;
            self.objects
                .lock()
                .get(remote_path)
                .map(|o| o.data.len() as u64)
                .ok_or_else(|| StoreError::not_found(remote_path))
        })
    }

    fn add_metadata<'a>(&'a self, remote_path: &'a str, key: &'a str, value: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.check_open()?;
            if self.faults.lock().fail_metadata {
                return Err(StoreError::new(-1814000, "injected metadata failure"));
            }
            let mut objects = self.objects.lock();
            let obj = objects
                .get_mut(remote_path)
                .ok_or_else(|| StoreError::not_found(remote_path))?;
            obj.metadata.insert(key.to_string(), value.to_string());
            drop(objects);
            self.stats.lock().metadata_writes += 1;
            Ok(())
        })
    }

    fn read_metadata<'a>(&'a self, remote_path: &'a str) -> BoxFuture<'a, StoreResult<Metadata>> {
        Box::pin(async move {
            self.check_open()?;
            self.objects
                .lock()
                .get(remote_path)
                .map(|o| o.metadata.clone())
                .ok_or_else(|| StoreError::not_found(remote_path))
        })
    }

    fn list<'a>(&'a self, remote_dir: &'a str) -> BoxFuture<'a, StoreResult<Vec<String>>> {
        Box::pin(async move {
            self.check_open()?;
            let prefix = format!("{}/", remote_dir.trim_end_matches('/'));
            let mut names: Vec<String> = self
                .objects
                .lock()
                .keys()
                .filter_map(|k| k.strip_prefix(prefix.as_str()))
                .filter(|rest| !rest.contains('/'))
                .map(str::to_string)
                .collect();
            names.sort();
            Ok(names)
        })
    }

    fn close(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            *self.closed.lock() = true;
            debug!("memory store closed");
            Ok(())
        })
    }
}
