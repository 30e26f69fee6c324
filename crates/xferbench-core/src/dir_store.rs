//! Directory-backed remote store.
//!
//! Maps remote paths onto a local directory tree, typically a mounted share of
//! the storage service. Metadata lives in a JSON sidecar next to each object.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::StoreError;
use crate::store::{BoxFuture, Metadata, RemoteStore, StoreResult};

const META_SUFFIX: &str = ".meta.json";

/// [`RemoteStore`] over a local directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open a store rooted at `root`. The directory must exist.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::new(
                StoreError::UNAVAILABLE,
                format!("store root {} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a remote path below the root, rejecting `..` escapes.
    fn resolve(&self, remote_path: &str) -> StoreResult<PathBuf> {
        let rel = Path::new(remote_path.trim_start_matches('/'));
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(StoreError::new(
                StoreError::LOCAL_IO,
                format!("invalid remote path: {}", remote_path),
            ));
        }
        Ok(self.root.join(rel))
    }

    fn sidecar(object: &Path) -> PathBuf {
        let mut name = object.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(META_SUFFIX);
        object.with_file_name(name)
    }

    async fn load_metadata(object: &Path) -> StoreResult<Metadata> {
        match tokio::fs::read(Self::sidecar(object)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::new(StoreError::LOCAL_IO, format!("corrupt metadata: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Metadata::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl RemoteStore for DirStore {
    fn put<'a>(&'a self, local_path: &'a Path, remote_path: &'a str, force: bool) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let target = self.resolve(remote_path)?;
            if !force && tokio::fs::try_exists(&target).await? {
                return Err(StoreError::new(
                    StoreError::OVERWRITE_WITHOUT_FORCE,
                    format!("{} already exists", remote_path),
                ));
            }
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let bytes = tokio::fs::copy(local_path, &target).await?;
            // a re-upload starts with fresh metadata
            let _ = tokio::fs::remove_file(Self::sidecar(&target)).await;
            debug!(remote_path, bytes, "dir store put");
            Ok(())
        })
    }

    fn get<'a>(&'a self, remote_path: &'a str, local_path: &'a Path, force: bool) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let source = self.resolve(remote_path)?;
            if !force && tokio::fs::try_exists(local_path).await? {
                return Err(StoreError::new(
                    StoreError::OVERWRITE_WITHOUT_FORCE,
                    format!("{} already exists", local_path.display()),
                ));
            }
            let bytes = tokio::fs::copy(&source, local_path).await?;
            debug!(remote_path, bytes, "dir store get");
            Ok(())
        })
    }

    fn unlink<'a>(&'a self, remote_path: &'a str, force: bool) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let target = self.resolve(remote_path)?;
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if force && e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            let _ = tokio::fs::remove_file(Self::sidecar(&target)).await;
            Ok(())
        })
    }

    fn stat_size<'a>(&'a self, remote_path: &'a str) -> BoxFuture<'a, StoreResult<u64>> {
        Box::pin(async move {
            let target = self.resolve(remote_path)?;
            Ok(tokio::fs::metadata(&target).await?.len())
        })
    }

    fn add_metadata<'a>(&'a self, remote_path: &'a str, key: &'a str, value: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let target = self.resolve(remote_path)?;
            if !tokio::fs::try_exists(&target).await? {
                return Err(StoreError::not_found(remote_path));
            }
            let mut meta = Self::load_metadata(&target).await?;
            meta.insert(key.to_string(), value.to_string());
            let json = serde_json::to_vec_pretty(&meta)
                .map_err(|e| StoreError::new(StoreError::LOCAL_IO, e.to_string()))?;
            tokio::fs::write(Self::sidecar(&target), json).await?;
            Ok(())
        })
    }

    fn read_metadata<'a>(&'a self, remote_path: &'a str) -> BoxFuture<'a, StoreResult<Metadata>> {
        Box::pin(async move {
            let target = self.resolve(remote_path)?;
            if !tokio::fs::try_exists(&target).await? {
                return Err(StoreError::not_found(remote_path));
            }
            Self::load_metadata(&target).await
        })
    }

    fn list<'a>(&'a self, remote_dir: &'a str) -> BoxFuture<'a, StoreResult<Vec<String>>> {
        Box::pin(async move {
            let dir = self.resolve(remote_dir)?;
            let mut names = Vec::new();
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.ends_with(META_SUFFIX) {
                    names.push(name);
                }
            }
            names.sort();
            Ok(names)
        })
    }

    fn close(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dir_store_roundtrip_with_metadata() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let store = DirStore::open(root.path()).unwrap();

        let src = work.path().join("in.bin");
        tokio::fs::write(&src, vec![9u8; 4096]).await.unwrap();
        store.put(&src, "/tempZone/home/rods/in.bin", false).await.unwrap();
        assert_eq!(store.stat_size("/tempZone/home/rods/in.bin").await.unwrap(), 4096);

        store
            .add_metadata("/tempZone/home/rods/in.bin", "compression_algorithm", "zstd")
            .await
            .unwrap();
        let meta = store.read_metadata("/tempZone/home/rods/in.bin").await.unwrap();
        assert_eq!(meta.get("compression_algorithm").map(String::as_str), Some("zstd"));

        assert_eq!(store.list("/tempZone/home/rods").await.unwrap(), vec!["in.bin"]);

        let out = work.path().join("out.bin");
        store.get("/tempZone/home/rods/in.bin", &out, false).await.unwrap();
        assert_eq!(tokio::fs::read(&out).await.unwrap().len(), 4096);

        store.unlink("/tempZone/home/rods/in.bin", false).await.unwrap();
        assert!(store.list("/tempZone/home/rods").await.unwrap().is_empty());
        assert!(store.unlink("/tempZone/home/rods/in.bin", true).await.is_ok());
    }

    #[tokio::test]
    async fn test_dir_store_rejects_escape() {
        let root = tempfile::tempdir().unwrap();
        let store = DirStore::open(root.path()).unwrap();
        assert!(store.stat_size("/../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let store = DirStore::open(root.path()).unwrap();
        let err = store.stat_size("/nope").await.unwrap_err();
        assert_eq!(err.code, StoreError::NOT_FOUND);
        assert!(store.list("/no/such/dir").await.unwrap().is_empty());
    }

    #[test]
    fn test_open_requires_directory() {
        assert!(DirStore::open("/definitely/not/here").is_err());
    }
}
