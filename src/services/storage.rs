//! Named file storage ("disks") for uploaded import files.
//!
//! A `Storage` is addressed by a relative path. `StorageRegistry` maps disk names to
//! backends so a queued job can resolve the disk it was submitted with.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

pub type ByteStream = Box<dyn AsyncRead + Unpin + Send>;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn open_read(&self, path: &str) -> Result<ByteStream>;

    async fn put(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Remove the file. Deleting a missing file succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;
}

// =============================================================================
// LocalDisk
// =============================================================================

/// Files below a root directory
pub struct LocalDisk {
    root: PathBuf,
}

impl LocalDisk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            bail!("invalid storage path: {}", path);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Storage for LocalDisk {
    async fn open_read(&self, path: &str) -> Result<ByteStream> {
        let full = self.resolve(path)?;
        let file = tokio::fs::File::open(&full)
            .await
            .with_context(|| format!("cannot open {}", full.display()))?;
        Ok(Box::new(file))
    }

    async fn put(&self, path: &str, contents: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&full).await?;
        file.write_all(contents).await?;
        file.flush().await?;
        debug!(path = %full.display(), bytes = contents.len(), "Stored file");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("cannot delete {}", full.display())),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }
}

// =============================================================================
// StorageRegistry
// =============================================================================

#[derive(Clone, Default)]
pub struct StorageRegistry {
    disks: HashMap<String, Arc<dyn Storage>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disk(mut self, name: impl Into<String>, disk: Arc<dyn Storage>) -> Self {
        self.disks.insert(name.into(), disk);
        self
    }

    pub fn disk(&self, name: &str) -> Option<Arc<dyn Storage>> {
        self.disks.get(name).cloned()
    }
}

// =============================================================================
// MemoryDisk (tests)
// =============================================================================

#[cfg(test)]
pub use memory::MemoryDisk;

#[cfg(test)]
mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct MemoryDisk {
        files: Mutex<HashMap<String, Vec<u8>>>,
        fail_deletes: AtomicBool,
        fail_puts: AtomicBool,
    }

    impl MemoryDisk {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_file(self, path: &str, contents: impl AsRef<[u8]>) -> Self {
            self.files.lock().insert(path.to_string(), contents.as_ref().to_vec());
            self
        }

        pub fn contains(&self, path: &str) -> bool {
            self.files.lock().contains_key(path)
        }

        pub fn read(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().get(path).cloned()
        }

        pub fn paths(&self) -> Vec<String> {
            self.files.lock().keys().cloned().collect()
        }

        pub fn fail_deletes(&self, fail: bool) {
            self.fail_deletes.store(fail, Ordering::SeqCst);
        }

        pub fn fail_puts(&self, fail: bool) {
            self.fail_puts.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Storage for MemoryDisk {
        async fn open_read(&self, path: &str) -> Result<ByteStream> {
            let contents = self
                .read(path)
                .with_context(|| format!("no such file: {}", path))?;
            Ok(Box::new(std::io::Cursor::new(contents)))
        }

        async fn put(&self, path: &str, contents: &[u8]) -> Result<()> {
            if self.fail_puts.load(Ordering::SeqCst) {
                bail!("disk is read-only");
            }
            self.files.lock().insert(path.to_string(), contents.to_vec());
            Ok(())
        }

        async fn delete(&self, path: &str) -> Result<()> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                bail!("disk is read-only");
            }
            self.files.lock().remove(path);
            Ok(())
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            Ok(self.contains(path))
        }
    }
}
