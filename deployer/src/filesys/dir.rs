//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

use crate::errors::AppError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), AppError> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of the entries directly inside the directory
    pub async fn entry_names(&self) -> Result<Vec<String>, AppError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }

        names.sort();
        Ok(names)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Create a uniquely named directory under `parent`
    pub async fn create_unique(parent: &Path, prefix: &str) -> Result<ScopedDir, AppError> {
        let dir = Dir::new(parent.join(format!("{}-{}", prefix, uuid::Uuid::new_v4())));
        dir.create().await?;
        Ok(ScopedDir::new(dir))
    }
}

/// A directory owned for a bounded scope, removed when released or dropped
#[derive(Debug)]
pub struct ScopedDir {
    dir: Dir,
    released: bool,
}

impl ScopedDir {
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            released: false,
        }
    }

    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now
    pub async fn release(mut self) -> Result<(), AppError> {
        let result = self.dir.delete().await;
        self.released = result.is_ok();
        result
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(self.dir.path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.dir.path().display(), e);
            }
        }
    }
}
