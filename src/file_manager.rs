use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ReplicaError, Result};
use crate::local_path::LocalPath;

/// A fully transparent 1x1 PNG, written in place of images that failed to download.
pub const TRANSPARENT_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0xf8,
    0x0f, 0x00, 0x00, 0x01, 0x01, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44,
    0xae, 0x42, 0x60, 0x82,
];

/// Writes everything under the output directory.
#[derive(Debug, Clone)]
pub struct FileManager {
    base_dir: PathBuf,
}

impl FileManager {
    pub fn new(base_dir: &Path) -> Result<Self> {
        let base_dir = base_dir.to_path_buf();
        fs::create_dir_all(&base_dir).map_err(|source| ReplicaError::Io {
            path: base_dir.clone(),
            source,
        })?;

        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, local_path: &LocalPath) -> PathBuf {
        local_path.under(&self.base_dir)
    }

    /// Writes `content` at `local_path`, creating parent directories as needed.
    pub fn save_file(&self, local_path: &LocalPath, content: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(local_path);
        write(&path, content)?;
        Ok(path)
    }

    /// Writes a file directly at the output root (`index.html`, `README.md`, ...).
    pub fn save_root_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.base_dir.join(name);
        write(&path, content)?;
        Ok(path)
    }

    pub fn file_exists(&self, local_path: &LocalPath) -> bool {
        self.path_for(local_path).exists()
    }

    /// Drops the transparent placeholder at `local_path` unless something is
    /// already there. Returns whether a placeholder was written.
    pub fn write_placeholder(&self, local_path: &LocalPath) -> Result<bool> {
        if self.file_exists(local_path) {
            return Ok(false);
        }
        self.save_file(local_path, TRANSPARENT_PNG)?;
        Ok(true)
    }

    /// Marks a file at the output root as executable (no-op off Unix).
    pub fn make_executable(&self, name: &str) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let path = self.base_dir.join(name);
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
                .map_err(|source| ReplicaError::Io { path, source })?;
        }
        #[cfg(not(unix))]
        let _ = name;
        Ok(())
    }
}

fn write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ReplicaError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, content).map_err(|source| ReplicaError::Io {
        path: path.to_path_buf(),
        source,
    })
}
