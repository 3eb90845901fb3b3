//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::FileSystemAccess,
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Tokio-based file system implementation
///
/// Writes go to a sibling temporary file that is renamed over the target,
/// so a crash mid-write never leaves a truncated credential file behind.
#[derive(Debug, Clone)]
pub struct TokioFileSystem {
    data_dir: PathBuf,
}

impl TokioFileSystem {
    /// Create a new file system accessor with the platform data directory
    pub fn new() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join("playback-relay");

        Self { data_dir }
    }

    /// Create a new file system accessor rooted at a custom data directory
    pub fn with_data_directory(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_data_directory(&self) -> Result<PathBuf> {
        if !fs::try_exists(&self.data_dir)
            .await
            .map_err(Self::map_io_error)?
        {
            fs::create_dir_all(&self.data_dir)
                .await
                .map_err(Self::map_io_error)?;
            debug!(path = ?self.data_dir, "Created data directory");
        }
        Ok(self.data_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.create_dir_all(parent).await?;
        }

        let temp = Self::temp_path(path);
        fs::write(&temp, data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        fs::rename(&temp, path).await.map_err(Self::map_io_error)?;

        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_custom_data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("nested").join("data");
        let fs = TokioFileSystem::with_data_directory(data.clone());

        let resolved = fs.get_data_directory().await.unwrap();
        assert_eq!(resolved, data);
        assert!(fs.exists(&data).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_data_directory(dir.path().to_path_buf());
        let file = dir.path().join("tokens").join("spotify_tokens.json");

        fs.write_file(&file, Bytes::from("first")).await.unwrap();
        fs.write_file(&file, Bytes::from("second")).await.unwrap();

        assert_eq!(fs.read_file(&file).await.unwrap(), Bytes::from("second"));
        assert!(!fs.exists(&TokioFileSystem::temp_path(&file)).await.unwrap());

        fs.delete_file(&file).await.unwrap();
        assert!(!fs.exists(&file).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_data_directory(dir.path().to_path_buf());

        match fs.read_file(&dir.path().join("absent.json")).await {
            Err(BridgeError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
