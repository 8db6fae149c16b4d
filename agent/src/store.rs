use std::path::PathBuf;

use tracing::info;

/// Flat directory holding captured accident images.
///
/// The directory listing is the only index: the capture loop is the single
/// writer, the viewer reads, and nothing else coordinates them. Writes go
/// to a temporary name and rename into place so readers never observe a
/// partial file.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create store directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(String, std::io::Error),
    #[error("failed to list store directory: {0}")]
    List(std::io::Error),
    #[error("failed to read {0}: {1}")]
    Read(String, std::io::Error),
    #[error("no such image: {0}")]
    NotFound(String),
}

impl ImageStore {
    /// Open the store, creating the directory if it does not exist yet.
    /// Idempotent; failure here is fatal for the caller.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::CreateDir(dir.display().to_string(), e))?;
        info!(dir = %dir.display(), "image store ready");
        Ok(Self { dir })
    }

    /// Create or overwrite the named artifact.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        validate_name(name)?;
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let target = self.dir.join(name);
        std::fs::write(&tmp, bytes).map_err(|e| StoreError::Write(name.to_string(), e))?;
        std::fs::rename(&tmp, &target).map_err(|e| StoreError::Write(name.to_string(), e))?;
        Ok(())
    }

    /// Current artifact names, in no particular order. Recomputed from the
    /// directory on every call; in-flight temporary files are skipped.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = std::fs::read_dir(&self.dir).map_err(StoreError::List)?;
        let mut names = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Bytes of the named artifact, or `NotFound` if it is missing or the
    /// name is not a plain file name.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        validate_name(name)?;
        let path = self.dir.join(name);
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(name.to_string()),
            _ => StoreError::Read(name.to_string(), e),
        })
    }
}

/// Names arrive straight from URL path segments; anything that could step
/// outside the store directory is treated as missing rather than an error.
fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(StoreError::NotFound(name.to_string()));
    }
    Ok(())
}
