use async_trait::async_trait;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::RwLock;

use super::declaration::ModelDeclaration;
use crate::core::{PlatformError, Result};

/// Persistence backend for the declaration set.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn load(&self) -> Result<Vec<ModelDeclaration>>;
    async fn store(&self, declarations: &[ModelDeclaration]) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryModelStore {
    declarations: RwLock<Vec<ModelDeclaration>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn load(&self) -> Result<Vec<ModelDeclaration>> {
        Ok(self.declarations.read().await.clone())
    }

    async fn store(&self, declarations: &[ModelDeclaration]) -> Result<()> {
        *self.declarations.write().await = declarations.to_vec();
        Ok(())
    }
}

/// Keeps the declaration set in a single pretty-printed JSON file.
///
/// Writes go to a temp file in the same directory which is then renamed over
/// the target, so a crash never leaves a half-written `models.json`.
pub struct FileModelStore {
    path: PathBuf,
}

impl FileModelStore {
    pub const FILE_NAME: &'static str = "models.json";

    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(dir.as_ref().join(Self::FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let temp = NamedTempFile::new_in(&dir)?;
        let mut writer = BufWriter::new(temp);
        writer.write_all(contents)?;
        writer.flush()?;
        let temp = writer
            .into_inner()
            .map_err(|e| PlatformError::Io(format!("Failed to flush model file: {}", e)))?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| {
            PlatformError::Io(format!(
                "Failed to replace {}: {}",
                path.display(),
                e.error
            ))
        })?;
        Ok(())
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn load(&self) -> Result<Vec<ModelDeclaration>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn store(&self, declarations: &[ModelDeclaration]) -> Result<()> {
        let contents = serde_json::to_vec_pretty(declarations)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::write_atomic(&path, &contents))
            .await
            .map_err(|e| PlatformError::Internal(format!("Model store writer panicked: {}", e)))?
    }
}
