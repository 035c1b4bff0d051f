//! Quote documents stored on the local filesystem.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use procura_core::ports::AttachmentStore;
use procura_core::ApplicationError;

#[derive(Clone, Debug)]
pub struct LocalAttachmentStore {
    root: PathBuf,
}

impl LocalAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a stored path, refusing anything that escapes the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, ApplicationError> {
        let candidate = Path::new(path);
        let relative = candidate.strip_prefix(&self.root).unwrap_or(candidate);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(ApplicationError::NotFound(format!("attachment {path}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AttachmentStore for LocalAttachmentStore {
    async fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String, ApplicationError> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|error| {
            ApplicationError::Integration(format!(
                "cannot create attachment directory {}: {error}",
                self.root.display()
            ))
        })?;

        let stored_name = format!("{}-{}", uuid::Uuid::new_v4().simple(), file_name);
        let path = self.root.join(&stored_name);
        tokio::fs::write(&path, bytes).await.map_err(|error| {
            ApplicationError::Integration(format!("cannot write {}: {error}", path.display()))
        })?;

        debug!(event_name = "attachment.stored", path = %path.display(), bytes = bytes.len());
        Ok(path.to_string_lossy().into_owned())
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, ApplicationError> {
        let resolved = self.resolve(path)?;
        tokio::fs::read(&resolved).await.map_err(|error| match error.kind() {
            ErrorKind::NotFound => ApplicationError::NotFound(format!("attachment {path}")),
            _ => ApplicationError::Integration(format!("cannot read {path}: {error}")),
        })
    }

    async fn delete(&self, path: &str) -> Result<(), ApplicationError> {
        let resolved = self.resolve(path)?;
        match tokio::fs::remove_file(&resolved).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(ApplicationError::Integration(format!("cannot delete {path}: {error}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use procura_core::ports::AttachmentStore;
    use procura_core::ApplicationError;

    use super::LocalAttachmentStore;

    #[tokio::test]
    async fn stores_fetches_and_deletes_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalAttachmentStore::new(dir.path().join("quotes"));

        let path = store.store("northwind.pdf", b"%PDF-1.7").await.expect("store");
        assert!(path.ends_with("-northwind.pdf"));
        assert_eq!(store.fetch(&path).await.expect("fetch"), b"%PDF-1.7".to_vec());

        store.delete(&path).await.expect("delete");
        store.delete(&path).await.expect("deleting twice is harmless");
        assert!(matches!(store.fetch(&path).await, Err(ApplicationError::NotFound(_))));
    }

    #[tokio::test]
    async fn refuses_paths_outside_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalAttachmentStore::new(dir.path().join("quotes"));

        assert!(store.fetch("../secrets.txt").await.is_err());
        assert!(store.delete("/etc/passwd").await.is_err());
    }
}
