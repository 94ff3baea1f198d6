//! Filesystem storage for uploaded field files.

use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::AdminError;
use crate::payload::UploadedFile;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    public_url: String,
    max_size_bytes: u64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, public_url: &str, max_size_bytes: u64) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
            max_size_bytes,
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Name a stored file from its content plus a random salt.
    fn file_name(file: &UploadedFile) -> String {
        let mut hasher = Sha256::new();
        hasher.update(uuid::Uuid::new_v4().as_bytes());
        hasher.update(&file.bytes);
        let hash = hex::encode(&hasher.finalize()[..20]);
        match file.extension() {
            Some(ext) => format!("{hash}.{ext}"),
            None => hash,
        }
    }

    /// Write `file` under `<model>/<field>/` and return its relative path.
    pub async fn store(&self, model: &str, field: &str, file: &UploadedFile) -> Result<String, AdminError> {
        let relative = format!("{model}/{field}/{}", Self::file_name(file));
        let target = self.resolve(&relative)?;
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&target, &file.bytes).await?;
        tracing::debug!(model, field, path = %relative, size = file.size(), "Stored upload");
        Ok(relative)
    }

    /// Delete a stored file; missing files are not an error.
    pub async fn remove(&self, relative: &str) -> Result<(), AdminError> {
        let target = self.resolve(relative)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                tracing::debug!(path = %relative, "Removed stored file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal used for cleanup paths.
    pub async fn remove_all(&self, paths: &[String]) {
        for path in paths {
            if let Err(e) = self.remove(path).await {
                tracing::warn!(path = %path, error = %e, "Failed to remove stored file");
            }
        }
    }

    pub fn url(&self, relative: &str) -> String {
        format!("{}/{}", self.public_url, relative.trim_start_matches('/'))
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, AdminError> {
        let path = Path::new(relative);
        let safe = !relative.is_empty()
            && path.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AdminError::BadRequest(format!("invalid file path {relative:?}")));
        }
        Ok(self.root.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;

    fn upload(name: &str, body: &'static [u8]) -> UploadedFile {
        UploadedFile {
            file_name: Some(name.to_string()),
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from_static(body),
        }
    }

    #[tokio::test]
    async fn store_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "/admin/files/", 1024);

        let path = store.store("products", "image", &upload("Lamp.PNG", b"png")).await.unwrap();
        assert!(path.starts_with("products/image/"));
        assert!(path.ends_with(".png"));
        assert_eq!(std::fs::read(dir.path().join(&path)).unwrap(), b"png");
        assert_eq!(store.url(&path), format!("/admin/files/{path}"));

        store.remove(&path).await.unwrap();
        assert!(!dir.path().join(&path).exists());
        store.remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn same_content_gets_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "/files", 1024);
        let a = store.store("m", "f", &upload("a.txt", b"same")).await.unwrap();
        let b = store.store("m", "f", &upload("a.txt", b"same")).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "/files", 1024);
        assert!(matches!(
            store.remove("../etc/passwd").await,
            Err(AdminError::BadRequest(_))
        ));
        assert!(store.remove("/abs/path").await.is_err());
    }
}
