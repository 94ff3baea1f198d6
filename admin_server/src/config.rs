//! Admin server configuration, loaded from environment variables.

use std::path::PathBuf;

use admin_core::Pagination;

#[derive(Clone, Debug)]
pub struct AdminConfig {
    /// Shared secret for bearer token signatures.
    pub token_secret: String,
    /// Directory uploaded files are written under.
    pub filestore_path: PathBuf,
    /// Public URL prefix for stored files.
    pub files_url: String,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: u64,
    pub default_per_page: u64,
    pub max_per_page: u64,
    /// Database pool size.
    pub max_connections: usize,
}

impl AdminConfig {
    pub fn from_env() -> Self {
        let token_secret = std::env::var("ADMIN_TOKEN_SECRET").unwrap_or_default();
        let filestore_path = std::env::var("ADMIN_FILESTORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./filestore"));
        let files_url =
            std::env::var("ADMIN_FILES_URL").unwrap_or_else(|_| "/admin/files".to_string());
        let max_upload_bytes = std::env::var("ADMIN_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10 * 1024 * 1024);
        let default_per_page = std::env::var("ADMIN_PER_PAGE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(25);
        let max_per_page = std::env::var("ADMIN_MAX_PER_PAGE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);
        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        if token_secret.is_empty() {
            tracing::warn!("ADMIN_TOKEN_SECRET not set -- bearer token signatures are not checked");
        }

        Self {
            token_secret,
            filestore_path,
            files_url,
            max_upload_bytes,
            default_per_page,
            max_per_page: max_per_page.max(default_per_page),
            max_connections,
        }
    }

    pub fn pagination(&self) -> Pagination {
        Pagination {
            default_per_page: self.default_per_page.max(1),
            max_per_page: self.max_per_page.max(1),
        }
    }
}
