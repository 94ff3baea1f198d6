//! Shared router state.

use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::TokenVerifier;
use crate::db::DbPool;
use crate::events::{AuditSink, TracingAuditSink};
use crate::files::FileStore;
use crate::params::Pagination;
use crate::registry::ModelHandlerRegistry;

/// Everything the admin routes need; read-only after startup.
#[derive(Clone)]
pub struct AdminState {
    pub pool: DbPool,
    pub registry: Arc<ModelHandlerRegistry>,
    pub files: Arc<FileStore>,
    pub audit: Arc<dyn AuditSink>,
    pub tokens: TokenVerifier,
    pub pagination: Pagination,
}

impl AdminState {
    pub fn new(pool: DbPool, registry: ModelHandlerRegistry, files: FileStore, tokens: TokenVerifier) -> Self {
        Self {
            pool,
            registry: Arc::new(registry),
            files: Arc::new(files),
            audit: Arc::new(TracingAuditSink),
            tokens,
            pagination: Pagination::default(),
        }
    }

    pub fn with_audit<A: AuditSink + 'static>(mut self, sink: A) -> Self {
        self.audit = Arc::new(sink);
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }
}

impl FromRef<AdminState> for TokenVerifier {
    fn from_ref(state: &AdminState) -> Self {
        state.tokens.clone()
    }
}
