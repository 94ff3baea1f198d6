//! Slug-keyed registry of model handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AdminError;
use crate::handler::ModelHandler;

/// Slugs that would shadow fixed routes.
const RESERVED_SLUGS: &[&str] = &["models"];

#[derive(Default)]
pub struct ModelHandlerRegistry {
    handlers: Vec<Arc<ModelHandler>>,
    by_slug: HashMap<String, usize>,
}

impl ModelHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: ModelHandler) -> Result<(), AdminError> {
        if RESERVED_SLUGS.contains(&handler.slug.as_str()) {
            return Err(AdminError::Config(format!("slug {} is reserved", handler.slug)));
        }
        if self.by_slug.contains_key(&handler.slug) {
            return Err(AdminError::Config(format!(
                "handler {} is already registered",
                handler.slug
            )));
        }
        tracing::debug!(model = %handler.slug, table = %handler.table, "Registered model handler");
        self.by_slug.insert(handler.slug.clone(), self.handlers.len());
        self.handlers.push(Arc::new(handler));
        Ok(())
    }

    pub fn get(&self, slug: &str) -> Option<Arc<ModelHandler>> {
        self.by_slug.get(slug).map(|&i| Arc::clone(&self.handlers[i]))
    }

    /// Like [`get`](Self::get), failing with [`AdminError::UnknownModel`].
    pub fn resolve(&self, slug: &str) -> Result<Arc<ModelHandler>, AdminError> {
        self.get(slug)
            .ok_or_else(|| AdminError::UnknownModel(slug.to_string()))
    }

    /// Handlers in registration order.
    pub fn list(&self) -> &[Arc<ModelHandler>] {
        &self.handlers
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
