//! Model handlers for the catalog module.
//!
//! Each submodule builds one [`ModelHandler`](admin_core::ModelHandler);
//! [`register_all`] wires them into the registry served by the admin router.

mod categories;
mod products;
mod tags;

use admin_core::{AdminError, ModelHandlerRegistry, RolePolicy};

/// Role assignments shared by the catalog handlers.
fn catalog_policy() -> RolePolicy {
    RolePolicy::new()
        .superuser("admin")
        .read(&["viewer", "editor", "manager"])
        .write(&["editor", "manager"])
        .delete(&["manager"])
        .actions(&["editor", "manager"])
}

pub fn register_all(registry: &mut ModelHandlerRegistry) -> Result<(), AdminError> {
    registry.register(categories::handler()?)?;
    registry.register(tags::handler()?)?;
    registry.register(products::handler()?)?;
    tracing::info!("Registered {} model handlers", registry.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_handlers_register() {
        let mut registry = ModelHandlerRegistry::new();
        register_all(&mut registry).unwrap();
        let slugs: Vec<&str> = registry.list().iter().map(|h| h.slug.as_str()).collect();
        assert_eq!(slugs, vec!["categories", "tags", "products"]);
    }
}
