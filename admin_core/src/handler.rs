//! Model handlers: the per-entity configuration consumed by the generic controller.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use diesel_async::AsyncPgConnection;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::AdminError;
use crate::field::{FieldConfig, FieldKind, RelationKind};
use crate::params::{parse_sort, FilterOp, SortParam};
use crate::persist::Attributes;
use crate::policy::{Ability, AllowAll, Policy, Principal};
use crate::sql::{is_valid_ident, BindValue, Record};

/// A typed predicate against the handler's table (alias `t`).
#[derive(Debug, Clone)]
pub enum Condition {
    Compare {
        column: String,
        op: FilterOp,
        value: BindValue,
    },
    IsNull(String),
    NotNull(String),
    /// Trusted SQL fragment; may reference the table as `t`.
    Raw(String),
}

impl Condition {
    pub fn eq(column: &str, value: BindValue) -> Self {
        Self::compare(column, FilterOp::Eq, value)
    }

    pub fn compare(column: &str, op: FilterOp, value: BindValue) -> Self {
        Self::Compare {
            column: column.to_string(),
            op,
            value,
        }
    }
}

pub type ConditionFn = Arc<dyn Fn(&Principal) -> Vec<Condition> + Send + Sync>;

/// A named set of conditions clients can select through `scopes`.
#[derive(Clone)]
pub struct ScopeConfig {
    pub name: String,
    pub label: String,
    pub conditions: ConditionFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    Create,
    Update,
}

pub struct SaveContext<'a> {
    pub handler: &'a ModelHandler,
    pub principal: &'a Principal,
    pub mode: SaveMode,
    /// Set for updates.
    pub id: Option<i64>,
}

/// Hooks run inside the save transaction.
#[async_trait]
pub trait SaveHook: Send + Sync {
    async fn before_save(
        &self,
        _conn: &mut AsyncPgConnection,
        _ctx: &SaveContext<'_>,
        _attributes: &mut Attributes,
    ) -> Result<(), AdminError> {
        Ok(())
    }

    async fn after_save(
        &self,
        _conn: &mut AsyncPgConnection,
        _ctx: &SaveContext<'_>,
        _record: &Record,
    ) -> Result<(), AdminError> {
        Ok(())
    }
}

pub struct ActionContext<'a> {
    pub handler: &'a ModelHandler,
    pub principal: &'a Principal,
    pub ids: &'a [i64],
    pub input: &'a Record,
}

/// A custom operation on one or more records.
#[async_trait]
pub trait Action: Send + Sync {
    /// Returns a JSON result echoed to the client.
    async fn run(
        &self,
        conn: &mut AsyncPgConnection,
        ctx: &ActionContext<'_>,
    ) -> Result<Value, AdminError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTarget {
    Record,
    Bulk,
    Both,
}

impl ActionTarget {
    pub fn allows_record(self) -> bool {
        matches!(self, Self::Record | Self::Both)
    }

    pub fn allows_bulk(self) -> bool {
        matches!(self, Self::Bulk | Self::Both)
    }
}

#[derive(Clone)]
pub struct ActionConfig {
    pub name: String,
    pub label: String,
    pub target: ActionTarget,
    pub action: Arc<dyn Action>,
}

pub struct ModelHandler {
    pub slug: String,
    pub label: String,
    pub table: String,
    pub primary_key: String,
    pub fields: Vec<FieldConfig>,
    pub scopes: Vec<ScopeConfig>,
    pub actions: Vec<ActionConfig>,
    pub policy: Arc<dyn Policy>,
    pub hooks: Vec<Arc<dyn SaveHook>>,
    pub default_sort: Vec<SortParam>,
    /// Boolean column cleared on delete instead of removing the row.
    pub archive_column: Option<String>,
    /// Maintain `create_uid`/`create_date`/`write_uid`/`write_date`.
    pub audit_columns: bool,
    pub constraints: Option<ConditionFn>,
}

impl ModelHandler {
    pub fn builder(slug: &str, table: &str) -> ModelHandlerBuilder {
        ModelHandlerBuilder {
            handler: ModelHandler {
                slug: slug.to_string(),
                label: slug.replace(['_', '-'], " "),
                table: table.to_string(),
                primary_key: "id".to_string(),
                fields: Vec::new(),
                scopes: Vec::new(),
                actions: Vec::new(),
                policy: Arc::new(AllowAll),
                hooks: Vec::new(),
                default_sort: Vec::new(),
                archive_column: None,
                audit_columns: false,
                constraints: None,
            },
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn scope(&self, name: &str) -> Option<&ScopeConfig> {
        self.scopes.iter().find(|s| s.name == name)
    }

    pub fn action(&self, name: &str) -> Option<&ActionConfig> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Base conditions applied to every query for `principal`.
    pub fn constraints_for(&self, principal: &Principal) -> Vec<Condition> {
        self.constraints
            .as_ref()
            .map(|f| f(principal))
            .unwrap_or_default()
    }

    pub fn can(&self, principal: &Principal, ability: &Ability, record: Option<&Record>) -> bool {
        self.policy.authorize(principal, ability, record)
    }

    pub fn authorize(
        &self,
        principal: &Principal,
        ability: &Ability,
        record: Option<&Record>,
    ) -> Result<(), AdminError> {
        if self.can(principal, ability, record) {
            Ok(())
        } else {
            tracing::info!(
                model = %self.slug,
                ability = ability.name(),
                user_id = ?principal.user_id,
                "Authorization denied"
            );
            crate::metrics::authorization_denied(&self.slug, ability.name());
            Err(AdminError::Forbidden)
        }
    }

    pub fn describe(&self) -> Value {
        json!({
            "slug": self.slug,
            "label": self.label,
            "primary_key": self.primary_key,
            "fields": self.fields.iter().map(FieldConfig::describe).collect::<Vec<_>>(),
            "scopes": self.scopes.iter().map(|s| json!({"name": s.name, "label": s.label})).collect::<Vec<_>>(),
            "actions": self.actions.iter().map(|a| json!({"name": a.name, "label": a.label, "target": a.target})).collect::<Vec<_>>(),
            "default_sort": self.default_sort.iter().map(|s| {
                if s.descending { format!("-{}", s.field) } else { s.field.clone() }
            }).collect::<Vec<_>>(),
            "soft_delete": self.archive_column.is_some(),
        })
    }
}

pub struct ModelHandlerBuilder {
    handler: ModelHandler,
}

impl ModelHandlerBuilder {
    pub fn label(mut self, label: &str) -> Self {
        self.handler.label = label.to_string();
        self
    }

    pub fn primary_key(mut self, column: &str) -> Self {
        self.handler.primary_key = column.to_string();
        self
    }

    pub fn field(mut self, field: FieldConfig) -> Self {
        self.handler.fields.push(field);
        self
    }

    pub fn scope<F>(mut self, name: &str, label: &str, conditions: F) -> Self
    where
        F: Fn(&Principal) -> Vec<Condition> + Send + Sync + 'static,
    {
        self.handler.scopes.push(ScopeConfig {
            name: name.to_string(),
            label: label.to_string(),
            conditions: Arc::new(conditions),
        });
        self
    }

    pub fn action<A: Action + 'static>(mut self, name: &str, label: &str, target: ActionTarget, action: A) -> Self {
        self.handler.actions.push(ActionConfig {
            name: name.to_string(),
            label: label.to_string(),
            target,
            action: Arc::new(action),
        });
        self
    }

    pub fn policy<P: Policy + 'static>(mut self, policy: P) -> Self {
        self.handler.policy = Arc::new(policy);
        self
    }

    pub fn hook<H: SaveHook + 'static>(mut self, hook: H) -> Self {
        self.handler.hooks.push(Arc::new(hook));
        self
    }

    pub fn default_sort(mut self, sort: &str) -> Self {
        self.handler.default_sort = parse_sort(sort);
        self
    }

    pub fn soft_delete(mut self, archive_column: &str) -> Self {
        self.handler.archive_column = Some(archive_column.to_string());
        self
    }

    pub fn audit_columns(mut self) -> Self {
        self.handler.audit_columns = true;
        self
    }

    pub fn constraints<F>(mut self, constraints: F) -> Self
    where
        F: Fn(&Principal) -> Vec<Condition> + Send + Sync + 'static,
    {
        self.handler.constraints = Some(Arc::new(constraints));
        self
    }

    /// Check identifiers and relation wiring, then freeze the handler.
    pub fn build(self) -> Result<ModelHandler, AdminError> {
        let handler = self.handler;
        let bad = |what: &str, name: &str| {
            AdminError::Config(format!("{}: invalid {what} identifier {name:?}", handler.slug))
        };

        if handler.slug.is_empty()
            || !handler
                .slug
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AdminError::Config(format!("invalid slug {:?}", handler.slug)));
        }
        for (what, name) in [("table", &handler.table), ("primary key", &handler.primary_key)] {
            if !is_valid_ident(name) {
                return Err(bad(what, name));
            }
        }
        if let Some(column) = &handler.archive_column {
            if !is_valid_ident(column) {
                return Err(bad("archive column", column));
            }
        }

        validate_fields(&handler.fields, &handler.slug)?;

        for sort in &handler.default_sort {
            if sort.field != handler.primary_key && handler.field(&sort.field).is_none() {
                return Err(AdminError::Config(format!(
                    "{}: default sort on unknown field {}",
                    handler.slug, sort.field
                )));
            }
        }

        Ok(handler)
    }
}

fn validate_fields(fields: &[FieldConfig], slug: &str) -> Result<(), AdminError> {
    let mut seen = HashSet::new();
    for field in fields {
        if !is_valid_ident(&field.name) {
            return Err(AdminError::Config(format!("{slug}: invalid field name {:?}", field.name)));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(AdminError::Config(format!("{slug}: duplicate field {}", field.name)));
        }
        if let FieldKind::Relation(rel) = &field.kind {
            let mut idents = vec![&rel.table, &rel.primary_key, &rel.label_column];
            idents.extend(rel.columns.iter());
            match rel.kind {
                RelationKind::BelongsTo | RelationKind::HasMany => idents.push(&rel.foreign_key),
                RelationKind::BelongsToMany => match &rel.pivot {
                    Some(pivot) => {
                        idents.extend([&pivot.table, &pivot.local_key, &pivot.related_key]);
                    }
                    None => {
                        return Err(AdminError::Config(format!(
                            "{slug}: {} needs a pivot table",
                            field.name
                        )));
                    }
                },
            }
            if let Some(bad) = idents.into_iter().find(|i| !is_valid_ident(i)) {
                return Err(AdminError::Config(format!(
                    "{slug}: relation {} has invalid identifier {bad:?}",
                    field.name
                )));
            }
            validate_fields(&rel.fields, slug)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::RelationConfig;
    use crate::policy::RolePolicy;

    #[test]
    fn builder_collects_configuration() {
        let handler = ModelHandler::builder("products", "catalog_products")
            .label("Products")
            .field(FieldConfig::text("name").searchable())
            .scope("published", "Published", |_| {
                vec![Condition::eq("published", BindValue::Bool(true))]
            })
            .default_sort("-id")
            .soft_delete("active")
            .build()
            .unwrap();

        assert_eq!(handler.label, "Products");
        assert!(handler.field("name").is_some());
        assert!(handler.scope("published").is_some());
        assert!(handler.scope("missing").is_none());
        assert_eq!(handler.default_sort[0].field, "id");

        let meta = handler.describe();
        assert_eq!(meta["slug"], "products");
        assert_eq!(meta["default_sort"], json!(["-id"]));
        assert_eq!(meta["soft_delete"], json!(true));
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        assert!(ModelHandler::builder("x", "bad table").build().is_err());
        assert!(ModelHandler::builder("bad slug!", "t").build().is_err());
        assert!(ModelHandler::builder("x", "t")
            .field(FieldConfig::text("a"))
            .field(FieldConfig::text("a"))
            .build()
            .is_err());
        assert!(ModelHandler::builder("x", "t")
            .field(FieldConfig::relation(
                "owner",
                RelationConfig::belongs_to("users", "owner_id; --"),
            ))
            .build()
            .is_err());
        assert!(ModelHandler::builder("x", "t").default_sort("nope").build().is_err());
    }

    #[test]
    fn authorize_uses_policy() {
        let handler = ModelHandler::builder("products", "catalog_products")
            .policy(RolePolicy::new().read(&["viewer"]))
            .build()
            .unwrap();

        let viewer = Principal::user(1, &["viewer"]);
        assert!(handler.authorize(&viewer, &Ability::ViewAny, None).is_ok());
        assert!(matches!(
            handler.authorize(&viewer, &Ability::Delete, None),
            Err(AdminError::Forbidden)
        ));
    }

    #[test]
    fn constraints_depend_on_principal() {
        let handler = ModelHandler::builder("notes", "notes")
            .constraints(|p| match p.user_id {
                Some(id) => vec![Condition::eq("owner_id", BindValue::BigInt(id))],
                None => vec![Condition::Raw("FALSE".into())],
            })
            .build()
            .unwrap();

        assert!(matches!(
            handler.constraints_for(&Principal::anonymous()).as_slice(),
            [Condition::Raw(_)]
        ));
        assert!(matches!(
            handler.constraints_for(&Principal::user(4, &[])).as_slice(),
            [Condition::Compare { .. }]
        ));
    }
}
