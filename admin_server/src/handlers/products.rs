//! Products: the richest catalog handler, exercising every relation kind,
//! scopes, custom actions, a save hook, soft delete, and row constraints.

use async_trait::async_trait;
use diesel_async::AsyncPgConnection;
use serde_json::{json, Value};

use admin_core::params::FilterOp;
use admin_core::sql::{execute, SqlBuilder};
use admin_core::{
    Action, ActionContext, ActionTarget, AdminError, Attributes, BindValue, Condition, Expand, FieldConfig,
    ModelHandler, Principal, RelationConfig, Rule, SaveContext, SaveHook, SaveMode,
};

/// Stock at or below this level counts as low.
const LOW_STOCK: i64 = 5;

pub fn handler() -> Result<ModelHandler, AdminError> {
    ModelHandler::builder("products", "catalog_products")
        .label("Products")
        .field(
            FieldConfig::text("name")
                .rules([Rule::Required, Rule::MaxLength(255)])
                .searchable()
                .sortable(),
        )
        .field(FieldConfig::text("slug").hide_from_list().rule(Rule::MaxLength(255)))
        .field(
            FieldConfig::text("sku")
                .label("SKU")
                .rules([Rule::Required, Rule::MaxLength(64), Rule::Unique])
                .searchable()
                .sortable(),
        )
        .field(FieldConfig::text("description").hide_from_list())
        .field(
            FieldConfig::decimal("price")
                .rules([Rule::Required, Rule::Min(0.0)])
                .filterable()
                .sortable(),
        )
        .field(
            FieldConfig::integer("stock")
                .rule(Rule::Min(0.0))
                .default(json!(0))
                .filterable()
                .sortable(),
        )
        .field(FieldConfig::boolean("published").default(json!(false)).filterable())
        .field(FieldConfig::date("release_date").filterable().sortable())
        .field(FieldConfig::json("attributes").hide_from_list())
        .field(
            FieldConfig::file("image")
                .rule(Rule::mime_types(["image/jpeg", "image/png", "image/webp"])),
        )
        .field(
            FieldConfig::relation(
                "category",
                RelationConfig::belongs_to("catalog_categories", "category_id"),
            )
            .filterable()
            .sortable()
            .searchable()
            .expand(Expand::Detail),
        )
        .field(
            FieldConfig::relation(
                "variants",
                RelationConfig::has_many("catalog_product_variants", "product_id")
                    .columns(["id", "name", "sku", "price", "stock"])
                    .fields(vec![
                        FieldConfig::text("name").rules([Rule::Required, Rule::MaxLength(255)]),
                        FieldConfig::text("sku").rule(Rule::MaxLength(64)),
                        FieldConfig::decimal("price").rule(Rule::Min(0.0)),
                        FieldConfig::integer("stock").rule(Rule::Min(0.0)).default(json!(0)),
                    ]),
            )
            .expand(Expand::Detail),
        )
        .field(
            FieldConfig::relation(
                "tags",
                RelationConfig::belongs_to_many("catalog_tags", "catalog_product_tags", "product_id", "tag_id")
                    .columns(["id", "name", "color"]),
            )
            .filterable()
            .expand(Expand::Always),
        )
        .field(FieldConfig::computed("in_stock", |record| {
            json!(record.get("stock").and_then(Value::as_i64).unwrap_or(0) > 0)
        }))
        .scope("published", "Published", |_| {
            vec![Condition::eq("published", BindValue::Bool(true))]
        })
        .scope("in_stock", "In stock", |_| {
            vec![Condition::compare("stock", FilterOp::Gt, BindValue::BigInt(0))]
        })
        .scope("low_stock", "Low stock", |_| {
            vec![
                Condition::compare("stock", FilterOp::Gt, BindValue::BigInt(0)),
                Condition::compare("stock", FilterOp::Lte, BindValue::BigInt(LOW_STOCK)),
            ]
        })
        .action("publish", "Publish", ActionTarget::Both, SetPublished(true))
        .action("unpublish", "Unpublish", ActionTarget::Both, SetPublished(false))
        .hook(SlugHook)
        .policy(super::catalog_policy())
        .constraints(published_only_for_viewers)
        .soft_delete("active")
        .audit_columns()
        .default_sort("-id")
        .build()
}

/// Read-only principals only see published products.
fn published_only_for_viewers(principal: &Principal) -> Vec<Condition> {
    let can_edit = ["admin", "editor", "manager"]
        .iter()
        .any(|role| principal.has_role(role));
    if can_edit {
        Vec::new()
    } else {
        vec![Condition::eq("published", BindValue::Bool(true))]
    }
}

/// Lowercase, ASCII alphanumerics joined by single dashes.
fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Derives `slug` from `name` when no slug was supplied. An update that
/// blanks the slug without a name keeps the stored slug.
fn fill_slug(mode: SaveMode, attributes: &mut Attributes) {
    let blank = match attributes.get("slug") {
        None => mode == SaveMode::Create,
        Some(None) => true,
        Some(Some(BindValue::Text(slug))) => slug.trim().is_empty(),
        Some(Some(_)) => false,
    };
    if !blank {
        return;
    }
    match attributes.get("name") {
        Some(Some(BindValue::Text(name))) => {
            let slug = slugify(name);
            attributes.set("slug", Some(BindValue::Text(slug)));
        }
        _ if mode == SaveMode::Update => {
            attributes.remove("slug");
        }
        _ => {}
    }
}

struct SlugHook;

#[async_trait]
impl SaveHook for SlugHook {
    async fn before_save(
        &self,
        _conn: &mut AsyncPgConnection,
        ctx: &SaveContext<'_>,
        attributes: &mut Attributes,
    ) -> Result<(), AdminError> {
        fill_slug(ctx.mode, attributes);
        Ok(())
    }
}

/// Sets `published` on the targeted products.
struct SetPublished(bool);

#[async_trait]
impl Action for SetPublished {
    async fn run(&self, conn: &mut AsyncPgConnection, ctx: &ActionContext<'_>) -> Result<Value, AdminError> {
        let mut sql = SqlBuilder::new();
        sql.push("UPDATE ").push_ident(&ctx.handler.table).push(" SET ");
        sql.push_ident("published").push(" = ");
        sql.push_bind(BindValue::Bool(self.0));
        if ctx.handler.audit_columns {
            sql.push(", ").push_ident("write_uid").push(" = ");
            sql.push_value(ctx.principal.user_id.map(BindValue::BigInt));
            sql.push(", ").push_ident("write_date").push(" = NOW()");
        }
        sql.push(" WHERE ").push_ident(&ctx.handler.primary_key).push(" = ANY(");
        sql.push_bind(BindValue::BigIntArray(ctx.ids.to_vec()));
        sql.push(")");

        let updated = execute(conn, sql.build()).await?;
        tracing::info!(
            model = %ctx.handler.slug,
            published = self.0,
            updated,
            "Products publication changed"
        );
        Ok(json!({ "updated": updated }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_collapse_punctuation() {
        assert_eq!(slugify("Desk Lamp"), "desk-lamp");
        assert_eq!(slugify("  Chair -- Mk. II "), "chair-mk-ii");
        assert_eq!(slugify("***"), "");
    }

    fn text(value: &str) -> Option<BindValue> {
        Some(BindValue::Text(value.to_string()))
    }

    #[test]
    fn created_products_get_a_slug_from_their_name() {
        let mut attributes = Attributes::new();
        attributes.set("name", text("Desk Lamp"));
        fill_slug(SaveMode::Create, &mut attributes);
        assert_eq!(attributes.get("slug"), Some(&text("desk-lamp")));

        let mut attributes = Attributes::new();
        attributes.set("name", text("Desk Lamp"));
        attributes.set("slug", text("lamp-01"));
        fill_slug(SaveMode::Create, &mut attributes);
        assert_eq!(attributes.get("slug"), Some(&text("lamp-01")));
    }

    #[test]
    fn blanked_slug_on_update_keeps_stored_value() {
        let mut attributes = Attributes::new();
        attributes.set("slug", None);
        attributes.set("stock", Some(BindValue::BigInt(3)));
        fill_slug(SaveMode::Update, &mut attributes);
        assert!(!attributes.contains("slug"));
        assert!(attributes.contains("stock"));

        let mut attributes = Attributes::new();
        attributes.set("slug", text("  "));
        attributes.set("name", text("Floor Lamp"));
        fill_slug(SaveMode::Update, &mut attributes);
        assert_eq!(attributes.get("slug"), Some(&text("floor-lamp")));

        let mut attributes = Attributes::new();
        attributes.set("stock", Some(BindValue::BigInt(3)));
        fill_slug(SaveMode::Update, &mut attributes);
        assert!(!attributes.contains("slug"));
    }

    #[test]
    fn viewers_are_limited_to_published_rows() {
        assert_eq!(published_only_for_viewers(&Principal::anonymous()).len(), 1);
        assert_eq!(published_only_for_viewers(&Principal::user(3, &["viewer"])).len(), 1);
        assert!(published_only_for_viewers(&Principal::user(4, &["editor"])).is_empty());
    }

    #[test]
    fn handler_describes_catalog_shape() {
        let handler = handler().unwrap();
        let meta = handler.describe();
        assert_eq!(meta["slug"], "products");
        assert!(handler.scope("low_stock").is_some());
        assert!(handler.action("publish").is_some_and(|a| a.target.allows_bulk()));
        assert_eq!(handler.archive_column.as_deref(), Some("active"));
        assert!(handler.audit_columns);
    }
}
