//! Statement generation for the read side: list, count, find, relation loading.
//!
//! The handler table is always aliased `t`; related tables use `r`, pivots `p`.

use serde_json::Value;

use crate::cast::{to_bool, to_sql_value};
use crate::error::AdminError;
use crate::field::{FieldConfig, FieldKind, RelationConfig, RelationKind};
use crate::handler::{Condition, ModelHandler};
use crate::params::{FilterOp, FilterParam, ListParams, SortParam};
use crate::policy::Principal;
use crate::sql::{escape_like, quote_ident, BindValue, SqlBuilder, Statement};

const ALIAS: &str = "t";

/// Maximum rows returned by relation option lookups.
pub const OPTIONS_LIMIT: i64 = 50;

pub struct ListStatements {
    pub select: Statement,
    pub count: Statement,
}

/// Writes ` WHERE ` before the first clause and ` AND ` before the rest.
struct Clauses<'a> {
    sql: &'a mut SqlBuilder,
    opened: bool,
}

impl<'a> Clauses<'a> {
    fn new(sql: &'a mut SqlBuilder) -> Self {
        Self { sql, opened: false }
    }

    fn next(&mut self) -> &mut SqlBuilder {
        self.sql.push(if self.opened { " AND " } else { " WHERE " });
        self.opened = true;
        self.sql
    }
}

fn push_from(sql: &mut SqlBuilder, handler: &ModelHandler) {
    sql.push(" FROM ").push_ident(&handler.table).push(" AS ").push(ALIAS);
}

pub fn push_condition(sql: &mut SqlBuilder, condition: &Condition) {
    match condition {
        Condition::Compare { column, op, value } => {
            push_compare(sql, &column_expr(ALIAS, column), *op, value.clone());
        }
        Condition::IsNull(column) => {
            sql.push_column(ALIAS, column).push(" IS NULL");
        }
        Condition::NotNull(column) => {
            sql.push_column(ALIAS, column).push(" IS NOT NULL");
        }
        Condition::Raw(fragment) => {
            sql.push("(").push(fragment).push(")");
        }
    }
}

fn column_expr(alias: &str, column: &str) -> String {
    format!("{alias}.{}", quote_ident(column))
}

fn push_compare(sql: &mut SqlBuilder, expr: &str, op: FilterOp, value: BindValue) {
    match op {
        FilterOp::In => {
            let as_text = matches!(value, BindValue::TextArray(_));
            if as_text {
                sql.push("CAST(").push(expr).push(" AS text) = ANY(");
            } else {
                sql.push(expr).push(" = ANY(");
            }
            sql.push_bind(value);
            sql.push(")");
        }
        FilterOp::Like => {
            sql.push("CAST(").push(expr).push(" AS text) ILIKE ");
            sql.push_bind(value);
        }
        FilterOp::Null => {
            let is_null = !matches!(value, BindValue::Bool(false));
            sql.push(expr).push(if is_null { " IS NULL" } else { " IS NOT NULL" });
        }
        _ => {
            sql.push(expr).push(" ").push(op.sql()).push(" ");
            sql.push_bind(value);
        }
    }
}

fn invalid_filter(field: &FieldConfig) -> AdminError {
    AdminError::BadRequest(format!("invalid filter value for {}", field.name))
}

/// A coerced filter operand. `in` lists over typed columns are bound as text and
/// cast to the column's array type so values compare in their own domain.
enum FilterValue {
    Bind(BindValue),
    TypedList {
        values: Vec<String>,
        array_type: &'static str,
    },
}

/// Postgres array type for an `in` list of this bind variant.
fn array_type(value: &BindValue) -> Option<&'static str> {
    match value {
        BindValue::Numeric(_) => Some("numeric[]"),
        BindValue::Double(_) => Some("double precision[]"),
        BindValue::Bool(_) => Some("boolean[]"),
        BindValue::Date(_) => Some("date[]"),
        BindValue::Timestamp(_) => Some("timestamptz[]"),
        BindValue::Json(_) => Some("jsonb[]"),
        _ => None,
    }
}

/// Text form Postgres parses back into the same value.
fn literal_text(value: &BindValue) -> String {
    match value {
        BindValue::Text(v) | BindValue::Numeric(v) => v.clone(),
        BindValue::BigInt(v) => v.to_string(),
        BindValue::Double(v) => v.to_string(),
        BindValue::Bool(v) => v.to_string(),
        BindValue::Date(v) => v.format("%Y-%m-%d").to_string(),
        BindValue::Timestamp(v) => v.to_rfc3339(),
        other => other.to_json().to_string(),
    }
}

/// Coerce a raw filter value for `kind` and `op`.
fn filter_value(field: &FieldConfig, kind: &FieldKind, op: FilterOp, raw: &str) -> Result<FilterValue, AdminError> {
    match op {
        FilterOp::Null => {
            let flag = to_bool(&Value::String(raw.to_string())).unwrap_or(true);
            Ok(FilterValue::Bind(BindValue::Bool(flag)))
        }
        FilterOp::Like => Ok(FilterValue::Bind(BindValue::Text(format!("%{}%", escape_like(raw))))),
        FilterOp::In => {
            let parts: Vec<&str> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
            if parts.is_empty() {
                return Err(invalid_filter(field));
            }
            let mut coerced = Vec::with_capacity(parts.len());
            for part in &parts {
                match to_sql_value(kind, &Value::String(part.to_string())) {
                    Ok(Some(value)) => coerced.push(value),
                    _ => return Err(invalid_filter(field)),
                }
            }
            if coerced.iter().all(|v| matches!(v, BindValue::BigInt(_))) {
                let ids = coerced
                    .iter()
                    .filter_map(|v| match v {
                        BindValue::BigInt(id) => Some(*id),
                        _ => None,
                    })
                    .collect();
                return Ok(FilterValue::Bind(BindValue::BigIntArray(ids)));
            }
            let values = coerced.iter().map(literal_text).collect();
            Ok(match array_type(&coerced[0]) {
                Some(array_type) => FilterValue::TypedList { values, array_type },
                None => FilterValue::Bind(BindValue::TextArray(values)),
            })
        }
        _ => match to_sql_value(kind, &Value::String(raw.to_string())) {
            Ok(Some(value)) => Ok(FilterValue::Bind(value)),
            _ => Err(invalid_filter(field)),
        },
    }
}

fn relation_ids(field: &FieldConfig, op: FilterOp, raw: &str) -> Result<Vec<i64>, AdminError> {
    match op {
        FilterOp::Eq | FilterOp::In => {
            let ids: Option<Vec<i64>> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse().ok())
                .collect();
            match ids {
                Some(ids) if !ids.is_empty() => Ok(ids),
                _ => Err(invalid_filter(field)),
            }
        }
        _ => Err(AdminError::BadRequest(format!(
            "unsupported filter operator on relation {}",
            field.name
        ))),
    }
}

/// Correlated subquery selecting related rows of a to-many relation, without the closing paren.
fn push_to_many_exists(sql: &mut SqlBuilder, handler: &ModelHandler, rel: &RelationConfig) {
    let owner = column_expr(ALIAS, &handler.primary_key);
    match (&rel.kind, &rel.pivot) {
        (RelationKind::BelongsToMany, Some(pivot)) => {
            sql.push("EXISTS (SELECT 1 FROM ")
                .push_ident(&pivot.table)
                .push(" AS p JOIN ")
                .push_ident(&rel.table)
                .push(" AS r ON ")
                .push_column("r", &rel.primary_key)
                .push(" = ")
                .push_column("p", &pivot.related_key)
                .push(" WHERE ")
                .push_column("p", &pivot.local_key)
                .push(" = ")
                .push(&owner);
        }
        _ => {
            sql.push("EXISTS (SELECT 1 FROM ")
                .push_ident(&rel.table)
                .push(" AS r WHERE ")
                .push_column("r", &rel.foreign_key)
                .push(" = ")
                .push(&owner);
        }
    }
}

fn push_filter(
    clauses: &mut Clauses<'_>,
    handler: &ModelHandler,
    field: &FieldConfig,
    filter: &FilterParam,
) -> Result<(), AdminError> {
    match &field.kind {
        FieldKind::Relation(rel) if rel.is_to_many() => {
            if filter.op == FilterOp::Null {
                let empty = to_bool(&Value::String(filter.value.clone())).unwrap_or(true);
                let sql = clauses.next();
                if empty {
                    sql.push("NOT ");
                }
                push_to_many_exists(sql, handler, rel);
                sql.push(")");
                return Ok(());
            }
            let ids = relation_ids(field, filter.op, &filter.value)?;
            let sql = clauses.next();
            push_to_many_exists(sql, handler, rel);
            sql.push(" AND ").push_column("r", &rel.primary_key).push(" = ANY(");
            sql.push_bind(BindValue::BigIntArray(ids));
            sql.push("))");
        }
        kind => {
            let Some(column) = field.column() else {
                return Ok(());
            };
            let expr = column_expr(ALIAS, column);
            match filter_value(field, kind, filter.op, &filter.value)? {
                FilterValue::Bind(value) => push_compare(clauses.next(), &expr, filter.op, value),
                FilterValue::TypedList { values, array_type } => {
                    let sql = clauses.next();
                    sql.push(&expr).push(" = ANY(CAST(");
                    sql.push_bind(BindValue::TextArray(values));
                    sql.push(" AS ").push(array_type).push("))");
                }
            }
        }
    }
    Ok(())
}

fn push_search(clauses: &mut Clauses<'_>, handler: &ModelHandler, term: &str) {
    let searchable: Vec<&FieldConfig> = handler
        .fields
        .iter()
        .filter(|f| f.searchable && !f.is_computed())
        .collect();
    if searchable.is_empty() {
        return;
    }

    let sql = clauses.next();
    sql.push("(");
    let mut pattern: Option<usize> = None;
    for (i, field) in searchable.iter().enumerate() {
        if i > 0 {
            sql.push(" OR ");
        }
        match &field.kind {
            FieldKind::Relation(rel) => {
                if rel.is_to_many() {
                    push_to_many_exists(sql, handler, rel);
                } else {
                    sql.push("EXISTS (SELECT 1 FROM ")
                        .push_ident(&rel.table)
                        .push(" AS r WHERE ")
                        .push_column("r", &rel.primary_key)
                        .push(" = ")
                        .push_column(ALIAS, &rel.foreign_key);
                }
                sql.push(" AND CAST(")
                    .push_column("r", &rel.label_column)
                    .push(" AS text) ILIKE ");
                push_pattern(sql, &mut pattern, term);
                sql.push(")");
            }
            _ => {
                sql.push("CAST(").push_column(ALIAS, &field.name).push(" AS text) ILIKE ");
                push_pattern(sql, &mut pattern, term);
            }
        }
    }
    sql.push(")");
}

fn push_pattern(sql: &mut SqlBuilder, pattern: &mut Option<usize>, term: &str) {
    match pattern {
        Some(index) => {
            sql.push_placeholder(*index);
        }
        None => {
            *pattern = Some(sql.push_bind(BindValue::Text(format!("%{}%", escape_like(term)))));
        }
    }
}

/// Archive column, handler constraints, scopes, filters, search, in that order.
fn push_where(
    sql: &mut SqlBuilder,
    handler: &ModelHandler,
    principal: &Principal,
    params: &ListParams,
) -> Result<(), AdminError> {
    let mut clauses = Clauses::new(sql);
    push_base(&mut clauses, handler, principal);

    for name in &params.scopes {
        match handler.scope(name) {
            Some(scope) => {
                for condition in (scope.conditions)(principal) {
                    push_condition(clauses.next(), &condition);
                }
            }
            None => tracing::debug!(model = %handler.slug, scope = %name, "Ignoring unknown scope"),
        }
    }

    for filter in &params.filters {
        match handler.field(&filter.field).filter(|f| f.filterable) {
            Some(field) => push_filter(&mut clauses, handler, field, filter)?,
            None => tracing::debug!(
                model = %handler.slug,
                field = %filter.field,
                "Ignoring filter on non-filterable field"
            ),
        }
    }

    if let Some(term) = &params.search {
        push_search(&mut clauses, handler, term);
    }
    Ok(())
}

fn push_base(clauses: &mut Clauses<'_>, handler: &ModelHandler, principal: &Principal) {
    if let Some(column) = &handler.archive_column {
        clauses.next().push_column(ALIAS, column).push(" = TRUE");
    }
    for condition in handler.constraints_for(principal) {
        push_condition(clauses.next(), &condition);
    }
}

/// Resolve requested sort keys against sortable fields, falling back to the handler default.
pub fn resolve_sort<'a>(handler: &'a ModelHandler, requested: &'a [SortParam]) -> Vec<&'a SortParam> {
    let sortable = |s: &&SortParam| {
        s.field == handler.primary_key
            || handler
                .field(&s.field)
                .is_some_and(|f| f.sortable && f.column().is_some())
    };
    let chosen: Vec<&SortParam> = requested.iter().filter(sortable).collect();
    if !chosen.is_empty() {
        return chosen;
    }
    handler
        .default_sort
        .iter()
        .filter(|s| s.field == handler.primary_key || handler.field(&s.field).is_some_and(|f| f.column().is_some()))
        .collect()
}

fn push_order(sql: &mut SqlBuilder, handler: &ModelHandler, requested: &[SortParam]) {
    let sort = resolve_sort(handler, requested);
    sql.push(" ORDER BY ");
    if sort.is_empty() {
        sql.push_column(ALIAS, &handler.primary_key).push(" DESC");
        return;
    }

    for (i, key) in sort.iter().enumerate() {
        if i > 0 {
            sql.push(", ");
        }
        match handler.field(&key.field).and_then(FieldConfig::relation_config) {
            Some(rel) if key.field != handler.primary_key => {
                sql.push("(SELECT ")
                    .push_column("r", &rel.label_column)
                    .push(" FROM ")
                    .push_ident(&rel.table)
                    .push(" AS r WHERE ")
                    .push_column("r", &rel.primary_key)
                    .push(" = ")
                    .push_column(ALIAS, &rel.foreign_key)
                    .push(")");
            }
            _ => {
                let column = handler
                    .field(&key.field)
                    .and_then(FieldConfig::column)
                    .unwrap_or(&key.field);
                sql.push_column(ALIAS, column);
            }
        }
        sql.push(if key.descending { " DESC" } else { " ASC" });
    }

    if !sort.iter().any(|s| s.field == handler.primary_key) {
        sql.push(", ").push_column(ALIAS, &handler.primary_key).push(" ASC");
    }
}

pub fn list_statements(
    handler: &ModelHandler,
    principal: &Principal,
    params: &ListParams,
    per_page: u64,
) -> Result<ListStatements, AdminError> {
    let mut select = SqlBuilder::new();
    select.push("SELECT to_jsonb(t) AS record");
    push_from(&mut select, handler);
    push_where(&mut select, handler, principal, params)?;
    push_order(&mut select, handler, &params.sort);
    select.push(" LIMIT ");
    select.push_bind(BindValue::BigInt(i64::try_from(per_page).unwrap_or(i64::MAX)));
    select.push(" OFFSET ");
    // Past-the-end pages come back empty.
    select.push_bind(BindValue::BigInt(i64::try_from(params.offset(per_page)).unwrap_or(i64::MAX)));

    let mut count = SqlBuilder::new();
    count.push("SELECT COUNT(*) AS total");
    push_from(&mut count, handler);
    push_where(&mut count, handler, principal, params)?;

    Ok(ListStatements {
        select: select.build(),
        count: count.build(),
    })
}

/// Rows with the given ids that the principal can see.
pub fn find_statement(handler: &ModelHandler, principal: &Principal, ids: &[i64]) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("SELECT to_jsonb(t) AS record");
    push_from(&mut sql, handler);
    let mut clauses = Clauses::new(&mut sql);
    push_base(&mut clauses, handler, principal);
    let next = clauses.next();
    if let [id] = ids {
        next.push_column(ALIAS, &handler.primary_key).push(" = ");
        next.push_bind(BindValue::BigInt(*id));
    } else {
        next.push_column(ALIAS, &handler.primary_key).push(" = ANY(");
        next.push_bind(BindValue::BigIntArray(ids.to_vec()));
        next.push(")");
    }
    sql.build()
}

/// A row by id, ignoring archive state and constraints; used after writes.
pub fn reload_statement(handler: &ModelHandler, id: i64) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("SELECT to_jsonb(t) AS record");
    push_from(&mut sql, handler);
    sql.push(" WHERE ").push_column(ALIAS, &handler.primary_key).push(" = ");
    sql.push_bind(BindValue::BigInt(id));
    sql.build()
}

pub fn belongs_to_statement(rel: &RelationConfig, ids: Vec<i64>) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("SELECT to_jsonb(r) AS record FROM ")
        .push_ident(&rel.table)
        .push(" AS r WHERE ")
        .push_column("r", &rel.primary_key)
        .push(" = ANY(");
    sql.push_bind(BindValue::BigIntArray(ids));
    sql.push(")");
    sql.build()
}

/// `(owner_id, record)` rows for a to-many relation of the given owners.
pub fn to_many_statement(rel: &RelationConfig, owner_ids: Vec<i64>) -> Statement {
    let mut sql = SqlBuilder::new();
    match (&rel.kind, &rel.pivot) {
        (RelationKind::BelongsToMany, Some(pivot)) => {
            sql.push("SELECT CAST(")
                .push_column("p", &pivot.local_key)
                .push(" AS bigint) AS owner_id, to_jsonb(r) AS record FROM ")
                .push_ident(&pivot.table)
                .push(" AS p JOIN ")
                .push_ident(&rel.table)
                .push(" AS r ON ")
                .push_column("r", &rel.primary_key)
                .push(" = ")
                .push_column("p", &pivot.related_key)
                .push(" WHERE ")
                .push_column("p", &pivot.local_key)
                .push(" = ANY(");
        }
        _ => {
            sql.push("SELECT CAST(")
                .push_column("r", &rel.foreign_key)
                .push(" AS bigint) AS owner_id, to_jsonb(r) AS record FROM ")
                .push_ident(&rel.table)
                .push(" AS r WHERE ")
                .push_column("r", &rel.foreign_key)
                .push(" = ANY(");
        }
    }
    sql.push_bind(BindValue::BigIntArray(owner_ids));
    sql.push(") ORDER BY ").push_column("r", &rel.primary_key).push(" ASC");
    sql.build()
}

/// Related rows offered as choices for a relation field.
pub fn options_statement(rel: &RelationConfig, search: Option<&str>) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("SELECT to_jsonb(r) AS record FROM ").push_ident(&rel.table).push(" AS r");
    if let Some(term) = search.map(str::trim).filter(|s| !s.is_empty()) {
        sql.push(" WHERE CAST(").push_column("r", &rel.label_column).push(" AS text) ILIKE ");
        sql.push_bind(BindValue::Text(format!("%{}%", escape_like(term))));
    }
    sql.push(" ORDER BY ").push_column("r", &rel.label_column).push(" ASC LIMIT ");
    sql.push_bind(BindValue::BigInt(OPTIONS_LIMIT));
    sql.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Expand;
    use crate::params::Pagination;

    fn products() -> ModelHandler {
        ModelHandler::builder("products", "catalog_products")
            .field(FieldConfig::text("name").searchable().sortable().filterable())
            .field(FieldConfig::text("sku").searchable())
            .field(FieldConfig::decimal("price").sortable().filterable())
            .field(FieldConfig::boolean("published").filterable())
            .field(FieldConfig::text("internal_notes").hidden())
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
                    "tags",
                    RelationConfig::belongs_to_many(
                        "catalog_tags",
                        "catalog_product_tags",
                        "product_id",
                        "tag_id",
                    ),
                )
                .filterable(),
            )
            .field(
                FieldConfig::relation(
                    "variants",
                    RelationConfig::has_many("catalog_product_variants", "product_id"),
                )
                .filterable(),
            )
            .scope("published", "Published", |_| {
                vec![Condition::eq("published", BindValue::Bool(true))]
            })
            .default_sort("-id")
            .soft_delete("active")
            .build()
            .unwrap()
    }

    fn params(raw: &[(&str, &str)]) -> ListParams {
        let pairs: Vec<(String, String)> = raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ListParams::from_pairs(&pairs).unwrap()
    }

    fn list(raw: &[(&str, &str)]) -> ListStatements {
        let params = params(raw);
        let per_page = params.per_page(Pagination::default());
        list_statements(&products(), &Principal::anonymous(), &params, per_page).unwrap()
    }

    #[test]
    fn plain_list_uses_archive_column_and_default_sort() {
        let statements = list(&[]);
        assert_eq!(
            statements.select.sql,
            "SELECT to_jsonb(t) AS record FROM \"catalog_products\" AS t WHERE t.\"active\" = TRUE \
             ORDER BY t.\"id\" DESC LIMIT $1 OFFSET $2"
        );
        assert_eq!(
            statements.select.binds,
            vec![BindValue::BigInt(25), BindValue::BigInt(0)]
        );
        assert_eq!(
            statements.count.sql,
            "SELECT COUNT(*) AS total FROM \"catalog_products\" AS t WHERE t.\"active\" = TRUE"
        );
    }

    #[test]
    fn scopes_then_filters_then_search() {
        let statements = list(&[
            ("scopes", "published,unknown"),
            ("filters[price][gte]", "10"),
            ("filters[category]", "3"),
            ("search", "lamp"),
        ]);
        assert_eq!(
            statements.count.sql,
            "SELECT COUNT(*) AS total FROM \"catalog_products\" AS t WHERE t.\"active\" = TRUE \
             AND t.\"published\" = $1 \
             AND t.\"price\" >= CAST($2 AS numeric) \
             AND t.\"category_id\" = $3 \
             AND (CAST(t.\"name\" AS text) ILIKE $4 OR CAST(t.\"sku\" AS text) ILIKE $4 \
             OR EXISTS (SELECT 1 FROM \"catalog_categories\" AS r WHERE r.\"id\" = t.\"category_id\" \
             AND CAST(r.\"name\" AS text) ILIKE $4))"
        );
        assert_eq!(
            statements.count.binds,
            vec![
                BindValue::Bool(true),
                BindValue::Numeric("10".into()),
                BindValue::BigInt(3),
                BindValue::Text("%lamp%".into()),
            ]
        );
    }

    #[test]
    fn non_filterable_and_unknown_fields_are_ignored() {
        let statements = list(&[("filters[sku]", "X1"), ("filters[nope]", "1"), ("filters[internal_notes]", "x")]);
        assert!(statements.count.binds.is_empty());
    }

    #[test]
    fn bad_filter_values_are_rejected() {
        let p = params(&[("filters[price]", "cheap")]);
        assert!(matches!(
            list_statements(&products(), &Principal::anonymous(), &p, 25),
            Err(AdminError::BadRequest(_))
        ));
        let p = params(&[("filters[tags][gt]", "1")]);
        assert!(matches!(
            list_statements(&products(), &Principal::anonymous(), &p, 25),
            Err(AdminError::BadRequest(_))
        ));
    }

    #[test]
    fn to_many_filters_use_exists() {
        let statements = list(&[("filters[tags][in]", "1,2"), ("filters[variants][null]", "true")]);
        assert_eq!(
            statements.count.sql,
            "SELECT COUNT(*) AS total FROM \"catalog_products\" AS t WHERE t.\"active\" = TRUE \
             AND EXISTS (SELECT 1 FROM \"catalog_product_tags\" AS p JOIN \"catalog_tags\" AS r \
             ON r.\"id\" = p.\"tag_id\" WHERE p.\"product_id\" = t.\"id\" AND r.\"id\" = ANY($1)) \
             AND NOT EXISTS (SELECT 1 FROM \"catalog_product_variants\" AS r WHERE r.\"product_id\" = t.\"id\")"
        );
        assert_eq!(statements.count.binds, vec![BindValue::BigIntArray(vec![1, 2])]);
    }

    #[test]
    fn like_in_and_null_filters() {
        let statements = list(&[
            ("filters[name][like]", "50%"),
            ("filters[name][in]", "a,b"),
            ("filters[price][null]", "false"),
        ]);
        assert!(statements
            .count
            .sql
            .contains("CAST(t.\"name\" AS text) ILIKE $1 AND CAST(t.\"name\" AS text) = ANY($2) AND t.\"price\" IS NOT NULL"));
        assert_eq!(
            statements.count.binds,
            vec![
                BindValue::Text("%50\\%%".into()),
                BindValue::TextArray(vec!["a".into(), "b".into()]),
            ]
        );
    }

    #[test]
    fn sort_by_relation_label_and_tiebreak() {
        let statements = list(&[("sort", "-category,internal_notes,price"), ("page", "3"), ("per_page", "10")]);
        assert!(statements.select.sql.ends_with(
            "ORDER BY (SELECT r.\"name\" FROM \"catalog_categories\" AS r WHERE r.\"id\" = t.\"category_id\") DESC, \
             t.\"price\" ASC, t.\"id\" ASC LIMIT $1 OFFSET $2"
        ));
        assert_eq!(
            statements.select.binds,
            vec![BindValue::BigInt(10), BindValue::BigInt(20)]
        );
    }

    #[test]
    fn constraints_are_always_applied() {
        let handler = ModelHandler::builder("notes", "notes")
            .constraints(|p| vec![Condition::eq("owner_id", BindValue::BigInt(p.user_id.unwrap_or(0)))])
            .build()
            .unwrap();
        let statement = find_statement(&handler, &Principal::user(5, &[]), &[9]);
        assert_eq!(
            statement.sql,
            "SELECT to_jsonb(t) AS record FROM \"notes\" AS t WHERE t.\"owner_id\" = $1 AND t.\"id\" = $2"
        );
        assert_eq!(statement.binds, vec![BindValue::BigInt(5), BindValue::BigInt(9)]);

        let statement = find_statement(&handler, &Principal::user(5, &[]), &[1, 2]);
        assert!(statement.sql.ends_with("t.\"id\" = ANY($2)"));
    }

    #[test]
    fn relation_loading_statements() {
        let handler = products();
        let tags = handler.field("tags").and_then(FieldConfig::relation_config).unwrap();
        assert_eq!(
            to_many_statement(tags, vec![1, 2]).sql,
            "SELECT CAST(p.\"product_id\" AS bigint) AS owner_id, to_jsonb(r) AS record \
             FROM \"catalog_product_tags\" AS p JOIN \"catalog_tags\" AS r ON r.\"id\" = p.\"tag_id\" \
             WHERE p.\"product_id\" = ANY($1) ORDER BY r.\"id\" ASC"
        );

        let variants = handler.field("variants").and_then(FieldConfig::relation_config).unwrap();
        assert_eq!(
            to_many_statement(variants, vec![1]).sql,
            "SELECT CAST(r.\"product_id\" AS bigint) AS owner_id, to_jsonb(r) AS record \
             FROM \"catalog_product_variants\" AS r WHERE r.\"product_id\" = ANY($1) ORDER BY r.\"id\" ASC"
        );

        let category = handler.field("category").and_then(FieldConfig::relation_config).unwrap();
        assert_eq!(
            belongs_to_statement(category, vec![4]).sql,
            "SELECT to_jsonb(r) AS record FROM \"catalog_categories\" AS r WHERE r.\"id\" = ANY($1)"
        );
        let options = options_statement(category, Some("lig"));
        assert_eq!(
            options.sql,
            "SELECT to_jsonb(r) AS record FROM \"catalog_categories\" AS r \
             WHERE CAST(r.\"name\" AS text) ILIKE $1 ORDER BY r.\"name\" ASC LIMIT $2"
        );
    }

    #[test]
    fn typed_in_filters_cast_to_column_type() {
        let statements = list(&[("filters[price][in]", "10, 12.50"), ("filters[published][in]", "1,false")]);
        assert!(statements.count.sql.ends_with(
            "AND t.\"price\" = ANY(CAST($1 AS numeric[])) AND t.\"published\" = ANY(CAST($2 AS boolean[]))"
        ));
        assert_eq!(
            statements.count.binds,
            vec![
                BindValue::TextArray(vec!["10".into(), "12.50".into()]),
                BindValue::TextArray(vec!["true".into(), "false".into()]),
            ]
        );
    }

    #[test]
    fn in_filters_reject_any_bad_part() {
        for raw in [("filters[price][in]", "10,abc"), ("filters[published][in]", "yes,maybe")] {
            let p = params(&[raw]);
            assert!(
                matches!(
                    list_statements(&products(), &Principal::anonymous(), &p, 25),
                    Err(AdminError::BadRequest(_))
                ),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn huge_page_numbers_keep_offset_positive() {
        let page = u64::MAX.to_string();
        let statements = list(&[("page", page.as_str())]);
        assert_eq!(
            statements.select.binds,
            vec![BindValue::BigInt(25), BindValue::BigInt(i64::MAX)]
        );
    }
}
