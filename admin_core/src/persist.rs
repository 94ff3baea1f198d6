//! Write side: payload preparation, validation, and write statements.
//!
//! [`prepare`] turns a [`Payload`] into typed column values, pivot id sets,
//! child rows, and pending uploads, collecting every validation message on the
//! way. Database-backed rules run separately through [`check_database_rules`].

use chrono::Utc;
use diesel_async::AsyncPgConnection;
use serde_json::Value;

use crate::cast::{is_blank, parse_children, parse_id, parse_id_list, to_sql_value, CastError};
use crate::error::{AdminError, ValidationErrors};
use crate::field::{FieldConfig, FieldKind, Pivot, RelationConfig, RelationKind};
use crate::handler::{ModelHandler, SaveMode};
use crate::payload::{Payload, UploadedFile};
use crate::policy::Principal;
use crate::rules::{is_required, required_message, validate_file, validate_value, Rule};
use crate::sql::{fetch_ids, BindValue, Record, SqlBuilder, SqlValue, Statement};

/// Column values for one row, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: Vec<(String, SqlValue)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace a column value.
    pub fn set(&mut self, column: &str, value: SqlValue) {
        match self.values.iter_mut().find(|(c, _)| c == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column.to_string(), value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        let index = self.values.iter().position(|(c, _)| c == column)?;
        Some(self.values.remove(index).1)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.values.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// JSON view of the pending values.
    pub fn to_record(&self) -> Record {
        self.values
            .iter()
            .map(|(c, v)| (c.clone(), v.as_ref().map(BindValue::to_json).unwrap_or(Value::Null)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotWrite {
    pub field: String,
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildRow {
    /// Position in the submitted list, used for error keys.
    pub index: usize,
    pub id: Option<i64>,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildrenWrite {
    pub field: String,
    pub rows: Vec<ChildRow>,
}

#[derive(Debug, Clone, Default)]
pub struct PreparedWrite {
    pub attributes: Attributes,
    pub pivots: Vec<PivotWrite>,
    pub children: Vec<ChildrenWrite>,
    pub uploads: Vec<(String, UploadedFile)>,
}

fn is_writable(field: &FieldConfig) -> bool {
    field.editable && !field.is_computed()
}

/// Submitted value for a field; BelongsTo fields also accept their foreign key name.
fn input<'p>(field: &FieldConfig, payload: &'p Payload) -> Option<&'p Value> {
    payload.fields.get(&field.name).or_else(|| match field.relation_config() {
        Some(rel) if rel.kind == RelationKind::BelongsTo => payload.fields.get(&rel.foreign_key),
        _ => None,
    })
}

fn add_all(errors: &mut ValidationErrors, key: &str, messages: Vec<String>) {
    for message in messages {
        errors.add(key, message);
    }
}

/// Coerce and validate one stored column, honoring create defaults and update presence.
fn prepare_column(
    field: &FieldConfig,
    submitted: Option<&Value>,
    mode: SaveMode,
    key: &str,
    attributes: &mut Attributes,
    errors: &mut ValidationErrors,
) {
    let Some(column) = field.column() else {
        return;
    };
    let value = match (submitted, mode) {
        (Some(value), _) => value.clone(),
        (None, SaveMode::Create) => match &field.default {
            Some(default) => default.clone(),
            None => {
                if is_required(&field.rules) {
                    errors.add(key, required_message(&field.label));
                }
                return;
            }
        },
        (None, SaveMode::Update) => return,
    };

    match to_sql_value(&field.kind, &value) {
        Err(e) => errors.add(key, e.message(&field.label)),
        Ok(coerced) => {
            let json = coerced.as_ref().map(BindValue::to_json).unwrap_or(Value::Null);
            let messages = validate_value(&field.rules, &field.label, &json);
            if messages.is_empty() {
                attributes.set(column, coerced);
            } else {
                add_all(errors, key, messages);
            }
        }
    }
}

fn prepare_file(
    field: &FieldConfig,
    payload: &Payload,
    mode: SaveMode,
    max_upload_bytes: u64,
    prepared: &mut PreparedWrite,
    errors: &mut ValidationErrors,
) {
    if let Some(file) = payload.files.get(&field.name) {
        let mut messages = validate_file(&field.rules, &field.label, file);
        if file.size() > max_upload_bytes {
            messages.push(format!(
                "The {} may not be greater than {} kilobytes.",
                field.label,
                max_upload_bytes / 1024
            ));
        }
        if messages.is_empty() {
            prepared.uploads.push((field.name.clone(), file.clone()));
        } else {
            add_all(errors, &field.name, messages);
        }
        return;
    }

    match payload.fields.get(&field.name) {
        // Blank clears the stored file; any other value keeps it.
        Some(value) if is_blank(value) => {
            if is_required(&field.rules) {
                errors.add(&field.name, required_message(&field.label));
            } else {
                prepared.attributes.set(&field.name, None);
            }
        }
        Some(_) => {}
        None => {
            if mode == SaveMode::Create && is_required(&field.rules) {
                errors.add(&field.name, required_message(&field.label));
            }
        }
    }
}

fn prepare_pivot(
    field: &FieldConfig,
    payload: &Payload,
    mode: SaveMode,
    prepared: &mut PreparedWrite,
    errors: &mut ValidationErrors,
) {
    let Some(value) = payload.fields.get(&field.name) else {
        if mode == SaveMode::Create && is_required(&field.rules) {
            errors.add(&field.name, required_message(&field.label));
        }
        return;
    };
    match parse_id_list(value) {
        Err(e) => errors.add(&field.name, e.message(&field.label)),
        Ok(ids) => {
            let messages = validate_value(&field.rules, &field.label, &Value::from(ids.clone()));
            if messages.is_empty() {
                prepared.pivots.push(PivotWrite {
                    field: field.name.clone(),
                    ids,
                });
            } else {
                add_all(errors, &field.name, messages);
            }
        }
    }
}

fn prepare_children(
    field: &FieldConfig,
    rel: &RelationConfig,
    payload: &Payload,
    mode: SaveMode,
    prepared: &mut PreparedWrite,
    errors: &mut ValidationErrors,
) {
    let Some(value) = payload.fields.get(&field.name) else {
        if mode == SaveMode::Create && is_required(&field.rules) {
            errors.add(&field.name, required_message(&field.label));
        }
        return;
    };
    let items = match parse_children(value) {
        Ok(items) => items,
        Err(e) => {
            errors.add(&field.name, e.message(&field.label));
            return;
        }
    };
    let as_list = Value::Array(items.iter().cloned().map(Value::Object).collect());
    add_all(errors, &field.name, validate_value(&field.rules, &field.label, &as_list));

    let mut rows = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let id = match item.get(&rel.primary_key).filter(|v| !is_blank(v)) {
            None => None,
            Some(v) => match parse_id(v) {
                Some(id) => Some(id),
                None => {
                    errors.add(
                        format!("{}.{index}.{}", field.name, rel.primary_key),
                        CastError::Integer.message(&rel.primary_key),
                    );
                    continue;
                }
            },
        };
        let child_mode = if id.is_some() { SaveMode::Update } else { SaveMode::Create };

        let mut attributes = Attributes::new();
        for child in rel.fields.iter().filter(|f| is_writable(f)) {
            if matches!(child.kind, FieldKind::File) || child.relation_config().is_some_and(RelationConfig::is_to_many) {
                continue;
            }
            let key = format!("{}.{index}.{}", field.name, child.name);
            let submitted = item.get(&child.name);
            prepare_column(child, submitted, child_mode, &key, &mut attributes, errors);
        }
        rows.push(ChildRow {
            index,
            id,
            attributes,
        });
    }
    prepared.children.push(ChildrenWrite {
        field: field.name.clone(),
        rows,
    });
}

/// Coerce and statically validate `payload` for `handler`.
pub fn prepare(
    handler: &ModelHandler,
    payload: &Payload,
    mode: SaveMode,
    max_upload_bytes: u64,
) -> Result<PreparedWrite, ValidationErrors> {
    let mut prepared = PreparedWrite::default();
    let mut errors = ValidationErrors::new();

    for field in handler.fields.iter().filter(|f| is_writable(f)) {
        match &field.kind {
            FieldKind::File => prepare_file(field, payload, mode, max_upload_bytes, &mut prepared, &mut errors),
            FieldKind::Relation(rel) if rel.kind == RelationKind::BelongsToMany => {
                prepare_pivot(field, payload, mode, &mut prepared, &mut errors)
            }
            FieldKind::Relation(rel) if rel.kind == RelationKind::HasMany => {
                prepare_children(field, rel, payload, mode, &mut prepared, &mut errors)
            }
            _ => prepare_column(
                field,
                input(field, payload),
                mode,
                &field.name,
                &mut prepared.attributes,
                &mut errors,
            ),
        }
    }

    if errors.is_empty() {
        Ok(prepared)
    } else {
        Err(errors)
    }
}

/// Fill `create_*`/`write_*` audit columns.
pub fn apply_audit_columns(attributes: &mut Attributes, mode: SaveMode, principal: &Principal) {
    let now = Some(BindValue::Timestamp(Utc::now()));
    let uid = principal.user_id.map(BindValue::BigInt);
    if mode == SaveMode::Create {
        attributes.set("create_uid", uid.clone());
        attributes.set("create_date", now.clone());
    }
    attributes.set("write_uid", uid);
    attributes.set("write_date", now);
}

fn loosely_equal(stored: &Value, written: &Value) -> bool {
    if stored == written {
        return true;
    }
    match (stored, written) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::Number(b)) | (Value::Number(b), Value::String(a)) => {
            a.parse::<f64>().ok() == b.as_f64()
        }
        (Value::Null, _) | (_, Value::Null) => false,
        (a, b) => a.to_string() == b.to_string(),
    }
}

/// Field names whose stored column differs from the pending value.
pub fn changed_fields(handler: &ModelHandler, before: &Record, attributes: &Attributes) -> Vec<String> {
    handler
        .fields
        .iter()
        .filter_map(|field| {
            let column = field.column()?;
            let pending = attributes.get(column)?;
            let pending = pending.as_ref().map(BindValue::to_json).unwrap_or(Value::Null);
            let stored = before.get(column).unwrap_or(&Value::Null);
            (!loosely_equal(stored, &pending)).then(|| field.name.clone())
        })
        .collect()
}

fn returning_id(sql: &mut SqlBuilder, primary_key: &str) {
    sql.push(" RETURNING CAST(").push_ident(primary_key).push(" AS bigint) AS id");
}

pub fn insert_statement(table: &str, primary_key: &str, attributes: &Attributes) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("INSERT INTO ").push_ident(table);
    if attributes.is_empty() {
        sql.push(" DEFAULT VALUES");
    } else {
        sql.push(" (");
        for (i, (column, _)) in attributes.iter().enumerate() {
            if i > 0 {
                sql.push(", ");
            }
            sql.push_ident(column);
        }
        sql.push(") VALUES (");
        for (i, (_, value)) in attributes.iter().enumerate() {
            if i > 0 {
                sql.push(", ");
            }
            sql.push_value(value.clone());
        }
        sql.push(")");
    }
    returning_id(&mut sql, primary_key);
    sql.build()
}

/// `None` when there is nothing to write. `owner` restricts the update to rows owned by a parent.
pub fn update_statement(
    table: &str,
    primary_key: &str,
    id: i64,
    attributes: &Attributes,
    owner: Option<(&str, i64)>,
) -> Option<Statement> {
    if attributes.is_empty() {
        return None;
    }
    let mut sql = SqlBuilder::new();
    sql.push("UPDATE ").push_ident(table).push(" SET ");
    for (i, (column, value)) in attributes.iter().enumerate() {
        if i > 0 {
            sql.push(", ");
        }
        sql.push_ident(column).push(" = ");
        sql.push_value(value.clone());
    }
    sql.push(" WHERE ").push_ident(primary_key).push(" = ");
    sql.push_bind(BindValue::BigInt(id));
    if let Some((column, owner_id)) = owner {
        sql.push(" AND ").push_ident(column).push(" = ");
        sql.push_bind(BindValue::BigInt(owner_id));
    }
    Some(sql.build())
}

/// Hard delete, or clearing the archive column when the handler soft-deletes.
pub fn delete_statement(handler: &ModelHandler, ids: &[i64]) -> Statement {
    let mut sql = SqlBuilder::new();
    match &handler.archive_column {
        Some(column) => {
            sql.push("UPDATE ")
                .push_ident(&handler.table)
                .push(" SET ")
                .push_ident(column)
                .push(" = FALSE");
            if handler.audit_columns {
                sql.push(", ").push_ident("write_date").push(" = NOW()");
            }
        }
        None => {
            sql.push("DELETE FROM ").push_ident(&handler.table);
        }
    }
    sql.push(" WHERE ").push_ident(&handler.primary_key).push(" = ANY(");
    sql.push_bind(BindValue::BigIntArray(ids.to_vec()));
    sql.push(")");
    sql.build()
}

fn existing_ids_statement(table: &str, primary_key: &str, ids: Vec<i64>) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("SELECT CAST(")
        .push_ident(primary_key)
        .push(" AS bigint) AS id FROM ")
        .push_ident(table)
        .push(" WHERE ")
        .push_ident(primary_key)
        .push(" = ANY(");
    sql.push_bind(BindValue::BigIntArray(ids));
    sql.push(")");
    sql.build()
}

fn unique_statement(handler: &ModelHandler, column: &str, value: BindValue, id: Option<i64>) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("SELECT CAST(")
        .push_ident(&handler.primary_key)
        .push(" AS bigint) AS id FROM ")
        .push_ident(&handler.table)
        .push(" WHERE ")
        .push_ident(column)
        .push(" = ");
    sql.push_bind(value);
    if let Some(id) = id {
        sql.push(" AND ").push_ident(&handler.primary_key).push(" <> ");
        sql.push_bind(BindValue::BigInt(id));
    }
    sql.push(" LIMIT 1");
    sql.build()
}

/// `Unique` rules and existence of referenced ids. `id` is the record being updated.
pub async fn check_database_rules(
    conn: &mut AsyncPgConnection,
    handler: &ModelHandler,
    prepared: &PreparedWrite,
    id: Option<i64>,
) -> Result<ValidationErrors, AdminError> {
    let mut errors = ValidationErrors::new();

    for field in &handler.fields {
        let Some(column) = field.column() else {
            continue;
        };
        let Some(Some(value)) = prepared.attributes.get(column) else {
            continue;
        };

        if field.rules.iter().any(|r| matches!(r, Rule::Unique)) {
            let taken = fetch_ids(conn, unique_statement(handler, column, value.clone(), id)).await?;
            if !taken.is_empty() {
                errors.add(&field.name, format!("The {} has already been taken.", field.label));
            }
        }

        if let (Some(rel), BindValue::BigInt(related)) = (field.relation_config(), value) {
            let found = fetch_ids(conn, existing_ids_statement(&rel.table, &rel.primary_key, vec![*related])).await?;
            if found.is_empty() {
                errors.add(&field.name, format!("The selected {} is invalid.", field.label));
            }
        }
    }

    for pivot in &prepared.pivots {
        let (Some(field), false) = (handler.field(&pivot.field), pivot.ids.is_empty()) else {
            continue;
        };
        let Some(rel) = field.relation_config() else {
            continue;
        };
        let found = fetch_ids(conn, existing_ids_statement(&rel.table, &rel.primary_key, pivot.ids.clone())).await?;
        if pivot.ids.iter().any(|id| !found.contains(id)) {
            errors.add(&field.name, format!("The selected {} is invalid.", field.label));
        }
    }

    Ok(errors)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PivotPlan {
    pub attach: Vec<i64>,
    pub detach: Vec<i64>,
}

impl PivotPlan {
    pub fn is_empty(&self) -> bool {
        self.attach.is_empty() && self.detach.is_empty()
    }
}

/// Detach ids no longer wanted, attach the new ones.
pub fn plan_pivot_sync(current: &[i64], desired: &[i64]) -> PivotPlan {
    PivotPlan {
        attach: desired.iter().copied().filter(|id| !current.contains(id)).collect(),
        detach: current.iter().copied().filter(|id| !desired.contains(id)).collect(),
    }
}

pub fn pivot_current_statement(pivot: &Pivot, owner: i64) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("SELECT CAST(")
        .push_ident(&pivot.related_key)
        .push(" AS bigint) AS id FROM ")
        .push_ident(&pivot.table)
        .push(" WHERE ")
        .push_ident(&pivot.local_key)
        .push(" = ");
    sql.push_bind(BindValue::BigInt(owner));
    sql.build()
}

pub fn pivot_detach_statement(pivot: &Pivot, owner: i64, ids: Vec<i64>) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("DELETE FROM ")
        .push_ident(&pivot.table)
        .push(" WHERE ")
        .push_ident(&pivot.local_key)
        .push(" = ");
    sql.push_bind(BindValue::BigInt(owner));
    sql.push(" AND ").push_ident(&pivot.related_key).push(" = ANY(");
    sql.push_bind(BindValue::BigIntArray(ids));
    sql.push(")");
    sql.build()
}

pub fn pivot_attach_statement(pivot: &Pivot, owner: i64, ids: Vec<i64>) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("INSERT INTO ")
        .push_ident(&pivot.table)
        .push(" (")
        .push_ident(&pivot.local_key)
        .push(", ")
        .push_ident(&pivot.related_key)
        .push(") SELECT ");
    sql.push_bind(BindValue::BigInt(owner));
    sql.push(", related FROM UNNEST(");
    sql.push_bind(BindValue::BigIntArray(ids));
    sql.push(") AS related");
    sql.build()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildPlan {
    pub updates: Vec<(i64, Attributes)>,
    pub inserts: Vec<Attributes>,
    pub deletes: Vec<i64>,
}

impl ChildPlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty() && self.deletes.is_empty()
    }
}

/// Match submitted child rows against the ids currently owned by the record.
pub fn plan_children_sync(
    write: &ChildrenWrite,
    rel: &RelationConfig,
    owned: &[i64],
) -> Result<ChildPlan, ValidationErrors> {
    let mut plan = ChildPlan::default();
    let mut errors = ValidationErrors::new();
    let mut kept = Vec::new();

    for row in &write.rows {
        match row.id {
            Some(id) if owned.contains(&id) => {
                kept.push(id);
                plan.updates.push((id, row.attributes.clone()));
            }
            Some(_) => errors.add(
                format!("{}.{}.{}", write.field, row.index, rel.primary_key),
                format!("The selected {} is invalid.", rel.primary_key),
            ),
            None => plan.inserts.push(row.attributes.clone()),
        }
    }
    plan.deletes = owned.iter().copied().filter(|id| !kept.contains(id)).collect();

    if errors.is_empty() {
        Ok(plan)
    } else {
        Err(errors)
    }
}

pub fn children_owned_statement(rel: &RelationConfig, owner: i64) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("SELECT CAST(")
        .push_ident(&rel.primary_key)
        .push(" AS bigint) AS id FROM ")
        .push_ident(&rel.table)
        .push(" WHERE ")
        .push_ident(&rel.foreign_key)
        .push(" = ");
    sql.push_bind(BindValue::BigInt(owner));
    sql.build()
}

pub fn children_delete_statement(rel: &RelationConfig, owner: i64, ids: Vec<i64>) -> Statement {
    let mut sql = SqlBuilder::new();
    sql.push("DELETE FROM ")
        .push_ident(&rel.table)
        .push(" WHERE ")
        .push_ident(&rel.foreign_key)
        .push(" = ");
    sql.push_bind(BindValue::BigInt(owner));
    sql.push(" AND ").push_ident(&rel.primary_key).push(" = ANY(");
    sql.push_bind(BindValue::BigIntArray(ids));
    sql.push(")");
    sql.build()
}
