//! Rendering stored rows into client representations.

use std::collections::HashMap;

use diesel_async::AsyncPgConnection;
use serde_json::{Number, Value};

use crate::cast::{to_bool, to_i64};
use crate::error::AdminError;
use crate::field::{Expand, FieldConfig, FieldKind, RelationConfig, RelationKind, View};
use crate::files::FileStore;
use crate::handler::ModelHandler;
use crate::query;
use crate::sql::{load_owned_records, load_records, Record};

/// Integer primary key of a stored row.
pub fn record_id(record: &Record, primary_key: &str) -> Option<i64> {
    record.get(primary_key).and_then(to_i64)
}

/// Related rows loaded for one page of records, keyed by relation field name.
#[derive(Debug, Default)]
pub struct RelationData {
    belongs_to: HashMap<String, HashMap<i64, Record>>,
    to_many: HashMap<String, HashMap<i64, Vec<Record>>>,
}

impl RelationData {
    /// Batch-load every relation in `fields` for `records`, one statement per relation.
    pub async fn load(
        conn: &mut AsyncPgConnection,
        handler: &ModelHandler,
        fields: &[&FieldConfig],
        records: &[Record],
    ) -> Result<Self, AdminError> {
        let mut data = Self::default();
        if records.is_empty() {
            return Ok(data);
        }
        let owner_ids: Vec<i64> = records
            .iter()
            .filter_map(|r| record_id(r, &handler.primary_key))
            .collect();

        for field in fields {
            let Some(rel) = field.relation_config() else {
                continue;
            };
            match rel.kind {
                RelationKind::BelongsTo => {
                    let mut ids: Vec<i64> = records
                        .iter()
                        .filter_map(|r| r.get(&rel.foreign_key).and_then(to_i64))
                        .collect();
                    ids.sort_unstable();
                    ids.dedup();
                    let mut by_id = HashMap::new();
                    if !ids.is_empty() {
                        for row in load_records(conn, query::belongs_to_statement(rel, ids)).await? {
                            if let Some(id) = record_id(&row, &rel.primary_key) {
                                by_id.insert(id, row);
                            }
                        }
                    }
                    data.belongs_to.insert(field.name.clone(), by_id);
                }
                RelationKind::HasMany | RelationKind::BelongsToMany => {
                    let mut by_owner: HashMap<i64, Vec<Record>> = HashMap::new();
                    if !owner_ids.is_empty() {
                        let statement = query::to_many_statement(rel, owner_ids.clone());
                        for (owner, row) in load_owned_records(conn, statement).await? {
                            by_owner.entry(owner).or_default().push(row);
                        }
                    }
                    data.to_many.insert(field.name.clone(), by_owner);
                }
            }
        }
        Ok(data)
    }
}

pub struct Transformer<'a> {
    handler: &'a ModelHandler,
    view: View,
    with: &'a [String],
    files: &'a FileStore,
}

impl<'a> Transformer<'a> {
    pub fn new(handler: &'a ModelHandler, view: View, with: &'a [String], files: &'a FileStore) -> Self {
        Self {
            handler,
            view,
            with,
            files,
        }
    }

    fn should_expand(&self, field: &FieldConfig) -> bool {
        if field.relation_config().is_none() || !field.visible_in(self.view) {
            return false;
        }
        match field.expand {
            Expand::Always => true,
            Expand::Detail if self.view == View::Detail => true,
            _ => self.with.iter().any(|w| w == &field.name),
        }
    }

    /// Relation fields whose related rows must be loaded.
    pub fn expanded_fields(&self) -> Vec<&'a FieldConfig> {
        self.handler
            .fields
            .iter()
            .filter(|f| self.should_expand(f))
            .collect()
    }

    pub fn transform(&self, record: &Record, relations: &RelationData) -> Value {
        let mut out = Record::new();
        let pk = &self.handler.primary_key;
        out.insert(pk.clone(), record.get(pk).cloned().unwrap_or(Value::Null));

        for field in &self.handler.fields {
            if !field.visible_in(self.view) {
                continue;
            }
            if let Some(accessor) = &field.accessor {
                out.insert(field.name.clone(), accessor.call(record));
                continue;
            }
            match &field.kind {
                FieldKind::Relation(rel) => {
                    if let Some(value) = self.relation_value(field, rel, record, relations) {
                        out.insert(field.name.clone(), value);
                    }
                }
                kind => {
                    let raw = record.get(&field.name).cloned().unwrap_or(Value::Null);
                    out.insert(field.name.clone(), cast_output(kind, raw, self.files));
                }
            }
        }
        Value::Object(out)
    }

    pub fn transform_all(&self, records: &[Record], relations: &RelationData) -> Vec<Value> {
        records.iter().map(|r| self.transform(r, relations)).collect()
    }

    fn relation_value(
        &self,
        field: &FieldConfig,
        rel: &RelationConfig,
        record: &Record,
        relations: &RelationData,
    ) -> Option<Value> {
        let expanded = self.should_expand(field);
        match rel.kind {
            RelationKind::BelongsTo => {
                let fk = record.get(&rel.foreign_key).cloned().unwrap_or(Value::Null);
                if !expanded {
                    return Some(fk);
                }
                let related = to_i64(&fk)
                    .and_then(|id| relations.belongs_to.get(&field.name)?.get(&id))
                    .map(|row| self.related_row(rel, row))
                    .unwrap_or(Value::Null);
                Some(related)
            }
            RelationKind::HasMany | RelationKind::BelongsToMany => {
                if !expanded {
                    return None;
                }
                let rows: Vec<Value> = record_id(record, &self.handler.primary_key)
                    .and_then(|id| relations.to_many.get(&field.name)?.get(&id))
                    .map(|rows| rows.iter().map(|row| self.related_row(rel, row)).collect())
                    .unwrap_or_default();
                Some(Value::Array(rows))
            }
        }
    }

    fn related_row(&self, rel: &RelationConfig, row: &Record) -> Value {
        let mut out = Record::new();
        for column in rel.expanded_columns() {
            let raw = row.get(column).cloned().unwrap_or(Value::Null);
            let value = match rel.fields.iter().find(|f| f.name == column) {
                Some(field) => cast_output(&field.kind, raw, self.files),
                None => raw,
            };
            out.insert(column.to_string(), value);
        }
        Value::Object(out)
    }
}

/// Normalize a stored value for output according to its field kind.
pub fn cast_output(kind: &FieldKind, value: Value, files: &FileStore) -> Value {
    match (kind, value) {
        (_, Value::Null) => Value::Null,
        (FieldKind::Boolean, value) => to_bool(&value).map(Value::Bool).unwrap_or(value),
        (FieldKind::Json, Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        (FieldKind::File, Value::String(path)) if path.is_empty() => Value::Null,
        (FieldKind::File, Value::String(path)) => Value::String(files.url(&path)),
        (FieldKind::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(s),
        },
        (FieldKind::Float | FieldKind::Decimal, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(s)),
        (_, value) => value,
    }
}
