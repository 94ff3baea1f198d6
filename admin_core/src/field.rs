//! Field configuration: what a model attribute exposes and how it is edited.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::rules::Rule;
use crate::sql::Record;

/// Which representation is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    List,
    Detail,
}

/// When a relation is expanded without being requested through `with`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expand {
    Never,
    Detail,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    BelongsTo,
    HasMany,
    BelongsToMany,
}

#[derive(Debug, Clone)]
pub struct Pivot {
    pub table: String,
    /// Pivot column pointing at the owning record.
    pub local_key: String,
    /// Pivot column pointing at the related record.
    pub related_key: String,
}

#[derive(Debug, Clone)]
pub struct RelationConfig {
    pub kind: RelationKind,
    pub table: String,
    pub primary_key: String,
    /// BelongsTo: column on the owning table. HasMany: column on the related table.
    pub foreign_key: String,
    pub pivot: Option<Pivot>,
    pub label_column: String,
    pub columns: Vec<String>,
    /// Editable child fields for HasMany synchronization.
    pub fields: Vec<FieldConfig>,
}

impl RelationConfig {
    pub fn belongs_to(table: &str, foreign_key: &str) -> Self {
        Self::new(RelationKind::BelongsTo, table, foreign_key, None)
    }

    pub fn has_many(table: &str, foreign_key: &str) -> Self {
        Self::new(RelationKind::HasMany, table, foreign_key, None)
    }

    pub fn belongs_to_many(table: &str, pivot_table: &str, local_key: &str, related_key: &str) -> Self {
        Self::new(
            RelationKind::BelongsToMany,
            table,
            "",
            Some(Pivot {
                table: pivot_table.to_string(),
                local_key: local_key.to_string(),
                related_key: related_key.to_string(),
            }),
        )
    }

    fn new(kind: RelationKind, table: &str, foreign_key: &str, pivot: Option<Pivot>) -> Self {
        Self {
            kind,
            table: table.to_string(),
            primary_key: "id".to_string(),
            foreign_key: foreign_key.to_string(),
            pivot,
            label_column: "name".to_string(),
            columns: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn label(mut self, column: &str) -> Self {
        self.label_column = column.to_string();
        self
    }

    pub fn primary_key(mut self, column: &str) -> Self {
        self.primary_key = column.to_string();
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn fields(mut self, fields: Vec<FieldConfig>) -> Self {
        self.fields = fields;
        self
    }

    /// Columns rendered for an expanded related row.
    pub fn expanded_columns(&self) -> Vec<&str> {
        if self.columns.is_empty() {
            vec![self.primary_key.as_str(), self.label_column.as_str()]
        } else {
            self.columns.iter().map(String::as_str).collect()
        }
    }

    pub fn is_to_many(&self) -> bool {
        self.kind != RelationKind::BelongsTo
    }
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Json,
    File,
    Relation(RelationConfig),
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Json => "json",
            Self::File => "file",
            Self::Relation(rel) => match rel.kind {
                RelationKind::BelongsTo => "belongs_to",
                RelationKind::HasMany => "has_many",
                RelationKind::BelongsToMany => "belongs_to_many",
            },
        }
    }
}

/// Derives a value from the raw stored row.
#[derive(Clone)]
pub struct Accessor(Arc<dyn Fn(&Record) -> Value + Send + Sync>);

impl Accessor {
    pub fn call(&self, record: &Record) -> Value {
        (self.0)(record)
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Accessor(..)")
    }
}

#[derive(Debug, Clone)]
pub struct FieldConfig {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub in_list: bool,
    pub in_detail: bool,
    pub editable: bool,
    pub searchable: bool,
    pub filterable: bool,
    pub sortable: bool,
    pub expand: Expand,
    pub rules: Vec<Rule>,
    pub default: Option<Value>,
    pub accessor: Option<Accessor>,
}

impl FieldConfig {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            label: name.replace('_', " "),
            kind,
            in_list: true,
            in_detail: true,
            editable: true,
            searchable: false,
            filterable: false,
            sortable: false,
            expand: Expand::Never,
            rules: Vec::new(),
            default: None,
            accessor: None,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn decimal(name: &str) -> Self {
        Self::new(name, FieldKind::Decimal)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn json(name: &str) -> Self {
        Self::new(name, FieldKind::Json)
    }

    pub fn file(name: &str) -> Self {
        Self::new(name, FieldKind::File)
    }

    pub fn relation(name: &str, relation: RelationConfig) -> Self {
        Self::new(name, FieldKind::Relation(relation))
    }

    /// A read-only value computed from the stored row.
    pub fn computed<F>(name: &str, accessor: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        let mut field = Self::new(name, FieldKind::Json);
        field.editable = false;
        field.accessor = Some(Accessor(Arc::new(accessor)));
        field
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Never rendered; may still be editable (e.g. secrets).
    pub fn hidden(mut self) -> Self {
        self.in_list = false;
        self.in_detail = false;
        self
    }

    pub fn hide_from_list(mut self) -> Self {
        self.in_list = false;
        self
    }

    pub fn hide_from_detail(mut self) -> Self {
        self.in_detail = false;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.editable = false;
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn expand(mut self, expand: Expand) -> Self {
        self.expand = expand;
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules<I: IntoIterator<Item = Rule>>(mut self, rules: I) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn relation_config(&self) -> Option<&RelationConfig> {
        match &self.kind {
            FieldKind::Relation(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn visible_in(&self, view: View) -> bool {
        match view {
            View::List => self.in_list,
            View::Detail => self.in_detail,
        }
    }

    pub fn is_computed(&self) -> bool {
        self.accessor.is_some()
    }

    /// Column on the owning table, if the field is stored there.
    pub fn column(&self) -> Option<&str> {
        if self.is_computed() {
            return None;
        }
        match &self.kind {
            FieldKind::Relation(rel) if rel.kind == RelationKind::BelongsTo => {
                Some(rel.foreign_key.as_str())
            }
            FieldKind::Relation(_) => None,
            _ => Some(self.name.as_str()),
        }
    }

    /// Metadata rendering for admin clients.
    pub fn describe(&self) -> Value {
        let mut meta = json!({
            "name": self.name,
            "label": self.label,
            "kind": self.kind.name(),
            "list": self.in_list,
            "detail": self.in_detail,
            "editable": self.editable,
            "searchable": self.searchable,
            "filterable": self.filterable,
            "sortable": self.sortable,
            "expand": self.expand,
            "rules": self.rules.iter().map(Rule::describe).collect::<Vec<_>>(),
            "default": self.default,
        });
        if let (Some(rel), Some(obj)) = (self.relation_config(), meta.as_object_mut()) {
            obj.insert(
                "relation".to_string(),
                json!({
                    "table": rel.table,
                    "label": rel.label_column,
                    "columns": rel.expanded_columns(),
                    "fields": rel.fields.iter().map(FieldConfig::describe).collect::<Vec<_>>(),
                }),
            );
        }
        meta
    }
}
