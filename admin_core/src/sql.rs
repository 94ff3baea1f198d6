//! Dynamic SQL assembly over diesel's boxed `sql_query`.
//!
//! Handlers describe tables at runtime, so statements are assembled as text
//! with numbered placeholders and a parallel list of typed binds. Rows come
//! back as `jsonb` via `to_jsonb(t)` and are handled as JSON maps.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use diesel::pg::Pg;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{Array, BigInt, Bool, Date, Double, Jsonb, Text, Timestamptz};
use diesel::QueryableByName;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::AdminError;

/// A stored row as produced by `to_jsonb`.
pub type Record = Map<String, Value>;

static IDENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Whether `name` can be used as a table or column identifier.
pub fn is_valid_ident(name: &str) -> bool {
    name.len() <= 63 && IDENT_REGEX.is_match(name)
}

/// Quote an identifier for Postgres.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape `%`, `_` and `\` so user input matches literally inside `ILIKE`.
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A typed bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    /// Decimal text, bound as text and cast to `numeric` in SQL.
    Numeric(String),
    BigInt(i64),
    Double(f64),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Json(Value),
    BigIntArray(Vec<i64>),
    TextArray(Vec<String>),
}

impl BindValue {
    /// JSON rendering, used for change detection and hooks.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(v) => Value::String(v.clone()),
            Self::Numeric(v) => v
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(v.clone())),
            Self::BigInt(v) => Value::from(*v),
            Self::Double(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Bool(v) => Value::Bool(*v),
            Self::Date(v) => Value::String(v.to_string()),
            Self::Timestamp(v) => Value::String(v.to_rfc3339()),
            Self::Json(v) => v.clone(),
            Self::BigIntArray(v) => Value::from(v.clone()),
            Self::TextArray(v) => Value::from(v.clone()),
        }
    }
}

/// A column value to write: `None` renders as SQL `NULL`.
pub type SqlValue = Option<BindValue>;

/// A finished statement: SQL text plus binds in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

impl Statement {
    /// Bind every parameter onto a boxed diesel query.
    pub fn into_query(self) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
        let mut query = diesel::sql_query(self.sql).into_boxed::<Pg>();
        for bind in self.binds {
            query = match bind {
                BindValue::Text(v) | BindValue::Numeric(v) => query.bind::<Text, _>(v),
                BindValue::BigInt(v) => query.bind::<BigInt, _>(v),
                BindValue::Double(v) => query.bind::<Double, _>(v),
                BindValue::Bool(v) => query.bind::<Bool, _>(v),
                BindValue::Date(v) => query.bind::<Date, _>(v),
                BindValue::Timestamp(v) => query.bind::<Timestamptz, _>(v),
                BindValue::Json(v) => query.bind::<Jsonb, _>(v),
                BindValue::BigIntArray(v) => query.bind::<Array<BigInt>, _>(v),
                BindValue::TextArray(v) => query.bind::<Array<Text>, _>(v),
            };
        }
        query
    }
}

/// Incremental statement builder that numbers placeholders as binds are pushed.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    sql: String,
    binds: Vec<BindValue>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    pub fn push_ident(&mut self, name: &str) -> &mut Self {
        self.sql.push_str(&quote_ident(name));
        self
    }

    /// Push `alias."column"`.
    pub fn push_column(&mut self, alias: &str, column: &str) -> &mut Self {
        self.sql.push_str(alias);
        self.sql.push('.');
        self.push_ident(column)
    }

    /// Append a placeholder for `value` and return its 1-based index.
    pub fn push_bind(&mut self, value: BindValue) -> usize {
        let cast = matches!(value, BindValue::Numeric(_));
        self.binds.push(value);
        let index = self.binds.len();
        if cast {
            self.sql.push_str(&format!("CAST(${index} AS numeric)"));
        } else {
            self.sql.push_str(&format!("${index}"));
        }
        index
    }

    /// Reference an already bound placeholder again.
    pub fn push_placeholder(&mut self, index: usize) -> &mut Self {
        self.sql.push_str(&format!("${index}"));
        self
    }

    /// Write `NULL` for `None`, a placeholder otherwise.
    pub fn push_value(&mut self, value: SqlValue) -> &mut Self {
        match value {
            Some(bind) => {
                self.push_bind(bind);
            }
            None => {
                self.push("NULL");
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub fn build(self) -> Statement {
        Statement {
            sql: self.sql,
            binds: self.binds,
        }
    }
}

#[derive(Debug, QueryableByName)]
pub struct RecordRow {
    #[diesel(sql_type = Jsonb)]
    pub record: Value,
}

#[derive(Debug, QueryableByName)]
pub struct OwnedRecordRow {
    #[diesel(sql_type = BigInt)]
    pub owner_id: i64,
    #[diesel(sql_type = Jsonb)]
    pub record: Value,
}

#[derive(Debug, QueryableByName)]
pub struct CountRow {
    #[diesel(sql_type = BigInt)]
    pub total: i64,
}

#[derive(Debug, QueryableByName)]
pub struct IdRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
}

fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

pub async fn load_records(
    conn: &mut AsyncPgConnection,
    statement: Statement,
) -> Result<Vec<Record>, AdminError> {
    tracing::trace!(sql = %statement.sql, binds = statement.binds.len(), "load records");
    let rows: Vec<RecordRow> = statement.into_query().load(conn).await?;
    Ok(rows.into_iter().map(|r| into_record(r.record)).collect())
}

pub async fn load_owned_records(
    conn: &mut AsyncPgConnection,
    statement: Statement,
) -> Result<Vec<(i64, Record)>, AdminError> {
    tracing::trace!(sql = %statement.sql, "load owned records");
    let rows: Vec<OwnedRecordRow> = statement.into_query().load(conn).await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.owner_id, into_record(r.record)))
        .collect())
}

pub async fn fetch_count(
    conn: &mut AsyncPgConnection,
    statement: Statement,
) -> Result<i64, AdminError> {
    tracing::trace!(sql = %statement.sql, "count");
    let row: CountRow = statement.into_query().get_result(conn).await?;
    Ok(row.total)
}

pub async fn fetch_ids(
    conn: &mut AsyncPgConnection,
    statement: Statement,
) -> Result<Vec<i64>, AdminError> {
    tracing::trace!(sql = %statement.sql, "fetch ids");
    let rows: Vec<IdRow> = statement.into_query().load(conn).await?;
    Ok(rows.into_iter().map(|r| r.id).collect())
}

pub async fn execute(
    conn: &mut AsyncPgConnection,
    statement: Statement,
) -> Result<usize, AdminError> {
    tracing::trace!(sql = %statement.sql, "execute");
    Ok(statement.into_query().execute(conn).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered_in_push_order() {
        let mut sql = SqlBuilder::new();
        sql.push("SELECT 1 FROM ").push_ident("products").push(" AS t WHERE ");
        sql.push_column("t", "name").push(" = ");
        let name = sql.push_bind(BindValue::Text("lamp".into()));
        sql.push(" AND ").push_column("t", "price").push(" > ");
        sql.push_bind(BindValue::Numeric("9.50".into()));
        sql.push(" OR ").push_column("t", "sku").push(" = ");
        sql.push_placeholder(name);

        let statement = sql.build();
        assert_eq!(
            statement.sql,
            "SELECT 1 FROM \"products\" AS t WHERE t.\"name\" = $1 AND t.\"price\" > CAST($2 AS numeric) OR t.\"sku\" = $1"
        );
        assert_eq!(statement.binds.len(), 2);
    }

    #[test]
    fn null_values_are_inlined() {
        let mut sql = SqlBuilder::new();
        sql.push("VALUES (");
        sql.push_value(None).push(", ").push_value(Some(BindValue::Bool(true)));
        sql.push(")");
        let statement = sql.build();
        assert_eq!(statement.sql, "VALUES (NULL, $1)");
        assert_eq!(statement.binds, vec![BindValue::Bool(true)]);
    }

    #[test]
    fn identifiers_are_validated_and_quoted() {
        assert!(is_valid_ident("catalog_products"));
        assert!(is_valid_ident("_private"));
        assert!(!is_valid_ident("1st"));
        assert!(!is_valid_ident("name; DROP TABLE x"));
        assert!(!is_valid_ident(""));
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn bind_values_render_as_json() {
        assert_eq!(BindValue::Numeric("12.5".into()).to_json(), serde_json::json!(12.5));
        assert_eq!(BindValue::BigInt(3).to_json(), serde_json::json!(3));
        assert_eq!(
            BindValue::BigIntArray(vec![1, 2]).to_json(),
            serde_json::json!([1, 2])
        );
    }
}
