//! List request parameters, parsed from raw query pairs.
//!
//! Supported shapes:
//! - `filters[status]=open`, `filters[price][gte]=10`, or `filters={"price":{"gte":10}}`
//! - `scopes=published,in_stock` or repeated `scopes[]=published`
//! - `search=lamp`
//! - `sort=-price,name`
//! - `page=2&per_page=50`
//! - `with=category,tags`

use serde_json::Value;

use crate::error::AdminError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    Null,
}

impl FilterOp {
    pub fn parse(op: &str) -> Option<Self> {
        let op = match op.to_ascii_lowercase().as_str() {
            "eq" | "=" => Self::Eq,
            "ne" | "neq" | "!=" => Self::Ne,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "like" => Self::Like,
            "in" => Self::In,
            "null" => Self::Null,
            _ => return None,
        };
        Some(op)
    }

    /// SQL operator for plain comparisons.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "ILIKE",
            Self::In => "= ANY",
            Self::Null => "IS NULL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParam {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortParam {
    pub field: String,
    pub descending: bool,
}

/// Parse `-price,name` into sort keys.
pub fn parse_sort(raw: &str) -> Vec<SortParam> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            let (field, descending) = match s.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (s.strip_prefix('+').unwrap_or(s), false),
            };
            (!field.is_empty()).then(|| SortParam {
                field: field.to_string(),
                descending,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub default_per_page: u64,
    pub max_per_page: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            default_per_page: 25,
            max_per_page: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub filters: Vec<FilterParam>,
    pub scopes: Vec<String>,
    pub search: Option<String>,
    pub sort: Vec<SortParam>,
    pub page: u64,
    pub per_page: Option<u64>,
    pub with: Vec<String>,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            scopes: Vec::new(),
            search: None,
            sort: Vec::new(),
            page: 1,
            per_page: None,
            with: Vec::new(),
        }
    }
}

fn push_list(target: &mut Vec<String>, raw: &str) {
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !target.iter().any(|t| t == item) {
            target.push(item.to_string());
        }
    }
}

fn json_filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(json_filter_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Null => "true".to_string(),
        other => other.to_string(),
    }
}

fn parse_op(op: &str) -> Result<FilterOp, AdminError> {
    FilterOp::parse(op).ok_or_else(|| AdminError::BadRequest(format!("unknown filter operator: {op}")))
}

fn parse_json_filters(raw: &str, filters: &mut Vec<FilterParam>) -> Result<(), AdminError> {
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|e| AdminError::BadRequest(format!("filters must be a JSON object: {e}")))?;
    let Value::Object(map) = parsed else {
        return Err(AdminError::BadRequest("filters must be a JSON object".to_string()));
    };

    for (field, value) in map {
        match value {
            Value::Object(ops) => {
                for (op, value) in ops {
                    filters.push(FilterParam {
                        field: field.clone(),
                        op: parse_op(&op)?,
                        value: json_filter_value(&value),
                    });
                }
            }
            Value::Null => filters.push(FilterParam {
                field,
                op: FilterOp::Null,
                value: "true".to_string(),
            }),
            Value::Array(_) => filters.push(FilterParam {
                field,
                op: FilterOp::In,
                value: json_filter_value(&value),
            }),
            other => filters.push(FilterParam {
                field,
                op: FilterOp::Eq,
                value: json_filter_value(&other),
            }),
        }
    }
    Ok(())
}

/// `filters[price][gte]` → (`price`, `Some("gte")`).
fn parse_filter_key(key: &str) -> Option<(&str, Option<&str>)> {
    let rest = key.strip_prefix("filters[")?;
    let (field, rest) = rest.split_once(']')?;
    if field.is_empty() {
        return None;
    }
    if rest.is_empty() {
        return Some((field, None));
    }
    let op = rest.strip_prefix('[')?.strip_suffix(']')?;
    Some((field, Some(op)))
}

impl ListParams {
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, AdminError> {
        let mut params = Self::default();

        for (key, value) in pairs {
            match key.as_str() {
                "filters" => parse_json_filters(value, &mut params.filters)?,
                "scopes" | "scopes[]" => push_list(&mut params.scopes, value),
                "with" | "with[]" => push_list(&mut params.with, value),
                "search" => {
                    let term = value.trim();
                    if !term.is_empty() {
                        params.search = Some(term.to_string());
                    }
                }
                "sort" => params.sort.extend(parse_sort(value)),
                "page" => params.page = value.parse::<u64>().unwrap_or(1).max(1),
                "per_page" => params.per_page = value.parse::<u64>().ok().map(|n| n.max(1)),
                _ => {
                    if let Some((field, op)) = parse_filter_key(key) {
                        let op = match op {
                            Some(op) => parse_op(op)?,
                            None => FilterOp::Eq,
                        };
                        params.filters.push(FilterParam {
                            field: field.to_string(),
                            op,
                            value: value.clone(),
                        });
                    }
                }
            }
        }

        Ok(params)
    }

    pub fn per_page(&self, pagination: Pagination) -> u64 {
        self.per_page
            .unwrap_or(pagination.default_per_page)
            .clamp(1, pagination.max_per_page.max(1))
    }

    pub fn offset(&self, per_page: u64) -> u64 {
        (self.page.max(1) - 1).saturating_mul(per_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn bracket_filters_with_and_without_operator() {
        let params = ListParams::from_pairs(&pairs(&[
            ("filters[status]", "open"),
            ("filters[price][gte]", "10"),
            ("filters[tags][in]", "1,2"),
        ]))
        .unwrap();

        assert_eq!(
            params.filters,
            vec![
                FilterParam { field: "status".into(), op: FilterOp::Eq, value: "open".into() },
                FilterParam { field: "price".into(), op: FilterOp::Gte, value: "10".into() },
                FilterParam { field: "tags".into(), op: FilterOp::In, value: "1,2".into() },
            ]
        );
    }

    #[test]
    fn json_filters() {
        let params = ListParams::from_pairs(&pairs(&[(
            "filters",
            r#"{"price":{"lt":20},"tags":[3,4],"deleted_at":null,"published":true}"#,
        )]))
        .unwrap();

        assert!(params.filters.contains(&FilterParam {
            field: "price".into(),
            op: FilterOp::Lt,
            value: "20".into()
        }));
        assert!(params.filters.contains(&FilterParam {
            field: "tags".into(),
            op: FilterOp::In,
            value: "3,4".into()
        }));
        assert!(params.filters.contains(&FilterParam {
            field: "deleted_at".into(),
            op: FilterOp::Null,
            value: "true".into()
        }));
        assert!(params.filters.contains(&FilterParam {
            field: "published".into(),
            op: FilterOp::Eq,
            value: "true".into()
        }));
    }

    #[test]
    fn malformed_filters_are_rejected() {
        assert!(matches!(
            ListParams::from_pairs(&pairs(&[("filters", "not json")])),
            Err(AdminError::BadRequest(_))
        ));
        assert!(matches!(
            ListParams::from_pairs(&pairs(&[("filters[price][between]", "1")])),
            Err(AdminError::BadRequest(_))
        ));
    }

    #[test]
    fn scopes_sort_search_and_with() {
        let params = ListParams::from_pairs(&pairs(&[
            ("scopes", "published, in_stock"),
            ("scopes[]", "published"),
            ("search", "  desk lamp "),
            ("sort", "-price,name,,"),
            ("with", "category,tags"),
        ]))
        .unwrap();

        assert_eq!(params.scopes, vec!["published", "in_stock"]);
        assert_eq!(params.search.as_deref(), Some("desk lamp"));
        assert_eq!(
            params.sort,
            vec![
                SortParam { field: "price".into(), descending: true },
                SortParam { field: "name".into(), descending: false },
            ]
        );
        assert_eq!(params.with, vec!["category", "tags"]);
    }

    #[test]
    fn pagination_defaults_and_clamping() {
        let pagination = Pagination { default_per_page: 25, max_per_page: 100 };

        let params = ListParams::from_pairs(&pairs(&[("page", "0"), ("per_page", "500")])).unwrap();
        assert_eq!(params.page, 1);
        assert_eq!(params.per_page(pagination), 100);
        assert_eq!(params.offset(100), 0);

        let params = ListParams::from_pairs(&pairs(&[("page", "3"), ("per_page", "abc")])).unwrap();
        assert_eq!(params.per_page(pagination), 25);
        assert_eq!(params.offset(25), 50);
    }

    #[test]
    fn blank_search_and_unrelated_keys_are_ignored() {
        let params = ListParams::from_pairs(&pairs(&[("search", "   "), ("utm_source", "mail")])).unwrap();
        assert_eq!(params, ListParams::default());
    }
}
