//! Declarative validation rules and their messages.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::payload::UploadedFile;

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

#[derive(Debug, Clone)]
pub enum Rule {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Min(f64),
    Max(f64),
    Email,
    OneOf(Vec<String>),
    Pattern(Regex),
    /// Checked against the table before writing.
    Unique,
    MaxFileSize(u64),
    MimeTypes(Vec<String>),
}

impl Rule {
    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn mime_types<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::MimeTypes(values.into_iter().map(Into::into).collect())
    }

    /// Compact form used in handler metadata, e.g. `max_length:255`.
    pub fn describe(&self) -> String {
        match self {
            Self::Required => "required".to_string(),
            Self::MinLength(n) => format!("min_length:{n}"),
            Self::MaxLength(n) => format!("max_length:{n}"),
            Self::Min(n) => format!("min:{n}"),
            Self::Max(n) => format!("max:{n}"),
            Self::Email => "email".to_string(),
            Self::OneOf(values) => format!("in:{}", values.join(",")),
            Self::Pattern(re) => format!("regex:{}", re.as_str()),
            Self::Unique => "unique".to_string(),
            Self::MaxFileSize(bytes) => format!("max_file_size:{bytes}"),
            Self::MimeTypes(types) => format!("mimes:{}", types.join(",")),
        }
    }
}

pub fn is_required(rules: &[Rule]) -> bool {
    rules.iter().any(|r| matches!(r, Rule::Required))
}

pub fn required_message(label: &str) -> String {
    format!("The {label} field is required.")
}

/// Validate an already coerced value.
pub fn validate_value(rules: &[Rule], label: &str, value: &Value) -> Vec<String> {
    let empty = match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if empty {
        return if is_required(rules) {
            vec![required_message(label)]
        } else {
            Vec::new()
        };
    }

    rules
        .iter()
        .filter_map(|rule| check(rule, label, value))
        .collect()
}

fn check(rule: &Rule, label: &str, value: &Value) -> Option<String> {
    match rule {
        Rule::MinLength(n) => match value {
            Value::String(s) if s.chars().count() < *n => {
                Some(format!("The {label} must be at least {n} characters."))
            }
            Value::Array(items) if items.len() < *n => {
                Some(format!("The {label} must have at least {n} items."))
            }
            _ => None,
        },
        Rule::MaxLength(n) => match value {
            Value::String(s) if s.chars().count() > *n => Some(format!(
                "The {label} may not be greater than {n} characters."
            )),
            Value::Array(items) if items.len() > *n => {
                Some(format!("The {label} may not have more than {n} items."))
            }
            _ => None,
        },
        Rule::Min(min) => number_of(value)
            .filter(|v| v < min)
            .map(|_| format!("The {label} must be at least {min}.")),
        Rule::Max(max) => number_of(value)
            .filter(|v| v > max)
            .map(|_| format!("The {label} may not be greater than {max}.")),
        Rule::Email => match value {
            Value::String(s) if !EMAIL_REGEX.is_match(s) => {
                Some(format!("The {label} must be a valid email address."))
            }
            _ => None,
        },
        Rule::OneOf(allowed) => {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if allowed.iter().any(|a| *a == text) {
                None
            } else {
                Some(format!("The selected {label} is invalid."))
            }
        }
        Rule::Pattern(re) => match value {
            Value::String(s) if !re.is_match(s) => Some(format!("The {label} format is invalid.")),
            _ => None,
        },
        Rule::Required | Rule::Unique | Rule::MaxFileSize(_) | Rule::MimeTypes(_) => None,
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Validate an upload against the file rules.
pub fn validate_file(rules: &[Rule], label: &str, file: &UploadedFile) -> Vec<String> {
    let mut messages = Vec::new();
    for rule in rules {
        match rule {
            Rule::MaxFileSize(max) if file.size() > *max => {
                messages.push(format!(
                    "The {label} may not be greater than {} kilobytes.",
                    max / 1024
                ));
            }
            Rule::MimeTypes(types) => {
                let ext = file.extension().unwrap_or_default();
                let content_type = file.content_type.as_deref().unwrap_or_default();
                let accepted = types
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&ext) || t.eq_ignore_ascii_case(content_type));
                if !accepted {
                    messages.push(format!(
                        "The {label} must be a file of type: {}.",
                        types.join(", ")
                    ));
                }
            }
            _ => {}
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use serde_json::json;

    #[test]
    fn required_rejects_null_and_empty_lists() {
        let rules = [Rule::Required];
        assert_eq!(
            validate_value(&rules, "name", &Value::Null),
            vec!["The name field is required."]
        );
        assert_eq!(validate_value(&rules, "tags", &json!([])).len(), 1);
        assert!(validate_value(&rules, "name", &json!("x")).is_empty());
    }

    #[test]
    fn optional_null_skips_other_rules() {
        let rules = [Rule::MinLength(3), Rule::Email];
        assert!(validate_value(&rules, "email", &Value::Null).is_empty());
    }

    #[test]
    fn length_and_range_messages() {
        let rules = [Rule::MinLength(3), Rule::MaxLength(5)];
        assert_eq!(
            validate_value(&rules, "code", &json!("ab")),
            vec!["The code must be at least 3 characters."]
        );
        assert_eq!(
            validate_value(&rules, "code", &json!("abcdef")),
            vec!["The code may not be greater than 5 characters."]
        );

        let rules = [Rule::Min(0.0), Rule::Max(100.0)];
        assert_eq!(
            validate_value(&rules, "stock", &json!(-1)),
            vec!["The stock must be at least 0."]
        );
        assert_eq!(
            validate_value(&rules, "stock", &json!("250")),
            vec!["The stock may not be greater than 100."]
        );
    }

    #[test]
    fn email_one_of_and_pattern() {
        assert_eq!(
            validate_value(&[Rule::Email], "email", &json!("nope")),
            vec!["The email must be a valid email address."]
        );
        assert!(validate_value(&[Rule::Email], "email", &json!("a@b.io")).is_empty());

        let status = [Rule::one_of(["draft", "live"])];
        assert!(validate_value(&status, "status", &json!("live")).is_empty());
        assert_eq!(
            validate_value(&status, "status", &json!("gone")),
            vec!["The selected status is invalid."]
        );

        let slug = [Rule::Pattern(Regex::new("^[a-z-]+$").unwrap())];
        assert_eq!(
            validate_value(&slug, "slug", &json!("Bad Slug")),
            vec!["The slug format is invalid."]
        );
    }

    #[test]
    fn file_rules() {
        let file = UploadedFile {
            file_name: Some("photo.PNG".into()),
            content_type: Some("image/png".into()),
            bytes: Bytes::from(vec![0u8; 4096]),
        };
        assert!(validate_file(&[Rule::mime_types(["png", "jpg"])], "image", &file).is_empty());
        assert_eq!(
            validate_file(&[Rule::MaxFileSize(2048)], "image", &file),
            vec!["The image may not be greater than 2 kilobytes."]
        );
        assert_eq!(
            validate_file(&[Rule::mime_types(["pdf"])], "image", &file),
            vec!["The image must be a file of type: pdf."]
        );
    }

    #[test]
    fn rules_describe_themselves() {
        assert_eq!(Rule::MaxLength(255).describe(), "max_length:255");
        assert_eq!(Rule::one_of(["a", "b"]).describe(), "in:a,b");
    }
}
