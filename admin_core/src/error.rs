//! Admin error type and its HTTP rendering.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Field-keyed validation messages, rendered as the `errors` object of a 422.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `Ok(())` when empty, otherwise the errors wrapped in [`AdminError::Validation`].
    pub fn into_result(self) -> Result<(), AdminError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AdminError::Validation(self))
        }
    }
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("{model} record {id} not found")]
    NotFound { model: String, id: i64 },

    #[error("unknown action {action} on {model}")]
    UnknownAction { model: String, action: String },

    #[error("unknown relation {field} on {model}")]
    UnknownRelation { model: String, field: String },

    #[error("Unauthenticated.")]
    Unauthenticated,

    #[error("This action is unauthorized.")]
    Forbidden,

    #[error("The given data was invalid.")]
    Validation(ValidationErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("database pool unavailable: {0}")]
    Pool(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("file storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid handler configuration: {0}")]
    Config(String),
}

impl AdminError {
    pub fn not_found(model: &str, id: i64) -> Self {
        Self::NotFound {
            model: model.to_string(),
            id,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownModel(_)
            | Self::NotFound { .. }
            | Self::UnknownAction { .. }
            | Self::UnknownRelation { .. } => StatusCode::NOT_FOUND,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Storage(_) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a ValidationErrors>,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Admin request failed");
            "Server Error".to_string()
        } else {
            self.to_string()
        };

        let errors = match &self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        };

        (status, Json(ErrorBody { message, errors })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_collect_per_field() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "The name field is required.");
        errors.add("name", "The name must be at least 3 characters.");
        errors.add("price", "The price must be a number.");

        assert_eq!(errors.get("name").map(<[String]>::len), Some(2));
        assert!(errors.has("price"));
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["name", "price"]);
        assert!(matches!(errors.into_result(), Err(AdminError::Validation(_))));
    }

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(AdminError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(AdminError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AdminError::not_found("products", 4).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AdminError::Validation(ValidationErrors::new()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AdminError::Database(diesel::result::Error::NotFound).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
