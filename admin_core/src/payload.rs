//! Incoming create/update data: JSON bodies, urlencoded forms, or multipart with uploads.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Form;
use serde_json::Value;

use crate::error::AdminError;
use crate::sql::Record;

/// Multipart parts with this prefix are uploads for the named field.
pub const FILE_PREFIX: &str = "files.";

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lowercased extension of the client file name, if it looks sane.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name.as_deref()?;
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        (!ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .then_some(ext)
    }
}

#[derive(Debug, Clone)]
pub enum FormPart {
    Text { name: String, value: String },
    File { name: String, file: UploadedFile },
}

#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub fields: Record,
    pub files: BTreeMap<String, UploadedFile>,
}

impl Payload {
    pub fn from_json(value: Value) -> Result<Self, AdminError> {
        match value {
            Value::Object(fields) => Ok(Self {
                fields,
                files: BTreeMap::new(),
            }),
            Value::Null => Ok(Self::default()),
            _ => Err(AdminError::BadRequest(
                "request body must be a JSON object".to_string(),
            )),
        }
    }

    /// Fold form parts: `files.x` become uploads, `x[]` accumulate into arrays.
    pub fn from_parts(parts: Vec<FormPart>) -> Self {
        let mut payload = Self::default();
        for part in parts {
            match part {
                FormPart::File { name, file } => {
                    let field = name.strip_prefix(FILE_PREFIX).unwrap_or(&name);
                    if file.bytes.is_empty() && file.file_name.as_deref().unwrap_or_default().is_empty() {
                        continue;
                    }
                    payload.files.insert(field.to_string(), file);
                }
                FormPart::Text { name, value } => {
                    if let Some(field) = name.strip_suffix("[]") {
                        let entry = payload
                            .fields
                            .entry(field.to_string())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        match entry {
                            Value::Array(items) => items.push(Value::String(value)),
                            other => *other = Value::Array(vec![Value::String(value)]),
                        }
                    } else {
                        payload.fields.insert(name, Value::String(value));
                    }
                }
            }
        }
        payload
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field) || self.files.contains_key(field)
    }
}

fn bad_request(e: impl std::fmt::Display) -> AdminError {
    AdminError::BadRequest(e.to_string())
}

impl<S> FromRequest<S> for Payload
where
    S: Send + Sync,
{
    type Rejection = AdminError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            let mut parts = Vec::new();
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| bad_request(e.body_text()))?
            {
                let name = field.name().unwrap_or_default().to_string();
                if name.is_empty() {
                    continue;
                }
                if name.starts_with(FILE_PREFIX) {
                    let file_name = field.file_name().map(str::to_string);
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
                    parts.push(FormPart::File {
                        name,
                        file: UploadedFile {
                            file_name,
                            content_type,
                            bytes,
                        },
                    });
                } else {
                    let value = field.text().await.map_err(|e| bad_request(e.body_text()))?;
                    parts.push(FormPart::Text { name, value });
                }
            }
            return Ok(Self::from_parts(parts));
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            let parts = pairs
                .into_iter()
                .map(|(name, value)| FormPart::Text { name, value })
                .collect();
            return Ok(Self::from_parts(parts));
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| bad_request(e.body_text()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| AdminError::BadRequest(format!("invalid JSON body: {e}")))?;
        Self::from_json(value)
    }
}
