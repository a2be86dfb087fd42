//! Multipart form reading for audio uploads.
//!
//! Parts that carry a filename are treated as files; everything else is a short text field.
//! The size cap is enforced while streaming, so an oversized upload is rejected before it
//! is fully buffered.

use crate::error::{AppError, AppResult};
use actix_multipart::{Field, Multipart};
use futures_util::stream::StreamExt;
use std::collections::HashMap;

/// Longest accepted text field.
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct Upload {
    pub field: String,
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    /// In the order they were sent.
    pub files: Vec<Upload>,
}

impl UploadForm {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn required_text(&self, name: &str) -> AppResult<&str> {
        self.text(name)
            .ok_or_else(|| AppError::ValidationError(format!("Missing field: {}", name)))
    }

    /// Parse an optional text field, e.g. a threshold.
    pub fn parsed<T: std::str::FromStr>(&self, name: &str) -> AppResult<Option<T>> {
        match self.text(name) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| AppError::BadRequest(format!("Invalid value for {}: {}", name, raw))),
            None => Ok(None),
        }
    }

    /// First file sent under `name`.
    pub fn file(&self, name: &str) -> AppResult<&Upload> {
        self.files
            .iter()
            .find(|upload| upload.field == name)
            .ok_or_else(|| AppError::ValidationError(format!("No {} file provided", name)))
    }

    /// Every file whose field name starts with `prefix` (`audio`, `audio[]`, `audio_2`, ...).
    pub fn files_with_prefix(&self, prefix: &str) -> Vec<Vec<u8>> {
        self.files
            .iter()
            .filter(|upload| upload.field.starts_with(prefix))
            .map(|upload| upload.data.clone())
            .collect()
    }
}

/// Read a whole multipart form, rejecting any file larger than `max_file_bytes`.
pub async fn read_form(mut payload: Multipart, max_file_bytes: usize) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let content_disposition = field.content_disposition().ok_or_else(|| {
            AppError::ValidationError("Missing content disposition".to_string())
        })?;
        let name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::ValidationError("Missing field name".to_string()))?
            .to_string();
        let filename = content_disposition.get_filename().map(|s| s.to_string());

        let limit = if filename.is_some() {
            max_file_bytes
        } else {
            MAX_TEXT_FIELD_BYTES
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
            if bytes.len() + chunk.len() > limit {
                return Err(AppError::ValidationError(format!(
                    "File too large: {} bytes (max: {} bytes)",
                    bytes.len() + chunk.len(),
                    limit
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if filename.is_some() {
            form.files.push(Upload {
                field: name,
                filename,
                data: bytes,
            });
        } else {
            let value = String::from_utf8(bytes)
                .map_err(|_| AppError::BadRequest(format!("Field {} is not valid UTF-8", name)))?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}
