//! Inbound body decoding, independent of any contract.

mod multipart;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Invalid Content-Type: {0}")]
    UnsupportedContentType(String),
    #[error("invalid json body: {0}")]
    InvalidJson(String),
    #[error("json body must be an object, got {0}")]
    NotAnObject(&'static str),
    #[error("invalid multipart body: {0}")]
    InvalidMultipart(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Json,
    Multipart,
    UrlEncoded,
}

impl PayloadKind {
    /// Matches the media type, ignoring parameters such as `charset`.
    pub fn from_content_type(content_type: &str) -> Result<Self, CodecError> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" => Ok(PayloadKind::Json),
            "multipart/form-data" => Ok(PayloadKind::Multipart),
            "application/x-www-form-urlencoded" => Ok(PayloadKind::UrlEncoded),
            _ => Err(CodecError::UnsupportedContentType(content_type.to_string())),
        }
    }
}

/// Decodes a request body into a flat key/value map.
///
/// JSON keeps native types; form bodies yield strings, last value wins for
/// repeated keys.
pub fn decode(content_type: &str, body: &[u8]) -> Result<Map<String, Value>, CodecError> {
    match PayloadKind::from_content_type(content_type)? {
        PayloadKind::Json => {
            let value = serde_json::from_slice::<Value>(body)
                .map_err(|err| CodecError::InvalidJson(err.to_string()))?;
            match value {
                Value::Object(map) => Ok(map),
                other => Err(CodecError::NotAnObject(crate::schema::json_type_name(&other))),
            }
        }
        PayloadKind::Multipart | PayloadKind::UrlEncoded => Ok(decode_form_pairs(
            content_type,
            body,
        )?
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()),
    }
}

/// Decodes a form body keeping every value of repeated keys, in body order.
pub fn decode_form_pairs(
    content_type: &str,
    body: &[u8],
) -> Result<Vec<(String, String)>, CodecError> {
    match PayloadKind::from_content_type(content_type)? {
        PayloadKind::UrlEncoded => Ok(url::form_urlencoded::parse(body)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()),
        PayloadKind::Multipart => Ok(multipart::parse(content_type, body)?
            .into_iter()
            .map(|part| {
                (
                    part.name,
                    String::from_utf8_lossy(part.data).into_owned(),
                )
            })
            .collect()),
        PayloadKind::Json => Err(CodecError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}
