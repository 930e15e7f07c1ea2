//! # Error Handling
//!
//! This module defines the errors the `/stt` endpoint can answer with and how
//! each one is turned into an HTTP response.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each variant is one way the request can fail
//! - **Data**: A variant carries only what the response needs (a limit, a message)
//! - **Exhaustive match**: Adding a variant without a status code is a compile error
//!
//! ### Traits for Error Conversion
//! - **From trait**: Lets a `RecognitionError` become an `SttError` with `?`
//! - **ResponseError trait**: actix-web calls it to build the HTTP response
//! - **Display trait**: The human-readable message used in logs
//!
//! ## Wire Format:
//! Clients depend on these exact bodies, so this is the only place that
//! knows them:
//! ```json
//! {"error": "No file uploaded"}
//! {"error": "Audio conversion failed"}
//! {"error": "Speech recognition failed", "details": "<message>"}
//! ```

use crate::transcription::RecognitionError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

/// Everything that can go wrong while serving `POST /stt`.
///
/// ## Error Categories:
/// - **NoFileUploaded**: the form has no `file` field, or is not a readable form (400)
/// - **ConversionFailed**: the transcoder could not produce canonical audio (400)
/// - **FileTooLarge**: the upload exceeded `server.max_upload_bytes` (413)
/// - **RecognitionFailed**: anything after conversion, with its message (500)
#[derive(Debug)]
pub enum SttError {
    NoFileUploaded,
    ConversionFailed,
    FileTooLarge { limit: usize },
    RecognitionFailed(String),
}

/// JSON body shared by every error response.
///
/// ## Rust Concepts:
/// - **&'static str**: the messages are fixed, so nothing is allocated for them
/// - **skip_serializing_if**: `details` only appears when there is something to say
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SttError {
    /// The client-facing message for this error.
    pub fn message(&self) -> &'static str {
        match self {
            SttError::NoFileUploaded => "No file uploaded",
            SttError::ConversionFailed => "Audio conversion failed",
            SttError::FileTooLarge { .. } => "File too large",
            SttError::RecognitionFailed(_) => "Speech recognition failed",
        }
    }

    pub fn body(&self) -> ErrorBody {
        let details = match self {
            SttError::RecognitionFailed(details) => Some(details.clone()),
            _ => None,
        };
        ErrorBody {
            error: self.message(),
            details,
        }
    }
}

impl fmt::Display for SttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SttError::FileTooLarge { limit } => {
                write!(f, "{} (limit {} bytes)", self.message(), limit)
            }
            SttError::RecognitionFailed(details) => write!(f, "{}: {}", self.message(), details),
            _ => write!(f, "{}", self.message()),
        }
    }
}

impl std::error::Error for SttError {}

/// HTTP mapping for `SttError`.
///
/// ## HTTP Status Code Mapping:
/// - NoFileUploaded / ConversionFailed → 400 (Bad Request)
/// - FileTooLarge → 413 (Payload Too Large)
/// - RecognitionFailed → 500 (Internal Server Error)
impl ResponseError for SttError {
    fn status_code(&self) -> StatusCode {
        match self {
            SttError::NoFileUploaded => StatusCode::BAD_REQUEST,
            SttError::ConversionFailed => StatusCode::BAD_REQUEST,
            SttError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SttError::RecognitionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.body())
    }
}

/// Any recognizer failure, format violations included, is a 500 with the
/// error's message as `details`.
impl From<RecognitionError> for SttError {
    fn from(err: RecognitionError) -> Self {
        SttError::RecognitionFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    async fn body_json(err: SttError) -> (StatusCode, serde_json::Value) {
        let response = err.error_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_web::test]
    async fn test_no_file_body_is_exact() {
        let (status, body) = body_json(SttError::NoFileUploaded).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({"error": "No file uploaded"}));
    }

    #[actix_web::test]
    async fn test_conversion_failed_body_is_exact() {
        let (status, body) = body_json(SttError::ConversionFailed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({"error": "Audio conversion failed"}));
    }

    #[actix_web::test]
    async fn test_recognition_failure_carries_details() {
        let err: SttError =
            RecognitionError::FormatViolation("2 channels".to_string()).into();
        let (status, body) = body_json(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Speech recognition failed");
        assert_eq!(
            body["details"],
            "Audio file must be WAV format mono PCM: 2 channels"
        );
    }

    #[actix_web::test]
    async fn test_file_too_large() {
        let (status, body) = body_json(SttError::FileTooLarge { limit: 10 }).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body, serde_json::json!({"error": "File too large"}));
    }

    #[test]
    fn test_display_for_logs() {
        assert_eq!(SttError::NoFileUploaded.to_string(), "No file uploaded");
        assert_eq!(
            SttError::RecognitionFailed("boom".to_string()).to_string(),
            "Speech recognition failed: boom"
        );
    }
}
