// Input validation middleware and helpers.
//
// - `ValidatedJson<T>` extractor: content-type check + serde + size enforcement.
// - WebSocket frame size limit constant.
// - Feedback message body and attachment limits.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;

use civica_common::types::Attachment;

use crate::error::{ErrorCode, RelayError};

/// Maximum WebSocket frame payload in bytes (64 KiB).
pub const MAX_WS_FRAME_BYTES: usize = 64 * 1024;

/// Maximum REST request body in bytes (1 MiB). The server's
/// `DefaultBodyLimit` layer enforces this before handlers run.
pub const MAX_REST_BODY_BYTES: usize = 1024 * 1024;

/// Maximum feedback message body length in characters.
pub const MAX_FEEDBACK_BODY_CHARS: usize = 4000;

/// Maximum attachments per feedback message.
pub const MAX_ATTACHMENTS_PER_MESSAGE: usize = 3;

// ── ValidatedJson extractor ────────────────────────────────────────

/// A JSON body extractor that returns structured `RelayError` on failure.
///
/// Use this instead of `axum::Json<T>` in handlers to get consistent
/// VALIDATION_FAILED error responses instead of plain-text Axum rejections.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => {
                let (message, details) = classify_json_rejection(&rejection);
                Err(RelayError::new(ErrorCode::ValidationFailed, message)
                    .with_details(details)
                    .into_response())
            }
        }
    }
}

/// Classify a JSON rejection into a human-readable message and details object.
fn classify_json_rejection(rejection: &JsonRejection) -> (String, serde_json::Value) {
    match rejection {
        JsonRejection::JsonDataError(e) => (
            format!("invalid JSON payload: {e}"),
            serde_json::json!({ "kind": "data_error" }),
        ),
        JsonRejection::JsonSyntaxError(e) => (
            format!("malformed JSON: {e}"),
            serde_json::json!({ "kind": "syntax_error" }),
        ),
        JsonRejection::MissingJsonContentType(_) => (
            "expected Content-Type: application/json".to_string(),
            serde_json::json!({ "kind": "missing_content_type" }),
        ),
        JsonRejection::BytesRejection(e) => (
            format!("request body error: {e}"),
            serde_json::json!({ "kind": "body_error" }),
        ),
        other => (
            format!("request body error: {other}"),
            serde_json::json!({ "kind": "unknown" }),
        ),
    }
}

// ── WebSocket frame validation ─────────────────────────────────────

/// Check if a WebSocket text frame exceeds the size limit.
/// Returns an error message suitable for sending back as a WS close reason.
pub fn check_ws_frame_size(payload: &[u8]) -> Result<(), String> {
    if payload.len() > MAX_WS_FRAME_BYTES {
        Err(format!(
            "frame size {} bytes exceeds limit of {} bytes",
            payload.len(),
            MAX_WS_FRAME_BYTES
        ))
    } else {
        Ok(())
    }
}

// ── Feedback payload validation ────────────────────────────────────

/// Validate a feedback message body: non-empty after trimming, within the
/// character limit. Returns the trimmed body on success.
pub fn validate_feedback_body(body: &str) -> Result<String, RelayError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(RelayError::new(
            ErrorCode::ValidationFailed,
            "feedback body must not be empty",
        )
        .with_details(serde_json::json!({ "field": "body" })));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_FEEDBACK_BODY_CHARS {
        return Err(RelayError::new(
            ErrorCode::ValidationFailed,
            format!("feedback body length {chars} exceeds limit of {MAX_FEEDBACK_BODY_CHARS} characters"),
        )
        .with_details(serde_json::json!({ "field": "body", "limit": MAX_FEEDBACK_BODY_CHARS })));
    }
    Ok(trimmed.to_string())
}

/// Validate the attachment list: at most [`MAX_ATTACHMENTS_PER_MESSAGE`]
/// entries, each with a non-empty URL.
pub fn validate_attachments(attachments: &[Attachment]) -> Result<(), RelayError> {
    if attachments.len() > MAX_ATTACHMENTS_PER_MESSAGE {
        return Err(RelayError::new(
            ErrorCode::ValidationFailed,
            format!(
                "at most {MAX_ATTACHMENTS_PER_MESSAGE} attachments allowed per message, got {}",
                attachments.len()
            ),
        )
        .with_details(
            serde_json::json!({ "field": "attachments", "limit": MAX_ATTACHMENTS_PER_MESSAGE }),
        ));
    }
    for attachment in attachments {
        if attachment.url.trim().is_empty() {
            return Err(RelayError::new(
                ErrorCode::ValidationFailed,
                "attachment url must not be empty",
            )
            .with_details(serde_json::json!({ "field": "attachments" })));
        }
    }
    Ok(())
}
