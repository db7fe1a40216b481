//! Structured error body sent to clients.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::Message;

/// `{"msg": ..., "code": ...}` body used for HTTP rejections and for error
/// replies written into a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{msg} ({code})")]
pub struct ApiError {
    pub msg: String,
    pub code: u16,
}

impl ApiError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            code: status.as_u16(),
        }
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED, msg)
    }

    /// Reply for a frame type the hub does not dispatch.
    pub fn unsupported_frame() -> Self {
        Self::not_implemented("only text messages are supported")
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Serialized form, ready to be written as a text message.
    pub fn to_message(&self) -> Message {
        serde_json::to_vec(self).map_or_else(|_| Message::from(self.msg.clone()), Message::from)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}
