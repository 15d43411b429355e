//! Structured faults.
//!
//! Every error that reaches the dispatcher boundary is turned into an
//! [`ErrorResponse`] and serialized like any other response, wrapped as
//! `{"responseStatus": {...}}`.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const GENERIC_INTERNAL_MESSAGE: &str = "An internal error occurred";

/// A per-field validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub error_code: String,
    pub field_name: String,
    pub message: String,
}

impl FieldError {
    pub fn new(
        field_name: impl Into<String>,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_code: error_code.into(),
            field_name: field_name.into(),
            message: message.into(),
        }
    }
}

/// A structured error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// HTTP status code
    pub status: u16,
    /// Machine-readable code, the error's variant or type name
    pub error_code: String,
    pub message: String,
    /// Only populated in debug mode
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<FieldError>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub meta: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<String>,
}

impl ErrorResponse {
    pub fn new(status: u16, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error_code: error_code.into(),
            message: message.into(),
            stack_trace: None,
            errors: Vec::new(),
            meta: HashMap::new(),
            request_id: None,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Convert `error` into a fault. Outside debug mode no error detail
    /// beyond its message is exposed, and internal errors get a generic
    /// message.
    pub fn from_error(error: &Error, debug_mode: bool) -> Self {
        let message = match error {
            Error::Internal(_) if !debug_mode => GENERIC_INTERNAL_MESSAGE.to_string(),
            _ => error.message(),
        };

        let mut response = Self::new(error.status_code(), error.error_code(), message);
        if let Error::Validation(errors) = error {
            response.errors = errors.clone();
        }
        if debug_mode {
            response.stack_trace = Some(format!("{:#?}", error));
        }
        response
    }

    pub fn with_field_error(mut self, error: FieldError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// The body sent to clients.
    pub fn envelope(&self) -> FaultEnvelope<'_> {
        FaultEnvelope {
            response_status: self,
        }
    }
}

/// Wire wrapper for an [`ErrorResponse`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultEnvelope<'a> {
    pub response_status: &'a ErrorResponse,
}
