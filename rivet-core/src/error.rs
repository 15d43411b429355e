// Error types for the rivet service host

use crate::HttpStatus;
use crate::dto::short_type_name;
use crate::fault::FieldError;
use crate::restriction::RestrictionFailure;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration / startup faults. These surface from registration and
    // `init()` and are expected to abort the process.
    #[error("Ambiguous registration: {0}")]
    AmbiguousRegistration(String),

    #[error("Ambiguous property: {0}")]
    AmbiguousProperty(String),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Unknown route variable '{variable}' on {request_type}")]
    UnknownRouteVariable {
        request_type: String,
        variable: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Routing
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    // Access
    #[error("{0}")]
    AccessRestricted(RestrictionFailure),

    // Dispatch
    #[error("Not Implemented: {0}")]
    NotImplemented(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    // Payload
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // Application faults
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {}", join_field_errors(.0))]
    Validation(Vec<FieldError>),

    /// A fault that carries its own transport semantics.
    #[error("{message}")]
    Http {
        status: u16,
        code: String,
        message: String,
    },

    /// Any other error raised by application code.
    #[error("{message}")]
    Application { code: String, message: String },

    #[error("Internal server error: {0}")]
    Internal(String),
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field_name, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Wrap an arbitrary error raised by service code, using its type name as
    /// the error code.
    pub fn application<E>(err: E) -> Self
    where
        E: std::error::Error,
    {
        Error::Application {
            code: short_type_name(std::any::type_name::<E>()),
            message: err.to_string(),
        }
    }

    /// Build a fault with an explicit status code and error code.
    pub fn http(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Http {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RouteNotFound(_) => HttpStatus::NOT_FOUND.code(),
            Error::MethodNotAllowed(_) => HttpStatus::METHOD_NOT_ALLOWED.code(),
            Error::AccessRestricted(_) => HttpStatus::FORBIDDEN.code(),
            Error::NotImplemented(_) => HttpStatus::NOT_IMPLEMENTED.code(),
            Error::Deserialization(_) => HttpStatus::BAD_REQUEST.code(),

            Error::BadRequest(_) => HttpStatus::BAD_REQUEST.code(),
            Error::Unauthorized(_) => HttpStatus::UNAUTHORIZED.code(),
            Error::Forbidden(_) => HttpStatus::FORBIDDEN.code(),
            Error::NotFound(_) => HttpStatus::NOT_FOUND.code(),
            Error::Conflict(_) => HttpStatus::CONFLICT.code(),
            Error::Validation(_) => HttpStatus::BAD_REQUEST.code(),
            Error::Http { status, .. } => *status,

            // Default to 500 for startup, serialization and application errors
            _ => HttpStatus::INTERNAL_SERVER_ERROR.code(),
        }
    }

    pub fn http_status(&self) -> HttpStatus {
        HttpStatus::new(self.status_code())
    }

    /// Machine-readable error code: the variant name, or the captured code for
    /// application and HTTP faults.
    pub fn error_code(&self) -> String {
        let code = match self {
            Error::AmbiguousRegistration(_) => "AmbiguousRegistration",
            Error::AmbiguousProperty(_) => "AmbiguousProperty",
            Error::InvalidRoute(_) => "InvalidRoute",
            Error::UnknownRouteVariable { .. } => "UnknownRouteVariable",
            Error::Configuration(_) => "Configuration",
            Error::RouteNotFound(_) => "RouteNotFound",
            Error::MethodNotAllowed(_) => "MethodNotAllowed",
            Error::AccessRestricted(_) => "AccessRestricted",
            Error::NotImplemented(_) => "NotImplemented",
            Error::ProviderNotFound(_) => "ProviderNotFound",
            Error::Serialization(_) => "Serialization",
            Error::Deserialization(_) => "Deserialization",
            Error::BadRequest(_) => "BadRequest",
            Error::Unauthorized(_) => "Unauthorized",
            Error::Forbidden(_) => "Forbidden",
            Error::NotFound(_) => "NotFound",
            Error::Conflict(_) => "Conflict",
            Error::Validation(_) => "Validation",
            Error::Http { code, .. } | Error::Application { code, .. } => return code.clone(),
            Error::Internal(_) => "Internal",
        };
        code.to_string()
    }

    /// Message without the variant prefix added by `Display`.
    pub fn message(&self) -> String {
        match self {
            Error::AmbiguousRegistration(m)
            | Error::AmbiguousProperty(m)
            | Error::InvalidRoute(m)
            | Error::Configuration(m)
            | Error::RouteNotFound(m)
            | Error::MethodNotAllowed(m)
            | Error::NotImplemented(m)
            | Error::ProviderNotFound(m)
            | Error::Serialization(m)
            | Error::Deserialization(m)
            | Error::BadRequest(m)
            | Error::Unauthorized(m)
            | Error::Forbidden(m)
            | Error::NotFound(m)
            | Error::Conflict(m)
            | Error::Internal(m) => m.clone(),
            _ => self.to_string(),
        }
    }

    /// Errors that can only be raised while the host is being built.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::AmbiguousRegistration(_)
                | Error::AmbiguousProperty(_)
                | Error::InvalidRoute(_)
                | Error::UnknownRouteVariable { .. }
                | Error::Configuration(_)
        )
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status_code())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct OutOfStock;

    impl std::fmt::Display for OutOfStock {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "nothing left")
        }
    }

    impl std::error::Error for OutOfStock {}

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::RouteNotFound("/x".into()).status_code(), 404);
        assert_eq!(Error::MethodNotAllowed("DELETE".into()).status_code(), 405);
        assert_eq!(Error::NotImplemented("Foo".into()).status_code(), 501);
        assert_eq!(Error::Internal("boom".into()).status_code(), 500);
        assert_eq!(Error::http(418, "Teapot", "short and stout").status_code(), 418);
        assert_eq!(Error::http(418, "Teapot", "").http_status(), HttpStatus::new(418));
        assert_eq!(Error::Forbidden("no".into()).http_status(), HttpStatus::FORBIDDEN);
    }

    #[test]
    fn test_error_code_is_variant_name() {
        assert_eq!(Error::NotFound("missing".into()).error_code(), "NotFound");
        assert_eq!(Error::Validation(vec![]).error_code(), "Validation");
        assert_eq!(Error::http(409, "Stale", "x").error_code(), "Stale");
    }

    #[test]
    fn test_application_captures_type_name() {
        let err = Error::application(OutOfStock);
        assert_eq!(err.error_code(), "OutOfStock");
        assert_eq!(err.message(), "nothing left");
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_startup_classification() {
        assert!(Error::AmbiguousRegistration("Hello".into()).is_startup());
        assert!(
            Error::UnknownRouteVariable {
                request_type: "Hello".into(),
                variable: "Nope".into()
            }
            .is_startup()
        );
        assert!(!Error::NotFound("x".into()).is_startup());
        assert!(Error::Conflict("x".into()).is_client_error());
    }
}
