// Status codes handed back to transports

use serde::{Deserialize, Serialize};

/// An HTTP status code.
///
/// The host names the codes its pipeline produces, but a fault raised
/// through [`Error::Http`](crate::Error::Http) may carry any code and it
/// survives unchanged.
///
/// ```
/// use rivet_core::HttpStatus;
///
/// assert_eq!(HttpStatus::NOT_FOUND.to_string(), "404 Not Found");
/// assert_eq!(HttpStatus::new(418).reason(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HttpStatus(u16);

macro_rules! statuses {
    ($($name:ident = $code:literal, $reason:literal;)*) => {
        impl HttpStatus {
            $(pub const $name: HttpStatus = HttpStatus($code);)*

            /// The reason phrase, for the codes the host produces itself.
            pub fn reason(self) -> Option<&'static str> {
                match self.0 {
                    $($code => Some($reason),)*
                    _ => None,
                }
            }
        }
    };
}

statuses! {
    OK = 200, "OK";
    NO_CONTENT = 204, "No Content";
    BAD_REQUEST = 400, "Bad Request";
    UNAUTHORIZED = 401, "Unauthorized";
    FORBIDDEN = 403, "Forbidden";
    NOT_FOUND = 404, "Not Found";
    METHOD_NOT_ALLOWED = 405, "Method Not Allowed";
    NOT_ACCEPTABLE = 406, "Not Acceptable";
    CONFLICT = 409, "Conflict";
    UNSUPPORTED_MEDIA_TYPE = 415, "Unsupported Media Type";
    INTERNAL_SERVER_ERROR = 500, "Internal Server Error";
    NOT_IMPLEMENTED = 501, "Not Implemented";
}

impl HttpStatus {
    pub const fn new(code: u16) -> Self {
        HttpStatus(code)
    }

    pub const fn code(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn is_client_error(self) -> bool {
        (400..500).contains(&self.0)
    }

    pub fn is_server_error(self) -> bool {
        (500..600).contains(&self.0)
    }
}

impl std::fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} {}", self.0, reason),
            None => write!(f, "{}", self.0),
        }
    }
}

impl From<u16> for HttpStatus {
    fn from(code: u16) -> Self {
        HttpStatus(code)
    }
}

impl From<HttpStatus> for u16 {
    fn from(status: HttpStatus) -> u16 {
        status.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_codes() {
        assert_eq!(HttpStatus::METHOD_NOT_ALLOWED.code(), 405);
        assert_eq!(HttpStatus::FORBIDDEN.reason(), Some("Forbidden"));
        assert_eq!(HttpStatus::from(501), HttpStatus::NOT_IMPLEMENTED);
    }

    #[test]
    fn test_custom_code_is_kept() {
        let status = HttpStatus::new(418);
        assert_eq!(status.code(), 418);
        assert_eq!(status.to_string(), "418");
        assert!(status.is_client_error());
        assert_eq!(serde_json::to_value(status).unwrap(), 418);
    }

    #[test]
    fn test_categories() {
        assert!(HttpStatus::NO_CONTENT.is_success());
        assert!(HttpStatus::UNSUPPORTED_MEDIA_TYPE.is_client_error());
        assert!(HttpStatus::new(503).is_server_error());
        assert!(!HttpStatus::OK.is_client_error());
    }
}
