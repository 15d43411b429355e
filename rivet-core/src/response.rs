// Result of dispatching one request

use crate::{Dto, ErrorResponse, HttpStatus};
use std::any::Any;

/// What the dispatcher hands back for a request: a response DTO, nothing at
/// all (one-way operations, closed responses), or a structured fault.
#[derive(Debug)]
pub enum Response {
    Dto(Box<dyn Dto>),
    Empty,
    Fault(ErrorResponse),
}

impl Response {
    /// Wrap a service result; `()` results become [`Response::Empty`].
    pub fn from_dto(dto: Box<dyn Dto>) -> Self {
        if dto.is::<()>() {
            Response::Empty
        } else {
            Response::Dto(dto)
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Response::Fault(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Response::Empty)
    }

    pub fn fault(&self) -> Option<&ErrorResponse> {
        match self {
            Response::Fault(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn dto(&self) -> Option<&dyn Dto> {
        match self {
            Response::Dto(dto) => Some(&**dto),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.dto().and_then(|dto| dto.downcast_ref::<T>())
    }

    /// Take the concrete response DTO out.
    pub fn into_dto<T: Any>(self) -> Option<T> {
        match self {
            Response::Dto(dto) => dto.downcast::<T>().ok().map(|b| *b),
            _ => None,
        }
    }

    /// Default status code for the response kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Response::Dto(_) => HttpStatus::OK.code(),
            Response::Empty => HttpStatus::NO_CONTENT.code(),
            Response::Fault(fault) => fault.status,
        }
    }
}

impl From<ErrorResponse> for Response {
    fn from(fault: ErrorResponse) -> Self {
        Response::Fault(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_result_is_empty() {
        assert!(Response::from_dto(Box::new(())).is_empty());
        assert_eq!(Response::Empty.status_code(), 204);
    }

    #[test]
    fn test_downcast() {
        let response = Response::from_dto(Box::new(42u64));
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.downcast_ref::<u64>(), Some(&42));
        assert_eq!(response.downcast_ref::<u32>(), None);
        assert_eq!(response.into_dto::<u64>(), Some(42));
    }

    #[test]
    fn test_fault_status() {
        let response: Response = ErrorResponse::new(409, "Conflict", "stale").into();
        assert!(response.is_fault());
        assert_eq!(response.status_code(), 409);
        assert_eq!(response.fault().unwrap().error_code, "Conflict");
    }
}
