// Core library for the rivet service host.
// Request DTOs are matched to routes, resolved to operations and dispatched
// to service actions through filters, hooks and access restrictions.

pub mod config;
pub mod container;
pub mod dispatcher;
pub mod dto;
pub mod endpoint;
pub mod error;
pub mod fault;
pub mod filter;
pub mod host;
pub mod http;
pub mod logging;
pub mod messaging;
pub mod operation;
pub mod response;
pub mod restriction;
pub mod route_pattern;
pub mod route_table;
pub mod runner;
pub mod serializer;
pub mod service;
pub mod status;
pub mod verb;

// Re-export commonly used types
pub use config::*;
pub use container::*;
pub use dispatcher::*;
pub use dto::*;
pub use endpoint::*;
pub use error::*;
pub use fault::*;
pub use filter::*;
pub use host::*;
pub use http::*;
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput, Rotation};
pub use messaging::*;
pub use operation::*;
pub use response::*;
pub use restriction::*;
pub use route_pattern::{IGNORE_VARIABLE, RoutePattern};
pub use route_table::*;
pub use runner::*;
pub use serializer::{ContentSerializer, ContentTypes, FormSerializer, JsonSerializer};
pub use service::*;
pub use status::*;
pub use verb::*;
