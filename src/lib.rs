// Rivet - a message-based service host for Rust
//
// Requests are plain serde DTOs. Services declare actions for them, routes map
// URLs onto them and the dispatcher drives each one through filters, hooks
// and access checks to a typed response or a structured fault.

// Re-export core functionality
pub use rivet_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use rivet_config;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        ActionKey,
        Container,
        Dispatcher,
        Dto,
        EndpointAttributes,
        Error,
        ErrorResponse,
        // Hooks and filters
        ExecutionHooks,
        FnRequestFilter,
        FnResponseFilter,
        HostConfig,
        HttpMethod,
        HttpResponse,
        RequestContext,
        RequestDto,
        RequestFilter,
        Response,
        ResponseFilter,
        Restriction,
        Result,
        Service,
        ServiceHost,
        ServiceHostBuilder,
        ServiceRegistration,
    };

    #[cfg(feature = "config")]
    pub use crate::rivet_config::{ConfigManager, Validate, load_host_config};
}
