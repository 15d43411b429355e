//! Operation metadata.
//!
//! An operation is one request DTO type handled by one service. The
//! [`OperationRegistry`] indexes operations by request type, response type
//! and case-insensitive name, and answers access questions about them.

use crate::dto::{RequestType, TypeInfo};
use crate::filter::{FilterChain, RequestFilter, ResponseFilter};
use crate::logging::{debug, info, warn};
use crate::restriction::Restriction;
use crate::route_pattern::RoutePattern;
use crate::{EndpointAttributes, Error, Result};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Metadata about one operation.
#[derive(Clone)]
pub struct Operation {
    request_type: Arc<RequestType>,
    response_type: Option<TypeInfo>,
    service_type: TypeInfo,
    actions: Vec<String>,
    restrict_to: Option<Restriction>,
    routes: Vec<Arc<RoutePattern>>,
    request_filters: FilterChain<dyn RequestFilter>,
    response_filters: FilterChain<dyn ResponseFilter>,
    tags: Vec<String>,
}

impl Operation {
    fn new(request_type: Arc<RequestType>, service_type: TypeInfo, response_type: Option<TypeInfo>) -> Self {
        Self {
            request_type,
            response_type,
            service_type,
            actions: Vec::new(),
            restrict_to: None,
            routes: Vec::new(),
            request_filters: FilterChain::default(),
            response_filters: FilterChain::default(),
            tags: Vec::new(),
        }
    }

    /// The request type's short name.
    pub fn name(&self) -> &str {
        self.request_type.name()
    }

    pub fn request_type(&self) -> &Arc<RequestType> {
        &self.request_type
    }

    /// `None` for one-way operations.
    pub fn response_type(&self) -> Option<&TypeInfo> {
        self.response_type.as_ref()
    }

    pub fn service_type(&self) -> &TypeInfo {
        &self.service_type
    }

    /// Verb names of the actions that handle this operation.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Preferred verb for clients: the first verb-specific action, else
    /// `POST`.
    pub fn method(&self) -> &str {
        self.actions
            .iter()
            .find(|a| *a != crate::verb::ANY_VERB)
            .map(String::as_str)
            .unwrap_or("POST")
    }

    pub fn restrict_to(&self) -> Option<&Restriction> {
        self.restrict_to.as_ref()
    }

    pub fn routes(&self) -> &[Arc<RoutePattern>] {
        &self.routes
    }

    pub fn is_one_way(&self) -> bool {
        self.response_type.is_none()
    }

    pub fn request_filters(&self) -> &FilterChain<dyn RequestFilter> {
        &self.request_filters
    }

    pub fn response_filters(&self) -> &FilterChain<dyn ResponseFilter> {
        &self.response_filters
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name())
            .field("service_type", &self.service_type.name())
            .field("response_type", &self.response_type.as_ref().map(TypeInfo::name))
            .field("actions", &self.actions)
            .field("routes", &self.routes.len())
            .finish()
    }
}

/// Operations indexed for dispatch.
pub struct OperationRegistry {
    operations: HashMap<TypeId, Operation>,
    by_response: HashMap<TypeId, TypeId>,
    by_name: HashMap<String, TypeId>,
    enable_access_restrictions: bool,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::with_access_restrictions(true)
    }

    /// With `enabled == false` every operation is callable from anywhere.
    pub fn with_access_restrictions(enabled: bool) -> Self {
        Self {
            operations: HashMap::new(),
            by_response: HashMap::new(),
            by_name: HashMap::new(),
            enable_access_restrictions: enabled,
        }
    }

    /// Register an operation. Each request type and each name may be
    /// registered once.
    pub fn register(
        &mut self,
        request_type: Arc<RequestType>,
        service_type: TypeInfo,
        response_type: Option<TypeInfo>,
    ) -> Result<&mut Operation> {
        let id = request_type.id();
        if let Some(existing) = self.operations.get(&id) {
            return Err(Error::AmbiguousRegistration(format!(
                "{} is already handled by {}, cannot also register {}",
                request_type.name(),
                existing.service_type.name(),
                service_type.name()
            )));
        }

        let key = request_type.name().to_lowercase();
        if let Some(other) = self.by_name.get(&key).and_then(|id| self.operations.get(id)) {
            return Err(Error::AmbiguousRegistration(format!(
                "operation name {} is used by both {} and {}",
                request_type.name(),
                other.request_type.info().full_name(),
                request_type.info().full_name()
            )));
        }

        if let Some(response_type) = &response_type {
            let conventional = format!("{}Response", request_type.name());
            if response_type.name() != conventional {
                debug!(
                    operation = request_type.name(),
                    response = response_type.name(),
                    "response type associated by action signature, not by <Request>Response name"
                );
            }
            self.by_response.entry(response_type.id()).or_insert(id);
        }

        info!(
            operation = request_type.name(),
            service = service_type.name(),
            "registered operation"
        );
        self.by_name.insert(key, id);
        Ok(self
            .operations
            .entry(id)
            .or_insert(Operation::new(request_type, service_type, response_type)))
    }

    fn operation_mut(&mut self, request_type: TypeId) -> Result<&mut Operation> {
        self.operations
            .get_mut(&request_type)
            .ok_or_else(|| Error::Configuration("no operation registered for request type".into()))
    }

    pub fn add_action(&mut self, request_type: TypeId, verb: &str) -> Result<()> {
        let operation = self.operation_mut(request_type)?;
        if !operation.actions.iter().any(|a| a == verb) {
            operation.actions.push(verb.to_string());
        }
        Ok(())
    }

    /// Set the operation's restriction, replacing any inherited one.
    pub fn set_restriction(&mut self, request_type: TypeId, restriction: Restriction) -> Result<()> {
        self.operation_mut(request_type)?.restrict_to = Some(restriction);
        Ok(())
    }

    pub fn add_tag(&mut self, request_type: TypeId, tag: impl Into<String>) -> Result<()> {
        self.operation_mut(request_type)?.tags.push(tag.into());
        Ok(())
    }

    pub fn add_request_filter(&mut self, request_type: TypeId, filter: Arc<dyn RequestFilter>) -> Result<()> {
        self.operation_mut(request_type)?.request_filters.push(filter);
        Ok(())
    }

    pub fn add_response_filter(&mut self, request_type: TypeId, filter: Arc<dyn ResponseFilter>) -> Result<()> {
        self.operation_mut(request_type)?.response_filters.push(filter);
        Ok(())
    }

    /// Attach a route to its operation.
    pub fn attach_route(&mut self, route: Arc<RoutePattern>) -> bool {
        match self.operations.get_mut(&route.request_type().id()) {
            Some(operation) => {
                if !operation.routes.iter().any(|r| Arc::ptr_eq(r, &route)) {
                    operation.routes.push(route);
                }
                true
            }
            None => false,
        }
    }

    /// Attach routes declared outside service registrations. Routes whose
    /// request type has no operation are kept in the route table but only
    /// reachable as 501 Not Implemented.
    pub fn after_init(&mut self, routes: &[Arc<RoutePattern>]) {
        for route in routes {
            if !self.attach_route(Arc::clone(route)) {
                warn!(
                    route = route.path(),
                    request_type = route.request_type().name(),
                    "route declared for a request type without a service"
                );
            }
        }
        for operation in self.operations.values_mut() {
            operation.actions.sort();
        }
        debug!(operations = self.operations.len(), "operation registry initialized");
    }

    /// Case-insensitive lookup by operation name.
    pub fn resolve_operation_by_name(&self, name: &str) -> Option<&Operation> {
        self.by_name
            .get(&name.to_lowercase())
            .and_then(|id| self.operations.get(id))
    }

    pub fn resolve_service_type_for_request(&self, request_type: TypeId) -> Option<&TypeInfo> {
        self.operations.get(&request_type).map(Operation::service_type)
    }

    pub fn resolve_service_type_for_response(&self, response_type: TypeId) -> Option<&TypeInfo> {
        self.by_response
            .get(&response_type)
            .and_then(|id| self.resolve_service_type_for_request(*id))
    }

    pub fn resolve_response_type_for_request(&self, request_type: TypeId) -> Option<&TypeInfo> {
        self.operations
            .get(&request_type)
            .and_then(Operation::response_type)
    }

    pub fn get_operation(&self, request_type: TypeId) -> Option<&Operation> {
        self.operations.get(&request_type)
    }

    pub fn has_operation(&self, request_type: TypeId) -> bool {
        self.operations.contains_key(&request_type)
    }

    /// All operations ordered by name.
    pub fn get_all_operations(&self) -> Vec<&Operation> {
        let mut operations: Vec<&Operation> = self.operations.values().collect();
        operations.sort_by(|a, b| a.name().cmp(b.name()));
        operations
    }

    pub fn get_all_operation_names(&self) -> Vec<String> {
        self.get_all_operations()
            .into_iter()
            .map(|op| op.name().to_string())
            .collect()
    }

    pub fn request_types(&self) -> Vec<&TypeInfo> {
        self.get_all_operations()
            .into_iter()
            .map(|op| op.request_type.info())
            .collect()
    }

    pub fn response_types(&self) -> Vec<&TypeInfo> {
        self.get_all_operations()
            .into_iter()
            .filter_map(Operation::response_type)
            .collect()
    }

    /// Distinct service types, in operation-name order.
    pub fn service_types(&self) -> Vec<&TypeInfo> {
        let mut seen = std::collections::HashSet::new();
        self.get_all_operations()
            .into_iter()
            .map(Operation::service_type)
            .filter(|info| seen.insert(info.id()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn access_restrictions_enabled(&self) -> bool {
        self.enable_access_restrictions
    }

    /// Fail with [`Error::AccessRestricted`] when the operation's
    /// restriction is not met by `actual`. Unknown request types pass; the
    /// dispatcher reports those itself.
    pub fn assert_allowed(&self, request_type: TypeId, actual: EndpointAttributes) -> Result<()> {
        if !self.enable_access_restrictions {
            return Ok(());
        }
        let Some(operation) = self.operations.get(&request_type) else {
            return Ok(());
        };
        match &operation.restrict_to {
            Some(restriction) => restriction
                .check(operation.name(), actual)
                .map_err(Error::AccessRestricted),
            None => Ok(()),
        }
    }

    /// Whether a caller with `attrs` may invoke the named operation.
    pub fn can_access(&self, attrs: EndpointAttributes, operation_name: &str) -> bool {
        let Some(operation) = self.resolve_operation_by_name(operation_name) else {
            return false;
        };
        !self.enable_access_restrictions
            || operation
                .restrict_to
                .as_ref()
                .is_none_or(|restriction| restriction.allows(attrs))
    }

    /// Whether metadata about the named operation may be shown to a caller
    /// with `attrs`.
    pub fn is_visible(&self, attrs: EndpointAttributes, operation_name: &str) -> bool {
        let Some(operation) = self.resolve_operation_by_name(operation_name) else {
            return false;
        };
        !self.enable_access_restrictions
            || operation
                .restrict_to
                .as_ref()
                .is_none_or(|restriction| restriction.can_show_to(attrs))
    }

    /// Operations visible to a caller with `attrs`, ordered by name.
    pub fn visible_operations(&self, attrs: EndpointAttributes) -> Vec<&Operation> {
        self.get_all_operations()
            .into_iter()
            .filter(|op| self.is_visible(attrs, op.name()))
            .collect()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.get_all_operation_names())
            .field("enable_access_restrictions", &self.enable_access_restrictions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct GetOrder {
        id: u64,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct GetOrderResponse {
        id: u64,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Purge {}

    struct OrderService;
    struct AdminService;

    fn registry() -> OperationRegistry {
        let mut registry = OperationRegistry::new();
        registry
            .register(
                Arc::new(RequestType::of::<GetOrder>().unwrap()),
                TypeInfo::of::<OrderService>(),
                Some(TypeInfo::of::<GetOrderResponse>()),
            )
            .unwrap();
        registry
            .register(
                Arc::new(RequestType::of::<Purge>().unwrap()),
                TypeInfo::of::<AdminService>(),
                None,
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_lookups() {
        let mut registry = registry();
        registry.add_action(TypeId::of::<GetOrder>(), "GET").unwrap();

        let op = registry.resolve_operation_by_name("getorder").unwrap();
        assert_eq!(op.name(), "GetOrder");
        assert_eq!(op.method(), "GET");
        assert_eq!(
            registry.resolve_operation_by_name("Purge").unwrap().method(),
            "POST"
        );
        assert!(!op.is_one_way());

        assert!(
            registry
                .resolve_service_type_for_request(TypeId::of::<GetOrder>())
                .unwrap()
                .is::<OrderService>()
        );
        assert!(
            registry
                .resolve_service_type_for_response(TypeId::of::<GetOrderResponse>())
                .unwrap()
                .is::<OrderService>()
        );
        assert!(
            registry
                .resolve_response_type_for_request(TypeId::of::<Purge>())
                .is_none()
        );
        assert_eq!(registry.get_all_operation_names(), vec!["GetOrder", "Purge"]);
        assert_eq!(registry.response_types().len(), 1);
        assert_eq!(registry.service_types().len(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        let result = registry.register(
            Arc::new(RequestType::of::<GetOrder>().unwrap()),
            TypeInfo::of::<AdminService>(),
            None,
        );
        assert!(matches!(result, Err(Error::AmbiguousRegistration(_))));
    }

    #[test]
    fn test_assert_allowed() {
        let mut registry = registry();
        registry
            .set_restriction(TypeId::of::<Purge>(), Restriction::localhost_only())
            .unwrap();

        let external = EndpointAttributes::EXTERNAL | EndpointAttributes::HTTP_POST;
        let err = registry
            .assert_allowed(TypeId::of::<Purge>(), external)
            .unwrap_err();
        match err {
            Error::AccessRestricted(failure) => {
                assert!(failure.is_missing(EndpointAttributes::LOCALHOST))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let local = EndpointAttributes::LOCALHOST | EndpointAttributes::HTTP_POST;
        assert!(registry.assert_allowed(TypeId::of::<Purge>(), local).is_ok());
        assert!(registry.assert_allowed(TypeId::of::<GetOrder>(), external).is_ok());
        assert!(registry.can_access(local, "purge"));
        assert!(!registry.can_access(external, "purge"));
        assert!(!registry.can_access(local, "missing"));
    }

    #[test]
    fn test_restrictions_disabled() {
        let mut registry = OperationRegistry::with_access_restrictions(false);
        registry
            .register(
                Arc::new(RequestType::of::<Purge>().unwrap()),
                TypeInfo::of::<AdminService>(),
                None,
            )
            .unwrap();
        registry
            .set_restriction(TypeId::of::<Purge>(), Restriction::localhost_only())
            .unwrap();
        assert!(
            registry
                .assert_allowed(TypeId::of::<Purge>(), EndpointAttributes::EXTERNAL)
                .is_ok()
        );
    }

    #[test]
    fn test_visibility() {
        let mut registry = registry();
        registry
            .set_restriction(
                TypeId::of::<Purge>(),
                Restriction::any_of([EndpointAttributes::LOCALHOST, EndpointAttributes::EXTERNAL])
                    .visible_locally_only(),
            )
            .unwrap();

        let external = EndpointAttributes::EXTERNAL;
        assert!(registry.can_access(external, "Purge"));
        assert!(!registry.is_visible(external, "Purge"));
        let names: Vec<&str> = registry
            .visible_operations(external)
            .into_iter()
            .map(Operation::name)
            .collect();
        assert_eq!(names, vec!["GetOrder"]);
    }

    #[test]
    fn test_after_init_attaches_routes() {
        let mut registry = registry();
        let route = Arc::new(
            RoutePattern::parse(
                Arc::new(RequestType::of::<GetOrder>().unwrap()),
                "/orders/{Id}",
                Some("GET"),
            )
            .unwrap(),
        );
        registry.after_init(&[Arc::clone(&route), Arc::clone(&route)]);
        let op = registry.get_operation(TypeId::of::<GetOrder>()).unwrap();
        assert_eq!(op.routes().len(), 1);
        assert_eq!(op.routes()[0].path(), "/orders/{Id}");
    }
}
