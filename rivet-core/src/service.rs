//! Services and their actions.
//!
//! A service is any `Send + Sync` type implementing [`Service`]. Its actions
//! are async closures registered per request type and verb through a
//! [`ServiceRegistration`]; at init they are compiled into a [`ServiceExec`]
//! table keyed by request type and [`ActionKey`].

use crate::container::{Container, Instance, TypeFactory};
use crate::dto::{Dto, RequestDto, RequestType, TypeInfo};
use crate::filter::{RequestFilter, ResponseFilter};
use crate::logging::{debug, trace};
use crate::restriction::Restriction;
use crate::route_pattern::RoutePattern;
use crate::verb::ANY_VERB;
use crate::{Error, HttpMethod, RequestContext, Result};
use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;
use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Marker for types that handle requests.
pub trait Service: Send + Sync + 'static {
    /// Called with the request context once the instance is created and
    /// before any action runs.
    fn set_request(&self, _ctx: &Arc<RequestContext>) {}
}

/// Which action of a service a call is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActionKey {
    /// `None` accepts any verb.
    pub verb: Option<HttpMethod>,
    /// Async one-way variant.
    pub one_way: bool,
}

impl ActionKey {
    pub const ANY: ActionKey = ActionKey {
        verb: None,
        one_way: false,
    };

    pub fn verb(verb: HttpMethod) -> Self {
        Self {
            verb: Some(verb),
            one_way: false,
        }
    }

    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    /// Upper-case verb name, `ANY` for the generic action.
    pub fn verb_name(&self) -> &'static str {
        self.verb.map(|v| v.as_str()).unwrap_or(ANY_VERB)
    }

    /// Keys to try for a request, most specific first.
    fn fallbacks(self) -> [ActionKey; 4] {
        [
            self,
            ActionKey {
                verb: self.verb,
                one_way: false,
            },
            ActionKey {
                verb: None,
                one_way: self.one_way,
            },
            ActionKey::ANY,
        ]
    }
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.verb_name())?;
        if self.one_way {
            f.write_str(" (one-way)")?;
        }
        Ok(())
    }
}

type ActionFn =
    Arc<dyn Fn(Instance, Box<dyn Dto>, Arc<RequestContext>) -> BoxFuture<'static, Result<Box<dyn Dto>>> + Send + Sync>;
type InjectFn = fn(&Instance, &Arc<RequestContext>);
type InstallFn = Box<dyn FnOnce(&Container) + Send>;

/// A compiled, type-erased action.
#[derive(Clone)]
pub struct ActionHandle {
    key: ActionKey,
    service_type: TypeInfo,
    invoke: ActionFn,
    inject: InjectFn,
}

impl ActionHandle {
    pub fn key(&self) -> ActionKey {
        self.key
    }

    pub fn service_type(&self) -> &TypeInfo {
        &self.service_type
    }

    /// Hand the request context to the service instance.
    pub fn inject(&self, instance: &Instance, ctx: &Arc<RequestContext>) {
        (self.inject)(instance, ctx)
    }

    pub fn invoke(
        &self,
        instance: Instance,
        request: Box<dyn Dto>,
        ctx: Arc<RequestContext>,
    ) -> BoxFuture<'static, Result<Box<dyn Dto>>> {
        (self.invoke)(instance, request, ctx)
    }
}

impl std::fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHandle")
            .field("key", &self.key)
            .field("service_type", &self.service_type.name())
            .finish()
    }
}

pub(crate) struct ActionEntry {
    pub(crate) request_type: Arc<RequestType>,
    pub(crate) response_type: TypeInfo,
    pub(crate) handle: ActionHandle,
}

pub(crate) struct RouteEntry {
    pub(crate) request_type: TypeId,
    pub(crate) path: String,
    pub(crate) verbs: Option<String>,
}

/// How the service instance is obtained.
enum Provision<S> {
    /// Already registered with the type factory.
    External,
    Transient(Box<dyn Fn(&Container) -> Result<S> + Send + Sync>),
    Singleton(Arc<S>),
}

/// Declares a service's actions, routes, restriction and filters.
///
/// ```ignore
/// ServiceRegistration::<HelloService>::transient(|_| Ok(HelloService))
///     .get(|svc, req: Hello, _ctx| async move { svc.greet(req) })
///     .route::<Hello>("/hello/{Name}", Some("GET"))
/// ```
pub struct ServiceRegistration<S: Service> {
    provision: Provision<S>,
    request_types: HashMap<TypeId, Arc<RequestType>>,
    actions: Vec<ActionEntry>,
    routes: Vec<RouteEntry>,
    restrict_to: Option<Restriction>,
    request_filters: Vec<(TypeId, Arc<dyn RequestFilter>)>,
    response_filters: Vec<(TypeId, Arc<dyn ResponseFilter>)>,
    errors: Vec<Error>,
}

impl<S: Service> ServiceRegistration<S> {
    /// Instances come from whatever type factory the host uses.
    pub fn new() -> Self {
        Self::with_provision(Provision::External)
    }

    /// A fresh instance per request.
    pub fn transient<F>(factory: F) -> Self
    where
        F: Fn(&Container) -> Result<S> + Send + Sync + 'static,
    {
        Self::with_provision(Provision::Transient(Box::new(factory)))
    }

    /// One shared instance for every request.
    pub fn singleton(instance: S) -> Self {
        Self::with_provision(Provision::Singleton(Arc::new(instance)))
    }

    fn with_provision(provision: Provision<S>) -> Self {
        Self {
            provision,
            request_types: HashMap::new(),
            actions: Vec::new(),
            routes: Vec::new(),
            restrict_to: None,
            request_filters: Vec::new(),
            response_filters: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Register an action for `key`.
    pub fn action<Req, Res, F, Fut>(mut self, key: ActionKey, handler: F) -> Self
    where
        Req: RequestDto,
        Res: Dto,
        F: Fn(Arc<S>, Req, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res>> + Send + 'static,
    {
        let Some(request_type) = self.request_type::<Req>() else {
            return self;
        };

        let handler = Arc::new(handler);
        let invoke: ActionFn = Arc::new(move |instance, request, ctx| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let service = instance.downcast::<S>().map_err(|_| {
                    Error::Internal(format!("instance is not a {}", std::any::type_name::<S>()))
                })?;
                let request = request.downcast::<Req>().map_err(|other| {
                    Error::Internal(format!(
                        "expected {}, got {}",
                        std::any::type_name::<Req>(),
                        other.type_name()
                    ))
                })?;
                let response = handler(service, *request, ctx).await?;
                Ok(Box::new(response) as Box<dyn Dto>)
            })
        });

        self.actions.push(ActionEntry {
            request_type,
            response_type: TypeInfo::of::<Res>(),
            handle: ActionHandle {
                key,
                service_type: TypeInfo::of::<S>(),
                invoke,
                inject: inject_into::<S>,
            },
        });
        self
    }

    /// Generic action used when no verb-specific one exists.
    pub fn any<Req, Res, F, Fut>(self, handler: F) -> Self
    where
        Req: RequestDto,
        Res: Dto,
        F: Fn(Arc<S>, Req, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res>> + Send + 'static,
    {
        self.action(ActionKey::ANY, handler)
    }

    pub fn get<Req, Res, F, Fut>(self, handler: F) -> Self
    where
        Req: RequestDto,
        Res: Dto,
        F: Fn(Arc<S>, Req, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res>> + Send + 'static,
    {
        self.action(ActionKey::verb(HttpMethod::GET), handler)
    }

    pub fn post<Req, Res, F, Fut>(self, handler: F) -> Self
    where
        Req: RequestDto,
        Res: Dto,
        F: Fn(Arc<S>, Req, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res>> + Send + 'static,
    {
        self.action(ActionKey::verb(HttpMethod::POST), handler)
    }

    pub fn put<Req, Res, F, Fut>(self, handler: F) -> Self
    where
        Req: RequestDto,
        Res: Dto,
        F: Fn(Arc<S>, Req, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res>> + Send + 'static,
    {
        self.action(ActionKey::verb(HttpMethod::PUT), handler)
    }

    pub fn delete<Req, Res, F, Fut>(self, handler: F) -> Self
    where
        Req: RequestDto,
        Res: Dto,
        F: Fn(Arc<S>, Req, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res>> + Send + 'static,
    {
        self.action(ActionKey::verb(HttpMethod::DELETE), handler)
    }

    pub fn patch<Req, Res, F, Fut>(self, handler: F) -> Self
    where
        Req: RequestDto,
        Res: Dto,
        F: Fn(Arc<S>, Req, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res>> + Send + 'static,
    {
        self.action(ActionKey::verb(HttpMethod::PATCH), handler)
    }

    /// Action for calls flagged one-way that are executed inline.
    pub fn one_way<Req, Res, F, Fut>(self, handler: F) -> Self
    where
        Req: RequestDto,
        Res: Dto,
        F: Fn(Arc<S>, Req, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res>> + Send + 'static,
    {
        self.action(ActionKey::ANY.one_way(), handler)
    }

    /// Declare a route for one of this service's request types. Attached to
    /// the operation as soon as the service is registered.
    pub fn route<Req: RequestDto>(mut self, path: &str, verbs: Option<&str>) -> Self {
        self.routes.push(RouteEntry {
            request_type: TypeId::of::<Req>(),
            path: path.to_string(),
            verbs: verbs.map(str::to_string),
        });
        self
    }

    /// Restriction applied to every operation of this service unless the
    /// request type declares its own.
    pub fn restrict(mut self, restriction: Restriction) -> Self {
        self.restrict_to = Some(restriction);
        self
    }

    pub fn request_filter<Req: RequestDto>(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.request_filters.push((TypeId::of::<Req>(), filter));
        self
    }

    pub fn response_filter<Req: RequestDto>(mut self, filter: Arc<dyn ResponseFilter>) -> Self {
        self.response_filters.push((TypeId::of::<Req>(), filter));
        self
    }

    fn request_type<Req: RequestDto>(&mut self) -> Option<Arc<RequestType>> {
        if let Some(existing) = self.request_types.get(&TypeId::of::<Req>()) {
            return Some(Arc::clone(existing));
        }
        match RequestType::of::<Req>() {
            Ok(request_type) => {
                let request_type = Arc::new(request_type);
                self.request_types
                    .insert(TypeId::of::<Req>(), Arc::clone(&request_type));
                Some(request_type)
            }
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }
}

impl<S: Service> Default for ServiceRegistration<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn inject_into<S: Service>(instance: &Instance, ctx: &Arc<RequestContext>) {
    if let Some(service) = instance.downcast_ref::<S>() {
        service.set_request(ctx);
    }
}

/// A service registration with its service type erased.
pub struct ServiceDefinition {
    pub(crate) service_type: TypeInfo,
    pub(crate) actions: Vec<ActionEntry>,
    pub(crate) routes: Vec<RouteEntry>,
    pub(crate) restrict_to: Option<Restriction>,
    pub(crate) request_filters: Vec<(TypeId, Arc<dyn RequestFilter>)>,
    pub(crate) response_filters: Vec<(TypeId, Arc<dyn ResponseFilter>)>,
    pub(crate) errors: Vec<Error>,
    pub(crate) install: Option<InstallFn>,
}

impl ServiceDefinition {
    pub fn service_type(&self) -> &TypeInfo {
        &self.service_type
    }
}

impl<S: Service> From<ServiceRegistration<S>> for ServiceDefinition {
    fn from(registration: ServiceRegistration<S>) -> Self {
        let install: Option<InstallFn> = match registration.provision {
            Provision::External => None,
            Provision::Transient(factory) => Some(Box::new(move |container: &Container| {
                container.register_factory(move |c| factory(c));
            })),
            Provision::Singleton(instance) => Some(Box::new(move |container: &Container| {
                container.register_arc(instance);
            })),
        };

        Self {
            service_type: TypeInfo::of::<S>(),
            actions: registration.actions,
            routes: registration.routes,
            restrict_to: registration.restrict_to,
            request_filters: registration.request_filters,
            response_filters: registration.response_filters,
            errors: registration.errors,
            install,
        }
    }
}

type SelectionCache = HashMap<(TypeId, ActionKey), Option<ActionKey>>;

/// Compiled action table: request type and action key to handler.
///
/// Read-only after init except for the selection cache, which memoizes
/// fallback resolution in a copy-on-write snapshot.
pub struct ServiceExec {
    actions: HashMap<(TypeId, ActionKey), ActionHandle>,
    injectors: HashMap<TypeId, InjectFn>,
    selections: ArcSwap<SelectionCache>,
}

impl ServiceExec {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
            injectors: HashMap::new(),
            selections: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// At most one handler per request type and key.
    pub fn add(&mut self, request_type: &RequestType, handle: ActionHandle) -> Result<()> {
        let slot = (request_type.id(), handle.key);
        if let Some(existing) = self.actions.get(&slot) {
            return Err(Error::AmbiguousRegistration(format!(
                "{} already has a {} action on {}",
                request_type.name(),
                handle.key,
                existing.service_type.name()
            )));
        }
        debug!(
            request_type = request_type.name(),
            action = %handle.key,
            service = handle.service_type.name(),
            "compiled action"
        );
        self.injectors.insert(handle.service_type.id(), handle.inject);
        self.actions.insert(slot, handle);
        Ok(())
    }

    /// Hand the request context to an instance of `service_type`.
    pub fn inject(&self, service_type: &TypeInfo, instance: &Instance, ctx: &Arc<RequestContext>) {
        if let Some(inject) = self.injectors.get(&service_type.id()) {
            inject(instance, ctx);
        }
    }

    pub fn has_actions_for(&self, request_type: TypeId) -> bool {
        self.actions.keys().any(|(id, _)| *id == request_type)
    }

    /// Resolve the handler for `requested`, falling back from verb-specific
    /// to generic and from one-way to regular actions.
    pub fn select(&self, request_type: TypeId, requested: ActionKey) -> Option<&ActionHandle> {
        let slot = (request_type, requested);
        if let Some(resolved) = self.selections.load().get(&slot) {
            return resolved.and_then(|key| self.actions.get(&(request_type, key)));
        }

        let resolved = requested
            .fallbacks()
            .into_iter()
            .find(|key| self.actions.contains_key(&(request_type, *key)));
        trace!(requested = %requested, resolved = ?resolved, "caching action selection");

        self.selections.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(slot, resolved);
            next
        });
        resolved.and_then(|key| self.actions.get(&(request_type, key)))
    }

    pub fn cached_selections(&self) -> usize {
        self.selections.load().len()
    }
}

impl Default for ServiceExec {
    fn default() -> Self {
        Self::new()
    }
}

/// A service instance checked out of a [`TypeFactory`] for one request.
/// Dropping the lease releases the instance.
pub struct ServiceLease {
    instance: Option<Instance>,
    factory: Arc<dyn TypeFactory>,
}

impl ServiceLease {
    pub fn acquire(
        factory: Arc<dyn TypeFactory>,
        service_type: &TypeInfo,
        ctx: &Arc<RequestContext>,
    ) -> Result<Self> {
        let instance = factory.create(service_type, ctx)?;
        Ok(Self {
            instance: Some(instance),
            factory,
        })
    }

    pub fn instance(&self) -> Option<Instance> {
        self.instance.clone()
    }
}

impl Drop for ServiceLease {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.factory.release(instance);
        }
    }
}

/// Parse the route declarations of a definition against its request types.
pub(crate) fn parse_routes(
    definition: &ServiceDefinition,
    lookup: impl Fn(TypeId) -> Option<Arc<RequestType>>,
) -> Result<Vec<RoutePattern>> {
    definition
        .routes
        .iter()
        .map(|route| {
            let request_type = lookup(route.request_type).ok_or_else(|| {
                Error::Configuration(format!(
                    "route {} on {} names a request type the service does not handle",
                    route.path,
                    definition.service_type.name()
                ))
            })?;
            RoutePattern::parse(request_type, &route.path, route.verbs.as_deref())
        })
        .collect()
}
