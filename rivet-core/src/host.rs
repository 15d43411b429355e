// Service host: registration, init and HTTP-style request handling

use crate::config::HostConfig;
use crate::container::{Container, TypeFactory};
use crate::dispatcher::{Dispatcher, DispatcherParts};
use crate::dto::{RequestDto, RequestType};
use crate::filter::{RequestFilter, ResponseFilter};
use crate::logging::{debug, error, info};
use crate::messaging::{Message, MessageProducer};
use crate::operation::OperationRegistry;
use crate::restriction::Restriction;
use crate::route_pattern::RoutePattern;
use crate::route_table::RouteTable;
use crate::runner::{DefaultHooks, ExecutionHooks, ExecutionRunner, FilterPipeline, InMemoryRequestLogger, RequestLogger};
use crate::serializer::{ContentSerializer, ContentTypes, JSON};
use crate::service::{ServiceDefinition, ServiceExec, parse_routes};
use crate::{Dto, Error, ErrorResponse, HttpResponse, RequestContext, Response, Result};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

struct RouteDecl {
    request_type: TypeId,
    describe: fn() -> Result<RequestType>,
    path: String,
    verbs: Option<String>,
    summary: Option<String>,
}

impl RouteDecl {
    fn new<Req: RequestDto>(path: &str, verbs: Option<&str>) -> Self {
        Self {
            request_type: TypeId::of::<Req>(),
            describe: RequestType::of::<Req>,
            path: path.to_string(),
            verbs: verbs.map(str::to_string),
            summary: None,
        }
    }

    fn parse(&self, registry: &OperationRegistry) -> Result<RoutePattern> {
        let request_type = match registry.get_operation(self.request_type) {
            Some(operation) => Arc::clone(operation.request_type()),
            None => Arc::new((self.describe)()?),
        };
        let pattern = RoutePattern::parse(request_type, &self.path, self.verbs.as_deref())?;
        Ok(match &self.summary {
            Some(summary) => pattern.with_summary(summary.clone()),
            None => pattern,
        })
    }
}

/// Collects services, routes, restrictions and filters, then validates and
/// freezes them into a [`ServiceHost`].
///
/// ```ignore
/// let host = ServiceHost::builder()
///     .service(ServiceRegistration::<HelloService>::singleton(HelloService)
///         .get(|svc, req: Hello, _| async move { Ok(svc.greet(&req.name)) }))
///     .route::<Hello>("/hello/{Name}", Some("GET"))
///     .init()?;
/// ```
pub struct ServiceHostBuilder {
    config: HostConfig,
    container: Container,
    type_factory: Option<Arc<dyn TypeFactory>>,
    services: Vec<ServiceDefinition>,
    routes: Vec<RouteDecl>,
    fallback: Option<RouteDecl>,
    restrictions: Vec<(TypeId, Restriction)>,
    tags: Vec<(TypeId, String)>,
    http_filters: FilterPipeline,
    message_filters: FilterPipeline,
    operation_request_filters: Vec<(TypeId, Arc<dyn RequestFilter>)>,
    operation_response_filters: Vec<(TypeId, Arc<dyn ResponseFilter>)>,
    hooks: Arc<dyn ExecutionHooks>,
    type_hooks: HashMap<TypeId, Arc<dyn ExecutionHooks>>,
    request_logger: Option<Arc<dyn RequestLogger>>,
    producer: Option<Arc<dyn MessageProducer>>,
    content_types: ContentTypes,
}

impl ServiceHostBuilder {
    pub fn new() -> Self {
        Self {
            config: HostConfig::default(),
            container: Container::new(),
            type_factory: None,
            services: Vec::new(),
            routes: Vec::new(),
            fallback: None,
            restrictions: Vec::new(),
            tags: Vec::new(),
            http_filters: FilterPipeline::default(),
            message_filters: FilterPipeline::default(),
            operation_request_filters: Vec::new(),
            operation_response_filters: Vec::new(),
            hooks: Arc::new(DefaultHooks),
            type_hooks: HashMap::new(),
            request_logger: None,
            producer: None,
            content_types: ContentTypes::new(),
        }
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing container for services and their dependencies.
    pub fn container(mut self, container: Container) -> Self {
        self.container = container;
        self
    }

    /// Create service instances with `factory` instead of the container.
    pub fn type_factory(mut self, factory: Arc<dyn TypeFactory>) -> Self {
        self.type_factory = Some(factory);
        self
    }

    pub fn service(mut self, service: impl Into<ServiceDefinition>) -> Self {
        self.services.push(service.into());
        self
    }

    /// Add a route for `Req`. `verbs` is a comma-separated list, `None`
    /// for every verb.
    pub fn route<Req: RequestDto>(mut self, path: &str, verbs: Option<&str>) -> Self {
        self.routes.push(RouteDecl::new::<Req>(path, verbs));
        self
    }

    /// Like [`route`](Self::route) with a summary for metadata listings.
    pub fn route_with_summary<Req: RequestDto>(
        mut self,
        path: &str,
        verbs: Option<&str>,
        summary: impl Into<String>,
    ) -> Self {
        let mut decl = RouteDecl::new::<Req>(path, verbs);
        decl.summary = Some(summary.into());
        self.routes.push(decl);
        self
    }

    /// The route tried when nothing else matches. Its template may be
    /// free of literals, e.g. `/{Path*}`.
    pub fn fallback_route<Req: RequestDto>(mut self, path: &str, verbs: Option<&str>) -> Self {
        self.fallback = Some(RouteDecl::new::<Req>(path, verbs));
        self
    }

    /// Restrict `Req`, overriding any restriction from its service.
    pub fn restrict<Req: RequestDto>(mut self, restriction: Restriction) -> Self {
        self.restrictions.push((TypeId::of::<Req>(), restriction));
        self
    }

    pub fn tag<Req: RequestDto>(mut self, tag: impl Into<String>) -> Self {
        self.tags.push((TypeId::of::<Req>(), tag.into()));
        self
    }

    /// Runs for every HTTP and in-process request.
    pub fn request_filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.http_filters.request.push(filter);
        self
    }

    pub fn response_filter(mut self, filter: Arc<dyn ResponseFilter>) -> Self {
        self.http_filters.response.push(filter);
        self
    }

    /// Runs for every request delivered by a message queue.
    pub fn message_request_filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.message_filters.request.push(filter);
        self
    }

    pub fn message_response_filter(mut self, filter: Arc<dyn ResponseFilter>) -> Self {
        self.message_filters.response.push(filter);
        self
    }

    /// Runs only for `Req`, on every channel.
    pub fn operation_request_filter<Req: RequestDto>(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.operation_request_filters.push((TypeId::of::<Req>(), filter));
        self
    }

    pub fn operation_response_filter<Req: RequestDto>(mut self, filter: Arc<dyn ResponseFilter>) -> Self {
        self.operation_response_filters.push((TypeId::of::<Req>(), filter));
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Hooks used only for `Req`.
    pub fn hooks_for<Req: RequestDto>(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.type_hooks.insert(TypeId::of::<Req>(), hooks);
        self
    }

    pub fn request_logger(mut self, logger: Arc<dyn RequestLogger>) -> Self {
        self.request_logger = Some(logger);
        self
    }

    /// Publish one-way requests here instead of executing them inline.
    pub fn message_producer(mut self, producer: Arc<dyn MessageProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn content_serializer(mut self, serializer: Arc<dyn ContentSerializer>) -> Self {
        self.content_types.register(serializer);
        self
    }

    /// Validate every registration and build the host. Any ambiguity or
    /// invalid route aborts init.
    pub fn init(self) -> Result<ServiceHost> {
        self.build().inspect_err(|e| error!(error = %e, "service host init failed"))
    }

    fn build(self) -> Result<ServiceHost> {
        let Self {
            config,
            container,
            type_factory,
            services,
            routes: route_decls,
            fallback,
            restrictions,
            tags,
            http_filters,
            message_filters,
            operation_request_filters,
            operation_response_filters,
            hooks,
            type_hooks,
            request_logger,
            producer,
            mut content_types,
        } = self;

        let mut registry = OperationRegistry::with_access_restrictions(config.enable_access_restrictions);
        let mut routes = RouteTable::with_strict_validation(config.strict_route_validation);
        let mut exec = ServiceExec::new();
        let mut service_types = HashSet::new();

        for mut service in services {
            register_service(&mut service, &container, &mut registry, &mut routes, &mut exec, &mut service_types)?;
        }

        for (request_type, restriction) in restrictions {
            registry.set_restriction(request_type, restriction)?;
        }
        for (request_type, tag) in tags {
            registry.add_tag(request_type, tag)?;
        }
        for (request_type, filter) in operation_request_filters {
            registry.add_request_filter(request_type, filter)?;
        }
        for (request_type, filter) in operation_response_filters {
            registry.add_response_filter(request_type, filter)?;
        }

        let mut declared = Vec::with_capacity(route_decls.len());
        for decl in &route_decls {
            declared.push(routes.register(decl.parse(&registry)?)?);
        }
        if let Some(decl) = &fallback {
            declared.push(routes.set_fallback(decl.parse(&registry)?)?);
        }
        registry.after_init(&declared);

        content_types.set_default(config.default_content_type.clone());
        content_types.default_serializer()?;

        let request_log = match (&request_logger, config.request_logging.enabled) {
            (None, true) => Some(Arc::new(InMemoryRequestLogger::new(config.request_logging.capacity))),
            _ => None,
        };
        let logger = request_logger.or_else(|| {
            request_log
                .clone()
                .map(|log| log as Arc<dyn RequestLogger>)
        });
        let runner = |hooks: Arc<dyn ExecutionHooks>| {
            ExecutionRunner::new(hooks)
                .with_logger(logger.clone())
                .with_producer(producer.clone())
                .with_debug_mode(config.debug_mode)
        };

        let factory: Arc<dyn TypeFactory> = match type_factory {
            Some(factory) => factory,
            None => Arc::new(container.clone()),
        };

        info!(
            operations = registry.len(),
            routes = routes.len(),
            "service host initialized"
        );

        let dispatcher = Dispatcher::new(DispatcherParts {
            registry,
            routes,
            exec,
            factory,
            runner: runner(hooks),
            type_runners: type_hooks
                .into_iter()
                .map(|(id, hooks)| (id, runner(hooks)))
                .collect(),
            http_filters,
            message_filters,
        });

        Ok(ServiceHost {
            dispatcher: Arc::new(dispatcher),
            content_types,
            container,
            request_log,
            config,
        })
    }
}

impl Default for ServiceHostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn register_service(
    service: &mut ServiceDefinition,
    container: &Container,
    registry: &mut OperationRegistry,
    routes: &mut RouteTable,
    exec: &mut ServiceExec,
    service_types: &mut HashSet<TypeId>,
) -> Result<()> {
    if let Some(e) = service.errors.drain(..).next() {
        return Err(e);
    }
    if !service_types.insert(service.service_type.id()) {
        return Err(Error::AmbiguousRegistration(format!(
            "service {} is registered twice",
            service.service_type
        )));
    }
    if service.actions.is_empty() {
        return Err(Error::Configuration(format!(
            "service {} declares no actions",
            service.service_type
        )));
    }
    if let Some(install) = service.install.take() {
        install(container);
    }

    for entry in &service.actions {
        let id = entry.request_type.id();
        let response_type = (!entry.response_type.is::<()>()).then(|| entry.response_type.clone());

        let existing = registry
            .get_operation(id)
            .map(|op| (op.service_type().clone(), op.response_type().cloned()));
        match existing {
            Some((service_type, existing_response)) if service_type == service.service_type => {
                if existing_response != response_type {
                    return Err(Error::AmbiguousRegistration(format!(
                        "actions of {} for {} return different response types",
                        service.service_type,
                        entry.request_type.name()
                    )));
                }
            }
            _ => {
                registry.register(Arc::clone(&entry.request_type), service.service_type.clone(), response_type)?;
                if let Some(restriction) = &service.restrict_to {
                    registry.set_restriction(id, restriction.clone())?;
                }
            }
        }

        registry.add_action(id, entry.handle.key().verb_name())?;
        exec.add(&entry.request_type, entry.handle.clone())?;
    }

    let lookup = |id: TypeId| {
        service
            .actions
            .iter()
            .find(|entry| entry.request_type.id() == id)
            .map(|entry| Arc::clone(&entry.request_type))
    };
    for pattern in parse_routes(service, lookup)? {
        let route = routes.register(pattern)?;
        registry.attach_route(route);
    }

    for (request_type, filter) in service.request_filters.drain(..) {
        registry.add_request_filter(request_type, filter)?;
    }
    for (request_type, filter) in service.response_filters.drain(..) {
        registry.add_response_filter(request_type, filter)?;
    }

    debug!(service = %service.service_type, actions = service.actions.len(), "registered service");
    Ok(())
}

/// An initialized host. Cheap to share behind an `Arc`; all state is
/// read-only after init.
pub struct ServiceHost {
    dispatcher: Arc<Dispatcher>,
    content_types: ContentTypes,
    container: Container,
    request_log: Option<Arc<InMemoryRequestLogger>>,
    config: HostConfig,
}

impl ServiceHost {
    pub fn builder() -> ServiceHostBuilder {
        ServiceHostBuilder::new()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Install the global `tracing` subscriber described by the `logging`
    /// section of the host's config. Keep the guard for the life of the
    /// process; dropping it flushes and stops the writer.
    pub fn install_logging(&self) -> Result<WorkerGuard> {
        let guard = self.config.logging.install()?;
        info!(
            operations = self.registry().get_all_operations().len(),
            format = ?self.config.logging.format,
            "service host logging installed"
        );
        Ok(guard)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &OperationRegistry {
        self.dispatcher.registry()
    }

    pub fn routes(&self) -> &RouteTable {
        self.dispatcher.routes()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn content_types(&self) -> &ContentTypes {
        &self.content_types
    }

    /// The in-memory request log, when enabled through config.
    pub fn request_log(&self) -> Option<&Arc<InMemoryRequestLogger>> {
        self.request_log.as_ref()
    }

    /// Execute a request in process.
    pub async fn execute(&self, request: impl Dto) -> Response {
        self.dispatcher.execute(Box::new(request), None).await
    }

    pub async fn execute_message(&self, message: Message) -> Response {
        self.dispatcher.execute_message(message).await
    }

    /// Route, bind, dispatch and serialize one transport request.
    pub async fn handle(&self, ctx: RequestContext) -> HttpResponse {
        let ctx = Arc::new(ctx);
        let response = self.process(&ctx).await;
        self.write(&ctx, response)
    }

    async fn process(&self, ctx: &Arc<RequestContext>) -> Response {
        let (verb, path_info) = (ctx.verb(), ctx.path_info());
        let route = match self
            .routes()
            .find_match(verb, path_info)
            .into_result(verb, path_info)
        {
            Ok(route) => route,
            Err(e) => return self.dispatcher.runner().reject(ctx, None, e).await,
        };

        match self.bind(&route, ctx) {
            Ok(request) => self.dispatcher.execute(request, Some(Arc::clone(ctx))).await,
            Err(e) => {
                self.dispatcher
                    .runner_for(route.request_type().id())
                    .reject(ctx, None, e)
                    .await
            }
        }
    }

    /// Build the request DTO. Later layers win: body, path variables, query
    /// string, form fields.
    fn bind(&self, route: &RoutePattern, ctx: &RequestContext) -> Result<Box<dyn Dto>> {
        let mut values = route.capture(ctx.path_info())?;
        values.extend(ctx.query().iter().cloned());
        values.extend(ctx.form().iter().cloned());

        let body = ctx.body();
        if body.is_empty() {
            return route.request_type().populate(&values);
        }

        let content_type = ctx
            .content_type()
            .unwrap_or(self.config.default_content_type.as_str());
        let serializer = self.content_types.get(content_type).ok_or_else(|| {
            Error::http(
                415,
                "UnsupportedMediaType",
                format!("no serializer for content type {}", content_type),
            )
        })?;
        serializer.deserialize(body, route.request_type(), &values)
    }

    fn write(&self, ctx: &RequestContext, response: Response) -> HttpResponse {
        let status = ctx.response().status().unwrap_or_else(|| response.status_code());
        let mut http = HttpResponse::new(status).with_header("X-Request-Id", ctx.request_id());
        for (name, value) in ctx.response().headers() {
            http = http.with_header(name, value);
        }

        let serializer = match self.content_types.negotiate(ctx) {
            Ok(serializer) => serializer,
            Err(e) => return internal_error(http, &e),
        };
        let body = match &response {
            Response::Empty => return http,
            Response::Dto(dto) => serializer
                .serialize(ctx, &**dto)
                .map(|bytes| (serializer.content_type().to_string(), bytes)),
            Response::Fault(fault) => serde_json::to_value(fault.envelope())
                .map_err(Error::from)
                .and_then(|value| serializer.serialize_value(ctx, &value))
                .map(|bytes| (serializer.content_type().to_string(), bytes))
                .or_else(|_| {
                    // Faults always have a JSON rendering
                    serde_json::to_vec(&fault.envelope())
                        .map(|bytes| (JSON.to_string(), bytes))
                        .map_err(Error::from)
                }),
        };

        match body {
            Ok((content_type, bytes)) => http.with_header("Content-Type", content_type).with_body(bytes),
            Err(e) => internal_error(http, &e),
        }
    }
}

fn internal_error(mut http: HttpResponse, error: &Error) -> HttpResponse {
    error!(error = %error, "failed to write response");
    http.status = 500;
    let fault = ErrorResponse::from_error(&Error::Internal(error.to_string()), false);
    match serde_json::to_vec(&fault.envelope()) {
        Ok(bytes) => http
            .with_header("Content-Type", JSON)
            .with_body(bytes),
        Err(_) => http,
    }
}

impl std::fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHost")
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config)
            .finish()
    }
}
