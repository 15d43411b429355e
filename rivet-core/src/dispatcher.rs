//! Request dispatch.
//!
//! The [`Dispatcher`] takes a request DTO and a context and drives it to a
//! [`Response`]:
//!
//! 1. resolve the operation for the DTO's type
//! 2. enforce the operation's access restriction
//! 3. lease a service instance from the type factory
//! 4. hand the instance the request context
//! 5. select the action for the verb (and one-way flag)
//! 6. run it through the [`ExecutionRunner`] for the request type
//!
//! Failures at any step come back as a [`Response::Fault`]; nothing escapes
//! as an `Err`.

use crate::container::TypeFactory;
use crate::logging::{debug, trace};
use crate::messaging::Message;
use crate::operation::OperationRegistry;
use crate::route_table::RouteTable;
use crate::runner::{ExecutionRunner, FilterPipeline};
use crate::service::{ActionKey, ServiceExec, ServiceLease};
use crate::{Dto, EndpointAttributes, Error, HttpMethod, RequestContext, Response, Result};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Request item holding the index of the batch entry being executed.
pub const AUTO_BATCH_INDEX: &str = "AutoBatchIndex";

/// Response header carrying how many batch entries completed.
pub const AUTO_BATCH_COMPLETED_HEADER: &str = "X-AutoBatch-Completed";

/// Request item holding the id of the message being executed.
pub const MESSAGE_ID_ITEM: &str = "__message_id";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Channel {
    Http,
    Message,
}

/// Everything a dispatcher needs, assembled by the host at init.
pub(crate) struct DispatcherParts {
    pub registry: OperationRegistry,
    pub routes: RouteTable,
    pub exec: ServiceExec,
    pub factory: Arc<dyn TypeFactory>,
    pub runner: ExecutionRunner,
    pub type_runners: HashMap<TypeId, ExecutionRunner>,
    pub http_filters: FilterPipeline,
    pub message_filters: FilterPipeline,
}

pub struct Dispatcher {
    registry: OperationRegistry,
    routes: RouteTable,
    exec: ServiceExec,
    factory: Arc<dyn TypeFactory>,
    runner: Arc<ExecutionRunner>,
    type_runners: HashMap<TypeId, Arc<ExecutionRunner>>,
    http_filters: FilterPipeline,
    message_filters: FilterPipeline,
    http_pipelines: HashMap<TypeId, FilterPipeline>,
    message_pipelines: HashMap<TypeId, FilterPipeline>,
}

impl Dispatcher {
    pub(crate) fn new(parts: DispatcherParts) -> Self {
        let mut http_pipelines = HashMap::new();
        let mut message_pipelines = HashMap::new();
        for operation in parts.registry.get_all_operations() {
            let id = operation.request_type().id();
            http_pipelines.insert(
                id,
                FilterPipeline::merged(
                    &parts.http_filters.request,
                    &parts.http_filters.response,
                    operation.request_filters(),
                    operation.response_filters(),
                ),
            );
            message_pipelines.insert(
                id,
                FilterPipeline::merged(
                    &parts.message_filters.request,
                    &parts.message_filters.response,
                    operation.request_filters(),
                    operation.response_filters(),
                ),
            );
        }

        Self {
            registry: parts.registry,
            routes: parts.routes,
            exec: parts.exec,
            factory: parts.factory,
            runner: Arc::new(parts.runner),
            type_runners: parts
                .type_runners
                .into_iter()
                .map(|(id, runner)| (id, Arc::new(runner)))
                .collect(),
            http_filters: parts.http_filters,
            message_filters: parts.message_filters,
            http_pipelines,
            message_pipelines,
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Whether some service handles `request_type`.
    pub fn has_service(&self, request_type: TypeId) -> bool {
        self.registry.has_operation(request_type) && self.exec.has_actions_for(request_type)
    }

    /// Runner used for request types without their own hooks.
    pub fn runner(&self) -> &Arc<ExecutionRunner> {
        &self.runner
    }

    /// Runner used for `request_type`.
    pub fn runner_for(&self, request_type: TypeId) -> &Arc<ExecutionRunner> {
        self.type_runners.get(&request_type).unwrap_or(&self.runner)
    }

    /// Execute `request`. Without a context the call is treated as an
    /// in-process POST.
    pub async fn execute(&self, request: Box<dyn Dto>, ctx: Option<Arc<RequestContext>>) -> Response {
        let ctx = ctx.unwrap_or_else(|| Arc::new(RequestContext::basic()));
        self.dispatch(request, ctx, Channel::Http).await
    }

    /// Execute a request delivered by a message queue. Message filters run
    /// in place of the HTTP ones.
    pub async fn execute_message(&self, message: Message) -> Response {
        let ctx = RequestContext::message();
        ctx.set_item(MESSAGE_ID_ITEM, message.id);
        if let Some(reply_to) = &message.reply_to {
            ctx.set_item("ReplyTo", reply_to.clone());
        }
        debug!(id = %message.id, "executing message");
        self.dispatch(message.body, Arc::new(ctx), Channel::Message).await
    }

    /// Execute requests in order on one context, stopping at the first
    /// fault or at the first request a filter closes. A fault carries the
    /// failing index in its `AutoBatchIndex` meta entry, and the context's
    /// response gets an `X-AutoBatch-Completed` header with the number of
    /// requests whose action completed.
    pub async fn execute_batch(
        &self,
        requests: Vec<Box<dyn Dto>>,
        ctx: Option<Arc<RequestContext>>,
    ) -> Vec<Response> {
        let ctx = ctx.unwrap_or_else(|| Arc::new(RequestContext::basic()));
        let mut responses = Vec::with_capacity(requests.len());
        let mut completed = 0usize;

        for (index, request) in requests.into_iter().enumerate() {
            ctx.set_item(AUTO_BATCH_INDEX, index);
            match self.dispatch(request, Arc::clone(&ctx), Channel::Http).await {
                Response::Fault(fault) => {
                    debug!(index, error_code = %fault.error_code, "batch stopped at fault");
                    responses.push(Response::Fault(
                        fault.with_meta(AUTO_BATCH_INDEX, index.to_string()),
                    ));
                    break;
                }
                // A closed response ends the whole request
                response if ctx.response().is_closed() => {
                    debug!(index, "batch stopped at closed response");
                    responses.push(response);
                    break;
                }
                response => {
                    completed += 1;
                    responses.push(response);
                }
            }
        }

        ctx.remove_item(AUTO_BATCH_INDEX);
        ctx.response()
            .add_header(AUTO_BATCH_COMPLETED_HEADER, completed.to_string());
        responses
    }

    /// Route `verb path_info` through the route table and execute the
    /// resulting request. The context's query string, then its form data,
    /// override captured path values.
    pub async fn execute_path(
        &self,
        verb: &str,
        path_info: &str,
        ctx: Option<Arc<RequestContext>>,
    ) -> Response {
        let ctx = ctx.unwrap_or_else(|| {
            let method = HttpMethod::from_str(verb).unwrap_or(HttpMethod::GET);
            Arc::new(RequestContext::in_process(method).with_path(path_info))
        });

        let route = match self.routes.find_match(verb, path_info).into_result(verb, path_info) {
            Ok(route) => route,
            Err(e) => return self.runner.reject(&ctx, None, e).await,
        };
        trace!(verb, path_info, route = route.path(), "executing path");

        let overrides: Vec<(String, String)> = ctx.query().iter().chain(ctx.form()).cloned().collect();
        match route.create_request(path_info, &overrides) {
            Ok(request) => self.dispatch(request, ctx, Channel::Http).await,
            Err(e) => {
                self.runner_for(route.request_type().id())
                    .reject(&ctx, None, e)
                    .await
            }
        }
    }

    /// Execute in process and take the typed response, turning a fault into
    /// an [`Error::Http`].
    pub async fn call<Res: Any>(&self, request: impl Dto) -> Result<Res> {
        match self.execute(Box::new(request), None).await {
            Response::Dto(dto) => dto.downcast::<Res>().map(|res| *res).map_err(|other| {
                Error::Internal(format!(
                    "expected {} response, got {}",
                    std::any::type_name::<Res>(),
                    other.type_name()
                ))
            }),
            Response::Empty => Err(Error::Internal(format!(
                "expected {} response, got none",
                std::any::type_name::<Res>()
            ))),
            Response::Fault(fault) => Err(Error::Http {
                status: fault.status,
                code: fault.error_code,
                message: fault.message,
            }),
        }
    }

    async fn dispatch(&self, request: Box<dyn Dto>, ctx: Arc<RequestContext>, channel: Channel) -> Response {
        let info = request.type_info();
        ctx.set_operation_name(info.name());
        let runner = self.runner_for(info.id());

        let Some(operation) = self.registry.get_operation(info.id()) else {
            let error = Error::NotImplemented(format!("Unable to resolve service '{}'", info.name()));
            return runner.reject(&ctx, Some(&*request), error).await;
        };

        if let Err(e) = self.registry.assert_allowed(info.id(), ctx.attributes()) {
            return runner.reject(&ctx, Some(&*request), e).await;
        }

        let lease = match ServiceLease::acquire(Arc::clone(&self.factory), operation.service_type(), &ctx) {
            Ok(lease) => lease,
            Err(e) => return runner.reject(&ctx, Some(&*request), e).await,
        };
        let Some(instance) = lease.instance() else {
            let error = Error::Internal(format!("no instance of {}", operation.service_type()));
            return runner.reject(&ctx, Some(&*request), error).await;
        };
        self.exec.inject(operation.service_type(), &instance, &ctx);

        let one_way = ctx.attributes().contains(EndpointAttributes::ONE_WAY);
        let requested = ActionKey {
            verb: ctx.method(),
            one_way,
        };
        let Some(action) = self.exec.select(info.id(), requested) else {
            let error = Error::NotImplemented(format!(
                "Could not find action {}({}) or Any({}) on service {}",
                requested.verb_name(),
                info.name(),
                info.name(),
                operation.service_type()
            ));
            return runner.reject(&ctx, Some(&*request), error).await;
        };

        let filters = self.pipeline(info.id(), channel);
        let response = if one_way {
            runner.execute_one_way(&ctx, request, action, instance, filters).await
        } else {
            runner.execute(&ctx, request, action, instance, filters).await
        };
        drop(lease);
        response
    }

    fn pipeline(&self, request_type: TypeId, channel: Channel) -> &FilterPipeline {
        let (pipelines, global) = match channel {
            Channel::Http => (&self.http_pipelines, &self.http_filters),
            Channel::Message => (&self.message_pipelines, &self.message_filters),
        };
        pipelines.get(&request_type).unwrap_or(global)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("routes", &self.routes.len())
            .field("type_runners", &self.type_runners.len())
            .finish()
    }
}
