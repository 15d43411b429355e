//! Execution of a single action with its hooks, filters and logging.

use crate::container::Instance;
use crate::filter::{FilterChain, RequestFilter, ResponseFilter};
use crate::logging::{debug, error, info, warn};
use crate::messaging::{Message, MessageProducer};
use crate::service::ActionHandle;
use crate::{Dto, Error, ErrorResponse, RequestContext, Response, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Request item holding the [`Instant`] execution started.
pub const REQUEST_START_ITEM: &str = "__request_start";

/// Points where application code can observe or alter execution.
#[async_trait]
pub trait ExecutionHooks: Send + Sync {
    /// Runs before the request filters. An error becomes the response.
    async fn before_each(&self, _ctx: &Arc<RequestContext>, _request: &dyn Dto) -> Result<()> {
        Ok(())
    }

    /// Runs with every response, faults included.
    async fn after_each(&self, _ctx: &Arc<RequestContext>, _response: &Response) {}

    /// Runs with successful responses and may replace them.
    async fn on_after_execute(&self, _ctx: &Arc<RequestContext>, response: Response) -> Result<Response> {
        Ok(response)
    }

    /// Shapes the fault sent for `error`.
    async fn handle_exception(
        &self,
        _ctx: &Arc<RequestContext>,
        _error: &Error,
        fault: ErrorResponse,
    ) -> ErrorResponse {
        fault
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ExecutionHooks for DefaultHooks {}

/// The filter chains one operation runs through.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    pub request: FilterChain<dyn RequestFilter>,
    pub response: FilterChain<dyn ResponseFilter>,
}

impl FilterPipeline {
    pub fn merged(
        global_request: &FilterChain<dyn RequestFilter>,
        global_response: &FilterChain<dyn ResponseFilter>,
        operation_request: &FilterChain<dyn RequestFilter>,
        operation_response: &FilterChain<dyn ResponseFilter>,
    ) -> Self {
        Self {
            request: FilterChain::<dyn RequestFilter>::merged(global_request, operation_request),
            response: FilterChain::<dyn ResponseFilter>::merged(global_response, operation_response),
        }
    }
}

/// One completed request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: Option<String>,
    pub verb: String,
    pub path_info: String,
    pub status: u16,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
}

/// Receives an entry for every request the runner completes.
pub trait RequestLogger: Send + Sync {
    fn log(&self, entry: RequestLogEntry);
}

/// Emits each entry as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRequestLogger;

impl RequestLogger for TracingRequestLogger {
    fn log(&self, entry: RequestLogEntry) {
        info!(
            request_id = %entry.id,
            operation = entry.operation.as_deref().unwrap_or("-"),
            verb = %entry.verb,
            path = %entry.path_info,
            status = entry.status,
            elapsed_ms = entry.elapsed_ms,
            error_code = entry.error_code.as_deref(),
            "request completed"
        );
    }
}

/// Keeps the most recent entries in memory.
pub struct InMemoryRequestLogger {
    capacity: usize,
    entries: Mutex<VecDeque<RequestLogEntry>>,
}

impl InMemoryRequestLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<RequestLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl RequestLogger for InMemoryRequestLogger {
    fn log(&self, entry: RequestLogEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}

/// Runs one action: hooks, filters, invocation, fault handling and logging.
pub struct ExecutionRunner {
    hooks: Arc<dyn ExecutionHooks>,
    logger: Option<Arc<dyn RequestLogger>>,
    producer: Option<Arc<dyn MessageProducer>>,
    debug_mode: bool,
}

impl ExecutionRunner {
    pub fn new(hooks: Arc<dyn ExecutionHooks>) -> Self {
        Self {
            hooks,
            logger: None,
            producer: None,
            debug_mode: false,
        }
    }

    pub fn with_logger(mut self, logger: Option<Arc<dyn RequestLogger>>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_producer(mut self, producer: Option<Arc<dyn MessageProducer>>) -> Self {
        self.producer = producer;
        self
    }

    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Execute synchronously and return the response or fault.
    pub async fn execute(
        &self,
        ctx: &Arc<RequestContext>,
        request: Box<dyn Dto>,
        action: &ActionHandle,
        instance: Instance,
        filters: &FilterPipeline,
    ) -> Response {
        let started = self.start(ctx);
        let snapshot = self.snapshot(&*request);

        let response = match self.invoke(ctx, request, action, instance, filters).await {
            Ok(response) => {
                let response = self.after_each(ctx, response).await;
                self.filter_response(ctx, response, filters).await
            }
            Err(e) => self.handle_exception(ctx, e).await,
        };

        self.log(ctx, snapshot, &response, started);
        response
    }

    /// Execute a one-way call. With a message producer the request is
    /// published and nothing is returned; without one it runs inline.
    pub async fn execute_one_way(
        &self,
        ctx: &Arc<RequestContext>,
        request: Box<dyn Dto>,
        action: &ActionHandle,
        instance: Instance,
        filters: &FilterPipeline,
    ) -> Response {
        let Some(producer) = &self.producer else {
            debug!("no message producer, executing one-way request inline");
            return self.execute(ctx, request, action, instance, filters).await;
        };

        let started = self.start(ctx);
        let snapshot = self.snapshot(&*request);
        let response = match self.publish(ctx, request, producer.as_ref(), filters).await {
            Ok(response) => response,
            Err(e) => self.handle_exception(ctx, e).await,
        };
        self.log(ctx, snapshot, &response, started);
        response
    }

    /// Turn `error` into a fault, letting the hooks shape it.
    pub async fn handle_exception(&self, ctx: &Arc<RequestContext>, error: Error) -> Response {
        let operation = ctx.operation_name();
        if error.is_server_error() {
            error!(
                request_id = ctx.request_id(),
                operation = operation.as_deref(),
                error = %error,
                "request failed"
            );
        } else {
            warn!(
                request_id = ctx.request_id(),
                operation = operation.as_deref(),
                error_code = %error.error_code(),
                "request rejected"
            );
        }

        let fault = ErrorResponse::from_error(&error, self.debug_mode).with_request_id(ctx.request_id());
        let fault = self.hooks.handle_exception(ctx, &error, fault).await;
        let response = Response::Fault(fault);
        self.hooks.after_each(ctx, &response).await;
        response
    }

    /// Fault for a request that never reached an action. Logged like any
    /// other request.
    pub async fn reject(&self, ctx: &Arc<RequestContext>, request: Option<&dyn Dto>, error: Error) -> Response {
        let started = self.start(ctx);
        let snapshot = request.and_then(|request| self.snapshot(request));
        let response = self.handle_exception(ctx, error).await;
        self.log(ctx, snapshot, &response, started);
        response
    }

    async fn invoke(
        &self,
        ctx: &Arc<RequestContext>,
        request: Box<dyn Dto>,
        action: &ActionHandle,
        instance: Instance,
        filters: &FilterPipeline,
    ) -> Result<Response> {
        self.hooks.before_each(ctx, &*request).await?;

        if filters.request.apply(ctx, &*request).await? {
            debug!(request_id = ctx.request_id(), "request closed by filter");
            return Ok(closed_response(ctx));
        }

        let dto = action.invoke(instance, request, Arc::clone(ctx)).await?;
        Ok(Response::from_dto(dto))
    }

    async fn publish(
        &self,
        ctx: &Arc<RequestContext>,
        request: Box<dyn Dto>,
        producer: &dyn MessageProducer,
        filters: &FilterPipeline,
    ) -> Result<Response> {
        self.hooks.before_each(ctx, &*request).await?;
        if filters.request.apply(ctx, &*request).await? {
            return Ok(closed_response(ctx));
        }
        producer.publish(Message::new(request)).await?;
        Ok(Response::Empty)
    }

    async fn after_each(&self, ctx: &Arc<RequestContext>, response: Response) -> Response {
        if response.is_fault() {
            self.hooks.after_each(ctx, &response).await;
            return response;
        }
        match self.hooks.on_after_execute(ctx, response).await {
            Ok(response) => {
                self.hooks.after_each(ctx, &response).await;
                response
            }
            Err(e) => self.handle_exception(ctx, e).await,
        }
    }

    async fn filter_response(
        &self,
        ctx: &Arc<RequestContext>,
        response: Response,
        filters: &FilterPipeline,
    ) -> Response {
        // Faults bypass response filters
        if response.is_fault() || ctx.response().is_closed() {
            return response;
        }
        match filters.response.apply(ctx, &response).await {
            Ok(false) => response,
            Ok(true) => closed_response(ctx),
            Err(e) => self.handle_exception(ctx, e).await,
        }
    }

    fn start(&self, ctx: &RequestContext) -> Instant {
        let started = Instant::now();
        ctx.set_item(REQUEST_START_ITEM, started);
        started
    }

    fn snapshot(&self, request: &dyn Dto) -> Option<serde_json::Value> {
        self.logger.as_ref()?;
        request.to_value().ok()
    }

    fn log(
        &self,
        ctx: &RequestContext,
        request: Option<serde_json::Value>,
        response: &Response,
        started: Instant,
    ) {
        let Some(logger) = &self.logger else {
            return;
        };
        logger.log(RequestLogEntry {
            id: ctx.request_id().to_string(),
            timestamp: Utc::now(),
            operation: ctx.operation_name(),
            verb: ctx.verb().to_string(),
            path_info: ctx.path_info().to_string(),
            status: ctx.response().status().unwrap_or_else(|| response.status_code()),
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
            request,
            error_code: response.fault().map(|f| f.error_code.clone()),
            remote_addr: ctx.remote_addr().map(|a| a.to_string()),
        });
    }
}

impl Default for ExecutionRunner {
    fn default() -> Self {
        Self::new(Arc::new(DefaultHooks))
    }
}

/// Whatever a filter left behind when it closed the response.
fn closed_response(ctx: &RequestContext) -> Response {
    ctx.response()
        .take_dto()
        .map(Response::from_dto)
        .unwrap_or(Response::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FnRequestFilter, FnResponseFilter};
    use crate::messaging::InMemoryMessageQueue;
    use crate::service::{ActionKey, Service, ServiceDefinition, ServiceExec, ServiceRegistration};
    use serde::{Deserialize, Serialize};
    use std::any::TypeId;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    struct Calculator;

    impl Service for Calculator {}

    fn action() -> ActionHandle {
        let definition = ServiceDefinition::from(
            ServiceRegistration::<Calculator>::new()
                .any(|_, req: Add, _| async move {
                    if req.b == 0 {
                        return Err(Error::BadRequest("b must not be zero".into()));
                    }
                    Ok(req.a + req.b)
                })
                .one_way(|_, _req: Add, _| async move { Ok(()) }),
        );
        let mut exec = ServiceExec::new();
        for entry in definition.actions {
            exec.add(&entry.request_type, entry.handle).unwrap();
        }
        exec.select(TypeId::of::<Add>(), ActionKey::ANY).unwrap().clone()
    }

    fn instance() -> Instance {
        Arc::new(Calculator)
    }

    #[tokio::test]
    async fn test_execute_success_is_logged() {
        let logger = Arc::new(InMemoryRequestLogger::new(10));
        let runner = ExecutionRunner::default().with_logger(Some(logger.clone()));
        let ctx = Arc::new(RequestContext::basic());

        let response = runner
            .execute(&ctx, Box::new(Add { a: 2, b: 3 }), &action(), instance(), &FilterPipeline::default())
            .await;
        assert_eq!(response.downcast_ref::<i64>(), Some(&5));
        assert!(ctx.has_item(REQUEST_START_ITEM));

        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, 200);
        assert_eq!(entries[0].request.as_ref().unwrap()["a"], 2);
    }

    #[tokio::test]
    async fn test_service_error_becomes_fault() {
        let runner = ExecutionRunner::default();
        let ctx = Arc::new(RequestContext::basic());
        let response = runner
            .execute(&ctx, Box::new(Add { a: 1, b: 0 }), &action(), instance(), &FilterPipeline::default())
            .await;
        let fault = response.fault().unwrap();
        assert_eq!(fault.status, 400);
        assert_eq!(fault.error_code, "BadRequest");
        assert_eq!(fault.request_id.as_deref(), Some(ctx.request_id()));
    }

    struct Doubling;

    #[async_trait]
    impl ExecutionHooks for Doubling {
        async fn on_after_execute(&self, _ctx: &Arc<RequestContext>, response: Response) -> Result<Response> {
            let value = response.into_dto::<i64>().unwrap_or_default();
            Ok(Response::from_dto(Box::new(value * 2)))
        }

        async fn handle_exception(
            &self,
            _ctx: &Arc<RequestContext>,
            _error: &Error,
            fault: ErrorResponse,
        ) -> ErrorResponse {
            fault.with_meta("handled", "true")
        }
    }

    #[tokio::test]
    async fn test_hooks_transform_response_and_fault() {
        let runner = ExecutionRunner::new(Arc::new(Doubling));
        let ctx = Arc::new(RequestContext::basic());
        let response = runner
            .execute(&ctx, Box::new(Add { a: 2, b: 3 }), &action(), instance(), &FilterPipeline::default())
            .await;
        assert_eq!(response.downcast_ref::<i64>(), Some(&10));

        let ctx = Arc::new(RequestContext::basic());
        let response = runner
            .execute(&ctx, Box::new(Add { a: 2, b: 0 }), &action(), instance(), &FilterPipeline::default())
            .await;
        assert_eq!(response.fault().unwrap().meta["handled"], "true");
    }

    #[tokio::test]
    async fn test_closing_filter_skips_action() {
        let mut filters = FilterPipeline::default();
        filters.request.push(Arc::new(FnRequestFilter::new(|ctx, _| {
            ctx.response().end_with(202, Box::new("accepted".to_string()));
            Ok(())
        })));

        let runner = ExecutionRunner::default();
        let ctx = Arc::new(RequestContext::basic());
        let response = runner
            .execute(&ctx, Box::new(Add { a: 1, b: 0 }), &action(), instance(), &filters)
            .await;
        assert_eq!(response.downcast_ref::<String>().map(String::as_str), Some("accepted"));
        assert_eq!(ctx.response().status(), Some(202));
    }

    #[tokio::test]
    async fn test_response_filter_error_becomes_fault() {
        let mut filters = FilterPipeline::default();
        filters.response.push(Arc::new(FnResponseFilter::new(|_, _| {
            Err(Error::Forbidden("no".into()))
        })));
        let runner = ExecutionRunner::default();
        let ctx = Arc::new(RequestContext::basic());
        let response = runner
            .execute(&ctx, Box::new(Add { a: 1, b: 1 }), &action(), instance(), &filters)
            .await;
        assert_eq!(response.fault().unwrap().status, 403);
    }

    #[tokio::test]
    async fn test_fault_bypasses_response_filters() {
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let mut filters = FilterPipeline::default();
        filters.response.push(Arc::new(FnResponseFilter::new(move |ctx, _| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            ctx.response().close();
            Ok(())
        })));

        let runner = ExecutionRunner::default();
        let ctx = Arc::new(RequestContext::basic());
        let response = runner
            .execute(&ctx, Box::new(Add { a: 1, b: 0 }), &action(), instance(), &filters)
            .await;
        assert_eq!(response.fault().unwrap().status, 400);
        assert!(!ctx.response().is_closed());
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_way_publishes_when_producer_present() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        let runner = ExecutionRunner::default().with_producer(Some(queue.clone()));
        let ctx = Arc::new(RequestContext::basic());

        let response = runner
            .execute_one_way(&ctx, Box::new(Add { a: 1, b: 1 }), &action(), instance(), &FilterPipeline::default())
            .await;
        assert!(response.is_empty());

        let message = queue.try_receive().await.unwrap();
        assert_eq!(message.body.downcast_ref::<Add>().unwrap().a, 1);
    }

    #[tokio::test]
    async fn test_one_way_without_producer_runs_inline() {
        let runner = ExecutionRunner::default();
        let ctx = Arc::new(RequestContext::basic());
        let response = runner
            .execute_one_way(&ctx, Box::new(Add { a: 4, b: 4 }), &action(), instance(), &FilterPipeline::default())
            .await;
        assert_eq!(response.downcast_ref::<i64>(), Some(&8));
    }

    #[test]
    fn test_in_memory_logger_is_bounded() {
        let logger = InMemoryRequestLogger::new(2);
        for i in 0..3 {
            logger.log(RequestLogEntry {
                id: i.to_string(),
                timestamp: Utc::now(),
                operation: None,
                verb: "GET".into(),
                path_info: "/".into(),
                status: 200,
                elapsed_ms: 0.0,
                request: None,
                error_code: None,
                remote_addr: None,
            });
        }
        let ids: Vec<String> = logger.entries().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }
}
