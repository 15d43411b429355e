//! Integration tests for common rivet workflows.
//!
//! These go through the umbrella crate the way an application would.

use async_trait::async_trait;
use rivet::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateTodo {
    title: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetTodo {
    id: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct Todo {
    id: u64,
    title: String,
}

#[derive(Default)]
struct TodoStore {
    todos: Mutex<Vec<Todo>>,
}

impl TodoStore {
    fn add(&self, title: String) -> Todo {
        let mut todos = self.todos.lock().unwrap();
        let todo = Todo {
            id: todos.len() as u64 + 1,
            title,
        };
        todos.push(todo.clone());
        todo
    }

    fn get(&self, id: u64) -> Option<Todo> {
        self.todos.lock().unwrap().iter().find(|t| t.id == id).cloned()
    }
}

struct TodoService {
    store: Arc<TodoStore>,
}

impl Service for TodoService {}

impl TodoService {
    fn create(&self, request: CreateTodo) -> Result<Todo> {
        if request.title.is_empty() {
            return Err(Error::BadRequest("Title is required".into()));
        }
        Ok(self.store.add(request.title))
    }

    fn get(&self, request: GetTodo) -> Result<Todo> {
        self.store
            .get(request.id)
            .ok_or_else(|| Error::NotFound(format!("todo {}", request.id)))
    }
}

fn todo_service() -> ServiceRegistration<TodoService> {
    ServiceRegistration::<TodoService>::transient(|container| {
        Ok(TodoService {
            store: container.resolve::<TodoStore>()?,
        })
    })
    .post(|svc: Arc<TodoService>, req: CreateTodo, _ctx| async move { svc.create(req) })
    .get(|svc: Arc<TodoService>, req: GetTodo, _ctx| async move { svc.get(req) })
    .route::<CreateTodo>("/todos", Some("POST"))
    .route::<GetTodo>("/todos/{Id}", Some("GET"))
}

fn host() -> ServiceHost {
    let container = Container::new();
    container.register(TodoStore::default());
    ServiceHost::builder()
        .container(container)
        .service(todo_service())
        .init()
        .unwrap()
}

#[tokio::test]
async fn test_create_then_fetch_over_http() {
    let host = host();

    let ctx = RequestContext::new("POST", "/todos")
        .with_json_body(&serde_json::json!({ "Title": "write tests" }))
        .unwrap();
    let response = host.handle(ctx).await;
    assert_eq!(response.status, 200);
    let created: Todo = response.json().unwrap();
    assert_eq!(created.id, 1);

    let response = host.handle(RequestContext::new("GET", "/todos/1")).await;
    assert_eq!(response.json::<Todo>().unwrap(), created);

    let response = host.handle(RequestContext::new("GET", "/todos/7")).await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_validation_fault_over_http() {
    let host = host();
    let ctx = RequestContext::new("POST", "/todos").with_form("Title", "");
    let response = host.handle(ctx).await;

    assert_eq!(response.status, 400);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["responseStatus"]["errorCode"], "BadRequest");
    assert_eq!(body["responseStatus"]["message"], "Title is required");
}

#[tokio::test]
async fn test_typed_in_process_call() {
    let host = host();
    let dispatcher = host.dispatcher();

    let created: Todo = dispatcher
        .call(CreateTodo {
            title: "in process".into(),
        })
        .await
        .unwrap();
    assert_eq!(created.title, "in process");

    // In-process calls are POST, and GetTodo only answers GET
    let result = dispatcher.call::<Todo>(GetTodo { id: created.id }).await;
    assert!(matches!(result, Err(Error::Http { status: 501, .. })));
}

#[tokio::test]
async fn test_metadata_listing() {
    let host = host();
    let registry = host.registry();

    assert_eq!(registry.get_all_operation_names(), vec!["CreateTodo", "GetTodo"]);
    let operation = registry.resolve_operation_by_name("gettodo").unwrap();
    assert_eq!(operation.method(), "GET");
    assert_eq!(operation.routes().len(), 1);
    assert_eq!(
        registry
            .resolve_response_type_for_request(std::any::TypeId::of::<GetTodo>())
            .map(|t| t.name().to_string()),
        Some("Todo".to_string())
    );
}

struct CountingHooks {
    before: AtomicUsize,
    faults: AtomicUsize,
}

#[async_trait]
impl ExecutionHooks for CountingHooks {
    async fn before_each(&self, _ctx: &Arc<RequestContext>, _request: &dyn Dto) -> Result<()> {
        self.before.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_exception(
        &self,
        _ctx: &Arc<RequestContext>,
        _error: &Error,
        fault: ErrorResponse,
    ) -> ErrorResponse {
        self.faults.fetch_add(1, Ordering::SeqCst);
        fault.with_meta("handled", "true")
    }
}

#[tokio::test]
async fn test_custom_hooks() {
    let hooks = Arc::new(CountingHooks {
        before: AtomicUsize::new(0),
        faults: AtomicUsize::new(0),
    });
    let container = Container::new();
    container.register(TodoStore::default());
    let host = ServiceHost::builder()
        .container(container)
        .service(todo_service())
        .hooks(hooks.clone())
        .init()
        .unwrap();

    host.handle(RequestContext::new("GET", "/todos/1")).await;
    let response = host
        .execute(CreateTodo {
            title: "ok".into(),
        })
        .await;

    assert!(!response.is_fault());
    assert_eq!(hooks.before.load(Ordering::SeqCst), 2);
    assert_eq!(hooks.faults.load(Ordering::SeqCst), 1);
}

#[cfg(feature = "config")]
#[test]
fn test_host_from_layered_config() {
    let manager = ConfigManager::new();
    manager.load_defaults::<HostConfig>().unwrap();
    manager
        .load_env_from([("RIVET_REQUEST_LOGGING__ENABLED", "true")])
        .unwrap();
    let config: HostConfig = manager.load_validated().unwrap();

    let host = ServiceHost::builder()
        .config(config)
        .service(todo_service())
        .init()
        .unwrap();
    assert!(host.request_log().is_some());
}
