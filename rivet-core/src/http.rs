// Request context and transport-level response types

use crate::logging::trace;
use crate::{Dto, EndpointAttributes, Error, HttpMethod, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::net::IpAddr;

/// Everything the core needs to know about one inbound request, plus the
/// per-request state shared by filters, hooks and the service.
///
/// A context is built by the transport adapter, wrapped in an `Arc` by the
/// dispatcher and dropped when the request completes.
#[derive(Debug)]
pub struct RequestContext {
    verb: String,
    path_info: String,
    headers: HashMap<String, String>,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
    cookies: HashMap<String, String>,
    body: Vec<u8>,
    remote_addr: Option<IpAddr>,
    attributes: EndpointAttributes,
    request_id: String,
    operation_name: Mutex<Option<String>>,
    items: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
    response: ResponseState,
}

impl RequestContext {
    /// A request received over HTTP. A query string on `path_info` is split
    /// off and parsed.
    pub fn new(verb: impl Into<String>, path_info: impl Into<String>) -> Self {
        let verb = verb.into().to_uppercase();
        let path_info = path_info.into();
        let attributes = EndpointAttributes::HTTP
            | EndpointAttributes::INSECURE
            | EndpointAttributes::from_verb_name(&verb);

        let ctx = Self::bare(verb, String::new(), attributes);
        match path_info.split_once('?') {
            Some((path, query)) => ctx.with_path(path).with_query_string(query),
            None => ctx.with_path(path_info),
        }
    }

    /// An in-process call with no transport behind it.
    pub fn basic() -> Self {
        Self::in_process(HttpMethod::POST)
    }

    pub fn in_process(verb: HttpMethod) -> Self {
        Self::bare(
            verb.as_str().to_string(),
            String::new(),
            EndpointAttributes::IN_PROCESS
                | EndpointAttributes::LOCALHOST
                | EndpointAttributes::from_verb(verb),
        )
    }

    /// A request delivered by a message queue.
    pub fn message() -> Self {
        Self::bare(
            HttpMethod::POST.as_str().to_string(),
            String::new(),
            EndpointAttributes::MESSAGE_QUEUE | EndpointAttributes::LOCAL_SUBNET,
        )
    }

    fn bare(verb: String, path_info: String, attributes: EndpointAttributes) -> Self {
        Self {
            verb,
            path_info,
            headers: HashMap::new(),
            query: Vec::new(),
            form: Vec::new(),
            cookies: HashMap::new(),
            body: Vec::new(),
            remote_addr: None,
            attributes,
            request_id: uuid::Uuid::new_v4().to_string(),
            operation_name: Mutex::new(None),
            items: Mutex::new(HashMap::new()),
            response: ResponseState::default(),
        }
    }

    pub fn with_path(mut self, path_info: impl Into<String>) -> Self {
        self.path_info = path_info.into();
        self
    }

    /// Record the peer address and derive the network origin flag from it.
    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.attributes.remove(EndpointAttributes::ANY_NETWORK);
        self.attributes
            .insert(EndpointAttributes::from_remote_addr(addr));
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.attributes
            .remove(EndpointAttributes::SECURE | EndpointAttributes::INSECURE);
        self.attributes.insert(if secure {
            EndpointAttributes::SECURE
        } else {
            EndpointAttributes::INSECURE
        });
        self
    }

    /// Header names are stored lower-cased. `Content-Type` also sets the
    /// request's format flag and `X-Request-Id` replaces the generated id.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into().to_lowercase();
        let value = value.into();
        match name.as_str() {
            "content-type" => {
                self.attributes
                    .insert(EndpointAttributes::from_content_type(&value));
            }
            "x-request-id" => self.request_id = value.clone(),
            _ => {}
        }
        self.headers.insert(name, value);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_query_string(mut self, query: &str) -> Self {
        match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
            Ok(pairs) => self.query.extend(pairs),
            Err(e) => trace!(error = %e, "ignoring malformed query string"),
        }
        self
    }

    pub fn with_form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((name.into(), value.into()));
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json_body<T: Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .with_header("Content-Type", "application/json")
            .with_body(body))
    }

    /// Add endpoint flags on top of the ones derived from the transport.
    pub fn with_attributes(mut self, attributes: EndpointAttributes) -> Self {
        self.attributes.insert(attributes);
        self
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn method(&self) -> Option<HttpMethod> {
        HttpMethod::from_str(&self.verb)
    }

    pub fn path_info(&self) -> &str {
        &self.path_info
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Last value of a query parameter, matched case-insensitively.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        last_value(&self.query, name)
    }

    pub fn form(&self) -> &[(String, String)] {
        &self.form
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        last_value(&self.form, name)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Parse the request body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// The body as a JSON value when it is declared or looks like JSON.
    pub fn json_body(&self) -> Result<Option<serde_json::Value>> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let declared = self.attributes.contains(EndpointAttributes::JSON);
        let looks_like_json = self
            .body
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{');
        if !declared && !looks_like_json {
            return Ok(None);
        }
        self.json().map(Some)
    }

    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }

    pub fn attributes(&self) -> EndpointAttributes {
        self.attributes
    }

    pub fn is_in_process(&self) -> bool {
        self.attributes.contains(EndpointAttributes::IN_PROCESS)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn operation_name(&self) -> Option<String> {
        self.operation_name.lock().clone()
    }

    pub fn set_operation_name(&self, name: impl Into<String>) {
        *self.operation_name.lock() = Some(name.into());
    }

    /// Store a value in the per-request scratch map.
    pub fn set_item<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.items.lock().insert(key.into(), Box::new(value));
    }

    pub fn get_item<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.items
            .lock()
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn has_item(&self, key: &str) -> bool {
        self.items.lock().contains_key(key)
    }

    pub fn remove_item(&self, key: &str) -> bool {
        self.items.lock().remove(key).is_some()
    }

    pub fn response(&self) -> &ResponseState {
        &self.response
    }
}

fn last_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Response-side state a filter can write to before the service runs.
#[derive(Debug, Default)]
pub struct ResponseState {
    inner: Mutex<ResponseInner>,
}

#[derive(Debug, Default)]
struct ResponseInner {
    closed: bool,
    status: Option<u16>,
    dto: Option<Box<dyn Dto>>,
    headers: Vec<(String, String)>,
}

impl ResponseState {
    /// Stop the pipeline; nothing further runs for this request.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Stop the pipeline and answer with `dto` instead.
    pub fn end_with(&self, status: u16, dto: Box<dyn Dto>) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.status = Some(status);
        inner.dto = Some(dto);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn set_status(&self, status: u16) {
        self.inner.lock().status = Some(status);
    }

    pub fn status(&self) -> Option<u16> {
        self.inner.lock().status
    }

    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().headers.push((name.into(), value.into()));
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        self.inner.lock().headers.clone()
    }

    /// The DTO a filter closed the response with, if any.
    pub fn take_dto(&self) -> Option<Box<dyn Dto>> {
        self.inner.lock().dto.take()
    }
}

/// What the host hands back to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Parse the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Deserialization(e.to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
