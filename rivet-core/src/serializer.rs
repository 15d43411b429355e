//! Content serializers and content negotiation.

use crate::dto::RequestType;
use crate::logging::trace;
use crate::{Dto, Error, RequestContext, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub const JSON: &str = "application/json";
pub const FORM: &str = "application/x-www-form-urlencoded";

/// Converts DTOs to and from one wire format.
pub trait ContentSerializer: Send + Sync {
    fn content_type(&self) -> &str;

    /// Short name used with `?format=`.
    fn format(&self) -> &str;

    fn serialize_value(&self, ctx: &RequestContext, value: &serde_json::Value) -> Result<Vec<u8>>;

    fn serialize(&self, ctx: &RequestContext, dto: &dyn Dto) -> Result<Vec<u8>> {
        self.serialize_value(ctx, &dto.to_value()?)
    }

    /// Build a request from `body`. `values` are overrides from the path and
    /// query string, layered as this format dictates.
    fn deserialize(
        &self,
        body: &[u8],
        request_type: &RequestType,
        values: &[(String, String)],
    ) -> Result<Box<dyn Dto>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl ContentSerializer for JsonSerializer {
    fn content_type(&self) -> &str {
        JSON
    }

    fn format(&self) -> &str {
        "json"
    }

    fn serialize_value(&self, _ctx: &RequestContext, value: &serde_json::Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// The body is the base layer; `values` win over it.
    fn deserialize(
        &self,
        body: &[u8],
        request_type: &RequestType,
        values: &[(String, String)],
    ) -> Result<Box<dyn Dto>> {
        let body: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| Error::Deserialization(e.to_string()))?;
        request_type.populate_with_body(Some(body), values)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FormSerializer;

impl ContentSerializer for FormSerializer {
    fn content_type(&self) -> &str {
        FORM
    }

    fn format(&self) -> &str {
        "form"
    }

    fn serialize_value(&self, _ctx: &RequestContext, value: &serde_json::Value) -> Result<Vec<u8>> {
        let serde_json::Value::Object(map) = value else {
            return Err(Error::Serialization("form encoding needs an object".into()));
        };
        let mut pairs = Vec::with_capacity(map.len());
        for (key, value) in map {
            let value = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Bool(_) | serde_json::Value::Number(_) => value.to_string(),
                _ => {
                    return Err(Error::Serialization(format!(
                        "field {} cannot be form encoded",
                        key
                    )));
                }
            };
            pairs.push((key.as_str(), value));
        }
        serde_urlencoded::to_string(pairs)
            .map(String::into_bytes)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Form fields are the most specific layer and win over `values`.
    fn deserialize(
        &self,
        body: &[u8],
        request_type: &RequestType,
        values: &[(String, String)],
    ) -> Result<Box<dyn Dto>> {
        let form: Vec<(String, String)> =
            serde_urlencoded::from_bytes(body).map_err(|e| Error::Deserialization(e.to_string()))?;
        let mut pairs = values.to_vec();
        pairs.extend(form);
        request_type.populate(&pairs)
    }
}

/// The serializers a host knows, by content type and format name.
#[derive(Clone)]
pub struct ContentTypes {
    by_content_type: HashMap<String, Arc<dyn ContentSerializer>>,
    by_format: HashMap<String, Arc<dyn ContentSerializer>>,
    default_content_type: String,
}

impl ContentTypes {
    /// JSON and form serializers, JSON by default.
    pub fn new() -> Self {
        let mut types = Self::empty(JSON);
        types.register(Arc::new(JsonSerializer));
        types.register(Arc::new(FormSerializer));
        types
    }

    pub fn empty(default_content_type: impl Into<String>) -> Self {
        Self {
            by_content_type: HashMap::new(),
            by_format: HashMap::new(),
            default_content_type: default_content_type.into(),
        }
    }

    pub fn register(&mut self, serializer: Arc<dyn ContentSerializer>) {
        self.by_format
            .insert(serializer.format().to_lowercase(), Arc::clone(&serializer));
        self.by_content_type
            .insert(serializer.content_type().to_lowercase(), serializer);
    }

    pub fn set_default(&mut self, content_type: impl Into<String>) {
        self.default_content_type = content_type.into();
    }

    /// Look up by content type, ignoring parameters such as `charset`.
    pub fn get(&self, content_type: &str) -> Option<&Arc<dyn ContentSerializer>> {
        self.by_content_type.get(&mime_essence(content_type))
    }

    pub fn by_format(&self, format: &str) -> Option<&Arc<dyn ContentSerializer>> {
        self.by_format.get(&format.to_lowercase())
    }

    pub fn default_serializer(&self) -> Result<&Arc<dyn ContentSerializer>> {
        self.get(&self.default_content_type).ok_or_else(|| {
            Error::Configuration(format!(
                "no serializer for default content type {}",
                self.default_content_type
            ))
        })
    }

    /// Pick the response serializer: `?format=`, then `Accept`, then the
    /// default.
    pub fn negotiate(&self, ctx: &RequestContext) -> Result<&Arc<dyn ContentSerializer>> {
        if let Some(format) = ctx.query_value("format")
            && let Some(serializer) = self.by_format(format)
        {
            return Ok(serializer);
        }

        if let Some(accept) = ctx.header("accept") {
            for candidate in accept.split(',') {
                let essence = mime_essence(candidate);
                if essence == "*/*" {
                    break;
                }
                if let Some(serializer) = self.by_content_type.get(&essence) {
                    return Ok(serializer);
                }
            }
            trace!(accept, "no acceptable content type, using default");
        }

        self.default_serializer()
    }
}

impl Default for ContentTypes {
    fn default() -> Self {
        Self::new()
    }
}

fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Search {
        term: String,
        page: u32,
    }

    #[test]
    fn test_json_body_then_overrides() {
        let request_type = RequestType::of::<Search>().unwrap();
        let dto = JsonSerializer
            .deserialize(
                br#"{"Term":"rust","Page":1}"#,
                &request_type,
                &[("page".into(), "3".into())],
            )
            .unwrap();
        let search = dto.downcast_ref::<Search>().unwrap();
        assert_eq!(search.term, "rust");
        assert_eq!(search.page, 3);
    }

    #[test]
    fn test_form_fields_win() {
        let request_type = RequestType::of::<Search>().unwrap();
        let dto = FormSerializer
            .deserialize(b"Page=7", &request_type, &[("Page".into(), "2".into()), ("Term".into(), "x".into())])
            .unwrap();
        let search = dto.downcast_ref::<Search>().unwrap();
        assert_eq!(search.page, 7);
        assert_eq!(search.term, "x");
    }

    #[test]
    fn test_form_serialization() {
        let ctx = RequestContext::basic();
        let bytes = FormSerializer
            .serialize(&ctx, &Search { term: "a b".into(), page: 2 })
            .unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "Page=2&Term=a+b");

        let nested = serde_json::json!({ "Inner": { "A": 1 } });
        assert!(FormSerializer.serialize_value(&ctx, &nested).is_err());
    }

    #[test]
    fn test_negotiation_order() {
        let types = ContentTypes::new();

        let ctx = RequestContext::new("GET", "/x?format=form").with_header("Accept", JSON);
        assert_eq!(types.negotiate(&ctx).unwrap().content_type(), FORM);

        let ctx = RequestContext::new("GET", "/x")
            .with_header("Accept", "text/html, application/x-www-form-urlencoded;q=0.9");
        assert_eq!(types.negotiate(&ctx).unwrap().content_type(), FORM);

        let ctx = RequestContext::new("GET", "/x").with_header("Accept", "*/*");
        assert_eq!(types.negotiate(&ctx).unwrap().content_type(), JSON);

        let ctx = RequestContext::new("GET", "/x?format=yaml");
        assert_eq!(types.negotiate(&ctx).unwrap().content_type(), JSON);
    }

    #[test]
    fn test_lookup_ignores_parameters() {
        let types = ContentTypes::new();
        assert!(types.get("application/json; charset=utf-8").is_some());
        assert!(types.get("text/csv").is_none());
        assert!(ContentTypes::empty("text/csv").default_serializer().is_err());
    }
}
