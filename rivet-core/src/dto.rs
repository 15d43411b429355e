//! Request and response DTOs.
//!
//! DTOs are plain serde types. [`Dto`] erases them so the dispatcher can
//! carry any request or response through one pipeline, and [`RequestType`]
//! is the per-type descriptor built once at registration: it records the
//! DTO's field names and knows how to populate a fresh instance from string
//! maps (route variables, query string, form data) or from a JSON body.

use crate::logging::trace;
use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};

/// A type-erased data transfer object.
pub trait Dto: Any + Debug + Send + Sync {
    /// Fully qualified Rust type name.
    fn type_name(&self) -> &'static str;

    fn type_info(&self) -> TypeInfo;

    /// The DTO's serde representation.
    fn to_value(&self) -> Result<serde_json::Value>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<T> Dto for T
where
    T: Serialize + Debug + Send + Sync + 'static,
{
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn type_info(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

impl dyn Dto {
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Take ownership of the concrete value, or get the box back untouched.
    pub fn downcast<T: Any>(self: Box<Self>) -> std::result::Result<Box<T>, Box<dyn Dto>> {
        if !self.is::<T>() {
            return Err(self);
        }
        match self.into_any().downcast::<T>() {
            Ok(value) => Ok(value),
            Err(_) => unreachable!("type checked above"),
        }
    }
}

/// A DTO that can be created from an incoming request.
pub trait RequestDto: Dto + Serialize + DeserializeOwned + Default {}

impl<T> RequestDto for T where T: Dto + Serialize + DeserializeOwned + Default {}

/// Runtime identity of a DTO or service type.
#[derive(Clone, Debug)]
pub struct TypeInfo {
    id: TypeId,
    name: String,
    full_name: &'static str,
}

impl TypeInfo {
    pub fn of<T: ?Sized + 'static>() -> Self {
        let full_name = std::any::type_name::<T>();
        Self {
            id: TypeId::of::<T>(),
            name: short_type_name(full_name),
            full_name,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The type name without its module path or generic arguments.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &'static str {
        self.full_name
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// `my_app::dtos::Hello<T>` becomes `Hello`.
pub fn short_type_name(full_name: &str) -> String {
    let base = full_name.split('<').next().unwrap_or(full_name);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

type PopulateFn = fn(&[(String, String)]) -> Result<Box<dyn Dto>>;
type FromValueFn = fn(serde_json::Value) -> Result<Box<dyn Dto>>;

/// Registration-time descriptor of a request DTO type.
#[derive(Clone)]
pub struct RequestType {
    info: TypeInfo,
    fields: Vec<String>,
    // lower-cased name -> declared name
    index: HashMap<String, String>,
    defaults: Vec<(String, String)>,
    default_value: serde_json::Value,
    populate_fn: PopulateFn,
    from_value_fn: FromValueFn,
}

impl RequestType {
    /// Describe `T`, using the serde form of `T::default()` as its field list.
    pub fn of<T: RequestDto>() -> Result<Self> {
        let info = TypeInfo::of::<T>();
        let default_value = serde_json::to_value(T::default())
            .map_err(|e| Error::Configuration(format!("{}: {}", info.name(), e)))?;

        let fields: Vec<String> = match &default_value {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            serde_json::Value::Null => Vec::new(),
            _ => {
                return Err(Error::Configuration(format!(
                    "request type {} must serialize as an object",
                    info.name()
                )));
            }
        };

        let mut index = HashMap::with_capacity(fields.len());
        for field in &fields {
            if let Some(existing) = index.insert(field.to_lowercase(), field.clone()) {
                return Err(Error::AmbiguousProperty(format!(
                    "{}.{} and {}.{} differ only by case",
                    info.name(),
                    existing,
                    info.name(),
                    field
                )));
            }
        }

        // Flat DTOs round-trip through the form encoding; anything else
        // relies on #[serde(default)] for fields the request leaves out.
        let defaults = serde_urlencoded::to_string(T::default())
            .ok()
            .and_then(|encoded| serde_urlencoded::from_str::<Vec<(String, String)>>(&encoded).ok())
            .unwrap_or_default();

        Ok(Self {
            info,
            fields,
            index,
            defaults,
            default_value,
            populate_fn: populate_as::<T>,
            from_value_fn: from_value_as::<T>,
        })
    }

    pub fn info(&self) -> &TypeInfo {
        &self.info
    }

    pub fn id(&self) -> TypeId {
        self.info.id()
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    /// Field names as they appear in the serde representation.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Resolve a field name case-insensitively to its declared spelling.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.index.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// A fresh instance with every field at its default.
    pub fn create_default(&self) -> Result<Box<dyn Dto>> {
        (self.populate_fn)(&self.defaults)
    }

    /// Populate a fresh instance from name/value pairs. Later pairs win over
    /// earlier ones; names are matched case-insensitively and unknown names
    /// are ignored.
    pub fn populate(&self, values: &[(String, String)]) -> Result<Box<dyn Dto>> {
        let pairs = self.overlay(values);
        (self.populate_fn)(&pairs)
    }

    /// Populate from a JSON body, then let the string `values` overwrite the
    /// fields they name.
    pub fn populate_with_body(
        &self,
        body: Option<serde_json::Value>,
        values: &[(String, String)],
    ) -> Result<Box<dyn Dto>> {
        let Some(serde_json::Value::Object(body)) = body else {
            return self.populate(values);
        };

        let mut merged = match &self.default_value {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        for (key, value) in body {
            match self.field(&key) {
                Some(field) => {
                    merged.insert(field.to_string(), value);
                }
                None => trace!(request_type = %self.info, field = %key, "ignoring unknown body field"),
            }
        }

        if !values.is_empty() {
            // Type the string overrides through the form path first
            let typed = self.populate(values)?.to_value()?;
            for (key, _) in values {
                if let Some(field) = self.field(key)
                    && let Some(value) = typed.get(field)
                {
                    merged.insert(field.to_string(), value.clone());
                }
            }
        }

        (self.from_value_fn)(serde_json::Value::Object(merged))
    }

    /// Deserialize a JSON value as this request type.
    pub fn from_json(&self, value: serde_json::Value) -> Result<Box<dyn Dto>> {
        self.populate_with_body(Some(value), &[])
    }

    fn overlay(&self, values: &[(String, String)]) -> Vec<(String, String)> {
        let mut resolved: Vec<(String, String)> = Vec::with_capacity(values.len());
        for (key, value) in values {
            let Some(field) = self.field(key) else {
                trace!(request_type = %self.info, field = %key, "ignoring unknown field");
                continue;
            };
            resolved.retain(|(k, _)| k != field);
            resolved.push((field.to_string(), value.clone()));
        }

        let mut pairs: Vec<(String, String)> = self
            .defaults
            .iter()
            .filter(|(k, _)| !resolved.iter().any(|(r, _)| r == k))
            .cloned()
            .collect();
        pairs.extend(resolved);
        pairs
    }
}

impl Debug for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestType")
            .field("name", &self.info.name())
            .field("fields", &self.fields)
            .finish()
    }
}

fn populate_as<T: RequestDto>(pairs: &[(String, String)]) -> Result<Box<dyn Dto>> {
    let encoded = serde_urlencoded::to_string(pairs)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    let dto: T = serde_urlencoded::from_str(&encoded)
        .map_err(|e| Error::Deserialization(format!("{}: {}", short_type_name(std::any::type_name::<T>()), e)))?;
    Ok(Box::new(dto))
}

fn from_value_as<T: RequestDto>(value: serde_json::Value) -> Result<Box<dyn Dto>> {
    let dto: T = serde_json::from_value(value)
        .map_err(|e| Error::Deserialization(format!("{}: {}", short_type_name(std::any::type_name::<T>()), e)))?;
    Ok(Box::new(dto))
}
