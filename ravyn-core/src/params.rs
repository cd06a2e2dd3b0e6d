//! Parameter annotations and markers.
//!
//! [`TypeHint`] is the declared type of a handler or provider parameter.
//! [`Param`] is the marker that pins a parameter to a request source and
//! carries its constraints, alias and default.

use crate::dependencies::Provider;
use crate::error::ErrorDetail;
use crate::Error;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

type DecodeFn = fn(Value) -> Result<SerdeObject, serde_json::Error>;
type ToJsonFn = fn(&(dyn Any + Send + Sync)) -> Option<Result<Value, serde_json::Error>>;

fn decode_as<T>(value: Value) -> Result<SerdeObject, serde_json::Error>
where
    T: DeserializeOwned + Serialize + Send + Sync + 'static,
{
    serde_json::from_value::<T>(value).map(SerdeObject::new)
}

fn to_json_of<T: Serialize + 'static>(
    value: &(dyn Any + Send + Sync),
) -> Option<Result<Value, serde_json::Error>> {
    value.downcast_ref::<T>().map(serde_json::to_value)
}

/// Annotation for a type decoded with serde.
#[derive(Clone)]
pub struct SerdeHint {
    pub type_name: &'static str,
    pub type_id: TypeId,
    decode: DecodeFn,
}

impl SerdeHint {
    pub fn decode(&self, value: Value) -> Result<SerdeObject, serde_json::Error> {
        (self.decode)(value)
    }
}

impl fmt::Debug for SerdeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerdeHint({})", self.type_name)
    }
}

/// A value of a serde type, erased so it can travel through the registry.
#[derive(Clone)]
pub struct SerdeObject {
    type_name: &'static str,
    type_id: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    to_json: ToJsonFn,
}

impl SerdeObject {
    pub fn new<T: Serialize + Send + Sync + 'static>(value: T) -> Self {
        Self {
            type_name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            value: Arc::new(value),
            to_json: to_json_of::<T>,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    pub fn to_json(&self) -> Result<Value, Error> {
        match (self.to_json)(&*self.value) {
            Some(result) => result.map_err(Error::from),
            None => Err(Error::Serialization(format!(
                "cannot serialize {}",
                self.type_name
            ))),
        }
    }
}

impl fmt::Debug for SerdeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerdeObject({})", self.type_name)
    }
}

/// Declared type of a parameter.
#[derive(Debug, Clone)]
pub enum TypeHint {
    Any,
    Str,
    Int,
    Float,
    Bool,
    Uuid,
    DateTime,
    Bytes,
    File,
    Enum(Vec<String>),
    List(Box<TypeHint>),
    Dict(Box<TypeHint>),
    Optional(Box<TypeHint>),
    Model(Arc<ModelSchema>),
    Serde(SerdeHint),
    /// A type only a user-registered encoder understands
    Custom(String),
}

impl TypeHint {
    pub fn list(inner: TypeHint) -> Self {
        TypeHint::List(Box::new(inner))
    }

    pub fn dict(inner: TypeHint) -> Self {
        TypeHint::Dict(Box::new(inner))
    }

    pub fn optional(inner: TypeHint) -> Self {
        TypeHint::Optional(Box::new(inner))
    }

    pub fn enumeration<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypeHint::Enum(variants.into_iter().map(Into::into).collect())
    }

    pub fn model(schema: ModelSchema) -> Self {
        TypeHint::Model(Arc::new(schema))
    }

    /// Annotation for a serde type.
    pub fn serde<T>() -> Self
    where
        T: DeserializeOwned + Serialize + Send + Sync + 'static,
    {
        TypeHint::Serde(SerdeHint {
            type_name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            decode: decode_as::<T>,
        })
    }

    /// Types that default to the request body when unmarked.
    pub fn is_model_like(&self) -> bool {
        match self {
            TypeHint::Model(_) | TypeHint::Serde(_) | TypeHint::Dict(_) | TypeHint::Custom(_) => {
                true
            }
            TypeHint::Optional(inner) => inner.is_model_like(),
            _ => false,
        }
    }

    pub fn is_sequence(&self) -> bool {
        match self {
            TypeHint::List(_) => true,
            TypeHint::Optional(inner) => inner.is_sequence(),
            _ => false,
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, TypeHint::Optional(_) | TypeHint::Any)
    }

    pub fn is_file(&self) -> bool {
        match self {
            TypeHint::File => true,
            TypeHint::List(inner) | TypeHint::Optional(inner) => inner.is_file(),
            _ => false,
        }
    }

    /// Short human-readable name used in route metadata.
    pub fn name(&self) -> String {
        match self {
            TypeHint::Any => "any".to_string(),
            TypeHint::Str => "str".to_string(),
            TypeHint::Int => "int".to_string(),
            TypeHint::Float => "float".to_string(),
            TypeHint::Bool => "bool".to_string(),
            TypeHint::Uuid => "uuid".to_string(),
            TypeHint::DateTime => "datetime".to_string(),
            TypeHint::Bytes => "bytes".to_string(),
            TypeHint::File => "file".to_string(),
            TypeHint::Enum(variants) => format!("enum[{}]", variants.join(", ")),
            TypeHint::List(inner) => format!("list[{}]", inner.name()),
            TypeHint::Dict(inner) => format!("dict[str, {}]", inner.name()),
            TypeHint::Optional(inner) => format!("optional[{}]", inner.name()),
            TypeHint::Model(schema) => schema.name.clone(),
            TypeHint::Serde(hint) => hint.type_name.to_string(),
            TypeHint::Custom(name) => name.clone(),
        }
    }

    /// Lax coercion of a scalar. Non-scalar annotations pass the value through.
    pub fn coerce_scalar(&self, value: &Value) -> Result<Value, ErrorDetail> {
        let result = match self {
            TypeHint::Str => match value {
                Value::String(_) => Ok(value.clone()),
                _ => Err(ErrorDetail::new("string_type", "Input should be a valid string")),
            },
            TypeHint::Int => coerce_int(value),
            TypeHint::Float => coerce_float(value),
            TypeHint::Bool => coerce_bool(value),
            TypeHint::Uuid => match value {
                Value::String(s) if uuid::Uuid::parse_str(s.trim()).is_ok() => Ok(value.clone()),
                Value::String(_) => Err(ErrorDetail::new(
                    "uuid_parsing",
                    "Input should be a valid UUID, unable to parse string as a UUID",
                )),
                _ => Err(ErrorDetail::new("uuid_type", "UUID input should be a string")),
            },
            TypeHint::DateTime => coerce_datetime(value),
            TypeHint::Bytes => match value {
                Value::String(_) => Ok(value.clone()),
                _ => Err(ErrorDetail::new("bytes_type", "Input should be a valid bytes")),
            },
            TypeHint::Enum(variants) => {
                let candidate = match value {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
                match candidate {
                    Some(c) if variants.iter().any(|v| *v == c) => Ok(value.clone()),
                    _ => Err(ErrorDetail::new(
                        "enum",
                        format!("Input should be {}", describe_variants(variants)),
                    )),
                }
            }
            _ => Ok(value.clone()),
        };
        result.map_err(|e| e.with_input(value.clone()))
    }
}

fn describe_variants(variants: &[String]) -> String {
    let quoted: Vec<String> = variants.iter().map(|v| format!("'{}'", v)).collect();
    match quoted.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} or {}", rest.join(", "), last),
        Some((last, _)) => last.clone(),
        None => "one of no values".to_string(),
    }
}

fn coerce_int(value: &Value) -> Result<Value, ErrorDetail> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(json!(f as i64)),
            _ => Err(ErrorDetail::new(
                "int_from_float",
                "Input should be a valid integer, got a number with a fractional part",
            )),
        },
        Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| {
            ErrorDetail::new(
                "int_parsing",
                "Input should be a valid integer, unable to parse string as an integer",
            )
        }),
        _ => Err(ErrorDetail::new("int_type", "Input should be a valid integer")),
    }
}

fn coerce_float(value: &Value) -> Result<Value, ErrorDetail> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(json!(f)),
            _ => Err(ErrorDetail::new(
                "float_parsing",
                "Input should be a valid number, unable to parse string as a number",
            )),
        },
        _ => Err(ErrorDetail::new("float_type", "Input should be a valid number")),
    }
}

fn coerce_bool(value: &Value) -> Result<Value, ErrorDetail> {
    let invalid = || {
        ErrorDetail::new(
            "bool_parsing",
            "Input should be a valid boolean, unable to interpret input",
        )
    };
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "t" | "y" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" | "f" | "n" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err(invalid()),
        },
        _ => Err(ErrorDetail::new("bool_type", "Input should be a valid boolean")),
    }
}

fn coerce_datetime(value: &Value) -> Result<Value, ErrorDetail> {
    let invalid = || ErrorDetail::new("datetime_parsing", "Input should be a valid datetime");
    match value {
        Value::String(s) => {
            let s = s.trim();
            let valid = chrono::DateTime::parse_from_rfc3339(s).is_ok()
                || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
                || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok();
            if valid {
                Ok(value.clone())
            } else {
                Err(invalid())
            }
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|dt| Value::String(dt.to_rfc3339()))
            .ok_or_else(invalid),
        _ => Err(ErrorDetail::new("datetime_type", "Input should be a valid datetime")),
    }
}

fn fmt_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Declarative constraints carried by markers and model fields.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub gt: Option<f64>,
    pub ge: Option<f64>,
    pub lt: Option<f64>,
    pub le: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    compiled: Option<Regex>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gt(mut self, value: f64) -> Self {
        self.gt = Some(value);
        self
    }

    pub fn ge(mut self, value: f64) -> Self {
        self.ge = Some(value);
        self
    }

    pub fn lt(mut self, value: f64) -> Self {
        self.lt = Some(value);
        self
    }

    pub fn le(mut self, value: f64) -> Self {
        self.le = Some(value);
        self
    }

    pub fn min_length(mut self, value: usize) -> Self {
        self.min_length = Some(value);
        self
    }

    pub fn max_length(mut self, value: usize) -> Self {
        self.max_length = Some(value);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self.compiled = None;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.gt.is_none()
            && self.ge.is_none()
            && self.lt.is_none()
            && self.le.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.pattern.is_none()
    }

    /// Compile the pattern. Called when the signature is frozen.
    pub fn compile(&mut self) -> Result<(), Error> {
        if let (Some(pattern), None) = (&self.pattern, &self.compiled) {
            let regex = Regex::new(pattern).map_err(|e| {
                Error::ImproperlyConfigured(format!("invalid pattern '{}': {}", pattern, e))
            })?;
            self.compiled = Some(regex);
        }
        Ok(())
    }

    /// Check a decoded value. Failures carry an empty `loc`.
    pub fn check(&self, value: &Value) -> Vec<ErrorDetail> {
        let mut errors = Vec::new();
        match value {
            Value::Number(n) => {
                let Some(n) = n.as_f64() else {
                    return errors;
                };
                if let Some(gt) = self.gt.filter(|gt| n <= *gt) {
                    errors.push(ErrorDetail::new(
                        "greater_than",
                        format!("Input should be greater than {}", fmt_number(gt)),
                    ));
                }
                if let Some(ge) = self.ge.filter(|ge| n < *ge) {
                    errors.push(ErrorDetail::new(
                        "greater_than_equal",
                        format!("Input should be greater than or equal to {}", fmt_number(ge)),
                    ));
                }
                if let Some(lt) = self.lt.filter(|lt| n >= *lt) {
                    errors.push(ErrorDetail::new(
                        "less_than",
                        format!("Input should be less than {}", fmt_number(lt)),
                    ));
                }
                if let Some(le) = self.le.filter(|le| n > *le) {
                    errors.push(ErrorDetail::new(
                        "less_than_equal",
                        format!("Input should be less than or equal to {}", fmt_number(le)),
                    ));
                }
            }
            Value::String(s) => {
                let len = s.chars().count();
                if let Some(min) = self.min_length.filter(|min| len < *min) {
                    errors.push(ErrorDetail::new(
                        "string_too_short",
                        format!("String should have at least {} characters", min),
                    ));
                }
                if let Some(max) = self.max_length.filter(|max| len > *max) {
                    errors.push(ErrorDetail::new(
                        "string_too_long",
                        format!("String should have at most {} characters", max),
                    ));
                }
                let compiled = match (&self.compiled, &self.pattern) {
                    (Some(regex), _) => Some(regex.clone()),
                    (None, Some(pattern)) => Regex::new(pattern).ok(),
                    _ => None,
                };
                if let Some(regex) = compiled.filter(|regex| !regex.is_match(s)) {
                    errors.push(ErrorDetail::new(
                        "string_pattern_mismatch",
                        format!("String should match pattern '{}'", regex.as_str()),
                    ));
                }
            }
            Value::Array(items) => {
                if let Some(min) = self.min_length.filter(|min| items.len() < *min) {
                    errors.push(ErrorDetail::new(
                        "too_short",
                        format!("List should have at least {} items", min),
                    ));
                }
                if let Some(max) = self.max_length.filter(|max| items.len() > *max) {
                    errors.push(ErrorDetail::new(
                        "too_long",
                        format!("List should have at most {} items", max),
                    ));
                }
            }
            _ => {}
        }
        errors
            .into_iter()
            .map(|e| e.with_input(value.clone()))
            .collect()
    }
}

/// One field of a [`ModelSchema`].
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub hint: TypeHint,
    pub required: bool,
    pub default: Option<Value>,
    pub alias: Option<String>,
    pub constraints: Constraints,
}

impl Field {
    pub fn new(name: impl Into<String>, hint: TypeHint) -> Self {
        let required = !hint.is_optional();
        Self {
            name: name.into(),
            hint,
            required,
            default: None,
            alias: None,
            constraints: Constraints::default(),
        }
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self.required = false;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Key the field is read from and written to.
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A runtime-described record type, validated field by field.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, hint: TypeHint) -> Self {
        self.fields.push(Field::new(name, hint));
        self
    }

    pub fn optional_field(
        mut self,
        name: impl Into<String>,
        hint: TypeHint,
        default: impl Into<Value>,
    ) -> Self {
        self.fields.push(Field::new(name, hint).default(default));
        self
    }

    pub fn field_with(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn into_hint(self) -> TypeHint {
        TypeHint::model(self)
    }
}

/// A validated instance of a [`ModelSchema`].
#[derive(Debug, Clone)]
pub struct ModelInstance {
    schema: Arc<ModelSchema>,
    values: Map<String, Value>,
}

impl ModelInstance {
    pub fn new(schema: Arc<ModelSchema>, values: Map<String, Value>) -> Self {
        Self { schema, values }
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    /// Raw value of a field, by field name.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Result<T, Error> {
        let value = self.values.get(field).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            Error::Internal(format!("field '{}' of {}: {}", field, self.schema.name, e))
        })
    }

    /// Convert into a serde type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_value(Value::Object(self.values.clone())).map_err(Error::from)
    }

    /// JSON representation keyed by each field's alias.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        for field in &self.schema.fields {
            if let Some(value) = self.values.get(&field.name) {
                out.insert(field.key().to_string(), value.clone());
            }
        }
        Value::Object(out)
    }
}

impl PartialEq for ModelInstance {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name == other.schema.name && self.values == other.values
    }
}

/// Request source a marker pins a parameter to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Query,
    Header,
    Cookie,
    Path,
    Body,
    Form,
    File,
    /// Anonymous dependency for a security scheme
    Security,
    /// Anonymous dependency on a provider
    Requires,
    /// Named dependency from the effective dependency map
    Injects,
}

/// Parameter marker.
#[derive(Debug, Clone)]
pub struct Param {
    pub kind: ParamKind,
    pub alias: Option<String>,
    pub default: Option<Value>,
    pub required: Option<bool>,
    pub constraints: Constraints,
    /// Read the body parameter from a key of the body object
    pub embed: bool,
    pub description: Option<String>,
    pub deprecated: bool,
    pub include_in_schema: bool,
    pub min_files: Option<usize>,
    pub max_files: Option<usize>,
    pub max_file_size: Option<usize>,
    pub provider: Option<Provider>,
    pub scheme: Option<String>,
}

impl Param {
    pub fn new(kind: ParamKind) -> Self {
        Self {
            kind,
            alias: None,
            default: None,
            required: None,
            constraints: Constraints::default(),
            embed: false,
            description: None,
            deprecated: false,
            include_in_schema: true,
            min_files: None,
            max_files: None,
            max_file_size: None,
            provider: None,
            scheme: None,
        }
    }

    pub fn query() -> Self {
        Self::new(ParamKind::Query)
    }

    pub fn header() -> Self {
        Self::new(ParamKind::Header)
    }

    pub fn cookie() -> Self {
        Self::new(ParamKind::Cookie)
    }

    pub fn path() -> Self {
        Self::new(ParamKind::Path)
    }

    pub fn body() -> Self {
        Self::new(ParamKind::Body)
    }

    pub fn form() -> Self {
        Self::new(ParamKind::Form)
    }

    pub fn file() -> Self {
        Self::new(ParamKind::File)
    }

    /// Resolve the parameter through `provider`, recorded under security `scheme`.
    pub fn security(scheme: impl Into<String>, provider: Provider) -> Self {
        let mut param = Self::new(ParamKind::Security);
        param.scheme = Some(scheme.into());
        param.provider = Some(provider);
        param
    }

    pub fn requires(provider: Provider) -> Self {
        let mut param = Self::new(ParamKind::Requires);
        param.provider = Some(provider);
        param
    }

    pub fn injects() -> Self {
        Self::new(ParamKind::Injects)
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn gt(mut self, value: f64) -> Self {
        self.constraints = self.constraints.gt(value);
        self
    }

    pub fn ge(mut self, value: f64) -> Self {
        self.constraints = self.constraints.ge(value);
        self
    }

    pub fn lt(mut self, value: f64) -> Self {
        self.constraints = self.constraints.lt(value);
        self
    }

    pub fn le(mut self, value: f64) -> Self {
        self.constraints = self.constraints.le(value);
        self
    }

    pub fn min_length(mut self, value: usize) -> Self {
        self.constraints = self.constraints.min_length(value);
        self
    }

    pub fn max_length(mut self, value: usize) -> Self {
        self.constraints = self.constraints.max_length(value);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.constraints = self.constraints.pattern(pattern);
        self
    }

    pub fn embed(mut self, embed: bool) -> Self {
        self.embed = embed;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn deprecated(mut self, deprecated: bool) -> Self {
        self.deprecated = deprecated;
        self
    }

    pub fn include_in_schema(mut self, include: bool) -> Self {
        self.include_in_schema = include;
        self
    }

    pub fn min_files(mut self, count: usize) -> Self {
        self.min_files = Some(count);
        self
    }

    pub fn max_files(mut self, count: usize) -> Self {
        self.max_files = Some(count);
        self
    }

    /// Largest accepted upload, in bytes.
    pub fn max_file_size(mut self, bytes: usize) -> Self {
        self.max_file_size = Some(bytes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_coercion() {
        assert_eq!(TypeHint::Int.coerce_scalar(&json!("42")).unwrap(), json!(42));
        assert_eq!(TypeHint::Int.coerce_scalar(&json!(7.0)).unwrap(), json!(7));
        let err = TypeHint::Int.coerce_scalar(&json!("abc")).unwrap_err();
        assert_eq!(err.error_type, "int_parsing");
        assert_eq!(err.input, json!("abc"));
    }

    #[test]
    fn test_bool_and_float_coercion() {
        assert_eq!(TypeHint::Bool.coerce_scalar(&json!("yes")).unwrap(), json!(true));
        assert_eq!(TypeHint::Bool.coerce_scalar(&json!(0)).unwrap(), json!(false));
        assert_eq!(TypeHint::Float.coerce_scalar(&json!("1.5")).unwrap(), json!(1.5));
        assert_eq!(
            TypeHint::Float.coerce_scalar(&json!(true)).unwrap_err().error_type,
            "float_type"
        );
    }

    #[test]
    fn test_enum_message() {
        let hint = TypeHint::enumeration(["red", "green", "blue"]);
        let err = hint.coerce_scalar(&json!("pink")).unwrap_err();
        assert_eq!(err.error_type, "enum");
        assert_eq!(err.msg, "Input should be 'red', 'green' or 'blue'");
    }

    #[test]
    fn test_uuid_and_datetime() {
        assert!(TypeHint::Uuid
            .coerce_scalar(&json!("67e55044-10b1-426f-9247-bb680e5fe0c8"))
            .is_ok());
        assert!(TypeHint::Uuid.coerce_scalar(&json!("nope")).is_err());
        assert!(TypeHint::DateTime
            .coerce_scalar(&json!("2024-05-01T10:00:00Z"))
            .is_ok());
        assert!(TypeHint::DateTime.coerce_scalar(&json!("yesterday")).is_err());
    }

    #[test]
    fn test_constraints() {
        let mut constraints = Constraints::new().ge(1.0).le(10.0);
        constraints.compile().unwrap();
        assert!(constraints.check(&json!(5)).is_empty());
        let errors = constraints.check(&json!(0));
        assert_eq!(errors[0].error_type, "greater_than_equal");
        assert_eq!(errors[0].msg, "Input should be greater than or equal to 1");

        let mut pattern = Constraints::new().pattern("^[a-z]+$").max_length(3);
        pattern.compile().unwrap();
        let types: Vec<String> = pattern
            .check(&json!("ABCD"))
            .into_iter()
            .map(|e| e.error_type)
            .collect();
        assert_eq!(types, vec!["string_too_long", "string_pattern_mismatch"]);
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let mut constraints = Constraints::new().pattern("(");
        assert!(matches!(
            constraints.compile(),
            Err(Error::ImproperlyConfigured(_))
        ));
    }

    #[test]
    fn test_classification_helpers() {
        let model = ModelSchema::new("Item").field("sku", TypeHint::Int).into_hint();
        assert!(model.is_model_like());
        assert!(TypeHint::optional(model).is_model_like());
        assert!(!TypeHint::list(TypeHint::Int).is_model_like());
        assert!(TypeHint::list(TypeHint::File).is_file());
        assert_eq!(TypeHint::list(TypeHint::Int).name(), "list[int]");
    }

    #[test]
    fn test_serde_object() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Point {
            x: i32,
        }

        let TypeHint::Serde(hint) = TypeHint::serde::<Point>() else {
            panic!("expected serde hint");
        };
        let object = hint.decode(json!({"x": 3})).unwrap();
        assert!(object.is::<Point>());
        assert_eq!(object.downcast_ref::<Point>(), Some(&Point { x: 3 }));
        assert_eq!(object.to_json().unwrap(), json!({"x": 3}));
    }
}
