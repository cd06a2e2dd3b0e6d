//! Parameter extraction.
//!
//! Walks a frozen [`SignatureModel`] and pulls a raw value for each parameter
//! from the request (path, query, headers, cookies, body, form, files), hands
//! it to the encoder registry for decoding, checks marker constraints and
//! collects everything into a [`Kwargs`] bundle. Dependencies are delegated to
//! the resolver. Validation failures from all parameters are reported together.

use crate::asgi::Request;
use crate::dependencies::{self, DependencyGraph};
use crate::encoders::{self, EncoderRegistry};
use crate::error::ErrorDetail;
use crate::logging::debug;
use crate::form::{self, FormData, MultipartLimits, UploadFile};
use crate::params::{ModelInstance, SerdeObject};
use crate::signature::{ParamSpec, Reserved, SignatureModel, Source};
use crate::state::State;
use crate::websocket::WebSocket;
use crate::Error;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A resolved parameter value: plain JSON or a typed object.
#[derive(Clone)]
pub enum Argument {
    Value(Value),
    Object(Arc<dyn Any + Send + Sync>),
}

impl Argument {
    pub fn object<T: Send + Sync + 'static>(value: T) -> Self {
        Argument::Object(Arc::new(value))
    }

    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Argument::Object(value)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Argument::Value(value) => Some(value),
            Argument::Object(_) => None,
        }
    }

    /// Downcast an object argument. Serde objects are looked through.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let Argument::Object(object) = self else {
            return None;
        };
        if let Ok(typed) = object.clone().downcast::<T>() {
            return Some(typed);
        }
        object
            .downcast_ref::<SerdeObject>()
            .and_then(|serde| serde.downcast::<T>())
    }

    /// JSON representation through the active encoder registry.
    pub fn to_json(&self) -> Result<Value, Error> {
        encoders::active().encode_argument(self)
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Value(value) => write!(f, "Value({})", value),
            Argument::Object(_) => write!(f, "Object(..)"),
        }
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Argument::Value(value)
    }
}

macro_rules! argument_from {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Argument {
                fn from(value: $ty) -> Self {
                    Argument::Value(Value::from(value))
                }
            }
        )+
    };
}

argument_from!(bool, i64, i32, u64, u32, f64, String, &str, Vec<Value>, Map<String, Value>);

impl From<()> for Argument {
    fn from(_: ()) -> Self {
        Argument::Value(Value::Null)
    }
}

impl From<ModelInstance> for Argument {
    fn from(value: ModelInstance) -> Self {
        Argument::object(value)
    }
}

impl From<SerdeObject> for Argument {
    fn from(value: SerdeObject) -> Self {
        Argument::object(value)
    }
}

/// The arguments a handler or provider is called with.
#[derive(Clone, Default)]
pub struct Kwargs {
    values: HashMap<String, Argument>,
    request: Option<Request>,
    socket: Option<WebSocket>,
}

impl Kwargs {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn for_call(request: Request, socket: Option<WebSocket>) -> Self {
        Self {
            values: HashMap::new(),
            request: Some(request),
            socket,
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, argument: impl Into<Argument>) {
        self.values.insert(name.into(), argument.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.values.get(name)
    }

    /// Raw JSON value of a plain argument.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name).and_then(Argument::as_value)
    }

    /// Deserialize an argument. Models and serde objects go through JSON.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, Error> {
        let argument = self.values.get(name).ok_or_else(|| missing_argument(name))?;
        let value = match argument {
            Argument::Value(value) => value.clone(),
            Argument::Object(object) => {
                if let Some(model) = object.downcast_ref::<ModelInstance>() {
                    return model.deserialize();
                }
                if let Some(serde) = object.downcast_ref::<SerdeObject>() {
                    serde.to_json()?
                } else {
                    argument.to_json()?
                }
            }
        };
        serde_json::from_value(value)
            .map_err(|e| Error::Internal(format!("argument '{}': {}", name, e)))
    }

    /// Typed object argument.
    pub fn object<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, Error> {
        self.values
            .get(name)
            .ok_or_else(|| missing_argument(name))?
            .downcast::<T>()
            .ok_or_else(|| {
                Error::Internal(format!(
                    "argument '{}' is not a {}",
                    name,
                    std::any::type_name::<T>()
                ))
            })
    }

    pub fn model(&self, name: &str) -> Result<Arc<ModelInstance>, Error> {
        self.object::<ModelInstance>(name)
    }

    pub fn file(&self, name: &str) -> Result<Arc<UploadFile>, Error> {
        self.object::<UploadFile>(name)
    }

    pub fn files(&self, name: &str) -> Result<Arc<Vec<UploadFile>>, Error> {
        self.object::<Vec<UploadFile>>(name)
    }

    pub fn request(&self) -> Result<&Request, Error> {
        self.request
            .as_ref()
            .ok_or_else(|| Error::Internal("no request bound to this call".to_string()))
    }

    pub fn socket(&self) -> Result<&WebSocket, Error> {
        self.socket
            .as_ref()
            .ok_or_else(|| Error::Internal("no socket bound to this call".to_string()))
    }

    pub fn state(&self) -> Option<&State> {
        self.request.as_ref().map(Request::state)
    }

    pub fn names(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Kwargs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.values.iter()).finish()
    }
}

fn missing_argument(name: &str) -> Error {
    Error::Internal(format!("no argument named '{}'", name))
}

/// Decoded request body, cached per request.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    Empty,
    Json(Value),
    Form(FormData),
}

impl ParsedBody {
    fn as_json(&self) -> Option<Value> {
        match self {
            ParsedBody::Empty => None,
            ParsedBody::Json(value) => Some(value.clone()),
            ParsedBody::Form(form) => Some(form.to_json()),
        }
    }
}

/// Parse the request body according to its content type. Cached per request.
///
/// Multipart bodies not yet buffered are streamed, with `limits` applied per
/// field and `Settings::max_body_size` to the whole body.
pub async fn parsed_body(
    request: &Request,
    limits: &MultipartLimits,
) -> Result<Arc<ParsedBody>, Error> {
    request
        .scope()
        .local
        .parsed
        .get_or_try_init(|| async { parse_body(request, limits).await.map(Arc::new) })
        .await
        .cloned()
}

fn invalid_body(error_type: &str, message: String) -> Error {
    Error::validation(vec![
        ErrorDetail::new(error_type, message).prefixed("body"),
    ])
}

async fn parse_body(request: &Request, limits: &MultipartLimits) -> Result<ParsedBody, Error> {
    let content_type = request.content_type().unwrap_or_default();
    if content_type == "multipart/form-data"
        && !request.body_buffered()
        && request.content_length() != Some(0)
    {
        let header = request.header("content-type").unwrap_or_default().to_string();
        let limits = limits.clone().body(request.settings().max_body_size as u64);
        return form::parse_multipart_stream(&header, request.body_stream(), &limits)
            .await
            .map(ParsedBody::Form);
    }

    let body = request.body().await?;
    if body.is_empty() {
        return Ok(ParsedBody::Empty);
    }
    if content_type.is_empty()
        || content_type == "application/json"
        || content_type.ends_with("+json")
    {
        serde_json::from_slice(&body)
            .map(ParsedBody::Json)
            .map_err(|e| invalid_body("json_invalid", format!("JSON decode error: {}", e)))
    } else if content_type == "application/x-msgpack" || content_type == "application/msgpack" {
        rmp_serde::from_slice::<Value>(&body)
            .map(ParsedBody::Json)
            .map_err(|e| invalid_body("msgpack_invalid", format!("MessagePack decode error: {}", e)))
    } else if content_type == "application/x-www-form-urlencoded" {
        form::parse_urlencoded(&body).map(ParsedBody::Form)
    } else if content_type == "multipart/form-data" {
        let header = request.header("content-type").unwrap_or_default().to_string();
        form::parse_multipart(&header, body).await.map(ParsedBody::Form)
    } else {
        Err(Error::UnsupportedMediaType(format!(
            "Unsupported media type '{}'",
            content_type
        )))
    }
}

/// Everything a call needs to resolve its parameters.
#[derive(Clone)]
pub(crate) struct CallContext {
    pub(crate) request: Request,
    pub(crate) socket: Option<WebSocket>,
    pub(crate) graph: Arc<DependencyGraph>,
    pub(crate) limiter: Option<Arc<Semaphore>>,
}

type Outcome = Result<Option<Argument>, Vec<ErrorDetail>>;

/// Build the arguments for one call of a handler or provider.
pub(crate) async fn build_kwargs(model: &SignatureModel, ctx: &CallContext) -> Result<Kwargs, Error> {
    let registry = encoders::active();
    let request = &ctx.request;
    let mut kwargs = Kwargs::for_call(request.clone(), ctx.socket.clone());
    let mut errors = Vec::new();

    let body = if model.reads_body() {
        Some(parsed_body(request, &model.multipart_limits()).await?)
    } else {
        None
    };
    let query = request.query_params();
    let cookies = request.cookies();

    for spec in model.specs() {
        let outcome: Outcome = match spec.source {
            Source::Path => decode(&registry, spec, request.path_param(&spec.key).cloned()),
            Source::Query => {
                let values = query
                    .iter()
                    .filter(|(k, _)| *k == spec.key)
                    .map(|(_, v)| v.as_str())
                    .collect();
                decode(&registry, spec, from_strings(spec, values))
            }
            Source::Header => {
                let values = request.headers().get_all(&spec.key);
                decode(&registry, spec, from_strings(spec, values))
            }
            Source::Cookie => {
                let values = cookies.get(&spec.key).map(String::as_str).into_iter().collect();
                decode(&registry, spec, from_strings(spec, values))
            }
            Source::Body => body_argument(&registry, spec, model.embed_body(), body.as_deref()),
            Source::Form => form_argument(&registry, spec, body.as_deref()),
            Source::File => file_argument(spec, body.as_deref()),
            Source::Dependency => {
                let value = dependencies::resolve(&spec.key, ctx).await?;
                Ok(Some(value))
            }
            Source::Request => Ok(Some(Argument::object(request.clone()))),
            Source::WebSocket => Ok(ctx.socket.clone().map(Argument::object)),
            Source::State => Ok(Some(Argument::object(request.state().clone()))),
            Source::App => match request.app() {
                Some(app) => Ok(Some(Argument::object(app.clone()))),
                None => return Err(Error::Dependency("no application bound to the request".to_string())),
            },
            Source::Reserved(Reserved::Headers) => {
                let mut headers = Map::new();
                for (name, value) in request.headers().iter() {
                    headers
                        .entry(name.to_string())
                        .or_insert_with(|| Value::String(value.to_string()));
                }
                Ok(Some(Argument::Value(Value::Object(headers))))
            }
            Source::Reserved(Reserved::Query) => {
                let mut params = Map::new();
                for (name, value) in &query {
                    params
                        .entry(name.clone())
                        .or_insert_with(|| Value::String(value.clone()));
                }
                Ok(Some(Argument::Value(Value::Object(params))))
            }
            Source::Reserved(Reserved::Cookies) => Ok(Some(Argument::Value(Value::Object(
                cookies
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            )))),
        };

        match outcome {
            Ok(Some(argument)) => kwargs.insert(spec.name.clone(), argument),
            Ok(None) => {}
            Err(details) => errors.extend(details),
        }
    }

    if errors.is_empty() {
        Ok(kwargs)
    } else {
        debug!(errors = errors.len(), path = %request.path(), "Parameter validation failed");
        Err(Error::validation(errors))
    }
}

fn from_strings(spec: &ParamSpec, values: Vec<&str>) -> Option<Value> {
    if values.is_empty() {
        None
    } else if spec.hint.is_sequence() {
        Some(Value::Array(
            values.into_iter().map(|v| Value::String(v.to_string())).collect(),
        ))
    } else {
        values.first().map(|v| Value::String(v.to_string()))
    }
}

/// Missing values fall back to the default; required ones fail.
fn absent(spec: &ParamSpec, loc: &[Value]) -> Outcome {
    if let Some(default) = &spec.default {
        Ok(Some(Argument::Value(default.clone())))
    } else if spec.required {
        let mut detail = ErrorDetail::missing();
        detail.loc = loc.to_vec();
        Err(vec![detail])
    } else {
        Ok(Some(Argument::Value(Value::Null)))
    }
}

fn with_loc(details: Vec<ErrorDetail>, prefix: &[Value]) -> Vec<ErrorDetail> {
    details
        .into_iter()
        .map(|mut detail| {
            let mut loc = prefix.to_vec();
            loc.append(&mut detail.loc);
            detail.loc = loc;
            detail
        })
        .collect()
}

fn decode_at(registry: &EncoderRegistry, spec: &ParamSpec, raw: Value, loc: &[Value]) -> Outcome {
    let argument = registry
        .decode(&spec.hint, raw)
        .map_err(|details| with_loc(details, loc))?;
    if !spec.constraints.is_empty()
        && let Argument::Value(value) = &argument
    {
        let violations = spec.constraints.check(value);
        if !violations.is_empty() {
            return Err(with_loc(violations, loc));
        }
    }
    Ok(Some(argument))
}

fn decode(registry: &EncoderRegistry, spec: &ParamSpec, raw: Option<Value>) -> Outcome {
    let loc = [Value::String(spec.key.clone())];
    match raw {
        None | Some(Value::Null) => absent(spec, &loc),
        Some(raw) => decode_at(registry, spec, raw, &loc),
    }
}

fn body_argument(
    registry: &EncoderRegistry,
    spec: &ParamSpec,
    embed: bool,
    body: Option<&ParsedBody>,
) -> Outcome {
    let whole = body.and_then(ParsedBody::as_json);
    if embed {
        let loc = [Value::String(spec.key.clone())];
        let raw = match whole {
            Some(Value::Object(mut object)) => object.remove(&spec.key),
            _ => None,
        };
        return match raw {
            None | Some(Value::Null) => absent(spec, &loc),
            Some(raw) => decode_at(registry, spec, raw, &loc),
        };
    }

    match whole {
        None => absent(spec, &[Value::String(spec.key.clone())]),
        Some(raw) => match registry.decode(&spec.hint, raw) {
            Ok(argument) => Ok(Some(argument)),
            // field paths for models, the parameter name for scalars
            Err(details) => Err(details
                .into_iter()
                .map(|detail| {
                    if detail.loc.is_empty() {
                        detail.prefixed(spec.key.clone())
                    } else {
                        detail
                    }
                })
                .collect()),
        },
    }
}

fn form_argument(registry: &EncoderRegistry, spec: &ParamSpec, body: Option<&ParsedBody>) -> Outcome {
    let form = match body {
        Some(ParsedBody::Form(form)) => Some(form),
        _ => None,
    };
    if spec.hint.is_model_like() {
        let raw = form.map(FormData::to_json);
        return match raw {
            None => absent(spec, &[Value::String(spec.key.clone())]),
            Some(raw) => decode_at(registry, spec, raw, &[Value::String(spec.key.clone())]),
        };
    }
    let values = form.map(|f| f.get_all(&spec.key)).unwrap_or_default();
    decode(registry, spec, from_strings(spec, values))
}

fn file_argument(spec: &ParamSpec, body: Option<&ParsedBody>) -> Outcome {
    let loc = [Value::String(spec.key.clone())];
    let files: Vec<UploadFile> = match body {
        Some(ParsedBody::Form(form)) => form.files_for(&spec.key).into_iter().cloned().collect(),
        _ => Vec::new(),
    };
    if files.is_empty() {
        return match absent(spec, &loc) {
            Ok(_) if spec.hint.is_sequence() && !spec.required => {
                Ok(Some(Argument::object(Vec::<UploadFile>::new())))
            }
            other => other,
        };
    }

    let mut errors = Vec::new();
    if let Some(min) = spec.min_files.filter(|min| files.len() < *min) {
        errors.push(ErrorDetail::new(
            "too_short",
            format!("Expected at least {} files, got {}", min, files.len()),
        ));
    }
    if let Some(max) = spec.max_files.filter(|max| files.len() > *max) {
        errors.push(ErrorDetail::new(
            "too_long",
            format!("Expected at most {} files, got {}", max, files.len()),
        ));
    }
    if let Some(limit) = spec.max_file_size {
        for (index, file) in files.iter().enumerate() {
            if file.exceeds_size(limit) {
                let detail = ErrorDetail::new(
                    "file_too_large",
                    format!("File should be at most {} bytes", limit),
                )
                .with_input(file.to_json());
                errors.push(if spec.hint.is_sequence() {
                    detail.prefixed(index)
                } else {
                    detail
                });
            }
        }
    }
    if !errors.is_empty() {
        return Err(with_loc(errors, &loc));
    }

    if spec.hint.is_sequence() {
        Ok(Some(Argument::object(files)))
    } else {
        Ok(files.into_iter().next().map(Argument::object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asgi::{Receive, Scope};
    use crate::params::{ModelSchema, Param, TypeHint};
    use crate::signature::Signature;
    use serde_json::json;
    use std::collections::HashSet;

    fn context(scope: Scope, body: &'static str) -> CallContext {
        CallContext {
            request: Request::new(scope, Receive::body(body)),
            socket: None,
            graph: Arc::new(DependencyGraph::default()),
            limiter: None,
        }
    }

    fn plan(signature: Signature, path: &[&str]) -> SignatureModel {
        let path: HashSet<String> = path.iter().map(|s| s.to_string()).collect();
        SignatureModel::build(&signature, &path, &HashSet::new(), false).unwrap()
    }

    #[tokio::test]
    async fn test_query_header_cookie() {
        let model = plan(
            Signature::new()
                .param("tags", TypeHint::list(TypeHint::Str))
                .optional("page", TypeHint::Int, 1)
                .param_with("x_trace", TypeHint::Str, Param::header())
                .param_with("session", TypeHint::Str, Param::cookie()),
            &[],
        );
        let scope = Scope::http("GET", "/")
            .with_query("tags=a&tags=b")
            .with_header("X-Trace", "t-1")
            .with_header("cookie", "session=s1");

        let kwargs = build_kwargs(&model, &context(scope, "")).await.unwrap();
        assert_eq!(kwargs.get::<Vec<String>>("tags").unwrap(), vec!["a", "b"]);
        assert_eq!(kwargs.get::<i64>("page").unwrap(), 1);
        assert_eq!(kwargs.get::<String>("x_trace").unwrap(), "t-1");
        assert_eq!(kwargs.get::<String>("session").unwrap(), "s1");
    }

    #[tokio::test]
    async fn test_missing_required_reports_every_parameter() {
        let model = plan(
            Signature::new()
                .param("q", TypeHint::Str)
                .param_with("token", TypeHint::Str, Param::header().alias("X-Token")),
            &[],
        );
        let err = build_kwargs(&model, &context(Scope::http("GET", "/"), ""))
            .await
            .unwrap_err();
        let Error::ValidationFailed(errors) = err else {
            panic!("expected validation failure");
        };
        let locs: Vec<Value> = errors.errors.iter().map(|e| json!(e.loc)).collect();
        assert_eq!(locs, vec![json!(["q"]), json!(["x-token"])]);
        assert!(errors.errors.iter().all(|e| e.error_type == "missing"));
    }

    #[tokio::test]
    async fn test_single_body_model_errors_use_field_paths() {
        let item = ModelSchema::new("Item").field("sku", TypeHint::Int).into_hint();
        let model = plan(Signature::new().param("item", item), &[]);
        let scope = Scope::http("POST", "/").with_header("content-type", "application/json");
        let err = build_kwargs(&model, &context(scope, r#"{"sku": "abc"}"#))
            .await
            .unwrap_err();
        let Error::ValidationFailed(errors) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.errors[0].loc, vec![json!("sku")]);
        assert_eq!(errors.errors[0].error_type, "int_parsing");
    }

    #[tokio::test]
    async fn test_form_model_errors_carry_parameter_name() {
        let login = ModelSchema::new("Login")
            .field("user", TypeHint::Str)
            .field("age", TypeHint::Int)
            .into_hint();
        let model = plan(Signature::new().param_with("login", login, Param::form()), &[]);
        let scope = Scope::http("POST", "/")
            .with_header("content-type", "application/x-www-form-urlencoded");
        let Err(Error::ValidationFailed(errors)) =
            build_kwargs(&model, &context(scope, "user=ana&age=old")).await
        else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.errors[0].loc, vec![json!("login"), json!("age")]);
        assert_eq!(errors.errors[0].error_type, "int_parsing");
    }

    #[tokio::test]
    async fn test_embedded_bodies() {
        let user = ModelSchema::new("User").field("name", TypeHint::Str).into_hint();
        let item = ModelSchema::new("Item").field("sku", TypeHint::Int).into_hint();
        let model = plan(Signature::new().param("user", user).param("item", item), &[]);
        let scope = Scope::http("POST", "/");
        let kwargs = build_kwargs(
            &model,
            &context(scope, r#"{"user": {"name": "ana"}, "item": {"sku": "7"}}"#),
        )
        .await
        .unwrap();
        assert_eq!(kwargs.model("user").unwrap().get::<String>("name").unwrap(), "ana");
        assert_eq!(kwargs.model("item").unwrap().get::<i64>("sku").unwrap(), 7);
    }

    #[tokio::test]
    async fn test_constraints_on_query() {
        let model = plan(
            Signature::new().param_with("limit", TypeHint::Int, Param::query().ge(1.0).le(50.0)),
            &[],
        );
        let scope = Scope::http("GET", "/").with_query("limit=100");
        let Err(Error::ValidationFailed(errors)) =
            build_kwargs(&model, &context(scope, "")).await
        else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.errors[0].error_type, "less_than_equal");
        assert_eq!(errors.errors[0].loc, vec![json!("limit")]);
    }

    #[tokio::test]
    async fn test_unsupported_media_type() {
        let model = plan(Signature::new().param("data", TypeHint::Any), &[]);
        let scope = Scope::http("POST", "/").with_header("content-type", "text/csv");
        let err = build_kwargs(&model, &context(scope, "a,b")).await.unwrap_err();
        assert_eq!(err.status_code(), 415);
    }

    #[tokio::test]
    async fn test_msgpack_body() {
        let model = plan(Signature::new().param("payload", TypeHint::dict(TypeHint::Int)), &[]);
        let encoded = rmp_serde::to_vec(&json!({"a": 1})).unwrap();
        let scope = Scope::http("POST", "/").with_header("content-type", "application/x-msgpack");
        let ctx = CallContext {
            request: Request::new(scope, Receive::body(encoded)),
            socket: None,
            graph: Arc::new(DependencyGraph::default()),
            limiter: None,
        };
        let kwargs = build_kwargs(&model, &ctx).await.unwrap();
        assert_eq!(kwargs.value("payload"), Some(&json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_path_params() {
        let model = plan(Signature::new().param("user_id", TypeHint::Int), &["user_id"]);
        let mut scope = Scope::http("GET", "/users/42");
        scope.path_params.insert("user_id".into(), json!(42));
        let kwargs = build_kwargs(&model, &context(scope, "")).await.unwrap();
        assert_eq!(kwargs.get::<i64>("user_id").unwrap(), 42);
    }
}
