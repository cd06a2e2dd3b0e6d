//! HTTP and WebSocket handlers.
//!
//! A handler is an immutable record: the callable, the methods it answers,
//! its path, the parameters it declares, what its responses look like and
//! the options of the handler level. Handlers are built with [`get`],
//! [`post`], [`route`], [`websocket`] and friends:
//!
//! ```rust
//! use ravyn_core::{Kwargs, TypeHint, get};
//! use serde_json::json;
//!
//! let handler = get("/users/{user_id:int}", |kw: Kwargs| async move {
//!     Ok(json!({ "user_id": kw.get::<i64>("user_id")? }))
//! })
//! .param("user_id", TypeHint::Int);
//! ```
//!
//! Async callables run on the request task. Blocking callables registered
//! with [`HttpHandler::sync`] run on the blocking pool, bounded by
//! `Settings::sync_handler_limit`.

use crate::extract::Kwargs;
use crate::options::{LevelOptions, WithOptions};
use crate::params::{Param, TypeHint};
use crate::permission::HandlerInfo;
use crate::response::{BackgroundTask, Cookie, Reply, ResponseClass, ResponseSpec};
use crate::signature::Signature;
use crate::Error;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Run a blocking closure on the blocking pool, holding a permit of `limiter`.
pub(crate) async fn run_blocking<F, R>(
    limiter: Option<Arc<Semaphore>>,
    func: F,
) -> Result<R, Error>
where
    F: FnOnce() -> Result<R, Error> + Send + 'static,
    R: Send + 'static,
{
    let _permit = match limiter {
        Some(limiter) => Some(limiter.acquire_owned().await.map_err(|_| {
            Error::ServiceUnavailable("worker pool is shut down".to_string())
        })?),
        None => None,
    };
    tokio::task::spawn_blocking(func)
        .await
        .map_err(|e| Error::Internal(format!("blocking handler failed: {}", e)))?
}

type AsyncHandlerFn = dyn Fn(Kwargs) -> BoxFuture<'static, Result<Reply, Error>> + Send + Sync;
type SyncHandlerFn = dyn Fn(Kwargs) -> Result<Reply, Error> + Send + Sync;
type SocketHandlerFn = dyn Fn(Kwargs) -> BoxFuture<'static, Result<(), Error>> + Send + Sync;

#[derive(Clone)]
pub(crate) enum Callable {
    Async(Arc<AsyncHandlerFn>),
    Sync(Arc<SyncHandlerFn>),
}

impl Callable {
    pub(crate) async fn call(
        &self,
        kwargs: Kwargs,
        limiter: Option<Arc<Semaphore>>,
    ) -> Result<Reply, Error> {
        match self {
            Callable::Async(func) => func(kwargs).await,
            Callable::Sync(func) => {
                let func = func.clone();
                run_blocking(limiter, move || func(kwargs)).await
            }
        }
    }
}

/// Last path segment of a function's type name, or `None` for closures.
fn callable_name<F>() -> Option<String> {
    let name = std::any::type_name::<F>();
    if name.contains("{{closure}}") {
        return None;
    }
    name.rsplit("::").next().map(str::to_owned)
}

fn name_from_path(path: &str) -> String {
    let cleaned: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "root".to_string()
    } else {
        cleaned.to_string()
    }
}

fn normalize_methods<I, S>(methods: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for method in methods {
        let method = method.as_ref().to_ascii_uppercase();
        if !normalized.contains(&method) {
            normalized.push(method);
        }
    }
    normalized
}

/// An HTTP handler.
#[derive(Clone)]
pub struct HttpHandler {
    pub(crate) methods: Vec<String>,
    pub(crate) path: String,
    pub(crate) callable: Callable,
    pub(crate) signature: Signature,
    pub(crate) response: ResponseSpec,
    pub(crate) options: LevelOptions,
    pub(crate) name: String,
    pub(crate) operation_id: Option<String>,
    pub(crate) summary: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) response_model: Option<String>,
}

impl HttpHandler {
    fn from_callable(methods: Vec<String>, path: String, callable: Callable, name: String) -> Self {
        Self {
            methods,
            path,
            callable,
            signature: Signature::new(),
            response: ResponseSpec::default(),
            options: LevelOptions::new(),
            name,
            operation_id: None,
            summary: None,
            description: None,
            response_model: None,
        }
    }

    /// An async handler for `methods` on `path`.
    pub fn new<I, S, F, Fut, R>(methods: I, path: impl Into<String>, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply>,
    {
        let path = path.into();
        let name = callable_name::<F>().unwrap_or_else(|| name_from_path(&path));
        let func = Arc::new(func);
        let call: Arc<AsyncHandlerFn> = Arc::new(move |kwargs| {
            let fut = func(kwargs);
            Box::pin(async move { fut.await.map(Into::into) })
        });
        Self::from_callable(normalize_methods(methods), path, Callable::Async(call), name)
    }

    /// A blocking handler, run on the blocking pool.
    pub fn sync<I, S, F, R>(methods: I, path: impl Into<String>, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(Kwargs) -> Result<R, Error> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        let path = path.into();
        let name = callable_name::<F>().unwrap_or_else(|| name_from_path(&path));
        let call: Arc<SyncHandlerFn> = Arc::new(move |kwargs| func(kwargs).map(Into::into));
        Self::from_callable(normalize_methods(methods), path, Callable::Sync(call), name)
    }

    // ========== Parameters ==========

    pub fn param(mut self, name: impl Into<String>, hint: TypeHint) -> Self {
        self.signature = self.signature.param(name, hint);
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        hint: TypeHint,
        default: impl Into<Value>,
    ) -> Self {
        self.signature = self.signature.optional(name, hint, default);
        self
    }

    pub fn param_with(mut self, name: impl Into<String>, hint: TypeHint, marker: Param) -> Self {
        self.signature = self.signature.param_with(name, hint, marker);
        self
    }

    /// Replace the whole signature.
    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    // ========== Responses ==========

    pub fn status_code(mut self, status: u16) -> Self {
        self.response.status_code = Some(status);
        self
    }

    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.response.media_type = Some(media_type.into());
        self
    }

    pub fn response_class(mut self, class: ResponseClass) -> Self {
        self.response.response_class = Some(class);
        self
    }

    pub fn response_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.headers.push((name.into(), value.into()));
        self
    }

    pub fn response_cookie(mut self, cookie: Cookie) -> Self {
        self.response.cookies.push(cookie);
        self
    }

    pub fn background(mut self, task: BackgroundTask) -> Self {
        self.response.background.add_task(task);
        self
    }

    // ========== Metadata ==========

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Name of the model the handler responds with.
    pub fn response_model(mut self, model: impl Into<String>) -> Self {
        self.response_model = Some(model.into());
        self
    }

    // ========== Accessors ==========

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handler_name(&self) -> &str {
        &self.name
    }

    pub fn is_sync(&self) -> bool {
        matches!(self.callable, Callable::Sync(_))
    }

    pub fn params(&self) -> &Signature {
        &self.signature
    }

    pub fn response_spec(&self) -> &ResponseSpec {
        &self.response
    }

    pub fn options(&self) -> &LevelOptions {
        &self.options
    }

    /// Whether a request with `method` is answered by this handler.
    /// `HEAD` is answered by `GET` handlers.
    pub fn allows(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
            || (method == "HEAD" && self.methods.iter().any(|m| m == "GET"))
    }

    /// `(method, operation id)` pairs for the handler mounted at `full_path`.
    pub fn operation_ids(&self, full_path: &str) -> Vec<(String, String)> {
        let single = self.methods.len() == 1;
        self.methods
            .iter()
            .map(|method| {
                let id = match &self.operation_id {
                    Some(id) if single => id.clone(),
                    Some(id) => format!("{}_{}", id, method.to_ascii_lowercase()),
                    None => format!(
                        "{}_{}_{}",
                        self.name,
                        name_from_path(full_path),
                        method.to_ascii_lowercase()
                    ),
                };
                (method.clone(), id)
            })
            .collect()
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.methods.is_empty() {
            return Err(Error::ImproperlyConfigured(format!(
                "Handler '{}' at '{}' declares no HTTP methods",
                self.name, self.path
            )));
        }
        Ok(())
    }

    pub(crate) fn info(&self, full_path: &str, tags: &[String]) -> HandlerInfo {
        HandlerInfo {
            name: self.name.clone(),
            path: full_path.to_string(),
            methods: self.methods.clone(),
            tags: tags.to_vec(),
            is_websocket: false,
        }
    }
}

impl WithOptions for HttpHandler {
    fn options_mut(&mut self) -> &mut LevelOptions {
        &mut self.options
    }
}

impl fmt::Debug for HttpHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpHandler")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .field("path", &self.path)
            .field("sync", &self.is_sync())
            .field("signature", &self.signature)
            .field("options", &self.options)
            .finish()
    }
}

/// A WebSocket handler.
#[derive(Clone)]
pub struct WebSocketHandler {
    pub(crate) path: String,
    pub(crate) callable: Arc<SocketHandlerFn>,
    pub(crate) signature: Signature,
    pub(crate) options: LevelOptions,
    pub(crate) name: String,
}

impl WebSocketHandler {
    /// The `socket` parameter is declared up front.
    pub fn new<F, Fut>(path: impl Into<String>, func: F) -> Self
    where
        F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let path = path.into();
        let name = callable_name::<F>().unwrap_or_else(|| name_from_path(&path));
        let callable: Arc<SocketHandlerFn> = Arc::new(move |kwargs| Box::pin(func(kwargs)));
        Self {
            path,
            callable,
            signature: Signature::new().param("socket", TypeHint::Any),
            options: LevelOptions::new(),
            name,
        }
    }

    pub fn param(mut self, name: impl Into<String>, hint: TypeHint) -> Self {
        self.signature = self.signature.param(name, hint);
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        hint: TypeHint,
        default: impl Into<Value>,
    ) -> Self {
        self.signature = self.signature.optional(name, hint, default);
        self
    }

    pub fn param_with(mut self, name: impl Into<String>, hint: TypeHint, marker: Param) -> Self {
        self.signature = self.signature.param_with(name, hint, marker);
        self
    }

    /// Replace the whole signature, `socket` included.
    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handler_name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Signature {
        &self.signature
    }

    pub fn options(&self) -> &LevelOptions {
        &self.options
    }

    pub(crate) async fn call(&self, kwargs: Kwargs) -> Result<(), Error> {
        (self.callable)(kwargs).await
    }

    pub(crate) fn info(&self, full_path: &str, tags: &[String]) -> HandlerInfo {
        HandlerInfo {
            name: self.name.clone(),
            path: full_path.to_string(),
            methods: Vec::new(),
            tags: tags.to_vec(),
            is_websocket: true,
        }
    }
}

impl WithOptions for WebSocketHandler {
    fn options_mut(&mut self) -> &mut LevelOptions {
        &mut self.options
    }
}

impl fmt::Debug for WebSocketHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketHandler")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("signature", &self.signature)
            .finish()
    }
}

// ========== Constructors ==========

/// Handler for an explicit method list.
pub fn route<I, S, F, Fut, R>(methods: I, path: impl Into<String>, func: F) -> HttpHandler
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
    F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: Into<Reply>,
{
    HttpHandler::new(methods, path, func)
}

macro_rules! method_constructor {
    ($($(#[$doc:meta])* $fn_name:ident => $method:literal),+ $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $fn_name<F, Fut, R>(path: impl Into<String>, func: F) -> HttpHandler
            where
                F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = Result<R, Error>> + Send + 'static,
                R: Into<Reply>,
            {
                HttpHandler::new([$method], path, func)
            }
        )+
    };
}

method_constructor! {
    /// `GET` handler; also answers `HEAD`.
    get => "GET",
    post => "POST",
    put => "PUT",
    patch => "PATCH",
    delete => "DELETE",
    options => "OPTIONS",
    head => "HEAD",
}

/// WebSocket handler.
pub fn websocket<F, Fut>(path: impl Into<String>, func: F) -> WebSocketHandler
where
    F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    WebSocketHandler::new(path, func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn list_users(_kw: Kwargs) -> Result<Value, Error> {
        Ok(json!([]))
    }

    #[test]
    fn test_name_from_fn_item() {
        let handler = get("/users", list_users);
        assert_eq!(handler.handler_name(), "list_users");
        assert_eq!(
            handler.operation_ids("/api/users"),
            vec![("GET".to_string(), "list_users_api_users_get".to_string())]
        );
    }

    #[test]
    fn test_closure_name_falls_back_to_path() {
        let handler = post("/items/{id}", |_kw: Kwargs| async { Ok(()) });
        assert_eq!(handler.handler_name(), "items__id");
    }

    #[test]
    fn test_explicit_operation_id_per_method() {
        let handler = route(["get", "POST", "GET"], "/x", |_kw: Kwargs| async { Ok(()) })
            .operation_id("things");
        assert_eq!(handler.methods(), &["GET".to_string(), "POST".to_string()]);
        let ids: Vec<String> = handler.operation_ids("/x").into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, vec!["things_get", "things_post"]);
    }

    #[test]
    fn test_get_answers_head() {
        let handler = get("/", |_kw: Kwargs| async { Ok(()) });
        assert!(handler.allows("HEAD"));
        assert!(!handler.allows("POST"));
    }

    #[test]
    fn test_empty_methods_rejected() {
        let handler = route(Vec::<String>::new(), "/", |_kw: Kwargs| async { Ok(()) });
        assert!(matches!(handler.validate(), Err(Error::ImproperlyConfigured(_))));
    }

    #[tokio::test]
    async fn test_sync_handler_runs_on_blocking_pool() {
        let handler = HttpHandler::sync(["GET"], "/", |_kw: Kwargs| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok("done")
        });
        assert!(handler.is_sync());
        let limiter = Some(Arc::new(Semaphore::new(1)));
        let reply = handler.callable.call(Kwargs::new(), limiter).await.unwrap();
        assert!(matches!(reply, Reply::Text(text) if text == "done"));
    }

    #[tokio::test]
    async fn test_websocket_declares_socket() {
        let handler = websocket("/ws", |_kw: Kwargs| async { Ok(()) });
        assert!(handler.params().contains("socket"));
    }
}
