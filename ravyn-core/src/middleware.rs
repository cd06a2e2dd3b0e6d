// Middleware system wrapping ASGI calls

use crate::asgi::{Message, Receive, Scope, ScopeKind, Sender};
use crate::logging::{debug, info, trace, warn};
use crate::settings::{self, Settings};
use crate::Error;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

/// The rest of the chain after the current middleware
pub type Next = Box<dyn FnOnce(Scope, Receive, Sender) -> BoxFuture<'static, Result<(), Error>> + Send>;

/// Type alias for the innermost application of a chain
pub type Endpoint =
    Arc<dyn Fn(Scope, Receive, Sender) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Middleware wraps the downstream application.
///
/// An implementation may rewrite the scope, wrap `receive`/`send`, answer the
/// request itself, or call `next` to continue.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        scope: Scope,
        receive: Receive,
        send: Sender,
        next: Next,
    ) -> Result<(), Error>;
}

/// Middleware chain executor
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            middlewares: Arc::new(middlewares),
        }
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the chain around `endpoint`. The first middleware is the outermost.
    pub async fn apply(
        &self,
        scope: Scope,
        receive: Receive,
        send: Sender,
        endpoint: Endpoint,
    ) -> Result<(), Error> {
        trace!(
            middleware_count = self.middlewares.len(),
            path = %scope.path,
            "Executing middleware chain"
        );
        self.execute_from(0, scope, receive, send, endpoint).await
    }

    fn execute_from(
        &self,
        index: usize,
        scope: Scope,
        receive: Receive,
        send: Sender,
        endpoint: Endpoint,
    ) -> BoxFuture<'static, Result<(), Error>> {
        if index >= self.middlewares.len() {
            trace!("Middleware chain complete, calling endpoint");
            endpoint(scope, receive, send)
        } else {
            let middleware = self.middlewares[index].clone();
            let chain = self.clone();

            trace!(middleware_index = index, "Executing middleware");
            Box::pin(async move {
                middleware
                    .handle(
                        scope,
                        receive,
                        send,
                        Box::new(move |scope, receive, send| {
                            chain.execute_from(index + 1, scope, receive, send, endpoint)
                        }),
                    )
                    .await
            })
        }
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

// ========== Built-in Middleware ==========

/// Publishes an application's settings for everything downstream.
///
/// Inside, `Scope::settings` and [`settings::current`] both report these
/// settings; a nested application installs its own on the way in.
pub struct SettingsMiddleware {
    settings: Arc<Settings>,
}

impl SettingsMiddleware {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Middleware for SettingsMiddleware {
    async fn handle(
        &self,
        mut scope: Scope,
        receive: Receive,
        send: Sender,
        next: Next,
    ) -> Result<(), Error> {
        scope.settings = Some(self.settings.clone());
        settings::scoped(self.settings.clone(), next(scope, receive, send)).await
    }
}

/// Propagates or generates an `x-request-id` header.
pub struct RequestIdMiddleware {
    header: String,
}

impl RequestIdMiddleware {
    pub fn new() -> Self {
        Self {
            header: "x-request-id".to_string(),
        }
    }

    pub fn header(mut self, name: impl Into<String>) -> Self {
        self.header = name.into().to_ascii_lowercase();
        self
    }
}

impl Default for RequestIdMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for RequestIdMiddleware {
    async fn handle(
        &self,
        mut scope: Scope,
        receive: Receive,
        send: Sender,
        next: Next,
    ) -> Result<(), Error> {
        if scope.kind != ScopeKind::Http {
            return next(scope, receive, send).await;
        }

        // Generate or use existing request ID
        let request_id = scope
            .headers
            .get(&self.header)
            .map(str::to_owned)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        scope.headers.insert(&self.header, request_id.clone());
        scope.state.set("request_id", request_id.clone());

        let header = self.header.clone();
        let send = send.map(move |message| match message {
            Message::HttpResponseStart { status, mut headers } => {
                if !headers.iter().any(|(k, _)| *k == header) {
                    headers.push((header.clone(), request_id.clone()));
                }
                Message::HttpResponseStart { status, headers }
            }
            other => other,
        });
        next(scope, receive, send).await
    }
}

/// Logs one line per request with status and duration.
pub struct LoggerMiddleware {
    pub log_headers: bool,
}

impl LoggerMiddleware {
    pub fn new() -> Self {
        Self { log_headers: false }
    }
}

impl Default for LoggerMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for LoggerMiddleware {
    async fn handle(
        &self,
        scope: Scope,
        receive: Receive,
        send: Sender,
        next: Next,
    ) -> Result<(), Error> {
        let start = std::time::Instant::now();
        let method = scope.method.clone();
        let path = scope.full_path();

        if self.log_headers {
            debug!(method = %method, path = %path, headers = ?scope.headers, "Request started");
        } else {
            debug!(method = %method, path = %path, "Request started");
        }

        let status = Arc::new(AtomicU16::new(0));
        let observed = status.clone();
        let send = send.map(move |message| {
            match &message {
                Message::HttpResponseStart { status, .. } => {
                    observed.store(*status, Ordering::SeqCst)
                }
                Message::WebSocketAccept { .. } => observed.store(101, Ordering::SeqCst),
                _ => {}
            }
            message
        });

        let result = next(scope, receive, send).await;
        let duration = start.elapsed();

        match &result {
            Ok(()) => info!(
                method = %method,
                path = %path,
                status = status.load(Ordering::SeqCst),
                duration_ms = duration.as_millis() as u64,
                "Request completed"
            ),
            Err(e) => warn!(
                method = %method,
                path = %path,
                error = %e,
                duration_ms = duration.as_millis() as u64,
                "Request failed"
            ),
        }
        result
    }
}
