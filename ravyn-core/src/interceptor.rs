// Interceptors run after the before-request hooks and ahead of permissions

use crate::asgi::{Request, Sender};
use crate::logging::{debug, trace};
use crate::response::Response;
use crate::Error;
use async_trait::async_trait;
use std::future::Future;

/// What the pipeline does after an interceptor ran.
#[derive(Debug)]
pub enum Flow {
    /// Run the next interceptor, then the rest of the pipeline
    Continue,
    /// Answer with this response; the remaining interceptors and the handler are skipped
    Respond(Response),
}

/// Interceptor trait for reading or rewriting the request before the handler
///
/// An interceptor may also write a response through `send` directly; the
/// pipeline stops as soon as a response has started.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, request: &mut Request, send: &Sender) -> Result<Flow, Error>;
}

/// Logging interceptor
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, request: &mut Request, _send: &Sender) -> Result<Flow, Error> {
        debug!(
            method = %request.method(),
            path = %request.path(),
            params = ?request.path_params(),
            "Intercepted request"
        );
        Ok(Flow::Continue)
    }
}

/// Copies a header into the request state under a name.
pub struct HeaderToStateInterceptor {
    header: String,
    key: String,
}

impl HeaderToStateInterceptor {
    pub fn new(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl Interceptor for HeaderToStateInterceptor {
    async fn intercept(&self, request: &mut Request, _send: &Sender) -> Result<Flow, Error> {
        if let Some(value) = request.header(&self.header).map(str::to_owned) {
            trace!(header = %self.header, key = %self.key, "Copying header into state");
            request.state().set(self.key.clone(), value);
        }
        Ok(Flow::Continue)
    }
}

/// Closure-backed interceptor.
pub struct FnInterceptor<F> {
    func: F,
}

impl<F, Fut> FnInterceptor<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Flow, Error>> + Send,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Interceptor for FnInterceptor<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Flow, Error>> + Send,
{
    async fn intercept(&self, request: &mut Request, _send: &Sender) -> Result<Flow, Error> {
        (self.func)(request.clone()).await
    }
}
