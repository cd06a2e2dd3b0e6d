//! The per-request pipeline.
//!
//! A matched HTTP request goes through, in order:
//!
//! 1. the route middleware (mount, gateway and handler levels),
//! 2. the `before_request` hooks,
//! 3. the interceptors,
//! 4. the transport permissions,
//! 5. the framework permissions,
//! 6. parameter extraction and dependency resolution,
//! 7. the handler,
//! 8. response adaptation,
//!
//! and finally the `after_request` hooks, which run whatever happened above.
//! Errors raised inside are rendered by the nearest exception handler before
//! the after hooks run. WebSocket connections follow the same steps, closing
//! the socket instead of writing an error response.

use crate::asgi::{Message, Receive, Request, Scope, Sender};
use crate::encoders;
use crate::exception;
use crate::extract::{self, CallContext};
use crate::interceptor::Flow;
use crate::logging::{debug, trace, warn};
use crate::middleware::{Endpoint, Middleware, Next};
use crate::options::RequestHook;
use crate::permission::{self, TransportPermission};
use crate::response;
use crate::routing::{HttpEndpoint, WsEndpoint};
use crate::websocket::{CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, WebSocket};
use crate::Error;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Runs a transport permission as a middleware layer.
pub(crate) struct TransportLayer {
    permission: Arc<dyn TransportPermission>,
}

impl TransportLayer {
    pub(crate) fn new(permission: Arc<dyn TransportPermission>) -> Self {
        Self { permission }
    }
}

#[async_trait]
impl Middleware for TransportLayer {
    async fn handle(
        &self,
        scope: Scope,
        receive: Receive,
        send: Sender,
        next: Next,
    ) -> Result<(), Error> {
        self.permission.handle(scope, receive, send, next).await
    }
}

/// Runs the `after_request` hooks exactly once.
///
/// Dropping an armed guard (the request future was cancelled) moves the
/// hooks onto a detached task.
struct AfterHooks {
    hooks: Vec<RequestHook>,
    request: Request,
    armed: bool,
}

impl AfterHooks {
    fn new(hooks: Vec<RequestHook>, request: Request) -> Self {
        Self {
            hooks,
            request,
            armed: true,
        }
    }

    async fn run(mut self, request: Request) {
        self.armed = false;
        let hooks = std::mem::take(&mut self.hooks);
        run_after(hooks, request).await;
    }
}

impl Drop for AfterHooks {
    fn drop(&mut self) {
        if !self.armed || self.hooks.is_empty() {
            return;
        }
        let hooks = std::mem::take(&mut self.hooks);
        let request = self.request.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(path = %request.path(), "Request cancelled, running after hooks detached");
                handle.spawn(run_after(hooks, request));
            }
            Err(_) => warn!("No runtime available to run after_request hooks"),
        }
    }
}

async fn run_after(hooks: Vec<RequestHook>, request: Request) {
    for hook in hooks {
        if let Err(e) = hook.call(request.clone()).await {
            warn!(error = %e, path = %request.path(), "after_request hook failed");
        }
    }
}

async fn run_before(hooks: &[RequestHook], request: &Request) -> Result<(), Error> {
    for hook in hooks {
        hook.call(request.clone()).await?;
    }
    Ok(())
}

fn limiter_for(request: &Request) -> Option<Arc<tokio::sync::Semaphore>> {
    request.app().map(|app| app.limiter())
}

// ========== HTTP ==========

/// Run a matched HTTP request through its endpoint.
pub(crate) async fn run_http(
    endpoint: Arc<HttpEndpoint>,
    scope: Scope,
    receive: Receive,
    send: Sender,
) -> Result<(), Error> {
    let (send, state) = send.tracked();
    let debug_mode = scope.settings().debug;
    let head_only = scope.method == "HEAD";
    let fallback = Request::new(scope.clone(), receive.clone());

    let inner = endpoint.clone();
    let target: Endpoint = Arc::new(
        move |scope: Scope, receive: Receive, send: Sender| -> BoxFuture<'static, Result<(), Error>> {
            Box::pin(handle_http(inner.clone(), scope, receive, send))
        },
    );

    match endpoint.middleware.apply(scope, receive, send.clone(), target).await {
        Err(err) if !state.started() => {
            let response = exception::handle_error(
                &endpoint.options.exception_handlers,
                &fallback,
                &err,
                debug_mode,
            )
            .await;
            response.send_with(&send, head_only).await
        }
        Err(err) => {
            warn!(error = %err, path = %fallback.path(), "Error after the response started");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

async fn handle_http(
    endpoint: Arc<HttpEndpoint>,
    scope: Scope,
    receive: Receive,
    send: Sender,
) -> Result<(), Error> {
    let (send, state) = send.tracked();
    let debug_mode = scope.settings().debug;
    let head_only = scope.method == "HEAD";
    let mut request = Request::new(scope, receive);
    let guard = AfterHooks::new(endpoint.options.after_request.clone(), request.clone());

    let outcome = async {
        run_before(&endpoint.options.before_request, &request).await?;

        for interceptor in &endpoint.options.interceptors {
            match interceptor.intercept(&mut request, &send).await? {
                Flow::Continue if state.started() => return Ok(()),
                Flow::Continue => {}
                Flow::Respond(response) => {
                    trace!(path = %request.path(), "Interceptor answered the request");
                    return response.send_with(&send, head_only).await;
                }
            }
        }

        if endpoint.transport.is_empty() {
            invoke_http(endpoint.clone(), request.clone(), send.clone()).await
        } else {
            let inner = endpoint.clone();
            let target: Endpoint = Arc::new(
                move |scope: Scope,
                      receive: Receive,
                      send: Sender|
                      -> BoxFuture<'static, Result<(), Error>> {
                    Box::pin(invoke_http(inner.clone(), Request::new(scope, receive), send))
                },
            );
            let (scope, receive) = request.clone().into_parts();
            endpoint.transport.apply(scope, receive, send.clone(), target).await
        }
    }
    .await;

    let result = match outcome {
        Ok(()) => Ok(()),
        Err(err) if !state.started() => {
            let response = exception::handle_error(
                &endpoint.options.exception_handlers,
                &request,
                &err,
                debug_mode,
            )
            .await;
            response.send_with(&send, head_only).await
        }
        Err(err) => {
            warn!(error = %err, path = %request.path(), "Error after the response started");
            Ok(())
        }
    };

    guard.run(request).await;
    result
}

async fn invoke_http(endpoint: Arc<HttpEndpoint>, request: Request, send: Sender) -> Result<(), Error> {
    permission::check_permissions(&endpoint.options.permissions, &request, &endpoint.info).await?;

    let ctx = CallContext {
        limiter: limiter_for(&request),
        request,
        socket: None,
        graph: endpoint.graph.clone(),
    };
    let kwargs = extract::build_kwargs(&endpoint.model, &ctx).await?;
    let reply = endpoint
        .handler
        .callable
        .call(kwargs, ctx.limiter.clone())
        .await?;

    let request = &ctx.request;
    let settings = request.settings();
    let response = response::adapt(
        reply,
        &endpoint.response,
        request.method(),
        &settings.default_media_type,
        &encoders::active(),
    )?;
    response.send_with(&send, request.method() == "HEAD").await
}

// ========== WebSocket ==========

fn close_code(error: &Error) -> u16 {
    if error.is_server_error() {
        CLOSE_INTERNAL_ERROR
    } else {
        CLOSE_POLICY_VIOLATION
    }
}

fn close_reason(error: &Error) -> String {
    // Close frames carry at most 123 bytes of reason
    let mut reason = error.detail(false);
    if reason.len() > 123 {
        let mut end = 123;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

/// Run a matched WebSocket connection through its endpoint.
pub(crate) async fn run_websocket(
    endpoint: Arc<WsEndpoint>,
    scope: Scope,
    receive: Receive,
    send: Sender,
) -> Result<(), Error> {
    let path = scope.path.clone();
    let inner = endpoint.clone();
    let target: Endpoint = Arc::new(
        move |scope: Scope, receive: Receive, send: Sender| -> BoxFuture<'static, Result<(), Error>> {
            Box::pin(handle_websocket(inner.clone(), scope, receive, send))
        },
    );

    if let Err(err) = endpoint.middleware.apply(scope, receive, send.clone(), target).await {
        debug!(error = %err, path = %path, "WebSocket rejected by middleware");
        send.send(Message::WebSocketClose {
            code: close_code(&err),
            reason: Some(close_reason(&err)),
        })
        .await?;
    }
    Ok(())
}

async fn handle_websocket(
    endpoint: Arc<WsEndpoint>,
    scope: Scope,
    receive: Receive,
    send: Sender,
) -> Result<(), Error> {
    let closed = Arc::new(AtomicBool::new(false));
    let flag = closed.clone();
    let send = send.map(move |message| {
        if matches!(message, Message::WebSocketClose { .. }) {
            flag.store(true, Ordering::SeqCst);
        }
        message
    });
    let mut request = Request::new(scope, receive);
    let guard = AfterHooks::new(endpoint.options.after_request.clone(), request.clone());

    let outcome = async {
        run_before(&endpoint.options.before_request, &request).await?;

        for interceptor in &endpoint.options.interceptors {
            if let Flow::Respond(_) = interceptor.intercept(&mut request, &send).await? {
                debug!(path = %request.path(), "Interceptor refused the websocket");
                return Err(Error::PermissionDenied(None));
            }
        }

        let inner = endpoint.clone();
        let target: Endpoint = Arc::new(
            move |scope: Scope, receive: Receive, send: Sender| -> BoxFuture<'static, Result<(), Error>> {
                Box::pin(invoke_websocket(inner.clone(), scope, receive, send))
            },
        );
        let (scope, receive) = request.clone().into_parts();
        endpoint.transport.apply(scope, receive, send.clone(), target).await
    }
    .await;

    let close = match &outcome {
        Ok(()) => Message::WebSocketClose {
            code: CLOSE_NORMAL,
            reason: None,
        },
        Err(err) => {
            if err.is_server_error() {
                warn!(error = %err, path = %request.path(), "WebSocket handler failed");
            } else {
                debug!(error = %err, path = %request.path(), "WebSocket refused");
            }
            Message::WebSocketClose {
                code: close_code(err),
                reason: Some(close_reason(err)),
            }
        }
    };
    let result = if closed.load(Ordering::SeqCst) {
        Ok(())
    } else {
        send.send(close).await
    };

    guard.run(request).await;
    result
}

async fn invoke_websocket(
    endpoint: Arc<WsEndpoint>,
    scope: Scope,
    receive: Receive,
    send: Sender,
) -> Result<(), Error> {
    let socket = WebSocket::new(scope.clone(), receive.clone(), send);
    let request = Request::new(scope, receive);
    permission::check_permissions(&endpoint.options.permissions, &request, &endpoint.info).await?;

    let ctx = CallContext {
        limiter: limiter_for(&request),
        request,
        socket: Some(socket),
        graph: endpoint.graph.clone(),
    };
    let kwargs = extract::build_kwargs(&endpoint.model, &ctx).await?;
    endpoint.handler.call(kwargs).await
}
