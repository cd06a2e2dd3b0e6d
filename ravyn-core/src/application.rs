// Application assembly and ASGI entry point

use crate::asgi::{AsgiApp, Message, Receive, Request, Scope, ScopeKind, Sender};
use crate::dependencies;
use crate::encoders::{self, Encoder, EncoderRegistry};
use crate::exception::{self, ExceptionHandler};
use crate::extension::{Extension, ExtensionRegistry};
use crate::extract::{Argument, CallContext};
use crate::lifespan::{self, Lifespan, LifespanHook};
use crate::logging::{debug, info, trace, warn};
use crate::middleware::{Endpoint, Middleware, MiddlewareChain, SettingsMiddleware};
use crate::options::{EffectiveOptions, LevelOptions, WithOptions};
use crate::routing::{ChildApp, CompiledRoutes, Route, RouteInfo};
use crate::settings::{self, Settings};
use crate::signature::Source;
use crate::state::State;
use crate::websocket::{CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION};
use crate::Error;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;

struct AppInner {
    settings: Arc<Settings>,
    options: LevelOptions,
    declared: RwLock<Vec<Route>>,
    routes: RwLock<Arc<CompiledRoutes>>,
    middleware: MiddlewareChain,
    /// Settings and app levels, innermost first
    exception_handlers: Vec<Vec<ExceptionHandler>>,
    encoders: EncoderRegistry,
    extensions: ExtensionRegistry,
    state: State,
    dependency_cache: Mutex<HashMap<String, Argument>>,
    limiter: Arc<Semaphore>,
    on_startup: Vec<LifespanHook>,
    on_shutdown: Vec<LifespanHook>,
    started: AtomicBool,
}

/// A Ravyn application.
///
/// Cloning is cheap; clones share routes, state and caches.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

/// Builder for [`App`].
#[derive(Default)]
pub struct AppBuilder {
    settings: Option<Settings>,
    routes: Vec<Route>,
    options: LevelOptions,
    encoders: Vec<Arc<dyn Encoder>>,
    extensions: Vec<Arc<dyn Extension>>,
    on_startup: Vec<LifespanHook>,
    on_shutdown: Vec<LifespanHook>,
    state: State,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for this application; defaults to the active settings.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn route(mut self, route: impl Into<Route>) -> Self {
        self.routes.push(route.into());
        self
    }

    pub fn routes(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        self.routes.extend(routes);
        self
    }

    pub fn encoder<E: Encoder + 'static>(mut self, encoder: E) -> Self {
        self.encoders.push(Arc::new(encoder));
        self
    }

    pub fn extension<E: Extension + 'static>(mut self, extension: E) -> Self {
        self.extensions.push(Arc::new(extension));
        self
    }

    pub fn on_startup(mut self, hook: LifespanHook) -> Self {
        self.on_startup.push(hook);
        self
    }

    pub fn on_shutdown(mut self, hook: LifespanHook) -> Self {
        self.on_shutdown.push(hook);
        self
    }

    /// Application state, reachable from handlers through the `app` parameter.
    pub fn state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// Validate the configuration and compile the route tree.
    pub fn build(self) -> Result<App, Error> {
        let settings = match self.settings {
            Some(settings) => Arc::new(settings),
            None => settings::current(),
        };
        settings.validate()?;

        let mut extensions = settings.components.extensions.clone();
        extensions.extend(self.extensions);
        let extensions = ExtensionRegistry::new(extensions)?;

        let mut encoders_list = self.encoders;
        encoders_list.extend(settings.components.encoders.iter().cloned());
        let encoders = EncoderRegistry::global().with_encoders(&encoders_list);

        let mut chain: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(SettingsMiddleware::new(settings.clone()))];
        chain.extend(settings.components.options.middleware.iter().cloned());
        chain.extend(self.options.middleware.iter().cloned());

        let levels = base_levels(&settings, &self.options);
        let exception_handlers = EffectiveOptions::compose(levels.iter()).exception_handlers;
        let routes = CompiledRoutes::compile(&self.routes, &levels, &settings)?;

        let mut on_startup = settings.components.on_startup.clone();
        on_startup.extend(self.on_startup);
        let mut on_shutdown = self.on_shutdown;
        on_shutdown.extend(settings.components.on_shutdown.iter().cloned());

        info!(
            title = %settings.title,
            routes = self.routes.len(),
            middleware = chain.len(),
            extensions = extensions.len(),
            "Application built"
        );

        Ok(App {
            inner: Arc::new(AppInner {
                limiter: Arc::new(Semaphore::new(settings.sync_handler_limit)),
                settings,
                options: self.options,
                declared: RwLock::new(self.routes),
                routes: RwLock::new(Arc::new(routes)),
                middleware: MiddlewareChain::new(chain),
                exception_handlers,
                encoders,
                extensions,
                state: self.state,
                dependency_cache: Mutex::new(HashMap::new()),
                on_startup,
                on_shutdown,
                started: AtomicBool::new(false),
            }),
        })
    }
}

impl WithOptions for AppBuilder {
    fn options_mut(&mut self) -> &mut LevelOptions {
        &mut self.options
    }
}

/// The settings and app levels seen by the route tree. Their middleware
/// wraps the whole application instead of each route.
fn base_levels(settings: &Settings, options: &LevelOptions) -> Vec<LevelOptions> {
    [&settings.components.options, options]
        .into_iter()
        .map(|level| LevelOptions {
            middleware: Vec::new(),
            ..level.clone()
        })
        .collect()
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// An application with the active settings and `routes`.
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Result<Self, Error> {
        AppBuilder::new().routes(routes).build()
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.inner.settings
    }

    pub fn state(&self) -> &State {
        &self.inner.state
    }

    pub fn encoders(&self) -> &EncoderRegistry {
        &self.inner.encoders
    }

    pub fn extension(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.inner.extensions.get(name)
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.inner.extensions
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Metadata of every HTTP route, including mounted child applications.
    pub fn routes_info(&self) -> Vec<RouteInfo> {
        self.routes_info_at("")
    }

    pub(crate) fn routes_info_at(&self, prefix: &str) -> Vec<RouteInfo> {
        self.inner.routes.read().routes_info(prefix)
    }

    /// Register a route after construction.
    ///
    /// The whole tree is recompiled; requests already running keep the tree
    /// they started with.
    pub fn add_route(&self, route: impl Into<Route>) -> Result<(), Error> {
        let mut declared = self.inner.declared.write();
        declared.push(route.into());
        let levels = base_levels(&self.inner.settings, &self.inner.options);
        match CompiledRoutes::compile(&declared, &levels, &self.inner.settings) {
            Ok(routes) => {
                *self.inner.routes.write() = Arc::new(routes);
                debug!(routes = declared.len(), "Route tree recompiled");
                Ok(())
            }
            Err(e) => {
                declared.pop();
                Err(e)
            }
        }
    }

    /// Mount `app` under `path` after construction.
    pub fn add_child_app(&self, path: impl Into<String>, app: App) -> Result<(), Error> {
        self.add_route(ChildApp::new(path, app))
    }

    pub(crate) fn limiter(&self) -> Arc<Semaphore> {
        self.inner.limiter.clone()
    }

    pub(crate) fn cached_dependency(&self, key: &str) -> Option<Argument> {
        self.inner.dependency_cache.lock().get(key).cloned()
    }

    pub(crate) fn store_dependency(&self, key: String, value: Argument) {
        self.inner.dependency_cache.lock().insert(key, value);
    }

    async fn dispatch(&self, scope: Scope, receive: Receive, send: Sender) -> Result<(), Error> {
        let routes = self.inner.routes.read().clone();
        let (send, state) = send.tracked();
        let kind = scope.kind;
        let fallback = Request::new(scope.clone(), receive.clone());

        match routes
            .dispatch(scope, receive, send.clone(), self.inner.settings.redirect_slashes)
            .await
        {
            Err(err) if !state.started() => self.render_error(kind, &fallback, &send, err).await,
            Err(err) => {
                warn!(error = %err, path = %fallback.path(), "Error after the response started");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn render_error(
        &self,
        kind: ScopeKind,
        request: &Request,
        send: &Sender,
        err: Error,
    ) -> Result<(), Error> {
        if kind == ScopeKind::WebSocket {
            let code = if err.is_server_error() {
                CLOSE_INTERNAL_ERROR
            } else {
                CLOSE_POLICY_VIOLATION
            };
            debug!(error = %err, code, "Closing websocket after error");
            return send
                .send(Message::WebSocketClose { code, reason: None })
                .await;
        }
        let response = exception::handle_error(
            &self.inner.exception_handlers,
            request,
            &err,
            self.inner.settings.debug,
        )
        .await;
        response.send_with(send, request.method() == "HEAD").await
    }

    /// Resolve app-scoped dependencies that need nothing from a request.
    async fn warm_dependencies(&self) {
        let routes = self.inner.routes.read().clone();
        let mut scope = Scope::http("GET", "/");
        scope.app = Some(self.clone());
        scope.settings = Some(self.inner.settings.clone());
        let request = Request::new(scope, Receive::empty());

        for graph in routes.graphs() {
            let keys: Vec<String> = graph
                .app_scoped()
                .filter(|node| {
                    node.model
                        .specs()
                        .iter()
                        .all(|spec| spec.source == Source::Dependency)
                })
                .map(|node| node.key.clone())
                .collect();
            for key in keys {
                let ctx = CallContext {
                    request: request.clone(),
                    socket: None,
                    graph: graph.clone(),
                    limiter: Some(self.limiter()),
                };
                match dependencies::resolve(&key, &ctx).await {
                    Ok(_) => trace!(dependency = %key, "Warmed app-scoped dependency"),
                    Err(e) => debug!(dependency = %key, error = %e, "Deferred app-scoped dependency"),
                }
            }
        }
    }

    /// Serve the application over HTTP/1.1 and WebSocket.
    pub async fn serve(self, addr: std::net::SocketAddr) -> Result<(), Error> {
        crate::server::serve(self, addr).await
    }
}

#[async_trait]
impl AsgiApp for App {
    async fn call(&self, mut scope: Scope, receive: Receive, send: Sender) -> Result<(), Error> {
        if scope.kind == ScopeKind::Lifespan {
            return lifespan::serve_lifespan(self, receive, send).await;
        }

        scope.app = Some(self.clone());
        let app = self.clone();
        let endpoint: Endpoint = Arc::new(
            move |scope: Scope, receive: Receive, send: Sender| -> BoxFuture<'static, Result<(), Error>> {
                let app = app.clone();
                Box::pin(async move { app.dispatch(scope, receive, send).await })
            },
        );

        let (send, state) = send.tracked();
        let kind = scope.kind;
        let fallback = Request::new(scope.clone(), receive.clone());
        let result = encoders::scoped(
            self.inner.encoders.clone(),
            self.inner.middleware.apply(scope, receive, send.clone(), endpoint),
        )
        .await;

        match result {
            Err(err) if !state.started() => self.render_error(kind, &fallback, &send, err).await,
            Err(err) => {
                warn!(error = %err, "Middleware failed after the response started");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}

#[async_trait]
impl Lifespan for App {
    async fn startup(&self) -> Result<(), Error> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let settings = self.inner.settings.clone();
        let run = async {
            self.inner.extensions.extend_all(self).await?;
            lifespan::run_hooks("startup", &self.inner.on_startup).await?;
            let children = self.inner.routes.read().child_apps();
            for child in children {
                child.startup().await?;
            }
            encoders::scoped(self.inner.encoders.clone(), self.warm_dependencies()).await;
            Ok::<(), Error>(())
        };
        let result = settings::scoped(settings, run).await;
        if result.is_err() {
            self.inner.started.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn shutdown(&self) -> Result<(), Error> {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let settings = self.inner.settings.clone();
        let run = async {
            lifespan::run_hooks("shutdown", &self.inner.on_shutdown).await?;
            let children = self.inner.routes.read().child_apps();
            for child in children {
                child.shutdown().await?;
            }
            Ok::<(), Error>(())
        };
        let result = settings::scoped(settings, run).await;
        self.inner.dependency_cache.lock().clear();
        result
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("title", &self.inner.settings.title)
            .field("routes", &self.inner.declared.read().len())
            .field("middleware", &self.inner.middleware.len())
            .finish()
    }
}
