//! The route tree.
//!
//! Routes are declared as a tree of [`Route`] values:
//!
//! - [`Gateway`] binds one [`HttpHandler`] under a path,
//! - [`WebSocketGateway`] binds one [`WebSocketHandler`],
//! - [`Include`] groups routes under a prefix and contributes a level of options,
//! - [`HostRoute`] filters its routes by the `Host` header,
//! - [`ChildApp`] mounts a self-contained [`App`].
//!
//! When an application is built the tree is compiled once: every leaf gets
//! its full path pattern, its composed [`EffectiveOptions`], its frozen
//! [`SignatureModel`] and its [`DependencyGraph`]. Matching walks the
//! compiled tree in declaration order; the first leaf whose pattern and
//! method match wins.

use crate::application::App;
use crate::asgi::{Message, Receive, Scope, ScopeKind, Sender};
use crate::dependencies::DependencyGraph;
use crate::handler::{HttpHandler, WebSocketHandler};
use crate::logging::{debug, trace};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::options::{EffectiveOptions, LevelOptions, WithOptions};
use crate::path::{self, PathPattern};
use crate::permission::{HandlerInfo, Permission};
use crate::pipeline::{self, TransportLayer};
use crate::response::{Response, ResponseClass, ResponseSpec};
use crate::settings::Settings;
use crate::signature::{ParamSpec, SignatureModel};
use crate::websocket::CLOSE_NORMAL;
use crate::Error;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ========== Declarations ==========

/// A leaf HTTP route.
#[derive(Clone, Debug)]
pub struct Gateway {
    pub(crate) path: String,
    pub(crate) handler: HttpHandler,
    pub(crate) options: LevelOptions,
}

impl Gateway {
    /// Mount `handler` at its own path.
    pub fn new(handler: HttpHandler) -> Self {
        Self::with_path("/", handler)
    }

    /// Mount `handler` under `path`; the handler's own path is appended.
    pub fn with_path(path: impl Into<String>, handler: HttpHandler) -> Self {
        Self {
            path: path.into(),
            handler,
            options: LevelOptions::new(),
        }
    }

    pub fn handler(&self) -> &HttpHandler {
        &self.handler
    }
}

impl WithOptions for Gateway {
    fn options_mut(&mut self) -> &mut LevelOptions {
        &mut self.options
    }
}

/// A leaf WebSocket route.
#[derive(Clone, Debug)]
pub struct WebSocketGateway {
    pub(crate) path: String,
    pub(crate) handler: WebSocketHandler,
    pub(crate) options: LevelOptions,
}

impl WebSocketGateway {
    pub fn new(handler: WebSocketHandler) -> Self {
        Self::with_path("/", handler)
    }

    pub fn with_path(path: impl Into<String>, handler: WebSocketHandler) -> Self {
        Self {
            path: path.into(),
            handler,
            options: LevelOptions::new(),
        }
    }
}

impl WithOptions for WebSocketGateway {
    fn options_mut(&mut self) -> &mut LevelOptions {
        &mut self.options
    }
}

/// Routes grouped under a prefix.
#[derive(Clone, Debug)]
pub struct Include {
    pub(crate) path: String,
    pub(crate) routes: Vec<Route>,
    pub(crate) options: LevelOptions,
}

impl Include {
    pub fn new(path: impl Into<String>, routes: impl IntoIterator<Item = Route>) -> Self {
        Self {
            path: path.into(),
            routes: routes.into_iter().collect(),
            options: LevelOptions::new(),
        }
    }

    /// Mount a router; its options become this level's options.
    pub fn router(path: impl Into<String>, router: Router) -> Self {
        Self {
            path: path.into(),
            routes: router.routes,
            options: router.options,
        }
    }

    pub fn route(mut self, route: impl Into<Route>) -> Self {
        self.routes.push(route.into());
        self
    }
}

impl WithOptions for Include {
    fn options_mut(&mut self) -> &mut LevelOptions {
        &mut self.options
    }
}

/// Routes served only for a matching `Host` header.
///
/// `{name}` tokens in the host pattern become path parameters.
#[derive(Clone, Debug)]
pub struct HostRoute {
    pub(crate) host: String,
    pub(crate) routes: Vec<Route>,
}

impl HostRoute {
    pub fn new(host: impl Into<String>, routes: impl IntoIterator<Item = Route>) -> Self {
        Self {
            host: host.into(),
            routes: routes.into_iter().collect(),
        }
    }
}

/// A self-contained application mounted under a prefix.
#[derive(Clone, Debug)]
pub struct ChildApp {
    pub(crate) path: String,
    pub(crate) app: App,
}

impl ChildApp {
    pub fn new(path: impl Into<String>, app: App) -> Self {
        Self {
            path: path.into(),
            app,
        }
    }
}

/// A node of the declared route tree.
#[derive(Clone, Debug)]
pub enum Route {
    Gateway(Gateway),
    WebSocketGateway(WebSocketGateway),
    Include(Include),
    Host(HostRoute),
    ChildApp(ChildApp),
}

impl From<Gateway> for Route {
    fn from(gateway: Gateway) -> Self {
        Route::Gateway(gateway)
    }
}

impl From<HttpHandler> for Route {
    fn from(handler: HttpHandler) -> Self {
        Route::Gateway(Gateway::new(handler))
    }
}

impl From<WebSocketGateway> for Route {
    fn from(gateway: WebSocketGateway) -> Self {
        Route::WebSocketGateway(gateway)
    }
}

impl From<WebSocketHandler> for Route {
    fn from(handler: WebSocketHandler) -> Self {
        Route::WebSocketGateway(WebSocketGateway::new(handler))
    }
}

impl From<Include> for Route {
    fn from(include: Include) -> Self {
        Route::Include(include)
    }
}

impl From<HostRoute> for Route {
    fn from(host: HostRoute) -> Self {
        Route::Host(host)
    }
}

impl From<ChildApp> for Route {
    fn from(child: ChildApp) -> Self {
        Route::ChildApp(child)
    }
}

/// A list of routes with a level of options, mountable with [`Include::router`].
#[derive(Clone, Debug, Default)]
pub struct Router {
    pub(crate) routes: Vec<Route>,
    pub(crate) options: LevelOptions,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, route: impl Into<Route>) -> Self {
        self.routes.push(route.into());
        self
    }

    pub fn add_route(&mut self, route: impl Into<Route>) {
        self.routes.push(route.into());
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

impl WithOptions for Router {
    fn options_mut(&mut self) -> &mut LevelOptions {
        &mut self.options
    }
}

// ========== Compiled tree ==========

/// A compiled HTTP leaf.
pub(crate) struct HttpEndpoint {
    pub(crate) pattern: PathPattern,
    pub(crate) handler: HttpHandler,
    pub(crate) options: EffectiveOptions,
    pub(crate) model: SignatureModel,
    pub(crate) graph: Arc<DependencyGraph>,
    /// Mount, gateway and handler middleware
    pub(crate) middleware: MiddlewareChain,
    pub(crate) transport: MiddlewareChain,
    pub(crate) response: ResponseSpec,
    pub(crate) info: HandlerInfo,
}

/// A compiled WebSocket leaf.
pub(crate) struct WsEndpoint {
    pub(crate) pattern: PathPattern,
    pub(crate) handler: WebSocketHandler,
    pub(crate) options: EffectiveOptions,
    pub(crate) model: SignatureModel,
    pub(crate) graph: Arc<DependencyGraph>,
    pub(crate) middleware: MiddlewareChain,
    pub(crate) transport: MiddlewareChain,
    pub(crate) info: HandlerInfo,
}

pub(crate) struct ChildMount {
    pattern: PathPattern,
    pub(crate) app: App,
    middleware: MiddlewareChain,
}

enum Node {
    Http(Arc<HttpEndpoint>),
    WebSocket(Arc<WsEndpoint>),
    Mount {
        pattern: PathPattern,
        children: Vec<Node>,
    },
    Host {
        pattern: PathPattern,
        children: Vec<Node>,
    },
    Child(Arc<ChildMount>),
}

/// Route metadata exposed to schema generators.
#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub path: String,
    pub name: String,
    pub methods: Vec<String>,
    /// `(method, operation id)`
    pub operation_ids: Vec<(String, String)>,
    pub params: Vec<ParamSpec>,
    pub response_model: Option<String>,
    pub status_code: Option<u16>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub security: Vec<String>,
    pub tags: Vec<String>,
    pub deprecated: bool,
    pub include_in_schema: bool,
}

enum Resolution {
    Http(Arc<HttpEndpoint>, HashMap<String, Value>),
    WebSocket(Arc<WsEndpoint>, HashMap<String, Value>),
    Child {
        mount: Arc<ChildMount>,
        params: HashMap<String, Value>,
        remainder: String,
    },
    MethodNotAllowed(Vec<String>),
    NotFound,
}

/// The compiled, immutable route tree of one application.
pub(crate) struct CompiledRoutes {
    nodes: Vec<Node>,
}

struct Compiler<'a> {
    settings: &'a Settings,
}

fn at_route(path: &str, error: Error) -> Error {
    match error {
        Error::ImproperlyConfigured(msg) => {
            Error::ImproperlyConfigured(format!("{} (route '{}')", msg, path))
        }
        other => other,
    }
}

fn transport_chain(permissions: &[Permission]) -> MiddlewareChain {
    MiddlewareChain::new(
        permissions
            .iter()
            .filter_map(|permission| match permission {
                Permission::Transport(inner) => {
                    Some(Arc::new(TransportLayer::new(inner.clone())) as Arc<dyn Middleware>)
                }
                Permission::Framework(_) => None,
            })
            .collect(),
    )
}

impl Compiler<'_> {
    fn compile(
        &self,
        routes: &[Route],
        prefix: &str,
        levels: &[LevelOptions],
        extra_params: &HashSet<String>,
    ) -> Result<Vec<Node>, Error> {
        let mut nodes = Vec::with_capacity(routes.len());
        for route in routes {
            let node = match route {
                Route::Gateway(gateway) => {
                    let full = path::join_paths(
                        &path::join_paths(prefix, &gateway.path),
                        &gateway.handler.path,
                    );
                    let endpoint = self
                        .http_endpoint(&full, gateway, levels, extra_params)
                        .map_err(|e| at_route(&full, e))?;
                    Node::Http(Arc::new(endpoint))
                }
                Route::WebSocketGateway(gateway) => {
                    let full = path::join_paths(
                        &path::join_paths(prefix, &gateway.path),
                        &gateway.handler.path,
                    );
                    let endpoint = self
                        .ws_endpoint(&full, gateway, levels, extra_params)
                        .map_err(|e| at_route(&full, e))?;
                    Node::WebSocket(Arc::new(endpoint))
                }
                Route::Include(include) => {
                    let full = path::join_paths(prefix, &include.path);
                    let mut inner = levels.to_vec();
                    inner.push(include.options.clone());
                    Node::Mount {
                        pattern: PathPattern::prefix(&full).map_err(|e| at_route(&full, e))?,
                        children: self.compile(&include.routes, &full, &inner, extra_params)?,
                    }
                }
                Route::Host(host) => {
                    let pattern = PathPattern::host(&host.host)?;
                    let mut params = extra_params.clone();
                    params.extend(pattern.param_names());
                    Node::Host {
                        children: self.compile(&host.routes, prefix, levels, &params)?,
                        pattern,
                    }
                }
                Route::ChildApp(child) => {
                    let full = path::join_paths(prefix, &child.path);
                    let options = EffectiveOptions::compose(levels.iter());
                    Node::Child(Arc::new(ChildMount {
                        pattern: PathPattern::prefix(&full).map_err(|e| at_route(&full, e))?,
                        app: child.app.clone(),
                        middleware: MiddlewareChain::new(options.middleware),
                    }))
                }
            };
            nodes.push(node);
        }
        Ok(nodes)
    }

    fn http_endpoint(
        &self,
        full_path: &str,
        gateway: &Gateway,
        levels: &[LevelOptions],
        extra_params: &HashSet<String>,
    ) -> Result<HttpEndpoint, Error> {
        let handler = &gateway.handler;
        handler.validate()?;

        let pattern = PathPattern::new(full_path)?;
        let options = EffectiveOptions::compose(
            levels
                .iter()
                .chain([&gateway.options, &handler.options]),
        );
        let mut path_params = pattern.param_names();
        path_params.extend(extra_params.iter().cloned());
        let dependency_names: HashSet<String> =
            options.dependency_names().map(str::to_owned).collect();

        let model = SignatureModel::build(&handler.signature, &path_params, &dependency_names, false)?;
        let graph = DependencyGraph::build(&model, &options.dependencies, &path_params)?;

        let mut response = handler.response.clone();
        if response.response_class.is_none()
            && self.settings.default_response_class != ResponseClass::Json
        {
            response.response_class = Some(self.settings.default_response_class);
        }

        debug!(
            path = full_path,
            methods = ?handler.methods,
            handler = %handler.name,
            dependencies = graph.len(),
            "Registered route"
        );

        Ok(HttpEndpoint {
            info: handler.info(full_path, &options.tags),
            middleware: MiddlewareChain::new(options.middleware.clone()),
            transport: transport_chain(&options.permissions),
            pattern,
            handler: handler.clone(),
            model,
            graph: Arc::new(graph),
            response,
            options,
        })
    }

    fn ws_endpoint(
        &self,
        full_path: &str,
        gateway: &WebSocketGateway,
        levels: &[LevelOptions],
        extra_params: &HashSet<String>,
    ) -> Result<WsEndpoint, Error> {
        let handler = &gateway.handler;
        let pattern = PathPattern::new(full_path)?;
        let options = EffectiveOptions::compose(
            levels
                .iter()
                .chain([&gateway.options, &handler.options]),
        );
        let mut path_params = pattern.param_names();
        path_params.extend(extra_params.iter().cloned());
        let dependency_names: HashSet<String> =
            options.dependency_names().map(str::to_owned).collect();

        let model = SignatureModel::build(&handler.signature, &path_params, &dependency_names, true)?;
        let graph = DependencyGraph::build(&model, &options.dependencies, &path_params)?;

        debug!(path = full_path, handler = %handler.name, "Registered websocket route");

        Ok(WsEndpoint {
            info: handler.info(full_path, &options.tags),
            middleware: MiddlewareChain::new(options.middleware.clone()),
            transport: transport_chain(&options.permissions),
            pattern,
            handler: handler.clone(),
            model,
            graph: Arc::new(graph),
            options,
        })
    }
}

impl CompiledRoutes {
    /// Compile `routes` below the given outer levels (settings, app).
    pub(crate) fn compile(
        routes: &[Route],
        levels: &[LevelOptions],
        settings: &Settings,
    ) -> Result<Self, Error> {
        let compiler = Compiler { settings };
        let nodes = compiler.compile(routes, "", levels, &HashSet::new())?;
        Ok(Self { nodes })
    }

    /// Every mounted child application.
    pub(crate) fn child_apps(&self) -> Vec<App> {
        fn walk(nodes: &[Node], out: &mut Vec<App>) {
            for node in nodes {
                match node {
                    Node::Child(mount) => out.push(mount.app.clone()),
                    Node::Mount { children, .. } | Node::Host { children, .. } => walk(children, out),
                    Node::Http(_) | Node::WebSocket(_) => {}
                }
            }
        }
        let mut apps = Vec::new();
        walk(&self.nodes, &mut apps);
        apps
    }

    /// Every dependency graph of the tree, for warming app-scoped providers.
    pub(crate) fn graphs(&self) -> Vec<Arc<DependencyGraph>> {
        fn walk(nodes: &[Node], out: &mut Vec<Arc<DependencyGraph>>) {
            for node in nodes {
                match node {
                    Node::Http(endpoint) => out.push(endpoint.graph.clone()),
                    Node::WebSocket(endpoint) => out.push(endpoint.graph.clone()),
                    Node::Mount { children, .. } | Node::Host { children, .. } => walk(children, out),
                    Node::Child(_) => {}
                }
            }
        }
        let mut graphs = Vec::new();
        walk(&self.nodes, &mut graphs);
        graphs
    }

    pub(crate) fn routes_info(&self, root: &str) -> Vec<RouteInfo> {
        fn walk(nodes: &[Node], root: &str, out: &mut Vec<RouteInfo>) {
            for node in nodes {
                match node {
                    Node::Http(endpoint) => {
                        let path = path::join_paths(root, endpoint.pattern.template());
                        let handler = &endpoint.handler;
                        out.push(RouteInfo {
                            operation_ids: handler.operation_ids(&path),
                            path,
                            name: handler.name.clone(),
                            methods: handler.methods.clone(),
                            params: endpoint.model.specs().to_vec(),
                            response_model: handler.response_model.clone(),
                            status_code: endpoint.response.status_code,
                            summary: handler.summary.clone(),
                            description: handler.description.clone(),
                            security: endpoint.options.security.clone(),
                            tags: endpoint.options.tags.clone(),
                            deprecated: endpoint.options.deprecated,
                            include_in_schema: endpoint.options.include_in_schema,
                        });
                    }
                    Node::Mount { children, .. } | Node::Host { children, .. } => {
                        walk(children, root, out)
                    }
                    Node::Child(mount) => {
                        let prefix = path::join_paths(root, mount.pattern.template());
                        out.extend(mount.app.routes_info_at(&prefix));
                    }
                    Node::WebSocket(_) => {}
                }
            }
        }
        let mut infos = Vec::new();
        walk(&self.nodes, root, &mut infos);
        infos
    }

    fn resolve(&self, scope: &Scope) -> Resolution {
        let mut allowed = Vec::new();
        let params = HashMap::new();
        match Self::walk(&self.nodes, scope, &scope.path, params, &mut allowed) {
            Some(found) => found,
            None if !allowed.is_empty() => {
                if allowed.iter().any(|m| m == "GET") && !allowed.iter().any(|m| m == "HEAD") {
                    allowed.push("HEAD".to_string());
                }
                Resolution::MethodNotAllowed(allowed)
            }
            None => Resolution::NotFound,
        }
    }

    fn walk(
        nodes: &[Node],
        scope: &Scope,
        path: &str,
        params: HashMap<String, Value>,
        allowed: &mut Vec<String>,
    ) -> Option<Resolution> {
        for node in nodes {
            match node {
                Node::Http(endpoint) if scope.kind == ScopeKind::Http => {
                    let Some(found) = endpoint.pattern.match_full(path) else {
                        continue;
                    };
                    if endpoint.handler.allows(&scope.method) {
                        let mut all = params.clone();
                        all.extend(found);
                        return Some(Resolution::Http(endpoint.clone(), all));
                    }
                    for method in &endpoint.handler.methods {
                        if !allowed.contains(method) {
                            allowed.push(method.clone());
                        }
                    }
                }
                Node::WebSocket(endpoint) if scope.kind == ScopeKind::WebSocket => {
                    if let Some(found) = endpoint.pattern.match_full(path) {
                        let mut all = params.clone();
                        all.extend(found);
                        return Some(Resolution::WebSocket(endpoint.clone(), all));
                    }
                }
                Node::Mount { pattern, children } => {
                    if pattern.match_prefix(path).is_some()
                        && let Some(found) = Self::walk(children, scope, path, params.clone(), allowed)
                    {
                        return Some(found);
                    }
                }
                Node::Host { pattern, children } => {
                    let Some(host) = scope.headers.get("host") else {
                        continue;
                    };
                    if let Some(host_params) = pattern.match_full(host) {
                        let mut all = params.clone();
                        all.extend(host_params);
                        if let Some(found) = Self::walk(children, scope, path, all, allowed) {
                            return Some(found);
                        }
                    }
                }
                Node::Child(mount) => {
                    if let Some((found, remainder)) = mount.pattern.match_prefix(path) {
                        let mut all = params.clone();
                        all.extend(found);
                        return Some(Resolution::Child {
                            mount: mount.clone(),
                            params: all,
                            remainder,
                        });
                    }
                }
                Node::Http(_) | Node::WebSocket(_) => {}
            }
        }
        None
    }

    /// Route one HTTP or WebSocket connection.
    pub(crate) async fn dispatch(
        &self,
        mut scope: Scope,
        receive: Receive,
        send: Sender,
        redirect_slashes: bool,
    ) -> Result<(), Error> {
        match self.resolve(&scope) {
            Resolution::Http(endpoint, params) => {
                trace!(path = %scope.path, route = endpoint.pattern.template(), "Route matched");
                scope.path_params.extend(params);
                pipeline::run_http(endpoint, scope, receive, send).await
            }
            Resolution::WebSocket(endpoint, params) => {
                trace!(path = %scope.path, route = endpoint.pattern.template(), "WebSocket route matched");
                scope.path_params.extend(params);
                pipeline::run_websocket(endpoint, scope, receive, send).await
            }
            Resolution::Child {
                mount,
                params,
                remainder,
            } => {
                let consumed = match scope.path.strip_suffix(remainder.as_str()) {
                    Some(consumed) if !consumed.is_empty() => consumed.to_string(),
                    _ => scope.path.clone(),
                };
                trace!(consumed = %consumed, remainder = %remainder, "Entering child application");
                scope.root_path.push_str(&consumed);
                scope.path = remainder;
                scope.path_params.extend(params);

                let app = mount.app.clone();
                let endpoint: crate::middleware::Endpoint = Arc::new(
                    move |scope: Scope,
                          receive: Receive,
                          send: Sender|
                          -> futures_util::future::BoxFuture<'static, Result<(), Error>> {
                        let app = app.clone();
                        Box::pin(async move {
                            use crate::asgi::AsgiApp;
                            app.call(scope, receive, send).await
                        })
                    },
                );
                mount.middleware.apply(scope, receive, send, endpoint).await
            }
            Resolution::MethodNotAllowed(allowed) => Err(Error::MethodNotAllowed {
                method: scope.method.clone(),
                allowed,
            }),
            Resolution::NotFound if scope.kind == ScopeKind::WebSocket => {
                debug!(path = %scope.path, "No websocket route, closing");
                send.send(Message::WebSocketClose {
                    code: CLOSE_NORMAL,
                    reason: None,
                })
                .await
            }
            Resolution::NotFound => {
                if redirect_slashes
                    && let Some(location) = self.redirect_target(&scope)
                {
                    debug!(from = %scope.path, to = %location, "Redirecting trailing slash");
                    return Response::redirect(location).send(&send).await;
                }
                Err(Error::NotFound(scope.full_path()))
            }
        }
    }

    fn redirect_target(&self, scope: &Scope) -> Option<String> {
        let toggled = path::toggle_trailing_slash(&scope.path)?;
        let mut probe = scope.clone();
        probe.path = toggled.clone();
        match self.resolve(&probe) {
            Resolution::NotFound => None,
            _ => {
                let mut location = format!("{}{}", scope.root_path, toggled);
                if !scope.query_string.is_empty() {
                    location.push('?');
                    location.push_str(&scope.query_string);
                }
                Some(location)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Kwargs;
    use crate::handler::{get, post, websocket};
    use crate::params::TypeHint;

    fn compile(routes: Vec<Route>) -> Result<CompiledRoutes, Error> {
        CompiledRoutes::compile(&routes, &[], &Settings::default())
    }

    fn ok() -> impl Fn(Kwargs) -> futures_util::future::Ready<Result<(), Error>> + Send + Sync + Clone
    {
        |_kw: Kwargs| futures_util::future::ready(Ok(()))
    }

    fn resolve(routes: &CompiledRoutes, method: &str, path: &str) -> Resolution {
        routes.resolve(&Scope::http(method, path))
    }

    #[test]
    fn test_typed_param_match() {
        let routes = compile(vec![
            get("/users/{user_id:int}", ok()).param("user_id", TypeHint::Int).into(),
        ])
        .unwrap();
        match resolve(&routes, "GET", "/users/42") {
            Resolution::Http(_, params) => assert_eq!(params["user_id"], serde_json::json!(42)),
            _ => panic!("expected a match"),
        }
        assert!(matches!(resolve(&routes, "GET", "/users/abc"), Resolution::NotFound));
    }

    #[test]
    fn test_method_not_allowed_lists_methods() {
        let routes = compile(vec![
            get("/items", ok()).into(),
            post("/items", ok()).into(),
        ])
        .unwrap();
        match resolve(&routes, "DELETE", "/items") {
            Resolution::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, vec!["GET", "POST", "HEAD"]);
            }
            _ => panic!("expected 405"),
        }
    }

    #[test]
    fn test_include_prefix_and_declaration_order() {
        let routes = compile(vec![
            Include::new(
                "/api",
                [
                    get("/users/me", ok()).name("me").into(),
                    get("/users/{name}", ok()).name("by_name").into(),
                ],
            )
            .into(),
        ])
        .unwrap();
        match resolve(&routes, "GET", "/api/users/me") {
            Resolution::Http(endpoint, _) => assert_eq!(endpoint.handler.name, "me"),
            _ => panic!("expected a match"),
        }
        assert!(matches!(resolve(&routes, "GET", "/users/me"), Resolution::NotFound));
    }

    #[test]
    fn test_host_route_params() {
        let routes = compile(vec![
            HostRoute::new("{tenant}.example.com", [get("/", ok()).into()]).into(),
        ])
        .unwrap();
        let scope = Scope::http("GET", "/").with_header("host", "acme.example.com:8000");
        match routes.resolve(&scope) {
            Resolution::Http(_, params) => assert_eq!(params["tenant"], "acme"),
            _ => panic!("expected a match"),
        }
        let other = Scope::http("GET", "/").with_header("host", "example.org");
        assert!(matches!(routes.resolve(&other), Resolution::NotFound));
    }

    #[test]
    fn test_websocket_only_matches_websocket_scope() {
        let routes = compile(vec![websocket("/ws", |_kw: Kwargs| async { Ok(()) }).into()]).unwrap();
        assert!(matches!(resolve(&routes, "GET", "/ws"), Resolution::NotFound));
        assert!(matches!(
            routes.resolve(&Scope::websocket("/ws")),
            Resolution::WebSocket(..)
        ));
    }

    #[test]
    fn test_redirect_target() {
        let routes = compile(vec![get("/items", ok()).into()]).unwrap();
        let scope = Scope::http("GET", "/items/").with_query("page=2");
        assert_eq!(routes.redirect_target(&scope).as_deref(), Some("/items?page=2"));
        assert_eq!(routes.redirect_target(&Scope::http("GET", "/nope/")), None);
    }

    #[test]
    fn test_unknown_dependency_names_route() {
        let result = compile(vec![
            get("/x", ok())
                .param_with("db", TypeHint::Any, crate::params::Param::injects())
                .into(),
        ]);
        let err = result.err().unwrap();
        assert!(matches!(err, Error::ImproperlyConfigured(_)));
        assert!(err.to_string().contains("/x"));
    }
}
