//! Dependency injection.
//!
//! A [`Provider`] is a value or a callable with its own [`Signature`]. The
//! dependencies visible to a handler are the level-merged union of every
//! level from the app down to the handler, inner levels overriding outer ones
//! on name collisions. At route build time the providers a handler can reach
//! are compiled into a [`DependencyGraph`]: each node carries the frozen
//! parameter plan of its provider, unknown names and cycles are rejected with
//! [`Error::ImproperlyConfigured`].
//!
//! At request time resolution is demand-driven and recursive. Request-scoped
//! results are cached on the request so a dependency runs at most once per
//! request; app-scoped results are cached on the application.

use crate::extract::{self, Argument, CallContext, Kwargs};
use crate::handler::run_blocking;
use crate::logging::{debug, trace};
use crate::signature::{Signature, SignatureModel};
use crate::Error;
use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Lifetime of a resolved dependency value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyScope {
    /// Cached for the lifetime of the request
    #[default]
    Request,
    /// Cached on the application, shared by every request
    App,
}

type AsyncProviderFn = dyn Fn(Kwargs) -> BoxFuture<'static, Result<Argument, Error>> + Send + Sync;
type SyncProviderFn = dyn Fn(Kwargs) -> Result<Argument, Error> + Send + Sync;

enum ProviderCall {
    Value(Argument),
    Async(Arc<AsyncProviderFn>),
    Sync(Arc<SyncProviderFn>),
}

struct ProviderInner {
    call: ProviderCall,
    signature: Signature,
    scope: DependencyScope,
    use_cache: bool,
    is_factory: bool,
}

/// A dependency provider.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<ProviderInner>,
}

impl Provider {
    fn from_parts(call: ProviderCall, signature: Signature) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                call,
                signature,
                scope: DependencyScope::Request,
                use_cache: true,
                is_factory: false,
            }),
        }
    }

    /// A constant value.
    pub fn value(value: impl Into<Argument>) -> Self {
        Self::from_parts(ProviderCall::Value(value.into()), Signature::new())
    }

    /// An async provider. `signature` declares what it is called with.
    pub fn new<F, Fut, R>(signature: Signature, func: F) -> Self
    where
        F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Argument>,
    {
        let func = Arc::new(func);
        let call: Arc<AsyncProviderFn> = Arc::new(move |kwargs| {
            let fut = func(kwargs);
            Box::pin(async move { fut.await.map(Into::into) })
        });
        Self::from_parts(ProviderCall::Async(call), signature)
    }

    /// A blocking provider, run on the worker pool.
    pub fn sync<F, R>(signature: Signature, func: F) -> Self
    where
        F: Fn(Kwargs) -> Result<R, Error> + Send + Sync + 'static,
        R: Into<Argument>,
    {
        let call: Arc<SyncProviderFn> = Arc::new(move |kwargs| func(kwargs).map(Into::into));
        Self::from_parts(ProviderCall::Sync(call), signature)
    }

    /// A zero-argument constructor called on every resolution.
    pub fn factory<F, R>(func: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<Argument>,
    {
        let call: Arc<AsyncProviderFn> = Arc::new(move |_| {
            let value = func().into();
            Box::pin(async move { Ok(value) })
        });
        Self::from_parts(ProviderCall::Async(call), Signature::new()).with_inner(|inner| {
            inner.use_cache = false;
            inner.is_factory = true;
        })
    }

    fn with_inner(self, update: impl FnOnce(&mut ProviderInner)) -> Self {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                update(&mut inner);
                inner
            }
            Err(shared) => {
                let call = match &shared.call {
                    ProviderCall::Value(value) => ProviderCall::Value(value.clone()),
                    ProviderCall::Async(f) => ProviderCall::Async(f.clone()),
                    ProviderCall::Sync(f) => ProviderCall::Sync(f.clone()),
                };
                let mut inner = ProviderInner {
                    call,
                    signature: shared.signature.clone(),
                    scope: shared.scope,
                    use_cache: shared.use_cache,
                    is_factory: shared.is_factory,
                };
                update(&mut inner);
                inner
            }
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Cache the value on the application instead of the request.
    pub fn app_scoped(self) -> Self {
        self.with_inner(|inner| inner.scope = DependencyScope::App)
    }

    /// Disable or enable the request cache.
    pub fn cached(self, use_cache: bool) -> Self {
        self.with_inner(|inner| inner.use_cache = use_cache)
    }

    pub fn signature(&self) -> &Signature {
        &self.inner.signature
    }

    pub fn scope(&self) -> DependencyScope {
        self.inner.scope
    }

    pub fn uses_cache(&self) -> bool {
        self.inner.use_cache
    }

    pub fn is_factory(&self) -> bool {
        self.inner.is_factory
    }

    /// Identity of the provider, stable across clones.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub(crate) async fn invoke(
        &self,
        kwargs: Kwargs,
        limiter: Option<Arc<Semaphore>>,
    ) -> Result<Argument, Error> {
        match &self.inner.call {
            ProviderCall::Value(value) => Ok(value.clone()),
            ProviderCall::Async(func) => func(kwargs).await,
            ProviderCall::Sync(func) => {
                let func = func.clone();
                run_blocking(limiter, move || func(kwargs)).await
            }
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner.call {
            ProviderCall::Value(_) => "value",
            ProviderCall::Async(_) => "async",
            ProviderCall::Sync(_) => "sync",
        };
        f.debug_struct("Provider")
            .field("kind", &kind)
            .field("scope", &self.inner.scope)
            .field("use_cache", &self.inner.use_cache)
            .field("is_factory", &self.inner.is_factory)
            .finish()
    }
}

/// A provider with its compiled parameter plan.
#[derive(Debug)]
pub(crate) struct ResolvedDependency {
    pub(crate) key: String,
    pub(crate) provider: Provider,
    pub(crate) model: SignatureModel,
}

/// Every dependency reachable from one handler.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, Arc<ResolvedDependency>>,
}

impl DependencyGraph {
    /// Compile the dependencies `root` needs from the effective provider map.
    pub fn build(
        root: &SignatureModel,
        providers: &[(String, Provider)],
        path_params: &HashSet<String>,
    ) -> Result<Self, Error> {
        let available: HashMap<&str, &Provider> =
            providers.iter().map(|(name, p)| (name.as_str(), p)).collect();
        let names: HashSet<String> = providers.iter().map(|(name, _)| name.clone()).collect();

        let mut graph = Self::default();
        let mut stack = Vec::new();
        for spec in root.dependencies() {
            graph.visit(
                &spec.key,
                spec.provider.as_ref(),
                &available,
                &names,
                path_params,
                &mut stack,
            )?;
        }
        debug!(dependencies = graph.nodes.len(), "Dependency graph compiled");
        Ok(graph)
    }

    fn visit(
        &mut self,
        key: &str,
        bound: Option<&Provider>,
        available: &HashMap<&str, &Provider>,
        names: &HashSet<String>,
        path_params: &HashSet<String>,
        stack: &mut Vec<String>,
    ) -> Result<(), Error> {
        if let Some(position) = stack.iter().position(|k| k == key) {
            let mut cycle: Vec<String> = stack[position..].to_vec();
            cycle.push(key.to_string());
            return Err(Error::ImproperlyConfigured(format!(
                "Circular dependency detected: {}",
                cycle.join(" -> ")
            )));
        }
        if self.nodes.contains_key(key) {
            return Ok(());
        }

        let provider = match bound {
            Some(provider) => provider.clone(),
            None => (*available.get(key).ok_or_else(|| {
                Error::ImproperlyConfigured(format!(
                    "Dependency '{}' is not declared on any enclosing level",
                    key
                ))
            })?)
            .clone(),
        };
        let model = SignatureModel::build(provider.signature(), path_params, names, false)?;

        stack.push(key.to_string());
        for spec in model.dependencies() {
            self.visit(
                &spec.key,
                spec.provider.as_ref(),
                available,
                names,
                path_params,
                stack,
            )?;
        }
        stack.pop();

        self.nodes.insert(
            key.to_string(),
            Arc::new(ResolvedDependency {
                key: key.to_string(),
                provider,
                model,
            }),
        );
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Arc<ResolvedDependency>> {
        self.nodes.get(key)
    }

    pub(crate) fn app_scoped(&self) -> impl Iterator<Item = &Arc<ResolvedDependency>> {
        self.nodes
            .values()
            .filter(|node| node.provider.scope() == DependencyScope::App)
    }
}

fn app_cache_key(node: &ResolvedDependency) -> String {
    format!("{}#{:x}", node.key, node.provider.id())
}

/// Resolve `key` for the call described by `ctx`.
pub(crate) fn resolve<'a>(
    key: &'a str,
    ctx: &'a CallContext,
) -> BoxFuture<'a, Result<Argument, Error>> {
    Box::pin(async move {
        let node = ctx.graph.get(key).cloned().ok_or_else(|| {
            Error::Dependency(format!("No provider registered for dependency '{}'", key))
        })?;
        let provider = &node.provider;
        let app = ctx.request.app();

        match provider.scope() {
            DependencyScope::App => {
                if let Some(app) = app
                    && let Some(value) = app.cached_dependency(&app_cache_key(&node))
                {
                    trace!(dependency = key, "App-scoped dependency cache hit");
                    return Ok(value);
                }
            }
            DependencyScope::Request if provider.uses_cache() => {
                let cached = ctx.request.scope().local.dependencies.lock().get(key).cloned();
                if let Some(value) = cached {
                    trace!(dependency = key, "Request dependency cache hit");
                    return Ok(value);
                }
            }
            DependencyScope::Request => {}
        }

        let kwargs = extract::build_kwargs(&node.model, ctx).await?;
        trace!(dependency = key, "Invoking dependency provider");
        let value = provider.invoke(kwargs, ctx.limiter.clone()).await?;

        match provider.scope() {
            DependencyScope::App => {
                if let Some(app) = app {
                    app.store_dependency(app_cache_key(&node), value.clone());
                }
            }
            DependencyScope::Request if provider.uses_cache() => {
                ctx.request
                    .scope()
                    .local
                    .dependencies
                    .lock()
                    .insert(key.to_string(), value.clone());
            }
            DependencyScope::Request => {}
        }
        Ok(value)
    })
}
