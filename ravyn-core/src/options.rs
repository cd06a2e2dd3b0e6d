//! Level-local options and their composition.
//!
//! Every level of the route tree (settings, app, include, gateway, handler,
//! controller) can declare dependencies, middleware, interceptors,
//! permissions, exception handlers and request hooks. A handler runs with the
//! [`EffectiveOptions`] obtained by composing the levels from the outermost
//! to the innermost one.

use crate::asgi::Request;
use crate::dependencies::Provider;
use crate::exception::ExceptionHandler;
use crate::interceptor::Interceptor;
use crate::middleware::Middleware;
use crate::permission::Permission;
use crate::Error;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type HookFn = dyn Fn(Request) -> BoxFuture<'static, Result<(), Error>> + Send + Sync;

/// A `before_request` / `after_request` callback.
#[derive(Clone)]
pub struct RequestHook(Arc<HookFn>);

impl RequestHook {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self(Arc::new(move |request| Box::pin(func(request))))
    }

    pub async fn call(&self, request: Request) -> Result<(), Error> {
        (self.0)(request).await
    }
}

impl fmt::Debug for RequestHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RequestHook")
    }
}

/// Options declared on a single level.
#[derive(Clone, Default)]
pub struct LevelOptions {
    pub dependencies: Vec<(String, Provider)>,
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub interceptors: Vec<Arc<dyn Interceptor>>,
    pub permissions: Vec<Permission>,
    pub exception_handlers: Vec<ExceptionHandler>,
    pub before_request: Vec<RequestHook>,
    pub after_request: Vec<RequestHook>,
    pub tags: Vec<String>,
    pub security: Vec<String>,
    pub include_in_schema: Option<bool>,
    pub deprecated: Option<bool>,
}

impl LevelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
            && self.middleware.is_empty()
            && self.interceptors.is_empty()
            && self.permissions.is_empty()
            && self.exception_handlers.is_empty()
            && self.before_request.is_empty()
            && self.after_request.is_empty()
    }
}

impl fmt::Debug for LevelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelOptions")
            .field(
                "dependencies",
                &self.dependencies.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("middleware", &self.middleware.len())
            .field("interceptors", &self.interceptors.len())
            .field("permissions", &self.permissions.len())
            .field("exception_handlers", &self.exception_handlers.len())
            .field("before_request", &self.before_request.len())
            .field("after_request", &self.after_request.len())
            .field("tags", &self.tags)
            .finish()
    }
}

/// Builder methods shared by every type that carries [`LevelOptions`].
pub trait WithOptions: Sized {
    fn options_mut(&mut self) -> &mut LevelOptions;

    fn dependency(mut self, name: impl Into<String>, provider: Provider) -> Self {
        let name = name.into();
        let deps = &mut self.options_mut().dependencies;
        deps.retain(|(existing, _)| *existing != name);
        deps.push((name, provider));
        self
    }

    fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.options_mut().middleware.push(Arc::new(middleware));
        self
    }

    fn interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.options_mut().interceptors.push(Arc::new(interceptor));
        self
    }

    fn permission(mut self, permission: Permission) -> Self {
        self.options_mut().permissions.push(permission);
        self
    }

    fn exception_handler(mut self, handler: ExceptionHandler) -> Self {
        self.options_mut().exception_handlers.push(handler);
        self
    }

    fn before_request(mut self, hook: RequestHook) -> Self {
        self.options_mut().before_request.push(hook);
        self
    }

    fn after_request(mut self, hook: RequestHook) -> Self {
        self.options_mut().after_request.push(hook);
        self
    }

    fn tag(mut self, tag: impl Into<String>) -> Self {
        self.options_mut().tags.push(tag.into());
        self
    }

    fn security(mut self, scheme: impl Into<String>) -> Self {
        self.options_mut().security.push(scheme.into());
        self
    }

    fn include_in_schema(mut self, include: bool) -> Self {
        self.options_mut().include_in_schema = Some(include);
        self
    }

    fn deprecated(mut self, deprecated: bool) -> Self {
        self.options_mut().deprecated = Some(deprecated);
        self
    }
}

impl WithOptions for LevelOptions {
    fn options_mut(&mut self) -> &mut LevelOptions {
        self
    }
}

/// The options a handler actually runs with.
#[derive(Clone, Default)]
pub struct EffectiveOptions {
    /// Inner levels override outer ones on name collisions
    pub dependencies: Vec<(String, Provider)>,
    /// Outer to inner
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub interceptors: Vec<Arc<dyn Interceptor>>,
    pub permissions: Vec<Permission>,
    /// One entry per level, innermost level first
    pub exception_handlers: Vec<Vec<ExceptionHandler>>,
    pub before_request: Vec<RequestHook>,
    /// Already in execution order: inner to outer
    pub after_request: Vec<RequestHook>,
    pub tags: Vec<String>,
    pub security: Vec<String>,
    pub include_in_schema: bool,
    pub deprecated: bool,
}

impl EffectiveOptions {
    /// Compose `levels`, ordered outermost first.
    pub fn compose<'a>(levels: impl IntoIterator<Item = &'a LevelOptions>) -> Self {
        let mut effective = EffectiveOptions {
            include_in_schema: true,
            ..Default::default()
        };

        for level in levels {
            for (name, provider) in &level.dependencies {
                match effective.dependencies.iter_mut().find(|(n, _)| n == name) {
                    Some(slot) => slot.1 = provider.clone(),
                    None => effective.dependencies.push((name.clone(), provider.clone())),
                }
            }
            effective.middleware.extend(level.middleware.iter().cloned());
            effective.interceptors.extend(level.interceptors.iter().cloned());
            effective.permissions.extend(level.permissions.iter().cloned());
            if !level.exception_handlers.is_empty() {
                effective
                    .exception_handlers
                    .insert(0, level.exception_handlers.clone());
            }
            effective.before_request.extend(level.before_request.iter().cloned());
            effective.after_request.extend(level.after_request.iter().cloned());
            for tag in &level.tags {
                if !effective.tags.contains(tag) {
                    effective.tags.push(tag.clone());
                }
            }
            for scheme in &level.security {
                if !effective.security.contains(scheme) {
                    effective.security.push(scheme.clone());
                }
            }
            if let Some(include) = level.include_in_schema {
                effective.include_in_schema = include;
            }
            if let Some(deprecated) = level.deprecated {
                effective.deprecated = deprecated;
            }
        }

        effective.after_request.reverse();
        effective
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for EffectiveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveOptions")
            .field(
                "dependencies",
                &self.dependency_names().collect::<Vec<_>>(),
            )
            .field("middleware", &self.middleware.len())
            .field("interceptors", &self.interceptors.len())
            .field("permissions", &self.permissions.len())
            .field("exception_levels", &self.exception_handlers.len())
            .field("before_request", &self.before_request.len())
            .field("after_request", &self.after_request.len())
            .field("tags", &self.tags)
            .field("include_in_schema", &self.include_in_schema)
            .field("deprecated", &self.deprecated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Argument;

    fn value_of(options: &EffectiveOptions, name: &str) -> Option<serde_json::Value> {
        let provider = options
            .dependencies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.clone())?;
        let runtime = tokio::runtime::Runtime::new().ok()?;
        let argument = runtime
            .block_on(provider.invoke(crate::extract::Kwargs::new(), None))
            .ok()?;
        match argument {
            Argument::Value(value) => Some(value),
            Argument::Object(_) => None,
        }
    }

    #[test]
    fn test_inner_dependency_overrides_outer() {
        let app = LevelOptions::new()
            .dependency("n", Provider::value(20_i64))
            .dependency("db", Provider::value("primary"));
        let handler = LevelOptions::new().dependency("n", Provider::value(3_i64));

        let effective = EffectiveOptions::compose([&app, &handler]);
        assert_eq!(effective.dependency_names().collect::<Vec<_>>(), vec!["n", "db"]);
        assert_eq!(value_of(&effective, "n"), Some(serde_json::json!(3)));
        assert_eq!(value_of(&effective, "db"), Some(serde_json::json!("primary")));
    }

    #[test]
    fn test_hook_order() {
        let outer = LevelOptions::new()
            .before_request(RequestHook::new(|_| async { Ok(()) }))
            .after_request(RequestHook::new(|_| async { Ok(()) }));
        let inner = LevelOptions::new()
            .before_request(RequestHook::new(|_| async { Ok(()) }))
            .after_request(RequestHook::new(|_| async { Ok(()) }));

        let effective = EffectiveOptions::compose([&outer, &inner]);
        assert!(Arc::ptr_eq(&effective.before_request[0].0, &outer.before_request[0].0));
        assert!(Arc::ptr_eq(&effective.after_request[0].0, &inner.after_request[0].0));
        assert!(Arc::ptr_eq(&effective.after_request[1].0, &outer.after_request[0].0));
    }

    #[test]
    fn test_schema_flags_inner_wins() {
        let app = LevelOptions::new().tag("api").include_in_schema(false);
        let gateway = LevelOptions::new().tag("users").tag("api").include_in_schema(true);
        let handler = LevelOptions::new().deprecated(true);

        let effective = EffectiveOptions::compose([&app, &gateway, &handler]);
        assert_eq!(effective.tags, vec!["api", "users"]);
        assert!(effective.include_in_schema);
        assert!(effective.deprecated);
    }
}
