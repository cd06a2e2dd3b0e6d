//! Permissions.
//!
//! Two shapes exist. A [`BasePermission`] is a predicate evaluated after the
//! interceptors with the request and the matched handler; any `false` denies
//! the request with the permission's denial error. A [`TransportPermission`]
//! wraps the downstream application like a middleware and may answer or
//! reject the connection without ever reaching the handler.

use crate::asgi::{Receive, Request, Scope, Sender};
use crate::logging::debug;
use crate::middleware::Next;
use crate::Error;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// What a permission knows about the matched handler.
#[derive(Debug, Clone, Default)]
pub struct HandlerInfo {
    pub name: String,
    /// Full route path template, mounts included
    pub path: String,
    pub methods: Vec<String>,
    pub tags: Vec<String>,
    pub is_websocket: bool,
}

/// Predicate permission.
#[async_trait]
pub trait BasePermission: Send + Sync {
    async fn has_permission(&self, request: &Request, handler: &HandlerInfo) -> Result<bool, Error>;

    /// Error raised when `has_permission` returns `false`.
    fn denial(&self) -> Error {
        Error::PermissionDenied(None)
    }
}

/// Permission that wraps the downstream application.
#[async_trait]
pub trait TransportPermission: Send + Sync {
    async fn handle(
        &self,
        scope: Scope,
        receive: Receive,
        send: Sender,
        next: Next,
    ) -> Result<(), Error>;
}

/// A permission declared on a level.
#[derive(Clone)]
pub enum Permission {
    Framework(Arc<dyn BasePermission>),
    Transport(Arc<dyn TransportPermission>),
}

impl Permission {
    pub fn framework<P: BasePermission + 'static>(permission: P) -> Self {
        Permission::Framework(Arc::new(permission))
    }

    pub fn transport<P: TransportPermission + 'static>(permission: P) -> Self {
        Permission::Transport(Arc::new(permission))
    }

    /// Closure-backed framework permission.
    pub fn from_fn<F>(predicate: F) -> Self
    where
        F: Fn(&Request, &HandlerInfo) -> bool + Send + Sync + 'static,
    {
        Self::framework(FnPermission::new(predicate))
    }
}

/// Evaluate framework permissions in order; the first denial wins.
pub(crate) async fn check_permissions(
    permissions: &[Permission],
    request: &Request,
    handler: &HandlerInfo,
) -> Result<(), Error> {
    for permission in permissions {
        if let Permission::Framework(permission) = permission
            && !permission.has_permission(request, handler).await?
        {
            debug!(handler = %handler.name, path = %request.path(), "Permission denied");
            return Err(permission.denial());
        }
    }
    Ok(())
}

// ========== Built-in Permissions ==========

/// Allows every request.
pub struct AllowAny;

#[async_trait]
impl BasePermission for AllowAny {
    async fn has_permission(&self, _request: &Request, _handler: &HandlerInfo) -> Result<bool, Error> {
        Ok(true)
    }
}

/// Denies every request.
pub struct DenyAll;

#[async_trait]
impl BasePermission for DenyAll {
    async fn has_permission(&self, _request: &Request, _handler: &HandlerInfo) -> Result<bool, Error> {
        Ok(false)
    }
}

/// Requires a header, optionally with an exact value.
pub struct HeaderPermission {
    header: String,
    expected: Option<String>,
}

impl HeaderPermission {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            expected: None,
        }
    }

    pub fn value(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }
}

#[async_trait]
impl BasePermission for HeaderPermission {
    async fn has_permission(&self, request: &Request, _handler: &HandlerInfo) -> Result<bool, Error> {
        Ok(match (request.header(&self.header), &self.expected) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(value), Some(expected)) => value == expected,
        })
    }
}

/// Requires one of a set of API keys in a header.
pub struct ApiKeyPermission {
    header: String,
    keys: HashSet<String>,
}

impl ApiKeyPermission {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header: "x-api-key".to_string(),
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }
}

#[async_trait]
impl BasePermission for ApiKeyPermission {
    async fn has_permission(&self, request: &Request, _handler: &HandlerInfo) -> Result<bool, Error> {
        let api_key = request
            .header(&self.header)
            .ok_or_else(|| Error::NotAuthenticated("Missing API key".to_string()))?;

        if self.keys.contains(api_key) {
            Ok(true)
        } else {
            Err(Error::PermissionDenied(Some("Invalid API key".to_string())))
        }
    }
}

/// Closure-backed permission.
pub struct FnPermission<F>
where
    F: Fn(&Request, &HandlerInfo) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> FnPermission<F>
where
    F: Fn(&Request, &HandlerInfo) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl<F> BasePermission for FnPermission<F>
where
    F: Fn(&Request, &HandlerInfo) -> bool + Send + Sync,
{
    async fn has_permission(&self, request: &Request, handler: &HandlerInfo) -> Result<bool, Error> {
        Ok((self.predicate)(request, handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut scope = Scope::http("GET", "/");
        for (name, value) in headers {
            scope = scope.with_header(name, *value);
        }
        Request::new(scope, Receive::empty())
    }

    #[tokio::test]
    async fn test_header_permission() {
        let info = HandlerInfo::default();
        let permission = HeaderPermission::new("X-Allow");
        assert!(!permission.has_permission(&request(&[]), &info).await.unwrap());
        assert!(permission
            .has_permission(&request(&[("x-allow", "1")]), &info)
            .await
            .unwrap());

        let exact = HeaderPermission::new("x-role").value("admin");
        assert!(!exact
            .has_permission(&request(&[("x-role", "user")]), &info)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_api_key_permission() {
        let info = HandlerInfo::default();
        let permission = ApiKeyPermission::new(["k1", "k2"]);
        assert!(permission
            .has_permission(&request(&[("x-api-key", "k2")]), &info)
            .await
            .unwrap());
        let missing = permission.has_permission(&request(&[]), &info).await.unwrap_err();
        assert_eq!(missing.status_code(), 401);
        let wrong = permission
            .has_permission(&request(&[("x-api-key", "nope")]), &info)
            .await
            .unwrap_err();
        assert_eq!(wrong.status_code(), 403);
    }

    #[tokio::test]
    async fn test_first_denial_wins() {
        let permissions = vec![
            Permission::framework(AllowAny),
            Permission::framework(DenyAll),
            Permission::from_fn(|_, _| panic!("not evaluated after a denial")),
        ];
        let err = check_permissions(&permissions, &request(&[]), &HandlerInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(None)));
        assert_eq!(err.detail(false), "Permission denied");
    }
}
