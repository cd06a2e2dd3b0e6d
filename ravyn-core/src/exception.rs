//! Exception handlers.
//!
//! Handlers are declared per level and keyed either by an [`ErrorKind`] or by
//! a concrete user error type carried in [`Error::Custom`]. When a request
//! fails, the levels are searched from the innermost outwards; inside a level
//! the handler whose key is the nearest ancestor of the raised error wins.
//! Without a match, or when the chosen handler itself fails, the default
//! handler renders `{"detail": ...}` with the error's status and headers.

use crate::asgi::Request;
use crate::error::ErrorKind;
use crate::logging::{debug, error, warn};
use crate::response::Response;
use crate::Error;
use async_trait::async_trait;
use std::any::{TypeId, type_name};
use std::fmt;
use std::sync::Arc;

/// Turns an error into a response.
#[async_trait]
pub trait ExceptionFilter: Send + Sync {
    async fn catch(&self, request: &Request, error: &Error) -> Result<Response, Error>;
}

/// Adapter for plain closures.
pub struct FnFilter<F>
where
    F: Fn(&Request, &Error) -> Result<Response, Error> + Send + Sync,
{
    func: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&Request, &Error) -> Result<Response, Error> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ExceptionFilter for FnFilter<F>
where
    F: Fn(&Request, &Error) -> Result<Response, Error> + Send + Sync,
{
    async fn catch(&self, request: &Request, error: &Error) -> Result<Response, Error> {
        (self.func)(request, error)
    }
}

#[derive(Clone, Copy)]
enum Matcher {
    Kind(ErrorKind),
    Type {
        id: TypeId,
        name: &'static str,
        matches: fn(&Error) -> bool,
    },
}

fn is_custom<E: std::error::Error + 'static>(error: &Error) -> bool {
    error.downcast_ref::<E>().is_some()
}

/// An exception handler bound to the errors it catches.
#[derive(Clone)]
pub struct ExceptionHandler {
    matcher: Matcher,
    filter: Arc<dyn ExceptionFilter>,
}

impl ExceptionHandler {
    /// Catch every error of `kind` or of one of its descendants.
    pub fn for_kind<F>(kind: ErrorKind, func: F) -> Self
    where
        F: Fn(&Request, &Error) -> Result<Response, Error> + Send + Sync + 'static,
    {
        Self::filter_kind(kind, FnFilter::new(func))
    }

    /// Catch a user error type raised through [`Error::custom`].
    pub fn for_type<E, F>(func: F) -> Self
    where
        E: std::error::Error + 'static,
        F: Fn(&Request, &Error) -> Result<Response, Error> + Send + Sync + 'static,
    {
        Self::filter_type::<E, _>(FnFilter::new(func))
    }

    pub fn filter_kind<X: ExceptionFilter + 'static>(kind: ErrorKind, filter: X) -> Self {
        Self {
            matcher: Matcher::Kind(kind),
            filter: Arc::new(filter),
        }
    }

    pub fn filter_type<E, X>(filter: X) -> Self
    where
        E: std::error::Error + 'static,
        X: ExceptionFilter + 'static,
    {
        Self {
            matcher: Matcher::Type {
                id: TypeId::of::<E>(),
                name: type_name::<E>(),
                matches: is_custom::<E>,
            },
            filter: Arc::new(filter),
        }
    }

    /// Distance from the raised error to this handler's key.
    ///
    /// A concrete type matches at distance 0; a kind matches at the number of
    /// ancestry hops.
    pub fn distance(&self, error: &Error) -> Option<usize> {
        match self.matcher {
            Matcher::Type { matches, .. } => matches(error).then_some(0),
            Matcher::Kind(kind) => error.kind().distance_to(kind),
        }
    }

    pub fn catches(&self) -> String {
        match self.matcher {
            Matcher::Kind(kind) => format!("{:?}", kind),
            Matcher::Type { name, .. } => name.to_string(),
        }
    }

    pub async fn handle(&self, request: &Request, error: &Error) -> Result<Response, Error> {
        self.filter.catch(request, error).await
    }
}

impl fmt::Debug for ExceptionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match self.matcher {
            Matcher::Type { id, .. } => Some(id),
            Matcher::Kind(_) => None,
        };
        f.debug_struct("ExceptionHandler")
            .field("catches", &self.catches())
            .field("type_id", &id)
            .finish()
    }
}

/// Nearest handler for `error`. `levels` is ordered innermost first.
pub fn find_handler<'a>(
    levels: &'a [Vec<ExceptionHandler>],
    error: &Error,
) -> Option<&'a ExceptionHandler> {
    levels.iter().find_map(|handlers| {
        handlers
            .iter()
            .filter_map(|handler| handler.distance(error).map(|d| (d, handler)))
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, handler)| handler)
    })
}

/// Render `error` through the nearest handler, falling back to the default.
pub async fn handle_error(
    levels: &[Vec<ExceptionHandler>],
    request: &Request,
    error: &Error,
    debug_mode: bool,
) -> Response {
    if let Some(handler) = find_handler(levels, error) {
        debug!(catches = %handler.catches(), error = %error, "Dispatching to exception handler");
        match handler.handle(request, error).await {
            Ok(response) => return response,
            Err(e) => {
                warn!(error = %e, original = %error, "Exception handler failed, using default");
            }
        }
    }
    default_response(error, debug_mode)
}

/// The default handler.
pub fn default_response(error: &Error, debug_mode: bool) -> Response {
    if error.is_server_error() {
        error!(error = %error, "Unhandled error");
    } else {
        debug!(status = error.status_code().as_u16(), error = %error, "Request failed");
    }
    Response::from_error(error, debug_mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asgi::{Receive, Scope};

    #[derive(Debug)]
    struct ValueError(String);

    impl fmt::Display for ValueError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for ValueError {}

    fn request() -> Request {
        Request::new(Scope::http("GET", "/"), Receive::empty())
    }

    #[tokio::test]
    async fn test_custom_type_handler() {
        let levels = vec![vec![ExceptionHandler::for_type::<ValueError, _>(|_, err| {
            Ok(Response::text(err.to_string()).with_status(418))
        })]];
        let err = Error::custom(ValueError("bad input".into()));
        let response = handle_error(&levels, &request(), &err, false).await;
        assert_eq!(response.status_code(), 418);
        assert_eq!(response.body_bytes().unwrap().as_ref(), b"bad input");
    }

    #[test]
    fn test_nearest_kind_wins_within_level() {
        let levels = vec![vec![
            ExceptionHandler::for_kind(ErrorKind::HttpException, |_, _| {
                Ok(Response::empty().with_status(500))
            }),
            ExceptionHandler::for_kind(ErrorKind::NotAuthorized, |_, _| {
                Ok(Response::empty().with_status(403))
            }),
        ]];
        let handler = find_handler(&levels, &Error::PermissionDenied(None)).unwrap();
        assert_eq!(handler.catches(), "NotAuthorized");
    }

    #[test]
    fn test_inner_level_wins() {
        let levels = vec![
            vec![ExceptionHandler::for_kind(ErrorKind::Exception, |_, _| {
                Ok(Response::empty())
            })],
            vec![ExceptionHandler::for_kind(ErrorKind::NotFound, |_, _| {
                Ok(Response::empty())
            })],
        ];
        let handler = find_handler(&levels, &Error::NotFound("/x".into())).unwrap();
        assert_eq!(handler.catches(), "Exception");
    }

    #[tokio::test]
    async fn test_failing_handler_falls_back_to_default() {
        let levels = vec![vec![ExceptionHandler::for_kind(ErrorKind::NotFound, |_, _| {
            Err(Error::Internal("handler broke".into()))
        })]];
        let response = handle_error(&levels, &request(), &Error::NotFound("/x".into()), false).await;
        assert_eq!(response.status_code(), 404);
        assert_eq!(
            response.body_bytes().unwrap().as_ref(),
            br#"{"detail":"Not Found"}"#
        );
    }

    #[tokio::test]
    async fn test_default_method_not_allowed() {
        let err = Error::MethodNotAllowed {
            method: "DELETE".into(),
            allowed: vec!["GET".into()],
        };
        let response = handle_error(&[], &request(), &err, false).await;
        assert_eq!(response.status_code(), 405);
        assert_eq!(response.headers.get("allow"), Some("GET"));
    }
}
