// Error types for the Ravyn framework

use http::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;

/// A single validation failure, addressed by its location inside the input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    /// Path to the offending value (`["sku"]`, `["items", 0, "name"]`)
    pub loc: Vec<Value>,
    /// Human-readable message
    pub msg: String,
    /// Machine-readable error type (`missing`, `int_parsing`, ...)
    #[serde(rename = "type")]
    pub error_type: String,
    /// The value that failed validation
    pub input: Value,
}

impl ErrorDetail {
    /// Create a new detail with an empty location.
    pub fn new(error_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            loc: Vec::new(),
            msg: msg.into(),
            error_type: error_type.into(),
            input: Value::Null,
        }
    }

    /// The canonical "field required" failure.
    pub fn missing() -> Self {
        Self::new("missing", "Field required")
    }

    /// Set the offending input.
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Prepend a location segment.
    pub fn prefixed(mut self, segment: impl Into<Value>) -> Self {
        self.loc.insert(0, segment.into());
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loc: Vec<String> = self
            .loc
            .iter()
            .map(|segment| match segment {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        write!(f, "{}: {} [{}]", loc.join("."), self.msg, self.error_type)
    }
}

/// Collection of validation failures produced by one validation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationErrors {
    pub errors: Vec<ErrorDetail>,
}

impl ValidationErrors {
    pub fn new(errors: Vec<ErrorDetail>) -> Self {
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn push(&mut self, error: ErrorDetail) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = ErrorDetail>) {
        self.errors.extend(errors);
    }

    /// Convert to the wire representation (`{"errors": [...]}`)
    pub fn to_json(&self) -> Value {
        json!({ "errors": self.errors })
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "{}", rendered.join("; "))
    }
}

impl From<Vec<ErrorDetail>> for ValidationErrors {
    fn from(errors: Vec<ErrorDetail>) -> Self {
        Self::new(errors)
    }
}

/// Exception ancestry used to pick the nearest exception handler.
///
/// Every kind has exactly one parent except [`ErrorKind::Exception`], the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Exception,
    HttpException,
    NotFound,
    MethodNotAllowed,
    BadRequest,
    ValidationFailed,
    NotAuthenticated,
    NotAuthorized,
    PermissionDenied,
    ImproperlyConfigured,
    UnsupportedMedia,
    UnprocessableEntity,
    ServiceUnavailable,
    InternalServerError,
    WebSocketError,
    Cancelled,
    Custom,
}

impl ErrorKind {
    pub fn parent(&self) -> Option<ErrorKind> {
        match self {
            ErrorKind::Exception => None,
            ErrorKind::HttpException
            | ErrorKind::ImproperlyConfigured
            | ErrorKind::Cancelled
            | ErrorKind::Custom => Some(ErrorKind::Exception),
            ErrorKind::ValidationFailed => Some(ErrorKind::BadRequest),
            ErrorKind::PermissionDenied => Some(ErrorKind::NotAuthorized),
            _ => Some(ErrorKind::HttpException),
        }
    }

    /// Number of parent hops from `self` up to `ancestor`, if it is one.
    pub fn distance_to(&self, ancestor: ErrorKind) -> Option<usize> {
        let mut current = Some(*self);
        let mut hops = 0;
        while let Some(kind) = current {
            if kind == ancestor {
                return Some(hops);
            }
            current = kind.parent();
            hops += 1;
        }
        None
    }

    pub fn is_a(&self, ancestor: ErrorKind) -> bool {
        self.distance_to(ancestor).is_some()
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {method}")]
    MethodNotAllowed { method: String, allowed: Vec<String> },

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Permission denied")]
    PermissionDenied(Option<String>),

    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    #[error("Unsupported Media Type: {0}")]
    UnsupportedMediaType(String),

    #[error("Unprocessable Entity: {0}")]
    UnprocessableEntity(String),

    #[error("Service Unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Dependency error: {0}")]
    Dependency(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap a user-defined error so exception handlers can match on its type.
    pub fn custom<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Custom(Box::new(error))
    }

    /// An explicit HTTP exception with an arbitrary status.
    pub fn http(status: u16, detail: impl Into<String>) -> Self {
        Error::Http {
            status,
            detail: detail.into(),
        }
    }

    /// Build a validation error from a list of details.
    pub fn validation(errors: impl Into<ValidationErrors>) -> Self {
        Error::ValidationFailed(errors.into())
    }

    /// Downcast a wrapped custom error.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Error::Custom(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::MethodNotAllowed { .. } => ErrorKind::MethodNotAllowed,
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Error::NotAuthenticated(_) => ErrorKind::NotAuthenticated,
            Error::NotAuthorized(_) => ErrorKind::NotAuthorized,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::ImproperlyConfigured(_) => ErrorKind::ImproperlyConfigured,
            Error::UnsupportedMediaType(_) => ErrorKind::UnsupportedMedia,
            Error::UnprocessableEntity(_) => ErrorKind::UnprocessableEntity,
            Error::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Error::Http { .. } => ErrorKind::HttpException,
            Error::WebSocket(_) => ErrorKind::WebSocketError,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Serialization(_) | Error::Dependency(_) | Error::Internal(_) | Error::Io(_) => {
                ErrorKind::InternalServerError
            }
            Error::Custom(_) => ErrorKind::Custom,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Error::BadRequest(_) | Error::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Error::NotAuthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::NotAuthorized(_) | Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Http { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }

            // Default to 500 for everything else
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Headers the default error response must carry.
    pub fn headers(&self) -> Vec<(String, String)> {
        match self {
            Error::MethodNotAllowed { allowed, .. } => {
                vec![("allow".to_string(), allowed.join(", "))]
            }
            Error::NotAuthenticated(_) => {
                vec![("www-authenticate".to_string(), "Bearer".to_string())]
            }
            _ => Vec::new(),
        }
    }

    /// The `detail` message rendered by the default exception handler.
    ///
    /// Server errors hide their message unless `debug` is set.
    pub fn detail(&self, debug: bool) -> String {
        match self {
            Error::NotFound(_) => "Not Found".to_string(),
            Error::MethodNotAllowed { .. } => "Method Not Allowed".to_string(),
            Error::BadRequest(msg)
            | Error::NotAuthenticated(msg)
            | Error::NotAuthorized(msg)
            | Error::UnsupportedMediaType(msg)
            | Error::UnprocessableEntity(msg)
            | Error::ServiceUnavailable(msg) => msg.clone(),
            Error::ValidationFailed(_) => "Validation failed".to_string(),
            Error::PermissionDenied(msg) => msg
                .clone()
                .unwrap_or_else(|| "Permission denied".to_string()),
            Error::Http { detail, .. } => detail.clone(),
            other if debug => other.to_string(),
            _ => "Internal Server Error".to_string(),
        }
    }

    /// JSON body produced by the default exception handler.
    pub fn to_json(&self, debug: bool) -> Value {
        match self {
            Error::ValidationFailed(errors) => json!({
                "detail": self.detail(debug),
                "errors": errors.errors,
            }),
            _ => json!({ "detail": self.detail(debug) }),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error.to_string())
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Error::ValidationFailed(errors)
    }
}
