//! Responses and the response adapter.
//!
//! Handlers may return a ready [`Response`] or anything convertible into a
//! [`Reply`]. [`adapt`] turns a reply into a canonical response using the
//! handler's declared status, media type, response class, headers, cookies
//! and background tasks.

use crate::asgi::{Headers, Message, Sender};
use crate::encoders::EncoderRegistry;
use crate::logging::{trace, warn};
use crate::params::{ModelInstance, SerdeObject};
use crate::Error;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Response body.
pub enum Body {
    Empty,
    Full(Bytes),
    /// Chunks sent as they are produced
    Stream(BoxStream<'static, Result<Bytes, Error>>),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Full(bytes) => bytes.is_empty(),
            Body::Stream(_) => false,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Body::Full(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => write!(f, "Empty"),
            Body::Full(bytes) => write!(f, "Full({} bytes)", bytes.len()),
            Body::Stream(_) => write!(f, "Stream"),
        }
    }
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// A response cookie.
#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub key: String,
    pub value: String,
    pub max_age: Option<i64>,
    pub expires: Option<String>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub httponly: bool,
    pub samesite: Option<SameSite>,
}

impl Cookie {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            max_age: None,
            expires: None,
            path: Some("/".to_string()),
            domain: None,
            secure: false,
            httponly: false,
            samesite: Some(SameSite::Lax),
        }
    }

    /// A cookie that tells the client to drop `key`.
    pub fn delete(key: impl Into<String>) -> Self {
        let mut cookie = Self::new(key, "");
        cookie.max_age = Some(0);
        cookie.expires = Some("Thu, 01 Jan 1970 00:00:00 GMT".to_string());
        cookie
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn httponly(mut self, httponly: bool) -> Self {
        self.httponly = httponly;
        self
    }

    pub fn samesite(mut self, samesite: Option<SameSite>) -> Self {
        self.samesite = samesite;
        self
    }

    /// Value of the `Set-Cookie` header.
    pub fn to_header_value(&self) -> String {
        let mut parts = vec![format!(
            "{}={}",
            self.key,
            urlencoding::encode(&self.value)
        )];
        if let Some(max_age) = self.max_age {
            parts.push(format!("Max-Age={}", max_age));
        }
        if let Some(expires) = &self.expires {
            parts.push(format!("expires={}", expires));
        }
        if let Some(path) = &self.path {
            parts.push(format!("Path={}", path));
        }
        if let Some(domain) = &self.domain {
            parts.push(format!("Domain={}", domain));
        }
        if self.secure {
            parts.push("Secure".to_string());
        }
        if self.httponly {
            parts.push("HttpOnly".to_string());
        }
        if let Some(samesite) = self.samesite {
            parts.push(format!("SameSite={}", samesite.as_str()));
        }
        parts.join("; ")
    }
}

type TaskFn = dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync;

/// Work scheduled to run after the response has been sent.
#[derive(Clone)]
pub struct BackgroundTask {
    name: String,
    func: Arc<TaskFn>,
}

impl BackgroundTask {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move || Box::pin(func())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&self) -> Result<(), Error> {
        (self.func)().await
    }
}

impl fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTask").field("name", &self.name).finish()
    }
}

/// An ordered group of background tasks.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    tasks: Vec<BackgroundTask>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, task: BackgroundTask) {
        self.tasks.push(task);
    }

    pub fn with_task(mut self, task: BackgroundTask) -> Self {
        self.add_task(task);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Run every task in order on a detached task.
    pub fn spawn(self) {
        if self.tasks.is_empty() {
            return;
        }
        tokio::spawn(async move {
            for task in &self.tasks {
                if let Err(e) = task.run().await {
                    warn!(task = %task.name, error = %e, "Background task failed");
                }
            }
        });
    }
}

/// How non-`Response` return values are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseClass {
    #[default]
    Json,
    PlainText,
    Html,
    Bytes,
}

impl ResponseClass {
    pub fn media_type(&self) -> &'static str {
        match self {
            ResponseClass::Json => "application/json",
            ResponseClass::PlainText => "text/plain",
            ResponseClass::Html => "text/html",
            ResponseClass::Bytes => "application/octet-stream",
        }
    }

    fn render(&self, value: Value) -> Result<Bytes, Error> {
        match self {
            ResponseClass::Json => Ok(Bytes::from(serde_json::to_vec(&value)?)),
            _ => Ok(Bytes::from(match value {
                Value::String(text) => text,
                Value::Null => String::new(),
                other => other.to_string(),
            })),
        }
    }
}

/// A canonical HTTP response.
#[derive(Debug)]
pub struct Response {
    /// `None` lets the handler's declared status apply
    pub status: Option<u16>,
    pub headers: Headers,
    pub cookies: Vec<Cookie>,
    pub body: Body,
    pub media_type: Option<String>,
    pub background: BackgroundTasks,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: None,
            headers: Headers::new(),
            cookies: Vec::new(),
            body: Body::Empty,
            media_type: None,
            background: BackgroundTasks::new(),
        }
    }
}

impl Response {
    pub fn new(body: Body) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn json(value: Value) -> Self {
        // serializing a Value cannot fail
        let body = serde_json::to_vec(&value).unwrap_or_default();
        Self::new(Body::Full(Bytes::from(body))).with_media_type("application/json")
    }

    /// Serialize any `Serialize` value as JSON.
    pub fn json_from<T: Serialize>(value: &T) -> Result<Self, Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(Body::Full(Bytes::from(body))).with_media_type("application/json"))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Body::Full(Bytes::from(text.into()))).with_media_type("text/plain")
    }

    pub fn html(html: impl Into<String>) -> Self {
        Self::new(Body::Full(Bytes::from(html.into()))).with_media_type("text/html")
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::new(Body::Full(data.into())).with_media_type("application/octet-stream")
    }

    pub fn stream<S>(stream: S, media_type: impl Into<String>) -> Self
    where
        S: Stream<Item = Result<Bytes, Error>> + Send + 'static,
    {
        Self::new(Body::Stream(stream.boxed())).with_media_type(media_type)
    }

    /// A temporary redirect (307).
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::empty().with_status(307).header("location", location)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.retain(|c| c.key != cookie.key);
        self.cookies.push(cookie);
        self
    }

    pub fn background(mut self, task: BackgroundTask) -> Self {
        self.background.add_task(task);
        self
    }

    /// Effective status code.
    pub fn status_code(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    /// Body of a fully buffered response.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_bytes()
    }

    /// Response for `error` as rendered by the default exception handler.
    pub fn from_error(error: &Error, debug: bool) -> Self {
        let mut response =
            Self::json(error.to_json(debug)).with_status(error.status_code().as_u16());
        for (name, value) in error.headers() {
            response.headers.insert(&name, value);
        }
        response
    }

    fn head(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        let status = self.status_code();
        let bodiless = matches!(status, 204 | 304) || status < 200;

        if !bodiless {
            if let Some(media_type) = &self.media_type
                && !headers.contains("content-type")
            {
                let value = if media_type.starts_with("text/") && !media_type.contains("charset")
                {
                    format!("{}; charset=utf-8", media_type)
                } else {
                    media_type.clone()
                };
                headers.insert("content-type", value);
            }
            match &self.body {
                Body::Empty => headers.insert("content-length", "0"),
                Body::Full(bytes) => headers.insert("content-length", bytes.len().to_string()),
                Body::Stream(_) => {}
            }
        }
        for cookie in &self.cookies {
            headers.append("set-cookie", cookie.to_header_value());
        }
        headers.into_vec()
    }

    /// Write the response and schedule its background tasks.
    pub async fn send(self, sender: &Sender) -> Result<(), Error> {
        self.send_with(sender, false).await
    }

    pub(crate) async fn send_with(self, sender: &Sender, head_only: bool) -> Result<(), Error> {
        let status = self.status_code();
        let headers = self.head();
        let bodiless = head_only || matches!(status, 204 | 304);
        trace!(status, "Sending response");

        sender
            .send(Message::HttpResponseStart { status, headers })
            .await?;
        match self.body {
            Body::Stream(mut stream) if !bodiless => {
                while let Some(chunk) = stream.next().await {
                    sender
                        .send(Message::HttpResponseBody {
                            body: chunk?,
                            more_body: true,
                        })
                        .await?;
                }
                sender
                    .send(Message::HttpResponseBody {
                        body: Bytes::new(),
                        more_body: false,
                    })
                    .await?;
            }
            Body::Full(bytes) if !bodiless => {
                sender
                    .send(Message::HttpResponseBody {
                        body: bytes,
                        more_body: false,
                    })
                    .await?;
            }
            _ => {
                sender
                    .send(Message::HttpResponseBody {
                        body: Bytes::new(),
                        more_body: false,
                    })
                    .await?;
            }
        }
        self.background.spawn();
        Ok(())
    }
}

/// A handler return value.
pub enum Reply {
    Response(Response),
    None,
    Text(String),
    Bytes(Bytes),
    Json(Value),
    /// Serialized through the encoder registry
    Object(Box<dyn Any + Send + Sync>),
}

impl Reply {
    /// Wrap a `Serialize` value; it is serialized by the serde encoder.
    pub fn serde<T: Serialize + Send + Sync + 'static>(value: T) -> Self {
        Reply::Object(Box::new(SerdeObject::new(value)))
    }

    /// Wrap an arbitrary value for a user-registered encoder.
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Reply::Object(Box::new(value))
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Response(response) => f.debug_tuple("Response").field(response).finish(),
            Reply::None => write!(f, "None"),
            Reply::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Reply::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Reply::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Reply::Object(_) => write!(f, "Object(..)"),
        }
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Response(response)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::None
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<Bytes> for Reply {
    fn from(bytes: Bytes) -> Self {
        Reply::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Reply {
    fn from(bytes: Vec<u8>) -> Self {
        Reply::Bytes(Bytes::from(bytes))
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Json(value)
    }
}

macro_rules! reply_from_scalar {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Reply {
                fn from(value: $ty) -> Self {
                    Reply::Json(Value::from(value))
                }
            }
        )+
    };
}

reply_from_scalar!(bool, i32, i64, u32, u64, f64);

impl From<ModelInstance> for Reply {
    fn from(model: ModelInstance) -> Self {
        Reply::Object(Box::new(model))
    }
}

impl From<SerdeObject> for Reply {
    fn from(object: SerdeObject) -> Self {
        Reply::Object(Box::new(object))
    }
}

impl<T: Into<Reply>> From<Option<T>> for Reply {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Reply::None)
    }
}

/// What a handler declares about its responses.
#[derive(Debug, Clone, Default)]
pub struct ResponseSpec {
    pub status_code: Option<u16>,
    pub media_type: Option<String>,
    pub response_class: Option<ResponseClass>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<Cookie>,
    pub background: BackgroundTasks,
}

/// Default status for a method when neither the response nor the handler sets one.
pub fn default_status(method: &str) -> u16 {
    match method {
        "POST" => 201,
        "DELETE" => 204,
        _ => 200,
    }
}

fn is_text_like(media_type: &str) -> bool {
    media_type.starts_with("text/")
        || media_type.ends_with("+xml")
        || media_type == "application/xml"
}

/// Convert a handler return value into a response.
pub fn adapt(
    reply: Reply,
    spec: &ResponseSpec,
    method: &str,
    default_media_type: &str,
    registry: &EncoderRegistry,
) -> Result<Response, Error> {
    let status = spec.status_code.unwrap_or_else(|| default_status(method));
    let class = spec.response_class.unwrap_or_else(|| {
        if spec.media_type.is_none() && default_media_type != "application/json" {
            if is_text_like(default_media_type) {
                ResponseClass::PlainText
            } else {
                ResponseClass::Bytes
            }
        } else {
            ResponseClass::Json
        }
    });
    let media_type = spec.media_type.clone().unwrap_or_else(|| {
        if spec.response_class.is_some() {
            class.media_type().to_string()
        } else {
            default_media_type.to_string()
        }
    });

    let mut response = match reply {
        Reply::Response(mut response) => {
            for (name, value) in &spec.headers {
                if !response.headers.contains(name) {
                    response.headers.insert(name, value.clone());
                }
            }
            for cookie in &spec.cookies {
                if !response.cookies.iter().any(|c| c.key == cookie.key) {
                    response.cookies.push(cookie.clone());
                }
            }
            if response.status.is_none() {
                // a body built by the handler is never dropped by a method default
                let fallback = match spec.status_code {
                    Some(declared) => declared,
                    None if status == 204 && !response.body.is_empty() => 200,
                    None => status,
                };
                response.status = Some(fallback);
            }
            if response.background.is_empty() {
                response.background = spec.background.clone();
            }
            return Ok(strip_bodiless(response));
        }
        Reply::None => Response::empty(),
        Reply::Text(text) if is_text_like(&media_type) => {
            Response::new(Body::Full(Bytes::from(text))).with_media_type(media_type)
        }
        Reply::Bytes(bytes) => Response::new(Body::Full(bytes)).with_media_type(media_type),
        Reply::Text(text) => render(class, Value::String(text), media_type)?,
        Reply::Json(value) => render(class, value, media_type)?,
        Reply::Object(object) => {
            let value = registry.serialize(object.as_ref())?;
            render(class, value, media_type)?
        }
    };

    response.status = Some(status);
    for (name, value) in &spec.headers {
        response.headers.insert(name, value.clone());
    }
    response.cookies.extend(spec.cookies.iter().cloned());
    response.background = spec.background.clone();
    Ok(strip_bodiless(response))
}

fn render(class: ResponseClass, value: Value, media_type: String) -> Result<Response, Error> {
    Ok(Response::new(Body::Full(class.render(value)?)).with_media_type(media_type))
}

fn strip_bodiless(mut response: Response) -> Response {
    if response.status_code() == 204 {
        response.body = Body::Empty;
        response.media_type = None;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn adapt_default(reply: Reply, spec: &ResponseSpec, method: &str) -> Response {
        adapt(reply, spec, method, "application/json", &EncoderRegistry::builtin()).unwrap()
    }

    #[test]
    fn test_default_status_by_method() {
        let spec = ResponseSpec::default();
        assert_eq!(adapt_default(json!({"a": 1}).into(), &spec, "GET").status_code(), 200);
        assert_eq!(adapt_default(json!({"a": 1}).into(), &spec, "POST").status_code(), 201);
        let deleted = adapt_default(json!({"a": 1}).into(), &spec, "DELETE");
        assert_eq!(deleted.status_code(), 204);
        assert!(deleted.body.is_empty());
    }

    #[test]
    fn test_delete_keeps_handler_built_body() {
        let adapted = adapt_default(Response::text("gone").into(), &ResponseSpec::default(), "DELETE");
        assert_eq!(adapted.status_code(), 200);
        assert_eq!(adapted.body_bytes().unwrap(), &Bytes::from("gone"));

        let adapted = adapt_default(Response::empty().into(), &ResponseSpec::default(), "DELETE");
        assert_eq!(adapted.status_code(), 204);
    }

    #[test]
    fn test_response_status_wins() {
        let spec = ResponseSpec {
            status_code: Some(202),
            headers: vec![("x-handler".into(), "yes".into())],
            ..Default::default()
        };
        let response = Response::text("teapot")
            .with_status(418)
            .header("x-handler", "mine");
        let adapted = adapt_default(response.into(), &spec, "POST");
        assert_eq!(adapted.status_code(), 418);
        assert_eq!(adapted.headers.get("x-handler"), Some("mine"));
        assert_eq!(adapted.body_bytes().unwrap(), &Bytes::from("teapot"));

        let adapted = adapt_default(Response::text("ok").into(), &spec, "POST");
        assert_eq!(adapted.status_code(), 202);
        assert_eq!(adapted.headers.get("x-handler"), Some("yes"));
    }

    #[test]
    fn test_serde_object_serialized() {
        #[derive(Serialize)]
        struct User {
            id: u32,
        }
        let adapted = adapt_default(Reply::serde(User { id: 7 }), &ResponseSpec::default(), "GET");
        assert_eq!(adapted.body_bytes().unwrap(), &Bytes::from(r#"{"id":7}"#));
        assert_eq!(adapted.media_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn test_text_with_text_media_type() {
        let spec = ResponseSpec {
            media_type: Some("text/plain".into()),
            ..Default::default()
        };
        let adapted = adapt_default("hello".into(), &spec, "GET");
        assert_eq!(adapted.body_bytes().unwrap(), &Bytes::from("hello"));

        let adapted = adapt_default("hello".into(), &ResponseSpec::default(), "GET");
        assert_eq!(adapted.body_bytes().unwrap(), &Bytes::from("\"hello\""));
    }

    #[test]
    fn test_none_is_empty_body() {
        let spec = ResponseSpec {
            status_code: Some(202),
            ..Default::default()
        };
        let adapted = adapt_default(().into(), &spec, "PUT");
        assert_eq!(adapted.status_code(), 202);
        assert!(adapted.body.is_empty());
    }

    #[test]
    fn test_cookie_header() {
        let cookie = Cookie::new("session", "a b")
            .max_age(60)
            .httponly(true)
            .secure(true)
            .samesite(Some(SameSite::Strict));
        assert_eq!(
            cookie.to_header_value(),
            "session=a%20b; Max-Age=60; Path=/; Secure; HttpOnly; SameSite=Strict"
        );
    }

    #[tokio::test]
    async fn test_send_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from("a")),
            Ok(Bytes::from("b")),
        ]);
        Response::stream(chunks, "text/plain")
            .send(&Sender::from_channel(tx))
            .await
            .unwrap();

        let Some(Message::HttpResponseStart { status, headers }) = rx.recv().await else {
            panic!("expected response start");
        };
        assert_eq!(status, 200);
        assert!(headers.contains(&("content-type".into(), "text/plain; charset=utf-8".into())));
        let mut body = Vec::new();
        while let Some(Message::HttpResponseBody { body: chunk, more_body }) = rx.recv().await {
            body.extend_from_slice(&chunk);
            if !more_body {
                break;
            }
        }
        assert_eq!(body, b"ab");
    }

    #[tokio::test]
    async fn test_background_runs_after_send() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let done_tx = Arc::new(parking_lot::Mutex::new(Some(done_tx)));
        let task = BackgroundTask::new("notify", move || {
            let done_tx = done_tx.clone();
            async move {
                if let Some(tx) = done_tx.lock().take() {
                    let _ = tx.send(());
                }
                Ok(())
            }
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        Response::json(json!({"ok": true}))
            .background(task)
            .send(&Sender::from_channel(tx))
            .await
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
    }
}
