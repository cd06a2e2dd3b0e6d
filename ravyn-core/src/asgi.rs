//! ASGI-style primitives: the connection scope, the messages exchanged with
//! the server, and the `receive`/`send` callables.
//!
//! An application is anything implementing [`AsgiApp`]: it is called once per
//! connection with a [`Scope`], a [`Receive`] to pull inbound events and a
//! [`Sender`] to emit outbound ones. [`Request`] is the convenience view over a
//! scope and its receive channel used by handlers, hooks and permissions.

use crate::application::App;
use crate::extract::{Argument, ParsedBody};
use crate::settings::{self, Settings};
use crate::state::State;
use crate::Error;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OnceCell, mpsc};

/// Connection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Http,
    WebSocket,
    Lifespan,
}

/// A WebSocket data frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// Events exchanged between the server and the application.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    HttpRequest {
        body: Bytes,
        more_body: bool,
    },
    HttpResponseStart {
        status: u16,
        headers: Vec<(String, String)>,
    },
    HttpResponseBody {
        body: Bytes,
        more_body: bool,
    },
    WebSocketConnect,
    WebSocketAccept {
        subprotocol: Option<String>,
        headers: Vec<(String, String)>,
    },
    WebSocketReceive(Frame),
    WebSocketSend(Frame),
    WebSocketClose {
        code: u16,
        reason: Option<String>,
    },
    /// The peer went away (`http.disconnect` / `websocket.disconnect`)
    Disconnect {
        code: u16,
    },
    LifespanStartup,
    LifespanStartupComplete,
    LifespanStartupFailed {
        message: String,
    },
    LifespanShutdown,
    LifespanShutdownComplete,
    LifespanShutdownFailed {
        message: String,
    },
}

/// Ordered header list with case-insensitive lookup. Names are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.append(name.as_ref(), value);
        }
        headers
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in arrival order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every value for `name` with `value`.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.append(name, value);
    }

    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_ascii_lowercase(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<(String, String)> {
        self.entries
    }
}

/// Per-connection storage shared by every clone of a [`Scope`].
#[derive(Default)]
pub(crate) struct RequestLocal {
    pub(crate) body: OnceCell<Bytes>,
    pub(crate) parsed: OnceCell<Arc<ParsedBody>>,
    /// Request-scoped dependency cache
    pub(crate) dependencies: Mutex<HashMap<String, Argument>>,
}

/// The connection scope.
#[derive(Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub method: String,
    pub scheme: String,
    pub http_version: String,
    /// Path relative to `root_path`
    pub path: String,
    /// Prefix consumed by mounted applications
    pub root_path: String,
    pub query_string: String,
    pub headers: Headers,
    pub client: Option<(String, u16)>,
    pub subprotocols: Vec<String>,
    /// Parameters captured by the route tree
    pub path_params: HashMap<String, Value>,
    pub state: State,
    /// Settings of the application currently handling the scope
    pub settings: Option<Arc<Settings>>,
    /// Application currently handling the scope
    pub app: Option<App>,
    pub(crate) local: Arc<RequestLocal>,
}

impl Scope {
    pub fn new(kind: ScopeKind, method: impl Into<String>, path: impl Into<String>) -> Self {
        let scheme = match kind {
            ScopeKind::WebSocket => "ws",
            _ => "http",
        };
        Self {
            kind,
            method: method.into().to_ascii_uppercase(),
            scheme: scheme.to_string(),
            http_version: "1.1".to_string(),
            path: path.into(),
            root_path: String::new(),
            query_string: String::new(),
            headers: Headers::new(),
            client: None,
            subprotocols: Vec::new(),
            path_params: HashMap::new(),
            state: State::new(),
            settings: None,
            app: None,
            local: Arc::new(RequestLocal::default()),
        }
    }

    pub fn http(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(ScopeKind::Http, method, path)
    }

    pub fn websocket(path: impl Into<String>) -> Self {
        Self::new(ScopeKind::WebSocket, "GET", path)
    }

    pub fn lifespan() -> Self {
        Self::new(ScopeKind::Lifespan, "", "")
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = query.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// `root_path + path`
    pub fn full_path(&self) -> String {
        format!("{}{}", self.root_path, self.path)
    }

    /// Host header without the port.
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get("host")
            .map(|host| host.split(':').next().unwrap_or(host))
    }

    /// Settings for this scope: the published ones, else the active process-wide ones.
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.clone().unwrap_or_else(settings::current)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("kind", &self.kind)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("root_path", &self.root_path)
            .field("query_string", &self.query_string)
            .field("headers", &self.headers)
            .field("path_params", &self.path_params)
            .finish()
    }
}

type ReceiveFn = dyn Fn() -> BoxFuture<'static, Message> + Send + Sync;
type SendFn = dyn Fn(Message) -> BoxFuture<'static, Result<(), Error>> + Send + Sync;

/// The `receive` callable.
#[derive(Clone)]
pub struct Receive(Arc<ReceiveFn>);

impl Receive {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Message> + Send + 'static,
    {
        Self(Arc::new(move || Box::pin(f())))
    }

    /// Pull messages from a channel; a closed channel reads as a disconnect.
    pub fn from_channel(rx: mpsc::UnboundedReceiver<Message>) -> Self {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        Self::new(move || {
            let rx = rx.clone();
            async move {
                rx.lock()
                    .await
                    .recv()
                    .await
                    .unwrap_or(Message::Disconnect { code: 1000 })
            }
        })
    }

    /// A single complete request body, followed by disconnects.
    pub fn body(body: impl Into<Bytes>) -> Self {
        let pending = Arc::new(Mutex::new(Some(body.into())));
        Self::new(move || {
            let next = pending.lock().take();
            async move {
                match next {
                    Some(body) => Message::HttpRequest {
                        body,
                        more_body: false,
                    },
                    None => Message::Disconnect { code: 1000 },
                }
            }
        })
    }

    pub fn empty() -> Self {
        Self::body(Bytes::new())
    }

    pub async fn recv(&self) -> Message {
        (self.0)().await
    }
}

/// The `send` callable.
#[derive(Clone)]
pub struct Sender(Arc<SendFn>);

impl Sender {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self(Arc::new(move |message| Box::pin(f(message))))
    }

    pub fn from_channel(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self::new(move |message| {
            let result = tx
                .send(message)
                .map_err(|_| Error::WebSocket("connection closed".to_string()));
            async move { result }
        })
    }

    pub async fn send(&self, message: Message) -> Result<(), Error> {
        (self.0)(message).await
    }

    /// A sender that rewrites each message before forwarding it.
    pub fn map<F>(&self, f: F) -> Sender
    where
        F: Fn(Message) -> Message + Send + Sync + 'static,
    {
        let inner = self.clone();
        Sender::new(move |message| {
            let inner = inner.clone();
            let message = f(message);
            async move { inner.send(message).await }
        })
    }

    /// A sender that records whether a response (or socket accept/close) went out.
    pub(crate) fn tracked(&self) -> (Sender, ResponseState) {
        let state = ResponseState::default();
        let flag = state.clone();
        let sender = self.map(move |message| {
            if matches!(
                message,
                Message::HttpResponseStart { .. }
                    | Message::WebSocketAccept { .. }
                    | Message::WebSocketClose { .. }
            ) {
                flag.0.store(true, Ordering::SeqCst);
            }
            message
        });
        (sender, state)
    }
}

/// Whether a response has started on a tracked sender.
#[derive(Clone, Default)]
pub(crate) struct ResponseState(Arc<AtomicBool>);

impl ResponseState {
    pub(crate) fn started(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An ASGI application.
#[async_trait]
pub trait AsgiApp: Send + Sync {
    async fn call(&self, scope: Scope, receive: Receive, send: Sender) -> Result<(), Error>;
}

/// View over a scope and its receive channel.
#[derive(Clone)]
pub struct Request {
    scope: Scope,
    receive: Receive,
}

impl Request {
    pub fn new(scope: Scope, receive: Receive) -> Self {
        Self { scope, receive }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    pub fn receive(&self) -> &Receive {
        &self.receive
    }

    pub fn into_parts(self) -> (Scope, Receive) {
        (self.scope, self.receive)
    }

    pub fn method(&self) -> &str {
        &self.scope.method
    }

    pub fn path(&self) -> &str {
        &self.scope.path
    }

    pub fn headers(&self) -> &Headers {
        &self.scope.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.scope.headers.get(name)
    }

    /// Media type of the body without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or(value)
                .trim()
                .to_ascii_lowercase()
        })
    }

    pub fn path_params(&self) -> &HashMap<String, Value> {
        &self.scope.path_params
    }

    pub fn path_param(&self, name: &str) -> Option<&Value> {
        self.scope.path_params.get(name)
    }

    /// Query string as an ordered multidict.
    pub fn query_params(&self) -> Vec<(String, String)> {
        serde_urlencoded::from_str(&self.scope.query_string).unwrap_or_default()
    }

    /// First value of a query parameter.
    pub fn query(&self, name: &str) -> Option<String> {
        self.query_params()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Cookies from the `Cookie` header; names are case-sensitive.
    pub fn cookies(&self) -> HashMap<String, String> {
        let mut cookies = HashMap::new();
        for header in self.scope.headers.get_all("cookie") {
            for pair in header.split(';') {
                let Some((name, value)) = pair.split_once('=') else {
                    continue;
                };
                let value = value.trim().trim_matches('"');
                let value = urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                cookies.entry(name.trim().to_string()).or_insert(value);
            }
        }
        cookies
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies().remove(name)
    }

    pub fn state(&self) -> &State {
        &self.scope.state
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.scope.settings()
    }

    pub fn app(&self) -> Option<&App> {
        self.scope.app.as_ref()
    }

    pub fn client(&self) -> Option<&(String, u16)> {
        self.scope.client.as_ref()
    }

    /// The full request body. Read once; later calls return the cached bytes.
    ///
    /// Bodies above `Settings::max_body_size` fail with 413 without being
    /// buffered past the limit.
    pub async fn body(&self) -> Result<Bytes, Error> {
        let limit = self.settings().max_body_size;
        if let Some(length) = self.content_length()
            && length > limit
        {
            return Err(body_too_large(limit));
        }
        self.scope
            .local
            .body
            .get_or_try_init(|| read_body(&self.receive, limit))
            .await
            .cloned()
    }

    /// Whether [`body`](Self::body) has already buffered the request body.
    pub fn body_buffered(&self) -> bool {
        self.scope.local.body.initialized()
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")
            .and_then(|value| value.trim().parse().ok())
    }

    /// The request body as chunks, bounded by `Settings::max_body_size`.
    ///
    /// Streaming consumes the body; a later [`body`](Self::body) call has
    /// nothing left to read.
    pub fn body_stream(&self) -> BoxStream<'static, Result<Bytes, Error>> {
        let limit = self.settings().max_body_size;
        let receive = self.receive.clone();
        stream::unfold((receive, 0usize, false), move |(receive, seen, done)| async move {
            if done {
                return None;
            }
            loop {
                match receive.recv().await {
                    Message::HttpRequest { body, more_body } => {
                        let seen = seen + body.len();
                        if seen > limit {
                            return Some((Err(body_too_large(limit)), (receive, seen, true)));
                        }
                        if body.is_empty() && more_body {
                            continue;
                        }
                        return Some((Ok(body), (receive, seen, !more_body)));
                    }
                    Message::Disconnect { .. } => {
                        return Some((Err(Error::Cancelled), (receive, seen, true)));
                    }
                    _ => continue,
                }
            }
        })
        .boxed()
    }

    pub async fn text(&self) -> Result<String, Error> {
        let body = self.body().await?;
        String::from_utf8(body.to_vec())
            .map_err(|e| Error::BadRequest(format!("Body is not valid UTF-8: {}", e)))
    }

    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let body = self.body().await?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::BadRequest(format!("Invalid JSON body: {}", e)))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").field("scope", &self.scope).finish()
    }
}

pub(crate) fn body_too_large(limit: usize) -> Error {
    Error::http(413, format!("Request body exceeds {} bytes", limit))
}

async fn read_body(receive: &Receive, limit: usize) -> Result<Bytes, Error> {
    let mut buffer = BytesMut::new();
    loop {
        match receive.recv().await {
            Message::HttpRequest { body, more_body } => {
                if buffer.len() + body.len() > limit {
                    return Err(body_too_large(limit));
                }
                buffer.extend_from_slice(&body);
                if !more_body {
                    return Ok(buffer.freeze());
                }
            }
            Message::Disconnect { .. } => return Err(Error::Cancelled),
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::from_pairs([("Content-Type", "application/json")]);
        headers.append("X-Tag", "a");
        headers.append("x-tag", "b");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get_all("X-TAG"), vec!["a", "b"]);
        headers.insert("x-tag", "c");
        assert_eq!(headers.get_all("x-tag"), vec!["c"]);
    }

    #[test]
    fn test_cookies_are_case_sensitive() {
        let scope = Scope::http("GET", "/").with_header("cookie", "Session=abc; session=def");
        let request = Request::new(scope, Receive::empty());
        let cookies = request.cookies();
        assert_eq!(cookies.get("Session").map(String::as_str), Some("abc"));
        assert_eq!(cookies.get("session").map(String::as_str), Some("def"));
    }

    #[test]
    fn test_query_multidict() {
        let scope = Scope::http("GET", "/").with_query("tag=a&tag=b&page=2");
        let request = Request::new(scope, Receive::empty());
        assert_eq!(request.query_params().len(), 3);
        assert_eq!(request.query("tag").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_body_is_cached() {
        let request = Request::new(Scope::http("POST", "/"), Receive::body("hello"));
        assert_eq!(request.body().await.unwrap(), Bytes::from("hello"));
        // the receive channel is drained, the cache answers
        assert_eq!(request.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_body_chunks_are_joined() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Message::HttpRequest {
            body: Bytes::from("ab"),
            more_body: true,
        })
        .unwrap();
        tx.send(Message::HttpRequest {
            body: Bytes::from("cd"),
            more_body: false,
        })
        .unwrap();
        let request = Request::new(Scope::http("POST", "/"), Receive::from_channel(rx));
        assert_eq!(request.body().await.unwrap(), Bytes::from("abcd"));
    }

    fn limited_scope(limit: usize) -> Scope {
        let mut scope = Scope::http("POST", "/");
        scope.settings = Some(Arc::new(Settings::new().max_body_size(limit)));
        scope
    }

    #[tokio::test]
    async fn test_body_over_limit_is_rejected() {
        let (tx, rx) = mpsc::unbounded_channel();
        for chunk in ["abc", "def"] {
            tx.send(Message::HttpRequest {
                body: Bytes::from(chunk),
                more_body: true,
            })
            .unwrap();
        }
        let request = Request::new(limited_scope(4), Receive::from_channel(rx));
        let err = request.body().await.unwrap_err();
        assert_eq!(err.status_code().as_u16(), 413);

        let scope = limited_scope(4).with_header("content-length", "1000");
        let request = Request::new(scope, Receive::body("ab"));
        assert_eq!(request.body().await.unwrap_err().status_code().as_u16(), 413);

        let request = Request::new(limited_scope(4), Receive::body("abcd"));
        assert_eq!(request.body().await.unwrap(), Bytes::from("abcd"));
    }

    #[tokio::test]
    async fn test_body_stream_stops_at_limit() {
        let (tx, rx) = mpsc::unbounded_channel();
        for (chunk, more_body) in [("ab", true), ("", true), ("cd", true), ("ef", false)] {
            tx.send(Message::HttpRequest {
                body: Bytes::from(chunk),
                more_body,
            })
            .unwrap();
        }
        let request = Request::new(limited_scope(5), Receive::from_channel(rx));
        let chunks: Vec<Result<Bytes, Error>> = request.body_stream().collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].as_ref().unwrap(), &Bytes::from("ab"));
        assert_eq!(chunks[1].as_ref().unwrap(), &Bytes::from("cd"));
        assert!(chunks[2].is_err());
        assert!(!request.body_buffered());
    }

    #[tokio::test]
    async fn test_tracked_sender() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (send, state) = Sender::from_channel(tx).tracked();
        assert!(!state.started());
        send.send(Message::HttpResponseStart {
            status: 200,
            headers: vec![],
        })
        .await
        .unwrap();
        assert!(state.started());
        assert!(matches!(rx.recv().await, Some(Message::HttpResponseStart { status: 200, .. })));
    }
}
