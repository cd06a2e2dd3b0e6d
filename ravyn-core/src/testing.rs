// In-process test client

use crate::application::App;
use crate::asgi::{AsgiApp, Frame, Headers, Message, Receive, Scope, Sender};
use crate::form::{self, UploadFile};
use crate::lifespan::Lifespan;
use crate::path::decode_path;
use crate::websocket::WebSocketMessage;
use crate::Error;
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Calls an application directly, without a network listener.
///
/// Requests carry `host: testserver` unless a test overrides it.
#[derive(Clone)]
pub struct TestClient {
    app: App,
}

impl TestClient {
    pub fn new(app: App) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    /// Run the startup phase (extensions, hooks, child applications).
    pub async fn startup(&self) -> Result<(), Error> {
        self.app.startup().await
    }

    pub async fn shutdown(&self) -> Result<(), Error> {
        self.app.shutdown().await
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request("GET", path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request("POST", path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request("PUT", path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request("PATCH", path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request("DELETE", path)
    }

    pub fn head(&self, path: &str) -> RequestBuilder {
        self.request("HEAD", path)
    }

    pub fn options(&self, path: &str) -> RequestBuilder {
        self.request("OPTIONS", path)
    }

    /// A request with any method. `path` may carry a query string.
    pub fn request(&self, method: &str, path: &str) -> RequestBuilder {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (decode_path(path), query.to_string()),
            None => (decode_path(path), String::new()),
        };
        let mut headers = Headers::new();
        headers.insert("host", "testserver");
        RequestBuilder {
            app: self.app.clone(),
            method: method.to_ascii_uppercase(),
            path,
            query,
            headers,
            cookies: Vec::new(),
            body: Ok(Bytes::new()),
        }
    }

    /// Open a WebSocket connection.
    pub fn websocket(&self, path: &str) -> WebSocketBuilder {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (decode_path(path), query.to_string()),
            None => (decode_path(path), String::new()),
        };
        let mut headers = Headers::new();
        headers.insert("host", "testserver");
        WebSocketBuilder {
            app: self.app.clone(),
            path,
            query,
            headers,
            subprotocols: Vec::new(),
        }
    }

    /// Shorthand for `websocket(path).connect()`.
    pub async fn websocket_connect(&self, path: &str) -> Result<WebSocketSession, Error> {
        self.websocket(path).connect().await
    }
}

/// Multipart form body for [`RequestBuilder::multipart`].
#[derive(Debug, Clone, Default)]
pub struct Multipart {
    fields: Vec<(String, String)>,
    files: Vec<UploadFile>,
}

impl Multipart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.files.push(
            UploadFile::new(name, Some(filename.into()), data).with_content_type(content_type),
        );
        self
    }
}

pub struct RequestBuilder {
    app: App,
    method: String,
    path: String,
    query: String,
    headers: Headers,
    cookies: Vec<(String, String)>,
    body: Result<Bytes, Error>,
}

impl RequestBuilder {
    /// Set a header, replacing earlier values.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        let pair = serde_urlencoded::to_string([(key, value.to_string())]).unwrap_or_default();
        if !self.query.is_empty() {
            self.query.push('&');
        }
        self.query.push_str(&pair);
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        self.body = serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::Serialization(e.to_string()));
        self.headers.insert("content-type", "application/json");
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Ok(body.into());
        self
    }

    /// URL-encoded form body.
    pub fn form<K: AsRef<str>, V: AsRef<str>>(mut self, pairs: &[(K, V)]) -> Self {
        let pairs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_ref(), v.as_ref())).collect();
        self.body = serde_urlencoded::to_string(&pairs)
            .map(Bytes::from)
            .map_err(|e| Error::Serialization(e.to_string()));
        self.headers
            .insert("content-type", "application/x-www-form-urlencoded");
        self
    }

    pub fn multipart(mut self, multipart: Multipart) -> Self {
        let (content_type, body) = form::encode_multipart(&multipart.fields, &multipart.files);
        self.body = Ok(body);
        self.headers.insert("content-type", content_type);
        self
    }

    /// Run the request to completion and collect the response.
    pub async fn send(self) -> Result<TestResponse, Error> {
        let body = self.body?;
        let mut scope = Scope::http(self.method, self.path).with_query(self.query);
        scope.headers = self.headers;
        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            scope.headers.insert("cookie", cookie);
        }
        if !body.is_empty() && !scope.headers.contains("content-length") {
            scope.headers.insert("content-length", body.len().to_string());
        }
        scope.client = Some(("testclient".to_string(), 50000));

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.app
            .call(scope, Receive::body(body), Sender::from_channel(tx))
            .await?;

        let mut status = None;
        let mut headers = Headers::new();
        let mut body = BytesMut::new();
        while let Ok(message) = rx.try_recv() {
            match message {
                Message::HttpResponseStart {
                    status: code,
                    headers: pairs,
                } => {
                    status = Some(code);
                    headers = Headers::from_pairs(pairs);
                }
                Message::HttpResponseBody { body: chunk, .. } => body.extend_from_slice(&chunk),
                _ => {}
            }
        }

        let status = status.ok_or_else(|| {
            Error::Internal("application returned without starting a response".to_string())
        })?;
        Ok(TestResponse {
            status,
            headers,
            body: body.freeze(),
        })
    }
}

/// A collected response.
#[derive(Debug, Clone)]
pub struct TestResponse {
    status: u16,
    headers: Headers,
    body: Bytes,
}

impl TestResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Serialization(e.to_string()))
    }
}

pub struct WebSocketBuilder {
    app: App,
    path: String,
    query: String,
    headers: Headers,
    subprotocols: Vec<String>,
}

impl WebSocketBuilder {
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    /// Run the handshake. A refused connection still yields a session,
    /// with [`WebSocketSession::accepted`] false and the close code set.
    pub async fn connect(self) -> Result<WebSocketSession, Error> {
        let mut scope = Scope::websocket(self.path).with_query(self.query);
        scope.headers = self.headers;
        scope.subprotocols = self.subprotocols;
        scope.client = Some(("testclient".to_string(), 50000));

        let (to_app, app_rx) = mpsc::unbounded_channel();
        let (app_tx, mut from_app) = mpsc::unbounded_channel();
        to_app
            .send(Message::WebSocketConnect)
            .map_err(|_| Error::WebSocket("connection closed".to_string()))?;

        let app = self.app.clone();
        let task = tokio::spawn(async move {
            app.call(scope, Receive::from_channel(app_rx), Sender::from_channel(app_tx))
                .await
        });

        let mut session = WebSocketSession {
            to_app,
            from_app: None,
            task: Some(task),
            accepted: false,
            subprotocol: None,
            close_code: None,
        };
        loop {
            match from_app.recv().await {
                Some(Message::WebSocketAccept { subprotocol, .. }) => {
                    session.accepted = true;
                    session.subprotocol = subprotocol;
                    break;
                }
                Some(Message::WebSocketClose { code, .. }) => {
                    session.close_code = Some(code);
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        session.from_app = Some(from_app);
        Ok(session)
    }
}

/// The client end of a test WebSocket connection.
pub struct WebSocketSession {
    to_app: mpsc::UnboundedSender<Message>,
    from_app: Option<mpsc::UnboundedReceiver<Message>>,
    task: Option<JoinHandle<Result<(), Error>>>,
    accepted: bool,
    subprotocol: Option<String>,
    close_code: Option<u16>,
}

impl WebSocketSession {
    pub fn accepted(&self) -> bool {
        self.accepted
    }

    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// Close code sent by the application, once seen.
    pub fn close_code(&self) -> Option<u16> {
        self.close_code
    }

    fn push(&self, frame: Frame) -> Result<(), Error> {
        self.to_app
            .send(Message::WebSocketReceive(frame))
            .map_err(|_| Error::WebSocket("connection closed".to_string()))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), Error> {
        self.push(Frame::Text(text.into()))
    }

    pub fn send_bytes(&self, data: impl Into<Bytes>) -> Result<(), Error> {
        self.push(Frame::Binary(data.into()))
    }

    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<(), Error> {
        let text = serde_json::to_string(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.send_text(text)
    }

    /// Next frame from the application; a close reads as [`WebSocketMessage::Close`].
    pub async fn receive(&mut self) -> Result<WebSocketMessage, Error> {
        let from_app = self
            .from_app
            .as_mut()
            .ok_or_else(|| Error::WebSocket("connection closed".to_string()))?;
        loop {
            match from_app.recv().await {
                Some(Message::WebSocketSend(frame)) => return Ok(frame.into()),
                Some(Message::WebSocketClose { code, reason }) => {
                    self.close_code = Some(code);
                    return Ok(WebSocketMessage::Close { code, reason });
                }
                Some(_) => continue,
                None => return Err(Error::WebSocket("connection closed".to_string())),
            }
        }
    }

    pub async fn receive_text(&mut self) -> Result<String, Error> {
        match self.receive().await? {
            WebSocketMessage::Text(text) => Ok(text),
            other => Err(Error::WebSocket(format!("expected a text frame, got {:?}", other))),
        }
    }

    pub async fn receive_json<T: DeserializeOwned>(&mut self) -> Result<T, Error> {
        let text = self.receive_text().await?;
        serde_json::from_str(&text).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Disconnect from the client side and wait for the application to finish.
    pub async fn close(mut self, code: u16) -> Result<(), Error> {
        let _ = self.to_app.send(Message::Disconnect { code });
        self.join().await
    }

    /// Wait for the application to close the connection. Returns the close code.
    pub async fn wait_closed(&mut self) -> Result<Option<u16>, Error> {
        while self.close_code.is_none() {
            match self.receive().await {
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        self.join().await?;
        Ok(self.close_code)
    }

    async fn join(&mut self) -> Result<(), Error> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| Error::Internal(format!("websocket task failed: {}", e)))?,
            None => Ok(()),
        }
    }
}
