// WebSocket support for Ravyn

use crate::asgi::{Frame, Headers, Message, Receive, Scope, Sender};
use crate::logging::{debug, trace};
use crate::state::State;
use crate::Error;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// The endpoint refuses the connection on policy grounds.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// The server hit an unexpected condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// WebSocket message type
#[derive(Debug, Clone, PartialEq)]
pub enum WebSocketMessage {
    Text(String),
    Binary(Bytes),
    Close { code: u16, reason: Option<String> },
}

impl From<Frame> for WebSocketMessage {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => WebSocketMessage::Text(text),
            Frame::Binary(data) => WebSocketMessage::Binary(data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    Connected,
    Closed,
}

struct Inner {
    scope: Scope,
    receive: Receive,
    send: Sender,
    state: Mutex<ConnectionState>,
}

/// The socket handed to WebSocket handlers.
///
/// Clones share one connection.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<Inner>,
}

impl WebSocket {
    pub fn new(scope: Scope, receive: Receive, send: Sender) -> Self {
        Self {
            inner: Arc::new(Inner {
                scope,
                receive,
                send,
                state: Mutex::new(ConnectionState::Connecting),
            }),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn path(&self) -> &str {
        &self.inner.scope.path
    }

    pub fn headers(&self) -> &Headers {
        &self.inner.scope.headers
    }

    pub fn path_params(&self) -> &HashMap<String, Value> {
        &self.inner.scope.path_params
    }

    pub fn query_params(&self) -> Vec<(String, String)> {
        serde_urlencoded::from_str(&self.inner.scope.query_string).unwrap_or_default()
    }

    pub fn state(&self) -> &State {
        &self.inner.scope.state
    }

    /// Subprotocols offered by the client.
    pub fn subprotocols(&self) -> &[String] {
        &self.inner.scope.subprotocols
    }

    pub fn is_accepted(&self) -> bool {
        *self.inner.state.lock() == ConnectionState::Connected
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.state.lock() == ConnectionState::Closed
    }

    pub async fn accept(&self) -> Result<(), Error> {
        self.accept_with(None, Vec::new()).await
    }

    /// Accept the connection, optionally choosing a subprotocol.
    pub async fn accept_with(
        &self,
        subprotocol: Option<String>,
        headers: Vec<(String, String)>,
    ) -> Result<(), Error> {
        if *self.inner.state.lock() != ConnectionState::Connecting {
            return Err(Error::WebSocket(
                "accept called on a connection that is not connecting".to_string(),
            ));
        }

        // The server opens with websocket.connect
        loop {
            match self.inner.receive.recv().await {
                Message::WebSocketConnect => break,
                Message::Disconnect { code } => {
                    *self.inner.state.lock() = ConnectionState::Closed;
                    return Err(Error::WebSocket(format!(
                        "client disconnected before accept ({})",
                        code
                    )));
                }
                other => trace!(message = ?other, "Ignoring message before accept"),
            }
        }

        self.inner
            .send
            .send(Message::WebSocketAccept {
                subprotocol,
                headers,
            })
            .await?;
        *self.inner.state.lock() = ConnectionState::Connected;
        debug!(path = %self.path(), "WebSocket accepted");
        Ok(())
    }

    /// Next message from the client. A disconnect reads as [`WebSocketMessage::Close`].
    pub async fn receive(&self) -> Result<WebSocketMessage, Error> {
        if !self.is_accepted() {
            return Err(Error::WebSocket(
                "receive called before accept or after close".to_string(),
            ));
        }
        loop {
            match self.inner.receive.recv().await {
                Message::WebSocketReceive(frame) => return Ok(frame.into()),
                Message::Disconnect { code } | Message::WebSocketClose { code, .. } => {
                    *self.inner.state.lock() = ConnectionState::Closed;
                    return Ok(WebSocketMessage::Close { code, reason: None });
                }
                _ => continue,
            }
        }
    }

    pub async fn receive_text(&self) -> Result<String, Error> {
        match self.receive().await? {
            WebSocketMessage::Text(text) => Ok(text),
            WebSocketMessage::Binary(data) => String::from_utf8(data.to_vec())
                .map_err(|e| Error::WebSocket(format!("frame is not valid UTF-8: {}", e))),
            WebSocketMessage::Close { code, .. } => {
                Err(Error::WebSocket(format!("connection closed ({})", code)))
            }
        }
    }

    pub async fn receive_bytes(&self) -> Result<Bytes, Error> {
        match self.receive().await? {
            WebSocketMessage::Text(text) => Ok(Bytes::from(text)),
            WebSocketMessage::Binary(data) => Ok(data),
            WebSocketMessage::Close { code, .. } => {
                Err(Error::WebSocket(format!("connection closed ({})", code)))
            }
        }
    }

    pub async fn receive_json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let text = self.receive_text().await?;
        serde_json::from_str(&text)
            .map_err(|e| Error::WebSocket(format!("invalid JSON frame: {}", e)))
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), Error> {
        if !self.is_accepted() {
            return Err(Error::WebSocket(
                "send called before accept or after close".to_string(),
            ));
        }
        self.inner.send.send(Message::WebSocketSend(frame)).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), Error> {
        self.send_frame(Frame::Text(text.into())).await
    }

    pub async fn send_bytes(&self, data: impl Into<Bytes>) -> Result<(), Error> {
        self.send_frame(Frame::Binary(data.into())).await
    }

    pub async fn send_json<T: Serialize>(&self, data: &T) -> Result<(), Error> {
        let json = serde_json::to_string(data).map_err(|e| Error::Serialization(e.to_string()))?;
        self.send_text(json).await
    }

    pub async fn close(&self, code: u16) -> Result<(), Error> {
        self.close_with(code, None).await
    }

    /// Close the connection. Closing twice is a no-op.
    pub async fn close_with(&self, code: u16, reason: Option<String>) -> Result<(), Error> {
        {
            let mut state = self.inner.state.lock();
            if *state == ConnectionState::Closed {
                return Ok(());
            }
            *state = ConnectionState::Closed;
        }
        debug!(path = %self.path(), code, "Closing WebSocket");
        self.inner
            .send
            .send(Message::WebSocketClose { code, reason })
            .await
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("path", &self.inner.scope.path)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}
