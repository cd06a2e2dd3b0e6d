// HTTP/1.1 server bridging hyper connections to the ASGI interface

use crate::application::App;
use crate::asgi::{AsgiApp, Frame, Message, Receive, Scope, Sender};
use crate::lifespan::Lifespan;
use crate::logging::{debug, error, info, warn};
use crate::websocket::CLOSE_NORMAL;
use crate::Error;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Body as _, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, Version};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};

type Body = UnsyncBoxBody<Bytes, Infallible>;

/// Accept connections on `addr` until Ctrl-C, running the lifespan around them.
pub(crate) async fn serve(app: App, addr: SocketAddr) -> Result<(), Error> {
    let listener = TcpListener::bind(addr).await?;
    app.startup().await?;
    info!(%addr, title = %app.settings().title, "Server listening");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let app = app.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let app = app.clone();
                        async move { Ok::<_, Infallible>(handle(app, req, peer).await) }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        debug!(error = %err, %peer, "Error serving connection");
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    app.shutdown().await
}

fn plain(status: u16, text: &'static str) -> Response<Body> {
    let mut response = Response::new(Full::new(Bytes::from_static(text.as_bytes())).boxed_unsync());
    *response.status_mut() = hyper::StatusCode::from_u16(status)
        .unwrap_or(hyper::StatusCode::INTERNAL_SERVER_ERROR);
    response
}

fn is_websocket_upgrade(req: &Request<Incoming>) -> bool {
    req.headers()
        .get(hyper::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn scope_from(req: &Request<Incoming>, peer: SocketAddr, app: &App, websocket: bool) -> Scope {
    let decoded = crate::path::decode_path(req.uri().path());

    let mut scope = if websocket {
        Scope::websocket(decoded)
    } else {
        Scope::http(req.method().as_str(), decoded)
    };

    let root_path = &app.settings().root_path;
    if !root_path.is_empty()
        && let Some(rest) = scope.path.strip_prefix(root_path.as_str())
    {
        scope.path = if rest.is_empty() { "/".to_string() } else { rest.to_string() };
        scope.root_path = root_path.clone();
    }

    scope.query_string = req.uri().query().unwrap_or_default().to_string();
    scope.http_version = match req.version() {
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        _ => "1.1",
    }
    .to_string();
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            scope.headers.append(name.as_str(), value);
        }
    }
    scope.client = Some((peer.ip().to_string(), peer.port()));
    if let Some(protocols) = scope.headers.get("sec-websocket-protocol") {
        scope.subprotocols = protocols
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }
    scope
}

/// Stream the request body as `http.request` messages.
fn receive_from(body: Incoming) -> Receive {
    let body = Arc::new(tokio::sync::Mutex::new(Some(body)));
    Receive::new(move || {
        let body = body.clone();
        async move {
            let mut guard = body.lock().await;
            let Some(incoming) = guard.as_mut() else {
                return Message::Disconnect { code: CLOSE_NORMAL };
            };
            loop {
                match incoming.frame().await {
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            return Message::HttpRequest {
                                body: data,
                                more_body: !incoming.is_end_stream(),
                            };
                        }
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "Request body failed");
                        *guard = None;
                        return Message::Disconnect { code: 1006 };
                    }
                    None => {
                        *guard = None;
                        return Message::HttpRequest {
                            body: Bytes::new(),
                            more_body: false,
                        };
                    }
                }
            }
        }
    })
}

async fn handle(app: App, req: Request<Incoming>, peer: SocketAddr) -> Response<Body> {
    if is_websocket_upgrade(&req) {
        return upgrade(app, req, peer).await;
    }

    let scope = scope_from(&req, peer, &app, false);
    let receive = receive_from(req.into_body());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let send = Sender::from_channel(tx);

    tokio::spawn(async move {
        if let Err(e) = app.call(scope, receive, send).await {
            error!(error = %e, "Application failed");
        }
    });

    let (status, headers) = loop {
        match rx.recv().await {
            Some(Message::HttpResponseStart { status, headers }) => break (status, headers),
            Some(_) => continue,
            None => return plain(500, "Internal Server Error"),
        }
    };

    let chunks = futures_util::stream::unfold((rx, false), |(mut rx, done)| async move {
        if done {
            return None;
        }
        loop {
            match rx.recv().await {
                Some(Message::HttpResponseBody { body, more_body }) => {
                    let frame = hyper::body::Frame::data(body);
                    return Some((Ok::<_, Infallible>(frame), (rx, !more_body)));
                }
                Some(_) => continue,
                None => return None,
            }
        }
    });

    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
        .body(StreamBody::new(chunks).boxed_unsync())
        .unwrap_or_else(|_| plain(500, "Internal Server Error"))
}

async fn upgrade(app: App, mut req: Request<Incoming>, peer: SocketAddr) -> Response<Body> {
    let Some(key) = req
        .headers()
        .get("sec-websocket-key")
        .map(|v| v.as_bytes().to_vec())
    else {
        return plain(400, "Missing Sec-WebSocket-Key");
    };

    let scope = scope_from(&req, peer, &app, true);
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    if in_tx.send(Message::WebSocketConnect).is_err() {
        return plain(500, "Internal Server Error");
    }

    tokio::spawn(async move {
        let result = app
            .call(scope, Receive::from_channel(in_rx), Sender::from_channel(out_tx))
            .await;
        if let Err(e) = result {
            debug!(error = %e, "WebSocket application ended with an error");
        }
    });

    let accepted = loop {
        match out_rx.recv().await {
            Some(Message::WebSocketAccept {
                subprotocol,
                headers,
            }) => break Some((subprotocol, headers)),
            Some(Message::WebSocketClose { .. }) | None => break None,
            Some(_) => continue,
        }
    };
    let Some((subprotocol, headers)) = accepted else {
        return plain(403, "Forbidden");
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let stream =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                bridge(stream, in_tx, out_rx).await;
            }
            Err(e) => {
                warn!(error = %e, "WebSocket upgrade failed");
                let _ = in_tx.send(Message::Disconnect { code: 1006 });
            }
        }
    });

    let mut builder = Response::builder()
        .status(101)
        .header(hyper::header::CONNECTION, "upgrade")
        .header(hyper::header::UPGRADE, "websocket")
        .header("sec-websocket-accept", derive_accept_key(&key));
    if let Some(protocol) = subprotocol {
        builder = builder.header("sec-websocket-protocol", protocol);
    }
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Empty::new().boxed_unsync())
        .unwrap_or_else(|_| plain(500, "Internal Server Error"))
}

/// Pump frames between the socket and the application until either side closes.
async fn bridge<S>(
    stream: WebSocketStream<S>,
    in_tx: mpsc::UnboundedSender<Message>,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut source) = stream.split();

    let reader = async {
        while let Some(frame) = source.next().await {
            let message = match frame {
                Ok(WsMessage::Text(text)) => {
                    Message::WebSocketReceive(Frame::Text(text.as_str().to_owned()))
                }
                Ok(WsMessage::Binary(data)) => Message::WebSocketReceive(Frame::Binary(data)),
                Ok(WsMessage::Close(frame)) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                    let _ = in_tx.send(Message::Disconnect { code });
                    return;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "WebSocket read failed");
                    break;
                }
            };
            if in_tx.send(message).is_err() {
                return;
            }
        }
        let _ = in_tx.send(Message::Disconnect { code: 1006 });
    };

    let writer = async {
        while let Some(message) = out_rx.recv().await {
            let result = match message {
                Message::WebSocketSend(Frame::Text(text)) => {
                    sink.send(WsMessage::Text(text.into())).await
                }
                Message::WebSocketSend(Frame::Binary(data)) => {
                    sink.send(WsMessage::Binary(data)).await
                }
                Message::WebSocketClose { code, reason } => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.unwrap_or_default().into(),
                    };
                    let _ = sink.send(WsMessage::Close(Some(frame))).await;
                    return;
                }
                _ => continue,
            };
            if let Err(e) = result {
                debug!(error = %e, "WebSocket write failed");
                return;
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = writer => {}
    }
}
