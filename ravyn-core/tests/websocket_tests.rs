//! WebSocket handlers through the test client.

use ravyn_core::*;
use serde_json::{Value, json};

fn echo() -> WebSocketHandler {
    websocket("/echo", |kw: Kwargs| async move {
        let socket = kw.socket()?;
        socket.accept().await?;
        loop {
            match socket.receive().await? {
                WebSocketMessage::Text(text) => socket.send_text(format!("echo: {}", text)).await?,
                WebSocketMessage::Binary(data) => socket.send_bytes(data).await?,
                WebSocketMessage::Close { .. } => return Ok(()),
            }
        }
    })
}

#[tokio::test]
async fn test_echo_until_client_disconnects() {
    let client = TestClient::new(App::new(vec![echo().into()]).unwrap());

    let mut session = client.websocket_connect("/echo").await.unwrap();
    assert!(session.accepted());

    session.send_text("one").unwrap();
    assert_eq!(session.receive_text().await.unwrap(), "echo: one");
    session.send_bytes(vec![1u8, 2, 3]).unwrap();
    assert_eq!(
        session.receive().await.unwrap(),
        WebSocketMessage::Binary(vec![1u8, 2, 3].into())
    );

    session.close(1000).await.unwrap();
}

#[tokio::test]
async fn test_path_and_query_params_bind() {
    let handler = websocket("/rooms/{room}", |kw: Kwargs| async move {
        let socket = kw.socket()?;
        let room: String = kw.get("room")?;
        let nick: String = kw.get("nick")?;
        socket.accept().await?;
        socket.send_json(&json!({ "room": room, "nick": nick })).await?;
        socket.close(1000).await
    })
    .param("room", TypeHint::Str)
    .param_with("nick", TypeHint::Str, Param::query());
    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());

    let mut session = client.websocket_connect("/rooms/lobby?nick=ada").await.unwrap();
    let greeting: Value = session.receive_json().await.unwrap();
    assert_eq!(greeting, json!({ "room": "lobby", "nick": "ada" }));
    assert_eq!(session.wait_closed().await.unwrap(), Some(1000));
}

#[tokio::test]
async fn test_subprotocol_negotiation() {
    let handler = websocket("/proto", |kw: Kwargs| async move {
        let socket = kw.socket()?;
        let chosen = socket
            .subprotocols()
            .iter()
            .find(|p| p.as_str() == "graphql-ws")
            .cloned();
        socket.accept_with(chosen, Vec::new()).await?;
        socket.close(1000).await
    });
    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());

    let mut session = client
        .websocket("/proto")
        .subprotocol("mqtt")
        .subprotocol("graphql-ws")
        .connect()
        .await
        .unwrap();
    assert!(session.accepted());
    assert_eq!(session.subprotocol(), Some("graphql-ws"));
    assert_eq!(session.wait_closed().await.unwrap(), Some(1000));
}

#[tokio::test]
async fn test_permission_denial_closes_before_accept() {
    let gateway = WebSocketGateway::new(echo()).permission(Permission::from_fn(
        |request: &Request, _handler: &HandlerInfo| request.header("authorization").is_some(),
    ));
    let client = TestClient::new(App::new(vec![gateway.into()]).unwrap());

    let session = client.websocket_connect("/echo").await.unwrap();
    assert!(!session.accepted());
    assert_eq!(session.close_code(), Some(1008));

    let session = client
        .websocket("/echo")
        .header("authorization", "Bearer t")
        .connect()
        .await
        .unwrap();
    assert!(session.accepted());
    session.close(1000).await.unwrap();
}

#[tokio::test]
async fn test_handler_error_closes_with_internal_error() {
    let handler = websocket("/broken", |kw: Kwargs| async move {
        let socket = kw.socket()?;
        socket.accept().await?;
        Err(Error::Internal("boom".to_string()))
    });
    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());

    let mut session = client.websocket_connect("/broken").await.unwrap();
    assert!(session.accepted());
    assert_eq!(session.wait_closed().await.unwrap(), Some(1011));
}

#[tokio::test]
async fn test_http_only_path_refuses_websocket() {
    let app = App::new(vec![get("/echo", |_kw: Kwargs| async { Ok("http") }).into()]).unwrap();
    let client = TestClient::new(app);

    let session = client.websocket_connect("/echo").await.unwrap();
    assert!(!session.accepted());
    assert!(session.close_code().is_some());
}
