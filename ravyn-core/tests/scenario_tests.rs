//! End-to-end scenarios through the test client.

use ravyn_core::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, thiserror::Error)]
#[error("value out of range")]
struct ValueError;

// =============================================================================
// HTTP
// =============================================================================

#[tokio::test]
async fn test_get_with_typed_path_param() {
    let app = App::new(vec![
        get("/users/{user_id:int}", |kw: Kwargs| async move {
            let user_id: i64 = kw.get("user_id")?;
            Ok(json!({ "user_id": user_id }))
        })
        .param("user_id", TypeHint::Int)
        .into(),
    ])
    .unwrap();
    let client = TestClient::new(app);

    let response = client.get("/users/42").send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().unwrap(), json!({ "user_id": 42 }));
    assert_eq!(response.header("content-type"), Some("application/json"));
}

#[tokio::test]
async fn test_body_model_validation_failure() {
    let item = ModelSchema::new("Item").field("sku", TypeHint::Int).into_hint();
    let app = App::new(vec![
        post("/create", |kw: Kwargs| async move {
            let item = kw.model("item")?;
            Ok(item.to_value())
        })
        .param("item", item)
        .into(),
    ])
    .unwrap();
    let client = TestClient::new(app);

    let response = client
        .post("/create")
        .json(&json!({ "sku": "abc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().unwrap();
    assert_eq!(body["errors"][0]["loc"], json!(["sku"]));
    assert_eq!(body["errors"][0]["type"], "int_parsing");

    let response = client
        .post("/create")
        .json(&json!({ "sku": "7" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.json::<Value>().unwrap(), json!({ "sku": 7 }));
}

#[tokio::test]
async fn test_gateway_permission_denial_skips_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = get("/secret", move |_kw: Kwargs| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("secret")
        }
    });
    let gateway = Gateway::new(handler).permission(Permission::from_fn(
        |request: &Request, _handler: &HandlerInfo| request.header("x-allow").is_some(),
    ));
    let client = TestClient::new(App::new(vec![gateway.into()]).unwrap());

    let response = client.get("/secret").send().await.unwrap();
    assert_eq!(response.status(), 403);
    assert_eq!(
        response.json::<Value>().unwrap(),
        json!({ "detail": "Permission denied" })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let response = client.get("/secret").header("x-allow", "1").send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dependency_inherited_from_app_and_mount() {
    let valid = Provider::new(Signature::new().param("n", TypeHint::Int), |kw: Kwargs| async move {
        let n: i64 = kw.get("n")?;
        Ok(n >= 5)
    });
    let mount = Include::new(
        "/",
        vec![
            get("/validate", |kw: Kwargs| async move { kw.get::<bool>("valid") })
                .param("valid", TypeHint::Bool)
                .into(),
        ],
    )
    .dependency("valid", valid);

    let app = App::builder()
        .dependency("n", Provider::value(20i64))
        .route(mount)
        .build()
        .unwrap();
    let client = TestClient::new(app);

    let response = client.get("/validate").send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().unwrap(), json!(true));
}

#[tokio::test]
async fn test_app_exception_handler_override() {
    let app = App::builder()
        .route(get("/fail", |_kw: Kwargs| async move {
            Err::<(), _>(Error::custom(ValueError))
        }))
        .exception_handler(ExceptionHandler::for_type::<ValueError, _>(
            |_request: &Request, error: &Error| Ok(Response::text(error.to_string()).with_status(418)),
        ))
        .build()
        .unwrap();
    let client = TestClient::new(app);

    let response = client.get("/fail").send().await.unwrap();
    assert_eq!(response.status(), 418);
    assert_eq!(response.text(), "value out of range");
}

// =============================================================================
// WebSocket
// =============================================================================

#[tokio::test]
async fn test_websocket_echo_then_close() {
    let app = App::new(vec![
        websocket("/ws", |kw: Kwargs| async move {
            let socket = kw.socket()?;
            socket.accept().await?;
            let message: Value = socket.receive_json().await?;
            socket.send_json(&json!({ "echo": message })).await?;
            socket.close(1000).await
        })
        .into(),
    ])
    .unwrap();
    let client = TestClient::new(app);

    let mut session = client.websocket_connect("/ws").await.unwrap();
    assert!(session.accepted());
    session.send_json(&json!({ "a": 1 })).unwrap();
    let reply: Value = session.receive_json().await.unwrap();
    assert_eq!(reply, json!({ "echo": { "a": 1 } }));
    assert_eq!(session.wait_closed().await.unwrap(), Some(1000));
}
