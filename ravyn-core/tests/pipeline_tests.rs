//! Request pipeline ordering, short-circuits and error rendering.

use parking_lot::Mutex;
use ravyn_core::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Log, label: &str) -> RequestHook {
    let log = log.clone();
    let label = label.to_string();
    RequestHook::new(move |_request: Request| {
        log.lock().push(label.clone());
        async { Ok(()) }
    })
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_hooks_interceptors_permissions_handler_order() {
    let events = log();

    let interceptor_log = events.clone();
    let permission_log = events.clone();
    let handler_log = events.clone();

    let handler = get("/run", move |_kw: Kwargs| {
        let log = handler_log.clone();
        async move {
            log.lock().push("handler".to_string());
            Ok("ran")
        }
    })
    .before_request(record(&events, "before:handler"))
    .after_request(record(&events, "after:handler"));

    let gateway = Gateway::new(handler)
        .before_request(record(&events, "before:gateway"))
        .after_request(record(&events, "after:gateway"))
        .interceptor(FnInterceptor::new(move |_request: Request| {
            interceptor_log.lock().push("interceptor".to_string());
            async { Ok(Flow::Continue) }
        }))
        .permission(Permission::from_fn(move |_request: &Request, _handler: &HandlerInfo| {
            permission_log.lock().push("permission".to_string());
            true
        }));

    let mount = Include::new("/api", vec![gateway.into()])
        .before_request(record(&events, "before:mount"))
        .after_request(record(&events, "after:mount"));

    let app = App::builder()
        .route(mount)
        .before_request(record(&events, "before:app"))
        .after_request(record(&events, "after:app"))
        .build()
        .unwrap();
    let client = TestClient::new(app);

    let response = client.get("/api/run").send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        entries(&events),
        vec![
            "before:app",
            "before:mount",
            "before:gateway",
            "before:handler",
            "interceptor",
            "permission",
            "handler",
            "after:handler",
            "after:gateway",
            "after:mount",
            "after:app",
        ]
    );
}

#[tokio::test]
async fn test_interceptor_response_short_circuits() {
    let events = log();
    let handler_log = events.clone();

    let handler = get("/", move |_kw: Kwargs| {
        let log = handler_log.clone();
        async move {
            log.lock().push("handler".to_string());
            Ok("handler")
        }
    })
    .interceptor(FnInterceptor::new(|_request: Request| async {
        Ok(Flow::Respond(Response::text("intercepted").with_status(202)))
    }))
    .after_request(record(&events, "after"));

    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());
    let response = client.get("/").send().await.unwrap();
    assert_eq!(response.status(), 202);
    assert_eq!(response.text(), "intercepted");
    assert_eq!(entries(&events), vec!["after"]);
}

#[tokio::test]
async fn test_interceptor_writes_request_state() {
    let handler = get("/", |kw: Kwargs| async move {
        let request = kw.request()?;
        Ok(request.state().value("tenant").unwrap_or(Value::Null))
    })
    .param("request", TypeHint::Any)
    .interceptor(HeaderToStateInterceptor::new("x-tenant", "tenant"));

    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());
    let response = client.get("/").header("x-tenant", "acme").send().await.unwrap();
    assert_eq!(response.json::<Value>().unwrap(), json!("acme"));
}

// =============================================================================
// Permissions
// =============================================================================

struct RequireToken;

#[async_trait]
impl TransportPermission for RequireToken {
    async fn handle(
        &self,
        scope: Scope,
        receive: Receive,
        send: Sender,
        next: Next,
    ) -> Result<(), Error> {
        if scope.headers.contains("x-token") {
            next(scope, receive, send).await
        } else {
            Response::text("token required").with_status(401).send(&send).await
        }
    }
}

#[tokio::test]
async fn test_transport_permission_wraps_handler() {
    let handler = get("/", |_kw: Kwargs| async { Ok("inside") })
        .permission(Permission::transport(RequireToken));
    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());

    let denied = client.get("/").send().await.unwrap();
    assert_eq!(denied.status(), 401);
    assert_eq!(denied.text(), "token required");

    let allowed = client.get("/").header("x-token", "t").send().await.unwrap();
    assert_eq!(allowed.status(), 200);
    assert_eq!(allowed.json::<String>().unwrap(), "inside");
}

#[tokio::test]
async fn test_first_permission_denial_wins() {
    let handler = get("/", |_kw: Kwargs| async { Ok(()) })
        .permission(Permission::framework(AllowAny))
        .permission(Permission::framework(ApiKeyPermission::new(["k1"])))
        .permission(Permission::framework(DenyAll));
    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());

    let response = client.get("/").send().await.unwrap();
    assert_eq!(response.status(), 403);
    assert_eq!(
        response.json::<Value>().unwrap(),
        json!({ "detail": "Invalid API key" })
    );
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_nearest_level_exception_handler_wins() {
    let handler = get("/", |_kw: Kwargs| async {
        Err::<(), _>(Error::BadRequest("bad input".to_string()))
    });
    let gateway = Gateway::new(handler).exception_handler(ExceptionHandler::for_kind(
        ErrorKind::HttpException,
        |_request: &Request, error: &Error| {
            Ok(Response::text(format!("gateway: {}", error.detail(false))).with_status(409))
        },
    ));
    let app = App::builder()
        .route(gateway)
        .exception_handler(ExceptionHandler::for_kind(
            ErrorKind::BadRequest,
            |_request: &Request, _error: &Error| Ok(Response::text("app").with_status(418)),
        ))
        .build()
        .unwrap();
    let client = TestClient::new(app);

    let response = client.get("/").send().await.unwrap();
    assert_eq!(response.status(), 409);
    assert_eq!(response.text(), "gateway: bad input");
}

#[tokio::test]
async fn test_failing_exception_handler_falls_back_to_default() {
    let handler = get("/", |_kw: Kwargs| async {
        Err::<(), _>(Error::NotFound("gone".to_string()))
    })
    .exception_handler(ExceptionHandler::for_kind(
        ErrorKind::NotFound,
        |_request: &Request, _error: &Error| Err(Error::Internal("handler broke".to_string())),
    ));
    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());

    let response = client.get("/").send().await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.json::<Value>().unwrap(), json!({ "detail": "Not Found" }));
}

#[tokio::test]
async fn test_server_error_detail_hidden_unless_debug() {
    let failing = || {
        get("/", |_kw: Kwargs| async {
            Err::<(), _>(Error::Internal("db down".to_string()))
        })
    };

    let client = TestClient::new(App::new(vec![failing().into()]).unwrap());
    let response = client.get("/").send().await.unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(
        response.json::<Value>().unwrap(),
        json!({ "detail": "Internal Server Error" })
    );

    let app = App::builder()
        .settings(Settings::new().debug(true))
        .route(failing())
        .build()
        .unwrap();
    let response = TestClient::new(app).get("/").send().await.unwrap();
    assert_eq!(response.status(), 500);
    let detail = response.json::<Value>().unwrap()["detail"].to_string();
    assert!(detail.contains("db down"));
}

#[tokio::test]
async fn test_after_hooks_run_when_handler_fails() {
    let events = log();
    let handler = get("/", |_kw: Kwargs| async {
        Err::<(), _>(Error::BadRequest("nope".to_string()))
    })
    .after_request(record(&events, "after:handler"));
    let app = App::builder()
        .route(handler)
        .after_request(record(&events, "after:app"))
        .build()
        .unwrap();
    let client = TestClient::new(app);

    let response = client.get("/").send().await.unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(entries(&events), vec!["after:handler", "after:app"]);
}

#[tokio::test]
async fn test_after_hooks_run_when_request_is_cancelled() {
    let events = log();
    let started = Arc::new(Notify::new());

    let signal = started.clone();
    let handler = get("/slow", move |_kw: Kwargs| {
        let signal = signal.clone();
        async move {
            signal.notify_one();
            std::future::pending::<()>().await;
            Ok("never")
        }
    })
    .after_request(record(&events, "after:handler"));
    let app = App::builder()
        .route(handler)
        .after_request(record(&events, "after:app"))
        .build()
        .unwrap();
    let client = TestClient::new(app);

    let request = tokio::spawn(async move { client.get("/slow").send().await });
    started.notified().await;
    request.abort();
    assert!(request.await.unwrap_err().is_cancelled());

    for _ in 0..50 {
        if entries(&events).len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(entries(&events), vec!["after:handler", "after:app"]);
}

// =============================================================================
// Handlers and responses
// =============================================================================

#[tokio::test]
async fn test_sync_handler_does_not_block_other_requests() {
    let events = log();
    let slow_log = events.clone();
    let fast_log = events.clone();

    let app = App::new(vec![
        HttpHandler::sync(["GET"], "/blocking", move |_kw: Kwargs| {
            std::thread::sleep(Duration::from_millis(100));
            slow_log.lock().push("blocking".to_string());
            Ok("slow")
        })
        .into(),
        get("/fast", move |_kw: Kwargs| {
            let log = fast_log.clone();
            async move {
                log.lock().push("fast".to_string());
                Ok("fast")
            }
        })
        .into(),
    ])
    .unwrap();
    let client = TestClient::new(app);

    let (slow, fast) = tokio::join!(
        client.get("/blocking").send(),
        client.get("/fast").send()
    );
    assert_eq!(slow.unwrap().json::<String>().unwrap(), "slow");
    assert_eq!(fast.unwrap().json::<String>().unwrap(), "fast");
    assert_eq!(entries(&events), vec!["fast", "blocking"]);
}

#[tokio::test]
async fn test_returned_response_keeps_status_and_gains_declared_headers() {
    let handler = get("/", |_kw: Kwargs| async {
        Ok(Response::text("made").with_status(203).header("x-own", "kept"))
    })
    .status_code(200)
    .response_header("x-own", "overridden")
    .response_header("x-extra", "added")
    .response_cookie(Cookie::new("session", "abc").httponly(true));
    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());

    let response = client.get("/").send().await.unwrap();
    assert_eq!(response.status(), 203);
    assert_eq!(response.text(), "made");
    assert_eq!(response.header("x-own"), Some("kept"));
    assert_eq!(response.header("x-extra"), Some("added"));
    assert!(response.header("set-cookie").unwrap().starts_with("session=abc"));
}

#[tokio::test]
async fn test_head_request_has_no_body() {
    let handler = get("/doc", |_kw: Kwargs| async { Ok(Response::text("content")) });
    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());

    let response = client.head("/doc").send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.bytes().is_empty());
    assert_eq!(response.header("content-length"), Some("7"));
}

#[tokio::test]
async fn test_background_task_runs_after_response() {
    let done = Arc::new(Notify::new());
    let signal = done.clone();
    let handler = post("/jobs", |_kw: Kwargs| async { Ok(json!({ "queued": true })) })
        .background(BackgroundTask::new("notify", move || {
            let signal = signal.clone();
            async move {
                signal.notify_one();
                Ok(())
            }
        }));
    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());

    let response = client.post("/jobs").send().await.unwrap();
    assert_eq!(response.status(), 201);
    tokio::time::timeout(Duration::from_secs(1), done.notified())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_defaults_to_no_content() {
    let handler = delete("/items/{id}", |_kw: Kwargs| async { Ok(()) });
    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());

    let response = client.delete("/items/3").send().await.unwrap();
    assert_eq!(response.status(), 204);
    assert!(response.bytes().is_empty());
}

#[tokio::test]
async fn test_delete_returning_response_keeps_its_body() {
    let handler = delete("/items/{id}", |_kw: Kwargs| async { Ok(Response::text("gone")) });
    let client = TestClient::new(App::new(vec![handler.into()]).unwrap());

    let response = client.delete("/items/3").send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "gone");
}
