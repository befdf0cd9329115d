//! End-to-end tests running a real gateway against an in-process mock
//! backend, with tokio-tungstenite as the WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::post;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use wsgw_gateway::{GatewayConfig, GatewayResult, Server};

const DEADLINE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct BackendState {
    /// (connection id, authorization header) per connecting call.
    connecting: Mutex<Vec<(String, Option<String>)>>,
    /// Connection id per disconnected call.
    disconnected: Mutex<Vec<String>>,
    /// (connection id, body) per message-received call.
    messages: Mutex<Vec<(String, String)>>,
    /// Status returned from the connecting endpoint.
    admit_status: AtomicU16,
}

struct MockBackend {
    url: String,
    state: Arc<BackendState>,
}

impl MockBackend {
    async fn spawn() -> Self {
        let state = Arc::new(BackendState {
            admit_status: AtomicU16::new(200),
            ..Default::default()
        });

        let app = Router::new()
            .route("/ws/connecting", post(connecting))
            .route("/ws/disconnected", post(disconnected))
            .route("/ws/message-received", post(message_received))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    fn admit_with(&self, status: StatusCode) {
        self.state
            .admit_status
            .store(status.as_u16(), Ordering::Relaxed);
    }

    /// Poll until `predicate` holds, panicking after the deadline.
    async fn wait_until(&self, predicate: impl Fn(&BackendState) -> bool) {
        timeout(DEADLINE, async {
            while !predicate(&self.state) {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("backend never observed the expected call");
    }

    /// Wait for the next connecting call and return its connection id.
    async fn wait_for_connection(&self) -> String {
        self.wait_until(|s| !s.connecting.lock().unwrap().is_empty())
            .await;
        let calls = self.state.connecting.lock().unwrap();
        calls.last().unwrap().0.clone()
    }

    fn disconnect_count(&self, id: &str) -> usize {
        self.state
            .disconnected
            .lock()
            .unwrap()
            .iter()
            .filter(|d| *d == id)
            .count()
    }
}

fn connection_id(headers: &HeaderMap) -> String {
    headers
        .get("x-wsgw-connection-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn connecting(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> StatusCode {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state
        .connecting
        .lock()
        .unwrap()
        .push((connection_id(&headers), auth));
    StatusCode::from_u16(state.admit_status.load(Ordering::Relaxed)).unwrap()
}

async fn disconnected(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> StatusCode {
    state
        .disconnected
        .lock()
        .unwrap()
        .push(connection_id(&headers));
    StatusCode::OK
}

async fn message_received(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    state
        .messages
        .lock()
        .unwrap()
        .push((connection_id(&headers), body));
    StatusCode::OK
}

struct GatewayHandle {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<GatewayResult<()>>,
}

async fn spawn_gateway(backend_url: &str) -> GatewayHandle {
    let config = GatewayConfig {
        host: "127.0.0.1".into(),
        port: 0,
        app_base_url: backend_url.to_string(),
    };
    let server = Server::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (shutdown, rx) = oneshot::channel();
    let task = tokio::spawn(server.serve(async move {
        let _ = rx.await;
    }));

    GatewayHandle {
        addr,
        shutdown,
        task,
    }
}

#[tokio::test]
async fn test_client_messages_reach_backend_and_disconnect_reported_once() {
    let backend = MockBackend::spawn().await;
    let gateway = spawn_gateway(&backend.url).await;

    let mut request = format!("ws://{}/connect", gateway.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer secret".parse().unwrap());
    let (mut ws, _response) = connect_async(request).await.unwrap();

    let id = backend.wait_for_connection().await;
    assert!(id.len() > 19, "connection id should be UUID-sized: {id}");
    {
        let calls = backend.state.connecting.lock().unwrap();
        let (_, auth) = calls.last().unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer secret"));
    }

    ws.send(WsMessage::Text("hello backend".into()))
        .await
        .unwrap();
    ws.send(WsMessage::Text("second".into())).await.unwrap();
    backend
        .wait_until(|s| {
            let messages = s.messages.lock().unwrap();
            messages
                .iter()
                .filter(|(mid, _)| mid == &id)
                .map(|(_, body)| body.as_str())
                .eq(["hello backend", "second"])
        })
        .await;

    ws.close(None).await.unwrap();
    backend.wait_until(|s| {
        !s.disconnected.lock().unwrap().is_empty()
    })
    .await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.disconnect_count(&id), 1);
}

#[tokio::test]
async fn test_backend_rejection_blocks_the_upgrade() {
    let backend = MockBackend::spawn().await;
    let gateway = spawn_gateway(&backend.url).await;

    backend.admit_with(StatusCode::UNAUTHORIZED);
    let request = format!("ws://{}/connect", gateway.addr)
        .into_client_request()
        .unwrap();
    match connect_async(request).await.unwrap_err() {
        WsError::Http(response) => assert_eq!(response.status(), StatusCode::UNAUTHORIZED),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    backend.admit_with(StatusCode::SERVICE_UNAVAILABLE);
    let request = format!("ws://{}/connect", gateway.addr)
        .into_client_request()
        .unwrap();
    match connect_async(request).await.unwrap_err() {
        WsError::Http(response) => {
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR)
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    // No session was created, so nothing should ever be reported as
    // disconnected.
    sleep(Duration::from_millis(100)).await;
    assert!(backend.state.disconnected.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_push_is_delivered_to_the_addressed_client() {
    let backend = MockBackend::spawn().await;
    let gateway = spawn_gateway(&backend.url).await;

    let request = format!("ws://{}/connect", gateway.addr)
        .into_client_request()
        .unwrap();
    let (mut ws, _response) = connect_async(request).await.unwrap();
    let id = backend.wait_for_connection().await;

    let client = reqwest::Client::new();
    let status = client
        .post(format!("http://{}/message/{id}", gateway.addr))
        .body("\"ping\"")
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::OK);

    let frame = timeout(DEADLINE, ws.next())
        .await
        .expect("no push arrived")
        .unwrap()
        .unwrap();
    assert_eq!(frame, WsMessage::Text("ping".into()));
}

#[tokio::test]
async fn test_push_to_unknown_connection_is_not_found() {
    let backend = MockBackend::spawn().await;
    let gateway = spawn_gateway(&backend.url).await;

    let client = reqwest::Client::new();
    let status = client
        .post(format!("http://{}/message/no-such-connection", gateway.addr))
        .body("\"ping\"")
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_push_body_must_be_a_json_string() {
    let backend = MockBackend::spawn().await;
    let gateway = spawn_gateway(&backend.url).await;

    let request = format!("ws://{}/connect", gateway.addr)
        .into_client_request()
        .unwrap();
    let (_ws, _response) = connect_async(request).await.unwrap();
    let id = backend.wait_for_connection().await;

    let client = reqwest::Client::new();
    for body in [r#"{"text": "ping"}"#, "42", "not json at all", ""] {
        let status = client
            .post(format!("http://{}/message/{id}", gateway.addr))
            .body(body)
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body:?}");
    }
}

#[tokio::test]
async fn test_shutdown_closes_live_connections_and_drains() {
    let backend = MockBackend::spawn().await;
    let gateway = spawn_gateway(&backend.url).await;

    let request = format!("ws://{}/connect", gateway.addr)
        .into_client_request()
        .unwrap();
    let (mut ws, _response) = connect_async(request).await.unwrap();
    let id = backend.wait_for_connection().await;

    gateway.shutdown.send(()).unwrap();

    // The session observes cancellation and closes the transport.
    let saw_close = timeout(DEADLINE, async {
        while let Some(frame) = ws.next().await {
            if matches!(frame, Ok(WsMessage::Close(_)) | Err(_)) {
                return true;
            }
        }
        true
    })
    .await
    .expect("socket never closed");
    assert!(saw_close);

    gateway.task.await.unwrap().unwrap();
    backend
        .wait_until(|s| s.disconnected.lock().unwrap().contains(&id))
        .await;
}

#[tokio::test]
async fn test_health_endpoint() {
    let backend = MockBackend::spawn().await;
    let gateway = spawn_gateway(&backend.url).await;

    let response = reqwest::get(format!("http://{}/health", gateway.addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "wsgw");
    assert_eq!(body["connections"], 0);
}
