use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{ChatService, ChatServiceDependencies, InMemoryEventBus, RelayHub, RelaySettings};
use domain::InstanceId;
use infrastructure::InMemoryMessageStore;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use web_api::{router, AppState, JwtConfig, JwtService};

pub const TEST_SECRET: &str = "test-secret-key-with-at-least-32-characters";

pub struct TestServer {
    pub addr: SocketAddr,
    pub relay: Arc<RelayHub>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/api/v1/ws?token={}", self.addr, token)
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        // 仍打开的 WebSocket 会阻止优雅关闭
        let _ = tokio::time::timeout(Duration::from_secs(1), &mut self.handle).await;
        self.handle.abort();
    }
}

pub fn build_state(allow_dev_tokens: bool) -> AppState {
    let relay = Arc::new(RelayHub::new(
        RelaySettings::new(InstanceId::parse("test-node").unwrap()),
        Arc::new(InMemoryEventBus::standalone()),
    ));
    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        store: Arc::new(InMemoryMessageStore::default()),
        router: relay.router().clone(),
    }));
    let jwt_service = Arc::new(JwtService::new(JwtConfig {
        secret: TEST_SECRET.to_string(),
        expiration_hours: 1,
        allow_dev_tokens,
    }));
    AppState::new(relay, chat_service, jwt_service, Duration::from_secs(30))
}

pub async fn spawn_server(allow_dev_tokens: bool) -> TestServer {
    let state = build_state(allow_dev_tokens);
    let relay = state.relay.clone();
    relay.start().await.unwrap();
    let app = router(state, &["*".to_string()]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    TestServer {
        addr,
        relay,
        shutdown: Some(shutdown_tx),
        handle,
    }
}

pub async fn dev_token(server: &TestServer, user_id: i64, name: &str, role: &str) -> String {
    let response = reqwest::Client::new()
        .post(server.http("/api/v1/auth/token"))
        .json(&serde_json::json!({
            "user_id": user_id,
            "display_name": name,
            "role": role,
        }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

/// 以指定用户身份打开 WebSocket 的地址
pub async fn ws_url_for(server: &TestServer, user_id: i64, name: &str) -> String {
    let token = dev_token(server, user_id, name, "member").await;
    server.ws_url(&token)
}
