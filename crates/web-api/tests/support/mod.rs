#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::MemoryStore;
use config::{JwtConfig, MessagingConfig};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtService, Repositories};

pub type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub jwt: Arc<JwtService>,
    pub store: MemoryStore,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(MessagingConfig {
            welcome_message: None,
            max_message_length: 2000,
        })
        .await
    }

    pub async fn start_with(messaging: MessagingConfig) -> Self {
        let store = MemoryStore::new();
        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "integration-test-secret-with-32-plus-chars".to_string(),
            issuer: None,
            expiration_hours: 1,
        }));
        let state = AppState::new(
            Repositories {
                conversations: Arc::new(store.clone()),
                messages: Arc::new(store.clone()),
                users: Arc::new(store.clone()),
            },
            jwt.clone(),
            &messaging,
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            client: Client::new(),
            jwt,
            store,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn token(&self, user_id: &str) -> String {
        self.jwt
            .generate_token(user_id, None, Some(user_id))
            .expect("token")
    }

    /// 通过 `/auth/sync-user` 注册用户并返回其 token
    pub async fn sync_user(&self, user_id: &str) -> String {
        let token = self.token(user_id);
        let response = self
            .client
            .post(self.url("/auth/sync-user"))
            .bearer_auth(&token)
            .send()
            .await
            .expect("sync user");
        assert!(response.status().is_success());
        token
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("get")
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("post")
    }

    pub async fn socket(&self, token: &str) -> Socket {
        let url = format!("ws://{}/socket?token={}", self.addr, token);
        let (socket, _) = connect_async(url).await.expect("connect socket");
        socket
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn emit(socket: &mut Socket, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    socket
        .send(TungsteniteMessage::Text(frame.into()))
        .await
        .expect("send frame");
}

/// 读取下一个 JSON 事件，超时返回 None
pub async fn next_event(socket: &mut Socket) -> Option<Value> {
    loop {
        let frame = timeout(Duration::from_secs(2), socket.next()).await.ok()??;
        match frame.ok()? {
            TungsteniteMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).ok();
            }
            TungsteniteMessage::Close(_) => return None,
            _ => continue,
        }
    }
}

/// 加入房间后用一次无效发送做同步点，确保 join 已被服务端处理
pub async fn join(socket: &mut Socket, conversation_id: &str) {
    emit(socket, "joinConversation", json!(conversation_id)).await;
    emit(
        socket,
        "sendMessage",
        json!({ "senderId": "", "receiverId": "", "text": "" }),
    )
    .await;
    let event = next_event(socket).await.expect("sync event");
    assert_eq!(event["event"], "messageError");
}
