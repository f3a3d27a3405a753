#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{EventDispatcher, MembershipRegistry, RoomRouter, SystemClock};
use config::{AppConfig, RealtimeConfig};
use domain::{ServerEvent, UserAccount, UserId};
use futures_util::{SinkExt, StreamExt};
use infrastructure::{InMemoryTaskRepository, InMemoryUserDirectory};
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use web_api::{router, AppState, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 在临时端口上运行的完整服务，任务仓储同时充当持久化存储替身
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<MembershipRegistry>,
    pub dispatcher: Arc<EventDispatcher>,
    pub users: Arc<InMemoryUserDirectory>,
    pub tasks: Arc<InMemoryTaskRepository>,
    pub jwt: Arc<JwtService>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(RealtimeConfig::default()).await
    }

    pub async fn start_with(realtime: RealtimeConfig) -> Self {
        let config = AppConfig::development();
        let clock = Arc::new(SystemClock);
        let registry = Arc::new(MembershipRegistry::new(clock.clone(), realtime.presence_channel_capacity));
        let dispatcher = Arc::new(EventDispatcher::new(
            RoomRouter::new(Arc::clone(&registry)),
            clock,
            realtime.suppress_origin_echo,
        ));
        let users = Arc::new(InMemoryUserDirectory::new());
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let jwt = Arc::new(JwtService::new(config.jwt));

        let state = AppState::new(
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            Arc::clone(&jwt),
            users.clone(),
            tasks.clone(),
            realtime,
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
            registry,
            dispatcher,
            users,
            tasks,
            jwt,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// 新建一个激活用户并签发 token
    pub async fn user(&self, name: &str) -> (UserId, String) {
        let user_id = UserId::random();
        self.users.insert(UserAccount::active(user_id, name)).await;
        let token = self.jwt.generate_token(user_id).expect("token");
        (user_id, token)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/api/v1/ws?token={}", self.addr, token)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 建立连接，读掉握手确认，并等待服务端完成登记
    pub async fn connect(&self, user_id: UserId, token: &str) -> WsClient {
        let before = self.registry.connections_for(user_id).await.len();
        let (mut ws, _) = connect_async(self.ws_url(token)).await.expect("ws connect");
        match next_event(&mut ws).await {
            ServerEvent::UserConnected { user_id: acked, .. } => assert_eq!(acked, user_id),
            other => panic!("expected user:connected first, got {other:?}"),
        }
        self.wait_for_connections(user_id, before + 1).await;
        ws
    }

    pub async fn wait_for_connections(&self, user_id: UserId, expected: usize) {
        for _ in 0..100 {
            if self.registry.connections_for(user_id).await.len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("user {user_id} never reached {expected} connections");
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.registry.shutdown().await;
    }
}

/// 读取下一个事件，跳过心跳帧
pub async fn next_event(ws: &mut WsClient) -> ServerEvent {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("event in time")
            .expect("stream open")
            .expect("frame");
        match frame {
            Message::Text(text) => return ServerEvent::from_json(text.as_str()).expect("server event"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// 在给定时间内没有收到任何事件
pub async fn expect_silence(ws: &mut WsClient, millis: u64) {
    loop {
        match timeout(Duration::from_millis(millis), ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(other) => panic!("expected silence, got {other:?}"),
        }
    }
}

/// 读取事件直到满足条件（中间的在线通知等会被跳过）
pub async fn next_matching<F>(ws: &mut WsClient, mut predicate: F) -> ServerEvent
where
    F: FnMut(&ServerEvent) -> bool,
{
    loop {
        let event = next_event(ws).await;
        if predicate(&event) {
            return event;
        }
    }
}

pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send control message");
}
