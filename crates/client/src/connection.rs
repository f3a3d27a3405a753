use std::time::Duration;

use domain::{ClientMessage, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 客户端连接配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 例如 `ws://127.0.0.1:8080/api/v1/ws`
    pub endpoint: String,
    pub token: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
        }
    }

    fn url(&self) -> String {
        format!("{}?token={}", self.endpoint, self.token)
    }
}

/// 连接任务向调用方报告的信号
#[derive(Debug, Clone, PartialEq)]
pub enum ClientSignal {
    Event(ServerEvent),
    /// 断线后重新连上；离线期间的事件不会补发，调用方应全量刷新
    Reconnected { attempt: u32 },
    /// 重连时握手被拒绝，需要新的凭证
    Unauthorized,
    /// 重连次数用尽
    GaveUp { attempts: u32 },
}

/// 带自动重连的实时客户端
pub struct SyncClient {
    outgoing: mpsc::Sender<ClientMessage>,
    signals: mpsc::Receiver<ClientSignal>,
    handle: JoinHandle<()>,
}

impl SyncClient {
    /// 建立首次连接；首次连接失败直接返回错误，不进入重连流程
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let (ws, _) = connect_async(config.url()).await?;
        tracing::info!(endpoint = %config.endpoint, "sync client connected");

        let (outgoing, outgoing_rx) = mpsc::channel(64);
        let (signal_tx, signals) = mpsc::channel(256);
        let handle = tokio::spawn(run(config, ws, outgoing_rx, signal_tx));

        Ok(Self {
            outgoing,
            signals,
            handle,
        })
    }

    pub async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.outgoing
            .send(message)
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// 下一个信号；连接任务结束后返回 `None`
    pub async fn next_signal(&mut self) -> Option<ClientSignal> {
        self.signals.recv().await
    }

    pub fn close(self) {
        self.handle.abort();
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

enum SessionEnd {
    /// 服务端断开或网络错误
    Lost,
    /// 调用方已不再需要连接
    Finished,
}

async fn run(
    config: ClientConfig,
    mut ws: WsStream,
    mut outgoing: mpsc::Receiver<ClientMessage>,
    signals: mpsc::Sender<ClientSignal>,
) {
    loop {
        match session(&mut ws, &mut outgoing, &signals).await {
            SessionEnd::Finished => break,
            SessionEnd::Lost => {
                tracing::warn!(endpoint = %config.endpoint, "sync client connection lost");
            }
        }

        let mut reconnected = None;
        for attempt in 1..=config.max_reconnect_attempts {
            tokio::time::sleep(config.reconnect_delay).await;
            match connect_async(config.url()).await.map_err(ClientError::from) {
                Ok((stream, _)) => {
                    reconnected = Some((stream, attempt));
                    break;
                }
                Err(ClientError::Unauthorized) => {
                    tracing::warn!("reconnect rejected, credential no longer valid");
                    let _ = signals.send(ClientSignal::Unauthorized).await;
                    return;
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "reconnect attempt failed");
                }
            }
        }

        let Some((stream, attempt)) = reconnected else {
            tracing::error!(attempts = config.max_reconnect_attempts, "giving up on reconnect");
            let _ = signals
                .send(ClientSignal::GaveUp {
                    attempts: config.max_reconnect_attempts,
                })
                .await;
            return;
        };

        tracing::info!(attempt, "sync client reconnected");
        ws = stream;
        if signals.send(ClientSignal::Reconnected { attempt }).await.is_err() {
            break;
        }
    }
    let _ = ws.close(None).await;
}

async fn session(
    ws: &mut WsStream,
    outgoing: &mut mpsc::Receiver<ClientMessage>,
    signals: &mpsc::Sender<ClientSignal>,
) -> SessionEnd {
    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => match ServerEvent::from_json(text.as_str()) {
                    Ok(event) => {
                        if signals.send(ClientSignal::Event(event)).await.is_err() {
                            return SessionEnd::Finished;
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "undecodable server event"),
                },
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "websocket read failed");
                    return SessionEnd::Lost;
                }
            },
            message = outgoing.recv() => {
                let Some(message) = message else {
                    return SessionEnd::Finished;
                };
                let payload = match message.to_json() {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to encode control message");
                        continue;
                    }
                };
                if ws.send(Message::Text(payload.into())).await.is_err() {
                    return SessionEnd::Lost;
                }
            }
        }
    }
}
