use std::sync::Arc;
use std::time::Duration;

use crate::error::ApiError;
use crate::state::AppState;
use application::{outbound_queue, ApplicationError, Clock, OutboundReceiver};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConnectionId, ServerEvent, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// WebSocket 连接
///
/// 封装单个已认证连接的全部逻辑：
/// - 在注册表中登记/注销
/// - 把出站队列里的事件写到 socket
/// - 处理客户端控制消息并刷新最近活动时间
/// - 定时发送 Ping 心跳
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    user_id: UserId,
    connection_id: ConnectionId,
    outbound: OutboundReceiver,
}

impl WebSocketConnection {
    /// 登记新连接；只有身份校验通过后才会走到这里
    pub async fn new(socket: WebSocket, state: AppState, user_id: UserId) -> Result<Self, ApiError> {
        let connection_id = ConnectionId::random();
        let (sender, outbound) = outbound_queue(state.realtime.outbound_queue_capacity);

        // 握手确认在登记之前入队，保证它是连接收到的第一个事件
        let ack = ServerEvent::UserConnected {
            user_id,
            connected_at: state.registry.clock().now(),
        };
        if sender.try_send(Arc::new(ack)).is_err() {
            tracing::warn!(user_id = %user_id, "failed to queue connection acknowledgment");
        }

        state
            .registry
            .register(user_id, connection_id, sender)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, user_id = %user_id, "Failed to register connection");
                ApiError::from(err)
            })?;

        tracing::info!(user_id = %user_id, connection_id = %connection_id, "WebSocket 连接已建立");

        Ok(Self {
            socket,
            state,
            user_id,
            connection_id,
            outbound,
        })
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// 运行连接主循环，直到任意一端结束，然后注销连接
    pub async fn run(self) {
        let Self {
            socket,
            state,
            user_id,
            connection_id,
            mut outbound,
        } = self;
        let (mut sender, mut incoming) = socket.split();
        let heartbeat = heartbeat_or_default(state.realtime.heartbeat_interval());

        // 创建 mpsc channel 来解耦对 sender 的访问
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let mut send_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    Some(cmd) = cmd_rx.recv() => {
                        let frame = match cmd {
                            WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                        };
                        if sender.send(frame).await.is_err() {
                            tracing::warn!("Failed to send pong message");
                            break;
                        }
                    }
                    event = outbound.recv() => {
                        let Some(event) = event else {
                            // 注册表已经丢弃了这个连接（存活检查驱逐或服务关闭）
                            let _ = sender.send(WsMessage::Close(None)).await;
                            break;
                        };
                        let payload = match event.to_json() {
                            Ok(json) => json,
                            Err(err) => {
                                tracing::warn!(error = %err, event = event.name(), "failed to serialize websocket payload");
                                continue;
                            }
                        };
                        if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                            tracing::warn!("Failed to send text message");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                            tracing::warn!("Failed to send heartbeat ping");
                            break;
                        }
                    }
                }
            }
            tracing::debug!("WebSocket发送任务结束");
        });

        // 接收任务：处理来自WebSocket客户端的消息
        let mut recv_task = {
            let state = state.clone();
            tokio::spawn(async move {
                while let Some(Ok(message)) = incoming.next().await {
                    // 任何入站帧都算一次活动
                    if let Err(ApplicationError::ConnectionNotFound(_)) =
                        state.registry.touch(connection_id).await
                    {
                        tracing::info!(connection_id = %connection_id, "connection no longer registered");
                        break;
                    }
                    if Self::handle_incoming(&state, connection_id, user_id, message, &cmd_tx)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                tracing::debug!("WebSocket接收任务结束");
            })
        };

        // 等待任意一个任务完成（连接断开）
        tokio::select! {
            _ = &mut send_task => {
                recv_task.abort();
                tracing::debug!("WebSocket发送任务完成");
            }
            _ = &mut recv_task => {
                send_task.abort();
                tracing::debug!("WebSocket接收任务完成");
            }
        }

        // 连接断开时注销，重复注销是无害的
        match state.registry.unregister(connection_id).await {
            Some(departure) => tracing::info!(
                user_id = %user_id,
                connection_id = %connection_id,
                went_offline = departure.went_offline,
                "WebSocket连接已断开"
            ),
            None => tracing::info!(
                user_id = %user_id,
                connection_id = %connection_id,
                "WebSocket连接已断开（已被驱逐）"
            ),
        }
    }

    /// 处理来自客户端的消息
    async fn handle_incoming(
        state: &AppState,
        connection_id: ConnectionId,
        user_id: UserId,
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        match message {
            WsMessage::Close(_) => {
                tracing::debug!("WebSocket收到关闭消息");
                return Err(());
            }
            WsMessage::Ping(data) => {
                if cmd_tx
                    .send(WsCommand::SendPong(data.to_vec()))
                    .await
                    .is_err()
                {
                    tracing::warn!("Failed to send pong command");
                    return Err(());
                }
            }
            WsMessage::Pong(_) => {
                tracing::trace!("收到pong消息");
            }
            WsMessage::Text(text) => {
                state
                    .control
                    .handle_text(connection_id, user_id, text.as_str())
                    .await;
            }
            WsMessage::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => state.control.handle_text(connection_id, user_id, text).await,
                Err(_) => tracing::debug!(connection_id = %connection_id, "ignored non-utf8 binary frame"),
            },
        }
        Ok(())
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}

/// `interval` 不接受零间隔
fn heartbeat_or_default(interval: Duration) -> Duration {
    if interval.is_zero() {
        Duration::from_secs(30)
    } else {
        interval
    }
}
