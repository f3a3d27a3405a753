//! 客户端控制消息处理
//!
//! 房间加入/离开、输入提示、在线状态标签、私信和应用层心跳。这些消息都是建议性的，
//! 处理失败只会给发送方回一个 `error` 事件。

use std::sync::Arc;

use domain::{
    Audience, ClientMessage, ConnectionId, DomainError, Permission, ServerEvent, TaskId, TaskRepository, UserId,
};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::router::RoomRouter;

#[derive(Clone)]
pub struct ControlHandler {
    router: RoomRouter,
    tasks: Arc<dyn TaskRepository>,
}

impl ControlHandler {
    pub fn new(router: RoomRouter, tasks: Arc<dyn TaskRepository>) -> Self {
        Self { router, tasks }
    }

    /// 处理一条原始文本帧
    pub async fn handle_text(&self, connection_id: ConnectionId, user_id: UserId, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle(connection_id, user_id, message).await,
            Err(err) => {
                tracing::debug!(connection_id = %connection_id, error = %err, "malformed control message");
                self.reply(connection_id, ServerEvent::error(format!("invalid message: {}", err)))
                    .await;
            }
        }
    }

    pub async fn handle(&self, connection_id: ConnectionId, user_id: UserId, message: ClientMessage) {
        let result = match message {
            ClientMessage::RoomJoin { room_id } => self.join(connection_id, user_id, room_id).await,
            ClientMessage::RoomLeave { room_id } => self.leave(connection_id, user_id, room_id).await,
            ClientMessage::TypingStart { task_id } => {
                self.typing(connection_id, task_id, ServerEvent::TypingStarted { task_id, user_id })
                    .await
            }
            ClientMessage::TypingStop { task_id } => {
                self.typing(connection_id, task_id, ServerEvent::TypingStopped { task_id, user_id })
                    .await
            }
            ClientMessage::UserStatus { status } => self.status(user_id, status).await,
            ClientMessage::PrivateMessage { to_user_id, message } => {
                self.private_message(user_id, to_user_id, message).await
            }
            ClientMessage::Ping => {
                self.reply(connection_id, ServerEvent::Pong).await;
                Ok(())
            }
        };

        if let Err(err) = result {
            tracing::warn!(connection_id = %connection_id, user_id = %user_id, error = %err, "control message rejected");
            self.reply(connection_id, ServerEvent::error(err.to_string())).await;
        }
    }

    async fn join(&self, connection_id: ConnectionId, user_id: UserId, room: TaskId) -> Result<(), ApplicationError> {
        let access = self
            .tasks
            .access_list(room)
            .await?
            .ok_or_else(|| DomainError::resource_not_found("task", room.to_string()))?;
        if !access.allows(user_id, Permission::Read) {
            return Err(DomainError::permission_denied(format!("join room of task {}", room)).into());
        }

        let newly_joined = self.router.registry().join_room(connection_id, room).await?;
        self.reply(connection_id, ServerEvent::RoomJoined { room_id: room }).await;
        if newly_joined {
            self.router
                .deliver_to_room(room, ServerEvent::RoomUserJoined { room_id: room, user_id }, Some(connection_id))
                .await;
            tracing::debug!(connection_id = %connection_id, task_id = %room, "joined task room");
        }
        Ok(())
    }

    async fn leave(&self, connection_id: ConnectionId, user_id: UserId, room: TaskId) -> Result<(), ApplicationError> {
        let was_member = self.router.registry().leave_room(connection_id, room).await?;
        self.reply(connection_id, ServerEvent::RoomLeft { room_id: room }).await;
        if was_member {
            self.router
                .deliver_to_room(room, ServerEvent::RoomUserLeft { room_id: room, user_id }, None)
                .await;
        }
        Ok(())
    }

    /// 输入提示只转发给同一房间的其他连接
    async fn typing(&self, connection_id: ConnectionId, room: TaskId, event: ServerEvent) -> Result<(), ApplicationError> {
        if !self.router.registry().is_in_room(connection_id, room).await {
            tracing::debug!(connection_id = %connection_id, task_id = %room, "typing indicator outside of room ignored");
            return Ok(());
        }
        self.router.deliver_to_room(room, event, Some(connection_id)).await;
        Ok(())
    }

    async fn status(&self, user_id: UserId, status: String) -> Result<(), ApplicationError> {
        if !self.router.registry().set_status(user_id, status.clone()).await {
            return Err(ApplicationError::UserNotConnected(user_id));
        }
        self.router
            .broadcast_except(user_id, ServerEvent::UserStatusChanged { user_id, status })
            .await;
        Ok(())
    }

    /// 私信投递到接收方的全部在线连接；接收方不在线时告知发送方
    async fn private_message(&self, from: UserId, to: UserId, message: String) -> Result<(), ApplicationError> {
        let event = ServerEvent::PrivateMessage {
            from_user_id: from,
            message,
            timestamp: self.router.registry().clock().now(),
        };
        let report = self
            .router
            .deliver(&Audience::of(to, []), Arc::new(event), None)
            .await;
        if report.offline_users > 0 {
            return Err(ApplicationError::UserNotConnected(to));
        }
        tracing::debug!(from = %from, to = %to, delivered = report.delivered, "private message routed");
        Ok(())
    }

    async fn reply(&self, connection_id: ConnectionId, event: ServerEvent) {
        if !self.router.send_to_connection(connection_id, event).await {
            tracing::debug!(connection_id = %connection_id, "reply dropped");
        }
    }
}
