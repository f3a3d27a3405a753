//! 服务器推送给客户端的实时事件
//!
//! 每个事件在线路上是一个 JSON 对象 `{"type": ..., "payload": ...}`，
//! 事件名和载荷形状都由这个枚举统一约束。

use serde::{Deserialize, Serialize};

use crate::entities::Task;
use crate::value_objects::{TaskId, Timestamp, UserId};

/// 服务器 → 客户端事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "task:created")]
    TaskCreated(Task),

    #[serde(rename = "task:updated")]
    TaskUpdated(Task),

    #[serde(rename = "task:deleted", rename_all = "camelCase")]
    TaskDeleted { task_id: TaskId },

    #[serde(rename = "task:shared")]
    TaskShared(Task),

    #[serde(rename = "task:unshared", rename_all = "camelCase")]
    TaskUnshared { task_id: TaskId },

    #[serde(rename = "task:comment_added")]
    TaskCommentAdded(Task),

    /// 握手成功后只发给新连接
    #[serde(rename = "user:connected", rename_all = "camelCase")]
    UserConnected { user_id: UserId, connected_at: Timestamp },

    #[serde(rename = "user:online", rename_all = "camelCase")]
    UserOnline { user_id: UserId },

    #[serde(rename = "user:offline", rename_all = "camelCase")]
    UserOffline { user_id: UserId },

    /// 在线状态标签变化（建议性事件）
    #[serde(rename = "user:status_changed", rename_all = "camelCase")]
    UserStatusChanged { user_id: UserId, status: String },

    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStarted { task_id: TaskId, user_id: UserId },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStopped { task_id: TaskId, user_id: UserId },

    #[serde(rename = "room:joined", rename_all = "camelCase")]
    RoomJoined { room_id: TaskId },

    #[serde(rename = "room:left", rename_all = "camelCase")]
    RoomLeft { room_id: TaskId },

    #[serde(rename = "room:user_joined", rename_all = "camelCase")]
    RoomUserJoined { room_id: TaskId, user_id: UserId },

    #[serde(rename = "room:user_left", rename_all = "camelCase")]
    RoomUserLeft { room_id: TaskId, user_id: UserId },

    #[serde(rename = "message:private", rename_all = "camelCase")]
    PrivateMessage {
        from_user_id: UserId,
        message: String,
        timestamp: Timestamp,
    },

    /// 应用层心跳应答
    #[serde(rename = "pong")]
    Pong,

    /// 只发给出错的那个连接
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    /// 线路上的事件名
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::TaskCreated(_) => "task:created",
            ServerEvent::TaskUpdated(_) => "task:updated",
            ServerEvent::TaskDeleted { .. } => "task:deleted",
            ServerEvent::TaskShared(_) => "task:shared",
            ServerEvent::TaskUnshared { .. } => "task:unshared",
            ServerEvent::TaskCommentAdded(_) => "task:comment_added",
            ServerEvent::UserConnected { .. } => "user:connected",
            ServerEvent::UserOnline { .. } => "user:online",
            ServerEvent::UserOffline { .. } => "user:offline",
            ServerEvent::UserStatusChanged { .. } => "user:status_changed",
            ServerEvent::TypingStarted { .. } => "typing:start",
            ServerEvent::TypingStopped { .. } => "typing:stop",
            ServerEvent::RoomJoined { .. } => "room:joined",
            ServerEvent::RoomLeft { .. } => "room:left",
            ServerEvent::RoomUserJoined { .. } => "room:user_joined",
            ServerEvent::RoomUserLeft { .. } => "room:user_left",
            ServerEvent::PrivateMessage { .. } => "message:private",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// 事件涉及的任务（如果有）
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            ServerEvent::TaskCreated(task)
            | ServerEvent::TaskUpdated(task)
            | ServerEvent::TaskShared(task)
            | ServerEvent::TaskCommentAdded(task) => Some(task.id),
            ServerEvent::TaskDeleted { task_id } | ServerEvent::TaskUnshared { task_id } => {
                Some(*task_id)
            }
            ServerEvent::TypingStarted { task_id, .. } | ServerEvent::TypingStopped { task_id, .. } => {
                Some(*task_id)
            }
            _ => None,
        }
    }

    /// 携带完整任务表示的事件返回该任务
    pub fn task(&self) -> Option<&Task> {
        match self {
            ServerEvent::TaskCreated(task)
            | ServerEvent::TaskUpdated(task)
            | ServerEvent::TaskShared(task)
            | ServerEvent::TaskCommentAdded(task) => Some(task),
            _ => None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
