//! 客户端 → 服务器控制消息
//!
//! 这些消息都是建议性的，丢失不会影响正确性。

use serde::{Deserialize, Serialize};

use crate::value_objects::{TaskId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// 加入某个任务的协作房间
    #[serde(rename = "room:join", rename_all = "camelCase")]
    RoomJoin { room_id: TaskId },

    #[serde(rename = "room:leave", rename_all = "camelCase")]
    RoomLeave { room_id: TaskId },

    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { task_id: TaskId },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { task_id: TaskId },

    /// 更新在线状态标签（自由格式）
    #[serde(rename = "user:status")]
    UserStatus { status: String },

    /// 发给某个用户全部在线连接的私信
    #[serde(rename = "message:private", rename_all = "camelCase")]
    PrivateMessage { to_user_id: UserId, message: String },

    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_room_join() {
        let task_id = TaskId::random();
        let json = format!(r#"{{"type":"room:join","payload":{{"roomId":"{}"}}}}"#, task_id);

        assert_eq!(
            ClientMessage::from_json(&json).unwrap(),
            ClientMessage::RoomJoin { room_id: task_id }
        );
    }

    #[test]
    fn parses_bare_ping() {
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
    }

    #[test]
    fn parses_private_message() {
        let to = UserId::random();
        let json = format!(
            r#"{{"type":"message:private","payload":{{"toUserId":"{}","message":"hi"}}}}"#,
            to
        );

        assert_eq!(
            ClientMessage::from_json(&json).unwrap(),
            ClientMessage::PrivateMessage {
                to_user_id: to,
                message: "hi".to_string()
            }
        );
    }

    #[test]
    fn rejects_untyped_payload() {
        assert!(ClientMessage::from_json(r#"{"status":"away"}"#).is_err());
    }
}
