//! 实时事件定义
//!
//! 服务器事件、客户端控制消息以及投递用的信封。

pub mod client_message;
pub mod envelope;
pub mod server_event;

pub use client_message::ClientMessage;
pub use envelope::{Audience, EventEnvelope};
pub use server_event::ServerEvent;
