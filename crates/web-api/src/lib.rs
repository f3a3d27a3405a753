//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 握手时通过 Identity Gate 认证，
//! 之后每个连接由一个独立任务驱动，事件来自应用层的分发器。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{bearer_token, AuthError, Claims, IdentityGate, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
