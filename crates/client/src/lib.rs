//! 客户端同步层
//!
//! - [`TaskReconciler`]：每个任务一份的对账状态机（乐观更新、确认/回滚、对端事件缓冲与重放）
//! - [`SyncClient`]：带自动重连的 WebSocket 客户端，重连成功后通知调用方做全量刷新

mod connection;
mod error;
mod reconciler;

pub use connection::{ClientConfig, ClientSignal, SyncClient};
pub use error::{ClientError, ReconcileError};
pub use reconciler::{
    Confirmation, ReconciliationConflict, RemoteOutcome, Rollback, SyncState, TaskReconciler,
};
