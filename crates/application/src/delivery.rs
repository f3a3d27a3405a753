//! 单连接投递
//!
//! 每个连接有一个有界的出站队列。投递只做 `try_send`：队列满时丢弃新事件，
//! 连接已关闭时记录后跳过，任何一个连接的失败都不会影响其他连接。

use std::sync::Arc;

use domain::{ConnectionId, ServerEvent};
use thiserror::Error;
use tokio::sync::mpsc;

/// 出站队列的元素；同一事件在多个连接之间共享
pub type OutboundEvent = Arc<ServerEvent>;
pub type OutboundSender = mpsc::Sender<OutboundEvent>;
pub type OutboundReceiver = mpsc::Receiver<OutboundEvent>;

/// 创建一个连接的出站队列
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(capacity.max(1))
}

/// 推送到单个连接失败（内部错误，只记录日志）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    #[error("outbound queue of connection {0} is full, event dropped")]
    QueueFull(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// 一次分发的结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// 成功入队的连接数
    pub delivered: usize,
    /// 受众中没有任何在线连接的用户数
    pub offline_users: usize,
    /// 因回声抑制而跳过的连接数
    pub suppressed: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub(crate) fn record(&mut self, result: Result<(), DeliveryFailure>) {
        match result {
            Ok(()) => self.delivered += 1,
            Err(failure) => self.failures.push(failure),
        }
    }
}

/// 推送事件到一个连接的出站队列
pub fn push(
    connection_id: ConnectionId,
    sender: &OutboundSender,
    event: &OutboundEvent,
) -> Result<(), DeliveryFailure> {
    match sender.try_send(Arc::clone(event)) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(connection_id = %connection_id, event = event.name(), "outbound queue full, dropping event");
            Err(DeliveryFailure::QueueFull(connection_id))
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(connection_id = %connection_id, event = event.name(), "connection closed before delivery");
            Err(DeliveryFailure::Closed(connection_id))
        }
    }
}
