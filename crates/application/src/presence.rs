//! 上线/下线通知
//!
//! 订阅注册表的在线状态变化，把它们转换成 `user:online` / `user:offline`
//! 事件推送给其他在线用户。

use std::sync::Arc;

use domain::ServerEvent;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::registry::{MembershipRegistry, PresenceChange};
use crate::router::RoomRouter;

pub struct PresenceAnnouncer {
    router: RoomRouter,
    changes: broadcast::Receiver<PresenceChange>,
}

impl PresenceAnnouncer {
    pub fn new(registry: &Arc<MembershipRegistry>, router: RoomRouter) -> Self {
        Self {
            changes: registry.subscribe_presence(),
            router,
        }
    }

    /// 处理一条变化，返回送达的连接数
    pub async fn announce(&self, change: PresenceChange) -> usize {
        let (user_id, event) = match change {
            PresenceChange::Online(user_id) => (user_id, ServerEvent::UserOnline { user_id }),
            PresenceChange::Offline(user_id) => (user_id, ServerEvent::UserOffline { user_id }),
        };
        self.router.broadcast_except(user_id, event).await.delivered
    }

    /// 在后台运行，直到注册表关闭或收到停止信号
    pub fn spawn(mut self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    received = self.changes.recv() => match received {
                        Ok(change) => {
                            self.announce(change).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "presence announcer lagged, some presence changes were not announced");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("presence announcer stopped");
        })
    }
}
