//! 房间路由
//!
//! 把逻辑受众（用户集合、任务协作房间）解析为在线连接并入队事件。
//! 受众每次都由调用方根据任务当前的授权列表重新计算，这里不保存任何房间成员关系。

use std::sync::Arc;

use domain::{Audience, ConnectionId, EventEnvelope, ServerEvent, TaskId, UserId};

use crate::delivery::{push, DeliveryReport, OutboundEvent};
use crate::registry::{ConnectionTarget, MembershipRegistry};

#[derive(Clone)]
pub struct RoomRouter {
    registry: Arc<MembershipRegistry>,
}

impl RoomRouter {
    pub fn new(registry: Arc<MembershipRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MembershipRegistry> {
        &self.registry
    }

    /// 所有者 ∪ 协作者
    pub fn audience_for(owner: UserId, collaborators: impl IntoIterator<Item = UserId>) -> Audience {
        Audience::of(owner, collaborators)
    }

    /// 投递到受众中每个用户的每个在线连接；`skip` 指定的连接不投递
    pub async fn deliver(
        &self,
        audience: &Audience,
        event: OutboundEvent,
        skip: Option<ConnectionId>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for user_id in audience.iter() {
            let targets = self.registry.targets_for_user(user_id).await;
            if targets.is_empty() {
                // 不在线的用户直接跳过，不排队也不重放
                report.offline_users += 1;
                continue;
            }
            Self::push_all(&mut report, targets, &event, skip);
        }

        tracing::debug!(
            event = event.name(),
            audience = audience.len(),
            delivered = report.delivered,
            offline_users = report.offline_users,
            failed = report.failed(),
            "event routed"
        );
        report
    }

    /// 投递信封；开启回声抑制时跳过发起变更的连接
    pub async fn deliver_envelope(&self, envelope: &EventEnvelope, suppress_origin: bool) -> DeliveryReport {
        let skip = if suppress_origin { envelope.origin } else { None };
        self.deliver(&envelope.audience, Arc::new(envelope.event.clone()), skip)
            .await
    }

    /// 投递给协作房间中的连接
    pub async fn deliver_to_room(
        &self,
        room: TaskId,
        event: ServerEvent,
        skip: Option<ConnectionId>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let targets = self.registry.room_targets(room).await;
        Self::push_all(&mut report, targets, &Arc::new(event), skip);
        report
    }

    /// 投递给除 `except` 之外的所有在线用户
    pub async fn broadcast_except(&self, except: UserId, event: ServerEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let targets: Vec<ConnectionTarget> = self
            .registry
            .all_targets()
            .await
            .into_iter()
            .filter(|target| target.user_id != except)
            .collect();
        Self::push_all(&mut report, targets, &Arc::new(event), None);
        report
    }

    /// 直接回复某个连接
    pub async fn send_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        match self.registry.target(connection_id).await {
            Some(target) => push(target.connection_id, &target.sender, &Arc::new(event)).is_ok(),
            None => false,
        }
    }

    fn push_all(
        report: &mut DeliveryReport,
        targets: Vec<ConnectionTarget>,
        event: &OutboundEvent,
        skip: Option<ConnectionId>,
    ) {
        for target in targets {
            if Some(target.connection_id) == skip {
                report.suppressed += 1;
                continue;
            }
            // 单个连接失败只记录，继续投递其他连接
            report.record(push(target.connection_id, &target.sender, event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::delivery::{outbound_queue, DeliveryFailure};

    fn router() -> RoomRouter {
        RoomRouter::new(Arc::new(MembershipRegistry::new(Arc::new(SystemClock), 8)))
    }

    #[test]
    fn audience_is_pure_union() {
        let owner = UserId::random();
        let other = UserId::random();
        let audience = RoomRouter::audience_for(owner, vec![other, other]);

        assert_eq!(audience.len(), 2);
        assert!(audience.contains(owner));
    }

    #[tokio::test]
    async fn offline_audience_members_are_skipped() {
        let router = router();
        let online = UserId::random();
        let offline = UserId::random();
        let (tx, mut rx) = outbound_queue(4);
        router
            .registry()
            .register(online, ConnectionId::random(), tx)
            .await
            .unwrap();

        let report = router
            .deliver(&Audience::of(online, [offline]), Arc::new(ServerEvent::Pong), None)
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.offline_users, 1);
        assert_eq!(*rx.recv().await.unwrap(), ServerEvent::Pong);
    }

    #[tokio::test]
    async fn one_failing_connection_does_not_block_others() {
        let router = router();
        let user = UserId::random();
        let full = ConnectionId::random();
        let (full_tx, _full_rx) = outbound_queue(1);
        let (closed_tx, closed_rx) = outbound_queue(4);
        let (ok_tx, mut ok_rx) = outbound_queue(4);
        drop(closed_rx);

        // 先把一个队列塞满
        full_tx.try_send(Arc::new(ServerEvent::Pong)).unwrap();
        router.registry().register(user, full, full_tx).await.unwrap();
        router
            .registry()
            .register(user, ConnectionId::random(), closed_tx)
            .await
            .unwrap();
        router
            .registry()
            .register(UserId::random(), ConnectionId::random(), ok_tx.clone())
            .await
            .unwrap();

        let all: Audience = router.registry().snapshot().await.into_keys().collect();
        let report = router.deliver(&all, Arc::new(ServerEvent::error("x")), None).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed(), 2);
        assert!(report.failures.contains(&DeliveryFailure::QueueFull(full)));
        assert_eq!(*ok_rx.recv().await.unwrap(), ServerEvent::error("x"));
    }

    #[tokio::test]
    async fn origin_connection_is_suppressed_but_other_devices_receive() {
        let router = router();
        let user = UserId::random();
        let origin = ConnectionId::random();
        let (origin_tx, mut origin_rx) = outbound_queue(4);
        let (phone_tx, mut phone_rx) = outbound_queue(4);
        router.registry().register(user, origin, origin_tx).await.unwrap();
        router
            .registry()
            .register(user, ConnectionId::random(), phone_tx)
            .await
            .unwrap();

        let envelope = EventEnvelope::new(ServerEvent::Pong, Audience::of(user, []), chrono::Utc::now())
            .with_origin(Some(origin));
        let report = router.deliver_envelope(&envelope, true).await;

        assert_eq!(report.suppressed, 1);
        assert_eq!(report.delivered, 1);
        assert!(origin_rx.try_recv().is_err());
        assert!(phone_rx.try_recv().is_ok());

        let report = router.deliver_envelope(&envelope, false).await;
        assert_eq!(report.delivered, 2);
        assert!(origin_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_except_skips_all_sessions_of_that_user() {
        let router = router();
        let actor = UserId::random();
        let watcher = UserId::random();
        let (actor_tx, mut actor_rx) = outbound_queue(4);
        let (watcher_tx, mut watcher_rx) = outbound_queue(4);
        router.registry().register(actor, ConnectionId::random(), actor_tx).await.unwrap();
        router.registry().register(watcher, ConnectionId::random(), watcher_tx).await.unwrap();

        let report = router
            .broadcast_except(actor, ServerEvent::UserOnline { user_id: actor })
            .await;

        assert_eq!(report.delivered, 1);
        assert!(actor_rx.try_recv().is_err());
        assert_eq!(
            *watcher_rx.try_recv().unwrap(),
            ServerEvent::UserOnline { user_id: actor }
        );
    }
}
