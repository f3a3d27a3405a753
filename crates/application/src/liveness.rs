//! 存活检查
//!
//! 按固定间隔扫描注册表，把超过阈值没有任何活动的连接注销，
//! 处理方式与正常断开完全一致。这只是兜底，正常断开仍由连接任务自己注销。

use std::sync::Arc;
use std::time::Duration;

use domain::ConnectionId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::registry::MembershipRegistry;

pub struct LivenessMonitor {
    registry: Arc<MembershipRegistry>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
    stale_after: chrono::Duration,
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<MembershipRegistry>,
        clock: Arc<dyn Clock>,
        sweep_interval: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            registry,
            clock,
            sweep_interval,
            stale_after: chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::days(365)),
        }
    }

    /// 执行一次扫描，返回被驱逐的连接
    pub async fn sweep_once(&self) -> Vec<ConnectionId> {
        let cutoff = self.clock.now() - self.stale_after;
        let evicted: Vec<ConnectionId> = self
            .registry
            .evict_stale(cutoff)
            .await
            .into_iter()
            .map(|departure| {
                tracing::info!(
                    connection_id = %departure.connection_id,
                    user_id = %departure.user_id,
                    "evicted stale connection"
                );
                departure.connection_id
            })
            .collect();

        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "liveness sweep finished");
        }
        evicted
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即完成
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("liveness monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::delivery::outbound_queue;
    use domain::UserId;

    fn setup() -> (Arc<ManualClock>, Arc<MembershipRegistry>, LivenessMonitor) {
        let clock = Arc::new(ManualClock::default());
        let registry = Arc::new(MembershipRegistry::new(clock.clone(), 8));
        let monitor = LivenessMonitor::new(
            Arc::clone(&registry),
            clock.clone(),
            Duration::from_secs(60),
            Duration::from_secs(300),
        );
        (clock, registry, monitor)
    }

    #[tokio::test]
    async fn only_connections_past_threshold_are_evicted() {
        let (clock, registry, monitor) = setup();
        let user = UserId::random();
        let idle = ConnectionId::random();
        let active = ConnectionId::random();
        let (tx, _rx) = outbound_queue(4);
        registry.register(user, idle, tx.clone()).await.unwrap();
        registry.register(user, active, tx).await.unwrap();

        clock.advance(chrono::Duration::seconds(200));
        registry.touch(active).await.unwrap();
        assert!(monitor.sweep_once().await.is_empty());

        clock.advance(chrono::Duration::seconds(101));
        assert_eq!(monitor.sweep_once().await, vec![idle]);
        assert!(registry.is_online(user).await);
        assert_eq!(registry.connections_for(user).await.len(), 1);
    }

    #[tokio::test]
    async fn eviction_signals_offline_like_unregister() {
        let (clock, registry, monitor) = setup();
        let mut presence = registry.subscribe_presence();
        let user = UserId::random();
        let (tx, _rx) = outbound_queue(4);
        registry.register(user, ConnectionId::random(), tx).await.unwrap();

        clock.advance(chrono::Duration::seconds(301));
        assert_eq!(monitor.sweep_once().await.len(), 1);

        assert_eq!(presence.recv().await.unwrap(), crate::registry::PresenceChange::Online(user));
        assert_eq!(presence.recv().await.unwrap(), crate::registry::PresenceChange::Offline(user));
    }

    #[tokio::test]
    async fn connection_touched_after_going_stale_survives_the_sweep() {
        let (clock, registry, monitor) = setup();
        let user = UserId::random();
        let connection_id = ConnectionId::random();
        let (tx, _rx) = outbound_queue(4);
        registry.register(user, connection_id, tx).await.unwrap();

        clock.advance(chrono::Duration::seconds(301));
        registry.touch(connection_id).await.unwrap();

        assert!(monitor.sweep_once().await.is_empty());
        assert!(registry.is_online(user).await);
    }

    #[tokio::test]
    async fn evict_stale_rechecks_last_seen_under_the_lock() {
        let (clock, registry, _) = setup();
        let user = UserId::random();
        let (idle, fresh) = (ConnectionId::random(), ConnectionId::random());
        let (tx, _rx) = outbound_queue(4);
        registry.register(user, idle, tx.clone()).await.unwrap();
        clock.advance(chrono::Duration::seconds(10));
        registry.register(user, fresh, tx).await.unwrap();

        let cutoff = clock.now() - chrono::Duration::seconds(5);
        let departures = registry.evict_stale(cutoff).await;

        assert_eq!(departures.len(), 1);
        assert_eq!(departures[0].connection_id, idle);
        assert!(!departures[0].went_offline);
        assert_eq!(registry.connection_age(fresh).await.map(|(_, seen)| seen), Some(clock.now()));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_connection_is_evicted_within_one_sweep_interval() {
        let (clock, registry, monitor) = setup();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = monitor.spawn(shutdown_rx);

        let (tx, mut rx) = outbound_queue(4);
        registry.register(UserId::random(), ConnectionId::random(), tx).await.unwrap();
        clock.advance(chrono::Duration::seconds(301));

        tokio::time::sleep(Duration::from_secs(61)).await;
        for _ in 0..10 {
            if registry.connection_count().await == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.connection_count().await, 0);
        // 注销后出站队列关闭，连接任务随之结束
        assert!(rx.recv().await.is_none());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
