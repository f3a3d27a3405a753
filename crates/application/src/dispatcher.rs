//! 事件分发
//!
//! 持久化变更提交成功后，调用方把变更交给 [`EventDispatcher::publish`]：
//! 根据任务当时的授权列表构建信封，经房间路由投递到每个在线连接。
//!
//! 分发在一把互斥锁内串行完成，调用方按提交顺序调用即可保证同一任务的事件
//! 以相同顺序进入每个连接的出站队列。通知失败从不影响已经提交的变更。

use std::sync::Arc;

use domain::{AccessList, Audience, ConnectionId, EventEnvelope, ServerEvent, Task, TaskId, UserId};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::delivery::DeliveryReport;
use crate::router::RoomRouter;

/// 已提交的任务变更
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMutation {
    Created(Task),
    Updated(Task),
    /// 删除后任务已不存在，需要调用方提供删除前的授权列表
    Deleted { task_id: TaskId, access: AccessList },
    /// 共享后的任务
    Shared(Task),
    /// 取消共享后的任务，以及被移除的用户
    Unshared { task: Task, removed: UserId },
    CommentAdded(Task),
}

impl TaskMutation {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskMutation::Created(task)
            | TaskMutation::Updated(task)
            | TaskMutation::Shared(task)
            | TaskMutation::CommentAdded(task) => task.id,
            TaskMutation::Deleted { task_id, .. } => *task_id,
            TaskMutation::Unshared { task, .. } => task.id,
        }
    }
}

pub struct EventDispatcher {
    router: RoomRouter,
    clock: Arc<dyn Clock>,
    suppress_origin_echo: bool,
    ordering: Mutex<()>,
}

impl EventDispatcher {
    pub fn new(router: RoomRouter, clock: Arc<dyn Clock>, suppress_origin_echo: bool) -> Self {
        Self {
            router,
            clock,
            suppress_origin_echo,
            ordering: Mutex::new(()),
        }
    }

    /// 按变更类型构建事件和受众
    pub fn envelope_for(&self, mutation: &TaskMutation, origin: Option<ConnectionId>) -> EventEnvelope {
        let (event, audience) = match mutation {
            TaskMutation::Created(task) => (ServerEvent::TaskCreated(task.clone()), Audience::for_task(task)),
            TaskMutation::Updated(task) => (ServerEvent::TaskUpdated(task.clone()), Audience::for_task(task)),
            TaskMutation::Shared(task) => (ServerEvent::TaskShared(task.clone()), Audience::for_task(task)),
            TaskMutation::CommentAdded(task) => {
                (ServerEvent::TaskCommentAdded(task.clone()), Audience::for_task(task))
            }
            TaskMutation::Deleted { task_id, access } => (
                ServerEvent::TaskDeleted { task_id: *task_id },
                Audience::from_access_list(access),
            ),
            // 被移除的用户也要收到，才能从本地视图中删除该任务
            TaskMutation::Unshared { task, removed } => (
                ServerEvent::TaskUnshared { task_id: task.id },
                Audience::for_task(task).with(*removed),
            ),
        };
        EventEnvelope::new(event, audience, self.clock.now()).with_origin(origin)
    }

    /// 发布一个已提交的变更
    pub async fn publish(&self, mutation: TaskMutation, origin: Option<ConnectionId>) -> DeliveryReport {
        let _ordering = self.ordering.lock().await;
        let envelope = self.envelope_for(&mutation, origin);
        let report = self.deliver(&envelope).await;

        match &mutation {
            TaskMutation::Unshared { task, removed } => {
                let evicted = self.router.registry().remove_user_from_room(task.id, *removed).await;
                if !evicted.is_empty() {
                    tracing::info!(task_id = %task.id, user_id = %removed, connections = evicted.len(), "evicted unshared user from room");
                }
            }
            TaskMutation::Deleted { task_id, .. } => {
                self.router.registry().close_room(*task_id).await;
            }
            _ => {}
        }

        report
    }

    async fn deliver(&self, envelope: &EventEnvelope) -> DeliveryReport {
        let report = self
            .router
            .deliver_envelope(envelope, self.suppress_origin_echo)
            .await;
        for failure in &report.failures {
            tracing::warn!(event = envelope.event.name(), %failure, "delivery failure isolated");
        }
        tracing::info!(
            event = envelope.event.name(),
            task_id = ?envelope.event.task_id(),
            audience = envelope.audience.len(),
            delivered = report.delivered,
            "event dispatched"
        );
        report
    }
}
