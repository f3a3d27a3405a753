//! 任务变更通知源
//!
//! 任务服务在提交事务后执行 `NOTIFY task_mutations, '<json>'`。PostgreSQL 按提交顺序
//! 投递通知，这里逐条读取、按任务当前状态构建变更并交给分发器，从而保持同一任务的事件顺序。
//!
//! 通知内容只携带标识，任务本身总是从存储重新读取，受众因此来自当前的授权列表。

use std::sync::Arc;
use std::time::Duration;

use application::{EventDispatcher, TaskMutation};
use domain::{AccessList, ConnectionId, DomainError, DomainResult, Permission, TaskId, TaskRepository, UserId};
use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const MUTATION_CHANNEL: &str = "task_mutations";

const MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Created,
    Updated,
    Deleted,
    Shared,
    Unshared,
    CommentAdded,
}

/// `NOTIFY` 载荷
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationNotice {
    pub kind: MutationKind,
    pub task_id: TaskId,
    /// 发起变更的连接（如果变更来自某个实时连接）
    #[serde(default)]
    pub origin: Option<ConnectionId>,
    /// `unshared` 时被移除的用户
    #[serde(default)]
    pub removed_user_id: Option<UserId>,
    /// `deleted` 时删除前的所有者
    #[serde(default)]
    pub owner_id: Option<UserId>,
    /// `deleted` 时删除前的协作者
    #[serde(default)]
    pub collaborators: Vec<UserId>,
}

impl MutationNotice {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// 结合存储中的当前状态构建变更；任务已不存在（被后续变更删除）时返回 `None`
    pub async fn resolve(&self, tasks: &dyn TaskRepository) -> DomainResult<Option<TaskMutation>> {
        if self.kind == MutationKind::Deleted {
            return self.deleted().map(Some);
        }

        let Some(task) = tasks.find_by_id(self.task_id).await? else {
            return Ok(None);
        };

        let mutation = match self.kind {
            MutationKind::Created => TaskMutation::Created(task),
            MutationKind::Updated => TaskMutation::Updated(task),
            MutationKind::Shared => TaskMutation::Shared(task),
            MutationKind::CommentAdded => TaskMutation::CommentAdded(task),
            MutationKind::Unshared => match self.removed_user_id {
                Some(removed) => TaskMutation::Unshared { task, removed },
                None => {
                    return Err(DomainError::validation_error(
                        "removedUserId",
                        "unshared notice must name the removed user",
                    ))
                }
            },
            MutationKind::Deleted => self.deleted()?,
        };
        Ok(Some(mutation))
    }

    /// 任务已被删除，受众只能来自通知里携带的删除前授权列表
    fn deleted(&self) -> DomainResult<TaskMutation> {
        let owner = self.owner_id.ok_or_else(|| {
            DomainError::validation_error("ownerId", "deleted notice must carry the previous owner")
        })?;
        Ok(TaskMutation::Deleted {
            task_id: self.task_id,
            access: AccessList {
                owner,
                collaborators: self
                    .collaborators
                    .iter()
                    .map(|user| (*user, Permission::Read))
                    .collect(),
            },
        })
    }
}

pub struct PgMutationFeed {
    pool: PgPool,
    tasks: Arc<dyn TaskRepository>,
    dispatcher: Arc<EventDispatcher>,
}

impl PgMutationFeed {
    pub fn new(pool: PgPool, tasks: Arc<dyn TaskRepository>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            pool,
            tasks,
            dispatcher,
        }
    }

    /// 处理一条通知载荷
    pub async fn handle_payload(&self, payload: &str) {
        let notice = match MutationNotice::parse(payload) {
            Ok(notice) => notice,
            Err(err) => {
                warn!(error = %err, "忽略无法解析的任务变更通知");
                return;
            }
        };

        match notice.resolve(self.tasks.as_ref()).await {
            Ok(Some(mutation)) => {
                self.dispatcher.publish(mutation, notice.origin).await;
            }
            Ok(None) => {
                info!(task_id = %notice.task_id, kind = ?notice.kind, "任务已不存在，跳过通知");
            }
            Err(err) => {
                // 通知是尽力而为的，客户端重连后会从存储全量刷新
                error!(task_id = %notice.task_id, error = %err, "构建任务变更失败");
            }
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut failures = 0u32;

            'feed: while !*shutdown.borrow() {
                let mut listener = match self.listen().await {
                    Ok(listener) => {
                        failures = 0;
                        listener
                    }
                    Err(err) => {
                        failures += 1;
                        error!(error = %err, failures, "订阅任务变更通知失败");
                        if failures >= MAX_CONSECUTIVE_FAILURES {
                            error!("任务变更通知连接失败，已达最大重试次数");
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(500 * 2_u64.pow(failures - 1))).await;
                        continue;
                    }
                };

                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break 'feed;
                            }
                        }
                        received = listener.recv() => match received {
                            Ok(notification) => self.handle_payload(notification.payload()).await,
                            Err(err) => {
                                warn!(error = %err, "任务变更通知连接中断，重新订阅");
                                break;
                            }
                        },
                    }
                }
            }

            info!("任务变更通知监听已停止");
        })
    }

    async fn listen(&self) -> Result<PgListener, sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(MUTATION_CHANNEL).await?;
        info!(channel = MUTATION_CHANNEL, "已订阅任务变更通知");
        Ok(listener)
    }
}
