//! 任务对账状态机
//!
//! 每个被跟踪的任务处于三种状态之一：
//! - `Clean`：与最近一次已知的服务端状态一致
//! - `OptimisticPending`：本地修改已生效，等待服务端确认
//! - `Reconciling`：本地修改未决期间收到了同一任务的对端事件，对端值被缓冲
//!
//! 未决期间界面始终显示本地值；确认或回滚之后再重放缓冲的对端值。
//! 重放按 `version` 比较：版本号由持久化存储按提交顺序分配，较新的一方获胜。

use std::collections::HashMap;

use domain::{ServerEvent, Task, TaskId, UserId};

use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Clean,
    OptimisticPending,
    Reconciling,
}

/// 未决的本地操作，保存回滚所需的快照
#[derive(Debug, Clone)]
enum Pending {
    Edit { before: Task },
    Create,
    Delete { before: Task },
}

#[derive(Debug, Clone)]
struct Entry {
    /// 界面上显示的值；乐观删除期间为空
    shown: Option<Task>,
    state: SyncState,
    pending: Option<Pending>,
    /// 未决期间收到的最新对端值
    buffered: Option<Task>,
}

impl Entry {
    fn clean(task: Task) -> Self {
        Self {
            shown: Some(task),
            state: SyncState::Clean,
            pending: None,
            buffered: None,
        }
    }

    fn version(&self) -> Option<u64> {
        self.shown.as_ref().map(|task| task.version)
    }
}

/// 缓冲的对端值与本地值不一致时的记录，只用于刷新界面，不算错误
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationConflict {
    pub task_id: TaskId,
    pub kept: Task,
    pub discarded: Task,
}

/// 服务端确认后的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    /// 确认之后界面上显示的值；确认的是删除时为空
    pub task: Option<Task>,
    pub conflict: Option<ReconciliationConflict>,
}

/// 服务端拒绝后的回滚结果，`reason` 需要展示给用户
#[derive(Debug, Clone, PartialEq)]
pub struct Rollback {
    pub task_id: TaskId,
    pub restored: Option<Task>,
    pub reason: String,
}

/// 处理一条服务端事件的结果
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    Applied(TaskId),
    Buffered(TaskId),
    Removed(TaskId),
    /// 事件版本不比当前值新
    Stale(TaskId),
    /// 任务的共享列表变了，需要重新拉取该任务确认自己是否仍有访问权限
    RefreshNeeded(TaskId),
    Ignored,
}

/// 单个用户视角下的任务集合及其对账状态
#[derive(Debug)]
pub struct TaskReconciler {
    viewer: UserId,
    entries: HashMap<TaskId, Entry>,
}

impl TaskReconciler {
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            entries: HashMap::new(),
        }
    }

    pub fn viewer(&self) -> UserId {
        self.viewer
    }

    /// 当前视图，按创建时间排序
    pub fn view(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .entries
            .values()
            .filter_map(|entry| entry.shown.as_ref())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.entries.get(&id).and_then(|entry| entry.shown.as_ref())
    }

    pub fn state_of(&self, id: TaskId) -> Option<SyncState> {
        self.entries.get(&id).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.entries.values().filter(|entry| entry.shown.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 重连后的全量刷新
    ///
    /// 没有未决操作的任务直接以存储为准；有未决操作的任务保留本地值，
    /// 存储里更新的值作为对端值缓冲，等确认/回滚后重放。
    pub fn reset_from_store(&mut self, tasks: Vec<Task>) {
        let mut fresh: HashMap<TaskId, Task> = tasks.into_iter().map(|task| (task.id, task)).collect();

        self.entries.retain(|id, entry| {
            let Some(pending) = &entry.pending else {
                return false;
            };
            if let Some(stored) = fresh.remove(id) {
                let base_version = match pending {
                    Pending::Edit { before } | Pending::Delete { before } => before.version,
                    Pending::Create => 0,
                };
                if stored.version > base_version {
                    entry.buffered = Some(stored);
                    entry.state = SyncState::Reconciling;
                }
            }
            true
        });

        for (id, task) in fresh {
            self.entries.insert(id, Entry::clean(task));
        }
        tracing::debug!(tracked = self.entries.len(), "reconciler refreshed from store");
    }

    /// 本地编辑：立即生效并记录编辑前快照
    ///
    /// 未确认期间的再次编辑覆盖前一次，快照仍是第一次编辑前的服务端值，
    /// 已缓冲的对端值和当前状态保持不变。
    pub fn apply_local_edit<F>(&mut self, id: TaskId, edit: F) -> Result<Task, ReconcileError>
    where
        F: FnOnce(&mut Task),
    {
        let entry = self.entries.get_mut(&id).ok_or(ReconcileError::NotTracked(id))?;
        if matches!(entry.pending, Some(Pending::Delete { .. })) {
            return Err(ReconcileError::AlreadyPending(id));
        }
        let Some(current) = entry.shown.as_mut() else {
            return Err(ReconcileError::NotTracked(id));
        };

        let before = current.clone();
        edit(current);
        let optimistic = current.clone();
        if entry.pending.is_none() {
            entry.pending = Some(Pending::Edit { before });
            entry.state = SyncState::OptimisticPending;
        }
        Ok(optimistic)
    }

    /// 乐观创建，任务使用客户端生成的临时ID
    pub fn create_optimistic(&mut self, task: Task) -> Result<TaskId, ReconcileError> {
        let id = task.id;
        if self.entries.contains_key(&id) {
            return Err(ReconcileError::AlreadyPending(id));
        }
        self.entries.insert(
            id,
            Entry {
                shown: Some(task),
                state: SyncState::OptimisticPending,
                pending: Some(Pending::Create),
                buffered: None,
            },
        );
        Ok(id)
    }

    /// 乐观删除：立即从视图中移除，保留快照用于回滚
    pub fn delete_optimistic(&mut self, id: TaskId) -> Result<(), ReconcileError> {
        let entry = self.entries.get_mut(&id).ok_or(ReconcileError::NotTracked(id))?;
        if entry.pending.is_some() {
            return Err(ReconcileError::AlreadyPending(id));
        }
        let before = entry.shown.take().ok_or(ReconcileError::NotTracked(id))?;
        entry.pending = Some(Pending::Delete { before });
        entry.state = SyncState::OptimisticPending;
        Ok(())
    }

    /// 服务端确认了本地操作
    ///
    /// `canonical` 是服务端返回的规范值；确认删除时传 `None`。
    /// 乐观创建的确认会把临时ID换成服务端ID。
    pub fn confirm(&mut self, id: TaskId, canonical: Option<Task>) -> Result<Confirmation, ReconcileError> {
        let entry = self.entries.get(&id).ok_or(ReconcileError::NotTracked(id))?;
        let pending = entry.pending.clone().ok_or(ReconcileError::NotPending(id))?;

        match (pending, canonical) {
            (Pending::Delete { .. }, _) | (_, None) => {
                self.entries.remove(&id);
                Ok(Confirmation {
                    task: None,
                    conflict: None,
                })
            }
            (Pending::Edit { .. }, Some(canonical)) => {
                if canonical.id != id {
                    return Err(ReconcileError::Mismatch {
                        expected: id,
                        actual: canonical.id,
                    });
                }
                let buffered = self.entries.remove(&id).and_then(|entry| entry.buffered);
                let (task, conflict) = settle(canonical, buffered);
                self.entries.insert(id, Entry::clean(task.clone()));
                Ok(Confirmation {
                    task: Some(task),
                    conflict,
                })
            }
            (Pending::Create, Some(canonical)) => {
                let buffered = self.entries.remove(&id).and_then(|entry| entry.buffered);
                // 服务端ID下可能已经有对端推送来的同一任务
                let existing = self
                    .entries
                    .remove(&canonical.id)
                    .and_then(|entry| entry.shown);
                let newest_remote = match (buffered, existing) {
                    (Some(a), Some(b)) => Some(if a.version >= b.version { a } else { b }),
                    (a, b) => a.or(b),
                };
                let (task, conflict) = settle(canonical, newest_remote);
                self.entries.insert(task.id, Entry::clean(task.clone()));
                Ok(Confirmation {
                    task: Some(task),
                    conflict,
                })
            }
        }
    }

    /// 服务端拒绝了本地操作：恢复快照，再重放期间缓冲的对端值
    pub fn reject(&mut self, id: TaskId, reason: impl Into<String>) -> Result<Rollback, ReconcileError> {
        let entry = self.entries.get(&id).ok_or(ReconcileError::NotTracked(id))?;
        if entry.pending.is_none() {
            return Err(ReconcileError::NotPending(id));
        }
        let reason = reason.into();
        let Some(entry) = self.entries.remove(&id) else {
            return Err(ReconcileError::NotTracked(id));
        };

        let restored = match entry.pending {
            Some(Pending::Edit { before }) | Some(Pending::Delete { before }) => {
                let (task, _) = settle(before, entry.buffered);
                self.entries.insert(id, Entry::clean(task.clone()));
                Some(task)
            }
            Some(Pending::Create) | None => None,
        };

        tracing::info!(task_id = %id, reason = %reason, "optimistic change rolled back");
        Ok(Rollback {
            task_id: id,
            restored,
            reason,
        })
    }

    /// 处理服务端推送的事件
    pub fn apply_remote(&mut self, event: &ServerEvent) -> RemoteOutcome {
        match event {
            ServerEvent::TaskCreated(task)
            | ServerEvent::TaskUpdated(task)
            | ServerEvent::TaskShared(task)
            | ServerEvent::TaskCommentAdded(task) => self.apply_peer_value(task),
            ServerEvent::TaskDeleted { task_id } => {
                // 删除优先于任何未决的本地状态
                self.entries.remove(task_id);
                RemoteOutcome::Removed(*task_id)
            }
            ServerEvent::TaskUnshared { task_id } => self.apply_unshare(*task_id),
            _ => RemoteOutcome::Ignored,
        }
    }

    fn apply_peer_value(&mut self, task: &Task) -> RemoteOutcome {
        let id = task.id;
        let Some(entry) = self.entries.get_mut(&id) else {
            self.entries.insert(id, Entry::clean(task.clone()));
            return RemoteOutcome::Applied(id);
        };

        if entry.pending.is_some() {
            let newer = entry
                .buffered
                .as_ref()
                .map_or(true, |buffered| task.version >= buffered.version);
            if newer {
                entry.buffered = Some(task.clone());
            }
            entry.state = SyncState::Reconciling;
            return RemoteOutcome::Buffered(id);
        }

        if entry.version().is_some_and(|current| task.version < current) {
            return RemoteOutcome::Stale(id);
        }
        entry.shown = Some(task.clone());
        RemoteOutcome::Applied(id)
    }

    /// 取消共享事件只带任务ID，看不出被移除的是不是自己：
    /// 视图保持不变，由调用方重新拉取该任务，拉取失败时再调用 [`Self::forget`]
    fn apply_unshare(&mut self, task_id: TaskId) -> RemoteOutcome {
        if self.entries.contains_key(&task_id) {
            RemoteOutcome::RefreshNeeded(task_id)
        } else {
            RemoteOutcome::Ignored
        }
    }

    /// 重新拉取时任务已不存在或已无访问权限，从视图中移除
    pub fn forget(&mut self, id: TaskId) -> RemoteOutcome {
        match self.entries.remove(&id) {
            Some(_) => RemoteOutcome::Removed(id),
            None => RemoteOutcome::Ignored,
        }
    }
}

/// 规范值与缓冲的对端值取版本较新者
fn settle(canonical: Task, buffered: Option<Task>) -> (Task, Option<ReconciliationConflict>) {
    let Some(peer) = buffered else {
        return (canonical, None);
    };
    let task_id = canonical.id;
    let (kept, discarded) = if peer.version > canonical.version {
        (peer, canonical)
    } else {
        (canonical, peer)
    };
    let conflict = (kept != discarded).then(|| ReconciliationConflict {
        task_id,
        kept: kept.clone(),
        discarded,
    });
    if conflict.is_some() {
        tracing::debug!(task_id = %task_id, version = kept.version, "reconciliation conflict resolved");
    }
    (kept, conflict)
}
