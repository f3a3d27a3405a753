//! 任务实体定义
//!
//! 任务文档由外部持久化存储维护，这里只描述实时层需要读取的形状：
//! 所有者、协作者列表（决定受众）以及用于排序的版本号。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value_objects::{CommentId, TaskId, Timestamp, UserId};

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

/// 任务优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// 协作者权限，按 read < write < admin 排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Read,
    Write,
    Admin,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::Admin => write!(f, "admin"),
        }
    }
}

/// 共享记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub user: UserId,
    #[serde(default)]
    pub permission: Permission,
    pub shared_at: Timestamp,
}

/// 任务评论
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub user: UserId,
    pub content: String,
    pub created_at: Timestamp,
}

/// 任务实体
///
/// `version` 由持久化存储按提交顺序单调递增，客户端对账时用它判断两份值谁更新。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub due_date: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    pub owner: UserId,
    #[serde(default)]
    pub shared_with: Vec<Collaborator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Task {
    /// 创建一个新任务（版本号为 0，由存储在首次写入时分配）
    pub fn new(owner: UserId, title: impl Into<String>, due_date: Timestamp, now: Timestamp) -> Self {
        Self {
            id: TaskId::random(),
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            due_date,
            completed_at: None,
            owner,
            shared_with: Vec::new(),
            category: None,
            tags: Vec::new(),
            comments: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 当前授权列表：所有者 + 协作者
    pub fn access_list(&self) -> AccessList {
        AccessList {
            owner: self.owner,
            collaborators: self
                .shared_with
                .iter()
                .map(|shared| (shared.user, shared.permission))
                .collect(),
        }
    }

    pub fn collaborator_ids(&self) -> Vec<UserId> {
        self.shared_with.iter().map(|shared| shared.user).collect()
    }

    pub fn is_shared_with(&self, user_id: UserId) -> bool {
        self.shared_with.iter().any(|shared| shared.user == user_id)
    }

    /// 检查用户是否拥有所需权限，所有者拥有全部权限
    pub fn user_has_permission(&self, user_id: UserId, required: Permission) -> bool {
        self.access_list().allows(user_id, required)
    }

    /// 与某用户共享；已共享时只更新权限和共享时间
    pub fn share_with(&mut self, user_id: UserId, permission: Permission, now: Timestamp) {
        match self.shared_with.iter_mut().find(|shared| shared.user == user_id) {
            Some(existing) => {
                existing.permission = permission;
                existing.shared_at = now;
            }
            None => self.shared_with.push(Collaborator {
                user: user_id,
                permission,
                shared_at: now,
            }),
        }
    }

    /// 取消共享，返回该用户之前是否在共享列表中
    pub fn remove_shared_user(&mut self, user_id: UserId) -> bool {
        let before = self.shared_with.len();
        self.shared_with.retain(|shared| shared.user != user_id);
        before != self.shared_with.len()
    }

    pub fn add_comment(&mut self, user_id: UserId, content: impl Into<String>, now: Timestamp) -> CommentId {
        let id = CommentId::random();
        self.comments.push(Comment {
            id,
            user: user_id,
            content: content.into(),
            created_at: now,
        });
        id
    }

    /// 更新状态，同时维护完成时间
    pub fn set_status(&mut self, status: TaskStatus, now: Timestamp) {
        if status == TaskStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(now);
        } else if status != TaskStatus::Completed {
            self.completed_at = None;
        }
        self.status = status;
    }
}

/// 资源的授权列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessList {
    pub owner: UserId,
    pub collaborators: Vec<(UserId, Permission)>,
}

impl AccessList {
    pub fn allows(&self, user_id: UserId, required: Permission) -> bool {
        if self.owner == user_id {
            return true;
        }
        self.collaborators
            .iter()
            .any(|(collaborator, permission)| *collaborator == user_id && *permission >= required)
    }

    /// 所有者与协作者的并集
    pub fn members(&self) -> BTreeSet<UserId> {
        let mut members: BTreeSet<UserId> = self.collaborators.iter().map(|(id, _)| *id).collect();
        members.insert(self.owner);
        members
    }
}
