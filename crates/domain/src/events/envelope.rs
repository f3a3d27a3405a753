//! 事件信封与受众
//!
//! 信封在持久化变更成功后立即构建，每个在线连接消费一次，从不持久化。

use std::collections::BTreeSet;

use crate::entities::{AccessList, Task};
use crate::events::ServerEvent;
use crate::value_objects::{ConnectionId, Timestamp, UserId};

/// 一个事件应当送达的用户集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience(BTreeSet<UserId>);

impl Audience {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 所有者 ∪ 协作者
    pub fn of(owner: UserId, collaborators: impl IntoIterator<Item = UserId>) -> Self {
        let mut members: BTreeSet<UserId> = collaborators.into_iter().collect();
        members.insert(owner);
        Self(members)
    }

    /// 从任务当前的授权列表计算受众
    pub fn for_task(task: &Task) -> Self {
        Self::of(task.owner, task.collaborator_ids())
    }

    pub fn from_access_list(access: &AccessList) -> Self {
        Self(access.members())
    }

    pub fn with(mut self, user_id: UserId) -> Self {
        self.0.insert(user_id);
        self
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.0.contains(&user_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = UserId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<UserId> for Audience {
    fn from_iter<I: IntoIterator<Item = UserId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// 事件信封
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub event: ServerEvent,
    pub audience: Audience,
    pub emitted_at: Timestamp,
    /// 触发变更的连接；开启回声抑制时该连接不会收到这个事件
    pub origin: Option<ConnectionId>,
}

impl EventEnvelope {
    pub fn new(event: ServerEvent, audience: Audience, emitted_at: Timestamp) -> Self {
        Self {
            event,
            audience,
            emitted_at,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: Option<ConnectionId>) -> Self {
        self.origin = origin;
        self
    }
}
