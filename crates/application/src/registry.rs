//! 成员注册表
//!
//! 记录每个在线连接属于哪个用户（一个用户可以同时有多个会话），
//! 以及连接加入了哪些任务协作房间。注册表是显式持有的实例，
//! 通过 `Arc` 注入到连接处理和分发组件中，`shutdown` 结束其生命周期。
//!
//! 所有可变状态都在一把全局 `RwLock` 之后，连接、用户、房间三张表在同一个
//! 临界区内更新，保证“每个连接恰好属于一个在线用户条目”。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use domain::{ConnectionId, TaskId, Timestamp, UserId};
use tokio::sync::{broadcast, RwLock};

use crate::clock::Clock;
use crate::delivery::OutboundSender;
use crate::error::ApplicationError;

/// 上线/下线变化，发给关心在线状态的观察者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    Online(UserId),
    Offline(UserId),
}

/// 注销连接的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    /// 这是该用户的最后一个连接
    pub went_offline: bool,
    /// 连接离开时所在的协作房间
    pub rooms: Vec<TaskId>,
}

/// 在线用户的只读快照
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub user_id: UserId,
    pub connections: usize,
    pub status: Option<String>,
    pub online_since: Timestamp,
}

/// 注册表结构快照（用户 → 连接集合），用于比较状态
pub type MembershipSnapshot = BTreeMap<UserId, BTreeSet<ConnectionId>>;

/// 连接条目
#[derive(Debug, Clone)]
struct ConnectionEntry {
    user_id: UserId,
    established_at: Timestamp,
    last_seen: Timestamp,
    sender: OutboundSender,
    rooms: HashSet<TaskId>,
}

/// 在线用户条目
#[derive(Debug, Clone)]
struct PresenceEntry {
    connections: HashSet<ConnectionId>,
    status: Option<String>,
    online_since: Timestamp,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    users: HashMap<UserId, PresenceEntry>,
    rooms: HashMap<TaskId, HashSet<ConnectionId>>,
    closed: bool,
}

impl RegistryState {
    fn detach_from_room(&mut self, room: TaskId, connection_id: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(&room) else {
            return false;
        };
        let removed = members.remove(&connection_id);
        if members.is_empty() {
            self.rooms.remove(&room);
        }
        removed
    }

    /// 在当前临界区内移除一个连接及其房间、在线状态条目
    fn remove_connection(&mut self, connection_id: ConnectionId) -> Option<Departure> {
        let entry = self.connections.remove(&connection_id)?;

        let rooms: Vec<TaskId> = entry.rooms.iter().copied().collect();
        for room in &rooms {
            self.detach_from_room(*room, connection_id);
        }

        let went_offline = match self.users.get_mut(&entry.user_id) {
            Some(presence) => {
                presence.connections.remove(&connection_id);
                presence.connections.is_empty()
            }
            None => true,
        };
        if went_offline {
            self.users.remove(&entry.user_id);
        }

        Some(Departure {
            connection_id,
            user_id: entry.user_id,
            went_offline,
            rooms,
        })
    }
}

/// 连接的投递目标
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub sender: OutboundSender,
}

pub struct MembershipRegistry {
    state: RwLock<RegistryState>,
    presence_tx: broadcast::Sender<PresenceChange>,
    clock: Arc<dyn Clock>,
}

impl MembershipRegistry {
    pub fn new(clock: Arc<dyn Clock>, presence_capacity: usize) -> Self {
        let (presence_tx, _) = broadcast::channel(presence_capacity.max(1));
        Self {
            state: RwLock::new(RegistryState::default()),
            presence_tx,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// 订阅上线/下线变化
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceChange> {
        self.presence_tx.subscribe()
    }

    fn announce(&self, change: PresenceChange) {
        // 没有订阅者时发送失败是正常情况
        if self.presence_tx.send(change).is_err() {
            tracing::trace!(?change, "no presence subscribers");
        }
    }

    /// 注册连接；多个连接对同一用户是叠加的。返回该用户是否因此上线。
    pub async fn register(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        sender: OutboundSender,
    ) -> Result<bool, ApplicationError> {
        let now = self.clock.now();
        let came_online = {
            let mut state = self.state.write().await;
            if state.closed {
                return Err(ApplicationError::RegistryClosed);
            }
            if state.connections.contains_key(&connection_id) {
                return Err(ApplicationError::ConnectionAlreadyRegistered(connection_id));
            }

            state.connections.insert(
                connection_id,
                ConnectionEntry {
                    user_id,
                    established_at: now,
                    last_seen: now,
                    sender,
                    rooms: HashSet::new(),
                },
            );

            let entry = state.users.entry(user_id).or_insert_with(|| PresenceEntry {
                connections: HashSet::new(),
                status: None,
                online_since: now,
            });
            entry.connections.insert(connection_id);
            entry.connections.len() == 1
        };

        tracing::info!(user_id = %user_id, connection_id = %connection_id, came_online, "connection registered");
        if came_online {
            self.announce(PresenceChange::Online(user_id));
        }
        Ok(came_online)
    }

    /// 注销恰好一个连接；未知连接返回 `None`，重复注销是无害的。
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<Departure> {
        let departure = self.state.write().await.remove_connection(connection_id)?;

        tracing::info!(
            user_id = %departure.user_id,
            connection_id = %connection_id,
            went_offline = departure.went_offline,
            "connection unregistered"
        );
        if departure.went_offline {
            self.announce(PresenceChange::Offline(departure.user_id));
        }
        Some(departure)
    }

    /// 用户当前的全部连接
    pub async fn connections_for(&self, user_id: UserId) -> HashSet<ConnectionId> {
        let state = self.state.read().await;
        state
            .users
            .get(&user_id)
            .map(|presence| presence.connections.clone())
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.state.read().await.users.contains_key(&user_id)
    }

    pub async fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        let state = self.state.read().await;
        state.connections.get(&connection_id).map(|entry| entry.user_id)
    }

    /// 某个用户全部连接的投递目标
    pub async fn targets_for_user(&self, user_id: UserId) -> Vec<ConnectionTarget> {
        let state = self.state.read().await;
        let Some(presence) = state.users.get(&user_id) else {
            return Vec::new();
        };
        presence
            .connections
            .iter()
            .filter_map(|connection_id| {
                state.connections.get(connection_id).map(|entry| ConnectionTarget {
                    connection_id: *connection_id,
                    user_id,
                    sender: entry.sender.clone(),
                })
            })
            .collect()
    }

    pub async fn target(&self, connection_id: ConnectionId) -> Option<ConnectionTarget> {
        let state = self.state.read().await;
        state.connections.get(&connection_id).map(|entry| ConnectionTarget {
            connection_id,
            user_id: entry.user_id,
            sender: entry.sender.clone(),
        })
    }

    /// 全部在线连接的投递目标
    pub async fn all_targets(&self) -> Vec<ConnectionTarget> {
        let state = self.state.read().await;
        state
            .connections
            .iter()
            .map(|(connection_id, entry)| ConnectionTarget {
                connection_id: *connection_id,
                user_id: entry.user_id,
                sender: entry.sender.clone(),
            })
            .collect()
    }

    /// 记录连接的最近活动时间
    pub async fn touch(&self, connection_id: ConnectionId) -> Result<(), ApplicationError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(ApplicationError::ConnectionNotFound(connection_id))?;
        entry.last_seen = now;
        Ok(())
    }

    /// 更新用户的在线状态标签
    pub async fn set_status(&self, user_id: UserId, status: impl Into<String>) -> bool {
        let mut state = self.state.write().await;
        match state.users.get_mut(&user_id) {
            Some(presence) => {
                presence.status = Some(status.into());
                true
            }
            None => false,
        }
    }

    /// 注销最近活动时间早于 `cutoff` 的连接
    ///
    /// 判断和移除在同一把写锁内完成，扫描期间刚刚 `touch` 过的连接不会被误删。
    pub async fn evict_stale(&self, cutoff: Timestamp) -> Vec<Departure> {
        let departures: Vec<Departure> = {
            let mut state = self.state.write().await;
            let stale: Vec<ConnectionId> = state
                .connections
                .iter()
                .filter(|(_, entry)| entry.last_seen < cutoff)
                .map(|(connection_id, _)| *connection_id)
                .collect();
            stale
                .into_iter()
                .filter_map(|connection_id| state.remove_connection(connection_id))
                .collect()
        };

        for departure in &departures {
            if departure.went_offline {
                self.announce(PresenceChange::Offline(departure.user_id));
            }
        }
        departures
    }

    pub async fn connection_age(&self, connection_id: ConnectionId) -> Option<(Timestamp, Timestamp)> {
        let state = self.state.read().await;
        state
            .connections
            .get(&connection_id)
            .map(|entry| (entry.established_at, entry.last_seen))
    }

    /// 连接加入任务协作房间；返回是否为新加入
    pub async fn join_room(
        &self,
        connection_id: ConnectionId,
        room: TaskId,
    ) -> Result<bool, ApplicationError> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(ApplicationError::ConnectionNotFound(connection_id))?;
        let joined = entry.rooms.insert(room);
        state.rooms.entry(room).or_default().insert(connection_id);
        Ok(joined)
    }

    /// 连接离开任务协作房间；返回之前是否在房间中
    pub async fn leave_room(
        &self,
        connection_id: ConnectionId,
        room: TaskId,
    ) -> Result<bool, ApplicationError> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(ApplicationError::ConnectionNotFound(connection_id))?;
        let was_member = entry.rooms.remove(&room);
        state.detach_from_room(room, connection_id);
        Ok(was_member)
    }

    /// 把某个用户的全部连接移出房间（权限被收回时）
    pub async fn remove_user_from_room(&self, room: TaskId, user_id: UserId) -> Vec<ConnectionId> {
        let mut state = self.state.write().await;
        let members: Vec<ConnectionId> = state
            .rooms
            .get(&room)
            .map(|members| {
                members
                    .iter()
                    .copied()
                    .filter(|connection_id| {
                        state
                            .connections
                            .get(connection_id)
                            .is_some_and(|entry| entry.user_id == user_id)
                    })
                    .collect()
            })
            .unwrap_or_default();

        for connection_id in &members {
            if let Some(entry) = state.connections.get_mut(connection_id) {
                entry.rooms.remove(&room);
            }
            state.detach_from_room(room, *connection_id);
        }
        members
    }

    /// 关闭房间（任务被删除时），返回原有成员
    pub async fn close_room(&self, room: TaskId) -> Vec<ConnectionId> {
        let mut state = self.state.write().await;
        let members: Vec<ConnectionId> = state
            .rooms
            .remove(&room)
            .map(|members| members.into_iter().collect())
            .unwrap_or_default();
        for connection_id in &members {
            if let Some(entry) = state.connections.get_mut(connection_id) {
                entry.rooms.remove(&room);
            }
        }
        members
    }

    /// 房间内全部连接的投递目标
    pub async fn room_targets(&self, room: TaskId) -> Vec<ConnectionTarget> {
        let state = self.state.read().await;
        let Some(members) = state.rooms.get(&room) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|connection_id| {
                state.connections.get(connection_id).map(|entry| ConnectionTarget {
                    connection_id: *connection_id,
                    user_id: entry.user_id,
                    sender: entry.sender.clone(),
                })
            })
            .collect()
    }

    pub async fn is_in_room(&self, connection_id: ConnectionId, room: TaskId) -> bool {
        let state = self.state.read().await;
        state
            .connections
            .get(&connection_id)
            .is_some_and(|entry| entry.rooms.contains(&room))
    }

    /// 在线用户列表
    pub async fn online_users(&self) -> Vec<PresenceSnapshot> {
        let state = self.state.read().await;
        let mut users: Vec<PresenceSnapshot> = state
            .users
            .iter()
            .map(|(user_id, presence)| PresenceSnapshot {
                user_id: *user_id,
                connections: presence.connections.len(),
                status: presence.status.clone(),
                online_since: presence.online_since,
            })
            .collect();
        users.sort_by_key(|snapshot| snapshot.online_since);
        users
    }

    pub async fn snapshot(&self) -> MembershipSnapshot {
        let state = self.state.read().await;
        state
            .users
            .iter()
            .map(|(user_id, presence)| (*user_id, presence.connections.iter().copied().collect()))
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// 结束注册表生命周期：丢弃全部连接（出站队列随之关闭），拒绝后续注册
    pub async fn shutdown(&self) -> usize {
        let mut state = self.state.write().await;
        state.closed = true;
        let dropped = state.connections.len();
        state.connections.clear();
        state.users.clear();
        state.rooms.clear();
        tracing::info!(dropped, "membership registry shut down");
        dropped
    }
}
