//! 实时连接与会话房间
//!
//! 每个连接在注册时交出一个发送端，房间只保存连接 id。
//! 连接断开后发送失败的条目会在下一次投递时顺带清理。

use std::collections::{HashMap, HashSet};
use std::fmt;

use domain::{ConversationId, ServerEvent, UserId};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ConnectionEntry {
    user_id: UserId,
    sender: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<ConversationId>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<ConversationId, HashSet<ConnectionId>>,
}

impl HubState {
    fn detach(&mut self, connection_id: ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(&connection_id)?;
        for room in &entry.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        Some(entry)
    }
}

#[derive(Default)]
pub struct ConnectionHub {
    state: RwLock<HubState>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        user_id: UserId,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.state.write().await.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id,
                sender,
                rooms: HashSet::new(),
            },
        );
        connection_id
    }

    /// 移除连接及其所有房间成员关系，返回其所属用户
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.state
            .write()
            .await
            .detach(connection_id)
            .map(|entry| entry.user_id)
    }

    /// 加入房间，重复加入无副作用。连接不存在时返回 false。
    pub async fn join(&self, connection_id: ConnectionId, conversation_id: ConversationId) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.get_mut(&connection_id) else {
            return false;
        };
        entry.rooms.insert(conversation_id);
        state
            .rooms
            .entry(conversation_id)
            .or_default()
            .insert(connection_id);
        true
    }

    pub async fn leave(&self, connection_id: ConnectionId, conversation_id: ConversationId) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.connections.get_mut(&connection_id) {
            entry.rooms.remove(&conversation_id);
        }
        if let Some(members) = state.rooms.get_mut(&conversation_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                state.rooms.remove(&conversation_id);
            }
        }
    }

    pub async fn joined_rooms(&self, connection_id: ConnectionId) -> Vec<ConversationId> {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|entry| entry.rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn room_size(&self, conversation_id: ConversationId) -> usize {
        self.state
            .read()
            .await
            .rooms
            .get(&conversation_id)
            .map_or(0, HashSet::len)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// 只投递给指定连接
    pub async fn emit_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let delivered = {
            let state = self.state.read().await;
            match state.connections.get(&connection_id) {
                Some(entry) => entry.sender.send(event).is_ok(),
                None => return false,
            }
        };
        if !delivered {
            self.prune(&[connection_id]).await;
        }
        delivered
    }

    /// 投递给房间内除 `except` 之外的所有连接，返回成功投递的连接数。
    ///
    /// 尽力而为：不在房间内的参与者收不到，之后通过历史接口补齐。
    pub async fn emit_to_room(
        &self,
        conversation_id: ConversationId,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let state = self.state.read().await;
            let Some(members) = state.rooms.get(&conversation_id) else {
                return 0;
            };
            for connection_id in members.iter().filter(|id| Some(**id) != except) {
                let Some(entry) = state.connections.get(connection_id) else {
                    continue;
                };
                if entry.sender.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*connection_id);
                }
            }
        }
        if !dead.is_empty() {
            self.prune(&dead).await;
        }
        delivered
    }

    async fn prune(&self, connection_ids: &[ConnectionId]) {
        let mut state = self.state.write().await;
        for connection_id in connection_ids {
            if state.detach(*connection_id).is_some() {
                tracing::debug!(connection_id = %connection_id, "pruned closed connection");
            }
        }
    }
}
