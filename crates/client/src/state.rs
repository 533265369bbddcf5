//! 客户端会话状态
//!
//! 同一次发送可能经由多条路径回到客户端（`messageDelivered`、房间推送、
//! HTTP 重试响应）。这里把它们合并成一份一致的视图：
//!
//! - 本地发起的消息先以 `Pending` 条目出现，键为客户端生成的 [`ClientMessageId`]；
//! - 收到携带同一键或同一服务端 id 的消息后提升为 `Confirmed`，之后按服务端 id 去重；
//! - 收到 `messageError` 或超时则移出可见历史，记入失败列表。

use std::collections::HashMap;

use chrono::Duration;
use domain::{
    ClientMessageId, ConversationId, Message, MessageErrorPayload, MessageId, SendMessagePayload,
    ServerEvent, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Confirmed,
    Failed,
}

/// 可见历史中的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// 本地发起的消息才有
    pub local_id: Option<ClientMessageId>,
    pub server_id: Option<MessageId>,
    pub conversation_id: Option<ConversationId>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub timestamp: Timestamp,
    pub read: bool,
    pub status: EntryStatus,
}

impl ChatEntry {
    fn confirmed(message: Message) -> Self {
        Self {
            local_id: message.client_message_id,
            server_id: Some(message.id),
            conversation_id: Some(message.conversation_id),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            text: message.text.as_str().to_owned(),
            timestamp: message.timestamp,
            read: message.read,
            status: EntryStatus::Confirmed,
        }
    }

    fn promote(&mut self, message: Message) {
        self.server_id = Some(message.id);
        self.conversation_id = Some(message.conversation_id);
        self.timestamp = message.timestamp;
        self.read = message.read;
        self.status = EntryStatus::Confirmed;
    }
}

/// 被回滚的发送，`entry.status` 为 `Failed`，供界面恢复编辑状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub entry: ChatEntry,
    pub error: String,
    pub code: Option<String>,
}

impl SendFailure {
    fn new(mut entry: ChatEntry, error: impl Into<String>, code: Option<String>) -> Self {
        entry.status = EntryStatus::Failed;
        Self {
            entry,
            error: error.into(),
            code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
}

/// 会话列表项，与 `GET /conversations` 的返回结构一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub participants: Vec<ParticipantSummary>,
    #[serde(default)]
    pub last_message: Option<Message>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ConversationSummary {
    fn from_message(message: &Message) -> Self {
        Self {
            id: message.conversation_id,
            participants: [&message.sender_id, &message.receiver_id]
                .into_iter()
                .map(|id| ParticipantSummary {
                    id: id.clone(),
                    username: None,
                })
                .collect(),
            last_message: Some(message.clone()),
            created_at: message.timestamp,
            updated_at: message.timestamp,
        }
    }

    fn last_activity(&self) -> Option<Timestamp> {
        self.last_message.as_ref().map(|message| message.timestamp)
    }
}

pub struct ConversationState {
    me: UserId,
    /// 按对方用户分组的可见历史，按时间升序
    threads: HashMap<UserId, Vec<ChatEntry>>,
    conversations: HashMap<ConversationId, ConversationSummary>,
    failures: Vec<SendFailure>,
    /// 启发式匹配的时间窗口，仅用于没有幂等键的消息
    match_window: Duration,
}

impl ConversationState {
    pub fn new(me: UserId) -> Self {
        Self::with_match_window(me, Duration::seconds(10))
    }

    pub fn with_match_window(me: UserId, match_window: Duration) -> Self {
        Self {
            me,
            threads: HashMap::new(),
            conversations: HashMap::new(),
            failures: Vec::new(),
            match_window,
        }
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    /// 乐观写入一条 `Pending` 消息，返回要发给服务器的载荷
    pub fn begin_send(
        &mut self,
        receiver_id: UserId,
        text: impl Into<String>,
        conversation_id: Option<ConversationId>,
        now: Timestamp,
    ) -> SendMessagePayload {
        let local_id = ClientMessageId::new();
        let text = text.into();

        let entry = ChatEntry {
            local_id: Some(local_id),
            server_id: None,
            conversation_id,
            sender_id: self.me.clone(),
            receiver_id: receiver_id.clone(),
            text: text.clone(),
            timestamp: now,
            read: false,
            status: EntryStatus::Pending,
        };
        self.insert_sorted(receiver_id.clone(), entry);

        SendMessagePayload {
            conversation_id,
            sender_id: self.me.to_string(),
            receiver_id: receiver_id.to_string(),
            text,
            client_message_id: Some(local_id),
        }
    }

    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(message) | ServerEvent::MessageDelivered(message) => {
                self.reconcile(message)
            }
            ServerEvent::MessageError(payload) => self.fail(payload),
            ServerEvent::JoinError(payload) => {
                tracing::warn!(conversation_id = %payload.conversation_id, error = %payload.error, "join refused");
            }
        }
    }

    /// 合并一条权威消息：已知服务端 id 去重，其次按幂等键提升，没有幂等键时才用启发式匹配
    pub fn reconcile(&mut self, message: Message) {
        let Some(peer) = self.peer_of(&message) else {
            tracing::debug!(message_id = %message.id, "ignoring message for another user");
            return;
        };
        self.touch_conversation(&message);

        // 超时回滚后服务端其实已经成功：撤销失败记录
        if let Some(key) = message.client_message_id {
            self.failures
                .retain(|failure| failure.entry.local_id != Some(key));
        }

        let thread = self.threads.entry(peer.clone()).or_default();
        if let Some(entry) = thread
            .iter_mut()
            .find(|entry| entry.server_id == Some(message.id))
        {
            entry.read = entry.read || message.read;
            return;
        }

        // 带幂等键的消息只按键匹配；键不对应任何本地条目时按新消息处理
        let index = match message.client_message_id {
            Some(key) => thread
                .iter()
                .position(|entry| entry.server_id.is_none() && entry.local_id == Some(key)),
            None => {
                let window = self.match_window;
                thread.iter().position(|entry| {
                    entry.status == EntryStatus::Pending
                        && entry.server_id.is_none()
                        && entry.sender_id == message.sender_id
                        && entry.receiver_id == message.receiver_id
                        && entry.text == message.text.as_str()
                        && (entry.timestamp - message.timestamp).abs() <= window
                })
            }
        };

        match index {
            Some(index) => {
                let mut entry = thread.remove(index);
                entry.promote(message);
                self.insert_sorted(peer, entry);
            }
            None => self.insert_sorted(peer, ChatEntry::confirmed(message)),
        }
    }

    /// 用服务端历史替换某个会话的已确认部分，保留尚未确认的本地条目
    pub fn load_history(&mut self, peer: &UserId, messages: Vec<Message>) {
        let pending: Vec<ChatEntry> = self
            .threads
            .remove(peer)
            .unwrap_or_default()
            .into_iter()
            .filter(|entry| entry.status == EntryStatus::Pending)
            .collect();

        for message in &messages {
            self.touch_conversation(message);
        }
        let thread: Vec<ChatEntry> = messages.into_iter().map(ChatEntry::confirmed).collect();
        self.threads.insert(peer.clone(), thread);

        for entry in pending {
            self.insert_sorted(peer.clone(), entry);
        }
        self.collapse_confirmed_pending(peer);
    }

    pub fn set_conversations(&mut self, summaries: Vec<ConversationSummary>) {
        self.conversations = summaries
            .into_iter()
            .map(|summary| (summary.id, summary))
            .collect();
    }

    /// 按最后一条消息时间倒序，没有消息的会话排在最后
    pub fn conversations(&self) -> Vec<&ConversationSummary> {
        let mut items: Vec<&ConversationSummary> = self.conversations.values().collect();
        items.sort_by(|a, b| {
            b.last_activity()
                .cmp(&a.last_activity())
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        items
    }

    pub fn history(&self, peer: &UserId) -> &[ChatEntry] {
        self.threads.get(peer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pending(&self) -> impl Iterator<Item = &ChatEntry> {
        self.threads
            .values()
            .flatten()
            .filter(|entry| entry.status == EntryStatus::Pending)
    }

    pub fn failures(&self) -> &[SendFailure] {
        &self.failures
    }

    pub fn take_failures(&mut self) -> Vec<SendFailure> {
        std::mem::take(&mut self.failures)
    }

    /// 超过 `timeout` 仍未确认的发送视为失败并回滚，返回本次回滚的条目
    pub fn expire_pending(&mut self, now: Timestamp, timeout: Duration) -> Vec<SendFailure> {
        let mut expired = Vec::new();
        for thread in self.threads.values_mut() {
            let (stale, kept): (Vec<ChatEntry>, Vec<ChatEntry>) =
                std::mem::take(thread).into_iter().partition(|entry| {
                    entry.status == EntryStatus::Pending && now - entry.timestamp > timeout
                });
            *thread = kept;
            expired.extend(
                stale
                    .into_iter()
                    .map(|entry| SendFailure::new(entry, "delivery acknowledgment timed out", None)),
            );
        }
        self.failures.extend(expired.iter().cloned());
        expired
    }

    fn fail(&mut self, payload: MessageErrorPayload) {
        let original = payload.original_message;
        tracing::warn!(code = %payload.code, error = %payload.error, "send rolled back");

        let removed = UserId::parse(original.receiver_id.clone())
            .ok()
            .and_then(|receiver| self.threads.get_mut(&receiver))
            .and_then(|thread| {
                let index = thread.iter().position(|entry| {
                    entry.status == EntryStatus::Pending
                        && match original.client_message_id {
                            Some(key) => entry.local_id == Some(key),
                            None => entry.text == original.text,
                        }
                })?;
                Some(thread.remove(index))
            });

        // 没有对应的本地条目时，按原始载荷重建一条用于展示
        let entry = match removed {
            Some(entry) => entry,
            None if original.client_message_id.is_some()
                && self
                    .failures
                    .iter()
                    .any(|failure| failure.entry.local_id == original.client_message_id) =>
            {
                tracing::debug!("send already recorded as failed");
                return;
            }
            None => ChatEntry {
                local_id: original.client_message_id,
                server_id: None,
                conversation_id: original.conversation_id,
                sender_id: self.me.clone(),
                receiver_id: UserId::parse(original.receiver_id).unwrap_or_else(|_| self.me.clone()),
                text: original.text,
                timestamp: chrono::Utc::now(),
                read: false,
                status: EntryStatus::Failed,
            },
        };
        self.failures
            .push(SendFailure::new(entry, payload.error, Some(payload.code)));
    }

    fn peer_of(&self, message: &Message) -> Option<UserId> {
        if message.sender_id == self.me {
            Some(message.receiver_id.clone())
        } else if message.receiver_id == self.me {
            Some(message.sender_id.clone())
        } else {
            None
        }
    }

    fn touch_conversation(&mut self, message: &Message) {
        let summary = self
            .conversations
            .entry(message.conversation_id)
            .or_insert_with(|| ConversationSummary::from_message(message));
        let newer = summary
            .last_activity()
            .map_or(true, |current| current <= message.timestamp);
        if newer {
            summary.last_message = Some(message.clone());
            summary.updated_at = message.timestamp;
        }
    }

    fn insert_sorted(&mut self, peer: UserId, entry: ChatEntry) {
        let thread = self.threads.entry(peer).or_default();
        // 时间戳相同的保持到达顺序
        let index = thread.partition_point(|existing| existing.timestamp <= entry.timestamp);
        thread.insert(index, entry);
    }

    /// 加载的历史里已经带有同一幂等键的消息时，丢弃对应的待确认条目
    fn collapse_confirmed_pending(&mut self, peer: &UserId) {
        let Some(thread) = self.threads.get_mut(peer) else {
            return;
        };
        let confirmed_keys: Vec<ClientMessageId> = thread
            .iter()
            .filter(|entry| entry.status == EntryStatus::Confirmed)
            .filter_map(|entry| entry.local_id)
            .collect();
        thread.retain(|entry| {
            entry.status != EntryStatus::Pending
                || entry
                    .local_id
                    .map_or(true, |key| !confirmed_keys.contains(&key))
        });
    }
}
