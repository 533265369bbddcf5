//! 内存存储实现
//!
//! 单进程部署和测试使用。所有写操作在同一把写锁内完成，
//! 因此 find-or-create 与“写消息 + 移动 last_message”天然原子。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    ClientMessageId, Conversation, ConversationId, Message, MessageId, ParticipantPair,
    RepositoryError, User, UserId,
};
use tokio::sync::RwLock;

use crate::repository::{AppendOutcome, ConversationRepository, MessageRepository, UserRepository};

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<ConversationId, Conversation>,
    by_pair: HashMap<ParticipantPair, ConversationId>,
    // 按写入顺序保存，时间戳相同的消息以此为序
    messages: Vec<Message>,
    message_index: HashMap<MessageId, usize>,
    client_keys: HashMap<(UserId, ClientMessageId), MessageId>,
    users: BTreeMap<UserId, User>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn conversation_count(&self) -> usize {
        self.state.read().await.conversations.len()
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn find_or_create(
        &self,
        candidate: Conversation,
    ) -> Result<(Conversation, bool), RepositoryError> {
        let mut state = self.state.write().await;

        if let Some(id) = state.by_pair.get(&candidate.participants) {
            let existing = state
                .conversations
                .get(id)
                .cloned()
                .ok_or_else(|| RepositoryError::storage("pair index points to missing conversation"))?;
            return Ok((existing, false));
        }

        state
            .by_pair
            .insert(candidate.participants.clone(), candidate.id);
        state.conversations.insert(candidate.id, candidate.clone());
        Ok((candidate, true))
    }

    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.state.read().await.conversations.get(&id).cloned())
    }

    async fn find_by_participants(
        &self,
        participants: &ParticipantPair,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .by_pair
            .get(participants)
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Conversation>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .filter(|conversation| conversation.participants.contains(user_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn append(&self, message: Message) -> Result<AppendOutcome, RepositoryError> {
        let mut state = self.state.write().await;

        if let Some(key) = message.client_message_id {
            if let Some(existing_id) = state.client_keys.get(&(message.sender_id.clone(), key)) {
                let index = state.message_index[existing_id];
                return Ok(AppendOutcome::Duplicate(state.messages[index].clone()));
            }
        }

        let conversation = state
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.record_message(message.id, message.timestamp);

        let index = state.messages.len();
        state.message_index.insert(message.id, index);
        if let Some(key) = message.client_message_id {
            state
                .client_keys
                .insert((message.sender_id.clone(), key), message.id);
        }
        state.messages.push(message.clone());

        Ok(AppendOutcome::Created(message))
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .message_index
            .get(&id)
            .map(|index| state.messages[*index].clone()))
    }

    async fn find_many(&self, ids: &[MessageId]) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.message_index.get(id))
            .map(|index| state.messages[*index].clone())
            .collect())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        let mut items: Vec<Message> = state
            .messages
            .iter()
            .filter(|message| message.conversation_id == conversation_id)
            .cloned()
            .collect();
        // 稳定排序，时间戳相同保持写入顺序
        items.sort_by_key(|message| message.timestamp);
        Ok(items)
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: &UserId,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for message in state.messages.iter_mut().filter(|message| {
            message.conversation_id == conversation_id && &message.receiver_id == reader
        }) {
            if !message.read {
                message.mark_read();
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn upsert(&self, user: User) -> Result<User, RepositoryError> {
        let mut state = self.state.write().await;
        let stored = match state.users.get(&user.id) {
            Some(existing) => User {
                created_at: existing.created_at,
                ..user
            },
            None => user,
        };
        state.users.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.users.get(id)).cloned().collect())
    }

    async fn list_except(&self, id: &UserId) -> Result<Vec<User>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .filter(|user| &user.id != id)
            .cloned()
            .collect())
    }
}
