use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, Message, MessageId, ParticipantPair, RepositoryError, User,
    UserId,
};

/// 追加消息的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// 新写入的消息，会话的 last_message 已在同一原子操作内更新
    Created(Message),
    /// 同一发送者携带相同幂等键的重复提交，返回已持久化的那条
    Duplicate(Message),
}

impl AppendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            AppendOutcome::Created(message) | AppendOutcome::Duplicate(message) => message,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            AppendOutcome::Created(message) | AppendOutcome::Duplicate(message) => message,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, AppendOutcome::Created(_))
    }
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// 按规范化参与者对查找会话，不存在则写入 `candidate`。
    ///
    /// 必须在存储层保证同一参与者对只有一条记录；返回值的布尔位表示是否为本次新建。
    async fn find_or_create(
        &self,
        candidate: Conversation,
    ) -> Result<(Conversation, bool), RepositoryError>;

    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError>;

    async fn find_by_participants(
        &self,
        participants: &ParticipantPair,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Conversation>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 持久化消息并更新所属会话的 last_message / updated_at。
    ///
    /// 两步必须原子：读者不能看到指向尚未持久化消息的指针。
    async fn append(&self, message: Message) -> Result<AppendOutcome, RepositoryError>;

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    async fn find_many(&self, ids: &[MessageId]) -> Result<Vec<Message>, RepositoryError>;

    /// 按时间戳升序返回会话全部消息，时间戳相同时按写入顺序
    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// 把会话中接收者为 `reader` 的未读消息标记为已读，返回更新条数
    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: &UserId,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn upsert(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError>;
    async fn list_except(&self, id: &UserId) -> Result<Vec<User>, RepositoryError>;
}
