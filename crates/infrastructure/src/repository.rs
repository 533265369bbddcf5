use std::sync::Arc;

use application::repository::{
    AppendOutcome, ConversationRepository, MessageRepository, UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ClientMessageId, Conversation, ConversationId, Message, MessageId, MessageText,
    ParticipantPair, RepositoryError, User, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn parse_user_id(value: String) -> Result<UserId, RepositoryError> {
    UserId::parse(value).map_err(|err| invalid_data(err.to_string()))
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: String,
    username: String,
    email: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(User {
            id: parse_user_id(value.id)?,
            username: value.username,
            email: value.email,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    participant_low: String,
    participant_high: String,
    last_message_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = RepositoryError;

    fn try_from(value: ConversationRecord) -> Result<Self, Self::Error> {
        let participants = ParticipantPair::new(
            parse_user_id(value.participant_low)?,
            parse_user_id(value.participant_high)?,
        )
        .map_err(|err| invalid_data(err.to_string()))?;

        Ok(Conversation {
            id: ConversationId::from(value.id),
            participants,
            last_message: value.last_message_id.map(MessageId::from),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: String,
    receiver_id: String,
    text: String,
    created_at: DateTime<Utc>,
    read: bool,
    client_message_id: Option<Uuid>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        // 长度上限在写入时校验，读取时不再限制
        let text = MessageText::with_limit(value.text, usize::MAX)
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: parse_user_id(value.sender_id)?,
            receiver_id: parse_user_id(value.receiver_id)?,
            text,
            timestamp: value.created_at,
            read: value.read,
            client_message_id: value.client_message_id.map(ClientMessageId::from),
        })
    }
}

const CONVERSATION_COLUMNS: &str =
    "id, participant_low, participant_high, last_message_id, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, receiver_id, text, created_at, read, client_message_id";

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn find_or_create(
        &self,
        candidate: Conversation,
    ) -> Result<(Conversation, bool), RepositoryError> {
        // 并发插入同一参与者对时，唯一约束让后到者走 DO NOTHING 分支
        let inserted = sqlx::query_as::<_, ConversationRecord>(&format!(
            r#"
            INSERT INTO conversations (id, participant_low, participant_high, last_message_id, created_at, updated_at)
            VALUES ($1, $2, $3, NULL, $4, $4)
            ON CONFLICT (participant_low, participant_high) DO NOTHING
            RETURNING {CONVERSATION_COLUMNS}
            "#
        ))
        .bind(Uuid::from(candidate.id))
        .bind(candidate.participants.low().as_str())
        .bind(candidate.participants.high().as_str())
        .bind(candidate.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if let Some(record) = inserted {
            return Ok((Conversation::try_from(record)?, true));
        }

        let existing = self
            .find_by_participants(&candidate.participants)
            .await?
            .ok_or_else(|| invalid_data("conversation conflict without existing row"))?;
        Ok((existing, false))
    }

    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Conversation::try_from).transpose()
    }

    async fn find_by_participants(
        &self,
        participants: &ParticipantPair,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE participant_low = $1 AND participant_high = $2"
        ))
        .bind(participants.low().as_str())
        .bind(participants.high().as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Conversation::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Conversation>, RepositoryError> {
        let records = sqlx::query_as::<_, ConversationRecord>(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS} FROM conversations
            WHERE participant_low = $1 OR participant_high = $1
            ORDER BY updated_at DESC
            "#
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Conversation::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_client_key(
        tx: &mut Transaction<'_, Postgres>,
        sender_id: &UserId,
        key: ClientMessageId,
    ) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE sender_id = $1 AND client_message_id = $2"
        ))
        .bind(sender_id.as_str())
        .bind(Uuid::from(key))
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(&self, message: Message) -> Result<AppendOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 锁住会话行，同一会话的追加串行化
        let locked = sqlx::query_scalar::<_, Uuid>("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(Uuid::from(message.conversation_id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        if locked.is_none() {
            return Err(RepositoryError::NotFound);
        }

        if let Some(key) = message.client_message_id {
            if let Some(existing) = Self::find_by_client_key(&mut tx, &message.sender_id, key).await? {
                tx.commit().await.map_err(map_sqlx_err)?;
                return Ok(AppendOutcome::Duplicate(existing));
            }
        }

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, receiver_id, text, created_at, read, client_message_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(message.sender_id.as_str())
        .bind(message.receiver_id.as_str())
        .bind(message.text.as_str())
        .bind(message.timestamp)
        .bind(message.read)
        .bind(message.client_message_id.map(Uuid::from))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        // 只前移不后退：更早时间戳的消息不覆盖更新的指针
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_id = $2, updated_at = $3
            WHERE id = $1 AND (last_message_id IS NULL OR updated_at <= $3)
            "#,
        )
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.id))
        .bind(message.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(AppendOutcome::Created(Message::try_from(record)?))
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn find_many(&self, ids: &[MessageId]) -> Result<Vec<Message>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY created_at ASC, seq ASC"
        ))
        .bind(Uuid::from(conversation_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: &UserId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE messages SET read = TRUE WHERE conversation_id = $1 AND receiver_id = $2 AND read = FALSE",
        )
        .bind(Uuid::from(conversation_id))
        .bind(reader.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn upsert(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, username, email, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id)
            DO UPDATE SET username = EXCLUDED.username, email = EXCLUDED.email, updated_at = EXCLUDED.updated_at
            RETURNING id, username, email, created_at, updated_at
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.username)
        .bind(user.email.as_deref())
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, email, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_owned()).collect();
        let records = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, email, created_at, updated_at FROM users WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }

    async fn list_except(&self, id: &UserId) -> Result<Vec<User>, RepositoryError> {
        let records = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, email, created_at, updated_at FROM users WHERE id <> $1 ORDER BY username",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }
}

/// 同一连接池上的全部仓储
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub message_repository: Arc<PgMessageRepository>,
    pub user_repository: Arc<PgUserRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
