use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    Conversation, ConversationId, DomainError, Message, MessageId, MessageText, ParticipantPair,
    UserId,
};

use crate::{
    clock::Clock,
    dto::{ConversationView, ConversationWithMessages, ParticipantView, StartConversationResponse},
    error::ApplicationError,
    identity::VerifiedIdentity,
    repository::{ConversationRepository, MessageRepository, UserRepository},
};

pub struct ConversationServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub clock: Arc<dyn Clock>,
    /// 配置后，新建会话时由发起方自动写入一条欢迎消息
    pub welcome_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConversation {
    pub conversation: Conversation,
    pub created: bool,
}

/// 会话解析器：保证任意两位用户之间至多一条会话
pub struct ConversationService {
    deps: ConversationServiceDependencies,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        Self { deps }
    }

    /// 查找或创建 `{user_a, user_b}` 的会话。
    ///
    /// 唯一性由存储层在规范化参与者对上保证，并发调用同一对用户只会得到同一个 id。
    pub async fn resolve(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<ResolvedConversation, ApplicationError> {
        let participants = ParticipantPair::new(user_a.clone(), user_b.clone())?;
        self.ensure_known_users(&participants).await?;

        let candidate = Conversation::new(ConversationId::new(), participants, self.deps.clock.now());
        let (mut conversation, created) = self
            .deps
            .conversation_repository
            .find_or_create(candidate)
            .await?;

        if created {
            tracing::info!(
                conversation_id = %conversation.id,
                initiator = %user_a,
                "conversation created"
            );
            if let Some(message) = self.append_welcome(&conversation, user_a).await {
                conversation.record_message(message.id, message.timestamp);
            }
        }

        Ok(ResolvedConversation {
            conversation,
            created,
        })
    }

    pub async fn find_by_id(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Conversation, ApplicationError> {
        self.deps
            .conversation_repository
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| DomainError::not_found("conversation").into())
    }

    /// `POST /messages/start-conversation`
    pub async fn start_conversation(
        &self,
        caller: &VerifiedIdentity,
        other_user_id: Option<String>,
    ) -> Result<StartConversationResponse, ApplicationError> {
        let other = other_user_id
            .ok_or_else(|| DomainError::invalid_participants("other user id is required"))?;
        let other = UserId::parse(other)?;

        let resolved = self.resolve(&caller.user_id, &other).await?;
        let last_message = self.load_last_message(&resolved.conversation).await?;

        Ok(StartConversationResponse {
            conversation_id: resolved.conversation.id,
            participants: resolved.conversation.participants.clone(),
            last_message,
        })
    }

    /// `GET /messages/conversation/:userId`，不存在时创建
    pub async fn conversation_with(
        &self,
        caller: &VerifiedIdentity,
        other_user_id: &str,
    ) -> Result<ConversationWithMessages, ApplicationError> {
        let other = UserId::parse(other_user_id)?;
        let resolved = self.resolve(&caller.user_id, &other).await?;

        let messages = self
            .deps
            .message_repository
            .list_by_conversation(resolved.conversation.id)
            .await?;
        let mut views = self.build_views(vec![resolved.conversation]).await?;
        let conversation = views
            .pop()
            .ok_or_else(|| DomainError::not_found("conversation"))?;

        Ok(ConversationWithMessages {
            conversation,
            messages,
        })
    }

    /// 调用者的会话列表，按最后一条消息时间倒序，没有消息的排在最后
    pub async fn list_conversations(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationView>, ApplicationError> {
        let conversations = self
            .deps
            .conversation_repository
            .list_for_user(user_id)
            .await?;
        let mut views = self.build_views(conversations).await?;
        sort_by_recency(&mut views);
        Ok(views)
    }

    async fn ensure_known_users(&self, participants: &ParticipantPair) -> Result<(), ApplicationError> {
        let ids: Vec<UserId> = participants.members().into_iter().cloned().collect();
        let found = self.deps.user_repository.find_many(&ids).await?;

        for id in &ids {
            if !found.iter().any(|user| &user.id == id) {
                return Err(
                    DomainError::invalid_participants(format!("unknown user {}", id)).into(),
                );
            }
        }
        Ok(())
    }

    async fn append_welcome(&self, conversation: &Conversation, initiator: &UserId) -> Option<Message> {
        let text = self.deps.welcome_message.as_ref()?;
        let receiver = conversation.participants.other(initiator)?.clone();

        let message = MessageText::new(text.clone())
            .and_then(|text| {
                Message::new(
                    MessageId::new(),
                    conversation,
                    initiator.clone(),
                    receiver,
                    text,
                    self.deps.clock.now(),
                    None,
                )
            })
            .map_err(|err| tracing::warn!(error = %err, "invalid welcome message configured"))
            .ok()?;

        match self.deps.message_repository.append(message).await {
            Ok(outcome) => Some(outcome.into_message()),
            Err(err) => {
                tracing::warn!(
                    conversation_id = %conversation.id,
                    error = %err,
                    "failed to append welcome message"
                );
                None
            }
        }
    }

    async fn load_last_message(
        &self,
        conversation: &Conversation,
    ) -> Result<Option<Message>, ApplicationError> {
        match conversation.last_message {
            Some(id) => Ok(self.deps.message_repository.find_by_id(id).await?),
            None => Ok(None),
        }
    }

    async fn build_views(
        &self,
        conversations: Vec<Conversation>,
    ) -> Result<Vec<ConversationView>, ApplicationError> {
        let message_ids: Vec<MessageId> = conversations
            .iter()
            .filter_map(|conversation| conversation.last_message)
            .collect();
        let messages: HashMap<MessageId, Message> = self
            .deps
            .message_repository
            .find_many(&message_ids)
            .await?
            .into_iter()
            .map(|message| (message.id, message))
            .collect();

        let mut user_ids: Vec<UserId> = conversations
            .iter()
            .flat_map(|conversation| conversation.participants.members())
            .cloned()
            .collect();
        user_ids.sort();
        user_ids.dedup();
        let usernames: HashMap<UserId, String> = self
            .deps
            .user_repository
            .find_many(&user_ids)
            .await?
            .into_iter()
            .map(|user| (user.id, user.username))
            .collect();

        Ok(conversations
            .into_iter()
            .map(|conversation| ConversationView {
                id: conversation.id,
                participants: conversation
                    .participants
                    .members()
                    .into_iter()
                    .map(|id| ParticipantView {
                        id: id.clone(),
                        username: usernames.get(id).cloned(),
                    })
                    .collect(),
                last_message: conversation
                    .last_message
                    .and_then(|id| messages.get(&id).cloned()),
                created_at: conversation.created_at,
                updated_at: conversation.updated_at,
            })
            .collect())
    }
}

fn sort_by_recency(views: &mut [ConversationView]) {
    views.sort_by(|a, b| {
        let a_time = a.last_message.as_ref().map(|message| message.timestamp);
        let b_time = b.last_message.as_ref().map(|message| message.timestamp);
        // Option 中 None < Some，倒序后没有消息的自然排在最后
        b_time
            .cmp(&a_time)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
}
