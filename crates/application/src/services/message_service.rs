use std::sync::Arc;

use domain::{
    ClientMessageId, Conversation, ConversationId, DomainError, Message, MessageId, MessageText,
    ParticipantPair, UserId,
};

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{AppendOutcome, ConversationRepository, MessageRepository},
    services::ConversationService,
};

pub struct MessageServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub conversation_service: Arc<ConversationService>,
    pub clock: Arc<dyn Clock>,
    pub max_message_length: usize,
}

#[derive(Debug, Clone)]
pub struct AppendMessageRequest {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub client_message_id: Option<ClientMessageId>,
}

/// 按参与者对发送，发送者必须是已校验的身份
#[derive(Debug, Clone)]
pub struct SendDirectMessageRequest {
    pub sender_id: UserId,
    pub receiver_id: String,
    pub text: String,
    pub client_message_id: Option<ClientMessageId>,
    /// 客户端认为消息所属的会话；与解析结果不一致时拒绝
    pub expected_conversation: Option<ConversationId>,
}

/// 消息日志：会话内按时间排序、只追加的消息序列
pub struct MessageService {
    deps: MessageServiceDependencies,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn append_message(
        &self,
        request: AppendMessageRequest,
    ) -> Result<AppendOutcome, ApplicationError> {
        let text = self.validate_text(request.text)?;
        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(request.conversation_id)
            .await?
            .ok_or_else(|| DomainError::not_found("conversation"))?;

        self.persist(
            &conversation,
            request.sender_id,
            request.receiver_id,
            text,
            request.client_message_id,
        )
        .await
    }

    /// 按时间戳升序返回会话内全部消息；无游标状态，可重复调用
    pub async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, ApplicationError> {
        Ok(self
            .deps
            .message_repository
            .list_by_conversation(conversation_id)
            .await?)
    }

    /// 解析（或创建）发送者与接收者之间的会话后追加消息。
    ///
    /// 校验失败时不会创建会话，也不会写入任何消息。
    pub async fn send_direct(
        &self,
        request: SendDirectMessageRequest,
    ) -> Result<AppendOutcome, ApplicationError> {
        let text = self.validate_text(request.text)?;
        let receiver_id = UserId::parse(request.receiver_id)?;

        let resolved = self
            .deps
            .conversation_service
            .resolve(&request.sender_id, &receiver_id)
            .await?;

        if let Some(expected) = request.expected_conversation {
            if expected != resolved.conversation.id {
                return Err(DomainError::ParticipantMismatch.into());
            }
        }

        self.persist(
            &resolved.conversation,
            request.sender_id,
            receiver_id,
            text,
            request.client_message_id,
        )
        .await
    }

    /// 将调用者与 `other_user_id` 之间会话里发给调用者的消息标记为已读
    pub async fn mark_read(
        &self,
        reader: &UserId,
        other_user_id: &str,
    ) -> Result<u64, ApplicationError> {
        let other = UserId::parse(other_user_id)?;
        let participants = ParticipantPair::new(reader.clone(), other)?;
        let conversation = self
            .deps
            .conversation_repository
            .find_by_participants(&participants)
            .await?
            .ok_or_else(|| DomainError::not_found("conversation"))?;

        let updated = self
            .deps
            .message_repository
            .mark_read(conversation.id, reader)
            .await?;
        tracing::debug!(conversation_id = %conversation.id, reader = %reader, updated, "messages marked read");
        Ok(updated)
    }

    fn validate_text(&self, text: String) -> Result<MessageText, ApplicationError> {
        Ok(MessageText::with_limit(text, self.deps.max_message_length)?)
    }

    async fn persist(
        &self,
        conversation: &Conversation,
        sender_id: UserId,
        receiver_id: UserId,
        text: MessageText,
        client_message_id: Option<ClientMessageId>,
    ) -> Result<AppendOutcome, ApplicationError> {
        let message = Message::new(
            MessageId::new(),
            conversation,
            sender_id,
            receiver_id,
            text,
            self.deps.clock.now(),
            client_message_id,
        )?;

        let outcome = self.deps.message_repository.append(message).await.map_err(|err| {
            tracing::error!(conversation_id = %conversation.id, error = %err, "failed to persist message");
            ApplicationError::from(err)
        })?;

        match &outcome {
            AppendOutcome::Created(message) => tracing::info!(
                conversation_id = %message.conversation_id,
                message_id = %message.id,
                sender_id = %message.sender_id,
                "message persisted"
            ),
            AppendOutcome::Duplicate(message) => tracing::info!(
                conversation_id = %message.conversation_id,
                message_id = %message.id,
                "duplicate send resolved to existing message"
            ),
        }

        Ok(outcome)
    }
}
