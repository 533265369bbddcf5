//! 实时投递通道
//!
//! 每个连接对应一个 [`RealtimeSession`]。握手时校验一次凭证，
//! 之后每次 `sendMessage` 都会用同一凭证重新校验。

use std::sync::Arc;

use domain::{
    ClientEvent, ConversationId, DomainError, JoinErrorPayload, Message, MessageErrorPayload,
    SendMessagePayload, ServerEvent, UserId,
};
use tokio::sync::mpsc;

use crate::{
    error::ApplicationError,
    hub::{ConnectionHub, ConnectionId},
    identity::IdentityVerifier,
    repository::AppendOutcome,
    services::{ConversationService, MessageService, SendDirectMessageRequest},
};

#[derive(Debug, Clone)]
pub struct RealtimeSession {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    token: String,
}

/// 已通过校验、尚未注册的握手
#[derive(Debug, Clone)]
pub struct RealtimeHandshake {
    pub user_id: UserId,
    token: String,
}

pub struct RealtimeService {
    hub: Arc<ConnectionHub>,
    verifier: Arc<dyn IdentityVerifier>,
    conversations: Arc<ConversationService>,
    messages: Arc<MessageService>,
}

impl RealtimeService {
    pub fn new(
        hub: Arc<ConnectionHub>,
        verifier: Arc<dyn IdentityVerifier>,
        conversations: Arc<ConversationService>,
        messages: Arc<MessageService>,
    ) -> Self {
        Self {
            hub,
            verifier,
            conversations,
            messages,
        }
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// 校验握手凭证，不在连接表中留下任何状态
    pub async fn authenticate(&self, token: &str) -> Result<RealtimeHandshake, ApplicationError> {
        let identity = self.verifier.verify(token).await?;
        Ok(RealtimeHandshake {
            user_id: identity.user_id,
            token: token.to_owned(),
        })
    }

    /// 连接真正建立后再注册，之后必须配对调用 [`RealtimeService::disconnect`]
    pub async fn attach(
        &self,
        handshake: RealtimeHandshake,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> RealtimeSession {
        let connection_id = self.hub.register(handshake.user_id.clone(), sender).await;
        tracing::info!(connection_id = %connection_id, user_id = %handshake.user_id, "realtime connection opened");

        RealtimeSession {
            connection_id,
            user_id: handshake.user_id,
            token: handshake.token,
        }
    }

    pub async fn connect(
        &self,
        token: &str,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<RealtimeSession, ApplicationError> {
        let handshake = self.authenticate(token).await?;
        Ok(self.attach(handshake, sender).await)
    }

    pub async fn handle_event(&self, session: &RealtimeSession, event: ClientEvent) {
        match event {
            ClientEvent::JoinConversation(conversation_id) => self.join(session, conversation_id).await,
            ClientEvent::LeaveConversation(conversation_id) => {
                self.hub.leave(session.connection_id, conversation_id).await;
                tracing::debug!(connection_id = %session.connection_id, conversation_id = %conversation_id, "left conversation room");
            }
            ClientEvent::SendMessage(payload) => self.send(session, payload).await,
        }
    }

    /// 只有会话参与者可以加入房间；拒绝时回发 `joinError`
    pub async fn join(&self, session: &RealtimeSession, conversation_id: ConversationId) {
        let refusal = match self.conversations.find_by_id(conversation_id).await {
            Ok(conversation) if conversation.participants.contains(&session.user_id) => None,
            Ok(_) => Some(DomainError::invalid_participants("not a participant of this conversation").to_string()),
            Err(err) => Some(err.to_string()),
        };

        match refusal {
            None => {
                self.hub.join(session.connection_id, conversation_id).await;
                tracing::debug!(connection_id = %session.connection_id, conversation_id = %conversation_id, "joined conversation room");
            }
            Some(error) => {
                tracing::warn!(connection_id = %session.connection_id, conversation_id = %conversation_id, error = %error, "join refused");
                self.hub
                    .emit_to_connection(
                        session.connection_id,
                        ServerEvent::JoinError(JoinErrorPayload {
                            conversation_id,
                            error,
                        }),
                    )
                    .await;
            }
        }
    }

    /// 处理一次发送：校验凭证、解析会话、追加消息，然后扇出与回执。
    ///
    /// 任一步失败都会向发送连接回发携带原始载荷的 `messageError`。
    pub async fn send(&self, session: &RealtimeSession, payload: SendMessagePayload) {
        match self.persist(session, &payload).await {
            Ok(outcome) => {
                let created = outcome.is_created();
                let message = outcome.into_message();
                if created {
                    self.hub
                        .emit_to_room(
                            message.conversation_id,
                            &ServerEvent::NewMessage(message.clone()),
                            Some(session.connection_id),
                        )
                        .await;
                }
                self.hub
                    .emit_to_connection(session.connection_id, ServerEvent::MessageDelivered(message))
                    .await;
            }
            Err(err) => {
                tracing::warn!(
                    connection_id = %session.connection_id,
                    sender_id = %payload.sender_id,
                    code = err.code(),
                    error = %err,
                    "realtime send failed"
                );
                self.hub
                    .emit_to_connection(
                        session.connection_id,
                        ServerEvent::MessageError(MessageErrorPayload {
                            error: err.to_string(),
                            code: err.code().to_owned(),
                            original_message: payload,
                        }),
                    )
                    .await;
            }
        }
    }

    /// HTTP 路径新写入的消息同样推送给房间内所有连接
    pub async fn publish(&self, message: &Message) -> usize {
        self.hub
            .emit_to_room(
                message.conversation_id,
                &ServerEvent::NewMessage(message.clone()),
                None,
            )
            .await
    }

    pub async fn disconnect(&self, session: &RealtimeSession) {
        self.hub.unregister(session.connection_id).await;
        tracing::info!(connection_id = %session.connection_id, user_id = %session.user_id, "realtime connection closed");
    }

    async fn persist(
        &self,
        session: &RealtimeSession,
        payload: &SendMessagePayload,
    ) -> Result<AppendOutcome, ApplicationError> {
        let identity = self.verifier.verify(&session.token).await?;
        let claimed = UserId::parse(payload.sender_id.clone())?;
        if identity.user_id != claimed {
            return Err(DomainError::UnauthorizedSender.into());
        }

        self.messages
            .send_direct(SendDirectMessageRequest {
                sender_id: identity.user_id,
                receiver_id: payload.receiver_id.clone(),
                text: payload.text.clone(),
                client_message_id: payload.client_message_id,
                expected_conversation: payload.conversation_id,
            })
            .await
    }
}
