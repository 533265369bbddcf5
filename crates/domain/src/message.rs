use serde::{Deserialize, Serialize};

use crate::conversation::Conversation;
use crate::errors::DomainError;
use crate::value_objects::{
    ClientMessageId, ConversationId, MessageId, MessageText, Timestamp, UserId,
};

/// 会话中的一条私信。创建后只有 `read` 可以修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: MessageText,
    pub timestamp: Timestamp,
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<ClientMessageId>,
}

impl Message {
    /// 构造新消息，要求 `{sender, receiver}` 恰好是会话的参与者集合
    pub fn new(
        id: MessageId,
        conversation: &Conversation,
        sender_id: UserId,
        receiver_id: UserId,
        text: MessageText,
        timestamp: Timestamp,
        client_message_id: Option<ClientMessageId>,
    ) -> Result<Self, DomainError> {
        if !conversation.participants.matches(&sender_id, &receiver_id) {
            return Err(DomainError::ParticipantMismatch);
        }
        Ok(Self {
            id,
            conversation_id: conversation.id,
            sender_id,
            receiver_id,
            text,
            timestamp,
            read: false,
            client_message_id,
        })
    }

    pub fn mark_read(&mut self) {
        self.read = true;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::conversation::ParticipantPair;
    use crate::value_objects::ConversationId;

    fn uid(value: &str) -> UserId {
        UserId::parse(value).unwrap()
    }

    fn conversation() -> Conversation {
        let pair = ParticipantPair::new(uid("u1"), uid("u2")).unwrap();
        Conversation::new(ConversationId::new(), pair, Utc::now())
    }

    #[test]
    fn new_message_requires_matching_participants() {
        let conversation = conversation();
        let text = MessageText::new("hello").unwrap();

        let ok = Message::new(
            MessageId::new(),
            &conversation,
            uid("u2"),
            uid("u1"),
            text.clone(),
            Utc::now(),
            None,
        )
        .unwrap();
        assert_eq!(ok.conversation_id, conversation.id);
        assert!(!ok.read);

        let err = Message::new(
            MessageId::new(),
            &conversation,
            uid("u1"),
            uid("u3"),
            text,
            Utc::now(),
            None,
        )
        .unwrap_err();
        assert_eq!(err, DomainError::ParticipantMismatch);
    }

    #[test]
    fn message_uses_camel_case_on_the_wire() {
        let conversation = conversation();
        let message = Message::new(
            MessageId::new(),
            &conversation,
            uid("u1"),
            uid("u2"),
            MessageText::new("hello").unwrap(),
            Utc::now(),
            Some(ClientMessageId::new()),
        )
        .unwrap();

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["senderId"], "u1");
        assert_eq!(json["receiverId"], "u2");
        assert_eq!(json["text"], "hello");
        assert_eq!(json["read"], false);
        assert!(json["clientMessageId"].is_string());
    }
}
