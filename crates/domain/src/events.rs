//! 实时通道事件定义
//!
//! 所有帧都是 `{ "event": <名称>, "data": <载荷> }` 形式的 JSON 文本帧。

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::value_objects::{ClientMessageId, ConversationId};

/// 客户端发往服务器的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// 加入会话房间，幂等
    JoinConversation(ConversationId),
    /// 离开会话房间
    LeaveConversation(ConversationId),
    /// 发送消息
    SendMessage(SendMessagePayload),
}

/// `sendMessage` 的原始载荷。
///
/// 标识符保持客户端提交的原样字符串，出错时整个载荷会原封不动地回传。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<ClientMessageId>,
}

/// 服务器发往客户端的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// 房间内其他连接收到的新消息
    NewMessage(Message),
    /// 发送者收到的投递确认，携带服务端分配的 id 和时间戳
    MessageDelivered(Message),
    /// 发送失败，携带未持久化的原始载荷
    MessageError(MessageErrorPayload),
    /// 加入房间被拒绝
    JoinError(JoinErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageErrorPayload {
    pub error: String,
    pub code: String,
    pub original_message: SendMessagePayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinErrorPayload {
    pub conversation_id: ConversationId,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn client_events_use_socket_event_names() {
        let id = ConversationId::new();
        let join: ClientEvent =
            serde_json::from_value(json!({"event": "joinConversation", "data": id.to_string()}))
                .unwrap();
        assert_eq!(join, ClientEvent::JoinConversation(id));

        let send: ClientEvent = serde_json::from_value(json!({
            "event": "sendMessage",
            "data": {"conversationId": id.to_string(), "senderId": "u1", "receiverId": "u2", "text": "hello"}
        }))
        .unwrap();
        match send {
            ClientEvent::SendMessage(payload) => {
                assert_eq!(payload.conversation_id, Some(id));
                assert_eq!(payload.sender_id, "u1");
                assert_eq!(payload.client_message_id, None);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn message_error_carries_original_payload() {
        let payload = SendMessagePayload {
            conversation_id: None,
            sender_id: "u1".into(),
            receiver_id: "u2".into(),
            text: "hi".into(),
            client_message_id: Some(ClientMessageId::new()),
        };
        let event = ServerEvent::MessageError(MessageErrorPayload {
            error: "credential does not match the claimed sender".into(),
            code: "UNAUTHORIZED_SENDER".into(),
            original_message: payload.clone(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "messageError");
        assert_eq!(json["data"]["originalMessage"]["senderId"], "u1");

        let back: ServerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
