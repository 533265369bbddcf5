//! 校园集市私信系统核心领域模型
//!
//! 包含会话、消息、用户等核心实体，以及实时通道的事件定义。

pub mod conversation;
pub mod errors;
pub mod events;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::{Conversation, ParticipantPair};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use events::{
    ClientEvent, JoinErrorPayload, MessageErrorPayload, SendMessagePayload, ServerEvent,
};
pub use message::Message;
pub use user::User;
pub use value_objects::{
    ClientMessageId, ConversationId, MessageId, MessageText, Timestamp, UserId,
};
