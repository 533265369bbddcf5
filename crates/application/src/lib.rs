//! 应用层实现。
//!
//! 围绕领域模型的用例服务：会话解析、消息日志、实时投递通道，
//! 以及对外部适配器（身份校验、存储）的抽象。

pub mod clock;
pub mod dto;
pub mod error;
pub mod hub;
pub mod identity;
pub mod memory;
pub mod realtime;
pub mod repository;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use dto::{ConversationView, ConversationWithMessages, ParticipantView, StartConversationResponse};
pub use error::ApplicationError;
pub use hub::{ConnectionHub, ConnectionId};
pub use identity::{IdentityError, IdentityVerifier, VerifiedIdentity};
pub use memory::MemoryStore;
pub use realtime::{RealtimeHandshake, RealtimeService, RealtimeSession};
pub use repository::{AppendOutcome, ConversationRepository, MessageRepository, UserRepository};
pub use services::{
    ConversationService, ConversationServiceDependencies, MessageService,
    MessageServiceDependencies, ResolvedConversation, SendDirectMessageRequest, UserService,
};
