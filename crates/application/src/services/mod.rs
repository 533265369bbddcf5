pub mod conversation_service;
pub mod message_service;
pub mod user_service;

pub use conversation_service::{
    ConversationService, ConversationServiceDependencies, ResolvedConversation,
};
pub use message_service::{
    AppendMessageRequest, MessageService, MessageServiceDependencies, SendDirectMessageRequest,
};
pub use user_service::UserService;

#[cfg(test)]
mod tests;
