use std::sync::Arc;

use application::{
    Clock, ConnectionHub, ConversationRepository, ConversationService,
    ConversationServiceDependencies, IdentityVerifier, MessageRepository, MessageService,
    MessageServiceDependencies, RealtimeService, SystemClock, UserRepository, UserService,
};
use config::MessagingConfig;

use crate::JwtService;

/// 存储后端（PostgreSQL 或内存）提供的仓储集合
#[derive(Clone)]
pub struct Repositories {
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub users: Arc<dyn UserRepository>,
}

#[derive(Clone)]
pub struct AppState {
    pub conversation_service: Arc<ConversationService>,
    pub message_service: Arc<MessageService>,
    pub user_service: Arc<UserService>,
    pub realtime: Arc<RealtimeService>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    pub fn new(
        repositories: Repositories,
        jwt_service: Arc<JwtService>,
        messaging: &MessagingConfig,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let conversation_service = Arc::new(ConversationService::new(
            ConversationServiceDependencies {
                conversation_repository: repositories.conversations.clone(),
                message_repository: repositories.messages.clone(),
                user_repository: repositories.users.clone(),
                clock: clock.clone(),
                welcome_message: messaging.welcome_message.clone(),
            },
        ));
        let message_service = Arc::new(MessageService::new(MessageServiceDependencies {
            conversation_repository: repositories.conversations,
            message_repository: repositories.messages,
            conversation_service: conversation_service.clone(),
            clock: clock.clone(),
            max_message_length: messaging.max_message_length,
        }));
        let user_service = Arc::new(UserService::new(repositories.users, clock));
        let realtime = Arc::new(RealtimeService::new(
            Arc::new(ConnectionHub::new()),
            jwt_service.clone() as Arc<dyn IdentityVerifier>,
            conversation_service.clone(),
            message_service.clone(),
        ));

        Self {
            conversation_service,
            message_service,
            user_service,
            realtime,
            jwt_service,
        }
    }
}
