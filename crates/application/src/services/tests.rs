//! 应用层服务测试
//!
//! 全部基于内存存储，时钟每次调用前进一秒，保证排序可预测。

use std::sync::{Arc, Mutex};

use chrono::{Duration, TimeZone, Utc};
use domain::{ClientMessageId, DomainError, Timestamp, UserId};

use crate::{
    clock::Clock,
    error::ApplicationError,
    identity::VerifiedIdentity,
    memory::MemoryStore,
    repository::UserRepository,
    services::*,
};

struct StepClock(Mutex<Timestamp>);

impl StepClock {
    fn new() -> Self {
        Self(Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
    }
}

impl Clock for StepClock {
    fn now(&self) -> Timestamp {
        let mut current = self.0.lock().unwrap();
        *current += Duration::seconds(1);
        *current
    }
}

struct Fixture {
    store: MemoryStore,
    conversations: Arc<ConversationService>,
    messages: MessageService,
    users: UserService,
}

fn fixture_with(welcome_message: Option<&str>) -> Fixture {
    let store = MemoryStore::new();
    let clock: Arc<dyn Clock> = Arc::new(StepClock::new());
    let conversations = Arc::new(ConversationService::new(ConversationServiceDependencies {
        conversation_repository: Arc::new(store.clone()),
        message_repository: Arc::new(store.clone()),
        user_repository: Arc::new(store.clone()),
        clock: clock.clone(),
        welcome_message: welcome_message.map(str::to_owned),
    }));
    let messages = MessageService::new(MessageServiceDependencies {
        conversation_repository: Arc::new(store.clone()),
        message_repository: Arc::new(store.clone()),
        conversation_service: conversations.clone(),
        clock: clock.clone(),
        max_message_length: 20,
    });
    let users = UserService::new(Arc::new(store.clone()), clock);
    Fixture {
        store,
        conversations,
        messages,
        users,
    }
}

fn fixture() -> Fixture {
    fixture_with(None)
}

fn uid(value: &str) -> UserId {
    UserId::parse(value).unwrap()
}

fn identity(value: &str) -> VerifiedIdentity {
    VerifiedIdentity::new(uid(value))
}

async fn seed_users(fixture: &Fixture, ids: &[&str]) {
    for id in ids {
        fixture.users.sync_user(&identity(id)).await.unwrap();
    }
}

fn direct(sender: &str, receiver: &str, text: &str) -> SendDirectMessageRequest {
    SendDirectMessageRequest {
        sender_id: uid(sender),
        receiver_id: receiver.to_string(),
        text: text.to_string(),
        client_message_id: None,
        expected_conversation: None,
    }
}

#[tokio::test]
async fn resolve_is_order_independent() {
    let f = fixture();
    seed_users(&f, &["u1", "u2"]).await;

    let first = f.conversations.resolve(&uid("u1"), &uid("u2")).await.unwrap();
    let second = f.conversations.resolve(&uid("u2"), &uid("u1")).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.conversation.id, second.conversation.id);
    assert_eq!(f.store.conversation_count().await, 1);
}

#[tokio::test]
async fn resolve_rejects_self_conversation() {
    let f = fixture();
    seed_users(&f, &["u1"]).await;

    let err = f.conversations.resolve(&uid("u1"), &uid("u1")).await.unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::InvalidParticipants { .. })
    ));
    assert_eq!(f.store.conversation_count().await, 0);
}

#[tokio::test]
async fn resolve_rejects_unknown_user() {
    let f = fixture();
    seed_users(&f, &["u1"]).await;

    let err = f.conversations.resolve(&uid("u1"), &uid("ghost")).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_PARTICIPANTS");
    assert_eq!(f.store.conversation_count().await, 0);
}

#[tokio::test]
async fn concurrent_resolve_yields_single_conversation() {
    let f = fixture();
    seed_users(&f, &["u1", "u2"]).await;

    let results = futures::future::join_all((0..16).map(|i| {
        let service = f.conversations.clone();
        async move {
            if i % 2 == 0 {
                service.resolve(&uid("u1"), &uid("u2")).await
            } else {
                service.resolve(&uid("u2"), &uid("u1")).await
            }
        }
    }))
    .await;

    let ids: Vec<_> = results
        .into_iter()
        .map(|result| result.unwrap().conversation.id)
        .collect();
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(f.store.conversation_count().await, 1);
}

#[tokio::test]
async fn welcome_message_is_appended_once_on_creation() {
    let f = fixture_with(Some("hi, is this still available?"));
    seed_users(&f, &["buyer", "seller"]).await;

    let resolved = f
        .conversations
        .resolve(&uid("buyer"), &uid("seller"))
        .await
        .unwrap();
    assert!(resolved.conversation.last_message.is_some());
    f.conversations
        .resolve(&uid("seller"), &uid("buyer"))
        .await
        .unwrap();

    let history = f.messages.list_messages(resolved.conversation.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender_id, uid("buyer"));
    assert_eq!(history[0].receiver_id, uid("seller"));
}

#[tokio::test]
async fn start_conversation_requires_other_user() {
    let f = fixture();
    seed_users(&f, &["u1"]).await;

    let err = f
        .conversations
        .start_conversation(&identity("u1"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_PARTICIPANTS");
}

#[tokio::test]
async fn send_direct_creates_conversation_and_moves_last_message() {
    let f = fixture();
    seed_users(&f, &["u1", "u2"]).await;

    let first = f.messages.send_direct(direct("u1", "u2", "hello")).await.unwrap();
    let second = f.messages.send_direct(direct("u2", "u1", "hey")).await.unwrap();
    assert!(first.is_created());
    assert_eq!(first.message().conversation_id, second.message().conversation_id);

    let conversation = f
        .conversations
        .find_by_id(first.message().conversation_id)
        .await
        .unwrap();
    assert_eq!(conversation.last_message, Some(second.message().id));

    let history = f
        .messages
        .list_messages(conversation.id)
        .await
        .unwrap();
    let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["hello", "hey"]);
}

#[tokio::test]
async fn invalid_text_never_creates_conversation() {
    let f = fixture();
    seed_users(&f, &["u1", "u2"]).await;

    for text in ["", "   ", "this text is definitely longer than twenty"] {
        let err = f.messages.send_direct(direct("u1", "u2", text)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_CONTENT");
    }
    assert_eq!(f.store.conversation_count().await, 0);
    assert_eq!(f.store.message_count().await, 0);
}

#[tokio::test]
async fn mismatched_conversation_id_is_rejected_before_append() {
    let f = fixture();
    seed_users(&f, &["u1", "u2", "u3"]).await;

    let other = f.conversations.resolve(&uid("u1"), &uid("u3")).await.unwrap();
    let mut request = direct("u1", "u2", "hello");
    request.expected_conversation = Some(other.conversation.id);

    let err = f.messages.send_direct(request).await.unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::ParticipantMismatch)
    ));
    assert_eq!(f.store.message_count().await, 0);
}

#[tokio::test]
async fn retried_send_with_same_key_is_deduplicated() {
    let f = fixture();
    seed_users(&f, &["u1", "u2"]).await;

    let key = ClientMessageId::new();
    let mut request = direct("u1", "u2", "hello");
    request.client_message_id = Some(key);

    let first = f.messages.send_direct(request.clone()).await.unwrap();
    let retry = f.messages.send_direct(request).await.unwrap();

    assert!(first.is_created());
    assert!(!retry.is_created());
    assert_eq!(first.message().id, retry.message().id);
    assert_eq!(f.store.message_count().await, 1);
}

#[tokio::test]
async fn list_conversations_orders_by_last_message() {
    let f = fixture();
    seed_users(&f, &["me", "a", "b", "c"]).await;

    f.messages.send_direct(direct("me", "a", "first")).await.unwrap();
    f.conversations.resolve(&uid("me"), &uid("c")).await.unwrap();
    f.messages.send_direct(direct("b", "me", "second")).await.unwrap();

    let views = f.conversations.list_conversations(&uid("me")).await.unwrap();
    let others: Vec<_> = views
        .iter()
        .map(|view| {
            view.participants
                .iter()
                .find(|p| p.id != uid("me"))
                .unwrap()
                .id
                .clone()
        })
        .collect();
    assert_eq!(others, vec![uid("b"), uid("a"), uid("c")]);
    assert_eq!(
        views[0].last_message.as_ref().map(|m| m.text.as_str()),
        Some("second")
    );
    assert!(views[2].last_message.is_none());
    assert_eq!(views[0].participants[0].username.as_deref(), Some("b"));
}

#[tokio::test]
async fn mark_read_only_touches_messages_for_reader() {
    let f = fixture();
    seed_users(&f, &["u1", "u2"]).await;

    f.messages.send_direct(direct("u1", "u2", "one")).await.unwrap();
    f.messages.send_direct(direct("u1", "u2", "two")).await.unwrap();
    let reply = f.messages.send_direct(direct("u2", "u1", "three")).await.unwrap();

    assert_eq!(f.messages.mark_read(&uid("u2"), "u1").await.unwrap(), 2);
    assert_eq!(f.messages.mark_read(&uid("u2"), "u1").await.unwrap(), 0);

    let history = f
        .messages
        .list_messages(reply.message().conversation_id)
        .await
        .unwrap();
    assert!(history.iter().filter(|m| m.receiver_id == uid("u2")).all(|m| m.read));
    assert!(!history.iter().find(|m| m.id == reply.message().id).unwrap().read);
}

#[tokio::test]
async fn mark_read_without_conversation_is_not_found() {
    let f = fixture();
    seed_users(&f, &["u1", "u2"]).await;

    let err = f.messages.mark_read(&uid("u1"), "u2").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn sync_user_keeps_created_at_and_falls_back_to_email() {
    let f = fixture();
    let mut who = identity("auth0|42");
    who.email = Some("seller@campus.edu".into());

    let first = f.users.sync_user(&who).await.unwrap();
    assert_eq!(first.username, "seller@campus.edu");

    who.name = Some("Seller".into());
    let second = f.users.sync_user(&who).await.unwrap();
    assert_eq!(second.username, "Seller");
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);

    let me = f.users.me(&who).await.unwrap();
    assert_eq!(me.username, "Seller");
}

#[tokio::test]
async fn list_others_excludes_caller() {
    let f = fixture();
    seed_users(&f, &["u1", "u2", "u3"]).await;

    let others = f.users.list_others(&identity("u2")).await.unwrap();
    let ids: Vec<_> = others.into_iter().map(|user| user.id).collect();
    assert_eq!(ids, vec![uid("u1"), uid("u3")]);

    let stranger = f.store.find_by_id(&uid("nobody")).await.unwrap();
    assert!(stranger.is_none());
}

fn append(
    conversation_id: domain::ConversationId,
    sender: &str,
    receiver: &str,
    text: &str,
) -> AppendMessageRequest {
    AppendMessageRequest {
        conversation_id,
        sender_id: uid(sender),
        receiver_id: uid(receiver),
        text: text.to_string(),
        client_message_id: None,
    }
}

#[tokio::test]
async fn append_message_moves_pointer_and_lands_last_in_log() {
    let f = fixture();
    seed_users(&f, &["u1", "u2"]).await;
    let room = f.conversations.resolve(&uid("u1"), &uid("u2")).await.unwrap();
    let id = room.conversation.id;

    let first = f.messages.append_message(append(id, "u1", "u2", "hi")).await.unwrap();
    let second = f
        .messages
        .append_message(append(id, "u2", "u1", "hello back"))
        .await
        .unwrap();
    assert!(first.is_created() && second.is_created());
    assert_eq!(second.message().text.as_str(), "hello back");

    let stored = f.conversations.find_by_id(id).await.unwrap();
    assert_eq!(stored.last_message, Some(second.message().id));
    assert_eq!(stored.updated_at, second.message().timestamp);

    let log = f.messages.list_messages(id).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log.last().map(|message| message.id), Some(second.message().id));
}

#[tokio::test]
async fn rejected_append_leaves_log_and_pointer_untouched() {
    let f = fixture();
    seed_users(&f, &["u1", "u2", "u3"]).await;
    let room = f.conversations.resolve(&uid("u1"), &uid("u2")).await.unwrap();
    let id = room.conversation.id;
    let kept = f.messages.append_message(append(id, "u1", "u2", "hi")).await.unwrap();

    let outsider = f
        .messages
        .append_message(append(id, "u1", "u3", "psst"))
        .await
        .unwrap_err();
    assert!(matches!(
        outsider,
        ApplicationError::Domain(DomainError::ParticipantMismatch)
    ));

    let blank = f
        .messages
        .append_message(append(id, "u1", "u2", "   "))
        .await
        .unwrap_err();
    assert_eq!(blank.code(), "INVALID_CONTENT");

    let unknown = f
        .messages
        .append_message(append(domain::ConversationId::new(), "u1", "u2", "hello"))
        .await
        .unwrap_err();
    assert_eq!(unknown.code(), "NOT_FOUND");

    assert_eq!(f.store.message_count().await, 1);
    let stored = f.conversations.find_by_id(id).await.unwrap();
    assert_eq!(stored.last_message, Some(kept.message().id));
    let log = f.messages.list_messages(id).await.unwrap();
    assert_eq!(log.len(), 1);
}
