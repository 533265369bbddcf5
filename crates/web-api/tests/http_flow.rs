mod support;

use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use config::MessagingConfig;
use support::TestServer;

#[tokio::test]
async fn health_and_auth_guard() {
    let server = TestServer::start().await;

    let health = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let anonymous = server
        .client
        .get(server.url("/conversations"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    let body: Value = anonymous.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn user_directory_sync_me_and_list() {
    let server = TestServer::start().await;
    let alice = server.token("alice");

    let missing = server.get("/auth/me", &alice).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    server.sync_user("alice").await;
    server.sync_user("bob").await;

    let me: Value = server.get("/auth/me", &alice).await.json().await.unwrap();
    assert_eq!(me["id"], "alice");
    assert_eq!(me["username"], "alice");

    let users: Vec<Value> = server.get("/users", &alice).await.json().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["id"], "bob");
}

#[tokio::test]
async fn start_conversation_is_idempotent_in_both_directions() {
    let server = TestServer::start().await;
    let u1 = server.sync_user("u1").await;
    let u2 = server.sync_user("u2").await;

    let first: Value = server
        .post("/messages/start-conversation", &u1, json!({ "otherUserId": "u2" }))
        .await
        .json()
        .await
        .unwrap();
    let again: Value = server
        .post("/messages/start-conversation", &u1, json!({ "otherUserId": "u2" }))
        .await
        .json()
        .await
        .unwrap();
    let reversed: Value = server
        .post("/messages/start-conversation", &u2, json!({ "otherUserId": "u1" }))
        .await
        .json()
        .await
        .unwrap();

    assert!(first["conversationId"].is_string());
    assert_eq!(first["conversationId"], again["conversationId"]);
    assert_eq!(first["conversationId"], reversed["conversationId"]);
    assert_eq!(first["participants"], json!(["u1", "u2"]));
    assert!(first["lastMessage"].is_null());
    assert_eq!(server.store.conversation_count().await, 1);
}

#[tokio::test]
async fn invalid_participants_are_bad_requests() {
    let server = TestServer::start().await;
    let u1 = server.sync_user("u1").await;

    for body in [
        json!({ "otherUserId": "u1" }),
        json!({}),
        json!({ "otherUserId": "nobody" }),
    ] {
        let response = server.post("/messages/start-conversation", &u1, body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: Value = response.json().await.unwrap();
        assert_eq!(error["code"], "INVALID_PARTICIPANTS");
    }
    assert_eq!(server.store.conversation_count().await, 0);
}

#[tokio::test]
async fn send_is_idempotent_and_listed_in_history() {
    let server = TestServer::start().await;
    let u1 = server.sync_user("u1").await;
    let u2 = server.sync_user("u2").await;

    let key = Uuid::new_v4().to_string();
    let body = json!({ "receiverId": "u2", "text": "hello", "clientMessageId": key });

    let created = server.post("/messages/send", &u1, body.clone()).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created: Value = created.json().await.unwrap();
    assert_eq!(created["senderId"], "u1");
    assert_eq!(created["clientMessageId"], key.as_str());
    assert_eq!(created["read"], false);

    let retried = server.post("/messages/send", &u1, body).await;
    assert_eq!(retried.status(), StatusCode::OK);
    let retried: Value = retried.json().await.unwrap();
    assert_eq!(retried["id"], created["id"]);

    let thread: Value = server
        .get("/messages/conversation/u1", &u2)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(thread["messages"].as_array().unwrap().len(), 1);
    assert_eq!(thread["conversation"]["lastMessage"]["id"], created["id"]);

    let list: Vec<Value> = server.get("/conversations", &u2).await.json().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["lastMessage"]["text"], "hello");
}

#[tokio::test]
async fn empty_text_is_rejected_without_side_effects() {
    let server = TestServer::start().await;
    let u1 = server.sync_user("u1").await;
    server.sync_user("u2").await;

    let response = server
        .post("/messages/send", &u1, json!({ "receiverId": "u2", "text": "   " }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "INVALID_CONTENT");
    assert_eq!(server.store.conversation_count().await, 0);
    assert_eq!(server.store.message_count().await, 0);
}

#[tokio::test]
async fn mark_read_reports_updated_count() {
    let server = TestServer::start().await;
    let u1 = server.sync_user("u1").await;
    let u2 = server.sync_user("u2").await;

    for text in ["one", "two"] {
        server
            .post("/messages/send", &u1, json!({ "receiverId": "u2", "text": text }))
            .await;
    }

    let body: Value = server
        .post("/messages/conversation/u1/read", &u2, json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["updated"], 2);

    let thread: Value = server
        .get("/messages/conversation/u2", &u1)
        .await
        .json()
        .await
        .unwrap();
    assert!(thread["messages"]
        .as_array()
        .unwrap()
        .iter()
        .all(|message| message["read"] == true));
}

#[tokio::test]
async fn conversation_list_orders_by_latest_message() {
    let server = TestServer::start().await;
    let me = server.sync_user("me").await;
    server.sync_user("a").await;
    let b = server.sync_user("b").await;
    server.sync_user("c").await;

    server
        .post("/messages/send", &me, json!({ "receiverId": "a", "text": "first" }))
        .await;
    server
        .post("/messages/start-conversation", &me, json!({ "otherUserId": "c" }))
        .await;
    server
        .post("/messages/send", &b, json!({ "receiverId": "me", "text": "second" }))
        .await;

    let list: Vec<Value> = server.get("/conversations", &me).await.json().await.unwrap();
    let texts: Vec<Value> = list
        .iter()
        .map(|view| view["lastMessage"]["text"].clone())
        .collect();
    assert_eq!(texts, vec![json!("second"), json!("first"), Value::Null]);
}

#[tokio::test]
async fn welcome_message_bootstraps_new_conversation() {
    let server = TestServer::start_with(MessagingConfig {
        welcome_message: Some("Hi! Is this still available?".into()),
        max_message_length: 2000,
    })
    .await;
    let buyer = server.sync_user("buyer").await;
    server.sync_user("seller").await;

    let started: Value = server
        .post("/messages/start-conversation", &buyer, json!({ "otherUserId": "seller" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(started["lastMessage"]["text"], "Hi! Is this still available?");
    assert_eq!(started["lastMessage"]["senderId"], "buyer");
}
