use std::time::Duration;

use murmur_core::remote::{with_timeout, NewMessage};
use murmur_core::{
    CanonicalId, ConversationId, HttpAuthority, MessageId, ProvisionalId, RemoteAuthority,
    RemoteError, SyncConfig, Timestamp, UserId,
};
use murmur_storage_traits::members::types::Watermark;
use murmur_storage_traits::messages::types::DEFAULT_MESSAGE_TYPE;
use murmur_test_utils::{spawn_one_shot_server, spawn_scripted_server, MockResponse};

fn new_message(provisional_id: &ProvisionalId) -> NewMessage {
    NewMessage {
        provisional_id: provisional_id.clone(),
        conversation_id: ConversationId::from("c1"),
        sender_id: UserId::from("alice"),
        content: "hello".to_string(),
        created_at: Timestamp::now(),
        message_type: DEFAULT_MESSAGE_TYPE.to_string(),
        parent_id: None,
        image_url: None,
    }
}

fn message_row(id: &CanonicalId, content: &str, created_at: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id.to_string(),
        "group_id": "c1",
        "user_id": "bob",
        "content": content,
        "created_at": created_at,
    })
}

#[tokio::test]
async fn insert_returns_canonical_ack() {
    let id = CanonicalId::generate();
    let body = serde_json::json!([message_row(&id, "hello", "2024-05-01T10:00:00.123Z")]);
    let (url, requests) = spawn_one_shot_server("201 Created", &body.to_string());
    let authority = HttpAuthority::new(url, "anon-key").unwrap();

    let provisional = ProvisionalId::generate();
    let ack = authority
        .insert_message(&new_message(&provisional))
        .await
        .unwrap();
    assert_eq!(ack.id, id);
    assert_eq!(ack.created_at.as_millis(), 1_714_557_600_123);

    let request = requests.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/rest/v1/messages");
    assert_eq!(request.header("apikey"), Some("anon-key"));
    assert_eq!(request.header("authorization"), Some("Bearer anon-key"));
    assert_eq!(request.header("prefer"), Some("return=representation"));

    let sent: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(sent["group_id"], "c1");
    assert_eq!(sent["client_id"], provisional.as_str());
    assert!(sent.get("id").is_none());
}

#[tokio::test]
async fn insert_without_id_is_a_contract_violation() {
    let body = r#"[{"group_id":"c1","user_id":"alice","content":"hello","created_at":"2024-05-01T10:00:00Z"}]"#;
    let (url, _requests) = spawn_one_shot_server("201 Created", body);
    let authority = HttpAuthority::new(url, "anon-key").unwrap();

    let err = authority
        .insert_message(&new_message(&ProvisionalId::generate()))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::ContractViolation(_)), "{err:?}");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn status_codes_map_to_remote_errors() {
    let (url, _requests) = spawn_scripted_server(vec![
        MockResponse::new("404 Not Found", "{}"),
        MockResponse::new("503 Service Unavailable", "try later"),
        MockResponse::ok("[]"),
    ]);
    let authority = HttpAuthority::new(url, "anon-key").unwrap();
    let id = CanonicalId::generate();

    assert!(matches!(
        authority.fetch_message(&id).await,
        Err(RemoteError::NotFound)
    ));

    let err = authority.fetch_message(&id).await.unwrap_err();
    assert!(matches!(err, RemoteError::Rejected { status: 503, .. }), "{err:?}");
    assert!(err.is_transient());

    // An empty result set is also a miss
    assert!(matches!(
        authority.fetch_message(&id).await,
        Err(RemoteError::NotFound)
    ));
}

#[tokio::test]
async fn scan_filters_by_conversation_and_time() {
    let first = CanonicalId::generate();
    let second = CanonicalId::generate();
    let body = serde_json::json!([
        message_row(&first, "one", "2024-05-01T10:00:00Z"),
        message_row(&second, "two", "2024-05-01T10:00:01Z"),
    ]);
    let (url, requests) = spawn_one_shot_server("200 OK", &body.to_string());
    let authority = HttpAuthority::new(url, "anon-key").unwrap();

    let messages = authority
        .scan_messages(
            &ConversationId::from("c1"),
            Timestamp::from_millis(1_714_557_600_000),
            2,
        )
        .await
        .unwrap();
    assert_eq!(
        messages.iter().map(|m| m.id).collect::<Vec<_>>(),
        vec![first, second]
    );

    let request = requests.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(request.method, "GET");
    assert!(request.path.starts_with("/rest/v1/messages?"));
    assert!(request.path.contains("group_id=eq.c1"), "{}", request.path);
    assert!(request.path.contains("order=created_at.asc"), "{}", request.path);
    assert!(request.path.contains("limit=2"), "{}", request.path);
}

#[tokio::test]
async fn undecodable_rows_are_skipped_not_fatal() {
    let good = CanonicalId::generate();
    let later = CanonicalId::generate();
    let body = serde_json::json!([
        message_row(&good, "fine", "2024-05-01T10:00:00Z"),
        {
            "id": "local-6f1c",
            "group_id": "c1",
            "user_id": "bob",
            "content": "not a server id",
            "created_at": "2024-05-01T10:00:01Z",
        },
        {
            "id": CanonicalId::generate().to_string(),
            "group_id": "c1",
            "user_id": "bob",
            "content": "no timestamp",
        },
        message_row(&later, "also fine", "2024-05-01T10:00:02Z"),
    ]);
    let (url, _requests) = spawn_scripted_server(vec![
        MockResponse::ok(&body.to_string()),
        MockResponse::ok(&body.to_string()),
    ]);
    let authority = HttpAuthority::new(url, "anon-key").unwrap();

    let scanned = authority
        .scan_messages(&ConversationId::from("c1"), Timestamp::from_millis(0), 10)
        .await
        .unwrap();
    assert_eq!(
        scanned.iter().map(|m| m.id).collect::<Vec<_>>(),
        vec![good, later]
    );

    let recent = authority
        .recent_messages(&ConversationId::from("c1"), 10)
        .await
        .unwrap();
    assert_eq!(recent.len(), 2);
}

#[tokio::test]
async fn recent_messages_come_back_oldest_first() {
    let newer = CanonicalId::generate();
    let older = CanonicalId::generate();
    let body = serde_json::json!([
        message_row(&newer, "newer", "2024-05-01T10:00:05Z"),
        message_row(&older, "older", "2024-05-01T10:00:00Z"),
    ]);
    let (url, requests) = spawn_one_shot_server("200 OK", &body.to_string());
    let authority = HttpAuthority::new(url, "anon-key").unwrap();

    let messages = authority
        .recent_messages(&ConversationId::from("c1"), 50)
        .await
        .unwrap();
    assert_eq!(messages[0].id, older);
    assert_eq!(messages[1].id, newer);

    let request = requests.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(request.path.contains("order=created_at.desc"), "{}", request.path);
}

#[tokio::test]
async fn conversations_join_memberships_and_groups() {
    let (url, requests) = spawn_scripted_server(vec![
        MockResponse::ok(r#"[{"group_id":"c1"},{"group_id":"c2"}]"#),
        MockResponse::ok(
            r#"[{"id":"c1","name":"Friends","created_by":"alice","created_at":"2024-05-01T10:00:00Z"},{"id":"c2"}]"#,
        ),
    ]);
    let authority = HttpAuthority::new(url, "anon-key").unwrap();

    let conversations = authority
        .conversations(&UserId::from("bob"))
        .await
        .unwrap();
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0].name, "Friends");
    assert_eq!(conversations[0].created_by, Some(UserId::from("alice")));

    let memberships = requests.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(memberships.path.starts_with("/rest/v1/group_members?"));
    assert!(memberships.path.contains("user_id=eq.bob"));
    let groups = requests.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(groups.path.starts_with("/rest/v1/groups?"));
}

#[tokio::test]
async fn watermark_write_patches_the_member_row() {
    let (url, requests) = spawn_one_shot_server(
        "200 OK",
        r#"[{"last_read_at":"2024-05-01T10:00:00Z","last_read_message_id":"m5"}]"#,
    );
    let authority = HttpAuthority::new(url, "anon-key").unwrap();
    let watermark = Watermark::new(
        Timestamp::from_millis(1_714_557_600_000),
        MessageId::new("m5"),
    );

    authority
        .write_watermark(&ConversationId::from("c1"), &UserId::from("bob"), &watermark)
        .await
        .unwrap();

    let request = requests.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(request.method, "PATCH");
    assert!(request.path.starts_with("/rest/v1/group_members?"));
    assert!(request.path.contains("group_id=eq.c1"));
    assert!(request.path.contains("user_id=eq.bob"));
    let sent: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(sent["last_read_message_id"], "m5");
    assert_eq!(sent["last_read_at"], "2024-05-01T10:00:00.000Z");
}

#[tokio::test]
async fn slow_authority_is_cut_off() {
    let (url, _requests) =
        spawn_scripted_server(vec![MockResponse::ok("[]").delayed(Duration::from_millis(500))]);
    let authority = HttpAuthority::new(url, "anon-key").unwrap();

    let result = with_timeout(
        Duration::from_millis(50),
        authority.fetch_message(&CanonicalId::generate()),
    )
    .await;
    assert!(matches!(result, Err(RemoteError::Timeout(_))));
}

#[test]
fn empty_base_url_is_rejected() {
    assert!(HttpAuthority::new("/", "anon-key").is_err());
}

#[test]
fn authority_from_config() {
    let config = SyncConfig {
        remote_url: Some("https://murmur.example/".to_string()),
        remote_api_key: Some("anon-key".to_string()),
        ..SyncConfig::default()
    };
    let authority = HttpAuthority::from_config(&config).unwrap().unwrap();
    assert_eq!(authority.base_url(), "https://murmur.example");
}
