//! Integration tests for connection setup, presence and teardown.

mod common;

use common::{TestClient, TestServer};
use huddle::state::RoomId;
use huddle_proto::ServerEvent;
use std::time::Duration;
use tokio_tungstenite::tungstenite;

/// Poll until `check` holds or two seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..40 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

#[tokio::test]
async fn presence_follows_the_connection() {
    let server = TestServer::spawn().await.expect("server");
    let ada = server.user("Ada").await;
    let sb = server.switchboard();

    assert!(!sb.presence.is_online(&ada.id));

    let client = server.connect(&ada).await.expect("connect");
    assert!(sb.presence.is_online(&ada.id));
    let stored = server.db().users().find_by_id(&ada.id).await.unwrap().unwrap();
    assert!(stored.is_online);

    client.close().await.expect("close");
    assert!(eventually(|| !sb.presence.is_online(&ada.id)).await);

    // The offline write lands right after the presence removal.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = server.db().users().find_by_id(&ada.id).await.unwrap().unwrap();
    assert!(!stored.is_online);
    assert!(stored.last_seen > 0);
}

#[tokio::test]
async fn handshake_without_token_is_rejected() {
    let server = TestServer::spawn().await.expect("server");

    let err = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .expect_err("handshake must fail");
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn bad_token_gets_authentication_error() {
    let server = TestServer::spawn().await.expect("server");

    let mut client = TestClient::connect(&server.ws_url(), "not-a-jwt")
        .await
        .expect("upgrade succeeds");
    let closed = client.expect_closed().await.expect("closed");

    assert_eq!(closed.errors, vec!["Authentication error".to_string()]);
    assert!(server.switchboard().connections.is_empty());
}

#[tokio::test]
async fn token_for_unknown_user_is_rejected() {
    let server = TestServer::spawn().await.expect("server");
    let ghost = server.user("Ghost").await;
    let token = server.token(&ghost);
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&ghost.id)
        .execute(server.db().pool())
        .await
        .unwrap();

    let mut client = TestClient::connect(&server.ws_url(), &token).await.unwrap();
    let closed = client.expect_closed().await.unwrap();
    assert_eq!(closed.errors, vec!["Authentication error".to_string()]);
}

#[tokio::test]
async fn query_string_token_is_accepted() {
    let server = TestServer::spawn().await.expect("server");
    let ada = server.user("Ada").await;

    let mut client = TestClient::connect_with_query(&server.ws_url(), &server.token(&ada))
        .await
        .expect("connect");
    match client.recv().await.unwrap() {
        ServerEvent::OnlineUsers(users) => {
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].id, ada.id);
        }
        other => panic!("expected online_users, got {other:?}"),
    }
}

#[tokio::test]
async fn others_see_online_and_offline() {
    let server = TestServer::spawn().await.expect("server");
    let ada = server.user("Ada").await;
    let bob = server.user("Bob").await;

    let mut a = server.connect(&ada).await.unwrap();
    let b = server.connect(&bob).await.unwrap();

    match a.expect_event("user_online").await.unwrap() {
        ServerEvent::UserOnline { user_id, user } => {
            assert_eq!(user_id, bob.id);
            assert!(user.is_online);
        }
        other => panic!("unexpected {other:?}"),
    }

    b.close().await.unwrap();
    match a.expect_event("user_offline").await.unwrap() {
        ServerEvent::UserOffline { user_id, last_seen } => {
            assert_eq!(user_id, bob.id);
            assert!(last_seen > 0);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn newest_connection_wins() {
    let server = TestServer::spawn().await.expect("server");
    let ada = server.user("Ada").await;
    let sb = server.switchboard();

    let mut first = server.connect(&ada).await.unwrap();
    let _second = server.connect(&ada).await.unwrap();

    let closed = first.expect_closed().await.unwrap();
    assert!(
        closed.errors.iter().any(|e| e == "Connected from another location"),
        "errors: {:?}",
        closed.errors
    );

    // The evicted task's teardown must not take the user offline.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sb.presence.is_online(&ada.id));
    assert_eq!(sb.connections.len(), 1);
    assert_eq!(sb.rooms.broadcast_targets(&RoomId::user(&ada.id)).len(), 1);

    let stored = server.db().users().find_by_id(&ada.id).await.unwrap().unwrap();
    assert!(stored.is_online);
}

#[tokio::test]
async fn reconciliation_clears_abrupt_loss() {
    let server = TestServer::spawn().await.expect("server");
    let ada = server.user("Ada").await;

    // A flag left behind by a process that died without cleanup.
    server
        .db()
        .users()
        .mark_online(&ada.id, "c-dead", huddle::db::now_millis())
        .await
        .unwrap();

    let report = server.switchboard().reconcile().await.unwrap();
    assert_eq!(report.cleared, 1);

    let stored = server.db().users().find_by_id(&ada.id).await.unwrap().unwrap();
    assert!(!stored.is_online);
}

#[tokio::test]
async fn flooding_client_is_disconnected() {
    let server = TestServer::spawn_with(|config| {
        config.security.rate_limits.message_rate_per_second = 1;
        config.security.rate_limits.message_burst = 1;
        config.security.rate_limits.max_flood_violations = 2;
    })
    .await
    .expect("server");
    let ada = server.user("Ada").await;

    let mut client = server.connect(&ada).await.unwrap();
    for _ in 0..4 {
        client.send_raw("{}").await.unwrap();
    }

    let closed = client.expect_closed().await.unwrap();
    assert!(closed.errors.iter().any(|e| e == "Rate limit exceeded, slow down"));
    assert!(closed.errors.iter().any(|e| e == "Excess flood"));
    assert_eq!(closed.reason.as_deref(), Some("Excess flood"));
}

#[tokio::test]
async fn shutdown_closes_live_connections() {
    let server = TestServer::spawn().await.expect("server");
    let ada = server.user("Ada").await;
    let mut client = server.connect(&ada).await.unwrap();

    let shutdown = tokio::spawn(server.shutdown());
    let closed = client.expect_closed().await.unwrap();
    assert_eq!(closed.reason.as_deref(), Some("Server shutting down"));
    shutdown.await.unwrap();
}
