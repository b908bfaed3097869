//! End-to-end rendezvous scenarios over the HTTP surface.

use std::time::Duration;

use axum::http::StatusCode;
use tokio::time::sleep;
use tower::ServiceExt;

mod common;

use common::{body_json, chat_body, messages_body, post_json, test_app, test_app_with};
use pairlink::session::ManagerConfig;

// ============================================================================
// S1: Basic handshake and one turn
// ============================================================================

#[tokio::test]
async fn basic_handshake_and_one_turn() {
    let (app, _) = test_app();

    // Client A's handshake ping hangs until B arrives.
    let a1 = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(post_json("/v1/chat/completions", chat_body("s1", "ping")))
                .await
                .unwrap()
        })
    };
    sleep(Duration::from_millis(50)).await;

    let b1 = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(post_json("/v1/chat/completions", chat_body("s1", "Hello?")))
                .await
                .unwrap()
        })
    };
    sleep(Duration::from_millis(50)).await;

    // A's response carries B's first utterance, not the ping.
    let response = a1.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["choices"][0]["message"]["content"], "Hello?");
    assert_eq!(json["choices"][0]["finish_reason"], "stop");
    assert_eq!(json["model"], "s1");

    // A's next utterance answers B's still-open request.
    let a2 = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(post_json(
                "/v1/chat/completions",
                chat_body("s1", "Hi there"),
            ))
            .await
            .unwrap()
        })
    };

    let response = b1.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["choices"][0]["message"]["content"], "Hi there");

    a2.abort();
}

// ============================================================================
// S2: Handshake timeout
// ============================================================================

#[tokio::test]
async fn handshake_timeout_returns_408_and_resets() {
    let (app, _) = test_app_with(ManagerConfig {
        handshake_budget: Duration::from_millis(100),
        turn_budget: Duration::from_millis(800),
        session_ttl: Duration::from_secs(60),
        max_sessions: 100,
        evict_on_full: true,
    });

    let response = app
        .clone()
        .oneshot(post_json("/v1/chat/completions", chat_body("s2", "ping")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "timeout");
    assert_eq!(json["error"]["code"], "handshake_timeout");

    // The timed-out session was closed; the same id starts a fresh
    // handshake rather than failing with session_gone.
    let response = app
        .clone()
        .oneshot(post_json("/v1/chat/completions", chat_body("s2", "ping")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "handshake_timeout");
}

// ============================================================================
// S3: Session conflict on a third concurrent request
// ============================================================================

#[tokio::test]
async fn third_concurrent_request_conflicts() {
    let (app, _) = test_app();

    // Drive A's request until it suspends, then stop polling it so the
    // request stays in flight.
    let mut a1 = Box::pin(
        app.clone()
            .oneshot(post_json("/v1/chat/completions", chat_body("s3", "ping"))),
    );
    tokio::select! {
        _ = &mut a1 => panic!("handshake resolved with no peer"),
        _ = sleep(Duration::from_millis(100)) => {}
    }

    // The second request claims the B slot and suspends.
    let b1 = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(post_json("/v1/chat/completions", chat_body("s3", "Hello?")))
                .await
                .unwrap()
        })
    };
    sleep(Duration::from_millis(100)).await;

    // Both participant slots are busy: a third request is refused.
    let response = app
        .clone()
        .oneshot(post_json("/v1/chat/completions", chat_body("s3", "me too")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "session_conflict");

    // The conflict left the pairing intact: A completes with B's
    // utterance, and A's next utterance answers B.
    let response = a1.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["choices"][0]["message"]["content"], "Hello?");

    let a2 = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(post_json("/v1/chat/completions", chat_body("s3", "Hi")))
                .await
                .unwrap()
        })
    };
    let response = b1.await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["choices"][0]["message"]["content"], "Hi");
    a2.abort();
}

// ============================================================================
// S4: Cross-adapter pairing
// ============================================================================

#[tokio::test]
async fn chat_and_messages_clients_share_a_session() {
    let (app, _) = test_app();

    let a1 = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(post_json("/v1/chat/completions", chat_body("s4", "ping")))
                .await
                .unwrap()
        })
    };
    sleep(Duration::from_millis(50)).await;

    let b1 = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(post_json("/v1/messages", messages_body("s4", "hello from b")))
                .await
                .unwrap()
        })
    };
    sleep(Duration::from_millis(50)).await;

    // A (chat format) receives B's text in chat-completion shape.
    let response = a1.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["choices"][0]["message"]["content"], "hello from b");

    // B (messages format) receives A's next utterance in message shape.
    let a2 = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(post_json(
                "/v1/chat/completions",
                chat_body("s4", "hello from a"),
            ))
            .await
            .unwrap()
        })
    };
    let response = b1.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["type"], "message");
    assert_eq!(json["content"][0]["text"], "hello from a");
    assert_eq!(json["stop_reason"], "end_turn");
    a2.abort();
}

// ============================================================================
// S5: TTL eviction
// ============================================================================

#[tokio::test]
async fn idle_sessions_are_swept() {
    let (app, sessions) = test_app_with(ManagerConfig {
        handshake_budget: Duration::from_millis(800),
        turn_budget: Duration::from_millis(800),
        session_ttl: Duration::from_millis(150),
        max_sessions: 100,
        evict_on_full: true,
    });
    std::sync::Arc::clone(&sessions).spawn_sweeper(Duration::from_millis(50));

    let a1 = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(post_json("/v1/chat/completions", chat_body("s5", "ping")))
                .await
                .unwrap()
        })
    };
    sleep(Duration::from_millis(50)).await;
    assert_eq!(sessions.count(), 1);

    // Nobody else shows up: the sweep closes the idle session and the
    // suspended handshake observes a timeout.
    let response = a1.await.unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    sleep(Duration::from_millis(100)).await;

    let response = app
        .clone()
        .oneshot(
            axum::http::Request::get("/admin/sessions")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["sessions"], serde_json::json!([]));

    // A subsequent request creates a fresh session under the same id.
    let a2 = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(post_json("/v1/chat/completions", chat_body("s5", "ping")))
                .await
                .unwrap()
        })
    };
    sleep(Duration::from_millis(50)).await;
    assert_eq!(sessions.count(), 1);
    let snapshot = sessions.snapshot();
    assert_eq!(snapshot[0].id, "s5");
    assert_eq!(snapshot[0].state, "awaiting_peer");
    a2.abort();
}

// ============================================================================
// Capacity
// ============================================================================

#[tokio::test]
async fn overloaded_directory_refuses_new_sessions() {
    let (app, sessions) = test_app_with(ManagerConfig {
        handshake_budget: Duration::from_millis(800),
        turn_budget: Duration::from_millis(800),
        session_ttl: Duration::from_secs(60),
        max_sessions: 1,
        evict_on_full: false,
    });
    sessions.get_or_create("occupant").unwrap();

    let response = app
        .clone()
        .oneshot(post_json("/v1/chat/completions", chat_body("newcomer", "hi")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "overloaded");
}
