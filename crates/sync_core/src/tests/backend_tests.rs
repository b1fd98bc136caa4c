use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::TimeZone;
use shared::protocol::ChatTarget;

use super::*;

fn record(server_id: i64, content: &str) -> ConfirmedMessage {
    ConfirmedMessage {
        server_id: shared::domain::MessageId(server_id),
        sender_id: UserId(3),
        content: content.to_string(),
        client_ref: None,
        sent_at: Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
    }
}

async fn spawn_fixture() -> String {
    let app = Router::new()
        .route(
            "/identity",
            get(|| async { Json(IdentityResponse { user_id: UserId(7) }) }),
        )
        .route(
            "/groups/10/messages",
            get(|| async { Json(vec![record(900, "first"), record(901, "second")]) }),
        )
        .route(
            "/messages",
            post(|| async {
                (
                    StatusCode::FORBIDDEN,
                    Json(ApiError::new(ErrorCode::Forbidden, "not a member")),
                )
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn resolves_identity_then_fetches_history() {
    let backend = HttpSyncBackend::new(spawn_fixture().await);

    let identity = backend.resolve_identity().await.expect("identity");
    assert_eq!(identity.user_id, UserId(7));

    let history = backend
        .fetch_history(Context::Group(shared::domain::GroupId(10)), 50, None)
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "first");
}

#[tokio::test]
async fn history_requires_resolved_identity() {
    let backend = HttpSyncBackend::new(spawn_fixture().await);

    let err = backend
        .fetch_history(Context::Group(shared::domain::GroupId(10)), 50, None)
        .await
        .expect_err("unresolved identity");
    assert!(err.is_permission());
}

#[tokio::test]
async fn denied_send_surfaces_permission_error() {
    let backend = HttpSyncBackend::new(spawn_fixture().await);
    backend.resolve_identity().await.expect("identity");

    let err = backend
        .send_message(SendMessageRequest {
            sender_id: UserId(7),
            target: ChatTarget::Group {
                group_id: shared::domain::GroupId(10),
            },
            content: "hi".to_string(),
            client_ref: shared::domain::ClientRef("r1".to_string()),
        })
        .await
        .expect_err("denied send");

    assert!(err.is_permission());
    match err {
        BackendError::Api(api) => assert_eq!(api.code, ErrorCode::Forbidden),
        other => panic!("expected api error, got {other:?}"),
    }
}
