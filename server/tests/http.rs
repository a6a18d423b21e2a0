//! HTTP surface tests driven through the router with `oneshot`

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::TestApp;
use eventhub_server::build_router;

fn router(app: &TestApp) -> Router {
    build_router(app.state.clone())
}

async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn send_json(method: Method, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = call(router(&app), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_requests_without_valid_token_are_unauthorized() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .uri("/api/v1/messages/stats")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(router(&app), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = call(router(&app), get("/api/v1/messages/stats", "not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_send_then_fetch_history() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let alice_token = app.token(&alice).await;
    let bob_token = app.token(&bob).await;

    let (status, body) = call(
        router(&app),
        send_json(
            Method::POST,
            "/api/v1/messages/send",
            &alice_token,
            json!({ "recipientId": bob.id, "body": "hello over http" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["body"], "hello over http");
    assert_eq!(body["data"]["type"], "text");
    assert_eq!(body["data"]["status"], "sent");
    assert_eq!(body["data"]["sender"]["name"], "Alice");

    let uri = format!("/api/v1/messages/history/individual/{}", alice.id);
    let (status, body) = call(router(&app), get(&uri, &bob_token)).await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["body"], "hello over http");
    assert_eq!(body["data"]["pagination"]["hasMore"], false);
}

#[tokio::test]
async fn test_validation_errors_map_to_bad_request() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let token = app.token(&alice).await;

    let (status, body) = call(
        router(&app),
        send_json(
            Method::POST,
            "/api/v1/messages/send",
            &token,
            json!({ "recipientId": alice.id, "body": "note to self" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = call(
        router(&app),
        send_json(
            Method::POST,
            "/api/v1/messages/send",
            &token,
            json!({ "recipientId": "ghost", "body": "anyone?" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_defaults_to_for_me() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let bob_token = app.token(&bob).await;

    let sent = app
        .state
        .messaging
        .send_message(
            &alice,
            eventhub_server::models::SendMessageRequest {
                recipient_id: Some(bob.id.clone()),
                body: Some("hi".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let uri = format!("/api/v1/messages/{}", sent.message.id);

    let (status, body) = call(
        router(&app),
        send_json(Method::DELETE, &uri, &bob_token, json!({ "deleteForEveryone": true })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(&uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", bob_token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(router(&app), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deletedForEveryone"], false);

    // Still there for the sender
    assert!(app.state.storage.find_message(&sent.message.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_send_with_files_stores_attachments() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let token = app.token(&alice).await;

    let boundary = "XBOUNDARYX";
    let form = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"recipientId\"\r\n\r\n{to}\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"body\"\r\n\r\nsee attached\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"notes.txt\"\r\n\
         Content-Type: text/plain\r\n\r\nhello file\r\n\
         --{b}--\r\n",
        b = boundary,
        to = bob.id,
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/messages/send-with-files")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(form))
        .unwrap();

    let (status, body) = call(router(&app), request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["type"], "document");
    let attachment = &body["data"]["attachments"][0];
    assert_eq!(attachment["filename"], "notes.txt");
    assert_eq!(attachment["size"], 10);

    let url = attachment["url"].as_str().unwrap();
    assert!(url.starts_with("/uploads/messages/"));
    assert!(url.ends_with(".txt"));

    // Served back from the uploads root
    let request = Request::builder().uri(url).body(Body::empty()).unwrap();
    let response = router(&app).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello file");
}

#[tokio::test]
async fn test_admin_routes_require_admin() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let moderator = app.admin("Mod").await;
    let bob_token = app.token(&bob).await;
    let mod_token = app.token(&moderator).await;

    let sent = app
        .state
        .messaging
        .send_message(
            &alice,
            eventhub_server::models::SendMessageRequest {
                recipient_id: Some(bob.id.clone()),
                body: Some("suspicious".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let report_uri = format!("/api/v1/messages/{}/report", sent.message.id);
    let (status, body) = call(
        router(&app),
        send_json(Method::POST, &report_uri, &bob_token, json!({ "reason": "phishing" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reportCount"], 1);

    let record_uri = format!("/api/v1/admin/messages/{}", sent.message.id);
    let (status, _) = call(router(&app), get(&record_uri, &bob_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(router(&app), get(&record_uri, &mod_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reports"][0]["reason"], "phishing");
    assert_eq!(body["data"]["message"]["body"], "suspicious");
}

#[tokio::test]
async fn test_extractor_rejections_use_error_envelope() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let token = app.token(&alice).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/messages/send")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{recipientId: oops"))
        .unwrap();
    let (status, body) = call(router(&app), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["message"].is_string());

    let (status, body) = call(router(&app), get("/api/v1/messages/history/bogus/x", &token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = call(router(&app), get("/api/v1/messages/conversations?page=first", &token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_attachment_urls_must_point_at_uploads() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let token = app.token(&alice).await;

    let attachment = |url: &str| {
        json!({
            "type": "image",
            "url": url,
            "filename": "x.png",
            "size": 10,
            "mimeType": "image/png",
        })
    };

    let (status, body) = call(
        router(&app),
        send_json(
            Method::POST,
            "/api/v1/messages/send",
            &token,
            json!({ "recipientId": bob.id, "attachments": [attachment("https://evil.example/x.png")] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = call(
        router(&app),
        send_json(
            Method::POST,
            "/api/v1/messages/send",
            &token,
            json!({
                "recipientId": bob.id,
                "attachments": [attachment("/uploads/messages/1700000000000-abc.png")],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["type"], "image");
    let message_id = body["data"]["id"].as_str().unwrap().to_string();

    // Replies are held to the same rule
    let bob_token = app.token(&bob).await;
    let (status, _) = call(
        router(&app),
        send_json(
            Method::POST,
            &format!("/api/v1/messages/{}/reply", message_id),
            &bob_token,
            json!({ "body": "look", "attachments": [attachment("file:///etc/passwd")] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_delete_body_is_rejected() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let token = app.token(&alice).await;

    let sent = app
        .state
        .messaging
        .send_message(
            &alice,
            eventhub_server::models::SendMessageRequest {
                recipient_id: Some(bob.id.clone()),
                body: Some("oops".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/api/v1/messages/{}", sent.message.id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"deleteForEveryone\": tru"))
        .unwrap();
    let (status, body) = call(router(&app), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    // Nothing was deleted
    let stored = app.state.storage.find_message(&sent.message.id).await.unwrap().unwrap();
    assert!(stored.deleted_for.is_empty());
}
