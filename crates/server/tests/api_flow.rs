mod common;

use http::StatusCode;
use serde_json::json;

use common::{scripted_ai, test_app, ScriptedModel, SCORE_REPLY};
use mend_server::ai::AiService;
use mend_server::models::Message;

#[tokio::test]
async fn register_returns_user_and_rejects_duplicate_email() {
    let app = test_app(AiService::disabled()).await;
    let body = json!({ "name": "Alice", "email": "alice@example.com", "password": "p" });

    let (status, user) = app.post("/api/register", body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(!user["id"].as_str().unwrap().is_empty());
    assert_eq!(user["colorCode"], "blue");
    assert!(user.get("passwordHash").is_none());

    let (status, err) = app.post("/api/register", body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(err["error"].is_string());
}

#[tokio::test]
async fn register_requires_credentials() {
    let app = test_app(AiService::disabled()).await;
    let (status, err) = app
        .post("/api/register", json!({ "name": "Alice", "email": "" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].is_string());
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = test_app(AiService::disabled()).await;
    let request = http::Request::builder()
        .method(http::Method::POST)
        .uri("/api/login")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();

    use tower::ServiceExt;
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_checks_password() {
    let app = test_app(AiService::disabled()).await;
    let id = app.register("Alice", "alice@example.com").await;

    let (status, user) = app
        .post("/api/login", json!({ "email": "alice@example.com", "password": "secret" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["id"], id.as_str());

    let (status, _) = app
        .post("/api/login", json!({ "email": "alice@example.com", "password": "nope" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post("/api/login", json!({ "email": "ghost@example.com", "password": "secret" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/user/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_lifecycle() {
    let app = test_app(AiService::disabled()).await;

    let (status, session) = app
        .post("/api/session", json!({ "partnerA": "u1", "partnerB": "u2" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["resolved"], false);
    assert_eq!(session["messages"], json!([]));
    let id = session["id"].as_str().unwrap().to_string();

    let (status, active) = app.get("/api/session/active/u1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["id"], id.as_str());

    let (status, _) = app
        .post("/api/session", json!({ "partnerA": "u2", "partnerB": "u1" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, ended) = app.patch(&format!("/api/session/end/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["session"]["resolved"], true);

    let (status, _) = app.get("/api/session/active/u1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Ending again is a no-op success.
    let (status, again) = app.patch(&format!("/api/session/end/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["session"]["resolved"], true);

    let (status, _) = app.patch("/api/session/end/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.idle().await;
    // Neither partner is registered, so no email goes out.
    assert!(app.mail.sent().is_empty());
}

#[tokio::test]
async fn session_start_and_end_email_partner_b() {
    let app = test_app(AiService::disabled()).await;
    let alice = app.register("Alice", "alice@example.com").await;
    let bob = app.register("Bob", "bob@example.com").await;

    let session = app.start_session(&alice, &bob).await;
    app.idle().await;
    app.patch(&format!("/api/session/end/{session}")).await;
    app.patch(&format!("/api/session/end/{session}")).await;
    app.idle().await;

    let sent = app.mail.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|e| e.to == "bob@example.com"));
    assert!(sent[0].subject.contains("Started"));
    assert!(sent[1].subject.contains("Ended"));
    assert!(sent[0].html.contains("Alice"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_end_requests_notify_and_score_once() {
    let model = ScriptedModel::new(SCORE_REPLY);
    let app = test_app(scripted_ai(model.clone())).await;
    let alice = app.register("Alice", "alice@example.com").await;
    let bob = app.register("Bob", "bob@example.com").await;
    let session = app.start_session(&alice, &bob).await;
    app.idle().await;

    let uri = format!("/api/session/end/{session}");
    let ((first, _), (second, _)) = tokio::join!(app.patch(&uri), app.patch(&uri));
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    app.idle().await;

    let ended: Vec<_> = app
        .mail
        .sent()
        .into_iter()
        .filter(|e| e.subject.contains("Ended"))
        .collect();
    assert_eq!(ended.len(), 1);
    // One scoring call per partner.
    assert_eq!(model.prompts.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn invite_and_accept_pair_users() {
    let app = test_app(AiService::disabled()).await;
    let alice = app.register("Alice", "alice@example.com").await;
    let bob = app.register("Bob", "bob@example.com").await;

    let (status, _) = app
        .post("/api/invite", json!({ "yourId": alice, "partnerEmail": "bob@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/invite", json!({ "yourId": alice, "partnerEmail": "bob@example.com" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post("/api/invite", json!({ "yourId": alice, "partnerEmail": "ghost@example.com" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/accept-invite", json!({ "yourId": bob, "inviterId": "someone-else" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/accept-invite", json!({ "yourId": bob, "inviterId": alice }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, bob_user) = app.get(&format!("/api/user/{bob}")).await;
    let (_, alice_user) = app.get(&format!("/api/user/{alice}")).await;
    assert_eq!(bob_user["partnerId"], alice.as_str());
    assert_eq!(alice_user["partnerId"], bob.as_str());
    assert!(bob_user.get("invitedBy").is_none());

    let carol = app.register("Carol", "carol@example.com").await;
    let (status, _) = app
        .post("/api/invite", json!({ "yourId": carol, "partnerId": alice }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.idle().await;
    let sent = app.mail.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "bob@example.com");
}

#[tokio::test]
async fn onboarding_is_stored() {
    let app = test_app(AiService::disabled()).await;
    let (status, body) = app
        .post(
            "/api/onboarding",
            json!({
                "userId": "u1",
                "name": "Alice",
                "gender": "female",
                "relationshipGoals": ["trust"],
                "currentChallenges": ["time"]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["relationshipGoals"], json!(["trust"]));

    let (status, _) = app.post("/api/onboarding", json!({ "name": "Nobody" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_reflection_is_generated_once() {
    let model = ScriptedModel::new("You both listened.");
    let app = test_app(scripted_ai(model.clone())).await;
    let session = app.start_session("u1", "u2").await;
    app.state
        .store
        .append_message(&session, &Message::new("u1", "I felt unheard"))
        .await
        .unwrap();

    let body = json!({ "sessionId": session, "userId": "u1" });
    let (status, reflection) = app.post("/api/reflection", body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reflection["text"], "You both listened.");
    assert_eq!(reflection["id"], format!("{session}-u1"));
    assert!(model.prompts.lock().unwrap()[0].contains("u1: I felt unheard"));

    let (status, _) = app.post("/api/reflection", body).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post("/api/reflection", json!({ "sessionId": "missing", "userId": "u1" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reflection_needs_ai_only_when_text_is_empty() {
    let app = test_app(AiService::disabled()).await;
    let session = app.start_session("u1", "u2").await;

    let (status, err) = app
        .post("/api/reflection", json!({ "sessionId": session, "userId": "u1" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err["error"], "AI service is not configured");

    let (status, _) = app
        .post(
            "/api/reflection",
            json!({ "sessionId": session, "userId": "u1", "text": "We made progress." }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn scores_manual_and_generated() {
    let model = ScriptedModel::new(SCORE_REPLY);
    let app = test_app(scripted_ai(model)).await;
    let session = app.start_session("u1", "u2").await;

    let (status, body) = app
        .post(
            "/api/score",
            json!({ "sessionId": session, "partnerId": "u1", "empathy": 4, "listening": 2, "respect": 5 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["score"]["empathy"], 4);

    let (status, body) = app
        .post("/api/score", json!({ "sessionId": session, "partnerId": "u2" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["score"]["listening"], 3);
    assert_eq!(body["score"]["summary"], "Both stayed calm.");

    let (_, loaded) = app.get(&format!("/api/session/{session}")).await;
    assert_eq!(loaded["scoreA"]["empathy"], 4);
    assert_eq!(loaded["scoreB"]["respect"], 5);

    let (status, _) = app
        .post("/api/score", json!({ "sessionId": session, "partnerId": "u3", "empathy": 1 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ending_a_session_scores_both_partners() {
    let model = ScriptedModel::new(SCORE_REPLY);
    let app = test_app(scripted_ai(model)).await;
    let session = app.start_session("u1", "u2").await;

    app.patch(&format!("/api/session/end/{session}")).await;
    app.idle().await;

    let (_, loaded) = app.get(&format!("/api/session/{session}")).await;
    assert_eq!(loaded["resolved"], true);
    assert_eq!(loaded["scoreA"]["empathy"], 4);
    assert_eq!(loaded["scoreB"]["empathy"], 4);
}

#[tokio::test]
async fn post_resolution_validation_and_duplicates() {
    let app = test_app(AiService::disabled()).await;

    let (status, _) = app
        .post("/api/post-resolution", json!({ "sessionId": "s1", "userId": "u1" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/api/post-resolution",
            json!({ "sessionId": "s1", "userId": "u1", "gratitude": "thanks", "attachmentScore": 9 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({ "sessionId": "s1", "userId": "u1", "gratitude": "thanks", "attachmentScore": 4 });
    let (status, saved) = app.post("/api/post-resolution", body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(saved["attachmentScore"], 4);

    let (status, _) = app.post("/api/post-resolution", body).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn insights_aggregate_a_users_history() {
    let app = test_app(AiService::disabled()).await;
    let session = app.start_session("u1", "u2").await;

    app.post(
        "/api/reflection",
        json!({ "sessionId": session, "userId": "u1", "text": "Calmer today." }),
    )
    .await;
    app.post(
        "/api/post-resolution",
        json!({ "sessionId": session, "userId": "u1", "gratitude": "thanks" }),
    )
    .await;
    app.post(
        "/api/score",
        json!({ "sessionId": session, "partnerId": "u1", "empathy": 3, "listening": 3, "respect": 3 }),
    )
    .await;

    let (status, insights) = app.get("/api/insights/u1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(insights["sessions"].as_array().unwrap().len(), 1);
    assert_eq!(insights["reflections"].as_array().unwrap().len(), 1);
    assert_eq!(insights["postFeedback"].as_array().unwrap().len(), 1);
    assert_eq!(insights["scores"].as_array().unwrap().len(), 1);

    let (_, other) = app.get("/api/insights/u3").await;
    assert_eq!(other["sessions"], json!([]));
}

#[tokio::test]
async fn moderate_endpoint() {
    let disabled = test_app(AiService::disabled()).await;
    let (status, _) = disabled
        .post("/api/moderate", json!({ "transcript": "you never help" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let model = ScriptedModel::new("That sounds frustrating. What would help?");
    let app = test_app(scripted_ai(model)).await;

    let (status, _) = app.post("/api/moderate", json!({ "speaker": "Sam" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            "/api/moderate",
            json!({ "transcript": "you never help", "speaker": "Sam", "context": "chores" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aiReply"], "That sounds frustrating. What would help?");
    assert_eq!(
        body["interrupt"],
        "Please let Sam finish their thought before responding."
    );
}

#[tokio::test]
async fn voice_moderation_returns_structured_verdict() {
    let model = ScriptedModel::new(
        r#"{"tone":"hostile","empathy":2,"clarity":6,"respect":1,"warning":true}"#,
    );
    let app = test_app(scripted_ai(model.clone())).await;

    let (status, body) = app
        .post(
            "/api/moderate/voice",
            json!({ "transcript": "whatever", "speaker": "u1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tone"], "hostile");
    assert_eq!(body["warning"], true);

    model.push("not json at all");
    let (status, err) = app
        .post(
            "/api/moderate/voice",
            json!({ "transcript": "whatever", "speaker": "u1" }),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err["error"], "AI request failed");
}

#[tokio::test]
async fn health_is_up() {
    let app = test_app(AiService::disabled()).await;
    let request = http::Request::builder()
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();
    use tower::ServiceExt;
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
