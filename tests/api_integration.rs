//! Integration tests for the workflow REST API and Slack webhook.
//!
//! Each test spins up an Axum server on a random port and drives it over
//! real HTTP with reqwest.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, http::StatusCode, routing::post};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{RecordingNotifier, ScriptedMail, engine_with_inbox};
use inbox_assist::api::workflow_routes;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

struct Server {
    base: String,
    client: reqwest::Client,
    mail: Arc<ScriptedMail>,
    notifier: Arc<RecordingNotifier>,
}

/// Start an Axum server on a random port over an inbox of `ids`.
async fn start_server(ids: &[&str], reply_to: &[&str]) -> Server {
    let (engine, mail, notifier) = engine_with_inbox(ids, reply_to);
    let app = workflow_routes(engine);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Server {
        base: format!("http://127.0.0.1:{port}"),
        client: reqwest::Client::new(),
        mail,
        notifier,
    }
}

impl Server {
    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    /// Post an interaction; Slack only ever sees an empty 200.
    async fn slack(&self, payload: Value) {
        let resp = self
            .client
            .post(format!("{}/slack/actions", self.base))
            .form(&[("payload", payload.to_string())])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert!(resp.text().await.unwrap().is_empty());
    }
}

/// Stand-in for Slack's `response_url` endpoint, capturing what is posted.
async fn start_response_hook() -> (String, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new().route(
        "/hook",
        post(move |Json(body): Json<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(body);
                StatusCode::OK
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{port}/hook"), rx)
}

fn slack_click(user: &str, action_id: &str, value: &str, response_url: &str) -> Value {
    json!({
        "type": "block_actions",
        "user": { "id": user },
        "response_url": response_url,
        "actions": [{ "action_id": action_id, "value": value }],
    })
}

async fn next_follow_up(rx: &mut mpsc::UnboundedReceiver<Value>) -> String {
    let body = rx.recv().await.unwrap();
    assert_eq!(body["replace_original"], true);
    body["text"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_ok() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(&[], &[]).await;
        let (status, body) = server.get("/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn start_resume_and_inspect_over_http() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(&["m1", "m2"], &["m1", "m2"]).await;

        let (status, started) = server
            .post("/api/workflow/start", json!({"user_id": "U1"}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(started["status"], "paused");
        assert_eq!(started["draft"]["index"], 0);
        assert_eq!(started["draft"]["total"], 2);
        let run_id = started["run_id"].as_str().unwrap().to_string();

        let (status, again) = server
            .post("/api/workflow/start", json!({"user_id": "U1"}))
            .await;
        assert_eq!(status, 409);
        assert_eq!(again["error"], "already_running");

        let (status, checkpoint) = server.get("/api/workflow/U1").await;
        assert_eq!(status, 200);
        assert_eq!(checkpoint["phase"], "awaiting_approval");
        assert_eq!(checkpoint["current_draft_index"], 0);

        let (status, active) = server.get("/api/workflows/active").await;
        assert_eq!(status, 200);
        assert_eq!(active.as_array().unwrap().len(), 1);
        assert_eq!(active[0]["stale"], false);

        let (status, next) = server
            .post(
                "/api/workflow/resume",
                json!({"user_id": "U1", "action": "approve_draft", "draft_index": 0, "run_id": run_id}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(next["draft"]["index"], 1);

        let (status, dup) = server
            .post(
                "/api/workflow/resume",
                json!({"user_id": "U1", "action": "approve_draft", "draft_index": 0}),
            )
            .await;
        assert_eq!(status, 409);
        assert_eq!(dup["error"], "stale_decision");

        let (status, missing) = server
            .post(
                "/api/workflow/resume",
                json!({"user_id": "U1", "action": "save_draft"}),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(missing["error"], "invalid_decision");

        let (status, done) = server
            .post(
                "/api/workflow/resume",
                json!({"user_id": "U1", "action": "save_draft", "draft_index": 1}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(done["status"], "completed");
        assert!(done["summary"].as_str().unwrap().contains("1 approved, 0 rejected, 1 saved"));

        assert_eq!(*server.mail.sent.lock().unwrap(), vec!["draft-m1"]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn resume_errors_map_to_statuses() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(&["m1"], &["m1"]).await;

        let (status, body) = server
            .post(
                "/api/workflow/resume",
                json!({"user_id": "nobody", "action": "approve_draft", "draft_index": 0}),
            )
            .await;
        assert_eq!(status, 404);
        assert_eq!(body["error"], "no_active_run");

        let (status, body) = server
            .post(
                "/api/workflow/resume",
                json!({"user_id": "U1", "action": "snooze", "draft_index": 0}),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "invalid_decision");

        let (status, _) = server
            .post("/api/workflow/start", json!({"user_id": "  "}))
            .await;
        assert_eq!(status, 400);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn delete_clears_a_paused_run() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(&["m1"], &["m1"]).await;
        server
            .post("/api/workflow/start", json!({"user_id": "U1"}))
            .await;

        let resp = server
            .client
            .delete(format!("{}/api/workflow/U1", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let (status, _) = server.get("/api/workflow/U1").await;
        assert_eq!(status, 404);

        let (status, started) = server
            .post("/api/workflow/start", json!({"user_id": "U1"}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(started["status"], "paused");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn slack_button_click_resumes_the_run() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(&["m1"], &["m1"]).await;
        let (hook, mut follow_ups) = start_response_hook().await;
        let (_, started) = server
            .post("/api/workflow/start", json!({"user_id": "U1"}))
            .await;
        let run_id = started["run_id"].as_str().unwrap().to_string();

        let requests = server.notifier.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1.to_string(), run_id);

        let click = slack_click("U1", "reject_draft", &format!("{run_id}:0"), &hook);
        server.slack(click.clone()).await;
        let text = next_follow_up(&mut follow_ups).await;
        assert!(text.contains("All drafts reviewed"), "{text}");
        assert_eq!(*server.mail.deleted.lock().unwrap(), vec!["draft-m1"]);

        // A second click on the same button is acknowledged but not applied.
        server.slack(click).await;
        let text = next_follow_up(&mut follow_ups).await;
        assert!(text.contains("already handled"), "{text}");
        assert_eq!(server.mail.deleted.lock().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn slack_click_without_draft_reference_is_ignored() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(&["m1", "m2"], &["m1", "m2"]).await;
        let (hook, mut follow_ups) = start_response_hook().await;
        server
            .post("/api/workflow/start", json!({"user_id": "U1"}))
            .await;

        let forged = json!({
            "type": "block_actions",
            "user": { "id": "U1" },
            "response_url": hook,
            "actions": [{ "action_id": "approve_draft" }],
        });
        server.slack(forged.clone()).await;
        server.slack(forged).await;

        let nothing = timeout(Duration::from_millis(200), follow_ups.recv()).await;
        assert!(nothing.is_err(), "unexpected follow-up: {nothing:?}");
        assert!(server.mail.sent.lock().unwrap().is_empty());

        let (_, checkpoint) = server.get("/api/workflow/U1").await;
        assert_eq!(checkpoint["phase"], "awaiting_approval");
        assert_eq!(checkpoint["current_draft_index"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn slack_garbage_is_acknowledged() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(&[], &[]).await;
        server.slack(json!({"type": "block_actions"})).await;
    })
    .await
    .expect("test timed out");
}
