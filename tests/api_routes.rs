//! HTTP control surface, exercised in-process with `tower::ServiceExt`.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{RecordingLlm, RecordingMailer, ScriptedTransport, language_model, text_email};
use inbox_assist::api::{ApiState, api_routes};
use inbox_assist::channels::MailboxWatcher;
use inbox_assist::pipeline::ResponsePipeline;
use inbox_assist::scheduler::{
    ActionScheduler, CadenceSchedules, DEFAULT_DAILY_CRON, DEFAULT_HOURLY_CRON, JobRegistry,
};
use inbox_assist::store::{MemoryStore, User};

fn app(inbox: Vec<Vec<u8>>) -> (Router, Arc<ActionScheduler>, Arc<RecordingMailer>) {
    let store = Arc::new(MemoryStore::with_users([User::new("42", "alice@example.com")]));
    let lm = language_model(RecordingLlm::new("reply"), store.clone());
    let mailer = RecordingMailer::new();

    let pipeline = Arc::new(ResponsePipeline::new(
        store.clone(),
        lm.clone(),
        mailer.clone(),
    ));
    let watcher = Arc::new(MailboxWatcher::new(ScriptedTransport::new(inbox), pipeline));
    let scheduler = Arc::new(ActionScheduler::new(
        store,
        lm,
        mailer.clone(),
        Arc::new(JobRegistry::new()),
        CadenceSchedules::new(DEFAULT_HOURLY_CRON, DEFAULT_DAILY_CRON).unwrap(),
    ));

    let router = api_routes(ApiState {
        scheduler: scheduler.clone(),
        watcher,
    });
    (router, scheduler, mailer)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health() {
    let (app, _, _) = app(vec![]);
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn schedule_list_and_stop() {
    let (app, scheduler, _) = app(vec![]);

    let (status, body) = send(
        &app,
        "POST",
        "/api/schedule",
        Some(json!({"action": "summarize my notes", "schedule": "daily", "user_id": "42"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "Action \"summarize my notes\" scheduled to run daily"
    );

    let (status, body) = send(&app, "GET", "/api/schedule", None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["user_id"], "42");
    assert_eq!(jobs[0]["cadence"], "daily");

    let stop = Some(json!({"user_id": "42"}));
    let (status, body) = send(&app, "POST", "/api/schedule/stop", stop.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Scheduled action stopped");
    assert_eq!(body["stopped"], true);

    let (_, body) = send(&app, "POST", "/api/schedule/stop", stop).await;
    assert_eq!(body["message"], "No scheduled action found for this user");
    assert_eq!(body["stopped"], false);

    assert!(scheduler.jobs().await.is_empty());
}

#[tokio::test]
async fn schedule_unknown_user_is_404() {
    let (app, _, _) = app(vec![]);
    let (status, body) = send(
        &app,
        "POST",
        "/api/schedule",
        Some(json!({"action": "x", "schedule": "hourly", "user_id": "missing"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn schedule_unknown_cadence_is_400() {
    let (app, scheduler, _) = app(vec![]);
    let (status, _) = send(
        &app,
        "POST",
        "/api/schedule",
        Some(json!({"action": "x", "schedule": "weekly", "user_id": "42"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(scheduler.jobs().await.is_empty());
}

#[tokio::test]
async fn manual_poll_returns_report() {
    let (app, _, mailer) = app(vec![
        text_email("alice@example.com", "hi", "hello"),
        text_email("stranger@example.org", "hi", "hello"),
    ]);

    let (status, body) = send(&app, "POST", "/api/mail/poll", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"fetched": 2, "replied": 1, "dropped": 1}));
    assert_eq!(mailer.sent().len(), 1);
}
