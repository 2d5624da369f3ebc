#[path = "support/mod.rs"]
mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use chrono::Utc;
use fibr_core::config::WebhookConfig;
use fibr_core::exclusive::Exclusive;
use fibr_core::mirror::NoopMirror;
use fibr_core::model::{Event, EventType, Item, WebhookKind};
use fibr_core::storage::{LocalStorage, Storage};
use fibr_core::webhook::{NewWebhook, SIGNATURE_HEADER, WebhookService, sign};
use fibr_core::{Consumer, PipelineError};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use support::temp_storage;

type Captured = mpsc::UnboundedSender<(HeaderMap, Bytes)>;

async fn capture(State(sink): State<Captured>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let _ = sink.send((headers, body));
    StatusCode::NO_CONTENT
}

/// Serves `POST /hook` on an ephemeral port and hands every request back.
async fn receiver() -> (String, mpsc::UnboundedReceiver<(HeaderMap, Bytes)>) {
    let (sink, requests) = mpsc::unbounded_channel();
    let app = Router::new().route("/hook", post(capture)).with_state(sink);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind receiver");
    let addr = listener.local_addr().expect("receiver address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve receiver");
    });

    (format!("http://{addr}/hook"), requests)
}

fn service(storage: &Arc<LocalStorage>, config: WebhookConfig) -> WebhookService {
    WebhookService::new(
        Arc::clone(storage) as Arc<dyn Storage>,
        Arc::new(NoopMirror),
        Exclusive::disabled(),
        config,
    )
    .expect("webhook service")
}

fn uploads_under(pathname: &str, url: &str) -> NewWebhook {
    NewWebhook {
        pathname: pathname.to_string(),
        recursive: true,
        url: url.to_string(),
        types: vec![EventType::Upload],
        ..NewWebhook::default()
    }
}

fn upload(pathname: &str) -> Event {
    Event::upload(Item::file(pathname, 1, Utc::now()))
}

#[tokio::test]
async fn bursts_are_delivered_as_one_signed_batch() {
    let (_dir, storage) = temp_storage();
    let (url, mut requests) = receiver().await;
    let hooks = service(
        &storage,
        WebhookConfig {
            debounce_ms: 50,
            secret: Some("s3cret".into()),
            extra_headers: BTreeMap::from([("X-Instance".to_string(), "test".to_string())]),
            ..WebhookConfig::default()
        },
    );
    let cancel = CancellationToken::new();
    let tasks = hooks.start(cancel.clone()).await.expect("start");

    let mut request = uploads_under("/photos", &url);
    request.headers.insert("Authorization".into(), "Bearer token".into());
    hooks.create(&cancel, request).await.expect("create");

    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        hooks
            .handle(&cancel, &upload(&format!("/photos/{name}")))
            .await
            .expect("handle");
    }
    // Not subscribed to deletes, nor to this directory.
    hooks
        .handle(&cancel, &Event::delete(Item::file("/photos/d.jpg", 1, Utc::now())))
        .await
        .expect("handle delete");
    hooks.handle(&cancel, &upload("/docs/e.pdf")).await.expect("handle other");

    let (headers, body) = tokio::time::timeout(Duration::from_secs(5), requests.recv())
        .await
        .expect("delivery in time")
        .expect("delivery");

    let events: serde_json::Value = serde_json::from_slice(&body).expect("json body");
    let events = events.as_array().expect("array body");
    assert_eq!(events.len(), 3);

    let expected = sign("s3cret", &body).expect("sign");
    assert_eq!(headers[SIGNATURE_HEADER], expected.as_str());
    assert_eq!(headers["x-instance"], "test");
    assert_eq!(headers["authorization"], "Bearer token");
    assert_eq!(headers["content-type"], "application/json");

    // A single batch for the whole burst.
    let extra = tokio::time::timeout(Duration::from_millis(300), requests.recv()).await;
    assert!(extra.is_err(), "burst delivered more than once");

    cancel.cancel();
    for task in tasks {
        task.await.expect("task join");
    }
}

#[tokio::test]
async fn unsigned_deliveries_go_out_immediately_before_start() {
    let (_dir, storage) = temp_storage();
    let (url, mut requests) = receiver().await;
    let hooks = service(&storage, WebhookConfig::default());
    let cancel = CancellationToken::new();

    hooks.create(&cancel, uploads_under("/", &url)).await.expect("create");
    let matched = hooks.notify(&upload("/top.jpg")).await.expect("notify");
    assert_eq!(matched, 1);

    let (headers, body) = tokio::time::timeout(Duration::from_secs(5), requests.recv())
        .await
        .expect("delivery in time")
        .expect("delivery");
    assert!(!headers.contains_key(SIGNATURE_HEADER));
    let events: serde_json::Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(events.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn chat_kinds_get_message_bodies_without_signature() {
    let (_dir, storage) = temp_storage();
    let (discord_url, mut discord_requests) = receiver().await;
    let (slack_url, mut slack_requests) = receiver().await;
    let hooks = service(
        &storage,
        WebhookConfig {
            secret: Some("s3cret".into()),
            ..WebhookConfig::default()
        },
    );
    let cancel = CancellationToken::new();

    for (kind, url) in [(WebhookKind::Discord, &discord_url), (WebhookKind::Slack, &slack_url)] {
        let request = NewWebhook {
            kind,
            ..uploads_under("/photos", url)
        };
        hooks.create(&cancel, request).await.expect("create");
    }

    let event = upload("/photos/cat.jpg").with_metadata("user_agent", "curl");
    assert_eq!(hooks.notify(&event).await.expect("notify"), 2);

    let (headers, body) = tokio::time::timeout(Duration::from_secs(5), discord_requests.recv())
        .await
        .expect("discord delivery in time")
        .expect("discord delivery");
    assert!(!headers.contains_key(SIGNATURE_HEADER));
    let message: serde_json::Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(message["content"], "1 new event in `/photos`");
    assert_eq!(message["embeds"][0]["title"], "cat.jpg");
    assert_eq!(message["embeds"][0]["description"], "`/photos/cat.jpg` uploaded");
    assert_eq!(message["embeds"][0]["fields"][0]["name"], "user_agent");
    assert_eq!(message["embeds"][0]["fields"][0]["value"], "curl");

    let (headers, body) = tokio::time::timeout(Duration::from_secs(5), slack_requests.recv())
        .await
        .expect("slack delivery in time")
        .expect("slack delivery");
    assert!(!headers.contains_key(SIGNATURE_HEADER));
    assert_eq!(headers["content-type"], "application/json");
    let message: serde_json::Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(message["text"], "1 new event in `/photos`");
    assert_eq!(message["blocks"][0]["type"], "section");
    assert_eq!(message["blocks"][0]["text"]["type"], "mrkdwn");
    assert_eq!(message["blocks"][0]["text"]["text"], "`/photos/cat.jpg` uploaded");
    assert_eq!(message["blocks"][0]["fields"][0]["text"], "*user_agent*\ncurl");
}

#[tokio::test]
async fn registrations_follow_renames_and_deletes() {
    let (_dir, storage) = temp_storage();
    let hooks = service(&storage, WebhookConfig::default());
    let cancel = CancellationToken::new();

    let nested = hooks
        .create(&cancel, uploads_under("/photos/2024", "http://127.0.0.1:9/a"))
        .await
        .expect("create nested");
    let sibling = hooks
        .create(&cancel, uploads_under("/photos2", "http://127.0.0.1:9/b"))
        .await
        .expect("create sibling");

    let rename = Event::rename(
        Item::directory("/photos", Utc::now()),
        Item::directory("/archive", Utc::now()),
    );
    hooks.handle(&cancel, &rename).await.expect("rename");

    assert_eq!(
        hooks.get(&nested).await.map(|hook| hook.pathname),
        Some("/archive/2024".to_string())
    );
    assert_eq!(
        hooks.get(&sibling).await.map(|hook| hook.pathname),
        Some("/photos2".to_string())
    );

    hooks
        .handle(&cancel, &Event::delete(Item::directory("/archive", Utc::now())))
        .await
        .expect("delete");
    assert!(hooks.get(&nested).await.is_none());
    assert!(hooks.get(&sibling).await.is_some());

    // Persisted state survives a restart.
    let reloaded = service(&storage, WebhookConfig::default());
    let restart = CancellationToken::new();
    let tasks = reloaded.start(restart.clone()).await.expect("reload");
    let ids: Vec<String> = reloaded.list().await.into_iter().map(|hook| hook.id).collect();
    assert_eq!(ids, vec![sibling]);
    restart.cancel();
    for task in tasks {
        task.await.expect("task join");
    }
}

#[tokio::test]
async fn similar_registrations_share_an_id() {
    let (_dir, storage) = temp_storage();
    let hooks = service(&storage, WebhookConfig::default());
    let cancel = CancellationToken::new();

    let mut first = uploads_under("/photos", "http://127.0.0.1:9/hook");
    first.types = vec![EventType::Upload, EventType::Delete];
    let mut second = first.clone();
    second.types = vec![EventType::Delete, EventType::Upload];

    let mut on_slack = first.clone();
    on_slack.kind = WebhookKind::Slack;

    let id = hooks.create(&cancel, first).await.expect("create");
    assert_eq!(hooks.create(&cancel, second).await.expect("create again"), id);
    assert_eq!(hooks.list().await.len(), 1);

    let slack = hooks.create(&cancel, on_slack).await.expect("create slack");
    assert_ne!(slack, id);
    hooks.delete(&cancel, &slack).await.expect("delete slack");

    let missing_types = NewWebhook {
        types: Vec::new(),
        ..uploads_under("/photos", "http://127.0.0.1:9/hook")
    };
    assert!(matches!(
        hooks.create(&cancel, missing_types).await,
        Err(PipelineError::Config(_))
    ));

    hooks.delete(&cancel, &id).await.expect("delete");
    assert!(matches!(
        hooks.delete(&cancel, &id).await,
        Err(PipelineError::NotFound(_))
    ));
}
