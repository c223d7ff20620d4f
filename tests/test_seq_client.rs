use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use seq_mcp::client::{ConnectionFactory, HttpSeqClient, SeqClient, WorkspaceConnectionFactory};
use seq_mcp::config::{SeqConfig, WorkspaceConfig};
use seq_mcp::error::SeqMcpError;
use seq_mcp::model::Event;

fn raw_event(id: &str) -> Value {
    json!({
        "Id": id,
        "Timestamp": "2024-05-01T10:00:00.0000000Z",
        "Level": "Error",
        "RenderedMessage": format!("failed {id}"),
        "Properties": [{ "Name": "AppName", "Value": "pims-services" }],
        "MessageTemplateTokens": [{ "Text": "failed" }]
    })
}

fn seq_config(page_size: usize) -> SeqConfig {
    SeqConfig {
        page_size,
        poll_interval_ms: 10,
        ..SeqConfig::default()
    }
}

async fn collect(client: &HttpSeqClient, filter: &str, count: usize) -> Result<Vec<Event>, SeqMcpError> {
    let mut stream = client.enumerate_events(filter, count, true);
    let mut out = Vec::new();
    while let Some(ev) = stream.next().await {
        out.push(ev?);
    }
    Ok(out)
}

fn ids(events: &[Event]) -> Vec<&str> {
    events.iter().filter_map(|e| e.id.as_deref()).collect()
}

#[tokio::test]
async fn enumerate_sends_filter_count_and_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(query_param("filter", "AppName = 'pims-services'"))
        .and(query_param("count", "2"))
        .and(query_param("render", "true"))
        .and(header("X-Seq-ApiKey", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([raw_event("e1"), raw_event("e2")])))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpSeqClient::new(&server.uri(), Some("secret".into()), &seq_config(500)).unwrap();
    let events = collect(&client, "AppName = 'pims-services'", 2).await.unwrap();

    assert_eq!(ids(&events), vec!["e1", "e2"]);
    assert_eq!(events[0].rendered_message.as_deref(), Some("failed e1"));
    assert!(events[0].extra.contains_key("MessageTemplateTokens"));
}

#[tokio::test]
async fn enumerate_pages_with_after_id() {
    let server = MockServer::start().await;
    // 更具体的 mock 先挂载，优先匹配
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(query_param("afterId", "e2"))
        .and(query_param("count", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([raw_event("e3")])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(query_param("count", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([raw_event("e1"), raw_event("e2")])))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpSeqClient::new(&server.uri(), None, &seq_config(2)).unwrap();
    let events = collect(&client, "", 3).await.unwrap();

    assert_eq!(ids(&events), vec!["e1", "e2", "e3"]);
}

#[tokio::test]
async fn enumerate_stops_on_short_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([raw_event("only")])))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpSeqClient::new(&server.uri(), None, &seq_config(5)).unwrap();
    let events = collect(&client, "@Level = 'Error'", 100).await.unwrap();

    assert_eq!(ids(&events), vec!["only"]);
}

#[tokio::test]
async fn non_success_status_becomes_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(400).set_body_string("syntax error near 'and'"))
        .mount(&server)
        .await;

    let client = HttpSeqClient::new(&server.uri(), None, &seq_config(500)).unwrap();
    let err = collect(&client, "and and", 10).await.unwrap_err();

    match err {
        SeqMcpError::Server { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("syntax error"));
        }
        e => panic!("unexpected error: {e:?}"),
    }
}

#[tokio::test]
async fn list_signals_keeps_shared_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/signals"))
        .and(query_param("shared", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "Id": "signal-1", "Title": "Errors", "Filters": [{ "Filter": "@Level = 'Error'" }] },
            { "Id": "signal-2", "Title": "Mine", "OwnerId": "user-9", "Filters": [] }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpSeqClient::new(&server.uri(), None, &seq_config(500)).unwrap();
    let signals = client.list_signals(true).await.unwrap();

    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].title, "Errors");
}

/// 模拟 Seq 的 api/events：按 fromDateUtc 过滤事件时间戳，最近写入的排在前面。
#[derive(Clone, Default)]
struct EventStore {
    events: Arc<Mutex<Vec<Value>>>,
    requests: Arc<AtomicUsize>,
}

impl EventStore {
    fn push(&self, id: &str, at: DateTime<Utc>) {
        let mut ev = raw_event(id);
        ev["Timestamp"] = json!(at.to_rfc3339_opts(SecondsFormat::Millis, true));
        self.events.lock().unwrap().push(ev);
    }

    async fn wait_for_requests(&self, n: usize) {
        while self.requests.load(Ordering::SeqCst) < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Respond for EventStore {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let from = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "fromDateUtc")
            .and_then(|(_, v)| DateTime::parse_from_rfc3339(&v).ok());
        let events: Vec<Value> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|ev| {
                let ts = ev["Timestamp"]
                    .as_str()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok());
                match (from, ts) {
                    (Some(from), Some(ts)) => ts >= from,
                    _ => true,
                }
            })
            .cloned()
            .collect();
        ResponseTemplate::new(200).set_body_json(events)
    }
}

async fn next_id(stream: &mut seq_mcp::client::EventStream, wait: Duration) -> Option<String> {
    match tokio::time::timeout(wait, stream.next()).await {
        Ok(Some(ev)) => ev.unwrap().id,
        _ => None,
    }
}

#[tokio::test]
async fn live_stream_skips_events_that_existed_before_subscribing() {
    let server = MockServer::start().await;
    let store = EventStore::default();
    let t0 = Utc::now();
    store.push("before", t0 - chrono::Duration::seconds(5));
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(query_param("filter", "@Level = 'Error'"))
        .respond_with(store.clone())
        .mount(&server)
        .await;

    let client = HttpSeqClient::new(&server.uri(), None, &seq_config(50)).unwrap();
    let mut stream = client.stream_events(Some("@Level = 'Error'"));

    let feeder = store.clone();
    tokio::spawn(async move {
        feeder.wait_for_requests(1).await;
        feeder.push("e1", t0 + chrono::Duration::seconds(1));
        feeder.push("e2", t0 + chrono::Duration::seconds(2));
    });

    assert_eq!(next_id(&mut stream, Duration::from_secs(2)).await.as_deref(), Some("e1"));
    assert_eq!(next_id(&mut stream, Duration::from_secs(2)).await.as_deref(), Some("e2"));
    // 后续轮询只会返回已见过的事件
    assert_eq!(next_id(&mut stream, Duration::from_millis(100)).await, None);
}

#[tokio::test]
async fn live_stream_delivers_late_arrivals_with_older_timestamps() {
    let server = MockServer::start().await;
    let store = EventStore::default();
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .respond_with(store.clone())
        .mount(&server)
        .await;

    let client = HttpSeqClient::new(&server.uri(), None, &seq_config(50)).unwrap();
    let mut stream = client.stream_events(None);
    let t0 = Utc::now();

    let feeder = store.clone();
    tokio::spawn(async move {
        feeder.wait_for_requests(1).await;
        feeder.push("A", t0 + chrono::Duration::seconds(3));
    });
    assert_eq!(next_id(&mut stream, Duration::from_secs(2)).await.as_deref(), Some("A"));

    // 时钟落后的上报方：到达更晚，时间戳更早
    store.push("B", t0 + chrono::Duration::seconds(1));
    assert_eq!(next_id(&mut stream, Duration::from_secs(2)).await.as_deref(), Some("B"));
}

#[tokio::test]
async fn factory_routes_workspaces_to_their_servers() {
    let prod = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/signals"))
        .and(header("X-Seq-ApiKey", "prod-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&prod)
        .await;

    let mut cfg = seq_config(500);
    cfg.default_workspace = "prod".into();
    cfg.workspaces.insert(
        "prod".into(),
        WorkspaceConfig {
            server_url: prod.uri(),
            api_key: Some("prod-key".into()),
            api_key_env: None,
        },
    );
    let factory = WorkspaceConnectionFactory::new(&cfg).unwrap();

    let client = factory.connect(None).unwrap();
    assert!(client.list_signals(true).await.unwrap().is_empty());
    assert!(matches!(
        factory.connect(Some("dev")),
        Err(SeqMcpError::UnknownWorkspace(_))
    ));
}
