use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchboard_common::Message;
use switchboard_config::ConnectorConfig;
use switchboard_core::Connector;
use switchboard_social::MastodonConnector;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector(server: &MockServer, timeline: &str, interval_ms: u64) -> MastodonConnector {
    let mut cfg = ConnectorConfig::new("mastodon-1", "mastodon")
        .with_option("base_url", server.uri())
        .with_option("access_token", "tok")
        .with_option("timeline", timeline);
    cfg.poll_interval_ms = Some(interval_ms);
    MastodonConnector::from_config(&cfg).unwrap()
}

fn collect(c: &MastodonConnector) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    c.on_message(Arc::new(move |m: Message| s.lock().unwrap().push(m.id)));
    seen
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn since_id_tracks_numeric_maximum() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/timelines/public"))
        .and(query_param("limit", "20"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "10", "content": "<p>ten</p>", "visibility": "public", "account": {"id": "1"}},
            {"id": "9", "content": "<p>nine</p>", "visibility": "public", "account": {"id": "1"}},
            {
                "id": "11",
                "content": "<p>eleven</p>",
                "visibility": "public",
                "account": {"id": "2"}
            },
            {"content": "no id, skipped"}
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // long interval: exactly one round runs
    let c = connector(&server, "public", 60_000);
    let seen = collect(&c);
    c.start().await;
    wait_for(|| seen.lock().unwrap().len() == 3).await;
    c.stop().await;

    assert_eq!(*seen.lock().unwrap(), vec!["10", "9", "11"]);
    assert_eq!(c.since_id().as_deref(), Some("11"));
}

#[tokio::test]
async fn next_round_sends_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/timelines/home"))
        .and(query_param("since_id", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/timelines/home"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "42"}])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let c = connector(&server, "home", 30);
    let seen = collect(&c);
    c.start().await;
    wait_for(|| {
        seen.lock().unwrap().len() == 1 && c.since_id().as_deref() == Some("42")
    })
    .await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    c.stop().await;

    let requests = server.received_requests().await.unwrap();
    assert!(
        requests
            .iter()
            .any(|r| r.url.query_pairs().any(|(k, v)| k == "since_id" && v == "42"))
    );
    // empty rounds are not errors and do not move the cursor
    assert_eq!(c.since_id().as_deref(), Some("42"));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn mentions_keep_only_mention_notifications() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/notifications"))
        .and(query_param("types[]", "mention"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "500", "type": "mention", "status": {"id": "9001", "content": "<p>@me hi</p>"}},
            {"id": "501", "type": "favourite", "status": {"id": "9002"}},
            {"id": "502", "type": "mention"}
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let c = connector(&server, "mentions", 60_000);
    let seen = collect(&c);
    c.start().await;
    wait_for(|| !seen.lock().unwrap().is_empty()).await;
    c.stop().await;

    assert_eq!(*seen.lock().unwrap(), vec!["9001"]);
    assert_eq!(c.since_id().as_deref(), Some("500"));
}

#[tokio::test]
async fn webhook_mode_does_not_poll() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let mut cfg = ConnectorConfig::new("mastodon-1", "mastodon")
        .with_option("base_url", server.uri())
        .with_option("access_token", "tok");
    cfg.webhook_enabled = true;
    let c = MastodonConnector::from_config(&cfg).unwrap();

    c.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(c.status().running);
    c.stop().await;
}
