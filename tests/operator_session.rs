//! ---
//! chroma_section: "15-testing-qa-runbook"
//! chroma_subsection: "integration-tests"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "End-to-end operator sessions against the mock backend."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::time::Duration;

use chroma_common::ClientConfig;
use chroma_core::{ControlClient, RunState};
use chroma_msg::topic::Topic;
use chroma_msg::LogLine;
use chroma_net::{ChannelSettings, Endpoints, TelemetryHub};
use chroma_testharness::{MockBackend, MockSettings};
use tokio::time::{sleep, timeout, Instant};

const WITHIN: Duration = Duration::from_secs(3);

fn config_for(mock: &MockBackend) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.backend.base_url = mock.base_url();
    config.backend.request_timeout = Duration::from_secs(2);
    config.streams.reconnect_delay = Duration::from_millis(150);
    config
}

async fn eventually(within: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn console_text(client: &ControlClient) -> Vec<String> {
    client.with_view(|view| view.console.lines().map(|line| line.text.clone()).collect())
}

#[tokio::test]
async fn full_operator_session() {
    let mock = MockBackend::spawn_with(MockSettings {
        slider_delay: Duration::from_millis(30),
        ..MockSettings::default()
    })
    .await
    .unwrap();
    let client = ControlClient::builder(config_for(&mock)).build().unwrap();
    client.connect().await.unwrap();
    for topic in Topic::all() {
        assert!(mock.wait_for_connections(topic, 1, WITHIN).await, "{topic} never connected");
    }

    // Telemetry lands in arrival order.
    for step in 1..=3 {
        mock.publish_log("INFO", &format!("warming up {step}"));
    }
    assert!(eventually(WITHIN, || console_text(&client).len() >= 3).await);
    assert_eq!(
        console_text(&client),
        vec!["[INFO] warming up 1", "[INFO] warming up 2", "[INFO] warming up 3"]
    );

    // Tune two pairs at once; only the settled values matter.
    for value in [10, 12, 14, 16] {
        client.set_parameter("hueMin", value).unwrap();
    }
    for value in [200, 180, 150] {
        client.set_parameter("satMin", value).unwrap();
    }
    timeout(WITHIN, client.updates().wait_idle()).await.unwrap();
    let parameters = mock.parameters();
    assert_eq!(parameters["hueMin"], 16);
    assert_eq!(parameters["satMin"], 150);
    assert_eq!(mock.peak_in_flight("hueMin"), 1);
    assert_eq!(mock.peak_in_flight("satMin"), 1);

    // Start a script; the client rebuilds itself around the new run.
    client.select_script("WoodCutter.java").await.unwrap();
    client.start().await.unwrap();
    assert_eq!(mock.run_configs().len(), 1);
    assert_eq!(mock.run_configs()[0].script, "WoodCutter.java");
    let mut run_state = client.watch_run_state();
    timeout(WITHIN, run_state.wait_for(|state| state.is_running()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        client.run_state().await,
        RunState::Running {
            target: Some("WoodCutter.java".into())
        }
    );
    assert!(!console_text(&client).iter().any(|line| line.contains("warming up")));
    let gates = client.gates().await;
    assert!(gates.stop_enabled);
    assert!(!gates.start_enabled);
    assert!(!gates.selection_enabled);

    // The backend drops every stream; the client comes back on its own.
    let before: Vec<usize> = Topic::all()
        .into_iter()
        .map(|topic| mock.total_connections(topic))
        .collect();
    for topic in Topic::all() {
        mock.drop_connections(topic);
    }
    for (topic, before) in Topic::all().into_iter().zip(before) {
        assert!(
            eventually(WITHIN, || mock.total_connections(topic) > before
                && mock.live_connections(topic) == 1)
            .await,
            "{topic} did not reconnect"
        );
    }
    mock.publish_log("INFO", "back online");
    assert!(eventually(WITHIN, || console_text(&client).contains(&"[INFO] back online".to_owned())).await);
    sleep(Duration::from_millis(100)).await;
    let echoes = console_text(&client)
        .iter()
        .filter(|line| line.as_str() == "[INFO] back online")
        .count();
    assert_eq!(echoes, 1);

    // Stop; the backend's broadcast settles the state.
    client.stop().await.unwrap();
    assert!(!mock.is_running());
    timeout(WITHIN, run_state.wait_for(|state| !state.is_running()))
        .await
        .unwrap()
        .unwrap();
    let deadline = Instant::now() + WITHIN;
    while !client.gates().await.selection_enabled && Instant::now() < deadline {
        sleep(Duration::from_millis(10)).await;
    }
    assert!(client.gates().await.selection_enabled);

    client.shutdown().await.unwrap();
    for topic in Topic::all() {
        assert!(mock.wait_for_connections_below(topic, 1, WITHIN).await);
    }
    mock.shutdown().await.unwrap();
}

#[tokio::test]
async fn log_stream_keeps_order_across_reconnects() {
    let mock = MockBackend::spawn().await.unwrap();
    let endpoints = Endpoints::new(&mock.base_url()).unwrap();
    let hub = TelemetryHub::new(endpoints, ChannelSettings::new(Duration::from_millis(100)), 64);
    let mut logs = hub.logs();
    hub.connect(Topic::Logs).unwrap();
    // A second connect for the same topic is a no-op.
    assert!(!hub.connect(Topic::Logs).unwrap());
    assert!(mock.wait_for_connections(Topic::Logs, 1, WITHIN).await);

    mock.publish_log("INFO", "first");
    let first: LogLine = timeout(WITHIN, logs.recv()).await.unwrap().unwrap();
    mock.drop_connections(Topic::Logs);
    assert!(eventually(WITHIN, || mock.total_connections(Topic::Logs) >= 2
        && mock.live_connections(Topic::Logs) == 1)
    .await);
    mock.publish_log("WARN", "second");
    let second: LogLine = timeout(WITHIN, logs.recv()).await.unwrap().unwrap();

    assert_eq!(first.render(), "[INFO] first");
    assert_eq!(second.render(), "[WARN] second");
    assert_eq!(mock.peak_connections(Topic::Logs), 1);

    hub.shutdown().await.unwrap();
    assert!(mock.wait_for_connections_below(Topic::Logs, 1, WITHIN).await);
    mock.shutdown().await.unwrap();
}
