//! ---
//! chroma_section: "02-messaging-ipc-data-model"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Wire types and payload codecs."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use chroma_msg::topic::Topic;
use chroma_msg::{LogLevel, TelemetryEvent};

#[test]
fn mixed_backend_session_decodes_per_topic() {
    let session = [
        (Topic::State, "true"),
        (Topic::Logs, r#"{"level":"INFO","message":"Starting DemoMiner"}"#),
        (Topic::SemanticState, r#"{"label":"Searching","css":"primary"}"#),
        (Topic::Stats, r#"{"time":"00:00:01","cycles":0,"inputs":0,"objects":0}"#),
        (Topic::Logs, "java.lang.IllegalStateException: window not found"),
        (Topic::Viewport, "data:image/png;base64,AAAA"),
        (Topic::Stats, r#"{"time":"00:00:02""#),
        (Topic::State, "false"),
    ];

    let mut decoded = Vec::new();
    let mut rejected = Vec::new();
    for (topic, raw) in session {
        match TelemetryEvent::decode(topic, raw) {
            Ok(event) => {
                assert_eq!(event.topic(), topic);
                decoded.push(event);
            }
            Err(err) => rejected.push(err.to_string()),
        }
    }

    assert_eq!(decoded.len(), 7);
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].starts_with("malformed stats payload"));

    let levels: Vec<LogLevel> = decoded
        .iter()
        .filter_map(|event| match event {
            TelemetryEvent::Log(line) => Some(line.level.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(levels, vec![LogLevel::Info, LogLevel::Info]);
    assert_eq!(
        decoded.last(),
        Some(&TelemetryEvent::RunState { running: false })
    );
}

#[test]
fn events_serialise_with_kind_tag() -> anyhow::Result<()> {
    let event = TelemetryEvent::decode(Topic::State, "true")?;
    let value = serde_json::to_value(&event)?;
    assert_eq!(value["kind"], "run_state");
    assert_eq!(value["data"]["running"], true);
    Ok(())
}
