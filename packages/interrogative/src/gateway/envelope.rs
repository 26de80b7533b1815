//! Wire framing for the main session socket: `{"type": ..., "data": ...}`.

use event_bus::{Event, SourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Keep-alive frame sent by viewers; never published.
pub const PING: &str = "PING";

#[derive(Deserialize)]
struct Inbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Serialize)]
struct Outbound<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a Value,
}

/// Parse a viewer frame into an event attributed to `source`.
///
/// Any `source` the viewer supplied is discarded. Returns `None` for frames
/// that are not envelopes.
pub fn parse_envelope(text: &str, source: SourceId) -> Option<Event> {
    let inbound: Inbound = serde_json::from_str(text).ok()?;
    if inbound.kind.is_empty() {
        return None;
    }
    Some(Event::new(inbound.kind, inbound.data).from_source(source))
}

pub fn encode(event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Outbound {
        kind: &event.kind,
        data: &event.data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_injects_source() {
        let me = SourceId::new_v4();
        let spoofed = SourceId::new_v4();
        let text = json!({ "type": "files:file:open", "source": spoofed, "data": { "path": "/a" } })
            .to_string();

        let event = parse_envelope(&text, me).unwrap();
        assert_eq!(event.kind, "files:file:open");
        assert_eq!(event.source, Some(me));
        assert_eq!(event.data["path"], "/a");
    }

    #[test]
    fn test_missing_data_is_null() {
        let event = parse_envelope(r#"{"type":"connected"}"#, SourceId::new_v4()).unwrap();
        assert!(event.data.is_null());
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        let id = SourceId::new_v4();
        assert!(parse_envelope("PING", id).is_none());
        assert!(parse_envelope("{", id).is_none());
        assert!(parse_envelope(r#"{"data":{}}"#, id).is_none());
        assert!(parse_envelope(r#"{"type":""}"#, id).is_none());
        assert!(parse_envelope(r#"[1,2]"#, id).is_none());
    }

    #[test]
    fn test_encode_omits_source() {
        let event = Event::new("register", json!({ "role": "admin" })).from_source(SourceId::new_v4());
        let frame: Value = serde_json::from_str(&encode(&event).unwrap()).unwrap();
        assert_eq!(frame, json!({ "type": "register", "data": { "role": "admin" } }));
    }
}
