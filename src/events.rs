//! Inbound session-event model and the NDJSON feed thread.
//!
//! The transport that produces these records is out of scope; this module
//! owns only the boundary: message shapes, the event-category mapping, and
//! a reader thread that forwards stdin lines into the winit event loop.

use std::io::BufRead;
use std::thread;

use log::{debug, info};
use serde::Deserialize;
use winit::event_loop::EventLoopProxy;

/// One activity record for a session. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionEvent {
    pub event_type: String,
    pub session_key: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub pan_or_position_hint: Option<f32>,
    #[serde(default)]
    pub tool_or_category: Option<String>,
}

/// Messages delivered by the upstream transport, one JSON object per line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A single activity event
    Event {
        #[serde(flatten)]
        event: SessionEvent,
    },
    /// The named session is gone
    SessionRemoved { session_key: String },
    /// Bulk current-sessions snapshot, e.g. on reconnect; entries are
    /// processed in array order exactly like first-seen events
    Snapshot { sessions: Vec<SessionEvent> },
}

/// Coarse event category driving particle size and tone choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Completion,
    ActionPre,
    ActionPost,
    Other,
}

impl SessionEvent {
    pub fn category(&self) -> EventCategory {
        match self.event_type.as_str() {
            "agent_complete" | "complete" | "stop" => EventCategory::Completion,
            "tool_start" | "pre_action" => EventCategory::ActionPre,
            "tool_end" | "post_action" => EventCategory::ActionPost,
            _ => EventCategory::Other,
        }
    }

    /// The distinguished action subtype gets a larger particle and a
    /// deeper tone than the rest of the before/after action pair.
    pub fn is_major_action(&self) -> bool {
        matches!(self.tool_or_category.as_deref(), Some("subagent"))
    }
}

/// Parse a `#rrggbb` display color, falling back to a neutral grey.
pub fn parse_color(s: &str) -> [f32; 3] {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() == 6 {
        if let Ok(v) = u32::from_str_radix(hex, 16) {
            return [
                ((v >> 16) & 0xff) as f32 / 255.0,
                ((v >> 8) & 0xff) as f32 / 255.0,
                (v & 0xff) as f32 / 255.0,
            ];
        }
    }
    [0.6, 0.6, 0.6]
}

/// Read NDJSON messages from stdin and forward them into the event loop.
///
/// Malformed lines are skipped with a debug log; EOF ends the feed (the
/// soundscape keeps running on whatever is already on screen).
pub fn spawn_stdin_reader(proxy: EventLoopProxy<InboundMessage>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<InboundMessage>(trimmed) {
                Ok(msg) => {
                    if proxy.send_event(msg).is_err() {
                        break; // event loop has shut down
                    }
                }
                Err(e) => debug!("skipping malformed inbound line: {}", e),
            }
        }
        info!("inbound feed closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parse_ignores_unknown_fields() {
        let msg: InboundMessage = serde_json::from_str(
            r##"{"type":"event","event_type":"tool_start","session_key":"a1",
                "color":"#ff8800","tool_or_category":"shell","extra":42}"##,
        )
        .unwrap();
        match msg {
            InboundMessage::Event { event } => {
                assert_eq!(event.session_key, "a1");
                assert_eq!(event.category(), EventCategory::ActionPre);
                assert!(!event.is_major_action());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_parse() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"type":"snapshot","sessions":[
                {"event_type":"agent_complete","session_key":"a"},
                {"event_type":"tool_end","session_key":"b"}]}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::Snapshot { sessions } => {
                assert_eq!(sessions.len(), 2);
                assert_eq!(sessions[0].category(), EventCategory::Completion);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_session_removed_parse() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"session_removed","session_key":"gone"}"#).unwrap();
        assert!(matches!(
            msg,
            InboundMessage::SessionRemoved { session_key } if session_key == "gone"
        ));
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#ff0000"), [1.0, 0.0, 0.0]);
        assert_eq!(parse_color("00ff00"), [0.0, 1.0, 0.0]);
        // Malformed input falls back instead of failing
        assert_eq!(parse_color("not-a-color"), [0.6, 0.6, 0.6]);
        assert_eq!(parse_color(""), [0.6, 0.6, 0.6]);
    }

    #[test]
    fn test_major_action_subtype() {
        let ev = SessionEvent {
            event_type: "tool_start".to_string(),
            session_key: "k".to_string(),
            color: String::new(),
            pan_or_position_hint: None,
            tool_or_category: Some("subagent".to_string()),
        };
        assert!(ev.is_major_action());
        assert_eq!(ev.category(), EventCategory::ActionPre);
    }
}
