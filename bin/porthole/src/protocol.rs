//! Wire types for the streaming WebSocket protocol.
//!
//! Clients send camelCase field names (`tabId`, `clickCount`, `deltaX`);
//! server messages use snake_case throughout.

use porthole_core::KeyModifiers;
use serde::{Deserialize, Serialize};

fn default_button() -> String {
    "left".to_string()
}

fn default_click_count() -> i64 {
    1
}

/// Commands a client can send over the stream socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Ping,
    ActivateTab {
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
    },
    NewTab,
    CloseTab {
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
    },
    Navigate {
        #[serde(default)]
        url: Option<String>,
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
    },
    Click {
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
        #[serde(default = "default_button")]
        button: String,
        #[serde(rename = "clickCount", default = "default_click_count")]
        click_count: i64,
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
    },
    Type {
        #[serde(default)]
        text: String,
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
    },
    Keypress {
        #[serde(default)]
        key: String,
        #[serde(default)]
        modifiers: KeyModifiers,
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
    },
    Scroll {
        #[serde(rename = "deltaX", default)]
        delta_x: f64,
        #[serde(rename = "deltaY", default)]
        delta_y: f64,
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
    },
    Back {
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
    },
    Forward {
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
    },
    Refresh {
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
    },
}

/// Connection-level states reported through `ServerMessage::State`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Connected,
    Navigating,
    Idle,
    TabMissing,
    TabActivated,
}

/// Messages sent to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    State {
        state: StreamState,
        ts: String,
        tab_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Screenshot {
        /// `data:image/jpeg;base64,...`
        data: String,
        url: String,
        title: String,
        tab_id: String,
        ts: String,
    },
    Pong {
        ts: String,
    },
    TabCreated {
        tab_id: String,
    },
    TabClosed {
        tab_id: String,
        active_tab_id: Option<String>,
    },
    SessionClosed,
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tab_id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_navigate() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"navigate","url":"https://example.com","tabId":"t1"}"#)
                .unwrap();
        match cmd {
            ClientCommand::Navigate { url, tab_id } => {
                assert_eq!(url.as_deref(), Some("https://example.com"));
                assert_eq!(tab_id.as_deref(), Some("t1"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_click_defaults() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"click","x":10.5,"y":20}"#).unwrap();
        match cmd {
            ClientCommand::Click { x, y, button, click_count, tab_id } => {
                assert_eq!(x, 10.5);
                assert_eq!(y, 20.0);
                assert_eq!(button, "left");
                assert_eq!(click_count, 1);
                assert!(tab_id.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_keypress_modifiers() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"keypress","key":"a","modifiers":{"ctrl":true,"shift":true}}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::Keypress { key, modifiers, .. } => {
                assert_eq!(key, "a");
                assert_eq!(modifiers.bitmask(), 2 | 8);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_scroll_camel_case() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"scroll","deltaX":0,"deltaY":120}"#).unwrap();
        match cmd {
            ClientCommand::Scroll { delta_x, delta_y, .. } => {
                assert_eq!(delta_x, 0.0);
                assert_eq!(delta_y, 120.0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"reboot"}"#).is_err());
    }

    #[test]
    fn test_serialize_state() {
        let msg = ServerMessage::State {
            state: StreamState::TabMissing,
            ts: "2026-01-01T00:00:00Z".into(),
            tab_id: Some("t1".into()),
            session_id: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["state"], "tab_missing");
        assert_eq!(json["tab_id"], "t1");
        assert!(json.get("session_id").is_none());
    }

    #[test]
    fn test_serialize_tab_closed() {
        let msg = ServerMessage::TabClosed {
            tab_id: "t1".into(),
            active_tab_id: Some("t2".into()),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "tab_closed");
        assert_eq!(json["active_tab_id"], "t2");
    }
}
