//! Streaming WebSocket connection: one duplex socket per session.
//!
//! A writer task owns the sink and is fed through a channel; a frame pump
//! pushes JPEG screenshots of the connection's active tab while a command
//! loop applies inbound input events. Sessions and tabs outlive the
//! connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use porthole_session::SessionStore;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::protocol::{ClientCommand, ServerMessage, StreamState};

/// Close code for a stream request against an unknown session.
const CLOSE_SESSION_NOT_FOUND: u16 = 4004;

const NAVIGATING_BACKOFF: Duration = Duration::from_millis(250);
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

struct Conn {
    tx: mpsc::Sender<ServerMessage>,
    active_tab: std::sync::Mutex<Option<String>>,
    navigating: AtomicBool,
    last_state: std::sync::Mutex<Option<StreamState>>,
}

impl Conn {
    fn active_tab(&self) -> Option<String> {
        self.active_tab.lock().unwrap().clone()
    }

    fn set_active_tab(&self, tab_id: Option<String>) {
        *self.active_tab.lock().unwrap() = tab_id;
    }

    async fn send(&self, msg: ServerMessage) {
        let _ = self.tx.send(msg).await;
    }

    /// Send a `state` message, suppressing identical consecutive states.
    async fn send_state(&self, state: StreamState, session_id: Option<String>) {
        {
            let mut last = self.last_state.lock().unwrap();
            if *last == Some(state) {
                return;
            }
            *last = Some(state);
        }
        self.send(ServerMessage::State {
            state,
            ts: Utc::now().to_rfc3339(),
            tab_id: self.active_tab(),
            session_id,
        })
        .await;
    }
}

pub async fn run(socket: WebSocket, store: Arc<SessionStore>, session_id: String) {
    let session = match store.get_session(&session_id) {
        Ok(s) => s,
        Err(_) => {
            let mut socket = socket;
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code: CLOSE_SESSION_NOT_FOUND,
                    reason: "Session not found".into(),
                })))
                .await;
            return;
        }
    };
    info!(session = %session_id, "Stream connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(32);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize stream message");
                    continue;
                }
            };
            if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let initial_tab = session.state.lock().await.active_tab.clone();
    let conn = Arc::new(Conn {
        tx,
        active_tab: std::sync::Mutex::new(initial_tab),
        navigating: AtomicBool::new(false),
        last_state: std::sync::Mutex::new(None),
    });
    conn.send_state(StreamState::Connected, Some(session_id.clone()))
        .await;

    let (stop_tx, stop_rx) = broadcast::channel::<()>(1);
    let pump = tokio::spawn(frame_pump(
        store.clone(),
        session_id.clone(),
        conn.clone(),
        stop_rx,
    ));

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                debug!(session = %session_id, error = %e, "Stream receive error");
                break;
            }
        };
        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let cmd = match serde_json::from_str::<ClientCommand>(&text) {
            Ok(c) => c,
            Err(e) => {
                conn.send(ServerMessage::Error {
                    message: format!("Invalid command: {}", e),
                    tab_id: None,
                })
                .await;
                continue;
            }
        };
        if handle_command(&store, &session_id, &conn, cmd).await == Flow::Stop {
            break;
        }
    }

    let _ = stop_tx.send(());
    let _ = pump.await;
    info!(session = %session_id, "Stream disconnected");
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

async fn handle_command(
    store: &Arc<SessionStore>,
    session_id: &str,
    conn: &Arc<Conn>,
    cmd: ClientCommand,
) -> Flow {
    match cmd {
        ClientCommand::Ping => {
            conn.send(ServerMessage::Pong {
                ts: Utc::now().to_rfc3339(),
            })
            .await;
        }
        ClientCommand::ActivateTab { tab_id } => {
            let Some(tab_id) = tab_id else {
                return Flow::Continue;
            };
            match store.activate_tab(session_id, &tab_id).await {
                Ok(()) => {
                    conn.set_active_tab(Some(tab_id));
                    conn.send_state(StreamState::TabActivated, None).await;
                }
                Err(_) => {
                    conn.send(ServerMessage::Error {
                        message: "Tab not found".into(),
                        tab_id: Some(tab_id),
                    })
                    .await;
                }
            }
        }
        ClientCommand::NewTab => match store.create_tab(session_id).await {
            Ok(tab_id) => {
                conn.set_active_tab(Some(tab_id.clone()));
                conn.send(ServerMessage::TabCreated { tab_id }).await;
            }
            Err(e) => {
                conn.send(ServerMessage::Error {
                    message: e.to_string(),
                    tab_id: None,
                })
                .await;
            }
        },
        ClientCommand::CloseTab { tab_id } => {
            let Some(tab_id) = tab_id else {
                return Flow::Continue;
            };
            match store.close_tab(session_id, &tab_id).await {
                Ok(out) if out.session_closed => {
                    conn.send(ServerMessage::SessionClosed).await;
                    return Flow::Stop;
                }
                Ok(out) => {
                    conn.set_active_tab(out.active_tab_id.clone());
                    conn.send(ServerMessage::TabClosed {
                        tab_id,
                        active_tab_id: out.active_tab_id,
                    })
                    .await;
                }
                Err(_) => {
                    conn.send(ServerMessage::Error {
                        message: "Tab not found".into(),
                        tab_id: Some(tab_id),
                    })
                    .await;
                }
            }
        }
        ClientCommand::Navigate { url, tab_id } => {
            let Some(url) = url else {
                return Flow::Continue;
            };
            let target = tab_id.or_else(|| conn.active_tab());
            conn.navigating.store(true, Ordering::SeqCst);
            conn.send_state(StreamState::Navigating, None).await;
            if let Err(e) = store.navigate(session_id, target.as_deref(), &url).await {
                conn.send(ServerMessage::Error {
                    message: e.to_string(),
                    tab_id: target,
                })
                .await;
            }
            conn.navigating.store(false, Ordering::SeqCst);
            conn.send_state(StreamState::Idle, None).await;
        }
        ClientCommand::Click { x, y, button, click_count, tab_id } => {
            if let Some(page) = resolve(store, session_id, conn, tab_id).await {
                if let Err(e) = page.click(x, y, &button, click_count).await {
                    debug!(error = %e, "Click failed");
                }
            }
        }
        ClientCommand::Type { text, tab_id } => {
            if let Some(page) = resolve(store, session_id, conn, tab_id).await {
                if let Err(e) = page.type_text(&text).await {
                    debug!(error = %e, "Type failed");
                }
            }
        }
        ClientCommand::Keypress { key, modifiers, tab_id } => {
            if let Some(page) = resolve(store, session_id, conn, tab_id).await {
                if let Err(e) = page.press_key(&key, modifiers.bitmask()).await {
                    debug!(error = %e, "Keypress failed");
                }
            }
        }
        ClientCommand::Scroll { delta_x, delta_y, tab_id } => {
            if let Some(page) = resolve(store, session_id, conn, tab_id).await {
                if let Err(e) = page.scroll(delta_x, delta_y).await {
                    debug!(error = %e, "Scroll failed");
                }
            }
        }
        ClientCommand::Back { tab_id } => {
            let target = tab_id.or_else(|| conn.active_tab());
            match store.back(session_id, target.as_deref()).await {
                Ok(_) => {}
                Err(e) => {
                    conn.send(ServerMessage::Error {
                        message: e.to_string(),
                        tab_id: target,
                    })
                    .await;
                }
            }
        }
        ClientCommand::Forward { tab_id } => {
            let target = tab_id.or_else(|| conn.active_tab());
            match store.forward(session_id, target.as_deref()).await {
                Ok(_) => {}
                Err(e) => {
                    conn.send(ServerMessage::Error {
                        message: e.to_string(),
                        tab_id: target,
                    })
                    .await;
                }
            }
        }
        ClientCommand::Refresh { tab_id } => {
            let target = tab_id.or_else(|| conn.active_tab());
            if let Err(e) = store.refresh(session_id, target.as_deref()).await {
                conn.send(ServerMessage::Error {
                    message: e.to_string(),
                    tab_id: target,
                })
                .await;
            }
        }
    }
    Flow::Continue
}

/// Resolve the explicit tab or the connection's active tab; failures are
/// reported in-band and the command is dropped.
async fn resolve(
    store: &Arc<SessionStore>,
    session_id: &str,
    conn: &Arc<Conn>,
    tab_id: Option<String>,
) -> Option<Arc<dyn porthole_engine::Page>> {
    let target = tab_id.or_else(|| conn.active_tab());
    match store.resolve_page(session_id, target.as_deref()).await {
        Ok((_, page)) => Some(page),
        Err(_) => {
            conn.send(ServerMessage::Error {
                message: "Session or tab not found".into(),
                tab_id: target,
            })
            .await;
            None
        }
    }
}

async fn frame_pump(
    store: Arc<SessionStore>,
    session_id: String,
    conn: Arc<Conn>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let frame_delay = store.config().frame_delay();
    let quality = store.config().stream_jpeg_quality;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = pump_once(&store, &session_id, &conn, quality, frame_delay) => {}
        }
    }
}

async fn pump_once(
    store: &SessionStore,
    session_id: &str,
    conn: &Conn,
    quality: u32,
    frame_delay: Duration,
) {
    let tab_id = conn.active_tab();
    let page = match store.resolve_page(session_id, tab_id.as_deref()).await {
        Ok((_, page)) => page,
        Err(_) => {
            conn.send_state(StreamState::TabMissing, None).await;
            tokio::time::sleep(ERROR_BACKOFF).await;
            return;
        }
    };

    // Screenshots taken mid-navigation are blank or torn; hold off until the
    // command loop clears the flag.
    if conn.navigating.load(Ordering::SeqCst) {
        tokio::time::sleep(NAVIGATING_BACKOFF).await;
        return;
    }

    match page.screenshot_jpeg(quality).await {
        Ok(data) => {
            conn.send(ServerMessage::Screenshot {
                data: format!("data:image/jpeg;base64,{}", data),
                url: page.current_url().await,
                title: page.title().await,
                tab_id: tab_id.unwrap_or_default(),
                ts: Utc::now().to_rfc3339(),
            })
            .await;
            tokio::time::sleep(frame_delay).await;
        }
        Err(e) => {
            debug!(session = %session_id, error = %e, "Frame capture failed");
            tokio::time::sleep(ERROR_BACKOFF).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porthole_core::Config;
    use porthole_engine::testing::{FakeLauncher, FakePage};

    fn test_conn() -> (Arc<Conn>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = Arc::new(Conn {
            tx,
            active_tab: std::sync::Mutex::new(None),
            navigating: AtomicBool::new(false),
            last_state: std::sync::Mutex::new(None),
        });
        (conn, rx)
    }

    #[tokio::test]
    async fn test_duplicate_states_are_suppressed() {
        let (conn, mut rx) = test_conn();
        conn.send_state(StreamState::Idle, None).await;
        conn.send_state(StreamState::Idle, None).await;
        conn.send_state(StreamState::Navigating, None).await;
        conn.send_state(StreamState::Idle, None).await;
        drop(conn);

        let mut states = Vec::new();
        while let Some(msg) = rx.recv().await {
            if let ServerMessage::State { state, .. } = msg {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![StreamState::Idle, StreamState::Navigating, StreamState::Idle]
        );
    }

    #[tokio::test]
    async fn test_pump_skips_capture_while_navigating() {
        let launcher = Arc::new(FakeLauncher::new());
        let store = SessionStore::new(Config::default(), launcher.clone());
        let created = store.create_session().await.unwrap();

        let (conn, mut rx) = test_conn();
        conn.set_active_tab(Some(created.initial_tab_id.clone()));
        conn.navigating.store(true, Ordering::SeqCst);
        pump_once(&store, &created.session_id, &conn, 50, Duration::from_millis(1)).await;

        let page: Arc<FakePage> = {
            let contexts = launcher.engine.contexts.lock().unwrap();
            let pages = contexts[0].pages.lock().unwrap();
            pages[0].clone()
        };
        assert!(!page.ops().iter().any(|op| op == "screenshot"));

        conn.navigating.store(false, Ordering::SeqCst);
        pump_once(&store, &created.session_id, &conn, 50, Duration::from_millis(1)).await;
        assert!(page.ops().iter().any(|op| op == "screenshot"));

        let msg = rx.recv().await.unwrap();
        match msg {
            ServerMessage::Screenshot { data, tab_id, .. } => {
                assert!(data.starts_with("data:image/jpeg;base64,"));
                assert_eq!(tab_id, created.initial_tab_id);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pump_reports_missing_tab_with_backoff_state() {
        let store = SessionStore::new(Config::default(), Arc::new(FakeLauncher::new()));
        let created = store.create_session().await.unwrap();

        let (conn, mut rx) = test_conn();
        conn.set_active_tab(Some("gone".to_string()));
        pump_once(&store, &created.session_id, &conn, 50, Duration::from_millis(1)).await;
        pump_once(&store, &created.session_id, &conn, 50, Duration::from_millis(1)).await;
        drop(conn);

        let mut states = Vec::new();
        while let Some(msg) = rx.recv().await {
            if let ServerMessage::State { state, .. } = msg {
                states.push(state);
            }
        }
        // Two consecutive failures produce a single tab_missing notification.
        assert_eq!(states, vec![StreamState::TabMissing]);
    }

    #[tokio::test]
    async fn test_close_last_tab_over_stream_closes_session() {
        let store = SessionStore::new(Config::default(), Arc::new(FakeLauncher::new()));
        let created = store.create_session().await.unwrap();
        let (conn, mut rx) = test_conn();
        conn.set_active_tab(Some(created.initial_tab_id.clone()));

        let flow = handle_command(
            &store,
            &created.session_id,
            &conn,
            ClientCommand::CloseTab {
                tab_id: Some(created.initial_tab_id.clone()),
            },
        )
        .await;
        assert!(flow == Flow::Stop);
        assert!(store.get_session(&created.session_id).is_err());
        drop(conn);

        let mut saw_session_closed = false;
        while let Some(msg) = rx.recv().await {
            if matches!(msg, ServerMessage::SessionClosed) {
                saw_session_closed = true;
            }
        }
        assert!(saw_session_closed);
    }

    #[tokio::test]
    async fn test_navigate_command_wraps_with_states() {
        let store = SessionStore::new(Config::default(), Arc::new(FakeLauncher::new()));
        let created = store.create_session().await.unwrap();
        let (conn, mut rx) = test_conn();
        conn.set_active_tab(Some(created.initial_tab_id.clone()));

        handle_command(
            &store,
            &created.session_id,
            &conn,
            ClientCommand::Navigate {
                url: Some("https://example.com/".into()),
                tab_id: None,
            },
        )
        .await;
        drop(conn);

        let mut states = Vec::new();
        while let Some(msg) = rx.recv().await {
            if let ServerMessage::State { state, .. } = msg {
                states.push(state);
            }
        }
        assert_eq!(states, vec![StreamState::Navigating, StreamState::Idle]);
    }
}
