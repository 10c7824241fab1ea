//! The process-wide session store.
//!
//! One engine process backs every session; each session is one isolated
//! browsing context holding one or more tabs. All tab-set mutation for a
//! session happens under that session's mutex, including the
//! close-last-tab-closes-the-session cascade.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use porthole_core::{Config, Error, Result};
use porthole_engine::{BrowserContext, Engine, EngineLauncher, Page};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::reaper;
use crate::search::SearchClient;

pub struct Tab {
    pub id: String,
    pub page: Arc<dyn Page>,
    /// Visited URLs, oldest first. Internal pages record their virtual URL.
    pub history: Vec<String>,
    /// Index of the current entry; `None` until the first navigation.
    /// Invariant: `cursor < history.len()` whenever set.
    pub cursor: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

pub struct SessionState {
    /// BTreeMap so active-tab repointing after a close is deterministic.
    pub tabs: BTreeMap<String, Tab>,
    pub active_tab: Option<String>,
    pub last_used: DateTime<Utc>,
}

pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub context: Arc<dyn BrowserContext>,
    pub state: tokio::sync::Mutex<SessionState>,
}

/// Result of `create_session`.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub initial_tab_id: String,
}

/// Result of `close_tab`: whether removing the tab took the session with it,
/// and which tab is active afterwards.
#[derive(Debug, Clone)]
pub struct TabClose {
    pub session_closed: bool,
    pub active_tab_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub session_id: String,
    pub tab_id: String,
    pub active_tab_id: Option<String>,
    pub current_url: String,
    pub title: String,
    pub can_go_back: bool,
    pub can_go_forward: bool,
}

pub struct SessionStore {
    cfg: Config,
    launcher: Arc<dyn EngineLauncher>,
    engine: tokio::sync::Mutex<Option<Arc<dyn Engine>>>,
    sessions: std::sync::Mutex<HashMap<String, Arc<Session>>>,
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
    started_at: DateTime<Utc>,
    pub(crate) search: SearchClient,
}

impl SessionStore {
    pub fn new(cfg: Config, launcher: Arc<dyn EngineLauncher>) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let search = SearchClient::new(&cfg);
        Arc::new(Self {
            cfg,
            launcher,
            engine: tokio::sync::Mutex::new(None),
            sessions: std::sync::Mutex::new(HashMap::new()),
            reaper: std::sync::Mutex::new(None),
            shutdown_tx,
            started_at: Utc::now(),
            search,
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    /// Launch the engine on first use and start the idle reaper. Idempotent:
    /// the engine mutex serializes concurrent callers.
    pub async fn ensure_started(self: &Arc<Self>) -> Result<Arc<dyn Engine>> {
        let mut engine = self.engine.lock().await;
        if let Some(e) = engine.as_ref() {
            return Ok(e.clone());
        }
        let launched = self.launcher.launch().await?;
        *engine = Some(launched.clone());
        info!("Browser engine started");

        let mut reaper = self.reaper.lock().unwrap();
        if reaper.is_none() {
            let store = self.clone();
            let shutdown = self.shutdown_tx.subscribe();
            *reaper = Some(tokio::spawn(reaper::run_loop(store, shutdown)));
        }
        Ok(launched)
    }

    /// New isolated context with exactly one initial, active tab.
    pub async fn create_session(self: &Arc<Self>) -> Result<NewSession> {
        let engine = self.ensure_started().await?;
        let context = engine.new_context().await?;
        let page = context.new_page().await?;

        let now = Utc::now();
        let session_id = Uuid::new_v4().to_string();
        let tab_id = Uuid::new_v4().to_string();

        let mut tabs = BTreeMap::new();
        tabs.insert(
            tab_id.clone(),
            Tab {
                id: tab_id.clone(),
                page,
                history: Vec::new(),
                cursor: None,
                created_at: now,
                last_used: now,
            },
        );
        let session = Arc::new(Session {
            id: session_id.clone(),
            created_at: now,
            context,
            state: tokio::sync::Mutex::new(SessionState {
                tabs,
                active_tab: Some(tab_id.clone()),
                last_used: now,
            }),
        });
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), session);

        info!(session = %session_id, tab = %tab_id, "Session created");
        Ok(NewSession {
            session_id,
            created_at: now,
            initial_tab_id: tab_id,
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Remove the session and tear down its pages and context. Returns false
    /// if the session did not exist.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let session = match self.sessions.lock().unwrap().remove(session_id) {
            Some(s) => s,
            None => return false,
        };
        let pages: Vec<Arc<dyn Page>> = {
            let mut state = session.state.lock().await;
            state.active_tab = None;
            std::mem::take(&mut state.tabs)
                .into_values()
                .map(|t| t.page)
                .collect()
        };
        for page in pages {
            page.close().await;
        }
        session.context.close().await;
        info!(session = %session_id, "Session closed");
        true
    }

    /// New empty tab; it becomes the active tab.
    pub async fn create_tab(&self, session_id: &str) -> Result<String> {
        let session = self.get_session(session_id)?;
        let page = session.context.new_page().await?;

        let now = Utc::now();
        let tab_id = Uuid::new_v4().to_string();
        let mut state = session.state.lock().await;
        state.tabs.insert(
            tab_id.clone(),
            Tab {
                id: tab_id.clone(),
                page,
                history: Vec::new(),
                cursor: None,
                created_at: now,
                last_used: now,
            },
        );
        state.active_tab = Some(tab_id.clone());
        state.last_used = now;
        debug!(session = %session_id, tab = %tab_id, "Tab created");
        Ok(tab_id)
    }

    /// Close one tab. Closing the session's last tab closes the whole session
    /// in the same critical section.
    pub async fn close_tab(&self, session_id: &str, tab_id: &str) -> Result<TabClose> {
        let session = self.get_session(session_id)?;
        let mut state = session.state.lock().await;
        if !state.tabs.contains_key(tab_id) {
            return Err(Error::TabNotFound(tab_id.to_string()));
        }

        if state.tabs.len() == 1 {
            // Last tab: the session goes with it. The session lock stays held
            // so no other caller can slip a new tab in between.
            self.sessions.lock().unwrap().remove(session_id);
            let tab = state.tabs.remove(tab_id);
            state.active_tab = None;
            if let Some(tab) = tab {
                tab.page.close().await;
            }
            session.context.close().await;
            info!(session = %session_id, tab = %tab_id, "Last tab closed, session removed");
            return Ok(TabClose {
                session_closed: true,
                active_tab_id: None,
            });
        }

        let tab = state.tabs.remove(tab_id);
        if state.active_tab.as_deref() == Some(tab_id) {
            state.active_tab = state.tabs.keys().next().cloned();
        }
        state.last_used = Utc::now();
        let active = state.active_tab.clone();
        if let Some(tab) = tab {
            tab.page.close().await;
        }
        debug!(session = %session_id, tab = %tab_id, "Tab closed");
        Ok(TabClose {
            session_closed: false,
            active_tab_id: active,
        })
    }

    pub async fn activate_tab(&self, session_id: &str, tab_id: &str) -> Result<()> {
        let session = self.get_session(session_id)?;
        let mut state = session.state.lock().await;
        let now = Utc::now();
        let tab = state
            .tabs
            .get_mut(tab_id)
            .ok_or_else(|| Error::TabNotFound(tab_id.to_string()))?;
        tab.last_used = now;
        state.active_tab = Some(tab_id.to_string());
        state.last_used = now;
        Ok(())
    }

    /// Resolve the explicit tab or fall back to the active tab, and bump both
    /// activity timestamps. Every interaction funnels through here, which is
    /// what keeps the reaper off live sessions.
    pub async fn resolve_page(
        &self,
        session_id: &str,
        tab_id: Option<&str>,
    ) -> Result<(String, Arc<dyn Page>)> {
        let session = self.get_session(session_id)?;
        let mut state = session.state.lock().await;
        let id = match tab_id {
            Some(id) => id.to_string(),
            None => state
                .active_tab
                .clone()
                .ok_or_else(|| Error::TabNotFound("no active tab".to_string()))?,
        };
        let now = Utc::now();
        let tab = state
            .tabs
            .get_mut(&id)
            .ok_or_else(|| Error::TabNotFound(id.clone()))?;
        tab.last_used = now;
        let page = tab.page.clone();
        state.last_used = now;
        Ok((id, page))
    }

    /// Report a tab's position in its history. A status poll counts as
    /// activity, so the stamps are bumped the same as any other resolution.
    pub async fn status(&self, session_id: &str, tab_id: Option<&str>) -> Result<StatusReport> {
        let session = self.get_session(session_id)?;
        let (id, page, active, can_back, can_forward) = {
            let mut state = session.state.lock().await;
            let id = match tab_id {
                Some(id) => id.to_string(),
                None => state
                    .active_tab
                    .clone()
                    .ok_or_else(|| Error::TabNotFound("no active tab".to_string()))?,
            };
            let now = Utc::now();
            let tab = state
                .tabs
                .get_mut(&id)
                .ok_or_else(|| Error::TabNotFound(id.clone()))?;
            tab.last_used = now;
            let can_back = tab.cursor.map_or(false, |c| c > 0);
            let can_forward = tab.cursor.map_or(false, |c| c + 1 < tab.history.len());
            let page = tab.page.clone();
            let active = state.active_tab.clone();
            state.last_used = now;
            (id, page, active, can_back, can_forward)
        };
        Ok(StatusReport {
            session_id: session_id.to_string(),
            tab_id: id,
            active_tab_id: active,
            current_url: page.current_url().await,
            title: page.title().await,
            can_go_back: can_back,
            can_go_forward: can_forward,
        })
    }

    /// Stop the reaper, close every session, shut the engine down.
    /// Everything here is best-effort.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handle = self.reaper.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Idle reaper did not stop cleanly");
            }
        }

        let ids: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.close_session(&id).await;
        }

        if let Some(engine) = self.engine.lock().await.take() {
            engine.close().await;
        }
        info!("Session store shut down");
    }
}
