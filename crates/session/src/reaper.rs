//! Background reaping of idle tabs and sessions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use porthole_engine::Page;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::store::SessionStore;

pub(crate) async fn run_loop(store: Arc<SessionStore>, mut shutdown: broadcast::Receiver<()>) {
    // tokio::time::interval panics on a zero period.
    let interval = store
        .config()
        .cleanup_interval()
        .max(std::time::Duration::from_secs(1));
    info!(interval_secs = interval.as_secs(), "Idle reaper started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so a fresh store is not swept
    // at startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&store).await;
            }
            _ = shutdown.recv() => {
                info!("Idle reaper shutting down");
                break;
            }
        }
    }
}

fn idle_longer_than(now: DateTime<Utc>, last_used: DateTime<Utc>, ttl: std::time::Duration) -> bool {
    (now - last_used).num_seconds() > ttl.as_secs() as i64
}

/// One sweep over every session. Failures are per-session; a broken session
/// never stops the rest of the sweep.
pub(crate) async fn sweep(store: &SessionStore) {
    let now = Utc::now();
    let tab_ttl = store.config().tab_ttl();
    let session_ttl = store.config().session_ttl();

    for session in store.snapshot() {
        let mut reaped_pages: Vec<(String, Arc<dyn Page>)> = Vec::new();
        let expired = {
            let mut state = session.state.lock().await;

            // A session keeps at least one tab; the sole remaining tab is
            // only ever removed by the session-level TTL.
            let stale: Vec<String> = state
                .tabs
                .iter()
                .filter(|(_, tab)| idle_longer_than(now, tab.last_used, tab_ttl))
                .map(|(id, _)| id.clone())
                .collect();
            for tab_id in stale {
                if state.tabs.len() <= 1 {
                    break;
                }
                if let Some(tab) = state.tabs.remove(&tab_id) {
                    reaped_pages.push((tab_id.clone(), tab.page));
                }
                if state.active_tab.as_deref() == Some(tab_id.as_str()) {
                    state.active_tab = state.tabs.keys().next().cloned();
                }
            }

            idle_longer_than(now, state.last_used, session_ttl)
        };

        for (tab_id, page) in reaped_pages {
            debug!(session = %session.id, tab = %tab_id, "Reaping idle tab");
            page.close().await;
        }
        if expired {
            info!(session = %session.id, "Reaping idle session");
            store.close_session(&session.id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use porthole_core::Config;
    use porthole_engine::testing::FakeLauncher;

    async fn backdate_tab(store: &SessionStore, session_id: &str, tab_id: &str, secs: i64) {
        let session = store.get_session(session_id).unwrap();
        let mut state = session.state.lock().await;
        let tab = state.tabs.get_mut(tab_id).unwrap();
        tab.last_used = Utc::now() - ChronoDuration::seconds(secs);
    }

    async fn backdate_session(store: &SessionStore, session_id: &str, secs: i64) {
        let session = store.get_session(session_id).unwrap();
        let mut state = session.state.lock().await;
        state.last_used = Utc::now() - ChronoDuration::seconds(secs);
    }

    #[tokio::test]
    async fn test_sole_tab_is_never_reaped_by_tab_ttl() {
        let store = SessionStore::new(Config::default(), Arc::new(FakeLauncher::new()));
        let created = store.create_session().await.unwrap();
        backdate_tab(&store, &created.session_id, &created.initial_tab_id, 7200).await;

        sweep(&store).await;

        let session = store.get_session(&created.session_id).unwrap();
        let state = session.state.lock().await;
        assert_eq!(state.tabs.len(), 1);
        assert_eq!(state.active_tab.as_deref(), Some(created.initial_tab_id.as_str()));
    }

    #[tokio::test]
    async fn test_stale_extra_tab_is_reaped_and_active_repointed() {
        let store = SessionStore::new(Config::default(), Arc::new(FakeLauncher::new()));
        let created = store.create_session().await.unwrap();
        let second = store.create_tab(&created.session_id).await.unwrap();
        // second is active; make it stale while the first stays fresh.
        backdate_tab(&store, &created.session_id, &second, 7200).await;

        sweep(&store).await;

        let session = store.get_session(&created.session_id).unwrap();
        let state = session.state.lock().await;
        assert_eq!(state.tabs.len(), 1);
        assert!(state.tabs.contains_key(&created.initial_tab_id));
        assert_eq!(state.active_tab.as_deref(), Some(created.initial_tab_id.as_str()));
    }

    #[tokio::test]
    async fn test_idle_session_is_closed_whole() {
        let store = SessionStore::new(Config::default(), Arc::new(FakeLauncher::new()));
        let created = store.create_session().await.unwrap();
        backdate_session(&store, &created.session_id, 7200).await;
        backdate_tab(&store, &created.session_id, &created.initial_tab_id, 7200).await;

        sweep(&store).await;

        assert!(store.get_session(&created.session_id).is_err());
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_status_query_counts_as_activity() {
        let store = SessionStore::new(Config::default(), Arc::new(FakeLauncher::new()));
        let created = store.create_session().await.unwrap();
        backdate_session(&store, &created.session_id, 7200).await;
        backdate_tab(&store, &created.session_id, &created.initial_tab_id, 7200).await;

        // A client polling status is a live client; the poll must refresh
        // both TTL stamps before the next sweep.
        store.status(&created.session_id, None).await.unwrap();
        sweep(&store).await;

        assert!(store.get_session(&created.session_id).is_ok());
    }

    #[tokio::test]
    async fn test_fresh_session_survives_sweep() {
        let store = SessionStore::new(Config::default(), Arc::new(FakeLauncher::new()));
        let created = store.create_session().await.unwrap();

        sweep(&store).await;

        assert!(store.get_session(&created.session_id).is_ok());
    }

    #[tokio::test]
    async fn test_sweep_handles_many_sessions() {
        let store = SessionStore::new(Config::default(), Arc::new(FakeLauncher::new()));
        let stale = store.create_session().await.unwrap();
        let fresh = store.create_session().await.unwrap();
        backdate_session(&store, &stale.session_id, 7200).await;

        sweep(&store).await;

        assert!(store.get_session(&stale.session_id).is_err());
        assert!(store.get_session(&fresh.session_id).is_ok());
    }
}
