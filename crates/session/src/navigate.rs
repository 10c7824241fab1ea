//! Navigation and the per-tab history model.
//!
//! URLs on the `internal://` scheme never reach the network stack; they are
//! rendered in-process and recorded in history under their virtual URL.
//! External navigations record the engine-reported final URL, so redirects
//! land in history as the page the user actually sees.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use porthole_core::{Error, Result};
use porthole_engine::Page;
use tracing::debug;
use url::Url;

use crate::search;
use crate::store::SessionStore;

/// How long to wait for the network to go quiet after DOM-ready. Expiry is
/// not an error; slow pages get a short grace period instead.
const NETWORK_QUIET_TIMEOUT: Duration = Duration::from_secs(10);
const NETWORK_QUIET_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct NavigateOutcome {
    pub tab_id: String,
    /// The URL recorded in history.
    pub url: String,
    pub title: String,
}

/// Outcome of a history traversal. Hitting either end of the history is a
/// normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryMove {
    Moved { url: String },
    AtBoundary,
}

/// A parsed `internal://` URL. The scheme match is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalUrl {
    Search { query: String },
    Other,
}

impl InternalUrl {
    pub fn parse(raw: &str) -> Option<Self> {
        let prefix = raw.get(..11)?;
        if !prefix.eq_ignore_ascii_case("internal://") {
            return None;
        }
        let parsed = match Url::parse(raw) {
            Ok(u) => u,
            Err(_) => return Some(InternalUrl::Other),
        };
        if parsed
            .host_str()
            .map_or(false, |h| h.eq_ignore_ascii_case("search"))
        {
            let query = parsed
                .query_pairs()
                .find(|(k, _)| k == "q")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            return Some(InternalUrl::Search { query });
        }
        Some(InternalUrl::Other)
    }
}

impl SessionStore {
    /// Navigate a tab and record the result in its history: entries past the
    /// cursor are dropped, the new URL appended, the cursor moved to the tip.
    pub async fn navigate(
        &self,
        session_id: &str,
        tab_id: Option<&str>,
        url: &str,
    ) -> Result<NavigateOutcome> {
        let (tab_id, page) = self.resolve_page(session_id, tab_id).await?;

        let recorded = match InternalUrl::parse(url) {
            Some(InternalUrl::Search { query }) => {
                let html = self.search.results_page(&query).await;
                page.set_content(&html).await?;
                url.to_string()
            }
            Some(InternalUrl::Other) => {
                page.set_content(&search::placeholder_page(url)).await?;
                url.to_string()
            }
            None => {
                let final_url = page.goto(url).await?;
                match page.wait_until_quiet(NETWORK_QUIET_TIMEOUT).await {
                    Ok(true) => {}
                    Ok(false) => tokio::time::sleep(NETWORK_QUIET_GRACE).await,
                    Err(e) => debug!(error = %e, url, "Network-quiet wait failed"),
                }
                final_url
            }
        };

        // Engine navigation ran outside the session lock; the tab may have
        // been closed underneath us, in which case there is nothing to record.
        let session = self.get_session(session_id)?;
        {
            let mut state = session.state.lock().await;
            let now = Utc::now();
            state.last_used = now;
            if let Some(tab) = state.tabs.get_mut(&tab_id) {
                let keep = tab.cursor.map_or(0, |c| c + 1);
                tab.history.truncate(keep);
                tab.history.push(recorded.clone());
                tab.cursor = Some(tab.history.len() - 1);
                tab.last_used = now;
            }
        }

        let title = page.title().await;
        debug!(session = %session_id, tab = %tab_id, url = %recorded, "Navigated");
        Ok(NavigateOutcome {
            tab_id,
            url: recorded,
            title,
        })
    }

    /// Move one step back in history. Returns the resolved tab id alongside
    /// the outcome so callers that defaulted to the active tab can report
    /// which tab actually moved.
    pub async fn back(
        &self,
        session_id: &str,
        tab_id: Option<&str>,
    ) -> Result<(String, HistoryMove)> {
        self.traverse(session_id, tab_id, -1).await
    }

    pub async fn forward(
        &self,
        session_id: &str,
        tab_id: Option<&str>,
    ) -> Result<(String, HistoryMove)> {
        self.traverse(session_id, tab_id, 1).await
    }

    async fn traverse(
        &self,
        session_id: &str,
        tab_id: Option<&str>,
        step: i64,
    ) -> Result<(String, HistoryMove)> {
        let (tab_id, page) = self.resolve_page(session_id, tab_id).await?;
        let session = self.get_session(session_id)?;

        // Boundary check first, without mutating anything.
        {
            let state = session.state.lock().await;
            let tab = state
                .tabs
                .get(&tab_id)
                .ok_or_else(|| Error::TabNotFound(tab_id.clone()))?;
            let movable = match (tab.cursor, step) {
                (Some(c), s) if s < 0 => c > 0,
                (Some(c), _) => c + 1 < tab.history.len(),
                (None, _) => false,
            };
            if !movable {
                return Ok((tab_id, HistoryMove::AtBoundary));
            }
        }

        if step < 0 {
            page.go_back().await?;
        } else {
            page.go_forward().await?;
        }

        let mut state = session.state.lock().await;
        let tab = state
            .tabs
            .get_mut(&tab_id)
            .ok_or_else(|| Error::TabNotFound(tab_id.clone()))?;
        if let Some(c) = tab.cursor {
            let next = if step < 0 { c.saturating_sub(1) } else { (c + 1).min(tab.history.len() - 1) };
            tab.cursor = Some(next);
            let url = tab.history[next].clone();
            return Ok((tab_id, HistoryMove::Moved { url }));
        }
        Ok((tab_id, HistoryMove::AtBoundary))
    }

    /// Reload the current page. History is untouched.
    pub async fn refresh(&self, session_id: &str, tab_id: Option<&str>) -> Result<NavigateOutcome> {
        let (tab_id, page) = self.resolve_page(session_id, tab_id).await?;
        page.reload().await?;
        Ok(NavigateOutcome {
            tab_id,
            url: page.current_url().await,
            title: page.title().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porthole_core::Config;
    use porthole_engine::testing::{FakeLauncher, FakePage};

    async fn store_with_session() -> (Arc<SessionStore>, String, String) {
        let store = SessionStore::new(Config::default(), Arc::new(FakeLauncher::new()));
        let created = store.create_session().await.unwrap();
        (store, created.session_id, created.initial_tab_id)
    }

    async fn history_of(store: &SessionStore, session: &str, tab: &str) -> (Vec<String>, Option<usize>) {
        let session = store.get_session(session).unwrap();
        let state = session.state.lock().await;
        let tab = &state.tabs[tab];
        (tab.history.clone(), tab.cursor)
    }

    #[tokio::test]
    async fn test_history_grows_with_each_navigation() {
        let (store, sid, tid) = store_with_session().await;
        for url in ["https://a.example/", "https://b.example/", "https://c.example/"] {
            store.navigate(&sid, None, url).await.unwrap();
        }
        let (history, cursor) = history_of(&store, &sid, &tid).await;
        assert_eq!(history.len(), 3);
        assert_eq!(cursor, Some(2));
        assert_eq!(history[2], "https://c.example/");
    }

    #[tokio::test]
    async fn test_back_and_forward_restore_neighbors() {
        let (store, sid, _) = store_with_session().await;
        store.navigate(&sid, None, "https://a.example/").await.unwrap();
        store.navigate(&sid, None, "https://b.example/").await.unwrap();
        store.navigate(&sid, None, "https://c.example/").await.unwrap();

        let (_, back) = store.back(&sid, None).await.unwrap();
        assert_eq!(back, HistoryMove::Moved { url: "https://b.example/".into() });
        let (_, back) = store.back(&sid, None).await.unwrap();
        assert_eq!(back, HistoryMove::Moved { url: "https://a.example/".into() });
        let (_, forward) = store.forward(&sid, None).await.unwrap();
        assert_eq!(forward, HistoryMove::Moved { url: "https://b.example/".into() });
    }

    #[tokio::test]
    async fn test_traverse_reports_resolved_tab_id() {
        let (store, sid, tid) = store_with_session().await;
        store.navigate(&sid, None, "https://a.example/").await.unwrap();
        store.navigate(&sid, None, "https://b.example/").await.unwrap();

        // With no explicit tab the active tab is resolved, and its id comes
        // back with the outcome, at boundaries too.
        let (moved_tab, mv) = store.back(&sid, None).await.unwrap();
        assert_eq!(moved_tab, tid);
        assert_eq!(mv, HistoryMove::Moved { url: "https://a.example/".into() });

        let (boundary_tab, mv) = store.back(&sid, None).await.unwrap();
        assert_eq!(boundary_tab, tid);
        assert_eq!(mv, HistoryMove::AtBoundary);
    }

    #[tokio::test]
    async fn test_navigate_from_middle_truncates_forward_entries() {
        let (store, sid, tid) = store_with_session().await;
        store.navigate(&sid, None, "https://a.example/").await.unwrap();
        store.navigate(&sid, None, "https://b.example/").await.unwrap();
        store.navigate(&sid, None, "https://c.example/").await.unwrap();
        store.back(&sid, None).await.unwrap();
        store.back(&sid, None).await.unwrap();

        store.navigate(&sid, None, "https://d.example/").await.unwrap();
        let (history, cursor) = history_of(&store, &sid, &tid).await;
        assert_eq!(history, vec!["https://a.example/", "https://d.example/"]);
        assert_eq!(cursor, Some(1));
    }

    #[tokio::test]
    async fn test_boundaries_are_not_errors() {
        let (store, sid, _) = store_with_session().await;
        // No navigation yet: both directions are boundaries.
        assert_eq!(store.back(&sid, None).await.unwrap().1, HistoryMove::AtBoundary);
        assert_eq!(store.forward(&sid, None).await.unwrap().1, HistoryMove::AtBoundary);

        store.navigate(&sid, None, "https://a.example/").await.unwrap();
        assert_eq!(store.back(&sid, None).await.unwrap().1, HistoryMove::AtBoundary);
        assert_eq!(store.forward(&sid, None).await.unwrap().1, HistoryMove::AtBoundary);
    }

    #[tokio::test]
    async fn test_internal_search_survives_missing_credentials() {
        let (store, sid, tid) = store_with_session().await;
        // Config::default() carries no search credentials, so the upstream
        // path fails and the fallback page must be served instead.
        let out = store
            .navigate(&sid, None, "internal://search?q=rust+lang")
            .await
            .unwrap();
        assert_eq!(out.url, "internal://search?q=rust+lang");
        let (history, cursor) = history_of(&store, &sid, &tid).await;
        assert_eq!(history, vec!["internal://search?q=rust+lang"]);
        assert_eq!(cursor, Some(0));
    }

    #[tokio::test]
    async fn test_internal_placeholder_for_unknown_host() {
        let (store, sid, tid) = store_with_session().await;
        store.navigate(&sid, None, "internal://settings").await.unwrap();
        let (history, _) = history_of(&store, &sid, &tid).await;
        assert_eq!(history, vec!["internal://settings"]);
    }

    #[tokio::test]
    async fn test_failed_navigation_leaves_history_untouched() {
        let launcher = Arc::new(FakeLauncher::new());
        let store = SessionStore::new(Config::default(), launcher.clone());
        let created = store.create_session().await.unwrap();
        store
            .navigate(&created.session_id, None, "https://ok.example/")
            .await
            .unwrap();

        let page: Arc<FakePage> = {
            let contexts = launcher.engine.contexts.lock().unwrap();
            let pages = contexts[0].pages.lock().unwrap();
            pages[0].clone()
        };
        page.set_fail_goto(true);

        let err = store
            .navigate(&created.session_id, None, "https://boom.example/")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Navigation(_)));
        let (history, cursor) =
            history_of(&store, &created.session_id, &created.initial_tab_id).await;
        assert_eq!(history, vec!["https://ok.example/"]);
        assert_eq!(cursor, Some(0));
    }

    #[test]
    fn test_internal_url_classification() {
        assert_eq!(
            InternalUrl::parse("internal://search?q=hello"),
            Some(InternalUrl::Search { query: "hello".into() })
        );
        assert_eq!(
            InternalUrl::parse("INTERNAL://SEARCH?q=hello"),
            Some(InternalUrl::Search { query: "hello".into() })
        );
        assert_eq!(InternalUrl::parse("internal://search"), Some(InternalUrl::Search { query: String::new() }));
        assert_eq!(InternalUrl::parse("internal://bookmarks"), Some(InternalUrl::Other));
        assert_eq!(InternalUrl::parse("https://example.com/"), None);
        assert_eq!(InternalUrl::parse("int"), None);
    }

    #[test]
    fn test_search_query_is_decoded() {
        assert_eq!(
            InternalUrl::parse("internal://search?q=rust%20async"),
            Some(InternalUrl::Search { query: "rust async".into() })
        );
    }
}
