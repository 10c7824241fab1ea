//! Browser engine boundary.
//!
//! The orchestration layer consumes the engine as an opaque capability set:
//! launch a browser, open isolated contexts, open pages, drive them. The real
//! implementation speaks the Chrome DevTools Protocol over WebSocket; tests
//! substitute the fakes in [`testing`].

pub mod cdp;
mod engine;
pub mod keys;
mod launcher;
pub mod testing;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use porthole_core::Result;

pub use engine::CdpEngine;
pub use launcher::{find_chrome_binary, CdpLauncher};

/// How long a navigation may take before it fails.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Launches a browser engine process. Injected so tests can avoid Chrome.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Engine>>;
}

/// One running browser engine instance.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Create a fresh isolated browsing context (its own cookies/storage).
    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>>;

    /// Best-effort shutdown. Never fails.
    async fn close(&self);
}

/// An isolated browsing context owned by exactly one session.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Open a new renderable page in this context.
    async fn new_page(&self) -> Result<Arc<dyn Page>>;

    /// Best-effort teardown of the context and its pages.
    async fn close(&self);
}

/// One renderable page surface and the operations a tab needs from it.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate and wait for DOM-ready. Returns the final URL after redirects.
    async fn goto(&self, url: &str) -> Result<String>;

    /// Wait up to `timeout` for network quiescence. `Ok(false)` on timeout.
    async fn wait_until_quiet(&self, timeout: Duration) -> Result<bool>;

    /// Replace the page content with the given HTML (used for internal pages).
    async fn set_content(&self, html: &str) -> Result<()>;

    async fn current_url(&self) -> String;
    async fn title(&self) -> String;

    /// Capture a JPEG screenshot, returned base64-encoded.
    async fn screenshot_jpeg(&self, quality: u32) -> Result<String>;

    async fn click(&self, x: f64, y: f64, button: &str, click_count: i64) -> Result<()>;
    async fn type_text(&self, text: &str) -> Result<()>;
    async fn press_key(&self, key: &str, modifiers: i32) -> Result<()>;
    async fn scroll(&self, delta_x: f64, delta_y: f64) -> Result<()>;

    async fn go_back(&self) -> Result<()>;
    async fn go_forward(&self) -> Result<()>;
    async fn reload(&self) -> Result<()>;

    /// Best-effort close of the underlying page. Never fails.
    async fn close(&self);
}
