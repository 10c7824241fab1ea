//! CDP-backed implementations of the engine traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use porthole_core::config::{USER_AGENT, VIEWPORT_HEIGHT, VIEWPORT_WIDTH};
use porthole_core::{Error, Result};
use serde_json::json;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cdp::CdpClient;
use crate::keys::key_code;
use crate::launcher::get_target_ws_url;
use crate::{BrowserContext, Engine, Page, NAVIGATION_TIMEOUT};

/// One launched Chrome process plus its browser-level CDP connection.
pub struct CdpEngine {
    process: Mutex<Child>,
    browser: Arc<CdpClient>,
    debug_port: u16,
}

impl CdpEngine {
    pub fn new(process: Child, browser: CdpClient, debug_port: u16) -> Self {
        Self {
            process: Mutex::new(process),
            browser: Arc::new(browser),
            debug_port,
        }
    }
}

#[async_trait]
impl Engine for CdpEngine {
    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>> {
        let result = self
            .browser
            .send_command("Target.createBrowserContext", json!({}))
            .await?;
        let context_id = result
            .get("browserContextId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Engine("createBrowserContext returned no id".into()))?
            .to_string();

        Ok(Arc::new(CdpContext {
            browser: self.browser.clone(),
            context_id,
            debug_port: self.debug_port,
        }))
    }

    async fn close(&self) {
        if let Err(e) = self.browser.send_command("Browser.close", json!({})).await {
            debug!("Browser.close failed (may already be gone): {}", e);
        }
        let mut process = self.process.lock().await;
        let _ = process.kill().await;
    }
}

/// An isolated browsing context (separate cookies/storage).
struct CdpContext {
    browser: Arc<CdpClient>,
    context_id: String,
    debug_port: u16,
}

#[async_trait]
impl BrowserContext for CdpContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        let result = self
            .browser
            .send_command(
                "Target.createTarget",
                json!({
                    "url": "about:blank",
                    "browserContextId": self.context_id,
                }),
            )
            .await?;
        let target_id = result
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Engine("createTarget returned no targetId".into()))?
            .to_string();

        let ws_url = get_target_ws_url(self.debug_port, &target_id).await?;
        let client = CdpClient::connect(&ws_url).await?;

        client.enable_domain("Page").await?;
        client.enable_domain("Runtime").await?;
        client
            .send_command("Page.setLifecycleEventsEnabled", json!({"enabled": true}))
            .await?;
        client
            .send_command(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": VIEWPORT_WIDTH,
                    "height": VIEWPORT_HEIGHT,
                    "deviceScaleFactor": 1.0,
                    "mobile": false,
                }),
            )
            .await?;
        client
            .send_command(
                "Emulation.setUserAgentOverride",
                json!({"userAgent": USER_AGENT}),
            )
            .await?;

        Ok(Arc::new(CdpPage {
            client,
            browser: self.browser.clone(),
            target_id,
        }))
    }

    async fn close(&self) {
        if let Err(e) = self
            .browser
            .send_command(
                "Target.disposeBrowserContext",
                json!({"browserContextId": self.context_id}),
            )
            .await
        {
            debug!("disposeBrowserContext failed: {}", e);
        }
    }
}

/// One page target with its own CDP connection.
struct CdpPage {
    client: CdpClient,
    browser: Arc<CdpClient>,
    target_id: String,
}

impl CdpPage {
    /// Navigate and wait for DOM-ready, failing after `NAVIGATION_TIMEOUT`.
    async fn navigate_and_wait(&self, url: &str) -> Result<()> {
        // Subscribe before navigating so a fast load cannot race the wait.
        let mut dom_ready = self.client.subscribe_event("Page.domContentEventFired").await;

        let result = self
            .client
            .send_command("Page.navigate", json!({"url": url}))
            .await?;
        if let Some(err) = result.get("errorText").and_then(|v| v.as_str()) {
            if !err.is_empty() {
                return Err(Error::Navigation(format!("{}: {}", url, err)));
            }
        }

        match tokio::time::timeout(NAVIGATION_TIMEOUT, dom_ready.recv()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::Navigation(format!(
                "timed out after {}s waiting for DOM-ready on {}",
                NAVIGATION_TIMEOUT.as_secs(),
                url
            ))),
        }
    }
}

#[async_trait]
impl Page for CdpPage {
    async fn goto(&self, url: &str) -> Result<String> {
        self.navigate_and_wait(url).await?;
        self.client.evaluate_string("window.location.href").await
    }

    async fn wait_until_quiet(&self, timeout: Duration) -> Result<bool> {
        let mut lifecycle = self.client.subscribe_event("Page.lifecycleEvent").await;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match tokio::time::timeout_at(deadline, lifecycle.recv()).await {
                Ok(Some(params)) => {
                    if params.get("name").and_then(|v| v.as_str()) == Some("networkIdle") {
                        return Ok(true);
                    }
                }
                Ok(None) => return Ok(false),
                Err(_) => return Ok(false),
            }
        }
    }

    async fn set_content(&self, html: &str) -> Result<()> {
        let data_url = format!(
            "data:text/html;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(html.as_bytes())
        );
        self.navigate_and_wait(&data_url).await?;
        // Give inline scripts/styles a beat to settle before capture.
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    }

    async fn current_url(&self) -> String {
        self.client
            .evaluate_string("window.location.href")
            .await
            .unwrap_or_default()
    }

    async fn title(&self) -> String {
        self.client
            .evaluate_string("document.title")
            .await
            .unwrap_or_default()
    }

    async fn screenshot_jpeg(&self, quality: u32) -> Result<String> {
        let result = self
            .client
            .send_command(
                "Page.captureScreenshot",
                json!({"format": "jpeg", "quality": quality}),
            )
            .await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Engine("no screenshot data returned".into()))
    }

    async fn click(&self, x: f64, y: f64, button: &str, click_count: i64) -> Result<()> {
        for event_type in ["mousePressed", "mouseReleased"] {
            self.client
                .send_command(
                    "Input.dispatchMouseEvent",
                    json!({
                        "type": event_type,
                        "x": x,
                        "y": y,
                        "button": button,
                        "clickCount": click_count,
                    }),
                )
                .await?;
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.client
            .send_command("Input.insertText", json!({"text": text}))
            .await?;
        Ok(())
    }

    async fn press_key(&self, key: &str, modifiers: i32) -> Result<()> {
        let code = key_code(key);
        for event_type in ["keyDown", "keyUp"] {
            let mut params = json!({
                "type": event_type,
                "key": key,
                "code": code,
            });
            if modifiers != 0 {
                params["modifiers"] = json!(modifiers);
            }
            if event_type == "keyDown" && key.chars().count() == 1 {
                params["text"] = json!(key);
            }
            self.client
                .send_command("Input.dispatchKeyEvent", params)
                .await?;
        }
        Ok(())
    }

    async fn scroll(&self, delta_x: f64, delta_y: f64) -> Result<()> {
        self.client
            .send_command(
                "Input.dispatchMouseEvent",
                json!({
                    "type": "mouseWheel",
                    "x": VIEWPORT_WIDTH as f64 / 2.0,
                    "y": VIEWPORT_HEIGHT as f64 / 2.0,
                    "deltaX": delta_x,
                    "deltaY": delta_y,
                }),
            )
            .await?;
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.move_in_history(-1).await
    }

    async fn go_forward(&self) -> Result<()> {
        self.move_in_history(1).await
    }

    async fn reload(&self) -> Result<()> {
        self.client.send_command("Page.reload", json!({})).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self
            .browser
            .send_command("Target.closeTarget", json!({"targetId": self.target_id}))
            .await
        {
            debug!("closeTarget failed: {}", e);
        }
    }
}

impl CdpPage {
    async fn move_in_history(&self, offset: i64) -> Result<()> {
        let history = self
            .client
            .send_command("Page.getNavigationHistory", json!({}))
            .await?;
        let current = history
            .get("currentIndex")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let entries = history
            .get("entries")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let target = current + offset;
        if target < 0 || target >= entries.len() as i64 {
            // The engine's own history is shorter than ours (internal pages
            // replace content in place); nothing to replay.
            return Ok(());
        }
        let entry_id = entries[target as usize]
            .get("id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| Error::Engine("history entry without id".into()))?;

        self.client
            .send_command("Page.navigateToHistoryEntry", json!({"entryId": entry_id}))
            .await?;
        Ok(())
    }
}
