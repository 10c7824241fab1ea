//! Chrome process launch and discovery.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use porthole_core::{Error, Result};
use serde_json::Value;
use tokio::process::Command;
use tracing::info;

use crate::{cdp::CdpClient, CdpEngine, Engine, EngineLauncher};

const LAUNCH_TIMEOUT_SECS: u64 = 15;

/// Launches a headless Chrome and connects the browser-level CDP socket.
pub struct CdpLauncher {
    chrome_bin: Option<String>,
}

impl CdpLauncher {
    pub fn new(chrome_bin: Option<String>) -> Self {
        Self { chrome_bin }
    }
}

#[async_trait]
impl EngineLauncher for CdpLauncher {
    async fn launch(&self) -> Result<Arc<dyn Engine>> {
        let binary = find_chrome_binary(self.chrome_bin.as_deref()).ok_or_else(|| {
            Error::EngineUnavailable(
                "no Chrome/Chromium binary found (set CHROME_BIN to override)".into(),
            )
        })?;

        let user_data_dir =
            std::env::temp_dir().join(format!("porthole-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&user_data_dir)
            .map_err(|e| Error::EngineUnavailable(format!("user data dir: {}", e)))?;

        let debug_port = find_free_port().await?;
        let args = build_chrome_args(debug_port, &user_data_dir);

        info!(binary = %binary, port = debug_port, "Launching browser engine");

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::EngineUnavailable(format!("failed to launch {}: {}", binary, e)))?;

        let browser_ws_url = wait_for_cdp_ready(debug_port, LAUNCH_TIMEOUT_SECS)
            .await
            .map_err(|e| Error::EngineUnavailable(e.to_string()))?;

        let client = CdpClient::connect(&browser_ws_url)
            .await
            .map_err(|e| Error::EngineUnavailable(e.to_string()))?;

        info!(port = debug_port, "Browser engine ready");
        Ok(Arc::new(CdpEngine::new(child, client, debug_port)))
    }
}

/// Locate a Chrome/Chromium binary: explicit override first, then well-known
/// install paths, then `which`.
pub fn find_chrome_binary(explicit: Option<&str>) -> Option<String> {
    if let Some(path) = explicit {
        if Path::new(path).exists() {
            return Some(path.to_string());
        }
    }

    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

fn build_chrome_args(debug_port: u16, user_data_dir: &Path) -> Vec<String> {
    vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--headless=new".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--password-store=basic".to_string(),
        format!(
            "--window-size={},{}",
            porthole_core::config::VIEWPORT_WIDTH,
            porthole_core::config::VIEWPORT_HEIGHT
        ),
        "about:blank".to_string(),
    ]
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::EngineUnavailable(format!("failed to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::EngineUnavailable(format!("local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the CDP endpoint responds.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<String> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::EngineUnavailable(format!(
                "CDP not ready after {}s on port {}",
                timeout_secs, port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve a targetId to its page WebSocket URL via /json/list. The target may
/// not appear immediately after creation, so retry briefly.
pub(crate) async fn get_target_ws_url(port: u16, target_id: &str) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };

        for target in &targets {
            if target.get("id").and_then(|v| v.as_str()) == Some(target_id)
                || target.get("targetId").and_then(|v| v.as_str()) == Some(target_id)
            {
                if let Some(ws_url) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
    }

    Err(Error::Engine(format!(
        "no WebSocket URL for target '{}' after retries",
        target_id
    )))
}
