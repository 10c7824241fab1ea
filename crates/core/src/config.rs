//! Runtime configuration.
//!
//! Everything is driven by environment variables with stated defaults; there
//! is no config file. Malformed values fall back to the default with a warning
//! rather than failing startup.

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 1800; // 30 min
pub const DEFAULT_TAB_TTL_SECONDS: u64 = 1800;
pub const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_STREAM_FPS: f64 = 6.0;
pub const DEFAULT_STREAM_JPEG_QUALITY: u32 = 50;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8089;

/// Fixed viewport for every page.
pub const VIEWPORT_WIDTH: i64 = 1280;
pub const VIEWPORT_HEIGHT: i64 = 720;

/// User agent applied to every browsing context.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Idle TTL for a whole session.
    pub session_ttl_seconds: u64,
    /// Idle TTL for a single tab (never applied to a session's last tab).
    pub tab_ttl_seconds: u64,
    /// Interval between idle-reaper sweeps.
    pub cleanup_interval_seconds: u64,
    /// Target frame rate of the screenshot stream.
    pub stream_fps: f64,
    /// JPEG quality for streamed frames (0-100).
    pub stream_jpeg_quality: u32,
    /// Gateway bind address.
    pub host: String,
    pub port: u16,
    /// Google Custom Search credentials for the internal search page.
    #[serde(skip_serializing)]
    pub search_api_key: Option<String>,
    pub search_cx: Option<String>,
    /// Explicit Chrome/Chromium binary path, overriding discovery.
    pub chrome_bin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            tab_ttl_seconds: DEFAULT_TAB_TTL_SECONDS,
            cleanup_interval_seconds: DEFAULT_CLEANUP_INTERVAL_SECONDS,
            stream_fps: DEFAULT_STREAM_FPS,
            stream_jpeg_quality: DEFAULT_STREAM_JPEG_QUALITY,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            search_api_key: None,
            search_cx: None,
            chrome_bin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            session_ttl_seconds: env_parse("BROWSER_SESSION_TTL_SECONDS", DEFAULT_SESSION_TTL_SECONDS),
            tab_ttl_seconds: env_parse("BROWSER_TAB_TTL_SECONDS", DEFAULT_TAB_TTL_SECONDS),
            cleanup_interval_seconds: env_parse(
                "BROWSER_CLEANUP_INTERVAL_SECONDS",
                DEFAULT_CLEANUP_INTERVAL_SECONDS,
            ),
            stream_fps: env_parse("BROWSER_STREAM_FPS", DEFAULT_STREAM_FPS),
            stream_jpeg_quality: env_parse("BROWSER_STREAM_JPEG_QUALITY", DEFAULT_STREAM_JPEG_QUALITY),
            host: std::env::var("PORTHOLE_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: env_parse("PORTHOLE_PORT", DEFAULT_PORT),
            search_api_key: env_nonempty("GOOGLE_CSE_API_KEY"),
            search_cx: env_nonempty("GOOGLE_CSE_CX"),
            chrome_bin: env_nonempty("CHROME_BIN"),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn tab_ttl(&self) -> Duration {
        Duration::from_secs(self.tab_ttl_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    /// Delay between streamed frames, floored at 50ms.
    pub fn frame_delay(&self) -> Duration {
        let fps = self.stream_fps.max(1.0);
        Duration::from_secs_f64((1.0 / fps).max(0.05))
    }
}

fn env_parse<T: std::str::FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, default = %default, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.session_ttl(), Duration::from_secs(1800));
        assert_eq!(cfg.tab_ttl(), Duration::from_secs(1800));
        assert_eq!(cfg.cleanup_interval(), Duration::from_secs(30));
        assert_eq!(cfg.stream_jpeg_quality, 50);
        assert_eq!(cfg.port, 8089);
        assert!(cfg.search_api_key.is_none());
    }

    #[test]
    fn test_frame_delay_floor() {
        let mut cfg = Config::default();
        assert!((cfg.frame_delay().as_secs_f64() - 1.0 / 6.0).abs() < 1e-9);

        cfg.stream_fps = 1000.0;
        assert_eq!(cfg.frame_delay(), Duration::from_millis(50));

        // A zero/negative rate is clamped rather than dividing by zero.
        cfg.stream_fps = 0.0;
        assert_eq!(cfg.frame_delay(), Duration::from_secs(1));
    }
}
