//! Fake engine implementations for tests.
//!
//! `FakeLauncher` hands out a shared `FakeEngine` whose contexts and pages
//! record every operation, so the orchestration layer can be exercised
//! without a browser.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use porthole_core::{Error, Result};

use crate::{BrowserContext, Engine, EngineLauncher, Page};

#[derive(Default)]
pub struct FakeLauncher {
    pub engine: Arc<FakeEngine>,
    pub fail: AtomicBool,
    pub launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let launcher = Self::default();
        launcher.fail.store(true, Ordering::SeqCst);
        launcher
    }
}

#[async_trait]
impl EngineLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Arc<dyn Engine>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::EngineUnavailable("fake launch failure".into()));
        }
        Ok(self.engine.clone())
    }
}

#[derive(Default)]
pub struct FakeEngine {
    pub contexts: Mutex<Vec<Arc<FakeContext>>>,
    pub closed: AtomicBool,
}

#[async_trait]
impl Engine for FakeEngine {
    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>> {
        let ctx = Arc::new(FakeContext::default());
        self.contexts.lock().unwrap().push(ctx.clone());
        Ok(ctx)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeContext {
    pub pages: Mutex<Vec<Arc<FakePage>>>,
    pub closed: AtomicBool,
    pub fail_new_page: AtomicBool,
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        if self.fail_new_page.load(Ordering::SeqCst) {
            return Err(Error::Engine("fake page failure".into()));
        }
        let page = Arc::new(FakePage::default());
        self.pages.lock().unwrap().push(page.clone());
        Ok(page)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakePageState {
    pub url: String,
    pub title: String,
    /// HTML passed to the last `set_content` call.
    pub content: Option<String>,
    /// Every operation applied to this page, in order.
    pub ops: Vec<String>,
    pub closed: bool,
    pub fail_goto: bool,
    pub fail_screenshot: bool,
    /// Final URL returned by the next `goto`, if it should differ from the
    /// requested one (redirect simulation).
    pub redirect_to: Option<String>,
}

#[derive(Default)]
pub struct FakePage {
    pub state: Mutex<FakePageState>,
}

impl FakePage {
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn set_fail_goto(&self, fail: bool) {
        self.state.lock().unwrap().fail_goto = fail;
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_goto {
            return Err(Error::Navigation(format!("fake goto failure: {}", url)));
        }
        let final_url = state.redirect_to.take().unwrap_or_else(|| url.to_string());
        state.url = final_url.clone();
        state.ops.push(format!("goto:{}", url));
        Ok(final_url)
    }

    async fn wait_until_quiet(&self, _timeout: Duration) -> Result<bool> {
        self.state.lock().unwrap().ops.push("wait_quiet".into());
        Ok(true)
    }

    async fn set_content(&self, html: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.content = Some(html.to_string());
        state.ops.push("set_content".into());
        Ok(())
    }

    async fn current_url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    async fn title(&self) -> String {
        self.state.lock().unwrap().title.clone()
    }

    async fn screenshot_jpeg(&self, _quality: u32) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_screenshot {
            return Err(Error::Engine("fake screenshot failure".into()));
        }
        state.ops.push("screenshot".into());
        // "fake" in base64
        Ok("ZmFrZQ==".to_string())
    }

    async fn click(&self, x: f64, y: f64, button: &str, click_count: i64) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .ops
            .push(format!("click:{},{},{},{}", x, y, button, click_count));
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.state.lock().unwrap().ops.push(format!("type:{}", text));
        Ok(())
    }

    async fn press_key(&self, key: &str, modifiers: i32) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .ops
            .push(format!("key:{}:{}", key, modifiers));
        Ok(())
    }

    async fn scroll(&self, delta_x: f64, delta_y: f64) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .ops
            .push(format!("scroll:{},{}", delta_x, delta_y));
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.state.lock().unwrap().ops.push("back".into());
        Ok(())
    }

    async fn go_forward(&self) -> Result<()> {
        self.state.lock().unwrap().ops.push("forward".into());
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.state.lock().unwrap().ops.push("reload".into());
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}
