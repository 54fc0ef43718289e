//! Chromium-based renderer using chromiumoxide.

use super::{ContextOptions, NavTimeout, NavigationResult, RenderContext, Renderer};
use crate::capture::netlog::{Direction, NetworkEvent};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCacheParams, ClearBrowserCookiesParams, EnableParams, EventRequestWillBeSent,
    EventResponseReceived, SetUserAgentOverrideParams,
};
use chromiumoxide::page::Page;
use chrono::Utc;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Capacity of the per-context network event channel. The capture layer
/// drains it continuously; lag is counted, not fatal.
const EVENT_CHANNEL_CAPACITY: usize = 1_024;

const DEFAULT_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. LOOKOUT_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("LOOKOUT_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.lookout/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".lookout/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".lookout/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".lookout/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".lookout/chromium/chrome-linux64/chrome"),
                home.join(".lookout/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Browser,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium instance. A proxy can only be set here;
    /// the protocol does not support per-tab egress.
    pub async fn new(proxy: Option<&str>) -> Result<Self> {
        let chrome_path =
            find_chromium().context("Chromium not found. Set LOOKOUT_CHROMIUM_PATH.")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking");
        if let Some(proxy) = proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self, options: &ContextOptions) -> Result<Arc<dyn RenderContext>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        // Sessions must not share state: scrub cookies and cache before
        // the tab observes anything. Contexts never run concurrently, so
        // nothing can leak back in mid-session.
        page.execute(ClearBrowserCookiesParams::default())
            .await
            .context("failed to clear cookies")?;
        page.execute(ClearBrowserCacheParams::default())
            .await
            .context("failed to clear cache")?;

        if options.user_agent.is_some() || options.accept_language.is_some() {
            let mut params = SetUserAgentOverrideParams::builder().user_agent(
                options
                    .user_agent
                    .clone()
                    .unwrap_or_else(|| DEFAULT_UA.to_string()),
            );
            if let Some(lang) = &options.accept_language {
                params = params.accept_language(lang.clone());
            }
            let params = params
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build user agent override: {e}"))?;
            page.set_user_agent(params)
                .await
                .context("failed to set user agent")?;
        }

        page.execute(EnableParams::default())
            .await
            .context("failed to enable network events")?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        spawn_event_forwarders(&page, events.clone()).await?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Arc::new(ChromiumContext {
            page,
            events,
            closed: AtomicBool::new(false),
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        // Browser is dropped when ChromiumRenderer is dropped
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// Pipe CDP request/response events onto the context's broadcast channel.
/// The forwarder tasks end when the page closes and its streams drain.
async fn spawn_event_forwarders(
    page: &Page,
    events: broadcast::Sender<NetworkEvent>,
) -> Result<()> {
    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .context("failed to listen for request events")?;
    let tx = events.clone();
    tokio::spawn(async move {
        while let Some(event) = requests.next().await {
            let _ = tx.send(NetworkEvent {
                captured_at: Utc::now(),
                direction: Direction::Request,
                url: event.request.url.clone(),
                method: event.request.method.clone(),
                status: None,
                headers: serde_json::to_string(&event.request.headers).unwrap_or_default(),
                body: event
                    .request
                    .post_data_entries
                    .as_ref()
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|e| e.bytes.as_ref().map(AsRef::<str>::as_ref))
                            .collect::<String>()
                    })
                    .unwrap_or_default(),
            });
        }
    });

    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .context("failed to listen for response events")?;
    tokio::spawn(async move {
        while let Some(event) = responses.next().await {
            let _ = events.send(NetworkEvent {
                captured_at: Utc::now(),
                direction: Direction::Response,
                url: event.response.url.clone(),
                method: String::new(),
                status: Some(event.response.status as u16),
                headers: serde_json::to_string(&event.response.headers).unwrap_or_default(),
                body: String::new(),
            });
        }
    });

    Ok(())
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
    events: broadcast::Sender<NetworkEvent>,
    closed: AtomicBool,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(timeout, self.page.goto(url)).await;

        match result {
            Ok(Ok(_page)) => {
                let _ = self.page.wait_for_navigation().await;

                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    // The navigation call does not surface the document
                    // status; it arrives on the response event stream.
                    status: 0,
                    load_time_ms: start.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => Err(anyhow::anyhow!("navigation failed: {e}")),
            Err(_) => Err(NavTimeout(timeout).into()),
        }
    }

    async fn wait_idle(&self, timeout: Duration) -> Result<()> {
        // Fixed settle window; the event forwarders keep collecting
        // trailing traffic while it runs.
        tokio::time::sleep(timeout).await;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.clone().close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_navigate_and_capture_events() {
        let renderer = ChromiumRenderer::new(None)
            .await
            .expect("failed to create renderer");
        let ctx = renderer
            .new_context(&ContextOptions::default())
            .await
            .expect("failed to create context");

        let mut rx = ctx.subscribe();

        let nav = ctx
            .navigate(
                "data:text/html,<h1>Hello</h1><img src='https://example.com/x.png'>",
                Duration::from_secs(10),
            )
            .await
            .expect("navigation failed");

        assert!(nav.load_time_ms < 10_000);

        ctx.wait_idle(Duration::from_millis(500))
            .await
            .expect("wait_idle failed");

        // At least the image request should have been observed.
        let mut saw_request = false;
        while let Ok(event) = rx.try_recv() {
            if event.direction == Direction::Request {
                saw_request = true;
            }
        }
        assert!(saw_request);

        ctx.close().await.expect("close failed");
        // Second close is a no-op.
        ctx.close().await.expect("second close failed");
        assert_eq!(renderer.active_contexts(), 0);

        renderer.shutdown().await.expect("shutdown failed");
    }
}
