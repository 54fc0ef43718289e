//! Renderer abstraction for browser-based page observation.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). The capture
//! layer only ever talks to these traits; any engine that can navigate
//! with a deadline, wait for the network to go idle, and stream its
//! request/response traffic is substitutable.

pub mod chromium;

use crate::capture::netlog::NetworkEvent;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Marker error for a navigation that hit its deadline, so callers can
/// tell a timeout from an outright refusal.
#[derive(Debug, thiserror::Error)]
#[error("navigation timed out after {0:?}")]
pub struct NavTimeout(pub Duration);

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// HTTP status code, 0 when the engine does not report one.
    pub status: u16,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Per-context variant: how a page is observed, not which page.
///
/// User agent and accept-language apply per context; a proxy can only be
/// honored at browser launch (a protocol limitation), so it is recorded
/// here and consumed by the engine constructor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextOptions {
    /// Variant label, e.g. a geography name.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub accept_language: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
}

/// A browser engine that can create isolated rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a fresh context (tab) with no cookies or cache carried
    /// over from any other context.
    async fn new_context(&self, options: &ContextOptions) -> Result<Arc<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single rendering context observing one page.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL, giving up after `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationResult>;
    /// Wait up to `timeout` for trailing network activity to settle.
    async fn wait_idle(&self, timeout: Duration) -> Result<()>;
    /// Subscribe to the context's request/response traffic.
    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent>;
    /// Close the context. Closing an already-closed context is a no-op.
    async fn close(&self) -> Result<()>;
}

/// A no-op renderer used when Chromium is unavailable.
///
/// Every `new_context` call fails, which the capture layer reports as a
/// failed run summary rather than a propagated error.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_context(&self, _options: &ContextOptions) -> Result<Arc<dyn RenderContext>> {
        Err(anyhow::anyhow!("browser not available"))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
}
