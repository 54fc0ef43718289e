//! Capture session controller — runs exactly one bounded observation of
//! one page and always produces a [`RunSummary`], even on failure.
//!
//! Lifecycle: created → armed (watchdog started) → observing (navigation,
//! settle wait) → disarmed → closed. The session reaches `closed` on every
//! exit path, including when the watchdog fires; the teardown guard keeps
//! the two close paths from double-releasing the context.

use crate::capture::netlog::{DetectionFlags, DetectionKeywords, EventLog, NetworkEvent};
use crate::capture::watchdog::{TeardownGuard, Watchdog};
use crate::events::{EventBus, LookoutEvent};
use crate::renderer::{ContextOptions, NavTimeout, Renderer};
use crate::timing::TimingPlan;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// What one capture session is asked to observe.
#[derive(Debug, Clone, Copy)]
pub struct SessionSpec<'a> {
    pub target: &'a str,
    pub page_label: &'a str,
    pub url: &'a str,
    pub variant: &'a ContextOptions,
    pub run_index: u32,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Navigation and settle wait both completed.
    Completed,
    /// Something went wrong but partial data was captured.
    Degraded,
    /// The watchdog cut the session short at the hard ceiling.
    CeilingTruncated,
    /// The rendering context could not be created at all.
    LaunchFailed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Degraded => "degraded",
            Self::CeilingTruncated => "ceiling_truncated",
            Self::LaunchFailed => "launch_failed",
        }
    }
}

/// Outcome of the navigation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum NavStatus {
    Loaded { status: u16, load_time_ms: u64 },
    TimedOut,
    Failed,
    /// The watchdog fired before navigation resolved.
    Interrupted,
}

/// Immutable record produced by exactly one capture session.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub session_id: String,
    pub target: String,
    pub page_label: String,
    pub url: String,
    pub variant: String,
    pub run_index: u32,
    pub outcome: RunOutcome,
    pub nav: NavStatus,
    pub elapsed_ms: u64,
    pub total_events: usize,
    pub matched_events: usize,
    pub flags: DetectionFlags,
    /// Size-bounded event sequence; not part of the flat sink record.
    #[serde(skip)]
    pub events: Arc<Vec<NetworkEvent>>,
}

/// Progress shared between the main control flow and summary assembly,
/// so a watchdog interruption still sees how far navigation got.
#[derive(Debug, Clone, Copy)]
struct MainProgress {
    nav: NavStatus,
    settle_failed: bool,
}

/// Runs capture sessions against a rendering engine.
pub struct SessionController {
    renderer: Arc<dyn Renderer>,
    keywords: DetectionKeywords,
    bus: Arc<EventBus>,
}

impl SessionController {
    pub fn new(renderer: Arc<dyn Renderer>, keywords: DetectionKeywords, bus: Arc<EventBus>) -> Self {
        Self {
            renderer,
            keywords,
            bus,
        }
    }

    /// Run one observation. Never returns an error: navigation problems,
    /// settle failures and watchdog truncation all degrade the summary
    /// instead of propagating.
    pub async fn run_once(&self, spec: SessionSpec<'_>, plan: &TimingPlan) -> RunSummary {
        let started = Instant::now();
        let session_id = Uuid::new_v4().to_string();

        self.bus.emit(LookoutEvent::SessionStarted {
            session_id: session_id.clone(),
            target: spec.target.to_string(),
            url: spec.url.to_string(),
            variant: spec.variant.name.clone(),
            run_index: spec.run_index,
        });

        let context = match self.renderer.new_context(spec.variant).await {
            Ok(context) => context,
            Err(e) => {
                warn!(url = spec.url, error = %e, "failed to open rendering context");
                return self.finish(
                    launch_failed_summary(&session_id, &spec, started),
                );
            }
        };

        let guard = TeardownGuard::new(Arc::clone(&context));
        let watchdog = Watchdog::arm(plan.hard_ceiling(), Arc::clone(&guard));

        // Collector: drains the context's traffic into the bounded log
        // for as long as the session lives.
        let log = Arc::new(Mutex::new(EventLog::new()));
        let collector = {
            let log = Arc::clone(&log);
            let keywords = self.keywords.clone();
            let mut rx = context.subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => log.lock().await.push(event, &keywords),
                        Err(RecvError::Lagged(n)) => log.lock().await.note_dropped(n as usize),
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };

        let progress = Arc::new(Mutex::new(MainProgress {
            nav: NavStatus::Interrupted,
            settle_failed: false,
        }));

        let main_flow = {
            let context = Arc::clone(&context);
            let progress = Arc::clone(&progress);
            let bus = Arc::clone(&self.bus);
            let session_id = session_id.clone();
            let url = spec.url.to_string();
            let plan = *plan;
            async move {
                let nav = match context.navigate(&url, plan.nav_timeout()).await {
                    Ok(result) => NavStatus::Loaded {
                        status: result.status,
                        load_time_ms: result.load_time_ms,
                    },
                    Err(e) if e.downcast_ref::<NavTimeout>().is_some() => {
                        warn!(url = %url, "navigation timed out, continuing degraded");
                        bus.emit(LookoutEvent::NavigationTimedOut {
                            session_id: session_id.clone(),
                            url: url.clone(),
                        });
                        NavStatus::TimedOut
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "navigation failed, continuing degraded");
                        NavStatus::Failed
                    }
                };
                progress.lock().await.nav = nav;

                // Re-check the ceiling: if navigation already ate it,
                // skip the settle wait and go straight to teardown.
                if started.elapsed() < plan.hard_ceiling() {
                    if let Err(e) = context.wait_idle(plan.post_load_wait()).await {
                        warn!(url = %url, error = %e, "settle wait failed");
                        progress.lock().await.settle_failed = true;
                    }
                }
            }
        };

        // The watchdog races the main flow; whichever finishes first
        // governs cleanup, and the guard makes cleanup idempotent.
        let truncated = tokio::select! {
            _ = watchdog.fired() => true,
            _ = main_flow => false,
        };

        let truncated = watchdog.disarm() || truncated;
        if truncated {
            self.bus.emit(LookoutEvent::WatchdogFired {
                session_id: session_id.clone(),
                url: spec.url.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
        guard.close().await;

        // Let any in-flight event land, then stop the collector.
        tokio::task::yield_now().await;
        collector.abort();
        let log = std::mem::take(&mut *log.lock().await);
        let MainProgress { nav, settle_failed } = *progress.lock().await;

        let outcome = if truncated {
            RunOutcome::CeilingTruncated
        } else if matches!(nav, NavStatus::Loaded { .. }) && !settle_failed {
            RunOutcome::Completed
        } else {
            RunOutcome::Degraded
        };

        self.finish(RunSummary {
            session_id,
            target: spec.target.to_string(),
            page_label: spec.page_label.to_string(),
            url: spec.url.to_string(),
            variant: spec.variant.name.clone(),
            run_index: spec.run_index,
            outcome,
            nav,
            elapsed_ms: started.elapsed().as_millis() as u64,
            total_events: log.total_observed(),
            matched_events: log.matched(),
            flags: log.flags(),
            events: Arc::new(log.into_events()),
        })
    }

    fn finish(&self, summary: RunSummary) -> RunSummary {
        self.bus.emit(LookoutEvent::SessionComplete {
            session_id: summary.session_id.clone(),
            outcome: summary.outcome.as_str().to_string(),
            elapsed_ms: summary.elapsed_ms,
            total_events: summary.total_events,
            matched_events: summary.matched_events,
        });
        debug!(
            session = %summary.session_id,
            outcome = summary.outcome.as_str(),
            events = summary.total_events,
            "session finished"
        );
        summary
    }
}

/// Failure to create the rendering context: zero events, all flags
/// false, explicit marker.
fn launch_failed_summary(session_id: &str, spec: &SessionSpec<'_>, started: Instant) -> RunSummary {
    RunSummary {
        session_id: session_id.to_string(),
        target: spec.target.to_string(),
        page_label: spec.page_label.to_string(),
        url: spec.url.to_string(),
        variant: spec.variant.name.clone(),
        run_index: spec.run_index,
        outcome: RunOutcome::LaunchFailed,
        nav: NavStatus::Failed,
        elapsed_ms: started.elapsed().as_millis() as u64,
        total_events: 0,
        matched_events: 0,
        flags: DetectionFlags::default(),
        events: Arc::new(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::netlog::Direction;
    use crate::renderer::{NavigationResult, RenderContext};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn tight_plan() -> TimingPlan {
        TimingPlan {
            runs_per_page: 1,
            nav_timeout_ms: 200,
            post_load_wait_ms: 50,
            hard_ceiling_ms: 400,
            per_page_budget_ms: 500,
            flex_minutes: 0,
        }
    }

    fn request_event(url: &str) -> NetworkEvent {
        NetworkEvent {
            captured_at: Utc::now(),
            direction: Direction::Request,
            url: url.to_string(),
            method: "GET".to_string(),
            status: None,
            headers: String::new(),
            body: String::new(),
        }
    }

    /// Scripted rendering context. `honors_deadline` false simulates an
    /// engine whose navigate ignores its deadline entirely — the case
    /// the watchdog exists for.
    struct StubContext {
        nav_delay: Duration,
        honors_deadline: bool,
        emit_urls: Vec<String>,
        events: broadcast::Sender<NetworkEvent>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RenderContext for StubContext {
        async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationResult> {
            for u in &self.emit_urls {
                let _ = self.events.send(request_event(u));
            }
            if self.honors_deadline && self.nav_delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(NavTimeout(timeout).into());
            }
            tokio::time::sleep(self.nav_delay).await;
            Ok(NavigationResult {
                final_url: url.to_string(),
                status: 200,
                load_time_ms: self.nav_delay.as_millis() as u64,
            })
        }

        async fn wait_idle(&self, _timeout: Duration) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
            self.events.subscribe()
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubRenderer {
        nav_delay: Duration,
        honors_deadline: bool,
        emit_urls: Vec<String>,
        fail_open: bool,
        closes: Arc<AtomicUsize>,
    }

    impl StubRenderer {
        fn quick(emit_urls: &[&str]) -> Self {
            Self {
                nav_delay: Duration::from_millis(10),
                honors_deadline: true,
                emit_urls: emit_urls.iter().map(|s| s.to_string()).collect(),
                fail_open: false,
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Renderer for StubRenderer {
        async fn new_context(&self, _options: &ContextOptions) -> Result<Arc<dyn RenderContext>> {
            if self.fail_open {
                return Err(anyhow::anyhow!("no browser"));
            }
            let (events, _) = broadcast::channel(64);
            Ok(Arc::new(StubContext {
                nav_delay: self.nav_delay,
                honors_deadline: self.honors_deadline,
                emit_urls: self.emit_urls.clone(),
                events,
                closes: Arc::clone(&self.closes),
            }))
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
        fn active_contexts(&self) -> usize {
            0
        }
    }

    fn controller(renderer: StubRenderer) -> SessionController {
        SessionController::new(
            Arc::new(renderer),
            DetectionKeywords::default(),
            Arc::new(EventBus::new(64)),
        )
    }

    fn spec<'a>(variant: &'a ContextOptions) -> SessionSpec<'a> {
        SessionSpec {
            target: "pub-a",
            page_label: "home",
            url: "https://example.com/",
            variant,
            run_index: 0,
        }
    }

    #[tokio::test]
    async fn test_completed_run_captures_events_and_flags() {
        let renderer = StubRenderer::quick(&[
            "https://cdn.example.com/prebid.js",
            "https://example.com/app.js",
        ]);
        let closes = Arc::clone(&renderer.closes);
        let ctl = controller(renderer);
        let variant = ContextOptions::default();

        let summary = ctl.run_once(spec(&variant), &tight_plan()).await;
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert!(matches!(summary.nav, NavStatus::Loaded { status: 200, .. }));
        assert_eq!(summary.total_events, 2);
        assert_eq!(summary.matched_events, 1);
        assert!(summary.flags.bidding);
        assert!(!summary.flags.ad_serving);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_yields_failed_summary_not_error() {
        let mut renderer = StubRenderer::quick(&[]);
        renderer.fail_open = true;
        let ctl = controller(renderer);
        let variant = ContextOptions::default();

        let summary = ctl.run_once(spec(&variant), &tight_plan()).await;
        assert_eq!(summary.outcome, RunOutcome::LaunchFailed);
        assert_eq!(summary.total_events, 0);
        assert_eq!(summary.flags, DetectionFlags::default());
    }

    #[tokio::test]
    async fn test_nav_timeout_degrades_but_session_continues() {
        let mut renderer = StubRenderer::quick(&["https://ads.adserver.net/bid"]);
        renderer.nav_delay = Duration::from_secs(10);
        let closes = Arc::clone(&renderer.closes);
        let ctl = controller(renderer);
        let variant = ContextOptions::default();

        let summary = ctl.run_once(spec(&variant), &tight_plan()).await;
        assert_eq!(summary.outcome, RunOutcome::Degraded);
        assert_eq!(summary.nav, NavStatus::TimedOut);
        // Events captured before the timeout still count.
        assert_eq!(summary.total_events, 1);
        assert!(summary.flags.ad_serving);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watchdog_forces_teardown_near_ceiling() {
        // Engine that ignores its navigation deadline outright.
        let mut renderer = StubRenderer::quick(&[]);
        renderer.nav_delay = Duration::from_secs(30);
        renderer.honors_deadline = false;
        let closes = Arc::clone(&renderer.closes);
        let ctl = controller(renderer);
        let variant = ContextOptions::default();

        let plan = TimingPlan {
            runs_per_page: 1,
            nav_timeout_ms: 10_000,
            post_load_wait_ms: 1_000,
            hard_ceiling_ms: 250,
            per_page_budget_ms: 20_000,
            flex_minutes: 0,
        };

        let started = Instant::now();
        let summary = ctl.run_once(spec(&variant), &plan).await;
        let elapsed = started.elapsed();

        assert_eq!(summary.outcome, RunOutcome::CeilingTruncated);
        assert_eq!(summary.nav, NavStatus::Interrupted);
        // Forced teardown happens near the ceiling, well under the
        // scheduler-latency tolerance.
        assert!(elapsed >= Duration::from_millis(250));
        assert!(elapsed < Duration::from_millis(1250), "took {elapsed:?}");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watchdog_event_emitted_on_truncation() {
        let mut renderer = StubRenderer::quick(&[]);
        renderer.nav_delay = Duration::from_secs(30);
        renderer.honors_deadline = false;
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let ctl = SessionController::new(
            Arc::new(renderer),
            DetectionKeywords::default(),
            Arc::clone(&bus),
        );
        let variant = ContextOptions::default();
        let plan = TimingPlan {
            runs_per_page: 1,
            nav_timeout_ms: 10_000,
            post_load_wait_ms: 1_000,
            hard_ceiling_ms: 100,
            per_page_budget_ms: 20_000,
            flex_minutes: 0,
        };

        ctl.run_once(spec(&variant), &plan).await;

        let mut saw_watchdog = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, LookoutEvent::WatchdogFired { .. }) {
                saw_watchdog = true;
            }
        }
        assert!(saw_watchdog);
    }
}
