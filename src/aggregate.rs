//! Run aggregation — repeats capture sessions per page and folds the
//! results into page-level and iteration-level records.
//!
//! Pages are processed sequentially on one control thread; the only
//! concurrency in an iteration lives inside a single session, between
//! its main flow and its watchdog.

use crate::capture::netlog::DetectionFlags;
use crate::capture::session::{RunSummary, SessionController, SessionSpec};
use crate::events::{EventBus, LookoutEvent};
use crate::renderer::ContextOptions;
use crate::timing::TimingPlan;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// One (target, page, variant) combination selected for an iteration.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub target: String,
    pub page_label: String,
    pub url: String,
    pub variant: ContextOptions,
}

/// Per-page fold of the runs executed for one work item.
#[derive(Debug, Clone, Serialize)]
pub struct PageAggregate {
    pub target: String,
    pub page_label: String,
    pub url: String,
    pub variant: String,
    pub runs: u32,
    /// Arithmetic mean of observed event counts across runs.
    pub mean_total_events: f64,
    /// Arithmetic mean of keyword-matching event counts across runs.
    pub mean_matched_events: f64,
    /// Logical OR of the per-run detection flags.
    pub flags: DetectionFlags,
    /// The underlying run summaries, retained for audit.
    pub summaries: Vec<RunSummary>,
}

/// Everything one iteration produced.
#[derive(Debug, Clone, Serialize)]
pub struct IterationResult {
    pub slot: usize,
    pub plan: TimingPlan,
    pub pages: Vec<PageAggregate>,
    pub elapsed_ms: u64,
}

/// Fold run summaries for one work item into its page aggregate.
pub fn fold_runs(item: &WorkItem, summaries: Vec<RunSummary>) -> PageAggregate {
    let runs = summaries.len() as u32;
    let denom = summaries.len().max(1) as f64;
    let mean_total_events =
        summaries.iter().map(|s| s.total_events as f64).sum::<f64>() / denom;
    let mean_matched_events =
        summaries.iter().map(|s| s.matched_events as f64).sum::<f64>() / denom;
    let flags = summaries
        .iter()
        .fold(DetectionFlags::default(), |acc, s| acc.merge(s.flags));

    PageAggregate {
        target: item.target.clone(),
        page_label: item.page_label.clone(),
        url: item.url.clone(),
        variant: item.variant.name.clone(),
        runs,
        mean_total_events,
        mean_matched_events,
        flags,
        summaries,
    }
}

/// Drives all runs for an iteration's work list.
pub struct RunAggregator {
    controller: SessionController,
    bus: Arc<EventBus>,
    /// Pause between repeated runs of the same page, to avoid correlated
    /// transient failures.
    run_pause: Duration,
}

impl RunAggregator {
    pub fn new(controller: SessionController, bus: Arc<EventBus>, run_pause: Duration) -> Self {
        Self {
            controller,
            bus,
            run_pause,
        }
    }

    /// Observe one page `runs_per_page` times, sequentially.
    pub async fn observe_page(&self, item: &WorkItem, plan: &TimingPlan) -> PageAggregate {
        let mut summaries = Vec::with_capacity(plan.runs_per_page as usize);
        for run_index in 0..plan.runs_per_page {
            if run_index > 0 {
                tokio::time::sleep(self.run_pause).await;
            }
            let summary = self
                .controller
                .run_once(
                    SessionSpec {
                        target: &item.target,
                        page_label: &item.page_label,
                        url: &item.url,
                        variant: &item.variant,
                        run_index,
                    },
                    plan,
                )
                .await;
            summaries.push(summary);
        }

        let aggregate = fold_runs(item, summaries);
        self.bus.emit(LookoutEvent::PageComplete {
            target: aggregate.target.clone(),
            page: aggregate.page_label.clone(),
            variant: aggregate.variant.clone(),
            runs: aggregate.runs,
            bidding: aggregate.flags.bidding,
            ad_serving: aggregate.flags.ad_serving,
        });
        aggregate
    }

    /// Process an iteration's full work list. Every item yields an
    /// aggregate, degraded or not; nothing aborts the iteration.
    pub async fn run_iteration(
        &self,
        slot: usize,
        items: &[WorkItem],
        plan: &TimingPlan,
    ) -> IterationResult {
        let started = Instant::now();
        self.bus.emit(LookoutEvent::IterationStarted {
            slot,
            pages: items.len(),
            runs_per_page: plan.runs_per_page,
        });
        info!(slot, pages = items.len(), runs_per_page = plan.runs_per_page, "iteration started");

        let mut pages = Vec::with_capacity(items.len());
        for item in items {
            pages.push(self.observe_page(item, plan).await);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.bus.emit(LookoutEvent::IterationComplete {
            slot,
            pages: pages.len(),
            elapsed_ms,
        });
        info!(slot, pages = pages.len(), elapsed_ms, "iteration complete");

        IterationResult {
            slot,
            plan: *plan,
            pages,
            elapsed_ms,
        }
    }
}
