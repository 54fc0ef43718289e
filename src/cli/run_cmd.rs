//! `lookout run` — execute one iteration of the observation schedule.

use crate::aggregate::{RunAggregator, WorkItem};
use crate::capture::session::SessionController;
use crate::cli::output;
use crate::config::Config;
use crate::events::{EventBus, LookoutEvent};
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::{NoopRenderer, Renderer};
use crate::report::{JsonlSink, ResultSink};
use crate::schedule::allocator;
use crate::timing::TimingPlan;
use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub async fn run(
    config_path: Option<&Path>,
    slot: usize,
    geo: Option<&str>,
    out: Option<&Path>,
) -> Result<()> {
    // Configuration problems are the one fatal error class: nothing runs
    // on a broken config.
    let config = Config::load(config_path)?;
    if slot >= config.total_slots {
        bail!(
            "slot index {slot} out of range (config has {} slots)",
            config.total_slots
        );
    }

    let bus = Arc::new(EventBus::default());
    let map = allocator::allocate(&config.target_weights(), config.total_slots);
    bus.emit(LookoutEvent::CycleScheduled {
        total_slots: map.total_slots,
        targets: config.targets.len(),
        uniform_fallback: map.uniform_fallback,
    });
    if map.uniform_fallback {
        warn!("all target weights are zero; applied uniform fallback");
        bus.emit(LookoutEvent::Warning {
            message: "all target weights are zero; applied uniform fallback".to_string(),
        });
    }

    let items = config.select_work(&map, slot, geo);
    let plan = TimingPlan::derive(
        items.len(),
        config.target_minutes,
        config.flex_minutes,
        config.base_runs_per_page,
        &config.bounds,
    );

    if !output::is_quiet() && !output::is_json() {
        println!(
            "Slot {slot}: {} pages, {} runs each, ceiling {}ms",
            items.len(),
            plan.runs_per_page,
            plan.hard_ceiling_ms
        );
    }

    let renderer: Arc<dyn Renderer> = match ChromiumRenderer::new(shared_proxy(&items)).await {
        Ok(renderer) => Arc::new(renderer),
        Err(e) => {
            warn!(error = %e, "browser unavailable; sessions will report launch failures");
            Arc::new(NoopRenderer)
        }
    };

    let controller =
        SessionController::new(Arc::clone(&renderer), config.detection.clone(), Arc::clone(&bus));
    let aggregator = RunAggregator::new(
        controller,
        Arc::clone(&bus),
        Duration::from_millis(config.run_pause_ms),
    );

    let progress = spawn_progress(&bus, items.len());
    let result = aggregator.run_iteration(slot, &items, &plan).await;
    if let Some(progress) = progress {
        let _ = progress.await;
    }
    renderer.shutdown().await?;

    let mut sink = match out {
        Some(path) => JsonlSink::open(path)?,
        None => JsonlSink::default_sink()?,
    };
    sink.record_slot_map(&map)?;
    sink.record_iteration(&result)?;

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "slot": result.slot,
            "pages": result.pages.len(),
            "elapsed_ms": result.elapsed_ms,
            "bidding_pages": result.pages.iter().filter(|p| p.flags.bidding).count(),
            "ad_serving_pages": result.pages.iter().filter(|p| p.flags.ad_serving).count(),
        }));
    } else if !output::is_quiet() {
        let bidding = result.pages.iter().filter(|p| p.flags.bidding).count();
        let serving = result.pages.iter().filter(|p| p.flags.ad_serving).count();
        println!(
            "Done: {} pages in {}ms — bidding on {bidding}, ad serving on {serving}",
            result.pages.len(),
            result.elapsed_ms
        );
    }

    Ok(())
}

/// The browser takes one proxy at launch. Use it when every variant in
/// the work list agrees; otherwise launch direct and record the variant
/// proxies in the summaries only.
fn shared_proxy(items: &[WorkItem]) -> Option<&str> {
    let mut proxies = items
        .iter()
        .filter_map(|i| i.variant.proxy.as_deref())
        .collect::<Vec<_>>();
    proxies.sort_unstable();
    proxies.dedup();
    match proxies.as_slice() {
        [proxy] if items.iter().all(|i| i.variant.proxy.is_some()) => Some(proxy),
        [] => None,
        _ => {
            warn!("work list mixes egress proxies; launching without one");
            None
        }
    }
}

/// Drive a progress bar off the event bus until the iteration completes.
fn spawn_progress(
    bus: &EventBus,
    pages: usize,
) -> Option<tokio::task::JoinHandle<()>> {
    if output::is_quiet() || output::is_json() || pages == 0 {
        return None;
    }
    let mut rx = bus.subscribe();
    let bar = ProgressBar::new(pages as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    Some(tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                LookoutEvent::PageComplete { target, page, .. } => {
                    bar.set_message(format!("{target}/{page}"));
                    bar.inc(1);
                }
                LookoutEvent::IterationComplete { .. } => break,
                _ => {}
            }
        }
        bar.finish_and_clear();
    }))
}
