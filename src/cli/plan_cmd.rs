//! `lookout plan` — show the timing plan an iteration would derive.

use crate::cli::output;
use crate::config::Config;
use crate::timing::TimingPlan;
use anyhow::Result;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, pages: usize) -> Result<()> {
    let config = Config::load(config_path)?;
    let plan = TimingPlan::derive(
        pages,
        config.target_minutes,
        config.flex_minutes,
        config.base_runs_per_page,
        &config.bounds,
    );

    if output::is_json() {
        output::print_json(&serde_json::to_value(plan)?);
        return Ok(());
    }

    println!("Timing plan for {pages} pages over {} minutes", config.target_minutes);
    println!("  per-page budget:  {}ms", plan.per_page_budget_ms);
    println!("  runs per page:    {}", plan.runs_per_page);
    println!("  nav timeout:      {}ms", plan.nav_timeout_ms);
    println!("  post-load wait:   {}ms", plan.post_load_wait_ms);
    println!("  hard ceiling:     {}ms", plan.hard_ceiling_ms);
    Ok(())
}
