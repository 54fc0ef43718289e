//! `lookout slots` — compute and print the day's slot map.

use crate::cli::output;
use crate::config::Config;
use crate::schedule::allocator;
use anyhow::Result;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let map = allocator::allocate(&config.target_weights(), config.total_slots);

    if output::is_json() {
        output::print_json(&serde_json::to_value(&map)?);
        return Ok(());
    }

    println!("Slot map ({} slots)", map.total_slots);
    if map.uniform_fallback {
        println!("  (all weights zero — uniform fallback applied)");
    }
    for (target, slots) in &map.assignments {
        let list = slots
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {target:<24} {:>2} slots  [{list}]", slots.len());
    }
    println!();
    for (slot, occ) in map.bucket_occupancy().iter().enumerate() {
        println!("  slot {slot}: {occ} targets ({})", map.targets_in_slot(slot).join(", "));
    }
    Ok(())
}
