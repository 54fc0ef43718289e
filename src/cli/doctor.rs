//! Environment readiness check.

use crate::config::Config;
use crate::renderer::chromium::find_chromium;
use crate::report::JsonlSink;
use anyhow::Result;
use std::path::Path;

/// Check Chromium availability, config validity, and sink writability.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    println!("Lookout Doctor");
    println!("==============");
    println!();

    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    println!("OS:   {os}");
    println!("Arch: {arch}");
    println!();

    // Check Chromium
    let chromium_path = find_chromium();
    match &chromium_path {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!("[!!] Chromium NOT found. Set LOOKOUT_CHROMIUM_PATH or install google-chrome."),
    }

    // Check config
    let config_ok = match Config::load(config_path) {
        Ok(config) => {
            println!(
                "[OK] Config valid: {} targets, {} slots, {} min budget",
                config.targets.len(),
                config.total_slots,
                config.target_minutes
            );
            true
        }
        Err(e) => {
            println!("[!!] Config problem: {e}");
            false
        }
    };

    // Check sink
    let sink_ok = match JsonlSink::default_sink() {
        Ok(_) => {
            println!("[OK] Results sink is writable");
            true
        }
        Err(e) => {
            println!("[!!] Results sink not writable: {e}");
            false
        }
    };

    println!();
    if chromium_path.is_some() && config_ok && sink_ok {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }

    Ok(())
}
