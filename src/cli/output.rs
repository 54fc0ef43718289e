//! Output helpers honoring the global `--json`/`--quiet` flags.
//!
//! The flags are surfaced through `LOOKOUT_*` environment variables by
//! `main` so every module can check them without plumbing.

pub fn is_json() -> bool {
    std::env::var("LOOKOUT_JSON").is_ok()
}

pub fn is_quiet() -> bool {
    std::env::var("LOOKOUT_QUIET").is_ok()
}

pub fn print_json(value: &serde_json::Value) {
    println!("{value}");
}
