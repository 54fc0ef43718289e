//! CLI subcommand implementations for the Lookout binary.

pub mod doctor;
pub mod output;
pub mod plan_cmd;
pub mod run_cmd;
pub mod slots_cmd;
