//! Watchdog-bounded capture sessions and their event records.

pub mod netlog;
pub mod session;
pub mod watchdog;

pub use netlog::{DetectionFlags, DetectionKeywords, NetworkEvent};
pub use session::{RunOutcome, RunSummary, SessionController, SessionSpec};
