// Copyright 2026 Lookout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Result sink — append-only JSONL records of everything an iteration
//! produced.
//!
//! Features:
//! - Append-only JSONL format for easy parsing
//! - Automatic rotation when the file exceeds `MAX_LOG_SIZE` (100MB)
//! - Rotated files named `.1`, `.2`, etc. (max 5 rotations)
//!
//! The sink receives the cycle's slot map once (auditability), then per
//! iteration the timing plan and the flat page/run records. Downstream
//! serialization to spreadsheets or dashboards is someone else's job.

use crate::aggregate::{IterationResult, PageAggregate};
use crate::capture::session::RunSummary;
use crate::schedule::SlotMap;
use crate::timing::TimingPlan;
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Maximum results file size before rotation (100 MB).
const MAX_LOG_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum number of rotated files to keep.
const MAX_ROTATIONS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to open results file {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write results record: {0}")]
    Write(#[from] std::io::Error),
    #[error("failed to encode results record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One line in the results file.
#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum SinkRecord<'a> {
    SlotMap {
        timestamp: String,
        map: &'a SlotMap,
    },
    Iteration {
        timestamp: String,
        slot: usize,
        plan: &'a TimingPlan,
        pages: usize,
        elapsed_ms: u64,
    },
    Page {
        timestamp: String,
        #[serde(flatten)]
        aggregate: FlatAggregate<'a>,
    },
    Run {
        timestamp: String,
        #[serde(flatten)]
        summary: &'a RunSummary,
    },
}

/// Page aggregate without its nested run summaries; those get their own
/// lines so every record stays flat.
#[derive(Serialize)]
struct FlatAggregate<'a> {
    target: &'a str,
    page_label: &'a str,
    url: &'a str,
    variant: &'a str,
    runs: u32,
    mean_total_events: f64,
    mean_matched_events: f64,
    bidding: bool,
    ad_serving: bool,
}

impl<'a> From<&'a PageAggregate> for FlatAggregate<'a> {
    fn from(agg: &'a PageAggregate) -> Self {
        Self {
            target: &agg.target,
            page_label: &agg.page_label,
            url: &agg.url,
            variant: &agg.variant,
            runs: agg.runs,
            mean_total_events: agg.mean_total_events,
            mean_matched_events: agg.mean_matched_events,
            bidding: agg.flags.bidding,
            ad_serving: agg.flags.ad_serving,
        }
    }
}

/// Receives the structurally simple output of the core.
pub trait ResultSink {
    /// Persist the cycle's slot map, once per scheduling cycle.
    fn record_slot_map(&mut self, map: &SlotMap) -> Result<(), SinkError>;
    /// Persist one iteration: its plan, then page and run records.
    fn record_iteration(&mut self, result: &IterationResult) -> Result<(), SinkError>;
}

/// Append-only JSONL sink with automatic rotation.
pub struct JsonlSink {
    file: File,
    path: PathBuf,
    /// Approximate current size (may drift slightly; re-checked on rotation).
    current_size: u64,
}

impl JsonlSink {
    /// Open or create the results file.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SinkError::Open {
                path: path.display().to_string(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SinkError::Open {
                path: path.display().to_string(),
                source,
            })?;

        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            current_size,
        })
    }

    /// Open the default sink at ~/.lookout/results.jsonl.
    pub fn default_sink() -> Result<Self, SinkError> {
        let path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".lookout")
            .join("results.jsonl");
        Self::open(&path)
    }

    fn write_record(&mut self, record: &SinkRecord<'_>) -> Result<(), SinkError> {
        if self.current_size >= MAX_LOG_SIZE {
            self.rotate()?;
        }
        let json = serde_json::to_string(record)?;
        writeln!(self.file, "{json}")?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// Rotate: results.jsonl → results.jsonl.1, .1 → .2, etc.
    fn rotate(&mut self) -> Result<(), SinkError> {
        self.file.flush()?;

        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            let to = rotation_path(&self.path, i + 1);
            if from.exists() {
                let _ = std::fs::rename(&from, &to);
            }
        }

        let first_rotation = rotation_path(&self.path, 1);
        let _ = std::fs::rename(&self.path, &first_rotation);

        let oldest = rotation_path(&self.path, MAX_ROTATIONS);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| SinkError::Open {
                path: self.path.display().to_string(),
                source,
            })?;
        self.current_size = 0;

        Ok(())
    }
}

impl ResultSink for JsonlSink {
    fn record_slot_map(&mut self, map: &SlotMap) -> Result<(), SinkError> {
        self.write_record(&SinkRecord::SlotMap {
            timestamp: Utc::now().to_rfc3339(),
            map,
        })
    }

    fn record_iteration(&mut self, result: &IterationResult) -> Result<(), SinkError> {
        self.write_record(&SinkRecord::Iteration {
            timestamp: Utc::now().to_rfc3339(),
            slot: result.slot,
            plan: &result.plan,
            pages: result.pages.len(),
            elapsed_ms: result.elapsed_ms,
        })?;

        for page in &result.pages {
            self.write_record(&SinkRecord::Page {
                timestamp: Utc::now().to_rfc3339(),
                aggregate: page.into(),
            })?;
            for run in &page.summaries {
                self.write_record(&SinkRecord::Run {
                    timestamp: Utc::now().to_rfc3339(),
                    summary: run,
                })?;
            }
        }
        Ok(())
    }
}

/// Build path for a rotated file: `results.jsonl.1`, `results.jsonl.2`, etc.
fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("results.jsonl")
    );
    base.with_file_name(name)
}
