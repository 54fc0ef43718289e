//! Configuration — the target list and every tunable the scheduler and
//! capture layer consume.
//!
//! Loaded once per scheduling cycle from a JSON file and treated as
//! read-only afterwards. Validation failures are fatal: no partial run
//! is attempted on a broken config.

use crate::aggregate::WorkItem;
use crate::capture::netlog::DetectionKeywords;
use crate::renderer::ContextOptions;
use crate::schedule::SlotMap;
use crate::timing::TimingBounds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("config invalid: {0}")]
    Invalid(String),
}

/// One observable page of a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub label: String,
    pub url: String,
}

/// A monitored entity with a scheduling weight and its pages/variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    /// Percentage of scheduling capacity, non-negative.
    pub weight: f64,
    pub pages: Vec<Page>,
    /// Observation variants; an empty list means one default variant.
    #[serde(default)]
    pub variants: Vec<ContextOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Discrete scheduling units per day.
    #[serde(default = "default_total_slots")]
    pub total_slots: usize,
    /// Total time budget of one iteration, in minutes.
    #[serde(default = "default_target_minutes")]
    pub target_minutes: u64,
    /// Reserved elasticity window; surfaced but not consumed.
    #[serde(default)]
    pub flex_minutes: u64,
    /// Runs per page when the per-page budget is generous.
    #[serde(default = "default_base_runs")]
    pub base_runs_per_page: u32,
    /// Pause between repeated runs of the same page.
    #[serde(default = "default_run_pause_ms")]
    pub run_pause_ms: u64,
    #[serde(default)]
    pub bounds: TimingBounds,
    #[serde(default)]
    pub detection: DetectionKeywords,
    pub targets: Vec<Target>,
}

fn default_total_slots() -> usize {
    6
}
fn default_target_minutes() -> u64 {
    60
}
fn default_base_runs() -> u32 {
    3
}
fn default_run_pause_ms() -> u64 {
    2_000
}

impl Config {
    /// Load and validate a config file. `path` falls back to
    /// `~/.lookout/config.json`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".lookout")
            .join("config.json")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_slots < 1 {
            return Err(ConfigError::Invalid("total_slots must be >= 1".into()));
        }
        if self.target_minutes < 1 {
            return Err(ConfigError::Invalid("target_minutes must be >= 1".into()));
        }
        for (name, bounds) in [
            ("navigation", self.bounds.navigation),
            ("settle", self.bounds.settle),
            ("margin", self.bounds.margin),
        ] {
            if bounds.min_ms > bounds.max_ms {
                return Err(ConfigError::Invalid(format!(
                    "{name} bounds have min {} > max {}",
                    bounds.min_ms, bounds.max_ms
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        let mut weight_sum = 0.0;
        for target in &self.targets {
            if target.name.is_empty() {
                return Err(ConfigError::Invalid("target with empty name".into()));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate target name: {}",
                    target.name
                )));
            }
            if target.weight < 0.0 || !target.weight.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "target {} has invalid weight {}",
                    target.name, target.weight
                )));
            }
            weight_sum += target.weight;
            if target.pages.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "target {} has no pages",
                    target.name
                )));
            }
            for page in &target.pages {
                if page.url.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "target {} page {} has empty url",
                        target.name, page.label
                    )));
                }
            }
        }
        if weight_sum > 100.0 + 1e-9 {
            return Err(ConfigError::Invalid(format!(
                "target weights sum to {weight_sum}; must not exceed 100"
            )));
        }
        Ok(())
    }

    /// Weight pairs for the slot allocator.
    pub fn target_weights(&self) -> Vec<(&str, f64)> {
        self.targets
            .iter()
            .map(|t| (t.name.as_str(), t.weight))
            .collect()
    }

    /// Build the (target, page, variant) work list for one slot, with an
    /// optional variant-name filter.
    pub fn select_work(
        &self,
        map: &SlotMap,
        slot: usize,
        variant_filter: Option<&str>,
    ) -> Vec<WorkItem> {
        let active = map.targets_in_slot(slot);
        let default_variant = [ContextOptions {
            name: "default".to_string(),
            ..Default::default()
        }];

        let mut items = Vec::new();
        for target in &self.targets {
            if !active.contains(&target.name.as_str()) {
                continue;
            }
            let variants: &[ContextOptions] = if target.variants.is_empty() {
                &default_variant
            } else {
                &target.variants
            };
            for page in &target.pages {
                for variant in variants {
                    if let Some(filter) = variant_filter {
                        if variant.name != filter {
                            continue;
                        }
                    }
                    items.push(WorkItem {
                        target: target.name.clone(),
                        page_label: page.label.clone(),
                        url: page.url.clone(),
                        variant: variant.clone(),
                    });
                }
            }
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::allocator;

    fn sample_json() -> String {
        r#"{
            "total_slots": 4,
            "target_minutes": 30,
            "targets": [
                {
                    "name": "pub-a",
                    "weight": 60.0,
                    "pages": [
                        {"label": "home", "url": "https://a.example/"},
                        {"label": "article", "url": "https://a.example/news"}
                    ],
                    "variants": [
                        {"name": "us-east", "accept_language": "en-US"},
                        {"name": "eu-west", "accept_language": "de-DE"}
                    ]
                },
                {
                    "name": "pub-b",
                    "weight": 40.0,
                    "pages": [{"label": "home", "url": "https://b.example/"}]
                }
            ]
        }"#
        .to_string()
    }

    fn load_str(text: &str) -> Config {
        let config: Config = serde_json::from_str(text).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = load_str(&sample_json());
        assert_eq!(config.total_slots, 4);
        assert_eq!(config.target_minutes, 30);
        assert_eq!(config.flex_minutes, 0);
        assert_eq!(config.base_runs_per_page, 3);
        assert_eq!(config.bounds.navigation.min_ms, 5_000);
        assert!(!config.detection.bidding.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, sample_json()).unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.targets.len(), 2);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = Config::load(Some(Path::new("/nonexistent/config.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_rejects_zero_slots() {
        let text = sample_json().replace("\"total_slots\": 4", "\"total_slots\": 0");
        let config: Config = serde_json::from_str(&text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_target_names() {
        let text = sample_json().replace("pub-b", "pub-a");
        let config: Config = serde_json::from_str(&text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversubscribed_weights() {
        let text = sample_json().replace("60.0", "90.0");
        let config: Config = serde_json::from_str(&text).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceed 100"));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let mut config = load_str(&sample_json());
        config.bounds.navigation.min_ms = 90_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_select_work_expands_pages_and_variants() {
        let config = load_str(&sample_json());
        let map = allocator::allocate(&config.target_weights(), config.total_slots);

        // pub-a holds at least one slot at 60% weight.
        let slot = map.assignments["pub-a"][0];
        let items = config.select_work(&map, slot, None);
        let pub_a: Vec<_> = items.iter().filter(|i| i.target == "pub-a").collect();
        // 2 pages x 2 variants
        assert_eq!(pub_a.len(), 4);
    }

    #[test]
    fn test_select_work_variant_filter() {
        let config = load_str(&sample_json());
        let map = allocator::allocate(&config.target_weights(), config.total_slots);
        let slot = map.assignments["pub-a"][0];
        let items = config.select_work(&map, slot, Some("eu-west"));
        assert!(!items.is_empty());
        assert!(items.iter().all(|i| i.variant.name == "eu-west"));
    }

    #[test]
    fn test_select_work_default_variant() {
        let config = load_str(&sample_json());
        let map = allocator::allocate(&config.target_weights(), config.total_slots);
        if let Some(&slot) = config
            .targets
            .iter()
            .find(|t| t.name == "pub-b")
            .and_then(|_| map.assignments["pub-b"].first())
        {
            let items = config.select_work(&map, slot, None);
            let pub_b: Vec<_> = items.iter().filter(|i| i.target == "pub-b").collect();
            assert_eq!(pub_b.len(), 1);
            assert_eq!(pub_b[0].variant.name, "default");
        }
    }
}
