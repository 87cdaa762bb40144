// src/config.rs
//! Engine configuration: clustering window and thresholds, metric periods,
//! worker-pool bound. Resolved from a TOML or JSON file with env overrides;
//! every knob is also overridable per invocation by constructing the struct
//! directly.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::Period;

const ENV_PATH: &str = "NARRATIVE_CONFIG_PATH";

/// Recognized options. Defaults match the discovery-oriented tuning:
/// wide window, single shared entity, pairs qualify.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Recency range in hours for clustering eligibility.
    pub window_hours: u64,
    /// Minimum shared entities for an edge between two items.
    pub min_shared_entities: usize,
    /// Minimum component size for a new narrative.
    pub min_cluster_size: usize,
    /// Snapshot windows computed on every run.
    pub periods: Vec<Period>,
    /// Upper bound on concurrent per-cluster / per-narrative tasks.
    pub max_parallel: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_hours: 48,
            min_shared_entities: 1,
            min_cluster_size: 2,
            periods: vec!["1h".parse().unwrap(), "24h".parse().unwrap()],
            max_parallel: 4,
        }
    }
}

impl EngineConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.window_hours as i64)
    }

    /// Load config from an explicit path. Supports TOML or JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve config using env var + fallbacks, then apply per-field env
    /// overrides:
    /// 1) $NARRATIVE_CONFIG_PATH
    /// 2) config/narratives.toml
    /// 3) config/narratives.json
    /// 4) compiled defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("NARRATIVE_CONFIG_PATH points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let toml_p = PathBuf::from("config/narratives.toml");
            let json_p = PathBuf::from("config/narratives.json");
            if toml_p.exists() {
                Self::load_from(&toml_p)?
            } else if json_p.exists() {
                Self::load_from(&json_p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<u64>("NARRATIVE_WINDOW_HOURS")? {
            self.window_hours = v;
        }
        if let Some(v) = env_parse::<usize>("NARRATIVE_MIN_SHARED")? {
            self.min_shared_entities = v;
        }
        if let Some(v) = env_parse::<usize>("NARRATIVE_MIN_CLUSTER")? {
            self.min_cluster_size = v;
        }
        if let Some(v) = env_parse::<usize>("NARRATIVE_MAX_PARALLEL")? {
            self.max_parallel = v;
        }
        if let Ok(raw) = std::env::var("NARRATIVE_PERIODS") {
            let mut periods = Vec::new();
            for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                periods.push(part.parse().context("NARRATIVE_PERIODS")?);
            }
            if !periods.is_empty() {
                self.periods = periods;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.window_hours == 0 {
            return Err(anyhow!("window_hours must be positive"));
        }
        if self.min_shared_entities == 0 {
            return Err(anyhow!("min_shared_entities must be positive"));
        }
        if self.min_cluster_size < 2 {
            return Err(anyhow!("min_cluster_size must be at least 2"));
        }
        if self.periods.is_empty() {
            return Err(anyhow!("at least one metric period is required"));
        }
        if self.max_parallel == 0 {
            return Err(anyhow!("max_parallel must be positive"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{key} has invalid value '{raw}'")),
        Err(_) => Ok(None),
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<EngineConfig> {
    // Try TOML first if hinted or content looks like toml.
    let try_toml = hint_ext == "toml" || s.contains('=');
    if try_toml {
        if let Ok(v) = toml::from_str(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = serde_json::from_str(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = toml::from_str(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported engine config format"))
}
