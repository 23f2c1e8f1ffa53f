//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section and field has a default, so a partial (or empty) file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::calibration::{AdjusterConfig, ConfidenceAdjuster};
use crate::engine::monitor::Pipeline;
use crate::engine::MonitorConfig;
use crate::history::HistoryConfig;
use crate::metrics::{MetricsConfig, MetricsEngine};
use crate::resolver::{OutcomeResolver, ResolverConfig};
use crate::storage::StorageConfig;
use crate::strategy::{SignalConfig, SignalEngine};
use crate::tracker::{TickTracker, TrackerConfig};
use crate::types::PipelineError;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub metrics: MetricsConfig,
    pub tracker: TrackerConfig,
    pub signals: SignalConfig,
    pub adjuster: AdjusterConfig,
    pub resolver: ResolverConfig,
    pub history: HistoryConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "pitchwatch=info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a component misbehave.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(PipelineError::Config(format!("{name} must be within 0–1, got {v}")))
            }
        };
        unit("signals.confidence_floor", self.signals.confidence_floor)?;
        unit("monitor.min_emit_confidence", self.monitor.min_emit_confidence)?;
        unit("adjuster.min_confidence", self.adjuster.min_confidence)?;
        unit("adjuster.max_confidence", self.adjuster.max_confidence)?;

        if self.adjuster.min_confidence > self.adjuster.max_confidence {
            return Err(PipelineError::Config(
                "adjuster.min_confidence exceeds adjuster.max_confidence".to_string(),
            ));
        }
        if self.monitor.min_analysis_minute > self.monitor.max_analysis_minute {
            return Err(PipelineError::Config(
                "monitor.min_analysis_minute exceeds monitor.max_analysis_minute".to_string(),
            ));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(PipelineError::Config("monitor.poll_interval_secs must be positive".to_string()));
        }
        if self.monitor.max_concurrent_matches == 0 {
            return Err(PipelineError::Config("monitor.max_concurrent_matches must be positive".to_string()));
        }
        if self.tracker.window == 0 {
            return Err(PipelineError::Config("tracker.window must be positive".to_string()));
        }
        if self.tracker.tick_interval_secs < 0 {
            return Err(PipelineError::Config("tracker.tick_interval_secs must not be negative".to_string()));
        }
        if self.tracker.tick_tolerance_ms < 0 {
            return Err(PipelineError::Config("tracker.tick_tolerance_ms must not be negative".to_string()));
        }
        if !(0.0..=1.0).contains(&self.history.head_to_head_weight) {
            return Err(PipelineError::Config("history.head_to_head_weight must be within [0, 1]".to_string()));
        }
        if self.history.min_probability > self.history.max_probability {
            return Err(PipelineError::Config(
                "history.min_probability must not exceed history.max_probability".to_string(),
            ));
        }
        if self.resolver.staleness_hours <= 0 {
            return Err(PipelineError::Config("resolver.staleness_hours must be positive".to_string()));
        }
        if self.signals.base_stake < 0.0 {
            return Err(PipelineError::Config("signals.base_stake must not be negative".to_string()));
        }
        if let Some((name, odds)) = self.signals.odds.iter().find(|(_, o)| **o <= 1.0) {
            return Err(PipelineError::Config(format!("signals.odds.{name} must exceed 1.0, got {odds}")));
        }
        Ok(())
    }

    /// Build every pipeline component from its section.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline {
            metrics: MetricsEngine::new(self.metrics.clone()),
            tracker: TickTracker::new(self.tracker.clone()),
            signals: SignalEngine::new(self.signals.clone()),
            adjuster: ConfidenceAdjuster::new(self.adjuster.clone()),
            resolver: OutcomeResolver::new(self.resolver.clone()),
        }
    }
}
