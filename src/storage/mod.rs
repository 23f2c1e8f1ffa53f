//! Persistence layer.
//!
//! Saves and loads monitor state to/from a JSON file: the learned strategy
//! statistics, the pending signal book, recently settled signals and the
//! cycle counter. Tick buffers are not persisted; they rebuild from the feed
//! within a few cycles.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::calibration::StrategyStats;
use crate::types::Signal;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "pitchwatch_state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_path: String,
    /// Persist after every cycle, not only at shutdown.
    pub save_every_cycle: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: DEFAULT_STATE_FILE.to_string(),
            save_every_cycle: true,
        }
    }
}

/// Everything the monitor needs to resume after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorState {
    pub cycle_count: u64,
    #[serde(default)]
    pub strategy_stats: BTreeMap<String, StrategyStats>,
    #[serde(default)]
    pub pending: Vec<Signal>,
    #[serde(default)]
    pub settled: Vec<Signal>,
    pub saved_at: DateTime<Utc>,
}

/// Save monitor state to a JSON file.
pub fn save_state(state: &MonitorState, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state).context("Failed to serialise monitor state")?;

    std::fs::write(path, &json).with_context(|| format!("Failed to write state to {path}"))?;

    debug!(path, cycles = state.cycle_count, pending = state.pending.len(), "State saved");
    Ok(())
}

/// Load monitor state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state(path: Option<&str>) -> Result<Option<MonitorState>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read state from {path}"))?;

    let state: MonitorState =
        serde_json::from_str(&json).with_context(|| format!("Failed to parse state from {path}"))?;

    info!(
        path,
        cycle_count = state.cycle_count,
        pending = state.pending.len(),
        strategies = state.strategy_stats.len(),
        "State loaded from disk"
    );

    Ok(Some(state))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).with_context(|| format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::ConfidenceAdjuster;
    use crate::resolver::OutcomeResolver;
    use crate::types::{GoalLine, HistoricalSignal, MatchState, Score, SignalDraft, SignalResult, SignalType};

    fn temp_path() -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("pitchwatch_test_state_{}.json", uuid::Uuid::new_v4()));
        p.to_string_lossy().to_string()
    }

    fn make_signal() -> Signal {
        Signal::new(
            "match-9",
            SignalDraft {
                strategy_name: "over_2_5_goals".to_string(),
                signal_type: SignalType::Over(GoalLine::TwoAndHalf),
                prediction: "Over 2.5 goals".to_string(),
                confidence: 0.673,
                threshold_used: 2.8,
                reasoning: "8/10 conditions met".to_string(),
                trigger_metrics: [("combined_dxg".to_string(), 3.543)].into_iter().collect(),
                trigger_minute: 22,
                score_at_trigger: Score { home: 0, away: 0 },
                recommended_odds: 1.85,
                stake_multiplier: 1.0,
                stake: 1.0,
            },
            Utc::now(),
        )
    }

    fn make_state() -> MonitorState {
        let adjuster = ConfidenceAdjuster::default();
        let history: Vec<HistoricalSignal> = (0..30)
            .map(|i| HistoricalSignal {
                result: if i % 3 == 0 { SignalResult::Loss } else { SignalResult::Win },
                confidence: 0.7,
                trigger_minute: 20 + i,
                threshold_used: 2.8,
                trigger_metrics: BTreeMap::new(),
            })
            .collect();
        adjuster.recalibrate("over_2_5_goals", &history, Utc::now()).unwrap();

        let mut settled = make_signal();
        OutcomeResolver::default().resolve(&mut settled, Some(&MatchState::live(60, 2, 1)), Utc::now());

        MonitorState {
            cycle_count: 42,
            strategy_stats: adjuster.snapshot(),
            pending: vec![make_signal()],
            settled: vec![settled],
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path();
        save_state(&make_state(), Some(&path)).unwrap();

        let loaded = load_state(Some(&path)).unwrap();
        assert!(loaded.is_some());
        let loaded = loaded.unwrap();
        assert_eq!(loaded.cycle_count, 42);

        delete_state(Some(&path)).unwrap();
    }

    #[test]
    fn test_load_nonexistent() {
        let path = "/tmp/pitchwatch_nonexistent_state_12345.json";
        let loaded = load_state(Some(path)).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_preserves_signals_and_stats() {
        let path = temp_path();
        let state = make_state();
        save_state(&state, Some(&path)).unwrap();
        let loaded = load_state(Some(&path)).unwrap().unwrap();

        let pending = &loaded.pending[0];
        assert_eq!(pending.id, state.pending[0].id);
        assert_eq!(pending.recommended_odds(), 1.85);
        assert_eq!(pending.confidence(), 0.673);
        assert!(pending.is_pending());
        assert_eq!(pending.trigger_metrics.get("combined_dxg"), Some(&3.543));

        let settled = &loaded.settled[0];
        assert_eq!(settled.result(), SignalResult::Win);
        assert_eq!(settled.profit_loss(), 0.85);
        assert!(settled.resolved_at().is_some());

        assert_eq!(loaded.strategy_stats, state.strategy_stats);

        delete_state(Some(&path)).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let path = temp_path();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_state(Some(&path)).is_err());
        delete_state(Some(&path)).unwrap();
    }

    #[test]
    fn test_delete_state() {
        let path = temp_path();
        save_state(&make_state(), Some(&path)).unwrap();
        assert!(Path::new(&path).exists());

        delete_state(Some(&path)).unwrap();
        assert!(!Path::new(&path).exists());
    }

    #[test]
    fn test_delete_nonexistent_ok() {
        let result = delete_state(Some("/tmp/pitchwatch_does_not_exist_xyz.json"));
        assert!(result.is_ok());
    }
}
