//! Confidence adjuster.
//!
//! Keeps per-strategy statistics learned from resolved signals and uses them
//! to scale fresh confidences: up when a signal is at least as confident as
//! the strategy's historical winners, down when it looks like its losers,
//! and by whether the trigger minute falls inside the window where the
//! strategy has historically won.
//!
//! Statistics change only through [`ConfidenceAdjuster::recalibrate`], an
//! offline batch pass. The table is read-mostly: `adjust` takes a read lock,
//! recalibration computes everything up front and takes the write lock only
//! to swap the entry in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::metrics::stats::{mean, nearest_rank, round_dp};
use crate::types::{HistoricalSignal, PipelineError, SignalResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjusterConfig {
    /// Resolved signals required before a strategy is recalibrated.
    pub min_samples: usize,
    pub min_confidence: f64,
    pub max_confidence: f64,
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        Self {
            min_samples: 30,
            min_confidence: 0.1,
            max_confidence: 0.95,
        }
    }
}

const WIN_MULTIPLIER: f64 = 1.1;
const LOSS_MULTIPLIER: f64 = 0.9;
const IN_WINDOW_MULTIPLIER: f64 = 1.05;
const OUT_OF_WINDOW_MULTIPLIER: f64 = 0.95;

/// Minutes used when no productive window has been learned.
const DEFAULT_WINDOW: (u32, u32) = (30, 70);
const DEFAULT_EARLY: u32 = 20;
const DEFAULT_LATE: u32 = 80;

/// Learned windows never extend outside these minutes.
const WINDOW_BOUNDS: (u32, u32) = (15, 80);
const WINDOW_MARGIN: u32 = 5;

const TRIGGER_FLOOR_QUANTILE: f64 = 0.25;
const PROPOSAL_CONFIDENCE_FLOOR: f64 = 0.6;
const PROPOSAL_CONFIDENCE_MARGIN: f64 = 0.05;

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Suggested tightening of a strategy's thresholds, derived from its winners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdProposal {
    /// max(0.6, average winning confidence − 0.05).
    pub min_confidence: f64,
    /// 25th percentile of each trigger metric among winners.
    pub trigger_floors: BTreeMap<String, f64>,
    pub productive_window: Option<(u32, u32)>,
}

/// Aggregate record for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub strategy: String,
    /// Resolved signals the stats were computed from (pushes included).
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub pushes: usize,
    /// wins / (wins + losses).
    pub win_rate: f64,
    pub avg_win_confidence: Option<f64>,
    pub avg_loss_confidence: Option<f64>,
    pub productive_window: Option<(u32, u32)>,
    /// Brier score of confidence against win/loss outcome. Lower is better.
    pub brier_score: f64,
    pub proposal: Option<ThresholdProposal>,
    pub last_calibrated: DateTime<Utc>,
}

impl StrategyStats {
    /// Build stats from resolved history. Pending records are ignored.
    pub fn from_history(strategy: &str, history: &[HistoricalSignal], at: DateTime<Utc>) -> Self {
        let resolved: Vec<&HistoricalSignal> = history.iter().filter(|h| h.result.is_terminal()).collect();
        let wins: Vec<&HistoricalSignal> = resolved
            .iter()
            .copied()
            .filter(|h| h.result == SignalResult::Win)
            .collect();
        let losses: Vec<&HistoricalSignal> = resolved
            .iter()
            .copied()
            .filter(|h| h.result == SignalResult::Loss)
            .collect();
        let pushes = resolved.len() - wins.len() - losses.len();

        let decided = wins.len() + losses.len();
        let win_rate = if decided == 0 {
            0.0
        } else {
            round_dp(wins.len() as f64 / decided as f64, 3)
        };

        let avg_win_confidence = average_confidence(&wins);
        let avg_loss_confidence = average_confidence(&losses);
        let productive_window = learn_window(&wins);

        let proposal = avg_win_confidence.map(|avg| ThresholdProposal {
            min_confidence: round_dp((avg - PROPOSAL_CONFIDENCE_MARGIN).max(PROPOSAL_CONFIDENCE_FLOOR), 3),
            trigger_floors: trigger_floors(&wins),
            productive_window,
        });

        Self {
            strategy: strategy.to_string(),
            total: resolved.len(),
            wins: wins.len(),
            losses: losses.len(),
            pushes,
            win_rate,
            avg_win_confidence,
            avg_loss_confidence,
            productive_window,
            brier_score: brier(&wins, &losses),
            proposal,
            last_calibrated: at,
        }
    }

    /// Multiplier from where `raw` sits against the historical averages.
    fn confidence_multiplier(&self, raw: f64) -> (f64, String) {
        if let Some(win) = self.avg_win_confidence {
            if raw >= win {
                return (WIN_MULTIPLIER, format!("≥ avg win {win:.2}"));
            }
        }
        if let Some(loss) = self.avg_loss_confidence {
            if raw <= loss {
                return (LOSS_MULTIPLIER, format!("≤ avg loss {loss:.2}"));
            }
        }
        (1.0, "between historical averages".to_string())
    }

    fn time_multiplier(&self, minute: u32) -> (f64, String) {
        match self.productive_window {
            Some((from, to)) if (from..=to).contains(&minute) => {
                (IN_WINDOW_MULTIPLIER, format!("inside {from}–{to}'"))
            }
            Some((from, to)) => (OUT_OF_WINDOW_MULTIPLIER, format!("outside {from}–{to}'")),
            None => {
                let (from, to) = DEFAULT_WINDOW;
                if (from..=to).contains(&minute) {
                    (IN_WINDOW_MULTIPLIER, format!("inside default {from}–{to}'"))
                } else if minute < DEFAULT_EARLY || minute > DEFAULT_LATE {
                    (OUT_OF_WINDOW_MULTIPLIER, "early/late default band".to_string())
                } else {
                    (1.0, "neutral default band".to_string())
                }
            }
        }
    }
}

fn average_confidence(signals: &[&HistoricalSignal]) -> Option<f64> {
    if signals.is_empty() {
        return None;
    }
    let values: Vec<f64> = signals.iter().map(|s| s.confidence).collect();
    Some(round_dp(mean(&values), 3))
}

/// [max(15, earliest win + 5), min(80, latest win − 5)], or `None` when that
/// interval is empty.
fn learn_window(wins: &[&HistoricalSignal]) -> Option<(u32, u32)> {
    let earliest = wins.iter().map(|w| w.trigger_minute).min()?;
    let latest = wins.iter().map(|w| w.trigger_minute).max()?;
    let from = WINDOW_BOUNDS.0.max(earliest + WINDOW_MARGIN);
    let to = WINDOW_BOUNDS.1.min(latest.saturating_sub(WINDOW_MARGIN));
    (from <= to).then_some((from, to))
}

fn trigger_floors(wins: &[&HistoricalSignal]) -> BTreeMap<String, f64> {
    let mut by_metric: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for w in wins {
        for (name, value) in &w.trigger_metrics {
            if name == "minute" {
                continue;
            }
            by_metric.entry(name.as_str()).or_default().push(*value);
        }
    }
    by_metric
        .into_iter()
        .filter_map(|(name, values)| {
            nearest_rank(&values, TRIGGER_FLOOR_QUANTILE).map(|v| (name.to_string(), round_dp(v, 3)))
        })
        .collect()
}

/// Brier = (1/N) × Σ(confidence − outcome)² over wins and losses.
fn brier(wins: &[&HistoricalSignal], losses: &[&HistoricalSignal]) -> f64 {
    let n = wins.len() + losses.len();
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = wins
        .iter()
        .map(|w| (w.confidence - 1.0).powi(2))
        .chain(losses.iter().map(|l| l.confidence.powi(2)))
        .sum();
    round_dp(sum / n as f64, 4)
}

/// Outcome of one recalibration pass.
#[derive(Debug, Clone)]
pub struct RecalibrationReport {
    pub strategy: String,
    pub previous_win_rate: Option<f64>,
    pub stats: StrategyStats,
}

// ---------------------------------------------------------------------------
// Adjuster
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ConfidenceAdjuster {
    config: AdjusterConfig,
    stats: RwLock<HashMap<String, StrategyStats>>,
}

impl ConfidenceAdjuster {
    pub fn new(config: AdjusterConfig) -> Self {
        Self {
            config,
            stats: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AdjusterConfig {
        &self.config
    }

    /// Scale a raw confidence by the strategy's history.
    ///
    /// Returns the input unchanged when the strategy has no statistics.
    /// Otherwise raw × confidence multiplier × time multiplier, clamped to
    /// the configured bounds. Trigger metrics below a learned floor are
    /// reported in the explanation but do not change the number.
    pub fn adjust(
        &self,
        strategy: &str,
        trigger_metrics: &BTreeMap<String, f64>,
        raw_confidence: f64,
        minute: u32,
        threshold: f64,
    ) -> (f64, String) {
        let table = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        let Some(stats) = table.get(strategy) else {
            debug!(strategy, threshold, "No statistics, confidence left as is");
            return (raw_confidence, "No historical data available".to_string());
        };

        let (conf_mult, conf_note) = stats.confidence_multiplier(raw_confidence);
        let (time_mult, time_note) = stats.time_multiplier(minute);
        let adjusted = round_dp(
            (raw_confidence * conf_mult * time_mult).clamp(self.config.min_confidence, self.config.max_confidence),
            3,
        );

        let mut explanation = format!(
            "Historical adjustment ({} samples, win rate {:.0}%): confidence ×{conf_mult:.2} ({conf_note}), time ×{time_mult:.2} ({time_note}) → {adjusted:.3}",
            stats.total,
            stats.win_rate * 100.0,
        );

        if let Some(proposal) = &stats.proposal {
            let below: Vec<&str> = proposal
                .trigger_floors
                .iter()
                .filter(|(name, floor)| trigger_metrics.get(*name).is_some_and(|v| *v < **floor))
                .map(|(name, _)| name.as_str())
                .collect();
            if !below.is_empty() {
                explanation.push_str(&format!("; below winning floor: {}", below.join(", ")));
            }
            if raw_confidence < proposal.min_confidence {
                explanation.push_str(&format!("; under proposed minimum {:.2}", proposal.min_confidence));
            }
        }

        debug!(
            strategy,
            raw = format!("{raw_confidence:.3}"),
            adjusted = format!("{adjusted:.3}"),
            minute,
            threshold,
            "Confidence adjusted"
        );
        (adjusted, explanation)
    }

    /// Recompute one strategy's statistics from its resolved history.
    ///
    /// Refuses with [`PipelineError::InsufficientSamples`] when fewer than
    /// `min_samples` resolved (non-pending) records are supplied. The write
    /// lock is held only for the final swap.
    pub fn recalibrate(
        &self,
        strategy: &str,
        history: &[HistoricalSignal],
        at: DateTime<Utc>,
    ) -> Result<RecalibrationReport, PipelineError> {
        let available = history.iter().filter(|h| h.result.is_terminal()).count();
        if available < self.config.min_samples {
            warn!(
                strategy,
                needed = self.config.min_samples,
                available,
                "Not enough resolved signals to recalibrate"
            );
            return Err(PipelineError::InsufficientSamples {
                strategy: strategy.to_string(),
                needed: self.config.min_samples,
                available,
            });
        }

        let stats = StrategyStats::from_history(strategy, history, at);

        let previous_win_rate = {
            let mut table = self.stats.write().unwrap_or_else(PoisonError::into_inner);
            table
                .insert(strategy.to_string(), stats.clone())
                .map(|old| old.win_rate)
        };

        info!(
            strategy,
            samples = stats.total,
            win_rate = format!("{:.1}%", stats.win_rate * 100.0),
            brier = format!("{:.3}", stats.brier_score),
            window = ?stats.productive_window,
            "Strategy recalibrated"
        );

        Ok(RecalibrationReport {
            strategy: strategy.to_string(),
            previous_win_rate,
            stats,
        })
    }

    pub fn stats(&self, strategy: &str) -> Option<StrategyStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(strategy)
            .cloned()
    }

    pub fn has_stats(&self, strategy: &str) -> bool {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(strategy)
    }

    /// Copy of the whole table, ordered by strategy name.
    pub fn snapshot(&self) -> BTreeMap<String, StrategyStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replace the whole table, e.g. from persisted state.
    pub fn restore(&self, snapshot: BTreeMap<String, StrategyStats>) {
        let mut table = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        *table = snapshot.into_iter().collect();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn make_record(result: SignalResult, confidence: f64, minute: u32) -> HistoricalSignal {
        let mut trigger_metrics = BTreeMap::new();
        trigger_metrics.insert("combined_dxg".to_string(), confidence * 4.0);
        trigger_metrics.insert("minute".to_string(), minute as f64);
        HistoricalSignal {
            result,
            confidence,
            trigger_minute: minute,
            threshold_used: 2.8,
            trigger_metrics,
        }
    }

    /// 20 wins at 0.75 between minutes 20 and 60, 10 losses at 0.62.
    fn make_history() -> Vec<HistoricalSignal> {
        let mut history = Vec::new();
        for i in 0..20 {
            history.push(make_record(SignalResult::Win, 0.75, 20 + i * 2));
        }
        for i in 0..10 {
            history.push(make_record(SignalResult::Loss, 0.62, 30 + i));
        }
        history
    }

    fn make_calibrated() -> ConfidenceAdjuster {
        let adjuster = ConfidenceAdjuster::default();
        adjuster.recalibrate("over_2_5_goals", &make_history(), Utc::now()).unwrap();
        adjuster
    }

    #[test]
    fn test_no_history_returns_raw_unchanged() {
        let adjuster = ConfidenceAdjuster::default();
        let (c, why) = adjuster.adjust("over_2_5_goals", &BTreeMap::new(), 0.6734, 22, 2.8);
        assert_eq!(c, 0.6734);
        assert_eq!(why, "No historical data available");
    }

    #[test]
    fn test_refuses_below_min_samples() {
        let adjuster = ConfidenceAdjuster::default();
        let mut history = make_history();
        history.truncate(29);
        history.push(make_record(SignalResult::Pending, 0.7, 40));

        let err = adjuster.recalibrate("over_2_5_goals", &history, Utc::now()).unwrap_err();
        match err {
            PipelineError::InsufficientSamples { needed, available, .. } => {
                assert_eq!(needed, 30);
                assert_eq!(available, 29);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!adjuster.has_stats("over_2_5_goals"));
    }

    #[test]
    fn test_stats_from_history() {
        let adjuster = make_calibrated();
        let stats = adjuster.stats("over_2_5_goals").unwrap();
        assert_eq!(stats.total, 30);
        assert_eq!(stats.wins, 20);
        assert_eq!(stats.losses, 10);
        assert!((stats.win_rate - 0.667).abs() < 1e-9);
        assert_eq!(stats.avg_win_confidence, Some(0.75));
        assert_eq!(stats.avg_loss_confidence, Some(0.62));
        // wins span 20..=58 → [25, 53]
        assert_eq!(stats.productive_window, Some((25, 53)));
    }

    #[test]
    fn test_brier_score() {
        let stats = StrategyStats::from_history(
            "s",
            &[
                make_record(SignalResult::Win, 0.8, 30),
                make_record(SignalResult::Loss, 0.8, 30),
            ],
            Utc::now(),
        );
        // ((0.2)² + (0.8)²) / 2 = 0.34
        assert!((stats.brier_score - 0.34).abs() < 1e-9);
    }

    #[test]
    fn test_strong_signal_inside_window_is_boosted() {
        let adjuster = make_calibrated();
        let (c, why) = adjuster.adjust("over_2_5_goals", &BTreeMap::new(), 0.76, 40, 2.8);
        // 0.76 × 1.1 × 1.05
        assert!((c - 0.878).abs() < 1e-9, "{c}");
        assert!(why.contains("×1.10"));
    }

    #[test]
    fn test_weak_signal_outside_window_is_cut() {
        let adjuster = make_calibrated();
        let (c, _) = adjuster.adjust("over_2_5_goals", &BTreeMap::new(), 0.6, 70, 2.8);
        // 0.6 × 0.9 × 0.95
        assert!((c - 0.513).abs() < 1e-9, "{c}");
    }

    #[test]
    fn test_adjusted_confidence_is_clamped() {
        let adjuster = make_calibrated();
        let (c, _) = adjuster.adjust("over_2_5_goals", &BTreeMap::new(), 0.94, 40, 2.8);
        assert_eq!(c, 0.95);
        let (c, _) = adjuster.adjust("over_2_5_goals", &BTreeMap::new(), 0.05, 40, 2.8);
        assert_eq!(c, 0.1);
    }

    #[test]
    fn test_default_bands_without_learned_window() {
        let stats = StrategyStats::from_history("s", &[make_record(SignalResult::Loss, 0.7, 50)], Utc::now());
        assert_eq!(stats.productive_window, None);
        assert_eq!(stats.time_multiplier(50).0, 1.05);
        assert_eq!(stats.time_multiplier(10).0, 0.95);
        assert_eq!(stats.time_multiplier(85).0, 0.95);
        assert_eq!(stats.time_multiplier(25).0, 1.0);
    }

    #[test]
    fn test_narrow_win_spread_learns_no_window() {
        let history = vec![
            make_record(SignalResult::Win, 0.7, 40),
            make_record(SignalResult::Win, 0.7, 44),
        ];
        let stats = StrategyStats::from_history("s", &history, Utc::now());
        // [45, 39] is empty
        assert_eq!(stats.productive_window, None);
    }

    #[test]
    fn test_zero_wins_stores_stats_without_proposal() {
        let adjuster = ConfidenceAdjuster::new(AdjusterConfig {
            min_samples: 3,
            ..AdjusterConfig::default()
        });
        let history: Vec<_> = (0..3).map(|i| make_record(SignalResult::Loss, 0.65, 30 + i)).collect();
        let report = adjuster.recalibrate("draw", &history, Utc::now()).unwrap();
        assert_eq!(report.stats.win_rate, 0.0);
        assert_eq!(report.stats.avg_win_confidence, None);
        assert!(report.stats.proposal.is_none());
        assert!(adjuster.has_stats("draw"));
    }

    #[test]
    fn test_threshold_proposal() {
        let adjuster = make_calibrated();
        let proposal = adjuster.stats("over_2_5_goals").unwrap().proposal.unwrap();
        assert!((proposal.min_confidence - 0.7).abs() < 1e-9);
        assert_eq!(proposal.trigger_floors.get("combined_dxg"), Some(&3.0));
        assert!(!proposal.trigger_floors.contains_key("minute"));
    }

    #[test]
    fn test_proposal_min_confidence_floor() {
        let history = vec![make_record(SignalResult::Win, 0.55, 30)];
        let stats = StrategyStats::from_history("s", &history, Utc::now());
        assert_eq!(stats.proposal.unwrap().min_confidence, 0.6);
    }

    #[test]
    fn test_explanation_flags_metrics_below_floor() {
        let adjuster = make_calibrated();
        let mut metrics = BTreeMap::new();
        metrics.insert("combined_dxg".to_string(), 2.9);
        let (_, why) = adjuster.adjust("over_2_5_goals", &metrics, 0.7, 40, 2.8);
        assert!(why.contains("below winning floor: combined_dxg"), "{why}");
    }

    #[test]
    fn test_recalibrate_reports_previous_win_rate() {
        let adjuster = make_calibrated();
        let report = adjuster.recalibrate("over_2_5_goals", &make_history(), Utc::now()).unwrap();
        assert_eq!(report.previous_win_rate, Some(0.667));
    }

    #[test]
    fn test_snapshot_restore() {
        let adjuster = make_calibrated();
        let snapshot = adjuster.snapshot();
        let fresh = ConfidenceAdjuster::default();
        fresh.restore(snapshot.clone());
        assert_eq!(fresh.snapshot(), snapshot);
    }

    #[test]
    fn test_adjust_during_recalibration_from_other_threads() {
        let adjuster = Arc::new(make_calibrated());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let a = Arc::clone(&adjuster);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let (c, _) = a.adjust("over_2_5_goals", &BTreeMap::new(), 0.7, 40, 2.8);
                        assert!((0.1..=0.95).contains(&c));
                    }
                })
            })
            .collect();
        for _ in 0..10 {
            adjuster.recalibrate("over_2_5_goals", &make_history(), Utc::now()).unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
    }
}
