//! Derived match metrics.
//!
//! Turns one raw snapshot plus the match's own history into the secondary
//! indicators the strategies reason about: a goal-expectancy proxy (dxG),
//! shot-trend gradient, intensity volatility, fatigue, attacking momentum,
//! stability and shot efficiency.
//!
//! Every computation is pure. Ratios are zero-guarded and every output is
//! rounded to 3 decimals, so recomputing a cycle from the same samples is
//! idempotent.

pub mod stats;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::types::{RawSample, Side};
use stats::{coefficient_of_variation, finite_or_zero, ols_slope, population_std_dev, round_dp, safe_div};

/// Upper bound on the goal-expectancy proxy and on shot quality.
pub const DXG_CAP: f64 = 3.0;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Thresholds for [`MetricsEngine::detect_changes`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeThresholds {
    pub dxg_spike: f64,
    pub momentum_shift: f64,
    pub fatigue_advantage: f64,
    pub gradient_change: f64,
}

impl Default for ChangeThresholds {
    fn default() -> Self {
        Self {
            dxg_spike: 0.15,
            momentum_shift: 0.25,
            fatigue_advantage: 0.3,
            gradient_change: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Look-back for the shot gradient, in match minutes.
    pub gradient_window_minutes: u32,
    /// Look-back for attacking momentum, in match minutes.
    pub momentum_window_minutes: u32,
    /// Samples required before volatility is reported.
    pub volatility_min_samples: usize,
    /// Samples required before stability departs from 1.0.
    pub stability_min_samples: usize,
    pub changes: ChangeThresholds,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            gradient_window_minutes: 10,
            momentum_window_minutes: 5,
            volatility_min_samples: 5,
            stability_min_samples: 3,
            changes: ChangeThresholds::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Derived metrics
// ---------------------------------------------------------------------------

/// Per-team indicators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SideMetrics {
    /// Goal-expectancy proxy, 0–3.
    pub dxg: f64,
    /// OLS slope of shot counts over the recent window.
    pub gradient: f64,
    pub fatigue: f64,
    /// Attacks per minute over the recent window.
    pub momentum: f64,
    /// 1 − coefficient of variation of attacks, 0–1.
    pub stability: f64,
    pub shots_per_attack: f64,
}

/// All indicators for one match at one minute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub minute: u32,
    pub home: SideMetrics,
    pub away: SideMetrics,
    /// Population std-dev of the combined intensity series.
    pub volatility: f64,
}

impl DerivedMetrics {
    pub fn side(&self, side: Side) -> &SideMetrics {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }

    pub fn combined_dxg(&self) -> f64 {
        self.home.dxg + self.away.dxg
    }

    pub fn max_fatigue(&self) -> f64 {
        self.home.fatigue.max(self.away.fatigue)
    }

    pub fn mean_momentum(&self) -> f64 {
        (self.home.momentum + self.away.momentum) / 2.0
    }

    pub fn mean_shots_per_attack(&self) -> f64 {
        (self.home.shots_per_attack + self.away.shots_per_attack) / 2.0
    }

    /// Every field as a flat name → value map, e.g. `dxg_home`.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        for side in Side::BOTH {
            let m = self.side(side);
            map.insert(format!("dxg_{side}"), m.dxg);
            map.insert(format!("gradient_{side}"), m.gradient);
            map.insert(format!("fatigue_{side}"), m.fatigue);
            map.insert(format!("momentum_{side}"), m.momentum);
            map.insert(format!("stability_{side}"), m.stability);
            map.insert(format!("shots_per_attack_{side}"), m.shots_per_attack);
        }
        map.insert("volatility".to_string(), self.volatility);
        map
    }

    /// Name of the first non-finite field, if any.
    pub fn first_non_finite(&self) -> Option<String> {
        self.to_map()
            .into_iter()
            .find(|(_, v)| !v.is_finite())
            .map(|(k, _)| k)
    }
}

impl fmt::Display for DerivedMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}' dxG {:.2}/{:.2} | mom {:.2}/{:.2} | fat {:.2}/{:.2} | vol {:.2}",
            self.minute,
            self.home.dxg,
            self.away.dxg,
            self.home.momentum,
            self.away.momentum,
            self.home.fatigue,
            self.away.fatigue,
            self.volatility,
        )
    }
}

/// A notable tick-over-tick movement in the derived metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricChange {
    DxgSpike { side: Side, delta: f64 },
    MomentumShift { side: Side, delta: f64 },
    /// `side` is the fresher team.
    FatigueAdvantage { side: Side, gap: f64 },
    GradientChange { side: Side, delta: f64 },
}

impl MetricChange {
    pub fn side(&self) -> Side {
        match *self {
            MetricChange::DxgSpike { side, .. }
            | MetricChange::MomentumShift { side, .. }
            | MetricChange::FatigueAdvantage { side, .. }
            | MetricChange::GradientChange { side, .. } => side,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Stateless calculator for [`DerivedMetrics`].
#[derive(Debug, Clone, Default)]
pub struct MetricsEngine {
    config: MetricsConfig,
}

impl MetricsEngine {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Compute all derived metrics.
    ///
    /// `history` holds the match's earlier samples, oldest first. Count
    /// based indicators (dxG, fatigue, shot efficiency) read `sample`;
    /// trend based ones (gradient, momentum, volatility, stability) read
    /// `history` only.
    pub fn compute(&self, sample: &RawSample, history: &[RawSample], minute: u32) -> DerivedMetrics {
        let mut metrics = DerivedMetrics {
            minute,
            volatility: self.volatility(history),
            ..DerivedMetrics::default()
        };

        for side in Side::BOTH {
            let m = SideMetrics {
                dxg: self.dxg(sample, side, minute),
                gradient: self.gradient(history, side, minute),
                fatigue: self.fatigue(sample, side, minute),
                momentum: self.momentum(history, side, minute),
                stability: self.stability(history, side),
                shots_per_attack: bounded(safe_div(
                    sample.shots(side) as f64,
                    sample.attacks(side) as f64,
                )),
            };
            match side {
                Side::Home => metrics.home = m,
                Side::Away => metrics.away = m,
            }
        }

        debug!(minute, history = history.len(), metrics = %metrics, "Metrics computed");
        metrics
    }

    /// Goal-expectancy proxy for one side, 0–3.
    fn dxg(&self, sample: &RawSample, side: Side, minute: u32) -> f64 {
        let shots = sample.shots(side) as f64;
        let attacks = sample.attacks(side) as f64;
        let dangerous = sample.dangerous(side) as f64;

        let quality = shot_quality(shots, attacks, dangerous);
        let pressure = safe_div(shots, minute.max(1) as f64) * 90.0;
        let raw = quality * time_modifier(minute) * (1.0 + pressure * 0.1);

        bounded(raw.clamp(0.0, DXG_CAP))
    }

    /// Slope of the side's shot counts across samples in the gradient window.
    fn gradient(&self, history: &[RawSample], side: Side, minute: u32) -> f64 {
        let from = minute.saturating_sub(self.config.gradient_window_minutes);
        let shots: Vec<f64> = history
            .iter()
            .filter(|s| s.minute >= from)
            .map(|s| s.shots(side) as f64)
            .collect();
        bounded(ols_slope(&shots))
    }

    /// Std-dev of `shots + 0.3 × attacks` across the full history.
    fn volatility(&self, history: &[RawSample]) -> f64 {
        if history.len() < self.config.volatility_min_samples {
            return 0.0;
        }
        let intensity: Vec<f64> = history
            .iter()
            .map(|s| s.total_shots() as f64 + s.total_attacks() as f64 * 0.3)
            .collect();
        bounded(population_std_dev(&intensity))
    }

    fn fatigue(&self, sample: &RawSample, side: Side, minute: u32) -> f64 {
        let possession = sample.possession(side).clamp(0.0, 100.0) / 100.0;
        let attack_rate = safe_div(sample.attacks(side) as f64, minute.max(1) as f64) * 90.0;
        let time_factor = (minute as f64 / 90.0).min(1.0);
        bounded(possession * attack_rate * time_factor * 0.01)
    }

    /// Attack gain per minute between the first and last sample in the
    /// momentum window. Negative when the feed corrects counts downwards.
    fn momentum(&self, history: &[RawSample], side: Side, minute: u32) -> f64 {
        let from = minute.saturating_sub(self.config.momentum_window_minutes);
        let window: Vec<&RawSample> = history.iter().filter(|s| s.minute >= from).collect();
        let (Some(first), Some(last)) = (window.first(), window.last()) else {
            return 0.0;
        };
        if window.len() < 2 {
            return 0.0;
        }
        let change = last.attacks(side) as f64 - first.attacks(side) as f64;
        let elapsed = last.minute.saturating_sub(first.minute).max(1) as f64;
        bounded(change / elapsed)
    }

    fn stability(&self, history: &[RawSample], side: Side) -> f64 {
        if history.len() < self.config.stability_min_samples {
            return 1.0;
        }
        let attacks: Vec<f64> = history.iter().map(|s| s.attacks(side) as f64).collect();
        bounded((1.0 - coefficient_of_variation(&attacks)).clamp(0.0, 1.0))
    }

    /// Compare two consecutive metric snapshots of the same match.
    /// Returns nothing without a previous snapshot.
    pub fn detect_changes(
        &self,
        current: &DerivedMetrics,
        previous: Option<&DerivedMetrics>,
    ) -> Vec<MetricChange> {
        let Some(previous) = previous else {
            return Vec::new();
        };
        let t = &self.config.changes;
        let mut changes = Vec::new();

        for side in Side::BOTH {
            let (now, before) = (current.side(side), previous.side(side));

            let delta = round_dp(now.dxg - before.dxg, 3);
            if delta.abs() > t.dxg_spike {
                changes.push(MetricChange::DxgSpike { side, delta });
            }
            let delta = round_dp(now.momentum - before.momentum, 3);
            if delta.abs() > t.momentum_shift {
                changes.push(MetricChange::MomentumShift { side, delta });
            }
            let delta = round_dp(now.gradient - before.gradient, 3);
            if delta.abs() > t.gradient_change {
                changes.push(MetricChange::GradientChange { side, delta });
            }
        }

        let gap = round_dp(current.home.fatigue - current.away.fatigue, 3);
        if gap.abs() > t.fatigue_advantage {
            let fresher = if gap > 0.0 { Side::Away } else { Side::Home };
            changes.push(MetricChange::FatigueAdvantage {
                side: fresher,
                gap: gap.abs(),
            });
        }

        changes
    }
}

/// Shot quality: blend of conversion and danger ratios scaled by volume.
fn shot_quality(shots: f64, attacks: f64, dangerous: f64) -> f64 {
    if attacks == 0.0 {
        return 0.0;
    }
    let conversion = safe_div(shots, attacks);
    let danger_ratio = safe_div(dangerous, attacks);
    ((conversion * 0.6 + danger_ratio * 0.4) * shots * 0.15).min(DXG_CAP)
}

/// Phase-of-match weighting for dxG.
fn time_modifier(minute: u32) -> f64 {
    match minute {
        0..=14 => 0.8,
        15..=29 => 1.0,
        30..=59 => 1.1,
        60..=74 => 1.0,
        _ => 1.2,
    }
}

/// Finite, rounded to 3 decimals.
fn bounded(value: f64) -> f64 {
    round_dp(finite_or_zero(value), 3)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_scenario_sample() -> RawSample {
        RawSample {
            minute: 22,
            attacks_home: 20,
            attacks_away: 15,
            shots_home: 9,
            shots_away: 6,
            dangerous_attacks_home: 6,
            dangerous_attacks_away: 4,
            ..RawSample::default()
        }
    }

    fn make_history(len: u32) -> Vec<RawSample> {
        (1..=len)
            .map(|i| RawSample {
                minute: i * 2,
                attacks_home: i * 3,
                attacks_away: i * 2,
                shots_home: i,
                shots_away: i / 2,
                dangerous_attacks_home: i * 2,
                dangerous_attacks_away: i,
                ..RawSample::default()
            })
            .collect()
    }

    fn assert_in_bounds(m: &DerivedMetrics) {
        assert!(m.first_non_finite().is_none());
        for side in Side::BOTH {
            let s = m.side(side);
            assert!((0.0..=DXG_CAP).contains(&s.dxg), "dxg out of range: {}", s.dxg);
            assert!((0.0..=1.0).contains(&s.stability), "stability out of range: {}", s.stability);
            assert!(s.fatigue >= 0.0);
            assert!(s.shots_per_attack >= 0.0);
        }
        assert!(m.volatility >= 0.0);
    }

    #[test]
    fn test_scenario_dxg() {
        let engine = MetricsEngine::default();
        let m = engine.compute(&make_scenario_sample(), &[], 22);
        assert_eq!(m.home.dxg, 2.465);
        assert_eq!(m.away.dxg, 1.078);
        assert!(m.combined_dxg() >= 2.8);
        assert_eq!(m.home.shots_per_attack, 0.45);
        assert_eq!(m.away.shots_per_attack, 0.4);
    }

    #[test]
    fn test_empty_history_defaults() {
        let engine = MetricsEngine::default();
        let m = engine.compute(&make_scenario_sample(), &[], 22);
        assert_eq!(m.home.gradient, 0.0);
        assert_eq!(m.home.momentum, 0.0);
        assert_eq!(m.volatility, 0.0);
        assert_eq!(m.home.stability, 1.0);
        assert_eq!(m.away.stability, 1.0);
    }

    #[test]
    fn test_zero_attacks_guarded() {
        let engine = MetricsEngine::default();
        let sample = RawSample {
            minute: 0,
            shots_home: 4,
            ..RawSample::default()
        };
        let m = engine.compute(&sample, &[], 0);
        assert_eq!(m.home.dxg, 0.0);
        assert_eq!(m.home.shots_per_attack, 0.0);
        assert_eq!(m.home.fatigue, 0.0);
        assert_in_bounds(&m);
    }

    #[test]
    fn test_dxg_capped() {
        let engine = MetricsEngine::default();
        let sample = RawSample {
            minute: 80,
            attacks_home: 40,
            shots_home: 60,
            dangerous_attacks_home: 40,
            ..RawSample::default()
        };
        let m = engine.compute(&sample, &[], 80);
        assert_eq!(m.home.dxg, DXG_CAP);
    }

    #[test]
    fn test_time_modifier_steps() {
        assert_eq!(time_modifier(5), 0.8);
        assert_eq!(time_modifier(15), 1.0);
        assert_eq!(time_modifier(45), 1.1);
        assert_eq!(time_modifier(70), 1.0);
        assert_eq!(time_modifier(88), 1.2);
    }

    #[test]
    fn test_gradient_uses_recent_window() {
        let engine = MetricsEngine::default();
        // Shots 1..=10 at minutes 2..=20; window 10 → minutes 10..=20 → shots 5..=10
        let history = make_history(10);
        let m = engine.compute(&history[9], &history, 20);
        assert_eq!(m.home.gradient, 1.0);
    }

    #[test]
    fn test_momentum_over_five_minutes() {
        let engine = MetricsEngine::default();
        // Window from minute 15: samples at 16, 18, 20 → attacks_home 24 → 30 over 4 minutes
        let history = make_history(10);
        let m = engine.compute(&history[9], &history, 20);
        assert_eq!(m.home.momentum, 1.5);
        assert_eq!(m.away.momentum, 1.0);
    }

    #[test]
    fn test_momentum_needs_two_points() {
        let engine = MetricsEngine::default();
        let history = vec![RawSample {
            minute: 20,
            attacks_home: 12,
            ..RawSample::default()
        }];
        let m = engine.compute(&history[0], &history, 20);
        assert_eq!(m.home.momentum, 0.0);
    }

    #[test]
    fn test_volatility_requires_five_samples() {
        let engine = MetricsEngine::default();
        let history = make_history(4);
        let m = engine.compute(&history[3], &history, 8);
        assert_eq!(m.volatility, 0.0);

        let history = make_history(5);
        let m = engine.compute(&history[4], &history, 10);
        assert!(m.volatility > 0.0);
    }

    #[test]
    fn test_stability_constant_attacks() {
        let engine = MetricsEngine::default();
        let history: Vec<RawSample> = (0..6)
            .map(|i| RawSample {
                minute: 10 + i,
                attacks_home: 10,
                attacks_away: 0,
                ..RawSample::default()
            })
            .collect();
        let m = engine.compute(&history[5], &history, 15);
        assert_eq!(m.home.stability, 1.0);
        assert_eq!(m.away.stability, 1.0);
    }

    #[test]
    fn test_stability_bounded_for_erratic_series() {
        let engine = MetricsEngine::default();
        let history: Vec<RawSample> = [0, 0, 0, 0, 50]
            .iter()
            .enumerate()
            .map(|(i, a)| RawSample {
                minute: i as u32,
                attacks_home: *a,
                ..RawSample::default()
            })
            .collect();
        let m = engine.compute(&history[4], &history, 5);
        assert_eq!(m.home.stability, 0.0);
    }

    #[test]
    fn test_fatigue_formula() {
        let engine = MetricsEngine::default();
        let sample = RawSample {
            minute: 45,
            attacks_home: 30,
            possession_home: 60.0,
            ..RawSample::default()
        };
        let m = engine.compute(&sample, &[], 45);
        // 0.6 × (30/45×90 = 60) × 0.5 × 0.01 = 0.18
        assert_eq!(m.home.fatigue, 0.18);
    }

    #[test]
    fn test_metrics_bounded_for_many_histories() {
        let engine = MetricsEngine::default();
        for len in 0..20u32 {
            let history: Vec<RawSample> = (0..len)
                .map(|i| RawSample {
                    minute: i * 5,
                    attacks_home: (i * 7) % 13 * 4,
                    attacks_away: i * 3,
                    shots_home: (i * 5) % 11,
                    shots_away: i,
                    dangerous_attacks_home: (i * 3) % 9,
                    dangerous_attacks_away: i * 2,
                    possession_home: (i * 17 % 101) as f64,
                    possession_away: 100.0 - (i * 17 % 101) as f64,
                    ..RawSample::default()
                })
                .collect();
            let sample = history.last().copied().unwrap_or_default();
            let m = engine.compute(&sample, &history, sample.minute);
            assert_in_bounds(&m);
        }
    }

    #[test]
    fn test_detect_changes_without_previous_is_empty() {
        let engine = MetricsEngine::default();
        let m = engine.compute(&make_scenario_sample(), &[], 22);
        assert!(engine.detect_changes(&m, None).is_empty());
    }

    #[test]
    fn test_detect_changes_flags_spikes() {
        let engine = MetricsEngine::default();
        let previous = DerivedMetrics {
            minute: 20,
            home: SideMetrics { dxg: 1.0, ..SideMetrics::default() },
            away: SideMetrics { dxg: 1.0, ..SideMetrics::default() },
            volatility: 0.0,
        };
        let current = DerivedMetrics {
            minute: 21,
            home: SideMetrics {
                dxg: 1.5,
                momentum: 0.5,
                fatigue: 0.5,
                ..SideMetrics::default()
            },
            away: SideMetrics {
                dxg: 1.05,
                fatigue: 0.1,
                ..SideMetrics::default()
            },
            volatility: 0.0,
        };
        let changes = engine.detect_changes(&current, Some(&previous));
        assert!(changes.contains(&MetricChange::DxgSpike { side: Side::Home, delta: 0.5 }));
        assert!(changes.contains(&MetricChange::MomentumShift { side: Side::Home, delta: 0.5 }));
        assert!(changes.contains(&MetricChange::FatigueAdvantage { side: Side::Away, gap: 0.4 }));
        assert!(!changes.iter().any(|c| matches!(c, MetricChange::DxgSpike { side: Side::Away, .. })));
    }
}
