//! Per-metric trend state: a bounded deque of tick-over-tick deltas and the
//! windowed running sum derived from it.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::types::RawSample;

// ---------------------------------------------------------------------------
// Tracked metrics
// ---------------------------------------------------------------------------

/// Raw counters whose deltas are tracked per match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedMetric {
    TotalAttacks,
    TotalShots,
    TotalDangerous,
    TotalCorners,
    TotalGoals,
    AttacksHome,
    AttacksAway,
    ShotsHome,
    ShotsAway,
}

impl TrackedMetric {
    pub const ALL: &'static [TrackedMetric] = &[
        TrackedMetric::TotalAttacks,
        TrackedMetric::TotalShots,
        TrackedMetric::TotalDangerous,
        TrackedMetric::TotalCorners,
        TrackedMetric::TotalGoals,
        TrackedMetric::AttacksHome,
        TrackedMetric::AttacksAway,
        TrackedMetric::ShotsHome,
        TrackedMetric::ShotsAway,
    ];

    /// Metrics inspected by the momentum-shift heuristic.
    pub const KEY: &'static [TrackedMetric] = &[
        TrackedMetric::TotalAttacks,
        TrackedMetric::TotalShots,
        TrackedMetric::TotalDangerous,
    ];

    pub fn value(&self, sample: &RawSample) -> f64 {
        let v = match self {
            TrackedMetric::TotalAttacks => sample.total_attacks(),
            TrackedMetric::TotalShots => sample.total_shots(),
            TrackedMetric::TotalDangerous => sample.total_dangerous(),
            TrackedMetric::TotalCorners => sample.total_corners(),
            TrackedMetric::TotalGoals => sample.total_goals(),
            TrackedMetric::AttacksHome => sample.attacks_home,
            TrackedMetric::AttacksAway => sample.attacks_away,
            TrackedMetric::ShotsHome => sample.shots_home,
            TrackedMetric::ShotsAway => sample.shots_away,
        };
        v as f64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedMetric::TotalAttacks => "total_attacks",
            TrackedMetric::TotalShots => "total_shots",
            TrackedMetric::TotalDangerous => "total_dangerous",
            TrackedMetric::TotalCorners => "total_corners",
            TrackedMetric::TotalGoals => "total_goals",
            TrackedMetric::AttacksHome => "attacks_home",
            TrackedMetric::AttacksAway => "attacks_away",
            TrackedMetric::ShotsHome => "shots_home",
            TrackedMetric::ShotsAway => "shots_away",
        }
    }
}

impl fmt::Display for TrackedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Rising => write!(f, "rising"),
            TrendDirection::Falling => write!(f, "falling"),
            TrendDirection::Stable => write!(f, "stable"),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricTrend
// ---------------------------------------------------------------------------

/// Windowed delta state for one metric of one match.
///
/// `current_average` is the plain **sum** of the last `window` deltas. It is
/// not divided by the window length; strategy thresholds are expressed in
/// that unnormalised unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTrend {
    pub metric: TrackedMetric,
    pub window: usize,
    pub current_average: f64,
    pub direction: TrendDirection,
    /// min(delta count / window, 1).
    pub confidence: f64,
    deltas: VecDeque<f64>,
}

impl MetricTrend {
    pub fn new(metric: TrackedMetric, window: usize) -> Self {
        let window = window.max(1);
        Self {
            metric,
            window,
            current_average: 0.0,
            direction: TrendDirection::Stable,
            confidence: 0.0,
            deltas: VecDeque::with_capacity(window * 2),
        }
    }

    /// Capacity of the delta deque.
    pub fn capacity(&self) -> usize {
        self.window * 2
    }

    /// Append a delta, dropping the oldest when full, and refresh the
    /// derived fields.
    pub fn push(&mut self, delta: f64) {
        if self.deltas.len() == self.capacity() {
            self.deltas.pop_front();
        }
        self.deltas.push_back(delta);

        self.current_average = self.deltas.iter().rev().take(self.window).sum();
        self.confidence = (self.deltas.len() as f64 / self.window as f64).min(1.0);
        self.direction = self.direction_from_deltas();
    }

    fn direction_from_deltas(&self) -> TrendDirection {
        let mut recent = self.deltas.iter().rev();
        match (recent.next(), recent.next()) {
            (Some(last), Some(prev)) => compare(*last, *prev),
            (Some(only), None) => compare(*only, 0.0),
            _ => TrendDirection::Stable,
        }
    }

    pub fn deltas(&self) -> &VecDeque<f64> {
        &self.deltas
    }

    pub fn delta_count(&self) -> usize {
        self.deltas.len()
    }

    /// The last `n` deltas, oldest first. Shorter if fewer are stored.
    pub fn recent(&self, n: usize) -> Vec<f64> {
        let skip = self.deltas.len().saturating_sub(n);
        self.deltas.iter().skip(skip).copied().collect()
    }

    /// |current_average|.
    pub fn strength(&self) -> f64 {
        self.current_average.abs()
    }
}

fn compare(a: f64, b: f64) -> TrendDirection {
    if a > b {
        TrendDirection::Rising
    } else if a < b {
        TrendDirection::Falling
    } else {
        TrendDirection::Stable
    }
}

// ---------------------------------------------------------------------------
// Momentum shifts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftKind {
    Gain,
    Loss,
}

/// A sharp reversal in a key metric's deltas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MomentumShift {
    pub kind: ShiftKind,
    pub metric: TrackedMetric,
    pub strength: f64,
    pub confidence: f64,
}

/// Check the last three deltas for a reversal.
///
/// Gain: two negative deltas followed by a positive one at least `ratio`
/// times the magnitude of the one before it. Loss is the mirror image.
pub fn detect_shift(trend: &MetricTrend, ratio: f64) -> Option<MomentumShift> {
    let recent = trend.recent(3);
    let &[d3, d2, d1] = recent.as_slice() else {
        return None;
    };

    let kind = if d3 < 0.0 && d2 < 0.0 && d1 > 0.0 && d1 >= ratio * d2.abs() {
        ShiftKind::Gain
    } else if d3 > 0.0 && d2 > 0.0 && d1 < 0.0 && d1.abs() >= ratio * d2 {
        ShiftKind::Loss
    } else {
        return None;
    };

    Some(MomentumShift {
        kind,
        metric: trend.metric,
        strength: d1.abs(),
        confidence: trend.confidence,
    })
}
