//! Tick tracking.
//!
//! Keeps one bounded buffer per live match: the accepted raw snapshots and
//! a [`MetricTrend`] per tracked counter. A snapshot is only accepted once
//! the configured interval has passed since the match's previous accepted
//! tick; early snapshots are dropped without touching any state.
//!
//! Buffers are evicted explicitly through [`TickTracker::evict`], either
//! when a match reaches full time or when it has gone quiet for longer than
//! the staleness window.

pub mod trend;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info};

use crate::types::RawSample;
pub use trend::{detect_shift, MetricTrend, MomentumShift, ShiftKind, TrackedMetric, TrendDirection};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum spacing between accepted ticks of one match.
    pub tick_interval_secs: i64,
    /// Slack subtracted from the interval so poll jitter does not drop a
    /// tick that arrives a few milliseconds early.
    pub tick_tolerance_ms: i64,
    /// Number of deltas summed into `current_average`.
    pub window: usize,
    /// Accepted ticks retained per match.
    pub max_ticks: usize,
    /// A match with no accepted tick for this long is evicted.
    pub stale_after_hours: i64,
    /// A match whose last tick is at or past this minute is evicted.
    pub full_time_minute: u32,
    /// Rebound factor for the momentum-shift heuristic.
    pub shift_ratio: f64,
    /// Trend confidence required before a shift is reported.
    pub shift_min_confidence: f64,
    /// Trend confidence required for inclusion in a trend report.
    pub report_min_confidence: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            tick_tolerance_ms: 2_000,
            window: 3,
            max_ticks: 50,
            stale_after_hours: 24,
            full_time_minute: 90,
            shift_ratio: 1.5,
            shift_min_confidence: 0.7,
            report_min_confidence: 0.5,
        }
    }
}

impl TrackerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::seconds(self.tick_interval_secs.max(0))
    }

    /// Shortest gap that still counts as a full interval.
    pub fn min_tick_gap(&self) -> Duration {
        (self.tick_interval() - Duration::milliseconds(self.tick_tolerance_ms.max(0))).max(Duration::zero())
    }

    pub fn stale_after(&self) -> Duration {
        Duration::hours(self.stale_after_hours.max(0))
    }
}

// ---------------------------------------------------------------------------
// Per-match buffer
// ---------------------------------------------------------------------------

/// One accepted snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub at: DateTime<Utc>,
    pub sample: RawSample,
}

/// All mutable tracking state of a single match.
#[derive(Debug, Clone)]
pub struct MatchBuffer {
    ticks: VecDeque<Tick>,
    trends: BTreeMap<TrackedMetric, MetricTrend>,
}

impl MatchBuffer {
    fn new(window: usize, max_ticks: usize) -> Self {
        let trends = TrackedMetric::ALL
            .iter()
            .map(|m| (*m, MetricTrend::new(*m, window)))
            .collect();
        Self {
            ticks: VecDeque::with_capacity(max_ticks),
            trends,
        }
    }

    fn last(&self) -> Option<&Tick> {
        self.ticks.back()
    }

    fn accept(&mut self, tick: Tick, max_ticks: usize) {
        if let Some(previous) = self.ticks.back().copied() {
            for (metric, trend) in self.trends.iter_mut() {
                trend.push(metric.value(&tick.sample) - metric.value(&previous.sample));
            }
        }
        if self.ticks.len() >= max_ticks.max(1) {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    pub fn ticks(&self) -> &VecDeque<Tick> {
        &self.ticks
    }

    pub fn trends(&self) -> &BTreeMap<TrackedMetric, MetricTrend> {
        &self.trends
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    FullTime,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendEntry {
    pub metric: TrackedMetric,
    pub current_average: f64,
    pub direction: TrendDirection,
    pub confidence: f64,
    pub strength: f64,
}

/// Summary of a match's trends with enough data behind them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub match_id: String,
    pub tick_count: usize,
    pub metrics: Vec<TrendEntry>,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Table of per-match buffers keyed by match id.
#[derive(Debug, Default)]
pub struct TickTracker {
    config: TrackerConfig,
    matches: HashMap<String, MatchBuffer>,
}

impl TickTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            matches: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Offer a snapshot observed at `now`.
    ///
    /// Returns `false` (and changes nothing) if the previous accepted tick
    /// of this match is less than one interval old, minus the jitter
    /// tolerance.
    pub fn add_tick(&mut self, match_id: &str, sample: RawSample, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.matches.get(match_id).and_then(MatchBuffer::last) {
            if now - last.at < self.config.min_tick_gap() {
                debug!(match_id, minute = sample.minute, "Tick rejected, interval not elapsed");
                return false;
            }
        }

        let (window, max_ticks) = (self.config.window, self.config.max_ticks);
        let buffer = self.matches.entry(match_id.to_string()).or_insert_with(|| {
            info!(match_id, "Tracking new match");
            MatchBuffer::new(window, max_ticks)
        });
        buffer.accept(Tick { at: now, sample }, max_ticks);

        debug!(
            match_id,
            minute = sample.minute,
            ticks = buffer.ticks.len(),
            "Tick accepted"
        );
        true
    }

    pub fn get_trend(&self, match_id: &str, metric: TrackedMetric) -> Option<&MetricTrend> {
        self.matches.get(match_id)?.trends.get(&metric)
    }

    pub fn trends(&self, match_id: &str) -> Option<&BTreeMap<TrackedMetric, MetricTrend>> {
        self.matches.get(match_id).map(MatchBuffer::trends)
    }

    pub fn buffer(&self, match_id: &str) -> Option<&MatchBuffer> {
        self.matches.get(match_id)
    }

    /// Accepted samples of a match, oldest first.
    pub fn history(&self, match_id: &str) -> Vec<RawSample> {
        self.matches
            .get(match_id)
            .map(|b| b.ticks.iter().map(|t| t.sample).collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, match_id: &str) -> Option<&Tick> {
        self.matches.get(match_id)?.last()
    }

    pub fn tick_count(&self, match_id: &str) -> usize {
        self.matches.get(match_id).map_or(0, |b| b.ticks.len())
    }

    /// Trends whose confidence exceeds the report threshold.
    pub fn trend_analysis(&self, match_id: &str) -> Option<TrendReport> {
        let buffer = self.matches.get(match_id)?;
        let metrics = buffer
            .trends
            .values()
            .filter(|t| t.confidence > self.config.report_min_confidence)
            .map(|t| TrendEntry {
                metric: t.metric,
                current_average: t.current_average,
                direction: t.direction,
                confidence: t.confidence,
                strength: t.strength(),
            })
            .collect();

        Some(TrendReport {
            match_id: match_id.to_string(),
            tick_count: buffer.ticks.len(),
            metrics,
        })
    }

    /// Reversals in the key metrics of a match.
    pub fn detect_momentum_shifts(&self, match_id: &str) -> Vec<MomentumShift> {
        let Some(buffer) = self.matches.get(match_id) else {
            return Vec::new();
        };
        TrackedMetric::KEY
            .iter()
            .filter_map(|m| buffer.trends.get(m))
            .filter(|t| t.confidence >= self.config.shift_min_confidence)
            .filter_map(|t| detect_shift(t, self.config.shift_ratio))
            .collect()
    }

    /// Drop buffers of matches at full time or without a tick inside the
    /// staleness window.
    pub fn evict(&mut self, now: DateTime<Utc>) -> Vec<(String, EvictionReason)> {
        let full_time = self.config.full_time_minute;
        let stale_after = self.config.stale_after();

        let mut evicted: Vec<(String, EvictionReason)> = self
            .matches
            .iter()
            .filter_map(|(id, buffer)| {
                let last = buffer.last()?;
                if last.sample.minute >= full_time {
                    Some((id.clone(), EvictionReason::FullTime))
                } else if now - last.at >= stale_after {
                    Some((id.clone(), EvictionReason::Stale))
                } else {
                    None
                }
            })
            .collect();
        evicted.sort_by(|a, b| a.0.cmp(&b.0));

        for (id, reason) in &evicted {
            self.matches.remove(id);
            info!(match_id = %id, reason = ?reason, "Match buffer evicted");
        }
        evicted
    }

    pub fn remove(&mut self, match_id: &str) -> bool {
        self.matches.remove(match_id).is_some()
    }

    pub fn contains(&self, match_id: &str) -> bool {
        self.matches.contains_key(match_id)
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
