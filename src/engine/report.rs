//! Per-cycle accounting.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::metrics::stats::round_dp;
use crate::tracker::EvictionReason;
use crate::types::{ResolutionEvent, SignalResult};

/// Summary of one poll → analyse → emit → resolve cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub matches_seen: usize,
    pub matches_analysed: usize,
    /// Not live, or outside the analysis minute window.
    pub skipped_outside_window: usize,
    /// Polled again before the tick interval elapsed.
    pub skipped_interval: usize,
    pub signals_generated: usize,
    pub signals_emitted: usize,
    pub dropped_low_confidence: usize,
    /// Same strategy already pending for the same match.
    pub suppressed_duplicates: usize,
    pub signals_resolved: usize,
    pub wins: usize,
    pub losses: usize,
    pub pushes: usize,
    pub forced_losses: usize,
    pub realised_pnl: f64,
    pub pending: usize,
    pub sink_failures: usize,
    pub evicted: Vec<(String, EvictionReason)>,
    pub timestamp: DateTime<Utc>,
}

impl CycleReport {
    pub fn new(cycle_number: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            cycle_number,
            timestamp,
            ..Self::default()
        }
    }

    /// Fold one settlement into the totals.
    pub fn record_resolution(&mut self, event: &ResolutionEvent) {
        self.signals_resolved += 1;
        match event.result {
            SignalResult::Win => self.wins += 1,
            SignalResult::Loss => self.losses += 1,
            SignalResult::Push => self.pushes += 1,
            SignalResult::Pending => {}
        }
        if event.forced {
            self.forced_losses += 1;
        }
        self.realised_pnl = round_dp(self.realised_pnl + event.profit_loss, 2);
    }

    /// Hit rate over decided settlements this cycle.
    pub fn win_rate(&self) -> Option<f64> {
        let decided = self.wins + self.losses;
        (decided > 0).then(|| self.wins as f64 / decided as f64)
    }
}
