//! Match monitor: one poll cycle end to end.
//!
//! Fetches live matches, records ticks, runs metrics → trends → signals →
//! adjustment for every match concurrently, emits the survivors, resolves
//! the pending book and evicts finished buffers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::calibration::{ConfidenceAdjuster, RecalibrationReport};
use crate::metrics::{DerivedMetrics, MetricsEngine};
use crate::resolver::{pending_summary, OutcomeResolver, PendingSummary};
use crate::storage::MonitorState;
use crate::strategy::{MatchContext, SignalEngine};
use crate::tracker::{EvictionReason, MetricTrend, MomentumShift, TickTracker, TrackedMetric};
use crate::types::{HistoricalSignal, MatchState, MatchStatus, PipelineError, RawSample, ResolutionEvent, Signal};

use super::{CycleReport, LiveMatch, MatchFeed, SignalSink};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    /// Live matches processed per cycle; the rest wait for the next one.
    pub max_concurrent_matches: usize,
    pub min_analysis_minute: u32,
    pub max_analysis_minute: u32,
    /// Adjusted confidence below this is not emitted.
    pub min_emit_confidence: f64,
    /// Run batch recalibration every N cycles; 0 disables it.
    pub recalibrate_every_cycles: u64,
    /// Resolved signals kept in memory for recalibration.
    pub settled_history_limit: usize,
    /// JSON file of recorded feed cycles for the replay feed.
    pub replay_path: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_concurrent_matches: 20,
            min_analysis_minute: 10,
            max_analysis_minute: 85,
            min_emit_confidence: 0.6,
            recalibrate_every_cycles: 10,
            settled_history_limit: 5_000,
            replay_path: None,
        }
    }
}

/// Components the monitor drives, each already configured.
pub struct Pipeline {
    pub metrics: MetricsEngine,
    pub tracker: TickTracker,
    pub signals: SignalEngine,
    pub adjuster: ConfidenceAdjuster,
    pub resolver: OutcomeResolver,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            metrics: MetricsEngine::default(),
            tracker: TickTracker::default(),
            signals: SignalEngine::default(),
            adjuster: ConfidenceAdjuster::default(),
            resolver: OutcomeResolver::default(),
        }
    }
}

/// Everything one analysis task needs, owned.
struct AnalysisJob {
    match_id: String,
    sample: RawSample,
    history: Vec<RawSample>,
    trends: BTreeMap<TrackedMetric, MetricTrend>,
    shifts: Vec<MomentumShift>,
    previous: Option<DerivedMetrics>,
    observed_at: DateTime<Utc>,
}

struct AnalysisOutcome {
    match_id: String,
    metrics: DerivedMetrics,
    signals: Vec<Signal>,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub struct MatchMonitor {
    config: MonitorConfig,
    feed: Arc<dyn MatchFeed>,
    sink: Arc<dyn SignalSink>,
    metrics: Arc<MetricsEngine>,
    signals: Arc<SignalEngine>,
    adjuster: Arc<ConfidenceAdjuster>,
    tracker: TickTracker,
    resolver: OutcomeResolver,
    pending: Vec<Signal>,
    settled: Vec<Signal>,
    last_metrics: HashMap<String, DerivedMetrics>,
    cycle_count: u64,
    /// Start offset into the sorted live list when it exceeds the cap.
    rotation: usize,
}

impl MatchMonitor {
    pub fn new(
        config: MonitorConfig,
        pipeline: Pipeline,
        feed: Arc<dyn MatchFeed>,
        sink: Arc<dyn SignalSink>,
    ) -> Self {
        Self {
            config,
            feed,
            sink,
            metrics: Arc::new(pipeline.metrics),
            signals: Arc::new(pipeline.signals),
            adjuster: Arc::new(pipeline.adjuster),
            tracker: pipeline.tracker,
            resolver: pipeline.resolver,
            pending: Vec::new(),
            settled: Vec::new(),
            last_metrics: HashMap::new(),
            cycle_count: 0,
            rotation: 0,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn pending(&self) -> &[Signal] {
        &self.pending
    }

    pub fn settled(&self) -> &[Signal] {
        &self.settled
    }

    pub fn tracker(&self) -> &TickTracker {
        &self.tracker
    }

    pub fn adjuster(&self) -> &ConfidenceAdjuster {
        &self.adjuster
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn pending_summary(&self) -> PendingSummary {
        pending_summary(&self.pending)
    }

    /// Run one full cycle at `now`.
    ///
    /// Only the feed fetch can fail the cycle. Strategy, sink and per-match
    /// failures are logged and counted.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let cycle_number = self.cycle_count + 1;
        let mut report = CycleReport::new(cycle_number, now);
        info!(cycle = cycle_number, feed = self.feed.name(), "Starting cycle");

        // 1. Poll
        let live = self
            .feed
            .live_matches()
            .await
            .with_context(|| format!("Failed to fetch live matches from {}", self.feed.name()))?;
        report.matches_seen = live.len();
        let cap = self.config.max_concurrent_matches;
        let live = if live.len() > cap {
            let total = live.len();
            let offset = self.rotation % total;
            self.rotation = (offset + cap) % total;
            warn!(
                live = total,
                cap,
                offset,
                "More live matches than the cycle cap, the rest rotate in on later cycles"
            );
            rotate_window(live, offset, cap)
        } else {
            live
        };

        let mut states: HashMap<String, MatchState> =
            live.iter().map(|m| (m.match_id.clone(), m.state)).collect();

        // 2. Ticks, then analysis of matches inside the window
        let jobs = self.collect_jobs(&live, now, &mut report);
        report.matches_analysed = jobs.len();
        let outcomes = self.analyse(jobs).await;

        // 3. Emit
        let mut fresh = Vec::new();
        for outcome in outcomes {
            self.last_metrics.insert(outcome.match_id.clone(), outcome.metrics);
            report.signals_generated += outcome.signals.len();
            for signal in outcome.signals {
                if signal.confidence() < self.config.min_emit_confidence {
                    debug!(
                        strategy = %signal.strategy_name,
                        match_id = %signal.match_id,
                        confidence = format!("{:.3}", signal.confidence()),
                        "Adjusted confidence below emit threshold"
                    );
                    report.dropped_low_confidence += 1;
                    continue;
                }
                if self.is_duplicate(&signal) {
                    report.suppressed_duplicates += 1;
                    continue;
                }
                fresh.push(signal);
            }
        }
        report.signals_emitted = fresh.len();
        report.sink_failures += self.notify_emitted(&fresh).await;
        self.pending.extend(fresh);

        // 4. Resolve
        self.fill_missing_states(&mut states).await;
        let events = self.resolver.resolve_pending(&mut self.pending, &states, now);
        for event in &events {
            report.record_resolution(event);
        }
        report.sink_failures += self.notify_resolved(&events).await;
        self.archive_settled();

        // 5. Evict
        report.evicted.extend(self.tracker.evict(now));
        for (match_id, _) in &report.evicted {
            self.last_metrics.remove(match_id);
        }

        self.cycle_count = cycle_number;
        report.pending = self.pending.len();
        Ok(report)
    }

    fn collect_jobs(&mut self, live: &[LiveMatch], now: DateTime<Utc>, report: &mut CycleReport) -> Vec<AnalysisJob> {
        let window = self.config.min_analysis_minute..=self.config.max_analysis_minute;
        let mut jobs = Vec::new();

        for m in live {
            if m.state.status == MatchStatus::Finished {
                if self.tracker.remove(&m.match_id) {
                    info!(match_id = %m.match_id, "Match finished, buffer dropped");
                    report.evicted.push((m.match_id.clone(), EvictionReason::FullTime));
                }
                report.skipped_outside_window += 1;
                continue;
            }
            if !self.tracker.add_tick(&m.match_id, m.sample, now) {
                report.skipped_interval += 1;
                continue;
            }
            if !window.contains(&m.sample.minute) {
                debug!(match_id = %m.match_id, minute = m.sample.minute, "Outside analysis window");
                report.skipped_outside_window += 1;
                continue;
            }

            jobs.push(AnalysisJob {
                match_id: m.match_id.clone(),
                sample: m.sample,
                history: self.tracker.history(&m.match_id),
                trends: self.tracker.trends(&m.match_id).cloned().unwrap_or_default(),
                shifts: self.tracker.detect_momentum_shifts(&m.match_id),
                previous: self.last_metrics.get(&m.match_id).copied(),
                observed_at: now,
            });
        }
        jobs
    }

    /// One task per match. A panicking task loses only its own match for
    /// this cycle.
    async fn analyse(&self, jobs: Vec<AnalysisJob>) -> Vec<AnalysisOutcome> {
        let mut set = JoinSet::new();
        for job in jobs {
            let metrics = Arc::clone(&self.metrics);
            let signals = Arc::clone(&self.signals);
            let adjuster = Arc::clone(&self.adjuster);
            set.spawn(async move { analyse_match(&metrics, &signals, &adjuster, job) });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Match analysis task failed"),
            }
        }
        outcomes.sort_by(|a, b| a.match_id.cmp(&b.match_id));
        outcomes
    }

    fn is_duplicate(&self, signal: &Signal) -> bool {
        self.pending
            .iter()
            .any(|p| p.match_id == signal.match_id && p.strategy_name == signal.strategy_name)
    }

    /// Ask the feed about pending matches that were not in this poll.
    async fn fill_missing_states(&self, states: &mut HashMap<String, MatchState>) {
        let mut missing: Vec<&str> = self
            .pending
            .iter()
            .map(|s| s.match_id.as_str())
            .filter(|id| !states.contains_key(*id))
            .collect();
        missing.sort_unstable();
        missing.dedup();

        for match_id in missing {
            match self.feed.match_state(match_id).await {
                Ok(Some(state)) => {
                    states.insert(match_id.to_string(), state);
                }
                Ok(None) => debug!(match_id, "Feed has no state for pending match"),
                Err(e) => warn!(match_id, error = %e, "Failed to fetch match state"),
            }
        }
    }

    async fn notify_emitted(&self, signals: &[Signal]) -> usize {
        let results = join_all(signals.iter().map(|s| self.sink.signal_emitted(s))).await;
        count_failures(results, "signal_emitted")
    }

    async fn notify_resolved(&self, events: &[ResolutionEvent]) -> usize {
        let results = join_all(events.iter().map(|e| self.sink.signal_resolved(e))).await;
        count_failures(results, "signal_resolved")
    }

    /// Move terminal signals from the pending book into the settled history.
    fn archive_settled(&mut self) {
        let (done, still_pending): (Vec<Signal>, Vec<Signal>) =
            std::mem::take(&mut self.pending).into_iter().partition(|s| !s.is_pending());
        self.pending = still_pending;
        self.settled.extend(done);

        let limit = self.config.settled_history_limit;
        if self.settled.len() > limit {
            let excess = self.settled.len() - limit;
            self.settled.drain(..excess);
        }
    }

    /// Batch recalibration for every strategy in `history`.
    ///
    /// Strategies with too few resolved signals keep their old statistics
    /// and come back as [`PipelineError::InsufficientSamples`].
    pub fn recalibrate(
        &self,
        history: &[Signal],
        now: DateTime<Utc>,
    ) -> BTreeMap<String, Result<RecalibrationReport, PipelineError>> {
        let mut by_strategy: BTreeMap<&str, Vec<HistoricalSignal>> = BTreeMap::new();
        for signal in history {
            by_strategy
                .entry(signal.strategy_name.as_str())
                .or_default()
                .push(HistoricalSignal::from(signal));
        }

        by_strategy
            .into_iter()
            .map(|(strategy, records)| {
                let outcome = self.adjuster.recalibrate(strategy, &records, now);
                (strategy.to_string(), outcome)
            })
            .collect()
    }

    /// Recalibrate from the in-memory settled history.
    pub fn recalibrate_from_settled(
        &self,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, Result<RecalibrationReport, PipelineError>> {
        self.recalibrate(&self.settled, now)
    }

    /// Whether the configured recalibration cadence falls on this cycle.
    pub fn recalibration_due(&self) -> bool {
        let every = self.config.recalibrate_every_cycles;
        every > 0 && self.cycle_count > 0 && self.cycle_count % every == 0
    }

    /// Persistable snapshot.
    pub fn state(&self, now: DateTime<Utc>) -> MonitorState {
        MonitorState {
            cycle_count: self.cycle_count,
            strategy_stats: self.adjuster.snapshot(),
            pending: self.pending.clone(),
            settled: self.settled.clone(),
            saved_at: now,
        }
    }

    /// Restore from a persisted snapshot.
    pub fn restore(&mut self, state: MonitorState) {
        info!(
            cycles = state.cycle_count,
            pending = state.pending.len(),
            settled = state.settled.len(),
            strategies = state.strategy_stats.len(),
            "Monitor state restored"
        );
        self.cycle_count = state.cycle_count;
        self.adjuster.restore(state.strategy_stats);
        self.pending = state.pending.into_iter().filter(Signal::is_pending).collect();
        self.settled = state.settled;
    }
}

/// metrics → changes → signals → adjustment for one match.
fn analyse_match(
    metrics_engine: &MetricsEngine,
    signal_engine: &SignalEngine,
    adjuster: &ConfidenceAdjuster,
    job: AnalysisJob,
) -> AnalysisOutcome {
    let minute = job.sample.minute;
    let metrics = metrics_engine.compute(&job.sample, &job.history, minute);
    let changes = metrics_engine.detect_changes(&metrics, job.previous.as_ref());
    if !changes.is_empty() {
        debug!(match_id = %job.match_id, changes = changes.len(), "Significant metric changes");
    }

    let context = MatchContext::new(job.match_id.clone(), job.sample, job.observed_at)
        .with_trends(job.trends, job.shifts)
        .with_changes(changes);

    let mut signals = signal_engine.evaluate_all(&metrics, &context, minute);
    for signal in &mut signals {
        let (confidence, explanation) = adjuster.adjust(
            &signal.strategy_name,
            &signal.trigger_metrics,
            signal.confidence(),
            signal.trigger_minute,
            signal.threshold_used,
        );
        if let Err(e) = signal.revise_confidence(confidence, &explanation) {
            warn!(signal_id = %signal.id, error = %e, "Could not apply adjusted confidence");
        }
    }

    AnalysisOutcome {
        match_id: job.match_id,
        metrics,
        signals,
    }
}

/// `cap` matches starting at `offset` in match-id order, wrapping around.
fn rotate_window(mut live: Vec<LiveMatch>, offset: usize, cap: usize) -> Vec<LiveMatch> {
    live.sort_by(|a, b| a.match_id.cmp(&b.match_id));
    let total = live.len();
    live.rotate_left(offset % total.max(1));
    live.truncate(cap);
    live
}

fn count_failures(results: Vec<Result<()>>, call: &str) -> usize {
    let mut failures = 0;
    for result in results {
        if let Err(e) = result {
            warn!(call, error = %e, "Signal sink failed");
            failures += 1;
        }
    }
    failures
}
