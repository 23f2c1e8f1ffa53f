//! Outcome resolver.
//!
//! Moves signals from `Pending` to a terminal result by comparing the match
//! state now against the score captured when the signal fired. Every signal
//! type has its own evaluator; an evaluator that cannot decide yet leaves the
//! signal untouched for the next cycle. A pending signal older than the
//! staleness window is settled as a loss regardless of match data.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::metrics::stats::round_dp;
use crate::types::{MatchState, MatchStatus, ResolutionEvent, Score, Signal, SignalResult, SignalType};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Pending signals older than this are forced to a loss.
    pub staleness_hours: i64,
    /// Match minutes a next-goal signal waits for a goal.
    pub next_goal_window_minutes: u32,
    /// Match minutes before a team-performance signal is judged.
    pub performance_window_minutes: u32,
    /// Minute treated as full time when the feed never reports `finished`.
    pub full_time_minute: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            staleness_hours: 6,
            next_goal_window_minutes: 15,
            performance_window_minutes: 20,
            full_time_minute: 90,
        }
    }
}

impl ResolverConfig {
    pub fn staleness(&self) -> Duration {
        Duration::hours(self.staleness_hours)
    }
}

/// What happened to one signal on one resolution attempt.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Not decidable from the data available; nothing changed.
    NotYet(&'static str),
    Settled(ResolutionEvent),
    /// The signal was already terminal; nothing changed.
    AlreadyResolved,
}

/// Snapshot of the pending book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingSummary {
    pub count: usize,
    pub by_strategy: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub stake_at_risk: f64,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct OutcomeResolver {
    config: ResolverConfig,
}

impl OutcomeResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Try to settle one signal.
    ///
    /// Staleness is checked before match data, so a signal whose match has
    /// disappeared still reaches a terminal state.
    pub fn resolve(&self, signal: &mut Signal, state: Option<&MatchState>, now: DateTime<Utc>) -> Resolution {
        if !signal.is_pending() {
            return Resolution::AlreadyResolved;
        }

        let age = now - signal.created_at;
        if age >= self.config.staleness() {
            let explanation = format!(
                "No resolution after {}h, forced loss",
                age.num_hours()
            );
            warn!(
                signal_id = %signal.id,
                strategy = %signal.strategy_name,
                match_id = %signal.match_id,
                "Stale signal forced to loss"
            );
            return self.settle(signal, SignalResult::Loss, explanation, true, now);
        }

        let Some(state) = state else {
            return Resolution::NotYet("no match state");
        };

        match self.evaluate(signal, state) {
            Some((result, explanation)) => self.settle(signal, result, explanation, false, now),
            None => {
                debug!(signal_id = %signal.id, minute = state.minute, "Signal not yet resolvable");
                Resolution::NotYet("outcome undecided")
            }
        }
    }

    /// Resolve every pending signal against the latest known state of its
    /// match. Returns the events for signals settled this pass.
    pub fn resolve_pending(
        &self,
        signals: &mut [Signal],
        states: &HashMap<String, MatchState>,
        now: DateTime<Utc>,
    ) -> Vec<ResolutionEvent> {
        signals
            .iter_mut()
            .filter(|s| s.is_pending())
            .filter_map(|s| {
                let state = states.get(&s.match_id);
                match self.resolve(s, state, now) {
                    Resolution::Settled(event) => Some(event),
                    _ => None,
                }
            })
            .collect()
    }

    fn settle(
        &self,
        signal: &mut Signal,
        result: SignalResult,
        explanation: String,
        forced: bool,
        now: DateTime<Utc>,
    ) -> Resolution {
        let profit_loss = profit_loss(result, signal.recommended_odds(), signal.stake());
        if let Err(e) = signal.settle(result, profit_loss, now) {
            warn!(signal_id = %signal.id, error = %e, "Settlement rejected");
            return Resolution::AlreadyResolved;
        }

        info!(
            signal_id = %signal.id,
            strategy = %signal.strategy_name,
            match_id = %signal.match_id,
            result = %result,
            pnl = format!("{profit_loss:+.2}"),
            forced,
            "Signal resolved"
        );

        Resolution::Settled(ResolutionEvent {
            signal_id: signal.id,
            match_id: signal.match_id.clone(),
            strategy_name: signal.strategy_name.clone(),
            signal_type: signal.signal_type,
            result,
            profit_loss,
            resolved_at: now,
            forced,
            explanation,
        })
    }

    fn is_full_time(&self, state: &MatchState) -> bool {
        state.status == MatchStatus::Finished || state.minute >= self.config.full_time_minute
    }

    fn evaluate(&self, signal: &Signal, state: &MatchState) -> Option<(SignalResult, String)> {
        let now = state.score();
        let full_time = self.is_full_time(state);
        let elapsed = state.minute.saturating_sub(signal.trigger_minute);
        let new = goals_since(signal.score_at_trigger, now);

        match signal.signal_type {
            SignalType::Over(line) => {
                if line.exceeded_by(now.total()) {
                    Some((SignalResult::Win, format!("{} goals, over {}", now.total(), line.value())))
                } else if full_time {
                    Some((SignalResult::Loss, format!("Full time {now}, line {} not passed", line.value())))
                } else {
                    None
                }
            }
            SignalType::Under(line) => {
                if line.exceeded_by(now.total()) {
                    Some((SignalResult::Loss, format!("{} goals, line {} passed", now.total(), line.value())))
                } else if full_time {
                    Some((SignalResult::Win, format!("Full time {now}, stayed under {}", line.value())))
                } else {
                    None
                }
            }
            SignalType::BttsYes | SignalType::BttsNo => {
                let both = now.home > 0 && now.away > 0;
                let yes = signal.signal_type == SignalType::BttsYes;
                if both {
                    let result = if yes { SignalResult::Win } else { SignalResult::Loss };
                    Some((result, format!("Both teams scored ({now})")))
                } else if full_time {
                    let result = if yes { SignalResult::Loss } else { SignalResult::Win };
                    Some((result, format!("Full time {now}, one side blanked")))
                } else {
                    None
                }
            }
            SignalType::HomeWin | SignalType::AwayWin | SignalType::Draw => {
                if !full_time {
                    return None;
                }
                let actual = match now.home.cmp(&now.away) {
                    std::cmp::Ordering::Greater => SignalType::HomeWin,
                    std::cmp::Ordering::Less => SignalType::AwayWin,
                    std::cmp::Ordering::Equal => SignalType::Draw,
                };
                let result = if actual == signal.signal_type {
                    SignalResult::Win
                } else {
                    SignalResult::Loss
                };
                Some((result, format!("Full time {now}")))
            }
            SignalType::NextGoal(side) => {
                let (mine, theirs) = (new.goals(side), new.goals(side.opponent()));
                match (mine > 0, theirs > 0) {
                    (true, true) => Some((SignalResult::Push, "Both sides scored between polls".to_string())),
                    (true, false) => Some((SignalResult::Win, format!("{side} scored next"))),
                    (false, true) => Some((SignalResult::Loss, format!("{} scored next", side.opponent()))),
                    (false, false) if elapsed >= self.config.next_goal_window_minutes => Some((
                        SignalResult::Loss,
                        format!("No goal within {} minutes", self.config.next_goal_window_minutes),
                    )),
                    (false, false) if full_time => Some((SignalResult::Loss, "No further goal".to_string())),
                    (false, false) => None,
                }
            }
            SignalType::LateGoal(side) | SignalType::TeamToScore(side) => {
                if new.goals(side) > 0 {
                    Some((SignalResult::Win, format!("{side} scored after {}'", signal.trigger_minute)))
                } else if full_time {
                    Some((SignalResult::Loss, format!("Full time {now}, {side} did not score")))
                } else {
                    None
                }
            }
            SignalType::TeamPerformance(side) => {
                if elapsed < self.config.performance_window_minutes && !full_time {
                    return None;
                }
                let result = match now.margin(side) {
                    m if m > 0 => SignalResult::Win,
                    0 => SignalResult::Push,
                    _ => SignalResult::Loss,
                };
                Some((result, format!("{side} margin {:+} at {}'", now.margin(side), state.minute)))
            }
        }
    }
}

/// Goals scored per side since the trigger. Downward score corrections
/// count as zero.
fn goals_since(before: Score, now: Score) -> Score {
    Score {
        home: now.home.saturating_sub(before.home),
        away: now.away.saturating_sub(before.away),
    }
}

/// (odds − 1) × stake on a win, −stake on a loss, 0 on a push.
pub fn profit_loss(result: SignalResult, odds: f64, stake: f64) -> f64 {
    let pnl = match result {
        SignalResult::Win => (odds - 1.0) * stake,
        SignalResult::Loss => -stake,
        SignalResult::Push | SignalResult::Pending => 0.0,
    };
    round_dp(pnl, 2)
}

/// Count, breakdown and exposure of the still-pending signals.
pub fn pending_summary(signals: &[Signal]) -> PendingSummary {
    let mut summary = PendingSummary::default();
    for s in signals.iter().filter(|s| s.is_pending()) {
        summary.count += 1;
        *summary.by_strategy.entry(s.strategy_name.clone()).or_default() += 1;
        *summary.by_type.entry(s.signal_type.key()).or_default() += 1;
        summary.stake_at_risk += s.stake();
        summary.oldest = Some(summary.oldest.map_or(s.created_at, |o| o.min(s.created_at)));
        summary.newest = Some(summary.newest.map_or(s.created_at, |n| n.max(s.created_at)));
    }
    summary.stake_at_risk = round_dp(summary.stake_at_risk, 2);
    summary
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
