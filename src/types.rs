//! Shared types for the PITCHWATCH pipeline.
//!
//! These types form the data model used across all modules: the raw
//! per-tick snapshot consumed from the match feed, the live match state used
//! for settlement, and the signal record handed to downstream collaborators.
//! They carry no behaviour beyond parsing, formatting and the signal's
//! write-once lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Raw sample
// ---------------------------------------------------------------------------

/// One raw statistics snapshot for a live match.
///
/// Deserialisation is lenient: missing or malformed fields fall back to
/// zero (or 50.0 for possession) instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct RawSample {
    pub minute: u32,
    pub home_score: u32,
    pub away_score: u32,
    pub attacks_home: u32,
    pub attacks_away: u32,
    pub shots_home: u32,
    pub shots_away: u32,
    pub dangerous_attacks_home: u32,
    pub dangerous_attacks_away: u32,
    /// Ball possession in percent (0–100).
    pub possession_home: f64,
    pub possession_away: f64,
    pub corners_home: u32,
    pub corners_away: u32,
}

impl Default for RawSample {
    fn default() -> Self {
        Self {
            minute: 0,
            home_score: 0,
            away_score: 0,
            attacks_home: 0,
            attacks_away: 0,
            shots_home: 0,
            shots_away: 0,
            dangerous_attacks_home: 0,
            dangerous_attacks_away: 0,
            possession_home: 50.0,
            possession_away: 50.0,
            corners_home: 0,
            corners_away: 0,
        }
    }
}

impl RawSample {
    /// Build a sample from loosely-typed JSON.
    ///
    /// Accepts integers, floats and numeric strings. Negative or non-finite
    /// counts become 0; possession is clamped to 0–100.
    pub fn from_json(value: &Value) -> Self {
        let defaults = Self::default();
        let Some(obj) = value.as_object() else {
            return defaults;
        };

        let count = |key: &str| -> u32 {
            obj.get(key)
                .and_then(numeric)
                .filter(|v| *v > 0.0)
                .map(|v| v.min(u32::MAX as f64) as u32)
                .unwrap_or(0)
        };
        let percent = |key: &str| -> f64 {
            obj.get(key)
                .and_then(numeric)
                .map(|v| v.clamp(0.0, 100.0))
                .unwrap_or(50.0)
        };

        Self {
            minute: count("minute"),
            home_score: count("home_score"),
            away_score: count("away_score"),
            attacks_home: count("attacks_home"),
            attacks_away: count("attacks_away"),
            shots_home: count("shots_home"),
            shots_away: count("shots_away"),
            dangerous_attacks_home: count("dangerous_attacks_home"),
            dangerous_attacks_away: count("dangerous_attacks_away"),
            possession_home: percent("possession_home"),
            possession_away: percent("possession_away"),
            corners_home: count("corners_home"),
            corners_away: count("corners_away"),
        }
    }

    pub fn score(&self) -> Score {
        Score {
            home: self.home_score,
            away: self.away_score,
        }
    }

    /// Side totals saturate at `u32::MAX` instead of overflowing.
    pub fn total_goals(&self) -> u32 {
        self.home_score.saturating_add(self.away_score)
    }

    pub fn total_attacks(&self) -> u32 {
        self.attacks_home.saturating_add(self.attacks_away)
    }

    pub fn total_shots(&self) -> u32 {
        self.shots_home.saturating_add(self.shots_away)
    }

    pub fn total_dangerous(&self) -> u32 {
        self.dangerous_attacks_home.saturating_add(self.dangerous_attacks_away)
    }

    pub fn total_corners(&self) -> u32 {
        self.corners_home.saturating_add(self.corners_away)
    }

    pub fn attacks(&self, side: Side) -> u32 {
        match side {
            Side::Home => self.attacks_home,
            Side::Away => self.attacks_away,
        }
    }

    pub fn shots(&self, side: Side) -> u32 {
        match side {
            Side::Home => self.shots_home,
            Side::Away => self.shots_away,
        }
    }

    pub fn dangerous(&self, side: Side) -> u32 {
        match side {
            Side::Home => self.dangerous_attacks_home,
            Side::Away => self.dangerous_attacks_away,
        }
    }

    pub fn possession(&self, side: Side) -> f64 {
        match side {
            Side::Home => self.possession_home,
            Side::Away => self.possession_away,
        }
    }
}

impl From<Value> for RawSample {
    fn from(value: Value) -> Self {
        RawSample::from_json(&value)
    }
}

/// Read a JSON number or numeric string as a finite f64.
fn numeric(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

impl fmt::Display for RawSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}' {}-{} (att {}/{} | shots {}/{} | danger {}/{})",
            self.minute,
            self.home_score,
            self.away_score,
            self.attacks_home,
            self.attacks_away,
            self.shots_home,
            self.shots_away,
            self.dangerous_attacks_home,
            self.dangerous_attacks_away,
        )
    }
}

// ---------------------------------------------------------------------------
// Sides, scores, match state
// ---------------------------------------------------------------------------

/// Which team a per-side metric or market refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Home, Side::Away];

    pub fn opponent(&self) -> Side {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Home => "home",
            Side::Away => "away",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "home" | "h" | "1" => Ok(Side::Home),
            "away" | "a" | "2" => Ok(Side::Away),
            _ => Err(anyhow::anyhow!("Unknown side: {s}")),
        }
    }
}

/// A scoreline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

impl Score {
    pub fn total(&self) -> u32 {
        self.home.saturating_add(self.away)
    }

    pub fn goals(&self, side: Side) -> u32 {
        match side {
            Side::Home => self.home,
            Side::Away => self.away,
        }
    }

    /// Goal difference from `side`'s point of view.
    pub fn margin(&self, side: Side) -> i64 {
        self.goals(side) as i64 - self.goals(side.opponent()) as i64
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

/// Whether the match is still being played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    #[serde(alias = "inplay", alias = "in_play", alias = "ht", alias = "1h", alias = "2h")]
    Live,
    #[serde(alias = "ft", alias = "ended", alias = "aet", alias = "pen")]
    Finished,
}

impl MatchStatus {
    /// Lenient label parsing. Anything not recognisably finished is live.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "finished" | "ft" | "ended" | "aet" | "pen" | "full_time" | "fulltime" => {
                MatchStatus::Finished
            }
            _ => MatchStatus::Live,
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Live => write!(f, "live"),
            MatchStatus::Finished => write!(f, "finished"),
        }
    }
}

/// Live match state used to settle pending signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchState {
    pub status: MatchStatus,
    pub minute: u32,
    pub home_score: u32,
    pub away_score: u32,
}

impl MatchState {
    pub fn live(minute: u32, home_score: u32, away_score: u32) -> Self {
        Self {
            status: MatchStatus::Live,
            minute,
            home_score,
            away_score,
        }
    }

    pub fn finished(home_score: u32, away_score: u32) -> Self {
        Self {
            status: MatchStatus::Finished,
            minute: 90,
            home_score,
            away_score,
        }
    }

    pub fn score(&self) -> Score {
        Score {
            home: self.home_score,
            away: self.away_score,
        }
    }
}

impl From<&RawSample> for MatchState {
    fn from(sample: &RawSample) -> Self {
        MatchState::live(sample.minute, sample.home_score, sample.away_score)
    }
}

// ---------------------------------------------------------------------------
// Signal types
// ---------------------------------------------------------------------------

/// Over/under goal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoalLine {
    OneAndHalf,
    TwoAndHalf,
    ThreeAndHalf,
}

impl GoalLine {
    pub fn value(&self) -> f64 {
        match self {
            GoalLine::OneAndHalf => 1.5,
            GoalLine::TwoAndHalf => 2.5,
            GoalLine::ThreeAndHalf => 3.5,
        }
    }

    /// Goals strictly above the line settle the "over" side.
    pub fn exceeded_by(&self, goals: u32) -> bool {
        goals as f64 > self.value()
    }

    fn key(&self) -> &'static str {
        match self {
            GoalLine::OneAndHalf => "1_5",
            GoalLine::TwoAndHalf => "2_5",
            GoalLine::ThreeAndHalf => "3_5",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "1_5" | "1.5" => Some(GoalLine::OneAndHalf),
            "2_5" | "2.5" => Some(GoalLine::TwoAndHalf),
            "3_5" | "3.5" => Some(GoalLine::ThreeAndHalf),
            _ => None,
        }
    }
}

/// The market a signal bets on. Serialised as a flat key such as
/// `"over_2_5"` or `"next_goal_home"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SignalType {
    Over(GoalLine),
    Under(GoalLine),
    BttsYes,
    BttsNo,
    HomeWin,
    AwayWin,
    Draw,
    NextGoal(Side),
    LateGoal(Side),
    TeamToScore(Side),
    TeamPerformance(Side),
}

impl SignalType {
    pub fn key(&self) -> String {
        match self {
            SignalType::Over(line) => format!("over_{}", line.key()),
            SignalType::Under(line) => format!("under_{}", line.key()),
            SignalType::BttsYes => "btts_yes".to_string(),
            SignalType::BttsNo => "btts_no".to_string(),
            SignalType::HomeWin => "home_win".to_string(),
            SignalType::AwayWin => "away_win".to_string(),
            SignalType::Draw => "draw".to_string(),
            SignalType::NextGoal(side) => format!("next_goal_{side}"),
            SignalType::LateGoal(side) => format!("late_goal_{side}"),
            SignalType::TeamToScore(side) => format!("team_to_score_{side}"),
            SignalType::TeamPerformance(side) => format!("team_performance_{side}"),
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl std::str::FromStr for SignalType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        let unknown = || anyhow::anyhow!("Unknown signal type: {s}");

        let parsed = match key.as_str() {
            "btts_yes" | "btts" => Some(SignalType::BttsYes),
            "btts_no" => Some(SignalType::BttsNo),
            "home_win" => Some(SignalType::HomeWin),
            "away_win" => Some(SignalType::AwayWin),
            "draw" => Some(SignalType::Draw),
            _ => None,
        };
        if let Some(t) = parsed {
            return Ok(t);
        }

        if let Some(rest) = key.strip_prefix("over_") {
            return GoalLine::parse(rest).map(SignalType::Over).ok_or_else(unknown);
        }
        if let Some(rest) = key.strip_prefix("under_") {
            return GoalLine::parse(rest).map(SignalType::Under).ok_or_else(unknown);
        }

        let sided: [(&str, fn(Side) -> SignalType); 4] = [
            ("next_goal_", SignalType::NextGoal),
            ("late_goal_", SignalType::LateGoal),
            ("team_to_score_", SignalType::TeamToScore),
            ("team_performance_", SignalType::TeamPerformance),
        ];
        for (prefix, build) in sided {
            if let Some(rest) = key.strip_prefix(prefix) {
                let side: Side = rest.parse().map_err(|_| unknown())?;
                return Ok(build(side));
            }
        }

        Err(unknown())
    }
}

impl From<SignalType> for String {
    fn from(t: SignalType) -> Self {
        t.key()
    }
}

impl TryFrom<String> for SignalType {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Settlement state of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalResult {
    Pending,
    Win,
    Loss,
    Push,
}

impl SignalResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SignalResult::Pending)
    }
}

impl fmt::Display for SignalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalResult::Pending => write!(f, "pending"),
            SignalResult::Win => write!(f, "win"),
            SignalResult::Loss => write!(f, "loss"),
            SignalResult::Push => write!(f, "push"),
        }
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Everything a strategy produces for a new signal.
#[derive(Debug, Clone)]
pub struct SignalDraft {
    pub strategy_name: String,
    pub signal_type: SignalType,
    pub prediction: String,
    pub confidence: f64,
    pub threshold_used: f64,
    pub reasoning: String,
    pub trigger_metrics: BTreeMap<String, f64>,
    pub trigger_minute: u32,
    pub score_at_trigger: Score,
    pub recommended_odds: f64,
    pub stake_multiplier: f64,
    /// Absolute stake, already multiplied out.
    pub stake: f64,
}

/// A candidate bet with its triggering evidence.
///
/// Odds and stake are fixed at creation. Confidence can be revised while
/// the signal is pending; the result is written exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub match_id: String,
    pub strategy_name: String,
    pub signal_type: SignalType,
    pub prediction: String,
    pub threshold_used: f64,
    pub reasoning: String,
    pub trigger_metrics: BTreeMap<String, f64>,
    pub trigger_minute: u32,
    pub score_at_trigger: Score,
    pub stake_multiplier: f64,
    pub created_at: DateTime<Utc>,
    confidence: f64,
    recommended_odds: f64,
    stake: f64,
    result: SignalResult,
    profit_loss: f64,
    resolved_at: Option<DateTime<Utc>>,
}

impl Signal {
    pub fn new(match_id: impl Into<String>, draft: SignalDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            match_id: match_id.into(),
            strategy_name: draft.strategy_name,
            signal_type: draft.signal_type,
            prediction: draft.prediction,
            threshold_used: draft.threshold_used,
            reasoning: draft.reasoning,
            trigger_metrics: draft.trigger_metrics,
            trigger_minute: draft.trigger_minute,
            score_at_trigger: draft.score_at_trigger,
            stake_multiplier: draft.stake_multiplier,
            created_at,
            confidence: draft.confidence,
            recommended_odds: draft.recommended_odds,
            stake: draft.stake,
            result: SignalResult::Pending,
            profit_loss: 0.0,
            resolved_at: None,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn recommended_odds(&self) -> f64 {
        self.recommended_odds
    }

    pub fn stake(&self) -> f64 {
        self.stake
    }

    pub fn result(&self) -> SignalResult {
        self.result
    }

    pub fn profit_loss(&self) -> f64 {
        self.profit_loss
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn is_pending(&self) -> bool {
        self.result == SignalResult::Pending
    }

    /// Replace the confidence with an adjusted value, appending the
    /// explanation to the reasoning. Only allowed while pending.
    pub fn revise_confidence(&mut self, confidence: f64, explanation: &str) -> Result<(), PipelineError> {
        if !self.is_pending() {
            return Err(PipelineError::AlreadySettled(self.id));
        }
        self.confidence = confidence;
        if !explanation.is_empty() {
            self.reasoning = format!("{} | {}", self.reasoning, explanation);
        }
        Ok(())
    }

    /// Write the terminal result. Fails if the signal is already settled or
    /// `result` is not terminal.
    pub(crate) fn settle(
        &mut self,
        result: SignalResult,
        profit_loss: f64,
        at: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        if self.result.is_terminal() {
            return Err(PipelineError::AlreadySettled(self.id));
        }
        if !result.is_terminal() {
            return Err(PipelineError::InvalidResolution { id: self.id, result });
        }
        self.result = result;
        self.profit_loss = profit_loss;
        self.resolved_at = Some(at);
        Ok(())
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}' conf {:.0}% @ {:.2} ({})",
            self.strategy_name,
            self.signal_type,
            self.trigger_minute,
            self.confidence * 100.0,
            self.recommended_odds,
            self.result,
        )
    }
}

/// A resolved signal as consumed by batch recalibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalSignal {
    pub result: SignalResult,
    pub confidence: f64,
    pub trigger_minute: u32,
    pub threshold_used: f64,
    #[serde(default)]
    pub trigger_metrics: BTreeMap<String, f64>,
}

impl From<&Signal> for HistoricalSignal {
    fn from(signal: &Signal) -> Self {
        Self {
            result: signal.result(),
            confidence: signal.confidence(),
            trigger_minute: signal.trigger_minute,
            threshold_used: signal.threshold_used,
            trigger_metrics: signal.trigger_metrics.clone(),
        }
    }
}

/// Emitted once when a signal reaches a terminal result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionEvent {
    pub signal_id: Uuid,
    pub match_id: String,
    pub strategy_name: String,
    pub signal_type: SignalType,
    pub result: SignalResult,
    pub profit_loss: f64,
    pub resolved_at: DateTime<Utc>,
    /// True when settled by the staleness cutoff rather than match state.
    pub forced: bool,
    pub explanation: String,
}

impl fmt::Display for ResolutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} → {} ({:+.2}){}",
            self.strategy_name,
            self.signal_type,
            self.result,
            self.profit_loss,
            if self.forced { " [forced]" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Domain errors raised by the pipeline components.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid metrics for {strategy}: {message}")]
    InvalidMetrics { strategy: String, message: String },

    #[error("Strategy error ({strategy}): {message}")]
    Strategy { strategy: String, message: String },

    #[error("Insufficient samples for {strategy}: need {needed}, have {available}")]
    InsufficientSamples {
        strategy: String,
        needed: usize,
        available: usize,
    },

    #[error("Signal {0} is already settled")]
    AlreadySettled(Uuid),

    #[error("Signal {id} cannot be settled as {result}")]
    InvalidResolution { id: Uuid, result: SignalResult },

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
