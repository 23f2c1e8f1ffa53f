//! Signal engine: strategy registry and evaluation.
//!
//! Every strategy is a [`StrategyRule`] held in one registry. Evaluating a
//! strategy scores its conditions against the match's derived metrics and
//! context, applies the strategy's own minimum and the global confidence
//! floor, and builds a [`Signal`] carrying the evidence that triggered it.

pub mod catalog;
pub mod rules;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

use crate::metrics::stats::round_dp;
use crate::metrics::{DerivedMetrics, MetricChange};
use crate::tracker::{MetricTrend, MomentumShift, TrackedMetric};
use crate::types::{PipelineError, RawSample, Signal, SignalDraft};
pub use rules::{Assessment, RuleInput, Scored, StakePolicy, StrategyRule, TimeDecay};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Final confidence must be strictly above this to emit.
    pub confidence_floor: f64,
    /// Stake before the strategy's stake multiplier.
    pub base_stake: f64,
    /// Strategies left out of the registry.
    pub disabled: Vec<String>,
    /// Primary threshold per strategy name.
    pub thresholds: HashMap<String, f64>,
    /// Recommended odds per strategy name.
    pub odds: HashMap<String, f64>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.58,
            base_stake: 1.0,
            disabled: Vec::new(),
            thresholds: HashMap::new(),
            odds: HashMap::new(),
        }
    }
}

impl SignalConfig {
    pub fn threshold_or(&self, strategy: &str, default: f64) -> f64 {
        self.thresholds.get(strategy).copied().unwrap_or(default)
    }
}

// ---------------------------------------------------------------------------
// Match context
// ---------------------------------------------------------------------------

/// Per-match inputs besides the derived metrics.
#[derive(Debug, Clone)]
pub struct MatchContext {
    pub match_id: String,
    pub sample: RawSample,
    pub observed_at: DateTime<Utc>,
    pub trends: BTreeMap<TrackedMetric, MetricTrend>,
    pub shifts: Vec<MomentumShift>,
    pub changes: Vec<MetricChange>,
}

impl MatchContext {
    /// Context with no trend data.
    pub fn new(match_id: impl Into<String>, sample: RawSample, observed_at: DateTime<Utc>) -> Self {
        Self {
            match_id: match_id.into(),
            sample,
            observed_at,
            trends: BTreeMap::new(),
            shifts: Vec::new(),
            changes: Vec::new(),
        }
    }

    pub fn with_trends(
        mut self,
        trends: BTreeMap<TrackedMetric, MetricTrend>,
        shifts: Vec<MomentumShift>,
    ) -> Self {
        self.trends = trends;
        self.shifts = shifts;
        self
    }

    pub fn with_changes(mut self, changes: Vec<MetricChange>) -> Self {
        self.changes = changes;
        self
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Registry of strategy rules plus the global emission gate.
pub struct SignalEngine {
    config: SignalConfig,
    rules: Vec<StrategyRule>,
}

impl SignalEngine {
    /// Engine with the default strategy catalogue, minus disabled entries.
    pub fn new(config: SignalConfig) -> Self {
        let mut engine = Self::empty(config);
        for rule in catalog::default_rules(&engine.config) {
            if engine.config.disabled.iter().any(|d| *d == rule.name) {
                info!(strategy = %rule.name, "Strategy disabled by configuration");
                continue;
            }
            engine.register(rule);
        }
        engine
    }

    /// Engine with no strategies registered.
    pub fn empty(config: SignalConfig) -> Self {
        Self {
            config,
            rules: Vec::new(),
        }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Add a rule, replacing any rule with the same name. Configured odds
    /// overrides apply.
    pub fn register(&mut self, mut rule: StrategyRule) {
        if let Some(odds) = self.config.odds.get(&rule.name) {
            rule.odds = *odds;
        }
        match self.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn rule(&self, name: &str) -> Option<&StrategyRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate one strategy.
    ///
    /// `Ok(None)` when the strategy does not fire. Errors for an unknown
    /// strategy, non-finite metrics or a non-finite confidence.
    pub fn evaluate(
        &self,
        strategy: &str,
        metrics: &DerivedMetrics,
        context: &MatchContext,
        minute: u32,
    ) -> Result<Option<Signal>, PipelineError> {
        let rule = self
            .rule(strategy)
            .ok_or_else(|| PipelineError::UnknownStrategy(strategy.to_string()))?;

        if let Some(field) = metrics.first_non_finite() {
            return Err(PipelineError::InvalidMetrics {
                strategy: strategy.to_string(),
                message: format!("{field} is not finite"),
            });
        }

        let input = RuleInput::new(metrics, context, minute);
        let scored = match rule.assess(&input) {
            Assessment::Scored(scored) => scored,
            Assessment::Inactive(reason) => {
                debug!(strategy, match_id = %context.match_id, reason, "Strategy inactive");
                return Ok(None);
            }
            Assessment::BelowMinimum { met, required } => {
                debug!(strategy, match_id = %context.match_id, met, required, "Too few conditions met");
                return Ok(None);
            }
        };

        // f64::min hides a NaN raw score behind the ceiling, so check both.
        if !scored.raw.is_finite() || !scored.confidence.is_finite() {
            return Err(PipelineError::Strategy {
                strategy: strategy.to_string(),
                message: format!("confidence evaluated to {}", scored.raw),
            });
        }
        // The floor applies to the value the signal will carry.
        let confidence = round_dp(scored.confidence, 3);
        if confidence <= self.config.confidence_floor {
            debug!(
                strategy,
                match_id = %context.match_id,
                confidence = format!("{:.3}", confidence),
                floor = self.config.confidence_floor,
                "Below confidence floor"
            );
            return Ok(None);
        }

        let signal = self.build_signal(rule, &input, &scored, confidence);
        info!(
            strategy,
            match_id = %context.match_id,
            signal_type = %signal.signal_type,
            minute,
            met = format!("{}/{}", scored.conditions_met(), scored.total),
            confidence = format!("{:.1}%", signal.confidence() * 100.0),
            "Signal generated"
        );
        Ok(Some(signal))
    }

    /// Evaluate every registered strategy. A strategy that errors or panics
    /// is logged and skipped; the rest still run.
    pub fn evaluate_all(&self, metrics: &DerivedMetrics, context: &MatchContext, minute: u32) -> Vec<Signal> {
        let mut signals = Vec::new();
        for rule in &self.rules {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(&rule.name, metrics, context, minute)));
            match outcome {
                Ok(Ok(Some(signal))) => signals.push(signal),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    warn!(strategy = %rule.name, match_id = %context.match_id, error = %e, "Strategy evaluation failed, skipping");
                }
                Err(payload) => {
                    warn!(
                        strategy = %rule.name,
                        match_id = %context.match_id,
                        panic = panic_message(payload.as_ref()),
                        "Strategy panicked, skipping"
                    );
                }
            }
        }
        signals
    }

    fn build_signal(&self, rule: &StrategyRule, input: &RuleInput<'_>, scored: &Scored, confidence: f64) -> Signal {
        let stake_multiplier = round_dp(rule.stake.multiplier(confidence), 3);

        let mut reasoning = format!(
            "{}/{} conditions met: {}",
            scored.conditions_met(),
            scored.total,
            scored.met.join(", ")
        );
        if !scored.bonuses.is_empty() {
            reasoning.push_str(&format!("; bonuses: {}", scored.bonuses.join(", ")));
        }
        if scored.decay != 1.0 {
            reasoning.push_str(&format!("; time factor {:.2}", scored.decay));
        }

        let mut trigger_metrics = rule.trigger_metrics(input);
        trigger_metrics.insert("conditions_met".to_string(), scored.conditions_met() as f64);

        let draft = SignalDraft {
            strategy_name: rule.name.clone(),
            signal_type: rule.signal_type,
            prediction: rule.prediction.clone(),
            confidence,
            threshold_used: rule.threshold,
            reasoning,
            trigger_metrics,
            trigger_minute: input.minute,
            score_at_trigger: input.score(),
            recommended_odds: rule.odds,
            stake_multiplier,
            stake: round_dp(self.config.base_stake * stake_multiplier, 2),
        };
        Signal::new(input.context.match_id.clone(), draft, input.context.observed_at)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl Default for SignalEngine {
    fn default() -> Self {
        Self::new(SignalConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
