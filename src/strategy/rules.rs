//! Strategy rules as data.
//!
//! A [`StrategyRule`] is a list of named boolean conditions plus the
//! numbers that turn "how many held" into a confidence: a weight, additive
//! bonuses, a time-decay policy and a ceiling. One interpreter
//! ([`StrategyRule::assess`]) scores every market.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

use crate::metrics::{DerivedMetrics, MetricChange, SideMetrics};
use crate::tracker::{ShiftKind, TrackedMetric};
use crate::types::{RawSample, Score, Side, SignalType};

use super::MatchContext;

pub type Predicate = Box<dyn Fn(&RuleInput<'_>) -> bool + Send + Sync>;
pub type Extractor = Box<dyn Fn(&RuleInput<'_>) -> f64 + Send + Sync>;

// ---------------------------------------------------------------------------
// Rule input
// ---------------------------------------------------------------------------

/// Everything a condition may look at.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub metrics: &'a DerivedMetrics,
    pub context: &'a MatchContext,
    pub minute: u32,
}

impl<'a> RuleInput<'a> {
    pub fn new(metrics: &'a DerivedMetrics, context: &'a MatchContext, minute: u32) -> Self {
        Self {
            metrics,
            context,
            minute,
        }
    }

    pub fn sample(&self) -> &RawSample {
        &self.context.sample
    }

    pub fn score(&self) -> Score {
        self.context.sample.score()
    }

    pub fn side(&self, side: Side) -> &SideMetrics {
        self.metrics.side(side)
    }

    /// The side with the lower dxG (home on ties).
    pub fn weaker_side(&self) -> Side {
        if self.metrics.away.dxg < self.metrics.home.dxg {
            Side::Away
        } else {
            Side::Home
        }
    }

    /// Unnormalised windowed delta sum of a tracked metric, 0.0 when the
    /// match has no trend data yet.
    pub fn trend_sum(&self, metric: TrackedMetric) -> f64 {
        self.context
            .trends
            .get(&metric)
            .map_or(0.0, |t| t.current_average)
    }

    pub fn has_shift(&self, kind: ShiftKind) -> bool {
        self.context.shifts.iter().any(|s| s.kind == kind)
    }

    pub fn has_change(&self, predicate: impl Fn(&MetricChange) -> bool) -> bool {
        self.context.changes.iter().any(predicate)
    }
}

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

pub struct Condition {
    pub name: &'static str,
    check: Predicate,
}

impl Condition {
    pub fn holds(&self, input: &RuleInput<'_>) -> bool {
        (self.check)(input)
    }
}

pub struct Bonus {
    pub name: &'static str,
    pub amount: f64,
    check: Predicate,
}

/// How confidence scales with match time.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeDecay {
    None,
    /// max(floor, 1 − minute/90 × slope).
    Linear { slope: f64, floor: f64 },
    /// Step function: the first band whose upper minute bound exceeds the
    /// current minute wins, otherwise `tail`.
    Phased { bands: Vec<(u32, f64)>, tail: f64 },
}

impl TimeDecay {
    pub fn factor(&self, minute: u32) -> f64 {
        match self {
            TimeDecay::None => 1.0,
            TimeDecay::Linear { slope, floor } => (1.0 - minute as f64 / 90.0 * slope).max(*floor),
            TimeDecay::Phased { bands, tail } => bands
                .iter()
                .find(|(until, _)| minute < *until)
                .map_or(*tail, |(_, f)| *f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StakePolicy {
    Flat,
    /// min(cap, confidence + offset).
    Scaled { offset: f64, cap: f64 },
}

impl StakePolicy {
    pub fn multiplier(&self, confidence: f64) -> f64 {
        match self {
            StakePolicy::Flat => 1.0,
            StakePolicy::Scaled { offset, cap } => (confidence + offset).min(*cap).max(0.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Assessment
// ---------------------------------------------------------------------------

/// Result of scoring one rule against one input.
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    /// The rule does not apply right now (outside its minutes or gated).
    Inactive(&'static str),
    BelowMinimum { met: usize, required: usize },
    Scored(Scored),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub met: Vec<&'static str>,
    pub total: usize,
    pub bonuses: Vec<&'static str>,
    /// Ratio × weight + bonuses, before decay and ceiling.
    pub raw: f64,
    pub decay: f64,
    pub confidence: f64,
}

impl Scored {
    pub fn conditions_met(&self) -> usize {
        self.met.len()
    }
}

// ---------------------------------------------------------------------------
// StrategyRule
// ---------------------------------------------------------------------------

/// One market strategy.
pub struct StrategyRule {
    pub name: String,
    pub signal_type: SignalType,
    pub prediction: String,
    pub minutes: RangeInclusive<u32>,
    pub min_conditions: usize,
    pub weight: f64,
    pub decay: TimeDecay,
    pub ceiling: f64,
    /// Primary threshold recorded on emitted signals.
    pub threshold: f64,
    pub odds: f64,
    pub stake: StakePolicy,
    gate: Option<(&'static str, Predicate)>,
    conditions: Vec<Condition>,
    bonuses: Vec<Bonus>,
    triggers: Vec<(&'static str, Extractor)>,
}

impl StrategyRule {
    pub fn new(name: impl Into<String>, signal_type: SignalType, prediction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signal_type,
            prediction: prediction.into(),
            minutes: 0..=90,
            min_conditions: 1,
            weight: 1.0,
            decay: TimeDecay::None,
            ceiling: 1.0,
            threshold: 0.0,
            odds: 2.0,
            stake: StakePolicy::Flat,
            gate: None,
            conditions: Vec::new(),
            bonuses: Vec::new(),
            triggers: Vec::new(),
        }
    }

    pub fn minutes(mut self, minutes: RangeInclusive<u32>) -> Self {
        self.minutes = minutes;
        self
    }

    pub fn min_conditions(mut self, n: usize) -> Self {
        self.min_conditions = n;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn decay(mut self, decay: TimeDecay) -> Self {
        self.decay = decay;
        self
    }

    pub fn ceiling(mut self, ceiling: f64) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn odds(mut self, odds: f64) -> Self {
        self.odds = odds;
        self
    }

    pub fn stake(mut self, stake: StakePolicy) -> Self {
        self.stake = stake;
        self
    }

    /// Precondition that makes the market meaningless when false.
    pub fn gate(
        mut self,
        name: &'static str,
        check: impl Fn(&RuleInput<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.gate = Some((name, Box::new(check)));
        self
    }

    pub fn condition(
        mut self,
        name: &'static str,
        check: impl Fn(&RuleInput<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.conditions.push(Condition {
            name,
            check: Box::new(check),
        });
        self
    }

    pub fn bonus(
        mut self,
        name: &'static str,
        amount: f64,
        check: impl Fn(&RuleInput<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.bonuses.push(Bonus {
            name,
            amount,
            check: Box::new(check),
        });
        self
    }

    /// Value captured into the signal's trigger metrics.
    pub fn trigger(
        mut self,
        name: &'static str,
        extract: impl Fn(&RuleInput<'_>) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.triggers.push((name, Box::new(extract)));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn bonuses(&self) -> &[Bonus] {
        &self.bonuses
    }

    /// Score the rule. The minimum-conditions check runs before any bonus
    /// is looked at.
    pub fn assess(&self, input: &RuleInput<'_>) -> Assessment {
        if !self.minutes.contains(&input.minute) {
            return Assessment::Inactive("outside minute window");
        }
        if let Some((name, gate)) = &self.gate {
            if !gate(input) {
                return Assessment::Inactive(*name);
            }
        }

        let met: Vec<&'static str> = self
            .conditions
            .iter()
            .filter(|c| c.holds(input))
            .map(|c| c.name)
            .collect();
        if met.len() < self.min_conditions {
            return Assessment::BelowMinimum {
                met: met.len(),
                required: self.min_conditions,
            };
        }

        let total = self.conditions.len();
        let ratio = met.len() as f64 / total.max(1) as f64;
        let fired: Vec<&Bonus> = self.bonuses.iter().filter(|b| (b.check)(input)).collect();
        let raw = ratio * self.weight + fired.iter().map(|b| b.amount).sum::<f64>();
        let decay = self.decay.factor(input.minute);
        let confidence = (raw * decay).min(self.ceiling);

        Assessment::Scored(Scored {
            met,
            total,
            bonuses: fired.iter().map(|b| b.name).collect(),
            raw,
            decay,
            confidence,
        })
    }

    /// Snapshot of the rule's trigger values plus the minute.
    pub fn trigger_metrics(&self, input: &RuleInput<'_>) -> BTreeMap<String, f64> {
        let mut map: BTreeMap<String, f64> = self
            .triggers
            .iter()
            .map(|(name, extract)| (name.to_string(), extract(input)))
            .collect();
        map.insert("minute".to_string(), input.minute as f64);
        map
    }
}

impl fmt::Debug for StrategyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRule")
            .field("name", &self.name)
            .field("signal_type", &self.signal_type)
            .field("conditions", &self.conditions.iter().map(|c| c.name).collect::<Vec<_>>())
            .field("min_conditions", &self.min_conditions)
            .field("weight", &self.weight)
            .field("ceiling", &self.ceiling)
            .finish()
    }
}
