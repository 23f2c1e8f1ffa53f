//! Default strategy catalogue.
//!
//! One builder per market family. Home/away markets come from a single
//! builder parametrised by [`Side`], so both sides always share the same
//! condition set. Primary thresholds can be overridden per strategy name
//! through [`SignalConfig::thresholds`].

use crate::metrics::MetricChange;
use crate::tracker::{ShiftKind, TrackedMetric};
use crate::types::{GoalLine, Side, SignalType};

use super::rules::{RuleInput, StakePolicy, StrategyRule, TimeDecay};
use super::SignalConfig;

/// Every built-in strategy.
pub fn default_rules(config: &SignalConfig) -> Vec<StrategyRule> {
    let mut rules = vec![
        over_2_5_goals(config),
        over_1_5_goals(config),
        over_3_5_goals(config),
        under_2_5_goals(config),
        btts_yes(config),
        btts_no(config),
        draw(config),
    ];
    for side in Side::BOTH {
        rules.push(match_winner(config, side));
        rules.push(next_goal(config, side));
        rules.push(late_goal(config, side));
        rules.push(team_to_score(config, side));
        rules.push(team_performance(config, side));
    }
    rules
}

fn attacks_metric(side: Side) -> TrackedMetric {
    match side {
        Side::Home => TrackedMetric::AttacksHome,
        Side::Away => TrackedMetric::AttacksAway,
    }
}

fn shots_metric(side: Side) -> TrackedMetric {
    match side {
        Side::Home => TrackedMetric::ShotsHome,
        Side::Away => TrackedMetric::ShotsAway,
    }
}

fn possession_gap(i: &RuleInput<'_>) -> f64 {
    (i.sample().possession_home - i.sample().possession_away).abs()
}

// ---------------------------------------------------------------------------
// Goal lines
// ---------------------------------------------------------------------------

/// High-tempo opening that points at three or more goals.
pub fn over_2_5_goals(config: &SignalConfig) -> StrategyRule {
    let name = "over_2_5_goals";
    let threshold = config.threshold_or(name, 2.8);

    StrategyRule::new(name, SignalType::Over(GoalLine::TwoAndHalf), "Over 2.5 goals")
        .minutes(10..=75)
        .gate("three goals already scored", |i| i.score().total() < 3)
        .min_conditions(7)
        .weight(0.82)
        .ceiling(0.90)
        .decay(TimeDecay::Linear { slope: 0.4, floor: 0.6 })
        .threshold(threshold)
        .odds(1.85)
        .condition("combined_dxg", move |i| i.metrics.combined_dxg() >= threshold)
        .condition("attack_volume", |i| i.sample().total_attacks() >= 25)
        .condition("shot_volume", |i| i.sample().total_shots() >= 12)
        .condition("dangerous_volume", |i| i.sample().total_dangerous() >= 8)
        .condition("legs_fresh", |i| i.metrics.max_fatigue() <= 0.6)
        .condition("both_threaten", |i| i.metrics.home.dxg.min(i.metrics.away.dxg) >= 0.5)
        .condition("shot_efficiency", |i| i.metrics.mean_shots_per_attack() >= 0.3)
        .condition("early_phase", |i| i.minute <= 30)
        .condition("momentum", |i| i.metrics.mean_momentum() >= 0.5)
        .condition("volatile", |i| i.metrics.volatility >= 0.4)
        .bonus("dxg_surge", 0.05, |i| i.metrics.combined_dxg() >= 3.2)
        .bonus("shot_barrage", 0.04, |i| i.sample().total_shots() >= 18)
        .bonus("early_pressure", 0.04, |i| i.minute <= 30 && i.sample().total_attacks() >= 15)
        .trigger("combined_dxg", |i| i.metrics.combined_dxg())
        .trigger("total_attacks", |i| i.sample().total_attacks() as f64)
        .trigger("total_shots", |i| i.sample().total_shots() as f64)
        .trigger("dangerous_total", |i| i.sample().total_dangerous() as f64)
        .trigger("momentum", |i| i.metrics.mean_momentum())
        .trigger("volatility", |i| i.metrics.volatility)
}

pub fn over_1_5_goals(config: &SignalConfig) -> StrategyRule {
    let name = "over_1_5_goals";
    let threshold = config.threshold_or(name, 1.8);

    StrategyRule::new(name, SignalType::Over(GoalLine::OneAndHalf), "Over 1.5 goals")
        .minutes(15..=70)
        .gate("two goals already scored", |i| i.score().total() < 2)
        .min_conditions(4)
        .weight(0.80)
        .ceiling(0.88)
        .decay(TimeDecay::Linear { slope: 0.5, floor: 0.5 })
        .threshold(threshold)
        .odds(1.25)
        .condition("combined_dxg", move |i| i.metrics.combined_dxg() >= threshold)
        .condition("shot_volume", |i| i.sample().total_shots() >= 8)
        .condition("dangerous_volume", |i| i.sample().total_dangerous() >= 6)
        .condition("shot_efficiency", |i| i.metrics.mean_shots_per_attack() >= 0.25)
        .condition("shots_trending", |i| i.trend_sum(TrackedMetric::TotalShots) >= 2.0)
        .condition("volatile", |i| i.metrics.volatility >= 0.3)
        .bonus("dxg_surge", 0.05, |i| i.metrics.combined_dxg() >= 2.5)
        .bonus("momentum_gain", 0.03, |i| i.has_shift(ShiftKind::Gain))
        .trigger("combined_dxg", |i| i.metrics.combined_dxg())
        .trigger("total_shots", |i| i.sample().total_shots() as f64)
        .trigger("shots_trend", |i| i.trend_sum(TrackedMetric::TotalShots))
}

/// Open, end-to-end game with at least one goal already in.
pub fn over_3_5_goals(config: &SignalConfig) -> StrategyRule {
    let name = "over_3_5_goals";
    let threshold = config.threshold_or(name, 3.5);

    StrategyRule::new(name, SignalType::Over(GoalLine::ThreeAndHalf), "Over 3.5 goals")
        .minutes(20..=65)
        .gate("four goals already scored", |i| i.score().total() < 4)
        .min_conditions(5)
        .weight(0.75)
        .ceiling(0.80)
        .decay(TimeDecay::Linear { slope: 0.6, floor: 0.4 })
        .threshold(threshold)
        .odds(3.20)
        .stake(StakePolicy::Scaled { offset: 0.0, cap: 0.75 })
        .condition("projected_total", move |i| {
            i.score().total() as f64 + i.metrics.combined_dxg() >= threshold
        })
        .condition("shot_volume", |i| i.sample().total_shots() >= 16)
        .condition("both_dangerous", |i| i.metrics.home.dxg >= 1.0 && i.metrics.away.dxg >= 1.0)
        .condition("volatile", |i| i.metrics.volatility >= 0.8)
        .condition("momentum", |i| i.metrics.mean_momentum() >= 0.8)
        .condition("goal_in", |i| i.score().total() >= 1)
        .bonus("goal_rush", 0.05, |i| i.score().total() >= 2)
        .trigger("projected_total", |i| i.score().total() as f64 + i.metrics.combined_dxg())
        .trigger("volatility", |i| i.metrics.volatility)
        .trigger("goals", |i| i.score().total() as f64)
}

/// Controlled, low-event match in the second half.
pub fn under_2_5_goals(config: &SignalConfig) -> StrategyRule {
    let name = "under_2_5_goals";
    let threshold = config.threshold_or(name, 1.2);

    StrategyRule::new(name, SignalType::Under(GoalLine::TwoAndHalf), "Under 2.5 goals")
        .minutes(30..=80)
        .gate("two goals already scored", |i| i.score().total() <= 1)
        .min_conditions(5)
        .weight(0.80)
        .ceiling(0.85)
        .decay(TimeDecay::Phased {
            bands: vec![(45, 0.85), (60, 1.0)],
            tail: 1.08,
        })
        .threshold(threshold)
        .odds(2.10)
        .condition("low_dxg", move |i| i.metrics.combined_dxg() <= threshold)
        .condition("few_shots", |i| i.sample().total_shots() <= 10)
        .condition("little_danger", |i| {
            i.sample().total_dangerous() as f64 / i.minute.max(1) as f64 <= 0.4
        })
        .condition("flat_momentum", |i| i.metrics.mean_momentum() <= 0.5)
        .condition("stable", |i| i.metrics.home.stability >= 0.6 && i.metrics.away.stability >= 0.6)
        .condition("calm", |i| i.metrics.volatility <= 1.0)
        .condition("shots_flat", |i| i.trend_sum(TrackedMetric::TotalShots) <= 1.0)
        .bonus("dxg_dead", 0.05, |i| i.metrics.combined_dxg() <= 0.8)
        .bonus("goalless", 0.03, |i| i.score().total() == 0)
        .trigger("combined_dxg", |i| i.metrics.combined_dxg())
        .trigger("total_shots", |i| i.sample().total_shots() as f64)
        .trigger("volatility", |i| i.metrics.volatility)
}

// ---------------------------------------------------------------------------
// Both teams to score
// ---------------------------------------------------------------------------

pub fn btts_yes(config: &SignalConfig) -> StrategyRule {
    let name = "btts_yes";
    let threshold = config.threshold_or(name, 0.8);

    StrategyRule::new(name, SignalType::BttsYes, "Both teams to score")
        .minutes(20..=75)
        .gate("both teams already scored", |i| i.score().home == 0 || i.score().away == 0)
        .min_conditions(5)
        .weight(0.75)
        .ceiling(0.82)
        .decay(TimeDecay::Linear { slope: 0.3, floor: 0.6 })
        .threshold(threshold)
        .odds(1.75)
        .condition("both_dxg", move |i| i.metrics.home.dxg.min(i.metrics.away.dxg) >= threshold)
        .condition("both_shooting", |i| i.sample().shots_home >= 3 && i.sample().shots_away >= 3)
        .condition("both_dangerous", |i| {
            i.sample().dangerous_attacks_home >= 4 && i.sample().dangerous_attacks_away >= 4
        })
        .condition("both_efficient", |i| {
            i.metrics.home.shots_per_attack >= 0.2 && i.metrics.away.shots_per_attack >= 0.2
        })
        .condition("both_pushing", |i| i.metrics.home.momentum.min(i.metrics.away.momentum) >= 0.3)
        .condition("balanced_possession", |i| possession_gap(i) <= 20.0)
        .condition("one_side_scored", |i| i.score().total() >= 1)
        .bonus("both_dxg_high", 0.05, |i| i.metrics.home.dxg.min(i.metrics.away.dxg) >= 1.2)
        .bonus("shot_exchange", 0.03, |i| i.sample().shots_home >= 6 && i.sample().shots_away >= 6)
        .trigger("dxg_home", |i| i.metrics.home.dxg)
        .trigger("dxg_away", |i| i.metrics.away.dxg)
        .trigger("possession_gap", possession_gap)
}

/// One side is doing all the attacking and the other offers nothing.
pub fn btts_no(config: &SignalConfig) -> StrategyRule {
    let name = "btts_no";
    let threshold = config.threshold_or(name, 0.5);

    StrategyRule::new(name, SignalType::BttsNo, "Both teams to score: no")
        .minutes(35..=80)
        .gate("both teams already scored", |i| i.score().home == 0 || i.score().away == 0)
        .min_conditions(5)
        .weight(0.78)
        .ceiling(0.84)
        .decay(TimeDecay::Phased {
            bands: vec![(45, 0.9)],
            tail: 1.05,
        })
        .threshold(threshold)
        .odds(2.20)
        .condition("weak_side_dxg", move |i| i.side(i.weaker_side()).dxg <= threshold)
        .condition("weak_side_shy", |i| i.sample().shots(i.weaker_side()) <= 2)
        .condition("weak_side_harmless", |i| i.sample().dangerous(i.weaker_side()) <= 5)
        .condition("possession_gap", |i| possession_gap(i) >= 15.0)
        .condition("weak_side_stalled", |i| i.side(i.weaker_side()).momentum <= 0.3)
        .condition("strong_side_steady", |i| i.side(i.weaker_side().opponent()).stability >= 0.6)
        .condition("weak_side_wasteful", |i| i.side(i.weaker_side()).shots_per_attack <= 0.15)
        .bonus("weak_side_dead", 0.05, |i| i.side(i.weaker_side()).dxg <= 0.25)
        .bonus("late", 0.03, |i| i.minute >= 65)
        .trigger("weak_side_dxg", |i| i.side(i.weaker_side()).dxg)
        .trigger("possession_gap", possession_gap)
}

// ---------------------------------------------------------------------------
// Match result
// ---------------------------------------------------------------------------

pub fn match_winner(config: &SignalConfig, side: Side) -> StrategyRule {
    let (signal_type, name, weight, ceiling, odds) = match side {
        Side::Home => (SignalType::HomeWin, "home_win", 0.72, 0.80, 1.95),
        Side::Away => (SignalType::AwayWin, "away_win", 0.68, 0.76, 3.20),
    };
    let threshold = config.threshold_or(name, 0.8);
    let opp = side.opponent();

    StrategyRule::new(name, signal_type, format!("{} team to win", capitalise(side)))
        .minutes(30..=85)
        .min_conditions(5)
        .weight(weight)
        .ceiling(ceiling)
        .decay(TimeDecay::Phased {
            bands: vec![(45, 0.9), (70, 1.0)],
            tail: 1.05,
        })
        .threshold(threshold)
        .odds(odds)
        .stake(StakePolicy::Scaled { offset: 0.1, cap: 1.0 })
        .condition("dxg_edge", move |i| i.side(side).dxg - i.side(opp).dxg >= threshold)
        .condition("not_behind", move |i| i.score().margin(side) >= 0)
        .condition("controls_ball", move |i| i.sample().possession(side) >= 55.0)
        .condition("outshooting", move |i| i.sample().shots(side) >= i.sample().shots(opp) + 4)
        .condition("more_danger", move |i| i.sample().dangerous(side) > i.sample().dangerous(opp))
        .condition("momentum_edge", move |i| i.side(side).momentum > i.side(opp).momentum)
        .condition("fitter", move |i| i.side(side).fatigue <= i.side(opp).fatigue + 0.1)
        .bonus("leading", 0.08, move |i| i.score().margin(side) >= 1)
        .bonus("dominant_dxg", 0.04, move |i| i.side(side).dxg - i.side(opp).dxg >= 1.5)
        .trigger("dxg_edge", move |i| i.side(side).dxg - i.side(opp).dxg)
        .trigger("margin", move |i| i.score().margin(side) as f64)
        .trigger("possession", move |i| i.sample().possession(side))
}

/// Evenly matched, low-event second half at level score.
pub fn draw(config: &SignalConfig) -> StrategyRule {
    let name = "draw";
    let threshold = config.threshold_or(name, 0.4);

    StrategyRule::new(name, SignalType::Draw, "Draw")
        .minutes(55..=85)
        .gate("margin too wide", |i| i.score().margin(Side::Home).abs() <= 1)
        .min_conditions(5)
        .weight(0.68)
        .ceiling(0.72)
        .decay(TimeDecay::Phased {
            bands: vec![(70, 0.92)],
            tail: 1.06,
        })
        .threshold(threshold)
        .odds(3.40)
        .stake(StakePolicy::Scaled { offset: 0.0, cap: 0.75 })
        .condition("level", |i| i.score().home == i.score().away)
        .condition("dxg_parity", move |i| (i.metrics.home.dxg - i.metrics.away.dxg).abs() <= threshold)
        .condition("low_dxg", |i| i.metrics.combined_dxg() <= 2.0)
        .condition("shared_ball", |i| possession_gap(i) <= 10.0)
        .condition("shot_parity", |i| i.sample().shots_home.abs_diff(i.sample().shots_away) <= 3)
        .condition("both_stable", |i| i.metrics.home.stability >= 0.6 && i.metrics.away.stability >= 0.6)
        .condition("momentum_parity", |i| (i.metrics.home.momentum - i.metrics.away.momentum).abs() <= 0.3)
        .bonus("late_stalemate", 0.05, |i| i.score().total() == 0 && i.minute >= 70)
        .trigger("dxg_gap", |i| (i.metrics.home.dxg - i.metrics.away.dxg).abs())
        .trigger("combined_dxg", |i| i.metrics.combined_dxg())
}

// ---------------------------------------------------------------------------
// Per-side goal markets
// ---------------------------------------------------------------------------

/// Sustained pressure from one side.
pub fn next_goal(config: &SignalConfig, side: Side) -> StrategyRule {
    let name = format!("next_goal_{side}");
    let threshold = config.threshold_or(&name, 1.0);
    let (weight, ceiling, odds) = match side {
        Side::Home => (0.72, 0.78, 1.65),
        Side::Away => (0.68, 0.74, 2.10),
    };
    let opp = side.opponent();

    StrategyRule::new(
        name,
        SignalType::NextGoal(side),
        format!("{} team to score next", capitalise(side)),
    )
    .minutes(15..=80)
    .min_conditions(5)
    .weight(weight)
    .ceiling(ceiling)
    .decay(TimeDecay::Phased {
        bands: vec![(15, 0.8)],
        tail: 1.0,
    })
    .threshold(threshold)
    .odds(odds)
    .stake(StakePolicy::Scaled { offset: 0.2, cap: 1.0 })
    .condition("dxg", move |i| i.side(side).dxg >= threshold)
    .condition("dxg_dominance", move |i| i.side(side).dxg >= 1.5 * i.side(opp).dxg)
    .condition("momentum", move |i| i.side(side).momentum >= 0.5)
    .condition("rising_shots", move |i| i.side(side).gradient > 0.0)
    .condition("attack_trend", move |i| i.trend_sum(attacks_metric(side)) >= 3.0)
    .condition("more_danger", move |i| i.sample().dangerous(side) >= i.sample().dangerous(opp) + 3)
    .condition("fresher", move |i| i.side(side).fatigue <= i.side(opp).fatigue)
    .bonus("dxg_spike", 0.05, move |i| {
        i.has_change(|c| matches!(c, MetricChange::DxgSpike { side: s, delta } if *s == side && *delta > 0.0))
    })
    .bonus("momentum_gain", 0.03, |i| i.has_shift(ShiftKind::Gain))
    .trigger("dxg", move |i| i.side(side).dxg)
    .trigger("momentum", move |i| i.side(side).momentum)
    .trigger("attack_trend", move |i| i.trend_sum(attacks_metric(side)))
}

/// Fresher side finishing strongly.
pub fn late_goal(config: &SignalConfig, side: Side) -> StrategyRule {
    let name = format!("late_goal_{side}");
    let threshold = config.threshold_or(&name, 0.1);
    let opp = side.opponent();

    StrategyRule::new(
        name,
        SignalType::LateGoal(side),
        format!("Late goal by {} team", side),
    )
    .minutes(65..=85)
    .min_conditions(4)
    .weight(0.75)
    .ceiling(0.80)
    .threshold(threshold)
    .odds(2.0)
    .condition("fatigue_edge", move |i| i.side(opp).fatigue - i.side(side).fatigue >= threshold)
    .condition("momentum", move |i| i.side(side).momentum >= 0.4)
    .condition("rising_shots", move |i| i.side(side).gradient >= 0.2)
    .condition("dxg", move |i| i.side(side).dxg >= 1.0)
    .condition("opponent_wobbling", move |i| i.side(opp).stability <= 0.75)
    .condition("shot_trend", move |i| i.trend_sum(shots_metric(side)) >= 1.0)
    .bonus("fatigue_advantage", 0.05, move |i| {
        i.has_change(|c| matches!(c, MetricChange::FatigueAdvantage { side: s, .. } if *s == side))
    })
    .trigger("fatigue_edge", move |i| i.side(opp).fatigue - i.side(side).fatigue)
    .trigger("momentum", move |i| i.side(side).momentum)
    .trigger("gradient", move |i| i.side(side).gradient)
}

/// Efficient attack that has not yet converted.
pub fn team_to_score(config: &SignalConfig, side: Side) -> StrategyRule {
    let name = format!("team_to_score_{side}");
    let threshold = config.threshold_or(&name, 0.35);

    StrategyRule::new(
        name,
        SignalType::TeamToScore(side),
        format!("{} team to score", capitalise(side)),
    )
    .minutes(25..=75)
    .gate("team already scored", move |i| i.score().goals(side) == 0)
    .min_conditions(4)
    .weight(0.78)
    .ceiling(0.82)
    .decay(TimeDecay::Linear { slope: 0.35, floor: 0.6 })
    .threshold(threshold)
    .odds(2.0)
    .condition("shot_efficiency", move |i| i.side(side).shots_per_attack >= threshold)
    .condition("shot_volume", move |i| i.sample().shots(side) >= 5)
    .condition("dxg", move |i| i.side(side).dxg >= 0.8)
    .condition("momentum", move |i| i.side(side).momentum >= 0.2)
    .condition("dangerous_volume", move |i| i.sample().dangerous(side) >= 8)
    .condition("shot_trend", move |i| i.trend_sum(shots_metric(side)) >= 1.0)
    .bonus("clinical", 0.04, move |i| i.side(side).shots_per_attack >= 0.5)
    .trigger("shots_per_attack", move |i| i.side(side).shots_per_attack)
    .trigger("dxg", move |i| i.side(side).dxg)
    .trigger("shots", move |i| i.sample().shots(side) as f64)
}

/// One side clearly on the up relative to the other.
pub fn team_performance(config: &SignalConfig, side: Side) -> StrategyRule {
    let name = format!("team_performance_{side}");
    let threshold = config.threshold_or(&name, 0.3);
    let opp = side.opponent();

    StrategyRule::new(
        name,
        SignalType::TeamPerformance(side),
        format!("{} team to outperform", capitalise(side)),
    )
    .minutes(20..=70)
    .min_conditions(4)
    .weight(0.74)
    .ceiling(0.78)
    .threshold(threshold)
    .odds(2.0)
    .condition("gradient", move |i| i.side(side).gradient >= threshold)
    .condition("gradient_edge", move |i| i.side(side).gradient > i.side(opp).gradient)
    .condition("momentum_edge", move |i| i.side(side).momentum > i.side(opp).momentum)
    .condition("steady", move |i| i.side(side).stability >= 0.5)
    .condition("attack_trend", move |i| i.trend_sum(attacks_metric(side)) >= 4.0)
    .condition("has_ball", move |i| i.sample().possession(side) >= 50.0)
    .bonus("gradient_jump", 0.04, move |i| {
        i.has_change(|c| matches!(c, MetricChange::GradientChange { side: s, delta } if *s == side && *delta > 0.0))
    })
    .trigger("gradient", move |i| i.side(side).gradient)
    .trigger("momentum", move |i| i.side(side).momentum)
    .trigger("attack_trend", move |i| i.trend_sum(attacks_metric(side)))
}

fn capitalise(side: Side) -> &'static str {
    match side {
        Side::Home => "Home",
        Side::Away => "Away",
    }
}
