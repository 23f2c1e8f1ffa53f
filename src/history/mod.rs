//! Team history: pre-match goal-total expectations from finished results.
//!
//! Everything here is a pure function over [`HistoricalMatch`] records the
//! caller supplies. A team's recent results give its totals profile, form
//! and home/away split; the two teams' venue averages, blended with their
//! head-to-head average, give a predicted total that a logistic curve turns
//! into an over/under probability for a goal line.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::metrics::stats::{mean, ols_slope, population_std_dev, round_dp, safe_div};
use crate::types::GoalLine;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Only results newer than this count toward a team profile.
    pub lookback_days: i64,
    /// Most recent results kept per team.
    pub max_matches: usize,
    /// Most recent results used for form and trend.
    pub form_matches: usize,
    /// Most recent meetings used for head-to-head.
    pub head_to_head_matches: usize,
    /// Share of the predicted total taken from head-to-head when present.
    pub head_to_head_weight: f64,
    /// Logistic steepness applied to (predicted total − line).
    pub steepness: f64,
    pub min_probability: f64,
    pub max_probability: f64,
    /// A side is recommended only above this probability.
    pub recommend_above: f64,
    /// Slope magnitude separating a rising or falling trend from a flat one.
    pub trend_slope: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            max_matches: 20,
            form_matches: 5,
            head_to_head_matches: 5,
            head_to_head_weight: 0.3,
            steepness: 2.0,
            min_probability: 0.05,
            max_probability: 0.95,
            recommend_above: 0.6,
            trend_slope: 0.1,
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One finished match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMatch {
    pub home_team: String,
    pub away_team: String,
    pub home_goals: u32,
    pub away_goals: u32,
    pub played_at: DateTime<Utc>,
}

impl HistoricalMatch {
    pub fn total_goals(&self) -> u32 {
        self.home_goals.saturating_add(self.away_goals)
    }

    fn is_home(&self, team: &str) -> bool {
        self.home_team.eq_ignore_ascii_case(team)
    }

    fn involves(&self, team: &str) -> bool {
        self.is_home(team) || self.away_team.eq_ignore_ascii_case(team)
    }

    /// (scored, conceded) from `team`'s point of view.
    fn goals_for(&self, team: &str) -> (u32, u32) {
        if self.is_home(team) {
            (self.home_goals, self.away_goals)
        } else {
            (self.away_goals, self.home_goals)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryTrend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl fmt::Display for HistoryTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HistoryTrend::Increasing => "increasing",
            HistoryTrend::Decreasing => "decreasing",
            HistoryTrend::Stable => "stable",
            HistoryTrend::InsufficientData => "insufficient data",
        };
        f.write_str(label)
    }
}

/// Distribution of match totals. Percentages are 0–100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalsProfile {
    pub matches: usize,
    pub average_total: f64,
    pub over_1_5_pct: f64,
    pub over_2_5_pct: f64,
    pub over_3_5_pct: f64,
    pub under_2_5_pct: f64,
    /// Trend of the most recent totals, oldest first.
    pub trend: HistoryTrend,
    /// 1 / (1 + variance); 0.0 with fewer than two matches.
    pub consistency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentForm {
    pub matches: usize,
    pub avg_scored: f64,
    pub avg_conceded: f64,
    pub avg_total_involved: f64,
    pub scoring_trend: HistoryTrend,
    pub defensive_trend: HistoryTrend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueSplit {
    pub home_matches: usize,
    pub away_matches: usize,
    pub home_avg_total: f64,
    pub away_avg_total: f64,
    pub home_over_2_5_pct: f64,
    pub away_over_2_5_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamHistory {
    pub team: String,
    pub profile: TotalsProfile,
    pub form: RecentForm,
    pub venue: VenueSplit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadToHead {
    pub matches: usize,
    pub average_total: f64,
    pub over_2_5_pct: f64,
    /// Totals of the meetings, newest first.
    pub totals: Vec<u32>,
    pub trend: HistoryTrend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalsRecommendation {
    Over,
    Under,
    NoBet,
}

/// Evidence that supports trusting a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceFactor {
    AmpleTeamHistory,
    ConsistentTeams,
    HeadToHeadDepth,
    AttackingForm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalsPrediction {
    pub home: TeamHistory,
    pub away: TeamHistory,
    pub head_to_head: Option<HeadToHead>,
    pub line: f64,
    pub predicted_total: f64,
    pub over_probability: f64,
    pub under_probability: f64,
    pub recommendation: TotalsRecommendation,
    /// max(over, under).
    pub confidence: f64,
    pub factors: Vec<ConfidenceFactor>,
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

const AMPLE_HISTORY: usize = 10;
const CONSISTENT: f64 = 0.7;
const H2H_DEPTH: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct HistoryAnalyzer {
    config: HistoryConfig,
}

impl HistoryAnalyzer {
    pub fn new(config: HistoryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Profile of `team` from its results inside the lookback window.
    /// `None` when it has none.
    pub fn analyze_team(&self, team: &str, matches: &[HistoricalMatch], now: DateTime<Utc>) -> Option<TeamHistory> {
        let since = now - Duration::days(self.config.lookback_days.max(0));
        let mut recent: Vec<&HistoricalMatch> = matches
            .iter()
            .filter(|m| m.involves(team) && m.played_at >= since && m.played_at <= now)
            .collect();
        if recent.is_empty() {
            debug!(team, "No recent results");
            return None;
        }
        recent.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        recent.truncate(self.config.max_matches.max(1));

        Some(TeamHistory {
            team: team.to_string(),
            profile: self.totals_profile(&recent),
            form: self.recent_form(team, &recent),
            venue: venue_split(team, &recent),
        })
    }

    /// Most recent meetings between the two teams, either venue.
    pub fn head_to_head(&self, home: &str, away: &str, matches: &[HistoricalMatch]) -> Option<HeadToHead> {
        let mut meetings: Vec<&HistoricalMatch> = matches
            .iter()
            .filter(|m| m.involves(home) && m.involves(away))
            .collect();
        if meetings.is_empty() {
            return None;
        }
        meetings.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        meetings.truncate(self.config.head_to_head_matches.max(1));

        let totals: Vec<u32> = meetings.iter().map(|m| m.total_goals()).collect();
        let values: Vec<f64> = totals.iter().map(|&t| t as f64).collect();
        Some(HeadToHead {
            matches: totals.len(),
            average_total: round_dp(mean(&values), 2),
            over_2_5_pct: share_over(&totals, GoalLine::TwoAndHalf),
            trend: self.trend(&chronological(&values)),
            totals,
        })
    }

    /// Over/under expectation for `line` in an upcoming home v away match.
    /// `None` unless both teams have recent results.
    pub fn predict_totals(
        &self,
        home: &str,
        away: &str,
        matches: &[HistoricalMatch],
        line: GoalLine,
        now: DateTime<Utc>,
    ) -> Option<TotalsPrediction> {
        let home_history = self.analyze_team(home, matches, now)?;
        let away_history = self.analyze_team(away, matches, now)?;
        let head_to_head = self.head_to_head(home, away, matches);

        // Home side at home, away side away; overall average without venue data.
        let home_avg = if home_history.venue.home_matches > 0 {
            home_history.venue.home_avg_total
        } else {
            home_history.profile.average_total
        };
        let away_avg = if away_history.venue.away_matches > 0 {
            away_history.venue.away_avg_total
        } else {
            away_history.profile.average_total
        };

        let mut predicted = (home_avg + away_avg) / 2.0;
        if let Some(h2h) = &head_to_head {
            let w = self.config.head_to_head_weight.clamp(0.0, 1.0);
            predicted = predicted * (1.0 - w) + h2h.average_total * w;
        }

        let over = round_dp(self.over_probability(predicted, line.value()), 3);
        let under = round_dp(1.0 - over, 3);
        let recommendation = if over > self.config.recommend_above {
            TotalsRecommendation::Over
        } else if under > self.config.recommend_above {
            TotalsRecommendation::Under
        } else {
            TotalsRecommendation::NoBet
        };
        let factors = confidence_factors(&home_history, &away_history, head_to_head.as_ref());

        debug!(
            home,
            away,
            line = line.value(),
            predicted = format!("{predicted:.2}"),
            over,
            recommendation = ?recommendation,
            "Totals predicted from history"
        );

        Some(TotalsPrediction {
            home: home_history,
            away: away_history,
            head_to_head,
            line: line.value(),
            predicted_total: round_dp(predicted, 2),
            over_probability: over,
            under_probability: under,
            recommendation,
            confidence: over.max(under),
            factors,
        })
    }

    /// Logistic in (predicted − line), clamped to the configured band.
    pub fn over_probability(&self, predicted_total: f64, line: f64) -> f64 {
        let p = 1.0 / (1.0 + (-self.config.steepness * (predicted_total - line)).exp());
        if p.is_finite() {
            p.clamp(self.config.min_probability, self.config.max_probability)
        } else {
            self.config.min_probability
        }
    }

    /// Rising, falling or flat by OLS slope. Needs two values.
    pub fn trend(&self, values: &[f64]) -> HistoryTrend {
        if values.len() < 2 {
            return HistoryTrend::InsufficientData;
        }
        let slope = ols_slope(values);
        if slope > self.config.trend_slope {
            HistoryTrend::Increasing
        } else if slope < -self.config.trend_slope {
            HistoryTrend::Decreasing
        } else {
            HistoryTrend::Stable
        }
    }

    fn totals_profile(&self, recent: &[&HistoricalMatch]) -> TotalsProfile {
        let totals: Vec<u32> = recent.iter().map(|m| m.total_goals()).collect();
        let values: Vec<f64> = totals.iter().map(|&t| t as f64).collect();
        let form: Vec<f64> = values.iter().take(self.config.form_matches).copied().collect();

        TotalsProfile {
            matches: totals.len(),
            average_total: round_dp(mean(&values), 2),
            over_1_5_pct: share_over(&totals, GoalLine::OneAndHalf),
            over_2_5_pct: share_over(&totals, GoalLine::TwoAndHalf),
            over_3_5_pct: share_over(&totals, GoalLine::ThreeAndHalf),
            under_2_5_pct: round_dp(100.0 - share_over(&totals, GoalLine::TwoAndHalf), 1),
            trend: self.trend(&chronological(&form)),
            consistency: consistency(&values),
        }
    }

    fn recent_form(&self, team: &str, recent: &[&HistoricalMatch]) -> RecentForm {
        let (scored, conceded): (Vec<f64>, Vec<f64>) = recent
            .iter()
            .take(self.config.form_matches)
            .map(|m| {
                let (s, c) = m.goals_for(team);
                (s as f64, c as f64)
            })
            .unzip();
        let avg_scored = mean(&scored);
        let avg_conceded = mean(&conceded);

        RecentForm {
            matches: scored.len(),
            avg_scored: round_dp(avg_scored, 2),
            avg_conceded: round_dp(avg_conceded, 2),
            avg_total_involved: round_dp(avg_scored + avg_conceded, 2),
            scoring_trend: self.trend(&chronological(&scored)),
            defensive_trend: self.trend(&chronological(&conceded)),
        }
    }
}

fn venue_split(team: &str, recent: &[&HistoricalMatch]) -> VenueSplit {
    let (home, away): (Vec<&HistoricalMatch>, Vec<&HistoricalMatch>) = recent.iter().copied().partition(|m| m.is_home(team));
    let home_totals: Vec<u32> = home.iter().map(|m| m.total_goals()).collect();
    let away_totals: Vec<u32> = away.iter().map(|m| m.total_goals()).collect();
    let avg = |t: &[u32]| round_dp(mean(&t.iter().map(|&v| v as f64).collect::<Vec<_>>()), 2);

    VenueSplit {
        home_matches: home_totals.len(),
        away_matches: away_totals.len(),
        home_avg_total: avg(&home_totals),
        away_avg_total: avg(&away_totals),
        home_over_2_5_pct: share_over(&home_totals, GoalLine::TwoAndHalf),
        away_over_2_5_pct: share_over(&away_totals, GoalLine::TwoAndHalf),
    }
}

fn confidence_factors(home: &TeamHistory, away: &TeamHistory, h2h: Option<&HeadToHead>) -> Vec<ConfidenceFactor> {
    let mut factors = Vec::new();
    if home.profile.matches >= AMPLE_HISTORY && away.profile.matches >= AMPLE_HISTORY {
        factors.push(ConfidenceFactor::AmpleTeamHistory);
    }
    if home.profile.consistency > CONSISTENT && away.profile.consistency > CONSISTENT {
        factors.push(ConfidenceFactor::ConsistentTeams);
    }
    if h2h.is_some_and(|h| h.matches >= H2H_DEPTH) {
        factors.push(ConfidenceFactor::HeadToHeadDepth);
    }
    if home.form.scoring_trend == HistoryTrend::Increasing || away.form.scoring_trend == HistoryTrend::Increasing {
        factors.push(ConfidenceFactor::AttackingForm);
    }
    factors
}

/// Percentage of totals strictly above the line, 1 decimal.
fn share_over(totals: &[u32], line: GoalLine) -> f64 {
    let over = totals.iter().filter(|&&t| line.exceeded_by(t)).count();
    round_dp(safe_div(over as f64 * 100.0, totals.len() as f64), 1)
}

/// 1 / (1 + population variance), 3 decimals.
fn consistency(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sd = population_std_dev(values);
    round_dp(1.0 / (1.0 + sd * sd), 3)
}

/// Newest-first slice reversed to oldest-first.
fn chronological(values: &[f64]) -> Vec<f64> {
    values.iter().rev().copied().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
