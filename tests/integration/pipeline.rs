//! Full-cycle scenarios against the match monitor.

use anyhow::anyhow;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use pitchwatch::engine::monitor::Pipeline;
use pitchwatch::engine::replay::ReplayFeed;
use pitchwatch::engine::{LiveMatch, MatchMonitor, MonitorConfig};
use pitchwatch::resolver::OutcomeResolver;
use pitchwatch::storage;
use pitchwatch::strategy::{catalog, SignalConfig, SignalEngine, StrategyRule};
use pitchwatch::tracker::{EvictionReason, ShiftKind};
use pitchwatch::types::{GoalLine, MatchState, RawSample, Score, Signal, SignalDraft, SignalResult, SignalType};

use crate::mock_feed::{high_tempo_sample, live, MockFeed, MockSink, RecordingSink, ScriptedFeed};

fn kickoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 15, 0, 0).unwrap()
}

fn at(minutes: i64) -> DateTime<Utc> {
    kickoff() + Duration::minutes(minutes)
}

/// One-condition rule that fires on shot volume alone, so scenarios do not
/// depend on the derived-metric formulas.
fn shot_pressure_rule() -> StrategyRule {
    StrategyRule::new("shot_pressure", SignalType::Over(GoalLine::TwoAndHalf), "Over 2.5 goals")
        .minutes(10..=80)
        .weight(0.8)
        .threshold(10.0)
        .odds(2.0)
        .condition("shot_volume", |i| i.sample().total_shots() >= 10)
        .trigger("total_shots", |i| i.sample().total_shots() as f64)
}

fn shot_pressure_pipeline() -> Pipeline {
    let mut signals = SignalEngine::empty(SignalConfig::default());
    signals.register(shot_pressure_rule());
    Pipeline {
        signals,
        ..Pipeline::default()
    }
}

fn busy_sample(minute: u32, home_score: u32, away_score: u32) -> RawSample {
    RawSample {
        minute,
        home_score,
        away_score,
        shots_home: 7,
        shots_away: 5,
        attacks_home: 25,
        attacks_away: 20,
        ..RawSample::default()
    }
}

fn make_monitor(pipeline: Pipeline, feed: &ScriptedFeed, sink: &RecordingSink) -> MatchMonitor {
    MatchMonitor::new(
        MonitorConfig::default(),
        pipeline,
        Arc::new(feed.clone()),
        Arc::new(sink.clone()),
    )
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_high_tempo_opening_emits_over_2_5() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    feed.push_poll(vec![live("derby", high_tempo_sample(22))]);

    let config = MonitorConfig {
        min_emit_confidence: 0.5,
        ..MonitorConfig::default()
    };
    let mut monitor = MatchMonitor::new(
        config,
        Pipeline::default(),
        Arc::new(feed.clone()),
        Arc::new(sink.clone()),
    );

    let report = monitor.run_cycle(at(22)).await.unwrap();
    assert_eq!(report.matches_seen, 1);
    assert_eq!(report.matches_analysed, 1);
    assert!(report.signals_emitted >= 1);

    let emitted = sink.emitted();
    let over = emitted
        .iter()
        .find(|s| s.strategy_name == "over_2_5_goals")
        .expect("over 2.5 should be emitted");
    assert_eq!(over.match_id, "derby");
    assert_eq!(over.trigger_minute, 22);
    assert_eq!(over.created_at, at(22));
    assert!(over.reasoning.contains("No historical data available"));
    assert!(monitor.pending().iter().any(|s| s.id == over.id));
}

#[tokio::test]
async fn test_outside_window_is_tracked_but_not_analysed() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    feed.push_poll(vec![live("early", busy_sample(5, 0, 0)), live("late", busy_sample(88, 0, 0))]);

    let mut monitor = make_monitor(shot_pressure_pipeline(), &feed, &sink);
    let report = monitor.run_cycle(at(0)).await.unwrap();

    assert_eq!(report.matches_analysed, 0);
    assert_eq!(report.skipped_outside_window, 2);
    assert!(sink.emitted().is_empty());
    assert!(monitor.tracker().contains("early"));
    assert!(monitor.tracker().contains("late"));
}

#[tokio::test]
async fn test_duplicate_signal_suppressed_across_cycles() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    feed.push_poll(vec![live("m1", busy_sample(30, 0, 0))]);
    feed.push_poll(vec![live("m1", busy_sample(31, 0, 0))]);

    let mut monitor = make_monitor(shot_pressure_pipeline(), &feed, &sink);

    let first = monitor.run_cycle(at(0)).await.unwrap();
    assert_eq!(first.signals_emitted, 1);

    let second = monitor.run_cycle(at(1)).await.unwrap();
    assert_eq!(second.signals_generated, 1);
    assert_eq!(second.signals_emitted, 0);
    assert_eq!(second.suppressed_duplicates, 1);

    assert_eq!(monitor.pending().len(), 1);
    assert_eq!(sink.emitted().len(), 1);
}

#[tokio::test]
async fn test_poll_inside_tick_interval_is_skipped() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    feed.push_poll(vec![live("m1", busy_sample(30, 0, 0))]);
    feed.push_poll(vec![live("m1", busy_sample(30, 0, 0))]);

    let mut monitor = make_monitor(shot_pressure_pipeline(), &feed, &sink);
    monitor.run_cycle(at(0)).await.unwrap();

    let report = monitor.run_cycle(at(0) + Duration::seconds(20)).await.unwrap();
    assert_eq!(report.skipped_interval, 1);
    assert_eq!(report.matches_analysed, 0);
    assert_eq!(monitor.tracker().tick_count("m1"), 1);
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_goal_line_settles_with_profit() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    feed.push_poll(vec![live("m1", busy_sample(30, 0, 0))]);
    feed.push_poll(vec![live("m1", busy_sample(40, 2, 1))]);

    let mut monitor = make_monitor(shot_pressure_pipeline(), &feed, &sink);
    monitor.run_cycle(at(0)).await.unwrap();
    let report = monitor.run_cycle(at(10)).await.unwrap();

    assert_eq!(report.signals_resolved, 1);
    assert_eq!(report.wins, 1);
    assert_eq!(report.realised_pnl, 1.0);
    assert_eq!(report.pending, 0);

    let events = sink.resolved();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result, SignalResult::Win);
    assert_eq!(events[0].profit_loss, 1.0);
    assert!(!events[0].forced);

    assert!(monitor.pending().is_empty());
    assert_eq!(monitor.settled().len(), 1);
    assert_eq!(monitor.settled()[0].resolved_at(), Some(at(10)));
}

#[tokio::test]
async fn test_full_time_loss_from_feed_state() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    feed.push_poll(vec![live("m1", busy_sample(30, 0, 0))]);

    let mut monitor = make_monitor(shot_pressure_pipeline(), &feed, &sink);
    monitor.run_cycle(at(0)).await.unwrap();

    // Match drops off the live list; the feed still knows the final score.
    feed.set_state("m1", MatchState::finished(1, 0));
    let report = monitor.run_cycle(at(70)).await.unwrap();

    assert_eq!(report.losses, 1);
    assert_eq!(report.realised_pnl, -1.0);
    let events = sink.resolved();
    assert_eq!(events[0].result, SignalResult::Loss);
    assert_eq!(events[0].profit_loss, -1.0);
}

#[tokio::test]
async fn test_stale_signal_forced_loss() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    feed.push_poll(vec![live("m1", busy_sample(30, 0, 0))]);

    let mut monitor = make_monitor(shot_pressure_pipeline(), &feed, &sink);
    monitor.run_cycle(at(0)).await.unwrap();

    let report = monitor.run_cycle(at(7 * 60)).await.unwrap();
    assert_eq!(report.forced_losses, 1);
    assert_eq!(report.losses, 1);

    let events = sink.resolved();
    assert_eq!(events.len(), 1);
    assert!(events[0].forced);
    assert_eq!(events[0].profit_loss, -1.0);
    assert!(events[0].explanation.contains("forced loss"));
}

#[tokio::test]
async fn test_finished_match_settles_and_leaves_tracker() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    feed.push_poll(vec![live("m1", busy_sample(30, 0, 0))]);
    feed.push_poll(vec![LiveMatch {
        match_id: "m1".to_string(),
        state: MatchState::finished(3, 1),
        sample: busy_sample(90, 3, 1),
    }]);

    let mut monitor = make_monitor(shot_pressure_pipeline(), &feed, &sink);
    monitor.run_cycle(at(0)).await.unwrap();
    assert!(monitor.tracker().contains("m1"));

    let report = monitor.run_cycle(at(65)).await.unwrap();
    assert_eq!(report.wins, 1);
    assert_eq!(report.matches_analysed, 0);
    assert!(report
        .evicted
        .iter()
        .any(|(id, reason)| id == "m1" && *reason == EvictionReason::FullTime));
    assert!(!monitor.tracker().contains("m1"));
}

// ---------------------------------------------------------------------------
// Failure paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_feed_error_fails_cycle() {
    let mut feed = MockFeed::new();
    feed.expect_live_matches().returning(|| Err(anyhow!("connection reset")));
    feed.expect_name().return_const("failing".to_string());

    let mut monitor = MatchMonitor::new(
        MonitorConfig::default(),
        Pipeline::default(),
        Arc::new(feed),
        Arc::new(RecordingSink::new()),
    );

    let err = monitor.run_cycle(at(0)).await.unwrap_err();
    assert!(err.to_string().contains("failing"));
    assert_eq!(monitor.cycle_count(), 0);
}

#[tokio::test]
async fn test_sink_failures_do_not_stop_cycle() {
    let feed = ScriptedFeed::new();
    feed.push_poll(vec![live("m1", busy_sample(30, 0, 0))]);

    let mut sink = MockSink::new();
    sink.expect_signal_emitted()
        .times(1)
        .returning(|_| Err(anyhow!("webhook down")));

    let mut monitor = MatchMonitor::new(
        MonitorConfig::default(),
        shot_pressure_pipeline(),
        Arc::new(feed),
        Arc::new(sink),
    );

    let report = monitor.run_cycle(at(0)).await.unwrap();
    assert_eq!(report.signals_emitted, 1);
    assert_eq!(report.sink_failures, 1);
    assert_eq!(monitor.pending().len(), 1);
}

// ---------------------------------------------------------------------------
// Recalibration and persistence
// ---------------------------------------------------------------------------

fn resolved_history(count: usize) -> Vec<Signal> {
    let resolver = OutcomeResolver::default();
    (0..count)
        .map(|i| {
            let mut signal = Signal::new(
                format!("hist-{i}"),
                SignalDraft {
                    strategy_name: "shot_pressure".to_string(),
                    signal_type: SignalType::Over(GoalLine::TwoAndHalf),
                    prediction: "Over 2.5 goals".to_string(),
                    confidence: 0.8,
                    threshold_used: 10.0,
                    reasoning: String::new(),
                    trigger_metrics: BTreeMap::from([("total_shots".to_string(), 10.0 + (i % 5) as f64)]),
                    trigger_minute: 30 + (i % 20) as u32,
                    score_at_trigger: Score::default(),
                    recommended_odds: 2.0,
                    stake_multiplier: 1.0,
                    stake: 1.0,
                },
                at(0),
            );
            let final_state = if i % 4 == 0 { MatchState::finished(1, 0) } else { MatchState::finished(2, 1) };
            resolver.resolve(&mut signal, Some(&final_state), at(100));
            signal
        })
        .collect()
}

#[tokio::test]
async fn test_recalibration_feeds_adjustment() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    feed.push_poll(vec![live("m1", busy_sample(30, 0, 0))]);

    let mut monitor = make_monitor(shot_pressure_pipeline(), &feed, &sink);

    let reports = monitor.recalibrate(&resolved_history(40), at(0));
    let report = reports["shot_pressure"].as_ref().unwrap();
    assert_eq!(report.stats.total, 40);
    assert_eq!(report.stats.wins, 30);
    assert_eq!(report.stats.win_rate, 0.75);
    assert!(report.previous_win_rate.is_none());

    monitor.run_cycle(at(0)).await.unwrap();
    let emitted = sink.emitted();
    assert_eq!(emitted.len(), 1);
    assert!(emitted[0].reasoning.contains("Historical adjustment (40 samples"));
    assert!((0.1..=0.95).contains(&emitted[0].confidence()));
}

#[tokio::test]
async fn test_recalibration_refuses_thin_history() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    let monitor = make_monitor(shot_pressure_pipeline(), &feed, &sink);

    let reports = monitor.recalibrate(&resolved_history(10), at(0));
    assert!(reports["shot_pressure"].is_err());
    assert!(!monitor.adjuster().has_stats("shot_pressure"));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    feed.push_poll(vec![live("m1", busy_sample(30, 0, 0))]);

    let mut monitor = make_monitor(shot_pressure_pipeline(), &feed, &sink);
    monitor.recalibrate(&resolved_history(40), at(0));
    monitor.run_cycle(at(0)).await.unwrap();

    let mut path = std::env::temp_dir();
    path.push(format!("pitchwatch_integration_{}.json", uuid::Uuid::new_v4()));
    let path = path.to_string_lossy().to_string();
    storage::save_state(&monitor.state(at(1)), Some(&path)).unwrap();

    // Fresh process: new monitor, same feed script continues.
    let restored_sink = RecordingSink::new();
    let mut restored = make_monitor(shot_pressure_pipeline(), &feed, &restored_sink);
    restored.restore(storage::load_state(Some(&path)).unwrap().unwrap());

    assert_eq!(restored.cycle_count(), 1);
    assert_eq!(restored.pending().len(), 1);
    assert_eq!(restored.pending()[0].id, monitor.pending()[0].id);
    assert!(restored.adjuster().has_stats("shot_pressure"));

    feed.push_poll(vec![live("m1", busy_sample(45, 2, 2))]);
    let report = restored.run_cycle(at(15)).await.unwrap();
    assert_eq!(report.cycle_number, 2);
    assert_eq!(report.wins, 1);
    assert_eq!(restored_sink.resolved()[0].signal_id, monitor.pending()[0].id);
    assert_eq!(feed.polls_left(), 0);

    storage::delete_state(Some(&path)).unwrap();
}

// ---------------------------------------------------------------------------
// Trends, catalog rules and recorded feeds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_momentum_gain_reaches_strategy() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    // Total attacks 30 → 28 → 26 → 30: deltas -2, -2, +4.
    for (i, attacks) in [30, 28, 26, 30].iter().enumerate() {
        let sample = RawSample {
            minute: 30 + i as u32,
            attacks_home: *attacks,
            ..RawSample::default()
        };
        feed.push_poll(vec![live("m1", sample)]);
    }

    let mut signals = SignalEngine::empty(SignalConfig::default());
    signals.register(
        StrategyRule::new("comeback_pressure", SignalType::Over(GoalLine::OneAndHalf), "Over 1.5 goals")
            .weight(0.8)
            .condition("momentum_gain", |i| i.has_shift(ShiftKind::Gain)),
    );
    let pipeline = Pipeline {
        signals,
        ..Pipeline::default()
    };
    let mut monitor = make_monitor(pipeline, &feed, &sink);

    for minute in 0..3 {
        let report = monitor.run_cycle(at(minute)).await.unwrap();
        assert_eq!(report.signals_generated, 0, "no shift yet at cycle {minute}");
    }
    let report = monitor.run_cycle(at(3)).await.unwrap();
    assert_eq!(report.signals_emitted, 1);

    let emitted = sink.emitted();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].strategy_name, "comeback_pressure");
    assert_eq!(emitted[0].trigger_minute, 33);
}

#[tokio::test]
async fn test_catalog_under_loses_once_line_is_passed() {
    let feed = ScriptedFeed::new();
    let sink = RecordingSink::new();
    let quiet = RawSample {
        minute: 60,
        ..RawSample::default()
    };
    feed.push_poll(vec![live("m1", quiet)]);
    feed.push_poll(vec![live(
        "m1",
        RawSample {
            minute: 70,
            home_score: 2,
            away_score: 1,
            ..RawSample::default()
        },
    )]);

    let config = SignalConfig::default();
    let mut signals = SignalEngine::empty(config.clone());
    signals.register(catalog::under_2_5_goals(&config));
    let pipeline = Pipeline {
        signals,
        ..Pipeline::default()
    };
    let mut monitor = make_monitor(pipeline, &feed, &sink);

    let first = monitor.run_cycle(at(0)).await.unwrap();
    assert_eq!(first.signals_emitted, 1);
    let under = sink.emitted()[0].clone();
    assert_eq!(under.strategy_name, "under_2_5_goals");
    assert_eq!(under.signal_type, SignalType::Under(GoalLine::TwoAndHalf));

    let second = monitor.run_cycle(at(10)).await.unwrap();
    assert_eq!(second.losses, 1);
    assert_eq!(second.signals_generated, 0);

    let events = sink.resolved();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result, SignalResult::Loss);
    assert_eq!(events[0].profit_loss, -under.stake());
    assert!(!events[0].forced);
}

#[tokio::test]
async fn test_recorded_replay_runs_through_cycles() {
    const RECORDED: &str = r#"[
        [{"match_id": "R", "sample": {"minute": 30, "shots_home": 7, "shots_away": "5", "attacks_home": 25, "attacks_away": 20}}],
        [{"match_id": "R", "sample": {"minute": 40, "home_score": 2, "away_score": "1", "shots_home": 8, "shots_away": 6}}]
    ]"#;
    let feed = Arc::new(ReplayFeed::from_json("recorded", RECORDED).unwrap());
    let sink = RecordingSink::new();
    let mut monitor = MatchMonitor::new(
        MonitorConfig::default(),
        shot_pressure_pipeline(),
        feed.clone(),
        Arc::new(sink.clone()),
    );

    let first = monitor.run_cycle(at(0)).await.unwrap();
    assert_eq!(first.matches_seen, 1);
    assert_eq!(first.signals_emitted, 1);
    assert_eq!(sink.emitted()[0].match_id, "R");

    let second = monitor.run_cycle(at(10)).await.unwrap();
    assert_eq!(second.wins, 1);
    assert!(feed.is_exhausted());
    assert!(monitor.pending().is_empty());

    let third = monitor.run_cycle(at(20)).await.unwrap();
    assert_eq!(third.matches_seen, 0);
}
