//! Mock collaborators for integration testing.
//!
//! `ScriptedFeed` serves a fixed list of polls and remembers the last state
//! of every match; `RecordingSink` keeps everything it is handed. Both are
//! in-memory with no external dependencies. The mockall doubles cover the
//! failure paths.

use anyhow::Result;
use async_trait::async_trait;
use mockall::mock;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use pitchwatch::engine::{LiveMatch, MatchFeed, SignalSink};
use pitchwatch::types::{MatchState, RawSample, ResolutionEvent, Signal};

/// Deterministic feed. Each call to `live_matches` pops one scripted poll.
#[derive(Clone, Default)]
pub struct ScriptedFeed {
    polls: Arc<Mutex<VecDeque<Vec<LiveMatch>>>>,
    states: Arc<Mutex<HashMap<String, MatchState>>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one poll.
    pub fn push_poll(&self, matches: Vec<LiveMatch>) {
        self.polls.lock().unwrap().push_back(matches);
    }

    /// Set the state returned for a match that is no longer on the live list.
    pub fn set_state(&self, match_id: &str, state: MatchState) {
        self.states.lock().unwrap().insert(match_id.to_string(), state);
    }

    pub fn polls_left(&self) -> usize {
        self.polls.lock().unwrap().len()
    }
}

#[async_trait]
impl MatchFeed for ScriptedFeed {
    async fn live_matches(&self) -> Result<Vec<LiveMatch>> {
        let poll = self.polls.lock().unwrap().pop_front().unwrap_or_default();
        let mut states = self.states.lock().unwrap();
        for m in &poll {
            states.insert(m.match_id.clone(), m.state);
        }
        Ok(poll)
    }

    async fn match_state(&self, match_id: &str) -> Result<Option<MatchState>> {
        Ok(self.states.lock().unwrap().get(match_id).copied())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Sink that keeps every signal and event it receives.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub emitted: Arc<Mutex<Vec<Signal>>>,
    pub resolved: Arc<Mutex<Vec<ResolutionEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Vec<Signal> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn resolved(&self) -> Vec<ResolutionEvent> {
        self.resolved.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalSink for RecordingSink {
    async fn signal_emitted(&self, signal: &Signal) -> Result<()> {
        self.emitted.lock().unwrap().push(signal.clone());
        Ok(())
    }

    async fn signal_resolved(&self, event: &ResolutionEvent) -> Result<()> {
        self.resolved.lock().unwrap().push(event.clone());
        Ok(())
    }
}

mock! {
    pub Feed {}

    #[async_trait]
    impl MatchFeed for Feed {
        async fn live_matches(&self) -> Result<Vec<LiveMatch>>;
        async fn match_state(&self, match_id: &str) -> Result<Option<MatchState>>;
        fn name(&self) -> &str;
    }
}

mock! {
    pub Sink {}

    #[async_trait]
    impl SignalSink for Sink {
        async fn signal_emitted(&self, signal: &Signal) -> Result<()>;
        async fn signal_resolved(&self, event: &ResolutionEvent) -> Result<()>;
    }
}

/// High-tempo opening at minute 22: enough volume for the over 2.5 rule.
pub fn high_tempo_sample(minute: u32) -> RawSample {
    RawSample {
        minute,
        attacks_home: 20,
        attacks_away: 15,
        shots_home: 9,
        shots_away: 6,
        dangerous_attacks_home: 6,
        dangerous_attacks_away: 4,
        ..RawSample::default()
    }
}

pub fn live(match_id: &str, sample: RawSample) -> LiveMatch {
    LiveMatch::from_sample(match_id, sample)
}
