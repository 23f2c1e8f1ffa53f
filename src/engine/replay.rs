//! Replay feed: serves recorded polls from a JSON file, one per cycle.
//!
//! File layout is an array of cycles, each an array of records:
//!
//! ```json
//! [
//!   [{ "match_id": "A", "status": "live", "sample": { "minute": 12, "shots_home": 3 } }],
//!   [{ "match_id": "A", "sample": { "minute": 13, "shots_home": "4" } }]
//! ]
//! ```
//!
//! Samples go through the lenient [`RawSample::from_json`] parser, so
//! recorded provider payloads can be used as they are.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use crate::types::{MatchState, MatchStatus, RawSample};

use super::{LiveMatch, MatchFeed};

/// One match in one recorded poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub match_id: String,
    /// `live` when absent.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sample: Value,
}

impl ReplayRecord {
    fn into_live_match(self) -> LiveMatch {
        let sample = RawSample::from_json(&self.sample);
        let mut live = LiveMatch::from_sample(self.match_id, sample);
        if let Some(label) = self.status.as_deref() {
            live.state.status = MatchStatus::from_label(label);
        }
        live
    }
}

pub struct ReplayFeed {
    name: String,
    cycles: Vec<Vec<LiveMatch>>,
    cursor: Mutex<usize>,
    last_states: Mutex<HashMap<String, MatchState>>,
}

impl ReplayFeed {
    pub fn new(name: impl Into<String>, cycles: Vec<Vec<LiveMatch>>) -> Self {
        Self {
            name: name.into(),
            cycles,
            cursor: Mutex::new(0),
            last_states: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self> {
        let records: Vec<Vec<ReplayRecord>> =
            serde_json::from_str(json).context("Failed to parse replay cycles")?;
        let cycles = records
            .into_iter()
            .map(|cycle| cycle.into_iter().map(ReplayRecord::into_live_match).collect())
            .collect();
        Ok(Self::new(name, cycles))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file: {}", path.display()))?;
        let feed = Self::from_json(format!("replay:{}", path.display()), &json)
            .with_context(|| format!("Invalid replay file: {}", path.display()))?;
        info!(path = %path.display(), cycles = feed.cycles.len(), "Replay feed loaded");
        Ok(feed)
    }

    /// Cycles not yet served.
    pub fn remaining(&self) -> usize {
        let cursor = *self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        self.cycles.len().saturating_sub(cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

#[async_trait]
impl MatchFeed for ReplayFeed {
    async fn live_matches(&self) -> Result<Vec<LiveMatch>> {
        let batch = {
            let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(batch) = self.cycles.get(*cursor) else {
                debug!(feed = %self.name, "Replay exhausted");
                return Ok(Vec::new());
            };
            *cursor += 1;
            batch.clone()
        };

        let mut states = self.last_states.lock().unwrap_or_else(PoisonError::into_inner);
        for m in &batch {
            states.insert(m.match_id.clone(), m.state);
        }
        Ok(batch
            .into_iter()
            .filter(|m| m.state.status == MatchStatus::Live)
            .collect())
    }

    async fn match_state(&self, match_id: &str) -> Result<Option<MatchState>> {
        let states = self.last_states.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(match_id).copied())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLAY: &str = r#"[
        [
            {"match_id": "A", "sample": {"minute": 20, "home_score": 0, "shots_home": "4"}},
            {"match_id": "B", "status": "live", "sample": {"minute": 70, "home_score": 1}}
        ],
        [
            {"match_id": "A", "sample": {"minute": 21, "home_score": 1}},
            {"match_id": "B", "status": "finished", "sample": {"minute": 90, "home_score": 2}}
        ]
    ]"#;

    #[test]
    fn test_replay_serves_cycles_in_order() {
        let feed = ReplayFeed::from_json("test", REPLAY).unwrap();
        assert_eq!(feed.remaining(), 2);

        let first = tokio_test::block_on(feed.live_matches()).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].sample.shots_home, 4);
        assert_eq!(first[0].sample.possession_home, 50.0);

        let second = tokio_test::block_on(feed.live_matches()).unwrap();
        assert_eq!(second.len(), 1);
        assert!(feed.is_exhausted());
        assert!(tokio_test::block_on(feed.live_matches()).unwrap().is_empty());
    }

    #[test]
    fn test_finished_match_state_still_available() {
        let feed = ReplayFeed::from_json("test", REPLAY).unwrap();
        tokio_test::block_on(feed.live_matches()).unwrap();
        tokio_test::block_on(feed.live_matches()).unwrap();

        let state = tokio_test::block_on(feed.match_state("B")).unwrap().unwrap();
        assert_eq!(state.status, MatchStatus::Finished);
        assert_eq!(state.home_score, 2);
        assert!(tokio_test::block_on(feed.match_state("Z")).unwrap().is_none());
    }

    #[test]
    fn test_invalid_replay_rejected() {
        assert!(ReplayFeed::from_json("bad", "{not json").is_err());
    }
}
