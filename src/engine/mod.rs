//! Core engine: the poll → analyse → emit → resolve loop and the
//! collaborators it talks to.
//!
//! The pipeline itself is synchronous and pure. Everything that can wait on
//! I/O sits behind the two traits here: a [`MatchFeed`] that supplies live
//! match data and a [`SignalSink`] that receives emitted signals and
//! resolution events.

pub mod monitor;
pub mod replay;
pub mod report;
pub mod sink;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{MatchState, RawSample, ResolutionEvent, Signal};

pub use monitor::{MatchMonitor, MonitorConfig};
pub use report::CycleReport;

/// One match as reported by the feed on one poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveMatch {
    pub match_id: String,
    pub state: MatchState,
    pub sample: RawSample,
}

impl LiveMatch {
    /// Live match whose state is read off the sample.
    pub fn from_sample(match_id: impl Into<String>, sample: RawSample) -> Self {
        Self {
            match_id: match_id.into(),
            state: MatchState::from(&sample),
            sample,
        }
    }
}

/// Source of live match data.
#[async_trait]
pub trait MatchFeed: Send + Sync {
    /// Every match currently in play.
    async fn live_matches(&self) -> Result<Vec<LiveMatch>>;

    /// Latest known state of one match, including matches that have dropped
    /// off the live list. `None` when the feed knows nothing about it.
    async fn match_state(&self, match_id: &str) -> Result<Option<MatchState>>;

    /// Feed name for logging.
    fn name(&self) -> &str;
}

/// Receiver for pipeline output. Failures are logged by the caller and never
/// stop a cycle.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn signal_emitted(&self, signal: &Signal) -> Result<()>;

    async fn signal_resolved(&self, event: &ResolutionEvent) -> Result<()>;
}
