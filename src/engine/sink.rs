//! Sink that writes pipeline output to the log.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::types::{ResolutionEvent, Signal};

use super::SignalSink;

#[derive(Debug, Default)]
pub struct LoggingSink {
    emitted: AtomicUsize,
    resolved: AtomicUsize,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn resolved(&self) -> usize {
        self.resolved.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SignalSink for LoggingSink {
    async fn signal_emitted(&self, signal: &Signal) -> Result<()> {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        info!(
            signal_id = %signal.id,
            match_id = %signal.match_id,
            strategy = %signal.strategy_name,
            prediction = %signal.prediction,
            minute = signal.trigger_minute,
            score = %signal.score_at_trigger,
            confidence = format!("{:.1}%", signal.confidence() * 100.0),
            odds = format!("{:.2}", signal.recommended_odds()),
            stake = format!("{:.2}", signal.stake()),
            reasoning = %signal.reasoning,
            "SIGNAL"
        );
        Ok(())
    }

    async fn signal_resolved(&self, event: &ResolutionEvent) -> Result<()> {
        self.resolved.fetch_add(1, Ordering::Relaxed);
        info!(
            signal_id = %event.signal_id,
            match_id = %event.match_id,
            strategy = %event.strategy_name,
            result = %event.result,
            pnl = format!("{:+.2}", event.profit_loss),
            forced = event.forced,
            explanation = %event.explanation,
            "RESOLVED"
        );
        Ok(())
    }
}
