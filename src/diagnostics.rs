//! Parser health tracking.
//!
//! Counters are monotonic for the life of a thread record. Health answers a
//! single question for the UI: is the upstream format still one we
//! understand?

use chrono::{DateTime, Utc};

use crate::state::{ParserDiagnostics, ParserHealth};

/// Classification bucket of one transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Parsed,
    Ignored,
    Unparsed,
}

/// Thresholds for health and UI throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsPolicy {
    /// Unparsed lines (with zero parsed) before the thread is degraded.
    pub degraded_threshold: u64,
    /// Every unparsed line up to this count is surfaced.
    pub emit_first: u64,
    /// After `emit_first`, surface every n-th unparsed line.
    pub emit_every: u64,
}

impl Default for DiagnosticsPolicy {
    fn default() -> Self {
        Self {
            degraded_threshold: 8,
            emit_first: 3,
            emit_every: 25,
        }
    }
}

impl DiagnosticsPolicy {
    /// Fold one line into the counters. Returns whether the update should be
    /// published to the UI.
    pub fn record(&self, diag: &mut ParserDiagnostics, outcome: LineOutcome, now: DateTime<Utc>) -> bool {
        diag.last_line_at = Some(now);
        let emit = match outcome {
            LineOutcome::Parsed => {
                diag.parsed += 1;
                diag.last_parsed_at = Some(now);
                true
            }
            LineOutcome::Ignored => {
                diag.ignored += 1;
                false
            }
            LineOutcome::Unparsed => {
                diag.unparsed += 1;
                self.should_emit_unparsed(diag.unparsed)
            }
        };
        let health = self.health(diag);
        let changed = health != diag.health;
        diag.health = health;
        emit || changed
    }

    pub fn health(&self, diag: &ParserDiagnostics) -> ParserHealth {
        if diag.parsed > 0 {
            ParserHealth::Healthy
        } else if diag.unparsed >= self.degraded_threshold {
            ParserHealth::Degraded
        } else {
            ParserHealth::Unknown
        }
    }

    fn should_emit_unparsed(&self, count: u64) -> bool {
        count <= self.emit_first || (self.emit_every > 0 && count % self.emit_every == 0)
    }
}
