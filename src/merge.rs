//! Merge policy between transcript-derived status and terminal activity.
//!
//! ## Provenance lattice
//!
//! ```text
//!            mixed
//!           /     \
//!   transcript     pty
//!           \     /
//!           unknown
//! ```
//!
//! Joins only move up; once a thread is `mixed` it stays `mixed`.
//!
//! ## Authority
//!
//! Until a terminal-activity signal has been seen, the transcript phase
//! drives working/idle; a responding message that asks the user something
//! counts as idle. After that the terminal owns the working/idle bit and
//! the transcript only contributes phase, idle reason and subtitle detail.
//! `exited` is terminal for both. Badges are never touched here.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::reducer::derive_subtitle;
use crate::signal::Phase;
use crate::state::{ActivitySource, Provenance, ThreadStatus, TranscriptInfo};

/// One terminal activity report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PtyActivity {
    pub active: bool,
    pub source: ActivitySource,
    /// Free-form detail for the transition reason, e.g. `command-start`.
    #[serde(default)]
    pub detail: Option<String>,
}

/// Per-thread filter for activity sources.
///
/// Once an explicit command-boundary marker has been seen, the output-quiet
/// heuristic is no longer trusted for that thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ActivityGate {
    markers_observed: bool,
}

impl ActivityGate {
    /// Whether a report from `source` should be applied.
    pub fn admit(&mut self, source: ActivitySource) -> bool {
        match source {
            ActivitySource::Marker => {
                self.markers_observed = true;
                true
            }
            ActivitySource::Progress => true,
            ActivitySource::Output => !self.markers_observed,
        }
    }

    pub fn markers_observed(&self) -> bool {
        self.markers_observed
    }
}

/// Fold an admitted terminal activity report into the record.
pub fn merge_pty_activity(current: &TranscriptInfo, activity: &PtyActivity, now: DateTime<Utc>) -> TranscriptInfo {
    if current.status == ThreadStatus::Exited {
        return current.clone();
    }
    let mut next = current.clone();
    next.pty_active = activity.active;
    next.pty_source = Some(activity.source);
    next.last_pty_at = Some(now);
    next.provenance = current.provenance.join(Provenance::Pty);

    let status = if activity.active {
        ThreadStatus::Working
    } else {
        ThreadStatus::Idle
    };
    let detail = activity
        .detail
        .clone()
        .unwrap_or_else(|| if activity.active { "active" } else { "inactive" }.to_string());
    next.transition_reason = Some(format!("pty:{} {detail}", activity.source));
    set_status(&mut next, status);
    next.subtitle = derive_subtitle(&next);
    next
}

/// Apply the transcript's view of working/idle after a reduction.
pub fn apply_transcript_status(current: &TranscriptInfo) -> TranscriptInfo {
    let mut next = current.clone();
    next.provenance = current.provenance.join(Provenance::Transcript);
    if current.status == ThreadStatus::Exited || current.provenance.has_pty() {
        return next;
    }
    let status = match current.phase {
        Phase::Responding if current.idle_reason.is_waiting() => ThreadStatus::Idle,
        Phase::Thinking | Phase::Tooling | Phase::Responding => ThreadStatus::Working,
        Phase::Waiting => ThreadStatus::Idle,
        Phase::Initial | Phase::Unknown => return next,
    };
    if status != current.status {
        next.transition_reason = Some(format!("transcript:{}", current.signal_key.unwrap_or("unknown")));
        set_status(&mut next, status);
        next.subtitle = derive_subtitle(&next);
    }
    next
}

fn set_status(next: &mut TranscriptInfo, status: ThreadStatus) {
    if next.status != status {
        next.previous_status = Some(next.status);
        next.status = status;
    }
}
