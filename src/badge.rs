//! Badge lifecycle: assignment, periodic sweep, and expiry.
//!
//! ```text
//!   (none) ──transcript error──────────▶ error ──30s──▶ (none)
//!   (none) ──idle + approval/input─────▶ needs-* ──focus──▶ (none)
//!   (none) ──responding, 2s quiet──────▶ done ──30s──▶ (none)
//! ```
//!
//! The first badge wins until it is cleared. Focusing a thread clears
//! whatever it carries.

use chrono::{DateTime, TimeDelta, Utc};

use crate::reducer::derive_subtitle;
use crate::signal::{IdleReason, Phase};
use crate::state::{Badge, ThreadStatus, TranscriptInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Quiet interval before a responding thread is considered done.
    pub settle: TimeDelta,
    /// Lifetime of `done` and `error` badges.
    pub badge_expiry: TimeDelta,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            settle: TimeDelta::seconds(2),
            badge_expiry: TimeDelta::seconds(30),
        }
    }
}

impl SweepPolicy {
    /// Run the periodic jobs for one thread. Returns `None` when nothing
    /// changed.
    pub fn sweep(&self, info: &TranscriptInfo, focused: bool, now: DateTime<Utc>) -> Option<TranscriptInfo> {
        let mut next = info.clone();
        let quiet = info
            .last_activity_at()
            .is_none_or(|at| now.signed_duration_since(at) >= self.settle);
        // Without terminal signals the transcript owns the working bit, so a
        // quiet transcript-driven thread is settled back to idle here.
        let transcript_driven = info.status == ThreadStatus::Working && !info.provenance.has_pty();
        let idle = info.status == ThreadStatus::Idle || transcript_driven;

        if idle && quiet && info.phase == Phase::Responding {
            settle_status(&mut next, transcript_driven);
            next.phase = Phase::Waiting;
            next.transition_reason = Some("sweep:settled".to_string());
            if !focused && next.badge.is_none() {
                next.set_badge(Badge::Done, now);
            }
        }

        if idle
            && quiet
            && info.phase == Phase::Tooling
            && !info.pending_call_ids.is_empty()
            && info.last_tool_hint.is_waiting()
            && info.idle_reason == IdleReason::None
        {
            settle_status(&mut next, transcript_driven);
            next.idle_reason = info.last_tool_hint;
            next.transition_reason = Some("sweep:stalled-tool".to_string());
            if !focused && next.badge.is_none() {
                next.set_badge(attention_badge(info.last_tool_hint), now);
            }
        }

        if let (Some(badge), Some(set_at)) = (info.badge, info.badge_set_at) {
            if badge.expires() && now.signed_duration_since(set_at) >= self.badge_expiry {
                next.clear_badge();
            }
        }

        if next == *info {
            return None;
        }
        next.subtitle = derive_subtitle(&next);
        Some(next)
    }
}

fn settle_status(next: &mut TranscriptInfo, transcript_driven: bool) {
    if transcript_driven {
        next.previous_status = Some(next.status);
        next.status = ThreadStatus::Idle;
    }
}

fn attention_badge(reason: IdleReason) -> Badge {
    match reason {
        IdleReason::WaitingForApproval => Badge::NeedsApproval,
        IdleReason::WaitingForInput | IdleReason::None => Badge::NeedsInput,
    }
}

/// Assign an attention badge after a transcript line or a status
/// transition, comparing the record before and after.
pub fn assign_attention(prev: &TranscriptInfo, next: &mut TranscriptInfo, focused: bool, now: DateTime<Utc>) {
    if focused || next.badge.is_some() || next.status == ThreadStatus::Exited {
        return;
    }
    if next.last_error.is_some() && next.last_error != prev.last_error {
        next.set_badge(Badge::Error, now);
        return;
    }
    if next.status == ThreadStatus::Idle && next.idle_reason.is_waiting() {
        next.set_badge(attention_badge(next.idle_reason), now);
    }
}

/// Record after the user focuses the thread.
pub fn on_focus(info: &TranscriptInfo) -> Option<TranscriptInfo> {
    info.badge?;
    let mut next = info.clone();
    next.clear_badge();
    Some(next)
}
