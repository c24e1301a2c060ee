//! Per-thread runtime snapshot published to the UI.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentKind;
use crate::signal::{IdleReason, Phase, SignalGroup};

/// Opaque workspace thread identifier.
pub type ThreadId = String;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Working,
    #[default]
    Idle,
    Exited,
}

/// Persistent attention indicator shown while a thread is not focused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Done,
    NeedsInput,
    NeedsApproval,
    Error,
}

impl Badge {
    /// Done/error badges expire on their own; needs-* wait for focus.
    pub fn expires(self) -> bool {
        matches!(self, Badge::Done | Badge::Error)
    }
}

/// Which input sources have contributed to the current status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    Unknown,
    Transcript,
    Pty,
    Mixed,
}

impl Provenance {
    /// Lattice join. `Mixed` is absorbing, `Unknown` is the identity.
    pub fn join(self, other: Provenance) -> Provenance {
        match (self, other) {
            (Provenance::Mixed, _) | (_, Provenance::Mixed) => Provenance::Mixed,
            (Provenance::Unknown, x) | (x, Provenance::Unknown) => x,
            (a, b) if a == b => a,
            _ => Provenance::Mixed,
        }
    }

    pub fn has_pty(self) -> bool {
        matches!(self, Provenance::Pty | Provenance::Mixed)
    }
}

/// Mechanism that produced a terminal-activity signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    /// Output-quiet heuristic.
    Output,
    /// Explicit command start/end marker.
    Marker,
    /// CLI-reported spinner state (OSC 9;4).
    Progress,
}

impl std::fmt::Display for ActivitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivitySource::Output => f.write_str("output"),
            ActivitySource::Marker => f.write_str("marker"),
            ActivitySource::Progress => f.write_str("progress"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastError {
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanProgress {
    pub done: u32,
    pub total: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserHealth {
    #[default]
    Unknown,
    Healthy,
    Degraded,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ParserDiagnostics {
    pub parsed: u64,
    pub unparsed: u64,
    pub ignored: u64,
    pub last_line_at: Option<DateTime<Utc>>,
    pub last_parsed_at: Option<DateTime<Utc>>,
    pub health: ParserHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingState {
    Pending,
    Bound,
    Failed,
}

impl std::fmt::Display for BindingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingState::Pending => f.write_str("pending"),
            BindingState::Bound => f.write_str("bound"),
            BindingState::Failed => f.write_str("failed"),
        }
    }
}

/// Codex transcript binding, surfaced verbatim from binding notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodexBinding {
    pub state: BindingState,
    pub path: Option<String>,
    pub session_id: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
}

/// The authoritative per-thread snapshot.
///
/// Records are replaced whole; nothing mutates a published record in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptInfo {
    pub agent: Option<AgentKind>,
    pub session_id: Option<String>,

    pub status: ThreadStatus,
    pub previous_status: Option<ThreadStatus>,
    pub subtitle: String,
    pub badge: Option<Badge>,
    pub badge_set_at: Option<DateTime<Utc>>,

    pub cost_usd: f64,
    pub transcript_path: Option<String>,
    /// New transcript announced by a compaction boundary, not yet watched.
    pub pending_transcript_switch: Option<String>,

    pub pending_call_ids: BTreeSet<String>,
    pub last_tool_name: Option<String>,
    pub last_tool_target: Option<String>,
    pub last_tool_hint: IdleReason,
    pub last_error: Option<LastError>,
    pub plan_progress: Option<PlanProgress>,

    pub idle_reason: IdleReason,
    pub phase: Phase,
    pub signal_group: SignalGroup,
    pub signal_key: Option<&'static str>,
    pub signal_pattern: Option<&'static str>,
    pub signal_description: Option<String>,

    pub provenance: Provenance,
    pub pty_active: bool,
    pub pty_source: Option<ActivitySource>,
    pub transition_reason: Option<String>,
    pub last_transcript_at: Option<DateTime<Utc>>,
    pub last_pty_at: Option<DateTime<Utc>>,

    pub diagnostics: ParserDiagnostics,
    pub binding: Option<CodexBinding>,
}

impl Default for TranscriptInfo {
    fn default() -> Self {
        Self {
            agent: None,
            session_id: None,
            status: ThreadStatus::Idle,
            previous_status: None,
            subtitle: "Idle".to_string(),
            badge: None,
            badge_set_at: None,
            cost_usd: 0.0,
            transcript_path: None,
            pending_transcript_switch: None,
            pending_call_ids: BTreeSet::new(),
            last_tool_name: None,
            last_tool_target: None,
            last_tool_hint: IdleReason::None,
            last_error: None,
            plan_progress: None,
            idle_reason: IdleReason::None,
            phase: Phase::Initial,
            signal_group: SignalGroup::Unknown,
            signal_key: None,
            signal_pattern: None,
            signal_description: None,
            provenance: Provenance::Unknown,
            pty_active: false,
            pty_source: None,
            transition_reason: None,
            last_transcript_at: None,
            last_pty_at: None,
            diagnostics: ParserDiagnostics::default(),
            binding: None,
        }
    }
}

impl TranscriptInfo {
    /// Fresh record for a thread that just entered the running state.
    pub fn new(agent: Option<AgentKind>, session_id: Option<String>) -> Self {
        Self {
            agent,
            session_id,
            ..Self::default()
        }
    }

    /// Terminal record for a thread whose process exited.
    pub fn exited(&self) -> Self {
        let mut next = self.clone();
        if next.status != ThreadStatus::Exited {
            next.previous_status = Some(self.status);
        }
        next.status = ThreadStatus::Exited;
        next.badge = None;
        next.badge_set_at = None;
        next.pty_active = false;
        next.transition_reason = Some("process exited".to_string());
        next.subtitle = crate::reducer::derive_subtitle(&next);
        next
    }

    pub fn set_badge(&mut self, badge: Badge, at: DateTime<Utc>) {
        self.badge = Some(badge);
        self.badge_set_at = Some(at);
    }

    pub fn clear_badge(&mut self) {
        self.badge = None;
        self.badge_set_at = None;
    }

    /// Latest transcript or terminal activity.
    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        self.last_transcript_at.max(self.last_pty_at)
    }

    /// A tool call is still in flight.
    pub fn has_live_tool(&self) -> bool {
        self.last_tool_name.is_some() && !self.pending_call_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_defaults() {
        let info = TranscriptInfo::new(Some(AgentKind::Claude), Some("sess-1".to_string()));
        assert_eq!(info.status, ThreadStatus::Idle);
        assert_eq!(info.phase, Phase::Initial);
        assert!(info.pending_call_ids.is_empty());
        assert_eq!(info.subtitle, "Idle");
        assert_eq!(info.provenance, Provenance::Unknown);
    }

    #[test]
    fn provenance_lattice() {
        use Provenance::*;
        assert_eq!(Unknown.join(Transcript), Transcript);
        assert_eq!(Unknown.join(Pty), Pty);
        assert_eq!(Transcript.join(Transcript), Transcript);
        assert_eq!(Transcript.join(Pty), Mixed);
        assert_eq!(Pty.join(Transcript), Mixed);
        assert_eq!(Mixed.join(Pty), Mixed);
        assert_eq!(Mixed.join(Unknown), Mixed);
        assert_eq!(Pty.join(Unknown), Pty);
    }

    #[test]
    fn exited_clears_badge_and_keeps_history() {
        let mut info = TranscriptInfo::new(Some(AgentKind::Codex), None);
        info.status = ThreadStatus::Working;
        info.set_badge(Badge::NeedsInput, Utc::now());
        info.cost_usd = 1.5;

        let exited = info.exited();
        assert_eq!(exited.status, ThreadStatus::Exited);
        assert_eq!(exited.previous_status, Some(ThreadStatus::Working));
        assert!(exited.badge.is_none());
        assert_eq!(exited.subtitle, "Session ended");
        assert_eq!(exited.cost_usd, 1.5);
    }

    #[test]
    fn only_done_and_error_expire() {
        assert!(Badge::Done.expires());
        assert!(Badge::Error.expires());
        assert!(!Badge::NeedsInput.expires());
        assert!(!Badge::NeedsApproval.expires());
    }
}
