//! Semantic events extracted from transcript lines, plus the classification
//! metadata that travels with them.
//!
//! A [`TranscriptEvent`] says *what happened*; a [`ParsedTranscriptSignal`]
//! wraps it with *how we know* (which rule matched, how confident we are) and
//! the coarse phase the agent is in after the line.

use serde::Serialize;
use serde_json::Value;

/// One semantically meaningful occurrence extracted from a transcript line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// The user (or the CLI on their behalf) started a new turn.
    TurnStarted,
    /// A tool or shell command was requested by the agent.
    ToolInvoked(ToolCall),
    /// The result for a previously requested tool call arrived.
    ToolResult { call_id: String },
    /// The agent produced user-visible text.
    AssistantText { text: String },
    /// The agent produced private reasoning (thinking blocks).
    Reasoning,
    /// A turn finished, optionally reporting the cost it added.
    TurnCompleted { cost_delta_usd: Option<f64> },
    /// Final result line (stream-json mode), carrying the session cost.
    Result { cost_usd: Option<f64> },
    /// The conversation was compacted; the CLI may continue in a new file.
    CompactionBoundary { new_path: Option<String> },
    /// The turn failed and will not continue.
    TurnFailed { error: Option<String> },
    /// A recoverable system or API error was reported.
    SystemError { message: String },
    /// The compaction summary was written.
    ContextCompacted,
    /// Recognized noise: proves the stream is alive, carries no state.
    Ignored,
}

/// A tool/command invocation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub input: Value,
    /// Display target (command, file path, search pattern).
    pub target: Option<String>,
    /// Idle reason the CLI is presumed to enter if this call stalls.
    pub hint: IdleReason,
    pub plan: Option<PlanMutation>,
}

/// Explicit change to the agent's plan/checklist carried by a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanMutation {
    /// Items were added.
    Add { count: u32 },
    /// Items were completed.
    Complete { count: u32 },
    /// Items were deleted.
    Delete { count: u32 },
    /// A full-list tool (`TodoWrite`, `update_plan`) re-sent the whole
    /// checklist. The call itself is the mutation event; progress is taken
    /// from its payload and nothing else recomputes it.
    Replace { done: u32, total: u32 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalGroup {
    Turn,
    Thinking,
    Tooling,
    Response,
    Lifecycle,
    #[default]
    Unknown,
}

/// Coarse stage of agent activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Initial,
    Thinking,
    Tooling,
    Responding,
    Waiting,
    Unknown,
}

/// Why an idle thread is idle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleReason {
    #[default]
    None,
    WaitingForInput,
    WaitingForApproval,
}

impl IdleReason {
    /// True for the two reasons that need the user's attention.
    pub fn is_waiting(self) -> bool {
        !matches!(self, IdleReason::None)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[default]
    High,
    Medium,
    Low,
}

/// A classified transcript line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedTranscriptSignal {
    pub event: TranscriptEvent,
    /// Stable identifier of the rule that matched, e.g. `claude.assistant.tool_use`.
    pub key: &'static str,
    pub group: SignalGroup,
    pub phase: Phase,
    pub idle_hint: IdleReason,
    pub confidence: Confidence,
    /// Short description of the matched shape.
    pub pattern: &'static str,
    pub description: String,
}

impl ParsedTranscriptSignal {
    pub(crate) fn new(
        key: &'static str,
        group: SignalGroup,
        phase: Phase,
        event: TranscriptEvent,
    ) -> Self {
        Self {
            event,
            key,
            group,
            phase,
            idle_hint: IdleReason::None,
            confidence: Confidence::High,
            pattern: "",
            description: String::new(),
        }
    }

    /// Recognized-but-irrelevant line.
    pub(crate) fn ignored(key: &'static str, pattern: &'static str) -> Self {
        Self::new(key, SignalGroup::Unknown, Phase::Unknown, TranscriptEvent::Ignored)
            .pattern(pattern)
            .describe("Ignored")
    }

    pub(crate) fn hint(mut self, hint: IdleReason, confidence: Confidence) -> Self {
        self.idle_hint = hint;
        self.confidence = confidence;
        self
    }

    pub(crate) fn pattern(mut self, pattern: &'static str) -> Self {
        self.pattern = pattern;
        self
    }

    pub(crate) fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self.event, TranscriptEvent::Ignored)
    }
}
