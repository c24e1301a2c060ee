//! Agent transcript schemas.
//!
//! Each coding agent (Claude Code, Codex CLI) writes its own JSON-lines
//! transcript format. A schema is an ordered list of shape-matching rules;
//! the first rule that returns `Some` classifies the line. A rule returns
//! `None` to pass the line on to the next rule.
//!
//! The rule tables live in [`claude`] and [`codex`]. This module holds the
//! pieces both share: event-to-phase mapping, tool-call construction, and
//! text-block extraction.

pub mod claude;
pub mod codex;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::prompt::PromptPatterns;
use crate::signal::{
    Confidence, IdleReason, ParsedTranscriptSignal, Phase, SignalGroup, ToolCall, TranscriptEvent,
};
use crate::tools;

/// Which agent CLI wrote a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Claude,
    Codex,
}

impl AgentKind {
    /// Look up an agent by name. Accepts the CLI binary names too.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "claude" | "claude-code" => Some(AgentKind::Claude),
            "codex" | "codex-cli" => Some(AgentKind::Codex),
            _ => None,
        }
    }

    pub fn schema(self) -> &'static dyn TranscriptSchema {
        match self {
            AgentKind::Claude => &claude::ClaudeSchema,
            AgentKind::Codex => &codex::CodexSchema,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::Claude => f.write_str("claude"),
            AgentKind::Codex => f.write_str("codex"),
        }
    }
}

/// A single shape-matching rule.
pub type Rule = fn(&Value) -> Option<ParsedTranscriptSignal>;

/// A hard-coded upstream transcript format.
pub trait TranscriptSchema: Send + Sync {
    /// Human-readable name of the format (e.g., "claude-code").
    fn name(&self) -> &'static str;

    /// Ordered rule list. Order is significant.
    fn rules(&self) -> &'static [Rule];

    /// Text heuristics for this agent's assistant messages.
    fn prompt_patterns(&self) -> PromptPatterns;

    /// First-match evaluation over [`rules`](Self::rules).
    fn classify_value(&self, value: &Value) -> Option<ParsedTranscriptSignal> {
        if !value.is_object() {
            return None;
        }
        self.rules().iter().find_map(|rule| rule(value))
    }
}

/// Build a signal whose group and phase follow from the event.
pub(crate) fn signal(key: &'static str, pattern: &'static str, event: TranscriptEvent) -> ParsedTranscriptSignal {
    let (group, phase) = match &event {
        TranscriptEvent::TurnStarted => (SignalGroup::Turn, Phase::Thinking),
        TranscriptEvent::Reasoning => (SignalGroup::Thinking, Phase::Thinking),
        TranscriptEvent::ToolInvoked(_) => (SignalGroup::Tooling, Phase::Tooling),
        TranscriptEvent::ToolResult { .. } => (SignalGroup::Tooling, Phase::Thinking),
        TranscriptEvent::AssistantText { .. } => (SignalGroup::Response, Phase::Responding),
        TranscriptEvent::TurnCompleted { .. } | TranscriptEvent::Result { .. } => {
            (SignalGroup::Turn, Phase::Waiting)
        }
        TranscriptEvent::CompactionBoundary { .. } => (SignalGroup::Lifecycle, Phase::Thinking),
        TranscriptEvent::ContextCompacted
        | TranscriptEvent::SystemError { .. }
        | TranscriptEvent::TurnFailed { .. } => (SignalGroup::Lifecycle, Phase::Waiting),
        TranscriptEvent::Ignored => (SignalGroup::Unknown, Phase::Unknown),
    };
    let description = describe(&event);
    ParsedTranscriptSignal::new(key, group, phase, event)
        .pattern(pattern)
        .describe(description)
}

fn describe(event: &TranscriptEvent) -> String {
    match event {
        TranscriptEvent::TurnStarted => "User prompt".to_string(),
        TranscriptEvent::ToolInvoked(call) => format!("Tool call: {}", call.name),
        TranscriptEvent::ToolResult { .. } => "Tool result".to_string(),
        TranscriptEvent::AssistantText { .. } => "Assistant text".to_string(),
        TranscriptEvent::Reasoning => "Reasoning".to_string(),
        TranscriptEvent::TurnCompleted { .. } => "Turn completed".to_string(),
        TranscriptEvent::Result { .. } => "Result".to_string(),
        TranscriptEvent::CompactionBoundary { .. } => "Compaction boundary".to_string(),
        TranscriptEvent::TurnFailed { error } => match error {
            Some(e) => format!("Turn failed: {e}"),
            None => "Turn failed".to_string(),
        },
        TranscriptEvent::SystemError { message } => format!("Error: {message}"),
        TranscriptEvent::ContextCompacted => "Context compacted".to_string(),
        TranscriptEvent::Ignored => "Ignored".to_string(),
    }
}

/// Tool invocation signal with the tool's own idle hint attached.
pub(crate) fn tool_signal(
    key: &'static str,
    pattern: &'static str,
    call_id: &str,
    name: &str,
    input: Value,
) -> ParsedTranscriptSignal {
    let hint = tools::idle_hint_for_tool(name, &input);
    let call = ToolCall {
        call_id: call_id.to_string(),
        name: name.to_string(),
        target: tools::extract_target(name, &input),
        plan: tools::plan_mutation(name, &input),
        hint,
        input,
    };
    signal(key, pattern, TranscriptEvent::ToolInvoked(call)).hint(hint, Confidence::High)
}

/// Assistant text signal, with the text heuristics applied.
pub(crate) fn text_signal(
    key: &'static str,
    pattern: &'static str,
    text: String,
    patterns: &PromptPatterns,
) -> ParsedTranscriptSignal {
    let hint = patterns.detect(&text);
    let signal = signal(key, pattern, TranscriptEvent::AssistantText { text });
    match hint {
        Some(h) => signal.hint(h.reason, h.confidence),
        None => signal.hint(IdleReason::None, Confidence::High),
    }
}

/// Concatenated text of a message `content` that is either a plain string or
/// an array of blocks. Only blocks whose `type` is in `block_types` count.
pub(crate) fn joined_text(content: &Value, block_types: &[&str]) -> Option<String> {
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|b| {
                b.get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| block_types.contains(&t))
            })
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => return None,
    };
    if text.trim().is_empty() { None } else { Some(text) }
}

pub(crate) fn str_at<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Verify the trait is object-safe (can be used as dyn TranscriptSchema)
    #[test]
    fn trait_is_object_safe() {
        fn _accepts_dyn(_schema: &dyn TranscriptSchema) {}
        _accepts_dyn(AgentKind::Claude.schema());
    }

    #[test]
    fn lookup_agent_by_name() {
        assert_eq!(AgentKind::from_name("claude"), Some(AgentKind::Claude));
        assert_eq!(AgentKind::from_name("claude-code"), Some(AgentKind::Claude));
        assert_eq!(AgentKind::from_name("codex"), Some(AgentKind::Codex));
        assert_eq!(AgentKind::from_name("codex-cli"), Some(AgentKind::Codex));
        assert!(AgentKind::from_name("aider").is_none());
    }

    #[test]
    fn schema_names() {
        assert_eq!(AgentKind::Claude.schema().name(), "claude-code");
        assert_eq!(AgentKind::Codex.schema().name(), "codex-cli");
    }

    #[test]
    fn non_objects_are_unrecognized() {
        for agent in [AgentKind::Claude, AgentKind::Codex] {
            assert!(agent.schema().classify_value(&json!([1, 2])).is_none());
            assert!(agent.schema().classify_value(&json!("assistant")).is_none());
            assert!(agent.schema().classify_value(&json!(null)).is_none());
        }
    }

    #[test]
    fn joined_text_filters_block_types() {
        let content = json!([
            {"type": "text", "text": "one"},
            {"type": "tool_use", "name": "Bash"},
            {"type": "text", "text": "two"},
        ]);
        assert_eq!(joined_text(&content, &["text"]).as_deref(), Some("one\n\ntwo"));
        assert_eq!(joined_text(&json!("  "), &["text"]), None);
        assert_eq!(joined_text(&json!({"x": 1}), &["text"]), None);
    }

    #[test]
    fn tool_signal_carries_hint_and_target() {
        let s = tool_signal("k", "p", "call_1", "Write", json!({"file_path": "src/a.ts"}));
        assert_eq!(s.idle_hint, IdleReason::WaitingForApproval);
        assert_eq!(s.phase, Phase::Tooling);
        assert_eq!(s.description, "Tool call: Write");
        match s.event {
            TranscriptEvent::ToolInvoked(call) => {
                assert_eq!(call.target.as_deref(), Some("src/a.ts"));
                assert_eq!(call.hint, IdleReason::WaitingForApproval);
            }
            other => panic!("expected ToolInvoked, got {other:?}"),
        }
    }
}
