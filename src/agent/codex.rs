//! Codex CLI transcript schema.
//!
//! Rollout files live under `$CODEX_HOME/sessions/YYYY/MM/DD/rollout-*.jsonl`.
//! Every line is an envelope `{timestamp, type, payload}`; the interesting
//! types are `event_msg` (UI events) and `response_item` (model I/O).

use serde_json::Value;

use crate::agent::{Rule, TranscriptSchema, joined_text, signal, str_at, text_signal, tool_signal};
use crate::prompt::PromptPatterns;
use crate::signal::{ParsedTranscriptSignal, TranscriptEvent};

pub struct CodexSchema;

impl TranscriptSchema for CodexSchema {
    fn name(&self) -> &'static str {
        "codex-cli"
    }

    fn rules(&self) -> &'static [Rule] {
        RULES
    }

    fn prompt_patterns(&self) -> PromptPatterns {
        PromptPatterns::codex_cli()
    }
}

const RULES: &[Rule] = &[metadata, compacted, event_msg, response_item];

fn payload_of<'a>(v: &'a Value, envelope: &str) -> Option<(&'a Value, &'a str)> {
    if str_at(v, "type")? != envelope {
        return None;
    }
    let payload = v.get("payload")?;
    Some((payload, str_at(payload, "type").unwrap_or_default()))
}

fn metadata(v: &Value) -> Option<ParsedTranscriptSignal> {
    match str_at(v, "type")? {
        "session_meta" => Some(ParsedTranscriptSignal::ignored("codex.session_meta", "type=session_meta")),
        "turn_context" => Some(ParsedTranscriptSignal::ignored("codex.turn_context", "type=turn_context")),
        _ => None,
    }
}

fn compacted(v: &Value) -> Option<ParsedTranscriptSignal> {
    (str_at(v, "type")? == "compacted").then(|| {
        signal(
            "codex.compacted",
            "type=compacted",
            TranscriptEvent::CompactionBoundary { new_path: None },
        )
    })
}

fn event_msg(v: &Value) -> Option<ParsedTranscriptSignal> {
    let (payload, kind) = payload_of(v, "event_msg")?;
    let signal = match kind {
        "task_started" => signal("codex.event.task_started", "payload.type=task_started", TranscriptEvent::TurnStarted),
        "user_message" => signal("codex.event.user_message", "payload.type=user_message", TranscriptEvent::TurnStarted),
        "task_complete" => signal(
            "codex.event.task_complete",
            "payload.type=task_complete",
            TranscriptEvent::TurnCompleted { cost_delta_usd: None },
        ),
        "agent_message" => {
            let Some(text) = str_at(payload, "message").filter(|t| !t.trim().is_empty()) else {
                return Some(ParsedTranscriptSignal::ignored(
                    "codex.event.agent_message_empty",
                    "payload.type=agent_message",
                ));
            };
            text_signal(
                "codex.event.agent_message",
                "payload.type=agent_message",
                text.to_string(),
                &PromptPatterns::codex_cli(),
            )
        }
        "agent_reasoning" => signal(
            "codex.event.agent_reasoning",
            "payload.type=agent_reasoning",
            TranscriptEvent::Reasoning,
        ),
        "turn_aborted" => {
            let error = Some(match str_at(payload, "reason") {
                Some(reason) => format!("Turn aborted: {reason}"),
                None => "Turn aborted".to_string(),
            });
            signal(
                "codex.event.turn_aborted",
                "payload.type=turn_aborted",
                TranscriptEvent::TurnFailed { error },
            )
        }
        "error" | "stream_error" => {
            let message = str_at(payload, "message").unwrap_or("Codex error").to_string();
            signal(
                "codex.event.error",
                "payload.type=error|stream_error",
                TranscriptEvent::SystemError { message },
            )
        }
        "context_compacted" => signal(
            "codex.event.context_compacted",
            "payload.type=context_compacted",
            TranscriptEvent::ContextCompacted,
        ),
        _ => ParsedTranscriptSignal::ignored("codex.event.other", "type=event_msg"),
    };
    Some(signal)
}

fn call_id(payload: &Value) -> &str {
    str_at(payload, "call_id")
        .or_else(|| str_at(payload, "id"))
        .unwrap_or_default()
}

fn response_item(v: &Value) -> Option<ParsedTranscriptSignal> {
    let (payload, kind) = payload_of(v, "response_item")?;
    let signal = match kind {
        "function_call" => {
            let name = str_at(payload, "name").unwrap_or("unknown");
            let input = match payload.get("arguments") {
                Some(Value::String(raw)) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                }
                Some(other) => other.clone(),
                None => Value::Null,
            };
            tool_signal(
                "codex.response.function_call",
                "payload.type=function_call",
                call_id(payload),
                name,
                input,
            )
        }
        "custom_tool_call" => {
            let name = str_at(payload, "name").unwrap_or("unknown");
            let input = payload.get("input").cloned().unwrap_or(Value::Null);
            tool_signal(
                "codex.response.custom_tool_call",
                "payload.type=custom_tool_call",
                call_id(payload),
                name,
                input,
            )
        }
        "local_shell_call" => {
            let input = payload.get("action").cloned().unwrap_or(Value::Null);
            tool_signal(
                "codex.response.local_shell_call",
                "payload.type=local_shell_call",
                call_id(payload),
                "local_shell",
                input,
            )
        }
        "function_call_output" | "custom_tool_call_output" => signal(
            "codex.response.tool_output",
            "payload.type=function_call_output|custom_tool_call_output",
            TranscriptEvent::ToolResult {
                call_id: call_id(payload).to_string(),
            },
        ),
        "message" if str_at(payload, "role") == Some("assistant") => {
            match payload.get("content").and_then(|c| joined_text(c, &["output_text", "text"])) {
                Some(text) => text_signal(
                    "codex.response.assistant_message",
                    "payload.type=message role=assistant",
                    text,
                    &PromptPatterns::codex_cli(),
                ),
                None => ParsedTranscriptSignal::ignored(
                    "codex.response.assistant_empty",
                    "payload.type=message role=assistant",
                ),
            }
        }
        "message" => ParsedTranscriptSignal::ignored("codex.response.message", "payload.type=message"),
        "reasoning" => signal(
            "codex.response.reasoning",
            "payload.type=reasoning",
            TranscriptEvent::Reasoning,
        ),
        _ => ParsedTranscriptSignal::ignored("codex.response.other", "type=response_item"),
    };
    Some(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{IdleReason, Phase};
    use serde_json::json;

    fn classify(v: Value) -> Option<ParsedTranscriptSignal> {
        CodexSchema.classify_value(&v)
    }

    fn event(payload: Value) -> Value {
        json!({"timestamp": "2026-01-01T00:00:00Z", "type": "event_msg", "payload": payload})
    }

    fn item(payload: Value) -> Value {
        json!({"timestamp": "2026-01-01T00:00:00Z", "type": "response_item", "payload": payload})
    }

    #[test]
    fn metadata_lines_are_ignored() {
        assert!(classify(json!({"type": "session_meta", "payload": {"id": "x"}})).unwrap().is_ignored());
        assert!(classify(json!({"type": "turn_context", "payload": {}})).unwrap().is_ignored());
    }

    #[test]
    fn top_level_compacted_is_boundary() {
        let s = classify(json!({"type": "compacted", "payload": {"message": "summary"}})).unwrap();
        assert_eq!(s.key, "codex.compacted");
        assert_eq!(s.event, TranscriptEvent::CompactionBoundary { new_path: None });
    }

    #[test]
    fn task_lifecycle() {
        let s = classify(event(json!({"type": "task_started"}))).unwrap();
        assert_eq!(s.event, TranscriptEvent::TurnStarted);
        let s = classify(event(json!({"type": "user_message", "message": "hi"}))).unwrap();
        assert_eq!(s.event, TranscriptEvent::TurnStarted);
        let s = classify(event(json!({"type": "task_complete", "last_agent_message": "done"}))).unwrap();
        assert_eq!(s.event, TranscriptEvent::TurnCompleted { cost_delta_usd: None });
        assert_eq!(s.phase, Phase::Waiting);
    }

    #[test]
    fn agent_message_with_choice() {
        let s = classify(event(json!({"type": "agent_message", "message": "Pick one of: A, B."}))).unwrap();
        assert_eq!(s.phase, Phase::Responding);
        assert_eq!(s.idle_hint, IdleReason::WaitingForInput);
    }

    #[test]
    fn agent_message_with_solicitation() {
        let message = "Migration written.\n\nWould you like me to run it now.";
        let s = classify(event(json!({"type": "agent_message", "message": message}))).unwrap();
        assert_eq!(s.idle_hint, IdleReason::WaitingForInput);
    }

    #[test]
    fn turn_aborted_carries_reason() {
        let s = classify(event(json!({"type": "turn_aborted", "reason": "interrupted"}))).unwrap();
        assert_eq!(
            s.event,
            TranscriptEvent::TurnFailed { error: Some("Turn aborted: interrupted".to_string()) }
        );
    }

    #[test]
    fn stream_error_is_system_error() {
        let s = classify(event(json!({"type": "stream_error", "message": "reconnecting"}))).unwrap();
        assert_eq!(s.event, TranscriptEvent::SystemError { message: "reconnecting".to_string() });
    }

    #[test]
    fn token_count_and_deltas_are_ignored() {
        for t in ["token_count", "agent_message_delta", "exec_command_begin", "patch_apply_end"] {
            let s = classify(event(json!({"type": t}))).unwrap();
            assert!(s.is_ignored(), "{t} should be ignored");
        }
    }

    #[test]
    fn function_call_parses_arguments() {
        let s = classify(item(json!({
            "type": "function_call",
            "name": "shell",
            "arguments": "{\"command\":[\"bash\",\"-lc\",\"npm test\"],\"with_escalated_permissions\":true}",
            "call_id": "call_9"
        })))
        .unwrap();
        match &s.event {
            TranscriptEvent::ToolInvoked(call) => {
                assert_eq!(call.call_id, "call_9");
                assert_eq!(call.target.as_deref(), Some("npm test"));
                assert_eq!(call.hint, IdleReason::WaitingForApproval);
            }
            other => panic!("expected ToolInvoked, got {other:?}"),
        }
    }

    #[test]
    fn function_call_with_garbage_arguments_still_classifies() {
        let s = classify(item(json!({
            "type": "function_call", "name": "mystery", "arguments": "{not json", "call_id": "c"
        })))
        .unwrap();
        assert!(matches!(s.event, TranscriptEvent::ToolInvoked(_)));
        assert_eq!(s.idle_hint, IdleReason::None);
    }

    #[test]
    fn custom_apply_patch_targets_file() {
        let s = classify(item(json!({
            "type": "custom_tool_call", "name": "apply_patch", "call_id": "c2",
            "input": "*** Begin Patch\n*** Add File: docs/x.md\n+hi\n*** End Patch"
        })))
        .unwrap();
        match &s.event {
            TranscriptEvent::ToolInvoked(call) => assert_eq!(call.target.as_deref(), Some("docs/x.md")),
            other => panic!("expected ToolInvoked, got {other:?}"),
        }
    }

    #[test]
    fn local_shell_call_uses_action_command() {
        let s = classify(item(json!({
            "type": "local_shell_call", "call_id": "c3",
            "action": {"type": "exec", "command": ["ls", "-la"]}
        })))
        .unwrap();
        match &s.event {
            TranscriptEvent::ToolInvoked(call) => {
                assert_eq!(call.name, "local_shell");
                assert_eq!(call.target.as_deref(), Some("ls -la"));
            }
            other => panic!("expected ToolInvoked, got {other:?}"),
        }
    }

    #[test]
    fn tool_output() {
        let s = classify(item(json!({"type": "function_call_output", "call_id": "call_9", "output": "ok"}))).unwrap();
        assert_eq!(s.event, TranscriptEvent::ToolResult { call_id: "call_9".to_string() });
    }

    #[test]
    fn messages_by_role() {
        let s = classify(item(json!({"type": "message", "role": "assistant",
            "content": [{"type": "output_text", "text": "Done."}]})))
        .unwrap();
        assert_eq!(s.event, TranscriptEvent::AssistantText { text: "Done.".to_string() });

        let s = classify(item(json!({"type": "message", "role": "user",
            "content": [{"type": "input_text", "text": "hi"}]})))
        .unwrap();
        assert!(s.is_ignored());
    }

    #[test]
    fn reasoning_item() {
        let s = classify(item(json!({"type": "reasoning", "summary": []}))).unwrap();
        assert_eq!(s.event, TranscriptEvent::Reasoning);
    }

    #[test]
    fn unknown_envelope_is_unrecognized() {
        assert!(classify(json!({"type": "telemetry", "payload": {}})).is_none());
        assert!(classify(json!({"payload": {"type": "task_started"}})).is_none());
    }
}
