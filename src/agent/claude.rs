//! Claude Code transcript schema.
//!
//! Covers both the session files under `~/.claude/projects/<dir>/<id>.jsonl`
//! and `-p --output-format stream-json` output, which share line shapes
//! (`type` = `user` / `assistant` / `system` / `result`).

use serde_json::Value;

use crate::agent::{Rule, TranscriptSchema, joined_text, signal, str_at, text_signal, tool_signal};
use crate::prompt::PromptPatterns;
use crate::signal::{ParsedTranscriptSignal, TranscriptEvent};

pub struct ClaudeSchema;

impl TranscriptSchema for ClaudeSchema {
    fn name(&self) -> &'static str {
        "claude-code"
    }

    fn rules(&self) -> &'static [Rule] {
        RULES
    }

    fn prompt_patterns(&self) -> PromptPatterns {
        PromptPatterns::claude_code()
    }
}

const RULES: &[Rule] = &[
    result_line,
    system_line,
    compact_summary,
    tool_result,
    user_line,
    assistant_line,
    noise,
];

/// Line types that prove the stream is alive but carry no state.
const NOISE_TYPES: &[&str] = &[
    "summary",
    "file-history-snapshot",
    "progress",
    "queue-operation",
    "stream_event",
    "ping",
    "keep_alive",
    "message_start",
    "message_delta",
    "message_stop",
    "content_block_start",
    "content_block_delta",
    "content_block_stop",
];

fn line_type(v: &Value) -> Option<&str> {
    str_at(v, "type")
}

fn content(v: &Value) -> Option<&Value> {
    v.get("message").and_then(|m| m.get("content"))
}

fn blocks_of<'a>(v: &'a Value, block_type: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    content(v)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(move |b| str_at(b, "type") == Some(block_type))
}

fn result_line(v: &Value) -> Option<ParsedTranscriptSignal> {
    if line_type(v) != Some("result") {
        return None;
    }
    if v.get("is_error").and_then(Value::as_bool) == Some(true) {
        let error = str_at(v, "result")
            .or_else(|| str_at(v, "error"))
            .or_else(|| str_at(v, "subtype"))
            .map(str::to_string);
        return Some(signal(
            "claude.result.error",
            "type=result is_error=true",
            TranscriptEvent::TurnFailed { error },
        ));
    }
    let cost_usd = v
        .get("total_cost_usd")
        .or_else(|| v.get("cost_usd"))
        .and_then(Value::as_f64);
    Some(signal("claude.result", "type=result", TranscriptEvent::Result { cost_usd }))
}

fn system_line(v: &Value) -> Option<ParsedTranscriptSignal> {
    if line_type(v) != Some("system") {
        return None;
    }
    let subtype = str_at(v, "subtype").unwrap_or_default();
    if subtype == "compact_boundary" {
        let meta = v.get("compactMetadata").or_else(|| v.get("compact_metadata"));
        let new_path = [Some(v), meta]
            .into_iter()
            .flatten()
            .find_map(|o| str_at(o, "transcript_path").or_else(|| str_at(o, "transcriptPath")))
            .map(str::to_string);
        return Some(signal(
            "claude.system.compact_boundary",
            "type=system subtype=compact_boundary",
            TranscriptEvent::CompactionBoundary { new_path },
        ));
    }
    if subtype == "api_error" || str_at(v, "level") == Some("error") {
        let message = str_at(v, "content")
            .or_else(|| v.get("error").and_then(|e| str_at(e, "message")))
            .or_else(|| str_at(v, "error"))
            .unwrap_or("API error")
            .to_string();
        return Some(signal(
            "claude.system.api_error",
            "type=system subtype=api_error|level=error",
            TranscriptEvent::SystemError { message },
        ));
    }
    if subtype == "turn_duration" {
        let cost_delta_usd = v.get("costUSD").and_then(Value::as_f64);
        return Some(signal(
            "claude.system.turn_duration",
            "type=system subtype=turn_duration",
            TranscriptEvent::TurnCompleted { cost_delta_usd },
        ));
    }
    Some(ParsedTranscriptSignal::ignored("claude.system.other", "type=system"))
}

fn compact_summary(v: &Value) -> Option<ParsedTranscriptSignal> {
    if line_type(v) != Some("user") || v.get("isCompactSummary").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    Some(signal(
        "claude.user.compact_summary",
        "type=user isCompactSummary=true",
        TranscriptEvent::ContextCompacted,
    ))
}

fn tool_result(v: &Value) -> Option<ParsedTranscriptSignal> {
    if line_type(v) != Some("user") {
        return None;
    }
    let block = blocks_of(v, "tool_result").next()?;
    let call_id = str_at(block, "tool_use_id").unwrap_or_default().to_string();
    Some(signal(
        "claude.user.tool_result",
        "type=user content[].type=tool_result",
        TranscriptEvent::ToolResult { call_id },
    ))
}

fn user_line(v: &Value) -> Option<ParsedTranscriptSignal> {
    if line_type(v) != Some("user") {
        return None;
    }
    if v.get("isMeta").and_then(Value::as_bool) == Some(true) {
        return Some(ParsedTranscriptSignal::ignored("claude.user.meta", "type=user isMeta=true"));
    }
    let Some(text) = content(v).and_then(|c| joined_text(c, &["text"])) else {
        return Some(ParsedTranscriptSignal::ignored("claude.user.other", "type=user"));
    };
    let trimmed = text.trim_start();
    if trimmed.starts_with("<command-") || trimmed.starts_with("<local-command-") {
        return Some(ParsedTranscriptSignal::ignored(
            "claude.user.command",
            "type=user text=<command-*>",
        ));
    }
    if trimmed.starts_with("[Request interrupted by user") {
        return Some(
            signal(
                "claude.user.interrupted",
                "type=user text=[Request interrupted by user",
                TranscriptEvent::TurnCompleted { cost_delta_usd: None },
            )
            .describe("Interrupted by user"),
        );
    }
    Some(signal("claude.user.prompt", "type=user text", TranscriptEvent::TurnStarted))
}

fn assistant_line(v: &Value) -> Option<ParsedTranscriptSignal> {
    if line_type(v) != Some("assistant") {
        return None;
    }
    if v.get("isApiErrorMessage").and_then(Value::as_bool) == Some(true) {
        let message = content(v)
            .and_then(|c| joined_text(c, &["text"]))
            .unwrap_or_else(|| "API error".to_string());
        return Some(signal(
            "claude.assistant.api_error",
            "type=assistant isApiErrorMessage=true",
            TranscriptEvent::SystemError { message },
        ));
    }
    if let Some(block) = blocks_of(v, "tool_use").next() {
        let call_id = str_at(block, "id").unwrap_or_default();
        let name = str_at(block, "name").unwrap_or("unknown");
        let input = block.get("input").cloned().unwrap_or(Value::Null);
        return Some(tool_signal(
            "claude.assistant.tool_use",
            "type=assistant content[].type=tool_use",
            call_id,
            name,
            input,
        ));
    }
    if blocks_of(v, "thinking").next().is_some() || blocks_of(v, "redacted_thinking").next().is_some() {
        return Some(signal(
            "claude.assistant.thinking",
            "type=assistant content[].type=thinking",
            TranscriptEvent::Reasoning,
        ));
    }
    if let Some(text) = content(v).and_then(|c| joined_text(c, &["text"])) {
        return Some(text_signal(
            "claude.assistant.text",
            "type=assistant content[].type=text",
            text,
            &PromptPatterns::claude_code(),
        ));
    }
    Some(ParsedTranscriptSignal::ignored("claude.assistant.empty", "type=assistant"))
}

fn noise(v: &Value) -> Option<ParsedTranscriptSignal> {
    let t = line_type(v)?;
    NOISE_TYPES
        .contains(&t)
        .then(|| ParsedTranscriptSignal::ignored("claude.noise", "type=<noise>"))
}
