//! The runtime state reducer.
//!
//! `reduce` folds one classified transcript event into a thread record. It is
//! pure: the caller passes `now`, and the returned record is a fresh value.
//! The subtitle is recomputed from the result on every call, never patched.

use chrono::{DateTime, Utc};

use crate::signal::{
    IdleReason, ParsedTranscriptSignal, Phase, PlanMutation, TranscriptEvent,
};
use crate::state::{LastError, PlanProgress, ThreadStatus, TranscriptInfo};
use crate::tools::ToolKind;

/// Signal keys that mark a compaction in progress.
const COMPACTION_KEYS: &[&str] = &["claude.system.compact_boundary", "codex.compacted"];

const TARGET_MAX_CHARS: usize = 40;

pub fn reduce(
    current: &TranscriptInfo,
    event: &TranscriptEvent,
    signal: Option<&ParsedTranscriptSignal>,
    now: DateTime<Utc>,
) -> TranscriptInfo {
    if matches!(event, TranscriptEvent::Ignored) {
        return current.clone();
    }

    let mut next = current.clone();
    if let Some(signal) = signal {
        apply_phase(&mut next, signal);
    }

    match event {
        TranscriptEvent::TurnStarted => {
            next.idle_reason = IdleReason::None;
            next.last_error = None;
        }
        TranscriptEvent::ToolInvoked(call) => {
            next.pending_call_ids.insert(call.call_id.clone());
            next.last_tool_name = Some(call.name.clone());
            next.last_tool_target = call.target.clone();
            next.last_tool_hint = call.hint;
            // A fresh call does not by itself mean the CLI is blocked.
            next.idle_reason = if current.idle_reason.is_waiting() {
                current.idle_reason
            } else {
                IdleReason::None
            };
            if let Some(mutation) = call.plan {
                next.plan_progress = Some(apply_plan(current.plan_progress, mutation));
            }
        }
        TranscriptEvent::ToolResult { call_id } => {
            next.pending_call_ids.remove(call_id);
        }
        TranscriptEvent::AssistantText { .. } | TranscriptEvent::Reasoning => {}
        TranscriptEvent::TurnCompleted { cost_delta_usd } => {
            if let Some(delta) = cost_delta_usd {
                next.cost_usd += delta;
            }
            next.pending_call_ids.clear();
        }
        TranscriptEvent::Result { cost_usd } => {
            if let Some(cost) = cost_usd {
                next.cost_usd = *cost;
            }
            next.pending_call_ids.clear();
        }
        TranscriptEvent::CompactionBoundary { new_path } => {
            if let Some(path) = new_path {
                next.pending_transcript_switch = Some(path.clone());
            }
        }
        TranscriptEvent::SystemError { message } => record_error(&mut next, message.clone(), now),
        TranscriptEvent::TurnFailed { error } => {
            let message = error.clone().unwrap_or_else(|| "Turn failed".to_string());
            record_error(&mut next, message, now);
        }
        TranscriptEvent::ContextCompacted | TranscriptEvent::Ignored => {}
    }

    next.subtitle = derive_subtitle(&next);
    next
}

fn apply_phase(next: &mut TranscriptInfo, signal: &ParsedTranscriptSignal) {
    next.phase = signal.phase;
    next.signal_group = signal.group;
    next.signal_key = Some(signal.key);
    next.signal_pattern = Some(signal.pattern);
    next.signal_description = Some(signal.description.clone());
    if signal.idle_hint.is_waiting() {
        next.idle_reason = signal.idle_hint;
    } else if signal.phase != Phase::Waiting {
        next.idle_reason = IdleReason::None;
    }
}

fn record_error(next: &mut TranscriptInfo, message: String, now: DateTime<Utc>) {
    next.pending_call_ids.clear();
    next.last_tool_name = None;
    next.last_tool_target = None;
    next.last_tool_hint = IdleReason::None;
    next.last_error = Some(LastError { message, at: now });
}

fn apply_plan(current: Option<PlanProgress>, mutation: PlanMutation) -> PlanProgress {
    let PlanProgress { done, total } = current.unwrap_or_default();
    match mutation {
        PlanMutation::Add { count } => PlanProgress {
            done,
            total: total.saturating_add(count),
        },
        PlanMutation::Complete { count } => PlanProgress {
            done: done.saturating_add(count).min(total),
            total,
        },
        PlanMutation::Delete { count } => {
            let total = total.saturating_sub(count);
            PlanProgress {
                done: done.min(total),
                total,
            }
        }
        PlanMutation::Replace { done, total } => PlanProgress {
            done: done.min(total),
            total,
        },
    }
}

/// Human-readable one-liner for a thread record.
pub fn derive_subtitle(info: &TranscriptInfo) -> String {
    let base = base_subtitle(info);
    match info.plan_progress {
        Some(PlanProgress { done, total }) if total > 0 => {
            let current = done.saturating_add(1).min(total);
            format!("{base} ({current}/{total})")
        }
        _ => base,
    }
}

fn base_subtitle(info: &TranscriptInfo) -> String {
    if info.status == ThreadStatus::Exited {
        return "Session ended".to_string();
    }
    if info.signal_key.is_some_and(|k| COMPACTION_KEYS.contains(&k)) {
        return "Compacting conversation".to_string();
    }
    let idle = info.status == ThreadStatus::Idle;
    if idle {
        match info.idle_reason {
            IdleReason::WaitingForApproval => return "Waiting for approval".to_string(),
            IdleReason::WaitingForInput => return "Waiting for input".to_string(),
            IdleReason::None => {}
        }
    }
    match info.phase {
        Phase::Thinking => return "Thinking".to_string(),
        Phase::Tooling if info.has_live_tool() => {
            if let Some(name) = &info.last_tool_name {
                return tool_activity(name, info.last_tool_target.as_deref());
            }
        }
        Phase::Tooling | Phase::Responding => return "Working".to_string(),
        _ => {}
    }
    if !idle {
        return "Working".to_string();
    }
    match info.phase {
        Phase::Waiting if info.last_error.is_some() => "Error".to_string(),
        Phase::Waiting => "Idle · Done".to_string(),
        _ => "Idle".to_string(),
    }
}

/// "Running `npm test`", "Editing a.ts", "Using mcp__github__search".
pub fn tool_activity(name: &str, target: Option<&str>) -> String {
    let kind = ToolKind::of(name);
    let Some(verb) = kind.verb() else {
        return format!("Using {name}");
    };
    match target {
        None => verb.to_string(),
        Some(t) if kind.targets_file() => format!("{verb} {}", basename(t)),
        Some(t) if kind == ToolKind::Shell => format!("{verb} `{}`", truncate(t, TARGET_MAX_CHARS)),
        Some(t) => format!("{verb} {}", truncate(t, TARGET_MAX_CHARS)),
    }
}

fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(path)
}

fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    let single_line = text.lines().next().unwrap_or_default().trim();
    if single_line.chars().count() <= max && !text.contains('\n') {
        return single_line.to_string();
    }
    let mut out: String = single_line.chars().take(max - 1).collect();
    out.push('…');
    out
}
