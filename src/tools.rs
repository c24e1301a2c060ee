//! Tool-call metadata: idle hints, display targets, plan mutations, verbs.
//!
//! Everything here is table-driven on the tool name as the agents write it.
//! Claude Code uses PascalCase names (`Bash`, `Edit`), Codex snake_case
//! (`shell`, `apply_patch`).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::signal::{IdleReason, PlanMutation};

/// Coarse tool family, used for subtitle verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Shell,
    FileEdit,
    FileRead,
    Search,
    Web,
    Delegate,
    Plan,
    Question,
    Other,
}

impl ToolKind {
    pub fn of(name: &str) -> Self {
        match name {
            "Bash" | "BashOutput" | "shell" | "exec_command" | "local_shell" | "container.exec" => ToolKind::Shell,
            "Write" | "Edit" | "MultiEdit" | "NotebookEdit" | "apply_patch" => ToolKind::FileEdit,
            "Read" | "read_file" | "view_image" => ToolKind::FileRead,
            "Grep" | "Glob" | "LS" | "grep_files" | "list_dir" => ToolKind::Search,
            "WebFetch" | "WebSearch" | "web_search" => ToolKind::Web,
            "Task" | "Agent" => ToolKind::Delegate,
            "TodoWrite" | "TaskCreate" | "TaskUpdate" | "update_plan" => ToolKind::Plan,
            "AskUserQuestion" | "ExitPlanMode" => ToolKind::Question,
            _ => ToolKind::Other,
        }
    }

    /// Present-participle verb for the subtitle. `None` means "Using <name>".
    pub fn verb(self) -> Option<&'static str> {
        match self {
            ToolKind::Shell => Some("Running"),
            ToolKind::FileEdit => Some("Editing"),
            ToolKind::FileRead => Some("Reading"),
            ToolKind::Search => Some("Searching"),
            ToolKind::Web => Some("Browsing"),
            ToolKind::Delegate => Some("Delegating"),
            ToolKind::Plan => Some("Planning"),
            ToolKind::Question => Some("Asking"),
            ToolKind::Other => None,
        }
    }

    /// Targets of these kinds are file paths.
    pub fn targets_file(self) -> bool {
        matches!(self, ToolKind::FileEdit | ToolKind::FileRead)
    }
}

const APPROVAL_TOOLS: &[&str] = &[
    "Write",
    "Edit",
    "MultiEdit",
    "NotebookEdit",
    "Bash",
    "WebFetch",
    "WebSearch",
    "shell",
    "exec_command",
    "local_shell",
    "apply_patch",
    "web_search",
];

const INPUT_TOOLS: &[&str] = &["AskUserQuestion", "ExitPlanMode"];

/// Idle reason the CLI enters if this call does not complete promptly.
pub fn idle_hint_for_tool(name: &str, input: &Value) -> IdleReason {
    if requests_escalation(input) {
        return IdleReason::WaitingForApproval;
    }
    if INPUT_TOOLS.contains(&name) {
        IdleReason::WaitingForInput
    } else if APPROVAL_TOOLS.contains(&name) {
        IdleReason::WaitingForApproval
    } else {
        IdleReason::None
    }
}

fn requests_escalation(input: &Value) -> bool {
    input.get("with_escalated_permissions").and_then(Value::as_bool) == Some(true)
        || input.get("sandbox_permissions").and_then(Value::as_str) == Some("require_escalated")
        || input.get("dangerouslyDisableSandbox").and_then(Value::as_bool) == Some(true)
}

static PATCH_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\*\*\* (?:Add|Update|Delete) File: (.+?)\s*$").unwrap());

/// Human-meaningful target of a tool call.
pub fn extract_target(name: &str, input: &Value) -> Option<String> {
    let kind = ToolKind::of(name);
    let target = match kind {
        ToolKind::Shell => shell_command(input),
        ToolKind::FileEdit if name == "apply_patch" => patch_target(input),
        ToolKind::FileEdit | ToolKind::FileRead => str_field(input, &["file_path", "notebook_path", "path"]),
        ToolKind::Search => str_field(input, &["pattern", "path"]),
        ToolKind::Web => str_field(input, &["url", "query"]),
        ToolKind::Delegate => str_field(input, &["description"]),
        _ => None,
    };
    target.filter(|t| !t.trim().is_empty())
}

fn str_field(input: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| input.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn shell_command(input: &Value) -> Option<String> {
    let command = input.get("command").or_else(|| input.get("cmd"))?;
    match command {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let parts: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
            Some(join_shell_argv(&parts))
        }
        _ => None,
    }
}

/// `["bash", "-lc", "cargo test"]` displays as `cargo test`.
fn join_shell_argv(parts: &[&str]) -> String {
    if let [shell, flag, script] = parts {
        if matches!(*shell, "bash" | "sh" | "zsh" | "/bin/bash" | "/bin/sh" | "/bin/zsh")
            && flag.starts_with('-')
            && flag.ends_with('c')
        {
            return script.to_string();
        }
    }
    parts
        .iter()
        .map(|p| {
            if p.is_empty() || p.contains(char::is_whitespace) || p.contains(['"', '\'']) {
                format!("'{}'", p.replace('\'', r"'\''"))
            } else {
                p.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn patch_target(input: &Value) -> Option<String> {
    let patch = match input {
        Value::String(s) => s.as_str(),
        other => other
            .get("input")
            .or_else(|| other.get("patch"))
            .and_then(Value::as_str)?,
    };
    PATCH_FILE_RE
        .captures(patch)
        .map(|c| c[1].to_string())
}

/// Plan/checklist change carried by a tool call, if any.
pub fn plan_mutation(name: &str, input: &Value) -> Option<PlanMutation> {
    match name {
        "TodoWrite" => list_replace(input.get("todos")?),
        "update_plan" => list_replace(input.get("plan")?),
        "TaskCreate" => Some(PlanMutation::Add { count: 1 }),
        "TaskUpdate" => match input.get("status").and_then(Value::as_str)? {
            "completed" => Some(PlanMutation::Complete { count: 1 }),
            "deleted" => Some(PlanMutation::Delete { count: 1 }),
            _ => None,
        },
        _ => None,
    }
}

fn list_replace(items: &Value) -> Option<PlanMutation> {
    let items = items.as_array()?;
    let done = items
        .iter()
        .filter(|item| item.get("status").and_then(Value::as_str) == Some("completed"))
        .count();
    Some(PlanMutation::Replace {
        done: u32::try_from(done).unwrap_or(u32::MAX),
        total: u32::try_from(items.len()).unwrap_or(u32::MAX),
    })
}
