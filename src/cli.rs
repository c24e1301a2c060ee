use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::agent::AgentKind;
use crate::config::ProjectConfig;
use crate::signal::ParsedTranscriptSignal;
use crate::state::TranscriptInfo;

#[derive(Parser, Debug)]
#[command(
    name = "codezilla-status",
    about = "Classify Claude Code and Codex transcripts and track agent thread status",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify every line of a transcript and print the matched rule
    Classify {
        /// Transcript file (JSON lines)
        file: PathBuf,

        /// Agent that wrote the transcript
        #[arg(long, value_enum)]
        agent: AgentKind,
    },

    /// Fold a transcript through the reducer and print the final status
    Replay {
        file: PathBuf,

        #[arg(long, value_enum)]
        agent: AgentKind,

        /// Print the final record as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Append status transitions to this JSON-lines journal
        #[arg(long)]
        journal: Option<PathBuf>,
    },

    /// Tail a transcript and print status transitions until Ctrl-C
    Watch {
        file: PathBuf,

        #[arg(long, value_enum)]
        agent: AgentKind,

        #[arg(long)]
        session_id: Option<String>,

        /// Append status transitions to this JSON-lines journal
        #[arg(long)]
        journal: Option<PathBuf>,
    },

    /// Locate the transcript for a session
    Discover {
        session_id: String,

        #[arg(long, value_enum, default_value_t = AgentKind::Claude)]
        agent: AgentKind,

        /// Working directory of the Codex session (Codex only)
        #[arg(long)]
        cwd: Option<String>,
    },

    /// Show effective configuration
    Config {
        /// Emit machine-readable JSON output
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

/// Transcript lines with their 1-based line numbers. Blank lines are skipped.
pub fn read_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(contents
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| (i + 1, l.to_string()))
        .collect())
}

/// One output row of `classify`.
pub fn render_classified(line_no: usize, signal: Option<&ParsedTranscriptSignal>) -> String {
    match signal {
        None => format!("{line_no:>5}  unrecognized"),
        Some(s) if s.is_ignored() => format!("{line_no:>5}  {:<36} ignored", s.key),
        Some(s) => {
            let mut row = format!("{line_no:>5}  {:<36} {:<10} {}", s.key, format!("{:?}", s.phase).to_lowercase(), s.description);
            if s.idle_hint.is_waiting() {
                row.push_str(&format!("  [{:?}/{:?}]", s.idle_hint, s.confidence).to_lowercase());
            }
            row
        }
    }
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<20} {value}\n"));
}

fn or_none(value: Option<&str>) -> &str {
    value.unwrap_or("(none)")
}

/// Human-readable dump of a thread record.
pub fn render_info_human(info: &TranscriptInfo) -> String {
    let mut output = String::new();
    output.push_str("Status\n");
    push_kv(&mut output, "status", format!("{:?}", info.status).to_lowercase());
    push_kv(&mut output, "subtitle", &info.subtitle);
    push_kv(&mut output, "phase", format!("{:?}", info.phase).to_lowercase());
    push_kv(&mut output, "idle_reason", format!("{:?}", info.idle_reason));
    push_kv(
        &mut output,
        "badge",
        info.badge.map(|b| format!("{b:?}")).unwrap_or_else(|| "(none)".to_string()),
    );
    push_kv(&mut output, "cost_usd", format!("{:.4}", info.cost_usd));
    output.push('\n');

    output.push_str("Activity\n");
    push_kv(&mut output, "last_signal", or_none(info.signal_key));
    push_kv(&mut output, "last_tool", or_none(info.last_tool_name.as_deref()));
    push_kv(&mut output, "last_target", or_none(info.last_tool_target.as_deref()));
    push_kv(&mut output, "pending_calls", info.pending_call_ids.len());
    if let Some(plan) = info.plan_progress {
        push_kv(&mut output, "plan", format!("{}/{}", plan.done, plan.total));
    }
    if let Some(error) = &info.last_error {
        push_kv(&mut output, "last_error", &error.message);
    }
    output.push('\n');

    output.push_str("Diagnostics\n");
    push_kv(&mut output, "health", format!("{:?}", info.diagnostics.health).to_lowercase());
    push_kv(&mut output, "parsed", info.diagnostics.parsed);
    push_kv(&mut output, "ignored", info.diagnostics.ignored);
    push_kv(&mut output, "unparsed", info.diagnostics.unparsed);
    output
}

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults, no .codezilla/config.toml found)".to_string())
}

pub fn render_config_human(config: &ProjectConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Timers\n");
    push_kv(&mut output, "sweep_interval", format!("{}ms", config.timers.sweep_interval_ms));
    push_kv(&mut output, "settle", format!("{}ms", config.timers.settle_ms));
    push_kv(&mut output, "badge_expiry", format!("{}s", config.timers.badge_expiry_secs));
    output.push('\n');

    output.push_str("Discovery\n");
    push_kv(&mut output, "initial_delay", format!("{}ms", config.discovery.initial_delay_ms));
    push_kv(&mut output, "retry_delay", format!("{}ms", config.discovery.retry_delay_ms));
    push_kv(&mut output, "max_attempts", config.discovery.max_attempts);
    output.push('\n');

    output.push_str("Diagnostics\n");
    push_kv(&mut output, "degraded_threshold", config.diagnostics.degraded_threshold);
    push_kv(&mut output, "unparsed_emit_first", config.diagnostics.unparsed_emit_first);
    push_kv(&mut output, "unparsed_emit_every", config.diagnostics.unparsed_emit_every);
    output.push('\n');

    output.push_str("Codex Binding\n");
    push_kv(&mut output, "scan_interval", format!("{}ms", config.codex_binding.scan_interval_ms));
    push_kv(&mut output, "max_attempts", config.codex_binding.max_attempts);
    push_kv(&mut output, "candidate_limit", config.codex_binding.candidate_limit);
    push_kv(&mut output, "early_skew", format!("{}ms", config.codex_binding.early_skew_ms));
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));
    output
}

pub fn render_config_json(config: &ProjectConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config).context("failed to serialize config")?;
    if let Some(map) = payload.as_object_mut() {
        map.insert(
            "source_path".to_string(),
            serde_json::Value::String(config_source_label(config_path)),
        );
    }
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}
