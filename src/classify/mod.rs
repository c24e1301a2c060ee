//! Raw transcript line → [`ParsedTranscriptSignal`].
//!
//! `None` means the line is not JSON or its top-level shape is not one we
//! know. Recognized-but-irrelevant lines come back as `Some` with an
//! `Ignored` event so the diagnostics tracker can tell noise from drift.

use serde_json::Value;

use crate::agent::AgentKind;
use crate::diagnostics::LineOutcome;
use crate::signal::ParsedTranscriptSignal;

pub fn classify(raw_line: &str, agent: AgentKind) -> Option<ParsedTranscriptSignal> {
    let line = raw_line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    agent.schema().classify_value(&value)
}

/// Diagnostics bucket for a classification result.
pub fn outcome(signal: Option<&ParsedTranscriptSignal>) -> LineOutcome {
    match signal {
        None => LineOutcome::Unparsed,
        Some(s) if s.is_ignored() => LineOutcome::Ignored,
        Some(_) => LineOutcome::Parsed,
    }
}
