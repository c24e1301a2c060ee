//! Transcript signal classification and runtime-state reduction for agent
//! threads.
//!
//! Raw JSON-lines transcripts written by Claude Code and Codex CLI are
//! classified into semantic signals, folded into a per-thread
//! [`state::TranscriptInfo`], merged with terminal activity, and swept
//! periodically for badge expiry.

pub mod agent;
pub mod badge;
pub mod classify;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod log;
pub mod merge;
pub mod prompt;
pub mod reducer;
pub mod registry;
pub mod runtime;
pub mod signal;
pub mod state;
pub mod tail;
pub mod tools;
