//! Codex binding notifications folded into thread state.
//!
//! ```text
//!   (none) ──▶ pending ──▶ bound
//!                 │  ╲
//!                 │   ──▶ failed
//!                 ╰──▶ pending (attempt counter)
//! ```
//!
//! `bound` may be re-announced (e.g. with a new path after a rollover);
//! anything leaving `bound` or `failed` is rejected.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::reducer::derive_subtitle;
use crate::state::{BindingState, CodexBinding, ThreadId, TranscriptInfo};
use crate::tail::WatchCommand;

/// A pushed binding notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingUpdate {
    pub thread_id: ThreadId,
    pub state: BindingState,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub codex_session_id: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of folding a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingOutcome {
    pub info: TranscriptInfo,
    pub watch: Option<WatchCommand>,
}

fn transition_allowed(from: Option<BindingState>, to: BindingState) -> bool {
    match from {
        None | Some(BindingState::Pending) => true,
        Some(BindingState::Bound) => to == BindingState::Bound,
        Some(BindingState::Failed) => false,
    }
}

/// Fold `update` into `current`. Returns `None` for a rejected transition.
pub fn apply_binding_update(current: &TranscriptInfo, update: &BindingUpdate) -> Option<BindingOutcome> {
    let from = current.binding.as_ref().map(|b| b.state);
    if !transition_allowed(from, update.state) {
        debug!(
            thread_id = %update.thread_id,
            from = ?from,
            to = %update.state,
            "rejected binding transition"
        );
        return None;
    }

    let mut info = current.clone();
    info.binding = Some(CodexBinding {
        state: update.state,
        path: update.path.clone(),
        session_id: update.codex_session_id.clone(),
        attempts: update.attempts,
        error: update.error.clone(),
    });

    let mut watch = None;
    if update.state == BindingState::Bound {
        if let Some(path) = update.path.as_deref().filter(|p| !p.is_empty()) {
            if current.transcript_path.as_deref() != Some(path) {
                let thread_id = update.thread_id.clone();
                watch = Some(match current.transcript_path {
                    None => WatchCommand::Start {
                        thread_id,
                        path: path.to_string(),
                        from_end: false,
                    },
                    Some(_) => WatchCommand::Switch {
                        thread_id,
                        path: path.to_string(),
                    },
                });
                info.transcript_path = Some(path.to_string());
            }
            if let Some(session_id) = &update.codex_session_id {
                info.session_id = Some(session_id.clone());
            }
        }
    }
    info.subtitle = derive_subtitle(&info);
    Some(BindingOutcome { info, watch })
}
