//! Transcript discovery and binding.
//!
//! Claude Code does not announce where it writes its transcript, so the
//! workspace polls a [`TranscriptLocator`] with a bounded number of retries:
//!
//! ```text
//!   start ──initial delay──▶ attempt 0 ──found──▶ watch, done
//!                               │
//!                            not found ──retry delay──▶ attempt n ... max ──▶ abandon
//! ```
//!
//! Every scheduled attempt carries the generation it was scheduled under.
//! Stopping, restarting or binding a thread bumps the generation, and results
//! from older generations are discarded when they arrive.
//!
//! Codex announces its rollout file indirectly; [`rollout::RolloutBinder`]
//! finds it and [`binding`] folds the resulting notifications into thread
//! state.

pub mod binding;
pub mod locate;
pub mod rollout;

use std::path::PathBuf;
use std::time::Duration;

use crate::agent::AgentKind;
use crate::state::{ThreadId, ThreadStatus, TranscriptInfo};

pub use locate::FsTranscriptLocator;

#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("HOME is not set")]
    NoHome,
    #[error("failed to scan {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transcript path is outside the allowed roots: {0}")]
    OutsideRoots(PathBuf),
}

/// Looks up the transcript file for a Claude Code session.
///
/// Implementations may block on the filesystem; callers run them on the
/// blocking pool.
pub trait TranscriptLocator: Send + Sync {
    fn discover(&self, session_id: &str) -> Result<Option<PathBuf>, LocateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryPolicy {
    pub initial_delay: Duration,
    pub retry_delay: Duration,
    pub max_attempts: u32,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            retry_delay: Duration::from_millis(1500),
            max_attempts: 20,
        }
    }
}

/// One scheduled lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryAttempt {
    pub thread_id: ThreadId,
    pub session_id: String,
    pub generation: u64,
    /// Zero-based attempt number.
    pub attempt: u32,
    /// Delay before the lookup runs.
    pub delay: Duration,
}

impl DiscoveryPolicy {
    pub fn first(&self, thread_id: &str, session_id: &str, generation: u64) -> DiscoveryAttempt {
        DiscoveryAttempt {
            thread_id: thread_id.to_string(),
            session_id: session_id.to_string(),
            generation,
            attempt: 0,
            delay: self.initial_delay,
        }
    }

    /// The follow-up to a failed attempt, or `None` once retries are spent.
    pub fn retry(&self, previous: &DiscoveryAttempt) -> Option<DiscoveryAttempt> {
        let attempt = previous.attempt + 1;
        (attempt < self.max_attempts).then(|| DiscoveryAttempt {
            attempt,
            delay: self.retry_delay,
            ..previous.clone()
        })
    }
}

/// Whether a thread still needs its transcript located.
pub fn needs_discovery(info: &TranscriptInfo) -> bool {
    info.status != ThreadStatus::Exited
        && info.agent == Some(AgentKind::Claude)
        && info.transcript_path.is_none()
        && info.session_id.as_deref().is_some_and(|s| !s.is_empty())
}
