//! Status journal, one JSON line per published change.
//!
//! When enabled, every published change to a thread record that a person
//! would notice (status, subtitle, badge, parser health, Codex binding) is
//! appended as a self-contained JSON object with a timestamp. The journal is
//! meant for after-the-fact debugging of "why did this thread say X".

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::agent::AgentKind;
use crate::state::{Badge, BindingState, ParserHealth, ThreadId, ThreadStatus, TranscriptInfo};

#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    ThreadStarted {
        thread_id: ThreadId,
        agent: Option<AgentKind>,
    },
    StatusChanged {
        thread_id: ThreadId,
        from: ThreadStatus,
        to: ThreadStatus,
        reason: Option<String>,
    },
    SubtitleChanged {
        thread_id: ThreadId,
        subtitle: String,
    },
    BadgeChanged {
        thread_id: ThreadId,
        badge: Option<Badge>,
    },
    HealthChanged {
        thread_id: ThreadId,
        health: ParserHealth,
        parsed: u64,
        unparsed: u64,
    },
    BindingChanged {
        thread_id: ThreadId,
        state: BindingState,
        attempts: u32,
        error: Option<String>,
    },
    TranscriptChanged {
        thread_id: ThreadId,
        path: Option<String>,
    },
    ThreadRemoved {
        thread_id: ThreadId,
    },
}

/// Journal events describing the difference between two versions of a
/// thread record. `None` on either side means the thread did not exist.
pub fn transition_events(
    thread_id: &str,
    prev: Option<&TranscriptInfo>,
    next: Option<&TranscriptInfo>,
) -> Vec<JournalEvent> {
    let id = || thread_id.to_string();
    let next = match (prev, next) {
        (_, None) if prev.is_some() => return vec![JournalEvent::ThreadRemoved { thread_id: id() }],
        (_, None) => return Vec::new(),
        (_, Some(next)) => next,
    };

    let mut events = Vec::new();
    let fresh = prev.is_none_or(|p| p.status == ThreadStatus::Exited && next.status != ThreadStatus::Exited);
    if fresh {
        events.push(JournalEvent::ThreadStarted {
            thread_id: id(),
            agent: next.agent,
        });
    }
    let baseline = TranscriptInfo::default();
    let prev = if fresh { &baseline } else { prev.unwrap_or(&baseline) };

    if prev.status != next.status {
        events.push(JournalEvent::StatusChanged {
            thread_id: id(),
            from: prev.status,
            to: next.status,
            reason: next.transition_reason.clone(),
        });
    }
    if prev.subtitle != next.subtitle {
        events.push(JournalEvent::SubtitleChanged {
            thread_id: id(),
            subtitle: next.subtitle.clone(),
        });
    }
    if prev.badge != next.badge {
        events.push(JournalEvent::BadgeChanged {
            thread_id: id(),
            badge: next.badge,
        });
    }
    if prev.diagnostics.health != next.diagnostics.health {
        events.push(JournalEvent::HealthChanged {
            thread_id: id(),
            health: next.diagnostics.health,
            parsed: next.diagnostics.parsed,
            unparsed: next.diagnostics.unparsed,
        });
    }
    if let Some(binding) = &next.binding {
        let moved = prev
            .binding
            .as_ref()
            .is_none_or(|b| b.state != binding.state || b.attempts != binding.attempts);
        if moved {
            events.push(JournalEvent::BindingChanged {
                thread_id: id(),
                state: binding.state,
                attempts: binding.attempts,
                error: binding.error.clone(),
            });
        }
    }
    if prev.transcript_path != next.transcript_path {
        events.push(JournalEvent::TranscriptChanged {
            thread_id: id(),
            path: next.transcript_path.clone(),
        });
    }
    events
}

/// Writer for the JSON lines status journal.
pub struct StatusJournal {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl StatusJournal {
    /// Open (or create) the journal at `path`, appending to existing content.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create journal directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open journal: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn log(&self, event: JournalEvent) -> Result<()> {
        self.log_at(Utc::now(), event)
    }

    pub fn log_at(&self, timestamp: DateTime<Utc>, event: JournalEvent) -> Result<()> {
        let entry = JournalEntry { timestamp, event };
        let json = serde_json::to_string(&entry).context("failed to serialize journal entry")?;
        debug!(entry = %json, "status journal");

        let mut writer = self.writer.lock().map_err(|_| anyhow!("status journal lock poisoned"))?;
        writeln!(writer, "{json}").context("failed to write journal entry")?;
        writer.flush().context("failed to flush journal")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CodexBinding;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn entry_serializes_with_event_tag() {
        let entry = JournalEntry {
            timestamp: t0(),
            event: JournalEvent::BadgeChanged {
                thread_id: "t1".to_string(),
                badge: Some(Badge::NeedsApproval),
            },
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"event\":\"badge_changed\""));
        assert!(json.contains("\"badge\":\"needs_approval\""));
        assert!(json.contains("\"timestamp\":\"2023-11-14T22:13:20Z\""));
    }

    #[test]
    fn new_thread_reports_start_only() {
        let info = TranscriptInfo::new(Some(AgentKind::Claude), None);
        let events = transition_events("t1", None, Some(&info));
        assert_eq!(
            events,
            vec![JournalEvent::ThreadStarted {
                thread_id: "t1".to_string(),
                agent: Some(AgentKind::Claude),
            }]
        );
    }

    #[test]
    fn status_subtitle_and_badge_changes() {
        let prev = TranscriptInfo::new(Some(AgentKind::Claude), None);
        let mut next = prev.clone();
        next.status = ThreadStatus::Working;
        next.subtitle = "Thinking".to_string();
        next.transition_reason = Some("pty:marker command-start".to_string());
        next.set_badge(Badge::Done, t0());

        let events = transition_events("t1", Some(&prev), Some(&next));
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            JournalEvent::StatusChanged { from: ThreadStatus::Idle, to: ThreadStatus::Working, reason: Some(r), .. }
                if r == "pty:marker command-start"
        ));
        assert!(matches!(&events[1], JournalEvent::SubtitleChanged { subtitle, .. } if subtitle == "Thinking"));
        assert!(matches!(&events[2], JournalEvent::BadgeChanged { badge: Some(Badge::Done), .. }));
    }

    #[test]
    fn counters_alone_are_not_journaled() {
        let prev = TranscriptInfo::new(Some(AgentKind::Codex), None);
        let mut next = prev.clone();
        next.diagnostics.ignored = 4;
        next.last_transcript_at = Some(t0());
        assert!(transition_events("t1", Some(&prev), Some(&next)).is_empty());
    }

    #[test]
    fn binding_progress_is_journaled() {
        let prev = TranscriptInfo::new(Some(AgentKind::Codex), None);
        let mut next = prev.clone();
        next.binding = Some(CodexBinding {
            state: BindingState::Pending,
            path: None,
            session_id: None,
            attempts: 10,
            error: None,
        });
        let events = transition_events("t1", Some(&prev), Some(&next));
        assert!(matches!(&events[..], [JournalEvent::BindingChanged { attempts: 10, .. }]));
        assert!(transition_events("t1", Some(&next), Some(&next)).is_empty());
    }

    #[test]
    fn removal_is_journaled() {
        let prev = TranscriptInfo::default();
        assert_eq!(
            transition_events("t1", Some(&prev), None),
            vec![JournalEvent::ThreadRemoved {
                thread_id: "t1".to_string()
            }]
        );
        assert!(transition_events("t1", None, None).is_empty());
    }

    #[test]
    fn write_and_read_journal_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("journal").join("status.jsonl");
        let journal = StatusJournal::new(&path).unwrap();

        journal
            .log_at(
                t0(),
                JournalEvent::ThreadStarted {
                    thread_id: "t1".to_string(),
                    agent: Some(AgentKind::Codex),
                },
            )
            .unwrap();
        journal
            .log(JournalEvent::SubtitleChanged {
                thread_id: "t1".to_string(),
                subtitle: "Reading main.rs".to_string(),
            })
            .unwrap();

        let content = std::fs::read_to_string(journal.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "thread_started");
        assert_eq!(first["data"]["agent"], "codex");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["data"]["subtitle"], "Reading main.rs");
    }

    #[test]
    fn appends_to_existing_journal() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("status.jsonl");
        for _ in 0..2 {
            let journal = StatusJournal::new(&path).unwrap();
            journal
                .log(JournalEvent::ThreadRemoved {
                    thread_id: "t1".to_string(),
                })
                .unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
