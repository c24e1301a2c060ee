//! Per-thread record store.
//!
//! The registry owns every thread's [`TranscriptInfo`] and is the only place
//! records are replaced. Each handler takes the current time from its caller
//! and returns an [`Update`]: whether the published snapshot changed, plus
//! the side effects (watch commands, discovery attempts, binder
//! registrations) the runtime must carry out.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::agent::AgentKind;
use crate::badge::{SweepPolicy, assign_attention, on_focus};
use crate::classify::{classify, outcome};
use crate::diagnostics::DiagnosticsPolicy;
use crate::discovery::binding::{BindingUpdate, apply_binding_update};
use crate::discovery::rollout::Registration;
use crate::discovery::{DiscoveryAttempt, DiscoveryPolicy, LocateError, needs_discovery};
use crate::merge::{ActivityGate, PtyActivity, apply_transcript_status, merge_pty_activity};
use crate::reducer::reduce;
use crate::state::{ThreadId, ThreadStatus, TranscriptInfo};
use crate::tail::WatchCommand;

/// Timers and thresholds used by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policies {
    pub sweep: SweepPolicy,
    pub discovery: DiscoveryPolicy,
    pub diagnostics: DiagnosticsPolicy,
}

/// A thread entering the running state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStart {
    pub thread_id: ThreadId,
    pub agent: Option<AgentKind>,
    pub session_id: Option<String>,
    /// Working directory, used to bind Codex rollouts.
    pub cwd: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Transcript already known at start, e.g. a resumed session.
    pub transcript_path: Option<String>,
}

/// Side effect requested by a registry handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Watch(WatchCommand),
    ScheduleDiscovery(DiscoveryAttempt),
    RegisterRollout(Registration),
    UnregisterRollout(ThreadId),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Update {
    pub changed: bool,
    pub effects: Vec<Effect>,
}

impl Update {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed() -> Self {
        Self {
            changed: true,
            effects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct ThreadEntry {
    info: Arc<TranscriptInfo>,
    gate: ActivityGate,
    /// Bumped whenever outstanding discovery attempts become stale.
    generation: u64,
}

#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: BTreeMap<ThreadId, ThreadEntry>,
    focused: Option<ThreadId>,
    next_generation: u64,
    policies: Policies,
}

impl ThreadRegistry {
    pub fn new(policies: Policies) -> Self {
        Self {
            policies,
            ..Self::default()
        }
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    pub fn get(&self, thread_id: &str) -> Option<&Arc<TranscriptInfo>> {
        self.threads.get(thread_id).map(|e| &e.info)
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Copy-on-write view of every record.
    pub fn snapshot(&self) -> BTreeMap<ThreadId, Arc<TranscriptInfo>> {
        self.threads
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.info)))
            .collect()
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn is_focused(&self, thread_id: &str) -> bool {
        self.focused.as_deref() == Some(thread_id)
    }

    pub fn thread_started(&mut self, start: ThreadStart) -> Update {
        let generation = self.bump_generation();
        let mut update = Update::changed();

        if let Some(previous) = self.threads.get(&start.thread_id) {
            if previous.info.transcript_path.is_some() {
                update.effects.push(Effect::Watch(WatchCommand::Stop {
                    thread_id: start.thread_id.clone(),
                }));
            }
            if previous.info.agent == Some(AgentKind::Codex) {
                update.effects.push(Effect::UnregisterRollout(start.thread_id.clone()));
            }
        }

        let mut info = TranscriptInfo::new(start.agent, start.session_id.clone());
        if let Some(path) = start.transcript_path.clone().filter(|p| !p.is_empty()) {
            update.effects.push(Effect::Watch(WatchCommand::Start {
                thread_id: start.thread_id.clone(),
                path: path.clone(),
                from_end: true,
            }));
            info.transcript_path = Some(path);
        }

        if needs_discovery(&info) {
            if let Some(session_id) = &info.session_id {
                update.effects.push(Effect::ScheduleDiscovery(self.policies.discovery.first(
                    &start.thread_id,
                    session_id,
                    generation,
                )));
            }
        }

        if info.agent == Some(AgentKind::Codex) && info.transcript_path.is_none() {
            if let Some(cwd) = start.cwd.as_deref().filter(|c| !c.is_empty()) {
                update.effects.push(Effect::RegisterRollout(Registration::new(
                    &start.thread_id,
                    cwd,
                    start.started_at,
                    start.session_id.clone(),
                )));
            }
        }

        info!(thread_id = %start.thread_id, agent = ?start.agent, "thread started");
        self.threads.insert(
            start.thread_id,
            ThreadEntry {
                info: Arc::new(info),
                gate: ActivityGate::default(),
                generation,
            },
        );
        update
    }

    pub fn thread_stopped(&mut self, thread_id: &str) -> Update {
        let generation = self.bump_generation();
        let Some(entry) = self.threads.get_mut(thread_id) else {
            return Update::unchanged();
        };
        entry.generation = generation;
        if entry.info.status == ThreadStatus::Exited {
            return Update::unchanged();
        }

        let mut update = Update::changed();
        if entry.info.transcript_path.is_some() {
            update.effects.push(Effect::Watch(WatchCommand::Stop {
                thread_id: thread_id.to_string(),
            }));
        }
        if entry.info.agent == Some(AgentKind::Codex) {
            update.effects.push(Effect::UnregisterRollout(thread_id.to_string()));
        }
        entry.info = Arc::new(entry.info.exited());
        info!(thread_id, "thread exited");
        update
    }

    pub fn thread_removed(&mut self, thread_id: &str) -> Update {
        let Some(entry) = self.threads.remove(thread_id) else {
            return Update::unchanged();
        };
        if self.is_focused(thread_id) {
            self.focused = None;
        }
        let mut update = Update::changed();
        if entry.info.transcript_path.is_some() && entry.info.status != ThreadStatus::Exited {
            update.effects.push(Effect::Watch(WatchCommand::Stop {
                thread_id: thread_id.to_string(),
            }));
        }
        if entry.info.agent == Some(AgentKind::Codex) {
            update.effects.push(Effect::UnregisterRollout(thread_id.to_string()));
        }
        debug!(thread_id, "thread removed");
        update
    }

    /// Move focus. Focusing a thread clears its badge.
    pub fn focus(&mut self, thread_id: Option<&str>) -> Update {
        self.focused = thread_id.map(str::to_string);
        let Some(entry) = thread_id.and_then(|id| self.threads.get_mut(id)) else {
            return Update::unchanged();
        };
        match on_focus(&entry.info) {
            Some(next) => {
                entry.info = Arc::new(next);
                Update::changed()
            }
            None => Update::unchanged(),
        }
    }

    /// Classify, reduce and merge one transcript line.
    pub fn transcript_line(&mut self, thread_id: &str, line: &str, now: DateTime<Utc>) -> Update {
        let focused = self.is_focused(thread_id);
        let policy = self.policies.diagnostics;
        let Some(entry) = self.threads.get_mut(thread_id) else {
            debug!(thread_id, "transcript line for unknown thread");
            return Update::unchanged();
        };

        let prev = Arc::clone(&entry.info);
        let signal = prev.agent.and_then(|agent| classify(line, agent));
        let mut update = Update::unchanged();

        let mut next = match &signal {
            Some(sig) if !sig.is_ignored() && prev.status != ThreadStatus::Exited => {
                let reduced = reduce(&prev, &sig.event, Some(sig), now);
                let mut merged = apply_transcript_status(&reduced);
                assign_attention(&prev, &mut merged, focused, now);
                merged
            }
            _ => (*prev).clone(),
        };

        if let Some(new_path) = next.pending_transcript_switch.take() {
            if next.transcript_path.as_deref() != Some(new_path.as_str()) {
                info!(thread_id, path = %new_path, "transcript switched after compaction");
                update.effects.push(Effect::Watch(WatchCommand::Switch {
                    thread_id: thread_id.to_string(),
                    path: new_path.clone(),
                }));
                next.transcript_path = Some(new_path);
            }
        }

        let semantic = next != *prev;
        next.last_transcript_at = Some(now);
        let emit = policy.record(&mut next.diagnostics, outcome(signal.as_ref()), now);
        if signal.is_none() {
            debug!(thread_id, unparsed = next.diagnostics.unparsed, "unrecognized transcript line");
        }

        entry.info = Arc::new(next);
        update.changed = semantic || emit;
        update
    }

    /// Fold one terminal activity report.
    pub fn pty_activity(&mut self, thread_id: &str, activity: &PtyActivity, now: DateTime<Utc>) -> Update {
        let focused = self.is_focused(thread_id);
        let Some(entry) = self.threads.get_mut(thread_id) else {
            return Update::unchanged();
        };
        if !entry.gate.admit(activity.source) {
            debug!(thread_id, source = %activity.source, "output heuristic ignored after markers");
            return Update::unchanged();
        }

        let prev = Arc::clone(&entry.info);
        let mut next = merge_pty_activity(&prev, activity, now);
        if next.status == ThreadStatus::Idle && prev.status != ThreadStatus::Idle {
            assign_attention(&prev, &mut next, focused, now);
        }
        let changed = differs_ignoring_clock(&prev, &next);
        if changed {
            debug!(
                thread_id,
                status = ?next.status,
                reason = next.transition_reason.as_deref().unwrap_or(""),
                "terminal activity"
            );
        }
        entry.info = Arc::new(next);
        Update {
            changed,
            effects: Vec::new(),
        }
    }

    /// Whether a scheduled attempt should still run its lookup.
    pub fn discovery_due(&self, attempt: &DiscoveryAttempt) -> bool {
        self.threads
            .get(&attempt.thread_id)
            .is_some_and(|e| e.generation == attempt.generation && needs_discovery(&e.info))
    }

    /// Fold the outcome of a locator lookup.
    pub fn discovery_result(
        &mut self,
        attempt: &DiscoveryAttempt,
        result: Result<Option<PathBuf>, LocateError>,
    ) -> Update {
        if !self.discovery_due(attempt) {
            debug!(
                thread_id = %attempt.thread_id,
                generation = attempt.generation,
                "stale discovery result discarded"
            );
            return Update::unchanged();
        }

        match result {
            Ok(Some(path)) => {
                let generation = self.bump_generation();
                let Some(entry) = self.threads.get_mut(&attempt.thread_id) else {
                    return Update::unchanged();
                };
                let path = path.to_string_lossy().into_owned();
                info!(
                    thread_id = %attempt.thread_id,
                    attempt = attempt.attempt,
                    path = %path,
                    "transcript discovered"
                );
                let mut next = (*entry.info).clone();
                next.transcript_path = Some(path.clone());
                entry.info = Arc::new(next);
                entry.generation = generation;
                Update {
                    changed: true,
                    effects: vec![Effect::Watch(WatchCommand::Start {
                        thread_id: attempt.thread_id.clone(),
                        path,
                        from_end: false,
                    })],
                }
            }
            other => {
                if let Err(e) = other {
                    warn!(thread_id = %attempt.thread_id, attempt = attempt.attempt, "transcript lookup failed: {e}");
                }
                match self.policies.discovery.retry(attempt) {
                    Some(next) => Update {
                        changed: false,
                        effects: vec![Effect::ScheduleDiscovery(next)],
                    },
                    None => {
                        warn!(
                            thread_id = %attempt.thread_id,
                            attempts = attempt.attempt + 1,
                            "transcript discovery abandoned"
                        );
                        Update::unchanged()
                    }
                }
            }
        }
    }

    /// Fold a pushed Codex binding notification.
    pub fn binding_update(&mut self, update: &BindingUpdate) -> Update {
        let Some(entry) = self.threads.get_mut(&update.thread_id) else {
            return Update::unchanged();
        };
        if entry.info.agent != Some(AgentKind::Codex) {
            debug!(thread_id = %update.thread_id, "binding update for non-codex thread ignored");
            return Update::unchanged();
        }
        let Some(outcome) = apply_binding_update(&entry.info, update) else {
            return Update::unchanged();
        };
        let changed = outcome.info != *entry.info;
        entry.info = Arc::new(outcome.info);
        Update {
            changed,
            effects: outcome.watch.into_iter().map(Effect::Watch).collect(),
        }
    }

    /// The watcher gave up on a thread's transcript.
    pub fn watch_failed(&mut self, thread_id: &str, error: &str) -> Update {
        let Some(entry) = self.threads.get_mut(thread_id) else {
            return Update::unchanged();
        };
        warn!(thread_id, "transcript watch failed: {error}");
        if entry.info.transcript_path.is_none() {
            return Update::unchanged();
        }
        let mut next = (*entry.info).clone();
        next.transcript_path = None;
        entry.info = Arc::new(next);
        Update::changed()
    }

    /// Run the badge timer over every thread. Returns the ids that changed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<ThreadId> {
        let policy = self.policies.sweep;
        let mut changed = Vec::new();
        for (id, entry) in self.threads.iter_mut() {
            let focused = self.focused.as_deref() == Some(id.as_str());
            if let Some(next) = policy.sweep(&entry.info, focused, now) {
                entry.info = Arc::new(next);
                changed.push(id.clone());
            }
        }
        changed
    }
}

fn differs_ignoring_clock(prev: &TranscriptInfo, next: &TranscriptInfo) -> bool {
    let mut aligned = prev.clone();
    aligned.last_pty_at = next.last_pty_at;
    aligned.last_transcript_at = next.last_transcript_at;
    aligned != *next
}
