//! The workspace event loop.
//!
//! A single task owns the [`ThreadRegistry`] and handles one
//! [`WorkspaceInput`] at a time, so per-thread line order is preserved and no
//! record is ever observed half-updated. Timers and lookups run in spawned
//! tasks and post their results back into the same channel:
//!
//! ```text
//!   tail tasks ──TranscriptLine──▶ ┌───────────┐ ──watch──▶ snapshot subscribers
//!   UI/host ─────lifecycle/pty───▶ │ workspace │
//!   discovery ───Due/Result──────▶ │   loop    │ ──Watch──▶ TranscriptWatcher
//!   rollout binder ──Binding─────▶ └───────────┘ ──Register──▶ rollout binder
//!                                       ▲
//!                                  1s sweep tick
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::discovery::binding::BindingUpdate;
use crate::discovery::rollout::{Registration, RolloutBinder, load_candidates};
use crate::discovery::{DiscoveryAttempt, LocateError, TranscriptLocator};
use crate::log::{StatusJournal, transition_events};
use crate::merge::PtyActivity;
use crate::registry::{Effect, Policies, ThreadRegistry, ThreadStart, Update};
use crate::state::{ThreadId, TranscriptInfo};
use crate::tail::{self, TailSettings, TailWatcher, TranscriptWatcher};

/// Published view of every thread.
pub type Snapshot = Arc<BTreeMap<ThreadId, Arc<TranscriptInfo>>>;

/// Source of wall-clock time for the loop.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const INPUT_CAPACITY: usize = 1024;

/// Everything the workspace loop reacts to.
#[derive(Debug)]
pub enum WorkspaceInput {
    ThreadStarted(ThreadStart),
    ThreadStopped {
        thread_id: ThreadId,
    },
    ThreadRemoved {
        thread_id: ThreadId,
    },
    Focus {
        thread_id: Option<ThreadId>,
    },
    TranscriptLine {
        thread_id: ThreadId,
        line: String,
    },
    PtyActivity {
        thread_id: ThreadId,
        activity: PtyActivity,
    },
    Binding(BindingUpdate),
    WatchFailed {
        thread_id: ThreadId,
        error: String,
    },
    /// A scheduled discovery attempt's delay elapsed.
    DiscoveryDue(DiscoveryAttempt),
    DiscoveryResult {
        attempt: DiscoveryAttempt,
        result: Result<Option<PathBuf>, LocateError>,
    },
    Shutdown,
}

impl WorkspaceInput {
    fn thread_id(&self) -> Option<&str> {
        match self {
            WorkspaceInput::ThreadStarted(start) => Some(&start.thread_id),
            WorkspaceInput::ThreadStopped { thread_id }
            | WorkspaceInput::ThreadRemoved { thread_id }
            | WorkspaceInput::TranscriptLine { thread_id, .. }
            | WorkspaceInput::PtyActivity { thread_id, .. }
            | WorkspaceInput::WatchFailed { thread_id, .. } => Some(thread_id),
            WorkspaceInput::Focus { thread_id } => thread_id.as_deref(),
            WorkspaceInput::Binding(update) => Some(&update.thread_id),
            WorkspaceInput::DiscoveryDue(attempt) | WorkspaceInput::DiscoveryResult { attempt, .. } => {
                Some(&attempt.thread_id)
            }
            WorkspaceInput::Shutdown => None,
        }
    }
}

/// Commands for the rollout binder task.
#[derive(Debug)]
enum BinderCommand {
    Register(Registration),
    Unregister(ThreadId),
}

/// Cloneable handle for feeding the loop and reading snapshots.
#[derive(Clone)]
pub struct WorkspaceHandle {
    inputs: mpsc::Sender<WorkspaceInput>,
    snapshots: watch::Receiver<Snapshot>,
}

impl WorkspaceHandle {
    /// Queue an input. Fails only once the loop has stopped.
    pub async fn send(&self, input: WorkspaceInput) -> anyhow::Result<()> {
        self.inputs
            .send(input)
            .await
            .map_err(|_| anyhow::anyhow!("workspace loop has stopped"))
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.inputs.send(WorkspaceInput::Shutdown).await;
    }
}

pub struct Workspace {
    registry: ThreadRegistry,
    inputs: mpsc::Receiver<WorkspaceInput>,
    sender: mpsc::Sender<WorkspaceInput>,
    snapshots: watch::Sender<Snapshot>,
    locator: Arc<dyn TranscriptLocator>,
    watcher: Box<dyn TranscriptWatcher>,
    binder: Option<RolloutBinder>,
    binder_commands: Option<mpsc::UnboundedSender<BinderCommand>>,
    journal: Option<StatusJournal>,
    clock: Clock,
    sweep_interval: Duration,
}

impl Workspace {
    /// A workspace tailing transcripts with the default polling watcher.
    pub fn new(policies: Policies, locator: Arc<dyn TranscriptLocator>, tail: TailSettings) -> Self {
        let (sender, inputs) = mpsc::channel(INPUT_CAPACITY);
        let (snapshots, _) = watch::channel(Snapshot::default());
        let watcher = Box::new(TailWatcher::new(sender.clone(), tail));
        Self {
            registry: ThreadRegistry::new(policies),
            inputs,
            sender,
            snapshots,
            locator,
            watcher,
            binder: None,
            binder_commands: None,
            journal: None,
            clock: Arc::new(Utc::now),
            sweep_interval: Duration::from_secs(1),
        }
    }

    /// Replace the watcher. The factory receives the loop's input sender.
    pub fn with_watcher<F>(mut self, make: F) -> Self
    where
        F: FnOnce(mpsc::Sender<WorkspaceInput>) -> Box<dyn TranscriptWatcher>,
    {
        self.watcher = make(self.sender.clone());
        self
    }

    pub fn with_binder(mut self, binder: RolloutBinder) -> Self {
        self.binder = Some(binder);
        self
    }

    pub fn with_journal(mut self, journal: StatusJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn handle(&self) -> WorkspaceHandle {
        WorkspaceHandle {
            inputs: self.sender.clone(),
            snapshots: self.snapshots.subscribe(),
        }
    }

    /// Run until a `Shutdown` input arrives. Returns the final snapshot.
    pub async fn run(mut self) -> Snapshot {
        if let Some(binder) = self.binder.take() {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_binder(binder, rx, self.sender.clone()));
            self.binder_commands = Some(tx);
        }

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("workspace loop started");

        loop {
            tokio::select! {
                input = self.inputs.recv() => match input {
                    None | Some(WorkspaceInput::Shutdown) => break,
                    Some(input) => self.handle_input(input),
                },
                _ = sweep.tick() => self.run_sweep(),
            }
        }

        info!(threads = self.registry.len(), "workspace loop stopped");
        self.snapshots.borrow().clone()
    }

    fn handle_input(&mut self, input: WorkspaceInput) {
        let now = (self.clock)();
        let thread_id = input.thread_id().map(str::to_string);
        let before = thread_id.as_deref().and_then(|id| self.registry.get(id).cloned());

        let update = match input {
            WorkspaceInput::ThreadStarted(start) => self.registry.thread_started(start),
            WorkspaceInput::ThreadStopped { thread_id } => self.registry.thread_stopped(&thread_id),
            WorkspaceInput::ThreadRemoved { thread_id } => self.registry.thread_removed(&thread_id),
            WorkspaceInput::Focus { thread_id } => self.registry.focus(thread_id.as_deref()),
            WorkspaceInput::TranscriptLine { thread_id, line } => {
                self.registry.transcript_line(&thread_id, &line, now)
            }
            WorkspaceInput::PtyActivity { thread_id, activity } => {
                self.registry.pty_activity(&thread_id, &activity, now)
            }
            WorkspaceInput::Binding(update) => self.registry.binding_update(&update),
            WorkspaceInput::WatchFailed { thread_id, error } => self.registry.watch_failed(&thread_id, &error),
            WorkspaceInput::DiscoveryDue(attempt) => {
                if self.registry.discovery_due(&attempt) {
                    self.spawn_lookup(attempt);
                } else {
                    debug!(thread_id = %attempt.thread_id, "discovery attempt cancelled");
                }
                Update::default()
            }
            WorkspaceInput::DiscoveryResult { attempt, result } => self.registry.discovery_result(&attempt, result),
            WorkspaceInput::Shutdown => Update::default(),
        };

        let mut changed = update.changed;
        for effect in update.effects {
            changed |= self.perform(effect);
        }
        if changed {
            if let Some(id) = thread_id {
                self.journal(&id, before.as_deref(), now);
            }
            self.publish();
        }
    }

    fn run_sweep(&mut self) {
        let now = (self.clock)();
        let before = self.registry.snapshot();
        let changed = self.registry.sweep(now);
        if changed.is_empty() {
            return;
        }
        for id in &changed {
            self.journal(id, before.get(id).map(Arc::as_ref), now);
        }
        self.publish();
    }

    /// Carry out one side effect. Returns whether a record changed.
    fn perform(&mut self, effect: Effect) -> bool {
        match effect {
            Effect::Watch(command) => match tail::apply(self.watcher.as_mut(), &command) {
                Ok(()) => false,
                Err(e) => self.registry.watch_failed(command.thread_id(), &e.to_string()).changed,
            },
            Effect::ScheduleDiscovery(attempt) => {
                let sender = self.sender.clone();
                debug!(
                    thread_id = %attempt.thread_id,
                    attempt = attempt.attempt,
                    delay_ms = attempt.delay.as_millis() as u64,
                    "discovery scheduled"
                );
                tokio::spawn(async move {
                    tokio::time::sleep(attempt.delay).await;
                    let _ = sender.send(WorkspaceInput::DiscoveryDue(attempt)).await;
                });
                false
            }
            Effect::RegisterRollout(registration) => {
                self.send_to_binder(BinderCommand::Register(registration));
                false
            }
            Effect::UnregisterRollout(thread_id) => {
                self.send_to_binder(BinderCommand::Unregister(thread_id));
                false
            }
        }
    }

    fn spawn_lookup(&self, attempt: DiscoveryAttempt) {
        let locator = Arc::clone(&self.locator);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let session_id = attempt.session_id.clone();
            let result = match tokio::task::spawn_blocking(move || locator.discover(&session_id)).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(thread_id = %attempt.thread_id, "transcript lookup task failed: {e}");
                    Ok(None)
                }
            };
            let _ = sender.send(WorkspaceInput::DiscoveryResult { attempt, result }).await;
        });
    }

    fn send_to_binder(&self, command: BinderCommand) {
        match &self.binder_commands {
            Some(tx) => {
                if tx.send(command).is_err() {
                    warn!("rollout binder has stopped");
                }
            }
            None => debug!(?command, "no rollout binder configured"),
        }
    }

    fn journal(&self, thread_id: &str, before: Option<&TranscriptInfo>, now: DateTime<Utc>) {
        let Some(journal) = &self.journal else {
            return;
        };
        let after = self.registry.get(thread_id).map(Arc::as_ref);
        for event in transition_events(thread_id, before, after) {
            if let Err(e) = journal.log_at(now, event) {
                warn!("failed to write status journal: {e:#}");
            }
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(Arc::new(self.registry.snapshot()));
    }
}

/// Owns the rollout binder: applies registrations and scans on an interval
/// while anything is pending.
async fn run_binder(
    mut binder: RolloutBinder,
    mut commands: mpsc::UnboundedReceiver<BinderCommand>,
    sink: mpsc::Sender<WorkspaceInput>,
) {
    let mut ticker = tokio::time::interval(binder.policy().scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        let updates = tokio::select! {
            command = commands.recv() => match command {
                None => return,
                Some(BinderCommand::Register(registration)) => vec![binder.register(registration)],
                Some(BinderCommand::Unregister(thread_id)) => {
                    binder.unregister(&thread_id);
                    Vec::new()
                }
            },
            _ = ticker.tick() => {
                if !binder.has_pending() {
                    continue;
                }
                scan(&mut binder).await
            }
        };
        for update in updates {
            if sink.send(WorkspaceInput::Binding(update)).await.is_err() {
                return;
            }
        }
    }
}

async fn scan(binder: &mut RolloutBinder) -> Vec<BindingUpdate> {
    let Some(root) = binder.sessions_root().map(Path::to_path_buf) else {
        return binder.advance(&[]);
    };
    let policy = *binder.policy();
    match tokio::task::spawn_blocking(move || load_candidates(&root, policy.candidate_limit, policy.max_depth)).await {
        Ok(candidates) => binder.advance(&candidates),
        Err(e) => {
            warn!("rollout scan task failed: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;
    use crate::discovery::rollout::RolloutPolicy;
    use crate::signal::Phase;
    use crate::state::{Badge, BindingState, ThreadStatus};
    use crate::tail::{WatchCommand, WatchError};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns a path once `found_on` lookups have been made.
    struct CountingLocator {
        calls: AtomicU32,
        found_on: u32,
    }

    impl TranscriptLocator for CountingLocator {
        fn discover(&self, session_id: &str) -> Result<Option<PathBuf>, LocateError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((call >= self.found_on).then(|| PathBuf::from(format!("/claude/{session_id}.jsonl"))))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingWatcher {
        commands: Arc<Mutex<Vec<WatchCommand>>>,
    }

    impl TranscriptWatcher for RecordingWatcher {
        fn watch(&mut self, thread_id: &str, path: &Path, from_end: bool) -> Result<(), WatchError> {
            self.commands.lock().unwrap().push(WatchCommand::Start {
                thread_id: thread_id.to_string(),
                path: path.to_string_lossy().into_owned(),
                from_end,
            });
            Ok(())
        }

        fn unwatch(&mut self, thread_id: &str) -> Result<(), WatchError> {
            self.commands.lock().unwrap().push(WatchCommand::Stop {
                thread_id: thread_id.to_string(),
            });
            Ok(())
        }
    }

    fn tokio_clock() -> Clock {
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let origin = tokio::time::Instant::now();
        Arc::new(move || {
            let elapsed = chrono::TimeDelta::from_std(origin.elapsed()).unwrap();
            base + elapsed
        })
    }

    fn workspace(locator: Arc<dyn TranscriptLocator>, watcher: RecordingWatcher) -> Workspace {
        Workspace::new(Policies::default(), locator, TailSettings::default())
            .with_watcher(move |_| Box::new(watcher))
            .with_clock(tokio_clock())
    }

    fn claude_start(thread_id: &str) -> WorkspaceInput {
        WorkspaceInput::ThreadStarted(ThreadStart {
            thread_id: thread_id.to_string(),
            agent: Some(AgentKind::Claude),
            session_id: Some("sess-1".to_string()),
            cwd: None,
            started_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            transcript_path: None,
        })
    }

    async fn wait_for(rx: &mut watch::Receiver<Snapshot>, pred: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let fut = async {
            loop {
                let snap = rx.borrow_and_update().clone();
                if pred(&snap) {
                    return snap;
                }
                rx.changed().await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(120), fut).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_retries_until_found() {
        let locator = Arc::new(CountingLocator {
            calls: AtomicU32::new(0),
            found_on: 3,
        });
        let watcher = RecordingWatcher::default();
        let ws = workspace(locator.clone(), watcher.clone());
        let handle = ws.handle();
        let mut rx = handle.subscribe();
        let task = tokio::spawn(ws.run());

        handle.send(claude_start("t1")).await.unwrap();
        let snap = wait_for(&mut rx, |s| s.get("t1").is_some_and(|i| i.transcript_path.is_some())).await;
        assert_eq!(snap["t1"].transcript_path.as_deref(), Some("/claude/sess-1.jsonl"));
        assert_eq!(locator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *watcher.commands.lock().unwrap(),
            vec![WatchCommand::Start {
                thread_id: "t1".to_string(),
                path: "/claude/sess-1.jsonl".to_string(),
                from_end: false,
            }]
        );

        handle.shutdown().await;
        let last = task.await.unwrap();
        assert!(last.contains_key("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_cancels_discovery() {
        let locator = Arc::new(CountingLocator {
            calls: AtomicU32::new(0),
            found_on: 1,
        });
        let ws = workspace(locator.clone(), RecordingWatcher::default());
        let handle = ws.handle();
        let mut rx = handle.subscribe();
        let task = tokio::spawn(ws.run());

        handle.send(claude_start("t1")).await.unwrap();
        handle
            .send(WorkspaceInput::ThreadStopped {
                thread_id: "t1".to_string(),
            })
            .await
            .unwrap();
        wait_for(&mut rx, |s| s.get("t1").is_some_and(|i| i.status == ThreadStatus::Exited)).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(locator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.snapshot()["t1"].transcript_path, None);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lines_and_sweep_drive_the_snapshot() {
        let locator = Arc::new(CountingLocator {
            calls: AtomicU32::new(0),
            found_on: u32::MAX,
        });
        let tmp = tempfile::tempdir().unwrap();
        let journal_path = tmp.path().join("status.jsonl");
        let ws = workspace(locator, RecordingWatcher::default())
            .with_journal(StatusJournal::new(&journal_path).unwrap());
        let handle = ws.handle();
        let mut rx = handle.subscribe();
        let task = tokio::spawn(ws.run());

        handle.send(claude_start("t1")).await.unwrap();
        handle
            .send(WorkspaceInput::TranscriptLine {
                thread_id: "t1".to_string(),
                line: r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Done, all green."}]}}"#
                    .to_string(),
            })
            .await
            .unwrap();
        let snap = wait_for(&mut rx, |s| s.get("t1").is_some_and(|i| i.phase == Phase::Responding)).await;
        assert_eq!(snap["t1"].status, ThreadStatus::Working);

        let snap = wait_for(&mut rx, |s| s.get("t1").is_some_and(|i| i.badge == Some(Badge::Done))).await;
        assert_eq!(snap["t1"].phase, Phase::Waiting);
        assert_eq!(snap["t1"].status, ThreadStatus::Idle);
        assert_eq!(snap["t1"].subtitle, "Idle · Done");

        handle
            .send(WorkspaceInput::Focus {
                thread_id: Some("t1".to_string()),
            })
            .await
            .unwrap();
        wait_for(&mut rx, |s| s.get("t1").is_some_and(|i| i.badge.is_none())).await;

        handle.shutdown().await;
        task.await.unwrap();

        let journal = std::fs::read_to_string(&journal_path).unwrap();
        assert!(journal.contains("\"thread_started\""));
        assert!(journal.contains("\"status_changed\""));
        assert!(journal.contains("\"badge_changed\""));
    }

    #[tokio::test(start_paused = true)]
    async fn binder_binds_codex_rollout() {
        let tmp = tempfile::tempdir().unwrap();
        let sessions = tmp.path().join("sessions");
        let rollout = sessions.join("2026/10/17/rollout-2026-10-17T09-00-00-abc.jsonl");
        std::fs::create_dir_all(rollout.parent().unwrap()).unwrap();
        std::fs::write(
            &rollout,
            "{\"type\":\"session_meta\",\"payload\":{\"id\":\"abc\",\"cwd\":\"/work/proj\"}}\n",
        )
        .unwrap();

        let watcher = RecordingWatcher::default();
        let locator = Arc::new(CountingLocator {
            calls: AtomicU32::new(0),
            found_on: u32::MAX,
        });
        let ws = workspace(locator, watcher.clone())
            .with_binder(RolloutBinder::new(RolloutPolicy::default(), Some(sessions)));
        let handle = ws.handle();
        let mut rx = handle.subscribe();
        let task = tokio::spawn(ws.run());

        handle
            .send(WorkspaceInput::ThreadStarted(ThreadStart {
                thread_id: "c1".to_string(),
                agent: Some(AgentKind::Codex),
                session_id: Some("abc".to_string()),
                cwd: Some("/work/proj/".to_string()),
                started_at: Utc::now(),
                transcript_path: None,
            }))
            .await
            .unwrap();

        let snap = wait_for(&mut rx, |s| {
            s.get("c1")
                .and_then(|i| i.binding.as_ref())
                .is_some_and(|b| b.state == BindingState::Bound)
        })
        .await;
        let expected = rollout.to_string_lossy().into_owned();
        assert_eq!(snap["c1"].transcript_path.as_deref(), Some(expected.as_str()));
        assert_eq!(snap["c1"].session_id.as_deref(), Some("abc"));
        assert!(matches!(
            &watcher.commands.lock().unwrap()[..],
            [WatchCommand::Start { from_end: false, .. }]
        ));

        handle.shutdown().await;
        task.await.unwrap();
    }
}
