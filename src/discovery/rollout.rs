//! Codex rollout binder.
//!
//! Codex writes `rollout-<timestamp>-<id>.jsonl` files under
//! `$CODEX_HOME/sessions/YYYY/MM/DD/`. Each starts with a `session_meta`
//! line naming the session id and working directory. The binder matches
//! pending threads to those files:
//!
//! - an expected session id match beats any cwd match
//! - otherwise the cwd must match and the file must not predate the thread
//!   start by more than the early-skew window
//! - the candidate whose mtime is closest to the thread start wins; ties go
//!   to the newer file, then the lexically greater path
//!
//! A path claimed by one thread is never offered to another.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::discovery::binding::BindingUpdate;
use crate::state::{BindingState, ThreadId};

const META_SCAN_LINES: usize = 8;
const FAILED_MESSAGE: &str = "No matching Codex rollout found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutPolicy {
    pub scan_interval: Duration,
    pub max_attempts: u32,
    pub candidate_limit: usize,
    pub early_skew_ms: u64,
    pub max_depth: u8,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(1000),
            max_attempts: 120,
            candidate_limit: 200,
            early_skew_ms: 30_000,
            max_depth: 4,
        }
    }
}

/// A Codex thread waiting for (or holding) a rollout file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub thread_id: ThreadId,
    pub cwd: String,
    pub started_at_ms: u64,
    pub expected_session_id: Option<String>,
    pub state: BindingState,
    pub bound_path: Option<String>,
    pub bound_session_id: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Registration {
    pub fn new(thread_id: &str, cwd: &str, started_at: DateTime<Utc>, expected_session_id: Option<String>) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            cwd: normalize_path(cwd),
            started_at_ms: u64::try_from(started_at.timestamp_millis()).unwrap_or(0),
            expected_session_id,
            state: BindingState::Pending,
            bound_path: None,
            bound_session_id: None,
            attempts: 0,
            last_error: None,
        }
    }

    fn to_update(&self) -> BindingUpdate {
        BindingUpdate {
            thread_id: self.thread_id.clone(),
            state: self.state,
            path: self.bound_path.clone(),
            codex_session_id: self.bound_session_id.clone(),
            attempts: self.attempts,
            error: self.last_error.clone(),
        }
    }
}

/// A rollout file with a readable `session_meta` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutCandidate {
    pub path: String,
    pub cwd: String,
    pub session_id: String,
    pub modified_ms: u64,
}

/// Owns Codex registrations and path claims. Driven by a single task.
#[derive(Debug)]
pub struct RolloutBinder {
    policy: RolloutPolicy,
    sessions_root: Option<PathBuf>,
    registrations: HashMap<ThreadId, Registration>,
    claims: HashMap<String, ThreadId>,
}

impl RolloutBinder {
    pub fn new(policy: RolloutPolicy, sessions_root: Option<PathBuf>) -> Self {
        Self {
            policy,
            sessions_root,
            registrations: HashMap::new(),
            claims: HashMap::new(),
        }
    }

    /// Binder scanning `$CODEX_HOME/sessions` or `~/.codex/sessions`.
    pub fn from_env(policy: RolloutPolicy) -> Self {
        Self::new(policy, sessions_root())
    }

    pub fn policy(&self) -> &RolloutPolicy {
        &self.policy
    }

    pub fn sessions_root(&self) -> Option<&Path> {
        self.sessions_root.as_deref()
    }

    /// Register (or re-register) a thread. Any earlier claim is released.
    pub fn register(&mut self, registration: Registration) -> BindingUpdate {
        self.unregister(&registration.thread_id);
        let update = registration.to_update();
        debug!(thread_id = %registration.thread_id, cwd = %registration.cwd, "codex binding registered");
        self.registrations.insert(registration.thread_id.clone(), registration);
        update
    }

    pub fn unregister(&mut self, thread_id: &str) {
        if let Some(existing) = self.registrations.remove(thread_id) {
            if let Some(path) = existing.bound_path {
                self.claims.remove(&path);
            }
        }
    }

    pub fn snapshot(&self, thread_id: &str) -> Option<BindingUpdate> {
        self.registrations.get(thread_id).map(Registration::to_update)
    }

    pub fn has_pending(&self) -> bool {
        self.registrations.values().any(|r| r.state == BindingState::Pending)
    }

    /// Scan the sessions root and advance every pending registration.
    pub fn scan(&mut self) -> Vec<BindingUpdate> {
        if !self.has_pending() {
            return Vec::new();
        }
        let candidates = match &self.sessions_root {
            Some(root) => load_candidates(root, self.policy.candidate_limit, self.policy.max_depth),
            None => Vec::new(),
        };
        self.advance(&candidates)
    }

    /// One binding pass over an already-loaded candidate list.
    pub fn advance(&mut self, candidates: &[RolloutCandidate]) -> Vec<BindingUpdate> {
        let mut pending: Vec<ThreadId> = self
            .registrations
            .values()
            .filter(|r| r.state == BindingState::Pending)
            .map(|r| r.thread_id.clone())
            .collect();
        pending.sort_by(|a, b| {
            let ra = &self.registrations[a];
            let rb = &self.registrations[b];
            ra.started_at_ms.cmp(&rb.started_at_ms).then_with(|| a.cmp(b))
        });

        let mut updates = Vec::new();
        for thread_id in pending {
            let Some(reg) = self.registrations.get(&thread_id) else {
                continue;
            };
            let chosen = pick_candidate(reg, candidates, &self.claims, self.policy.early_skew_ms);
            let Some(reg) = self.registrations.get_mut(&thread_id) else {
                continue;
            };
            reg.attempts += 1;

            if let Some(candidate) = chosen {
                reg.state = BindingState::Bound;
                reg.bound_path = Some(candidate.path.clone());
                reg.bound_session_id = Some(candidate.session_id.clone());
                reg.last_error = None;
                info!(
                    thread_id = %reg.thread_id,
                    path = %candidate.path,
                    attempts = reg.attempts,
                    "codex rollout bound"
                );
                self.claims.insert(candidate.path.clone(), reg.thread_id.clone());
                updates.push(reg.to_update());
            } else if reg.attempts >= self.policy.max_attempts {
                reg.state = BindingState::Failed;
                reg.last_error = Some(FAILED_MESSAGE.to_string());
                warn!(thread_id = %reg.thread_id, attempts = reg.attempts, "codex rollout binding failed");
                updates.push(reg.to_update());
            } else if reg.attempts == 1 || reg.attempts % 10 == 0 {
                updates.push(reg.to_update());
            }
        }
        updates
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn sessions_root() -> Option<PathBuf> {
    if let Some(codex_home) = std::env::var_os("CODEX_HOME").filter(|h| !h.is_empty()) {
        return Some(PathBuf::from(codex_home).join("sessions"));
    }
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".codex").join("sessions"))
}

fn modified_ms(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn collect_rollout_files(dir: &Path, depth: u8, max_depth: u8, out: &mut Vec<PathBuf>) {
    if depth > max_depth {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rollout_files(&path, depth + 1, max_depth, out);
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with("rollout-") && name.ends_with(".jsonl") {
            out.push(path);
        }
    }
}

/// `(session_id, cwd)` from the `session_meta` line near the top of a rollout.
pub fn read_session_meta(path: &Path) -> Option<(String, String)> {
    let file = File::open(path).ok()?;
    for line in BufReader::new(file).lines().take(META_SCAN_LINES) {
        let line = line.ok()?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).ok()?;
        if value.get("type").and_then(Value::as_str) != Some("session_meta") {
            continue;
        }
        let payload = value.get("payload")?;
        let session_id = payload.get("id")?.as_str()?.to_string();
        let cwd = payload.get("cwd")?.as_str()?.to_string();
        return Some((session_id, cwd));
    }
    None
}

/// Newest `limit` rollout files under `root` that carry a session header.
pub fn load_candidates(root: &Path, limit: usize, max_depth: u8) -> Vec<RolloutCandidate> {
    if !root.is_dir() {
        return Vec::new();
    }
    let mut files = Vec::new();
    collect_rollout_files(root, 0, max_depth, &mut files);
    let mut files: Vec<(PathBuf, u64)> = files.into_iter().map(|p| {
        let m = modified_ms(&p);
        (p, m)
    }).collect();
    files.sort_by_key(|(_, m)| Reverse(*m));
    files.truncate(limit);

    files
        .into_iter()
        .filter_map(|(path, modified_ms)| {
            let (session_id, cwd) = read_session_meta(&path)?;
            Some(RolloutCandidate {
                path: path.to_string_lossy().into_owned(),
                cwd: normalize_path(&cwd),
                session_id,
                modified_ms,
            })
        })
        .collect()
}

fn candidate_score(reg: &Registration, candidate: &RolloutCandidate, early_skew_ms: u64) -> Option<i64> {
    let diff = candidate.modified_ms.abs_diff(reg.started_at_ms);
    if reg.expected_session_id.as_deref() == Some(candidate.session_id.as_str()) {
        return Some(2_000_000 - diff.min(1_000_000) as i64);
    }
    if reg.cwd != candidate.cwd {
        return None;
    }
    if candidate.modified_ms.saturating_add(early_skew_ms) < reg.started_at_ms {
        return None;
    }
    Some(1_000_000 - diff.min(900_000) as i64)
}

fn pick_candidate(
    reg: &Registration,
    candidates: &[RolloutCandidate],
    claims: &HashMap<String, ThreadId>,
    early_skew_ms: u64,
) -> Option<RolloutCandidate> {
    candidates
        .iter()
        .filter(|c| claims.get(&c.path).is_none_or(|owner| owner == &reg.thread_id))
        .filter_map(|c| candidate_score(reg, c, early_skew_ms).map(|score| (score, c)))
        .max_by(|(sa, a), (sb, b)| {
            sa.cmp(sb)
                .then(a.modified_ms.cmp(&b.modified_ms))
                .then_with(|| a.path.cmp(&b.path))
        })
        .map(|(_, c)| c.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn reg(thread_id: &str, cwd: &str, started_at_ms: u64, expected: Option<&str>) -> Registration {
        Registration {
            thread_id: thread_id.to_string(),
            cwd: normalize_path(cwd),
            started_at_ms,
            expected_session_id: expected.map(str::to_string),
            state: BindingState::Pending,
            bound_path: None,
            bound_session_id: None,
            attempts: 0,
            last_error: None,
        }
    }

    fn candidate(path: &str, cwd: &str, session_id: &str, modified_ms: u64) -> RolloutCandidate {
        RolloutCandidate {
            path: path.to_string(),
            cwd: normalize_path(cwd),
            session_id: session_id.to_string(),
            modified_ms,
        }
    }

    const SKEW: u64 = 30_000;

    #[test]
    fn expected_session_id_beats_cwd_match() {
        let r = reg("t1", "/repo/a", 1_000, Some("sess-42"));
        let by_id = candidate("/tmp/a.jsonl", "/elsewhere", "sess-42", 1_050);
        let by_cwd = candidate("/tmp/b.jsonl", "/repo/a", "sess-10", 1_005);
        assert!(candidate_score(&r, &by_id, SKEW).unwrap() > candidate_score(&r, &by_cwd, SKEW).unwrap());
    }

    #[test]
    fn early_skew_window() {
        let r = reg("t1", "/repo/a", 100_000, None);
        let too_old = candidate("/tmp/a.jsonl", "/repo/a", "old", 100_000 - SKEW - 1);
        let edge = candidate("/tmp/b.jsonl", "/repo/a", "new", 100_000 - SKEW);
        assert!(candidate_score(&r, &too_old, SKEW).is_none());
        assert!(candidate_score(&r, &edge, SKEW).is_some());
    }

    #[test]
    fn trailing_slash_cwd_matches() {
        let r = reg("t1", "/repo/a/", 1_000, None);
        let c = candidate("/tmp/a.jsonl", "/repo/a", "s", 1_000);
        assert!(candidate_score(&r, &c, SKEW).is_some());
    }

    #[test]
    fn equal_scores_break_ties_by_path() {
        let r = reg("t1", "/repo/a", 1_000, None);
        let a = candidate("/tmp/rollout-a.jsonl", "/repo/a", "sa", 1_000);
        let z = candidate("/tmp/rollout-z.jsonl", "/repo/a", "sz", 1_000);
        let chosen = pick_candidate(&r, &[a, z.clone()], &HashMap::new(), SKEW).unwrap();
        assert_eq!(chosen.path, z.path);
    }

    #[test]
    fn claimed_paths_go_to_their_owner_only() {
        let first = reg("thread-a", "/repo/a", 1_000, None);
        let second = reg("thread-b", "/repo/a", 1_000, None);
        let preferred = candidate("/tmp/rollout-1.jsonl", "/repo/a", "s1", 1_000);
        let fallback = candidate("/tmp/rollout-2.jsonl", "/repo/a", "s2", 1_100);
        let candidates = vec![preferred.clone(), fallback.clone()];

        let mut claims = HashMap::new();
        let chosen = pick_candidate(&first, &candidates, &claims, SKEW).unwrap();
        assert_eq!(chosen.path, preferred.path);
        claims.insert(chosen.path, first.thread_id.clone());

        let chosen = pick_candidate(&second, &candidates, &claims, SKEW).unwrap();
        assert_eq!(chosen.path, fallback.path);
    }

    #[test]
    fn advance_binds_oldest_registration_first() {
        let mut binder = RolloutBinder::new(RolloutPolicy::default(), None);
        binder.register(reg("late", "/repo", 2_000, None));
        binder.register(reg("early", "/repo", 1_000, None));
        let candidates = vec![candidate("/s/rollout-x.jsonl", "/repo", "sx", 1_500)];

        let updates = binder.advance(&candidates);
        let bound: Vec<_> = updates.iter().filter(|u| u.state == BindingState::Bound).collect();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].thread_id, "early");
        assert_eq!(binder.snapshot("late").unwrap().state, BindingState::Pending);
    }

    #[test]
    fn pending_updates_are_throttled_and_failure_is_final() {
        let policy = RolloutPolicy {
            max_attempts: 25,
            ..RolloutPolicy::default()
        };
        let mut binder = RolloutBinder::new(policy, None);
        binder.register(reg("t1", "/repo", 1_000, None));

        let mut emitted = Vec::new();
        for _ in 0..30 {
            for u in binder.advance(&[]) {
                emitted.push((u.attempts, u.state));
            }
        }
        assert_eq!(
            emitted,
            vec![
                (1, BindingState::Pending),
                (10, BindingState::Pending),
                (20, BindingState::Pending),
                (25, BindingState::Failed),
            ]
        );
        assert_eq!(
            binder.snapshot("t1").unwrap().error.as_deref(),
            Some("No matching Codex rollout found")
        );
        assert!(!binder.has_pending());
    }

    #[test]
    fn unregister_releases_claim() {
        let mut binder = RolloutBinder::new(RolloutPolicy::default(), None);
        binder.register(reg("a", "/repo", 1_000, None));
        let c = vec![candidate("/s/rollout-1.jsonl", "/repo", "s", 1_000)];
        binder.advance(&c);
        binder.unregister("a");

        binder.register(reg("b", "/repo", 1_000, None));
        let updates = binder.advance(&c);
        assert_eq!(updates[0].state, BindingState::Bound);
        assert_eq!(updates[0].thread_id, "b");
    }

    fn write_rollout(path: &Path, id: &str, cwd: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = File::create(path).unwrap();
        writeln!(
            f,
            "{}",
            serde_json::json!({"timestamp": "2026-01-01T00:00:00Z", "type": "session_meta",
                "payload": {"id": id, "cwd": cwd, "originator": "codex_cli_rs"}})
        )
        .unwrap();
    }

    #[test]
    fn loads_newest_candidates_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("sessions");
        let old = root.join("2026/01/01/rollout-2026-01-01T00-00-00-old.jsonl");
        let new = root.join("2026/01/02/rollout-2026-01-02T00-00-00-new.jsonl");
        write_rollout(&old, "old-id", "/repo");
        write_rollout(&new, "new-id", "/repo/");
        std::fs::write(root.join("2026/01/02/notes.jsonl"), "{}\n").unwrap();
        filetime::set_file_mtime(&old, filetime::FileTime::from_unix_time(1_000, 0)).unwrap();
        filetime::set_file_mtime(&new, filetime::FileTime::from_unix_time(2_000, 0)).unwrap();

        let all = load_candidates(&root, 10, 4);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].session_id, "new-id");
        assert_eq!(all[0].cwd, "/repo");
        assert_eq!(all[0].modified_ms, 2_000_000);

        let newest = load_candidates(&root, 1, 4);
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].session_id, "new-id");
    }

    #[test]
    fn scan_binds_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("sessions");
        let path = root.join("2026/03/04/rollout-x.jsonl");
        write_rollout(&path, "abc", "/work/proj");

        let mut binder = RolloutBinder::new(RolloutPolicy::default(), Some(root));
        binder.register(reg("t1", "/work/proj", 0, Some("abc")));
        let updates = binder.scan();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].state, BindingState::Bound);
        assert_eq!(updates[0].codex_session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn session_meta_must_be_near_top() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rollout-late.jsonl");
        let mut f = File::create(&path).unwrap();
        for _ in 0..10 {
            writeln!(f, "{{\"type\":\"event_msg\",\"payload\":{{\"type\":\"token_count\"}}}}").unwrap();
        }
        writeln!(f, "{{\"type\":\"session_meta\",\"payload\":{{\"id\":\"x\",\"cwd\":\"/\"}}}}").unwrap();
        assert!(read_session_meta(&path).is_none());
    }
}
