//! Transcript file tailing.
//!
//! A [`TranscriptWatcher`] turns [`WatchCommand`]s into a stream of
//! `TranscriptLine` inputs for the workspace. [`TailWatcher`] is the default
//! implementation: one polling task per watched thread, reading complete
//! lines from a byte offset.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::discovery::locate;
use crate::runtime::WorkspaceInput;
use crate::state::ThreadId;

/// Outbound request to the transcript watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCommand {
    /// Begin tailing `path`. With `from_end` existing content is skipped.
    Start {
        thread_id: ThreadId,
        path: String,
        from_end: bool,
    },
    /// Replace the watched file, reading the new one from the start.
    Switch { thread_id: ThreadId, path: String },
    Stop { thread_id: ThreadId },
}

impl WatchCommand {
    pub fn thread_id(&self) -> &str {
        match self {
            WatchCommand::Start { thread_id, .. }
            | WatchCommand::Switch { thread_id, .. }
            | WatchCommand::Stop { thread_id } => thread_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("transcript path is outside ~/.claude, ~/.codex and $CODEX_HOME: {0}")]
    OutsideRoots(PathBuf),
    #[error("no tokio runtime available to tail {0}")]
    NoRuntime(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Something that can tail transcript files on behalf of threads.
pub trait TranscriptWatcher: Send {
    fn watch(&mut self, thread_id: &str, path: &Path, from_end: bool) -> Result<(), WatchError>;

    fn switch(&mut self, thread_id: &str, path: &Path) -> Result<(), WatchError> {
        self.unwatch(thread_id)?;
        self.watch(thread_id, path, false)
    }

    fn unwatch(&mut self, thread_id: &str) -> Result<(), WatchError>;
}

/// Dispatch a command to a watcher.
pub fn apply(watcher: &mut dyn TranscriptWatcher, command: &WatchCommand) -> Result<(), WatchError> {
    match command {
        WatchCommand::Start {
            thread_id,
            path,
            from_end,
        } => watcher.watch(thread_id, Path::new(path), *from_end),
        WatchCommand::Switch { thread_id, path } => watcher.switch(thread_id, Path::new(path)),
        WatchCommand::Stop { thread_id } => watcher.unwatch(thread_id),
    }
}

/// Incremental reader of an append-only JSON-lines file.
///
/// Only newline-terminated lines are returned; a trailing partial line is
/// held until the writer finishes it.
#[derive(Debug)]
pub struct FileTailer {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl FileTailer {
    pub fn new(path: &Path, from_end: bool) -> Self {
        let offset = if from_end {
            std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        Self {
            path: path.to_path_buf(),
            offset,
            partial: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read lines appended since the last call. Blank lines are dropped.
    pub fn read_new_lines(&mut self) -> io::Result<Vec<String>> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len < self.offset {
            debug!(path = %self.path.display(), "transcript truncated, rereading");
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        let read = file.read_to_end(&mut buf)?;
        self.offset += read as u64;

        // A multibyte character may straddle two reads; decode whole lines only.
        self.partial.extend_from_slice(&buf);
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);

        Ok(complete
            .split(|&b| b == b'\n')
            .map(String::from_utf8_lossy)
            .map(|l| l.trim_end_matches('\r').to_string())
            .filter(|l| !l.trim().is_empty())
            .collect())
    }
}

/// Polling settings for [`TailWatcher`].
#[derive(Debug, Clone)]
pub struct TailSettings {
    pub poll_interval: Duration,
    /// Consecutive polls a missing file is tolerated before giving up.
    pub missing_limit: u32,
    /// Restrict watched paths to these roots. `None` allows any path.
    pub allowed_roots: Option<Vec<PathBuf>>,
}

impl Default for TailSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            missing_limit: 60,
            allowed_roots: None,
        }
    }
}

/// Default watcher: a polling tokio task per thread.
pub struct TailWatcher {
    sink: mpsc::Sender<WorkspaceInput>,
    settings: TailSettings,
    tasks: HashMap<ThreadId, JoinHandle<()>>,
}

impl TailWatcher {
    pub fn new(sink: mpsc::Sender<WorkspaceInput>, settings: TailSettings) -> Self {
        Self {
            sink,
            settings,
            tasks: HashMap::new(),
        }
    }

    pub fn is_watching(&self, thread_id: &str) -> bool {
        self.tasks.get(thread_id).is_some_and(|t| !t.is_finished())
    }
}

impl TranscriptWatcher for TailWatcher {
    fn watch(&mut self, thread_id: &str, path: &Path, from_end: bool) -> Result<(), WatchError> {
        if let Some(roots) = &self.settings.allowed_roots {
            if !locate::is_within(path, roots) {
                return Err(WatchError::OutsideRoots(path.to_path_buf()));
            }
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| WatchError::NoRuntime(path.to_path_buf()))?;

        if let Some(previous) = self.tasks.remove(thread_id) {
            previous.abort();
        }
        let tailer = FileTailer::new(path, from_end);
        let task = runtime.spawn(tail_loop(
            thread_id.to_string(),
            tailer,
            self.sink.clone(),
            self.settings.poll_interval,
            self.settings.missing_limit,
        ));
        debug!(thread_id, path = %path.display(), from_end, "watching transcript");
        self.tasks.insert(thread_id.to_string(), task);
        Ok(())
    }

    fn unwatch(&mut self, thread_id: &str) -> Result<(), WatchError> {
        if let Some(task) = self.tasks.remove(thread_id) {
            task.abort();
            debug!(thread_id, "stopped watching transcript");
        }
        Ok(())
    }
}

impl Drop for TailWatcher {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

async fn tail_loop(
    thread_id: ThreadId,
    mut tailer: FileTailer,
    sink: mpsc::Sender<WorkspaceInput>,
    poll_interval: Duration,
    missing_limit: u32,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    let mut misses = 0u32;
    loop {
        ticker.tick().await;
        let lines = match tailer.read_new_lines() {
            Ok(lines) => {
                misses = 0;
                lines
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                misses += 1;
                if misses < missing_limit {
                    continue;
                }
                let error = format!("transcript never appeared: {}", tailer.path().display());
                warn!(thread_id = %thread_id, "{error}");
                let _ = sink.send(WorkspaceInput::WatchFailed { thread_id, error }).await;
                return;
            }
            Err(e) => {
                let error = WatchError::Io {
                    path: tailer.path().to_path_buf(),
                    source: e,
                }
                .to_string();
                warn!(thread_id = %thread_id, "{error}");
                let _ = sink.send(WorkspaceInput::WatchFailed { thread_id, error }).await;
                return;
            }
        };
        for line in lines {
            let input = WorkspaceInput::TranscriptLine {
                thread_id: thread_id.clone(),
                line,
            };
            if sink.send(input).await.is_err() {
                return;
            }
        }
    }
}
