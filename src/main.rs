use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;

use codezilla_status::agent::AgentKind;
use codezilla_status::classify::classify;
use codezilla_status::cli::{self, Cli, Command};
use codezilla_status::config::ProjectConfig;
use codezilla_status::discovery::rollout::{Registration, RolloutBinder};
use codezilla_status::discovery::{FsTranscriptLocator, TranscriptLocator};
use codezilla_status::log::{StatusJournal, transition_events};
use codezilla_status::registry::{ThreadRegistry, ThreadStart};
use codezilla_status::runtime::{Workspace, WorkspaceInput};
use codezilla_status::state::BindingState;
use codezilla_status::tail::TailSettings;

const CLI_THREAD: &str = "cli";

fn thread_start(agent: AgentKind, session_id: Option<String>, transcript: &Path) -> ThreadStart {
    ThreadStart {
        thread_id: CLI_THREAD.to_string(),
        agent: Some(agent),
        session_id,
        cwd: None,
        started_at: Utc::now(),
        transcript_path: Some(transcript.display().to_string()),
    }
}

fn run_classify(file: &Path, agent: AgentKind) -> Result<()> {
    let (mut parsed, mut ignored, mut unparsed) = (0usize, 0usize, 0usize);
    for (line_no, line) in cli::read_lines(file)? {
        let signal = classify(&line, agent);
        match &signal {
            None => unparsed += 1,
            Some(s) if s.is_ignored() => ignored += 1,
            Some(_) => parsed += 1,
        }
        println!("{}", cli::render_classified(line_no, signal.as_ref()));
    }
    println!("\n{parsed} parsed, {ignored} ignored, {unparsed} unrecognized");
    Ok(())
}

fn run_replay(config: &ProjectConfig, file: &Path, agent: AgentKind, json: bool, journal: Option<&Path>) -> Result<()> {
    let journal = journal.map(StatusJournal::new).transpose()?;
    let mut registry = ThreadRegistry::new(config.policies());
    registry.thread_started(thread_start(agent, None, file));

    for (_, line) in cli::read_lines(file)? {
        let before = registry.get(CLI_THREAD).cloned();
        let update = registry.transcript_line(CLI_THREAD, &line, Utc::now());
        if let (true, Some(journal)) = (update.changed, &journal) {
            let after = registry.get(CLI_THREAD).cloned();
            for event in transition_events(CLI_THREAD, before.as_deref(), after.as_deref()) {
                journal.log(event)?;
            }
        }
    }

    let info = registry
        .get(CLI_THREAD)
        .context("replay thread disappeared from the registry")?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(info.as_ref()).context("failed to serialize thread record")?
        );
    } else {
        print!("{}", cli::render_info_human(info));
    }
    Ok(())
}

async fn run_watch(
    config: &ProjectConfig,
    file: &Path,
    agent: AgentKind,
    session_id: Option<String>,
    journal: Option<&Path>,
) -> Result<()> {
    let locator: Arc<dyn TranscriptLocator> = Arc::new(FsTranscriptLocator::from_env()?);
    let mut workspace = Workspace::new(config.policies(), locator, TailSettings::default())
        .with_sweep_interval(config.sweep_interval());
    if let Some(path) = journal {
        workspace = workspace.with_journal(StatusJournal::new(path)?);
    }

    let handle = workspace.handle();
    let mut snapshots = handle.subscribe();
    let task = tokio::spawn(workspace.run());
    handle
        .send(WorkspaceInput::ThreadStarted(thread_start(agent, session_id, file)))
        .await?;
    info!(path = %file.display(), "watching transcript (Ctrl-C to stop)");

    let mut last_subtitle = String::new();
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let Some(info) = snapshot.get(CLI_THREAD) else {
                    continue;
                };
                if info.subtitle != last_subtitle {
                    let badge = info.badge.map(|b| format!("  [{b:?}]")).unwrap_or_default();
                    println!("{}  {}{badge}", Utc::now().format("%H:%M:%S"), info.subtitle);
                    last_subtitle.clone_from(&info.subtitle);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    task.await.context("workspace loop panicked")?;
    Ok(())
}

fn run_discover(config: &ProjectConfig, session_id: &str, agent: AgentKind, cwd: Option<&str>) -> Result<()> {
    match agent {
        AgentKind::Claude => {
            let locator = FsTranscriptLocator::from_env()?;
            match locator.discover(session_id)? {
                Some(path) => println!("{}", path.display()),
                None => anyhow::bail!(
                    "no transcript found for session {session_id} under {}",
                    locator.root().display()
                ),
            }
        }
        AgentKind::Codex => {
            let cwd = match cwd {
                Some(cwd) => cwd.to_string(),
                None => std::env::current_dir()
                    .context("failed to get current directory")?
                    .display()
                    .to_string(),
            };
            let mut binder = RolloutBinder::from_env(config.rollout_policy());
            binder.register(Registration::new(CLI_THREAD, &cwd, Utc::now(), Some(session_id.to_string())));
            let bound = binder
                .scan()
                .into_iter()
                .find(|u| u.state == BindingState::Bound)
                .and_then(|u| u.path);
            match bound {
                Some(path) => println!("{path}"),
                None => anyhow::bail!("no matching Codex rollout found for {cwd}"),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command => "codezilla_status=warn",
        0 => "codezilla_status=info",
        1 => "codezilla_status=debug",
        _ => "codezilla_status=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .codezilla/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Classify { file, agent } => run_classify(&file, agent)?,
        Command::Replay {
            file,
            agent,
            json,
            journal,
        } => run_replay(&config, &file, agent, json, journal.as_deref())?,
        Command::Watch {
            file,
            agent,
            session_id,
            journal,
        } => run_watch(&config, &file, agent, session_id, journal.as_deref()).await?,
        Command::Discover { session_id, agent, cwd } => run_discover(&config, &session_id, agent, cwd.as_deref())?,
        Command::Config { json } => {
            if json {
                println!("{}", cli::render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", cli::render_config_human(&config, config_path.as_deref()));
            }
        }
    }

    Ok(())
}
