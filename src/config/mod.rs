use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::badge::SweepPolicy;
use crate::diagnostics::DiagnosticsPolicy;
use crate::discovery::DiscoveryPolicy;
use crate::discovery::rollout::RolloutPolicy;
use crate::registry::Policies;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".codezilla";

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_badge_expiry_secs() -> u64 {
    30
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_retry_delay_ms() -> u64 {
    1500
}

fn default_discovery_max_attempts() -> u32 {
    20
}

fn default_degraded_threshold() -> u64 {
    8
}

fn default_unparsed_emit_first() -> u64 {
    3
}

fn default_unparsed_emit_every() -> u64 {
    25
}

fn default_scan_interval_ms() -> u64 {
    1000
}

fn default_binding_max_attempts() -> u32 {
    120
}

fn default_candidate_limit() -> usize {
    200
}

fn default_early_skew_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimerConfig {
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_badge_expiry_secs")]
    pub badge_expiry_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            settle_ms: default_settle_ms(),
            badge_expiry_secs: default_badge_expiry_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_discovery_max_attempts")]
    pub max_attempts: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_attempts: default_discovery_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: u64,
    #[serde(default = "default_unparsed_emit_first")]
    pub unparsed_emit_first: u64,
    #[serde(default = "default_unparsed_emit_every")]
    pub unparsed_emit_every: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            degraded_threshold: default_degraded_threshold(),
            unparsed_emit_first: default_unparsed_emit_first(),
            unparsed_emit_every: default_unparsed_emit_every(),
        }
    }
}

/// Codex rollout binding.
///
/// ```toml
/// [codex_binding]
/// scan_interval_ms = 1000
/// max_attempts = 120
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CodexBindingConfig {
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_binding_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    #[serde(default = "default_early_skew_ms")]
    pub early_skew_ms: u64,
}

impl Default for CodexBindingConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_scan_interval_ms(),
            max_attempts: default_binding_max_attempts(),
            candidate_limit: default_candidate_limit(),
            early_skew_ms: default_early_skew_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ProjectConfig {
    #[serde(default)]
    pub timers: TimerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub codex_binding: CodexBindingConfig,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.codezilla/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents =
                std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig =
                toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.timers.sweep_interval_ms.max(1))
    }

    pub fn policies(&self) -> Policies {
        Policies {
            sweep: SweepPolicy {
                settle: TimeDelta::milliseconds(i64::try_from(self.timers.settle_ms).unwrap_or(i64::MAX)),
                badge_expiry: TimeDelta::seconds(
                    i64::try_from(self.timers.badge_expiry_secs).unwrap_or(i64::MAX / 1000),
                ),
            },
            discovery: DiscoveryPolicy {
                initial_delay: Duration::from_millis(self.discovery.initial_delay_ms),
                retry_delay: Duration::from_millis(self.discovery.retry_delay_ms),
                max_attempts: self.discovery.max_attempts,
            },
            diagnostics: DiagnosticsPolicy {
                degraded_threshold: self.diagnostics.degraded_threshold,
                emit_first: self.diagnostics.unparsed_emit_first,
                emit_every: self.diagnostics.unparsed_emit_every,
            },
        }
    }

    pub fn rollout_policy(&self) -> RolloutPolicy {
        RolloutPolicy {
            scan_interval: Duration::from_millis(self.codex_binding.scan_interval_ms.max(1)),
            max_attempts: self.codex_binding.max_attempts,
            candidate_limit: self.codex_binding.candidate_limit,
            early_skew_ms: self.codex_binding.early_skew_ms,
            ..RolloutPolicy::default()
        }
    }
}
