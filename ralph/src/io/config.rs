//! Runner configuration stored under `.ralph/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Runner configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RalphConfig {
    /// Iteration budget applied when a bead's constraints omit
    /// `max_iterations`.
    pub max_iterations_default: u32,

    /// First retry delay. Doubles on each failed iteration.
    pub initial_backoff_secs: u64,

    /// Ceiling on the retry delay.
    pub backoff_cap_secs: u64,

    /// Hard ceiling on one agent invocation.
    pub agent_timeout_secs: u64,

    /// Truncate captured verifier stdout/stderr beyond this many bytes.
    pub verifier_output_limit_bytes: usize,

    /// Truncate the captured agent transcript beyond this many bytes.
    pub agent_output_limit_bytes: usize,

    /// Maximum bytes for the agent prompt before dropping sections.
    pub prompt_budget_bytes: usize,

    pub agent: AgentConfig,
    pub breaker: BreakerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Argv for the agent CLI (e.g. `["claude", "-p"]`). The prompt is
    /// delivered on stdin.
    pub command: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BreakerConfig {
    /// When false the loop never consults a circuit breaker.
    pub enabled: bool,
    /// Consecutive agent failures before the breaker opens.
    pub failure_threshold: u32,
    /// Seconds an open breaker denies agent spawns before probing again.
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 5,
            cooldown_secs: 300,
        }
    }
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_iterations_default: 10,
            initial_backoff_secs: 30,
            backoff_cap_secs: 300,
            agent_timeout_secs: 600,
            verifier_output_limit_bytes: 100_000,
            agent_output_limit_bytes: 100_000,
            prompt_budget_bytes: 40_000,
            agent: AgentConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl RalphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations_default == 0 {
            return Err(anyhow!("max_iterations_default must be > 0"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.backoff_cap_secs < self.initial_backoff_secs {
            return Err(anyhow!(
                "backoff_cap_secs must be >= initial_backoff_secs"
            ));
        }
        if self.verifier_output_limit_bytes == 0 {
            return Err(anyhow!("verifier_output_limit_bytes must be > 0"));
        }
        if self.agent_output_limit_bytes == 0 {
            return Err(anyhow!("agent_output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(anyhow!("breaker.failure_threshold must be >= 1"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RalphConfig::default()`.
pub fn load_config(path: &Path) -> Result<RalphConfig> {
    if !path.exists() {
        let cfg = RalphConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RalphConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RalphConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
