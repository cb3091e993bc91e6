// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node configuration.
//!
//! Loaded once at startup from a TOML file (`GRIDD_CONFIG` or
//! `/etc/gridd/gridd.toml`). The step-agent never reads the file; it
//! gets a [`ConfSnapshot`] over the init pipe.

use gridd_proto::ConfSnapshot;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("cannot parse config {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("cannot read secret key {0}: {1}")]
    KeyRead(PathBuf, std::io::Error),
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 6818))
}

fn default_kill_wait() -> u32 {
    30
}

fn default_tree_width() -> u32 {
    50
}

fn default_tree_retries() -> u32 {
    3
}

fn default_acct_poll() -> u32 {
    30
}

fn default_script_timeout() -> u32 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Canonical node name, as it appears in credentials' host sets.
    pub node_name: String,

    /// Controller endpoint for registrations and completions.
    pub controller_addr: SocketAddr,

    /// Where this node-agent accepts RPCs.
    #[serde(default = "default_listen")]
    pub listen_addr: SocketAddr,

    /// Per-step spool directories and control sockets live here.
    pub spool_dir: PathBuf,

    /// Daemon state (lock file, credential state, log).
    pub state_dir: PathBuf,

    /// Shared secret for credential signatures.
    pub key_file: PathBuf,

    /// Uid of the cluster service account (authorized alongside root).
    pub service_uid: u32,

    /// Path to the step-agent binary.
    pub stepd_path: PathBuf,

    /// Site scripts; empty/absent means "none".
    #[serde(default)]
    pub prolog: Option<PathBuf>,
    #[serde(default)]
    pub epilog: Option<PathBuf>,
    /// Administrator per-task epilog.
    #[serde(default)]
    pub task_epilog: Option<PathBuf>,

    /// Seconds between SIGTERM and SIGKILL escalation.
    #[serde(default = "default_kill_wait")]
    pub kill_wait: u32,

    /// Bound on prolog/epilog runtime.
    #[serde(default = "default_script_timeout")]
    pub script_timeout: u32,

    /// Reverse-tree fan-out.
    #[serde(default = "default_tree_width")]
    pub tree_width: u32,

    /// Parent resend budget before falling back to the controller.
    #[serde(default = "default_tree_retries")]
    pub tree_retries: u32,

    /// Propagate submit-side scheduler priority into tasks.
    #[serde(default)]
    pub propagate_prio: bool,

    /// Protective oom adjustment re-applied by step-agents.
    #[serde(default)]
    pub stepd_oom_adj: Option<i32>,

    /// Accounting poll interval (seconds), 0 disables.
    #[serde(default = "default_acct_poll")]
    pub acct_poll_secs: u32,

    /// Log filter, e.g. "info" or "gridd=debug".
    #[serde(default)]
    pub log_level: Option<String>,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Resolve the config path from the environment.
    pub fn default_path() -> PathBuf {
        std::env::var_os("GRIDD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/etc/gridd/gridd.toml"))
    }

    /// Read the shared credential-signing secret.
    pub fn read_key(&self) -> Result<Vec<u8>, ConfigError> {
        std::fs::read(&self.key_file)
            .map_err(|e| ConfigError::KeyRead(self.key_file.clone(), e))
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join("gridd.log")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("gridd.pid")
    }

    pub fn cred_state_path(&self) -> PathBuf {
        self.state_dir.join("cred_state.json")
    }

    /// The lightweight snapshot shipped to step-agents.
    pub fn snapshot(&self) -> ConfSnapshot {
        ConfSnapshot {
            node_name: self.node_name.clone(),
            spool_dir: self.spool_dir.clone(),
            controller_addr: self.controller_addr,
            node_port: self.listen_addr.port(),
            tree_width: self.tree_width,
            tree_retries: self.tree_retries,
            task_epilog: self.task_epilog.clone(),
            propagate_prio: self.propagate_prio,
            stepd_oom_adj: self.stepd_oom_adj,
            acct_poll_secs: self.acct_poll_secs,
            log_level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
