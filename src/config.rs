// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving daemon settings.

use anyhow::{bail, Context, Result};
use gethostname::gethostname;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bluetooth::{HostConfig, DEFAULT_CHANNEL, MAX_CHANNEL, MIN_CHANNEL};

/// Get a sanitized hostname suitable for Bluetooth device name.
/// Bluetooth names should only contain alphanumeric chars, spaces, and hyphens.
fn get_sanitized_hostname() -> String {
    let hostname = gethostname().to_string_lossy().to_string();
    let sanitized: String = hostname
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == ' ' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "btlink".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Adapter and RFCOMM settings.
    pub bluetooth: BluetoothConfig,

    /// Background receive settings.
    pub receive: ReceiveConfig,

    /// Pairing agent settings.
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Device name advertised over Bluetooth.
    pub device_name: String,

    /// RFCOMM channel to listen on (1-30).
    pub channel: u8,

    /// Keep the adapter discoverable.
    pub discoverable: bool,

    /// Keep the adapter pairable.
    pub pairable: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_name: get_sanitized_hostname(),
            channel: DEFAULT_CHANNEL,
            discoverable: true,
            pairable: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveConfig {
    /// Bytes requested per background read.
    pub chunk_size: usize,

    /// Pause after this many chunks; 0 disables the pause.
    pub yield_every: u32,

    /// Length of the pause in milliseconds.
    pub yield_interval_ms: u64,

    /// Chunks buffered between the worker and its consumer.
    pub queue_depth: usize,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            yield_every: 10,
            yield_interval_ms: 1,
            queue_depth: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Register the pairing agent at startup.
    pub enabled: bool,

    /// Passkey returned to every pairing request.
    pub passkey: u32,

    /// Object path the agent is exported on.
    pub object_path: String,

    /// Timeout for the registration calls, in seconds.
    pub call_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            passkey: 123456,
            object_path: "/com/btlink/agent".to_string(),
            call_timeout_secs: 25,
        }
    }
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("btlink")
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the link layer cannot run with.
    pub fn validate(&self) -> Result<()> {
        let channel = self.bluetooth.channel;
        if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
            bail!(
                "bluetooth.channel must be {}-{}, got {}",
                MIN_CHANNEL,
                MAX_CHANNEL,
                channel
            );
        }
        if self.receive.chunk_size == 0 {
            bail!("receive.chunk_size must be non-zero");
        }
        if self.receive.queue_depth == 0 {
            bail!("receive.queue_depth must be non-zero");
        }
        if !self.agent.object_path.starts_with('/') {
            bail!("agent.object_path must be an absolute object path");
        }
        Ok(())
    }

    /// Link settings for the host API.
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            channel: self.bluetooth.channel,
            receive: self.receive.clone(),
        }
    }
}
