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

//! btlink daemon

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use btlink::agent::PairingAgent;
use btlink::bluetooth::{self, BluetoothHost, BluezPlatform};
use btlink::config::Config;
use btlink::error::STATUS_OK;
use btlink::state::AppState;

/// Pause before recreating a server that failed to start.
const RESTART_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("btlink=info".parse()?),
        )
        .init();

    info!("Starting btlink v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // The agent is a boot-time precondition: without it nothing can pair.
    let agent = if config.agent.enabled {
        Some(PairingAgent::spawn(&config.agent).context("pairing agent startup failed")?)
    } else {
        warn!("Pairing agent disabled");
        None
    };

    let adapter = bluetooth::prepare_adapter(&config.bluetooth).await?;
    info!("Local adapter: {}", adapter.address().await?);

    let state = AppState::new();
    let mut host = BluetoothHost::new(BluezPlatform::new(), config.host_config());
    host.set_listener(state.clone());

    info!("Ready. Listening on RFCOMM channel {}", config.bluetooth.channel);

    tokio::select! {
        result = serve(&mut host, &state) => {
            if let Err(e) = result {
                error!("Link loop ended: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    host.close().await;
    if let Some(agent) = agent {
        tokio::task::spawn_blocking(move || agent.stop()).await?;
    }

    info!("btlink stopped");
    Ok(())
}

/// Accept a peer, drain it until it leaves, then accept the next one.
async fn serve(host: &mut BluetoothHost<BluezPlatform>, state: &Arc<AppState>) -> Result<()> {
    loop {
        let status = host.create_server().await;
        if status != STATUS_OK {
            error!("Server startup failed with status {}, retrying", status);
            tokio::time::sleep(RESTART_DELAY).await;
            continue;
        }

        let device = state.get_device().unwrap_or_else(|| "peer".to_string());
        let Some(mut chunks) = host.start_receiving() else {
            warn!("{} left before the receive worker started", device);
            continue;
        };

        let mut total = 0usize;
        while let Some(chunk) = chunks.recv().await {
            total += chunk.len();
            info!("Received {} bytes ({} total)", chunk.len(), total);
        }

        info!("Session with {} ended after {} bytes", device, total);
        host.close().await;
    }
}
