//! zte-tracker - Device tracker for ZTE home routers
//!
//! Logs into the router's web-management API, lists connected clients and
//! router status, and can trigger a reboot.

mod config;
mod coordinator;
mod error;
mod http;
mod models;
mod parser;
mod router;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use coordinator::{Coordinator, CoordinatorData};
use router::{RouterApi, RouterModel, ZteClient};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "zte-tracker")]
#[command(about = "Device tracker for ZTE home routers", long_about = None)]
struct Args {
    /// Keep polling with an adaptive interval until Ctrl-C
    #[arg(short, long)]
    daemon: bool,

    /// Config file path (default: search config.toml locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reboot the router and exit
    #[arg(long)]
    reboot: bool,

    /// Print supported router models and exit
    #[arg(long)]
    list_models: bool,

    /// Do not register devices first seen while running
    #[arg(long)]
    no_register: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_models {
        for model in RouterModel::ALL {
            println!("{}", model);
        }
        return Ok(());
    }

    let cfg = config::Config::load(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    tracing::info!("zte-tracker v{}", env!("CARGO_PKG_VERSION"));

    let client = ZteClient::new(&cfg.router, &cfg.http)
        .with_context(|| format!("Cannot set up client for {}", cfg.router.host))?;
    tracing::info!("Router {} ({})", client.host(), client.model());

    let mut coordinator = Coordinator::new(client, &cfg.polling);
    if args.no_register {
        coordinator.set_register_new_devices(false);
    }

    if args.reboot {
        return run_reboot(&coordinator).await;
    }

    if args.daemon {
        run_daemon(&mut coordinator).await
    } else {
        run_once(&mut coordinator).await
    }
}

async fn run_reboot(coordinator: &Coordinator<ZteClient>) -> Result<()> {
    if coordinator.async_reboot_router().await {
        tracing::info!("Router is rebooting");
        Ok(())
    } else {
        anyhow::bail!("Reboot failed")
    }
}

/// Run a single poll and print the result as JSON
async fn run_once(coordinator: &mut Coordinator<ZteClient>) -> Result<()> {
    let data = coordinator.refresh().await;
    println!("{}", serde_json::to_string_pretty(&data)?);

    if !coordinator.available() {
        anyhow::bail!("Router unavailable");
    }
    Ok(())
}

/// Poll until Ctrl-C, sleeping for whatever interval the coordinator picks.
/// SIGUSR1 toggles pause/resume.
async fn run_daemon(coordinator: &mut Coordinator<ZteClient>) -> Result<()> {
    tracing::info!("Starting daemon mode...");
    let mut known: HashSet<String> = HashSet::new();
    let mut toggle = PauseToggle::install()?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let data = tokio::select! {
            data = coordinator.refresh() => data,
            _ = &mut ctrl_c => return shutdown(coordinator).await,
        };
        log_cycle(&data);
        announce_new_devices(coordinator, &data, &mut known);

        let interval = coordinator.update_interval();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = toggle.recv() => {
                if coordinator.paused() {
                    coordinator.resume_scanning();
                } else {
                    coordinator.pause_scanning().await;
                }
            }
            _ = &mut ctrl_c => return shutdown(coordinator).await,
        }
    }
}

async fn shutdown(coordinator: &mut Coordinator<ZteClient>) -> Result<()> {
    tracing::info!("Shutting down");
    if let Some(data) = coordinator.data() {
        tracing::info!("Last poll: {} devices", data.devices.len());
    }
    coordinator.pause_scanning().await;
    Ok(())
}

struct PauseToggle {
    #[cfg(unix)]
    signal: tokio::signal::unix::Signal,
}

impl PauseToggle {
    fn install() -> Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let signal =
                signal(SignalKind::user_defined1()).context("Cannot install SIGUSR1 handler")?;
            Ok(Self { signal })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Never resolves where there is no SIGUSR1
    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            if self.signal.recv().await.is_some() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

fn log_cycle(data: &CoordinatorData) {
    let info = &data.router_info;
    match (info.active_devices, info.total_devices) {
        (Some(active), Some(total)) => tracing::info!(
            "Router {}: {} active / {} known devices",
            info.status,
            active,
            total
        ),
        _ => tracing::warn!(
            "Router {}: serving {} cached devices",
            info.status,
            data.devices.len()
        ),
    }
}

fn announce_new_devices(
    coordinator: &Coordinator<ZteClient>,
    data: &CoordinatorData,
    known: &mut HashSet<String>,
) {
    for (mac, device) in &data.devices {
        if known.insert(mac.clone()) {
            if coordinator.register_new_devices() {
                tracing::info!(
                    "New device {} ({}, {}) on {}",
                    device.name,
                    mac,
                    device.ip,
                    device.network_type
                );
            } else {
                tracing::debug!("Not registering new device {}", mac);
            }
        }
    }
}
