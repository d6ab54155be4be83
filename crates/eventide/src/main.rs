//! The eventide hub binary.
//!
//! Launched by the client (or by hand) with a time base, a work dir, and a
//! config path. Startup prints exactly one sentinel line on stdout:
//! `EVENTIDE_READY` once the socket is bound and devices are up, or
//! `EVENTIDE_FAILED` on a fatal error - the client parses nothing else
//! from this stream.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tideconf::HubConfig;
use tideproto::{MonotonicClock, FAILED_SENTINEL, READY_SENTINEL};

use eventide::server::HubServer;
use eventide::state::{self, HubState, HubStatus};
use eventide::telemetry;

/// The eventide event hub process.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Clock base in seconds: the spawning process's clock reading, so
    /// both processes share one timeline.
    #[arg(long)]
    time_base: Option<f64>,

    /// Working directory for the datastore and any relative paths.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Path to the hub config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match HubConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            fail_startup(&format!("config error: {e}"));
            return Err(e.into());
        }
    };

    telemetry::init(config.log_level.as_deref());

    let clock = cli
        .time_base
        .map(MonotonicClock::resumed_from)
        .unwrap_or_default();
    let work_dir = match cli.work_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("no working directory")?,
    };

    tracing::info!(
        time_base = clock.base(),
        work_dir = %work_dir.display(),
        devices = config.devices.len(),
        "eventide hub starting"
    );

    let state = HubState::from_config(&config, clock, &work_dir);
    if !config.devices.is_empty() && state.usable_device_count() == 0 {
        fail_startup("no devices could be constructed");
        anyhow::bail!("startup failed: no devices could be constructed");
    }
    let shared = state::shared(state);

    let server = match HubServer::bind(shared.clone(), config.udp_port).await {
        Ok(server) => server,
        Err(e) => {
            fail_startup(&format!("transport bind failed: {e}"));
            return Err(e);
        }
    };
    let addr = server.local_addr()?;

    {
        let mut st = shared.write().await;
        st.status = HubStatus::Ready;
    }
    println!("{READY_SENTINEL}");
    std::io::stdout().flush().ok();
    tracing::info!(%addr, "eventide hub ready");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, exiting");
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

fn fail_startup(reason: &str) {
    eprintln!("eventide startup failed: {reason}");
    println!("{FAILED_SENTINEL}");
    std::io::stdout().flush().ok();
}
