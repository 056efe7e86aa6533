//! `aegis run`: the dispatch coordinator loop.

use aegis_dispatcher::{Coordinator, METRICS};
use aegis_protocol::SystemConfig;
use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::config::{database_path, load_config, open_db, GlobalOptions};

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Run a single cycle and exit
    #[arg(long, conflicts_with = "max_cycles")]
    pub once: bool,

    /// Stop after N cycles (0 = until interrupted)
    #[arg(long)]
    pub max_cycles: Option<u64>,

    /// Seconds between cycles
    #[arg(long, env = "AEGIS_POLL_INTERVAL_SECS")]
    pub interval: Option<u64>,

    /// Base URL of the OSRM-compatible routing service
    #[arg(long, env = "AEGIS_ROUTING_URL")]
    pub routing_url: Option<String>,

    /// Always use straight-line routes
    #[arg(long)]
    pub no_routing: bool,

    /// Identity recorded on claims (default: <hostname>-<pid>)
    #[arg(long)]
    pub worker_id: Option<String>,
}

impl RunArgs {
    /// Fold command-line overrides into the loaded config.
    pub fn apply(&self, config: &mut SystemConfig) {
        if self.once {
            config.coordinator.max_cycles = 1;
        } else if let Some(max_cycles) = self.max_cycles {
            config.coordinator.max_cycles = max_cycles;
        }
        if let Some(interval) = self.interval {
            config.coordinator.poll_interval_secs = interval;
        }
        if let Some(url) = &self.routing_url {
            config.routing.base_url = url.clone();
        }
        if self.no_routing {
            config.routing.enabled = false;
        }
        if let Some(worker_id) = &self.worker_id {
            config.coordinator.worker_id = Some(worker_id.clone());
        }
    }
}

pub async fn run(args: RunArgs, options: &GlobalOptions) -> Result<()> {
    let mut config = load_config(options)?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration after applying flags")?;

    let db = open_db(&config).await?;
    let coordinator = Coordinator::new(db.clone(), &config).context("Failed to build coordinator")?;

    let routing = if config.routing.enabled {
        config.routing.base_url.as_str()
    } else {
        "disabled"
    };
    info!(
        database = %database_path(&config)?.display(),
        worker_id = coordinator.worker_id(),
        routing,
        "Starting dispatch coordinator"
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let summary = coordinator.run(shutdown_rx).await;
    let metrics = METRICS.snapshot();
    info!(
        missions_created = metrics.missions_created,
        route_fallbacks = metrics.route_fallbacks,
        station_fallbacks = metrics.station_fallbacks,
        permanent_errors = metrics.permanent_errors,
        avg_cycle_ms = metrics.avg_cycle_time_ms(),
        "Run metrics"
    );
    db.close().await;

    println!(
        "Ran {} cycle(s), dispatched {} incident(s), {} failed cycle(s)",
        summary.cycles, summary.dispatched, summary.failed_cycles
    );
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, finishing current cycle"),
        _ = terminate => info!("Received SIGTERM, finishing current cycle"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_once_sets_single_cycle() {
        let mut config = SystemConfig::default();
        RunArgs {
            once: true,
            interval: Some(2),
            no_routing: true,
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.coordinator.max_cycles, 1);
        assert_eq!(config.coordinator.poll_interval_secs, 2);
        assert!(!config.routing.enabled);
    }

    #[test]
    fn test_zero_interval_rejected_after_apply() {
        let mut config = SystemConfig::default();
        RunArgs {
            interval: Some(0),
            ..Default::default()
        }
        .apply(&mut config);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_single_cycle_against_temp_db() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config_file = tmp.path().join("aegis.toml");
        std::fs::write(&config_file, "").unwrap();
        let options = GlobalOptions {
            config: Some(config_file),
            database: Some(tmp.path().join("aegis.sqlite3")),
        };

        let args = RunArgs {
            once: true,
            no_routing: true,
            ..Default::default()
        };
        run(args, &options).await.unwrap();
        assert!(tmp.path().join("aegis.sqlite3").exists());
    }
}
