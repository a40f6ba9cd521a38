//! meshsim - runs a simulated gossip mesh until it converges

use clap::Parser;
use meshsim::config::Config;
use meshsim::sim::Simulation;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_logging(&config);

    info!("meshsim v{} - gossip mesh simulation", env!("CARGO_PKG_VERSION"));

    let sim = match Simulation::new(config) {
        Ok(sim) => sim,
        Err(e) => {
            error!("Failed to initialize simulation: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match sim.run().await {
        Ok(report) if report.converged => {
            info!("{} peers converged in {:?}", report.peers, report.elapsed);
            ExitCode::SUCCESS
        }
        Ok(report) => {
            warn!(
                "No convergence after {:?}: entries per peer {:?}, unicast delivered: {}",
                report.elapsed, report.entry_counts, report.unicast_delivered
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Simulation error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config) {
    let level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("meshsim={level},mesh_gossip_net={level}"))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
