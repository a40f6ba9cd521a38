//! Configuration for meshsim

use clap::Parser;
use std::time::Duration;

/// meshsim - in-process gossip mesh simulation
#[derive(Parser, Debug, Clone)]
#[command(name = "meshsim")]
#[command(author, version, about = "Runs a line of gossip peers to convergence", long_about = None)]
pub struct Config {
    /// Number of peers, wired in a line
    #[arg(short, long, default_value = "5")]
    pub peers: usize,

    /// Gossip channel name
    #[arg(short, long, default_value = "demo", env = "MESHSIM_CHANNEL")]
    pub channel: String,

    /// Periodic gossip interval in milliseconds
    #[arg(long, default_value = "200")]
    pub gossip_interval_ms: u64,

    /// Outbound queue depth per connection
    #[arg(long, default_value = "64")]
    pub queue_depth: usize,

    /// Give up waiting for convergence after this many seconds
    #[arg(long, default_value = "10")]
    pub timeout_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.peers < 2 {
            anyhow::bail!("Need at least 2 peers, got {}", self.peers);
        }
        if self.queue_depth == 0 {
            anyhow::bail!("Queue depth must be positive");
        }
        if self.gossip_interval_ms == 0 {
            anyhow::bail!("Gossip interval must be positive");
        }
        if self.channel.is_empty() {
            anyhow::bail!("Channel name cannot be empty");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        Ok(())
    }

    /// Periodic gossip interval
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    /// Convergence deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
