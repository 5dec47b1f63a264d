use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use diffdrive_runtime::config::{LoopTiming, FAILSAFE_CHECK_PERIOD, FAILSAFE_TIMEOUT, SERIAL_BAUDRATE};
use diffdrive_runtime::runtime::{self, RuntimeOptions};

/// Differential-drive motor controller runtime
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Serial port the host talks on
    #[arg(short, long)]
    port: String,

    #[arg(short, long, default_value_t = SERIAL_BAUDRATE)]
    baud: u32,

    /// JSON robot configuration; SetConfig requests are saved back here
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control loop rate
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..=1000))]
    control_hz: u32,

    /// Stop the motors when no motor command arrives for this long
    #[arg(long, default_value_t = FAILSAFE_TIMEOUT.as_millis() as u64)]
    failsafe_timeout_ms: u64,

    /// Drive simulated wheels instead of leaving the control loop logic-only
    #[arg(long)]
    simulate: bool,
}

impl Args {
    fn into_options(self) -> RuntimeOptions {
        RuntimeOptions {
            port: self.port,
            baudrate: self.baud,
            config_path: self.config,
            timing: LoopTiming {
                control_period: Duration::from_secs(1) / self.control_hz,
                failsafe_check_period: FAILSAFE_CHECK_PERIOD,
                failsafe_timeout: Duration::from_millis(self.failsafe_timeout_ms),
            },
            simulate: self.simulate,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup logging (set RUST_LOG=debug or trace for more)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = runtime::run(args.into_options()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
