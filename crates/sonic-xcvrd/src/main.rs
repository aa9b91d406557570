//! xcvrd daemon entry point.
//!
//! Loads configuration, builds the transceiver manager on top of the bus
//! backend and drives the periodic refresh until SIGINT.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use sonic_xcvr_common::run_periodic;
use sonic_xcvrd::{
    SimModule, SimulatedBus, StandardDecoder, TransceiverBus, TransceiverId, TransceiverManager,
    XcvrdConfig, DEFAULT_CONFIG_PATH,
};

/// SONiC Transceiver Lifecycle Daemon
#[derive(Parser, Debug)]
#[command(name = "xcvrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run on the in-memory bus with this many populated slots
    #[arg(long, value_name = "N")]
    simulate: Option<usize>,

    /// Hard reset every module at start-up
    #[arg(long)]
    cold_boot: bool,

    /// Run one refresh, print module info as JSON and exit
    #[arg(long)]
    once: bool,

    /// Write the effective configuration to this path and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

/// Initialize tracing/logging. `RUST_LOG` overrides the command line level.
fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .init();
}

/// Simulated chassis: slot `i` gets a CMIS, SFF-8636 or SFF-8472 module in turn.
fn simulated_bus(populated: usize, num_modules: usize) -> SimulatedBus {
    let bus = SimulatedBus::new();
    for slot in 0..populated.min(num_modules) {
        let Ok(raw) = u32::try_from(slot) else {
            break;
        };
        let module = match slot % 3 {
            0 => SimModule::cmis("SIM-CMIS"),
            1 => SimModule::sff8636("SIM-QSFP"),
            _ => SimModule::sff8472("SIM-SFP"),
        };
        bus.insert(TransceiverId(raw), module);
    }
    bus
}

fn build_bus(args: &Args, config: &XcvrdConfig) -> anyhow::Result<Arc<dyn TransceiverBus>> {
    match args.simulate {
        Some(populated) => {
            info!(populated, slots = config.manager.num_modules, "Using simulated bus");
            Ok(Arc::new(simulated_bus(populated, config.manager.num_modules)))
        }
        None => bail!("no platform bus backend available, run with --simulate <N>"),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = XcvrdConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate().context("invalid configuration")?;

    if let Some(path) = &args.write_config {
        config
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Configuration written");
        return Ok(());
    }

    let bus = build_bus(&args, &config)?;
    let manager = Arc::new(TransceiverManager::new(
        config.manager_config(),
        bus,
        Arc::new(StandardDecoder::new()),
        Arc::new(config.topology()),
    ));

    let refreshed = manager.init(args.cold_boot).await;
    info!(
        refreshed = refreshed.len(),
        cold_boot = args.cold_boot,
        "Initial refresh complete"
    );

    if args.once {
        let info = manager.get_info(&[]);
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("serializing transceiver info")?
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = tokio::spawn(run_periodic(
        manager.clone(),
        config.refresh_interval(),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    // The driver may already be gone; nothing to notify then.
    let _ = shutdown_tx.send(true);
    let ticks = driver.await.context("refresh driver failed")?;

    info!(ticks, stats = ?manager.stats(), "xcvrd stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("--- Starting xcvrd (Rust) ---");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("xcvrd error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
