//! fusionbus sensor-fusion simulator CLI
//!
//! Runs a built-in scenario or a JSON configuration and writes the report.

use clap::Parser;
use fusionbus_sim::{OutputReport, ScenarioId, SimConfig, SimError, Simulation};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// fusionbus sensor-fusion simulator
#[derive(Parser, Debug)]
#[command(name = "fusionbus-sim")]
#[command(about = "Run the sensor-fusion simulation on the fusionbus broker", long_about = None)]
struct Args {
    /// JSON configuration file (takes precedence over --scenario)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in scenario to run (nominal, camera_fault)
    #[arg(short = 'S', long, default_value = "nominal")]
    scenario: String,

    /// Where to write the output report
    #[arg(short, long, default_value = "output_file.json")]
    output: PathBuf,

    /// Override the tick length in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON summary on stdout for CI parsing
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = log_filter(args.verbose, std::env::var("RUST_LOG").ok().as_deref());
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("✗ {}", e);
            std::process::exit(1);
        }
    }
}

/// `RUST_LOG` directives win over the `--verbose` default.
fn log_filter(verbose: bool, directives: Option<&str>) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

fn load_config(args: &Args) -> Result<(String, SimConfig), SimError> {
    let (label, mut config) = match &args.config {
        Some(path) => (path.display().to_string(), SimConfig::from_file(path)?),
        None => {
            let scenario: ScenarioId = args.scenario.parse().map_err(SimError::InvalidConfig)?;
            info!("Scenario {}: {}", scenario, scenario.description());
            (scenario.name().to_string(), scenario.config())
        }
    };
    if let Some(tick_ms) = args.tick_ms {
        config.tick_time_ms = tick_ms;
    }
    Ok((label, config))
}

/// Returns true if every sensor finished normally.
fn run(args: &Args) -> Result<bool, SimError> {
    let (label, config) = load_config(args)?;
    if !args.json {
        info!("fusionbus simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let outcome = Simulation::new(config)?.run()?;
    let report = OutputReport::from_outcome(&outcome);
    report.write_to_file(&args.output)?;

    if args.json {
        let summary = serde_json::json!({
            "run": label,
            "output": args.output.display().to_string(),
            "passed": !outcome.is_fault(),
            "statistics": outcome.statistics,
            "faulty_sensor": outcome.fault.as_ref().map(|f| f.sensor.as_str()),
            "error": outcome.fault.as_ref().map(|f| f.error.as_str()),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let stats = outcome.statistics;
        match &outcome.fault {
            None => info!(
                "✓ {} finished: {} ticks, {} detected, {} tracked, {} landmarks",
                label,
                stats.system_runtime,
                stats.num_detected_objects,
                stats.num_tracked_objects,
                stats.num_landmarks
            ),
            Some(fault) => warn!(
                "✗ {} stopped at tick {}: {} failed ({})",
                label, stats.system_runtime, fault.sensor, fault.error
            ),
        }
        info!("Report written to {}", args.output.display());
    }

    Ok(!outcome.is_fault())
}
