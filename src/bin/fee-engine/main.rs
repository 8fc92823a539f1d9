// Fee Engine: periodic fee-rate controller for a routing node
//
// Usage:
//   fee-engine --config fee-engine.toml once        # One tick, print the report
//   fee-engine run                                  # Tick every interval_seconds
//   fee-engine generate-config -o fee-engine.toml   # Write a sample config
//   fee-engine validate-config                      # Parse and validate only

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fee_engine::config::{ConfigFile, LogFormat, LoggingConfig};
use fee_engine::lock::TickLock;
use fee_engine::node::JsonFileNode;
use fee_engine::store::JsonFileStore;
use fee_engine::{EngineConfig, FeeEngine, TickReport};

#[derive(Parser)]
#[command(name = "fee-engine")]
#[command(version, about = "Margin/spread fee controller for routing nodes", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "fee-engine.toml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Override the configured log format (pretty, compact, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Compute and persist without broadcasting
    #[arg(long)]
    db_only: bool,

    /// Broadcast even if the config says db_only
    #[arg(long, conflicts_with = "db_only")]
    broadcast: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tick every `interval_seconds` until interrupted
    Run,
    /// Run a single tick and print its report as JSON
    Once,
    /// Write a sample configuration
    GenerateConfig {
        /// Output path; stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load and validate the configuration
    ValidateConfig,
}

fn main() {
    let cli = Cli::parse();

    if let Commands::GenerateConfig { output } = &cli.command {
        if let Err(e) = generate_config(output.as_deref()) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config {}: {}", cli.config.display(), e);
            std::process::exit(1);
        }
    };

    setup_logging(&config.logging, cli.log_level.as_deref(), cli.log_format.as_deref());

    let result = match cli.command {
        Commands::ValidateConfig => {
            println!("Configuration {} is valid", cli.config.display());
            Ok(())
        }
        Commands::Once => run_once(config),
        Commands::Run => run_loop(&cli, config),
        Commands::GenerateConfig { .. } => Ok(()),
    };

    if let Err(e) = result {
        error!(error = %e, "fee engine failed");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig, fee_engine::ConfigError> {
    let mut config = EngineConfig::load(&cli.config)?;
    if cli.db_only {
        config.engine.db_only = true;
    }
    if cli.broadcast {
        config.engine.db_only = false;
    }
    Ok(config)
}

fn generate_config(output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let rendered = ConfigFile::sample().render()?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)?;
            println!("Sample configuration written to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

fn setup_logging(config: &LoggingConfig, level: Option<&str>, format: Option<&str>) {
    let level = level.unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = match format {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some("pretty") => LogFormat::Pretty,
        _ => config.format.clone(),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    if let Err(e) = installed {
        eprintln!("logging already initialised: {}", e);
    }
}

fn engine_for(config: EngineConfig) -> FeeEngine<JsonFileNode, JsonFileStore> {
    let node = JsonFileNode::new(&config.node.snapshot_file, &config.node.updates_file);
    let store = JsonFileStore::new(&config.engine.state_file);
    FeeEngine::new(config, node, store)
}

/// One tick under the lock file.
fn locked_tick(
    engine: &mut FeeEngine<JsonFileNode, JsonFileStore>,
) -> Result<TickReport, Box<dyn std::error::Error>> {
    let _lock = TickLock::acquire(&engine.config().engine.lock_file)?;
    Ok(engine.tick()?)
}

fn run_once(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = engine_for(config);
    let report = locked_tick(&mut engine)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_loop(cli: &Cli, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = engine_for(config);
    info!(
        config = %cli.config.display(),
        interval_seconds = engine.config().engine.interval_seconds,
        db_only = engine.config().engine.db_only,
        "fee engine started"
    );

    loop {
        match locked_tick(&mut engine) {
            Ok(report) => info!(
                peers = report.peers.len(),
                failures = report.failures.len(),
                updates = report.updates.len(),
                broadcast = report.broadcast,
                "tick complete"
            ),
            Err(e) => error!(error = %e, "tick failed"),
        }

        std::thread::sleep(Duration::from_secs(engine.config().engine.interval_seconds.max(1)));

        // The config is re-read before every tick; a broken file keeps the
        // previous one in force.
        match load_config(cli) {
            Ok(config) => engine.reload(config),
            Err(e) => warn!(error = %e, "config reload failed, keeping previous"),
        }
    }
}
