mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use hearth_core::kernel::constants::DEFAULT_CONFIG_FILE;
use hearth_core::{ActivationEvent, KernelError, PluginRuntime, RuntimeConfig, SemanticVersion, VersionRange};
use log::{debug, info};
use tracing_subscriber::EnvFilter;

/// Hearth: plugin dependency resolution and lazy activation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Runtime configuration file (.json, .yaml, .yml or .toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Plugin directory to scan; replaces the configured roots. Repeatable.
    #[arg(long = "plugins-dir", global = true)]
    plugins_dir: Vec<PathBuf>,

    /// Parent directory of per-plugin data directories
    #[arg(long = "data-dir", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover plugins and print their activation order
    Resolve {
        /// Resolve only this plugin and its required dependencies
        #[arg(long)]
        plugin: Option<String>,
    },
    /// Discover plugins and print their state
    List {
        /// Print snapshots as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check whether a version satisfies a range
    Satisfies {
        /// Range such as "^1.2.0" or ">=1.0.0, <2.0.0"
        range: String,
        version: String,
    },
    /// Discover plugins, fire an activation event and shut down
    Fire {
        /// Event such as "onStartup" or "onCommand:hello.run"
        event: String,
    },
}

/// Installs the tracing subscriber and routes `log` records from
/// hearth-core into it. `HEARTH_LOG` takes precedence over `RUST_LOG`.
fn init_logging() {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
    let filter = EnvFilter::try_from_env("HEARTH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
    }
}

async fn load_config(args: &CliArgs) -> Result<RuntimeConfig, KernelError> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path).await?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => RuntimeConfig::load(Path::new(DEFAULT_CONFIG_FILE)).await?,
        None => RuntimeConfig::default(),
    };
    if !args.plugins_dir.is_empty() {
        config.plugins_root = args.plugins_dir.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        config.data_root = data_dir.clone();
    }
    debug!("Runtime configuration: {:?}", config);
    Ok(config)
}

async fn discover(args: &CliArgs) -> Result<PluginRuntime, KernelError> {
    let runtime = PluginRuntime::new(load_config(args).await?);
    let report = runtime.discover().await;
    for (path, error) in &report.failures {
        eprintln!("warning: skipped {}: {}", path.display(), error);
    }
    info!("Discovered {} plugin(s)", report.plugins.len());
    Ok(runtime)
}

async fn run(args: CliArgs) -> Result<ExitCode, KernelError> {
    match &args.command {
        Commands::Satisfies { range, version } => {
            let range = VersionRange::parse(range)?;
            let version = SemanticVersion::parse(version)?;
            let satisfied = range.is_satisfied_by(&version);
            println!("{}", satisfied);
            Ok(if satisfied { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
        Commands::Resolve { plugin } => {
            let runtime = discover(&args).await?;
            let result = match plugin {
                Some(id) => runtime.resolve_for(id),
                None => runtime.resolve_all(),
            };
            Ok(cli::print_resolution(&result))
        }
        Commands::List { json } => {
            let runtime = discover(&args).await?;
            let records = runtime.records();
            if *json {
                let text = serde_json::to_string_pretty(&records).map_err(|e| KernelError::Other(e.to_string()))?;
                println!("{}", text);
            } else {
                cli::print_records(&records);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Fire { event } => {
            let event = ActivationEvent::parse(event)?;
            let runtime = discover(&args).await?;
            let report = runtime.fire_event(event.clone()).await;
            cli::print_activation(&event, &report);
            let shutdown = runtime.shutdown().await;
            cli::print_shutdown(&shutdown);
            Ok(if report.is_clean() && shutdown.failures.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}
