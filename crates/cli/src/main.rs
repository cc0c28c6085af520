mod config_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    parley_config::ParleyConfig,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "parley", about = "Parley: chat gateway backed by an LLM")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of the discovered one.
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook server (default when no subcommand is provided).
    Serve {
        /// Address to bind to (overrides config value).
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides config value).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate the configuration file and report errors/warnings.
    CheckConfig {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ParleyConfig> {
    match path {
        Some(path) => Ok(parley_config::load_config(path)?),
        None => Ok(parley_config::discover_and_load()),
    }
}

fn apply_overrides(config: &mut ParleyConfig, bind: Option<String>, port: Option<u16>) {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        Some(Commands::CheckConfig { verbose }) => {
            if !config_commands::check(cli.config.as_deref(), verbose) {
                std::process::exit(1);
            }
            Ok(())
        },
        None => serve(cli.config.as_ref(), None, None).await,
        Some(Commands::Serve { bind, port }) => serve(cli.config.as_ref(), bind, port).await,
    }
}

async fn serve(
    config_path: Option<&PathBuf>,
    bind: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "parley starting");

    let mut config = load_config(config_path)?;
    apply_overrides(&mut config, bind, port);

    let validation = parley_config::validate_config(&config);
    for d in &validation.diagnostics {
        match d.severity {
            parley_config::Severity::Error => {
                tracing::error!(path = %d.path, "{}", d.message)
            },
            parley_config::Severity::Warning => warn!(path = %d.path, "{}", d.message),
            parley_config::Severity::Info => info!(path = %d.path, "{}", d.message),
        }
    }
    if validation.has_errors() {
        anyhow::bail!("invalid configuration; run `parley check-config` for details");
    }

    parley_gateway::start_gateway(config).await
}
