use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use helpline_core::config::{Config, LoggingConfig};
use helpline_gateway::{AppState, Collaborators};

#[derive(Parser)]
#[command(
    name = "helpline",
    about = "Voice help desk: phone intake, live transcription and grounded answers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook and media-stream server
    Serve {
        /// Port to listen on (default: 3000)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show configuration summary and whether a server is answering
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration, or one value by dotted path (e.g. "server.port")
    Show { key: Option<String> },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;

    init_logging(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.get_or_insert_with(Default::default).port = Some(port);
            }
            serve(config).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { key: None } => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Show { key: Some(key) } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("{key} is not set in {}", config_path.display()),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
        Commands::Status => {
            println!("Helpline v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Listen: {}:{}", config.bind_addr(), config.port());
            println!("Store: {}", config.store_dir().display());
            println!("Intake mode: {:?}", config.intake_mode());
            println!("Models: {} / {}", config.extraction_model(), config.answer_model());
            match probe_health(config.port()).await {
                Some(active) => println!("Status: running ({active} active calls)"),
                None => println!("Status: not running"),
            }
        }
    }

    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid configuration: {}", errors.join("; "));
    }

    let collaborators = Collaborators::from_config(&config);
    #[allow(unused_mut)]
    let mut state = AppState::new(config, collaborators);

    #[cfg(feature = "metrics")]
    {
        state.metrics = match helpline_gateway::metrics::install_prometheus_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "Metrics recorder not installed");
                None
            }
        };
    }

    let state = Arc::new(state);
    warm_up(&state).await;

    tracing::info!(
        "Starting helpline v{} on port {}",
        env!("CARGO_PKG_VERSION"),
        state.config.port()
    );
    helpline_gateway::start_server(state).await
}

async fn warm_up(state: &AppState) {
    let mut models = vec![state.config.answer_model(), state.config.extraction_model()];
    models.dedup();
    for model in models {
        state.gateway.warm_up(&model).await;
    }
}

/// `Some(active_calls)` when a local server answers `/health`.
async fn probe_health(port: u16) -> Option<u64> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .ok()?;
    let body: serde_json::Value = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .ok()?
        .json()
        .await
        .ok()?;
    body["active_calls"].as_u64()
}

fn filter_directives(logging: Option<&LoggingConfig>, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        logging.and_then(|l| l.level.as_deref()).unwrap_or("info")
    };
    let mut directives = vec![level.to_string()];
    if let Some(logging) = logging {
        directives.extend(logging.filters.iter().cloned());
    }
    directives.join(",")
}

fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(filter_directives(logging, verbose))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}
