// Dash CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Settings layer as defaults < conf file < environment < -D < flags.
// Design Decision: The run command blocks in Container::start until Ctrl-C stops it.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dash_engine::config::DashConfig;
use dash_engine::telemetry::{init_tracing, TelemetryConfig};

#[derive(Parser)]
#[command(name = "dash")]
#[command(about = "Dash - Drive weighted database workloads at a controlled rate")]
#[command(version)]
pub struct Cli {
    /// YAML conf file mapping test names to properties
    #[arg(long, short, env = "DASH_CONF")]
    pub conf: Option<PathBuf>,

    /// Test spec to read from the conf file
    #[arg(long, short, env = "DASH_TEST", default_value = "default")]
    pub test: String,

    /// Property override, e.g. -D dash.driver.threads=8 (repeatable)
    #[arg(short = 'D', long = "set", value_name = "KEY=VALUE", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a service until interrupted
    Run {
        /// Service to run (overrides runner.class)
        #[arg(long)]
        service: Option<String>,

        /// Number of workers
        #[arg(long)]
        threads: Option<usize>,

        /// Sustained operations per second
        #[arg(long)]
        rate: Option<u64>,

        /// Bucket capacity
        #[arg(long)]
        burst: Option<u64>,
    },

    /// Print the effective configuration
    Config,

    /// List the services that can be run
    Services,
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn load_config(cli: &Cli) -> anyhow::Result<DashConfig> {
    let mut config = match &cli.conf {
        Some(path) => DashConfig::from_yaml_file(path, &cli.test)
            .with_context(|| format!("failed to load test '{}' from {}", cli.test, path.display()))?,
        None => DashConfig::default(),
    };
    config
        .apply_env()
        .context("invalid environment override")?;
    config
        .apply_properties(cli.properties.iter().map(|(k, v)| (k, v)))
        .context("invalid -D override")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&TelemetryConfig::from_env());

    let output_format = output::OutputFormat::from_str(&cli.output);
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Run {
            service,
            threads,
            rate,
            burst,
        } => {
            if let Some(service) = service {
                config.service = service;
            }
            if let Some(threads) = threads {
                config.driver.threads = threads;
            }
            if let Some(rate) = rate {
                config.driver.rates.limit = rate;
            }
            if burst.is_some() {
                config.driver.rates.burst = burst;
            }
            commands::run::run(config).await
        }
        Commands::Config => commands::config::run(&config, output_format),
        Commands::Services => commands::services::run(&config, output_format),
    }
}
