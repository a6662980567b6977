//! Bike Weight Finder - command line entry point
//!
//! With no flags it researches the Megamo Track 00 2026.

use bikeweight::config::{ConfigError, FinderConfig};
use bikeweight::error::{sanitize_error_message, FinderError};
use bikeweight::llm::providers::{OpenAiConfig, OpenAiProvider};
use bikeweight::observability::logging::{init_logging, LogSettings};
use bikeweight::pipeline::{BikeWeightWorkflow, WorkflowRun};
use bikeweight::report;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_CONFIG_FILE: &str = "bikeweight.toml";

/// Find the published weight of a bicycle model
#[derive(Parser)]
#[command(name = "bikeweight")]
#[command(about = "Multi-stage LLM research pipeline that finds the published weight of a bicycle")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to ./bikeweight.toml when present)
    #[arg(short, long, value_name = "FILE", env = "BIKEWEIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Bicycle brand
    #[arg(long)]
    brand: Option<String>,

    /// Bicycle model
    #[arg(long)]
    model: Option<String>,

    /// Model year
    #[arg(long)]
    year: Option<String>,

    /// Frame size
    #[arg(long)]
    size: Option<String>,

    /// Official brand domain used for site: searches
    #[arg(long, value_name = "DOMAIN")]
    brand_domain: Option<String>,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply_target_overrides(&self, config: &mut FinderConfig) {
        let target = &mut config.target;
        if let Some(brand) = &self.brand {
            target.brand = brand.clone();
            if self.brand_domain.is_none() {
                target.brand_domain = None;
            }
        }
        if let Some(model) = &self.model {
            target.model = model.clone();
        }
        if let Some(year) = &self.year {
            target.year = year.clone();
        }
        if let Some(size) = &self.size {
            target.size = Some(size.clone());
        }
        if let Some(domain) = &self.brand_domain {
            target.brand_domain = Some(domain.clone());
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut log_settings = LogSettings::from_env();
    if cli.verbose > 0 {
        log_settings = log_settings.verbose();
    }
    init_logging(&log_settings);

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            println!("\nAn error occurred: {}", sanitize_error_message(&e.to_string()));
            process::exit(1);
        }
    };

    let workflow = match build_workflow(config) {
        Ok(workflow) => workflow,
        Err(e) => {
            error!("Startup failed: {}", e);
            println!("\nAn error occurred: {}", e.user_message());
            process::exit(1);
        }
    };

    let target = workflow.config().target.clone();
    let outcome = tokio::select! {
        result = workflow.run(&target) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, aborting");
            println!("\nProcess interrupted by user.");
            process::exit(1);
        }
    };

    match outcome {
        Ok(run) => print_run(&run, cli.json),
        Err(e) => {
            error!("Research failed: {}", e);
            println!("\nAn error occurred: {}", e.user_message());
            process::exit(1);
        }
    }
}

fn load_configuration(cli: &Cli) -> Result<FinderConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            FinderConfig::load_from_file(path)?
        }
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            info!("Loading configuration from: {}", DEFAULT_CONFIG_FILE);
            FinderConfig::load_from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => FinderConfig::default(),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok());
    cli.apply_target_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Resolve credentials and wire the provider into the workflow
fn build_workflow(config: FinderConfig) -> Result<BikeWeightWorkflow, FinderError> {
    let api_key = config.get_llm_api_key()?;
    let mut openai_config = OpenAiConfig {
        api_key,
        ..Default::default()
    };
    if let Some(base_url) = &config.models.base_url {
        openai_config.base_url = base_url.trim_end_matches('/').to_string();
    }
    let provider = OpenAiProvider::new(openai_config)?;

    BikeWeightWorkflow::from_config(config, Arc::new(provider))
}

fn print_run(run: &WorkflowRun, as_json: bool) {
    if as_json {
        match serde_json::to_string_pretty(&run.report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                println!("\nAn error occurred: {e}");
                process::exit(1);
            }
        }
    } else {
        println!("{}", report::render_run(run));
    }
}
