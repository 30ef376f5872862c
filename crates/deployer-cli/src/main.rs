//! Deployer - GitLab artifact deployer
//!
//! Usage:
//!   deployer serve              # Listen for job webhooks (default)
//!   deployer deploy -p 1 -b 2   # Deploy one job's artifact now
//!   deployer check              # Validate configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deployer_core::ci::{CiClient, GitLabClient};
use deployer_core::config::DeployerConfig;
use deployer_core::pipeline::{DeploymentOutcome, Pipeline};
use deployer_core::server::{self, AppState};

#[derive(Parser)]
#[command(name = "deployer")]
#[command(about = "Deploy GitLab job artifacts on webhook", long_about = None)]
struct Cli {
    /// Path to deployer.toml
    #[arg(long, short, global = true, env = "DEPLOYER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve {
        /// Listen address, overrides the configured one
        #[arg(long, short)]
        listen: Option<SocketAddr>,
    },

    /// Deploy the artifact of a single job without a webhook
    Deploy {
        /// GitLab project id
        #[arg(long, short = 'p')]
        project_id: u64,

        /// GitLab job (build) id
        #[arg(long, short = 'b')]
        build_id: u64,

        /// JSON file used as the event for `{event.*}` placeholders
        #[arg(long)]
        event: Option<PathBuf>,
    },

    /// Validate the configuration and print the effective settings
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DeployerConfig::load(cli.config.as_deref());
    init_tracing(config.as_ref().is_ok_and(|config| config.debug));
    let config = config?;
    if let Some(path) = &config.source {
        tracing::debug!(path = %path.display(), "loaded config file");
    }

    match cli.command.unwrap_or(Commands::Serve { listen: None }) {
        Commands::Serve { listen } => run_serve(config, listen).await,
        Commands::Deploy {
            project_id,
            build_id,
            event,
        } => run_deploy(config, project_id, build_id, event.as_deref()).await,
        Commands::Check => {
            run_check(&config);
            Ok(())
        }
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "deployer=debug,info" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_pipeline(config: &DeployerConfig) -> Result<Pipeline> {
    let client = GitLabClient::new(&config.gitlab.server, config.gitlab.api_token.clone())
        .context("Failed to create GitLab client")?;
    let ci: Arc<dyn CiClient> = Arc::new(client);
    Ok(Pipeline::new(config, ci))
}

async fn run_serve(config: DeployerConfig, listen: Option<SocketAddr>) -> Result<()> {
    let addr = listen.unwrap_or(config.listen);
    let state = Arc::new(AppState {
        pipeline: build_pipeline(&config)?,
        respond_with_body: config.respond_with_body,
    });

    tracing::info!(
        server = %config.gitlab.server,
        template = config.target_dir.as_str(),
        build_name = config.build_name.as_deref(),
        "starting deployer"
    );

    server::serve(addr, server::router(state), shutdown_signal())
        .await
        .with_context(|| format!("Server on {addr} failed"))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(err) => {
            tracing::error!(error = %err, "cannot listen for ctrl-c, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

async fn run_deploy(
    config: DeployerConfig,
    project_id: u64,
    build_id: u64,
    event: Option<&Path>,
) -> Result<()> {
    let raw_event = match event {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read event file: {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON in event file: {}", path.display()))?;
            Some(value)
        }
        None => None,
    };

    let pipeline = build_pipeline(&config)?;
    match pipeline.deploy_build(project_id, build_id, raw_event).await {
        DeploymentOutcome::Deployed(target) => {
            println!("Deployed job {build_id} to {}", target.display());
            Ok(())
        }
        DeploymentOutcome::Rejected(rejection) => {
            println!("Not deployed: {rejection}");
            Ok(())
        }
        DeploymentOutcome::Failed(err) => {
            Err(anyhow::Error::new(err).context(format!("Deploying job {build_id} failed")))
        }
    }
}

fn run_check(config: &DeployerConfig) {
    println!("Configuration OK");
    println!();
    println!("  listen:            {}", config.listen);
    println!("  gitlab server:     {}", config.gitlab.server);
    println!("  webhook tokens:    {}", config.webhook_tokens.len());
    println!("  target_dir:        {}", config.target_dir);
    println!(
        "  build_name:        {}",
        config.build_name.as_deref().unwrap_or("(any)")
    );
    println!("  staging_dir:       {}", config.staging_dir.display());
    println!("  respond_with_body: {}", config.respond_with_body);

    let placeholders: Vec<String> = config
        .target_dir
        .placeholders()
        .map(|placeholder| placeholder.to_string())
        .collect();
    if !placeholders.is_empty() {
        println!("  placeholders:      {}", placeholders.join(", "));
    }
}
