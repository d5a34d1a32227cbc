use anyhow::Context;
use clap::Parser;
use es_maintenance_hook::client::ElasticsearchClient;
use es_maintenance_hook::config::{HookAction, HookArgs, HookConfig, LogFormat};
use es_maintenance_hook::controller::run_hook;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Lifecycle action to run
    #[arg(value_enum)]
    action: HookAction,

    #[command(flatten)]
    args: HookArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.args.log_format);

    let action = cli.action;
    let config = HookConfig::from_args(cli.args, action).context("invalid hook configuration")?;

    info!(
        "Starting es-maintenance-hook v{} ({}, mode {})",
        env!("CARGO_PKG_VERSION"),
        action,
        config.mode
    );

    let client = ElasticsearchClient::connect(
        &config.endpoint,
        config.timeouts.connect,
        config.timeouts.request,
    )
    .await
    .with_context(|| format!("failed to connect to {}", config.endpoint))?;

    let outcome = run_hook(action, &config, &client)
        .await
        .with_context(|| format!("{action} hook failed"))?;

    info!("{}", outcome.summary());
    info!("Hook completed");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
    }
}
