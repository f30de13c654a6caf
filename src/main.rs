use anyhow::{Context, Result};
use clap::Parser;
use relay_query_bridge::{config, server};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "relay_query_bridge",
    version,
    about = "Answers HTTP queries by running a one-shot subscription against a Nostr relay"
)]
struct Args {
    /// Path to config directory
    #[arg(short, long, default_value = "config")]
    config_dir: String,

    /// Override listen address
    #[arg(short, long)]
    local_addr: Option<String>,

    /// Override query timeout (e.g. "15s")
    #[arg(short, long, value_parser = humantime_serde::re::humantime::parse_duration)]
    query_timeout: Option<Duration>,
}

fn setup_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,relay_query_bridge=debug"));

    fmt()
        .with_env_filter(env_filter)
        .with_timer(fmt::time::SystemTime)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_level(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let args = Args::parse();
    let config = config::Config::new(&args.config_dir).context("Failed to load configuration")?;
    let mut settings = config
        .get_settings()
        .context("Failed to get bridge settings")?;

    if let Some(local_addr) = args.local_addr {
        settings.local_addr = local_addr;
    }

    if let Some(query_timeout) = args.query_timeout {
        config::check_timeout("query_timeout", query_timeout).map_err(anyhow::Error::msg)?;
        settings.query_timeout = query_timeout;
    }

    server::run_server(settings).await
}
