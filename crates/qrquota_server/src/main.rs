use clap::Parser;
use qrquota_rate_limit::{QuotaConfig, StoreBackend};
use qrquota_server::{ObservabilityConfig, init_observability, serve, shutdown_observability};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "qrquota usage quota enforcement server", long_about = None)]
struct Args {
    /// Configuration file (default: bundled defaults plus user overrides)
    #[arg(short, long, env = "QRQUOTA_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides [server].bind
    #[arg(short, long)]
    bind: Option<String>,

    /// Redis URL, overrides [store].redis_url
    #[arg(long, env = "QRQUOTA_REDIS_URL")]
    redis_url: Option<String>,

    /// Use in-process counters instead of redis
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => QuotaConfig::from_file(path)?,
        None => QuotaConfig::load()?,
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(url) = args.redis_url {
        config.store.redis_url = url;
    }
    if args.memory {
        config.store.backend = StoreBackend::Memory;
    }

    let provider = init_observability(ObservabilityConfig::from_server_config(&config.server))?;
    info!(
        backend = %config.store.backend,
        bind = %config.server.bind,
        "Starting qrquota server"
    );

    let result = serve(config).await;
    shutdown_observability(provider);
    Ok(result?)
}
