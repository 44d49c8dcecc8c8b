use clap::Parser;
use hearth::{config::read_config_file, runtime::HubRuntime, util::get_config_path};
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(about = "Homelab monitoring hub")]
struct Args {
    /// Config file (defaults to $HEARTH_CONFIG or ./hearth.json)
    #[arg(short, long)]
    file: Option<String>,

    /// Log level for the hub's own targets
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("hearth", level),
        ("hearth_hub", level),
        ("tower_http", LevelFilter::WARN),
        ("sqlx", LevelFilter::WARN),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let path = args.file.unwrap_or_else(get_config_path);
    let config = read_config_file(&path)?;
    debug!("loaded config from {path}");

    let runtime = HubRuntime::start(config).await?;
    if let Some(addr) = runtime.api_addr {
        info!("api available at http://{addr}/api/v1");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    runtime.shutdown().await
}
