use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use registrar::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::from_env()?;
    config.apply_args(&args)?;

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "registrar starting: RUST_LOG='{}', bind={}:{}, storage={}, secure_cookies={}",
        rust_log,
        config.bind,
        config.http_port,
        if config.database_url.is_some() { "postgres" } else { "memory" },
        config.cookie_secure
    );

    registrar::server::run(config).await
}
