use anyhow::Result;
use clap::Parser;
use diary_service::{logging, App, ServiceConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::parse();
    logging::init(&config.log);

    info!("Diary Service v{}", env!("CARGO_PKG_VERSION"));

    let app = App::bootstrap(&config).await?;
    app.serve(&config).await
}
