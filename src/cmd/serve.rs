//! HTTP server command — `siterunner serve`.

use anyhow::Result;
use siterunner::config::Config;
use siterunner::web::server::{ServerConfig, start_server};

pub async fn cmd_serve(config: Config, host: String, port: u16, cors: bool) -> Result<()> {
    start_server(
        ServerConfig {
            host,
            port,
            permissive_cors: cors,
        },
        config,
    )
    .await
}
