//! `scriptum-ds` entry point.

use clap::Parser;

use scriptum::config::{DsArgs, DsConfig};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = DsArgs::parse();
    let config = match DsConfig::resolve(args) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "bad configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(err) = scriptum::ds::server::run(config).await {
        tracing::error!(%err, "directory service exited");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}
