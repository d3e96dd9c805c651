//! `scriptum-sn` entry point.

use clap::Parser;

use scriptum::config::{SnArgs, SnConfig};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = SnArgs::parse();
    let config = match SnConfig::resolve(args) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "bad configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(err) = scriptum::sn::server::run(config).await {
        tracing::error!(%err, "storage node exited");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}
