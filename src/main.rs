use anyhow::Result;
use clap::Parser;
use mesh_boolean::cli;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = cli::Cli::parse();

    let default_filter = if args.verbose {
        "mesh_boolean=debug"
    } else {
        "mesh_boolean=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    cli::run(args).await
}
