use anyhow::Result;
use clap::Parser;
use snappy_core::cli::Args;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "snappy_core=debug"
    } else {
        "snappy_core=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    snappy_core::run_cli(&args)
}
