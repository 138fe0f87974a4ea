mod cli;
mod commands;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use cli::ZockimateArgs;

#[tokio::main]
async fn main() {
    let args = ZockimateArgs::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let code = match commands::run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            1
        }
    };
    std::process::exit(code);
}
