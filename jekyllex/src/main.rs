mod app;
mod cli;
mod log;
mod shutdown;

use clap::Parser;
use cli::Cli;
use miette::Result;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    log::init_tracing(cli.global_options.level());
    app::run(cli).await
}
