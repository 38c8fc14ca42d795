// src/main.rs

use clap::Parser;

use starbash::cli::CliArgs;
use starbash::logging;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    if let Err(err) = logging::init_logging(args.log_level.as_deref(), args.base_dir.as_deref())
    {
        eprintln!("failed to initialise logging: {err}");
        std::process::exit(2);
    }

    let code = starbash::run(args).await;
    std::process::exit(code);
}
