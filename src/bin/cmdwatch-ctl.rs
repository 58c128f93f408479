// src/bin/cmdwatch-ctl.rs

use cmdwatch::{cli, logging, run_ctl};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("cmdwatch-ctl error: {err:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse_ctl();
    logging::init_logging(args.log_level)?;
    run_ctl(args).await
}
