use anyhow::{anyhow, Result};
use clap::Parser;
use orthocat::{self, Args, LogLevel};
use std::fs::File;

// --------------------------------------------------
fn main() {
    if let Err(e) = run(Args::parse()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

// --------------------------------------------------
fn run(args: Args) -> Result<()> {
    let mut logger = env_logger::Builder::new();
    logger.filter_level(match args.log {
        Some(LogLevel::Debug) => log::LevelFilter::Debug,
        _ => log::LevelFilter::Info,
    });

    if let Some(log_file) = &args.log_file {
        let file = File::create(log_file)
            .map_err(|e| anyhow!("Cannot write {}: {e}", log_file.display()))?;
        logger.target(env_logger::Target::Pipe(Box::new(file)));
    }
    logger.init();

    orthocat::run(args)
}
