use anyhow::Result;
use clap::Parser;
use std::io;

mod cli;
mod config;
mod probe;
mod report;
mod runner;

use cli::Args;
use config::{Config, OutputFormat};
use runner::Runner;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: config load error: {:#}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = args.apply(&mut config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let runner = Runner::new(config);
    let results = runner.run().await;

    let general = &runner.config().general;
    let rendered = report::filter_results(&results, &general.result_filter);
    let mut stdout = io::stdout().lock();
    match general.output {
        OutputFormat::Text => report::render_text(&mut stdout, &rendered)?,
        OutputFormat::Json => report::render_json(&mut stdout, &rendered)?,
    }

    if !report::all_passed(&results) {
        std::process::exit(1);
    }
    Ok(())
}
