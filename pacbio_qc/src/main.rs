mod bam;
mod cli;
mod config;
mod controller;
mod error;
mod kraken;
mod multiqc;
mod output;
mod pipeline;
mod process;
mod report;
mod sample;
mod settings;
mod stats;
mod summary;
mod task;
mod tools;

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

use anyhow::Context;

fn main() -> anyhow::Result<()> {
    let cfg = cli::handle_cli().with_context(|| "Error processing command line arguments")?;
    pipeline::run(&cfg, &tools::SystemRunner)
}
