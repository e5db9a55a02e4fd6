//! Quarry CLI - compile query operator trees to SQL and run them on DuckDB

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::Cli;
use commands::{compile, delete, passes, run, schema};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        cli::Commands::Compile(args) => compile::execute(args, &cli.global),
        cli::Commands::Run(args) => run::execute(args, &cli.global),
        cli::Commands::Delete(args) => delete::execute(args, &cli.global),
        cli::Commands::Passes => passes::execute(&cli.global),
        cli::Commands::Schema => schema::execute(&cli.global),
    }
}
