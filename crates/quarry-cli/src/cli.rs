//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Quarry - compile query operator trees to parameterized SQL
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to project directory
    #[arg(short = 'p', long, global = true, default_value = ".")]
    pub project_dir: String,

    /// Override config file path (default: quarry.yml in the project directory)
    #[arg(short, long, global = true, env = "QUARRY_CONFIG")]
    pub config: Option<String>,

    /// Override catalog file path (default: catalog.yml in the project directory)
    #[arg(long, global = true, env = "QUARRY_CATALOG")]
    pub catalog: Option<String>,

    /// JSON file of macro definitions, registered in file order
    #[arg(long, global = true)]
    pub macros: Option<String>,

    /// JSON file mapping entity names to row-filter lambdas
    #[arg(long, global = true)]
    pub security: Option<String>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile an operator tree and print its command text
    Compile(CompileArgs),

    /// Compile an operator tree and run it against DuckDB
    Run(RunArgs),

    /// Delete the entity rows an operator tree yields
    Delete(DeleteArgs),

    /// List the optimizer passes in the order they run
    Passes,

    /// Print CREATE TABLE statements for the catalog
    Schema,
}

/// Arguments for the compile command
#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Operator tree as JSON
    pub tree: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "sql")]
    pub output: CompileOutput,
}

/// Compile output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileOutput {
    /// Command text followed by its parameters
    Sql,
    /// Commands and result shape as JSON
    Json,
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Operator tree as JSON
    pub tree: String,

    /// DuckDB database file, or :memory:
    #[arg(short, long, env = "QUARRY_DATABASE")]
    pub database: String,

    /// Create missing catalog tables before running
    #[arg(long)]
    pub create_tables: bool,
}

/// Arguments for the delete command
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Operator tree as JSON
    pub tree: String,

    /// DuckDB database file, or :memory:
    #[arg(short, long, env = "QUARRY_DATABASE")]
    pub database: String,
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
