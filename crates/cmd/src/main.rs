// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{Parser, Subcommand};
use cmd::{QueryArgs, plan_command, query_command, schema_command};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "dsg")]
struct Cli {
    /// Store configuration (YAML)
    #[arg(short, long, global = true, default_value = "store.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the merged attribute schema
    Schema,
    /// Show which reader a query would use
    Plan {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Run a query and print the result as a table
    Query {
        #[command(flatten)]
        query: QueryArgs,
    },
}

#[allow(clippy::print_stdout)]
fn main() -> Result<()> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();
    let print = |output: &str| print!("{output}");

    match &cli.command {
        Commands::Schema => schema_command(&cli.config, print),
        Commands::Plan { query } => plan_command(&cli.config, query, print),
        Commands::Query { query } => query_command(&cli.config, query, print),
    }
}
