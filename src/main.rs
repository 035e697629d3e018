use clap::{Parser, Subcommand};

mod cli;

#[derive(Parser)]
#[command(
    name = "tessera",
    version,
    about = "Tessera tile-language front-end: lower, inspect and hash kernels."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lower a built-in kernel and print its IR
    Lower(cli::lower::LowerArgs),
    /// Print the grouped program-to-tile mapping and verify coverage
    Grid(cli::grid::GridArgs),
    /// Show the content hash of a lowered kernel (BLAKE3)
    Hash(cli::hash::HashArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Lower(args) => cli::lower::cmd_lower(args),
        Command::Grid(args) => cli::grid::cmd_grid(args),
        Command::Hash(args) => cli::hash::cmd_hash(args),
    }
}
