use std::process;

use clap::Args;

use tessera::grid::TileGrid;

#[derive(Args)]
pub struct GridArgs {
    #[arg(long)]
    pub num_pid_m: i64,
    #[arg(long)]
    pub num_pid_n: i64,
    #[arg(long, default_value_t = 8)]
    pub group_size_m: i64,
    /// Only verify coverage, do not print the mapping
    #[arg(long)]
    pub quiet: bool,
}

pub fn cmd_grid(args: GridArgs) {
    let grid = match TileGrid::new(args.num_pid_m, args.num_pid_n, args.group_size_m) {
        Ok(grid) => grid,
        Err(e) => {
            eprintln!("error: {}", e.message);
            process::exit(1);
        }
    };

    if !args.quiet {
        println!("pid\tpid_m\tpid_n");
        for (pid, m, n) in grid.tiles() {
            println!("{}\t{}\t{}", pid, m, n);
        }
    }

    match grid.verify_coverage() {
        Ok(()) => eprintln!(
            "OK: {} programs cover the {}x{} grid (group {})",
            grid.len(),
            grid.num_pid_m,
            grid.num_pid_n,
            grid.group_size_m
        ),
        Err(e) => {
            eprintln!("error: {}", e.message);
            process::exit(1);
        }
    }
}
