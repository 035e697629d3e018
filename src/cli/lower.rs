use std::path::PathBuf;
use std::process;

use clap::Args;

use super::KernelArgs;

#[derive(Args)]
pub struct LowerArgs {
    #[command(flatten)]
    pub kernel: KernelArgs,
    /// Write the IR to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn cmd_lower(args: LowerArgs) {
    let kernel = args.kernel.lower();
    let text = kernel.to_string();
    match args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &text) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
            eprintln!(
                "OK: {} ({} instructions) -> {}",
                kernel.name,
                kernel.instr_count(),
                path.display()
            );
        }
        None => print!("{}", text),
    }
}
