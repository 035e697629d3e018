use clap::Args;

use super::KernelArgs;

#[derive(Args)]
pub struct HashArgs {
    #[command(flatten)]
    pub kernel: KernelArgs,
    /// Show the full 256-bit hash instead of the short form
    #[arg(long)]
    pub full: bool,
}

pub fn cmd_hash(args: HashArgs) {
    let kernel = args.kernel.lower();
    let hash = tessera::hash::hash_kernel(&kernel);
    if args.full {
        println!("{} {}", hash.to_hex(), kernel.name);
    } else {
        println!("{} {}", hash, kernel.name);
    }
}
