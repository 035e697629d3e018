pub mod grid;
pub mod hash;
pub mod lower;

use std::process;

use clap::Args;

use tessera::constexpr::ConstEnv;
use tessera::ir::Kernel;
use tessera::kernels;
use tessera::target::TargetConfig;
use tessera::types::Dtype;

/// Meta-parameters shared by every kernel-lowering subcommand.
#[derive(Args)]
pub struct KernelArgs {
    /// Kernel to lower: vector-add, matmul or atomic-max
    pub kernel: String,
    /// Element dtype (i8, i32, f16, bf16, f32, ...)
    #[arg(long, default_value = "f16")]
    pub dtype: String,
    /// Output dtype for matmul (defaults to --dtype)
    #[arg(long)]
    pub out_dtype: Option<String>,
    /// Elements per program for vector-add and atomic-max
    #[arg(long, default_value_t = 1024)]
    pub block_size: i64,
    #[arg(long, default_value_t = 64)]
    pub block_m: i64,
    #[arg(long, default_value_t = 64)]
    pub block_n: i64,
    #[arg(long, default_value_t = 32)]
    pub block_k: i64,
    #[arg(long, default_value_t = 8)]
    pub group_size_m: i64,
    /// A is stored transposed (matmul)
    #[arg(long)]
    pub trans_a: bool,
    /// B is stored transposed (matmul)
    #[arg(long)]
    pub trans_b: bool,
    /// Target configuration (built-in name or targets/<name>.toml)
    #[arg(long, default_value = "cuda")]
    pub target: String,
}

fn parse_dtype(name: &str) -> Dtype {
    match Dtype::parse(name) {
        Some(dtype) => dtype,
        None => {
            eprintln!("error: unknown dtype '{}'", name);
            process::exit(1);
        }
    }
}

/// Resolve a target by name or exit.
pub fn resolve_target(name: &str) -> TargetConfig {
    match TargetConfig::resolve(name) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e.message);
            if let Some(help) = &e.help {
                eprintln!("  help: {}", help);
            }
            process::exit(1);
        }
    }
}

impl KernelArgs {
    fn env(&self) -> ConstEnv {
        let mut env = ConstEnv::new()
            .with("DTYPE", parse_dtype(&self.dtype))
            .with("BLOCK_SIZE", self.block_size)
            .with("BLOCK_M", self.block_m)
            .with("BLOCK_N", self.block_n)
            .with("BLOCK_K", self.block_k)
            .with("GROUP_SIZE_M", self.group_size_m)
            .with("TRANS_A", self.trans_a)
            .with("TRANS_B", self.trans_b);
        if let Some(out) = &self.out_dtype {
            env.set("OUT_DTYPE", parse_dtype(out));
        }
        env
    }

    /// Lower the selected kernel, rendering diagnostics and exiting on
    /// failure.
    pub fn lower(&self) -> Kernel {
        let target = resolve_target(&self.target);
        match kernels::lower_named(&self.kernel, &self.env(), target) {
            Ok(kernel) => kernel,
            Err(e) => {
                e.render(&self.kernel);
                process::exit(1);
            }
        }
    }
}
