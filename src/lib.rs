//! Tessera: a typed front-end for tile-based accelerator kernels.
//!
//! Kernels are written as Rust functions against [`lang::KernelBuilder`],
//! whose builtins validate their operands and lower to the SSA tensor IR in
//! [`ir`]. Lowered kernels can be printed, content-hashed, or executed by
//! the reference evaluator in [`interp`].

pub mod config;
pub mod constexpr;
pub mod diagnostic;
pub mod grid;
pub mod hash;
pub mod interp;
pub mod ir;
pub mod kernels;
pub mod lang;
pub mod types;

pub use config::target;
pub use diagnostic::{Diagnostic, ErrorKind};
pub use ir::Kernel;
pub use lang::{KernelBuilder, Tensor};
