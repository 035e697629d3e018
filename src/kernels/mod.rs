//! Canonical kernels written against the builtin surface.
//!
//! Each function lowers one kernel for the given meta-parameters and
//! target. They double as usage examples and as end-to-end fixtures for
//! the reference evaluator.

mod matmul;

pub use matmul::{matmul, MatmulConfig};

use log::debug;

use crate::config::target::TargetConfig;
use crate::constexpr::{is_power_of_two, ConstEnv};
use crate::diagnostic::Diagnostic;
use crate::ir::Kernel;
use crate::lang::KernelBuilder;
use crate::types::Dtype;

/// Built-in kernels by CLI name.
pub const KERNEL_NAMES: [&str; 3] = ["vector-add", "matmul", "atomic-max"];

fn block_size(block: i64) -> Result<i64, Diagnostic> {
    if !is_power_of_two(block) {
        return Err(Diagnostic::value_error(format!(
            "BLOCK_SIZE must be a positive power of two, got {}",
            block
        )));
    }
    Ok(block)
}

/// `z[i] = x[i] + y[i]` for `i < n`, `block` elements per program.
///
/// Parameters: `x_ptr`, `y_ptr`, `z_ptr` (`*dtype`), `n` (`i32`).
pub fn vector_add(block: i64, dtype: Dtype, target: TargetConfig) -> Result<Kernel, Diagnostic> {
    let block = block_size(block)?;
    let mut kb = KernelBuilder::new("vector_add", target);
    let x_ptr = kb.param_ptr("x_ptr", dtype.clone());
    let y_ptr = kb.param_ptr("y_ptr", dtype.clone());
    let z_ptr = kb.param_ptr("z_ptr", dtype);
    let n = kb.param("n", Dtype::I32);

    let pid = kb.program_id(0)?;
    let width = kb.int_const(block, Dtype::I32);
    let start = kb.mul(&pid, &width)?;
    let lanes = kb.arange(0, block)?;
    let offsets = kb.add(&start, &lanes)?;
    let mask = kb.lt(&offsets, &n)?;

    let xp = kb.add(&x_ptr, &offsets)?;
    let yp = kb.add(&y_ptr, &offsets)?;
    let x = kb.load(&xp, Some(&mask), None)?;
    let y = kb.load(&yp, Some(&mask), None)?;
    let z = kb.add(&x, &y)?;
    let zp = kb.add(&z_ptr, &offsets)?;
    kb.store(&zp, &z, Some(&mask))?;
    Ok(kb.finish())
}

/// `old[i] = atomic_max(&cells[i], vals[i])` for `i < n`.
///
/// Parameters: `cells` (`*dtype`), `vals` (`*dtype`), `old` (`*ret`),
/// `n` (`i32`), where `ret` is `i32` for `f32` cells (the decomposed
/// lowering returns the reinterpreted bits) and `dtype` otherwise.
pub fn atomic_max_kernel(dtype: Dtype, block: i64, target: TargetConfig) -> Result<Kernel, Diagnostic> {
    let block = block_size(block)?;
    let ret = if dtype.is_floating() { Dtype::I32 } else { dtype.clone() };
    let mut kb = KernelBuilder::new("atomic_max", target);
    let cells = kb.param_ptr("cells", dtype.clone());
    let vals = kb.param_ptr("vals", dtype);
    let old = kb.param_ptr("old", ret);
    let n = kb.param("n", Dtype::I32);

    let pid = kb.program_id(0)?;
    let width = kb.int_const(block, Dtype::I32);
    let start = kb.mul(&pid, &width)?;
    let lanes = kb.arange(0, block)?;
    let offsets = kb.add(&start, &lanes)?;
    let mask = kb.lt(&offsets, &n)?;

    let vp = kb.add(&vals, &offsets)?;
    let v = kb.load(&vp, Some(&mask), None)?;
    let cp = kb.add(&cells, &offsets)?;
    let prev = kb.atomic_max(&cp, &v, Some(&mask))?;
    let op = kb.add(&old, &offsets)?;
    kb.store(&op, &prev, Some(&mask))?;
    Ok(kb.finish())
}

/// Lower a built-in kernel by CLI name, reading meta-parameters from `env`.
///
/// `vector-add` and `atomic-max` read `BLOCK_SIZE` and `DTYPE`; `matmul`
/// reads the keys documented on [`MatmulConfig::from_env`].
pub fn lower_named(name: &str, env: &ConstEnv, target: TargetConfig) -> Result<Kernel, Diagnostic> {
    let params: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    debug!("lower `{}` [{}] for `{}`", name, params.join(", "), target.name);
    match name {
        "vector-add" => vector_add(env.int("BLOCK_SIZE")?, env.dtype("DTYPE")?, target),
        "atomic-max" => atomic_max_kernel(env.dtype("DTYPE")?, env.int("BLOCK_SIZE")?, target),
        "matmul" => matmul(&MatmulConfig::from_env(env)?, target),
        other => Err(Diagnostic::value_error(format!("unknown kernel '{}'", other))
            .with_help(format!("available kernels: {}", KERNEL_NAMES.join(", ")))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::ErrorKind;
    use crate::ir::{Op, RmwOp};

    #[test]
    fn test_vector_add_shape() {
        let kernel = vector_add(256, Dtype::F32, TargetConfig::cuda()).unwrap();
        assert_eq!(kernel.params.len(), 4);
        let mut stores = 0;
        kernel.walk(&mut |i| {
            if let Op::Store { mask, .. } = &i.op {
                assert!(mask.is_some());
                stores += 1;
            }
        });
        assert_eq!(stores, 1);
    }

    #[test]
    fn test_block_size_checked() {
        let err = vector_add(100, Dtype::F32, TargetConfig::cuda()).unwrap_err();
        assert!(err.is(ErrorKind::Value));
    }

    #[test]
    fn test_atomic_max_kernel_integer_is_direct() {
        let kernel = atomic_max_kernel(Dtype::U32, 64, TargetConfig::cuda()).unwrap();
        let mut ops = Vec::new();
        kernel.walk(&mut |i| {
            if let Op::AtomicRmw { op, .. } = i.op {
                ops.push(op);
            }
        });
        assert_eq!(ops, vec![RmwOp::UMax]);
    }

    #[test]
    fn test_lower_named() {
        let env = ConstEnv::new()
            .with("BLOCK_SIZE", 128i64)
            .with("DTYPE", Dtype::F16);
        assert_eq!(
            lower_named("vector-add", &env, TargetConfig::cuda()).unwrap().name,
            "vector_add"
        );
        let err = lower_named("softmax", &env, TargetConfig::cuda()).unwrap_err();
        assert!(err.help.is_some());
    }
}
