//! The builtin surface kernels are written against.
//!
//! `KernelBuilder` is the per-kernel construction context: it owns the IR
//! builder, hands out parameter tensors, and exposes every builtin as a
//! method returning `Result<_, Diagnostic>`. Builtins are grouped by
//! concern across the submodules, each adding an `impl KernelBuilder`.
//!
//! Every builtin validates its arguments before emitting anything, and runs
//! under `guarded`, which rolls the builder back if any step fails. A
//! failed call therefore never leaves partial IR behind.

mod arith;
mod atomic;
pub mod block_ptr;
mod broadcast;
mod control;
mod creation;
mod dot;
mod memory;
mod shape;
pub mod tensor;
#[cfg(test)]
mod tests;

pub use atomic::AtomicOp;
pub use block_ptr::BlockPointer;
pub use dot::MIN_DOT_DIM;
pub use tensor::{Operand, Tensor};

use log::debug;

use crate::config::target::TargetConfig;
use crate::diagnostic::Diagnostic;
use crate::ir::builder::Builder;
use crate::ir::{Kernel, Literal, Op, Param};
use crate::types::{join_dims, Dtype, TensorType};

/// Construction context for one kernel. Not shared across compilations.
pub struct KernelBuilder {
    name: String,
    params: Vec<Param>,
    pub(crate) b: Builder,
    target: TargetConfig,
}

impl KernelBuilder {
    pub fn new(name: &str, target: TargetConfig) -> Self {
        debug!("begin kernel `{}` for target `{}`", name, target.name);
        Self {
            name: name.to_string(),
            params: Vec::new(),
            b: Builder::new(),
            target,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    // ── Parameters ────────────────────────────────────────────────

    /// Declare a scalar kernel parameter (raw pointer or scalar).
    pub fn param(&mut self, name: &str, dtype: Dtype) -> Tensor {
        let ty = TensorType::scalar(dtype);
        let index = self.params.len() as u32;
        self.params.push(Param {
            name: name.to_string(),
            ty: ty.clone(),
        });
        let id = self.b.emit(Op::Param(index), ty.clone());
        Tensor::new(id, ty)
    }

    /// Declare a global-memory pointer parameter to `elem`.
    pub fn param_ptr(&mut self, name: &str, elem: Dtype) -> Tensor {
        self.param(name, elem.ptr())
    }

    // ── Constants ─────────────────────────────────────────────────

    /// Compile-time value of a scalar tensor, if it folded to a constant.
    pub fn const_value(&self, t: &Tensor) -> Option<Literal> {
        self.b.constant(t.id)
    }

    pub fn const_int_value(&self, t: &Tensor) -> Option<i64> {
        self.b.const_int_value(t.id)
    }

    /// Scalar integer constant of the given integer dtype.
    pub fn int_const(&mut self, value: i64, dtype: Dtype) -> Tensor {
        let id = self.b.const_int(value, dtype.clone());
        Tensor::new(id, TensorType::scalar(dtype))
    }

    /// Scalar floating-point constant of the given float dtype.
    pub fn float_const(&mut self, value: f64, dtype: Dtype) -> Tensor {
        let id = self.b.const_float(value, dtype.clone());
        Tensor::new(id, TensorType::scalar(dtype))
    }

    pub fn bool_const(&mut self, value: bool) -> Tensor {
        let id = self.b.const_bool(value);
        Tensor::new(id, TensorType::scalar(Dtype::Int1))
    }

    /// Materialize an integer operand as a scalar of `dtype`.
    pub(crate) fn operand(&mut self, op: &Operand, dtype: &Dtype) -> Result<Tensor, Diagnostic> {
        match op {
            Operand::Const(v) => Ok(self.int_const(*v, dtype.clone())),
            Operand::Value(t) => {
                if t.is_block() || !t.dtype().is_int() {
                    return Err(Diagnostic::type_error(format!(
                        "expected a scalar integer, got {}",
                        t.ty
                    )));
                }
                self.cast(t, dtype.clone())
            }
        }
    }

    // ── Plumbing ──────────────────────────────────────────────────

    pub(crate) fn emit(&mut self, op: Op, ty: TensorType) -> Tensor {
        let id = self.b.emit(op, ty.clone());
        Tensor::new(id, ty)
    }

    /// Run a builtin body; on error, roll back everything it emitted and
    /// tag the diagnostic with the rendered call.
    pub(crate) fn guarded<T>(
        &mut self,
        call: impl FnOnce() -> String,
        f: impl FnOnce(&mut Self) -> Result<T, Diagnostic>,
    ) -> Result<T, Diagnostic> {
        let cp = self.b.checkpoint();
        match f(self) {
            Ok(v) => Ok(v),
            Err(e) => {
                self.b.rollback(cp);
                let e = e.at_call(call());
                debug!("kernel `{}`: {}", self.name, e);
                Err(e)
            }
        }
    }

    /// Reject block shapes whose element count exceeds the target limit.
    pub(crate) fn check_block_shape(&self, shape: &[u64]) -> Result<(), Diagnostic> {
        let numel = shape
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d));
        match numel {
            Some(n) if n <= self.target.max_tensor_numel => Ok(()),
            Some(n) => Err(Diagnostic::value_error(format!(
                "block [{}] has {} elements, exceeding the limit of {}",
                join_dims(shape),
                n,
                self.target.max_tensor_numel
            ))),
            None => Err(Diagnostic::value_error(format!(
                "block [{}] element count overflows, exceeding the limit of {}",
                join_dims(shape),
                self.target.max_tensor_numel
            ))),
        }
    }

    /// Instructions emitted so far at the current nesting level.
    pub fn emitted(&self) -> usize {
        self.b.current_len()
    }

    pub fn finish(self) -> Kernel {
        let (body, types) = self.b.finish();
        let kernel = Kernel {
            name: self.name,
            params: self.params,
            body,
            types,
        };
        debug!(
            "finished kernel `{}`: {} instructions",
            kernel.name,
            kernel.instr_count()
        );
        kernel
    }
}
