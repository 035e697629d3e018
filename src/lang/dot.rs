//! Matrix product and axis reductions.

use super::{KernelBuilder, Tensor};
use crate::diagnostic::Diagnostic;
use crate::ir::{Op, ReduceKind};
use crate::types::{Dtype, TensorType};

/// Smallest extent of any `dot` operand dimension.
pub const MIN_DOT_DIM: u64 = 16;

/// Accumulator dtype for `dot` inputs of dtype `input`.
fn dot_result(input: &Dtype) -> Option<Dtype> {
    match input {
        Dtype::I8 => Some(Dtype::I32),
        Dtype::F16 | Dtype::BF16 | Dtype::F32 => Some(Dtype::F32),
        d if d.is_fp8() => Some(Dtype::F32),
        _ => None,
    }
}

impl KernelBuilder {
    /// `a @ b (+ acc)`. `a` is `[M, K]`, `b` is `[K, N]`; the result is
    /// `[M, N]` in `f32` for float inputs and `i32` for `i8`.
    pub fn dot(
        &mut self,
        a: &Tensor,
        b: &Tensor,
        acc: Option<&Tensor>,
    ) -> Result<Tensor, Diagnostic> {
        let call = || match acc {
            Some(c) => format!("dot({}, {}, acc={})", a.ty, b.ty, c.ty),
            None => format!("dot({}, {})", a.ty, b.ty),
        };
        self.guarded(call, |kb| {
            if a.rank() != 2 || b.rank() != 2 {
                return Err(Diagnostic::value_error(format!(
                    "dot expects 2-D operands, got {} and {}",
                    a.ty, b.ty
                )));
            }
            let (m, k) = (a.shape()[0], a.shape()[1]);
            let (k2, n) = (b.shape()[0], b.shape()[1]);
            if k != k2 {
                return Err(Diagnostic::shape_error(format!(
                    "dot contraction dimensions differ: {} has K={}, {} has K={}",
                    a.ty, k, b.ty, k2
                )));
            }
            if [m, k, n].iter().any(|&d| d < MIN_DOT_DIM) {
                return Err(Diagnostic::value_error(format!(
                    "all dot dimensions must be >= {}, got M={}, N={}, K={}",
                    MIN_DOT_DIM, m, n, k
                )));
            }
            if a.dtype() != b.dtype() {
                return Err(Diagnostic::type_error(format!(
                    "dot operands must share a dtype, got {} and {}",
                    a.dtype(),
                    b.dtype()
                )));
            }
            let ret = dot_result(a.dtype()).ok_or_else(|| {
                Diagnostic::type_error(format!("dot does not support {} operands", a.dtype()))
            })?;
            if a.dtype().is_fp8() && !kb.target().fp8 {
                return Err(Diagnostic::type_error(format!(
                    "target `{}` has no fp8 dot support",
                    kb.target().name
                ))
                .with_help("enable `fp8` under [features] in the target config".to_string()));
            }
            let ty = TensorType::block(ret, vec![m, n]);
            if let Some(c) = acc {
                if c.ty != ty {
                    return Err(Diagnostic::type_error(format!(
                        "dot accumulator must be {}, got {}",
                        ty, c.ty
                    )));
                }
            }
            kb.check_block_shape(&ty.shape)?;
            Ok(kb.emit(
                Op::Dot {
                    a: a.id,
                    b: b.id,
                    acc: acc.map(|c| c.id),
                },
                ty,
            ))
        })
    }

    fn reduce(&mut self, kind: ReduceKind, x: &Tensor, axis: u32) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("{}({}, axis={})", kind.mnemonic(), x.ty, axis),
            |kb| {
                if axis as usize >= x.rank() {
                    return Err(Diagnostic::value_error(format!(
                        "reduction axis {} is out of range for {}",
                        axis, x.ty
                    )));
                }
                if x.dtype().is_ptr() || x.dtype().is_block_ptr() {
                    return Err(Diagnostic::type_error(format!(
                        "cannot reduce pointer block {}",
                        x.ty
                    )));
                }
                let src = if x.dtype().is_bool() {
                    kb.cast(x, Dtype::I32)?
                } else {
                    x.clone()
                };
                let mut shape = src.shape().to_vec();
                shape.remove(axis as usize);
                Ok(kb.emit(
                    Op::Reduce {
                        kind,
                        src: src.id,
                        axis,
                    },
                    src.ty.with_shape(shape),
                ))
            },
        )
    }

    /// Sum along `axis`. Booleans are counted as `i32`.
    pub fn sum(&mut self, x: &Tensor, axis: u32) -> Result<Tensor, Diagnostic> {
        self.reduce(ReduceKind::Sum, x, axis)
    }

    pub fn max(&mut self, x: &Tensor, axis: u32) -> Result<Tensor, Diagnostic> {
        self.reduce(ReduceKind::Max, x, axis)
    }

    pub fn min(&mut self, x: &Tensor, axis: u32) -> Result<Tensor, Diagnostic> {
        self.reduce(ReduceKind::Min, x, axis)
    }
}
