use super::{KernelBuilder, Tensor};
use crate::diagnostic::Diagnostic;
use crate::ir::Op;
use crate::types::TensorType;

impl KernelBuilder {
    /// Insert a size-1 dimension at `axis`; negative axes count from the end
    /// of the result shape.
    pub fn expand_dims(&mut self, x: &Tensor, axis: i64) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("expand_dims({}, {})", x.ty, axis),
            |kb| {
                let rank = x.rank() as i64;
                let norm = if axis < 0 { axis + rank + 1 } else { axis };
                if !(0..=rank).contains(&norm) {
                    return Err(Diagnostic::value_error(format!(
                        "axis {} is out of range for a result of rank {}",
                        axis,
                        rank + 1
                    )));
                }
                if !x.is_block() {
                    let ty = TensorType::block(x.dtype().clone(), vec![1]);
                    return Ok(kb.emit(Op::Splat(x.id), ty));
                }
                let mut shape = x.shape().to_vec();
                shape.insert(norm as usize, 1);
                Ok(kb.emit(
                    Op::ExpandDims {
                        src: x.id,
                        axis: norm as u32,
                    },
                    x.ty.with_shape(shape),
                ))
            },
        )
    }

    /// Transpose a 2-D block.
    pub fn trans(&mut self, x: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("trans({})", x.ty),
            |kb| {
                if x.rank() != 2 {
                    return Err(Diagnostic::value_error(format!(
                        "trans expects a 2-D block, got {}",
                        x.ty
                    )));
                }
                let shape = vec![x.shape()[1], x.shape()[0]];
                Ok(kb.emit(Op::Trans(x.id), x.ty.with_shape(shape)))
            },
        )
    }

    /// Concatenate two 1-D blocks of the same dtype.
    pub fn cat(&mut self, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("cat({}, {})", lhs.ty, rhs.ty),
            |kb| {
                if lhs.rank() != 1 || rhs.rank() != 1 {
                    return Err(Diagnostic::value_error(format!(
                        "cat expects 1-D blocks, got {} and {}",
                        lhs.ty, rhs.ty
                    )));
                }
                if lhs.dtype() != rhs.dtype() {
                    return Err(Diagnostic::type_error(format!(
                        "cat operands must share a dtype, got {} and {}",
                        lhs.dtype(),
                        rhs.dtype()
                    )));
                }
                let shape = vec![lhs.shape()[0] + rhs.shape()[0]];
                kb.check_block_shape(&shape)?;
                Ok(kb.emit(
                    Op::Cat {
                        lhs: lhs.id,
                        rhs: rhs.id,
                    },
                    lhs.ty.with_shape(shape),
                ))
            },
        )
    }
}
