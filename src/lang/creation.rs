//! Creation builtins: ranges, filled blocks and program indices.

use super::{KernelBuilder, Tensor};
use crate::constexpr::{expect_shape, is_power_of_two, Constexpr};
use crate::diagnostic::Diagnostic;
use crate::ir::Op;
use crate::types::{Dtype, TensorType};

fn check_axis(axis: u32) -> Result<(), Diagnostic> {
    if axis > 2 {
        return Err(Diagnostic::value_error(format!(
            "program axis must be 0, 1 or 2, got {}",
            axis
        )));
    }
    Ok(())
}

impl KernelBuilder {
    /// `[start, end)` as an `i32` block. The length must be a power of two.
    pub fn arange(&mut self, start: i64, end: i64) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("arange({}, {})", start, end),
            |kb| {
                if end <= start {
                    return Err(Diagnostic::value_error(format!(
                        "arange end ({}) must be greater than start ({})",
                        end, start
                    )));
                }
                if start < i64::from(i32::MIN) || end > i64::from(i32::MAX) {
                    return Err(Diagnostic::value_error(
                        "arange bounds must fit in i32".to_string(),
                    ));
                }
                let len = end - start;
                if !is_power_of_two(len) {
                    return Err(Diagnostic::value_error(format!(
                        "arange length must be a power of two, got {}",
                        len
                    )));
                }
                let shape = vec![len as u64];
                kb.check_block_shape(&shape)?;
                Ok(kb.emit(
                    Op::MakeRange { start, end },
                    TensorType::block(Dtype::I32, shape),
                ))
            },
        )
    }

    /// Block of `shape` filled with zero of `dtype`.
    pub fn zeros(&mut self, shape: &[Constexpr], dtype: Dtype) -> Result<Tensor, Diagnostic> {
        self.full(shape, Constexpr::Int(0), dtype)
    }

    /// Block of `shape` filled with `value` converted to `dtype`.
    pub fn full(
        &mut self,
        shape: &[Constexpr],
        value: Constexpr,
        dtype: Dtype,
    ) -> Result<Tensor, Diagnostic> {
        let call = || {
            let dims: Vec<String> = shape.iter().map(|c| c.to_string()).collect();
            format!("full([{}], {}, {})", dims.join(", "), value, dtype)
        };
        self.guarded(call, |kb| {
            let shape = expect_shape(shape)?;
            if dtype.is_ptr() || dtype.is_block_ptr() {
                return Err(Diagnostic::type_error(format!(
                    "cannot fill a block with pointer dtype {}",
                    dtype
                )));
            }
            kb.check_block_shape(&shape)?;
            let scalar = match (&value, dtype.is_floating()) {
                (Constexpr::Int(v), true) => kb.float_const(*v as f64, dtype.clone()),
                (Constexpr::Float(x), true) => kb.float_const(*x, dtype.clone()),
                (Constexpr::Int(v), false) if dtype.is_bool() => kb.bool_const(*v != 0),
                (Constexpr::Int(v), false) => kb.int_const(*v, dtype.clone()),
                (Constexpr::Bool(b), _) => {
                    let b = kb.bool_const(*b);
                    kb.cast(&b, dtype.clone())?
                }
                (other, _) => {
                    return Err(Diagnostic::type_error(format!(
                        "cannot fill a {} block with `constexpr[{}]`",
                        dtype,
                        other.kind_name()
                    )))
                }
            };
            Ok(kb.broadcast_unchecked(&scalar, &shape))
        })
    }

    /// Index of this program instance along `axis`.
    pub fn program_id(&mut self, axis: u32) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("program_id({})", axis),
            |kb| {
                check_axis(axis)?;
                Ok(kb.emit(Op::ProgramId(axis), TensorType::scalar(Dtype::I32)))
            },
        )
    }

    /// Number of program instances launched along `axis`.
    pub fn num_programs(&mut self, axis: u32) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("num_programs({})", axis),
            |kb| {
                check_axis(axis)?;
                Ok(kb.emit(Op::NumPrograms(axis), TensorType::scalar(Dtype::I32)))
            },
        )
    }
}
