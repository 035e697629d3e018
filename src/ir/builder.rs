//! Instruction recorder with constant folding of integer shape arithmetic.
//!
//! The builder owns every value of the kernel under construction. Builtins
//! call `emit` after validation; a failed builtin restores a `Checkpoint`
//! so the instruction list is left exactly as it was before the call.

use std::collections::HashMap;

use log::trace;

use super::{BinOp, Instr, Literal, Op, ValueId};
use crate::types::{Dtype, TensorType};

/// Snapshot of builder state taken before a builtin emits.
#[derive(Clone, Copy, Debug)]
pub struct Checkpoint {
    depth: usize,
    len: usize,
    values: usize,
}

#[derive(Debug)]
pub struct Builder {
    /// Insertion regions: the kernel body, then one per open loop body.
    regions: Vec<Vec<Instr>>,
    types: Vec<TensorType>,
    /// Known scalar constants (after folding).
    consts: HashMap<ValueId, Literal>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            regions: vec![Vec::new()],
            types: Vec::new(),
            consts: HashMap::new(),
        }
    }

    pub fn type_of(&self, v: ValueId) -> &TensorType {
        &self.types[v.index()]
    }

    /// Compile-time value of a scalar, if known.
    pub fn constant(&self, v: ValueId) -> Option<Literal> {
        self.consts.get(&v).copied()
    }

    pub fn const_int_value(&self, v: ValueId) -> Option<i64> {
        match self.consts.get(&v) {
            Some(Literal::Int(i)) => Some(*i),
            Some(Literal::Bool(b)) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Allocate a value without an instruction (loop induction variables
    /// and loop-carried arguments).
    pub fn new_value(&mut self, ty: TensorType) -> ValueId {
        let id = ValueId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    fn current(&mut self) -> &mut Vec<Instr> {
        // The kernel-body region is never popped.
        let last = self.regions.len() - 1;
        &mut self.regions[last]
    }

    /// Emit an op that defines a value of type `ty`.
    pub fn emit(&mut self, op: Op, ty: TensorType) -> ValueId {
        if let Some(folded) = self.fold(&op, &ty) {
            return self.emit_const(folded, ty);
        }
        let id = self.new_value(ty);
        trace!("emit {} = {:?}", id, op);
        self.current().push(Instr {
            result: Some(id),
            op,
        });
        id
    }

    /// Emit an op with no result (stores, loops).
    pub fn emit_effect(&mut self, op: Op) {
        trace!("emit {:?}", op);
        self.current().push(Instr { result: None, op });
    }

    fn emit_const(&mut self, lit: Literal, ty: TensorType) -> ValueId {
        let scalar = !ty.is_block();
        let id = self.new_value(ty);
        self.current().push(Instr {
            result: Some(id),
            op: Op::Const(lit),
        });
        if scalar {
            self.consts.insert(id, lit);
        }
        id
    }

    pub fn const_int(&mut self, value: i64, dtype: Dtype) -> ValueId {
        let value = dtype.wrap_int(i128::from(value));
        self.emit_const(Literal::Int(value), TensorType::scalar(dtype))
    }

    pub fn const_float(&mut self, value: f64, dtype: Dtype) -> ValueId {
        self.emit_const(Literal::Float(value), TensorType::scalar(dtype))
    }

    pub fn const_bool(&mut self, value: bool) -> ValueId {
        self.emit_const(Literal::Bool(value), TensorType::scalar(Dtype::Int1))
    }

    /// Fold integer arithmetic and integer casts over known scalar constants.
    fn fold(&self, op: &Op, ty: &TensorType) -> Option<Literal> {
        if ty.is_block() || !ty.elem.is_int() || ty.elem.is_bool() {
            return None;
        }
        match op {
            Op::Binary { op, lhs, rhs } => {
                let a = i128::from(self.const_int_value(*lhs)?);
                let b = i128::from(self.const_int_value(*rhs)?);
                let signed = ty.elem.is_int_signed();
                let v = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div if b != 0 && signed => a / b,
                    BinOp::Rem if b != 0 && signed => a % b,
                    BinOp::Min if signed => a.min(b),
                    BinOp::Max if signed => a.max(b),
                    BinOp::And => a & b,
                    BinOp::Or => a | b,
                    BinOp::Xor => a ^ b,
                    _ => return None,
                };
                Some(Literal::Int(ty.elem.wrap_int(v)))
            }
            Op::Cast(src) => {
                let src_ty = self.type_of(*src);
                if !src_ty.elem.is_int() || src_ty.is_block() {
                    return None;
                }
                let v = self.const_int_value(*src)?;
                // Unsigned sources zero-extend from their own width.
                let widened = if src_ty.elem.is_int_unsigned() && src_ty.elem.primitive_bitwidth() < 64
                {
                    i128::from(v) & ((1i128 << src_ty.elem.primitive_bitwidth()) - 1)
                } else {
                    i128::from(v)
                };
                Some(Literal::Int(ty.elem.wrap_int(widened)))
            }
            _ => None,
        }
    }

    // ── Regions ───────────────────────────────────────────────────

    /// Open a nested region; instructions go there until `pop_region`.
    pub fn push_region(&mut self) {
        self.regions.push(Vec::new());
    }

    pub fn pop_region(&mut self) -> Vec<Instr> {
        debug_assert!(self.regions.len() > 1, "kernel body region popped");
        self.regions.pop().unwrap_or_default()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            depth: self.regions.len(),
            len: self.regions.last().map_or(0, |r| r.len()),
            values: self.types.len(),
        }
    }

    /// Drop everything emitted since `cp`, including regions opened since.
    pub fn rollback(&mut self, cp: Checkpoint) {
        self.regions.truncate(cp.depth);
        self.current().truncate(cp.len);
        self.types.truncate(cp.values);
        self.consts.retain(|id, _| id.index() < cp.values);
    }

    /// Instructions emitted so far in the current region.
    pub fn current_len(&self) -> usize {
        self.regions.last().map_or(0, |r| r.len())
    }

    pub fn finish(mut self) -> (Vec<Instr>, Vec<TensorType>) {
        self.regions.truncate(1);
        let body = self.regions.pop().unwrap_or_default();
        (body, self.types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_integer_arithmetic() {
        let mut b = Builder::new();
        let x = b.const_int(16, Dtype::I32);
        let y = b.const_int(3, Dtype::I32);
        let z = b.emit(
            Op::Binary {
                op: BinOp::Mul,
                lhs: x,
                rhs: y,
            },
            TensorType::scalar(Dtype::I32),
        );
        assert_eq!(b.const_int_value(z), Some(48));
        let (body, _) = b.finish();
        assert!(body.iter().all(|i| matches!(i.op, Op::Const(_))));
    }

    #[test]
    fn test_fold_wraps_to_width() {
        let mut b = Builder::new();
        let x = b.const_int(i64::from(i32::MAX), Dtype::I32);
        let one = b.const_int(1, Dtype::I32);
        let z = b.emit(
            Op::Binary {
                op: BinOp::Add,
                lhs: x,
                rhs: one,
            },
            TensorType::scalar(Dtype::I32),
        );
        assert_eq!(b.const_int_value(z), Some(i64::from(i32::MIN)));
    }

    #[test]
    fn test_fold_cast() {
        let mut b = Builder::new();
        let x = b.const_int(-1, Dtype::I32);
        let y = b.emit(Op::Cast(x), TensorType::scalar(Dtype::I64));
        assert_eq!(b.const_int_value(y), Some(-1));
        let u = b.const_int(-1, Dtype::U8);
        let w = b.emit(Op::Cast(u), TensorType::scalar(Dtype::I32));
        assert_eq!(b.const_int_value(w), Some(255));
    }

    #[test]
    fn test_no_fold_for_blocks_or_unknowns() {
        let mut b = Builder::new();
        let pid = b.emit(Op::ProgramId(0), TensorType::scalar(Dtype::I32));
        let four = b.const_int(4, Dtype::I32);
        let z = b.emit(
            Op::Binary {
                op: BinOp::Mul,
                lhs: pid,
                rhs: four,
            },
            TensorType::scalar(Dtype::I32),
        );
        assert_eq!(b.const_int_value(z), None);
        let splat = b.emit(Op::Splat(four), TensorType::block(Dtype::I32, vec![8]));
        assert_eq!(b.const_int_value(splat), None);
    }

    #[test]
    fn test_rollback_restores_state() {
        let mut b = Builder::new();
        b.const_int(1, Dtype::I32);
        let cp = b.checkpoint();
        let v = b.const_int(2, Dtype::I32);
        b.push_region();
        b.const_int(3, Dtype::I32);
        b.rollback(cp);
        assert_eq!(b.current_len(), 1);
        assert_eq!(b.constant(v), None);
        let (body, types) = b.finish();
        assert_eq!(body.len(), 1);
        assert_eq!(types.len(), 1);
    }
}
