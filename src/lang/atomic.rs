//! Atomic read-modify-write lowering.
//!
//! Every atomic returns the value held in memory before the update. The
//! opcode is chosen by a match over (operation, element kind, signedness):
//!
//! | op            | signed int | unsigned int | float               |
//! |---------------|------------|--------------|---------------------|
//! | add           | `add`      | `add`        | `fadd`              |
//! | max           | `max`      | `umax`       | `max` + `umin` pair |
//! | min           | `min`      | `umin`       | `min` + `umax` pair |
//! | xchg          | `xchg`     | `xchg`       | `xchg`              |
//! | and, or, xor  | same name  | same name    | rejected            |
//!
//! Float max/min has no hardware primitive here. It reinterprets value and
//! pointer as `i32`: non-negative IEEE floats order like signed integers,
//! negative ones order in reverse as unsigned integers. Each lane issues
//! exactly one of the two RMWs, chosen by the sign of its value.

use log::debug;

use super::memory::{check_mask, check_reaches, pointee};
use super::{KernelBuilder, Tensor};
use crate::diagnostic::Diagnostic;
use crate::ir::{Op, RmwOp};
use crate::types::Dtype;

/// Atomic read-modify-write operations (compare-and-swap is separate).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AtomicOp {
    Xchg,
    Add,
    Max,
    Min,
    And,
    Or,
    Xor,
}

impl AtomicOp {
    pub fn name(self) -> &'static str {
        match self {
            AtomicOp::Xchg => "xchg",
            AtomicOp::Add => "add",
            AtomicOp::Max => "max",
            AtomicOp::Min => "min",
            AtomicOp::And => "and",
            AtomicOp::Or => "or",
            AtomicOp::Xor => "xor",
        }
    }
}

/// Pointer, value and mask after preflight: all share the pointer's shape,
/// the value has the pointee dtype and the mask is boolean.
struct Operands {
    ptr: Tensor,
    val: Tensor,
    mask: Tensor,
}

/// Strategy for one (op, element) pair.
enum Lowering {
    Direct(RmwOp),
    FloatMax,
    FloatMin,
}

fn select_lowering(op: AtomicOp, elem: &Dtype) -> Result<Lowering, Diagnostic> {
    let float = elem.is_floating();
    let signed = elem.is_int_signed();
    let lowering = match (op, float, signed) {
        (AtomicOp::Xchg, _, _) => Lowering::Direct(RmwOp::Xchg),
        (AtomicOp::Add, true, _) => Lowering::Direct(RmwOp::FAdd),
        (AtomicOp::Add, false, _) => Lowering::Direct(RmwOp::Add),
        (AtomicOp::Max, false, true) => Lowering::Direct(RmwOp::Max),
        (AtomicOp::Max, false, false) => Lowering::Direct(RmwOp::UMax),
        (AtomicOp::Min, false, true) => Lowering::Direct(RmwOp::Min),
        (AtomicOp::Min, false, false) => Lowering::Direct(RmwOp::UMin),
        (AtomicOp::Max | AtomicOp::Min, true, _) if elem.primitive_bitwidth() != 32 => {
            return Err(Diagnostic::type_error(format!(
                "atomic_{} on {} is not supported",
                op.name(),
                elem
            ))
            .with_note("float max/min is lowered through 32-bit integer atomics".to_string()));
        }
        (AtomicOp::Max, true, _) => Lowering::FloatMax,
        (AtomicOp::Min, true, _) => Lowering::FloatMin,
        (AtomicOp::And | AtomicOp::Or | AtomicOp::Xor, true, _) => {
            return Err(Diagnostic::type_error(format!(
                "atomic_{} requires an integer element, got {}",
                op.name(),
                elem
            )));
        }
        (AtomicOp::And, false, _) => Lowering::Direct(RmwOp::And),
        (AtomicOp::Or, false, _) => Lowering::Direct(RmwOp::Or),
        (AtomicOp::Xor, false, _) => Lowering::Direct(RmwOp::Xor),
    };
    Ok(lowering)
}

impl KernelBuilder {
    /// Validate, then broadcast and cast the operands of an RMW atomic.
    /// Nothing is emitted unless every check passes.
    fn atomic_preflight(
        &mut self,
        op: AtomicOp,
        ptr: &Tensor,
        val: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<(Operands, Lowering), Diagnostic> {
        let what = format!("atomic_{}", op.name());
        let elem = pointee(&what, ptr)?;

        if elem == Dtype::F16 && op != AtomicOp::Add {
            return Err(Diagnostic::type_error(format!("{} does not support f16", what))
                .with_note("f16 is only supported by atomic_add".to_string()));
        }
        let unsupported = matches!(
            elem,
            Dtype::Int1 | Dtype::I8 | Dtype::U8 | Dtype::I16 | Dtype::U16
        ) || elem.is_reduced_float()
            || elem.is_ptr();
        if unsupported {
            return Err(Diagnostic::type_error(format!("{} does not support {}", what, elem)));
        }
        if val.dtype().is_ptr() || val.dtype().is_block_ptr() {
            return Err(Diagnostic::type_error(format!(
                "{} value must be numeric, got {}",
                what, val.ty
            )));
        }
        check_reaches("value", val.shape(), ptr.shape())?;
        if let Some(m) = mask {
            check_mask(m)?;
            check_reaches("mask", m.shape(), ptr.shape())?;
        }
        let lowering = select_lowering(op, &elem)?;

        let shape = ptr.shape().to_vec();
        let val = self.broadcast_unchecked(val, &shape);
        let val = self.cast(&val, elem)?;
        let mask = match mask {
            Some(m) => self.broadcast_unchecked(m, &shape),
            None => {
                let t = self.bool_const(true);
                self.broadcast_unchecked(&t, &shape)
            }
        };
        let operands = Operands {
            ptr: ptr.clone(),
            val,
            mask,
        };
        Ok((operands, lowering))
    }

    fn emit_rmw(&mut self, op: RmwOp, ptr: &Tensor, val: &Tensor, mask: &Tensor) -> Tensor {
        self.emit(
            Op::AtomicRmw {
                op,
                ptr: ptr.id,
                val: val.id,
                mask: mask.id,
            },
            val.ty.clone(),
        )
    }

    /// Float max/min through a signed RMW for non-negative lanes and the
    /// opposite unsigned RMW for negative lanes.
    fn float_minmax(&mut self, x: Operands, is_max: bool) -> Result<Tensor, Diagnostic> {
        let elem = x.val.dtype().clone();
        let i_val = self.bitcast(&x.val, Dtype::I32)?;
        let i_ptr = self.bitcast(&x.ptr, Dtype::I32.ptr())?;

        let zero = self.float_const(0.0, elem);
        let pos = self.ge(&x.val, &zero)?;
        let neg = self.lt(&x.val, &zero)?;

        let (pos_op, neg_op) = if is_max {
            (RmwOp::Max, RmwOp::UMin)
        } else {
            (RmwOp::Min, RmwOp::UMax)
        };
        let pos_mask = self.and_(&x.mask, &pos)?;
        let pos_ret = self.emit_rmw(pos_op, &i_ptr, &i_val, &pos_mask);
        let neg_mask = self.and_(&x.mask, &neg)?;
        let neg_ret = self.emit_rmw(neg_op, &i_ptr, &i_val, &neg_mask);
        self.where_(&pos, &pos_ret, &neg_ret)
    }

    /// Lower one RMW atomic. See the module docs for the opcode table.
    pub fn atomic_rmw(
        &mut self,
        op: AtomicOp,
        ptr: &Tensor,
        val: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, Diagnostic> {
        let call = || match mask {
            Some(m) => format!("atomic_{}({}, {}, mask={})", op.name(), ptr.ty, val.ty, m.ty),
            None => format!("atomic_{}({}, {})", op.name(), ptr.ty, val.ty),
        };
        self.guarded(call, |kb| {
            let (x, lowering) = kb.atomic_preflight(op, ptr, val, mask)?;
            match lowering {
                Lowering::Direct(rmw) => {
                    debug!("atomic_{} on {} -> {}", op.name(), x.val.ty, rmw.mnemonic());
                    Ok(kb.emit_rmw(rmw, &x.ptr, &x.val, &x.mask))
                }
                Lowering::FloatMax => {
                    debug!("atomic_max on {} -> max/umin pair", x.val.ty);
                    kb.float_minmax(x, true)
                }
                Lowering::FloatMin => {
                    debug!("atomic_min on {} -> min/umax pair", x.val.ty);
                    kb.float_minmax(x, false)
                }
            }
        })
    }

    pub fn atomic_xchg(
        &mut self,
        ptr: &Tensor,
        val: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, Diagnostic> {
        self.atomic_rmw(AtomicOp::Xchg, ptr, val, mask)
    }

    pub fn atomic_add(
        &mut self,
        ptr: &Tensor,
        val: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, Diagnostic> {
        self.atomic_rmw(AtomicOp::Add, ptr, val, mask)
    }

    pub fn atomic_max(
        &mut self,
        ptr: &Tensor,
        val: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, Diagnostic> {
        self.atomic_rmw(AtomicOp::Max, ptr, val, mask)
    }

    pub fn atomic_min(
        &mut self,
        ptr: &Tensor,
        val: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, Diagnostic> {
        self.atomic_rmw(AtomicOp::Min, ptr, val, mask)
    }

    pub fn atomic_and(
        &mut self,
        ptr: &Tensor,
        val: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, Diagnostic> {
        self.atomic_rmw(AtomicOp::And, ptr, val, mask)
    }

    pub fn atomic_or(
        &mut self,
        ptr: &Tensor,
        val: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, Diagnostic> {
        self.atomic_rmw(AtomicOp::Or, ptr, val, mask)
    }

    pub fn atomic_xor(
        &mut self,
        ptr: &Tensor,
        val: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, Diagnostic> {
        self.atomic_rmw(AtomicOp::Xor, ptr, val, mask)
    }

    /// Compare-and-swap: where memory equals `cmp`, write `val`. Returns
    /// the previous contents. Element width must be 16, 32 or 64 bits.
    pub fn atomic_cas(
        &mut self,
        ptr: &Tensor,
        cmp: &Tensor,
        val: &Tensor,
    ) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("atomic_cas({}, {}, {})", ptr.ty, cmp.ty, val.ty),
            |kb| {
                let elem = pointee("atomic_cas", ptr)?;
                if elem.is_ptr() || !matches!(elem.primitive_bitwidth(), 16 | 32 | 64) {
                    return Err(Diagnostic::type_error(format!(
                        "atomic_cas only supports elements with width {{16, 32, 64}}, got {}",
                        elem
                    )));
                }
                for t in [cmp, val] {
                    if t.dtype().is_ptr() || t.dtype().is_block_ptr() {
                        return Err(Diagnostic::type_error(format!(
                            "atomic_cas operands must be numeric, got {}",
                            t.ty
                        )));
                    }
                    check_reaches("operand", t.shape(), ptr.shape())?;
                }
                let cmp = kb.broadcast_unchecked(cmp, ptr.shape());
                let cmp = kb.cast(&cmp, elem.clone())?;
                let val = kb.broadcast_unchecked(val, ptr.shape());
                let val = kb.cast(&val, elem)?;
                Ok(kb.emit(
                    Op::AtomicCas {
                        ptr: ptr.id,
                        cmp: cmp.id,
                        val: val.id,
                    },
                    val.ty.clone(),
                ))
            },
        )
    }
}
