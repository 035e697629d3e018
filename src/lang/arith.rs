//! Elementwise builtins: arithmetic, bitwise, comparison and select.

use super::{KernelBuilder, Tensor};
use crate::diagnostic::Diagnostic;
use crate::ir::{BinOp, CmpPred, Op};
use crate::types::{promote, Dtype};

fn reject_pointers(name: &str, a: &Tensor, b: &Tensor) -> Result<(), Diagnostic> {
    for t in [a, b] {
        if t.dtype().is_ptr() || t.dtype().is_block_ptr() {
            return Err(Diagnostic::type_error(format!(
                "{} is not defined for pointer operand {}",
                name, t.ty
            )));
        }
    }
    Ok(())
}

impl KernelBuilder {
    /// Reconcile and emit one binary instruction.
    fn binary(&mut self, op: BinOp, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        let (a, b) = self.reconcile(a, b)?;
        Ok(self.emit(
            Op::Binary {
                op,
                lhs: a.id,
                rhs: b.id,
            },
            a.ty.clone(),
        ))
    }

    /// `ptr + offset` with an integer offset of any width, either side.
    fn add_ptr(
        &mut self,
        ptr: &Tensor,
        offset: &Tensor,
        negate: bool,
    ) -> Result<Tensor, Diagnostic> {
        if offset.dtype().is_ptr() {
            return Err(Diagnostic::type_error(format!(
                "cannot combine two pointers {} and {}",
                ptr.ty, offset.ty
            )));
        }
        if !offset.dtype().is_int() || offset.dtype().is_bool() {
            return Err(Diagnostic::type_error(format!(
                "pointer offset must be an integer, got {}",
                offset.ty
            ))
            .with_help(format!("cast the offset first, e.g. cast(x, {})", Dtype::I32)));
        }
        let shape = self.reconcile_shapes(ptr.shape(), offset.shape())?;
        let ptr = self.broadcast_unchecked(ptr, &shape);
        let mut offset = self.broadcast_unchecked(offset, &shape);
        if negate {
            let zero = self.int_const(0, offset.dtype().clone());
            let zero = self.broadcast_unchecked(&zero, &shape);
            offset = self.emit(
                Op::Binary {
                    op: BinOp::Sub,
                    lhs: zero.id,
                    rhs: offset.id,
                },
                offset.ty.clone(),
            );
        }
        Ok(self.emit(
            Op::Binary {
                op: BinOp::AddPtr,
                lhs: ptr.id,
                rhs: offset.id,
            },
            ptr.ty.clone(),
        ))
    }

    pub fn add(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("add({}, {})", a.ty, b.ty),
            |kb| {
                if a.dtype().is_block_ptr() || b.dtype().is_block_ptr() {
                    return Err(Diagnostic::type_error(
                        "block pointers move with advance, not add".to_string(),
                    ));
                }
                if a.dtype().is_ptr() {
                    kb.add_ptr(a, b, false)
                } else if b.dtype().is_ptr() {
                    kb.add_ptr(b, a, false)
                } else {
                    kb.binary(BinOp::Add, a, b)
                }
            },
        )
    }

    pub fn sub(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("sub({}, {})", a.ty, b.ty),
            |kb| {
                if a.dtype().is_ptr() && !b.dtype().is_ptr() {
                    return kb.add_ptr(a, b, true);
                }
                reject_pointers("sub", a, b)?;
                kb.binary(BinOp::Sub, a, b)
            },
        )
    }

    pub fn mul(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("mul({}, {})", a.ty, b.ty),
            |kb| {
                reject_pointers("mul", a, b)?;
                kb.binary(BinOp::Mul, a, b)
            },
        )
    }

    /// True division. Integer operands are converted to `f32` first.
    pub fn div(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("div({}, {})", a.ty, b.ty),
            |kb| {
                reject_pointers("div", a, b)?;
                let dtype = promote(a.dtype(), b.dtype())?;
                if dtype.is_int() {
                    let a = kb.cast(a, Dtype::F32)?;
                    let b = kb.cast(b, Dtype::F32)?;
                    kb.binary(BinOp::FDiv, &a, &b)
                } else {
                    kb.binary(BinOp::FDiv, a, b)
                }
            },
        )
    }

    /// Integer division, truncating toward zero.
    pub fn floordiv(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("floordiv({}, {})", a.ty, b.ty),
            |kb| {
                reject_pointers("floordiv", a, b)?;
                if a.dtype().is_floating() || b.dtype().is_floating() {
                    return Err(Diagnostic::type_error(
                        "floordiv requires integer operands".to_string(),
                    )
                    .with_help("use div for floating-point division".to_string()));
                }
                kb.binary(BinOp::Div, a, b)
            },
        )
    }

    pub fn rem(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("rem({}, {})", a.ty, b.ty),
            |kb| {
                reject_pointers("rem", a, b)?;
                kb.binary(BinOp::Rem, a, b)
            },
        )
    }

    fn bitwise(
        &mut self,
        name: &str,
        op: BinOp,
        a: &Tensor,
        b: &Tensor,
    ) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("{}({}, {})", name, a.ty, b.ty),
            |kb| {
                for t in [a, b] {
                    if !t.dtype().is_int() {
                        return Err(Diagnostic::type_error(format!(
                            "{} requires integer operands, got {}",
                            name, t.ty
                        )));
                    }
                }
                kb.binary(op, a, b)
            },
        )
    }

    pub fn and_(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.bitwise("and", BinOp::And, a, b)
    }

    pub fn or_(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.bitwise("or", BinOp::Or, a, b)
    }

    pub fn xor_(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.bitwise("xor", BinOp::Xor, a, b)
    }

    pub fn minimum(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("minimum({}, {})", a.ty, b.ty),
            |kb| {
                reject_pointers("minimum", a, b)?;
                kb.binary(BinOp::Min, a, b)
            },
        )
    }

    pub fn maximum(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("maximum({}, {})", a.ty, b.ty),
            |kb| {
                reject_pointers("maximum", a, b)?;
                kb.binary(BinOp::Max, a, b)
            },
        )
    }

    /// Ceiling division of integers: `(a + b - 1) / b`.
    pub fn cdiv(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("cdiv({}, {})", a.ty, b.ty),
            |kb| {
                let sum = kb.add(a, b)?;
                let one = kb.int_const(1, sum.dtype().clone());
                let sum = kb.sub(&sum, &one)?;
                kb.floordiv(&sum, b)
            },
        )
    }

    // ── Comparison ────────────────────────────────────────────────

    fn compare(&mut self, pred: CmpPred, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("{}({}, {})", pred.mnemonic(), a.ty, b.ty),
            |kb| {
                let (a, b) = kb.reconcile(a, b)?;
                let ty = a.ty.with_elem(Dtype::Int1);
                Ok(kb.emit(
                    Op::Cmp {
                        pred,
                        lhs: a.id,
                        rhs: b.id,
                    },
                    ty,
                ))
            },
        )
    }

    pub fn eq(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.compare(CmpPred::Eq, a, b)
    }

    pub fn ne(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.compare(CmpPred::Ne, a, b)
    }

    pub fn lt(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.compare(CmpPred::Lt, a, b)
    }

    pub fn le(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.compare(CmpPred::Le, a, b)
    }

    pub fn gt(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.compare(CmpPred::Gt, a, b)
    }

    pub fn ge(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor, Diagnostic> {
        self.compare(CmpPred::Ge, a, b)
    }

    /// Elementwise `cond ? x : y`. Integer conditions are tested against 0.
    pub fn where_(
        &mut self,
        cond: &Tensor,
        x: &Tensor,
        y: &Tensor,
    ) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("where({}, {}, {})", cond.ty, x.ty, y.ty),
            |kb| {
                if !cond.dtype().is_int() {
                    return Err(Diagnostic::type_error(format!(
                        "where condition must be boolean, got {}",
                        cond.ty
                    )));
                }
                let dtype = promote(x.dtype(), y.dtype())?;
                let shape = kb.reconcile_shapes(x.shape(), y.shape())?;
                let shape = kb.reconcile_shapes(cond.shape(), &shape)?;

                let cond = if cond.dtype().is_bool() {
                    cond.clone()
                } else {
                    let zero = kb.int_const(0, cond.dtype().clone());
                    kb.ne(cond, &zero)?
                };
                let cond = kb.broadcast_unchecked(&cond, &shape);
                let x = kb.broadcast_unchecked(x, &shape);
                let y = kb.broadcast_unchecked(y, &shape);
                let x = kb.cast(&x, dtype.clone())?;
                let y = kb.cast(&y, dtype)?;
                Ok(kb.emit(
                    Op::Select {
                        cond: cond.id,
                        lhs: x.id,
                        rhs: y.id,
                    },
                    x.ty.clone(),
                ))
            },
        )
    }
}
