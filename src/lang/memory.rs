//! Pointer-tensor loads and stores.

use super::{KernelBuilder, Tensor};
use crate::diagnostic::Diagnostic;
use crate::ir::Op;
use crate::types::{broadcast_shapes, join_dims, Dtype};

/// Pointee of a raw pointer tensor, or a TypeError naming `what`.
pub(crate) fn pointee(what: &str, ptr: &Tensor) -> Result<Dtype, Diagnostic> {
    match ptr.dtype() {
        Dtype::Ptr(elem, _) => Ok((**elem).clone()),
        Dtype::BlockPtr(..) => Err(Diagnostic::type_error(format!(
            "{} expects a pointer tensor, got block pointer {}",
            what, ptr.ty
        ))
        .with_help("use load_block/store_block for block pointers".to_string())),
        _ => Err(Diagnostic::type_error(format!(
            "{} expects a pointer, got {}",
            what, ptr.ty
        ))),
    }
}

pub(crate) fn check_mask(mask: &Tensor) -> Result<(), Diagnostic> {
    if !mask.dtype().is_bool() {
        return Err(Diagnostic::type_error(format!(
            "mask must be boolean, got {}",
            mask.ty
        )));
    }
    Ok(())
}

/// One-sided broadcast check: `from` must reach exactly `to`.
pub(crate) fn check_reaches(what: &str, from: &[u64], to: &[u64]) -> Result<(), Diagnostic> {
    let shape = broadcast_shapes(from, to)?;
    if shape != to {
        return Err(Diagnostic::shape_error(format!(
            "{} of shape [{}] does not broadcast to [{}]",
            what,
            join_dims(from),
            join_dims(to)
        )));
    }
    Ok(())
}

impl KernelBuilder {
    /// Gather through `ptr`. Lanes where `mask` is false read `other`, or an
    /// undefined value when `other` is absent.
    pub fn load(
        &mut self,
        ptr: &Tensor,
        mask: Option<&Tensor>,
        other: Option<&Tensor>,
    ) -> Result<Tensor, Diagnostic> {
        let call = || {
            let mut s = format!("load({}", ptr.ty);
            if let Some(m) = mask {
                s.push_str(&format!(", mask={}", m.ty));
            }
            if let Some(o) = other {
                s.push_str(&format!(", other={}", o.ty));
            }
            s.push(')');
            s
        };
        self.guarded(call, |kb| {
            let elem = pointee("load", ptr)?;
            if other.is_some() && mask.is_none() {
                return Err(Diagnostic::value_error(
                    "`other` cannot be provided without `mask`".to_string(),
                )
                .with_help("pass a mask selecting the lanes that read `other`".to_string()));
            }
            let shape = match mask {
                Some(m) => {
                    check_mask(m)?;
                    kb.reconcile_shapes(ptr.shape(), m.shape())?
                }
                None => ptr.shape().to_vec(),
            };
            if let Some(o) = other {
                check_reaches("other", o.shape(), &shape)?;
                if o.dtype().is_ptr() != elem.is_ptr() {
                    return Err(Diagnostic::type_error(format!(
                        "other {} does not match pointee {}",
                        o.ty, elem
                    )));
                }
            }

            let ptr = kb.broadcast_unchecked(ptr, &shape);
            let mask = mask.map(|m| kb.broadcast_unchecked(m, &shape));
            let other = match other {
                Some(o) => {
                    let o = kb.broadcast_unchecked(o, &shape);
                    Some(kb.cast(&o, elem.clone())?)
                }
                None => None,
            };
            Ok(kb.emit(
                Op::Load {
                    ptr: ptr.id,
                    mask: mask.map(|m| m.id),
                    other: other.map(|o| o.id),
                },
                ptr.ty.with_elem(elem),
            ))
        })
    }

    /// Scatter `value` through `ptr`; lanes where `mask` is false are not
    /// written.
    pub fn store(
        &mut self,
        ptr: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<(), Diagnostic> {
        let call = || match mask {
            Some(m) => format!("store({}, {}, mask={})", ptr.ty, value.ty, m.ty),
            None => format!("store({}, {})", ptr.ty, value.ty),
        };
        self.guarded(call, |kb| {
            let elem = pointee("store", ptr)?;
            check_reaches("value", value.shape(), ptr.shape())?;
            if value.dtype().is_ptr() != elem.is_ptr() || value.dtype().is_block_ptr() {
                return Err(Diagnostic::type_error(format!(
                    "cannot store {} through {}",
                    value.ty, ptr.ty
                )));
            }
            if let Some(m) = mask {
                check_mask(m)?;
                check_reaches("mask", m.shape(), ptr.shape())?;
            }

            let value = kb.broadcast_unchecked(value, ptr.shape());
            let value = kb.cast(&value, elem)?;
            let mask = mask.map(|m| kb.broadcast_unchecked(m, ptr.shape()));
            kb.b.emit_effect(Op::Store {
                ptr: ptr.id,
                value: value.id,
                mask: mask.map(|m| m.id),
            });
            Ok(())
        })
    }
}
