//! Block pointers: strided N-dimensional windows over a global tensor.
//!
//! A block pointer describes the tile one program instance reads or
//! writes: the base address, the full tensor's shape and strides, the
//! current per-dimension offsets, the tile's block shape, and an `order`
//! hint (dimensions from fastest- to slowest-varying in memory).
//!
//! Transposed access needs no data movement. Swap the shape and stride
//! arguments and reverse `order`; the same loads then read the transpose.
//!
//! `advance` is functional: it returns a new `BlockPointer` and leaves its
//! input unchanged.

use super::tensor::describe_operands;
use super::{KernelBuilder, Operand, Tensor};
use crate::constexpr::{expect_ints, expect_shape, is_power_of_two, Constexpr};
use crate::diagnostic::Diagnostic;
use crate::ir::{Op, Padding, ValueId};
use crate::types::{join_dims, Dtype, TensorType};

/// A typed handle to a block-pointer value plus its static description.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockPointer {
    handle: Tensor,
    block_shape: Vec<u64>,
    order: Vec<u32>,
    /// Offsets, when every one of them folded to a constant.
    offsets: Option<Vec<i64>>,
}

impl BlockPointer {
    pub fn tensor(&self) -> &Tensor {
        &self.handle
    }

    pub fn id(&self) -> ValueId {
        self.handle.id
    }

    pub fn block_shape(&self) -> &[u64] {
        &self.block_shape
    }

    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn rank(&self) -> usize {
        self.block_shape.len()
    }

    /// Element dtype of the underlying tensor.
    pub fn elem(&self) -> &Dtype {
        match self.handle.dtype() {
            Dtype::BlockPtr(elem, _) => &**elem,
            other => other,
        }
    }

    /// Compile-time offsets, if known.
    pub fn offsets(&self) -> Option<&[i64]> {
        self.offsets.as_deref()
    }

    /// The same window bound to another value of identical type, such as a
    /// loop-carried argument. Its offsets are only known at run time.
    pub fn rebind(&self, handle: Tensor) -> Result<BlockPointer, Diagnostic> {
        if handle.ty != self.handle.ty {
            return Err(Diagnostic::type_error(format!(
                "cannot rebind block pointer {} to a value of type {}",
                self.handle.ty, handle.ty
            )));
        }
        Ok(BlockPointer {
            handle,
            block_shape: self.block_shape.clone(),
            order: self.order.clone(),
            offsets: None,
        })
    }
}

/// Scalar integer check for shape/stride/offset operands.
fn check_operands(what: &str, ops: &[Operand]) -> Result<(), Diagnostic> {
    for (i, op) in ops.iter().enumerate() {
        if let Operand::Value(t) = op {
            if t.is_block() || !t.dtype().is_int() || t.dtype().is_bool() {
                return Err(Diagnostic::type_error(format!(
                    "{} element {} must be a scalar integer, got {}",
                    what, i, t.ty
                )));
            }
        }
    }
    Ok(())
}

/// Validate a boundary-check dimension list against `rank`.
fn check_boundary_dims(dims: &[u32], rank: usize) -> Result<(), Diagnostic> {
    for (i, &d) in dims.iter().enumerate() {
        if d as usize >= rank {
            return Err(Diagnostic::value_error(format!(
                "boundary_check dimension {} is out of range for rank {}",
                d, rank
            )));
        }
        if dims[..i].contains(&d) {
            return Err(Diagnostic::value_error(format!(
                "boundary_check lists dimension {} twice",
                d
            )));
        }
    }
    Ok(())
}

/// Offsets live in `i32` in the IR; folded values wrap the same way.
fn wrap_offset(v: i128) -> i64 {
    Dtype::I32.wrap_int(v)
}

fn format_dims(dims: &[u32]) -> String {
    let dims: Vec<u64> = dims.iter().map(|&d| u64::from(d)).collect();
    join_dims(&dims)
}

impl KernelBuilder {
    /// Compile-time value of an integer operand, if it has one.
    fn fold_operand(&self, op: &Operand) -> Option<i64> {
        match op {
            Operand::Const(v) => Some(*v),
            Operand::Value(t) => self.const_int_value(t),
        }
    }

    fn fold_operands(&self, ops: &[Operand]) -> Option<Vec<i64>> {
        ops.iter().map(|o| self.fold_operand(o)).collect()
    }

    fn materialize(&mut self, ops: &[Operand], dtype: Dtype) -> Result<Vec<ValueId>, Diagnostic> {
        ops.iter()
            .map(|o| self.operand(o, &dtype).map(|t| t.id))
            .collect()
    }

    /// Describe a `block_shape` tile of the tensor at `base`.
    ///
    /// `shape`, `strides` and `offsets` need one entry per dimension;
    /// `block_shape` entries must be powers of two; `order` must be a
    /// permutation of the dimensions.
    pub fn make_block_ptr(
        &mut self,
        base: &Tensor,
        shape: &[Operand],
        strides: &[Operand],
        offsets: &[Operand],
        block_shape: &[Constexpr],
        order: &[Constexpr],
    ) -> Result<BlockPointer, Diagnostic> {
        let call = || {
            let list = |c: &[Constexpr]| {
                c.iter()
                    .map(|x| x.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            format!(
                "make_block_ptr({}, shape=[{}], strides=[{}], offsets=[{}], block_shape=[{}], order=[{}])",
                base.ty,
                describe_operands(shape),
                describe_operands(strides),
                describe_operands(offsets),
                list(block_shape),
                list(order)
            )
        };
        self.guarded(call, |kb| {
            let elem = match base.dtype() {
                Dtype::Ptr(elem, _) if !base.is_block() => (**elem).clone(),
                _ => {
                    return Err(Diagnostic::type_error(format!(
                        "make_block_ptr expects a scalar pointer base, got {}",
                        base.ty
                    )))
                }
            };

            let rank = shape.len();
            let ranks = [strides.len(), offsets.len(), block_shape.len(), order.len()];
            if ranks.iter().any(|&r| r != rank) {
                return Err(Diagnostic::shape_error(format!(
                    "make_block_ptr arguments disagree in rank: shape {}, strides {}, offsets {}, block_shape {}, order {}",
                    rank, ranks[0], ranks[1], ranks[2], ranks[3]
                )));
            }
            if rank == 0 {
                return Err(Diagnostic::value_error(
                    "make_block_ptr needs at least one dimension".to_string(),
                ));
            }
            check_operands("shape", shape)?;
            check_operands("strides", strides)?;
            check_operands("offsets", offsets)?;

            let block = expect_shape(block_shape)?;
            for (i, &d) in block.iter().enumerate() {
                if !is_power_of_two(d as i64) {
                    return Err(Diagnostic::value_error(format!(
                        "block_shape element {} must be a positive power of two, got {}",
                        i, d
                    )));
                }
            }
            kb.check_block_shape(&block)?;

            let order = expect_ints(order, "order element")?;
            let mut seen = vec![false; rank];
            for &o in &order {
                let ok = (0..rank as i64).contains(&o) && !seen[o as usize];
                if !ok {
                    return Err(Diagnostic::value_error(format!(
                        "order [{}] is not a permutation of 0..{}",
                        order
                            .iter()
                            .map(|o| o.to_string())
                            .collect::<Vec<_>>()
                            .join(", "),
                        rank
                    )));
                }
                seen[o as usize] = true;
            }
            let order: Vec<u32> = order.into_iter().map(|o| o as u32).collect();

            let folded = kb
                .fold_operands(offsets)
                .map(|v| v.into_iter().map(|o| wrap_offset(i128::from(o))).collect());
            let shape_ids = kb.materialize(shape, Dtype::I64)?;
            let stride_ids = kb.materialize(strides, Dtype::I64)?;
            let offset_ids = kb.materialize(offsets, Dtype::I32)?;
            let ty = TensorType::scalar(Dtype::BlockPtr(Box::new(elem), block.clone()));
            let handle = kb.emit(
                Op::MakeBlockPtr {
                    base: base.id,
                    shape: shape_ids,
                    strides: stride_ids,
                    offsets: offset_ids,
                    order: order.clone(),
                },
                ty,
            );
            Ok(BlockPointer {
                handle,
                block_shape: block,
                order,
                offsets: folded,
            })
        })
    }

    /// A new block pointer with `offsets[i] += deltas[i]`.
    pub fn advance(
        &mut self,
        bp: &BlockPointer,
        deltas: &[Operand],
    ) -> Result<BlockPointer, Diagnostic> {
        self.guarded(
            || format!("advance({}, [{}])", bp.handle.ty, describe_operands(deltas)),
            |kb| {
                if deltas.len() != bp.rank() {
                    return Err(Diagnostic::shape_error(format!(
                        "advance on a rank-{} block pointer got {} deltas",
                        bp.rank(),
                        deltas.len()
                    )));
                }
                check_operands("deltas", deltas)?;

                let offsets = match (bp.offsets(), kb.fold_operands(deltas)) {
                    (Some(cur), Some(d)) => {
                        Some(
                            cur.iter()
                                .zip(d.iter())
                                .map(|(&a, &b)| wrap_offset(i128::from(a) + i128::from(b)))
                                .collect(),
                        )
                    }
                    _ => None,
                };
                let delta_ids = kb.materialize(deltas, Dtype::I32)?;
                let handle = kb.emit(
                    Op::Advance {
                        ptr: bp.id(),
                        deltas: delta_ids,
                    },
                    bp.handle.ty.clone(),
                );
                Ok(BlockPointer {
                    handle,
                    block_shape: bp.block_shape.clone(),
                    order: bp.order.clone(),
                    offsets,
                })
            },
        )
    }

    /// Load the tile. Elements outside the tensor along a dimension listed
    /// in `boundary_check` read as `padding`; other dimensions are assumed
    /// in bounds.
    pub fn load_block(
        &mut self,
        bp: &BlockPointer,
        boundary_check: &[u32],
        padding: Padding,
    ) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || {
                format!(
                    "load_block({}, boundary_check=[{}])",
                    bp.handle.ty,
                    format_dims(boundary_check)
                )
            },
            |kb| {
                check_boundary_dims(boundary_check, bp.rank())?;
                if padding == Padding::Nan && !bp.elem().is_floating() {
                    return Err(Diagnostic::type_error(format!(
                        "NaN padding requires a floating-point pointee, got {}",
                        bp.elem()
                    )));
                }
                let ty = TensorType::block(bp.elem().clone(), bp.block_shape.clone());
                Ok(kb.emit(
                    Op::LoadBlock {
                        ptr: bp.id(),
                        boundary_check: boundary_check.to_vec(),
                        padding,
                    },
                    ty,
                ))
            },
        )
    }

    /// Store `value` (broadcast and cast to the tile) through the block
    /// pointer. Out-of-bounds elements along checked dimensions are dropped.
    pub fn store_block(
        &mut self,
        bp: &BlockPointer,
        value: &Tensor,
        boundary_check: &[u32],
    ) -> Result<(), Diagnostic> {
        self.guarded(
            || {
                format!(
                    "store_block({}, {}, boundary_check=[{}])",
                    bp.handle.ty,
                    value.ty,
                    format_dims(boundary_check)
                )
            },
            |kb| {
                check_boundary_dims(boundary_check, bp.rank())?;
                if value.dtype().is_ptr() || value.dtype().is_block_ptr() {
                    return Err(Diagnostic::type_error(format!(
                        "cannot store {} through a block pointer",
                        value.ty
                    )));
                }
                super::memory::check_reaches("value", value.shape(), &bp.block_shape)?;
                let value = kb.broadcast_unchecked(value, &bp.block_shape);
                let value = kb.cast(&value, bp.elem().clone())?;
                kb.b.emit_effect(Op::StoreBlock {
                    ptr: bp.id(),
                    value: value.id,
                    boundary_check: boundary_check.to_vec(),
                });
                Ok(())
            },
        )
    }
}
