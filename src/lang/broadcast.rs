//! Broadcast/cast engine: brings two operands to one shape and dtype.

use super::{KernelBuilder, Tensor};
use crate::diagnostic::Diagnostic;
use crate::ir::Op;
use crate::types::{broadcast_shapes, join_dims, promote, Dtype, TensorType};

impl KernelBuilder {
    /// Value-preserving conversion of `x` to `dtype`. Pointers only convert
    /// to other pointer types, by reinterpretation.
    pub fn cast(&mut self, x: &Tensor, dtype: Dtype) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("cast({}, {})", x.ty, dtype),
            |kb| {
                if *x.dtype() == dtype {
                    return Ok(x.clone());
                }
                if x.dtype().is_block_ptr() || dtype.is_block_ptr() {
                    return Err(Diagnostic::type_error(
                        "block pointers cannot be cast".to_string(),
                    ));
                }
                let ty = x.ty.with_elem(dtype.clone());
                match (x.dtype().is_ptr(), dtype.is_ptr()) {
                    (true, true) => Ok(kb.emit(Op::Bitcast(x.id), ty)),
                    (false, false) => Ok(kb.emit(Op::Cast(x.id), ty)),
                    _ => Err(Diagnostic::type_error(format!(
                        "cannot cast between {} and {}",
                        x.dtype(),
                        dtype
                    ))
                    .with_help("offset a pointer with add instead".to_string())),
                }
            },
        )
    }

    /// Reinterpret the bits of `x` as `dtype`; widths must match.
    pub fn bitcast(&mut self, x: &Tensor, dtype: Dtype) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("bitcast({}, {})", x.ty, dtype),
            |kb| {
                if *x.dtype() == dtype {
                    return Ok(x.clone());
                }
                if x.dtype().is_block_ptr() || dtype.is_block_ptr() {
                    return Err(Diagnostic::type_error(
                        "block pointers cannot be bitcast".to_string(),
                    ));
                }
                let (from, to) = (x.dtype().primitive_bitwidth(), dtype.primitive_bitwidth());
                if from != to {
                    return Err(Diagnostic::value_error(format!(
                        "bitcast requires equal widths: {} is {} bits, {} is {} bits",
                        x.dtype(),
                        from,
                        dtype,
                        to
                    )));
                }
                Ok(kb.emit(Op::Bitcast(x.id), x.ty.with_elem(dtype.clone())))
            },
        )
    }

    /// Broadcast `x` to exactly `shape`. Scalars are splatted; lower-rank
    /// blocks gain leading size-1 dimensions first.
    pub fn broadcast_to(&mut self, x: &Tensor, shape: &[u64]) -> Result<Tensor, Diagnostic> {
        self.guarded(
            || format!("broadcast_to({}, [{}])", x.ty, join_dims(shape)),
            |kb| {
                if x.shape() == shape {
                    return Ok(x.clone());
                }
                let target = broadcast_shapes(x.shape(), shape)?;
                if target != shape {
                    return Err(Diagnostic::shape_error(format!(
                        "cannot broadcast [{}] to [{}]",
                        join_dims(x.shape()),
                        join_dims(shape)
                    )));
                }
                kb.check_block_shape(shape)?;
                Ok(kb.broadcast_unchecked(x, shape))
            },
        )
    }

    /// Emit the splat / expand_dims / broadcast chain for a shape already
    /// known to be reachable from `x`.
    pub(crate) fn broadcast_unchecked(&mut self, x: &Tensor, shape: &[u64]) -> Tensor {
        if x.shape() == shape {
            return x.clone();
        }
        if !x.is_block() {
            let ty = TensorType::block(x.dtype().clone(), shape.to_vec());
            return self.emit(Op::Splat(x.id), ty);
        }
        let mut cur = x.clone();
        while cur.rank() < shape.len() {
            let mut dims = cur.shape().to_vec();
            dims.insert(0, 1);
            cur = self.emit(
                Op::ExpandDims {
                    src: cur.id,
                    axis: 0,
                },
                cur.ty.with_shape(dims),
            );
        }
        if cur.shape() != shape {
            cur = self.emit(Op::Broadcast(cur.id), cur.ty.with_shape(shape.to_vec()));
        }
        cur
    }

    /// Common shape of two operands, validated against the target limit.
    pub(crate) fn reconcile_shapes(&self, a: &[u64], b: &[u64]) -> Result<Vec<u64>, Diagnostic> {
        let shape = broadcast_shapes(a, b)?;
        self.check_block_shape(&shape)?;
        Ok(shape)
    }

    /// Bring `a` and `b` to a common shape and dtype.
    ///
    /// Both checks run before anything is emitted; afterwards the operands
    /// are broadcast, then the lower-ranked dtype is cast.
    pub fn reconcile(&mut self, a: &Tensor, b: &Tensor) -> Result<(Tensor, Tensor), Diagnostic> {
        self.guarded(
            || format!("reconcile({}, {})", a.ty, b.ty),
            |kb| {
                let shape = kb.reconcile_shapes(a.shape(), b.shape())?;
                let dtype = promote(a.dtype(), b.dtype())?;
                let a = kb.broadcast_unchecked(a, &shape);
                let b = kb.broadcast_unchecked(b, &shape);
                let a = kb.cast(&a, dtype.clone())?;
                let b = kb.cast(&b, dtype)?;
                Ok((a, b))
            },
        )
    }
}
