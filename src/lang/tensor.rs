//! Tensor handles and integer operands.

use std::fmt;

use crate::ir::ValueId;
use crate::types::{Dtype, TensorType};

/// An immutable typed handle to an IR value.
///
/// Tensors are plain values: cloning one does not copy IR, and every
/// builtin returns a new tensor instead of updating its inputs.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub(crate) id: ValueId,
    pub(crate) ty: TensorType,
}

impl Tensor {
    pub(crate) fn new(id: ValueId, ty: TensorType) -> Self {
        Self { id, ty }
    }

    pub fn id(&self) -> ValueId {
        self.id
    }

    pub fn ty(&self) -> &TensorType {
        &self.ty
    }

    pub fn dtype(&self) -> &Dtype {
        &self.ty.elem
    }

    pub fn shape(&self) -> &[u64] {
        &self.ty.shape
    }

    pub fn is_block(&self) -> bool {
        self.ty.is_block()
    }

    pub fn rank(&self) -> usize {
        self.ty.rank()
    }

    pub fn numel(&self) -> u64 {
        self.ty.numel()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty)
    }
}

/// An integer argument that may be a literal or a runtime scalar, as in
/// block-pointer shapes, strides and offsets.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Const(i64),
    Value(Tensor),
}

impl Operand {
    pub(crate) fn describe(&self) -> String {
        match self {
            Operand::Const(v) => v.to_string(),
            Operand::Value(t) => t.ty.to_string(),
        }
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Const(v)
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Const(i64::from(v))
    }
}

impl From<u64> for Operand {
    fn from(v: u64) -> Self {
        Operand::Const(v as i64)
    }
}

impl From<Tensor> for Operand {
    fn from(t: Tensor) -> Self {
        Operand::Value(t)
    }
}

impl From<&Tensor> for Operand {
    fn from(t: &Tensor) -> Self {
        Operand::Value(t.clone())
    }
}

pub(crate) fn describe_operands(ops: &[Operand]) -> String {
    ops.iter()
        .map(|o| o.describe())
        .collect::<Vec<_>>()
        .join(", ")
}
