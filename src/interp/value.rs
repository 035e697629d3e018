//! Runtime values of the reference evaluator.

use super::encoding::{from_bits, round_float, to_bits};
use crate::types::Dtype;

/// One scalar lane. Integers are kept normalized to their dtype's width
/// (sign- or zero-extended); floats are kept rounded to their dtype.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Ptr(u64),
}

impl Cell {
    pub fn zero(dtype: &Dtype) -> Cell {
        if dtype.is_floating() {
            Cell::Float(0.0)
        } else if dtype.is_ptr() {
            Cell::Ptr(0)
        } else {
            Cell::Int(0)
        }
    }

    pub fn as_int(&self) -> i64 {
        match *self {
            Cell::Int(v) => v,
            Cell::Float(x) => x as i64,
            Cell::Ptr(p) => p as i64,
        }
    }

    pub fn as_float(&self) -> f64 {
        match *self {
            Cell::Int(v) => v as f64,
            Cell::Float(x) => x,
            Cell::Ptr(p) => p as f64,
        }
    }

    pub fn as_ptr(&self) -> u64 {
        match *self {
            Cell::Ptr(p) => p,
            Cell::Int(v) => v as u64,
            Cell::Float(x) => x as u64,
        }
    }

    pub fn is_true(&self) -> bool {
        match *self {
            Cell::Int(v) => v != 0,
            Cell::Float(x) => x != 0.0,
            Cell::Ptr(p) => p != 0,
        }
    }

    pub fn from_bool(b: bool) -> Cell {
        Cell::Int(i64::from(b))
    }
}

/// Unsigned view of an integer cell of dtype `dtype`.
pub fn as_unsigned(dtype: &Dtype, v: i64) -> u64 {
    let bits = dtype.primitive_bitwidth();
    if bits >= 64 {
        v as u64
    } else {
        (v as u64) & ((1u64 << bits) - 1)
    }
}

/// Value-preserving conversion of `cell` from `from` to `to`.
pub fn convert(cell: Cell, from: &Dtype, to: &Dtype) -> Cell {
    if from == to {
        return cell;
    }
    if to.is_ptr() {
        return Cell::Ptr(cell.as_ptr());
    }
    if to.is_bool() {
        return Cell::from_bool(cell.is_true());
    }
    match cell {
        Cell::Int(v) => {
            let exact = if from.is_int_unsigned() {
                i128::from(as_unsigned(from, v))
            } else {
                i128::from(v)
            };
            if to.is_floating() {
                Cell::Float(round_float(to, exact as f64))
            } else {
                Cell::Int(to.wrap_int(exact))
            }
        }
        Cell::Float(x) => {
            if to.is_floating() {
                Cell::Float(round_float(to, x))
            } else if to.is_int_unsigned() {
                Cell::Int(to.wrap_int(i128::from(x as u64)))
            } else {
                Cell::Int(to.wrap_int(i128::from(x as i64)))
            }
        }
        Cell::Ptr(p) => Cell::Int(to.wrap_int(i128::from(p))),
    }
}

/// Reinterpret the bits of `cell` (of dtype `from`) as dtype `to`.
pub fn reinterpret(cell: Cell, from: &Dtype, to: &Dtype) -> Cell {
    from_bits(to, to_bits(from, &cell))
}

/// Run-time state of a block pointer.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockPtrValue {
    pub base: u64,
    pub elem: Dtype,
    pub shape: Vec<i64>,
    pub strides: Vec<i64>,
    pub offsets: Vec<i64>,
    pub block_shape: Vec<u64>,
}

impl BlockPtrValue {
    /// Global coordinates of the tile element at row-major position
    /// `linear`.
    pub fn coords(&self, linear: usize) -> Vec<i64> {
        let mut rem = linear as u64;
        let mut local = vec![0u64; self.block_shape.len()];
        for d in (0..self.block_shape.len()).rev() {
            local[d] = rem % self.block_shape[d];
            rem /= self.block_shape[d];
        }
        local
            .iter()
            .zip(self.offsets.iter())
            .map(|(&i, &o)| o + i as i64)
            .collect()
    }

    /// Whether `coords` lies inside the tensor along every dim in `dims`.
    pub fn in_bounds(&self, coords: &[i64], dims: &[u32]) -> bool {
        dims.iter().all(|&d| {
            let d = d as usize;
            (0..self.shape[d]).contains(&coords[d])
        })
    }

    pub fn address(&self, coords: &[i64]) -> u64 {
        let elems: i64 = coords
            .iter()
            .zip(self.strides.iter())
            .map(|(c, s)| c * s)
            .sum();
        self.base
            .wrapping_add((elems * self.elem.byte_size() as i64) as u64)
    }

    pub fn numel(&self) -> usize {
        self.block_shape.iter().product::<u64>() as usize
    }
}

/// A value in the evaluator's environment.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A scalar (empty shape) or block; cells in row-major order.
    Block { shape: Vec<u64>, cells: Vec<Cell> },
    BlockPtr(BlockPtrValue),
}

impl Value {
    pub fn scalar(cell: Cell) -> Value {
        Value::Block {
            shape: Vec::new(),
            cells: vec![cell],
        }
    }

    pub fn block(shape: Vec<u64>, cells: Vec<Cell>) -> Value {
        Value::Block { shape, cells }
    }
}

/// A kernel argument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Arg {
    Ptr(u64),
    Int(i64),
    Float(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_int_float() {
        assert_eq!(convert(Cell::Int(-3), &Dtype::I32, &Dtype::F32), Cell::Float(-3.0));
        assert_eq!(convert(Cell::Float(-3.7), &Dtype::F32, &Dtype::I32), Cell::Int(-3));
        assert_eq!(convert(Cell::Int(-1), &Dtype::I32, &Dtype::U8), Cell::Int(255));
        assert_eq!(
            convert(Cell::Int(0xffff_ffff), &Dtype::U32, &Dtype::I64),
            Cell::Int(0xffff_ffff)
        );
        assert_eq!(convert(Cell::Float(0.5), &Dtype::F32, &Dtype::Int1), Cell::Int(1));
    }

    #[test]
    fn test_reinterpret_float_as_int() {
        assert_eq!(
            reinterpret(Cell::Float(-2.5), &Dtype::F32, &Dtype::I32),
            Cell::Int(0xc020_0000u32 as i32 as i64)
        );
        assert_eq!(
            reinterpret(Cell::Int(0x3f80_0000), &Dtype::I32, &Dtype::F32),
            Cell::Float(1.0)
        );
    }

    #[test]
    fn test_block_coords() {
        let bp = BlockPtrValue {
            base: 0x1000,
            elem: Dtype::F32,
            shape: vec![4, 6],
            strides: vec![6, 1],
            offsets: vec![2, 4],
            block_shape: vec![2, 4],
        };
        assert_eq!(bp.coords(0), vec![2, 4]);
        assert_eq!(bp.coords(5), vec![3, 5]);
        assert!(bp.in_bounds(&[3, 5], &[0, 1]));
        assert!(!bp.in_bounds(&[3, 6], &[0, 1]));
        assert!(bp.in_bounds(&[3, 6], &[0]));
        assert_eq!(bp.address(&[1, 2]), 0x1000 + 8 * 4);
    }
}
