//! Scalar dtypes, pointer types and block (tensor) types.
//!
//! A `TensorType` with an empty shape is a scalar. All extents are
//! compile-time constants; there is no dynamic rank.

use std::fmt;

use crate::diagnostic::Diagnostic;

/// Address space of global device memory.
pub const GLOBAL_ADDRESS_SPACE: u32 = 1;

/// Element kind of a tensor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dtype {
    /// Boolean.
    Int1,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    F32,
    F64,
    /// Brain float: 8 exponent bits, 7 mantissa bits.
    BF16,
    /// 4 exponent bits, 3 mantissa bits, bias 7, no infinities.
    F8E4Nv,
    /// 5 exponent bits, 2 mantissa bits, bias 15.
    F8E5,
    /// 4 exponent bits, 3 mantissa bits, bias 15.
    F8E4B15,
    /// Pointer to `element` in `address_space`.
    Ptr(Box<Dtype>, u32),
    /// Tiled window over a pointee tensor (see `lang::block_ptr`).
    BlockPtr(Box<Dtype>, Vec<u64>),
}

impl Dtype {
    /// Global-memory pointer to `self`.
    pub fn ptr(self) -> Dtype {
        Dtype::Ptr(Box::new(self), GLOBAL_ADDRESS_SPACE)
    }

    pub fn primitive_bitwidth(&self) -> u32 {
        match self {
            Dtype::Int1 => 1,
            Dtype::I8 | Dtype::U8 => 8,
            Dtype::F8E4Nv | Dtype::F8E5 | Dtype::F8E4B15 => 8,
            Dtype::I16 | Dtype::U16 | Dtype::F16 | Dtype::BF16 => 16,
            Dtype::I32 | Dtype::U32 | Dtype::F32 => 32,
            Dtype::I64 | Dtype::U64 | Dtype::F64 => 64,
            Dtype::Ptr(..) | Dtype::BlockPtr(..) => 64,
        }
    }

    /// Size in bytes when stored in memory. `Int1` occupies one byte.
    pub fn byte_size(&self) -> u64 {
        match self {
            Dtype::Int1 => 1,
            other => u64::from(other.primitive_bitwidth() / 8),
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Dtype::Int1)
    }

    /// Integer including `Int1`.
    pub fn is_int(&self) -> bool {
        matches!(
            self,
            Dtype::Int1
                | Dtype::I8
                | Dtype::I16
                | Dtype::I32
                | Dtype::I64
                | Dtype::U8
                | Dtype::U16
                | Dtype::U32
                | Dtype::U64
        )
    }

    pub fn is_int_signed(&self) -> bool {
        matches!(self, Dtype::I8 | Dtype::I16 | Dtype::I32 | Dtype::I64)
    }

    pub fn is_int_unsigned(&self) -> bool {
        matches!(
            self,
            Dtype::Int1 | Dtype::U8 | Dtype::U16 | Dtype::U32 | Dtype::U64
        )
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, Dtype::F16 | Dtype::F32 | Dtype::F64) || self.is_reduced_float()
    }

    /// Non-IEEE floats: bf16 and the fp8 family.
    pub fn is_reduced_float(&self) -> bool {
        matches!(
            self,
            Dtype::BF16 | Dtype::F8E4Nv | Dtype::F8E5 | Dtype::F8E4B15
        )
    }

    pub fn is_fp8(&self) -> bool {
        matches!(self, Dtype::F8E4Nv | Dtype::F8E5 | Dtype::F8E4B15)
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Dtype::Ptr(..))
    }

    pub fn is_block_ptr(&self) -> bool {
        matches!(self, Dtype::BlockPtr(..))
    }

    /// Pointee of a pointer or block pointer.
    pub fn element_ty(&self) -> Option<&Dtype> {
        match self {
            Dtype::Ptr(elem, _) | Dtype::BlockPtr(elem, _) => Some(elem),
            _ => None,
        }
    }

    /// Truncate `v` to this integer dtype's width, then sign- or
    /// zero-extend back to 64 bits. 64-bit kinds keep the raw bit pattern.
    pub fn wrap_int(&self, v: i128) -> i64 {
        let bits = self.primitive_bitwidth();
        if bits >= 64 {
            return v as i64;
        }
        let low = v & ((1i128 << bits) - 1);
        if self.is_int_signed() && (low >> (bits - 1)) == 1 {
            (low - (1i128 << bits)) as i64
        } else {
            low as i64
        }
    }

    pub fn name(&self) -> String {
        match self {
            Dtype::Int1 => "i1".to_string(),
            Dtype::I8 => "i8".to_string(),
            Dtype::I16 => "i16".to_string(),
            Dtype::I32 => "i32".to_string(),
            Dtype::I64 => "i64".to_string(),
            Dtype::U8 => "u8".to_string(),
            Dtype::U16 => "u16".to_string(),
            Dtype::U32 => "u32".to_string(),
            Dtype::U64 => "u64".to_string(),
            Dtype::F16 => "f16".to_string(),
            Dtype::F32 => "f32".to_string(),
            Dtype::F64 => "f64".to_string(),
            Dtype::BF16 => "bf16".to_string(),
            Dtype::F8E4Nv => "f8e4nv".to_string(),
            Dtype::F8E5 => "f8e5".to_string(),
            Dtype::F8E4B15 => "f8e4b15".to_string(),
            Dtype::Ptr(elem, GLOBAL_ADDRESS_SPACE) => format!("*{}", elem.name()),
            Dtype::Ptr(elem, space) => format!("*{}@{}", elem.name(), space),
            Dtype::BlockPtr(elem, shape) => {
                format!("*{}[{}]", elem.name(), join_dims(shape))
            }
        }
    }

    /// Parse a dtype name as produced by `name()` for scalar kinds.
    pub fn parse(name: &str) -> Option<Dtype> {
        let dtype = match name {
            "i1" | "bool" => Dtype::Int1,
            "i8" => Dtype::I8,
            "i16" => Dtype::I16,
            "i32" => Dtype::I32,
            "i64" => Dtype::I64,
            "u8" => Dtype::U8,
            "u16" => Dtype::U16,
            "u32" => Dtype::U32,
            "u64" => Dtype::U64,
            "f16" => Dtype::F16,
            "f32" => Dtype::F32,
            "f64" => Dtype::F64,
            "bf16" => Dtype::BF16,
            "f8e4nv" => Dtype::F8E4Nv,
            "f8e5" => Dtype::F8E5,
            "f8e4b15" => Dtype::F8E4B15,
            _ => {
                let inner = name.strip_prefix('*')?;
                return Dtype::parse(inner).map(Dtype::ptr);
            }
        };
        Some(dtype)
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Element dtype plus compile-time shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub elem: Dtype,
    pub shape: Vec<u64>,
}

impl TensorType {
    pub fn scalar(elem: Dtype) -> Self {
        Self {
            elem,
            shape: Vec::new(),
        }
    }

    pub fn block(elem: Dtype, shape: Vec<u64>) -> Self {
        Self { elem, shape }
    }

    pub fn is_block(&self) -> bool {
        !self.shape.is_empty()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Element count, saturating at `u64::MAX`.
    pub fn numel(&self) -> u64 {
        self.shape
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d))
            .unwrap_or(u64::MAX)
    }

    /// Same shape, different element.
    pub fn with_elem(&self, elem: Dtype) -> Self {
        Self {
            elem,
            shape: self.shape.clone(),
        }
    }

    /// Same element, different shape.
    pub fn with_shape(&self, shape: Vec<u64>) -> Self {
        Self {
            elem: self.elem.clone(),
            shape,
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shape.is_empty() {
            write!(f, "{}", self.elem)
        } else {
            write!(f, "{}[{}]", self.elem, join_dims(&self.shape))
        }
    }
}

pub(crate) fn join_dims(shape: &[u64]) -> String {
    shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ─── Promotion ────────────────────────────────────────────────────

/// Common dtype two operands are cast to before an elementwise op.
///
/// Rules: identical dtypes are kept; `Int1` yields to the other operand;
/// int + float gives the float; integers of the same signedness widen;
/// IEEE floats widen; a reduced-precision float meets a strictly wider
/// IEEE float at the IEEE float. Everything else needs an explicit cast.
pub fn promote(a: &Dtype, b: &Dtype) -> Result<Dtype, Diagnostic> {
    if a == b {
        return Ok(a.clone());
    }
    if a.is_ptr() || b.is_ptr() || a.is_block_ptr() || b.is_block_ptr() {
        return Err(Diagnostic::type_error(format!(
            "cannot promote {} and {}: pointer operands only combine with integer offsets",
            a, b
        )));
    }
    if a.is_bool() {
        return Ok(b.clone());
    }
    if b.is_bool() {
        return Ok(a.clone());
    }

    match (a.is_floating(), b.is_floating()) {
        (true, false) => Ok(a.clone()),
        (false, true) => Ok(b.clone()),
        (true, true) => promote_floats(a, b),
        (false, false) => {
            if a.is_int_signed() != b.is_int_signed() {
                return Err(explicit_cast(a, b, "operands differ in signedness"));
            }
            if a.primitive_bitwidth() >= b.primitive_bitwidth() {
                Ok(a.clone())
            } else {
                Ok(b.clone())
            }
        }
    }
}

fn promote_floats(a: &Dtype, b: &Dtype) -> Result<Dtype, Diagnostic> {
    let (wa, wb) = (a.primitive_bitwidth(), b.primitive_bitwidth());
    match (a.is_reduced_float(), b.is_reduced_float()) {
        (false, false) => Ok(if wa >= wb { a.clone() } else { b.clone() }),
        (true, false) if wb > wa => Ok(b.clone()),
        (false, true) if wa > wb => Ok(a.clone()),
        _ => Err(explicit_cast(
            a,
            b,
            "floating-point formats of this width do not promote implicitly",
        )),
    }
}

fn explicit_cast(a: &Dtype, b: &Dtype, why: &str) -> Diagnostic {
    Diagnostic::type_error(format!("cannot implicitly combine {} and {}: {}", a, b, why))
        .with_help(format!("cast one operand explicitly, e.g. cast(x, {})", b))
}

// ─── Broadcasting ─────────────────────────────────────────────────

/// NumPy-style broadcast of two shapes: right-aligned, each pair equal or
/// one of them 1.
pub fn broadcast_shapes(a: &[u64], b: &[u64]) -> Result<Vec<u64>, Diagnostic> {
    let rank = a.len().max(b.len());
    let mut out = vec![0u64; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            (x, y) => {
                return Err(Diagnostic::shape_error(format!(
                    "cannot broadcast [{}] with [{}]: dimension {} is {} vs {}",
                    join_dims(a),
                    join_dims(b),
                    i,
                    x,
                    y
                )))
            }
        };
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_SCALARS: [Dtype; 16] = [
        Dtype::Int1,
        Dtype::I8,
        Dtype::I16,
        Dtype::I32,
        Dtype::I64,
        Dtype::U8,
        Dtype::U16,
        Dtype::U32,
        Dtype::U64,
        Dtype::F16,
        Dtype::F32,
        Dtype::F64,
        Dtype::BF16,
        Dtype::F8E4Nv,
        Dtype::F8E5,
        Dtype::F8E4B15,
    ];

    #[test]
    fn test_promotion_idempotent() {
        for d in ALL_SCALARS.iter() {
            assert_eq!(promote(d, d).unwrap(), *d, "promote({d}, {d})");
        }
        let p = Dtype::F32.ptr();
        assert_eq!(promote(&p, &p).unwrap(), p);
    }

    #[test]
    fn test_promotion_symmetric() {
        for a in ALL_SCALARS.iter() {
            for b in ALL_SCALARS.iter() {
                let ab = promote(a, b).ok();
                let ba = promote(b, a).ok();
                assert_eq!(ab, ba, "promote({a}, {b}) vs promote({b}, {a})");
            }
        }
    }

    #[test]
    fn test_integer_widening() {
        assert_eq!(promote(&Dtype::I8, &Dtype::I32).unwrap(), Dtype::I32);
        assert_eq!(promote(&Dtype::U16, &Dtype::U64).unwrap(), Dtype::U64);
        assert_eq!(promote(&Dtype::Int1, &Dtype::I16).unwrap(), Dtype::I16);
    }

    #[test]
    fn test_int_to_float() {
        assert_eq!(promote(&Dtype::I64, &Dtype::F16).unwrap(), Dtype::F16);
        assert_eq!(promote(&Dtype::F32, &Dtype::U8).unwrap(), Dtype::F32);
    }

    #[test]
    fn test_float_widening() {
        assert_eq!(promote(&Dtype::F16, &Dtype::F32).unwrap(), Dtype::F32);
        assert_eq!(promote(&Dtype::F64, &Dtype::F32).unwrap(), Dtype::F64);
        assert_eq!(promote(&Dtype::BF16, &Dtype::F32).unwrap(), Dtype::F32);
        assert_eq!(promote(&Dtype::F8E5, &Dtype::F16).unwrap(), Dtype::F16);
    }

    #[test]
    fn test_explicit_cast_required() {
        let err = promote(&Dtype::I32, &Dtype::U32).unwrap_err();
        assert!(err.is(crate::diagnostic::ErrorKind::Type));
        assert!(promote(&Dtype::I8, &Dtype::U64).is_err());
        assert!(promote(&Dtype::BF16, &Dtype::F16).is_err());
        assert!(promote(&Dtype::F8E5, &Dtype::F8E4Nv).is_err());
        assert!(promote(&Dtype::F32.ptr(), &Dtype::I32).is_err());
    }

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(broadcast_shapes(&[4, 1], &[1, 8]).unwrap(), vec![4, 8]);
        assert_eq!(broadcast_shapes(&[8], &[4, 8]).unwrap(), vec![4, 8]);
        assert_eq!(broadcast_shapes(&[], &[16]).unwrap(), vec![16]);
        assert_eq!(broadcast_shapes(&[2, 3], &[2, 3]).unwrap(), vec![2, 3]);
        let err = broadcast_shapes(&[4, 8], &[3]).unwrap_err();
        assert!(err.is(crate::diagnostic::ErrorKind::Shape));
    }

    #[test]
    fn test_broadcast_symmetric() {
        let shapes: [&[u64]; 6] = [&[], &[1], &[8], &[4, 1], &[1, 8], &[2, 4, 8]];
        for a in shapes.iter() {
            for b in shapes.iter() {
                assert_eq!(
                    broadcast_shapes(a, b).ok(),
                    broadcast_shapes(b, a).ok(),
                    "{:?} vs {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_wrap_int() {
        assert_eq!(Dtype::I8.wrap_int(200), -56);
        assert_eq!(Dtype::U8.wrap_int(-1), 255);
        assert_eq!(Dtype::I32.wrap_int(i128::from(i32::MAX) + 1), i64::from(i32::MIN));
        assert_eq!(Dtype::U64.wrap_int(-1), -1);
        assert_eq!(Dtype::Int1.wrap_int(3), 1);
    }

    #[test]
    fn test_names_round_trip() {
        for d in ALL_SCALARS.iter() {
            assert_eq!(Dtype::parse(&d.name()).as_ref(), Some(d));
        }
        assert_eq!(Dtype::parse("*f16"), Some(Dtype::F16.ptr()));
        assert_eq!(Dtype::parse("f128"), None);
    }

    #[test]
    fn test_tensor_type_display() {
        let t = TensorType::block(Dtype::F32, vec![16, 32]);
        assert_eq!(t.to_string(), "f32[16, 32]");
        assert_eq!(t.numel(), 512);
        assert_eq!(TensorType::scalar(Dtype::I32.ptr()).to_string(), "*i32");
        let bp = Dtype::BlockPtr(Box::new(Dtype::F16), vec![64, 32]);
        assert_eq!(bp.to_string(), "*f16[64, 32]");
    }
}
