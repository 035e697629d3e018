//! Bit-level encodings of scalar dtypes.
//!
//! `to_bits`/`from_bits` convert between evaluator cells and the raw bit
//! pattern a dtype occupies in memory. Bitcasts and memory accesses both go
//! through here, so they always agree.

use half::{bf16, f16};

use super::value::Cell;
use crate::types::Dtype;

/// A small IEEE-like float format (sign, exponent, mantissa).
#[derive(Clone, Copy, Debug)]
struct Minifloat {
    exp_bits: u32,
    man_bits: u32,
    bias: i32,
    /// Whether the all-ones exponent encodes inf/NaN. Formats without
    /// infinities use only the all-ones pattern (per sign) for NaN.
    has_inf: bool,
}

const F8E4NV: Minifloat = Minifloat {
    exp_bits: 4,
    man_bits: 3,
    bias: 7,
    has_inf: false,
};

const F8E5: Minifloat = Minifloat {
    exp_bits: 5,
    man_bits: 2,
    bias: 15,
    has_inf: true,
};

const F8E4B15: Minifloat = Minifloat {
    exp_bits: 4,
    man_bits: 3,
    bias: 15,
    has_inf: false,
};

impl Minifloat {
    fn exp_max(self) -> u32 {
        (1 << self.exp_bits) - 1
    }

    fn man_max(self) -> u32 {
        (1 << self.man_bits) - 1
    }

    fn nan_bits(self) -> u8 {
        let mag = (self.exp_max() << self.man_bits) | self.man_max();
        mag as u8
    }

    /// Decode the magnitude bits (sign excluded).
    fn decode_magnitude(self, mag: u32) -> f64 {
        let e = mag >> self.man_bits;
        let m = mag & self.man_max();
        let scale = f64::from(1u32 << self.man_bits);
        if e == 0 {
            return f64::from(m) / scale * 2f64.powi(1 - self.bias);
        }
        if e == self.exp_max() {
            if self.has_inf {
                return if m == 0 { f64::INFINITY } else { f64::NAN };
            }
            if m == self.man_max() {
                return f64::NAN;
            }
        }
        (1.0 + f64::from(m) / scale) * 2f64.powi(e as i32 - self.bias)
    }

    fn decode(self, bits: u8) -> f64 {
        let sign_shift = self.exp_bits + self.man_bits;
        let mag = u32::from(bits) & ((1 << sign_shift) - 1);
        let v = self.decode_magnitude(mag);
        if (bits >> sign_shift) & 1 == 1 {
            -v
        } else {
            v
        }
    }

    /// Round to nearest, ties to even mantissa. Overflow saturates to the
    /// largest finite value, or to infinity when the format has one.
    fn encode(self, x: f64) -> u8 {
        let sign_shift = self.exp_bits + self.man_bits;
        let sign = if x.is_sign_negative() { 1u8 << sign_shift } else { 0 };
        if x.is_nan() {
            return sign | self.nan_bits();
        }
        let a = x.abs();
        let finite_codes = if self.has_inf {
            self.exp_max() << self.man_bits
        } else {
            self.nan_bits() as u32
        };
        if self.has_inf && a.is_infinite() {
            return sign | finite_codes as u8;
        }

        let mut best = 0u32;
        let mut best_err = f64::INFINITY;
        for mag in 0..finite_codes {
            let err = (self.decode_magnitude(mag) - a).abs();
            if err < best_err || (err == best_err && mag & 1 == 0) {
                best = mag;
                best_err = err;
            }
        }
        // Past the top finite value by more than half an ulp.
        if self.has_inf {
            let top = self.decode_magnitude(finite_codes - 1);
            let ulp = top - self.decode_magnitude(finite_codes - 2);
            if a >= top + ulp / 2.0 {
                return sign | finite_codes as u8;
            }
        }
        sign | best as u8
    }
}

fn minifloat(dtype: &Dtype) -> Option<Minifloat> {
    match dtype {
        Dtype::F8E4Nv => Some(F8E4NV),
        Dtype::F8E5 => Some(F8E5),
        Dtype::F8E4B15 => Some(F8E4B15),
        _ => None,
    }
}

/// Round `x` to the precision of float dtype `dtype`.
pub fn round_float(dtype: &Dtype, x: f64) -> f64 {
    match dtype {
        Dtype::F64 => x,
        Dtype::F32 => f64::from(x as f32),
        Dtype::F16 => f16::from_f64(x).to_f64(),
        Dtype::BF16 => bf16::from_f64(x).to_f64(),
        other => match minifloat(other) {
            Some(mf) => mf.decode(mf.encode(x)),
            None => x,
        },
    }
}

fn width_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Raw bit pattern of `cell` interpreted as `dtype`, zero-extended to 64.
pub fn to_bits(dtype: &Dtype, cell: &Cell) -> u64 {
    match (dtype, cell) {
        (Dtype::F64, Cell::Float(x)) => bytemuck::cast::<f64, u64>(*x),
        (Dtype::F32, Cell::Float(x)) => u64::from(bytemuck::cast::<f32, u32>(*x as f32)),
        (Dtype::F16, Cell::Float(x)) => u64::from(f16::from_f64(*x).to_bits()),
        (Dtype::BF16, Cell::Float(x)) => u64::from(bf16::from_f64(*x).to_bits()),
        (d, Cell::Float(x)) => minifloat(d).map_or(0, |mf| u64::from(mf.encode(*x))),
        (d, Cell::Int(v)) => (*v as u64) & width_mask(d.primitive_bitwidth()),
        (_, Cell::Ptr(p)) => *p,
    }
}

/// Cell holding the value whose `dtype` bit pattern is `bits`.
pub fn from_bits(dtype: &Dtype, bits: u64) -> Cell {
    match dtype {
        Dtype::F64 => Cell::Float(bytemuck::cast::<u64, f64>(bits)),
        Dtype::F32 => Cell::Float(f64::from(bytemuck::cast::<u32, f32>(bits as u32))),
        Dtype::F16 => Cell::Float(f16::from_bits(bits as u16).to_f64()),
        Dtype::BF16 => Cell::Float(bf16::from_bits(bits as u16).to_f64()),
        Dtype::Ptr(..) | Dtype::BlockPtr(..) => Cell::Ptr(bits),
        d => match minifloat(d) {
            Some(mf) => Cell::Float(mf.decode(bits as u8)),
            None => Cell::Int(d.wrap_int(i128::from(bits))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_bits() {
        assert_eq!(to_bits(&Dtype::F32, &Cell::Float(1.0)), 0x3f80_0000);
        assert_eq!(to_bits(&Dtype::F32, &Cell::Float(-2.5)), 0xc020_0000);
        assert_eq!(from_bits(&Dtype::F32, 0xc0a0_0000), Cell::Float(-5.0));
    }

    #[test]
    fn test_int_bits_wrap() {
        assert_eq!(to_bits(&Dtype::I32, &Cell::Int(-1)), 0xffff_ffff);
        assert_eq!(from_bits(&Dtype::I32, 0xffff_ffff), Cell::Int(-1));
        assert_eq!(from_bits(&Dtype::U32, 0xffff_ffff), Cell::Int(0xffff_ffff));
        assert_eq!(from_bits(&Dtype::Int1, 1), Cell::Int(1));
    }

    #[test]
    fn test_half_formats() {
        assert_eq!(to_bits(&Dtype::F16, &Cell::Float(1.0)), 0x3c00);
        assert_eq!(to_bits(&Dtype::BF16, &Cell::Float(1.0)), 0x3f80);
        assert_eq!(round_float(&Dtype::F16, 0.1), f16::from_f64(0.1).to_f64());
    }

    #[test]
    fn test_fp8_e4nv() {
        assert_eq!(F8E4NV.decode(0x38), 1.0);
        assert_eq!(F8E4NV.encode(1.0), 0x38);
        assert_eq!(F8E4NV.decode(0x7e), 448.0);
        // Saturates instead of overflowing to NaN.
        assert_eq!(F8E4NV.encode(1000.0), 0x7e);
        assert!(F8E4NV.decode(0x7f).is_nan());
        assert_eq!(F8E4NV.decode(0xb8), -1.0);
    }

    #[test]
    fn test_fp8_e5() {
        assert_eq!(F8E5.decode(0x3c), 1.0);
        assert_eq!(F8E5.encode(1.0), 0x3c);
        assert_eq!(F8E5.decode(0x7b), 57344.0);
        assert_eq!(F8E5.decode(0x7c), f64::INFINITY);
        assert_eq!(F8E5.encode(1e9), 0x7c);
    }

    #[test]
    fn test_fp8_round_trip_exact_values() {
        for bits in 0u8..=0x7e {
            let x = F8E4NV.decode(bits);
            assert_eq!(F8E4NV.encode(x), bits, "bits {:#x} ({})", bits, x);
        }
    }
}
