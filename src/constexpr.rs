//! Compile-time constants: shapes, dtypes and feature flags.
//!
//! Constexpr values never become tensor IR by themselves. They are folded
//! here, validated, and only then used to size the tensors a builtin emits,
//! so a malformed constant fails before any instruction is produced.

use std::collections::BTreeMap;
use std::fmt;

use crate::diagnostic::Diagnostic;
use crate::types::Dtype;

#[derive(Clone, Debug, PartialEq)]
pub enum Constexpr {
    Int(i64),
    Bool(bool),
    Float(f64),
    Dtype(Dtype),
}

impl Constexpr {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constexpr::Int(_) => "int",
            Constexpr::Bool(_) => "bool",
            Constexpr::Float(_) => "float",
            Constexpr::Dtype(_) => "dtype",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constexpr::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Constexpr::Bool(b) => Some(*b),
            Constexpr::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_dtype(&self) -> Option<&Dtype> {
        match self {
            Constexpr::Dtype(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for Constexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constexpr::Int(v) => write!(f, "{}", v),
            Constexpr::Bool(b) => write!(f, "{}", b),
            Constexpr::Float(x) => write!(f, "{:?}", x),
            Constexpr::Dtype(d) => write!(f, "{}", d),
        }
    }
}

impl From<i64> for Constexpr {
    fn from(v: i64) -> Self {
        Constexpr::Int(v)
    }
}

impl From<i32> for Constexpr {
    fn from(v: i32) -> Self {
        Constexpr::Int(i64::from(v))
    }
}

impl From<u64> for Constexpr {
    fn from(v: u64) -> Self {
        Constexpr::Int(v as i64)
    }
}

impl From<u32> for Constexpr {
    fn from(v: u32) -> Self {
        Constexpr::Int(i64::from(v))
    }
}

impl From<bool> for Constexpr {
    fn from(b: bool) -> Self {
        Constexpr::Bool(b)
    }
}

impl From<f64> for Constexpr {
    fn from(x: f64) -> Self {
        Constexpr::Float(x)
    }
}

impl From<Dtype> for Constexpr {
    fn from(d: Dtype) -> Self {
        Constexpr::Dtype(d)
    }
}

// ─── Folding ──────────────────────────────────────────────────────

/// Ceiling division, the grid-size helper.
pub fn cdiv(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

pub fn is_power_of_two(v: i64) -> bool {
    v > 0 && (v & (v - 1)) == 0
}

/// Extract an integer from a list of constexprs, one entry per dimension.
/// `what` names the argument in error messages (e.g. "Shape element").
pub fn expect_ints(values: &[Constexpr], what: &str) -> Result<Vec<i64>, Diagnostic> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_int().ok_or_else(|| {
                Diagnostic::type_error(format!(
                    "{} {} must have type `constexpr[int]`, got `constexpr[{}]`",
                    what,
                    i,
                    v.kind_name()
                ))
            })
        })
        .collect()
}

/// Extract a non-negative shape from constexprs.
pub fn expect_shape(values: &[Constexpr]) -> Result<Vec<u64>, Diagnostic> {
    let ints = expect_ints(values, "Shape element")?;
    ints.into_iter()
        .enumerate()
        .map(|(i, v)| {
            u64::try_from(v).map_err(|_| {
                Diagnostic::value_error(format!("Shape element {} is negative ({})", i, v))
            })
        })
        .collect()
}

// ─── Meta-parameter environment ───────────────────────────────────

/// Named compile-time parameters of a kernel (`BLOCK_M`, `out_dtype`, ...),
/// substituted before lowering.
#[derive(Clone, Debug, Default)]
pub struct ConstEnv {
    values: BTreeMap<String, Constexpr>,
}

impl ConstEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Constexpr>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Constexpr>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Constexpr> {
        self.values.get(name)
    }

    pub fn int(&self, name: &str) -> Result<i64, Diagnostic> {
        match self.values.get(name) {
            Some(Constexpr::Int(v)) => Ok(*v),
            Some(other) => Err(Diagnostic::type_error(format!(
                "meta-parameter `{}` must be `constexpr[int]`, got `constexpr[{}]`",
                name,
                other.kind_name()
            ))),
            None => Err(missing(name)),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, Diagnostic> {
        match self.values.get(name) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| {
                Diagnostic::type_error(format!(
                    "meta-parameter `{}` must be `constexpr[bool]`, got `constexpr[{}]`",
                    name,
                    v.kind_name()
                ))
            }),
        }
    }

    pub fn dtype(&self, name: &str) -> Result<Dtype, Diagnostic> {
        match self.values.get(name) {
            Some(Constexpr::Dtype(d)) => Ok(d.clone()),
            Some(other) => Err(Diagnostic::type_error(format!(
                "meta-parameter `{}` must be `constexpr[dtype]`, got `constexpr[{}]`",
                name,
                other.kind_name()
            ))),
            None => Err(missing(name)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Constexpr)> {
        self.values.iter()
    }
}

fn missing(name: &str) -> Diagnostic {
    Diagnostic::value_error(format!("missing meta-parameter `{}`", name))
}
