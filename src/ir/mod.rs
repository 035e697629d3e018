//! Tensor IR: the instruction set builtins lower to.
//!
//! A kernel body is a flat list of SSA instructions over typed values.
//! Every value is produced exactly once; structural ops (`For`) carry their
//! nested body so a backend can choose its own loop lowering.
//!
//! Pipeline:
//! ```text
//! kernel code → KernelBuilder builtins → ir::Builder → Kernel
//!                                                    ├→ Display (text IR)
//!                                                    ├→ hash::ContentHash
//!                                                    └→ interp (reference)
//! ```

pub mod builder;

use std::fmt;

use crate::types::{join_dims, TensorType};

// ─── Values ───────────────────────────────────────────────────────

/// SSA value handle. Owned by the kernel that allocated it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Scalar literal. Block constants are a splat of a scalar literal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Bool(b) => write!(f, "{}", b),
        }
    }
}

// ─── Opcodes ──────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Integer division truncating toward zero (signedness from operands).
    Div,
    /// Floating-point division.
    FDiv,
    Rem,
    And,
    Or,
    Xor,
    Min,
    Max,
    /// Pointer + integer offset, scaled by the pointee size.
    AddPtr,
}

impl BinOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::FDiv => "fdiv",
            BinOp::Rem => "rem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Min => "min",
            BinOp::Max => "max",
            BinOp::AddPtr => "addptr",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpPred {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CmpPred::Eq => "eq",
            CmpPred::Ne => "ne",
            CmpPred::Lt => "lt",
            CmpPred::Le => "le",
            CmpPred::Gt => "gt",
            CmpPred::Ge => "ge",
        }
    }
}

/// Hardware read-modify-write opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RmwOp {
    And,
    Or,
    Xor,
    Add,
    FAdd,
    Max,
    Min,
    UMax,
    UMin,
    Xchg,
}

impl RmwOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            RmwOp::And => "and",
            RmwOp::Or => "or",
            RmwOp::Xor => "xor",
            RmwOp::Add => "add",
            RmwOp::FAdd => "fadd",
            RmwOp::Max => "max",
            RmwOp::Min => "min",
            RmwOp::UMax => "umax",
            RmwOp::UMin => "umin",
            RmwOp::Xchg => "xchg",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReduceKind {
    Sum,
    Max,
    Min,
}

impl ReduceKind {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ReduceKind::Sum => "sum",
            ReduceKind::Max => "max",
            ReduceKind::Min => "min",
        }
    }
}

/// Fill value for boundary-checked block loads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Padding {
    #[default]
    Zero,
    Nan,
}

// ─── Instructions ─────────────────────────────────────────────────

/// A single IR operation.
///
/// Grouped in tiers:
///
/// **Values**: constants, kernel parameters, program indices, ranges.
/// **Shape/type**: splat, broadcast, expand_dims, trans, cat, cast, bitcast.
/// **Compute**: binary, compare, select, dot, reduce.
/// **Memory**: load/store, atomics, block pointers.
/// **Structure**: counted loop with loop-carried values.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    // ── Values (5) ──
    Const(Literal),
    /// Kernel argument by position.
    Param(u32),
    ProgramId(u32),
    NumPrograms(u32),
    /// `[start, end)` as `i32[end - start]`.
    MakeRange {
        start: i64,
        end: i64,
    },

    // ── Shape/type (7) ──
    /// Scalar to block.
    Splat(ValueId),
    /// Size-1 dimensions repeated up to the result shape (same rank).
    Broadcast(ValueId),
    ExpandDims {
        src: ValueId,
        axis: u32,
    },
    Trans(ValueId),
    Cat {
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Value-preserving conversion to the result dtype.
    Cast(ValueId),
    /// Bit reinterpretation to the result dtype (same width).
    Bitcast(ValueId),

    // ── Compute (5) ──
    Binary {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cmp {
        pred: CmpPred,
        lhs: ValueId,
        rhs: ValueId,
    },
    Select {
        cond: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    Dot {
        a: ValueId,
        b: ValueId,
        acc: Option<ValueId>,
    },
    Reduce {
        kind: ReduceKind,
        src: ValueId,
        axis: u32,
    },

    // ── Memory (8) ──
    Load {
        ptr: ValueId,
        mask: Option<ValueId>,
        other: Option<ValueId>,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
        mask: Option<ValueId>,
    },
    /// Returns the value held before the update.
    AtomicRmw {
        op: RmwOp,
        ptr: ValueId,
        val: ValueId,
        mask: ValueId,
    },
    AtomicCas {
        ptr: ValueId,
        cmp: ValueId,
        val: ValueId,
    },
    MakeBlockPtr {
        base: ValueId,
        shape: Vec<ValueId>,
        strides: Vec<ValueId>,
        offsets: Vec<ValueId>,
        order: Vec<u32>,
    },
    Advance {
        ptr: ValueId,
        deltas: Vec<ValueId>,
    },
    LoadBlock {
        ptr: ValueId,
        boundary_check: Vec<u32>,
        padding: Padding,
    },
    StoreBlock {
        ptr: ValueId,
        value: ValueId,
        boundary_check: Vec<u32>,
    },

    // ── Structure (1) ──
    /// `for iv in (lower..upper).step_by(step)`, threading `args` through
    /// the body. `args` start as `init`; each iteration rebinds them to
    /// `yields`; after the loop `results` hold the final values.
    For {
        lower: ValueId,
        upper: ValueId,
        step: ValueId,
        init: Vec<ValueId>,
        iv: ValueId,
        args: Vec<ValueId>,
        body: Vec<Instr>,
        yields: Vec<ValueId>,
        results: Vec<ValueId>,
    },
}

/// An instruction: an op plus the value it defines, if any.
#[derive(Clone, Debug, PartialEq)]
pub struct Instr {
    pub result: Option<ValueId>,
    pub op: Op,
}

// ─── Kernel ───────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TensorType,
}

/// A lowered kernel: parameters, body and the type of every value.
#[derive(Clone, Debug)]
pub struct Kernel {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Instr>,
    pub types: Vec<TensorType>,
}

impl Kernel {
    pub fn type_of(&self, v: ValueId) -> &TensorType {
        &self.types[v.index()]
    }

    /// Total instruction count including nested loop bodies.
    pub fn instr_count(&self) -> usize {
        fn count(instrs: &[Instr]) -> usize {
            instrs
                .iter()
                .map(|i| match &i.op {
                    Op::For { body, .. } => 1 + count(body),
                    _ => 1,
                })
                .sum()
        }
        count(&self.body)
    }

    /// Visit every instruction, loop bodies included, in program order.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Instr)) {
        fn go<'a>(instrs: &'a [Instr], f: &mut dyn FnMut(&'a Instr)) {
            for instr in instrs {
                f(instr);
                if let Op::For { body, .. } = &instr.op {
                    go(body, f);
                }
            }
        }
        go(&self.body, f);
    }

    /// Render the body without the `kernel @name(...)` header, used for
    /// content hashing.
    pub fn body_text(&self) -> String {
        let mut out = String::new();
        let printer = Printer { kernel: self };
        for instr in &self.body {
            printer.instr(&mut out, instr, 1);
        }
        out
    }
}

// ─── Display ──────────────────────────────────────────────────────

struct Printer<'a> {
    kernel: &'a Kernel,
}

fn list(values: &[ValueId]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Printer<'_> {
    fn instr(&self, out: &mut String, instr: &Instr, depth: usize) {
        let pad = "  ".repeat(depth);
        let body = self.op_text(&instr.op, depth);
        match instr.result {
            Some(v) => out.push_str(&format!(
                "{}{} = {} : {}\n",
                pad,
                v,
                body,
                self.kernel.type_of(v)
            )),
            None => out.push_str(&format!("{}{}\n", pad, body)),
        }
    }

    fn op_text(&self, op: &Op, depth: usize) -> String {
        match op {
            Op::Const(lit) => format!("const {}", lit),
            Op::Param(i) => {
                let name = self
                    .kernel
                    .params
                    .get(*i as usize)
                    .map(|p| p.name.as_str())
                    .unwrap_or("?");
                format!("param {} \"{}\"", i, name)
            }
            Op::ProgramId(axis) => format!("program_id {}", axis),
            Op::NumPrograms(axis) => format!("num_programs {}", axis),
            Op::MakeRange { start, end } => format!("make_range {}, {}", start, end),
            Op::Splat(v) => format!("splat {}", v),
            Op::Broadcast(v) => format!("broadcast {}", v),
            Op::ExpandDims { src, axis } => format!("expand_dims {}, axis {}", src, axis),
            Op::Trans(v) => format!("trans {}", v),
            Op::Cat { lhs, rhs } => format!("cat {}, {}", lhs, rhs),
            Op::Cast(v) => format!("cast {}", v),
            Op::Bitcast(v) => format!("bitcast {}", v),
            Op::Binary { op, lhs, rhs } => format!("{} {}, {}", op.mnemonic(), lhs, rhs),
            Op::Cmp { pred, lhs, rhs } => format!("cmp {} {}, {}", pred.mnemonic(), lhs, rhs),
            Op::Select { cond, lhs, rhs } => format!("select {}, {}, {}", cond, lhs, rhs),
            Op::Dot { a, b, acc } => match acc {
                Some(acc) => format!("dot {}, {}, acc {}", a, b, acc),
                None => format!("dot {}, {}", a, b),
            },
            Op::Reduce { kind, src, axis } => {
                format!("reduce {} {}, axis {}", kind.mnemonic(), src, axis)
            }
            Op::Load { ptr, mask, other } => {
                let mut s = format!("load {}", ptr);
                if let Some(m) = mask {
                    s.push_str(&format!(", mask {}", m));
                }
                if let Some(o) = other {
                    s.push_str(&format!(", other {}", o));
                }
                s
            }
            Op::Store { ptr, value, mask } => match mask {
                Some(m) => format!("store {}, {}, mask {}", ptr, value, m),
                None => format!("store {}, {}", ptr, value),
            },
            Op::AtomicRmw { op, ptr, val, mask } => {
                format!("atomic_rmw {} {}, {}, mask {}", op.mnemonic(), ptr, val, mask)
            }
            Op::AtomicCas { ptr, cmp, val } => format!("atomic_cas {}, {}, {}", ptr, cmp, val),
            Op::MakeBlockPtr {
                base,
                shape,
                strides,
                offsets,
                order,
            } => {
                let order: Vec<u64> = order.iter().map(|&o| u64::from(o)).collect();
                format!(
                    "make_block_ptr {}, shape [{}], strides [{}], offsets [{}], order [{}]",
                    base,
                    list(shape),
                    list(strides),
                    list(offsets),
                    join_dims(&order)
                )
            }
            Op::Advance { ptr, deltas } => format!("advance {}, [{}]", ptr, list(deltas)),
            Op::LoadBlock {
                ptr,
                boundary_check,
                padding,
            } => {
                let dims: Vec<u64> = boundary_check.iter().map(|&d| u64::from(d)).collect();
                let pad = match padding {
                    Padding::Zero => "zero",
                    Padding::Nan => "nan",
                };
                format!(
                    "load_block {}, boundary_check [{}], padding {}",
                    ptr,
                    join_dims(&dims),
                    pad
                )
            }
            Op::StoreBlock {
                ptr,
                value,
                boundary_check,
            } => {
                let dims: Vec<u64> = boundary_check.iter().map(|&d| u64::from(d)).collect();
                format!(
                    "store_block {}, {}, boundary_check [{}]",
                    ptr,
                    value,
                    join_dims(&dims)
                )
            }
            Op::For {
                lower,
                upper,
                step,
                init,
                iv,
                args,
                body,
                yields,
                results,
            } => {
                let carried: Vec<String> = args
                    .iter()
                    .zip(init.iter())
                    .map(|(a, i)| format!("{} = {}", a, i))
                    .collect();
                let mut s = format!(
                    "[{}] = for {} = {} to {} step {} iter_args({}) {{\n",
                    list(results),
                    iv,
                    lower,
                    upper,
                    step,
                    carried.join(", ")
                );
                for instr in body {
                    self.instr(&mut s, instr, depth + 1);
                }
                s.push_str(&format!("{}yield {}\n", "  ".repeat(depth + 1), list(yields)));
                s.push_str(&format!("{}}}", "  ".repeat(depth)));
                s
            }
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect();
        writeln!(f, "kernel @{}({}) {{", self.name, params.join(", "))?;
        let printer = Printer { kernel: self };
        let mut out = String::new();
        for instr in &self.body {
            printer.instr(&mut out, instr, 1);
        }
        f.write_str(&out)?;
        writeln!(f, "}}")
    }
}
