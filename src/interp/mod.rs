//! Reference evaluator for lowered kernels.
//!
//! Runs every program instance of a grid sequentially against a `Memory`,
//! lane by lane. It is the executable definition of the IR semantics used
//! by tests: masked lanes are inert, boundary-checked block accesses pad or
//! drop out-of-range elements, and atomics return the pre-update value.

pub mod encoding;
pub mod memory;
pub mod value;

use std::fmt;

use log::{debug, trace};

pub use memory::Memory;
pub use value::{Arg, BlockPtrValue, Cell, Value};

use crate::ir::{BinOp, CmpPred, Instr, Kernel, Literal, Op, Padding, ReduceKind, RmwOp, ValueId};
use crate::types::{Dtype, TensorType};
use value::{as_unsigned, convert, reinterpret};

/// Run-time failure of the reference evaluator.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecError {
    pub message: String,
}

impl ExecError {
    pub fn new(message: String) -> Self {
        Self { message }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution error: {}", self.message)
    }
}

impl std::error::Error for ExecError {}

/// Launch `kernel` over `grid` (programs along axes 0, 1, 2).
pub fn launch(
    kernel: &Kernel,
    grid: [u32; 3],
    args: &[Arg],
    memory: &mut Memory,
) -> Result<(), ExecError> {
    if args.len() != kernel.params.len() {
        return Err(ExecError::new(format!(
            "kernel `{}` takes {} arguments, got {}",
            kernel.name,
            kernel.params.len(),
            args.len()
        )));
    }
    debug!(
        "launch `{}` on grid {:?} ({} instructions)",
        kernel.name,
        grid,
        kernel.instr_count()
    );
    for z in 0..grid[2] {
        for y in 0..grid[1] {
            for x in 0..grid[0] {
                let mut program = Program {
                    kernel,
                    args,
                    pid: [x, y, z],
                    grid,
                    env: vec![None; kernel.types.len()],
                    memory: &mut *memory,
                };
                program.run(&kernel.body)?;
            }
        }
    }
    Ok(())
}

/// State of one program instance.
struct Program<'a> {
    kernel: &'a Kernel,
    args: &'a [Arg],
    pid: [u32; 3],
    grid: [u32; 3],
    env: Vec<Option<Value>>,
    memory: &'a mut Memory,
}

fn err<T>(message: String) -> Result<T, ExecError> {
    Err(ExecError::new(message))
}

fn pointee(ty: &TensorType) -> Result<Dtype, ExecError> {
    match ty.elem.element_ty() {
        Some(elem) => Ok(elem.clone()),
        None => err(format!("expected a pointer, got {}", ty)),
    }
}

/// Row-major strides of `shape`.
fn strides_of(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

fn unravel(mut linear: u64, shape: &[u64]) -> Vec<u64> {
    let mut idx = vec![0u64; shape.len()];
    for d in (0..shape.len()).rev() {
        idx[d] = linear % shape[d];
        linear /= shape[d];
    }
    idx
}

impl Program<'_> {
    fn get(&self, v: ValueId) -> Result<&Value, ExecError> {
        match self.env.get(v.index()).and_then(|x| x.as_ref()) {
            Some(value) => Ok(value),
            None => err(format!("{} used before definition", v)),
        }
    }

    fn cells(&self, v: ValueId) -> Result<&[Cell], ExecError> {
        match self.get(v)? {
            Value::Block { cells, .. } => Ok(cells),
            Value::BlockPtr(_) => err(format!("{} is a block pointer", v)),
        }
    }

    fn block_ptr(&self, v: ValueId) -> Result<&BlockPtrValue, ExecError> {
        match self.get(v)? {
            Value::BlockPtr(bp) => Ok(bp),
            Value::Block { .. } => err(format!("{} is not a block pointer", v)),
        }
    }

    fn scalar_int(&self, v: ValueId) -> Result<i64, ExecError> {
        let cells = self.cells(v)?;
        match cells.first() {
            Some(c) if cells.len() == 1 => Ok(c.as_int()),
            _ => err(format!("{} is not a scalar", v)),
        }
    }

    fn ty(&self, v: ValueId) -> &TensorType {
        self.kernel.type_of(v)
    }

    fn set(&mut self, v: ValueId, value: Value) {
        self.env[v.index()] = Some(value);
    }

    fn run(&mut self, body: &[Instr]) -> Result<(), ExecError> {
        for instr in body {
            self.step(instr)?;
        }
        Ok(())
    }

    fn step(&mut self, instr: &Instr) -> Result<(), ExecError> {
        let result = match &instr.op {
            Op::Store { ptr, value, mask } => return self.store(*ptr, *value, *mask),
            Op::StoreBlock {
                ptr,
                value,
                boundary_check,
            } => return self.store_block(*ptr, *value, boundary_check),
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
                return self.for_loop(
                    [*lower, *upper, *step],
                    init,
                    *iv,
                    args,
                    body,
                    yields,
                    results,
                )
            }
            _ => match instr.result {
                Some(v) => v,
                None => return err(format!("{:?} defines no value", instr.op)),
            },
        };
        let ty = self.ty(result).clone();
        let value = self.eval(&instr.op, &ty)?;
        trace!("pid {:?}: {} = {:?}", self.pid, result, value);
        self.set(result, value);
        Ok(())
    }

    fn eval(&mut self, op: &Op, ty: &TensorType) -> Result<Value, ExecError> {
        let shape = ty.shape.clone();
        let value = match op {
            Op::Const(lit) => {
                let cell = match *lit {
                    Literal::Int(v) => convert(Cell::Int(v), &Dtype::I64, &ty.elem),
                    Literal::Float(x) => convert(Cell::Float(x), &Dtype::F64, &ty.elem),
                    Literal::Bool(b) => Cell::from_bool(b),
                };
                Value::block(shape.clone(), vec![cell; ty.numel() as usize])
            }
            Op::Param(i) => {
                let cell = match self.args.get(*i as usize) {
                    Some(Arg::Ptr(p)) => Cell::Ptr(*p),
                    Some(Arg::Int(v)) => convert(Cell::Int(*v), &Dtype::I64, &ty.elem),
                    Some(Arg::Float(x)) => convert(Cell::Float(*x), &Dtype::F64, &ty.elem),
                    None => return err(format!("missing argument {}", i)),
                };
                Value::scalar(cell)
            }
            Op::ProgramId(axis) => Value::scalar(Cell::Int(i64::from(self.pid[*axis as usize]))),
            Op::NumPrograms(axis) => {
                Value::scalar(Cell::Int(i64::from(self.grid[*axis as usize])))
            }
            Op::MakeRange { start, end } => {
                Value::block(shape, (*start..*end).map(Cell::Int).collect())
            }
            Op::Splat(src) => {
                let cell = self.cells(*src)?[0];
                Value::block(shape, vec![cell; ty.numel() as usize])
            }
            Op::Broadcast(src) => self.broadcast(*src, &shape)?,
            Op::ExpandDims { src, .. } => Value::block(shape, self.cells(*src)?.to_vec()),
            Op::Trans(src) => {
                let (rows, cols) = (shape[1] as usize, shape[0] as usize);
                let cells = self.cells(*src)?;
                let mut out = Vec::with_capacity(cells.len());
                for c in 0..cols {
                    for r in 0..rows {
                        out.push(cells[r * cols + c]);
                    }
                }
                Value::block(shape, out)
            }
            Op::Cat { lhs, rhs } => {
                let mut cells = self.cells(*lhs)?.to_vec();
                cells.extend_from_slice(self.cells(*rhs)?);
                Value::block(shape, cells)
            }
            Op::Cast(src) => {
                let from = self.ty(*src).elem.clone();
                let cells = self.cells(*src)?;
                Value::block(shape, cells.iter().map(|c| convert(*c, &from, &ty.elem)).collect())
            }
            Op::Bitcast(src) => {
                let from = self.ty(*src).elem.clone();
                let cells = self.cells(*src)?;
                Value::block(
                    shape,
                    cells.iter().map(|c| reinterpret(*c, &from, &ty.elem)).collect(),
                )
            }
            Op::Binary { op, lhs, rhs } => self.binary(*op, *lhs, *rhs, ty)?,
            Op::Cmp { pred, lhs, rhs } => {
                let dtype = self.ty(*lhs).elem.clone();
                let (a, b) = (self.cells(*lhs)?, self.cells(*rhs)?);
                let cells = a
                    .iter()
                    .zip(b.iter())
                    .map(|(x, y)| Cell::from_bool(compare(*pred, &dtype, x, y)))
                    .collect();
                Value::block(shape, cells)
            }
            Op::Select { cond, lhs, rhs } => {
                let (c, a, b) = (self.cells(*cond)?, self.cells(*lhs)?, self.cells(*rhs)?);
                let cells = c
                    .iter()
                    .zip(a.iter().zip(b.iter()))
                    .map(|(c, (a, b))| if c.is_true() { *a } else { *b })
                    .collect();
                Value::block(shape, cells)
            }
            Op::Dot { a, b, acc } => self.dot(*a, *b, *acc, ty)?,
            Op::Reduce { kind, src, axis } => self.reduce(*kind, *src, *axis, ty)?,
            Op::Load { ptr, mask, other } => self.load(*ptr, *mask, *other, ty)?,
            Op::AtomicRmw { op, ptr, val, mask } => self.atomic_rmw(*op, *ptr, *val, *mask, ty)?,
            Op::AtomicCas { ptr, cmp, val } => self.atomic_cas(*ptr, *cmp, *val, ty)?,
            Op::MakeBlockPtr {
                base,
                shape: dims,
                strides,
                offsets,
                ..
            } => {
                let block_shape = match &ty.elem {
                    Dtype::BlockPtr(_, block) => block.clone(),
                    other => return err(format!("make_block_ptr typed as {}", other)),
                };
                let ints = |ids: &[ValueId]| -> Result<Vec<i64>, ExecError> {
                    ids.iter().map(|&v| self.scalar_int(v)).collect()
                };
                Value::BlockPtr(BlockPtrValue {
                    base: self.cells(*base)?[0].as_ptr(),
                    elem: pointee(ty)?,
                    shape: ints(dims)?,
                    strides: ints(strides)?,
                    offsets: ints(offsets)?,
                    block_shape,
                })
            }
            Op::Advance { ptr, deltas } => {
                let mut bp = self.block_ptr(*ptr)?.clone();
                for (o, &d) in bp.offsets.iter_mut().zip(deltas.iter()) {
                    *o += self.scalar_int(d)?;
                }
                Value::BlockPtr(bp)
            }
            Op::LoadBlock {
                ptr,
                boundary_check,
                padding,
            } => self.load_block(*ptr, boundary_check, *padding)?,
            Op::Store { .. } | Op::StoreBlock { .. } | Op::For { .. } => {
                return err(format!("{:?} is not a value", op))
            }
        };
        Ok(value)
    }

    fn broadcast(&self, src: ValueId, shape: &[u64]) -> Result<Value, ExecError> {
        let src_shape = self.ty(src).shape.clone();
        let cells = self.cells(src)?;
        let src_strides = strides_of(&src_shape);
        let numel: u64 = shape.iter().product();
        let out = (0..numel)
            .map(|i| {
                let idx = unravel(i, shape);
                let at: u64 = idx
                    .iter()
                    .zip(src_shape.iter().zip(src_strides.iter()))
                    .map(|(&i, (&d, &s))| if d == 1 { 0 } else { i * s })
                    .sum();
                cells[at as usize]
            })
            .collect();
        Ok(Value::block(shape.to_vec(), out))
    }

    fn binary(&self, op: BinOp, lhs: ValueId, rhs: ValueId, ty: &TensorType) -> Result<Value, ExecError> {
        let dtype = self.ty(lhs).elem.clone();
        let offset_dtype = self.ty(rhs).elem.clone();
        let (a, b) = (self.cells(lhs)?, self.cells(rhs)?);
        let mut out = Vec::with_capacity(a.len());
        for (x, y) in a.iter().zip(b.iter()) {
            let cell = if op == BinOp::AddPtr {
                let elem = pointee(self.ty(lhs))?;
                let off = convert(*y, &offset_dtype, &Dtype::I64).as_int();
                let bytes = off.wrapping_mul(elem.byte_size() as i64);
                Cell::Ptr(x.as_ptr().wrapping_add(bytes as u64))
            } else if dtype.is_floating() {
                Cell::Float(round_to(&ty.elem, float_binary(op, x.as_float(), y.as_float())))
            } else {
                Cell::Int(int_binary(op, &dtype, x.as_int(), y.as_int())?)
            };
            out.push(cell);
        }
        Ok(Value::block(ty.shape.clone(), out))
    }

    fn dot(&self, a: ValueId, b: ValueId, acc: Option<ValueId>, ty: &TensorType) -> Result<Value, ExecError> {
        let (m, k) = (self.ty(a).shape[0] as usize, self.ty(a).shape[1] as usize);
        let n = self.ty(b).shape[1] as usize;
        let (av, bv) = (self.cells(a)?, self.cells(b)?);
        let init = match acc {
            Some(c) => self.cells(c)?.to_vec(),
            None => vec![Cell::zero(&ty.elem); m * n],
        };
        let mut out = Vec::with_capacity(m * n);
        for i in 0..m {
            for j in 0..n {
                let cell = if ty.elem.is_floating() {
                    let sum: f64 = (0..k)
                        .map(|p| av[i * k + p].as_float() * bv[p * n + j].as_float())
                        .sum();
                    Cell::Float(round_to(&ty.elem, init[i * n + j].as_float() + sum))
                } else {
                    let sum: i128 = (0..k)
                        .map(|p| i128::from(av[i * k + p].as_int()) * i128::from(bv[p * n + j].as_int()))
                        .sum();
                    Cell::Int(ty.elem.wrap_int(i128::from(init[i * n + j].as_int()) + sum))
                };
                out.push(cell);
            }
        }
        Ok(Value::block(ty.shape.clone(), out))
    }

    fn reduce(&self, kind: ReduceKind, src: ValueId, axis: u32, ty: &TensorType) -> Result<Value, ExecError> {
        let src_shape = self.ty(src).shape.clone();
        let dtype = self.ty(src).elem.clone();
        let cells = self.cells(src)?;
        let axis = axis as usize;
        let extent = src_shape[axis];
        let strides = strides_of(&src_shape);
        let numel: u64 = ty.shape.iter().product();

        let mut out = Vec::with_capacity(numel as usize);
        for i in 0..numel {
            let mut idx = unravel(i, &ty.shape);
            idx.insert(axis, 0);
            let base: u64 = idx.iter().zip(strides.iter()).map(|(i, s)| i * s).sum();
            let lane = (0..extent).map(|j| cells[(base + j * strides[axis]) as usize]);
            let cell = if dtype.is_floating() {
                let xs = lane.map(|c| c.as_float());
                let r = match kind {
                    ReduceKind::Sum => xs.sum(),
                    ReduceKind::Max => xs.fold(f64::NEG_INFINITY, f64::max),
                    ReduceKind::Min => xs.fold(f64::INFINITY, f64::min),
                };
                Cell::Float(round_to(&dtype, r))
            } else {
                let mut acc: Option<i64> = None;
                for c in lane {
                    let v = c.as_int();
                    acc = Some(match (acc, kind) {
                        (None, _) => v,
                        (Some(a), ReduceKind::Sum) => dtype.wrap_int(i128::from(a) + i128::from(v)),
                        (Some(a), ReduceKind::Max) => int_binary(BinOp::Max, &dtype, a, v)?,
                        (Some(a), ReduceKind::Min) => int_binary(BinOp::Min, &dtype, a, v)?,
                    });
                }
                Cell::Int(acc.unwrap_or(0))
            };
            out.push(cell);
        }
        Ok(Value::block(ty.shape.clone(), out))
    }

    // ── Memory ────────────────────────────────────────────────────

    fn load(
        &self,
        ptr: ValueId,
        mask: Option<ValueId>,
        other: Option<ValueId>,
        ty: &TensorType,
    ) -> Result<Value, ExecError> {
        let elem = pointee(self.ty(ptr))?;
        let ptrs = self.cells(ptr)?;
        let mask = mask.map(|m| self.cells(m)).transpose()?;
        let other = other.map(|o| self.cells(o)).transpose()?;
        let mut out = Vec::with_capacity(ptrs.len());
        for (i, p) in ptrs.iter().enumerate() {
            let active = mask.map_or(true, |m| m[i].is_true());
            let cell = if active {
                self.memory.read(p.as_ptr(), &elem)?
            } else {
                other.map_or(Cell::zero(&elem), |o| o[i])
            };
            out.push(cell);
        }
        Ok(Value::block(ty.shape.clone(), out))
    }

    fn store(&mut self, ptr: ValueId, value: ValueId, mask: Option<ValueId>) -> Result<(), ExecError> {
        let elem = pointee(self.ty(ptr))?;
        let ptrs = self.cells(ptr)?.to_vec();
        let values = self.cells(value)?.to_vec();
        let mask = mask.map(|m| self.cells(m).map(|c| c.to_vec())).transpose()?;
        for (i, p) in ptrs.iter().enumerate() {
            if mask.as_ref().map_or(true, |m| m[i].is_true()) {
                self.memory.write(p.as_ptr(), &elem, values[i])?;
            }
        }
        Ok(())
    }

    fn atomic_rmw(
        &mut self,
        op: RmwOp,
        ptr: ValueId,
        val: ValueId,
        mask: ValueId,
        ty: &TensorType,
    ) -> Result<Value, ExecError> {
        let elem = pointee(self.ty(ptr))?;
        let ptrs = self.cells(ptr)?.to_vec();
        let vals = self.cells(val)?.to_vec();
        let mask = self.cells(mask)?.to_vec();
        let mut out = Vec::with_capacity(ptrs.len());
        for i in 0..ptrs.len() {
            if !mask[i].is_true() {
                out.push(Cell::zero(&elem));
                continue;
            }
            let addr = ptrs[i].as_ptr();
            let old = self.memory.read(addr, &elem)?;
            let new = rmw(op, &elem, old, vals[i]);
            self.memory.write(addr, &elem, new)?;
            out.push(old);
        }
        Ok(Value::block(ty.shape.clone(), out))
    }

    fn atomic_cas(&mut self, ptr: ValueId, cmp: ValueId, val: ValueId, ty: &TensorType) -> Result<Value, ExecError> {
        let elem = pointee(self.ty(ptr))?;
        let ptrs = self.cells(ptr)?.to_vec();
        let cmps = self.cells(cmp)?.to_vec();
        let vals = self.cells(val)?.to_vec();
        let mut out = Vec::with_capacity(ptrs.len());
        for i in 0..ptrs.len() {
            let addr = ptrs[i].as_ptr();
            let old = self.memory.read(addr, &elem)?;
            let same = encoding::to_bits(&elem, &old) == encoding::to_bits(&elem, &cmps[i]);
            if same {
                self.memory.write(addr, &elem, vals[i])?;
            }
            out.push(old);
        }
        Ok(Value::block(ty.shape.clone(), out))
    }

    fn load_block(&self, ptr: ValueId, dims: &[u32], padding: Padding) -> Result<Value, ExecError> {
        let bp = self.block_ptr(ptr)?;
        let fill = match padding {
            Padding::Zero => Cell::zero(&bp.elem),
            Padding::Nan => Cell::Float(f64::NAN),
        };
        let mut out = Vec::with_capacity(bp.numel());
        for i in 0..bp.numel() {
            let coords = bp.coords(i);
            let cell = if bp.in_bounds(&coords, dims) {
                self.memory.read(bp.address(&coords), &bp.elem)?
            } else {
                fill
            };
            out.push(cell);
        }
        Ok(Value::block(bp.block_shape.clone(), out))
    }

    fn store_block(&mut self, ptr: ValueId, value: ValueId, dims: &[u32]) -> Result<(), ExecError> {
        let bp = self.block_ptr(ptr)?.clone();
        let values = self.cells(value)?.to_vec();
        for (i, cell) in values.iter().enumerate().take(bp.numel()) {
            let coords = bp.coords(i);
            if bp.in_bounds(&coords, dims) {
                self.memory.write(bp.address(&coords), &bp.elem, *cell)?;
            }
        }
        Ok(())
    }

    // ── Structure ─────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn for_loop(
        &mut self,
        bounds: [ValueId; 3],
        init: &[ValueId],
        iv: ValueId,
        args: &[ValueId],
        body: &[Instr],
        yields: &[ValueId],
        results: &[ValueId],
    ) -> Result<(), ExecError> {
        let lower = self.scalar_int(bounds[0])?;
        let upper = self.scalar_int(bounds[1])?;
        let step = self.scalar_int(bounds[2])?;
        if step == 0 {
            return err("loop step is zero".to_string());
        }
        let mut carried: Vec<Value> = init
            .iter()
            .map(|&v| self.get(v).cloned())
            .collect::<Result<_, _>>()?;
        let mut i = lower;
        while (step > 0 && i < upper) || (step < 0 && i > upper) {
            self.set(iv, Value::scalar(Cell::Int(i)));
            for (&a, v) in args.iter().zip(carried.drain(..)) {
                self.set(a, v);
            }
            self.run(body)?;
            carried = yields
                .iter()
                .map(|&v| self.get(v).cloned())
                .collect::<Result<_, _>>()?;
            i += step;
        }
        for (&r, v) in results.iter().zip(carried) {
            self.set(r, v);
        }
        Ok(())
    }
}

fn round_to(dtype: &Dtype, x: f64) -> f64 {
    encoding::round_float(dtype, x)
}

fn float_binary(op: BinOp, x: f64, y: f64) -> f64 {
    match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div | BinOp::FDiv => x / y,
        BinOp::Rem => x % y,
        BinOp::Min => x.min(y),
        BinOp::Max => x.max(y),
        // Bitwise ops and pointer offsets never reach float lanes.
        BinOp::And | BinOp::Or | BinOp::Xor | BinOp::AddPtr => f64::NAN,
    }
}

fn int_binary(op: BinOp, dtype: &Dtype, x: i64, y: i64) -> Result<i64, ExecError> {
    let unsigned = dtype.is_int_unsigned();
    let (a, b) = if unsigned {
        (i128::from(as_unsigned(dtype, x)), i128::from(as_unsigned(dtype, y)))
    } else {
        (i128::from(x), i128::from(y))
    };
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::FDiv | BinOp::Rem if b == 0 => {
            return err("integer division by zero".to_string())
        }
        BinOp::Div | BinOp::FDiv => a / b,
        BinOp::Rem => a % b,
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Min => a.min(b),
        BinOp::Max => a.max(b),
        BinOp::AddPtr => return err("addptr on integer operands".to_string()),
    };
    Ok(dtype.wrap_int(v))
}

fn compare(pred: CmpPred, dtype: &Dtype, x: &Cell, y: &Cell) -> bool {
    use std::cmp::Ordering;
    let ord = if dtype.is_floating() {
        x.as_float().partial_cmp(&y.as_float())
    } else if dtype.is_ptr() {
        Some(x.as_ptr().cmp(&y.as_ptr()))
    } else if dtype.is_int_unsigned() {
        Some(as_unsigned(dtype, x.as_int()).cmp(&as_unsigned(dtype, y.as_int())))
    } else {
        Some(x.as_int().cmp(&y.as_int()))
    };
    match (pred, ord) {
        // Unordered (NaN) compares false except for `ne`.
        (CmpPred::Ne, None) => true,
        (_, None) => false,
        (CmpPred::Eq, Some(o)) => o == Ordering::Equal,
        (CmpPred::Ne, Some(o)) => o != Ordering::Equal,
        (CmpPred::Lt, Some(o)) => o == Ordering::Less,
        (CmpPred::Le, Some(o)) => o != Ordering::Greater,
        (CmpPred::Gt, Some(o)) => o == Ordering::Greater,
        (CmpPred::Ge, Some(o)) => o != Ordering::Less,
    }
}

/// New memory contents for one RMW lane.
fn rmw(op: RmwOp, elem: &Dtype, old: Cell, val: Cell) -> Cell {
    match op {
        RmwOp::Xchg => val,
        RmwOp::FAdd => Cell::Float(round_to(elem, old.as_float() + val.as_float())),
        RmwOp::Add => Cell::Int(elem.wrap_int(i128::from(old.as_int()) + i128::from(val.as_int()))),
        RmwOp::And => Cell::Int(old.as_int() & val.as_int()),
        RmwOp::Or => Cell::Int(old.as_int() | val.as_int()),
        RmwOp::Xor => Cell::Int(elem.wrap_int(i128::from(old.as_int() ^ val.as_int()))),
        RmwOp::Max => Cell::Int(old.as_int().max(val.as_int())),
        RmwOp::Min => Cell::Int(old.as_int().min(val.as_int())),
        RmwOp::UMax | RmwOp::UMin => {
            let (a, b) = (as_unsigned(elem, old.as_int()), as_unsigned(elem, val.as_int()));
            let pick = if op == RmwOp::UMax { a.max(b) } else { a.min(b) };
            Cell::Int(elem.wrap_int(i128::from(pick)))
        }
    }
}
