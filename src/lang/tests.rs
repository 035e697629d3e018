use super::*;
use crate::constexpr::Constexpr;
use crate::diagnostic::ErrorKind;
use crate::ir::{Op, Padding, RmwOp};

fn builder() -> KernelBuilder {
    KernelBuilder::new("test", TargetConfig::cuda())
}

fn block(kb: &mut KernelBuilder, dtype: Dtype, n: u64) -> Tensor {
    let x = kb.arange(0, n as i64).unwrap();
    kb.cast(&x, dtype).unwrap()
}

fn rmw_ops(kernel: &Kernel) -> Vec<RmwOp> {
    let mut ops = Vec::new();
    kernel.walk(&mut |instr| {
        if let Op::AtomicRmw { op, .. } = instr.op {
            ops.push(op);
        }
    });
    ops
}

fn ints(v: &[i64]) -> Vec<Constexpr> {
    v.iter().map(|&x| Constexpr::Int(x)).collect()
}

// ─── Broadcast and cast ───────────────────────────────────────────

#[test]
fn test_reconcile_is_symmetric() {
    let mut kb = builder();
    let a = block(&mut kb, Dtype::I32, 8);
    let s = kb.float_const(1.5, Dtype::F32);

    let (x, y) = kb.reconcile(&a, &s).unwrap();
    let (p, q) = kb.reconcile(&s, &a).unwrap();
    for t in [&x, &y, &p, &q] {
        assert_eq!(t.dtype(), &Dtype::F32);
        assert_eq!(t.shape(), &[8]);
    }
}

#[test]
fn test_reconcile_raises_rank() {
    let mut kb = builder();
    let row = block(&mut kb, Dtype::I32, 16);
    let col = kb.expand_dims(&row, 1).unwrap();
    let (a, b) = kb.reconcile(&row, &col).unwrap();
    assert_eq!(a.shape(), &[16, 16]);
    assert_eq!(b.shape(), &[16, 16]);
}

#[test]
fn test_reconcile_error_kinds() {
    let mut kb = builder();
    let a = block(&mut kb, Dtype::I32, 4);
    let b = block(&mut kb, Dtype::I32, 8);
    let err = kb.reconcile(&a, &b).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Shape);

    let u = block(&mut kb, Dtype::U32, 4);
    let err = kb.reconcile(&a, &u).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.help.is_some());
}

#[test]
fn test_failed_builtin_emits_nothing() {
    let mut kb = builder();
    let a = block(&mut kb, Dtype::I32, 4);
    let b = block(&mut kb, Dtype::F16, 8);
    let before = kb.emitted();
    assert!(kb.add(&a, &b).is_err());
    assert!(kb.where_(&a, &a, &b).is_err());
    assert_eq!(kb.emitted(), before);
}

#[test]
fn test_broadcast_to_is_one_sided() {
    let mut kb = builder();
    let a = block(&mut kb, Dtype::F32, 4);
    let a2 = kb.expand_dims(&a, 0).unwrap();
    let wide = kb.broadcast_to(&a2, &[8, 4]).unwrap();
    assert_eq!(wide.shape(), &[8, 4]);
    let err = kb.broadcast_to(&wide, &[4]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Shape);
}

#[test]
fn test_cast_and_bitcast() {
    let mut kb = builder();
    let x = block(&mut kb, Dtype::F32, 4);
    assert_eq!(kb.cast(&x, Dtype::F32).unwrap().id(), x.id());
    assert_eq!(kb.bitcast(&x, Dtype::I32).unwrap().dtype(), &Dtype::I32);
    let err = kb.bitcast(&x, Dtype::I16).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Value);

    let p = kb.param_ptr("p", Dtype::F32);
    let err = kb.cast(&p, Dtype::I64).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert_eq!(kb.cast(&p, Dtype::I32.ptr()).unwrap().dtype(), &Dtype::I32.ptr());
}

// ─── Arithmetic ───────────────────────────────────────────────────

#[test]
fn test_pointer_arithmetic() {
    let mut kb = builder();
    let p = kb.param_ptr("p", Dtype::F16);
    let offs = kb.arange(0, 32).unwrap();
    let ptrs = kb.add(&offs, &p).unwrap();
    assert_eq!(ptrs.dtype(), &Dtype::F16.ptr());
    assert_eq!(ptrs.shape(), &[32]);

    let back = kb.sub(&ptrs, &offs).unwrap();
    assert_eq!(back.dtype(), &Dtype::F16.ptr());

    let f = kb.float_const(1.0, Dtype::F32);
    assert_eq!(kb.add(&p, &f).unwrap_err().kind, ErrorKind::Type);
    assert_eq!(kb.mul(&p, &offs).unwrap_err().kind, ErrorKind::Type);
}

#[test]
fn test_division_kinds() {
    let mut kb = builder();
    let a = block(&mut kb, Dtype::I32, 8);
    let b = kb.int_const(3, Dtype::I32);
    assert_eq!(kb.div(&a, &b).unwrap().dtype(), &Dtype::F32);
    assert_eq!(kb.floordiv(&a, &b).unwrap().dtype(), &Dtype::I32);

    let f = block(&mut kb, Dtype::F32, 8);
    assert_eq!(kb.floordiv(&f, &b).unwrap_err().kind, ErrorKind::Type);
    assert_eq!(kb.and_(&f, &a).unwrap_err().kind, ErrorKind::Type);
}

#[test]
fn test_cdiv_folds() {
    let mut kb = builder();
    let a = kb.int_const(100, Dtype::I32);
    let b = kb.int_const(32, Dtype::I32);
    let c = kb.cdiv(&a, &b).unwrap();
    assert_eq!(kb.const_int_value(&c), Some(4));
}

#[test]
fn test_compare_yields_bool() {
    let mut kb = builder();
    let a = block(&mut kb, Dtype::I32, 8);
    let n = kb.param("n", Dtype::I32);
    let mask = kb.lt(&a, &n).unwrap();
    assert_eq!(mask.dtype(), &Dtype::Int1);
    assert_eq!(mask.shape(), &[8]);

    let f = block(&mut kb, Dtype::F32, 8);
    let err = kb.where_(&f, &a, &a).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

// ─── Shapes and creation ──────────────────────────────────────────

#[test]
fn test_arange_rules() {
    let mut kb = builder();
    assert_eq!(kb.arange(0, 64).unwrap().shape(), &[64]);
    assert_eq!(kb.arange(8, 8).unwrap_err().kind, ErrorKind::Value);
    assert_eq!(kb.arange(0, 48).unwrap_err().kind, ErrorKind::Value);
}

#[test]
fn test_shape_builtins() {
    let mut kb = builder();
    let a = block(&mut kb, Dtype::F32, 16);
    assert_eq!(kb.expand_dims(&a, -1).unwrap().shape(), &[16, 1]);
    assert_eq!(kb.expand_dims(&a, 2).unwrap_err().kind, ErrorKind::Value);

    let z = kb.zeros(&ints(&[16, 32]), Dtype::F32).unwrap();
    assert_eq!(kb.trans(&z).unwrap().shape(), &[32, 16]);
    assert_eq!(kb.trans(&a).unwrap_err().kind, ErrorKind::Value);

    let b = block(&mut kb, Dtype::F32, 16);
    assert_eq!(kb.cat(&a, &b).unwrap().shape(), &[32]);
    let c = block(&mut kb, Dtype::I32, 16);
    assert_eq!(kb.cat(&a, &c).unwrap_err().kind, ErrorKind::Type);
}

#[test]
fn test_full_rejects_bad_fill() {
    let mut kb = builder();
    let err = kb
        .full(&ints(&[4]), Constexpr::Float(0.5), Dtype::I32)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert_eq!(kb.program_id(3).unwrap_err().kind, ErrorKind::Value);
}

#[test]
fn test_block_limit() {
    let mut target = TargetConfig::cuda();
    target.max_tensor_numel = 1024;
    let mut kb = KernelBuilder::new("small", target);
    let err = kb.zeros(&ints(&[64, 32]), Dtype::F32).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Value);
}

#[test]
fn test_block_element_count_overflow() {
    let mut kb = builder();
    let p = kb.param_ptr("p", Dtype::F32);
    let before = kb.emitted();
    let huge = ints(&[1 << 32, 1 << 32]);
    let err = kb.zeros(&huge, Dtype::F32).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Value);
    assert!(err.message.contains("overflows"));

    let two = [Operand::from(8), Operand::from(8)];
    let err = kb
        .make_block_ptr(&p, &two, &two, &two, &huge, &ints(&[1, 0]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Value);
    assert_eq!(kb.emitted(), before);

    let t = TensorType::block(Dtype::F32, vec![1 << 32, 1 << 32]);
    assert_eq!(t.numel(), u64::MAX);
}

// ─── Memory ───────────────────────────────────────────────────────

#[test]
fn test_load_store_checks() {
    let mut kb = builder();
    let p = kb.param_ptr("p", Dtype::F32);
    let offs = kb.arange(0, 16).unwrap();
    let ptrs = kb.add(&p, &offs).unwrap();
    let other = kb.float_const(0.0, Dtype::F32);

    let err = kb.load(&ptrs, None, Some(&other)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Value);

    let x = kb.load(&ptrs, None, None).unwrap();
    assert_eq!(x.dtype(), &Dtype::F32);
    let wide = block(&mut kb, Dtype::F32, 32);
    assert_eq!(kb.store(&ptrs, &wide, None).unwrap_err().kind, ErrorKind::Shape);

    let int_mask = block(&mut kb, Dtype::I32, 16);
    let err = kb.store(&ptrs, &x, Some(&int_mask)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    kb.store(&ptrs, &x, None).unwrap();
}

// ─── Atomics ──────────────────────────────────────────────────────

#[test]
fn test_atomic_opcode_selection() {
    let cases = [
        (AtomicOp::Add, Dtype::F32, RmwOp::FAdd),
        (AtomicOp::Add, Dtype::F16, RmwOp::FAdd),
        (AtomicOp::Add, Dtype::U32, RmwOp::Add),
        (AtomicOp::Max, Dtype::I32, RmwOp::Max),
        (AtomicOp::Max, Dtype::U64, RmwOp::UMax),
        (AtomicOp::Min, Dtype::I64, RmwOp::Min),
        (AtomicOp::Min, Dtype::U32, RmwOp::UMin),
        (AtomicOp::Xchg, Dtype::F64, RmwOp::Xchg),
        (AtomicOp::Xor, Dtype::I32, RmwOp::Xor),
    ];
    for (op, elem, expected) in cases {
        let mut kb = builder();
        let p = kb.param_ptr("p", elem.clone());
        let v = kb.param("v", elem.clone());
        let ret = kb.atomic_rmw(op, &p, &v, None).unwrap();
        assert_eq!(ret.dtype(), &elem);
        assert_eq!(rmw_ops(&kb.finish()), vec![expected], "{:?} on {}", op, elem);
    }
}

#[test]
fn test_float_max_lowering_order() {
    let mut kb = builder();
    let p = kb.param_ptr("p", Dtype::F32);
    let offs = kb.arange(0, 16).unwrap();
    let ptrs = kb.add(&p, &offs).unwrap();
    let v = block(&mut kb, Dtype::F32, 16);
    let ret = kb.atomic_max(&ptrs, &v, None).unwrap();
    assert_eq!(ret.dtype(), &Dtype::I32);
    assert_eq!(ret.shape(), &[16]);

    let kernel = kb.finish();
    assert_eq!(rmw_ops(&kernel), vec![RmwOp::Max, RmwOp::UMin]);

    // bitcasts, both compares, then the two masked RMWs and the select.
    let mut tail = Vec::new();
    kernel.walk(&mut |instr| match &instr.op {
        Op::Bitcast(_) => tail.push("bitcast"),
        Op::Cmp { .. } => tail.push("cmp"),
        Op::AtomicRmw { .. } => tail.push("rmw"),
        Op::Select { .. } => tail.push("select"),
        _ => {}
    });
    assert_eq!(
        tail,
        vec!["bitcast", "bitcast", "cmp", "cmp", "rmw", "rmw", "select"]
    );
}

#[test]
fn test_float_min_pairs_with_umax() {
    let mut kb = builder();
    let p = kb.param_ptr("p", Dtype::F32);
    let v = kb.param("v", Dtype::F32);
    kb.atomic_min(&p, &v, None).unwrap();
    assert_eq!(rmw_ops(&kb.finish()), vec![RmwOp::Min, RmwOp::UMax]);
}

#[test]
fn test_atomic_rejections() {
    let rejected = [
        (AtomicOp::Max, Dtype::F16),
        (AtomicOp::Xchg, Dtype::F16),
        (AtomicOp::Add, Dtype::I8),
        (AtomicOp::Add, Dtype::BF16),
        (AtomicOp::Max, Dtype::F64),
        (AtomicOp::And, Dtype::F32),
    ];
    for (op, elem) in rejected {
        let mut kb = builder();
        let p = kb.param_ptr("p", elem.clone());
        let v = kb.param("v", elem.clone());
        let before = kb.emitted();
        let err = kb.atomic_rmw(op, &p, &v, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type, "{:?} on {}", op, elem);
        assert_eq!(kb.emitted(), before);
        assert!(err.call.as_deref().unwrap_or("").starts_with("atomic_"));
    }
}

#[test]
fn test_atomic_value_must_reach_pointer_shape() {
    let mut kb = builder();
    let p = kb.param_ptr("p", Dtype::I32);
    let v = block(&mut kb, Dtype::I32, 16);
    let err = kb.atomic_add(&p, &v, None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Shape);
}

#[test]
fn test_atomic_cas_widths() {
    let mut kb = builder();
    let p = kb.param_ptr("p", Dtype::I32);
    let c = kb.int_const(0, Dtype::I32);
    let v = kb.int_const(1, Dtype::I32);
    assert_eq!(kb.atomic_cas(&p, &c, &v).unwrap().dtype(), &Dtype::I32);

    let q = kb.param_ptr("q", Dtype::I8);
    assert_eq!(kb.atomic_cas(&q, &c, &v).unwrap_err().kind, ErrorKind::Type);
}

// ─── Block pointers ───────────────────────────────────────────────

fn tile_ptr(kb: &mut KernelBuilder) -> BlockPointer {
    let p = kb.param_ptr("a", Dtype::F16);
    kb.make_block_ptr(
        &p,
        &[Operand::from(100), Operand::from(60)],
        &[Operand::from(60), Operand::from(1)],
        &[Operand::from(0), Operand::from(0)],
        &ints(&[32, 32]),
        &ints(&[1, 0]),
    )
    .unwrap()
}

#[test]
fn test_make_block_ptr_and_advance() {
    let mut kb = builder();
    let bp = tile_ptr(&mut kb);
    assert_eq!(bp.rank(), 2);
    assert_eq!(bp.elem(), &Dtype::F16);
    assert_eq!(bp.offsets(), Some(&[0i64, 0][..]));

    let moved = kb.advance(&bp, &[Operand::from(0), Operand::from(32)]).unwrap();
    assert_eq!(moved.offsets(), Some(&[0i64, 32][..]));
    assert_eq!(bp.offsets(), Some(&[0i64, 0][..]));

    let tile = kb.load_block(&moved, &[0, 1], Padding::Zero).unwrap();
    assert_eq!(tile.ty(), &TensorType::block(Dtype::F16, vec![32, 32]));
}

#[test]
fn test_two_advances_accumulate() {
    let mut kb = builder();
    let p = kb.param_ptr("a", Dtype::F32);
    let bp = kb
        .make_block_ptr(
            &p,
            &[Operand::from(128), Operand::from(64)],
            &[Operand::from(64), Operand::from(1)],
            &[Operand::from(0), Operand::from(0)],
            &ints(&[16, 16]),
            &ints(&[1, 0]),
        )
        .unwrap();
    let step = [Operand::from(0), Operand::from(16)];
    let once = kb.advance(&bp, &step).unwrap();
    let twice = kb.advance(&once, &step).unwrap();
    assert_eq!(twice.offsets(), Some(&[0i64, 32][..]));
    assert_eq!(once.offsets(), Some(&[0i64, 16][..]));
    assert_eq!(twice.block_shape(), &[16, 16][..]);
}

#[test]
fn test_folded_offsets_wrap_like_i32() {
    let mut kb = builder();
    let p = kb.param_ptr("a", Dtype::I32);
    let make = |kb: &mut KernelBuilder, offset: i64| {
        kb.make_block_ptr(
            &p,
            &[Operand::from(16)],
            &[Operand::from(1)],
            &[Operand::from(offset)],
            &ints(&[16]),
            &ints(&[0]),
        )
        .unwrap()
    };

    let bp = make(&mut kb, i64::MAX);
    assert_eq!(bp.offsets(), Some(&[-1i64][..]));
    let moved = kb.advance(&bp, &[Operand::from(1)]).unwrap();
    assert_eq!(moved.offsets(), Some(&[0i64][..]));

    let bp = make(&mut kb, 1 << 32);
    assert_eq!(bp.offsets(), Some(&[0i64][..]));

    let bp = make(&mut kb, i64::from(i32::MAX));
    let moved = kb.advance(&bp, &[Operand::from(1)]).unwrap();
    assert_eq!(moved.offsets(), Some(&[i64::from(i32::MIN)][..]));
}

#[test]
fn test_make_block_ptr_errors() {
    let mut kb = builder();
    let p = kb.param_ptr("a", Dtype::F32);
    let two = [Operand::from(8), Operand::from(8)];

    let err = kb
        .make_block_ptr(&p, &two, &two, &[Operand::from(0)], &ints(&[8, 8]), &ints(&[1, 0]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Shape);

    let err = kb
        .make_block_ptr(&p, &[], &[], &[], &[], &[])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Value);

    let err = kb
        .make_block_ptr(&p, &two, &two, &two, &ints(&[8, 12]), &ints(&[1, 0]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Value);

    let err = kb
        .make_block_ptr(&p, &two, &two, &two, &ints(&[8, 8]), &ints(&[0, 0]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Value);

    let f = kb.float_const(1.0, Dtype::F32);
    let bad = [Operand::from(&f), Operand::from(8)];
    let err = kb
        .make_block_ptr(&p, &bad, &two, &two, &ints(&[8, 8]), &ints(&[1, 0]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_boundary_check_validation() {
    let mut kb = builder();
    let bp = tile_ptr(&mut kb);
    assert_eq!(kb.load_block(&bp, &[2], Padding::Zero).unwrap_err().kind, ErrorKind::Value);
    assert_eq!(kb.load_block(&bp, &[1, 1], Padding::Zero).unwrap_err().kind, ErrorKind::Value);

    let q = kb.param_ptr("q", Dtype::I32);
    let one = [Operand::from(16)];
    let ibp = kb
        .make_block_ptr(&q, &one, &[Operand::from(1)], &[Operand::from(0)], &ints(&[16]), &ints(&[0]))
        .unwrap();
    let err = kb.load_block(&ibp, &[0], Padding::Nan).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_block_ptr_rejected_by_raw_ops() {
    let mut kb = builder();
    let bp = tile_ptr(&mut kb);
    let err = kb.load(bp.tensor(), None, None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.help.is_some());
    let one = kb.int_const(1, Dtype::I32);
    assert_eq!(kb.add(bp.tensor(), &one).unwrap_err().kind, ErrorKind::Type);
}

// ─── Dot, reductions and loops ────────────────────────────────────

#[test]
fn test_dot_rules() {
    let mut kb = builder();
    let a = kb.zeros(&ints(&[32, 16]), Dtype::F16).unwrap();
    let b = kb.zeros(&ints(&[16, 64]), Dtype::F16).unwrap();
    let c = kb.dot(&a, &b, None).unwrap();
    assert_eq!(c.ty(), &TensorType::block(Dtype::F32, vec![32, 64]));

    let acc = kb.zeros(&ints(&[32, 64]), Dtype::F32).unwrap();
    assert!(kb.dot(&a, &b, Some(&acc)).is_ok());

    assert_eq!(kb.dot(&b, &b, None).unwrap_err().kind, ErrorKind::Shape);
    let small = kb.zeros(&ints(&[8, 16]), Dtype::F16).unwrap();
    assert_eq!(kb.dot(&small, &b, None).unwrap_err().kind, ErrorKind::Value);
    let f32b = kb.zeros(&ints(&[16, 64]), Dtype::F32).unwrap();
    assert_eq!(kb.dot(&a, &f32b, None).unwrap_err().kind, ErrorKind::Type);
}

#[test]
fn test_reductions() {
    let mut kb = builder();
    let x = kb.zeros(&ints(&[16, 8]), Dtype::F32).unwrap();
    assert_eq!(kb.sum(&x, 0).unwrap().shape(), &[8]);
    assert_eq!(kb.max(&x, 1).unwrap().shape(), &[16]);
    assert_eq!(kb.min(&x, 2).unwrap_err().kind, ErrorKind::Value);

    let a = block(&mut kb, Dtype::I32, 16);
    let zero = kb.int_const(0, Dtype::I32);
    let flags = kb.gt(&a, &zero).unwrap();
    assert_eq!(kb.sum(&flags, 0).unwrap().dtype(), &Dtype::I32);
}

#[test]
fn test_for_range_carries_values() {
    let mut kb = builder();
    let acc = kb.zeros(&ints(&[16]), Dtype::F32).unwrap();
    let out = kb
        .for_range(0, 8, 1, &[acc.clone()], |kb, iv, carried| {
            let step = kb.cast(&iv, Dtype::F32)?;
            Ok(vec![kb.add(&carried[0], &step)?])
        })
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].ty(), acc.ty());

    let kernel = kb.finish();
    let mut loops = 0;
    kernel.walk(&mut |instr| {
        if let Op::For { body, .. } = &instr.op {
            loops += 1;
            assert!(!body.is_empty());
        }
    });
    assert_eq!(loops, 1);
}

#[test]
fn test_for_range_errors() {
    let mut kb = builder();
    let acc = kb.zeros(&ints(&[16]), Dtype::F32).unwrap();
    let before = kb.emitted();

    let err = kb
        .for_range(0, 8, 0, &[acc.clone()], |_, _, c| Ok(c))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Value);

    let err = kb
        .for_range(0, 8, 1, &[acc.clone()], |kb, _, c| {
            Ok(vec![kb.cast(&c[0], Dtype::F16)?])
        })
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);

    let err = kb
        .for_range(0, 8, 1, &[acc], |_, _, _| Ok(Vec::new()))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert_eq!(kb.emitted(), before);
}

#[test]
fn test_outermost_call_is_reported() {
    let mut kb = builder();
    let a = kb.float_const(7.0, Dtype::F32);
    let b = kb.float_const(2.0, Dtype::F32);
    let err = kb.cdiv(&a, &b).unwrap_err();
    assert_eq!(err.call.as_deref(), Some("cdiv(f32, f32)"));
    assert_eq!(err.notes, vec!["raised by `floordiv(f32, f32)`".to_string()]);
}
