//! Tiled matrix multiplication with grouped program ordering.

use log::debug;

use crate::config::target::TargetConfig;
use crate::constexpr::{is_power_of_two, ConstEnv, Constexpr};
use crate::diagnostic::Diagnostic;
use crate::ir::{Kernel, Padding};
use crate::lang::{KernelBuilder, Operand, MIN_DOT_DIM};
use crate::types::Dtype;

/// Meta-parameters of the matmul kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct MatmulConfig {
    pub block_m: i64,
    pub block_n: i64,
    pub block_k: i64,
    pub group_size_m: i64,
    /// Input element dtype of A and B.
    pub dtype: Dtype,
    /// Element dtype of C.
    pub out_dtype: Dtype,
    /// A is stored K-major (column-major for its logical `[M, K]` view).
    pub trans_a: bool,
    /// B is stored N-major.
    pub trans_b: bool,
}

impl Default for MatmulConfig {
    fn default() -> Self {
        Self {
            block_m: 64,
            block_n: 64,
            block_k: 32,
            group_size_m: 8,
            dtype: Dtype::F16,
            out_dtype: Dtype::F16,
            trans_a: false,
            trans_b: false,
        }
    }
}

impl MatmulConfig {
    /// Read `BLOCK_M`, `BLOCK_N`, `BLOCK_K`, `GROUP_SIZE_M` and `DTYPE`, plus
    /// the optional `OUT_DTYPE` (defaults to `DTYPE`, or `i32` for `i8`),
    /// `TRANS_A` and `TRANS_B`.
    pub fn from_env(env: &ConstEnv) -> Result<Self, Diagnostic> {
        let dtype = env.dtype("DTYPE")?;
        let out_dtype = match env.get("OUT_DTYPE") {
            Some(_) => env.dtype("OUT_DTYPE")?,
            None if dtype == Dtype::I8 => Dtype::I32,
            None => dtype.clone(),
        };
        let config = Self {
            block_m: env.int("BLOCK_M")?,
            block_n: env.int("BLOCK_N")?,
            block_k: env.int("BLOCK_K")?,
            group_size_m: env.int("GROUP_SIZE_M")?,
            dtype,
            out_dtype,
            trans_a: env.bool_or("TRANS_A", false)?,
            trans_b: env.bool_or("TRANS_B", false)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Diagnostic> {
        for (name, v) in [
            ("BLOCK_M", self.block_m),
            ("BLOCK_N", self.block_n),
            ("BLOCK_K", self.block_k),
        ] {
            if !is_power_of_two(v) || (v as u64) < MIN_DOT_DIM {
                return Err(Diagnostic::value_error(format!(
                    "{} must be a power of two >= {}, got {}",
                    name, MIN_DOT_DIM, v
                )));
            }
        }
        if self.group_size_m <= 0 {
            return Err(Diagnostic::value_error(format!(
                "GROUP_SIZE_M must be positive, got {}",
                self.group_size_m
            )));
        }
        Ok(())
    }

    /// Accumulator dtype `dot` produces for the inputs.
    pub fn acc_dtype(&self) -> Dtype {
        if self.dtype == Dtype::I8 {
            Dtype::I32
        } else {
            Dtype::F32
        }
    }
}

/// Dimension order hint, fastest-varying first.
fn order(transposed: bool) -> [Constexpr; 2] {
    if transposed {
        [Constexpr::Int(0), Constexpr::Int(1)]
    } else {
        [Constexpr::Int(1), Constexpr::Int(0)]
    }
}

/// `C = A @ B` with `A: [M, K]`, `B: [K, N]`, `C: [M, N]`.
///
/// Parameters, in order: `a_ptr`, `b_ptr`, `c_ptr`, `M`, `N`, `K`, then the
/// element strides `stride_am`, `stride_ak`, `stride_bk`, `stride_bn`,
/// `stride_cm`, `stride_cn` (all `i32`). Launch `cdiv(M, BLOCK_M) *
/// cdiv(N, BLOCK_N)` programs along axis 0.
pub fn matmul(config: &MatmulConfig, target: TargetConfig) -> Result<Kernel, Diagnostic> {
    config.validate()?;
    debug!("lowering matmul with {:?}", config);
    let mut kb = KernelBuilder::new("matmul", target);

    let a_ptr = kb.param_ptr("a_ptr", config.dtype.clone());
    let b_ptr = kb.param_ptr("b_ptr", config.dtype.clone());
    let c_ptr = kb.param_ptr("c_ptr", config.out_dtype.clone());
    let [m, n, k] = ["M", "N", "K"].map(|name| kb.param(name, Dtype::I32));
    let [stride_am, stride_ak, stride_bk, stride_bn, stride_cm, stride_cn] = [
        "stride_am",
        "stride_ak",
        "stride_bk",
        "stride_bn",
        "stride_cm",
        "stride_cn",
    ]
    .map(|name| kb.param(name, Dtype::I32));

    let pid = kb.program_id(0)?;
    let block_m = kb.int_const(config.block_m, Dtype::I32);
    let block_n = kb.int_const(config.block_n, Dtype::I32);
    let num_pid_m = kb.cdiv(&m, &block_m)?;
    let num_pid_n = kb.cdiv(&n, &block_n)?;
    let (pid_m, pid_n) = kb.swizzle_tile(&pid, &num_pid_m, &num_pid_n, config.group_size_m)?;
    let off_m = kb.mul(&pid_m, &block_m)?;
    let off_n = kb.mul(&pid_n, &block_n)?;

    let tile = |a: i64, b: i64| [Constexpr::Int(a), Constexpr::Int(b)];
    let a_bp = kb.make_block_ptr(
        &a_ptr,
        &[Operand::from(&m), Operand::from(&k)],
        &[Operand::from(&stride_am), Operand::from(&stride_ak)],
        &[Operand::from(&off_m), Operand::from(0)],
        &tile(config.block_m, config.block_k),
        &order(config.trans_a),
    )?;
    let b_bp = kb.make_block_ptr(
        &b_ptr,
        &[Operand::from(&k), Operand::from(&n)],
        &[Operand::from(&stride_bk), Operand::from(&stride_bn)],
        &[Operand::from(0), Operand::from(&off_n)],
        &tile(config.block_k, config.block_n),
        &order(config.trans_b),
    )?;

    let acc = kb.zeros(&tile(config.block_m, config.block_n), config.acc_dtype())?;
    let init = [acc, a_bp.tensor().clone(), b_bp.tensor().clone()];
    let block_k = config.block_k;
    let carried = kb.for_range(0, &k, block_k, &init, |kb, _k, carried| {
        let mut carried = carried.into_iter();
        let (Some(acc), Some(a_handle), Some(b_handle)) =
            (carried.next(), carried.next(), carried.next())
        else {
            return Err(Diagnostic::value_error(
                "matmul loop carries three values".to_string(),
            ));
        };
        let a = a_bp.rebind(a_handle)?;
        let b = b_bp.rebind(b_handle)?;
        let a_tile = kb.load_block(&a, &[0, 1], Padding::Zero)?;
        let b_tile = kb.load_block(&b, &[0, 1], Padding::Zero)?;
        let acc = kb.dot(&a_tile, &b_tile, Some(&acc))?;
        let a = kb.advance(&a, &[Operand::from(0), Operand::from(block_k)])?;
        let b = kb.advance(&b, &[Operand::from(block_k), Operand::from(0)])?;
        Ok(vec![acc, a.tensor().clone(), b.tensor().clone()])
    })?;

    let c = kb.cast(&carried[0], config.out_dtype.clone())?;
    let c_bp = kb.make_block_ptr(
        &c_ptr,
        &[Operand::from(&m), Operand::from(&n)],
        &[Operand::from(&stride_cm), Operand::from(&stride_cn)],
        &[Operand::from(&off_m), Operand::from(&off_n)],
        &tile(config.block_m, config.block_n),
        &order(false),
    )?;
    kb.store_block(&c_bp, &c, &[0, 1])?;
    Ok(kb.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::ErrorKind;
    use crate::ir::Op;

    fn env() -> ConstEnv {
        ConstEnv::new()
            .with("BLOCK_M", 32i64)
            .with("BLOCK_N", 32i64)
            .with("BLOCK_K", 16i64)
            .with("GROUP_SIZE_M", 4i64)
            .with("DTYPE", Dtype::F16)
    }

    #[test]
    fn test_config_from_env() {
        let config = MatmulConfig::from_env(&env()).unwrap();
        assert_eq!(config.block_k, 16);
        assert_eq!(config.out_dtype, Dtype::F16);
        assert!(!config.trans_a);

        let int8 = MatmulConfig::from_env(&env().with("DTYPE", Dtype::I8)).unwrap();
        assert_eq!(int8.out_dtype, Dtype::I32);
        assert_eq!(int8.acc_dtype(), Dtype::I32);
    }

    #[test]
    fn test_config_rejects_small_blocks() {
        let err = MatmulConfig::from_env(&env().with("BLOCK_K", 8i64)).unwrap_err();
        assert!(err.is(ErrorKind::Value));
        let err = MatmulConfig::from_env(&env().with("BLOCK_M", 48i64)).unwrap_err();
        assert!(err.is(ErrorKind::Value));
    }

    #[test]
    fn test_matmul_structure() {
        let kernel = matmul(&MatmulConfig::from_env(&env()).unwrap(), TargetConfig::cuda()).unwrap();
        assert_eq!(kernel.params.len(), 12);

        let mut dots_in_loop = 0;
        let mut block_stores = 0;
        for instr in &kernel.body {
            match &instr.op {
                Op::For { body, init, .. } => {
                    assert_eq!(init.len(), 3);
                    dots_in_loop += body.iter().filter(|i| matches!(i.op, Op::Dot { .. })).count();
                    let advances = body.iter().filter(|i| matches!(i.op, Op::Advance { .. })).count();
                    assert_eq!(advances, 2);
                }
                Op::StoreBlock { boundary_check, .. } => {
                    assert_eq!(boundary_check, &vec![0, 1]);
                    block_stores += 1;
                }
                _ => {}
            }
        }
        assert_eq!(dots_in_loop, 1);
        assert_eq!(block_stores, 1);
    }

    #[test]
    fn test_transposed_order_hint() {
        let config = MatmulConfig {
            trans_a: true,
            block_m: 16,
            block_n: 16,
            block_k: 16,
            ..MatmulConfig::default()
        };
        let kernel = matmul(&config, TargetConfig::cuda()).unwrap();
        let orders: Vec<Vec<u32>> = kernel
            .body
            .iter()
            .filter_map(|i| match &i.op {
                Op::MakeBlockPtr { order, .. } => Some(order.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(orders, vec![vec![0, 1], vec![1, 0], vec![1, 0]]);
    }
}
