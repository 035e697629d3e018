//! Program-id to output-tile mapping with grouped ordering.
//!
//! Row-major tile numbering walks a full row of N tiles before reusing an
//! A-tile row. Grouping `group_size_m` rows together makes consecutive
//! programs sweep a narrow band instead, so A and B tiles stay cache
//! resident longer. The last group is clamped to the remaining rows.

use rayon::prelude::*;

use crate::diagnostic::Diagnostic;
use crate::lang::{KernelBuilder, Tensor};

/// Map linear program id `pid` to its `(pid_m, pid_n)` tile.
pub fn swizzle_tile(pid: i64, num_pid_m: i64, num_pid_n: i64, group_size_m: i64) -> (i64, i64) {
    let num_pid_in_group = group_size_m * num_pid_n;
    let group_id = pid / num_pid_in_group;
    let first_pid_m = group_id * group_size_m;
    let group_size = (num_pid_m - first_pid_m).min(group_size_m);
    let pid_m = first_pid_m + pid % group_size;
    let pid_n = (pid % num_pid_in_group) / group_size;
    (pid_m, pid_n)
}

/// A 2-D grid of output tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    pub num_pid_m: i64,
    pub num_pid_n: i64,
    pub group_size_m: i64,
}

impl TileGrid {
    pub fn new(num_pid_m: i64, num_pid_n: i64, group_size_m: i64) -> Result<Self, Diagnostic> {
        for (name, v) in [
            ("num_pid_m", num_pid_m),
            ("num_pid_n", num_pid_n),
            ("group_size_m", group_size_m),
        ] {
            if v <= 0 {
                return Err(Diagnostic::value_error(format!(
                    "{} must be positive, got {}",
                    name, v
                )));
            }
        }
        Ok(Self {
            num_pid_m,
            num_pid_n,
            group_size_m,
        })
    }

    /// Number of programs to launch.
    pub fn len(&self) -> i64 {
        self.num_pid_m * self.num_pid_n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tile(&self, pid: i64) -> (i64, i64) {
        swizzle_tile(pid, self.num_pid_m, self.num_pid_n, self.group_size_m)
    }

    /// `(pid, pid_m, pid_n)` for every program, in launch order.
    pub fn tiles(&self) -> Vec<(i64, i64, i64)> {
        (0..self.len())
            .map(|pid| {
                let (m, n) = self.tile(pid);
                (pid, m, n)
            })
            .collect()
    }

    /// Check that programs map one-to-one onto the tile grid.
    pub fn verify_coverage(&self) -> Result<(), Diagnostic> {
        let tiles: Vec<(i64, i64, i64)> = (0..self.len())
            .into_par_iter()
            .map(|pid| {
                let (m, n) = self.tile(pid);
                (pid, m, n)
            })
            .collect();

        let mut seen = vec![None; self.len() as usize];
        for (pid, m, n) in tiles {
            if !(0..self.num_pid_m).contains(&m) || !(0..self.num_pid_n).contains(&n) {
                return Err(Diagnostic::value_error(format!(
                    "pid {} maps to tile ({}, {}) outside the {}x{} grid",
                    pid, m, n, self.num_pid_m, self.num_pid_n
                )));
            }
            let slot = (m * self.num_pid_n + n) as usize;
            if let Some(prev) = seen[slot].replace(pid) {
                return Err(Diagnostic::value_error(format!(
                    "pids {} and {} both map to tile ({}, {})",
                    prev, pid, m, n
                )));
            }
        }
        Ok(())
    }
}

impl KernelBuilder {
    /// Emit the grouped tile mapping for `pid`, returning `(pid_m, pid_n)`.
    pub fn swizzle_tile(
        &mut self,
        pid: &Tensor,
        num_pid_m: &Tensor,
        num_pid_n: &Tensor,
        group_size_m: i64,
    ) -> Result<(Tensor, Tensor), Diagnostic> {
        let call = || {
            format!(
                "swizzle_tile({}, {}, {}, group_size_m={})",
                pid.ty(),
                num_pid_m.ty(),
                num_pid_n.ty(),
                group_size_m
            )
        };
        self.guarded(call, |kb| {
            if group_size_m <= 0 {
                return Err(Diagnostic::value_error(format!(
                    "group_size_m must be positive, got {}",
                    group_size_m
                )));
            }
            let group = kb.int_const(group_size_m, pid.dtype().clone());
            let num_pid_in_group = kb.mul(&group, num_pid_n)?;
            let group_id = kb.floordiv(pid, &num_pid_in_group)?;
            let first_pid_m = kb.mul(&group_id, &group)?;
            let remaining = kb.sub(num_pid_m, &first_pid_m)?;
            let group_size = kb.minimum(&remaining, &group)?;
            let in_group = kb.rem(pid, &group_size)?;
            let pid_m = kb.add(&first_pid_m, &in_group)?;
            let within = kb.rem(pid, &num_pid_in_group)?;
            let pid_n = kb.floordiv(&within, &group_size)?;
            Ok((pid_m, pid_n))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::target::TargetConfig;
    use crate::types::Dtype;

    #[test]
    fn test_seven_by_five_group_three_is_bijective() {
        let grid = TileGrid::new(7, 5, 3).unwrap();
        assert_eq!(grid.len(), 35);
        grid.verify_coverage().unwrap();

        let mut tiles: Vec<(i64, i64)> = grid.tiles().iter().map(|&(_, m, n)| (m, n)).collect();
        tiles.sort();
        tiles.dedup();
        assert_eq!(tiles.len(), 35);
    }

    #[test]
    fn test_group_reuses_row_band() {
        // The first group covers rows 0..3; pids walk down the band first.
        assert_eq!(swizzle_tile(0, 7, 5, 3), (0, 0));
        assert_eq!(swizzle_tile(1, 7, 5, 3), (1, 0));
        assert_eq!(swizzle_tile(2, 7, 5, 3), (2, 0));
        assert_eq!(swizzle_tile(3, 7, 5, 3), (0, 1));
        assert_eq!(swizzle_tile(14, 7, 5, 3), (2, 4));
    }

    #[test]
    fn test_edge_group_is_clamped() {
        // Rows 6.. form a group of one.
        assert_eq!(swizzle_tile(30, 7, 5, 3), (6, 0));
        assert_eq!(swizzle_tile(34, 7, 5, 3), (6, 4));
    }

    #[test]
    fn test_many_shapes_cover() {
        for m in 1..10 {
            for n in 1..10 {
                for g in 1..5 {
                    TileGrid::new(m, n, g).unwrap().verify_coverage().unwrap();
                }
            }
        }
    }

    #[test]
    fn test_invalid_grid() {
        assert!(TileGrid::new(0, 5, 3).is_err());
        assert!(TileGrid::new(7, 5, -1).is_err());
    }

    #[test]
    fn test_emitted_mapping_rejects_empty_group() {
        let mut kb = KernelBuilder::new("swizzle", TargetConfig::cuda());
        let pid = kb.program_id(0).unwrap();
        let m = kb.int_const(7, Dtype::I32);
        let n = kb.int_const(5, Dtype::I32);
        let before = kb.emitted();
        let err = kb.swizzle_tile(&pid, &m, &n, 0).unwrap_err();
        assert!(err.message.contains("group_size_m"));
        assert_eq!(
            err.call.as_deref(),
            Some("swizzle_tile(i32, i32, i32, group_size_m=0)")
        );
        assert_eq!(kb.emitted(), before);
    }

    #[test]
    fn test_emitted_mapping_folds_for_constants() {
        let mut kb = KernelBuilder::new("swizzle", TargetConfig::cuda());
        let m = kb.int_const(7, Dtype::I32);
        let n = kb.int_const(5, Dtype::I32);
        for pid in 0..35 {
            let p = kb.int_const(pid, Dtype::I32);
            let (pm, pn) = kb.swizzle_tile(&p, &m, &n, 3).unwrap();
            let expected = swizzle_tile(pid, 7, 5, 3);
            assert_eq!(
                (kb.const_int_value(&pm), kb.const_int_value(&pn)),
                (Some(expected.0), Some(expected.1))
            );
        }
    }
}
