//! Structured control flow: counted loops with carried values.

use log::debug;

use super::{KernelBuilder, Operand, Tensor};
use crate::diagnostic::Diagnostic;
use crate::ir::Op;
use crate::types::{Dtype, TensorType};

impl KernelBuilder {
    /// Counted loop `for iv in (lower..upper).step_by(step)` with
    /// loop-carried values.
    ///
    /// `body` receives the `i32` induction variable and the current carried
    /// values, and returns the values for the next iteration. They must
    /// match `init` in number and type. Returns the values after the last
    /// iteration (`init` itself when the loop runs zero times).
    pub fn for_range<F>(
        &mut self,
        lower: impl Into<Operand>,
        upper: impl Into<Operand>,
        step: impl Into<Operand>,
        init: &[Tensor],
        body: F,
    ) -> Result<Vec<Tensor>, Diagnostic>
    where
        F: FnOnce(&mut KernelBuilder, Tensor, Vec<Tensor>) -> Result<Vec<Tensor>, Diagnostic>,
    {
        let (lower, upper, step) = (lower.into(), upper.into(), step.into());
        let call = || {
            let carried: Vec<String> = init.iter().map(|t| t.ty.to_string()).collect();
            format!(
                "for_range({}, {}, {}, [{}])",
                lower.describe(),
                upper.describe(),
                step.describe(),
                carried.join(", ")
            )
        };
        let (lower, upper, step) = (&lower, &upper, &step);
        self.guarded(call, |kb| {
            let folded_step = match step {
                Operand::Const(v) => Some(*v),
                Operand::Value(t) => kb.const_int_value(t),
            };
            if folded_step == Some(0) {
                return Err(Diagnostic::value_error("loop step must not be zero".to_string()));
            }
            let lower = kb.operand(lower, &Dtype::I32)?;
            let upper = kb.operand(upper, &Dtype::I32)?;
            let step = kb.operand(step, &Dtype::I32)?;

            let iv = kb.b.new_value(TensorType::scalar(Dtype::I32));
            let args: Vec<Tensor> = init
                .iter()
                .map(|t| Tensor::new(kb.b.new_value(t.ty.clone()), t.ty.clone()))
                .collect();

            kb.b.push_region();
            let yields = body(
                kb,
                Tensor::new(iv, TensorType::scalar(Dtype::I32)),
                args.clone(),
            )?;
            if yields.len() != init.len() {
                return Err(Diagnostic::type_error(format!(
                    "loop body yields {} values but {} are carried",
                    yields.len(),
                    init.len()
                )));
            }
            for (i, (y, t)) in yields.iter().zip(init.iter()).enumerate() {
                if y.ty != t.ty {
                    return Err(Diagnostic::type_error(format!(
                        "carried value {} enters the loop as {} but is yielded as {}",
                        i, t.ty, y.ty
                    ))
                    .with_help("cast the yielded value to the carried type".to_string()));
                }
            }
            let body = kb.b.pop_region();
            debug!("loop body: {} instructions, {} carried", body.len(), init.len());

            let results: Vec<Tensor> = init
                .iter()
                .map(|t| Tensor::new(kb.b.new_value(t.ty.clone()), t.ty.clone()))
                .collect();
            kb.b.emit_effect(Op::For {
                lower: lower.id,
                upper: upper.id,
                step: step.id,
                init: init.iter().map(|t| t.id).collect(),
                iv,
                args: args.iter().map(|t| t.id).collect(),
                body,
                yields: yields.iter().map(|t| t.id).collect(),
                results: results.iter().map(|t| t.id).collect(),
            });
            Ok(results)
        })
    }
}
