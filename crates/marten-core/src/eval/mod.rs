//! Deferred evaluation: handles, units and the plan that runs them.
//!
//! Forcing an expression builds an [`EvalPlan`] for its device, registers
//! the expression's sub-graph (deduplicated by node identity), executes
//! the plan, and reads the result out of the output handle. Each plan is
//! scoped to one force call; results persist through the per-node memo
//! cells, so a node computes once no matter how many forces see it.

pub mod handle;
pub mod plan;
pub mod unit;

pub use handle::{EvalHandle, MemoCell};
pub use plan::EvalPlan;
pub use unit::EvalUnit;

use crate::error::Result;
use crate::expr::Expr;
use crate::tensor::Tensor;

/// Force an expression to a materialized tensor.
///
/// Already-memoized expressions return their cached value without
/// building a plan. Otherwise every pending node reachable from `expr`
/// runs exactly once, in dependency order, and the result is memoized on
/// its node before being returned.
pub fn evaluate(expr: &Expr) -> Result<Tensor> {
    if let Some(value) = expr.cached() {
        return Ok(value.clone());
    }
    let mut plan = EvalPlan::new(expr.device());
    let handle = expr.register(&mut plan)?;
    log::debug!(
        "evaluating node {:?} on {}: {} plan entries",
        expr.id(),
        plan.device(),
        plan.len()
    );
    plan.execute(expr.id())?;
    handle.value()
}
