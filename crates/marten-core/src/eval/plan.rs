use std::collections::HashMap;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::eval::handle::EvalHandle;
use crate::eval::unit::EvalUnit;
use crate::expr::NodeId;
use crate::tensor::Tensor;

// EvalPlan — the deduplicating, dependency-ordering scheduler
//
// A plan collects evaluation units keyed by output identity (the NodeId
// of the expression they materialize), deduplicates them, and on demand
// executes the sub-graph feeding one target identity.
//
// Registration protocol:
//   - register() with an identity that already has a producer is a no-op
//     returning the existing handle. Two consumers of a shared
//     sub-expression therefore end up with the same future value, and
//     the computation runs at most once.
//   - register_value() enters an already-materialized value (a leaf or a
//     memoized node) under its identity with no unit.
//
// Execution is demand-driven, synchronous, and single-threaded: a
// depth-first walk resolves dependencies first, runs each unit exactly
// once after its dependencies are Evaluated, and returns. The expression
// DAG is acyclic by construction, so the cycle check below is defensive:
// observing one is a fatal internal error, never a recoverable state.
//
// Scoping: one plan per device kind, created per top-level force call
// and dropped when the force returns, so registered-but-unevaluated
// units never accumulate across forces.

struct PlanEntry {
    deps: Vec<NodeId>,
    unit: Option<Box<dyn EvalUnit>>,
    handle: EvalHandle,
}

/// Per-device table from output identity to (unit, dependencies, handle).
pub struct EvalPlan {
    device: Device,
    entries: HashMap<NodeId, PlanEntry>,
}

impl EvalPlan {
    /// Create an empty plan for one device kind.
    pub fn new(device: Device) -> Self {
        EvalPlan {
            device,
            entries: HashMap::new(),
        }
    }

    /// The device this plan schedules for.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Number of registered output identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The handle registered for an identity, if any.
    pub fn handle(&self, id: NodeId) -> Option<EvalHandle> {
        self.entries.get(&id).map(|e| e.handle.clone())
    }

    /// Register a computation step for `out`.
    ///
    /// If `out` already has a producer this is a no-op that returns the
    /// existing handle; the supplied unit is dropped.
    pub fn register(
        &mut self,
        out: NodeId,
        deps: Vec<NodeId>,
        unit: Box<dyn EvalUnit>,
        handle: EvalHandle,
    ) -> EvalHandle {
        if let Some(existing) = self.entries.get(&out) {
            log::trace!("eval plan: dedup hit for node {:?}", out);
            return existing.handle.clone();
        }
        self.entries.insert(
            out,
            PlanEntry {
                deps,
                unit: Some(unit),
                handle: handle.clone(),
            },
        );
        handle
    }

    /// Register an already-materialized value under its identity.
    pub fn register_value(&mut self, out: NodeId, value: Tensor) -> EvalHandle {
        if let Some(existing) = self.entries.get(&out) {
            return existing.handle.clone();
        }
        let handle = EvalHandle::evaluated(value);
        self.entries.insert(
            out,
            PlanEntry {
                deps: Vec::new(),
                unit: None,
                handle: handle.clone(),
            },
        );
        handle
    }

    /// Execute the sub-graph feeding `target`.
    ///
    /// Dependencies resolve depth-first; each unit runs at most once,
    /// only after all of its dependencies are Evaluated. Slots that are
    /// already Evaluated (leaves, memoized nodes, shared results from an
    /// earlier execute on this plan) are skipped.
    pub fn execute(&mut self, target: NodeId) -> Result<()> {
        // Iterative DFS with an explicit on-path set for the defensive
        // cycle check.
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            OnPath,
            Done,
        }
        let mut marks: HashMap<NodeId, Mark> = HashMap::new();
        let mut stack: Vec<(NodeId, bool)> = vec![(target, false)];

        while let Some((id, deps_resolved)) = stack.pop() {
            if marks.get(&id) == Some(&Mark::Done) {
                continue;
            }
            let entry = self
                .entries
                .get(&id)
                .ok_or_else(|| Error::Internal(format!("node {:?} not registered in plan", id)))?;

            if deps_resolved {
                if let Some(unit) = &entry.unit {
                    if !entry.handle.is_evaluated() {
                        log::trace!("eval plan: running unit for node {:?}", id);
                        unit.eval()?;
                        if !entry.handle.is_evaluated() {
                            return Err(Error::Internal(format!(
                                "unit for node {:?} returned without evaluating its handle",
                                id
                            )));
                        }
                    }
                }
                marks.insert(id, Mark::Done);
                continue;
            }

            if marks.get(&id) == Some(&Mark::OnPath) {
                // Acyclic by construction; observing this is fatal.
                return Err(Error::Internal(format!(
                    "cycle observed in evaluation plan at node {:?}",
                    id
                )));
            }
            marks.insert(id, Mark::OnPath);
            stack.push((id, true));
            for &dep in &entry.deps {
                if marks.get(&dep) != Some(&Mark::Done) {
                    stack.push((dep, false));
                }
            }
        }
        Ok(())
    }
}
