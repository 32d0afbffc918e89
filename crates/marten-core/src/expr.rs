use std::sync::{Arc, OnceLock};

use crate::cpu::{BinaryOp, UnaryOp};
use crate::device::Device;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::eval::handle::{EvalHandle, MemoCell};
use crate::eval::plan::EvalPlan;
use crate::eval::unit::{
    AffineUnit, BinaryUnit, CollapseUnit, DuplicateUnit, InterpolateUnit, UnaryUnit,
};
use crate::shape::Shape;
use crate::tensor::Tensor;

// Expr — lazy representation of a tensor value
//
// An Expr is a DAG node: either a leaf wrapping an already-materialized
// Tensor, or a pending operator application over operand Exprs. Nothing
// computes at construction time; a node only knows its derived shape,
// dtype and device, so shape() is pure and cheap.
//
// Nodes are built bottom-up from existing nodes, so the graph is acyclic
// by construction. Cloning an Expr shares the node (Arc); identity for
// deduplication is the integer NodeId, never an address.
//
// VALIDATION HAPPENS HERE. Every builder checks operand shapes, dtypes
// and devices and fails before anything is scheduled — elementwise
// operators require identical shapes after promotion (callers broadcast
// explicitly with duplicate()). By the time a unit runs, shape errors are
// internal defects.
//
// MEMOIZATION. Each node owns a memo cell filled by the unit that
// materializes it. Forcing the same expression twice — or forcing two
// expressions that share a node — runs the underlying computation once.

/// Globally unique identity of one expression node; the deduplication key
/// for evaluation plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID (global atomic counter).
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        NodeId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// What an expression node is: a materialized leaf or a pending operator
/// application over operand nodes.
pub enum ExprKind {
    /// Already-materialized value.
    Value(Tensor),
    /// Elementwise unary operator.
    Unary { op: UnaryOp, input: Expr },
    /// Elementwise binary operator (operand shapes identical).
    Binary { op: BinaryOp, lhs: Expr, rhs: Expr },
    /// out = input * mul + add.
    Affine { input: Expr, mul: f64, add: f64 },
    /// Broadcast the input up to this node's (wider) shape.
    Duplicate { input: Expr },
    /// Sum the input down to this node's (narrower) shape.
    Collapse { input: Expr },
    /// lambda ⊙ v1 + (1 − lambda) ⊙ v2, all operands on a common shape.
    Interpolate { v1: Expr, v2: Expr, lambda: Expr },
}

struct ExprNode {
    id: NodeId,
    kind: ExprKind,
    shape: Shape,
    dtype: DType,
    device: Device,
    memo: MemoCell,
}

/// Lazy tensor expression; cheap to clone, shared by reference.
#[derive(Clone)]
pub struct Expr {
    inner: Arc<ExprNode>,
}

impl std::fmt::Debug for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner.kind {
            ExprKind::Value(_) => "Value",
            ExprKind::Unary { op, .. } => match op {
                UnaryOp::Negative => "Negative",
                UnaryOp::Sigmoid => "Sigmoid",
                UnaryOp::Tanh => "Tanh",
            },
            ExprKind::Binary { op, .. } => match op {
                BinaryOp::Add => "Add",
                BinaryOp::Sub => "Sub",
                BinaryOp::Mul => "Mul",
                BinaryOp::SigmoidGrad => "SigmoidGrad",
                BinaryOp::TanhGrad => "TanhGrad",
            },
            ExprKind::Affine { .. } => "Affine",
            ExprKind::Duplicate { .. } => "Duplicate",
            ExprKind::Collapse { .. } => "Collapse",
            ExprKind::Interpolate { .. } => "Interpolate",
        };
        write!(
            f,
            "Expr({}, id={:?}, shape={}, dtype={})",
            kind, self.inner.id, self.inner.shape, self.inner.dtype
        )
    }
}

fn check_elementwise(lhs: &Expr, rhs: &Expr) -> Result<()> {
    if lhs.shape() != rhs.shape() {
        return Err(Error::ShapeMismatch {
            expected: lhs.shape().clone(),
            got: rhs.shape().clone(),
        });
    }
    if lhs.dtype() != rhs.dtype() {
        return Err(Error::DTypeMismatch {
            expected: lhs.dtype(),
            got: rhs.dtype(),
        });
    }
    if lhs.device() != rhs.device() {
        return Err(Error::DeviceMismatch {
            expected: lhs.device(),
            got: rhs.device(),
        });
    }
    Ok(())
}

impl Expr {
    fn node(kind: ExprKind, shape: Shape, dtype: DType, device: Device) -> Self {
        Expr {
            inner: Arc::new(ExprNode {
                id: NodeId::new(),
                kind,
                shape,
                dtype,
                device,
                memo: Arc::new(OnceLock::new()),
            }),
        }
    }

    /// Wrap a materialized tensor as a leaf expression.
    pub fn from_tensor(value: Tensor) -> Self {
        let shape = value.shape().clone();
        let dtype = value.dtype();
        let device = value.device();
        Self::node(ExprKind::Value(value), shape, dtype, device)
    }

    // Accessors — all pure, none of them force computation.

    /// Integer identity of this node.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The derived shape. Pure and cheap; never forces.
    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    /// The dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        self.inner.shape.dims()
    }

    /// Element data type.
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// Device the eventual value will live on.
    pub fn device(&self) -> Device {
        self.inner.device
    }

    /// What this node is.
    pub fn kind(&self) -> &ExprKind {
        &self.inner.kind
    }

    /// The memoized value, if this node has been materialized by a force.
    pub fn cached(&self) -> Option<&Tensor> {
        self.inner.memo.get()
    }

    // Builders

    /// Elementwise negation: −x.
    pub fn negative(&self) -> Result<Expr> {
        Ok(Self::node(
            ExprKind::Unary {
                op: UnaryOp::Negative,
                input: self.clone(),
            },
            self.shape().clone(),
            self.dtype(),
            self.device(),
        ))
    }

    /// Elementwise logistic sigmoid: 1 / (1 + e^−x).
    pub fn sigmoid(&self) -> Result<Expr> {
        Ok(Self::node(
            ExprKind::Unary {
                op: UnaryOp::Sigmoid,
                input: self.clone(),
            },
            self.shape().clone(),
            self.dtype(),
            self.device(),
        ))
    }

    /// Elementwise hyperbolic tangent.
    pub fn tanh(&self) -> Result<Expr> {
        Ok(Self::node(
            ExprKind::Unary {
                op: UnaryOp::Tanh,
                input: self.clone(),
            },
            self.shape().clone(),
            self.dtype(),
            self.device(),
        ))
    }

    fn binary(&self, rhs: &Expr, op: BinaryOp) -> Result<Expr> {
        check_elementwise(self, rhs)?;
        Ok(Self::node(
            ExprKind::Binary {
                op,
                lhs: self.clone(),
                rhs: rhs.clone(),
            },
            self.shape().clone(),
            self.dtype(),
            self.device(),
        ))
    }

    /// Elementwise addition. Shapes must be identical; broadcast
    /// explicitly with [`Expr::duplicate`] first.
    pub fn add(&self, rhs: &Expr) -> Result<Expr> {
        self.binary(rhs, BinaryOp::Add)
    }

    /// Elementwise subtraction.
    pub fn sub(&self, rhs: &Expr) -> Result<Expr> {
        self.binary(rhs, BinaryOp::Sub)
    }

    /// Elementwise multiplication.
    pub fn mul(&self, rhs: &Expr) -> Result<Expr> {
        self.binary(rhs, BinaryOp::Mul)
    }

    /// Affine transform: x * mul + add. `affine(-1, 1)` is `1 − x`.
    pub fn affine(&self, mul: f64, add: f64) -> Result<Expr> {
        Ok(Self::node(
            ExprKind::Affine {
                input: self.clone(),
                mul,
                add,
            },
            self.shape().clone(),
            self.dtype(),
            self.device(),
        ))
    }

    /// Broadcast this expression to the wider `target` shape by
    /// repetition. Identity shapes short-circuit to the input node, so a
    /// no-op promote adds nothing to the graph.
    pub fn duplicate(&self, target: impl Into<Shape>) -> Result<Expr> {
        let target = target.into();
        if self.shape() == &target {
            return Ok(self.clone());
        }
        if !self.shape().can_promote_to(&target) {
            return Err(Error::PromoteMismatch {
                from: self.shape().clone(),
                to: target,
            });
        }
        Ok(Self::node(
            ExprKind::Duplicate {
                input: self.clone(),
            },
            target,
            self.dtype(),
            self.device(),
        ))
    }

    /// Sum this expression down to the narrower `target` shape — the
    /// inverse of [`Expr::duplicate`], used to route gradients back
    /// through a broadcast.
    pub fn collapse(&self, target: impl Into<Shape>) -> Result<Expr> {
        let target = target.into();
        if self.shape() == &target {
            return Ok(self.clone());
        }
        if !target.can_promote_to(self.shape()) {
            return Err(Error::PromoteMismatch {
                from: target,
                to: self.shape().clone(),
            });
        }
        Ok(Self::node(
            ExprKind::Collapse {
                input: self.clone(),
            },
            target,
            self.dtype(),
            self.device(),
        ))
    }

    // Registration — building the handle graph

    /// Register this node (and, recursively, its operands) with an
    /// evaluation plan, returning the handle of the output slot.
    ///
    /// Calling this twice for the same node — from two consumers, or
    /// across two calls — registers the underlying computation at most
    /// once; later callers receive a handle to the same result.
    pub fn register(&self, plan: &mut EvalPlan) -> Result<EvalHandle> {
        if self.device() != plan.device() {
            return Err(Error::DeviceMismatch {
                expected: plan.device(),
                got: self.device(),
            });
        }
        if let Some(handle) = plan.handle(self.id()) {
            return Ok(handle);
        }
        // Memoized nodes and leaves enter as already-evaluated slots.
        if let Some(value) = self.cached() {
            return Ok(plan.register_value(self.id(), value.clone()));
        }
        let out_id = self.id();
        let shape = self.shape().clone();
        let device = self.device();
        let memo = self.inner.memo.clone();
        let output = EvalHandle::new(device);

        let handle = match &self.inner.kind {
            ExprKind::Value(value) => plan.register_value(out_id, value.clone()),
            ExprKind::Unary { op, input } => {
                let ih = input.register(plan)?;
                plan.register(
                    out_id,
                    vec![input.id()],
                    Box::new(UnaryUnit {
                        op: *op,
                        input: ih,
                        output: output.clone(),
                        out_id,
                        shape,
                        device,
                        memo,
                    }),
                    output,
                )
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lh = lhs.register(plan)?;
                let rh = rhs.register(plan)?;
                plan.register(
                    out_id,
                    vec![lhs.id(), rhs.id()],
                    Box::new(BinaryUnit {
                        op: *op,
                        lhs: lh,
                        rhs: rh,
                        output: output.clone(),
                        out_id,
                        shape,
                        device,
                        memo,
                    }),
                    output,
                )
            }
            ExprKind::Affine { input, mul, add } => {
                let ih = input.register(plan)?;
                plan.register(
                    out_id,
                    vec![input.id()],
                    Box::new(AffineUnit {
                        mul: *mul,
                        add: *add,
                        input: ih,
                        output: output.clone(),
                        out_id,
                        shape,
                        device,
                        memo,
                    }),
                    output,
                )
            }
            ExprKind::Duplicate { input } => {
                let ih = input.register(plan)?;
                plan.register(
                    out_id,
                    vec![input.id()],
                    Box::new(DuplicateUnit {
                        input: ih,
                        output: output.clone(),
                        out_id,
                        shape,
                        device,
                        memo,
                    }),
                    output,
                )
            }
            ExprKind::Collapse { input } => {
                let ih = input.register(plan)?;
                plan.register(
                    out_id,
                    vec![input.id()],
                    Box::new(CollapseUnit {
                        input: ih,
                        output: output.clone(),
                        out_id,
                        shape,
                        device,
                        memo,
                    }),
                    output,
                )
            }
            ExprKind::Interpolate { v1, v2, lambda } => {
                let h1 = v1.register(plan)?;
                let h2 = v2.register(plan)?;
                let hl = lambda.register(plan)?;
                plan.register(
                    out_id,
                    vec![v1.id(), v2.id(), lambda.id()],
                    Box::new(InterpolateUnit {
                        v1: h1,
                        v2: h2,
                        lambda: hl,
                        output: output.clone(),
                        out_id,
                        shape,
                        device,
                        memo,
                    }),
                    output,
                )
            }
        };
        Ok(handle)
    }
}

impl From<Tensor> for Expr {
    fn from(value: Tensor) -> Self {
        Expr::from_tensor(value)
    }
}

/// Gradient of the logistic sigmoid, taking the forward *output* y:
/// g ⊙ y ⊙ (1 − y). The output-based formulation is deliberate — it is
/// what a sigmoid layer buffers.
pub fn sigmoid_grad(grad: &Expr, output: &Expr) -> Result<Expr> {
    grad.binary(output, BinaryOp::SigmoidGrad)
}

/// Gradient of tanh, taking the forward *output* y: g ⊙ (1 − y²).
pub fn tanh_grad(grad: &Expr, output: &Expr) -> Result<Expr> {
    grad.binary(output, BinaryOp::TanhGrad)
}

/// Interpolation: lambda ⊙ v1 + (1 − lambda) ⊙ v2.
///
/// All three operands must already share one shape; callers promote with
/// [`Expr::duplicate`] beforehand (that is what the interpolate layer
/// does), and mismatches fail here, before anything runs.
pub fn interpolate(v1: &Expr, v2: &Expr, lambda: &Expr) -> Result<Expr> {
    check_elementwise(v1, v2)?;
    check_elementwise(v1, lambda)?;
    Ok(Expr::node(
        ExprKind::Interpolate {
            v1: v1.clone(),
            v2: v2.clone(),
            lambda: lambda.clone(),
        },
        v1.shape().clone(),
        v1.dtype(),
        v1.device(),
    ))
}
