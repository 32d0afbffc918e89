use crate::cpu;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::eval::handle::{EvalHandle, MemoCell};
use crate::expr::NodeId;
use crate::shape::Shape;
use crate::tensor::{CpuStorage, Tensor};

// EvalUnit — one concrete computation step
//
// A unit binds input handles to one output handle. When the plan decides
// its dependencies are Evaluated it calls eval(), which reads the inputs,
// runs the matching CPU kernel, reserves the output slot, and publishes
// the value — exactly the Allocate/SetEval protocol of the handle.
//
// Units also carry the memo cell of the expression node they materialize,
// so a later force of the same node (or of a larger expression sharing
// it) reuses the value instead of recomputing.
//
// A unit discovering a contract violation at execution time (a shape the
// registration phase should have rejected, an unevaluated dependency)
// fails fatally; there is no partial retry.

/// One schedulable computation step bound to input/output handles.
pub trait EvalUnit {
    /// Read inputs, compute, publish the output. Runs at most once.
    fn eval(&self) -> Result<()>;

    /// Identity of the output slot this unit produces (diagnostics).
    fn output_id(&self) -> NodeId;
}

/// Reserve the output slot, publish the value, fill the memo cell.
fn finish(
    output: &EvalHandle,
    memo: &MemoCell,
    storage: CpuStorage,
    shape: Shape,
    device: Device,
) -> Result<()> {
    let dtype = storage.dtype();
    output.allocate(shape.clone(), dtype)?;
    let value = Tensor::from_storage(storage, shape, device)?;
    output.set_value(value.clone())?;
    // A memo cell already being set means this node was materialized by a
    // concurrent plan; first value wins, both are equal by construction.
    let _ = memo.set(value);
    Ok(())
}

fn expect_shape(got: &Tensor, expected: &Shape) -> Result<()> {
    if got.shape() != expected {
        return Err(Error::Internal(format!(
            "eval unit input shape {} disagrees with registered shape {}",
            got.shape(),
            expected
        )));
    }
    Ok(())
}

/// Unary elementwise step: negate / sigmoid / tanh.
pub struct UnaryUnit {
    pub op: cpu::UnaryOp,
    pub input: EvalHandle,
    pub output: EvalHandle,
    pub out_id: NodeId,
    pub shape: Shape,
    pub device: Device,
    pub memo: MemoCell,
}

impl EvalUnit for UnaryUnit {
    fn eval(&self) -> Result<()> {
        let input = self.input.value()?;
        expect_shape(&input, &self.shape)?;
        let storage = cpu::unary(self.op, input.storage());
        finish(&self.output, &self.memo, storage, self.shape.clone(), self.device)
    }

    fn output_id(&self) -> NodeId {
        self.out_id
    }
}

/// Binary elementwise step: add / sub / mul / sigmoid-grad / tanh-grad.
/// Both operands have the unit's shape; registration enforced that.
pub struct BinaryUnit {
    pub op: cpu::BinaryOp,
    pub lhs: EvalHandle,
    pub rhs: EvalHandle,
    pub output: EvalHandle,
    pub out_id: NodeId,
    pub shape: Shape,
    pub device: Device,
    pub memo: MemoCell,
}

impl EvalUnit for BinaryUnit {
    fn eval(&self) -> Result<()> {
        let lhs = self.lhs.value()?;
        let rhs = self.rhs.value()?;
        expect_shape(&lhs, &self.shape)?;
        expect_shape(&rhs, &self.shape)?;
        let storage = cpu::binary(self.op, lhs.storage(), rhs.storage())?;
        finish(&self.output, &self.memo, storage, self.shape.clone(), self.device)
    }

    fn output_id(&self) -> NodeId {
        self.out_id
    }
}

/// Affine step: out = input * mul + add.
pub struct AffineUnit {
    pub mul: f64,
    pub add: f64,
    pub input: EvalHandle,
    pub output: EvalHandle,
    pub out_id: NodeId,
    pub shape: Shape,
    pub device: Device,
    pub memo: MemoCell,
}

impl EvalUnit for AffineUnit {
    fn eval(&self) -> Result<()> {
        let input = self.input.value()?;
        expect_shape(&input, &self.shape)?;
        let storage = cpu::affine(input.storage(), self.mul, self.add);
        finish(&self.output, &self.memo, storage, self.shape.clone(), self.device)
    }

    fn output_id(&self) -> NodeId {
        self.out_id
    }
}

/// Broadcast step: repeat the input up to the unit's (wider) shape.
pub struct DuplicateUnit {
    pub input: EvalHandle,
    pub output: EvalHandle,
    pub out_id: NodeId,
    /// The promoted target shape.
    pub shape: Shape,
    pub device: Device,
    pub memo: MemoCell,
}

impl EvalUnit for DuplicateUnit {
    fn eval(&self) -> Result<()> {
        let input = self.input.value()?;
        let storage = cpu::duplicate(input.storage(), input.shape(), &self.shape)?;
        finish(&self.output, &self.memo, storage, self.shape.clone(), self.device)
    }

    fn output_id(&self) -> NodeId {
        self.out_id
    }
}

/// Reduction step: sum the input down to the unit's (narrower) shape.
pub struct CollapseUnit {
    pub input: EvalHandle,
    pub output: EvalHandle,
    pub out_id: NodeId,
    /// The collapsed target shape.
    pub shape: Shape,
    pub device: Device,
    pub memo: MemoCell,
}

impl EvalUnit for CollapseUnit {
    fn eval(&self) -> Result<()> {
        let input = self.input.value()?;
        let storage = cpu::collapse(input.storage(), input.shape(), &self.shape)?;
        finish(&self.output, &self.memo, storage, self.shape.clone(), self.device)
    }

    fn output_id(&self) -> NodeId {
        self.out_id
    }
}

/// Fused interpolation step: lambda ⊙ v1 + (1 − lambda) ⊙ v2.
pub struct InterpolateUnit {
    pub v1: EvalHandle,
    pub v2: EvalHandle,
    pub lambda: EvalHandle,
    pub output: EvalHandle,
    pub out_id: NodeId,
    pub shape: Shape,
    pub device: Device,
    pub memo: MemoCell,
}

impl EvalUnit for InterpolateUnit {
    fn eval(&self) -> Result<()> {
        let v1 = self.v1.value()?;
        let v2 = self.v2.value()?;
        let lambda = self.lambda.value()?;
        expect_shape(&v1, &self.shape)?;
        expect_shape(&v2, &self.shape)?;
        expect_shape(&lambda, &self.shape)?;
        let storage = cpu::interpolate(v1.storage(), v2.storage(), lambda.storage())?;
        finish(&self.output, &self.memo, storage, self.shape.clone(), self.device)
    }

    fn output_id(&self) -> NodeId {
        self.out_id
    }
}
