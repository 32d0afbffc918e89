// Interpolation layer: out = λ ⊙ v1 + (1 − λ) ⊙ v2
//
// The three operands may arrive on different shapes; the layer promotes
// each to their common shape by repetition before the fused operator
// runs, and collapses every gradient back to its operand's original
// shape on the way out:
//
//   d/dv1 = collapse(g ⊙ λ,        shape of v1)
//   d/dv2 = collapse(g ⊙ (1 − λ),  shape of v2)
//   d/dλ  = collapse(g ⊙ (v1 − v2), shape of λ)
//
// All three gradients need forward operands, so a feedback-enabled layer
// buffers the original v1, v2 and λ per forward call.

use marten_core::{interpolate, Error, Expr, Result, Shape};

use crate::bundle::{Bundle, LAMBDA, OUTPUT, WEIGHT1, WEIGHT2};
use crate::layer::{Layer, LayerPolicy};
use crate::shape_checker::ShapeChecker;

struct Saved {
    v1: Expr,
    v2: Expr,
    lambda: Expr,
}

pub struct InterpolateLayer {
    name: String,
    policy: LayerPolicy,
    saved: Vec<Saved>,
    v1_shapes: ShapeChecker,
    v2_shapes: ShapeChecker,
    lambda_shapes: ShapeChecker,
    output_shapes: ShapeChecker,
}

impl InterpolateLayer {
    pub fn new(name: impl Into<String>, policy: LayerPolicy) -> Self {
        InterpolateLayer {
            name: name.into(),
            policy,
            saved: Vec::new(),
            v1_shapes: ShapeChecker::new("interpolate weight1"),
            v2_shapes: ShapeChecker::new("interpolate weight2"),
            lambda_shapes: ShapeChecker::new("interpolate lambda"),
            output_shapes: ShapeChecker::new("interpolate output"),
        }
    }
}

impl Layer for InterpolateLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> LayerPolicy {
        self.policy
    }

    fn feed_forward(&mut self, input: Bundle) -> Result<Bundle> {
        let v1 = input.get(WEIGHT1)?;
        let v2 = input.get(WEIGHT2)?;
        let lambda = input.get(LAMBDA)?;
        let common = Shape::promote3(v1.shape(), v2.shape(), lambda.shape())?;
        let p1 = v1.duplicate(common.clone())?;
        let p2 = v2.duplicate(common.clone())?;
        let pl = lambda.duplicate(common.clone())?;
        let out = interpolate(&p1, &p2, &pl)?;
        if self.policy.feedback_output {
            self.v1_shapes.push(v1.shape().clone());
            self.v2_shapes.push(v2.shape().clone());
            self.lambda_shapes.push(lambda.shape().clone());
            self.output_shapes.push(common);
            self.saved.push(Saved {
                v1: v1.clone(),
                v2: v2.clone(),
                lambda: lambda.clone(),
            });
        }
        log::debug!("{}: forward, shape {}", self.name, out.shape());
        Ok(Bundle::new().set(OUTPUT, out))
    }

    fn feed_backward(&mut self, grad: Bundle) -> Result<Bundle> {
        if !self.policy.feedback_output {
            return Ok(Bundle::new());
        }
        let g = grad.get(OUTPUT)?;
        let saved = self.saved.pop().ok_or_else(|| {
            Error::contract(format!(
                "{}: backward without a matching forward",
                self.name
            ))
        })?;
        self.output_shapes.check_and_pop(g.shape())?;

        let common = g.shape().clone();
        let p1 = saved.v1.duplicate(common.clone())?;
        let p2 = saved.v2.duplicate(common.clone())?;
        let pl = saved.lambda.duplicate(common.clone())?;

        let g1 = g.mul(&pl)?.collapse(saved.v1.shape().clone())?;
        let one_minus = pl.affine(-1.0, 1.0)?;
        let g2 = g.mul(&one_minus)?.collapse(saved.v2.shape().clone())?;
        let gl = g.mul(&p1.sub(&p2)?)?.collapse(saved.lambda.shape().clone())?;

        self.v1_shapes.check_and_pop(g1.shape())?;
        self.v2_shapes.check_and_pop(g2.shape())?;
        self.lambda_shapes.check_and_pop(gl.shape())?;
        log::debug!("{}: backward, common shape {}", self.name, common);
        Ok(Bundle::new()
            .set(WEIGHT1, g1)
            .set(WEIGHT2, g2)
            .set(LAMBDA, gl))
    }

    fn neutral_invariant(&self) -> Result<()> {
        if !self.saved.is_empty() {
            return Err(Error::contract(format!(
                "{}: {} unconsumed forward record(s)",
                self.name,
                self.saved.len()
            )));
        }
        self.v1_shapes.assert_empty()?;
        self.v2_shapes.assert_empty()?;
        self.lambda_shapes.assert_empty()?;
        self.output_shapes.assert_empty()
    }
}
