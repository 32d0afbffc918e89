// Sigmoid layer: y = 1 / (1 + e^−x)
//
// The gradient needs only the forward *output*: dL/dx = g ⊙ y ⊙ (1 − y).
// A feedback-enabled layer therefore buffers y, never x; a non-feedback
// layer buffers nothing at all.

use marten_core::{sigmoid_grad, Error, Expr, Result};

use crate::bundle::{Bundle, INPUT, OUTPUT};
use crate::layer::{Layer, LayerPolicy};
use crate::shape_checker::ShapeChecker;

pub struct SigmoidLayer {
    name: String,
    policy: LayerPolicy,
    outputs: Vec<Expr>,
    input_shapes: ShapeChecker,
    output_shapes: ShapeChecker,
}

impl SigmoidLayer {
    pub fn new(name: impl Into<String>, policy: LayerPolicy) -> Self {
        SigmoidLayer {
            name: name.into(),
            policy,
            outputs: Vec::new(),
            input_shapes: ShapeChecker::new("sigmoid input"),
            output_shapes: ShapeChecker::new("sigmoid output"),
        }
    }
}

impl Layer for SigmoidLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> LayerPolicy {
        self.policy
    }

    fn feed_forward(&mut self, input: Bundle) -> Result<Bundle> {
        let x = input.get(INPUT)?;
        let y = x.sigmoid()?;
        if self.policy.feedback_output {
            self.input_shapes.push(x.shape().clone());
            self.output_shapes.push(y.shape().clone());
            self.outputs.push(y.clone());
        }
        log::debug!("{}: forward, shape {}", self.name, y.shape());
        Ok(Bundle::new().set(OUTPUT, y))
    }

    fn feed_backward(&mut self, grad: Bundle) -> Result<Bundle> {
        if !self.policy.feedback_output {
            return Ok(Bundle::new());
        }
        let g = grad.get(OUTPUT)?;
        let y = self.outputs.pop().ok_or_else(|| {
            Error::contract(format!(
                "{}: backward without a matching forward",
                self.name
            ))
        })?;
        self.output_shapes.check_and_pop(g.shape())?;
        let gx = sigmoid_grad(g, &y)?;
        self.input_shapes.check_and_pop(gx.shape())?;
        log::debug!("{}: backward, shape {}", self.name, gx.shape());
        Ok(Bundle::new().set(INPUT, gx))
    }

    fn neutral_invariant(&self) -> Result<()> {
        if !self.outputs.is_empty() {
            return Err(Error::contract(format!(
                "{}: {} unconsumed forward output(s)",
                self.name,
                self.outputs.len()
            )));
        }
        self.input_shapes.assert_empty()?;
        self.output_shapes.assert_empty()
    }
}
