// Negation layer: y = −x, gradient −g. The gradient needs no forward
// operand, so even a feedback-enabled layer buffers shapes only.

use marten_core::{Error, Result};

use crate::bundle::{Bundle, INPUT, OUTPUT};
use crate::layer::{Layer, LayerPolicy};
use crate::shape_checker::ShapeChecker;

pub struct NegativeLayer {
    name: String,
    policy: LayerPolicy,
    input_shapes: ShapeChecker,
}

impl NegativeLayer {
    pub fn new(name: impl Into<String>, policy: LayerPolicy) -> Self {
        NegativeLayer {
            name: name.into(),
            policy,
            input_shapes: ShapeChecker::new("negative input"),
        }
    }
}

impl Layer for NegativeLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> LayerPolicy {
        self.policy
    }

    fn feed_forward(&mut self, input: Bundle) -> Result<Bundle> {
        let x = input.get(INPUT)?;
        let y = x.negative()?;
        if self.policy.feedback_output {
            self.input_shapes.push(x.shape().clone());
        }
        Ok(Bundle::new().set(OUTPUT, y))
    }

    fn feed_backward(&mut self, grad: Bundle) -> Result<Bundle> {
        if !self.policy.feedback_output {
            return Ok(Bundle::new());
        }
        let g = grad.get(OUTPUT)?;
        if self.input_shapes.is_empty() {
            return Err(Error::contract(format!(
                "{}: backward without a matching forward",
                self.name
            )));
        }
        let gx = g.negative()?;
        self.input_shapes.check_and_pop(gx.shape())?;
        Ok(Bundle::new().set(INPUT, gx))
    }

    fn neutral_invariant(&self) -> Result<()> {
        self.input_shapes.assert_empty()
    }
}
