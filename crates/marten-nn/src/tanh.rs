// Tanh layer: y = tanh(x), gradient g ⊙ (1 − y²) from the buffered
// forward output. Same skeleton as the sigmoid layer.

use marten_core::{tanh_grad, Error, Expr, Result};

use crate::bundle::{Bundle, INPUT, OUTPUT};
use crate::layer::{Layer, LayerPolicy};
use crate::shape_checker::ShapeChecker;

pub struct TanhLayer {
    name: String,
    policy: LayerPolicy,
    outputs: Vec<Expr>,
    input_shapes: ShapeChecker,
    output_shapes: ShapeChecker,
}

impl TanhLayer {
    pub fn new(name: impl Into<String>, policy: LayerPolicy) -> Self {
        TanhLayer {
            name: name.into(),
            policy,
            outputs: Vec::new(),
            input_shapes: ShapeChecker::new("tanh input"),
            output_shapes: ShapeChecker::new("tanh output"),
        }
    }
}

impl Layer for TanhLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> LayerPolicy {
        self.policy
    }

    fn feed_forward(&mut self, input: Bundle) -> Result<Bundle> {
        let x = input.get(INPUT)?;
        let y = x.tanh()?;
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
        let gx = tanh_grad(g, &y)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use marten_core::{evaluate, DType, Device, Tensor};

    fn leaf(data: &[f64]) -> Expr {
        Expr::from_tensor(
            Tensor::from_f64_slice(data, data.len(), DType::F64, Device::Cpu).unwrap(),
        )
    }

    #[test]
    fn test_gradient_uses_forward_output() -> Result<()> {
        let mut layer = TanhLayer::new("t", LayerPolicy::feedback());
        let out = layer.feed_forward(Bundle::new().set(INPUT, leaf(&[0.5])))?;
        let grads = layer.feed_backward(Bundle::new().set(OUTPUT, leaf(&[1.0])))?;
        let y = evaluate(out.get(OUTPUT)?)?.to_f64_vec()[0];
        let gx = evaluate(grads.get(INPUT)?)?.to_f64_vec()[0];
        assert!((gx - (1.0 - y * y)).abs() < 1e-12);
        layer.neutral_invariant()
    }

    #[test]
    fn test_lifo_pairing_of_two_forwards() -> Result<()> {
        let mut layer = TanhLayer::new("t", LayerPolicy::feedback());
        layer.feed_forward(Bundle::new().set(INPUT, leaf(&[0.1])))?;
        layer.feed_forward(Bundle::new().set(INPUT, leaf(&[0.2, 0.3])))?;
        // backwards pop in reverse order of the forwards
        let g2 = layer.feed_backward(Bundle::new().set(OUTPUT, leaf(&[1.0, 1.0])))?;
        assert_eq!(g2.get(INPUT)?.dims(), &[2]);
        let g1 = layer.feed_backward(Bundle::new().set(OUTPUT, leaf(&[1.0])))?;
        assert_eq!(g1.get(INPUT)?.dims(), &[1]);
        layer.neutral_invariant()
    }
}
