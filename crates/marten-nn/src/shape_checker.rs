// ShapeChecker — LIFO shape recorder for forward/backward pairing
//
// Forward pushes the shape of an operand; the matching backward pops the
// top and checks the incoming gradient against it. Popping an empty
// checker means a backward with no matching forward.

use marten_core::{Error, Result, Shape};

#[derive(Debug, Default)]
pub struct ShapeChecker {
    /// What the checker guards, used in error messages.
    label: &'static str,
    stack: Vec<Shape>,
}

impl ShapeChecker {
    pub fn new(label: &'static str) -> Self {
        ShapeChecker {
            label,
            stack: Vec::new(),
        }
    }

    pub fn push(&mut self, shape: Shape) {
        self.stack.push(shape);
    }

    /// Pop the most recent shape and require `got` to match it.
    pub fn check_and_pop(&mut self, got: &Shape) -> Result<()> {
        let expected = self.stack.pop().ok_or_else(|| {
            Error::contract(format!(
                "{}: backward without a matching forward",
                self.label
            ))
        })?;
        if &expected != got {
            return Err(Error::ShapeMismatch {
                expected,
                got: got.clone(),
            });
        }
        Ok(())
    }

    /// Require the checker to be empty (neutral state).
    pub fn assert_empty(&self) -> Result<()> {
        if !self.stack.is_empty() {
            return Err(Error::contract(format!(
                "{}: {} unconsumed forward record(s)",
                self.label,
                self.stack.len()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}
