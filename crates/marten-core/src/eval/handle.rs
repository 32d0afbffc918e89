use std::sync::{Arc, OnceLock, RwLock};

use crate::device::Device;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::tensor::Tensor;

// EvalHandle — ownership/state wrapper around one output slot
//
// Every output slot in an evaluation plan is fronted by one handle, and
// the handle walks a strict one-way state machine:
//
//   Unallocated → Allocated (storage reserved, value undefined) → Evaluated
//
// Exactly one writer (the evaluation unit registered as the slot's
// producer) performs the Allocated→Evaluated transition. Reading before
// Evaluated is an UndefinedValue fault: under correct registration the
// plan never runs a unit before its dependencies are Evaluated, so that
// fault marks an internal scheduling defect, not a user error.
//
// The state sits behind Arc<RwLock<…>> so the handle can be cloned into
// both the producing unit and any number of consuming units, and so the
// exactly-once transition stays atomic if a plan ever runs units from
// more than one thread.

/// A memo cell shared between an expression node and the unit that
/// materializes it: once set, later forces reuse the value.
pub type MemoCell = Arc<OnceLock<Tensor>>;

#[derive(Debug)]
enum State {
    Unallocated,
    Allocated { shape: Shape, dtype: DType },
    Evaluated(Tensor),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Unallocated => "unallocated",
            State::Allocated { .. } => "allocated",
            State::Evaluated(_) => "evaluated",
        }
    }
}

/// Shared, state-tracked wrapper over a possibly-not-yet-computed value.
#[derive(Debug, Clone)]
pub struct EvalHandle {
    state: Arc<RwLock<State>>,
    device: Device,
}

impl EvalHandle {
    /// A fresh handle with no storage behind it.
    pub fn new(device: Device) -> Self {
        EvalHandle {
            state: Arc::new(RwLock::new(State::Unallocated)),
            device,
        }
    }

    /// A handle that is already Evaluated (leaf values and memoized results).
    pub fn evaluated(value: Tensor) -> Self {
        let device = value.device();
        EvalHandle {
            state: Arc::new(RwLock::new(State::Evaluated(value))),
            device,
        }
    }

    /// The device whose storage this slot belongs to.
    pub fn device(&self) -> Device {
        self.device
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::Internal("eval handle lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::Internal("eval handle lock poisoned".into()))
    }

    /// Reserve storage for the output: Unallocated → Allocated.
    ///
    /// Any other starting state means two producers were registered for
    /// the same slot, which the plan's dedup is supposed to prevent.
    pub fn allocate(&self, shape: Shape, dtype: DType) -> Result<()> {
        let mut guard = self.write()?;
        match &*guard {
            State::Unallocated => {
                *guard = State::Allocated { shape, dtype };
                Ok(())
            }
            other => Err(Error::Internal(format!(
                "allocate on a handle in state {}",
                other.name()
            ))),
        }
    }

    /// Publish the computed value: Allocated → Evaluated.
    ///
    /// Exactly one writer may perform this transition; a second write, or
    /// a write that disagrees with the allocation, fails fatally.
    pub fn set_value(&self, value: Tensor) -> Result<()> {
        let mut guard = self.write()?;
        match &*guard {
            State::Allocated { shape, dtype } => {
                if value.shape() != shape {
                    return Err(Error::ShapeMismatch {
                        expected: shape.clone(),
                        got: value.shape().clone(),
                    });
                }
                if value.dtype() != *dtype {
                    return Err(Error::DTypeMismatch {
                        expected: *dtype,
                        got: value.dtype(),
                    });
                }
                *guard = State::Evaluated(value);
                Ok(())
            }
            other => Err(Error::Internal(format!(
                "set_value on a handle in state {} (exactly one writer allowed)",
                other.name()
            ))),
        }
    }

    /// Read the materialized value. UndefinedValue unless Evaluated.
    pub fn value(&self) -> Result<Tensor> {
        let guard = self.read()?;
        match &*guard {
            State::Evaluated(t) => Ok(t.clone()),
            other => Err(Error::UndefinedValue {
                state: other.name(),
                context: "read before evaluation completed".into(),
            }),
        }
    }

    /// Whether the slot has reached Evaluated.
    pub fn is_evaluated(&self) -> bool {
        self.read()
            .map(|g| matches!(&*g, State::Evaluated(_)))
            .unwrap_or(false)
    }

    /// Name of the current state (diagnostics).
    pub fn state_name(&self) -> &'static str {
        self.read().map(|g| g.name()).unwrap_or("poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor() -> Tensor {
        Tensor::from_f64_slice(&[1.0, 2.0], 2, DType::F64, Device::Cpu).unwrap()
    }

    #[test]
    fn test_state_machine_happy_path() -> Result<()> {
        let h = EvalHandle::new(Device::Cpu);
        assert_eq!(h.state_name(), "unallocated");
        assert!(!h.is_evaluated());

        h.allocate(Shape::from(2), DType::F64)?;
        assert_eq!(h.state_name(), "allocated");

        h.set_value(tensor())?;
        assert!(h.is_evaluated());
        assert_eq!(h.value()?.to_f64_vec(), vec![1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn test_read_before_evaluated_is_undefined_value() {
        let h = EvalHandle::new(Device::Cpu);
        assert!(matches!(h.value(), Err(Error::UndefinedValue { .. })));
        h.allocate(Shape::from(2), DType::F64).unwrap();
        assert!(matches!(h.value(), Err(Error::UndefinedValue { .. })));
    }

    #[test]
    fn test_exactly_one_writer() {
        let h = EvalHandle::new(Device::Cpu);
        h.allocate(Shape::from(2), DType::F64).unwrap();
        h.set_value(tensor()).unwrap();
        assert!(h.set_value(tensor()).is_err());
        assert!(h.allocate(Shape::from(2), DType::F64).is_err());
    }

    #[test]
    fn test_set_value_without_allocate() {
        let h = EvalHandle::new(Device::Cpu);
        assert!(h.set_value(tensor()).is_err());
    }

    #[test]
    fn test_set_value_shape_mismatch() {
        let h = EvalHandle::new(Device::Cpu);
        h.allocate(Shape::from(3), DType::F64).unwrap();
        assert!(matches!(
            h.set_value(tensor()),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_evaluated_constructor() {
        let h = EvalHandle::evaluated(tensor());
        assert!(h.is_evaluated());
        assert_eq!(h.value().unwrap().to_f64_vec(), vec![1.0, 2.0]);
    }
}
