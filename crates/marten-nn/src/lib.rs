//! # marten-nn
//!
//! Stack-based reverse-mode layers over marten expressions.
//!
//! Layers are driven in matched forward/backward pairs through the
//! [`Layer`] trait. A forward pass wires lazy expressions and, when the
//! layer is feedback-enabled, buffers the operands its gradient needs on
//! internal LIFO stacks; the matching backward pass pops them. After n
//! forwards and n backwards every layer is back in its neutral state,
//! checkable with [`Layer::neutral_invariant`].
//!
//! Values move between layers in named [`Bundle`]s; the [`LayerGraph`]
//! composite wires child layers port-to-port and routes gradients back
//! through the same wiring, summing fan-in.

pub mod bundle;
pub mod graph;
pub mod interpolate;
pub mod layer;
pub mod negative;
pub mod shape_checker;
pub mod sigmoid;
pub mod tanh;

pub use bundle::{Bundle, INPUT, LAMBDA, OUTPUT, WEIGHT1, WEIGHT2};
pub use graph::{sequential, LayerGraph, LayerId};
pub use interpolate::InterpolateLayer;
pub use layer::{Layer, LayerPolicy};
pub use negative::NegativeLayer;
pub use shape_checker::ShapeChecker;
pub use sigmoid::SigmoidLayer;
pub use tanh::TanhLayer;
