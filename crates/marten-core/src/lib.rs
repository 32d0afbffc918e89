//! # marten-core
//!
//! Lazy tensor expressions with deduplicating deferred evaluation.
//!
//! This crate provides:
//! - [`Tensor`] — immutable n-dimensional array, shared by reference
//! - [`Shape`] / [`DType`] / [`Device`] — metadata types
//! - [`Expr`] — lazy expression DAG; building is cheap, nothing computes
//! - [`EvalPlan`] / [`EvalHandle`] — the deferred-evaluation machinery
//! - [`evaluate`] — force an expression, computing each shared node once
//!
//! Operators never run eagerly. `x.sigmoid()?` returns an [`Expr`] whose
//! shape is known immediately; [`evaluate`] walks the DAG, registers each
//! distinct node with an [`EvalPlan`] exactly once, and runs the plan in
//! dependency order. Results are memoized per node, so repeated forces
//! and shared sub-expressions never recompute.

pub mod cpu;
pub mod device;
pub mod dtype;
pub mod error;
pub mod eval;
pub mod expr;
pub mod shape;
pub mod tensor;

pub use device::Device;
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use eval::{evaluate, EvalHandle, EvalPlan, EvalUnit};
pub use expr::{interpolate, sigmoid_grad, tanh_grad, Expr, ExprKind, NodeId};
pub use shape::Shape;
pub use tensor::{CpuStorage, Tensor};
