use crate::shape::Shape;

/// All errors that can occur within marten.
///
/// Every failure here models a programming-contract violation, not a
/// transient runtime fault: a caller receiving one of these has mis-built
/// a graph or mis-sequenced forward/backward calls. There is no retry
/// policy anywhere in the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Incompatible operand shapes at expression build time, or a
    /// backward-time shape disagreeing with its paired forward-time shape.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// A shape that cannot be produced from another by broadcast promotion.
    #[error("shape {from} cannot be promoted to {to}")]
    PromoteMismatch { from: Shape, to: Shape },

    /// DType mismatch between operands of a binary operation.
    #[error("dtype mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch {
        expected: crate::DType,
        got: crate::DType,
    },

    /// Operands (or an operand and an evaluation plan) live on different devices.
    #[error("device mismatch: expected {expected}, got {got}")]
    DeviceMismatch {
        expected: crate::Device,
        got: crate::Device,
    },

    /// Dimension index out of range for the shape's rank.
    #[error("dimension out of range: dim {dim} for shape with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Element count mismatch when creating a tensor from a slice.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Forward/backward call sequencing broken: a backward call with no
    /// matching unconsumed forward call, or a neutral-invariant check
    /// finding non-empty state.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// An evaluation handle was read (or written) in the wrong state.
    /// This is an internal scheduling defect; it should never surface
    /// under correct registration.
    #[error("undefined value: handle in state {state} ({context})")]
    UndefinedValue {
        state: &'static str,
        context: String,
    },

    /// Internal invariant broken (e.g. a cycle observed in a DAG that is
    /// acyclic by construction).
    #[error("internal error: {0}")]
    Internal(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Create a contract-violation error.
    pub fn contract(s: impl Into<String>) -> Self {
        Error::ContractViolation(s.into())
    }
}

/// Convenience Result type used throughout marten.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
