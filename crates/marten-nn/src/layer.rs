// Layer trait — the interface every reverse-mode layer implements
//
// A layer is a stateful object driven in matched forward/backward pairs:
// feed_forward consumes an input bundle and produces an output bundle,
// feed_backward consumes a gradient bundle and produces the gradients of
// the matching forward call's inputs. Layers that need forward operands
// for their gradients buffer them on internal LIFO stacks, so k forwards
// followed by k backwards pair up last-in first-out.
//
// Capabilities are plain runtime configuration, chosen at construction:
// a layer that will never be differentiated is built with
// feedback_output = false and buffers nothing.

use marten_core::Result;

use crate::bundle::Bundle;

/// Construction-time capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerPolicy {
    /// Whether the layer participates in backward passes. Only then does
    /// it buffer forward operands and produce input gradients.
    pub feedback_output: bool,
    /// Whether the layer owns trainable parameters to update. None of
    /// the elementary layers here do; composites OR it over children.
    pub update: bool,
}

impl LayerPolicy {
    pub fn feedback() -> Self {
        LayerPolicy {
            feedback_output: true,
            update: false,
        }
    }
}

/// A reverse-mode layer.
///
/// Both passes take `&mut self`: forward may push onto buffer stacks and
/// backward pops them. Results are lazy — a pass wires up expressions and
/// returns immediately; nothing computes until a consumer forces.
pub trait Layer {
    /// Diagnostic name, carried in error messages.
    fn name(&self) -> &str;

    /// The layer's capability flags.
    fn policy(&self) -> LayerPolicy;

    /// Consume an input bundle, produce the output bundle.
    fn feed_forward(&mut self, input: Bundle) -> Result<Bundle>;

    /// Consume a gradient bundle (gradients of this layer's outputs),
    /// produce the gradients of the matching forward call's inputs.
    ///
    /// On a non-feedback layer this returns an empty bundle and touches
    /// no state. On a feedback layer with no buffered forward it fails
    /// with a contract violation.
    fn feed_backward(&mut self, grad: Bundle) -> Result<Bundle>;

    /// Assert the layer is back in its neutral state: every buffer stack
    /// and shape checker empty. Holds after n forwards and n backwards.
    fn neutral_invariant(&self) -> Result<()>;

    fn is_feedback_output(&self) -> bool {
        self.policy().feedback_output
    }

    fn is_update(&self) -> bool {
        self.policy().update
    }
}
