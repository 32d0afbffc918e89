use std::fmt;

// Device — Tags identifying where tensor storage lives
//
// Every tensor value and every pending expression carries a device tag,
// and every evaluation plan is scoped to exactly one device kind: a unit
// registered with a plan only ever reads and writes storage on that
// plan's device.
//
// Only the CPU execution contract is implemented. The enum leaves room
// for accelerator tags without touching the scheduling machinery, which
// is keyed on the tag alone.

/// Identifies the storage location of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
}

impl Device {
    /// A human-readable name for this device.
    pub fn name(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
        }
    }

    /// Whether this is the CPU device.
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
