// Bundle — named container of expressions flowing between layers
//
// Layers exchange values through bundles rather than positional
// arguments: each port has a name, and a layer reads the ports it knows
// about. A missing port is a wiring mistake and fails as a contract
// violation naming the port.

use std::collections::HashMap;

use marten_core::{Error, Expr, Result};

/// Port name for a layer's primary input.
pub const INPUT: &str = "input";
/// Port name for a layer's primary output.
pub const OUTPUT: &str = "output";
/// Interpolation operand v1.
pub const WEIGHT1: &str = "weight1";
/// Interpolation operand v2.
pub const WEIGHT2: &str = "weight2";
/// Interpolation coefficient λ.
pub const LAMBDA: &str = "lambda";

/// String-keyed map of lazy expressions.
#[derive(Default, Clone)]
pub struct Bundle {
    values: HashMap<String, Expr>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn set(mut self, port: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.values.insert(port.into(), value.into());
        self
    }

    pub fn insert(&mut self, port: impl Into<String>, value: impl Into<Expr>) {
        self.values.insert(port.into(), value.into());
    }

    /// Look up a port, failing with the port name if absent.
    pub fn get(&self, port: &str) -> Result<&Expr> {
        self.values
            .get(port)
            .ok_or_else(|| Error::contract(format!("bundle has no port {port:?}")))
    }

    /// Remove and return a port, failing with the port name if absent.
    pub fn take(&mut self, port: &str) -> Result<Expr> {
        self.values
            .remove(port)
            .ok_or_else(|| Error::contract(format!("bundle has no port {port:?}")))
    }

    pub fn contains(&self, port: &str) -> bool {
        self.values.contains_key(port)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn ports(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Expr)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ports: Vec<&str> = self.values.keys().map(String::as_str).collect();
        ports.sort_unstable();
        f.debug_struct("Bundle").field("ports", &ports).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_core::{DType, Device, Tensor};

    fn leaf() -> Expr {
        Expr::from_tensor(
            Tensor::from_f64_slice(&[1.0, 2.0], 2, DType::F32, Device::Cpu).unwrap(),
        )
    }

    #[test]
    fn test_set_and_get() -> Result<()> {
        let b = Bundle::new().set(INPUT, leaf());
        assert_eq!(b.len(), 1);
        assert!(b.contains(INPUT));
        assert_eq!(b.get(INPUT)?.dims(), &[2]);
        Ok(())
    }

    #[test]
    fn test_missing_port_names_the_port() {
        let b = Bundle::new();
        let err = b.get(OUTPUT).unwrap_err();
        assert!(err.to_string().contains("output"));
    }

    #[test]
    fn test_take_removes() -> Result<()> {
        let mut b = Bundle::new().set(INPUT, leaf());
        let _ = b.take(INPUT)?;
        assert!(b.is_empty());
        assert!(b.take(INPUT).is_err());
        Ok(())
    }
}
