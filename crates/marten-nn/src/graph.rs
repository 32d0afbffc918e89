// LayerGraph — composite layer wired from named ports
//
// Child layers are added first, then edges connect one child's output
// port to another child's input port; graph-level ports plug external
// bundles into children and export child outputs. build() computes the
// topological order once; the passes are pure routing after that.
//
// Backward runs the children in reverse topological order. When two
// edges consume the same output port, the gradients flowing back along
// them are accumulated by elementwise add before the producing child
// sees them. A non-feedback child returns an empty gradient bundle,
// which simply stops propagation along its incoming edges.

use std::collections::HashMap;

use marten_core::{Error, Expr, Result};

use crate::bundle::{Bundle, INPUT, OUTPUT};
use crate::layer::{Layer, LayerPolicy};

/// Handle to a child layer inside a [`LayerGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerId(usize);

struct Edge {
    from: usize,
    from_port: String,
    to: usize,
    to_port: String,
}

pub struct LayerGraph {
    name: String,
    layers: Vec<Box<dyn Layer>>,
    edges: Vec<Edge>,
    /// graph input port -> (child, child input port)
    inputs: Vec<(String, usize, String)>,
    /// (child, child output port) -> graph output port
    outputs: Vec<(usize, String, String)>,
    /// Topological order over children, fixed by build().
    order: Vec<usize>,
    built: bool,
}

impl LayerGraph {
    pub fn new(name: impl Into<String>) -> Self {
        LayerGraph {
            name: name.into(),
            layers: Vec::new(),
            edges: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            order: Vec::new(),
            built: false,
        }
    }

    pub fn add(&mut self, layer: Box<dyn Layer>) -> LayerId {
        self.layers.push(layer);
        self.built = false;
        LayerId(self.layers.len() - 1)
    }

    /// Wire `from`'s output port into `to`'s input port.
    pub fn connect(
        &mut self,
        from: LayerId,
        from_port: impl Into<String>,
        to: LayerId,
        to_port: impl Into<String>,
    ) {
        self.edges.push(Edge {
            from: from.0,
            from_port: from_port.into(),
            to: to.0,
            to_port: to_port.into(),
        });
        self.built = false;
    }

    /// Expose a graph-level input port, feeding a child's input port.
    pub fn plug_input(
        &mut self,
        graph_port: impl Into<String>,
        to: LayerId,
        to_port: impl Into<String>,
    ) {
        self.inputs.push((graph_port.into(), to.0, to_port.into()));
    }

    /// Export a child's output port as a graph-level output port.
    pub fn plug_output(
        &mut self,
        from: LayerId,
        from_port: impl Into<String>,
        graph_port: impl Into<String>,
    ) {
        self.outputs.push((from.0, from_port.into(), graph_port.into()));
    }

    /// Fix the topological order. Fails if the edges form a cycle.
    pub fn build(&mut self) -> Result<()> {
        let n = self.layers.len();
        let mut indegree = vec![0usize; n];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for e in &self.edges {
            indegree[e.to] += 1;
            successors[e.from].push(e.to);
        }
        let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop() {
            order.push(i);
            for &s in &successors[i] {
                indegree[s] -= 1;
                if indegree[s] == 0 {
                    ready.push(s);
                }
            }
        }
        if order.len() != n {
            return Err(Error::contract(format!(
                "{}: layer wiring contains a cycle",
                self.name
            )));
        }
        self.order = order;
        self.built = true;
        Ok(())
    }

    fn require_built(&self) -> Result<()> {
        if !self.built {
            return Err(Error::contract(format!(
                "{}: build() must run before the first pass",
                self.name
            )));
        }
        Ok(())
    }

    fn accumulate(slot: &mut Option<Expr>, grad: &Expr) -> Result<()> {
        *slot = Some(match slot.take() {
            Some(existing) => existing.add(grad)?,
            None => grad.clone(),
        });
        Ok(())
    }
}

impl Layer for LayerGraph {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> LayerPolicy {
        let mut policy = LayerPolicy::default();
        for layer in &self.layers {
            let p = layer.policy();
            policy.feedback_output |= p.feedback_output;
            policy.update |= p.update;
        }
        policy
    }

    fn feed_forward(&mut self, input: Bundle) -> Result<Bundle> {
        self.require_built()?;
        // Per-child input bundles under assembly, then each child's
        // produced outputs for downstream edges.
        let mut pending: Vec<Bundle> = (0..self.layers.len()).map(|_| Bundle::new()).collect();
        let mut produced: Vec<Option<Bundle>> = (0..self.layers.len()).map(|_| None).collect();
        for (graph_port, to, to_port) in &self.inputs {
            pending[*to].insert(to_port.clone(), input.get(graph_port)?.clone());
        }
        for &i in &self.order {
            for e in self.edges.iter().filter(|e| e.to == i) {
                let source = produced[e.from].as_ref().ok_or_else(|| {
                    Error::contract(format!(
                        "{}: edge consumes {} before it is produced",
                        self.name,
                        self.layers[e.from].name()
                    ))
                })?;
                let value = source.get(&e.from_port)?.clone();
                pending[i].insert(e.to_port.clone(), value);
            }
            let out = self.layers[i].feed_forward(std::mem::take(&mut pending[i]))?;
            produced[i] = Some(out);
        }
        let mut result = Bundle::new();
        for (from, from_port, graph_port) in &self.outputs {
            let source = produced[*from].as_ref().ok_or_else(|| {
                Error::contract(format!("{}: output child never ran", self.name))
            })?;
            result.insert(graph_port.clone(), source.get(from_port)?.clone());
        }
        Ok(result)
    }

    fn feed_backward(&mut self, grad: Bundle) -> Result<Bundle> {
        self.require_built()?;
        // Gradients addressed to (child, output port), fan-in summed.
        let mut incoming: HashMap<(usize, String), Option<Expr>> = HashMap::new();
        for (from, from_port, graph_port) in &self.outputs {
            if let Ok(g) = grad.get(graph_port) {
                let slot = incoming.entry((*from, from_port.clone())).or_default();
                Self::accumulate(slot, g)?;
            }
        }
        let mut result = Bundle::new();
        for &i in self.order.iter().rev() {
            let mut child_grad = Bundle::new();
            for ((child, port), slot) in incoming.iter_mut() {
                if *child == i {
                    if let Some(g) = slot.take() {
                        child_grad.insert(port.clone(), g);
                    }
                }
            }
            let input_grads = self.layers[i].feed_backward(child_grad)?;
            if input_grads.is_empty() {
                continue;
            }
            for e in self.edges.iter().filter(|e| e.to == i) {
                if let Ok(g) = input_grads.get(&e.to_port) {
                    let slot = incoming
                        .entry((e.from, e.from_port.clone()))
                        .or_default();
                    Self::accumulate(slot, g)?;
                }
            }
            for (graph_port, to, to_port) in &self.inputs {
                if *to == i {
                    if let Ok(g) = input_grads.get(to_port) {
                        match result.take(graph_port) {
                            Ok(existing) => {
                                result.insert(graph_port.clone(), existing.add(g)?)
                            }
                            Err(_) => result.insert(graph_port.clone(), g.clone()),
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    fn neutral_invariant(&self) -> Result<()> {
        for layer in &self.layers {
            layer.neutral_invariant()?;
        }
        Ok(())
    }
}

/// Chain single-input/single-output layers: each child's `output` feeds
/// the next child's `input`; the graph exposes `input` and `output`.
pub fn sequential(name: impl Into<String>, layers: Vec<Box<dyn Layer>>) -> Result<LayerGraph> {
    let mut graph = LayerGraph::new(name);
    if layers.is_empty() {
        return Err(Error::contract("sequential graph needs at least one layer"));
    }
    let ids: Vec<LayerId> = layers.into_iter().map(|l| graph.add(l)).collect();
    graph.plug_input(INPUT, ids[0], INPUT);
    for pair in ids.windows(2) {
        graph.connect(pair[0], OUTPUT, pair[1], INPUT);
    }
    let last = ids[ids.len() - 1];
    graph.plug_output(last, OUTPUT, OUTPUT);
    graph.build()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negative::NegativeLayer;
    use crate::sigmoid::SigmoidLayer;
    use marten_core::{evaluate, DType, Device, Tensor};

    fn leaf(data: &[f64]) -> Expr {
        Expr::from_tensor(
            Tensor::from_f64_slice(data, data.len(), DType::F64, Device::Cpu).unwrap(),
        )
    }

    #[test]
    fn test_sequential_forward_composes() -> Result<()> {
        let mut graph = sequential(
            "net",
            vec![
                Box::new(NegativeLayer::new("neg", LayerPolicy::feedback())),
                Box::new(SigmoidLayer::new("sig", LayerPolicy::feedback())),
            ],
        )?;
        let out = graph.feed_forward(Bundle::new().set(INPUT, leaf(&[0.0])))?;
        let y = evaluate(out.get(OUTPUT)?)?.to_f64_vec()[0];
        assert!((y - 0.5).abs() < 1e-12); // sigmoid(−0) = 0.5
        Ok(())
    }

    #[test]
    fn test_sequential_backward_routes_and_restores_neutral() -> Result<()> {
        let mut graph = sequential(
            "net",
            vec![
                Box::new(NegativeLayer::new("neg", LayerPolicy::feedback())),
                Box::new(SigmoidLayer::new("sig", LayerPolicy::feedback())),
            ],
        )?;
        graph.feed_forward(Bundle::new().set(INPUT, leaf(&[1.0])))?;
        let grads = graph.feed_backward(Bundle::new().set(OUTPUT, leaf(&[1.0])))?;
        let gx = evaluate(grads.get(INPUT)?)?.to_f64_vec()[0];
        // d sigmoid(−x)/dx = −y(1−y) with y = sigmoid(−1)
        let y = 1.0 / (1.0 + 1.0f64.exp());
        assert!((gx + y * (1.0 - y)).abs() < 1e-12);
        graph.neutral_invariant()
    }

    #[test]
    fn test_cycle_detected_at_build() {
        let mut graph = LayerGraph::new("looped");
        let a = graph.add(Box::new(NegativeLayer::new("a", LayerPolicy::default())));
        let b = graph.add(Box::new(NegativeLayer::new("b", LayerPolicy::default())));
        graph.connect(a, OUTPUT, b, INPUT);
        graph.connect(b, OUTPUT, a, INPUT);
        assert!(graph.build().is_err());
    }

    #[test]
    fn test_fan_out_gradients_sum() -> Result<()> {
        // x feeds two negations whose outputs are both exported; each
        // backward contributes −g, so the input gradient is −2.
        let mut graph = LayerGraph::new("fan");
        let a = graph.add(Box::new(NegativeLayer::new("a", LayerPolicy::feedback())));
        let b = graph.add(Box::new(NegativeLayer::new("b", LayerPolicy::feedback())));
        graph.plug_input(INPUT, a, INPUT);
        graph.plug_input(INPUT, b, INPUT);
        graph.plug_output(a, OUTPUT, "out_a");
        graph.plug_output(b, OUTPUT, "out_b");
        graph.build()?;
        graph.feed_forward(Bundle::new().set(INPUT, leaf(&[3.0])))?;
        let grads = graph.feed_backward(
            Bundle::new()
                .set("out_a", leaf(&[1.0]))
                .set("out_b", leaf(&[1.0])),
        )?;
        assert_eq!(evaluate(grads.get(INPUT)?)?.to_f64_vec(), vec![-2.0]);
        graph.neutral_invariant()
    }
}
