// Integration tests for the reverse-mode layers.

use marten_core::{evaluate, DType, Device, Error, Expr, Result, Shape, Tensor};
use marten_nn::{
    sequential, Bundle, InterpolateLayer, Layer, LayerPolicy, NegativeLayer, SigmoidLayer,
    TanhLayer, INPUT, LAMBDA, OUTPUT, WEIGHT1, WEIGHT2,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

fn assert_vec_approx(got: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(got.len(), expected.len(), "length mismatch");
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            approx_eq(*g, *e, tol),
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

fn leaf(data: &[f64], shape: impl Into<Shape>) -> Expr {
    Expr::from_tensor(Tensor::from_f64_slice(data, shape, DType::F64, Device::Cpu).unwrap())
}

// Sigmoid

#[test]
fn test_sigmoid_forward_backward_numerics() -> Result<()> {
    let mut layer = SigmoidLayer::new("sig", LayerPolicy::feedback());
    let x = [0.5, -0.3];
    let out = layer.feed_forward(Bundle::new().set(INPUT, leaf(&x, 2)))?;
    let y = evaluate(out.get(OUTPUT)?)?.to_f64_vec();
    let expected_y: Vec<f64> = x.iter().map(|v| 1.0 / (1.0 + (-v).exp())).collect();
    assert_vec_approx(&y, &expected_y, 1e-4);

    let g = [1.0, 2.0];
    let grads = layer.feed_backward(Bundle::new().set(OUTPUT, leaf(&g, 2)))?;
    let gx = evaluate(grads.get(INPUT)?)?.to_f64_vec();
    let expected_gx: Vec<f64> = g
        .iter()
        .zip(expected_y.iter())
        .map(|(g, y)| g * y * (1.0 - y))
        .collect();
    assert_vec_approx(&gx, &expected_gx, 1e-4);
    layer.neutral_invariant()
}

#[test]
fn test_sigmoid_backward_reuses_forward_output() -> Result<()> {
    // the gradient graph must reference the same output node the forward
    // pass produced, so forcing both materializes the sigmoid once
    let mut layer = SigmoidLayer::new("sig", LayerPolicy::feedback());
    let out = layer.feed_forward(Bundle::new().set(INPUT, leaf(&[0.7], 1)))?;
    let y_expr = out.get(OUTPUT)?.clone();
    let grads = layer.feed_backward(Bundle::new().set(OUTPUT, leaf(&[1.0], 1)))?;
    let _ = evaluate(grads.get(INPUT)?)?;
    // the backward force already materialized y through the shared node
    assert!(y_expr.cached().is_some());
    Ok(())
}

// Tanh

#[test]
fn test_tanh_forward_backward_numerics() -> Result<()> {
    let mut layer = TanhLayer::new("tanh", LayerPolicy::feedback());
    let x = [-0.27, -0.41];
    let g = [0.1, 0.3];
    let out = layer.feed_forward(Bundle::new().set(INPUT, leaf(&x, 2)))?;
    let y = evaluate(out.get(OUTPUT)?)?.to_f64_vec();
    let expected_y: Vec<f64> = x.iter().map(|v| v.tanh()).collect();
    assert_vec_approx(&y, &expected_y, 1e-4);

    let grads = layer.feed_backward(Bundle::new().set(OUTPUT, leaf(&g, 2)))?;
    let gx = evaluate(grads.get(INPUT)?)?.to_f64_vec();
    let expected_gx: Vec<f64> = g
        .iter()
        .zip(expected_y.iter())
        .map(|(g, y)| g * (1.0 - y * y))
        .collect();
    assert_vec_approx(&gx, &expected_gx, 1e-4);
    layer.neutral_invariant()
}

// LIFO pairing over many rounds

#[test]
fn test_k_forwards_then_k_backwards_pair_lifo() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut layer = TanhLayer::new("tanh", LayerPolicy::feedback());
    let mut shapes: Vec<(usize, usize)> = Vec::new();
    for rows in 1..=9 {
        let shape = (rows, 3);
        let data: Vec<f64> = (0..rows * 3).map(|_| rng.gen_range(-1.0..1.0)).collect();
        layer.feed_forward(Bundle::new().set(INPUT, leaf(&data, shape)))?;
        shapes.push(shape);
    }
    // backwards consume the buffered forwards in reverse order
    for &(rows, cols) in shapes.iter().rev() {
        let g = vec![1.0; rows * cols];
        let grads = layer.feed_backward(Bundle::new().set(OUTPUT, leaf(&g, (rows, cols))))?;
        assert_eq!(grads.get(INPUT)?.dims(), &[rows, cols]);
    }
    layer.neutral_invariant()
}

#[test]
fn test_backward_shape_must_match_buffered_forward() -> Result<()> {
    let mut layer = TanhLayer::new("tanh", LayerPolicy::feedback());
    layer.feed_forward(Bundle::new().set(INPUT, leaf(&[0.1, 0.2, 0.3], (1, 3))))?;
    let err = layer
        .feed_backward(Bundle::new().set(OUTPUT, leaf(&[1.0, 1.0], (1, 2))))
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
    Ok(())
}

// Contract edges

#[test]
fn test_backward_without_forward_is_contract_violation() {
    let mut layer = SigmoidLayer::new("sig", LayerPolicy::feedback());
    let err = layer
        .feed_backward(Bundle::new().set(OUTPUT, leaf(&[1.0], 1)))
        .unwrap_err();
    assert!(matches!(err, Error::ContractViolation(_)));
}

#[test]
fn test_nonfeedback_layer_buffers_nothing() -> Result<()> {
    let mut layer = TanhLayer::new("tanh", LayerPolicy::default());
    for _ in 0..3 {
        layer.feed_forward(Bundle::new().set(INPUT, leaf(&[0.5], 1)))?;
    }
    // no matching backwards needed; the layer stayed neutral throughout
    layer.neutral_invariant()?;
    let grads = layer.feed_backward(Bundle::new())?;
    assert!(grads.is_empty());
    Ok(())
}

#[test]
fn test_unbalanced_forward_breaks_neutral_invariant() -> Result<()> {
    let mut layer = SigmoidLayer::new("sig", LayerPolicy::feedback());
    layer.feed_forward(Bundle::new().set(INPUT, leaf(&[0.5], 1)))?;
    assert!(layer.neutral_invariant().is_err());
    layer.feed_backward(Bundle::new().set(OUTPUT, leaf(&[1.0], 1)))?;
    layer.neutral_invariant()
}

// Interpolate

#[test]
fn test_interpolate_row_lambda_broadcast() -> Result<()> {
    let mut layer = InterpolateLayer::new("mix", LayerPolicy::feedback());
    // (2, 3) operands with a (1, 3) lambda
    let out = layer.feed_forward(
        Bundle::new()
            .set(WEIGHT1, leaf(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)))
            .set(WEIGHT2, leaf(&[0.0; 6], (2, 3)))
            .set(LAMBDA, leaf(&[1.0, 0.5, 0.0], (1, 3))),
    )?;
    let y = evaluate(out.get(OUTPUT)?)?;
    assert_eq!(y.dims(), &[2, 3]);
    assert_vec_approx(&y.to_f64_vec(), &[1.0, 1.0, 0.0, 4.0, 2.5, 0.0], 1e-12);

    let grads = layer.feed_backward(Bundle::new().set(OUTPUT, leaf(&[1.0; 6], (2, 3))))?;
    // dλ collapses back to (1, 3): column sums of v1 − v2
    let gl = evaluate(grads.get(LAMBDA)?)?;
    assert_eq!(gl.dims(), &[1, 3]);
    assert_vec_approx(&gl.to_f64_vec(), &[5.0, 7.0, 9.0], 1e-12);
    // dv2 = 1 − λ broadcast over the rows
    let g2 = evaluate(grads.get(WEIGHT2)?)?;
    assert_vec_approx(&g2.to_f64_vec(), &[0.0, 0.5, 1.0, 0.0, 0.5, 1.0], 1e-12);
    layer.neutral_invariant()
}

// Composite graph

#[test]
fn test_sequential_chain_numerics() -> Result<()> {
    let mut net = sequential(
        "net",
        vec![
            Box::new(TanhLayer::new("t", LayerPolicy::feedback())),
            Box::new(SigmoidLayer::new("s", LayerPolicy::feedback())),
        ],
    )?;
    let x = 0.8f64;
    let out = net.feed_forward(Bundle::new().set(INPUT, leaf(&[x], 1)))?;
    let t = x.tanh();
    let y = 1.0 / (1.0 + (-t).exp());
    assert_vec_approx(&evaluate(out.get(OUTPUT)?)?.to_f64_vec(), &[y], 1e-4);

    let grads = net.feed_backward(Bundle::new().set(OUTPUT, leaf(&[1.0], 1)))?;
    let expected = y * (1.0 - y) * (1.0 - t * t);
    assert_vec_approx(&evaluate(grads.get(INPUT)?)?.to_f64_vec(), &[expected], 1e-4);
    net.neutral_invariant()
}

#[test]
fn test_graph_with_negative_branch() -> Result<()> {
    // input -> negative -> sigmoid, driven as one composite
    let mut net = sequential(
        "net",
        vec![
            Box::new(NegativeLayer::new("n", LayerPolicy::feedback())),
            Box::new(SigmoidLayer::new("s", LayerPolicy::feedback())),
        ],
    )?;
    for _ in 0..2 {
        net.feed_forward(Bundle::new().set(INPUT, leaf(&[1.0, -1.0], 2)))?;
    }
    for _ in 0..2 {
        net.feed_backward(Bundle::new().set(OUTPUT, leaf(&[1.0, 1.0], 2)))?;
    }
    net.neutral_invariant()
}
