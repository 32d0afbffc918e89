use crate::dtype::WithDType;
use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::tensor::CpuStorage;

// CPU kernels — the elementwise execution contract
//
// Evaluation units do not compute anything themselves: they read input
// handles, pick the kernel matching their operator, and write the output
// handle. All actual arithmetic for the CPU device lives here.
//
// Kernels are written once, generic over T: WithDType, and dispatched to
// the concrete storage variant at the entry points below. Binary kernels
// require both operands to share a dtype; the expression builders enforce
// that at build time, so a mismatch reaching this layer is a scheduling
// defect and fails fatally.

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// y = -x
    Negative,
    /// y = 1 / (1 + e^-x)
    Sigmoid,
    /// y = tanh(x)
    Tanh,
}

/// Element-wise binary operations.
///
/// The two gradient kernels take the *forward output* as their second
/// operand: SigmoidGrad(g, y) = g·y·(1−y) and TanhGrad(g, y) = g·(1−y²).
/// This output-based formulation determines what layers must buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SigmoidGrad,
    TanhGrad,
}

fn unary_map<T: WithDType>(src: &[T], op: UnaryOp) -> Vec<T> {
    src.iter()
        .map(|&x| match op {
            UnaryOp::Negative => -x,
            UnaryOp::Sigmoid => {
                let one = T::one();
                one / (one + (-x).exp())
            }
            UnaryOp::Tanh => x.tanh(),
        })
        .collect()
}

fn binary_map<T: WithDType>(lhs: &[T], rhs: &[T], op: BinaryOp) -> Vec<T> {
    lhs.iter()
        .zip(rhs.iter())
        .map(|(&a, &b)| match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            // a = upstream gradient, b = forward output
            BinaryOp::SigmoidGrad => a * b * (T::one() - b),
            BinaryOp::TanhGrad => a * (T::one() - b * b),
        })
        .collect()
}

fn affine_map<T: WithDType>(src: &[T], mul: f64, add: f64) -> Vec<T> {
    let m = T::from_f64(mul);
    let a = T::from_f64(add);
    src.iter().map(|&x| x * m + a).collect()
}

/// Broadcast `src` (of shape `from`) to `to` by repetition.
///
/// Walks every output index, maps it back to a source offset via the
/// stride-0 broadcast strides, and copies.
fn duplicate_map<T: WithDType>(src: &[T], from: &Shape, to: &Shape) -> Vec<T> {
    let out_count = to.elem_count();
    let contig = to.stride_contiguous();
    let bstrides = from.broadcast_strides(to);
    let mut out = Vec::with_capacity(out_count);
    for idx in 0..out_count {
        let mut rem = idx;
        let mut off = 0usize;
        for d in 0..to.rank() {
            let c = rem / contig[d];
            rem %= contig[d];
            off += c * bstrides[d];
        }
        out.push(src[off]);
    }
    out
}

/// Sum `src` (of shape `from`) back down to `to` — the inverse of
/// duplicate. Every source element accumulates into the target offset its
/// index maps to under the broadcast.
fn collapse_map<T: WithDType>(src: &[T], from: &Shape, to: &Shape) -> Vec<T> {
    let contig = from.stride_contiguous();
    let bstrides = to.broadcast_strides(from);
    let mut out = vec![T::zero(); to.elem_count()];
    for (idx, &x) in src.iter().enumerate() {
        let mut rem = idx;
        let mut off = 0usize;
        for d in 0..from.rank() {
            let c = rem / contig[d];
            rem %= contig[d];
            off += c * bstrides[d];
        }
        out[off] = out[off] + x;
    }
    out
}

fn interpolate_map<T: WithDType>(v1: &[T], v2: &[T], lambda: &[T]) -> Vec<T> {
    v1.iter()
        .zip(v2.iter())
        .zip(lambda.iter())
        .map(|((&a, &b), &l)| l * a + (T::one() - l) * b)
        .collect()
}

// Dispatch entry points

/// Apply a unary op element-wise.
pub fn unary(op: UnaryOp, src: &CpuStorage) -> CpuStorage {
    match src {
        CpuStorage::F16(v) => CpuStorage::F16(unary_map(v, op)),
        CpuStorage::BF16(v) => CpuStorage::BF16(unary_map(v, op)),
        CpuStorage::F32(v) => CpuStorage::F32(unary_map(v, op)),
        CpuStorage::F64(v) => CpuStorage::F64(unary_map(v, op)),
    }
}

/// Apply a binary op element-wise. Operands must share dtype and length.
pub fn binary(op: BinaryOp, lhs: &CpuStorage, rhs: &CpuStorage) -> Result<CpuStorage> {
    if lhs.len() != rhs.len() {
        return Err(Error::Internal(format!(
            "binary kernel: operand length mismatch ({} vs {})",
            lhs.len(),
            rhs.len()
        )));
    }
    match (lhs, rhs) {
        (CpuStorage::F16(a), CpuStorage::F16(b)) => Ok(CpuStorage::F16(binary_map(a, b, op))),
        (CpuStorage::BF16(a), CpuStorage::BF16(b)) => Ok(CpuStorage::BF16(binary_map(a, b, op))),
        (CpuStorage::F32(a), CpuStorage::F32(b)) => Ok(CpuStorage::F32(binary_map(a, b, op))),
        (CpuStorage::F64(a), CpuStorage::F64(b)) => Ok(CpuStorage::F64(binary_map(a, b, op))),
        _ => Err(Error::DTypeMismatch {
            expected: lhs.dtype(),
            got: rhs.dtype(),
        }),
    }
}

/// Affine transform: result = src * mul + add.
pub fn affine(src: &CpuStorage, mul: f64, add: f64) -> CpuStorage {
    match src {
        CpuStorage::F16(v) => CpuStorage::F16(affine_map(v, mul, add)),
        CpuStorage::BF16(v) => CpuStorage::BF16(affine_map(v, mul, add)),
        CpuStorage::F32(v) => CpuStorage::F32(affine_map(v, mul, add)),
        CpuStorage::F64(v) => CpuStorage::F64(affine_map(v, mul, add)),
    }
}

/// Broadcast storage of shape `from` to shape `to` by repetition.
pub fn duplicate(src: &CpuStorage, from: &Shape, to: &Shape) -> Result<CpuStorage> {
    if !from.can_promote_to(to) {
        return Err(Error::PromoteMismatch {
            from: from.clone(),
            to: to.clone(),
        });
    }
    Ok(match src {
        CpuStorage::F16(v) => CpuStorage::F16(duplicate_map(v, from, to)),
        CpuStorage::BF16(v) => CpuStorage::BF16(duplicate_map(v, from, to)),
        CpuStorage::F32(v) => CpuStorage::F32(duplicate_map(v, from, to)),
        CpuStorage::F64(v) => CpuStorage::F64(duplicate_map(v, from, to)),
    })
}

/// Sum storage of shape `from` down to shape `to` (inverse of duplicate).
pub fn collapse(src: &CpuStorage, from: &Shape, to: &Shape) -> Result<CpuStorage> {
    if !to.can_promote_to(from) {
        return Err(Error::PromoteMismatch {
            from: to.clone(),
            to: from.clone(),
        });
    }
    Ok(match src {
        CpuStorage::F16(v) => CpuStorage::F16(collapse_map(v, from, to)),
        CpuStorage::BF16(v) => CpuStorage::BF16(collapse_map(v, from, to)),
        CpuStorage::F32(v) => CpuStorage::F32(collapse_map(v, from, to)),
        CpuStorage::F64(v) => CpuStorage::F64(collapse_map(v, from, to)),
    })
}

/// Fused interpolation: lambda ⊙ v1 + (1 − lambda) ⊙ v2.
/// All three operands must share dtype and length.
pub fn interpolate(v1: &CpuStorage, v2: &CpuStorage, lambda: &CpuStorage) -> Result<CpuStorage> {
    if v1.len() != v2.len() || v1.len() != lambda.len() {
        return Err(Error::Internal(format!(
            "interpolate kernel: operand length mismatch ({}, {}, {})",
            v1.len(),
            v2.len(),
            lambda.len()
        )));
    }
    match (v1, v2, lambda) {
        (CpuStorage::F16(a), CpuStorage::F16(b), CpuStorage::F16(l)) => {
            Ok(CpuStorage::F16(interpolate_map(a, b, l)))
        }
        (CpuStorage::BF16(a), CpuStorage::BF16(b), CpuStorage::BF16(l)) => {
            Ok(CpuStorage::BF16(interpolate_map(a, b, l)))
        }
        (CpuStorage::F32(a), CpuStorage::F32(b), CpuStorage::F32(l)) => {
            Ok(CpuStorage::F32(interpolate_map(a, b, l)))
        }
        (CpuStorage::F64(a), CpuStorage::F64(b), CpuStorage::F64(l)) => {
            Ok(CpuStorage::F64(interpolate_map(a, b, l)))
        }
        _ => Err(Error::DTypeMismatch {
            expected: v1.dtype(),
            got: v2.dtype(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    fn f64s(s: &CpuStorage) -> Vec<f64> {
        s.to_f64_vec()
    }

    #[test]
    fn test_unary_negative() {
        let s = CpuStorage::F64(vec![1.0, -2.0, 0.0]);
        assert_eq!(f64s(&unary(UnaryOp::Negative, &s)), vec![-1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_unary_sigmoid() {
        let s = CpuStorage::F64(vec![0.0]);
        assert!((f64s(&unary(UnaryOp::Sigmoid, &s))[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_binary_sigmoid_grad() {
        // g = 2, y = 0.5 → 2 * 0.5 * 0.5 = 0.5
        let g = CpuStorage::F64(vec![2.0]);
        let y = CpuStorage::F64(vec![0.5]);
        let out = binary(BinaryOp::SigmoidGrad, &g, &y).unwrap();
        assert!((f64s(&out)[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_binary_dtype_mismatch() {
        let a = CpuStorage::F64(vec![1.0]);
        let b = CpuStorage::F32(vec![1.0]);
        assert!(binary(BinaryOp::Add, &a, &b).is_err());
    }

    #[test]
    fn test_duplicate_row() {
        // [1, 2] of shape [2] → [[1, 2], [1, 2], [1, 2]] of shape [3, 2]
        let s = CpuStorage::F64(vec![1.0, 2.0]);
        let out = duplicate(&s, &Shape::from(2), &Shape::from((3, 2))).unwrap();
        assert_eq!(f64s(&out), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_collapse_row() {
        // [[1, 2], [3, 4], [5, 6]] of shape [3, 2] → [9, 12] of shape [2]
        let s = CpuStorage::F64(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = collapse(&s, &Shape::from((3, 2)), &Shape::from(2)).unwrap();
        assert_eq!(f64s(&out), vec![9.0, 12.0]);
    }

    #[test]
    fn test_collapse_scalar() {
        let s = CpuStorage::F64(vec![1.0, 2.0, 3.0]);
        let out = collapse(&s, &Shape::from(3), &Shape::from(())).unwrap();
        assert_eq!(f64s(&out), vec![6.0]);
    }

    #[test]
    fn test_duplicate_then_collapse_roundtrip_scale() {
        // Collapsing a duplicated value multiplies it by the repeat count.
        let s = CpuStorage::F64(vec![2.5]);
        let from = Shape::from(());
        let to = Shape::from((2, 2));
        let up = duplicate(&s, &from, &to).unwrap();
        let down = collapse(&up, &to, &from).unwrap();
        assert_eq!(f64s(&down), vec![10.0]);
    }

    #[test]
    fn test_interpolate() {
        let v1 = CpuStorage::F64(vec![1.0, 10.0]);
        let v2 = CpuStorage::F64(vec![3.0, 20.0]);
        let l = CpuStorage::F64(vec![0.5, 0.1]);
        let out = interpolate(&v1, &v2, &l).unwrap();
        assert_eq!(f64s(&out), vec![2.0, 19.0]);
    }
}
