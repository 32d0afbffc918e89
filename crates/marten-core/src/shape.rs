use std::fmt;

// Shape — N-dimensional shape representation
//
// A Shape describes the size of each dimension of a tensor value or a
// pending expression. For example:
//   - Scalar: Shape([])          — 0 dimensions, 1 element
//   - Vector: Shape([5])         — 1 dimension, 5 elements
//   - Matrix: Shape([3, 4])      — 2 dimensions, 12 elements
//
// Beyond sizing, the shape defines the broadcast algebra this library is
// built on:
//   1. PROMOTE — a narrower shape can be broadcast ("duplicated") to a
//      wider compatible one by repeating values along new or size-1 axes.
//   2. COLLAPSE — the inverse: summing over the broadcast axes recovers
//      the narrower shape. This is how gradients are routed back through
//      a broadcast.

/// N-dimensional shape: ordered tuple of non-negative extents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for scalar, 1 for vector, 2 for matrix, etc.).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements (product of all dimensions).
    /// A scalar shape [] has 1 element.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>().max(1)
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> crate::Result<usize> {
        self.0.get(d).copied().ok_or(crate::Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    /// Compute the contiguous (row-major / C-order) strides for this shape.
    ///
    /// For shape [2, 3, 4], strides are [12, 4, 1]: moving one step in
    /// dim 0 jumps 12 elements, in dim 1 jumps 4, in dim 2 jumps 1.
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        if self.rank() > 0 {
            strides[self.rank() - 1] = 1;
            for i in (0..self.rank() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    // Broadcasting

    /// Whether this shape can be promoted (broadcast) to `target`.
    ///
    /// Align shapes from the right; every dimension of `self` must equal
    /// the corresponding target dimension or be 1, and `self` may not have
    /// more dimensions than `target`. Missing leading dimensions count as
    /// new axes to repeat along.
    ///
    /// Examples:
    ///   [4]    → [3, 4]   ok (new leading axis)
    ///   [2, 1] → [2, 3]   ok (size-1 axis repeated)
    ///   [3]    → [4]      no (3 ≠ 4 and neither is 1)
    pub fn can_promote_to(&self, target: &Shape) -> bool {
        let s = self.dims();
        let t = target.dims();
        if s.len() > t.len() {
            return false;
        }
        for i in 0..s.len() {
            let sd = s[s.len() - 1 - i];
            let td = t[t.len() - 1 - i];
            if sd != td && sd != 1 {
                return false;
            }
        }
        true
    }

    /// Compute the common promoted shape of two shapes.
    ///
    /// NumPy-style broadcasting rules:
    ///   1. Align shapes from the right (trailing dimensions).
    ///   2. Dimensions are compatible if they are equal or one of them is 1.
    ///   3. Missing leading dimensions are treated as 1.
    ///
    /// Examples:
    ///   [3, 4] and [4]       → [3, 4]
    ///   [2, 1] and [1, 3]    → [2, 3]
    ///   [5, 3, 1] and [3, 4] → [5, 3, 4]
    ///   [3] and [4]          → Error
    pub fn promote(lhs: &Shape, rhs: &Shape) -> crate::Result<Shape> {
        let l = lhs.dims();
        let r = rhs.dims();
        let max_rank = l.len().max(r.len());
        let mut result = Vec::with_capacity(max_rank);

        for i in 0..max_rank {
            // Index from the right. If i >= len, treat as 1.
            let ld = if i < l.len() { l[l.len() - 1 - i] } else { 1 };
            let rd = if i < r.len() { r[r.len() - 1 - i] } else { 1 };

            if ld == rd {
                result.push(ld);
            } else if ld == 1 {
                result.push(rd);
            } else if rd == 1 {
                result.push(ld);
            } else {
                // symmetric incompatibility, neither side is a promotion
                return Err(crate::Error::msg(format!(
                    "shapes {lhs} and {rhs} are not broadcast-compatible (dim {i} from right: {ld} vs {rd})"
                )));
            }
        }

        result.reverse(); // built from the right
        Ok(Shape::new(result))
    }

    /// Common promoted shape of three operands (used by interpolation).
    pub fn promote3(a: &Shape, b: &Shape, c: &Shape) -> crate::Result<Shape> {
        let ab = Shape::promote(a, b)?;
        Shape::promote(&ab, c)
    }

    /// Return broadcast strides mapping this shape into a target shape.
    ///
    /// For each dimension where self.dim == 1 and target.dim > 1, the
    /// stride is 0 (repeating the single element). Missing leading
    /// dimensions also get stride 0. The caller must have verified
    /// `can_promote_to(target)`.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let self_dims = self.dims();
        let target_dims = target.dims();
        let self_strides = self.stride_contiguous();

        let mut result = vec![0usize; target_dims.len()];
        let offset = target_dims.len() - self_dims.len();

        for i in 0..self_dims.len() {
            if self_dims[i] == target_dims[i + offset] {
                result[i + offset] = self_strides[i];
            } else {
                // self_dims[i] must be 1 → stride 0 (repeat)
                result[i + offset] = 0;
            }
        }
        // Leading dimensions (offset region) are already 0
        result
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// Convenient From implementations
// These let you write: Shape::from((3, 4)) instead of Shape::new(vec![3, 4])

impl From<()> for Shape {
    /// Scalar shape (0 dimensions).
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    /// 1-D shape.
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize,)> for Shape {
    fn from((d0,): (usize,)) -> Self {
        Shape(vec![d0])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::from(());
        assert_eq!(s.rank(), 0);
        assert_eq!(s.elem_count(), 1);
        assert_eq!(s.stride_contiguous(), vec![]);
    }

    #[test]
    fn test_matrix_shape() {
        let s = Shape::from((3, 4));
        assert_eq!(s.rank(), 2);
        assert_eq!(s.elem_count(), 12);
        assert_eq!(s.stride_contiguous(), vec![4, 1]);
    }

    #[test]
    fn test_can_promote_to() {
        assert!(Shape::from(4).can_promote_to(&Shape::from((3, 4))));
        assert!(Shape::from((2, 1)).can_promote_to(&Shape::from((2, 3))));
        assert!(Shape::from(()).can_promote_to(&Shape::from((5, 5))));
        assert!(Shape::from((2, 3)).can_promote_to(&Shape::from((2, 3))));
        assert!(!Shape::from(3).can_promote_to(&Shape::from(4)));
        assert!(!Shape::from((2, 3)).can_promote_to(&Shape::from(3)));
    }

    #[test]
    fn test_promote() {
        let s = Shape::promote(&Shape::from((3, 4)), &Shape::from(4)).unwrap();
        assert_eq!(s, Shape::from((3, 4)));
        let s = Shape::promote(&Shape::from((2, 1)), &Shape::from((1, 3))).unwrap();
        assert_eq!(s, Shape::from((2, 3)));
        let s = Shape::promote(&Shape::from((5, 3, 1)), &Shape::from((3, 4))).unwrap();
        assert_eq!(s, Shape::from((5, 3, 4)));
        assert!(Shape::promote(&Shape::from(3), &Shape::from(4)).is_err());
    }

    #[test]
    fn test_promote_failure_names_both_shapes() {
        let err = Shape::promote(&Shape::from(3), &Shape::from(4)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("[3]"), "message was: {msg}");
        assert!(msg.contains("[4]"), "message was: {msg}");
        assert!(msg.contains("broadcast"), "message was: {msg}");
    }

    #[test]
    fn test_promote3() {
        let s = Shape::promote3(
            &Shape::from((2, 1)),
            &Shape::from(3),
            &Shape::from(()),
        )
        .unwrap();
        assert_eq!(s, Shape::from((2, 3)));
    }

    #[test]
    fn test_broadcast_strides() {
        // [4] into [3, 4]: leading axis repeats (stride 0), trailing walks.
        let s = Shape::from(4).broadcast_strides(&Shape::from((3, 4)));
        assert_eq!(s, vec![0, 1]);
        // [2, 1] into [2, 3]: size-1 axis repeats.
        let s = Shape::from((2, 1)).broadcast_strides(&Shape::from((2, 3)));
        assert_eq!(s, vec![1, 0]);
    }

    #[test]
    fn test_display() {
        let s = Shape::from((3, 4));
        assert_eq!(format!("{}", s), "[3, 4]");
    }
}
