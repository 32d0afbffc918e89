use std::sync::Arc;

use crate::device::Device;
use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::shape::Shape;

// Tensor — The materialized dense value
//
// A Tensor is an n-dimensional array of numbers that has already been
// computed. It is IMMUTABLE: once materialized, a value is only ever read.
// The single writer of any buffer is the evaluation unit that produced it,
// and that write happens before the Tensor is constructed.
//
// MEMORY MODEL:
//
//   The buffer is wrapped in Arc, so cloning a Tensor is cheap (refcount
//   increment) and many consumers can read the same value without copy.
//   The storage lives as long as its longest-held reference — a layer's
//   buffered forward activation keeps the value alive until the matching
//   backward call consumes it.
//
// Contrast with the pending side of the library: a Tensor is what an
// expression node becomes after evaluation; see `expr` for the lazy half.

/// Dense storage on the CPU device: one contiguous, row-major vec per dtype.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    F16(Vec<half::f16>),
    BF16(Vec<half::bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl CpuStorage {
    /// The data type of the elements in this storage.
    pub fn dtype(&self) -> DType {
        match self {
            CpuStorage::F16(_) => DType::F16,
            CpuStorage::BF16(_) => DType::BF16,
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F64(_) => DType::F64,
        }
    }

    /// Total number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            CpuStorage::F16(v) => v.len(),
            CpuStorage::BF16(v) => v.len(),
            CpuStorage::F32(v) => v.len(),
            CpuStorage::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out as f64 (for host-side inspection and tests).
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            CpuStorage::F16(v) => v.iter().map(|x| x.to_f64()).collect(),
            CpuStorage::BF16(v) => v.iter().map(|x| x.to_f64()).collect(),
            CpuStorage::F32(v) => v.iter().map(|x| x.to_f64()).collect(),
            CpuStorage::F64(v) => v.clone(),
        }
    }

    /// Build storage of the given dtype from f64 host data.
    pub fn from_f64_slice(data: &[f64], dtype: DType) -> Self {
        match dtype {
            DType::F16 => CpuStorage::F16(data.iter().map(|&x| half::f16::from_f64(x)).collect()),
            DType::BF16 => {
                CpuStorage::BF16(data.iter().map(|&x| half::bf16::from_f64(x)).collect())
            }
            DType::F32 => CpuStorage::F32(data.iter().map(|&x| x as f32).collect()),
            DType::F64 => CpuStorage::F64(data.to_vec()),
        }
    }

    /// Storage of `count` copies of a constant.
    pub fn full(val: f64, count: usize, dtype: DType) -> Self {
        match dtype {
            DType::F16 => CpuStorage::F16(vec![half::f16::from_f64(val); count]),
            DType::BF16 => CpuStorage::BF16(vec![half::bf16::from_f64(val); count]),
            DType::F32 => CpuStorage::F32(vec![val as f32; count]),
            DType::F64 => CpuStorage::F64(vec![val; count]),
        }
    }
}

/// An immutable n-dimensional array on a specific device.
///
/// Cloning shares the underlying storage; a Tensor is never mutated after
/// construction.
///
/// # Example
/// ```ignore
/// let a = Tensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F32, Device::Cpu)?;
/// assert_eq!(a.dims(), &[2, 2]);
/// ```
#[derive(Clone)]
pub struct Tensor {
    storage: Arc<CpuStorage>,
    shape: Shape,
    device: Device,
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, device={})",
            self.shape,
            self.dtype(),
            self.device,
        )
    }
}

impl Tensor {
    /// Create a tensor from existing storage. The storage length must
    /// match the shape's element count.
    pub fn from_storage(storage: CpuStorage, shape: impl Into<Shape>, device: Device) -> Result<Self> {
        let shape = shape.into();
        if storage.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: storage.len(),
                shape,
            });
        }
        Ok(Tensor {
            storage: Arc::new(storage),
            shape,
            device,
        })
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType, device: Device) -> Result<Self> {
        let shape = shape.into();
        let storage = CpuStorage::full(0.0, shape.elem_count(), dtype);
        Self::from_storage(storage, shape, device)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: impl Into<Shape>, val: f64, dtype: DType, device: Device) -> Result<Self> {
        let shape = shape.into();
        let storage = CpuStorage::full(val, shape.elem_count(), dtype);
        Self::from_storage(storage, shape, device)
    }

    /// Create a tensor from a flat f64 slice, converting to the target dtype.
    pub fn from_f64_slice(
        data: &[f64],
        shape: impl Into<Shape>,
        dtype: DType,
        device: Device,
    ) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        Self::from_storage(CpuStorage::from_f64_slice(data, dtype), shape, device)
    }

    /// Create a tensor from a typed vec without conversion.
    pub fn from_vec<T: WithDType>(
        data: Vec<T>,
        shape: impl Into<Shape>,
        device: Device,
    ) -> Result<Self> {
        // qualified call: ToPrimitive::to_f64 (via the Float supertrait)
        // takes &self and returns Option, shadowing the &T receiver
        let f64s: Vec<f64> = data.iter().map(|&x| WithDType::to_f64(x)).collect();
        Self::from_f64_slice(&f64s, shape, T::DTYPE, device)
    }

    // Accessors

    /// The shape of this tensor.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The dimensions as a slice (shortcut for shape().dims()).
    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    /// Number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// Data type of the elements.
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// The device this tensor lives on.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Access the underlying storage (shared, read-only).
    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }

    /// Whether two tensors share the same underlying storage buffer.
    /// True after a clone, or when two reads of the evaluation engine
    /// resolved to the same materialization.
    pub fn same_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Copy all elements out as f64 in row-major order.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.storage.to_f64_vec()
    }

    /// Read a single element by multi-dimensional index.
    pub fn get(&self, indices: &[usize]) -> Result<f64> {
        if indices.len() != self.rank() {
            return Err(Error::DimOutOfRange {
                dim: indices.len(),
                rank: self.rank(),
            });
        }
        let strides = self.shape.stride_contiguous();
        let mut offset = 0usize;
        for (d, (&i, &s)) in indices.iter().zip(strides.iter()).enumerate() {
            if i >= self.shape.dims()[d] {
                return Err(Error::DimOutOfRange {
                    dim: d,
                    rank: self.rank(),
                });
            }
            offset += i * s;
        }
        Ok(match self.storage.as_ref() {
            CpuStorage::F16(v) => v[offset].to_f64(),
            CpuStorage::BF16(v) => v[offset].to_f64(),
            CpuStorage::F32(v) => v[offset] as f64,
            CpuStorage::F64(v) => v[offset],
        })
    }
}
