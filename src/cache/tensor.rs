//! Dense 4-D tensors for cached keys and values.
//!
//! Layout is row-major `(batch, heads, seq_len, head_dim)`: the token rows of
//! one `(batch, head)` slice are contiguous, which is what the per-slice
//! scoring and gather loops in the compactor iterate over.

use half::f16;
use serde::{Deserialize, Serialize};

use crate::cache::error::CompactionError;

/// Element type a cache tensor can hold.
///
/// Scores are always accumulated in f32 regardless of storage precision, so
/// an FP16 cache ranks its tokens exactly like the FP32 cache holding the
/// same values.
pub trait CacheElement: Copy + Send + Sync + PartialEq + std::fmt::Debug + 'static {
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
}

impl CacheElement for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl CacheElement for f16 {
    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
}

/// The four axes of a cache tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorShape {
    /// Batch size.
    pub batch: usize,

    /// Number of KV heads.
    pub heads: usize,

    /// Number of cached tokens.
    pub seq_len: usize,

    /// Per-head embedding width.
    pub head_dim: usize,
}

impl TensorShape {
    pub fn new(batch: usize, heads: usize, seq_len: usize, head_dim: usize) -> Self {
        Self {
            batch,
            heads,
            seq_len,
            head_dim,
        }
    }

    /// Total number of elements a tensor of this shape holds.
    pub fn elem_count(&self) -> usize {
        self.batch * self.heads * self.seq_len * self.head_dim
    }

    /// Flat offset of the first element of token row `(b, h, t)`.
    #[inline]
    pub fn row_offset(&self, b: usize, h: usize, t: usize) -> usize {
        ((b * self.heads + h) * self.seq_len + t) * self.head_dim
    }

    /// The same shape with a different number of cached tokens.
    pub fn with_seq_len(&self, seq_len: usize) -> Self {
        Self { seq_len, ..*self }
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.batch, self.heads, self.seq_len, self.head_dim
        )
    }
}

/// A dense key or value tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct KvTensor<T: CacheElement> {
    shape: TensorShape,
    data: Vec<T>,
}

impl<T: CacheElement> KvTensor<T> {
    /// Zero-filled tensor of the given shape.
    pub fn zeros(shape: TensorShape) -> Self {
        Self {
            shape,
            data: vec![T::from_f32(0.0); shape.elem_count()],
        }
    }

    /// Wrap an existing buffer. The buffer length must match the shape.
    pub fn from_vec(shape: TensorShape, data: Vec<T>) -> Result<Self, CompactionError> {
        if data.len() != shape.elem_count() {
            return Err(CompactionError::DataLength {
                expected: shape.elem_count(),
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    pub fn seq_len(&self) -> usize {
        self.shape.seq_len
    }

    /// The embedding row of token `t` in slice `(b, h)`.
    #[inline]
    pub fn token_row(&self, b: usize, h: usize, t: usize) -> &[T] {
        let start = self.shape.row_offset(b, h, t);
        &self.data[start..start + self.shape.head_dim]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Storage size in bytes.
    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<T>()
    }

    /// New tensor keeping, per `(batch, head)` slice, the token rows listed in
    /// that slice's entry of `kept`, in the listed order.
    ///
    /// `kept` holds one index list per `(b, h)` slice, in `b`-major order, and
    /// every list must have the same length (the new `seq_len`).
    pub(crate) fn gather_tokens(&self, kept: &[Vec<usize>], new_seq_len: usize) -> Self {
        let shape = self.shape.with_seq_len(new_seq_len);
        let mut data = Vec::with_capacity(shape.elem_count());
        for b in 0..self.shape.batch {
            for h in 0..self.shape.heads {
                let slice_kept = &kept[b * self.shape.heads + h];
                for &t in slice_kept {
                    data.extend_from_slice(self.token_row(b, h, t));
                }
            }
        }
        Self { shape, data }
    }
}
