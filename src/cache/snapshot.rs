//! Cache snapshot types: one key/value tensor pair per transformer layer.
//!
//! A snapshot is produced by the inference runtime after a forward pass,
//! passed once through the compactor, and consumed by the next pass. The
//! compactor takes it by value and hands back a new one; nothing is retained
//! across calls.

use crate::cache::error::CompactionError;
use crate::cache::tensor::{CacheElement, KvTensor, TensorShape};

/// The cached keys and values of a single transformer layer.
///
/// Invariant: `keys` and `values` have identical shape. The compactor checks
/// this before touching any data and refuses the whole snapshot on mismatch.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerCache<T: CacheElement> {
    pub keys: KvTensor<T>,
    pub values: KvTensor<T>,
}

impl<T: CacheElement> LayerCache<T> {
    pub fn new(keys: KvTensor<T>, values: KvTensor<T>) -> Self {
        Self { keys, values }
    }

    /// Number of cached tokens in this layer.
    pub fn seq_len(&self) -> usize {
        self.keys.seq_len()
    }

    /// Storage size of both tensors in bytes.
    pub fn byte_size(&self) -> usize {
        self.keys.byte_size() + self.values.byte_size()
    }

    /// Check the key/value shape invariant.
    pub fn validate(&self, layer: usize) -> Result<(), CompactionError> {
        if self.keys.shape() != self.values.shape() {
            return Err(CompactionError::KeyValueShapeMismatch {
                layer,
                keys: self.keys.shape(),
                values: self.values.shape(),
            });
        }
        Ok(())
    }
}

/// The full KV cache of a model: one [`LayerCache`] per layer, ordered by
/// model depth.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot<T: CacheElement> {
    pub layers: Vec<LayerCache<T>>,
}

impl<T: CacheElement> CacheSnapshot<T> {
    pub fn new(layers: Vec<LayerCache<T>>) -> Self {
        Self { layers }
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Sum of cached tokens across layers.
    pub fn total_tokens(&self) -> usize {
        self.layers.iter().map(|l| l.seq_len()).sum()
    }

    /// Total storage in bytes across all layers, keys and values.
    pub fn byte_size(&self) -> usize {
        self.layers.iter().map(|l| l.byte_size()).sum()
    }

    /// Validate the whole snapshot: non-empty, keys/values agree per layer,
    /// and `batch`/`heads` are uniform across layers. `head_dim` may vary.
    pub fn validate(&self) -> Result<(), CompactionError> {
        if self.layers.is_empty() {
            return Err(CompactionError::EmptySnapshot);
        }

        let reference: TensorShape = self.layers[0].keys.shape();
        for (layer, cache) in self.layers.iter().enumerate() {
            cache.validate(layer)?;

            let shape = cache.keys.shape();
            if shape.batch != reference.batch {
                return Err(CompactionError::InconsistentLayerShape {
                    layer,
                    axis: "batch",
                    expected: reference.batch,
                    actual: shape.batch,
                });
            }
            if shape.heads != reference.heads {
                return Err(CompactionError::InconsistentLayerShape {
                    layer,
                    axis: "heads",
                    expected: reference.heads,
                    actual: shape.heads,
                });
            }
        }
        Ok(())
    }
}
