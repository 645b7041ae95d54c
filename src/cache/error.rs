//! Error taxonomy for cache compaction.
//!
//! Every failure is detected synchronously inside [`compact`] and aborts the
//! whole call: a snapshot with only some layers compacted would desynchronize
//! every subsequent forward pass, so partial results are never returned.
//!
//! [`compact`]: crate::cache::compactor::compact

use thiserror::Error;

use crate::cache::tensor::TensorShape;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompactionError {
    #[error("keep_ratio {0} is outside (0, 1]")]
    InvalidKeepRatio(f64),

    #[error("snapshot contains no layers")]
    EmptySnapshot,

    #[error("layer {layer}: keys shape {keys} does not match values shape {values}")]
    KeyValueShapeMismatch {
        layer: usize,
        keys: TensorShape,
        values: TensorShape,
    },

    #[error("layer {layer}: {axis} is {actual}, but earlier layers have {expected}")]
    InconsistentLayerShape {
        layer: usize,
        axis: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("tensor data holds {actual} elements, shape requires {expected}")]
    DataLength { expected: usize, actual: usize },

    #[error(
        "non-finite score for layer {layer} batch {batch} head {head} token {position}; \
         cache contains NaN or Inf key data"
    )]
    NonFiniteScore {
        layer: usize,
        batch: usize,
        head: usize,
        position: usize,
    },
}
