//! kv-cache-compact: norm-ranked KV-cache compaction for LLM inference.
//!
//! Shrinks an autoregressive model's attention KV cache between forward
//! passes: each eligible layer ranks its cached tokens by key-vector L2 norm
//! and keeps only the smallest-norm fraction, truncating keys and values
//! together so the next pass consumes the cache unchanged in structure.
//!
//! The transform is stateless, synchronous, and pure: the snapshot goes in
//! by value, a smaller equivalent-shape snapshot comes out, and any
//! malformed input fails the whole call before a single layer is altered.

pub mod cache;
pub mod config;

pub use cache::compactor::{compact, compact_with_scorer, layer_decision, LayerDecision};
pub use cache::error::CompactionError;
pub use cache::scorer::{L2NormScorer, TokenScorer};
pub use cache::snapshot::{CacheSnapshot, LayerCache};
pub use cache::tensor::{CacheElement, KvTensor, TensorShape};
pub use config::CompactionConfig;
