//! The cache compactor: per-layer norm-ranked token eviction.
//!
//! For each layer that is eligible (not skipped, long enough), every
//! `(batch, head)` slice ranks its tokens by key-vector score and keeps the
//! `ceil(keep_ratio * seq_len)` tokens with the SMALLEST scores; the
//! largest-score tokens are the ones dropped. Keys and values move together
//! through the same permutation, so a retained token's key and value rows
//! always originate from the same position.
//!
//! Layers are mutually independent and processed in parallel; any per-layer
//! failure aborts the whole call.

use rayon::prelude::*;
use tracing::debug;

use crate::cache::error::CompactionError;
use crate::cache::scorer::{L2NormScorer, TokenScorer};
use crate::cache::snapshot::{CacheSnapshot, LayerCache};
use crate::cache::tensor::CacheElement;
use crate::config::CompactionConfig;

/// What happens to one layer, decided before any tensor work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerDecision {
    /// The layer is moved through unchanged, order preserved.
    PassThrough,
    /// The layer is rank-and-truncate compacted.
    Compact,
}

/// Decide whether a layer is compacted.
///
/// `keep_ratio == 1.0` is a guaranteed identity transform, skip-listed
/// layers are exempt regardless of length, and the length threshold is
/// strict: a layer with `seq_len == prune_after` IS compacted.
pub fn layer_decision(layer: usize, seq_len: usize, config: &CompactionConfig) -> LayerDecision {
    if config.keep_ratio == 1.0
        || config.skip_layers.contains(&layer)
        || seq_len < config.prune_after
    {
        LayerDecision::PassThrough
    } else {
        LayerDecision::Compact
    }
}

/// Retained token count: `ceil(keep_ratio * seq_len)`, clamped to `seq_len`.
///
/// Ceiling, not truncation: ratio 0.6 on 13 tokens keeps 8, not 7.
pub fn tokens_to_keep(keep_ratio: f64, seq_len: usize) -> usize {
    let kept = (keep_ratio * seq_len as f64).ceil() as usize;
    kept.min(seq_len)
}

/// Compact a snapshot with the default L2-norm scorer.
///
/// Consumes the snapshot and returns a new one with the same layer count and
/// order; pass-through layers are moved, not copied. See
/// [`compact_with_scorer`] for the pluggable-scorer variant.
pub fn compact<T: CacheElement>(
    snapshot: CacheSnapshot<T>,
    config: &CompactionConfig,
) -> Result<CacheSnapshot<T>, CompactionError> {
    compact_with_scorer(snapshot, config, &L2NormScorer)
}

/// Compact a snapshot, ranking tokens with the given scorer.
pub fn compact_with_scorer<T, S>(
    snapshot: CacheSnapshot<T>,
    config: &CompactionConfig,
    scorer: &S,
) -> Result<CacheSnapshot<T>, CompactionError>
where
    T: CacheElement,
    S: TokenScorer<T>,
{
    config.validate()?;
    snapshot.validate()?;

    let layers = snapshot
        .layers
        .into_par_iter()
        .enumerate()
        .map(
            |(layer, cache)| match layer_decision(layer, cache.seq_len(), config) {
                LayerDecision::PassThrough => Ok(cache),
                LayerDecision::Compact => compact_layer(layer, cache, config.keep_ratio, scorer),
            },
        )
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CacheSnapshot::new(layers))
}

fn compact_layer<T, S>(
    layer: usize,
    cache: LayerCache<T>,
    keep_ratio: f64,
    scorer: &S,
) -> Result<LayerCache<T>, CompactionError>
where
    T: CacheElement,
    S: TokenScorer<T>,
{
    let shape = cache.keys.shape();
    let seq_len = shape.seq_len;
    let kept_len = tokens_to_keep(keep_ratio, seq_len);

    // One kept-index list per (batch, head) slice, b-major.
    let mut kept = Vec::with_capacity(shape.batch * shape.heads);
    let mut scores = Vec::with_capacity(seq_len);
    for b in 0..shape.batch {
        for h in 0..shape.heads {
            scores.clear();
            for t in 0..seq_len {
                let score = scorer.score(cache.keys.token_row(b, h, t));
                if !score.is_finite() {
                    return Err(CompactionError::NonFiniteScore {
                        layer,
                        batch: b,
                        head: h,
                        position: t,
                    });
                }
                scores.push(score);
            }

            // Ascending by score; equal scores fall back to original position
            // so the permutation is identical on every run.
            let mut order: Vec<usize> = (0..seq_len).collect();
            order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));
            order.truncate(kept_len);
            kept.push(order);
        }
    }

    let keys = cache.keys.gather_tokens(&kept, kept_len);
    let values = cache.values.gather_tokens(&kept, kept_len);

    debug!(layer, seq_len, kept = kept_len, "compacted layer");

    Ok(LayerCache::new(keys, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(keep_ratio: f64, prune_after: usize, skip: &[usize]) -> CompactionConfig {
        CompactionConfig {
            keep_ratio,
            prune_after,
            skip_layers: skip.iter().copied().collect(),
        }
    }

    #[test]
    fn test_tokens_to_keep_uses_ceiling() {
        assert_eq!(tokens_to_keep(0.6, 13), 8); // ceil(7.8)
        assert_eq!(tokens_to_keep(0.5, 10), 5);
        assert_eq!(tokens_to_keep(1.0, 7), 7);
        assert_eq!(tokens_to_keep(0.01, 3), 1);
        assert_eq!(tokens_to_keep(0.99, 10), 10); // ceil(9.9), clamped no-op
    }

    #[test]
    fn test_decision_threshold_is_strict() {
        let cfg = config(0.5, 8, &[]);
        assert_eq!(layer_decision(0, 7, &cfg), LayerDecision::PassThrough);
        assert_eq!(layer_decision(0, 8, &cfg), LayerDecision::Compact);
        assert_eq!(layer_decision(0, 9, &cfg), LayerDecision::Compact);
    }

    #[test]
    fn test_decision_skip_layers_win() {
        let cfg = config(0.5, 0, &[3]);
        assert_eq!(layer_decision(3, 1000, &cfg), LayerDecision::PassThrough);
        assert_eq!(layer_decision(2, 1000, &cfg), LayerDecision::Compact);
        // Out-of-range skip indices are simply never matched.
        let cfg = config(0.5, 0, &[99]);
        assert_eq!(layer_decision(0, 1000, &cfg), LayerDecision::Compact);
    }

    #[test]
    fn test_decision_unit_ratio_is_identity() {
        let cfg = config(1.0, 0, &[]);
        assert_eq!(layer_decision(0, 1000, &cfg), LayerDecision::PassThrough);
    }
}
