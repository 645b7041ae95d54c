//! Demo driver: synthesize a KV cache snapshot, compact it, report savings.
//!
//! Builds a deterministic workload from the configured model shape, runs the
//! compactor once, and logs per-run token counts, byte sizes, and timing.

use std::time::Instant;

use clap::Parser;
use tracing::info;

use kv_cache_compact::cache::compactor::compact;
use kv_cache_compact::cache::snapshot::{CacheSnapshot, LayerCache};
use kv_cache_compact::cache::tensor::{KvTensor, TensorShape};
use kv_cache_compact::config::{Cli, Config, ModelConfig};

/// Deterministic synthetic cache: element values come from a multiplicative
/// hash of the flat index, so runs are reproducible without an RNG.
fn synthesize_snapshot(model: &ModelConfig) -> anyhow::Result<CacheSnapshot<f32>> {
    let shape = TensorShape::new(
        model.batch_size,
        model.n_kv_heads,
        model.seq_len,
        model.head_dim,
    );

    let fill = |salt: u32| -> Vec<f32> {
        (0..shape.elem_count())
            .map(|i| {
                let mixed = (i as u32).wrapping_add(salt).wrapping_mul(2_654_435_761);
                (mixed % 2048) as f32 / 1024.0 - 1.0
            })
            .collect()
    };

    let mut layers = Vec::with_capacity(model.n_layers);
    for layer in 0..model.n_layers {
        let keys = KvTensor::from_vec(shape, fill(layer as u32 * 2))?;
        let values = KvTensor::from_vec(shape, fill(layer as u32 * 2 + 1))?;
        layers.push(LayerCache::new(keys, values));
    }
    Ok(CacheSnapshot::new(layers))
}

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "kv_cache_compact=debug"
    } else {
        "kv_cache_compact=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("kv-cache-compact v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration, applying CLI overrides.
    let mut config = Config::load(&cli.config)?;
    if let Some(keep_ratio) = cli.keep_ratio {
        config.compaction.keep_ratio = keep_ratio;
    }
    if let Some(prune_after) = cli.prune_after {
        config.compaction.prune_after = prune_after;
    }
    config.compaction.validate()?;

    info!(
        n_layers = config.model.n_layers,
        n_kv_heads = config.model.n_kv_heads,
        head_dim = config.model.head_dim,
        seq_len = config.model.seq_len,
        "Configuration loaded"
    );
    info!(
        keep_ratio = config.compaction.keep_ratio,
        prune_after = config.compaction.prune_after,
        skip_layers = ?config.compaction.skip_layers,
        cache_bytes = config.cache_bytes(),
        "Compaction settings"
    );

    // Synthesize the workload.
    let snapshot = synthesize_snapshot(&config.model)?;
    let tokens_before = snapshot.total_tokens();
    let bytes_before = snapshot.byte_size();

    // Compact.
    let start = Instant::now();
    let compacted = compact(snapshot, &config.compaction)?;
    let elapsed = start.elapsed();

    let tokens_after = compacted.total_tokens();
    let bytes_after = compacted.byte_size();

    info!(
        tokens_before,
        tokens_after,
        bytes_before,
        bytes_after,
        saved_bytes = bytes_before - bytes_after,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "Compaction complete"
    );

    Ok(())
}
