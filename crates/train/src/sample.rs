//! Periodic PNG snapshots of (input, prediction, ground truth).

use std::path::{Path, PathBuf};

use candle_core::Tensor;

use sensing_common::save_png;

/// Snapshot every this many epochs...
pub const SAMPLE_EPOCH_INTERVAL: usize = 10;
/// ...on every this many batches.
pub const SAMPLE_BATCH_INTERVAL: usize = 50;

/// `epoch` and `batch` are 0-based.
pub fn should_sample(epoch: usize, batch: usize) -> bool {
    epoch % SAMPLE_EPOCH_INTERVAL == 0 && batch % SAMPLE_BATCH_INTERVAL == 0
}

/// Write the first element of each `(B, C, H, W)` batch as
/// `e{epoch}_b{batch}_{in,pred,gt}.png` under `dir`.
pub fn save_sample_triplet(
    dir: &Path,
    epoch: usize,
    batch: usize,
    input: &Tensor,
    prediction: &Tensor,
    target: &Tensor,
) -> anyhow::Result<[PathBuf; 3]> {
    let stem = format!("e{epoch}_b{batch}");
    let paths = [
        dir.join(format!("{stem}_in.png")),
        dir.join(format!("{stem}_pred.png")),
        dir.join(format!("{stem}_gt.png")),
    ];
    for (t, path) in [input, prediction, target].into_iter().zip(paths.iter()) {
        save_png(&t.get(0)?, path)?;
    }
    Ok(paths)
}
