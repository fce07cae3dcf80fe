//! Data pipeline: paired image loading, random crops, shuffled batching.
//!
//! A sample is an `(input, target)` pair of `(C, H, W)` tensors in `[0, 1]`;
//! a batch stacks them to `(B, C, H, W)`.
//!
//! * **[`ImagePairFolder`]** — degraded/clean images matched by file name.
//! * **[`TensorPairs`]** — in-memory pairs (synthetic data, tests).
//! * **[`PairLoader`]** — per-epoch shuffle, batching, optional prefetch thread.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result as AnyhowResult};
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::imageio::{crop_to_multiple, image_to_tensor, load_image};

/// File extensions picked up by [`ImagePairFolder`].
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Prefetched batches held per loader worker.
const PREFETCH_PER_WORKER: usize = 2;

// ── PairDataset trait ───────────────────────────────────────────────────────

/// Random-access source of `(input, target)` pairs.
///
/// `seed` drives any per-sample randomness (crop offsets) so results do not
/// depend on which thread decodes the sample.
pub trait PairDataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize, seed: u64) -> AnyhowResult<(Tensor, Tensor)>;
}

// ── ImagePairFolder ─────────────────────────────────────────────────────────

/// Pairs `input_dir/<name>` with `target_dir/<name>`.
///
/// Inputs are decoded with `input_channels`, targets with
/// `target_channels`, so a grayscale-to-RGB model gets matching shapes.
pub struct ImagePairFolder {
    pairs: Vec<(PathBuf, PathBuf)>,
    crop_size: usize,
    input_channels: usize,
    target_channels: usize,
    spatial_multiple: usize,
}

impl ImagePairFolder {
    /// Scan both directories. `crop_size == 0` keeps full images, trimmed
    /// to the spatial multiple (see [`Self::with_spatial_multiple`]).
    pub fn open(
        input_dir: &Path,
        target_dir: &Path,
        crop_size: usize,
        input_channels: usize,
        target_channels: usize,
    ) -> AnyhowResult<Self> {
        if crop_size % 2 != 0 {
            anyhow::bail!("crop_size must be even, got {crop_size}");
        }
        let mut pairs = Vec::new();
        for target in collect_images(target_dir)? {
            let Some(name) = target.file_name() else {
                continue;
            };
            let input = input_dir.join(name);
            if input.is_file() {
                pairs.push((input, target));
            } else {
                tracing::warn!(target = %target.display(), "no matching input image, skipping");
            }
        }
        if pairs.is_empty() {
            anyhow::bail!(
                "no image pairs found between {} and {}",
                input_dir.display(),
                target_dir.display()
            );
        }
        Ok(Self {
            pairs,
            crop_size,
            input_channels,
            target_channels,
            spatial_multiple: 2,
        })
    }

    /// Full images are cropped so H and W divide by `m`. Defaults to 2.
    pub fn with_spatial_multiple(mut self, m: usize) -> Self {
        self.spatial_multiple = m.max(1);
        self
    }

    pub fn paths(&self) -> &[(PathBuf, PathBuf)] {
        &self.pairs
    }
}

impl PairDataset for ImagePairFolder {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn get(&self, index: usize, seed: u64) -> AnyhowResult<(Tensor, Tensor)> {
        let (input_path, target_path) = &self.pairs[index];
        let mut input = load_image(input_path, self.input_channels)?;
        let mut target = load_image(target_path, self.target_channels)?;
        if (input.width(), input.height()) != (target.width(), target.height()) {
            anyhow::bail!(
                "size mismatch: {} is {}x{}, {} is {}x{}",
                input_path.display(),
                input.width(),
                input.height(),
                target_path.display(),
                target.width(),
                target.height()
            );
        }

        if self.crop_size > 0 {
            let crop = self.crop_size as u32;
            let (w, h) = (input.width(), input.height());
            if w < crop || h < crop {
                anyhow::bail!(
                    "{} ({w}x{h}) is smaller than crop_size {crop}",
                    input_path.display()
                );
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let x = rng.gen_range(0..=w - crop);
            let y = rng.gen_range(0..=h - crop);
            input = input.crop_imm(x, y, crop, crop);
            target = target.crop_imm(x, y, crop, crop);
        }

        let input = image_to_tensor(&input, &Device::Cpu)?;
        let target = image_to_tensor(&target, &Device::Cpu)?;
        if self.crop_size == 0 {
            return Ok((
                crop_to_multiple(&input, self.spatial_multiple)?,
                crop_to_multiple(&target, self.spatial_multiple)?,
            ));
        }
        Ok((input, target))
    }
}

// ── TensorPairs ─────────────────────────────────────────────────────────────

/// Pairs already in memory; `get` ignores the seed.
pub struct TensorPairs {
    pairs: Vec<(Tensor, Tensor)>,
}

impl TensorPairs {
    pub fn new(pairs: Vec<(Tensor, Tensor)>) -> Self {
        Self { pairs }
    }
}

impl PairDataset for TensorPairs {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn get(&self, index: usize, _seed: u64) -> AnyhowResult<(Tensor, Tensor)> {
        Ok(self.pairs[index].clone())
    }
}

// ── PairLoader ──────────────────────────────────────────────────────────────

/// Shuffled mini-batches over a [`PairDataset`].
///
/// The last batch of an epoch may be smaller than `batch_size`. With
/// `num_workers > 0` a producer thread runs ahead of the training loop and
/// decodes each batch's samples in parallel.
pub struct PairLoader<D> {
    dataset: Arc<D>,
    batch_size: usize,
    num_workers: usize,
    seed: u64,
}

impl<D: PairDataset + 'static> PairLoader<D> {
    pub fn new(dataset: D, batch_size: usize, num_workers: usize, seed: u64) -> Self {
        Self {
            dataset: Arc::new(dataset),
            batch_size: batch_size.max(1),
            num_workers,
            seed,
        }
    }

    /// Number of samples in the underlying dataset.
    pub fn num_samples(&self) -> usize {
        self.dataset.len()
    }

    /// Batches per epoch.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Sample order for `epoch`. Same seed and epoch give the same order.
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        let mut rng = StdRng::seed_from_u64(mix_seed(self.seed, epoch as u64, u64::MAX));
        order.shuffle(&mut rng);
        order
    }

    /// Iterate over one epoch's batches.
    pub fn epoch(&self, epoch: usize) -> EpochBatches {
        let chunks: Vec<Vec<usize>> = self
            .epoch_order(epoch)
            .chunks(self.batch_size)
            .map(|c| c.to_vec())
            .collect();
        let seed = self.seed;

        if self.num_workers == 0 {
            let dataset = Arc::clone(&self.dataset);
            let mut chunks = chunks.into_iter();
            let next: Box<dyn FnMut() -> Option<AnyhowResult<(Tensor, Tensor)>> + Send> =
                Box::new(move || {
                    chunks
                        .next()
                        .map(|idx| load_batch(dataset.as_ref(), &idx, seed, epoch, false))
                });
            return EpochBatches::Inline(next);
        }

        let (tx, rx) = mpsc::sync_channel(self.num_workers * PREFETCH_PER_WORKER);
        let dataset = Arc::clone(&self.dataset);
        let producer = thread::spawn(move || {
            for idx in chunks {
                let batch = load_batch(dataset.as_ref(), &idx, seed, epoch, true);
                if tx.send(batch).is_err() {
                    return;
                }
            }
        });
        EpochBatches::Prefetch {
            rx,
            producer: Some(producer),
        }
    }
}

/// Iterator returned by [`PairLoader::epoch`].
pub enum EpochBatches {
    Inline(Box<dyn FnMut() -> Option<AnyhowResult<(Tensor, Tensor)>> + Send>),
    Prefetch {
        rx: Receiver<AnyhowResult<(Tensor, Tensor)>>,
        producer: Option<JoinHandle<()>>,
    },
}

impl Iterator for EpochBatches {
    type Item = AnyhowResult<(Tensor, Tensor)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EpochBatches::Inline(next) => next(),
            EpochBatches::Prefetch { rx, producer } => match rx.recv() {
                Ok(batch) => Some(batch),
                Err(_) => {
                    if let Some(handle) = producer.take() {
                        if handle.join().is_err() {
                            return Some(Err(anyhow::anyhow!("batch prefetch thread panicked")));
                        }
                    }
                    None
                }
            },
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Load and stack the samples at `indices` into `(B, C, H, W)` tensors.
fn load_batch<D: PairDataset + ?Sized>(
    dataset: &D,
    indices: &[usize],
    seed: u64,
    epoch: usize,
    parallel: bool,
) -> AnyhowResult<(Tensor, Tensor)> {
    let fetch = |&i: &usize| dataset.get(i, mix_seed(seed, epoch as u64, i as u64));
    let samples: Vec<(Tensor, Tensor)> = if parallel {
        indices.par_iter().map(fetch).collect::<AnyhowResult<_>>()?
    } else {
        indices.iter().map(fetch).collect::<AnyhowResult<_>>()?
    };
    let (inputs, targets): (Vec<Tensor>, Vec<Tensor>) = samples.into_iter().unzip();
    let input = Tensor::stack(&inputs, 0).context("stack input batch")?;
    let target = Tensor::stack(&targets, 0).context("stack target batch")?;
    Ok((input, target))
}

/// SplitMix-style mixing so neighbouring epochs/indices get unrelated seeds.
fn mix_seed(seed: u64, epoch: u64, index: u64) -> u64 {
    let mut z = seed
        .wrapping_add(epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(index.wrapping_mul(0xBF58_476D_1CE4_E5B9));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Image files directly inside `dir`, sorted by name.
fn collect_images(dir: &Path) -> AnyhowResult<Vec<PathBuf>> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect();
    out.sort();
    Ok(out)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, IndexOp};
    use image::{Rgb, RgbImage};

    fn constant_pairs(n: usize) -> TensorPairs {
        let pairs = (0..n)
            .map(|i| {
                let x = Tensor::full(i as f32, (1, 2, 2), &Device::Cpu).unwrap();
                (x.clone(), x)
            })
            .collect();
        TensorPairs::new(pairs)
    }

    fn batch_ids(batch: &Tensor) -> Vec<f32> {
        let b = batch.dim(0).unwrap();
        (0..b)
            .map(|i| batch.i((i, 0, 0, 0)).unwrap().to_scalar::<f32>().unwrap())
            .collect()
    }

    #[test]
    fn loader_len_rounds_up() {
        let loader = PairLoader::new(constant_pairs(5), 2, 0, 0);
        assert_eq!(loader.len(), 3);
        assert_eq!(loader.num_samples(), 5);
    }

    #[test]
    fn epoch_covers_every_sample_once() {
        let loader = PairLoader::new(constant_pairs(7), 3, 0, 42);
        let mut seen = Vec::new();
        let mut sizes = Vec::new();
        for batch in loader.epoch(0) {
            let (input, _) = batch.unwrap();
            sizes.push(input.dim(0).unwrap());
            seen.extend(batch_ids(&input));
        }
        assert_eq!(sizes, vec![3, 3, 1]);
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, (0..7).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_is_seeded_per_epoch() {
        let loader = PairLoader::new(constant_pairs(32), 4, 0, 7);
        assert_eq!(loader.epoch_order(3), loader.epoch_order(3));
        assert_ne!(loader.epoch_order(0), loader.epoch_order(1));
    }

    #[test]
    fn prefetch_yields_same_batches_as_inline() {
        let inline = PairLoader::new(constant_pairs(10), 4, 0, 1);
        let prefetch = PairLoader::new(constant_pairs(10), 4, 2, 1);
        let a: Vec<Vec<f32>> = inline.epoch(2).map(|b| batch_ids(&b.unwrap().0)).collect();
        let b: Vec<Vec<f32>> = prefetch.epoch(2).map(|b| batch_ids(&b.unwrap().0)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn folder_pairs_by_name_and_crops_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let input_dir = dir.path().join("noisy");
        let target_dir = dir.path().join("clean");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::create_dir_all(&target_dir).unwrap();

        let gradient = RgbImage::from_fn(8, 6, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, 0]));
        gradient.save(input_dir.join("a.png")).unwrap();
        gradient.save(target_dir.join("a.png")).unwrap();
        // Target without an input counterpart is skipped.
        gradient.save(target_dir.join("orphan.png")).unwrap();

        let ds = ImagePairFolder::open(&input_dir, &target_dir, 4, 3, 3).unwrap();
        assert_eq!(ds.len(), 1);
        let (input, target) = ds.get(0, 99).unwrap();
        assert_eq!(input.dims(), &[3, 4, 4]);
        let diff = (input - target)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn folder_rejects_odd_crop_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImagePairFolder::open(dir.path(), dir.path(), 5, 3, 3).is_err());
        assert!(ImagePairFolder::open(dir.path(), dir.path(), 4, 3, 3).is_err());
    }

    #[test]
    fn full_images_are_trimmed_to_even_size() {
        let dir = tempfile::tempdir().unwrap();
        let input_dir = dir.path().join("noisy");
        let target_dir = dir.path().join("clean");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::create_dir_all(&target_dir).unwrap();
        let odd = RgbImage::from_fn(9, 7, |x, y| Rgb([(x * 20) as u8, (y * 30) as u8, 7]));
        odd.save(input_dir.join("a.png")).unwrap();
        odd.save(target_dir.join("a.png")).unwrap();

        let ds = ImagePairFolder::open(&input_dir, &target_dir, 0, 3, 3).unwrap();
        let (input, target) = ds.get(0, 0).unwrap();
        assert_eq!(input.dims(), &[3, 6, 8]);
        assert_eq!(target.dims(), &[3, 6, 8]);

        let ds = ImagePairFolder::open(&input_dir, &target_dir, 0, 3, 3)
            .unwrap()
            .with_spatial_multiple(4);
        assert_eq!(ds.get(0, 0).unwrap().0.dims(), &[3, 4, 8]);
    }

    #[test]
    fn input_and_target_decode_with_their_own_channel_counts() {
        let dir = tempfile::tempdir().unwrap();
        let input_dir = dir.path().join("noisy");
        let target_dir = dir.path().join("clean");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::create_dir_all(&target_dir).unwrap();
        let img = RgbImage::from_fn(4, 4, |x, _| Rgb([(x * 60) as u8, 10, 200]));
        img.save(input_dir.join("a.png")).unwrap();
        img.save(target_dir.join("a.png")).unwrap();

        let ds = ImagePairFolder::open(&input_dir, &target_dir, 4, 1, 3).unwrap();
        let (input, target) = ds.get(0, 5).unwrap();
        assert_eq!(input.dims(), &[1, 4, 4]);
        assert_eq!(target.dims(), &[3, 4, 4]);
    }

    #[test]
    fn batches_have_dataset_dtype() {
        let loader = PairLoader::new(constant_pairs(2), 2, 0, 0);
        let (input, _) = loader.epoch(0).next().unwrap().unwrap();
        assert_eq!(input.dtype(), DType::F32);
        assert_eq!(input.dims(), &[2, 1, 2, 2]);
    }
}
