//! Trainer: encapsulates the adversarial training loop.
//!
//! [`Trainer::step`] runs one generator update followed by one
//! discriminator update on the same batch. [`Trainer::fit`] drives epochs and
//! batches and owns the side effects: LR decay, sample snapshots, progress
//! line and checkpoints.

use std::path::PathBuf;

use anyhow::Context;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use indicatif::{ProgressBar, ProgressStyle};

use sensing_common::{crop_to_multiple, PairDataset, PairLoader, SensingGanConfig};
use sensing_core::{
    discriminator_loss, l1, ssim_loss, Discriminator, GanLoss, Generator, LossWeights,
    PerceptualLoss, VggFeatures,
};

use crate::checkpoint::{CheckpointPolicy, ModelRole, SaveMode};
use crate::progress::{progress_line, EtaClock, LineLosses};
use crate::sample::{save_sample_triplet, should_sample};
use crate::scheduler::LinearDecay;

/// Upper bound when probing CUDA ordinals.
const MAX_CUDA_DEVICES: usize = 16;

// ── Config ──────────────────────────────────────────────────────────────────

/// All training hyper-parameters. Fixed for the duration of a run.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub train_batch_size: usize,
    pub lr_g: f64,
    pub lr_d: f64,
    pub b1: f64,
    pub b2: f64,
    pub weight_decay: f64,
    /// First epoch (0-based) at which both learning rates start decaying.
    pub lr_decrease_epoch: usize,
    pub save_mode: SaveMode,
    pub save_by_epoch: usize,
    pub save_by_iter: usize,
    /// Carried for parity with cuDNN autotuning; candle picks conv
    /// algorithms itself.
    pub cudnn_benchmark: bool,
    pub no_gpu: bool,
    pub multi_gpu: bool,
    pub num_workers: usize,
    pub save_path: PathBuf,
    pub sample_path: PathBuf,
    pub loss_weights: LossWeights,
    /// Safetensors file with VGG16 `features.*` weights for the perceptual loss.
    pub perceptual_weights: Option<PathBuf>,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            train_batch_size: 8,
            lr_g: 1e-4,
            lr_d: 1e-4,
            b1: 0.5,
            b2: 0.999,
            weight_decay: 0.0,
            lr_decrease_epoch: 50,
            save_mode: SaveMode::Epoch,
            save_by_epoch: 10,
            save_by_iter: 10_000,
            cudnn_benchmark: true,
            no_gpu: false,
            multi_gpu: false,
            num_workers: 4,
            save_path: PathBuf::from("models"),
            sample_path: PathBuf::from("samples"),
            loss_weights: LossWeights::default(),
            perceptual_weights: None,
            seed: 0,
        }
    }
}

impl TrainerConfig {
    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        CheckpointPolicy {
            mode: self.save_mode,
            save_by_epoch: self.save_by_epoch,
            save_by_iter: self.save_by_iter,
            batch_size: self.train_batch_size,
            dir: self.save_path.clone(),
        }
    }
}

/// Scalar losses returned after each training step.
#[derive(Debug, Clone, Copy)]
pub struct StepMetrics {
    pub step: usize,
    pub l1: f32,
    /// `1 − SSIM`.
    pub ssim: f32,
    pub perceptual: f32,
    pub gan: f32,
    pub generator: f32,
    pub discriminator: f32,
    pub lr_g: f64,
    pub lr_d: f64,
}

/// Result of one [`Trainer::step`].
#[derive(Debug)]
pub struct StepOutput {
    pub metrics: StepMetrics,
    /// Generator output for the batch, detached from the graph.
    pub prediction: Tensor,
}

/// What a finished [`Trainer::fit`] produced.
#[derive(Debug, Default)]
pub struct FitSummary {
    pub iterations: usize,
    pub checkpoints: Vec<PathBuf>,
    pub samples: Vec<PathBuf>,
    pub last: Option<StepMetrics>,
}

// ── Device ──────────────────────────────────────────────────────────────────

/// CPU when `no_gpu`, otherwise CUDA device 0 if present.
pub fn select_device(config: &TrainerConfig) -> anyhow::Result<Device> {
    if config.no_gpu {
        return Ok(Device::Cpu);
    }
    Ok(Device::cuda_if_available(0)?)
}

/// Number of CUDA devices that can be opened.
pub fn cuda_device_count() -> usize {
    if !candle_core::utils::cuda_is_available() {
        return 0;
    }
    (0..MAX_CUDA_DEVICES)
        .take_while(|&i| Device::new_cuda(i).is_ok())
        .count()
}

// ── Trainer ─────────────────────────────────────────────────────────────────

/// The training engine. Owns both networks, both optimisers and schedules.
pub struct Trainer {
    pub generator: Generator,
    pub discriminator: Discriminator,
    pub g_varmap: VarMap,
    pub d_varmap: VarMap,
    g_optimizer: AdamW,
    d_optimizer: AdamW,
    g_schedule: LinearDecay,
    d_schedule: LinearDecay,
    gan_loss: GanLoss,
    perceptual: PerceptualLoss,
    checkpoints: CheckpointPolicy,
    pub config: TrainerConfig,
    model_config: SensingGanConfig,
    pub global_step: usize,
    device: Device,
}

impl Trainer {
    /// Build both networks and optimisers. Creates the save and sample
    /// directories up front and writes `config.json` into the save path.
    pub fn new(
        model_config: SensingGanConfig,
        config: TrainerConfig,
        device: Device,
    ) -> anyhow::Result<Self> {
        for dir in [&config.save_path, &config.sample_path] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }

        let g_varmap = VarMap::new();
        let generator = Generator::new(
            &model_config,
            VarBuilder::from_varmap(&g_varmap, DType::F32, &device),
        )?;
        let d_varmap = VarMap::new();
        let discriminator = Discriminator::new(
            &model_config,
            VarBuilder::from_varmap(&d_varmap, DType::F32, &device),
        )?;

        let features = match &config.perceptual_weights {
            Some(path) => VggFeatures::load(path, &device)
                .with_context(|| format!("load perceptual weights {}", path.display()))?,
            None => {
                tracing::warn!("no perceptual weights given; using a randomly initialised VGG");
                VggFeatures::new(&device)?
            }
        };

        tracing::info!(
            generator_params = param_count(&g_varmap),
            discriminator_params = param_count(&d_varmap),
            gpus = cuda_device_count(),
            device = ?device,
            multi_gpu = config.multi_gpu,
            cudnn_benchmark = config.cudnn_benchmark,
            "Networks built"
        );
        if config.multi_gpu {
            tracing::warn!("data-parallel replication is not available; training on one device");
        }

        let g_optimizer = AdamW::new(
            g_varmap.all_vars(),
            ParamsAdamW {
                lr: config.lr_g,
                beta1: config.b1,
                beta2: config.b2,
                eps: 1e-8,
                weight_decay: config.weight_decay,
            },
        )?;
        let d_optimizer = AdamW::new(
            d_varmap.all_vars(),
            ParamsAdamW {
                lr: config.lr_d,
                beta1: config.b1,
                beta2: config.b2,
                eps: 1e-8,
                weight_decay: config.weight_decay,
            },
        )?;

        model_config.save(&config.save_path.join("config.json"))?;

        Ok(Self {
            generator,
            discriminator,
            g_varmap,
            d_varmap,
            g_optimizer,
            d_optimizer,
            g_schedule: LinearDecay::new(config.lr_g, config.epochs, config.lr_decrease_epoch),
            d_schedule: LinearDecay::new(config.lr_d, config.epochs, config.lr_decrease_epoch),
            gan_loss: GanLoss::new(model_config.gan_mode),
            perceptual: PerceptualLoss::new(features),
            checkpoints: config.checkpoint_policy(),
            config,
            model_config,
            global_step: 0,
            device,
        })
    }

    /// Install the learning rates for `epoch` on both optimisers.
    pub fn set_epoch(&mut self, epoch: usize) {
        self.g_optimizer
            .set_learning_rate(self.g_schedule.lr_at(epoch));
        self.d_optimizer
            .set_learning_rate(self.d_schedule.lr_at(epoch));
    }

    /// One generator update, then one discriminator update, on the same batch.
    ///
    /// The discriminator sees a detached copy of the reconstruction, so its
    /// loss cannot push gradients into the generator.
    ///
    /// H and W are trimmed to the generator's spatial multiple first; the
    /// target must carry `out_channels` channels.
    pub fn step(&mut self, input: &Tensor, target: &Tensor) -> anyhow::Result<StepOutput> {
        let m = self.model_config.spatial_multiple();
        let input = crop_to_multiple(&input.to_device(&self.device)?, m)?;
        let target = crop_to_multiple(&target.to_device(&self.device)?, m)?;
        let (in_c, out_c) = (self.model_config.in_channels, self.model_config.out_channels);
        if input.dim(1)? != in_c || target.dim(1)? != out_c {
            anyhow::bail!(
                "batch has {} input / {} target channels, model expects {in_c} / {out_c}",
                input.dim(1)?,
                target.dim(1)?
            );
        }

        // Generator
        let (fake, _sensing_map) = self.generator.forward(&input, &input)?;
        let gan = self
            .gan_loss
            .forward(&self.discriminator.forward(&fake)?, false)?;
        let g_loss = self.config.loss_weights.generator_loss(
            l1(&fake, &target)?,
            ssim_loss(&fake, &target)?,
            self.perceptual.forward(&fake, &target)?,
            gan,
        )?;
        self.g_optimizer.backward_step(&g_loss.total)?;

        // Discriminator
        let fake = fake.detach();
        let d_loss = self.discriminator_loss(&fake, &target)?;
        self.d_optimizer.backward_step(&d_loss)?;

        let metrics = StepMetrics {
            step: self.global_step,
            l1: g_loss.l1.to_scalar::<f32>()?,
            ssim: g_loss.ssim.to_scalar::<f32>()?,
            perceptual: g_loss.perceptual.to_scalar::<f32>()?,
            gan: g_loss.gan.to_scalar::<f32>()?,
            generator: g_loss.total.to_scalar::<f32>()?,
            discriminator: d_loss.to_scalar::<f32>()?,
            lr_g: self.g_optimizer.learning_rate(),
            lr_d: self.d_optimizer.learning_rate(),
        };
        self.global_step += 1;

        Ok(StepOutput {
            metrics,
            prediction: fake,
        })
    }

    /// `Adv(D(fake), false) + Adv(D(real), true)`. `fake` is detached here
    /// so the loss graph never reaches generator parameters.
    pub fn discriminator_loss(&self, fake: &Tensor, real: &Tensor) -> anyhow::Result<Tensor> {
        Ok(discriminator_loss(
            &self.gan_loss,
            &self.discriminator.forward(&fake.detach())?,
            &self.discriminator.forward(real)?,
        )?)
    }

    /// Train for `config.epochs` epochs over `loader`.
    pub fn fit<D: PairDataset + 'static>(
        &mut self,
        loader: &PairLoader<D>,
    ) -> anyhow::Result<FitSummary> {
        let batches = loader.len();
        if batches == 0 {
            anyhow::bail!("training set is empty");
        }
        let epochs = self.config.epochs;
        tracing::info!(
            images = loader.num_samples(),
            batches_per_epoch = batches,
            "The overall number of training images: {}",
            loader.num_samples()
        );

        let pb = ProgressBar::new((epochs * batches) as u64);
        pb.set_style(ProgressStyle::default_bar().template("{msg}")?);

        let mut summary = FitSummary::default();
        let mut clock = EtaClock::start();

        for epoch in 0..epochs {
            self.set_epoch(epoch);
            for (i, batch) in loader.epoch(epoch).enumerate() {
                let (input, target) = batch?;
                let out = self.step(&input, &target)?;

                if should_sample(epoch, i) {
                    let paths = save_sample_triplet(
                        &self.config.sample_path,
                        epoch,
                        i,
                        &input,
                        &out.prediction,
                        &target,
                    )?;
                    summary.samples.extend(paths);
                }

                let iters_done = epoch * batches + i;
                let time_left = clock.tick(epochs * batches - iters_done);
                let m = out.metrics;
                let line = progress_line(
                    epoch,
                    epochs,
                    i,
                    batches,
                    LineLosses {
                        l1: m.l1,
                        ssim: m.ssim,
                        perceptual: m.perceptual,
                    },
                    time_left,
                );
                if pb.is_hidden() {
                    tracing::info!("{line}");
                } else {
                    pb.set_message(line);
                }
                pb.inc(1);
                tracing::debug!(
                    step = m.step,
                    gan = m.gan,
                    g_loss = m.generator,
                    d_loss = m.discriminator,
                    lr_g = m.lr_g,
                    lr_d = m.lr_d,
                    "step"
                );

                summary
                    .checkpoints
                    .extend(self.save_checkpoints(epoch + 1, iters_done + 1, batches));
                summary.iterations += 1;
                summary.last = Some(m);
            }
        }
        pb.finish();
        Ok(summary)
    }

    /// Apply the checkpoint policy to both networks (1-based counters).
    pub fn save_checkpoints(
        &self,
        epoch: usize,
        iteration: usize,
        batches_per_epoch: usize,
    ) -> Vec<PathBuf> {
        [
            (&self.g_varmap, ModelRole::Generator),
            (&self.d_varmap, ModelRole::Discriminator),
        ]
        .into_iter()
        .filter_map(|(varmap, role)| {
            self.checkpoints
                .maybe_save(varmap, role, epoch, iteration, batches_per_epoch)
        })
        .collect()
    }

    pub fn model_config(&self) -> &SensingGanConfig {
        &self.model_config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

fn param_count(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}

// ── Tests ───────────────────────────────────────────────────────────────────
