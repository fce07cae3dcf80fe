use std::path::PathBuf;

use anyhow::Result;
use candle_core::Device;
use clap::{Parser, Subcommand};

use sensing_common::{GanMode, ImagePairFolder, PairLoader, SensingGanConfig};
use sensing_core::LossWeights;
use sensing_infer::DenoiseRuntime;
use sensing_train::{select_device, SaveMode, Trainer, TrainerConfig};

#[derive(Parser, Debug)]
#[command(name = "sensing", about = "SensingGAN image restoration: train and denoise")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train generator and discriminator on paired noisy/clean images.
    Train(TrainArgs),
    /// Run a trained generator over one image.
    Denoise(DenoiseArgs),
    /// Write a default model config.
    InitConfig(InitConfigArgs),
}

// ── Train ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct TrainArgs {
    /// Model config; created with defaults when missing.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
    /// Degraded images.
    #[arg(long)]
    input_dir: PathBuf,
    /// Clean images, matched to inputs by file name.
    #[arg(long)]
    target_dir: PathBuf,
    /// Square random crop side (even). 0 trains on full images, trimmed to
    /// an even size.
    #[arg(long, default_value_t = 256)]
    crop_size: usize,
    #[arg(long, default_value_t = 100)]
    epochs: usize,
    #[arg(long, default_value_t = 8)]
    train_batch_size: usize,
    #[arg(long, default_value_t = 1e-4)]
    lr_g: f64,
    #[arg(long, default_value_t = 1e-4)]
    lr_d: f64,
    #[arg(long, default_value_t = 0.5)]
    b1: f64,
    #[arg(long, default_value_t = 0.999)]
    b2: f64,
    /// Decoupled (AdamW) weight decay, applied to the weights directly
    /// rather than added to the gradient as an L2 penalty.
    #[arg(long, default_value_t = 0.0)]
    weight_decay: f64,
    /// Epoch at which both learning rates start decaying linearly.
    #[arg(long, default_value_t = 50)]
    lr_decrease_epoch: usize,
    #[arg(long, default_value = "epoch", value_parser = ["epoch", "iter"])]
    save_mode: String,
    #[arg(long, default_value_t = 10)]
    save_by_epoch: usize,
    #[arg(long, default_value_t = 10000)]
    save_by_iter: usize,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    cudnn_benchmark: bool,
    #[arg(long)]
    no_gpu: bool,
    #[arg(long)]
    multi_gpu: bool,
    #[arg(long, default_value_t = 4)]
    num_workers: usize,
    #[arg(long, default_value = "models")]
    save_path: PathBuf,
    #[arg(long, default_value = "samples")]
    sample_path: PathBuf,
    #[arg(long, default_value_t = 1.0)]
    lambda_l1: f64,
    #[arg(long, default_value_t = 0.2)]
    lambda_ssim: f64,
    #[arg(long, default_value_t = 0.8)]
    lambda_perceptual: f64,
    #[arg(long, default_value_t = 0.5)]
    lambda_gan: f64,
    /// VGG16 `features.*` weights (safetensors) for the perceptual loss.
    #[arg(long)]
    perceptual_weights: Option<PathBuf>,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

// ── Denoise / InitConfig ───────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct DenoiseArgs {
    /// Directory holding the `config.json` written during training.
    #[arg(long)]
    model_dir: PathBuf,
    /// A `*_generator.pth` checkpoint.
    #[arg(long)]
    checkpoint: PathBuf,
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
    #[arg(long)]
    no_gpu: bool,
}

#[derive(Parser, Debug)]
struct InitConfigArgs {
    #[arg(long, default_value = "config.json")]
    output: PathBuf,
    #[arg(long, default_value = "lsgan", value_parser = ["lsgan", "vanilla"])]
    gan_mode: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Train(args) => cmd_train(args),
        Command::Denoise(args) => cmd_denoise(args),
        Command::InitConfig(args) => cmd_init_config(args),
    }
}

// ── Command implementations ────────────────────────────────────────────────────

fn cmd_train(args: TrainArgs) -> Result<()> {
    let model_config = if args.config.exists() {
        SensingGanConfig::load(&args.config)?
    } else {
        let default = SensingGanConfig::default();
        default.save(&args.config)?;
        tracing::info!(path = %args.config.display(), "Created default model config");
        default
    };

    let trainer_config = TrainerConfig {
        epochs: args.epochs,
        train_batch_size: args.train_batch_size,
        lr_g: args.lr_g,
        lr_d: args.lr_d,
        b1: args.b1,
        b2: args.b2,
        weight_decay: args.weight_decay,
        lr_decrease_epoch: args.lr_decrease_epoch,
        save_mode: SaveMode::from_str(&args.save_mode),
        save_by_epoch: args.save_by_epoch,
        save_by_iter: args.save_by_iter,
        cudnn_benchmark: args.cudnn_benchmark,
        no_gpu: args.no_gpu,
        multi_gpu: args.multi_gpu,
        num_workers: args.num_workers,
        save_path: args.save_path,
        sample_path: args.sample_path,
        loss_weights: LossWeights {
            l1: args.lambda_l1,
            ssim: args.lambda_ssim,
            perceptual: args.lambda_perceptual,
            gan: args.lambda_gan,
        },
        perceptual_weights: args.perceptual_weights,
        seed: args.seed,
    };

    let dataset = ImagePairFolder::open(
        &args.input_dir,
        &args.target_dir,
        args.crop_size,
        model_config.in_channels,
        model_config.out_channels,
    )?
    .with_spatial_multiple(model_config.spatial_multiple());
    let loader = PairLoader::new(
        dataset,
        trainer_config.train_batch_size,
        trainer_config.num_workers,
        trainer_config.seed,
    );

    let device = select_device(&trainer_config)?;
    let mut trainer = Trainer::new(model_config, trainer_config, device)?;
    let summary = trainer.fit(&loader)?;

    tracing::info!(
        iterations = summary.iterations,
        checkpoints = summary.checkpoints.len(),
        samples = summary.samples.len(),
        "Training finished"
    );
    Ok(())
}

fn cmd_denoise(args: DenoiseArgs) -> Result<()> {
    let device = if args.no_gpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    let runtime = DenoiseRuntime::load(&args.model_dir, &args.checkpoint, device)?;
    runtime.denoise_file(&args.input, &args.output)?;
    Ok(())
}

fn cmd_init_config(args: InitConfigArgs) -> Result<()> {
    let config = SensingGanConfig {
        gan_mode: GanMode::from_str(&args.gan_mode),
        ..Default::default()
    };
    config.save(&args.output)?;
    tracing::info!(path = %args.output.display(), "Wrote default model config");
    Ok(())
}
