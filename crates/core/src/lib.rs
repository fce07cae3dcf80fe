//! # sensing-core — Networks and Losses
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`layers`] | conv helpers, LeakyReLU, `ResBlock` |
//! | [`generator`] | `Generator`: (content, reference) → (image, sensing map) |
//! | [`discriminator`] | `Discriminator`: patch logits |
//! | [`features`] | `VggFeatures`: frozen extractor for the perceptual loss |
//! | [`loss`] | L1, SSIM, perceptual, adversarial and their weighted sum |
//!
//! Everything goes through `candle-core`/`candle-nn`, so the same code runs
//! on CPU, CUDA and Metal.

pub mod discriminator;
pub mod features;
pub mod generator;
pub mod layers;
pub mod loss;

// ── Public re-exports ───────────────────────────────────────────────────────

pub use discriminator::Discriminator;
pub use features::VggFeatures;
pub use generator::Generator;
pub use loss::{
    discriminator_loss, l1, ssim, ssim_loss, GanLoss, GeneratorLoss, LossWeights,
    PerceptualLoss,
};
