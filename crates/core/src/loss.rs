//! Loss providers: pixel L1, SSIM, perceptual, adversarial.
//!
//! Every provider maps `(prediction, target)` to a rank-0 tensor that stays
//! on the autograd graph of `prediction`.

use candle_core::{Device, Result, Tensor};

use sensing_common::GanMode;

use crate::features::VggFeatures;

/// SSIM Gaussian window side and standard deviation.
const SSIM_WINDOW: usize = 11;
const SSIM_SIGMA: f64 = 1.5;
/// Stabilisers `(K·L)²` with `L = 1`, `K1 = 0.01`, `K2 = 0.03`.
const SSIM_C1: f64 = 0.01 * 0.01;
const SSIM_C2: f64 = 0.03 * 0.03;

// ── Pixel / structural ──────────────────────────────────────────────────────

/// Mean absolute error.
pub fn l1(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    (pred - target)?.abs()?.mean_all()
}

/// Mean structural similarity of two `(B, C, H, W)` images, computed per
/// channel with a zero-padded 11×11 Gaussian window. 1.0 for identical input.
pub fn ssim(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (_, channels, _, _) = a.dims4()?;
    let window = gaussian_window(channels, a.device())?.to_dtype(a.dtype())?;
    let pad = SSIM_WINDOW / 2;
    let blur = |x: &Tensor| x.conv2d(&window, pad, 1, 1, channels);

    let mu_a = blur(a)?;
    let mu_b = blur(b)?;
    let mu_a2 = mu_a.sqr()?;
    let mu_b2 = mu_b.sqr()?;
    let mu_ab = (&mu_a * &mu_b)?;

    let sigma_a2 = (blur(&a.sqr()?)? - &mu_a2)?;
    let sigma_b2 = (blur(&b.sqr()?)? - &mu_b2)?;
    let sigma_ab = (blur(&(a * b)?)? - &mu_ab)?;

    let num = (mu_ab.affine(2.0, SSIM_C1)? * sigma_ab.affine(2.0, SSIM_C2)?)?;
    let den = ((mu_a2 + mu_b2)?.affine(1.0, SSIM_C1)?
        * (sigma_a2 + sigma_b2)?.affine(1.0, SSIM_C2)?)?;
    (num / den)?.mean_all()
}

/// `(C, 1, k, k)` depthwise kernel, each plane a normalised 2-D Gaussian.
fn gaussian_window(channels: usize, device: &Device) -> Result<Tensor> {
    let center = (SSIM_WINDOW / 2) as f64;
    let g: Vec<f64> = (0..SSIM_WINDOW)
        .map(|i| (-((i as f64 - center).powi(2)) / (2.0 * SSIM_SIGMA * SSIM_SIGMA)).exp())
        .collect();
    let norm: f64 = g.iter().sum();
    let mut plane = Vec::with_capacity(SSIM_WINDOW * SSIM_WINDOW);
    for y in &g {
        for x in &g {
            plane.push((y * x / (norm * norm)) as f32);
        }
    }
    Tensor::from_vec(plane, (1, 1, SSIM_WINDOW, SSIM_WINDOW), device)?
        .repeat((channels, 1, 1, 1))
}

// ── Perceptual ──────────────────────────────────────────────────────────────

/// Mean L1 distance between VGG feature maps, averaged over feature levels.
pub struct PerceptualLoss {
    features: VggFeatures,
}

impl PerceptualLoss {
    pub fn new(features: VggFeatures) -> Self {
        Self { features }
    }

    pub fn forward(&self, pred: &Tensor, target: &Tensor) -> Result<Tensor> {
        let fp = self.features.extract(pred)?;
        let ft = self.features.extract(&target.detach())?;
        let n = fp.len() as f64;
        let mut total: Option<Tensor> = None;
        for (p, t) in fp.iter().zip(ft.iter()) {
            let level = l1(p, &t.detach())?;
            total = Some(match total {
                None => level,
                Some(prev) => (prev + level)?,
            });
        }
        match total {
            Some(t) => t.affine(1.0 / n, 0.0),
            None => Tensor::new(0f32, pred.device()),
        }
    }
}

// ── Adversarial ─────────────────────────────────────────────────────────────

/// Adversarial loss against a constant real (1) or fake (0) label.
#[derive(Debug, Clone, Copy)]
pub struct GanLoss {
    mode: GanMode,
}

impl GanLoss {
    pub fn new(mode: GanMode) -> Self {
        Self { mode }
    }

    pub fn forward(&self, logits: &Tensor, is_real: bool) -> Result<Tensor> {
        let label = if is_real { 1.0 } else { 0.0 };
        match self.mode {
            GanMode::Lsgan => logits.affine(1.0, -label)?.sqr()?.mean_all(),
            // max(x, 0) − x·y + log(1 + e^(−|x|))
            GanMode::Vanilla => {
                let softplus_tail = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
                ((logits.relu()? - logits.affine(label, 0.0)?)? + softplus_tail)?.mean_all()
            }
        }
    }
}

// ── Composition ─────────────────────────────────────────────────────────────

/// Weights of the four generator loss terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWeights {
    pub l1: f64,
    pub ssim: f64,
    pub perceptual: f64,
    pub gan: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            l1: 1.0,
            ssim: 0.2,
            perceptual: 0.8,
            gan: 0.5,
        }
    }
}

/// Individual generator loss terms plus their weighted total.
pub struct GeneratorLoss {
    pub l1: Tensor,
    /// `1 − SSIM(target, prediction)`.
    pub ssim: Tensor,
    pub perceptual: Tensor,
    pub gan: Tensor,
    pub total: Tensor,
}

impl LossWeights {
    /// `l1·w_l1 + ssim·w_ssim + perceptual·w_perceptual + gan·w_gan`.
    pub fn combine(
        &self,
        l1: &Tensor,
        ssim: &Tensor,
        perceptual: &Tensor,
        gan: &Tensor,
    ) -> Result<Tensor> {
        let total = l1.affine(self.l1, 0.0)?;
        let total = (total + ssim.affine(self.ssim, 0.0)?)?;
        let total = (total + perceptual.affine(self.perceptual, 0.0)?)?;
        total + gan.affine(self.gan, 0.0)?
    }

    pub fn generator_loss(
        &self,
        l1: Tensor,
        ssim: Tensor,
        perceptual: Tensor,
        gan: Tensor,
    ) -> Result<GeneratorLoss> {
        let total = self.combine(&l1, &ssim, &perceptual, &gan)?;
        Ok(GeneratorLoss {
            l1,
            ssim,
            perceptual,
            gan,
            total,
        })
    }
}

/// `(1 − SSIM(target, prediction))`.
pub fn ssim_loss(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    ssim(target, pred)?.affine(-1.0, 1.0)
}

/// `Adv(D(fake), false) + Adv(D(real), true)`.
pub fn discriminator_loss(
    gan: &GanLoss,
    fake_logits: &Tensor,
    real_logits: &Tensor,
) -> Result<Tensor> {
    gan.forward(fake_logits, false)? + gan.forward(real_logits, true)?
}

// ── Tests ───────────────────────────────────────────────────────────────────
