//! Model configuration for SensingGAN.
//!
//! Serialised as JSON next to the checkpoints so a trained generator can be
//! rebuilt for inference. Every field has a default, so `{}` is a valid
//! (small) configuration.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Architecture knobs for the generator, discriminator and adversarial loss.
///
/// Backwards-compatible: missing fields fall back to their
/// `#[serde(default)]` values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensingGanConfig {
    // ── Image shape ─────────────────────────────────────────────────────────
    /// Channels of the degraded input (3 = RGB, 1 = grayscale).
    #[serde(default = "default_channels")]
    pub in_channels: usize,
    /// Channels of the restored output.
    #[serde(default = "default_channels")]
    pub out_channels: usize,

    // ── Generator ───────────────────────────────────────────────────────────
    /// Width of the first generator stage; the bottleneck uses twice this.
    #[serde(default = "default_gen_channels")]
    pub gen_channels: usize,
    /// Residual blocks in the generator bottleneck.
    #[serde(default = "default_num_res_blocks")]
    pub num_res_blocks: usize,

    // ── Discriminator ───────────────────────────────────────────────────────
    /// Width of the first discriminator stage (doubled at each downsample).
    #[serde(default = "default_disc_channels")]
    pub disc_channels: usize,
    /// Number of stride-2 stages in the patch discriminator.
    #[serde(default = "default_disc_layers")]
    pub disc_layers: usize,

    // ── Losses ──────────────────────────────────────────────────────────────
    /// Adversarial objective.
    #[serde(default)]
    pub gan_mode: GanMode,
    /// Negative slope shared by every LeakyReLU.
    #[serde(default = "default_leaky_slope")]
    pub leaky_slope: f64,
}

/// Adversarial loss flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GanMode {
    /// Least-squares GAN: MSE against 1 (real) or 0 (fake).
    #[default]
    Lsgan,
    /// Binary cross-entropy on logits.
    Vanilla,
}

impl GanMode {
    pub fn from_str(s: &str) -> Self {
        match s {
            "vanilla" => Self::Vanilla,
            _ => Self::Lsgan,
        }
    }
}

// ── Default value functions ─────────────────────────────────────────────────

fn default_channels() -> usize {
    3
}
fn default_gen_channels() -> usize {
    32
}
fn default_num_res_blocks() -> usize {
    4
}
fn default_disc_channels() -> usize {
    32
}
fn default_disc_layers() -> usize {
    3
}
fn default_leaky_slope() -> f64 {
    0.2
}

// ── Impl ────────────────────────────────────────────────────────────────────

impl Default for SensingGanConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            out_channels: 3,
            gen_channels: 32,
            num_res_blocks: 4,
            disc_channels: 32,
            disc_layers: 3,
            gan_mode: GanMode::Lsgan,
            leaky_slope: 0.2,
        }
    }
}

impl SensingGanConfig {
    /// Spatial size must be a multiple of this for the generator's
    /// downsample/upsample pair to line up.
    pub fn spatial_multiple(&self) -> usize {
        2
    }

    /// Save config to a JSON file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("write model config {}", path.display()))?;
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read model config {}", path.display()))?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let loaded: SensingGanConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded, SensingGanConfig::default());
    }

    #[test]
    fn partial_json_keeps_given_fields() {
        let json = r#"{ "in_channels": 1, "out_channels": 1, "gan_mode": "vanilla" }"#;
        let loaded: SensingGanConfig = serde_json::from_str(json).unwrap();
        assert_eq!(loaded.in_channels, 1);
        assert_eq!(loaded.out_channels, 1);
        assert_eq!(loaded.gan_mode, GanMode::Vanilla);
        assert_eq!(loaded.gen_channels, 32);
        assert_eq!(loaded.leaky_slope, 0.2);
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = SensingGanConfig {
            num_res_blocks: 2,
            disc_layers: 2,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(SensingGanConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn gan_mode_parsing_falls_back_to_lsgan() {
        assert_eq!(GanMode::from_str("vanilla"), GanMode::Vanilla);
        assert_eq!(GanMode::from_str("lsgan"), GanMode::Lsgan);
        assert_eq!(GanMode::from_str("wgan"), GanMode::Lsgan);
    }
}
