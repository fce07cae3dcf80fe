//! Restoration generator.
//!
//! ```text
//! content ─ head ─┬─ down ─ ⊙(1 + sense) ─ res × N ─ up ─ cat ─ fuse ─ tail ─ (+ content)
//!                 └──────────────────────── skip ────────────┘
//! reference ─ sense_head ─ sense_down ─ sense_out ─ σ ──▶ sense (feature map)
//! ```
//!
//! The reference branch produces a per-pixel, per-channel gate ("sensing
//! map") in `[0, 1]` that modulates the bottleneck features. The map is
//! returned alongside the image so callers can inspect it.

use candle_core::{Result, Tensor};
use candle_nn::{ops, Conv2d, Module, VarBuilder};

use sensing_common::SensingGanConfig;

use crate::layers::{conv, leaky_relu, ResBlock};

pub struct Generator {
    head: Conv2d,
    down: Conv2d,
    sense_head: Conv2d,
    sense_down: Conv2d,
    sense_out: Conv2d,
    body: Vec<ResBlock>,
    up: Conv2d,
    fuse: Conv2d,
    tail: Conv2d,
    slope: f64,
    global_residual: bool,
}

impl Generator {
    pub fn new(config: &SensingGanConfig, vb: VarBuilder) -> Result<Self> {
        let c = config.gen_channels;
        let slope = config.leaky_slope;

        let mut body = Vec::with_capacity(config.num_res_blocks);
        for i in 0..config.num_res_blocks {
            body.push(ResBlock::new(2 * c, slope, vb.pp(format!("body.{i}")))?);
        }

        Ok(Self {
            head: conv(config.in_channels, c, 3, 1, vb.pp("head"))?,
            down: conv(c, 2 * c, 3, 2, vb.pp("down"))?,
            sense_head: conv(config.in_channels, c, 3, 1, vb.pp("sense_head"))?,
            sense_down: conv(c, 2 * c, 3, 2, vb.pp("sense_down"))?,
            sense_out: conv(2 * c, 2 * c, 1, 1, vb.pp("sense_out"))?,
            body,
            up: conv(2 * c, c, 3, 1, vb.pp("up"))?,
            fuse: conv(2 * c, c, 3, 1, vb.pp("fuse"))?,
            tail: conv(c, config.out_channels, 3, 1, vb.pp("tail"))?,
            slope,
            global_residual: config.in_channels == config.out_channels,
        })
    }

    /// Restore `content` guided by `reference`.
    ///
    /// Both are `(B, C_in, H, W)` with even `H` and `W`. Returns the
    /// `(B, C_out, H, W)` reconstruction and the `(B, 2·gen_channels, H/2, W/2)`
    /// sensing map.
    pub fn forward(&self, content: &Tensor, reference: &Tensor) -> Result<(Tensor, Tensor)> {
        let (_, _, h, w) = content.dims4()?;

        let sense = leaky_relu(&self.sense_head.forward(reference)?, self.slope)?;
        let sense = leaky_relu(&self.sense_down.forward(&sense)?, self.slope)?;
        let sense = ops::sigmoid(&self.sense_out.forward(&sense)?)?;

        let skip = leaky_relu(&self.head.forward(content)?, self.slope)?;
        let feat = leaky_relu(&self.down.forward(&skip)?, self.slope)?;
        let mut x = ((&feat * &sense)? + &feat)?;
        for block in &self.body {
            x = block.forward(&x)?;
        }

        let x = x.upsample_nearest2d(h, w)?;
        let x = leaky_relu(&self.up.forward(&x)?, self.slope)?;
        let x = Tensor::cat(&[&x, &skip], 1)?;
        let x = leaky_relu(&self.fuse.forward(&x)?, self.slope)?;
        let mut out = self.tail.forward(&x)?;
        if self.global_residual {
            out = (out + content)?;
        }
        Ok((out, sense))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_config() -> SensingGanConfig {
        SensingGanConfig {
            gen_channels: 4,
            num_res_blocks: 1,
            ..Default::default()
        }
    }

    #[test]
    fn output_and_feature_map_shapes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let g = Generator::new(&small_config(), vb).unwrap();
        let x = Tensor::rand(0f32, 1f32, (2, 3, 8, 12), &Device::Cpu).unwrap();
        let (out, sense) = g.forward(&x, &x).unwrap();
        assert_eq!(out.dims(), &[2, 3, 8, 12]);
        assert_eq!(sense.dims(), &[2, 8, 4, 6]);

        let values: Vec<f32> = sense.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn channel_change_drops_global_residual() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = SensingGanConfig {
            in_channels: 1,
            out_channels: 3,
            ..small_config()
        };
        let g = Generator::new(&config, vb).unwrap();
        let x = Tensor::rand(0f32, 1f32, (1, 1, 4, 4), &Device::Cpu).unwrap();
        let (out, _) = g.forward(&x, &x).unwrap();
        assert_eq!(out.dims(), &[1, 3, 4, 4]);
    }

    #[test]
    fn parameters_are_registered_in_varmap() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _g = Generator::new(&small_config(), vb).unwrap();
        // head, down, sense_head, sense_down, sense_out, up, fuse, tail + 1 res block (2 convs),
        // each with weight and bias.
        assert_eq!(varmap.all_vars().len(), (8 + 2) * 2);
    }
}
