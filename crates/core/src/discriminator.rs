//! Patch discriminator: a stack of stride-2 convolutions ending in a
//! one-channel logit map, one score per receptive-field patch.

use candle_core::{Result, Tensor};
use candle_nn::{Conv2d, Module, VarBuilder};

use sensing_common::SensingGanConfig;

use crate::layers::{conv, conv_down4, leaky_relu};

pub struct Discriminator {
    stages: Vec<Conv2d>,
    head: Conv2d,
    slope: f64,
}

impl Discriminator {
    pub fn new(config: &SensingGanConfig, vb: VarBuilder) -> Result<Self> {
        let mut stages = Vec::with_capacity(config.disc_layers);
        let mut in_c = config.out_channels;
        let mut out_c = config.disc_channels;
        for i in 0..config.disc_layers {
            stages.push(conv_down4(in_c, out_c, vb.pp(format!("stages.{i}")))?);
            in_c = out_c;
            out_c *= 2;
        }
        let head = conv(in_c, 1, 3, 1, vb.pp("head"))?;
        Ok(Self {
            stages,
            head,
            slope: config.leaky_slope,
        })
    }
}

impl Module for Discriminator {
    /// `(B, C_out, H, W)` image → `(B, 1, H / 2^L, W / 2^L)` realism logits.
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut x = x.clone();
        for stage in &self.stages {
            x = leaky_relu(&stage.forward(&x)?, self.slope)?;
        }
        self.head.forward(&x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn patch_map_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = SensingGanConfig {
            disc_channels: 4,
            disc_layers: 3,
            ..Default::default()
        };
        let d = Discriminator::new(&config, vb).unwrap();
        let x = Tensor::rand(0f32, 1f32, (2, 3, 32, 16), &Device::Cpu).unwrap();
        assert_eq!(d.forward(&x).unwrap().dims(), &[2, 1, 4, 2]);
    }
}
