//! Convolution building blocks shared by the generator and discriminator.

use candle_core::{Result, Tensor};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, Module, VarBuilder};

/// `k×k` convolution with "same"-style padding (`k / 2`) and the given stride.
pub fn conv(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    vb: VarBuilder,
) -> Result<Conv2d> {
    let cfg = Conv2dConfig {
        padding: kernel / 2,
        stride,
        ..Default::default()
    };
    conv2d(in_channels, out_channels, kernel, cfg, vb)
}

/// 4×4 stride-2 convolution with padding 1: halves the spatial size.
pub fn conv_down4(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Conv2d> {
    let cfg = Conv2dConfig {
        padding: 1,
        stride: 2,
        ..Default::default()
    };
    conv2d(in_channels, out_channels, 4, cfg, vb)
}

/// `max(x, slope·x)`; equal to LeakyReLU for `0 ≤ slope < 1`.
pub fn leaky_relu(x: &Tensor, slope: f64) -> Result<Tensor> {
    x.maximum(&x.affine(slope, 0.0)?)
}

/// Two 3×3 convolutions with a LeakyReLU between them and an identity skip.
pub struct ResBlock {
    conv1: Conv2d,
    conv2: Conv2d,
    slope: f64,
}

impl ResBlock {
    pub fn new(channels: usize, slope: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv1: conv(channels, channels, 3, 1, vb.pp("conv1"))?,
            conv2: conv(channels, channels, 3, 1, vb.pp("conv2"))?,
            slope,
        })
    }
}

impl Module for ResBlock {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = leaky_relu(&self.conv1.forward(x)?, self.slope)?;
        let h = self.conv2.forward(&h)?;
        x + h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn leaky_relu_scales_negatives_only() {
        let x = Tensor::new(&[-2.0f32, -0.5, 0.0, 3.0], &Device::Cpu).unwrap();
        let y: Vec<f32> = leaky_relu(&x, 0.2).unwrap().to_vec1().unwrap();
        let expected = [-0.4f32, -0.1, 0.0, 3.0];
        for (a, b) in y.iter().zip(expected) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn conv_shapes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let x = Tensor::zeros((2, 3, 8, 8), DType::F32, &Device::Cpu).unwrap();

        let same = conv(3, 5, 3, 1, vb.pp("same")).unwrap();
        assert_eq!(same.forward(&x).unwrap().dims(), &[2, 5, 8, 8]);

        let strided = conv(3, 5, 3, 2, vb.pp("strided")).unwrap();
        assert_eq!(strided.forward(&x).unwrap().dims(), &[2, 5, 4, 4]);

        let down = conv_down4(3, 5, vb.pp("down")).unwrap();
        assert_eq!(down.forward(&x).unwrap().dims(), &[2, 5, 4, 4]);

        let block = ResBlock::new(3, 0.2, vb.pp("res")).unwrap();
        assert_eq!(block.forward(&x).unwrap().dims(), &[2, 3, 8, 8]);
    }
}
