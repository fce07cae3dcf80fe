//! Frozen VGG16-style feature extractor for the perceptual loss.
//!
//! Layer names follow torchvision's `vgg16().features` indices
//! (`features.0`, `features.2`, ...), so a converted torchvision state dict
//! in safetensors form loads directly with [`VggFeatures::load`]. Without a
//! weight file the convolutions keep their random initialisation, which
//! still yields a usable (if weaker) feature-space distance.

use std::path::Path;

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Conv2d, Module, VarBuilder, VarMap};

use crate::layers::conv;

/// ImageNet channel statistics the VGG weights were trained with.
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// `(torchvision index, in, out)` per conv; blocks end at relu1_2, relu2_2, relu3_3.
const VGG_BLOCKS: &[&[(usize, usize, usize)]] = &[
    &[(0, 3, 64), (2, 64, 64)],
    &[(5, 64, 128), (7, 128, 128)],
    &[(10, 128, 256), (12, 256, 256), (14, 256, 256)],
];

pub struct VggFeatures {
    blocks: Vec<Vec<Conv2d>>,
    mean: Tensor,
    std: Tensor,
    /// Owns the frozen parameters; never handed to an optimiser.
    varmap: VarMap,
}

impl VggFeatures {
    /// Randomly initialised extractor on `device`.
    pub fn new(device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let mut blocks = Vec::with_capacity(VGG_BLOCKS.len());
        for block in VGG_BLOCKS {
            let mut convs = Vec::with_capacity(block.len());
            for &(idx, in_c, out_c) in block.iter() {
                convs.push(conv(in_c, out_c, 3, 1, vb.pp(format!("features.{idx}")))?);
            }
            blocks.push(convs);
        }
        let mean = Tensor::new(&IMAGENET_MEAN, device)?.reshape((1, 3, 1, 1))?;
        let std = Tensor::new(&IMAGENET_STD, device)?.reshape((1, 3, 1, 1))?;
        Ok(Self {
            blocks,
            mean,
            std,
            varmap,
        })
    }

    /// Extractor with weights read from a safetensors file.
    pub fn load(path: &Path, device: &Device) -> anyhow::Result<Self> {
        let mut features = Self::new(device)?;
        features.varmap.load(path)?;
        Ok(features)
    }

    /// Feature maps at the end of each block for a `(B, C, H, W)` image in
    /// `[0, 1]`. Single-channel input is replicated to RGB.
    pub fn extract(&self, x: &Tensor) -> Result<Vec<Tensor>> {
        let x = if x.dim(1)? == 1 {
            x.repeat((1, 3, 1, 1))?
        } else {
            x.clone()
        };
        let mut x = x.broadcast_sub(&self.mean)?.broadcast_div(&self.std)?;
        let mut out = Vec::with_capacity(self.blocks.len());
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                x = x.max_pool2d(2)?;
            }
            for c in block {
                x = c.forward(&x)?.relu()?;
            }
            out.push(x.clone());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_levels_with_vgg_widths() {
        let f = VggFeatures::new(&Device::Cpu).unwrap();
        let x = Tensor::rand(0f32, 1f32, (1, 3, 16, 16), &Device::Cpu).unwrap();
        let feats = f.extract(&x).unwrap();
        let dims: Vec<Vec<usize>> = feats.iter().map(|t| t.dims().to_vec()).collect();
        assert_eq!(
            dims,
            vec![vec![1, 64, 16, 16], vec![1, 128, 8, 8], vec![1, 256, 4, 4]]
        );
    }

    #[test]
    fn grayscale_is_accepted() {
        let f = VggFeatures::new(&Device::Cpu).unwrap();
        let x = Tensor::rand(0f32, 1f32, (2, 1, 8, 8), &Device::Cpu).unwrap();
        assert_eq!(f.extract(&x).unwrap()[0].dims(), &[2, 64, 8, 8]);
    }

    #[test]
    fn weights_load_from_safetensors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vgg.safetensors");
        let source = VggFeatures::new(&Device::Cpu).unwrap();
        source.varmap.save(&path).unwrap();

        let loaded = VggFeatures::load(&path, &Device::Cpu).unwrap();
        let x = Tensor::rand(0f32, 1f32, (1, 3, 8, 8), &Device::Cpu).unwrap();
        let a = source.extract(&x).unwrap().pop().unwrap();
        let b = loaded.extract(&x).unwrap().pop().unwrap();
        let diff = (a - b).unwrap().abs().unwrap();
        let diff = diff.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(diff.iter().all(|v| *v < 1e-5));
    }
}
