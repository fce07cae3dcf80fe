//! Inference runtime: load a generator, denoise images.

use std::path::Path;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use sensing_common::{crop_to_multiple, image_to_tensor, load_image, save_png, SensingGanConfig};
use sensing_core::Generator;

/// High-level inference runtime.
pub struct DenoiseRuntime {
    generator: Generator,
    #[allow(dead_code)]
    varmap: VarMap,
    config: SensingGanConfig,
    device: Device,
}

impl DenoiseRuntime {
    /// `model_dir` holds the `config.json` written at training time;
    /// `checkpoint` is a `*_generator.pth` file from the same run.
    pub fn load(model_dir: &Path, checkpoint: &Path, device: Device) -> anyhow::Result<Self> {
        let config = SensingGanConfig::load(&model_dir.join("config.json"))?;

        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let generator = Generator::new(&config, vb)?;
        varmap
            .load(checkpoint)
            .with_context(|| format!("load generator weights {}", checkpoint.display()))?;

        tracing::info!(checkpoint = %checkpoint.display(), "Generator loaded");
        Ok(Self {
            generator,
            varmap,
            config,
            device,
        })
    }

    /// Denoise one `(C, H, W)` image in `[0, 1]`. Odd borders are cropped
    /// so both sides are a multiple of the generator's downsampling factor.
    pub fn denoise(&self, image: &Tensor) -> anyhow::Result<Tensor> {
        let image = crop_to_multiple(image, self.config.spatial_multiple())?;
        let batch = image.to_device(&self.device)?.unsqueeze(0)?;
        let (out, _sensing_map) = self.generator.forward(&batch, &batch)?;
        Ok(out.squeeze(0)?.clamp(0f32, 1f32)?)
    }

    /// Read `input`, denoise it and write a PNG to `output`.
    pub fn denoise_file(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        let img = load_image(input, self.config.in_channels)?;
        let restored = self.denoise(&image_to_tensor(&img, &self.device)?)?;
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        save_png(&restored, output)?;
        let (_, h, w) = restored.dims3()?;
        tracing::info!(input = %input.display(), output = %output.display(), h, w, "denoised");
        Ok(())
    }

    pub fn config(&self) -> &SensingGanConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> SensingGanConfig {
        SensingGanConfig {
            gen_channels: 4,
            num_res_blocks: 1,
            ..Default::default()
        }
    }

    fn write_model(dir: &Path) -> std::path::PathBuf {
        tiny().save(&dir.join("config.json")).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Generator::new(&tiny(), vb).unwrap();
        let ckpt = dir.join("SimpleModel1_bs1_generator.pth");
        varmap.save(&ckpt).unwrap();
        ckpt
    }

    #[test]
    fn denoise_keeps_cropped_shape_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = write_model(dir.path());
        let rt = DenoiseRuntime::load(dir.path(), &ckpt, Device::Cpu).unwrap();
        let noisy = Tensor::rand(0f32, 1f32, (3, 9, 12), &Device::Cpu).unwrap();
        let out = rt.denoise(&noisy).unwrap();
        assert_eq!(out.dims(), &[3, 8, 12]);
        let v = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(v.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn denoise_file_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = write_model(dir.path());
        let rt = DenoiseRuntime::load(dir.path(), &ckpt, Device::Cpu).unwrap();
        let input = dir.path().join("noisy.png");
        let noisy = Tensor::rand(0f32, 1f32, (3, 8, 8), &Device::Cpu).unwrap();
        save_png(&noisy, &input).unwrap();

        let output = dir.path().join("out").join("clean.png");
        rt.denoise_file(&input, &output).unwrap();
        assert!(output.is_file());
    }

    #[test]
    fn missing_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        tiny().save(&dir.path().join("config.json")).unwrap();
        let missing = dir.path().join("nope.pth");
        assert!(DenoiseRuntime::load(dir.path(), &missing, Device::Cpu).is_err());
    }
}
