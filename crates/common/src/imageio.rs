//! Conversions between `image` buffers and `(C, H, W)` f32 tensors in `[0, 1]`.

use std::path::Path;

use anyhow::{Context, Result as AnyhowResult};
use candle_core::{DType, Device, Result, Tensor};
use image::{DynamicImage, GrayImage, RgbImage};

/// Open an image file and convert it to the requested channel count.
pub fn load_image(path: &Path, channels: usize) -> AnyhowResult<DynamicImage> {
    let img = image::open(path).with_context(|| format!("open image {}", path.display()))?;
    match channels {
        1 => Ok(DynamicImage::ImageLuma8(img.to_luma8())),
        3 => Ok(DynamicImage::ImageRgb8(img.to_rgb8())),
        c => anyhow::bail!("unsupported channel count {c} (expected 1 or 3)"),
    }
}

/// `(C, H, W)` tensor with values scaled to `[0, 1]`. Grayscale images give
/// `C = 1`, everything else `C = 3`.
pub fn image_to_tensor(img: &DynamicImage, device: &Device) -> Result<Tensor> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let (raw, c) = match img {
        DynamicImage::ImageLuma8(g) => (g.as_raw().clone(), 1),
        other => (other.to_rgb8().into_raw(), 3),
    };
    Tensor::from_vec(raw, (h, w, c), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)
}

/// Inverse of [`image_to_tensor`]: clamps to `[0, 1]` and quantises to 8 bits.
pub fn tensor_to_image(t: &Tensor) -> AnyhowResult<DynamicImage> {
    let (c, h, w) = t.dims3()?;
    let data: Vec<u8> = t
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F32)?
        .clamp(0f32, 1f32)?
        .affine(255.0, 0.0)?
        .round()?
        .to_dtype(DType::U8)?
        .permute((1, 2, 0))?
        .flatten_all()?
        .to_vec1()?;
    let (w, h) = (w as u32, h as u32);
    match c {
        1 => GrayImage::from_raw(w, h, data)
            .map(DynamicImage::ImageLuma8)
            .context("grayscale buffer size mismatch"),
        3 => RgbImage::from_raw(w, h, data)
            .map(DynamicImage::ImageRgb8)
            .context("rgb buffer size mismatch"),
        c => anyhow::bail!("cannot encode a {c}-channel tensor as an image"),
    }
}

/// Write a `(C, H, W)` tensor as PNG.
pub fn save_png(t: &Tensor, path: &Path) -> AnyhowResult<()> {
    tensor_to_image(t)?
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("write png {}", path.display()))
}

/// Drop trailing rows/columns so the last two dims (H, W) are multiples
/// of `m`. Works on `(C, H, W)` and `(B, C, H, W)`.
pub fn crop_to_multiple(t: &Tensor, m: usize) -> AnyhowResult<Tensor> {
    let rank = t.rank();
    if rank < 2 {
        anyhow::bail!("expected at least 2 dims, got shape {:?}", t.dims());
    }
    let (h, w) = (t.dim(rank - 2)?, t.dim(rank - 1)?);
    let m = m.max(1);
    let (h2, w2) = (h - h % m, w - w % m);
    if h2 == 0 || w2 == 0 {
        anyhow::bail!("image {h}x{w} is smaller than {m}x{m}");
    }
    if (h2, w2) == (h, w) {
        return Ok(t.clone());
    }
    Ok(t.narrow(rank - 2, 0, h2)?.narrow(rank - 1, 0, w2)?)
}
