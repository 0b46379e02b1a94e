//! Image file I/O and tensor conversion
//!
//! Tensors are CHW `f32` in `[0, 1]`; masks have one channel holding 0 or 1.

use crate::error::{Error, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{Array3, ArrayView3};
use std::path::Path;

/// Luma threshold for a pixel to count as foreground
const MASK_THRESHOLD: u8 = 128;

/// Load an image as 8-bit RGB
pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let img = image::open(path)
        .map_err(|e| Error::DataLoad(format!("{}: {e}", path.display())))?;
    Ok(img.to_rgb8())
}

/// Load a mask and binarise it
pub fn load_mask(path: &Path) -> Result<GrayImage> {
    let img = image::open(path)
        .map_err(|e| Error::DataLoad(format!("{}: {e}", path.display())))?;
    let mut mask = img.to_luma8();
    for Luma([v]) in mask.pixels_mut() {
        *v = if *v >= MASK_THRESHOLD { 255 } else { 0 };
    }
    Ok(mask)
}

pub fn rgb_to_tensor(img: &RgbImage) -> Array3<f32> {
    let (w, h) = img.dimensions();
    Array3::from_shape_fn((3, h as usize, w as usize), |(c, y, x)| {
        img.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

pub fn mask_to_tensor(mask: &GrayImage) -> Array3<f32> {
    let (w, h) = mask.dimensions();
    Array3::from_shape_fn((1, h as usize, w as usize), |(_, y, x)| {
        if mask.get_pixel(x as u32, y as u32)[0] >= MASK_THRESHOLD {
            1.0
        } else {
            0.0
        }
    })
}

/// Convert a CHW tensor back to RGB; single-channel tensors are replicated
pub fn tensor_to_rgb(tensor: &ArrayView3<f32>) -> Result<RgbImage> {
    let (channels, h, w) = tensor.dim();
    if channels != 1 && channels != 3 {
        return Err(Error::ShapeMismatch {
            expected: vec![3, h, w],
            got: vec![channels, h, w],
        });
    }

    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Ok(RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if channels == 1 {
            let v = to_u8(tensor[[0, y, x]]);
            Rgb([v, v, v])
        } else {
            Rgb([
                to_u8(tensor[[0, y, x]]),
                to_u8(tensor[[1, y, x]]),
                to_u8(tensor[[2, y, x]]),
            ])
        }
    }))
}

/// Write a CHW tensor as PNG
pub fn save_png(tensor: &ArrayView3<f32>, path: &Path) -> Result<()> {
    let img = tensor_to_rgb(tensor)?;
    img.save(path)
        .map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))
}
