//! Frame-to-tensor transforms for the interpolation pipeline.
//!
//! Frames cross the inference boundary as planar, normalized tensors. These
//! helpers are pure and single-frame; padding and batching decisions belong
//! to the pipeline.

use std::borrow::Cow;

use anyhow::Result;
use half::f16;
use image::{Rgb, RgbImage};
use ndarray::{Array4, Axis};
use tract_onnx::prelude::{DatumType, Tensor};

use crate::models::Precision;
use visionflow_utils::rgb_to_unit_chw;

/// Convert an interleaved u8 frame into a normalized planar batch array.
///
/// Values map from `[0, 255]` to `[0.0, 1.0]` and the layout goes from
/// `H x W x 3` to `1 x 3 x H x W`.
pub fn frame_to_array(frame: &RgbImage) -> Array4<f32> {
    rgb_to_unit_chw(frame).insert_axis(Axis(0))
}

/// Build an inference tensor from a planar batch array, casting to the model
/// precision.
pub fn array_to_tensor(array: Array4<f32>, precision: Precision) -> Result<Tensor> {
    let shape = array.shape().to_vec();
    let (data, offset) = array.into_raw_vec_and_offset();
    debug_assert_eq!(offset, Some(0), "expected contiguous array");
    let tensor = Tensor::from_shape(&shape, &data)
        .map_err(|e| anyhow::anyhow!("failed to build frame tensor: {e}"))?;
    cast_tensor(tensor, precision)
}

/// Preprocess one frame end to end: normalize, transpose, batch, cast.
pub fn frame_to_tensor(frame: &RgbImage, precision: Precision) -> Result<Tensor> {
    array_to_tensor(frame_to_array(frame), precision)
}

/// Cast an f32 tensor to the requested model precision. Fp32 passes through.
pub fn cast_tensor(tensor: Tensor, precision: Precision) -> Result<Tensor> {
    match precision {
        Precision::Fp32 => Ok(tensor),
        Precision::Fp16 => Ok(tensor
            .cast_to::<f16>()
            .map_err(|e| anyhow::anyhow!("failed to cast tensor to fp16: {e}"))?
            .into_owned()),
    }
}

/// Convert a model output tensor back into an interleaved u8 frame.
///
/// Accepts fp16 or fp32 data of shape `[1, 3, H, W]`. Values are clamped to
/// `[0, 1]` and scaled to `[0, 255]` with truncation, matching the uint8
/// conversion the models were validated against.
pub fn tensor_to_frame(tensor: &Tensor) -> Result<RgbImage> {
    let upcast: Cow<'_, Tensor>;
    let tensor = if tensor.datum_type() == DatumType::F16 {
        upcast = tensor
            .cast_to::<f32>()
            .map_err(|e| anyhow::anyhow!("failed to upcast fp16 output: {e}"))?;
        upcast.as_ref()
    } else {
        tensor
    };

    let (height, width) = match tensor.shape() {
        [1, 3, height, width] => (*height, *width),
        other => anyhow::bail!("interpolation output must have shape [1, 3, H, W] (got {other:?})"),
    };
    let data = tensor
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("interpolation output is not f32: {e}"))?;

    let plane = height * width;
    let mut image = RgbImage::new(width as u32, height as u32);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let index = y as usize * width + x as usize;
        *pixel = Rgb([
            unit_to_u8(data[index]),
            unit_to_u8(data[plane + index]),
            unit_to_u8(data[2 * plane + index]),
        ]);
    }
    Ok(image)
}

fn unit_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0) as u8
}
