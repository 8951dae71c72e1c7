//! Frame interpolation pipeline.
//!
//! Wraps an inference engine with the orchestration the interpolation models
//! need: padding frames to the stride multiple, assembling per-model inputs,
//! serializing execution, and cropping results back to the caller's size.
//! The multi-frame helpers build on the single-step [`FrameInterpolator::interpolate`].

use std::{
    borrow::Cow,
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Result;
use image::{RgbImage, imageops};
use log::debug;
use ndarray::{Array4, Axis};
use tract_onnx::prelude::Tensor;

use crate::{
    engine::{InferenceEngine, TractEngine},
    frame::{array_to_tensor, cast_tensor, frame_to_array, frame_to_tensor, tensor_to_frame},
    models::InterpolationModelInfo,
};
use visionflow_utils::timing_guard;

/// How a model wants its frames and timestep delivered, resolved once from
/// the graph signature when the model is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// One input of 6 channels: the two frames concatenated. The timestep is
    /// baked into the model.
    SingleInput6Ch,
    /// One input of 7 channels: frames plus one constant timestep plane.
    SingleInput7Ch,
    /// One input of 8 channels: frames plus two constant timestep planes.
    SingleInput8Ch,
    /// Two inputs, one tensor per frame.
    DualInput,
    /// Three or more inputs: per-frame tensors plus a one-element timestep
    /// tensor in the third slot.
    TripleInput,
}

impl InputLayout {
    /// Constant channels appended after the two frames, if any.
    fn timestep_channels(self) -> usize {
        match self {
            InputLayout::SingleInput8Ch => 2,
            InputLayout::SingleInput7Ch => 1,
            _ => 0,
        }
    }
}

#[derive(Debug)]
struct LoadedSession {
    engine: Box<dyn InferenceEngine>,
    layout: InputLayout,
    info: InterpolationModelInfo,
    run_lock: Mutex<()>,
    first_run: AtomicBool,
}

/// Frame interpolation pipeline around a lazily attached inference session.
#[derive(Debug)]
pub struct FrameInterpolator {
    session: Option<LoadedSession>,
    pad_multiple: u32,
}

impl Default for FrameInterpolator {
    fn default() -> Self {
        Self {
            session: None,
            pad_multiple: 32,
        }
    }
}

impl FrameInterpolator {
    /// Create an interpolator with the default stride padding (32).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an interpolator that pads frames to a custom multiple.
    pub fn with_pad_multiple(pad_multiple: u32) -> Self {
        Self {
            session: None,
            pad_multiple,
        }
    }

    /// Load an ONNX interpolation model from disk and attach it.
    pub fn load_model<P: AsRef<Path>>(
        &mut self,
        model_path: P,
        info: &InterpolationModelInfo,
    ) -> Result<()> {
        let engine = TractEngine::load(model_path)?;
        self.attach_engine(Box::new(engine), info.clone())
    }

    /// Attach an already constructed engine (tests, alternate backends).
    ///
    /// The input layout is resolved from the engine's declared signature here,
    /// once, and reused for every subsequent [`FrameInterpolator::interpolate`] call.
    pub fn attach_engine(
        &mut self,
        engine: Box<dyn InferenceEngine>,
        info: InterpolationModelInfo,
    ) -> Result<()> {
        let layout = resolve_input_layout(engine.as_ref())?;
        debug!(
            "attached {} ({}, {}) on {}: input layout {:?}",
            info.display_name,
            info.version,
            info.precision,
            engine.backend(),
            layout
        );
        for (index, input) in engine.inputs().iter().enumerate() {
            debug!("  input {index}: {input}");
        }
        for (index, output) in engine.outputs().iter().enumerate() {
            debug!("  output {index}: {output}");
        }
        self.session = Some(LoadedSession {
            engine,
            layout,
            info,
            run_lock: Mutex::new(()),
            first_run: AtomicBool::new(true),
        });
        Ok(())
    }

    /// Drop the attached session, if any.
    ///
    /// Subsequent interpolation calls fail until a model is attached again,
    /// and the first-inference bookkeeping starts fresh on the next attach.
    pub fn unload(&mut self) {
        if self.session.take().is_some() {
            debug!("interpolation session released");
        }
    }

    /// Whether a model is currently attached.
    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    /// Input layout resolved when the current model was attached.
    pub fn input_layout(&self) -> Option<InputLayout> {
        self.session.as_ref().map(|session| session.layout)
    }

    /// Registry record the current session was attached with.
    pub fn model_info(&self) -> Option<&InterpolationModelInfo> {
        self.session.as_ref().map(|session| &session.info)
    }

    /// Generate the frame at `timestep` (0 = first frame, 1 = second frame)
    /// between two equally sized frames.
    ///
    /// Frames are zero-padded bottom-right to the pad multiple before
    /// inference and the synthesized frame is cropped back to the input size.
    /// Inference itself runs under an internal lock, so the interpolator can
    /// be shared across threads while graph execution stays serialized.
    pub fn interpolate(
        &self,
        frame0: &RgbImage,
        frame1: &RgbImage,
        timestep: f32,
    ) -> Result<RgbImage> {
        let _guard = timing_guard("visionflow_core::interpolate", log::Level::Debug);
        let session = self.session.as_ref().ok_or_else(|| {
            anyhow::anyhow!("no interpolation model is loaded; call load_model first")
        })?;

        anyhow::ensure!(
            frame0.dimensions() == frame1.dimensions(),
            "input frames must share dimensions ({}x{} vs {}x{})",
            frame0.width(),
            frame0.height(),
            frame1.width(),
            frame1.height()
        );
        let (width, height) = frame0.dimensions();
        anyhow::ensure!(width > 0 && height > 0, "input frames must be non-empty");

        let padded_width = align_to(width, self.pad_multiple);
        let padded_height = align_to(height, self.pad_multiple);
        let needs_padding = padded_width != width || padded_height != height;

        let (padded0, padded1): (Cow<'_, RgbImage>, Cow<'_, RgbImage>) = if needs_padding {
            (
                Cow::Owned(pad_frame(frame0, padded_width, padded_height)),
                Cow::Owned(pad_frame(frame1, padded_width, padded_height)),
            )
        } else {
            (Cow::Borrowed(frame0), Cow::Borrowed(frame1))
        };

        let inputs = {
            let _prep = timing_guard("visionflow_core::interpolate_preprocess", log::Level::Trace);
            assemble_inputs(session, &padded0, &padded1, timestep)?
        };

        let outputs = {
            let _run_lock = session.run_lock.lock().expect("inference lock poisoned");
            if session.first_run.swap(false, Ordering::Relaxed) {
                debug!(
                    "first inference for {}; graph warmup may add latency",
                    session.info.display_name
                );
            }
            let _inference = timing_guard("visionflow_core::interpolate_inference", log::Level::Debug);
            session.engine.run(inputs)?
        };
        anyhow::ensure!(!outputs.is_empty(), "interpolation model produced no outputs");

        let full = tensor_to_frame(&outputs[0])?;
        if needs_padding {
            anyhow::ensure!(
                full.width() >= width && full.height() >= height,
                "interpolated frame {}x{} is smaller than the original {}x{}",
                full.width(),
                full.height(),
                width,
                height
            );
            Ok(imageops::crop_imm(&full, 0, 0, width, height).to_image())
        } else {
            Ok(full)
        }
    }

    /// Produce `n` evenly spaced intermediate frames between two frames.
    ///
    /// Timesteps are `i / (n + 1)` for `i` in `1..=n`, endpoints excluded.
    /// Each frame is an independent single-step interpolation against the
    /// original pair, not a recursive subdivision.
    pub fn interpolate_n_times(
        &self,
        frame0: &RgbImage,
        frame1: &RgbImage,
        n: usize,
    ) -> Result<Vec<RgbImage>> {
        let mut frames = Vec::with_capacity(n);
        for i in 1..=n {
            let timestep = i as f32 / (n + 1) as f32;
            frames.push(self.interpolate(frame0, frame1, timestep)?);
        }
        Ok(frames)
    }

    /// Upsample a frame sequence to `multiplier` times its frame rate.
    ///
    /// Inserts `floor(multiplier) - 1` frames between each consecutive pair
    /// and keeps every original frame in order. A multiplier of 1.0 or below
    /// returns the input unchanged without touching the model.
    pub fn increase_fps(&self, frames: &[RgbImage], multiplier: f32) -> Result<Vec<RgbImage>> {
        if multiplier <= 1.0 {
            return Ok(frames.to_vec());
        }
        let inserted_per_pair = multiplier.floor() as usize - 1;
        let mut result =
            Vec::with_capacity(frames.len() + frames.len().saturating_sub(1) * inserted_per_pair);
        for pair in frames.windows(2) {
            result.push(pair[0].clone());
            result.extend(self.interpolate_n_times(&pair[0], &pair[1], inserted_per_pair)?);
        }
        if let Some(last) = frames.last() {
            result.push(last.clone());
        }
        Ok(result)
    }
}

fn resolve_input_layout(engine: &dyn InferenceEngine) -> Result<InputLayout> {
    let inputs = engine.inputs();
    anyhow::ensure!(!inputs.is_empty(), "interpolation model declares no inputs");
    Ok(match inputs.len() {
        1 => match inputs[0].dim(1) {
            Some(8) => InputLayout::SingleInput8Ch,
            Some(7) => InputLayout::SingleInput7Ch,
            // 6 concrete channels, or a symbolic channel dimension.
            _ => InputLayout::SingleInput6Ch,
        },
        2 => InputLayout::DualInput,
        _ => InputLayout::TripleInput,
    })
}

fn assemble_inputs(
    session: &LoadedSession,
    frame0: &RgbImage,
    frame1: &RgbImage,
    timestep: f32,
) -> Result<Vec<(String, Tensor)>> {
    let engine_inputs = session.engine.inputs();
    let precision = session.info.precision;
    match session.layout {
        InputLayout::SingleInput6Ch | InputLayout::SingleInput7Ch | InputLayout::SingleInput8Ch => {
            let planes0 = frame_to_array(frame0);
            let planes1 = frame_to_array(frame1);
            let timestep_planes;
            let mut parts = vec![planes0.view(), planes1.view()];
            let extra = session.layout.timestep_channels();
            if extra > 0 {
                let height = frame0.height() as usize;
                let width = frame0.width() as usize;
                timestep_planes = Array4::from_elem((1, extra, height, width), timestep);
                parts.push(timestep_planes.view());
            }
            let merged = ndarray::concatenate(Axis(1), &parts)
                .map_err(|e| anyhow::anyhow!("failed to assemble concatenated input: {e}"))?;
            let tensor = array_to_tensor(merged, precision)?;
            Ok(vec![(engine_inputs[0].name.clone(), tensor)])
        }
        InputLayout::DualInput | InputLayout::TripleInput => {
            let mut inputs = vec![
                (
                    engine_inputs[0].name.clone(),
                    frame_to_tensor(frame0, precision)?,
                ),
                (
                    engine_inputs[1].name.clone(),
                    frame_to_tensor(frame1, precision)?,
                ),
            ];
            if session.layout == InputLayout::TripleInput {
                let scalar = Tensor::from_shape(&[1], &[timestep])
                    .map_err(|e| anyhow::anyhow!("failed to build timestep tensor: {e}"))?;
                inputs.push((
                    engine_inputs[2].name.clone(),
                    cast_tensor(scalar, precision)?,
                ));
            }
            Ok(inputs)
        }
    }
}

fn align_to(value: u32, multiple: u32) -> u32 {
    assert!(multiple > 0, "pad multiple must be non-zero");
    value.div_ceil(multiple) * multiple
}

/// Zero-fill a canvas of the padded size and copy the frame into its top-left
/// corner.
fn pad_frame(frame: &RgbImage, padded_width: u32, padded_height: u32) -> RgbImage {
    let mut padded = RgbImage::new(padded_width, padded_height);
    imageops::replace(&mut padded, frame, 0, 0);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::TensorInfo,
        models::{InterpolationModelInfo, Precision},
    };
    use image::Rgb;
    use tract_onnx::prelude::DatumType;

    #[derive(Debug)]
    struct MetadataOnlyEngine {
        inputs: Vec<TensorInfo>,
    }

    impl InferenceEngine for MetadataOnlyEngine {
        fn run(&self, _inputs: Vec<(String, Tensor)>) -> Result<Vec<Tensor>> {
            anyhow::bail!("metadata-only engine cannot run")
        }

        fn inputs(&self) -> &[TensorInfo] {
            &self.inputs
        }

        fn outputs(&self) -> &[TensorInfo] {
            &[]
        }

        fn backend(&self) -> &str {
            "metadata-only"
        }
    }

    fn single_input(channel_dim: Option<usize>) -> Box<MetadataOnlyEngine> {
        Box::new(MetadataOnlyEngine {
            inputs: vec![TensorInfo {
                name: "input".to_string(),
                dims: vec![Some(1), channel_dim, None, None],
                datum_type: DatumType::F32,
            }],
        })
    }

    fn multi_input(count: usize) -> Box<MetadataOnlyEngine> {
        Box::new(MetadataOnlyEngine {
            inputs: (0..count)
                .map(|index| TensorInfo {
                    name: format!("in{index}"),
                    dims: vec![Some(1), Some(3), None, None],
                    datum_type: DatumType::F32,
                })
                .collect(),
        })
    }

    fn test_model() -> InterpolationModelInfo {
        InterpolationModelInfo::new(
            "test",
            "Test Model",
            "test.onnx",
            "0.0",
            Precision::Fp32,
            false,
            "tests",
        )
    }

    #[test]
    fn layout_resolves_by_channel_count() {
        assert_eq!(
            resolve_input_layout(single_input(Some(8)).as_ref()).unwrap(),
            InputLayout::SingleInput8Ch
        );
        assert_eq!(
            resolve_input_layout(single_input(Some(7)).as_ref()).unwrap(),
            InputLayout::SingleInput7Ch
        );
        assert_eq!(
            resolve_input_layout(single_input(Some(6)).as_ref()).unwrap(),
            InputLayout::SingleInput6Ch
        );
        // Symbolic channel dimensions fall back to the plain concatenation.
        assert_eq!(
            resolve_input_layout(single_input(None).as_ref()).unwrap(),
            InputLayout::SingleInput6Ch
        );
    }

    #[test]
    fn layout_resolves_by_input_arity() {
        assert_eq!(
            resolve_input_layout(multi_input(2).as_ref()).unwrap(),
            InputLayout::DualInput
        );
        assert_eq!(
            resolve_input_layout(multi_input(3).as_ref()).unwrap(),
            InputLayout::TripleInput
        );
        assert_eq!(
            resolve_input_layout(multi_input(4).as_ref()).unwrap(),
            InputLayout::TripleInput
        );
    }

    #[test]
    fn models_without_inputs_are_rejected() {
        let err = resolve_input_layout(multi_input(0).as_ref()).expect_err("no inputs");
        assert!(format!("{err}").contains("declares no inputs"));
    }

    #[test]
    fn align_to_rounds_up_to_the_multiple() {
        assert_eq!(align_to(64, 32), 64);
        assert_eq!(align_to(65, 32), 96);
        assert_eq!(align_to(100, 32), 128);
        assert_eq!(align_to(150, 32), 160);
        assert_eq!(align_to(1, 32), 32);
    }

    #[test]
    fn pad_frame_copies_content_and_zero_fills_the_rest() {
        let frame = RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]));
        let padded = pad_frame(&frame, 4, 3);
        assert_eq!(padded.dimensions(), (4, 3));
        assert_eq!(*padded.get_pixel(1, 1), Rgb([10, 20, 30]));
        assert_eq!(*padded.get_pixel(2, 0), Rgb([0, 0, 0]));
        assert_eq!(*padded.get_pixel(3, 2), Rgb([0, 0, 0]));
        assert_eq!(*padded.get_pixel(0, 2), Rgb([0, 0, 0]));
    }

    #[test]
    fn interpolate_without_a_model_is_an_error() {
        let interpolator = FrameInterpolator::new();
        let frame = RgbImage::new(32, 32);
        let err = interpolator
            .interpolate(&frame, &frame, 0.5)
            .expect_err("no model attached");
        assert!(format!("{err}").contains("no interpolation model is loaded"));
    }

    #[test]
    fn attach_and_unload_toggle_the_session() {
        let mut interpolator = FrameInterpolator::new();
        assert!(!interpolator.is_loaded());
        assert_eq!(interpolator.input_layout(), None);

        interpolator
            .attach_engine(single_input(Some(6)), test_model())
            .expect("attach");
        assert!(interpolator.is_loaded());
        assert_eq!(interpolator.input_layout(), Some(InputLayout::SingleInput6Ch));
        assert_eq!(interpolator.model_info().map(|info| info.name), Some("test"));

        interpolator.unload();
        assert!(!interpolator.is_loaded());
        assert_eq!(interpolator.input_layout(), None);
        // A second unload is a no-op.
        interpolator.unload();
        assert!(!interpolator.is_loaded());
    }

    #[test]
    fn mismatched_frame_sizes_are_rejected_before_inference() {
        let mut interpolator = FrameInterpolator::new();
        interpolator
            .attach_engine(single_input(Some(6)), test_model())
            .expect("attach");

        let small = RgbImage::new(32, 32);
        let large = RgbImage::new(64, 32);
        let err = interpolator
            .interpolate(&small, &large, 0.5)
            .expect_err("dimension mismatch");
        assert!(format!("{err}").contains("share dimensions"));
    }
}
