//! RetinaFace detection pipeline.
//!
//! Couples an inference engine with anchor generation, delta decoding, score
//! filtering, and suppression, then assembles caller-facing results. Images
//! run at their native resolution; the anchor grid for each resolution is
//! generated on first use and memoized.

use std::{borrow::Cow, cmp::Ordering, path::Path};

use anyhow::Result;
use image::{DynamicImage, RgbImage};
use ndarray::Axis;
use tract_onnx::prelude::Tensor;

use crate::{
    anchors::{Anchor, AnchorCache, AnchorConfig},
    decode::{DecodedBox, decode_boxes, decode_landmarks},
    engine::{InferenceEngine, TractEngine},
    nms::non_max_suppression,
};
use visionflow_utils::{DetectionSettings, load_image, rgb_to_bgr_chw, timing_guard};

/// Input tensor name the detection graphs declare.
const INPUT_NAME: &str = "input";

/// Per-channel training means, subtracted in BGR plane order.
const BGR_MEAN: [f32; 3] = [104.0, 117.0, 123.0];

/// Thresholds controlling candidate filtering and suppression.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Minimum face-class probability for a candidate to survive. Strict:
    /// a score equal to the threshold is dropped.
    pub confidence_threshold: f32,
    /// IoU threshold above which overlapping candidates are suppressed.
    pub nms_threshold: f32,
    /// Cap on candidates (by score) entering suppression, bounding its
    /// quadratic cost. Zero disables the cap.
    pub top_k: usize,
    /// Cap on detections returned after suppression.
    pub keep_top_k: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            nms_threshold: 0.2,
            top_k: 5_000,
            keep_top_k: 750,
        }
    }
}

impl From<DetectionSettings> for DetectorConfig {
    fn from(settings: DetectionSettings) -> Self {
        Self {
            confidence_threshold: settings.confidence_threshold,
            nms_threshold: settings.nms_threshold,
            top_k: settings.top_k,
            keep_top_k: settings.keep_top_k,
        }
    }
}

impl From<&DetectionSettings> for DetectorConfig {
    fn from(settings: &DetectionSettings) -> Self {
        settings.clone().into()
    }
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Rectangle area; degenerate boxes count as zero.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// A facial landmark coordinate in image space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

/// A detected face.
///
/// Landmarks follow a fixed semantic order: left eye, right eye, nose tip,
/// left mouth corner, right mouth corner.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    /// Face rectangle. Coordinates can extend past the image bounds for
    /// faces near the edges.
    pub rectangle: BoundingBox,
    /// The five landmarks in semantic order.
    pub landmarks: [Landmark; 5],
    /// Face-class probability in `[0, 1]`.
    pub confidence: f32,
    /// In-plane rotation in degrees, derived from the eye landmarks.
    pub roll_angle: f32,
}

impl FaceDetection {
    /// Assemble a detection, deriving the roll angle from the eye landmarks.
    pub fn new(rectangle: BoundingBox, landmarks: [Landmark; 5], confidence: f32) -> Self {
        let roll_angle = roll_angle_from(&landmarks);
        Self {
            rectangle,
            landmarks,
            confidence,
            roll_angle,
        }
    }
}

/// In-plane face rotation from the first two (eye) landmarks, in degrees.
///
/// Zero means the eyes are level; positive angles rotate clockwise in image
/// coordinates (y grows downward). Returns 0.0 when fewer than two landmarks
/// are supplied.
pub fn roll_angle_from(landmarks: &[Landmark]) -> f32 {
    if landmarks.len() < 2 {
        return 0.0;
    }
    let dx = landmarks[1].x - landmarks[0].x;
    let dy = landmarks[1].y - landmarks[0].y;
    dy.atan2(dx).to_degrees()
}

/// Face detection pipeline around an inference engine.
#[derive(Debug)]
pub struct RetinaFaceDetector {
    engine: Box<dyn InferenceEngine>,
    anchor_config: AnchorConfig,
    config: DetectorConfig,
    anchor_cache: AnchorCache,
}

impl RetinaFaceDetector {
    /// Load the detection model from disk. Fails fast when the file is
    /// missing or not a valid ONNX graph.
    pub fn new<P: AsRef<Path>>(model_path: P, config: DetectorConfig) -> Result<Self> {
        let engine = TractEngine::load(model_path)?;
        Ok(Self::with_engine(Box::new(engine), config))
    }

    /// Build a detector around an existing engine (tests, alternate backends).
    pub fn with_engine(engine: Box<dyn InferenceEngine>, config: DetectorConfig) -> Self {
        Self {
            engine,
            anchor_config: AnchorConfig::default(),
            config,
            anchor_cache: AnchorCache::default(),
        }
    }

    /// Access the detection thresholds.
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Drop memoized anchor grids. Worth calling when streaming frames of
    /// many distinct resolutions through one detector.
    pub fn clear_anchor_cache(&self) {
        self.anchor_cache.clear();
    }

    /// Run detection on an image file.
    pub fn detect_path<P: AsRef<Path>>(&self, path: P) -> Result<Vec<FaceDetection>> {
        let _guard = timing_guard("visionflow_core::detect_path", log::Level::Debug);
        let image = load_image(path)?;
        self.detect_image(&image)
    }

    /// Run detection on an in-memory image at its native resolution.
    ///
    /// Results are ordered by descending confidence and capped at
    /// `keep_top_k`.
    pub fn detect_image(&self, image: &DynamicImage) -> Result<Vec<FaceDetection>> {
        let _guard = timing_guard("visionflow_core::detect_image", log::Level::Debug);
        let rgb: Cow<'_, RgbImage> = match image.as_rgb8() {
            Some(rgb) => Cow::Borrowed(rgb),
            None => Cow::Owned(image.to_rgb8()),
        };
        let (width, height) = rgb.dimensions();
        anyhow::ensure!(
            width > 0 && height > 0,
            "source image dimensions must be greater than zero"
        );

        let tensor = {
            let _prep = timing_guard("visionflow_core::detect_preprocess", log::Level::Trace);
            detection_tensor(&rgb)?
        };

        let outputs = {
            let _inference = timing_guard("visionflow_core::detect_inference", log::Level::Debug);
            self.engine.run(vec![(INPUT_NAME.to_string(), tensor)])?
        };
        anyhow::ensure!(
            outputs.len() >= 3,
            "detection model must produce location, score, and landmark tensors (got {})",
            outputs.len()
        );

        let anchors = self
            .anchor_cache
            .get_or_generate(&self.anchor_config, width, height);

        let _post = timing_guard("visionflow_core::detect_postprocess", log::Level::Debug);
        assemble_detections(
            &outputs,
            &anchors,
            self.anchor_config.variances,
            width,
            height,
            &self.config,
        )
    }

    /// Detect and return only the most prominent face, or `None` when the
    /// image contains no face above the confidence threshold.
    ///
    /// Prominence is rectangle area, not confidence; equal areas resolve to
    /// the earlier detection in result order.
    pub fn detect_single(&self, image: &DynamicImage) -> Result<Option<FaceDetection>> {
        let mut detections = self.detect_image(image)?;
        if detections.is_empty() {
            return Ok(None);
        }
        let mut best = 0;
        for index in 1..detections.len() {
            if detections[index].rectangle.area() > detections[best].rectangle.area() {
                best = index;
            }
        }
        Ok(Some(detections.swap_remove(best)))
    }
}

/// Convert an image into the detector's input tensor: planar BGR f32 with the
/// per-channel training mean removed and a leading batch dimension.
fn detection_tensor(rgb: &RgbImage) -> Result<Tensor> {
    let (width, height) = rgb.dimensions();
    let mut chw = rgb_to_bgr_chw(rgb);
    for (channel, mean) in BGR_MEAN.into_iter().enumerate() {
        chw.index_axis_mut(Axis(0), channel)
            .mapv_inplace(|value| value - mean);
    }
    let shape = [1usize, 3, height as usize, width as usize];
    let (data, offset) = chw.into_raw_vec_and_offset();
    debug_assert_eq!(offset, Some(0), "expected contiguous array");
    Tensor::from_shape(&shape, &data)
        .map_err(|e| anyhow::anyhow!("failed to build detection tensor: {e}"))
}

fn assemble_detections(
    outputs: &[Tensor],
    anchors: &[Anchor],
    variances: (f32, f32),
    width: u32,
    height: u32,
    config: &DetectorConfig,
) -> Result<Vec<FaceDetection>> {
    let count = anchors.len();
    let loc = outputs[0]
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("location output is not f32: {e}"))?;
    let scores = outputs[1]
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("score output is not f32: {e}"))?;
    let landmark_deltas = outputs[2]
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("landmark output is not f32: {e}"))?;
    anyhow::ensure!(
        loc.len() == count * 4,
        "location output holds {} values, expected {} (4 per anchor)",
        loc.len(),
        count * 4
    );
    anyhow::ensure!(
        scores.len() == count * 2,
        "score output holds {} values, expected {} (2 per anchor)",
        scores.len(),
        count * 2
    );
    anyhow::ensure!(
        landmark_deltas.len() == count * 10,
        "landmark output holds {} values, expected {} (10 per anchor)",
        landmark_deltas.len(),
        count * 10
    );

    let boxes = decode_boxes(loc, anchors, variances);
    let points = decode_landmarks(landmark_deltas, anchors, variances);
    let width_f = width as f32;
    let height_f = height as f32;

    // Scale to pixel space, keeping only candidates above the confidence bar.
    let mut candidates: Vec<(DecodedBox, [f32; 10])> = Vec::new();
    for index in 0..count {
        let score = scores[index * 2 + 1];
        if !score.is_finite() || score <= config.confidence_threshold {
            continue;
        }
        let [x1, y1, x2, y2] = boxes[index];
        let decoded = DecodedBox::new(
            x1 * width_f,
            y1 * height_f,
            x2 * width_f,
            y2 * height_f,
            score,
        );
        let mut landmarks_px = points[index];
        for point in 0..5 {
            landmarks_px[2 * point] *= width_f;
            landmarks_px[2 * point + 1] *= height_f;
        }
        candidates.push((decoded, landmarks_px));
    }

    candidates.sort_by(|a, b| {
        b.0.score
            .partial_cmp(&a.0.score)
            .unwrap_or(Ordering::Equal)
    });
    if config.top_k > 0 && candidates.len() > config.top_k {
        candidates.truncate(config.top_k);
    }

    let boxes_only: Vec<DecodedBox> = candidates.iter().map(|(decoded, _)| *decoded).collect();
    let keep = non_max_suppression(&boxes_only, config.nms_threshold);

    let mut detections = Vec::with_capacity(keep.len().min(config.keep_top_k));
    for &index in keep.iter().take(config.keep_top_k) {
        let (decoded, landmarks_px) = &candidates[index];
        let rectangle = BoundingBox {
            x: decoded.x1,
            y: decoded.y1,
            width: decoded.x2 - decoded.x1,
            height: decoded.y2 - decoded.y1,
        };
        let landmarks = [
            Landmark {
                x: landmarks_px[0],
                y: landmarks_px[1],
            },
            Landmark {
                x: landmarks_px[2],
                y: landmarks_px[3],
            },
            Landmark {
                x: landmarks_px[4],
                y: landmarks_px[5],
            },
            Landmark {
                x: landmarks_px[6],
                y: landmarks_px[7],
            },
            Landmark {
                x: landmarks_px[8],
                y: landmarks_px[9],
            },
        ];
        detections.push(FaceDetection::new(rectangle, landmarks, decoded.score));
    }
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmark(x: f32, y: f32) -> Landmark {
        Landmark { x, y }
    }

    fn face_landmarks(left_eye: Landmark, right_eye: Landmark) -> [Landmark; 5] {
        [
            left_eye,
            right_eye,
            landmark(50.0, 60.0),
            landmark(40.0, 80.0),
            landmark(60.0, 80.0),
        ]
    }

    #[test]
    fn level_eyes_give_zero_roll() {
        let angle = roll_angle_from(&face_landmarks(landmark(30.0, 50.0), landmark(70.0, 50.0)));
        assert!(angle.abs() < 1e-6);
    }

    #[test]
    fn vertical_eye_offset_gives_ninety_degrees() {
        let angle = roll_angle_from(&face_landmarks(landmark(50.0, 30.0), landmark(50.0, 70.0)));
        assert!((angle - 90.0).abs() < 1e-4);
    }

    #[test]
    fn diagonal_eyes_give_forty_five_degrees() {
        let angle = roll_angle_from(&face_landmarks(landmark(0.0, 0.0), landmark(10.0, 10.0)));
        assert!((angle - 45.0).abs() < 1e-4);
    }

    #[test]
    fn too_few_landmarks_default_to_zero_roll() {
        assert_eq!(roll_angle_from(&[]), 0.0);
        assert_eq!(roll_angle_from(&[landmark(10.0, 10.0)]), 0.0);
    }

    #[test]
    fn face_detection_new_derives_the_roll_angle() {
        let detection = FaceDetection::new(
            BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 100.0,
            },
            face_landmarks(landmark(30.0, 60.0), landmark(70.0, 50.0)),
            0.95,
        );
        let expected = (-10.0f32).atan2(40.0).to_degrees();
        assert!((detection.roll_angle - expected).abs() < 1e-4);
        assert_eq!(detection.confidence, 0.95);
    }

    #[test]
    fn degenerate_rectangles_have_zero_area() {
        let flipped = BoundingBox {
            x: 10.0,
            y: 10.0,
            width: -5.0,
            height: 20.0,
        };
        assert_eq!(flipped.area(), 0.0);

        let normal = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 4.0,
            height: 2.5,
        };
        assert!((normal.area() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn converts_detection_settings() {
        let settings = DetectionSettings {
            confidence_threshold: 0.6,
            nms_threshold: 0.35,
            top_k: 100,
            keep_top_k: 10,
        };
        let config: DetectorConfig = (&settings).into();
        assert_eq!(config.confidence_threshold, 0.6);
        assert_eq!(config.nms_threshold, 0.35);
        assert_eq!(config.top_k, 100);
        assert_eq!(config.keep_top_k, 10);
    }

    #[test]
    fn detection_tensor_subtracts_the_bgr_means() {
        let mut rgb = RgbImage::new(1, 1);
        rgb.put_pixel(0, 0, image::Rgb([10, 20, 30]));

        let tensor = detection_tensor(&rgb).expect("tensor");
        assert_eq!(tensor.shape(), &[1, 3, 1, 1]);
        let values = tensor.as_slice::<f32>().expect("f32 data");
        // BGR order: 30 - 104, 20 - 117, 10 - 123.
        assert_eq!(values, &[-74.0, -97.0, -113.0]);
    }
}
