//! Core inference pipelines: face detection and frame interpolation.
//!
//! The detection side decodes RetinaFace-style outputs (anchor generation,
//! delta decoding, non-maximum suppression) into face rectangles, landmarks,
//! and roll angles. The interpolation side drives RIFE-style models (stride
//! padding, per-model input assembly, serialized execution) to synthesize
//! frames between frames. Both run on an opaque [`InferenceEngine`] backed by
//! `tract-onnx` in production.

/// Prior-box generation and per-resolution caching.
pub mod anchors;
/// Delta decoding against the anchor grid.
pub mod decode;
/// High-level face detection pipeline and result types.
pub mod detector;
/// Inference engine abstraction and the tract-onnx implementation.
pub mod engine;
/// Frame-to-tensor layout and precision transforms.
pub mod frame;
/// Frame interpolation pipeline and input-layout dispatch.
pub mod interpolator;
/// Registry of known frame-interpolation models.
pub mod models;
/// Greedy non-maximum suppression.
pub mod nms;

pub use anchors::{Anchor, AnchorCache, AnchorConfig, anchor_count, generate_anchors};
pub use decode::{DecodedBox, decode_boxes, decode_landmarks};
pub use detector::{
    BoundingBox, DetectorConfig, FaceDetection, Landmark, RetinaFaceDetector, roll_angle_from,
};
pub use engine::{InferenceEngine, TensorInfo, TractEngine};
pub use frame::{frame_to_array, frame_to_tensor, tensor_to_frame};
pub use interpolator::{FrameInterpolator, InputLayout};
pub use models::{InterpolationModelInfo, Precision, available_models, model_by_name};
pub use nms::non_max_suppression;

/// Returns the crate version, for host application diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
