//! Registry of known frame-interpolation models.
//!
//! A static table describing the interpolation exports this pipeline knows
//! how to drive. Records are looked up by name; the precision field decides
//! tensor casts at the inference boundary and the rest is presentation
//! metadata for host applications.

use std::fmt;

/// Element precision a model expects at its tensor boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Fp16,
    Fp32,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Precision::Fp16 => "fp16",
                Precision::Fp32 => "fp32",
            }
        )
    }
}

/// A named frame-interpolation model record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpolationModelInfo {
    /// Stable registry key, e.g. `rife-v4.6`.
    pub name: &'static str,
    /// Human-visible name for host UIs.
    pub display_name: &'static str,
    /// Expected ONNX filename on disk.
    pub filename: &'static str,
    /// Upstream architecture version.
    pub version: &'static str,
    /// Tensor precision the export was produced with.
    pub precision: Precision,
    /// Whether the export bakes in ensemble (bidirectional) flow estimation.
    pub ensemble: bool,
    /// Short hint describing what the variant trades off.
    pub optimized_for: &'static str,
}

impl InterpolationModelInfo {
    pub const fn new(
        name: &'static str,
        display_name: &'static str,
        filename: &'static str,
        version: &'static str,
        precision: Precision,
        ensemble: bool,
        optimized_for: &'static str,
    ) -> Self {
        Self {
            name,
            display_name,
            filename,
            version,
            precision,
            ensemble,
            optimized_for,
        }
    }
}

static MODELS: [InterpolationModelInfo; 4] = [
    InterpolationModelInfo::new(
        "rife-v4.6",
        "RIFE v4.6",
        "rife_v4_6_fp32.onnx",
        "4.6",
        Precision::Fp32,
        false,
        "general use",
    ),
    InterpolationModelInfo::new(
        "rife-v4.15-lite",
        "RIFE v4.15 Lite",
        "rife_v4_15_lite_fp16.onnx",
        "4.15",
        Precision::Fp16,
        false,
        "speed",
    ),
    InterpolationModelInfo::new(
        "rife-v4.18",
        "RIFE v4.18",
        "rife_v4_18_fp32.onnx",
        "4.18",
        Precision::Fp32,
        false,
        "quality",
    ),
    InterpolationModelInfo::new(
        "rife-v4.18-ensemble",
        "RIFE v4.18 Ensemble",
        "rife_v4_18_ensemble_fp32.onnx",
        "4.18",
        Precision::Fp32,
        true,
        "maximum quality",
    ),
];

/// Returns every model the registry ships metadata for, in presentation order.
pub fn available_models() -> &'static [InterpolationModelInfo] {
    &MODELS
}

/// Find a model by registry name.
///
/// Matching ignores case and punctuation, so `RIFE v4.6` and `rife-v4.6`
/// resolve to the same record. Returns `None` for unknown names.
pub fn model_by_name(name: &str) -> Option<InterpolationModelInfo> {
    let wanted = normalize_name(name);
    MODELS
        .iter()
        .find(|model| normalize_name(model.name) == wanted)
        .cloned()
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
