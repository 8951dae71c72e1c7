//! Inference engine abstraction and the tract-onnx implementation.
//!
//! Pipelines never talk to a backend directly; they hold a boxed
//! [`InferenceEngine`] and feed it named tensors. [`TractEngine`] is the
//! production implementation; tests substitute scripted engines.

use std::{
    fmt::{self, Write},
    path::Path,
};

use anyhow::{Context, Result};
use log::{debug, warn};
use tract_onnx::prelude::{
    DatumType, Framework, Graph, InferenceModelExt, IntoTensor, SimplePlan, TVec, Tensor,
    TypedFact, TypedOp,
};
use tract_onnx::tract_hir::internal::DimLike;

type TypedModel = Graph<TypedFact, Box<dyn TypedOp>>;
type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// Declared name, shape, and element type of one model input or output.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    /// Tensor name as declared by the graph.
    pub name: String,
    /// Dimensions in declaration order; `None` marks a symbolic dimension.
    pub dims: Vec<Option<usize>>,
    /// Element type declared by the graph.
    pub datum_type: DatumType,
}

impl TensorInfo {
    /// Concrete size of one dimension, if the graph declares it.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied().flatten()
    }
}

impl fmt::Display for TensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self
            .dims
            .iter()
            .map(|dim| match dim {
                Some(value) => value.to_string(),
                None => "?".to_string(),
            })
            .collect();
        write!(f, "{} [{}] {:?}", self.name, dims.join(", "), self.datum_type)
    }
}

/// Contract between the pipelines and an inference backend.
///
/// `run` takes `&self` and implementations must be shareable across threads;
/// whether concurrent calls actually execute in parallel is up to the
/// backend. The interpolation pipeline serializes its calls regardless.
pub trait InferenceEngine: Send + Sync + fmt::Debug {
    /// Execute the graph against named input tensors.
    ///
    /// Every declared input must be supplied exactly once; outputs come back
    /// in graph declaration order.
    fn run(&self, inputs: Vec<(String, Tensor)>) -> Result<Vec<Tensor>>;

    /// Declared input metadata, in positional order.
    fn inputs(&self) -> &[TensorInfo];

    /// Declared output metadata, in positional order.
    fn outputs(&self) -> &[TensorInfo];

    /// Human-readable backend label for diagnostics.
    fn backend(&self) -> &str;
}

/// [`InferenceEngine`] backed by a tract-onnx typed plan.
#[derive(Debug)]
pub struct TractEngine {
    runnable: RunnableModel,
    inputs: Vec<TensorInfo>,
    outputs: Vec<TensorInfo>,
}

impl TractEngine {
    /// Parse, type-check, and optimize an ONNX graph from disk.
    ///
    /// Input and output metadata are captured from the typed graph before
    /// optimization, so symbolic dimensions and declared names survive even
    /// when the optimizer rewrites the graph. When optimization fails the
    /// engine falls back to a decluttered plan.
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();
        anyhow::ensure!(path.exists(), "model file not found: {}", path.display());

        let typed = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to parse ONNX graph from {}", path.display()))?
            .into_typed()
            .map_err(|e| anyhow::anyhow!("unable to type-check ONNX graph: {e}"))?;

        let inputs = describe_inputs(&typed)?;
        let outputs = describe_outputs(&typed)?;

        let runnable = match build_runnable(typed.clone(), true) {
            Ok(plan) => {
                debug!("model {} optimized successfully", path.display());
                plan
            }
            Err(opt_err) => {
                let optimize_msg = format!("{opt_err}");
                let mut chain_msg = String::new();
                for cause in opt_err.chain() {
                    let _ = writeln!(&mut chain_msg, "  - {cause}");
                }
                warn!(
                    "model {} failed optimized load ({}); falling back to decluttered graph (~2x slower).\nError chain:\n{}",
                    path.display(),
                    optimize_msg,
                    chain_msg.trim_end()
                );
                let decluttered = build_runnable(typed, false).with_context(|| {
                    format!(
                        "fallback to decluttered graph failed after optimize error: {optimize_msg}"
                    )
                })?;
                debug!("model {} running in decluttered mode", path.display());
                decluttered
            }
        };

        Ok(Self {
            runnable,
            inputs,
            outputs,
        })
    }
}

impl InferenceEngine for TractEngine {
    fn run(&self, inputs: Vec<(String, Tensor)>) -> Result<Vec<Tensor>> {
        let mut staged: Vec<Option<Tensor>> = (0..self.inputs.len()).map(|_| None).collect();
        for (name, tensor) in inputs {
            let position = self
                .inputs
                .iter()
                .position(|info| info.name == name)
                .ok_or_else(|| anyhow::anyhow!("model has no input named '{name}'"))?;
            anyhow::ensure!(
                staged[position].is_none(),
                "duplicate tensor supplied for input '{name}'"
            );
            staged[position] = Some(tensor);
        }
        let feed = staged
            .into_iter()
            .enumerate()
            .map(|(position, tensor)| {
                tensor.map(|t| t.into()).ok_or_else(|| {
                    anyhow::anyhow!("missing tensor for input '{}'", self.inputs[position].name)
                })
            })
            .collect::<Result<TVec<_>>>()?;

        let outputs = self
            .runnable
            .run(feed)
            .map_err(|e| anyhow::anyhow!("inference failed: {e}"))?;
        Ok(outputs
            .into_iter()
            .map(|value| value.into_tensor())
            .collect())
    }

    fn inputs(&self) -> &[TensorInfo] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorInfo] {
        &self.outputs
    }

    fn backend(&self) -> &str {
        "tract-onnx (cpu)"
    }
}

fn build_runnable(model: TypedModel, optimized: bool) -> Result<RunnableModel> {
    if optimized {
        model
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("unable to optimize graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make graph runnable: {e}"))
    } else {
        model
            .into_decluttered()
            .map_err(|e| anyhow::anyhow!("unable to declutter graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make graph runnable: {e}"))
    }
}

fn describe_inputs(model: &TypedModel) -> Result<Vec<TensorInfo>> {
    (0..model.inputs.len())
        .map(|position| {
            let name = model.node(model.inputs[position].node).name.clone();
            let fact = model
                .input_fact(position)
                .map_err(|e| anyhow::anyhow!("missing fact for input {position}: {e}"))?;
            Ok(describe_fact(name, fact))
        })
        .collect()
}

fn describe_outputs(model: &TypedModel) -> Result<Vec<TensorInfo>> {
    (0..model.outputs.len())
        .map(|position| {
            let outlet = model.outputs[position];
            let name = model
                .outlet_label(outlet)
                .map(str::to_string)
                .unwrap_or_else(|| model.node(outlet.node).name.clone());
            let fact = model
                .output_fact(position)
                .map_err(|e| anyhow::anyhow!("missing fact for output {position}: {e}"))?;
            Ok(describe_fact(name, fact))
        })
        .collect()
}

fn describe_fact(name: String, fact: &TypedFact) -> TensorInfo {
    let dims = fact.shape.iter().map(|dim| dim.to_usize().ok()).collect();
    TensorInfo {
        name,
        dims,
        datum_type: fact.datum_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loading_missing_model_fails() {
        let result = TractEngine::load("missing.onnx");
        assert!(result.is_err());
    }

    #[test]
    fn invalid_model_produces_useful_error() {
        let mut temp = NamedTempFile::new().expect("temp file");
        temp.write_all(b"not a real onnx file")
            .expect("write mock model");

        let err = TractEngine::load(temp.path()).expect_err("invalid ONNX should fail");
        let message = format!("{err}");
        assert!(
            message.contains("failed to parse ONNX") || message.contains("unable to optimize"),
            "Unexpected error message: {message}"
        );
    }

    #[test]
    fn tensor_info_reports_concrete_dims() {
        let info = TensorInfo {
            name: "input".to_string(),
            dims: vec![Some(1), Some(6), None, None],
            datum_type: DatumType::F32,
        };
        assert_eq!(info.dim(0), Some(1));
        assert_eq!(info.dim(1), Some(6));
        assert_eq!(info.dim(2), None);
        assert_eq!(info.dim(9), None);
        assert_eq!(format!("{info}"), "input [1, 6, ?, ?] F32");
    }
}
