//! Scriptable inference engine shared by the pipeline integration tests.

use std::fmt;

use anyhow::Result;
use tract_onnx::prelude::{DatumType, Tensor};
use visionflow_core::{InferenceEngine, TensorInfo};

type RunFn = dyn Fn(Vec<(String, Tensor)>) -> Result<Vec<Tensor>> + Send + Sync;

/// Engine whose metadata and run behavior are supplied by the test.
pub struct ScriptedEngine {
    inputs: Vec<TensorInfo>,
    outputs: Vec<TensorInfo>,
    handler: Box<RunFn>,
}

impl ScriptedEngine {
    pub fn new(
        inputs: Vec<TensorInfo>,
        outputs: Vec<TensorInfo>,
        handler: impl Fn(Vec<(String, Tensor)>) -> Result<Vec<Tensor>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inputs,
            outputs,
            handler: Box::new(handler),
        }
    }
}

impl fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl InferenceEngine for ScriptedEngine {
    fn run(&self, inputs: Vec<(String, Tensor)>) -> Result<Vec<Tensor>> {
        (self.handler)(inputs)
    }

    fn inputs(&self) -> &[TensorInfo] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorInfo] {
        &self.outputs
    }

    fn backend(&self) -> &str {
        "scripted"
    }
}

/// Metadata for a batch image input with a concrete channel count.
pub fn image_input(name: &str, channels: usize) -> TensorInfo {
    TensorInfo {
        name: name.to_string(),
        dims: vec![Some(1), Some(channels), None, None],
        datum_type: DatumType::F32,
    }
}

/// Metadata for a scalar-style input holding a single value.
#[allow(dead_code)]
pub fn scalar_input(name: &str) -> TensorInfo {
    TensorInfo {
        name: name.to_string(),
        dims: vec![Some(1)],
        datum_type: DatumType::F32,
    }
}

/// Metadata for a generically shaped output.
pub fn output_info(name: &str) -> TensorInfo {
    TensorInfo {
        name: name.to_string(),
        dims: vec![None, None],
        datum_type: DatumType::F32,
    }
}
