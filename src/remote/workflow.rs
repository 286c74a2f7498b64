//! Workflow template loading and patching.
//!
//! A template is an API-format prompt graph: a JSON object mapping node ids
//! to `{class_type, inputs}`. The template itself is read-only after
//! loading; [`WorkflowTemplate::patch`] deep-copies and returns a new
//! payload for each submission.

use std::path::Path;

use serde_json::{json, Map, Value};

use crate::config::SamplerOverrides;
use crate::error::{PhotovarError, Result};
use crate::services::FileStore;

/// Prefix prepended to every output writer so server-side results land in a
/// directory this tool owns.
pub const OUTPUT_PREFIX: &str = "comfy_api_output";

/// Role of a node in the graph, derived from its ComfyUI class name.
///
/// Unrecognized classes are passed through untouched rather than rejected,
/// so templates can carry arbitrary custom nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Receives the staged input image reference
    ImageInput,
    /// Receives the prompt text
    TextEncoder,
    /// Receives sampler parameter overrides
    Sampler,
    /// Receives the output filename prefix
    OutputWriter,
    /// Left untouched
    Unknown,
}

impl NodeKind {
    /// Classify a ComfyUI `class_type` string.
    #[must_use]
    pub fn from_class_type(class_type: &str) -> Self {
        match class_type {
            "LoadImage" | "LoadImageFromPath" => Self::ImageInput,
            "CLIPTextEncode" | "CLIPTextEncodeSDXL" | "CLIPTextEncodeWAS" => Self::TextEncoder,
            "KSampler" => Self::Sampler,
            "SaveImage" => Self::OutputWriter,
            _ => Self::Unknown,
        }
    }
}

/// An immutable, validated workflow template.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    nodes: Map<String, Value>,
}

impl WorkflowTemplate {
    /// Load and validate a template from a JSON file.
    ///
    /// # Errors
    /// Rejects non-object documents and GUI-export workflows (those carry a
    /// top-level `nodes` array and cannot be submitted to `/prompt`).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let value = FileStore::load_json(path.as_ref())?;
        Self::from_value(value)
    }

    /// Build a template from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(nodes) = value else {
            return Err(PhotovarError::invalid_config(
                "workflow template must be a JSON object of nodes",
            ));
        };
        if nodes.contains_key("nodes") {
            return Err(PhotovarError::invalid_config(
                "GUI-export workflow detected; export the API format instead",
            ));
        }
        Ok(Self { nodes })
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Produce a submission payload: a deep copy of the template with the
    /// image reference, prompt text, output prefix, and sampler overrides
    /// applied per node kind. The template is never mutated.
    #[must_use]
    pub fn patch(
        &self,
        image_ref: &str,
        prompt_text: &str,
        overrides: &SamplerOverrides,
    ) -> Value {
        let mut nodes = self.nodes.clone();

        for node in nodes.values_mut() {
            let Some(node) = node.as_object_mut() else {
                continue;
            };
            let kind = node
                .get("class_type")
                .and_then(Value::as_str)
                .map_or(NodeKind::Unknown, NodeKind::from_class_type);
            if kind == NodeKind::Unknown {
                continue;
            }

            let inputs = node
                .entry("inputs")
                .or_insert_with(|| Value::Object(Map::new()));
            let Some(inputs) = inputs.as_object_mut() else {
                continue;
            };

            match kind {
                NodeKind::ImageInput => {
                    inputs.insert("image".into(), json!(image_ref));
                }
                NodeKind::TextEncoder => {
                    // Only replace an existing text input; encoders wired to
                    // upstream nodes keep their connections.
                    if inputs.contains_key("text") && !prompt_text.is_empty() {
                        inputs.insert("text".into(), json!(prompt_text));
                    }
                }
                NodeKind::OutputWriter => {
                    let base = inputs
                        .get("filename_prefix")
                        .and_then(Value::as_str)
                        .map(basename)
                        .filter(|b| !b.is_empty())
                        .unwrap_or("result");
                    inputs.insert(
                        "filename_prefix".into(),
                        json!(format!("{OUTPUT_PREFIX}/{base}")),
                    );
                }
                NodeKind::Sampler => {
                    if let Some(seed) = overrides.seed {
                        inputs.insert("seed".into(), json!(seed));
                    }
                    if let Some(steps) = overrides.steps {
                        inputs.insert("steps".into(), json!(steps));
                    }
                    if let Some(name) = &overrides.sampler_name {
                        inputs.insert("sampler_name".into(), json!(name));
                    }
                    if let Some(scheduler) = &overrides.scheduler {
                        inputs.insert("scheduler".into(), json!(scheduler));
                    }
                    if let Some(cfg) = overrides.cfg_scale {
                        inputs.insert("cfg".into(), json!(cfg));
                    }
                }
                NodeKind::Unknown => {}
            }
        }

        Value::Object(nodes)
    }
}

/// Last path component of a prefix that may contain directories.
fn basename(prefix: &str) -> &str {
    prefix
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(prefix)
}
