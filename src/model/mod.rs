//! Harmonization model contract
//!
//! The training loop and the evaluator only talk to models through
//! [`HarmonizationModel`]. Concrete models are created by name through a
//! [`ModelRegistry`].

mod color_gain;
mod schedule;
mod sgd;

pub use color_gain::ColorGainModel;
pub use schedule::{build_scheduler, ConstantLR, LRScheduler, LinearDecayLR, StepLR};
pub use sgd::Sgd;

use crate::config::HarmonizeSpec;
use crate::data::Batch;
use crate::distributed::{LossMap, ProcessGroup};
use crate::error::{Error, Result};
use ndarray::{s, Array4};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Checkpoint label
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CheckpointTag {
    Latest,
    Best,
    Epoch(usize),
    Iter(usize),
}

impl fmt::Display for CheckpointTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointTag::Latest => f.write_str("latest"),
            CheckpointTag::Best => f.write_str("best"),
            CheckpointTag::Epoch(epoch) => write!(f, "{epoch}"),
            CheckpointTag::Iter(iters) => write!(f, "iter_{iters}"),
        }
    }
}

impl FromStr for CheckpointTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "latest" => Ok(CheckpointTag::Latest),
            "best" => Ok(CheckpointTag::Best),
            _ => {
                if let Some(iters) = s.strip_prefix("iter_") {
                    if let Ok(n) = iters.parse() {
                        return Ok(CheckpointTag::Iter(n));
                    }
                }
                s.parse().map(CheckpointTag::Epoch).map_err(|_| {
                    Error::ConfigError(format!("'{s}' is not a checkpoint tag"))
                })
            }
        }
    }
}

/// Labelled NCHW image tensors in display order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Visuals {
    entries: Vec<(String, Array4<f32>)>,
}

impl Visuals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: impl Into<String>, images: Array4<f32>) {
        self.entries.push((label.into(), images));
    }

    pub fn get(&self, label: &str) -> Option<&Array4<f32>> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, t)| t)
    }

    /// Like [`get`](Self::get) but a missing label is an error
    pub fn require(&self, label: &str) -> Result<&Array4<f32>> {
        self.get(label)
            .ok_or_else(|| Error::Model(format!("model produced no '{label}' visual")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array4<f32>)> {
        self.entries.iter().map(|(l, t)| (l.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Images per label (the batch dimension)
    pub fn batch_len(&self) -> usize {
        self.entries.first().map_or(0, |(_, t)| t.shape()[0])
    }

    /// The `j`-th image of every label, each with a batch dimension of one
    pub fn sample(&self, j: usize) -> Result<Visuals> {
        let entries = self
            .entries
            .iter()
            .map(|(label, images)| {
                if j >= images.shape()[0] {
                    return Err(Error::Model(format!(
                        "visual '{label}' has {} images, asked for index {j}",
                        images.shape()[0]
                    )));
                }
                Ok((label.clone(), images.slice(s![j..j + 1, .., .., ..]).to_owned()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Visuals { entries })
    }
}

/// Model lifecycle driven by the training loop and the evaluator
pub trait HarmonizationModel: Send {
    /// Registered model name
    fn name(&self) -> &str;

    /// Unpack a batch for the next forward pass
    fn set_input(&mut self, batch: &Batch) -> Result<()>;

    /// Forward, loss, backward and weight update.
    ///
    /// In a multi-process run this is a collective call: gradients are
    /// averaged through the process group.
    fn optimize_parameters(&mut self) -> Result<()>;

    /// Losses of the last optimisation step
    fn get_current_losses(&self) -> LossMap;

    /// Images of the last forward pass
    fn get_current_visuals(&self) -> Result<Visuals>;

    /// Composite paths of the current input
    fn get_image_paths(&self) -> Vec<PathBuf>;

    /// Write every network under the experiment directory
    fn save_networks(&mut self, tag: &CheckpointTag) -> Result<()>;

    /// Read every network saved under `tag`
    fn load_networks(&mut self, tag: &str) -> Result<()>;

    /// Advance the schedule one epoch; returns the new rate
    fn update_learning_rate(&mut self) -> f32;

    fn learning_rate(&self) -> f32;

    /// Shape-dependent initialisation from the first batch
    fn data_dependent_initialize(&mut self, batch: &Batch) -> Result<()>;

    /// Create schedulers and load weights when testing or resuming
    fn setup(&mut self, spec: &HarmonizeSpec) -> Result<()>;

    /// Switch to inference behaviour
    fn eval(&mut self);

    /// Forward pass without gradient tracking
    fn test(&mut self) -> Result<()>;
}

/// Constructor for a model type
pub type ModelFactory =
    fn(&HarmonizeSpec, Arc<dyn ProcessGroup>) -> Result<Box<dyn HarmonizationModel>>;

/// Name -> factory table for model types
#[derive(Clone)]
pub struct ModelRegistry {
    factories: BTreeMap<String, ModelFactory>,
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// `color_gain`
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("color_gain", color_gain_model);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: ModelFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the model named by `spec.model`
    pub fn create(
        &self,
        spec: &HarmonizeSpec,
        group: Arc<dyn ProcessGroup>,
    ) -> Result<Box<dyn HarmonizationModel>> {
        let factory = self
            .factories
            .get(&spec.model)
            .ok_or_else(|| Error::UnknownComponent {
                kind: "model",
                name: spec.model.clone(),
            })?;
        factory(spec, group)
    }
}

fn color_gain_model(
    spec: &HarmonizeSpec,
    group: Arc<dyn ProcessGroup>,
) -> Result<Box<dyn HarmonizationModel>> {
    Ok(Box::new(ColorGainModel::new(spec, group)?))
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
