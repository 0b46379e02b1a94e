//! Per-channel foreground colour correction
//!
//! The smallest model that exercises the whole pipeline: every foreground
//! pixel of channel `c` is mapped to `comp * gain[c] + bias[c]`, the
//! background is passed through. Trained on the foreground L2 error.

use super::{CheckpointTag, HarmonizationModel, LRScheduler, Sgd, Visuals};
use crate::config::HarmonizeSpec;
use crate::data::Batch;
use crate::distributed::{LossMap, ProcessGroup};
use crate::error::{Error, Result};
use crate::io::{load_network, save_network, CheckpointFormat, NetworkMetadata, NetworkState};
use ndarray::{Array1, Array4, Ix1};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

const MODEL_NAME: &str = "color_gain";
const NETWORK: &str = "G";

#[derive(Debug, Clone, PartialEq)]
struct Params {
    gain: Array1<f32>,
    bias: Array1<f32>,
}

impl Params {
    fn identity(channels: usize) -> Self {
        Self {
            gain: Array1::ones(channels),
            bias: Array1::zeros(channels),
        }
    }

    fn channels(&self) -> usize {
        self.gain.len()
    }
}

pub struct ColorGainModel {
    experiment: String,
    experiment_dir: PathBuf,
    format: CheckpointFormat,
    group: Arc<dyn ProcessGroup>,
    params: Option<Params>,
    optimizer: Sgd,
    scheduler: Option<Box<dyn LRScheduler>>,
    input: Option<Batch>,
    harmonized: Option<Array4<f32>>,
    losses: LossMap,
    eval_mode: bool,
}

impl ColorGainModel {
    pub fn new(spec: &HarmonizeSpec, group: Arc<dyn ProcessGroup>) -> Result<Self> {
        let format = spec.output.checkpoint_format.parse()?;
        Ok(Self {
            experiment: spec.name.clone(),
            experiment_dir: spec.experiment_dir(),
            format,
            group,
            params: None,
            optimizer: Sgd::new(spec.training.lr, spec.training.momentum),
            scheduler: None,
            input: None,
            harmonized: None,
            losses: LossMap::new(),
            eval_mode: false,
        })
    }

    /// Current `(gain, bias)`, if allocated
    pub fn parameters(&self) -> Option<(&Array1<f32>, &Array1<f32>)> {
        self.params.as_ref().map(|p| (&p.gain, &p.bias))
    }

    pub fn is_eval(&self) -> bool {
        self.eval_mode
    }

    fn input(&self) -> Result<&Batch> {
        self.input
            .as_ref()
            .ok_or_else(|| Error::Model("set_input must be called before a forward pass".to_string()))
    }

    fn ensure_params(&mut self, channels: usize) -> Result<()> {
        match &self.params {
            Some(params) if params.channels() != channels => Err(Error::ShapeMismatch {
                expected: vec![params.channels()],
                got: vec![channels],
            }),
            Some(_) => Ok(()),
            None => {
                debug!("Allocating color gain parameters for {channels} channels");
                self.params = Some(Params::identity(channels));
                Ok(())
            }
        }
    }
}

fn batch_channels(batch: &Batch) -> usize {
    batch.comp.shape()[1]
}

fn forward(batch: &Batch, params: &Params) -> Result<Array4<f32>> {
    if batch_channels(batch) != params.channels() {
        return Err(Error::ShapeMismatch {
            expected: vec![params.channels()],
            got: vec![batch_channels(batch)],
        });
    }
    let mask = &batch.mask;
    Ok(Array4::from_shape_fn(batch.comp.dim(), |(n, c, y, x)| {
        let v = batch.comp[[n, c, y, x]];
        if mask[[n, 0, y, x]] > 0.5 {
            v * params.gain[c] + params.bias[c]
        } else {
            v
        }
    }))
}

struct Step {
    losses: LossMap,
    grad_gain: Array1<f32>,
    grad_bias: Array1<f32>,
}

/// Foreground L1/L2 and the L2 gradient with respect to gain and bias
fn loss_and_grad(batch: &Batch, harmonized: &Array4<f32>) -> Step {
    let channels = batch_channels(batch);
    let mut grad_gain = Array1::<f32>::zeros(channels);
    let mut grad_bias = Array1::<f32>::zeros(channels);
    let mut l1 = 0.0f64;
    let mut l2 = 0.0f64;
    let mut count = 0usize;

    for ((n, c, y, x), &h) in harmonized.indexed_iter() {
        if batch.mask[[n, 0, y, x]] <= 0.5 {
            continue;
        }
        let diff = h - batch.real[[n, c, y, x]];
        l1 += f64::from(diff.abs());
        l2 += f64::from(diff * diff);
        grad_gain[c] += diff * batch.comp[[n, c, y, x]];
        grad_bias[c] += diff;
        count += 1;
    }

    let mut losses = LossMap::new();
    if count > 0 {
        let scale = 2.0 / count as f32;
        grad_gain *= scale;
        grad_bias *= scale;
        l1 /= count as f64;
        l2 /= count as f64;
    }
    losses.insert("G_L1".to_string(), l1);
    losses.insert("G_L2".to_string(), l2);
    Step {
        losses,
        grad_gain,
        grad_bias,
    }
}

/// Average gradients across the group
fn average_grads(group: &dyn ProcessGroup, step: &mut Step) -> Result<()> {
    let mut packed = LossMap::new();
    for (c, (&g, &b)) in step.grad_gain.iter().zip(step.grad_bias.iter()).enumerate() {
        packed.insert(format!("gain.{c}"), f64::from(g));
        packed.insert(format!("bias.{c}"), f64::from(b));
    }
    let mean = group.all_reduce_mean(&packed)?;

    let unpack = |key: String| {
        mean.get(&key)
            .map(|&v| v as f32)
            .ok_or_else(|| Error::DistributedSync(format!("reduced gradients lack {key}")))
    };
    for c in 0..step.grad_gain.len() {
        step.grad_gain[c] = unpack(format!("gain.{c}"))?;
        step.grad_bias[c] = unpack(format!("bias.{c}"))?;
    }
    Ok(())
}

impl HarmonizationModel for ColorGainModel {
    fn name(&self) -> &str {
        MODEL_NAME
    }

    fn set_input(&mut self, batch: &Batch) -> Result<()> {
        self.input = Some(batch.clone());
        self.harmonized = None;
        Ok(())
    }

    fn optimize_parameters(&mut self) -> Result<()> {
        let channels = batch_channels(self.input()?);
        self.ensure_params(channels)?;

        let (harmonized, mut step) = {
            let batch = self.input()?;
            let params = self
                .params
                .as_ref()
                .ok_or_else(|| Error::Model("parameters are not allocated".to_string()))?;
            let harmonized = forward(batch, params)?;
            let step = loss_and_grad(batch, &harmonized);
            (harmonized, step)
        };

        if self.group.world_size() > 1 {
            average_grads(self.group.as_ref(), &mut step)?;
        }

        if let Some(params) = self.params.as_mut() {
            self.optimizer.step(
                &mut [&mut params.gain, &mut params.bias],
                &[step.grad_gain, step.grad_bias],
            );
        }
        self.losses = step.losses;
        self.harmonized = Some(harmonized);
        Ok(())
    }

    fn get_current_losses(&self) -> LossMap {
        self.losses.clone()
    }

    fn get_current_visuals(&self) -> Result<Visuals> {
        let batch = self.input()?;
        let harmonized = self
            .harmonized
            .as_ref()
            .ok_or_else(|| Error::Model("no forward pass has run on the current input".to_string()))?;

        let mut visuals = Visuals::new();
        visuals.push("comp", batch.comp.clone());
        visuals.push("harmonized", harmonized.clone());
        visuals.push("real", batch.real.clone());
        visuals.push("mask", batch.mask.clone());
        Ok(visuals)
    }

    fn get_image_paths(&self) -> Vec<PathBuf> {
        self.input
            .as_ref()
            .map(|b| b.paths.clone())
            .unwrap_or_default()
    }

    fn save_networks(&mut self, tag: &CheckpointTag) -> Result<()> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| Error::Model("cannot save before parameters are allocated".to_string()))?;

        let state = NetworkState::new(NetworkMetadata::new(
            self.experiment.clone(),
            NETWORK,
            MODEL_NAME,
            tag.to_string(),
        ))
        .with_tensor("gain", params.gain.clone().into_dyn())
        .with_tensor("bias", params.bias.clone().into_dyn());

        let path = save_network(&state, &self.experiment_dir, self.format)?;
        debug!("Saved {tag} checkpoint to {}", path.display());
        Ok(())
    }

    fn load_networks(&mut self, tag: &str) -> Result<()> {
        let state = load_network(&self.experiment_dir, tag, NETWORK, self.format)?;
        let as_vector = |name: &str| -> Result<Array1<f32>> {
            state
                .require(name)?
                .clone()
                .into_dimensionality::<Ix1>()
                .map_err(|e| Error::Serialization(format!("tensor {name}: {e}")))
        };
        let gain = as_vector("gain")?;
        let bias = as_vector("bias")?;
        if gain.len() != bias.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![gain.len()],
                got: vec![bias.len()],
            });
        }

        self.params = Some(Params { gain, bias });
        self.optimizer.reset();
        if self.group.is_master() {
            info!("Loaded network {NETWORK} from checkpoint '{tag}'");
        }
        Ok(())
    }

    fn update_learning_rate(&mut self) -> f32 {
        let old = self.optimizer.lr();
        let Some(scheduler) = self.scheduler.as_mut() else {
            return old;
        };
        scheduler.step();
        let new = scheduler.get_lr();
        self.optimizer.set_lr(new);
        if self.group.is_master() {
            info!("learning rate {old:.7} -> {new:.7}");
        }
        new
    }

    fn learning_rate(&self) -> f32 {
        self.optimizer.lr()
    }

    fn data_dependent_initialize(&mut self, batch: &Batch) -> Result<()> {
        self.ensure_params(batch_channels(batch))
    }

    fn setup(&mut self, spec: &HarmonizeSpec) -> Result<()> {
        let scheduler = super::build_scheduler(&spec.training)?;
        self.optimizer.set_lr(scheduler.get_lr());
        self.scheduler = Some(scheduler);

        if !spec.is_train() || spec.training.continue_train {
            self.load_networks(&spec.training.load_epoch)?;
        }
        if self.group.is_master() {
            let count = self.params.as_ref().map_or(0, |p| 2 * p.channels());
            info!("[Network {NETWORK}] Total number of parameters: {count}");
        }
        Ok(())
    }

    fn eval(&mut self) {
        self.eval_mode = true;
    }

    fn test(&mut self) -> Result<()> {
        let batch = self.input()?;
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| Error::Model("no weights loaded; call setup first".to_string()))?;
        let harmonized = forward(batch, params)?;
        // losses stay those of the last optimisation step
        let harmonized = harmonized.mapv(|v| v.clamp(0.0, 1.0));
        self.harmonized = Some(harmonized);
        Ok(())
    }
}
