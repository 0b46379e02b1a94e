//! YAML schema definitions for harmonization experiments

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete experiment specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonizeSpec {
    /// Experiment name; checkpoints and results are grouped under it
    pub name: String,

    /// Registered model name (e.g. "color_gain")
    #[serde(default = "default_model")]
    pub model: String,

    /// Base RNG seed
    #[serde(default)]
    pub seed: u64,

    /// Number of data-parallel processes
    #[serde(default = "default_num_devices")]
    pub num_devices: usize,

    /// Train or test phase (set by the command, not usually by the file)
    #[serde(default)]
    pub phase: Phase,

    #[serde(default)]
    pub data: DataParams,

    #[serde(default)]
    pub training: TrainingParams,

    #[serde(default)]
    pub cadence: CadenceParams,

    #[serde(default)]
    pub evaluation: EvalParams,

    #[serde(default)]
    pub output: OutputParams,

    #[serde(default)]
    pub distributed: DistributedParams,
}

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Train,
    Test,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Test => "test",
        }
    }
}

/// Dataset selection and preprocessing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataParams {
    /// Registered dataset mode: "ihd" | "synthetic"
    #[serde(default = "default_dataset_mode")]
    pub dataset_mode: String,

    /// Root directory of the iHarmony4 checkout
    #[serde(default = "default_dataset_root")]
    pub dataset_root: PathBuf,

    /// Split name: ihd | HAdobe5k | HCOCO | HFlickr | Hday2night
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,

    /// Square side images are resized to
    #[serde(default = "default_crop_size")]
    pub crop_size: usize,

    /// Keep dataset order (no per-epoch shuffling)
    #[serde(default)]
    pub serial_batches: bool,

    /// Disable random horizontal flips
    #[serde(default)]
    pub no_flip: bool,

    /// Cap on the number of samples loaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_dataset_size: Option<usize>,
}

impl Default for DataParams {
    fn default() -> Self {
        Self {
            dataset_mode: default_dataset_mode(),
            dataset_root: default_dataset_root(),
            dataset_name: default_dataset_name(),
            crop_size: default_crop_size(),
            serial_batches: false,
            no_flip: false,
            max_dataset_size: None,
        }
    }
}

/// Optimisation hyperparameters and epoch range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    /// Global batch size, split evenly across devices
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// First epoch index (raise it when resuming)
    #[serde(default = "default_epoch_count")]
    pub epoch_count: usize,

    /// Epochs at the initial learning rate
    #[serde(default = "default_niter")]
    pub niter: usize,

    /// Epochs of linear decay to zero
    #[serde(default)]
    pub niter_decay: usize,

    /// Initial learning rate
    #[serde(default = "default_lr")]
    pub lr: f32,

    /// Learning rate policy: "linear" | "step" | "constant"
    #[serde(default = "default_lr_policy")]
    pub lr_policy: String,

    /// Step policy period in epochs
    #[serde(default = "default_lr_decay_iters")]
    pub lr_decay_iters: usize,

    /// SGD momentum
    #[serde(default = "default_momentum")]
    pub momentum: f32,

    /// Load `load_epoch` weights before training
    #[serde(default)]
    pub continue_train: bool,

    /// Checkpoint tag loaded when testing or continuing
    #[serde(default = "default_load_epoch")]
    pub load_epoch: String,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            epoch_count: default_epoch_count(),
            niter: default_niter(),
            niter_decay: 0,
            lr: default_lr(),
            lr_policy: default_lr_policy(),
            lr_decay_iters: default_lr_decay_iters(),
            momentum: default_momentum(),
            continue_train: false,
            load_epoch: default_load_epoch(),
        }
    }
}

impl TrainingParams {
    /// Last epoch of the run (inclusive)
    pub fn last_epoch(&self) -> usize {
        self.niter + self.niter_decay
    }
}

/// Periodic side-effect frequencies
///
/// Iteration cadences are measured in samples (the global iteration counter
/// advances by the batch size), epoch cadences in epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceParams {
    #[serde(default = "default_display_freq")]
    pub display_freq: usize,

    #[serde(default = "default_update_html_freq")]
    pub update_html_freq: usize,

    #[serde(default = "default_print_freq")]
    pub print_freq: usize,

    #[serde(default = "default_save_latest_freq")]
    pub save_latest_freq: usize,

    #[serde(default = "default_save_epoch_freq")]
    pub save_epoch_freq: usize,

    /// Tag iteration checkpoints `iter_<N>` instead of overwriting `latest`
    #[serde(default)]
    pub save_by_iter: bool,

    /// Keep per-epoch checkpoints once `save_iter_min_epoch` is reached
    #[serde(default)]
    pub save_iter_model: bool,

    #[serde(default = "default_save_iter_min_epoch")]
    pub save_iter_min_epoch: usize,

    /// Plot losses when > 0
    #[serde(default = "default_display_id")]
    pub display_id: i32,
}

impl Default for CadenceParams {
    fn default() -> Self {
        Self {
            display_freq: default_display_freq(),
            update_html_freq: default_update_html_freq(),
            print_freq: default_print_freq(),
            save_latest_freq: default_save_latest_freq(),
            save_epoch_freq: default_save_epoch_freq(),
            save_by_iter: false,
            save_iter_model: false,
            save_iter_min_epoch: default_save_iter_min_epoch(),
            display_id: default_display_id(),
        }
    }
}

/// Evaluation and result-gallery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalParams {
    /// Switch the model to inference mode before testing
    #[serde(default = "default_true")]
    pub eval_mode: bool,

    /// Tag used in the detail report file name
    #[serde(default = "default_load_epoch")]
    pub test_epoch: String,

    /// Stop after this many batches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_test: Option<usize>,

    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: f32,

    #[serde(default = "default_display_winsize")]
    pub display_winsize: usize,
}

impl Default for EvalParams {
    fn default() -> Self {
        Self {
            eval_mode: true,
            test_epoch: default_load_epoch(),
            num_test: None,
            aspect_ratio: default_aspect_ratio(),
            display_winsize: default_display_winsize(),
        }
    }
}

/// Output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputParams {
    #[serde(default = "default_checkpoints_dir")]
    pub checkpoints_dir: PathBuf,

    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Structured event log root
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Checkpoint format: "safetensors" | "json"
    #[serde(default = "default_checkpoint_format")]
    pub checkpoint_format: String,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            checkpoints_dir: default_checkpoints_dir(),
            results_dir: default_results_dir(),
            log_dir: default_log_dir(),
            checkpoint_format: default_checkpoint_format(),
        }
    }
}

/// Rendezvous for multi-process runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedParams {
    #[serde(default = "default_master_addr")]
    pub master_addr: String,

    #[serde(default = "default_master_port")]
    pub master_port: u16,

    /// Deadline for every worker to join the group
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Deadline for a single reduction; unset waits for slow peers indefinitely
    #[serde(default)]
    pub collective_timeout_secs: Option<u64>,
}

impl Default for DistributedParams {
    fn default() -> Self {
        Self {
            master_addr: default_master_addr(),
            master_port: default_master_port(),
            timeout_secs: default_timeout_secs(),
            collective_timeout_secs: None,
        }
    }
}

impl HarmonizeSpec {
    /// Spec with every section at its default
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: default_model(),
            seed: 0,
            num_devices: default_num_devices(),
            phase: Phase::Train,
            data: DataParams::default(),
            training: TrainingParams::default(),
            cadence: CadenceParams::default(),
            evaluation: EvalParams::default(),
            output: OutputParams::default(),
            distributed: DistributedParams::default(),
        }
    }

    pub fn is_train(&self) -> bool {
        self.phase == Phase::Train
    }

    /// Per-process batch size
    pub fn device_batch_size(&self) -> usize {
        (self.training.batch_size / self.num_devices.max(1)).max(1)
    }

    /// `<checkpoints_dir>/<name>`
    pub fn experiment_dir(&self) -> PathBuf {
        self.output.checkpoints_dir.join(&self.name)
    }

    /// `<results_dir>/<name>`
    pub fn results_dir(&self) -> PathBuf {
        self.output.results_dir.join(&self.name)
    }

    /// Configuration used by the per-epoch best-checkpoint evaluation.
    ///
    /// Built from defaults rather than from `self`: only the experiment
    /// identity, model, dataset location, output dirs, seed and crop size are
    /// carried over. Everything else is pinned to the test settings
    /// (batch size 8, serial order, no flips, HCOCO, one device).
    pub fn periodic_eval_options(&self) -> HarmonizeSpec {
        let mut cfg = HarmonizeSpec::new(self.name.clone());
        cfg.model = self.model.clone();
        cfg.seed = self.seed;
        cfg.output = self.output.clone();
        cfg.data.dataset_mode = self.data.dataset_mode.clone();
        cfg.data.dataset_root = self.data.dataset_root.clone();
        cfg.data.crop_size = self.data.crop_size;

        cfg.phase = Phase::Test;
        cfg.num_devices = 1;
        cfg.training.batch_size = 8;
        cfg.training.load_epoch = default_load_epoch();
        cfg.data.serial_batches = true;
        cfg.data.no_flip = true;
        cfg.data.dataset_name = "HCOCO".to_string();
        cfg.cadence.display_id = -1;
        cfg
    }
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "color_gain".to_string()
}

fn default_num_devices() -> usize {
    1
}

fn default_dataset_mode() -> String {
    "ihd".to_string()
}

fn default_dataset_root() -> PathBuf {
    PathBuf::from("./data/iHarmony4")
}

fn default_dataset_name() -> String {
    "ihd".to_string()
}

fn default_crop_size() -> usize {
    256
}

fn default_batch_size() -> usize {
    1
}

fn default_epoch_count() -> usize {
    1
}

fn default_niter() -> usize {
    100
}

fn default_lr() -> f32 {
    0.0002
}

fn default_lr_policy() -> String {
    "linear".to_string()
}

fn default_lr_decay_iters() -> usize {
    50
}

fn default_momentum() -> f32 {
    0.9
}

fn default_load_epoch() -> String {
    "latest".to_string()
}

fn default_display_freq() -> usize {
    400
}

fn default_update_html_freq() -> usize {
    1000
}

fn default_print_freq() -> usize {
    100
}

fn default_save_latest_freq() -> usize {
    5000
}

fn default_save_epoch_freq() -> usize {
    1
}

fn default_save_iter_min_epoch() -> usize {
    55
}

fn default_display_id() -> i32 {
    1
}

fn default_aspect_ratio() -> f32 {
    1.0
}

fn default_display_winsize() -> usize {
    256
}

fn default_checkpoints_dir() -> PathBuf {
    PathBuf::from("./checkpoints")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("./results")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./runs")
}

fn default_checkpoint_format() -> String {
    "safetensors".to_string()
}

fn default_master_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_master_port() -> u16 {
    29500
}

fn default_timeout_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let yaml = "name: hcoco_run\n";

        let spec: HarmonizeSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.name, "hcoco_run");
        assert_eq!(spec.model, "color_gain");
        assert_eq!(spec.training.batch_size, 1);
        assert_eq!(spec.cadence.save_iter_min_epoch, 55);
        assert_eq!(spec.phase, Phase::Train);
    }

    #[test]
    fn test_deserialize_full_config() {
        let yaml = r#"
name: ihd_gain
model: color_gain
seed: 7
num_devices: 2

data:
  dataset_mode: ihd
  dataset_root: /data/iHarmony4
  dataset_name: HFlickr
  crop_size: 128
  no_flip: true
  max_dataset_size: 500

training:
  batch_size: 16
  epoch_count: 3
  niter: 60
  niter_decay: 40
  lr: 0.001
  lr_policy: step
  lr_decay_iters: 20

cadence:
  display_freq: 1600
  print_freq: 320
  save_latest_freq: 6400
  save_epoch_freq: 5
  save_by_iter: true
  save_iter_model: true

evaluation:
  eval_mode: false
  test_epoch: best

output:
  checkpoints_dir: /tmp/ckpt
  checkpoint_format: json

distributed:
  master_port: 31000
"#;

        let spec: HarmonizeSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.num_devices, 2);
        assert_eq!(spec.data.dataset_name, "HFlickr");
        assert_eq!(spec.data.max_dataset_size, Some(500));
        assert_eq!(spec.training.last_epoch(), 100);
        assert_eq!(spec.device_batch_size(), 8);
        assert!(spec.cadence.save_by_iter);
        assert_eq!(spec.evaluation.test_epoch, "best");
        assert_eq!(spec.output.checkpoint_format, "json");
        assert_eq!(spec.distributed.master_port, 31000);
        assert_eq!(spec.distributed.master_addr, "127.0.0.1");
        assert_eq!(spec.distributed.timeout_secs, 300);
        assert_eq!(spec.distributed.collective_timeout_secs, None);
    }

    #[test]
    fn test_phase_serializes_lowercase() {
        let yaml = serde_yaml::to_string(&Phase::Test).unwrap();
        assert_eq!(yaml.trim(), "test");
    }

    #[test]
    fn test_periodic_eval_options_are_isolated() {
        let mut spec = HarmonizeSpec::new("exp");
        spec.model = "custom".to_string();
        spec.num_devices = 4;
        spec.training.batch_size = 64;
        spec.training.continue_train = true;
        spec.training.load_epoch = "12".to_string();
        spec.data.dataset_name = "HAdobe5k".to_string();
        spec.data.dataset_mode = "synthetic".to_string();
        spec.data.serial_batches = false;
        spec.data.no_flip = false;
        spec.data.crop_size = 64;

        let cfg = spec.periodic_eval_options();
        assert_eq!(cfg.name, "exp");
        assert_eq!(cfg.model, "custom");
        assert_eq!(cfg.phase, Phase::Test);
        assert_eq!(cfg.num_devices, 1);
        assert_eq!(cfg.training.batch_size, 8);
        assert_eq!(cfg.training.load_epoch, "latest");
        assert!(!cfg.training.continue_train);
        assert!(cfg.data.serial_batches);
        assert!(cfg.data.no_flip);
        assert_eq!(cfg.data.dataset_name, "HCOCO");
        assert_eq!(cfg.data.dataset_mode, "synthetic");
        assert_eq!(cfg.data.crop_size, 64);
        assert_eq!(cfg.cadence.display_id, -1);

        // the source spec is untouched
        assert_eq!(spec.training.batch_size, 64);
        assert_eq!(spec.data.dataset_name, "HAdobe5k");
    }

    #[test]
    fn test_device_batch_size_never_zero() {
        let mut spec = HarmonizeSpec::new("exp");
        spec.training.batch_size = 1;
        spec.num_devices = 4;
        assert_eq!(spec.device_batch_size(), 1);
    }
}
