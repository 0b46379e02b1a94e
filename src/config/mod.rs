//! Declarative YAML configuration
//!
//! # Example
//!
//! ```yaml
//! name: hcoco_gain
//! model: color_gain
//!
//! data:
//!   dataset_mode: ihd
//!   dataset_root: /data/iHarmony4
//!   dataset_name: HCOCO
//!
//! training:
//!   batch_size: 16
//!   niter: 60
//!   niter_decay: 40
//!
//! cadence:
//!   print_freq: 320
//!   save_epoch_freq: 5
//! ```

mod cli;
mod load;
mod schema;
mod validate;

pub use cli::{
    apply_overrides, apply_test_overrides, parse_args, Cli, Command, TestArgs, TrainArgs,
    ValidateArgs,
};
pub use load::{load_config, parse_config};
pub use schema::{
    CadenceParams, DataParams, DistributedParams, EvalParams, HarmonizeSpec, OutputParams, Phase,
    TrainingParams,
};
pub use validate::{validate_config, ValidationError};
