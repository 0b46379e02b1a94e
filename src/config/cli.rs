//! CLI argument parsing
//!
//! # Usage
//!
//! ```bash
//! armonizar train hcoco.yaml
//! armonizar train hcoco.yaml --niter 60 --niter-decay 40 --batch-size 16
//! armonizar test hcoco.yaml --epoch best
//! armonizar validate hcoco.yaml
//! ```

use super::schema::{HarmonizeSpec, Phase};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Armonizar: image harmonization training pipeline
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "armonizar")]
#[command(version)]
#[command(about = "Train and evaluate image harmonization models")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Train a model from YAML configuration
    Train(TrainArgs),

    /// Evaluate a checkpoint and write the result gallery
    Test(TestArgs),

    /// Validate a configuration file without running anything
    Validate(ValidateArgs),
}

/// Arguments for the train command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct TrainArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Override experiment name
    #[arg(long)]
    pub name: Option<String>,

    /// Override first epoch index
    #[arg(long)]
    pub epoch_count: Option<usize>,

    /// Override epochs at the initial learning rate
    #[arg(long)]
    pub niter: Option<usize>,

    /// Override decay epochs
    #[arg(long)]
    pub niter_decay: Option<usize>,

    /// Override global batch size
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Override learning rate
    #[arg(short, long)]
    pub lr: Option<f32>,

    /// Override number of data-parallel processes
    #[arg(long)]
    pub num_devices: Option<usize>,

    /// Resume from the `load_epoch` checkpoint
    #[arg(long)]
    pub continue_train: bool,

    /// Random seed for reproducibility
    #[arg(long)]
    pub seed: Option<u64>,

    /// Validate config but don't train
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the test command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct TestArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Checkpoint tag to load (latest, best, an epoch number, iter_<N>)
    #[arg(short, long)]
    pub epoch: Option<String>,

    /// Override evaluated split
    #[arg(long)]
    pub dataset_name: Option<String>,

    /// Stop after this many batches
    #[arg(long)]
    pub num_test: Option<usize>,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}

/// Parse CLI arguments from an iterator (for testing)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Apply train command overrides to a loaded spec
pub fn apply_overrides(spec: &mut HarmonizeSpec, args: &TrainArgs) {
    spec.phase = Phase::Train;

    if let Some(name) = &args.name {
        spec.name = name.clone();
    }
    if let Some(epoch_count) = args.epoch_count {
        spec.training.epoch_count = epoch_count;
    }
    if let Some(niter) = args.niter {
        spec.training.niter = niter;
    }
    if let Some(niter_decay) = args.niter_decay {
        spec.training.niter_decay = niter_decay;
    }
    if let Some(batch_size) = args.batch_size {
        spec.training.batch_size = batch_size;
    }
    if let Some(lr) = args.lr {
        spec.training.lr = lr;
    }
    if let Some(num_devices) = args.num_devices {
        spec.num_devices = num_devices;
    }
    if args.continue_train {
        spec.training.continue_train = true;
    }
    if let Some(seed) = args.seed {
        spec.seed = seed;
    }
}

/// Apply test command overrides to a loaded spec
///
/// Testing always runs on one device in serial order without flips.
pub fn apply_test_overrides(spec: &mut HarmonizeSpec, args: &TestArgs) {
    spec.phase = Phase::Test;
    spec.num_devices = 1;
    spec.data.serial_batches = true;
    spec.data.no_flip = true;
    spec.cadence.display_id = -1;

    if let Some(epoch) = &args.epoch {
        spec.training.load_epoch = epoch.clone();
        spec.evaluation.test_epoch = epoch.clone();
    }
    if let Some(dataset_name) = &args.dataset_name {
        spec.data.dataset_name = dataset_name.clone();
    }
    if let Some(num_test) = args.num_test {
        spec.evaluation.num_test = Some(num_test);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_train_command() {
        let cli = parse_args(["armonizar", "train", "config.yaml"]).unwrap();
        match cli.command {
            Command::Train(args) => {
                assert_eq!(args.config, PathBuf::from("config.yaml"));
                assert!(args.batch_size.is_none());
                assert!(!args.dry_run);
            }
            _ => panic!("Expected Train command"),
        }
    }

    #[test]
    fn test_parse_train_with_overrides() {
        let cli = parse_args([
            "armonizar",
            "train",
            "config.yaml",
            "--niter",
            "60",
            "--niter-decay",
            "40",
            "--batch-size",
            "16",
            "--num-devices",
            "2",
            "--continue-train",
        ])
        .unwrap();

        let Command::Train(args) = cli.command else {
            panic!("Expected Train command");
        };
        let mut spec = HarmonizeSpec::new("exp");
        apply_overrides(&mut spec, &args);

        assert_eq!(spec.training.niter, 60);
        assert_eq!(spec.training.niter_decay, 40);
        assert_eq!(spec.training.batch_size, 16);
        assert_eq!(spec.num_devices, 2);
        assert!(spec.training.continue_train);
        assert_eq!(spec.phase, Phase::Train);
    }

    #[test]
    fn test_parse_test_command() {
        let cli = parse_args([
            "armonizar",
            "test",
            "config.yaml",
            "--epoch",
            "best",
            "--num-test",
            "10",
        ])
        .unwrap();

        let Command::Test(args) = cli.command else {
            panic!("Expected Test command");
        };
        let mut spec = HarmonizeSpec::new("exp");
        spec.num_devices = 2;
        apply_test_overrides(&mut spec, &args);

        assert_eq!(spec.phase, Phase::Test);
        assert_eq!(spec.num_devices, 1);
        assert_eq!(spec.training.load_epoch, "best");
        assert_eq!(spec.evaluation.test_epoch, "best");
        assert_eq!(spec.evaluation.num_test, Some(10));
        assert!(spec.data.serial_batches);
    }

    #[test]
    fn test_global_flags() {
        let cli = parse_args(["armonizar", "--verbose", "validate", "config.yaml"]).unwrap();
        assert!(cli.verbose);
        assert!(!cli.quiet);
        assert!(matches!(cli.command, Command::Validate(_)));
    }

    #[test]
    fn test_missing_config_is_error() {
        assert!(parse_args(["armonizar", "train"]).is_err());
    }
}
