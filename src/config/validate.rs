//! Configuration validation

use super::schema::HarmonizeSpec;
use crate::data::DatasetSplit;

/// Validation error type
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Experiment name must not be empty")]
    EmptyName,

    #[error("Invalid batch size: {0} (must be > 0)")]
    InvalidBatchSize(usize),

    #[error("Batch size {batch_size} cannot be split across {num_devices} devices")]
    BatchSmallerThanDevices {
        batch_size: usize,
        num_devices: usize,
    },

    #[error("Invalid device count: {0} (must be > 0)")]
    InvalidDeviceCount(usize),

    #[error("Invalid learning rate: {0} (must be > 0.0)")]
    InvalidLearningRate(f32),

    #[error("Invalid learning rate policy: {0} (must be one of: linear, step, constant)")]
    InvalidLrPolicy(String),

    #[error("Invalid frequency for {name}: must be > 0")]
    InvalidFrequency { name: &'static str },

    #[error("Invalid epoch range: epoch_count {epoch_count} is past the last epoch {last}")]
    InvalidEpochRange { epoch_count: usize, last: usize },

    #[error("Invalid crop size: {0} (must be > 0)")]
    InvalidCropSize(usize),

    #[error("Unknown dataset split: {0} (must be one of: ihd, HAdobe5k, HCOCO, HFlickr, Hday2night)")]
    UnknownSplit(String),

    #[error("Invalid checkpoint format: {0} (must be one of: safetensors, json)")]
    InvalidCheckpointFormat(String),
}

/// Validate an experiment specification
///
/// Checks numeric ranges and enumerated names. Paths are not checked here;
/// missing data surfaces as a data-load error when the dataset is built.
pub fn validate_config(spec: &HarmonizeSpec) -> Result<(), ValidationError> {
    if spec.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }

    if spec.num_devices == 0 {
        return Err(ValidationError::InvalidDeviceCount(spec.num_devices));
    }

    let batch_size = spec.training.batch_size;
    if batch_size == 0 {
        return Err(ValidationError::InvalidBatchSize(batch_size));
    }
    if batch_size < spec.num_devices {
        return Err(ValidationError::BatchSmallerThanDevices {
            batch_size,
            num_devices: spec.num_devices,
        });
    }

    if spec.training.lr <= 0.0 {
        return Err(ValidationError::InvalidLearningRate(spec.training.lr));
    }

    let valid_policies = ["linear", "step", "constant"];
    if !valid_policies.contains(&spec.training.lr_policy.as_str()) {
        return Err(ValidationError::InvalidLrPolicy(
            spec.training.lr_policy.clone(),
        ));
    }
    if spec.training.lr_policy == "step" && spec.training.lr_decay_iters == 0 {
        return Err(ValidationError::InvalidFrequency {
            name: "lr_decay_iters",
        });
    }

    let last = spec.training.last_epoch();
    if spec.is_train() && spec.training.epoch_count > last {
        return Err(ValidationError::InvalidEpochRange {
            epoch_count: spec.training.epoch_count,
            last,
        });
    }

    let cadence = &spec.cadence;
    let frequencies = [
        ("display_freq", cadence.display_freq),
        ("update_html_freq", cadence.update_html_freq),
        ("print_freq", cadence.print_freq),
        ("save_latest_freq", cadence.save_latest_freq),
        ("save_epoch_freq", cadence.save_epoch_freq),
    ];
    for (name, freq) in frequencies {
        if freq == 0 {
            return Err(ValidationError::InvalidFrequency { name });
        }
    }

    if spec.data.crop_size == 0 {
        return Err(ValidationError::InvalidCropSize(spec.data.crop_size));
    }

    if spec.data.dataset_name.parse::<DatasetSplit>().is_err() {
        return Err(ValidationError::UnknownSplit(spec.data.dataset_name.clone()));
    }

    let valid_formats = ["safetensors", "json"];
    if !valid_formats.contains(&spec.output.checkpoint_format.as_str()) {
        return Err(ValidationError::InvalidCheckpointFormat(
            spec.output.checkpoint_format.clone(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_spec() -> HarmonizeSpec {
        HarmonizeSpec::new("exp")
    }

    #[test]
    fn test_default_spec_is_valid() {
        assert!(validate_config(&create_valid_spec()).is_ok());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut spec = create_valid_spec();
        spec.training.batch_size = 0;
        assert_eq!(
            validate_config(&spec),
            Err(ValidationError::InvalidBatchSize(0))
        );
    }

    #[test]
    fn test_batch_smaller_than_devices() {
        let mut spec = create_valid_spec();
        spec.training.batch_size = 2;
        spec.num_devices = 4;
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::BatchSmallerThanDevices { .. })
        ));
    }

    #[test]
    fn test_zero_frequency_is_named() {
        let mut spec = create_valid_spec();
        spec.cadence.print_freq = 0;
        assert_eq!(
            validate_config(&spec),
            Err(ValidationError::InvalidFrequency { name: "print_freq" })
        );
    }

    #[test]
    fn test_unknown_split() {
        let mut spec = create_valid_spec();
        spec.data.dataset_name = "COCO".to_string();
        assert_eq!(
            validate_config(&spec),
            Err(ValidationError::UnknownSplit("COCO".to_string()))
        );
    }

    #[test]
    fn test_invalid_policy() {
        let mut spec = create_valid_spec();
        spec.training.lr_policy = "cosine".to_string();
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::InvalidLrPolicy(_))
        ));
    }

    #[test]
    fn test_epoch_count_past_range() {
        let mut spec = create_valid_spec();
        spec.training.niter = 5;
        spec.training.niter_decay = 0;
        spec.training.epoch_count = 6;
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::InvalidEpochRange { .. })
        ));
    }

    #[test]
    fn test_empty_name() {
        let spec = HarmonizeSpec::new("  ");
        assert_eq!(validate_config(&spec), Err(ValidationError::EmptyName));
    }

    #[test]
    fn test_invalid_checkpoint_format() {
        let mut spec = create_valid_spec();
        spec.output.checkpoint_format = "pth".to_string();
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::InvalidCheckpointFormat(_))
        ));
    }
}
