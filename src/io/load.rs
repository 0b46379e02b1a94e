//! Checkpoint loading

use super::format::CheckpointFormat;
use super::state::{checkpoint_path, NetworkMetadata, NetworkState, StateFile};
use crate::error::{Error, Result};
use ndarray::ArrayD;
use safetensors::tensor::Dtype;
use safetensors::SafeTensors;
use std::fs;
use std::path::Path;

/// Load the `tag` checkpoint of `network` from `experiment_dir`
pub fn load_network(
    experiment_dir: &Path,
    tag: &str,
    network: &str,
    format: CheckpointFormat,
) -> Result<NetworkState> {
    load_network_from(&checkpoint_path(experiment_dir, tag, network, format))
}

/// Load a checkpoint file; the format follows the extension
pub fn load_network_from(path: &Path) -> Result<NetworkState> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Serialization(format!("{} has no extension", path.display())))?;
    let format = CheckpointFormat::from_extension(ext)
        .ok_or_else(|| Error::Serialization(format!("Unsupported file extension: {ext}")))?;

    let data = fs::read(path)
        .map_err(|e| Error::Serialization(format!("Failed to read {}: {e}", path.display())))?;

    match format {
        CheckpointFormat::Json => {
            let file: StateFile = serde_json::from_slice(&data)
                .map_err(|e| Error::Serialization(format!("JSON deserialization failed: {e}")))?;
            NetworkState::from_file(file)
        }
        CheckpointFormat::SafeTensors => load_safetensors(&data),
    }
}

fn load_safetensors(data: &[u8]) -> Result<NetworkState> {
    let parse_err = |e: safetensors::SafeTensorError| {
        Error::Serialization(format!("SafeTensors parsing failed: {e}"))
    };
    let (_, header) = SafeTensors::read_metadata(data).map_err(parse_err)?;
    let metadata = header
        .metadata()
        .as_ref()
        .map(NetworkMetadata::from_header)
        .unwrap_or_else(|| NetworkMetadata::new("", "", "", ""));

    let tensors = SafeTensors::deserialize(data).map_err(parse_err)?;
    let mut names = tensors.names();
    names.sort();

    let mut state = NetworkState::new(metadata);
    for name in names {
        let view = tensors.tensor(name).map_err(parse_err)?;
        if view.dtype() != Dtype::F32 {
            return Err(Error::Serialization(format!(
                "tensor {name} has dtype {:?}, expected F32",
                view.dtype()
            )));
        }
        // views into the file buffer are not guaranteed to be 4-byte aligned
        let values: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        let tensor = ArrayD::from_shape_vec(view.shape().to_vec(), values)
            .map_err(|e| Error::Serialization(format!("tensor {name}: {e}")))?;
        state.tensors.push((name.to_string(), tensor));
    }
    Ok(state)
}
