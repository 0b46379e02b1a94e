//! Checkpoint saving

use super::format::CheckpointFormat;
use super::state::{checkpoint_path, NetworkState};
use crate::error::{Error, Result};
use safetensors::tensor::{Dtype, TensorView};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Save `state` as `<experiment_dir>/<tag>_net_<network>.<ext>`, creating the
/// directory if needed. Returns the written path.
pub fn save_network(
    state: &NetworkState,
    experiment_dir: &Path,
    format: CheckpointFormat,
) -> Result<PathBuf> {
    fs::create_dir_all(experiment_dir)?;
    let path = checkpoint_path(
        experiment_dir,
        &state.metadata.tag,
        &state.metadata.network,
        format,
    );
    save_network_to(state, &path, format)?;
    Ok(path)
}

/// Save `state` to an explicit path
pub fn save_network_to(state: &NetworkState, path: &Path, format: CheckpointFormat) -> Result<()> {
    match format {
        CheckpointFormat::SafeTensors => save_safetensors(state, path)?,
        CheckpointFormat::Json => {
            let data = serde_json::to_string_pretty(&state.to_file())
                .map_err(|e| Error::Serialization(format!("JSON serialization failed: {e}")))?;
            write_replacing(path, data.as_bytes())?;
        }
    }
    debug!("Saved network {} to {}", state.metadata.network, path.display());
    Ok(())
}

fn save_safetensors(state: &NetworkState, path: &Path) -> Result<()> {
    let tensor_data: Vec<(&str, Vec<u8>, Vec<usize>)> = state
        .tensors
        .iter()
        .map(|(name, tensor)| {
            let values: Vec<f32> = tensor.iter().copied().collect();
            let bytes = bytemuck::cast_slice::<f32, u8>(&values).to_vec();
            (name.as_str(), bytes, tensor.shape().to_vec())
        })
        .collect();

    let views = tensor_data
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (*name, view))
                .map_err(|e| Error::Serialization(format!("tensor {name}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let bytes = safetensors::serialize(views, Some(state.metadata.to_header()))
        .map_err(|e| Error::Serialization(format!("SafeTensors serialization failed: {e}")))?;
    write_replacing(path, &bytes)
}

/// Write to `<path>.tmp`, then rename over `path`.
///
/// A failed or interrupted write leaves the previous checkpoint in place.
fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Err(e) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
