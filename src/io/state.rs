//! Network state for serialization

use super::CheckpointFormat;
use crate::error::{Error, Result};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Identity of a saved network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetadata {
    /// Experiment name
    pub experiment: String,

    /// Network name within the model (e.g. "G")
    pub network: String,

    /// Model type that produced the weights
    pub model: String,

    /// Checkpoint tag ("latest", "best", "12", "iter_4000")
    pub tag: String,

    /// Extra string fields
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

impl NetworkMetadata {
    pub fn new(
        experiment: impl Into<String>,
        network: impl Into<String>,
        model: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            experiment: experiment.into(),
            network: network.into(),
            model: model.into(),
            tag: tag.into(),
            custom: BTreeMap::new(),
        }
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// Flatten into safetensors header metadata
    pub(crate) fn to_header(&self) -> HashMap<String, String> {
        let mut header: HashMap<String, String> = self
            .custom
            .iter()
            .map(|(k, v)| (format!("custom.{k}"), v.clone()))
            .collect();
        header.insert("experiment".to_string(), self.experiment.clone());
        header.insert("network".to_string(), self.network.clone());
        header.insert("model".to_string(), self.model.clone());
        header.insert("tag".to_string(), self.tag.clone());
        header
    }

    pub(crate) fn from_header(header: &HashMap<String, String>) -> Self {
        let field = |key: &str| header.get(key).cloned().unwrap_or_default();
        let custom = header
            .iter()
            .filter_map(|(k, v)| k.strip_prefix("custom.").map(|k| (k.to_string(), v.clone())))
            .collect();
        Self {
            experiment: field("experiment"),
            network: field("network"),
            model: field("model"),
            tag: field("tag"),
            custom,
        }
    }
}

/// Name and shape of one stored tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<usize>,
}

/// Text form: tensor headers plus one flat data vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StateFile {
    pub metadata: NetworkMetadata,
    pub tensors: Vec<TensorInfo>,
    pub data: Vec<f32>,
}

/// Named tensors of one network
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkState {
    pub metadata: NetworkMetadata,
    pub tensors: Vec<(String, ArrayD<f32>)>,
}

impl NetworkState {
    pub fn new(metadata: NetworkMetadata) -> Self {
        Self {
            metadata,
            tensors: Vec::new(),
        }
    }

    pub fn with_tensor(mut self, name: impl Into<String>, tensor: ArrayD<f32>) -> Self {
        self.tensors.push((name.into(), tensor));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Like [`get`](Self::get) but missing tensors are an error
    pub fn require(&self, name: &str) -> Result<&ArrayD<f32>> {
        self.get(name).ok_or_else(|| {
            Error::Serialization(format!(
                "checkpoint for network {} has no tensor {name}",
                self.metadata.network
            ))
        })
    }

    pub(crate) fn to_file(&self) -> StateFile {
        let mut data = Vec::new();
        let tensors = self
            .tensors
            .iter()
            .map(|(name, tensor)| {
                data.extend(tensor.iter().copied());
                TensorInfo {
                    name: name.clone(),
                    shape: tensor.shape().to_vec(),
                }
            })
            .collect();
        StateFile {
            metadata: self.metadata.clone(),
            tensors,
            data,
        }
    }

    pub(crate) fn from_file(file: StateFile) -> Result<Self> {
        let mut offset = 0;
        let mut tensors = Vec::with_capacity(file.tensors.len());
        for info in file.tensors {
            let size: usize = info.shape.iter().product();
            let values = file.data.get(offset..offset + size).ok_or_else(|| {
                Error::Serialization(format!("tensor {} runs past the stored data", info.name))
            })?;
            offset += size;
            let tensor = ArrayD::from_shape_vec(info.shape, values.to_vec())
                .map_err(|e| Error::Serialization(format!("tensor {}: {e}", info.name)))?;
            tensors.push((info.name, tensor));
        }
        if offset != file.data.len() {
            return Err(Error::Serialization(format!(
                "{} trailing values after the last tensor",
                file.data.len() - offset
            )));
        }
        Ok(Self {
            metadata: file.metadata,
            tensors,
        })
    }
}

/// `<experiment_dir>/<tag>_net_<network>.<ext>`
pub fn checkpoint_path(
    experiment_dir: &Path,
    tag: &str,
    network: &str,
    format: CheckpointFormat,
) -> PathBuf {
    experiment_dir.join(format!("{tag}_net_{network}.{}", format.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_checkpoint_path_layout() {
        let path = checkpoint_path(
            Path::new("ckpt/exp"),
            "best",
            "G",
            CheckpointFormat::SafeTensors,
        );
        assert_eq!(path, PathBuf::from("ckpt/exp/best_net_G.safetensors"));
    }

    #[test]
    fn test_state_file_keeps_shapes() {
        let state = NetworkState::new(NetworkMetadata::new("exp", "G", "color_gain", "latest"))
            .with_tensor("gain", ArrayD::from_elem(IxDyn(&[3]), 1.5))
            .with_tensor("bias", ArrayD::zeros(IxDyn(&[3, 1])));

        let restored = NetworkState::from_file(state.to_file()).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.require("bias").unwrap().shape(), &[3, 1]);
        assert!(restored.require("weight").is_err());
    }

    #[test]
    fn test_truncated_data_rejected() {
        let mut file = NetworkState::new(NetworkMetadata::new("exp", "G", "m", "1"))
            .with_tensor("gain", ArrayD::zeros(IxDyn(&[4])))
            .to_file();
        file.data.pop();
        assert!(NetworkState::from_file(file).is_err());
    }

    #[test]
    fn test_header_round_trip_keeps_custom() {
        let meta = NetworkMetadata::new("exp", "G", "color_gain", "best").with_custom("epoch", "7");
        let header = meta.to_header();
        assert_eq!(header.get("custom.epoch").map(String::as_str), Some("7"));
        assert_eq!(NetworkMetadata::from_header(&header), meta);
    }
}
