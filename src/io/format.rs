//! Serialization format definitions

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported checkpoint formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointFormat {
    /// JSON (human-readable, larger files)
    Json,

    /// SafeTensors (compact binary)
    #[default]
    SafeTensors,
}

impl CheckpointFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CheckpointFormat::Json => "json",
            CheckpointFormat::SafeTensors => "safetensors",
        }
    }

    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(CheckpointFormat::Json),
            "safetensors" => Some(CheckpointFormat::SafeTensors),
            _ => None,
        }
    }
}

impl FromStr for CheckpointFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_extension(s).ok_or_else(|| Error::UnknownComponent {
            kind: "checkpoint format",
            name: s.to_string(),
        })
    }
}
