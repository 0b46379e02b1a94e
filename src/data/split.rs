//! Known iHarmony4 split names

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// The five evaluation splits, in their fixed logging order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetSplit {
    /// Union of the four sub-datasets
    Ihd,
    HAdobe5k,
    HCOCO,
    HFlickr,
    Hday2night,
}

impl DatasetSplit {
    pub const ALL: [DatasetSplit; 5] = [
        DatasetSplit::Ihd,
        DatasetSplit::HAdobe5k,
        DatasetSplit::HCOCO,
        DatasetSplit::HFlickr,
        DatasetSplit::Hday2night,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetSplit::Ihd => "ihd",
            DatasetSplit::HAdobe5k => "HAdobe5k",
            DatasetSplit::HCOCO => "HCOCO",
            DatasetSplit::HFlickr => "HFlickr",
            DatasetSplit::Hday2night => "Hday2night",
        }
    }

    /// Step index used when logging evaluation text for this split
    pub fn ordinal(&self) -> usize {
        Self::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or_default()
    }

    /// Directories that make up this split under the dataset root
    pub fn subsets(&self) -> Vec<DatasetSplit> {
        match self {
            DatasetSplit::Ihd => Self::ALL[1..].to_vec(),
            other => vec![*other],
        }
    }
}

impl fmt::Display for DatasetSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetSplit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|split| split.as_str() == s)
            .ok_or_else(|| Error::UnknownComponent {
                kind: "dataset split",
                name: s.to_string(),
            })
    }
}
