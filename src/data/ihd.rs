//! iHarmony4 dataset layout

use super::image_ops::{load_mask, load_rgb, mask_to_tensor, rgb_to_tensor};
use super::{DatasetSplit, Sample, SampleSource};
use crate::config::HarmonizeSpec;
use crate::error::{Error, Result};
use image::imageops::{self, FilterType};
use rand::rngs::StdRng;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const COMPOSITE_DIR: &str = "composite_images";

/// The three files that make up one iHarmony4 sample.
///
/// A composite `<dir>/composite_images/<stem>_<k>_<j>.jpg` has its mask at
/// `<dir>/masks/<stem>_<k>.png` and its ground truth at
/// `<dir>/real_images/<stem>.jpg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IhdPaths {
    pub composite: PathBuf,
    pub mask: PathBuf,
    pub real: PathBuf,
}

impl IhdPaths {
    pub fn from_composite(composite: &Path) -> Result<Self> {
        let malformed = || Error::DataLoad(format!("malformed composite path: {}", composite.display()));

        let parent = composite.parent().ok_or_else(malformed)?;
        if parent.file_name().and_then(|n| n.to_str()) != Some(COMPOSITE_DIR) {
            return Err(malformed());
        }
        let subset_dir = parent.parent().ok_or_else(malformed)?;
        let stem = composite
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(malformed)?;

        let mut parts = stem.rsplitn(3, '_');
        let (Some(_composite_id), Some(mask_id), Some(image_stem)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        Ok(Self {
            composite: composite.to_path_buf(),
            mask: subset_dir
                .join("masks")
                .join(format!("{image_stem}_{mask_id}.png")),
            real: subset_dir.join("real_images").join(format!("{image_stem}.jpg")),
        })
    }
}

/// Composite paths listed for `split` under `root`.
///
/// Each subset keeps `<subset>/<subset>_train.txt` and `<subset>_test.txt`.
/// Entries may be bare file names or already include `composite_images/`.
pub fn list_split(root: &Path, split: DatasetSplit, train: bool) -> Result<Vec<PathBuf>> {
    let suffix = if train { "train" } else { "test" };
    let mut paths = Vec::new();

    for subset in split.subsets() {
        let subset_dir = root.join(subset.as_str());
        let index = subset_dir.join(format!("{}_{suffix}.txt", subset.as_str()));
        let listing = fs::read_to_string(&index)
            .map_err(|e| Error::DataLoad(format!("{}: {e}", index.display())))?;

        for line in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let entry = Path::new(line);
            let path = if entry.starts_with(COMPOSITE_DIR) {
                subset_dir.join(entry)
            } else {
                subset_dir.join(COMPOSITE_DIR).join(entry)
            };
            paths.push(path);
        }
    }
    Ok(paths)
}

/// iHarmony4 samples resized to a square crop
#[derive(Debug, Clone)]
pub struct IhdSource {
    samples: Vec<IhdPaths>,
    crop_size: u32,
    flip: bool,
}

impl IhdSource {
    pub fn new(samples: Vec<IhdPaths>, crop_size: u32, flip: bool) -> Self {
        Self {
            samples,
            crop_size,
            flip,
        }
    }

    pub fn from_spec(spec: &HarmonizeSpec) -> Result<Self> {
        let split: DatasetSplit = spec.data.dataset_name.parse()?;
        let mut composites = list_split(&spec.data.dataset_root, split, spec.is_train())?;
        if let Some(max) = spec.data.max_dataset_size {
            composites.truncate(max);
        }

        let samples = composites
            .iter()
            .map(|p| IhdPaths::from_composite(p))
            .collect::<Result<Vec<_>>>()?;
        info!(
            "Loaded {} {} samples for split {split} from {}",
            samples.len(),
            spec.phase.as_str(),
            spec.data.dataset_root.display()
        );

        let crop_size = u32::try_from(spec.data.crop_size)
            .map_err(|_| Error::ConfigError(format!("crop_size {} is too large", spec.data.crop_size)))?;
        Ok(Self::new(
            samples,
            crop_size,
            spec.is_train() && !spec.data.no_flip,
        ))
    }
}

impl SampleSource for IhdSource {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn load(&self, index: usize, rng: &mut StdRng) -> Result<Sample> {
        let paths = self
            .samples
            .get(index)
            .ok_or_else(|| Error::DataLoad(format!("sample index {index} out of range")))?;

        let mut comp = load_rgb(&paths.composite)?;
        let mut real = load_rgb(&paths.real)?;
        let mut mask = load_mask(&paths.mask)?;

        if self.flip && rng.random_bool(0.5) {
            comp = imageops::flip_horizontal(&comp);
            real = imageops::flip_horizontal(&real);
            mask = imageops::flip_horizontal(&mask);
        }

        let size = self.crop_size;
        if comp.dimensions() != (size, size) {
            comp = imageops::resize(&comp, size, size, FilterType::Triangle);
        }
        if real.dimensions() != (size, size) {
            real = imageops::resize(&real, size, size, FilterType::Triangle);
        }
        if mask.dimensions() != (size, size) {
            mask = imageops::resize(&mask, size, size, FilterType::Nearest);
        }

        Ok(Sample {
            comp: rgb_to_tensor(&comp),
            real: rgb_to_tensor(&real),
            mask: mask_to_tensor(&mask),
            path: paths.composite.clone(),
        })
    }

    fn name(&self) -> &str {
        "ihd"
    }
}
