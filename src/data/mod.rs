//! Harmonization datasets and batching
//!
//! A [`SampleSource`] knows how to load one `(composite, mask, real)` triple;
//! a [`DataLoader`] turns a source into sharded, optionally shuffled batches.

mod ihd;
pub mod image_ops;
mod sampler;
mod split;
mod synthetic;

pub use ihd::{list_split, IhdPaths, IhdSource};
pub use sampler::EpochSampler;
pub use split::DatasetSplit;
pub use synthetic::SyntheticSource;

use crate::config::HarmonizeSpec;
use crate::distributed::augment_seed;
use crate::error::{Error, Result};
use ndarray::{concatenate, stack, Array3, Array4, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One training example, CHW tensors in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub comp: Array3<f32>,
    pub real: Array3<f32>,
    /// Single channel, 1 = foreground
    pub mask: Array3<f32>,
    /// Path of the composite image
    pub path: PathBuf,
}

/// A stack of samples, NCHW
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Composite and mask concatenated along channels
    pub inputs: Array4<f32>,
    pub comp: Array4<f32>,
    pub real: Array4<f32>,
    pub mask: Array4<f32>,
    pub paths: Vec<PathBuf>,
}

impl Batch {
    /// Stack samples; all must share one shape
    pub fn from_samples(samples: Vec<Sample>) -> Result<Batch> {
        let Some(first) = samples.first() else {
            return Err(Error::DataLoad("cannot collate an empty batch".to_string()));
        };
        let comp_shape = first.comp.shape().to_vec();
        let mask_shape = first.mask.shape().to_vec();

        for sample in &samples {
            for (expected, got) in [
                (&comp_shape, sample.comp.shape()),
                (&comp_shape, sample.real.shape()),
                (&mask_shape, sample.mask.shape()),
            ] {
                if expected.as_slice() != got {
                    return Err(Error::ShapeMismatch {
                        expected: expected.clone(),
                        got: got.to_vec(),
                    });
                }
            }
        }
        if mask_shape[1..] != comp_shape[1..] {
            return Err(Error::ShapeMismatch {
                expected: comp_shape,
                got: mask_shape,
            });
        }

        let comp = stack_field(&samples, |s| &s.comp)?;
        let real = stack_field(&samples, |s| &s.real)?;
        let mask = stack_field(&samples, |s| &s.mask)?;
        let inputs = concatenate(Axis(1), &[comp.view(), mask.view()])
            .map_err(|e| Error::DataLoad(format!("collate failed: {e}")))?;

        Ok(Batch {
            inputs,
            comp,
            real,
            mask,
            paths: samples.into_iter().map(|s| s.path).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn stack_field(samples: &[Sample], field: impl Fn(&Sample) -> &Array3<f32>) -> Result<Array4<f32>> {
    let views: Vec<_> = samples.iter().map(|s| field(s).view()).collect();
    stack(Axis(0), &views).map_err(|e| Error::DataLoad(format!("collate failed: {e}")))
}

/// Random access to dataset samples
pub trait SampleSource: Send {
    /// Total number of samples
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load sample `index`; `rng` drives augmentation
    fn load(&self, index: usize, rng: &mut StdRng) -> Result<Sample>;

    /// Source name for logging
    fn name(&self) -> &str;
}

/// Pre-loaded samples held in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    samples: Vec<Sample>,
}

impl MemorySource {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }
}

impl SampleSource for MemorySource {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn load(&self, index: usize, _rng: &mut StdRng) -> Result<Sample> {
        self.samples
            .get(index)
            .cloned()
            .ok_or_else(|| Error::DataLoad(format!("sample index {index} out of range")))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Batches a sample source for one rank
pub struct DataLoader {
    source: Box<dyn SampleSource>,
    sampler: EpochSampler,
    batch_size: usize,
    max_batches: Option<usize>,
    rng: StdRng,
    order: Vec<usize>,
}

impl DataLoader {
    pub fn new(
        source: Box<dyn SampleSource>,
        sampler: EpochSampler,
        batch_size: usize,
        seed: u64,
    ) -> Self {
        let order = sampler.indices(0);
        Self {
            source,
            sampler,
            batch_size: batch_size.max(1),
            max_batches: None,
            rng: StdRng::seed_from_u64(seed),
            order,
        }
    }

    /// Build the loader a spec describes for the given rank
    pub fn from_spec(
        spec: &HarmonizeSpec,
        registry: &DatasetRegistry,
        rank: usize,
        world_size: usize,
    ) -> Result<Self> {
        let source = registry.create(spec)?;
        let sampler = EpochSampler::new(source.len(), !spec.data.serial_batches, spec.seed)
            .with_shard(rank, world_size);
        let mut loader = Self::new(
            source,
            sampler,
            spec.device_batch_size(),
            augment_seed(spec.seed, rank),
        );
        if !spec.is_train() {
            loader.max_batches = spec.evaluation.num_test;
        }
        Ok(loader)
    }

    /// Stop every pass after `max` batches
    pub fn with_max_batches(mut self, max: usize) -> Self {
        self.max_batches = Some(max);
        self
    }

    /// Number of samples in the whole dataset
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Batches this rank yields per pass
    pub fn num_batches(&self) -> usize {
        let n = self.order.len().div_ceil(self.batch_size);
        self.max_batches.map_or(n, |max| n.min(max))
    }

    /// Reset the order for `epoch`
    pub fn shuffle(&mut self, epoch: usize) {
        self.order = self.sampler.indices(epoch);
    }

    /// Iterate one pass; the final batch may be short
    pub fn batches(&mut self) -> Batches<'_> {
        Batches {
            loader: self,
            next: 0,
        }
    }
}

/// One pass over a [`DataLoader`]
pub struct Batches<'a> {
    loader: &'a mut DataLoader,
    next: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.loader.num_batches() {
            return None;
        }
        let start = self.next * self.loader.batch_size;
        let end = (start + self.loader.batch_size).min(self.loader.order.len());
        self.next += 1;

        let loader = &mut *self.loader;
        let samples = loader.order[start..end]
            .iter()
            .map(|&index| loader.source.load(index, &mut loader.rng))
            .collect::<Result<Vec<_>>>();
        Some(samples.and_then(Batch::from_samples))
    }
}

/// Constructor for a dataset mode
pub type DatasetFactory = fn(&HarmonizeSpec) -> Result<Box<dyn SampleSource>>;

/// Name -> factory table for dataset modes
#[derive(Clone)]
pub struct DatasetRegistry {
    factories: BTreeMap<String, DatasetFactory>,
}

impl DatasetRegistry {
    /// Registry with no entries
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// `ihd` and `synthetic`
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("ihd", ihd_source);
        registry.register("synthetic", synthetic_source);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: DatasetFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the source named by `spec.data.dataset_mode`
    pub fn create(&self, spec: &HarmonizeSpec) -> Result<Box<dyn SampleSource>> {
        let mode = &spec.data.dataset_mode;
        let factory = self
            .factories
            .get(mode)
            .ok_or_else(|| Error::UnknownComponent {
                kind: "dataset mode",
                name: mode.clone(),
            })?;
        factory(spec)
    }
}

fn ihd_source(spec: &HarmonizeSpec) -> Result<Box<dyn SampleSource>> {
    Ok(Box::new(IhdSource::from_spec(spec)?))
}

fn synthetic_source(spec: &HarmonizeSpec) -> Result<Box<dyn SampleSource>> {
    Ok(Box::new(SyntheticSource::from_spec(spec)))
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tag: f32, size: usize) -> Sample {
        let mut mask = Array3::zeros((1, size, size));
        mask[[0, 0, 0]] = 1.0;
        Sample {
            comp: Array3::from_elem((3, size, size), tag),
            real: Array3::from_elem((3, size, size), tag + 0.1),
            mask,
            path: PathBuf::from(format!("composite_images/s{tag}_1_1.jpg")),
        }
    }

    fn loader(n: usize, batch_size: usize) -> DataLoader {
        let samples = (0..n).map(|i| sample(i as f32, 2)).collect();
        DataLoader::new(
            Box::new(MemorySource::new(samples)),
            EpochSampler::new(n, false, 0),
            batch_size,
            0,
        )
    }

    #[test]
    fn test_collate_shapes() {
        let batch = Batch::from_samples(vec![sample(0.0, 4), sample(1.0, 4)]).unwrap();
        assert_eq!(batch.comp.shape(), &[2, 3, 4, 4]);
        assert_eq!(batch.mask.shape(), &[2, 1, 4, 4]);
        assert_eq!(batch.inputs.shape(), &[2, 4, 4, 4]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.inputs[[1, 0, 0, 0]], 1.0);
        assert_eq!(batch.inputs[[1, 3, 0, 0]], 1.0);
    }

    #[test]
    fn test_collate_rejects_mixed_sizes() {
        let result = Batch::from_samples(vec![sample(0.0, 4), sample(1.0, 2)]);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_collate_rejects_empty() {
        assert!(Batch::from_samples(vec![]).is_err());
    }

    #[test]
    fn test_last_batch_is_short() {
        let mut loader = loader(5, 2);
        assert_eq!(loader.num_batches(), 3);
        let sizes: Vec<usize> = loader.batches().map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_max_batches_caps_pass() {
        let mut loader = loader(10, 2).with_max_batches(2);
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.batches().count(), 2);
    }

    #[test]
    fn test_batches_can_be_repeated() {
        let mut loader = loader(4, 2);
        loader.shuffle(1);
        let first: Vec<_> = loader.batches().map(|b| b.unwrap().paths).collect();
        loader.shuffle(2);
        let second: Vec<_> = loader.batches().map(|b| b.unwrap().paths).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_registry_unknown_mode() {
        let mut spec = HarmonizeSpec::new("exp");
        spec.data.dataset_mode = "coco".to_string();
        let result = DatasetRegistry::builtin().create(&spec);
        assert!(matches!(
            result,
            Err(Error::UnknownComponent { kind: "dataset mode", .. })
        ));
    }

    #[test]
    fn test_from_spec_shards_synthetic_source() {
        let mut spec = HarmonizeSpec::new("exp");
        spec.data.dataset_mode = "synthetic".to_string();
        spec.data.max_dataset_size = Some(10);
        spec.data.crop_size = 8;
        spec.num_devices = 2;
        spec.training.batch_size = 4;

        let registry = DatasetRegistry::builtin();
        let loader = DataLoader::from_spec(&spec, &registry, 1, 2).unwrap();
        assert_eq!(loader.len(), 10);
        assert_eq!(loader.batch_size(), 2);
        assert_eq!(loader.num_batches(), 3);
        assert_eq!(loader.name(), "synthetic");
    }
}
