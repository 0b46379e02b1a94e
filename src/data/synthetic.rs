//! Generated composites for runs without a dataset on disk

use super::{Sample, SampleSource};
use crate::config::HarmonizeSpec;
use crate::error::{Error, Result};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

const DEFAULT_LEN: usize = 64;
const TEST_SEED_OFFSET: u64 = 0x5eed;

/// Deterministic harmonization pairs.
///
/// Every sample is a smooth background with a rectangular foreground whose
/// colours have been pushed off by a per-sample channel gain and bias. The
/// real image is the same scene without the shift. Sample `i` depends only on
/// the seed and `i`, never on the order samples are requested in.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    len: usize,
    size: usize,
    seed: u64,
}

impl SyntheticSource {
    pub fn new(len: usize, size: usize, seed: u64) -> Self {
        Self {
            len,
            size: size.max(2),
            seed,
        }
    }

    /// Test runs draw from a different seed than training
    pub fn from_spec(spec: &HarmonizeSpec) -> Self {
        let len = spec.data.max_dataset_size.unwrap_or(DEFAULT_LEN);
        let seed = if spec.is_train() {
            spec.seed
        } else {
            spec.seed.wrapping_add(TEST_SEED_OFFSET)
        };
        Self::new(len, spec.data.crop_size, seed)
    }
}

impl SampleSource for SyntheticSource {
    fn len(&self) -> usize {
        self.len
    }

    fn load(&self, index: usize, _rng: &mut StdRng) -> Result<Sample> {
        if index >= self.len {
            return Err(Error::DataLoad(format!("sample index {index} out of range")));
        }

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_mul(1_000_003).wrapping_add(index as u64));
        let n = self.size;

        let base: [f32; 3] = [rng.random_range(0.2..0.8), rng.random_range(0.2..0.8), rng.random_range(0.2..0.8)];
        let gain: [f32; 3] = [rng.random_range(0.6..1.4), rng.random_range(0.6..1.4), rng.random_range(0.6..1.4)];
        let bias: [f32; 3] = [rng.random_range(-0.1..0.1), rng.random_range(-0.1..0.1), rng.random_range(-0.1..0.1)];

        // foreground rectangle covering between a quarter and half of each side
        let h = rng.random_range(n / 4..=n / 2).max(1);
        let w = rng.random_range(n / 4..=n / 2).max(1);
        let top = rng.random_range(0..=n - h);
        let left = rng.random_range(0..=n - w);
        let inside = |y: usize, x: usize| y >= top && y < top + h && x >= left && x < left + w;

        let denom = (2 * (n - 1)) as f32;
        let real = Array3::from_shape_fn((3, n, n), |(c, y, x)| {
            let ramp = (y + x) as f32 / denom - 0.5;
            (base[c] + 0.3 * ramp).clamp(0.0, 1.0)
        });
        let comp = Array3::from_shape_fn((3, n, n), |(c, y, x)| {
            let v = real[[c, y, x]];
            if inside(y, x) {
                (v * gain[c] + bias[c]).clamp(0.0, 1.0)
            } else {
                v
            }
        });
        let mask = Array3::from_shape_fn((1, n, n), |(_, y, x)| if inside(y, x) { 1.0 } else { 0.0 });

        Ok(Sample {
            comp,
            real,
            mask,
            path: PathBuf::from(format!("synthetic/composite_images/s{index:05}_1_1.jpg")),
        })
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0)
    }

    #[test]
    fn test_sample_is_deterministic() {
        let source = SyntheticSource::new(8, 16, 7);
        let a = source.load(3, &mut rng()).unwrap();
        let b = source.load(3, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.comp, source.load(4, &mut rng()).unwrap().comp);
    }

    #[test]
    fn test_background_matches_real() {
        let sample = SyntheticSource::new(4, 16, 1).load(0, &mut rng()).unwrap();
        let fg = sample.mask.iter().filter(|&&v| v == 1.0).count();
        assert!(fg > 0 && fg < 16 * 16);

        for c in 0..3 {
            for y in 0..16 {
                for x in 0..16 {
                    if sample.mask[[0, y, x]] == 0.0 {
                        assert_eq!(sample.comp[[c, y, x]], sample.real[[c, y, x]]);
                    }
                }
            }
        }
    }

    #[test]
    fn test_out_of_range() {
        let source = SyntheticSource::new(2, 8, 0);
        assert!(matches!(source.load(2, &mut rng()), Err(Error::DataLoad(_))));
    }

    #[test]
    fn test_from_spec_sizes_and_phase_seed() {
        let mut spec = HarmonizeSpec::new("exp");
        spec.data.crop_size = 12;
        let train = SyntheticSource::from_spec(&spec);
        assert_eq!(train.len(), 64);

        spec.phase = crate::config::Phase::Test;
        spec.data.max_dataset_size = Some(5);
        let test = SyntheticSource::from_spec(&spec);
        assert_eq!(test.len(), 5);

        let a = train.load(0, &mut rng()).unwrap();
        let b = test.load(0, &mut rng()).unwrap();
        assert_eq!(a.comp.dim(), (3, 12, 12));
        assert_ne!(a.real, b.real);
    }

    #[test]
    fn test_path_follows_composite_naming() {
        let sample = SyntheticSource::new(20, 4, 0).load(12, &mut rng()).unwrap();
        assert_eq!(
            sample.path,
            PathBuf::from("synthetic/composite_images/s00012_1_1.jpg")
        );
    }
}
