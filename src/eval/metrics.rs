//! Per-image harmonization scores
//!
//! - MSE: mean squared error over every pixel and channel
//! - fMSE: the same squared error averaged over foreground pixels only

use crate::error::{Error, Result};
use ndarray::ArrayView3;
use std::cmp::Ordering;

/// Multiplier that takes `[0, 1]` tensors to the `[0, 255]` pixel range
pub const PIXEL_SCALE: f32 = 255.0;

/// Score of one harmonized image
#[derive(Debug, Clone, PartialEq)]
pub struct SampleScore {
    pub filename: String,
    pub mse: f64,
    pub fmse: f64,
    /// `"<filename> MSE <mse> | fMSE <fmse>"`, two decimals
    pub line: String,
}

/// Score `harmonized` against `real`, both CHW in pixel units.
///
/// `mask` is `1xHxW` with foreground at 1. `fmse = mse * H * W / fg_area`, so
/// an image without foreground pixels cannot be scored.
///
/// # Example
///
/// ```
/// use armonizar::eval::evaluation;
/// use ndarray::Array3;
///
/// let real = Array3::<f32>::zeros((3, 2, 2));
/// let mut harmonized = real.clone();
/// harmonized[[0, 0, 0]] = 6.0;
/// let mut mask = Array3::<f32>::zeros((1, 2, 2));
/// mask[[0, 0, 0]] = 1.0;
///
/// let score = evaluation("a_1_1.jpg", &harmonized.view(), &real.view(), &mask.view()).unwrap();
/// assert_eq!(score.mse, 3.0);
/// assert_eq!(score.fmse, 12.0);
/// assert_eq!(score.line, "a_1_1.jpg MSE 3.00 | fMSE 12.00");
/// ```
pub fn evaluation(
    name: &str,
    harmonized: &ArrayView3<f32>,
    real: &ArrayView3<f32>,
    mask: &ArrayView3<f32>,
) -> Result<SampleScore> {
    let (channels, h, w) = harmonized.dim();
    if real.dim() != (channels, h, w) {
        let (rc, rh, rw) = real.dim();
        return Err(Error::ShapeMismatch {
            expected: vec![channels, h, w],
            got: vec![rc, rh, rw],
        });
    }
    if mask.dim() != (1, h, w) {
        let (mc, mh, mw) = mask.dim();
        return Err(Error::ShapeMismatch {
            expected: vec![1, h, w],
            got: vec![mc, mh, mw],
        });
    }

    let fg_area = mask.iter().filter(|&&m| m > 0.5).count();
    if fg_area == 0 {
        return Err(Error::DataLoad(format!("{name}: mask has no foreground pixels")));
    }

    let sum_sq: f64 = harmonized
        .iter()
        .zip(real.iter())
        .map(|(&a, &b)| {
            let d = f64::from(a) - f64::from(b);
            d * d
        })
        .sum();
    let mse = sum_sq / (channels * h * w) as f64;
    let fmse = mse * (h * w) as f64 / fg_area as f64;

    Ok(SampleScore {
        filename: name.to_string(),
        mse,
        fmse,
        line: format!("{name} MSE {mse:.2} | fMSE {fmse:.2}"),
    })
}

/// Aggregate over one evaluation pass
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSummary {
    pub dataset: String,
    pub mse_mu: f64,
    pub fmse_mu: f64,
    /// Per-image records, worst fMSE first
    pub records: Vec<SampleScore>,
}

impl EvaluationSummary {
    /// Means over `records`; an empty pass is an error
    pub fn from_records(dataset: impl Into<String>, mut records: Vec<SampleScore>) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::EmptyEvaluationSet);
        }
        let n = records.len() as f64;
        let mse_mu = records.iter().map(|r| r.mse).sum::<f64>() / n;
        let fmse_mu = records.iter().map(|r| r.fmse).sum::<f64>() / n;

        records.sort_by(|a, b| b.fmse.partial_cmp(&a.fmse).unwrap_or(Ordering::Equal));
        Ok(Self {
            dataset: dataset.into(),
            mse_mu,
            fmse_mu,
            records,
        })
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// `"<dataset> MSE <mse_mu> | fMSE <fmse_mu>"`
    pub fn mean_line(&self) -> String {
        format!(
            "{} MSE {:.2} | fMSE {:.2}",
            self.dataset, self.mse_mu, self.fmse_mu
        )
    }
}
