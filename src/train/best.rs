//! Lowest joint (MSE, fMSE) seen so far

/// Starting value of both best scores
pub const SENTINEL: f64 = 10000.0;

/// Tracks the best evaluation scores of a run.
///
/// A new pair only counts as better when it beats the current best on both
/// axes; a pair that improves one metric and regresses the other is ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestTracker {
    best_mse: f64,
    best_fmse: f64,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::starting_at(SENTINEL, SENTINEL)
    }

    pub fn starting_at(best_mse: f64, best_fmse: f64) -> Self {
        Self { best_mse, best_fmse }
    }

    /// Record `(mse, fmse)` if it is strictly better on both metrics
    pub fn consider(&mut self, mse: f64, fmse: f64) -> bool {
        if mse < self.best_mse && fmse < self.best_fmse {
            self.best_mse = mse;
            self.best_fmse = fmse;
            true
        } else {
            false
        }
    }

    pub fn best_mse(&self) -> f64 {
        self.best_mse
    }

    pub fn best_fmse(&self) -> f64 {
        self.best_fmse
    }
}

impl Default for BestTracker {
    fn default() -> Self {
        Self::new()
    }
}
