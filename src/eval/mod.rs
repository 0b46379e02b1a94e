//! Harmonization scoring, inference passes and reports

mod metrics;
mod report;
mod runner;

pub use metrics::{evaluation, EvaluationSummary, SampleScore, PIXEL_SCALE};
pub use report::{detail_report_path, render_detail_report, write_detail_report};
pub use runner::{evaluate_split, run_test, EpochEvaluator, Gallery, IsolatedEvaluator};
