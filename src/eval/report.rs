//! Evaluation detail report

use super::EvaluationSummary;
use crate::error::Result;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};

/// `evaluation_detail_<tag>.txt`
pub fn detail_report_path(results_dir: &Path, tag: &str) -> PathBuf {
    results_dir.join(format!("evaluation_detail_{tag}.txt"))
}

/// Image count, the mean line, then one line per image, worst first
pub fn render_detail_report(summary: &EvaluationSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", summary.count());
    let _ = writeln!(out, "{}", summary.mean_line());
    for record in &summary.records {
        let _ = writeln!(out, "{}", record.line);
    }
    out
}

pub fn write_detail_report(path: &Path, summary: &EvaluationSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_detail_report(summary))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::SampleScore;
    use tempfile::tempdir;

    fn score(name: &str, fmse: f64) -> SampleScore {
        SampleScore {
            filename: name.to_string(),
            mse: 1.0,
            fmse,
            line: format!("{name} MSE 1.00 | fMSE {fmse:.2}"),
        }
    }

    #[test]
    fn test_report_layout() {
        let summary = EvaluationSummary::from_records(
            "HCOCO",
            vec![score("a", 3.0), score("b", 9.0), score("c", 1.0)],
        )
        .unwrap();
        let text = render_detail_report(&summary);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "3",
                "HCOCO MSE 1.00 | fMSE 4.33",
                "b MSE 1.00 | fMSE 9.00",
                "a MSE 1.00 | fMSE 3.00",
                "c MSE 1.00 | fMSE 1.00",
            ]
        );
    }

    #[test]
    fn test_write_creates_results_dir() {
        let dir = tempdir().unwrap();
        let path = detail_report_path(&dir.path().join("exp"), "latest");
        assert!(path.ends_with("exp/evaluation_detail_latest.txt"));

        let summary = EvaluationSummary::from_records("ihd", vec![score("a", 2.0)]).unwrap();
        write_detail_report(&path, &summary).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("1\nihd MSE"));
    }
}
