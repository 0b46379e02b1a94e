//! Training-time visual and loss reporting
//!
//! Only the master process should hold an enabled [`Visualizer`]; a disabled
//! one accepts every call and touches nothing on disk.

use super::html::{GalleryImage, HtmlPage};
use crate::config::HarmonizeSpec;
use crate::data::image_ops::save_png;
use crate::distributed::LossMap;
use crate::error::{Error, Result};
use crate::model::Visuals;
use chrono::Local;
use ndarray::Axis;
use std::fmt::Write as FmtWrite;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct Visualizer {
    enabled: bool,
    name: String,
    display_id: i32,
    win_size: usize,
    web_dir: PathBuf,
    log_path: PathBuf,
    plot_path: PathBuf,
    saved: bool,
    /// Loss names in column order of the plot file
    plot_legend: Vec<String>,
}

impl Visualizer {
    /// Visualizer writing under `<checkpoints_dir>/<name>`
    pub fn new(spec: &HarmonizeSpec, enabled: bool) -> Result<Self> {
        let experiment_dir = spec.experiment_dir();
        let visualizer = Self {
            enabled,
            name: spec.name.clone(),
            display_id: spec.cadence.display_id,
            win_size: spec.evaluation.display_winsize,
            web_dir: experiment_dir.join("web"),
            log_path: experiment_dir.join("loss_log.txt"),
            plot_path: experiment_dir.join("web").join("loss_plot.csv"),
            saved: false,
            plot_legend: Vec::new(),
        };

        if enabled {
            fs::create_dir_all(visualizer.web_dir.join("images"))?;
            let mut log = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&visualizer.log_path)?;
            writeln!(
                log,
                "================ Training Loss ({}) ================",
                Local::now().format("%a %b %e %H:%M:%S %Y")
            )?;
        }
        Ok(visualizer)
    }

    /// Visualizer that records nothing (non-master ranks)
    pub fn disabled(spec: &HarmonizeSpec) -> Self {
        let experiment_dir = spec.experiment_dir();
        Self {
            enabled: false,
            name: spec.name.clone(),
            display_id: spec.cadence.display_id,
            win_size: spec.evaluation.display_winsize,
            web_dir: experiment_dir.join("web"),
            log_path: experiment_dir.join("loss_log.txt"),
            plot_path: experiment_dir.join("web").join("loss_plot.csv"),
            saved: false,
            plot_legend: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn web_dir(&self) -> &Path {
        &self.web_dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// `web/loss_plot.csv`: fractional epoch, then one column per loss
    pub fn plot_path(&self) -> &Path {
        &self.plot_path
    }

    /// Allow the next display call to write images again
    pub fn reset(&mut self) {
        self.saved = false;
    }

    /// Save the current visuals as `epoch<NNN>_<label>.png` and rebuild the
    /// HTML index covering every epoch so far.
    ///
    /// Images are written at most once between [`reset`](Self::reset) calls
    /// unless `save_result` is set.
    pub fn display_current_results(
        &mut self,
        visuals: &Visuals,
        epoch: usize,
        save_result: bool,
    ) -> Result<()> {
        if !self.enabled || (self.saved && !save_result) {
            return Ok(());
        }
        self.saved = true;

        let image_dir = self.web_dir.join("images");
        for (label, images) in visuals.iter() {
            if images.shape()[0] == 0 {
                return Err(Error::Model(format!("visual '{label}' holds no images")));
            }
            let path = image_dir.join(format!("epoch{epoch:03}_{label}.png"));
            save_png(&images.index_axis(Axis(0), 0), &path)?;
        }

        let mut page = HtmlPage::new(&self.web_dir, format!("Experiment name = {}", self.name))?
            .with_refresh(1);
        for n in (1..=epoch).rev() {
            page.add_header(&format!("epoch [{n}]"));
            let row: Vec<GalleryImage> = visuals
                .iter()
                .map(|(label, _)| GalleryImage {
                    file: format!("epoch{n:03}_{label}.png"),
                    caption: label.to_string(),
                })
                .filter(|img| image_dir.join(&img.file).exists())
                .collect();
            page.add_images(&row, self.win_size);
        }
        page.save()
    }

    /// Log one line of losses and append it to `loss_log.txt`
    pub fn print_current_losses(
        &self,
        epoch: usize,
        iters: usize,
        losses: &LossMap,
        t_comp: f64,
        t_data: f64,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let message = format_losses(epoch, iters, losses, t_comp, t_data);
        info!("{message}");

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(log, "{message}")?;
        Ok(())
    }

    /// Append a loss-curve point at `epoch + counter_ratio` to the plot file.
    ///
    /// Columns are fixed by the first point; a loss missing later leaves its
    /// cell empty.
    pub fn plot_current_losses(
        &mut self,
        epoch: usize,
        counter_ratio: f64,
        losses: &LossMap,
    ) -> Result<()> {
        if !self.enabled || self.display_id <= 0 {
            return Ok(());
        }
        if self.plot_legend.is_empty() {
            self.plot_legend = losses.keys().cloned().collect();
        }

        let new_file = !self.plot_path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.plot_path)?;
        if new_file {
            writeln!(file, "epoch,{}", self.plot_legend.join(","))?;
        }

        let mut row = format!("{:.4}", epoch as f64 + counter_ratio);
        for name in &self.plot_legend {
            match losses.get(name) {
                Some(value) => {
                    let _ = write!(row, ",{value:.6}");
                }
                None => row.push(','),
            }
        }
        writeln!(file, "{row}")?;
        Ok(())
    }
}

/// `(epoch: E, iters: I, time: T, data: D) name: value ...`
pub fn format_losses(
    epoch: usize,
    iters: usize,
    losses: &LossMap,
    t_comp: f64,
    t_data: f64,
) -> String {
    let mut message = format!("(epoch: {epoch}, iters: {iters}, time: {t_comp:.3}, data: {t_data:.3}) ");
    for (name, value) in losses {
        let _ = write!(message, "{name}: {value:.3} ");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use tempfile::tempdir;

    fn spec_in(dir: &Path) -> HarmonizeSpec {
        let mut spec = HarmonizeSpec::new("viz");
        spec.output.checkpoints_dir = dir.to_path_buf();
        spec
    }

    fn visuals() -> Visuals {
        let mut visuals = Visuals::new();
        visuals.push("comp", Array4::from_elem((1, 3, 2, 2), 0.2));
        visuals.push("harmonized", Array4::from_elem((1, 3, 2, 2), 0.4));
        visuals
    }

    fn losses() -> LossMap {
        LossMap::from([("G_L1".to_string(), 0.5), ("G_L2".to_string(), 0.125)])
    }

    #[test]
    fn test_format_losses() {
        let line = format_losses(3, 40, &losses(), 0.01, 0.002);
        assert_eq!(
            line,
            "(epoch: 3, iters: 40, time: 0.010, data: 0.002) G_L1: 0.500 G_L2: 0.125 "
        );
    }

    #[test]
    fn test_loss_log_appends() {
        let dir = tempdir().unwrap();
        let viz = Visualizer::new(&spec_in(dir.path()), true).unwrap();
        viz.print_current_losses(1, 8, &losses(), 0.0, 0.0).unwrap();
        viz.print_current_losses(1, 16, &losses(), 0.0, 0.0).unwrap();

        let log = fs::read_to_string(viz.log_path()).unwrap();
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("================ Training Loss"));
        assert!(lines[2].contains("iters: 16"));
    }

    #[test]
    fn test_display_writes_epoch_gallery() {
        let dir = tempdir().unwrap();
        let mut viz = Visualizer::new(&spec_in(dir.path()), true).unwrap();
        viz.display_current_results(&visuals(), 1, false).unwrap();
        viz.reset();
        viz.display_current_results(&visuals(), 2, true).unwrap();

        let images = viz.web_dir().join("images");
        assert!(images.join("epoch001_comp.png").exists());
        assert!(images.join("epoch002_harmonized.png").exists());
        let html = fs::read_to_string(viz.web_dir().join("index.html")).unwrap();
        let newest = html.find("epoch [2]").unwrap();
        let oldest = html.find("epoch [1]").unwrap();
        assert!(newest < oldest);
    }

    #[test]
    fn test_display_once_until_reset() {
        let dir = tempdir().unwrap();
        let mut viz = Visualizer::new(&spec_in(dir.path()), true).unwrap();
        viz.display_current_results(&visuals(), 1, false).unwrap();
        viz.display_current_results(&visuals(), 2, false).unwrap();
        assert!(!viz.web_dir().join("images/epoch002_comp.png").exists());
    }

    #[test]
    fn test_disabled_touches_nothing() {
        let dir = tempdir().unwrap();
        let spec = spec_in(dir.path());
        let mut viz = Visualizer::disabled(&spec);
        viz.display_current_results(&visuals(), 1, true).unwrap();
        viz.print_current_losses(1, 1, &losses(), 0.0, 0.0).unwrap();
        viz.plot_current_losses(1, 0.5, &losses()).unwrap();
        assert!(!spec.experiment_dir().exists());
    }

    #[test]
    fn test_plot_points_stream_to_csv() {
        let dir = tempdir().unwrap();
        let mut viz = Visualizer::new(&spec_in(dir.path()), true).unwrap();
        viz.plot_current_losses(1, 0.25, &losses()).unwrap();
        viz.plot_current_losses(1, 0.5, &LossMap::from([("G_L1".to_string(), 0.75)]))
            .unwrap();

        let csv = fs::read_to_string(viz.plot_path()).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "epoch,G_L1,G_L2",
                "1.2500,0.500000,0.125000",
                "1.5000,0.750000,",
            ]
        );
    }

    #[test]
    fn test_plot_disabled_without_display_id() {
        let dir = tempdir().unwrap();
        let mut spec = spec_in(dir.path());
        spec.cadence.display_id = 0;
        let mut viz = Visualizer::new(&spec, true).unwrap();
        viz.plot_current_losses(1, 0.25, &losses()).unwrap();
        assert!(!viz.plot_path().exists());
    }
}
