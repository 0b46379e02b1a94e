//! Inference passes over a held-out split

use super::metrics::{evaluation, EvaluationSummary, SampleScore, PIXEL_SCALE};
use super::report::{detail_report_path, write_detail_report};
use crate::config::HarmonizeSpec;
use crate::data::{DataLoader, DatasetRegistry, DatasetSplit};
use crate::distributed::{LocalGroup, ProcessGroup};
use crate::error::{Error, Result};
use crate::model::{HarmonizationModel, ModelRegistry};
use crate::monitor::{save_images, HtmlPage, SummaryWriter};
use ndarray::Axis;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Where and how per-sample visuals are written during a pass
pub struct Gallery<'a> {
    pub page: &'a mut HtmlPage,
    pub aspect_ratio: f32,
    pub width: usize,
}

/// Run `model` over every batch of `loader` and score each image.
///
/// Sample names are the composite file names. With a gallery, every sample's
/// visuals are saved into it as well.
pub fn evaluate_split(
    model: &mut dyn HarmonizationModel,
    loader: &mut DataLoader,
    dataset: &str,
    mut gallery: Option<Gallery<'_>>,
    log_progress: bool,
) -> Result<EvaluationSummary> {
    let mut records = Vec::with_capacity(loader.len());

    for (i, batch) in loader.batches().enumerate() {
        let batch = batch?;
        model.set_input(&batch)?;
        model.test()?;
        let visuals = model.get_current_visuals()?;
        let paths = model.get_image_paths();
        if log_progress && i % 5 == 0 {
            info!("processing ({i:04})-th image... {paths:?}");
        }

        for (j, path) in paths.iter().enumerate() {
            let one = visuals.sample(j)?;
            if let Some(gallery) = gallery.as_mut() {
                save_images(gallery.page, &one, path, gallery.aspect_ratio, gallery.width)?;
            }
            records.push(score_sample(&one, path)?);
        }
    }

    EvaluationSummary::from_records(dataset, records)
}

fn score_sample(one: &crate::model::Visuals, path: &Path) -> Result<SampleScore> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::DataLoad(format!("image path has no name: {}", path.display())))?;

    let harmonized = one
        .require("harmonized")?
        .index_axis(Axis(0), 0)
        .mapv(|v| v * PIXEL_SCALE);
    let real = one
        .require("real")?
        .index_axis(Axis(0), 0)
        .mapv(|v| v * PIXEL_SCALE);
    let mask = one.require("mask")?.index_axis(Axis(0), 0);

    evaluation(name, &harmonized.view(), &real.view(), &mask)
}

/// Standalone test run: gallery, detail report and `eval/metrics` text.
///
/// The gallery goes to `<results_dir>/<name>/<phase>_<load_epoch>`, the report
/// to `<results_dir>/<name>/evaluation_detail_<test_epoch>.txt`. Only the
/// master writes either.
pub fn run_test(
    spec: &HarmonizeSpec,
    models: &ModelRegistry,
    datasets: &DatasetRegistry,
    group: Arc<dyn ProcessGroup>,
    writer: &mut dyn SummaryWriter,
) -> Result<EvaluationSummary> {
    let split: DatasetSplit = spec.data.dataset_name.parse()?;
    let is_master = group.is_master();

    let mut loader = DataLoader::from_spec(spec, datasets, group.rank(), group.world_size())?;
    let mut model = models.create(spec, group)?;
    model.setup(spec)?;
    if spec.evaluation.eval_mode {
        model.eval();
    }

    let mut page = if is_master {
        let web_dir = spec
            .results_dir()
            .join(format!("{}_{}", spec.phase.as_str(), spec.training.load_epoch));
        Some(HtmlPage::new(
            web_dir,
            format!(
                "Experiment = {}, Phase = {}, Epoch = {}",
                spec.name,
                spec.phase.as_str(),
                spec.training.load_epoch
            ),
        )?)
    } else {
        None
    };

    let gallery = page.as_mut().map(|page| Gallery {
        page,
        aspect_ratio: spec.evaluation.aspect_ratio,
        width: spec.evaluation.display_winsize,
    });
    let summary = evaluate_split(
        model.as_mut(),
        &mut loader,
        &spec.data.dataset_name,
        gallery,
        is_master,
    )?;

    if let Some(page) = page {
        page.save()?;
        let mean_line = summary.mean_line();
        info!("{mean_line}");
        writer.add_text("eval/metrics", &mean_line, split.ordinal())?;
        writer.flush()?;

        let path = detail_report_path(&spec.results_dir(), &spec.evaluation.test_epoch);
        write_detail_report(&path, &summary)?;
        info!("Wrote evaluation detail to {}", path.display());
    }
    Ok(summary)
}

/// Scores the checkpoint just written at the end of an epoch
pub trait EpochEvaluator: Send {
    /// `(mse_mu, fmse_mu)` for the model saved at `epoch`
    fn evaluate(&mut self, epoch: usize) -> Result<(f64, f64)>;

    /// Split the scores are computed on
    fn dataset(&self) -> &str;
}

/// Evaluates a freshly built model on its own configuration.
///
/// Nothing is shared with the training run except what
/// [`HarmonizeSpec::periodic_eval_options`] carries over; the model reloads
/// the `latest` checkpoint from disk on every call.
pub struct IsolatedEvaluator {
    config: HarmonizeSpec,
    models: ModelRegistry,
    datasets: DatasetRegistry,
}

impl IsolatedEvaluator {
    pub fn new(train_spec: &HarmonizeSpec, models: ModelRegistry, datasets: DatasetRegistry) -> Self {
        Self {
            config: train_spec.periodic_eval_options(),
            models,
            datasets,
        }
    }

    pub fn config(&self) -> &HarmonizeSpec {
        &self.config
    }
}

impl EpochEvaluator for IsolatedEvaluator {
    fn evaluate(&mut self, epoch: usize) -> Result<(f64, f64)> {
        let cfg = &self.config;
        let mut loader = DataLoader::from_spec(cfg, &self.datasets, 0, 1)?;
        let mut model = self.models.create(cfg, Arc::new(LocalGroup::new()))?;
        model.setup(cfg)?;
        if cfg.evaluation.eval_mode {
            model.eval();
        }

        let summary = evaluate_split(
            model.as_mut(),
            &mut loader,
            &cfg.data.dataset_name,
            None,
            false,
        )?;
        info!("Evaluation after epoch {epoch}: {}", summary.mean_line());
        Ok((summary.mse_mu, summary.fmse_mu))
    }

    fn dataset(&self) -> &str {
        &self.config.data.dataset_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Phase;
    use crate::model::CheckpointTag;
    use crate::monitor::{MemoryWriter, SummaryEvent};
    use std::fs;
    use tempfile::tempdir;

    fn synthetic_spec(dir: &Path) -> HarmonizeSpec {
        let mut spec = HarmonizeSpec::new("runner");
        spec.data.dataset_mode = "synthetic".to_string();
        spec.data.dataset_name = "HCOCO".to_string();
        spec.data.crop_size = 8;
        spec.data.max_dataset_size = Some(6);
        spec.output.checkpoints_dir = dir.join("checkpoints");
        spec.output.results_dir = dir.join("results");
        spec.output.checkpoint_format = "json".to_string();
        spec
    }

    /// Train one step and save it as `latest`
    fn save_latest(spec: &HarmonizeSpec) {
        let datasets = DatasetRegistry::builtin();
        let mut loader = DataLoader::from_spec(spec, &datasets, 0, 1).unwrap();
        let mut model = ModelRegistry::builtin()
            .create(spec, Arc::new(LocalGroup::new()))
            .unwrap();
        model.setup(spec).unwrap();
        let batch = loader.batches().next().unwrap().unwrap();
        model.set_input(&batch).unwrap();
        model.optimize_parameters().unwrap();
        model.save_networks(&CheckpointTag::Latest).unwrap();
    }

    #[test]
    fn test_run_test_writes_gallery_report_and_text() {
        let dir = tempdir().unwrap();
        let mut spec = synthetic_spec(dir.path());
        save_latest(&spec);

        spec.phase = Phase::Test;
        spec.training.batch_size = 4;
        let writer = MemoryWriter::new();
        let summary = run_test(
            &spec,
            &ModelRegistry::builtin(),
            &DatasetRegistry::builtin(),
            Arc::new(LocalGroup::new()),
            &mut writer.clone(),
        )
        .unwrap();

        assert_eq!(summary.count(), 6);
        assert_eq!(summary.dataset, "HCOCO");

        let web_dir = spec.results_dir().join("test_latest");
        assert!(web_dir.join("index.html").exists());
        let name = summary.records[0].filename.trim_end_matches(".jpg").to_string();
        assert!(web_dir.join("images").join(format!("{name}_harmonized.png")).exists());

        let report = fs::read_to_string(spec.results_dir().join("evaluation_detail_latest.txt")).unwrap();
        assert!(report.contains(&summary.mean_line()));

        let events = writer.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tag(), "eval/metrics");
        assert_eq!(events[0].step(), 2);
        assert!(matches!(&events[0], SummaryEvent::Text { text, .. } if *text == summary.mean_line()));
    }

    #[test]
    fn test_num_test_limits_batches() {
        let dir = tempdir().unwrap();
        let mut spec = synthetic_spec(dir.path());
        save_latest(&spec);

        spec.phase = Phase::Test;
        spec.training.batch_size = 2;
        spec.evaluation.num_test = Some(1);
        let summary = run_test(
            &spec,
            &ModelRegistry::builtin(),
            &DatasetRegistry::builtin(),
            Arc::new(LocalGroup::new()),
            &mut MemoryWriter::new(),
        )
        .unwrap();
        assert_eq!(summary.count(), 2);
    }

    #[test]
    fn test_missing_checkpoint_fails() {
        let dir = tempdir().unwrap();
        let mut spec = synthetic_spec(dir.path());
        spec.phase = Phase::Test;
        let result = run_test(
            &spec,
            &ModelRegistry::builtin(),
            &DatasetRegistry::builtin(),
            Arc::new(LocalGroup::new()),
            &mut MemoryWriter::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_isolated_evaluator_reloads_latest() {
        let dir = tempdir().unwrap();
        let mut spec = synthetic_spec(dir.path());
        spec.training.batch_size = 32;
        spec.data.dataset_name = "HFlickr".to_string();
        save_latest(&spec);

        let mut evaluator =
            IsolatedEvaluator::new(&spec, ModelRegistry::builtin(), DatasetRegistry::builtin());
        assert_eq!(evaluator.config().training.batch_size, 8);
        assert_eq!(evaluator.config().data.dataset_name, "HCOCO");

        let (mse, fmse) = evaluator.evaluate(1).unwrap();
        assert!(mse >= 0.0);
        assert!(fmse >= mse);
        assert!(!spec.results_dir().exists());
    }
}
