//! Data-parallel epoch loop

use super::best::BestTracker;
use super::cadence::{epoch_tags, iteration_tag, IterationEvents};
use crate::config::HarmonizeSpec;
use crate::data::{DataLoader, DatasetRegistry};
use crate::distributed::{LossMap, ProcessGroup};
use crate::error::{Error, Result};
use crate::eval::{EpochEvaluator, IsolatedEvaluator};
use crate::model::{CheckpointTag, HarmonizationModel, ModelRegistry};
use crate::monitor::{JsonlSummaryWriter, SummaryWriter, Visualizer};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Result of a training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainResult {
    /// Epochs run
    pub epochs: usize,
    /// Samples processed by this rank
    pub total_iters: usize,
    pub best_mse: f64,
    pub best_fmse: f64,
    pub elapsed_secs: f64,
}

/// Drives one rank through the configured epoch range.
///
/// Every rank steps the model and joins the loss reduction. Side effects
/// (logging, HTML, checkpoints, evaluation and summaries) happen on the
/// master only.
pub struct Trainer {
    spec: HarmonizeSpec,
    group: Arc<dyn ProcessGroup>,
    model: Box<dyn HarmonizationModel>,
    loader: DataLoader,
    visualizer: Visualizer,
    writer: Option<Box<dyn SummaryWriter>>,
    evaluator: Option<Box<dyn EpochEvaluator>>,
    best: BestTracker,
    total_iters: usize,
    initialized: bool,
}

impl Trainer {
    /// Trainer without a summary writer or evaluator
    pub fn new(
        spec: HarmonizeSpec,
        model: Box<dyn HarmonizationModel>,
        loader: DataLoader,
        group: Arc<dyn ProcessGroup>,
    ) -> Result<Self> {
        if !spec.is_train() {
            return Err(Error::ConfigError(format!(
                "training needs the train phase, got '{}'",
                spec.phase.as_str()
            )));
        }
        let visualizer = if group.is_master() {
            Visualizer::new(&spec, true)?
        } else {
            Visualizer::disabled(&spec)
        };
        Ok(Self {
            spec,
            group,
            model,
            loader,
            visualizer,
            writer: None,
            evaluator: None,
            best: BestTracker::new(),
            total_iters: 0,
            initialized: false,
        })
    }

    /// Trainer with everything the config names.
    ///
    /// The master also gets a JSONL summary writer under `log_dir` and an
    /// isolated per-epoch evaluator.
    pub fn from_spec(
        spec: &HarmonizeSpec,
        models: &ModelRegistry,
        datasets: &DatasetRegistry,
        group: Arc<dyn ProcessGroup>,
    ) -> Result<Self> {
        let loader = DataLoader::from_spec(spec, datasets, group.rank(), group.world_size())?;
        let model = models.create(spec, Arc::clone(&group))?;
        let mut trainer = Self::new(spec.clone(), model, loader, group)?;

        if trainer.is_master() {
            let writer = JsonlSummaryWriter::create(&spec.output.log_dir, &spec.name)?;
            info!("Writing summaries to {}", writer.path().display());
            trainer.writer = Some(Box::new(writer));
            trainer.evaluator = Some(Box::new(IsolatedEvaluator::new(
                spec,
                models.clone(),
                datasets.clone(),
            )));
        }
        Ok(trainer)
    }

    /// Ignored on workers
    pub fn with_summary_writer(mut self, writer: Box<dyn SummaryWriter>) -> Self {
        if self.is_master() {
            self.writer = Some(writer);
        }
        self
    }

    /// Ignored on workers
    pub fn with_evaluator(mut self, evaluator: Box<dyn EpochEvaluator>) -> Self {
        if self.is_master() {
            self.evaluator = Some(evaluator);
        }
        self
    }

    pub fn is_master(&self) -> bool {
        self.group.is_master()
    }

    pub fn total_iters(&self) -> usize {
        self.total_iters
    }

    pub fn best(&self) -> &BestTracker {
        &self.best
    }

    pub fn visualizer(&self) -> &Visualizer {
        &self.visualizer
    }

    pub fn model(&self) -> &dyn HarmonizationModel {
        self.model.as_ref()
    }

    /// Run epochs `epoch_count..=niter + niter_decay`
    pub fn train(&mut self) -> Result<TrainResult> {
        let start = Instant::now();
        if self.loader.num_batches() == 0 {
            return Err(Error::DataLoad(format!(
                "dataset '{}' yields no training batches",
                self.loader.name()
            )));
        }

        let first = self.spec.training.epoch_count;
        let last = self.spec.training.last_epoch();
        if self.is_master() {
            info!("The number of training images = {}", self.loader.len());
            info!(
                "Training {} on rank 0 of {} (batch {} per device, epochs {first}..={last})",
                self.spec.name,
                self.group.world_size(),
                self.loader.batch_size()
            );
        }

        let mut epochs = 0;
        for epoch in first..=last {
            self.train_epoch(epoch, last)?;
            epochs += 1;
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        if self.is_master() {
            let dataset = self.evaluator.as_ref().map_or("eval", |e| e.dataset());
            info!(
                "Best result in {dataset}: MSE {} | fMSE {}",
                self.best.best_mse(),
                self.best.best_fmse()
            );
        }

        Ok(TrainResult {
            epochs,
            total_iters: self.total_iters,
            best_mse: self.best.best_mse(),
            best_fmse: self.best.best_fmse(),
            elapsed_secs: start.elapsed().as_secs_f64(),
        })
    }

    fn train_epoch(&mut self, epoch: usize, last: usize) -> Result<()> {
        let is_master = self.is_master();
        let world_size = self.group.world_size();
        let batch_size = self.loader.batch_size();
        let dataset_size = self.loader.len().max(1);

        let epoch_start = Instant::now();
        let mut iter_data_time = Instant::now();
        let mut epoch_iter = 0;
        let mut losses = LossMap::new();

        self.loader.shuffle(epoch);
        for batch in self.loader.batches() {
            let batch = batch?;
            let iter_start = Instant::now();
            let t_data = iter_start.duration_since(iter_data_time).as_secs_f64();

            self.visualizer.reset();
            self.total_iters += batch_size;
            epoch_iter += batch_size;

            if !self.initialized {
                self.model.data_dependent_initialize(&batch)?;
                self.model.setup(&self.spec)?;
                self.initialized = true;
            }

            self.model.set_input(&batch)?;
            self.model.optimize_parameters()?;

            losses = self.model.get_current_losses();
            if world_size > 1 {
                losses = self.group.all_reduce_mean(&losses)?;
            }

            if is_master {
                let events = IterationEvents::at(&self.spec.cadence, self.total_iters);
                if events.display {
                    let visuals = self.model.get_current_visuals()?;
                    self.visualizer
                        .display_current_results(&visuals, epoch, events.save_result)?;
                }
                if events.print {
                    let t_comp = iter_start.elapsed().as_secs_f64() / batch_size as f64;
                    self.visualizer
                        .print_current_losses(epoch, epoch_iter, &losses, t_comp, t_data)?;
                    self.visualizer.plot_current_losses(
                        epoch,
                        epoch_iter as f64 / dataset_size as f64,
                        &losses,
                    )?;
                }
                if events.save_latest {
                    info!(
                        "saving the latest model (epoch {epoch}, total_iters {})",
                        self.total_iters
                    );
                    let tag = iteration_tag(self.spec.cadence.save_by_iter, self.total_iters);
                    self.model.save_networks(&tag)?;
                }
            }

            iter_data_time = Instant::now();
        }

        if is_master && super::cadence::due(epoch, self.spec.cadence.save_epoch_freq) {
            self.end_of_epoch_checkpoints(epoch)?;
        }
        if is_master {
            info!(
                "End of epoch {epoch} / {last} \t Time Taken: {} sec",
                epoch_start.elapsed().as_secs()
            );
        }

        let lr = self.model.update_learning_rate();
        debug!("epoch {epoch} finished at learning rate {lr}");

        if let Some(writer) = self.writer.as_mut() {
            for (name, value) in &losses {
                writer.add_scalar(&format!("data/loss_{name}"), *value, epoch)?;
            }
        }
        Ok(())
    }

    /// `latest` (and the epoch tag once allowed), then evaluation and `best`
    fn end_of_epoch_checkpoints(&mut self, epoch: usize) -> Result<()> {
        info!(
            "saving the model at the end of epoch {epoch}, iters {}",
            self.total_iters
        );
        for tag in epoch_tags(epoch, &self.spec.cadence) {
            self.model.save_networks(&tag)?;
        }

        let Some(evaluator) = self.evaluator.as_mut() else {
            return Ok(());
        };
        let (mse, fmse) = evaluator.evaluate(epoch)?;
        if self.best.consider(mse, fmse) {
            info!("New best at epoch {epoch}: MSE {mse:.2} | fMSE {fmse:.2}");
            self.model.save_networks(&CheckpointTag::Best)?;
        }
        Ok(())
    }
}
