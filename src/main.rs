//! Armonizar CLI
//!
//! # Usage
//!
//! ```bash
//! # Train from config
//! armonizar train hcoco.yaml
//!
//! # Train on two local processes
//! armonizar train hcoco.yaml --num-devices 2 --batch-size 16
//!
//! # Evaluate the best checkpoint
//! armonizar test hcoco.yaml --epoch best
//!
//! # Validate config
//! armonizar validate hcoco.yaml
//! ```

use armonizar::config::{
    apply_overrides, apply_test_overrides, load_config, validate_config, Cli, Command, TestArgs,
    TrainArgs, ValidateArgs,
};
use armonizar::data::DatasetRegistry;
use armonizar::distributed::{
    init_process_group, launch_workers, wait_workers, DistributedEnv, LocalGroup,
};
use armonizar::eval::run_test;
use armonizar::model::ModelRegistry;
use armonizar::monitor::JsonlSummaryWriter;
use armonizar::train::Trainer;
use armonizar::HarmonizeSpec;
use clap::Parser;
use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match cli.command {
        Command::Train(args) => run_train(args),
        Command::Test(args) => run_test_command(args),
        Command::Validate(args) => run_validate(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins over `--verbose` / `--quiet`
fn init_logging(cli: &Cli) {
    let default = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_train(args: TrainArgs) -> Result<(), String> {
    let mut spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;
    apply_overrides(&mut spec, &args);
    validate_config(&spec).map_err(|e| format!("Validation failed: {e}"))?;

    let env = DistributedEnv::from_process_env().map_err(|e| format!("Launch error: {e}"))?;
    let is_worker = env.as_ref().is_some_and(|env| env.rank > 0);
    if !is_worker {
        info!("Armonizar: training {} from {}", spec.name, args.config.display());
    }

    if args.dry_run {
        info!("Dry run - config validated successfully");
        info!(
            "  Model: {} | dataset: {} ({}) | epochs {}..={} | batch {} on {} device(s)",
            spec.model,
            spec.data.dataset_name,
            spec.data.dataset_mode,
            spec.training.epoch_count,
            spec.training.last_epoch(),
            spec.training.batch_size,
            spec.num_devices
        );
        return Ok(());
    }

    let (env, workers) = match env {
        Some(env) => (Some(env), Vec::new()),
        None if spec.num_devices > 1 => {
            let program =
                std::env::current_exe().map_err(|e| format!("Launch error: {e}"))?;
            let worker_args: Vec<OsString> = std::env::args_os().skip(1).collect();
            let (env, workers) = launch_workers(
                program,
                &worker_args,
                spec.num_devices,
                &spec.distributed.master_addr,
                spec.distributed.master_port,
            )
            .map_err(|e| format!("Launch error: {e}"))?;
            (Some(env), workers)
        }
        None => (None, Vec::new()),
    };

    let outcome = train_rank(&spec, env.as_ref());
    let waited = wait_workers(workers).map_err(|e| format!("Training error: {e}"));
    outcome?;
    waited?;

    if !is_worker {
        info!("Training complete!");
    }
    Ok(())
}

fn train_rank(spec: &HarmonizeSpec, env: Option<&DistributedEnv>) -> Result<(), String> {
    let group = init_process_group(spec, env).map_err(|e| format!("Distributed error: {e}"))?;
    let mut trainer = Trainer::from_spec(
        spec,
        &ModelRegistry::builtin(),
        &DatasetRegistry::builtin(),
        group,
    )
    .map_err(|e| format!("Setup error: {e}"))?;

    let result = trainer.train().map_err(|e| format!("Training error: {e}"))?;
    if trainer.is_master() {
        info!(
            "{} epochs, {} samples per rank in {:.1}s",
            result.epochs, result.total_iters, result.elapsed_secs
        );
    }
    Ok(())
}

fn run_test_command(args: TestArgs) -> Result<(), String> {
    let mut spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;
    apply_test_overrides(&mut spec, &args);
    validate_config(&spec).map_err(|e| format!("Validation failed: {e}"))?;
    info!(
        "Armonizar: testing {} checkpoint '{}' on {}",
        spec.name, spec.training.load_epoch, spec.data.dataset_name
    );

    let mut writer = JsonlSummaryWriter::create(&spec.output.log_dir, &spec.name)
        .map_err(|e| format!("Summary error: {e}"))?;
    let summary = run_test(
        &spec,
        &ModelRegistry::builtin(),
        &DatasetRegistry::builtin(),
        Arc::new(LocalGroup::new()),
        &mut writer,
    )
    .map_err(|e| format!("Test error: {e}"))?;

    info!("Scored {} images", summary.count());
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<(), String> {
    info!("Validating config: {}", args.config.display());
    let spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;

    info!("Configuration is valid");
    info!("  Experiment: {}", spec.name);
    info!("  Model: {}", spec.model);
    info!(
        "  Dataset: {} ({}) at {}",
        spec.data.dataset_name,
        spec.data.dataset_mode,
        spec.data.dataset_root.display()
    );
    info!(
        "  Epochs: {}..={} (lr {} policy {})",
        spec.training.epoch_count,
        spec.training.last_epoch(),
        spec.training.lr,
        spec.training.lr_policy
    );
    info!(
        "  Batch size: {} over {} device(s)",
        spec.training.batch_size, spec.num_devices
    );
    info!("  Checkpoints: {}", spec.experiment_dir().display());
    Ok(())
}
