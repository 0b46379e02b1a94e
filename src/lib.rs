//! # Armonizar: image harmonization training pipeline
//!
//! Armonizar trains and evaluates models that repaint the foreground of a
//! composite image so it matches its background. It covers everything around
//! the model: dataset loading, a data-parallel epoch loop with periodic
//! checkpoints, and MSE / foreground-MSE evaluation.
//!
//! ## Architecture
//!
//! - **config**: Declarative YAML experiment specs and the CLI
//! - **data**: iHarmony4 and synthetic sample sources, sharded batch loading
//! - **distributed**: Process groups, rendezvous and the loss reduction
//! - **model**: The model contract, LR schedules and a reference model
//! - **io**: Checkpoint saving and loading (JSON, SafeTensors)
//! - **train**: The training loop and best-checkpoint tracking
//! - **eval**: Per-image scores, test runs and detail reports
//! - **monitor**: Loss logs, HTML galleries and structured summaries

pub mod config;
pub mod data;
pub mod distributed;
pub mod eval;
pub mod io;
pub mod model;
pub mod monitor;
pub mod train;

pub mod error;

// Re-export commonly used types
pub use config::HarmonizeSpec;
pub use error::{Error, Result};
