//! Training loop
//!
//! - [`Trainer`]: epochs, the once-only model initialisation, loss reduction
//!   and the master-only side effects
//! - [`BestTracker`]: the `best` checkpoint criterion
//! - [`cadence`]: modulus checks against the global sample counter
//!
//! # Example
//!
//! ```no_run
//! use armonizar::config::load_config;
//! use armonizar::data::DatasetRegistry;
//! use armonizar::distributed::LocalGroup;
//! use armonizar::model::ModelRegistry;
//! use armonizar::train::Trainer;
//! use std::sync::Arc;
//!
//! let spec = load_config("configs/hcoco.yaml")?;
//! let mut trainer = Trainer::from_spec(
//!     &spec,
//!     &ModelRegistry::builtin(),
//!     &DatasetRegistry::builtin(),
//!     Arc::new(LocalGroup::new()),
//! )?;
//! let result = trainer.train()?;
//! println!("best fMSE {:.2}", result.best_fmse);
//! # Ok::<(), armonizar::Error>(())
//! ```

mod best;
pub mod cadence;
mod trainer;


pub use best::{BestTracker, SENTINEL};
pub use cadence::IterationEvents;
pub use trainer::{TrainResult, Trainer};
