//! Checkpoint I/O
//!
//! Networks are saved as named `f32` tensors, one file per network, under
//! `<checkpoints_dir>/<name>/<tag>_net_<network>.<ext>`.

mod format;
mod load;
mod save;
mod state;


pub use format::CheckpointFormat;
pub use load::{load_network, load_network_from};
pub use save::{save_network, save_network_to};
pub use state::{checkpoint_path, NetworkMetadata, NetworkState, TensorInfo};
