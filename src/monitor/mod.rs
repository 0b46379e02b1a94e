//! Run monitoring
//!
//! - **SummaryWriter**: scalar and text events keyed by tag and step
//! - **Visualizer**: loss log, loss curve points and the training HTML page
//! - **HtmlPage**: static galleries for test results

pub mod html;
pub mod summary;
pub mod visualizer;

pub use html::{save_images, GalleryImage, HtmlPage};
pub use summary::{
    read_events, run_dir_name, JsonlSummaryWriter, MemoryWriter, SummaryEvent, SummaryWriter,
};
pub use visualizer::{format_losses, Visualizer};
