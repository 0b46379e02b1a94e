//! Periodic side effects keyed on the global sample counter

use crate::config::CadenceParams;
use crate::model::CheckpointTag;

/// `counter` is a multiple of `freq`; a zero frequency never fires
pub fn due(counter: usize, freq: usize) -> bool {
    freq > 0 && counter % freq == 0
}

/// Which side effects fire after one training step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IterationEvents {
    pub display: bool,
    /// Write the HTML snapshot along with the display
    pub save_result: bool,
    pub print: bool,
    pub save_latest: bool,
}

impl IterationEvents {
    /// Events for the step that brought the counter to `total_iters`
    pub fn at(cadence: &CadenceParams, total_iters: usize) -> Self {
        Self {
            display: due(total_iters, cadence.display_freq),
            save_result: due(total_iters, cadence.update_html_freq),
            print: due(total_iters, cadence.print_freq),
            save_latest: due(total_iters, cadence.save_latest_freq),
        }
    }
}

/// Tag of a mid-epoch checkpoint
pub fn iteration_tag(save_by_iter: bool, total_iters: usize) -> CheckpointTag {
    if save_by_iter {
        CheckpointTag::Iter(total_iters)
    } else {
        CheckpointTag::Latest
    }
}

/// Tags written at the end of `epoch`, before evaluation
pub fn epoch_tags(epoch: usize, cadence: &CadenceParams) -> Vec<CheckpointTag> {
    let mut tags = vec![CheckpointTag::Latest];
    if cadence.save_iter_model && epoch >= cadence.save_iter_min_epoch {
        tags.push(CheckpointTag::Epoch(epoch));
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cadence() -> CadenceParams {
        CadenceParams {
            display_freq: 40,
            update_html_freq: 80,
            print_freq: 20,
            save_latest_freq: 60,
            ..CadenceParams::default()
        }
    }

    #[test]
    fn test_events_are_independent_moduli() {
        let c = cadence();
        assert_eq!(
            IterationEvents::at(&c, 20),
            IterationEvents { print: true, ..Default::default() }
        );
        assert_eq!(
            IterationEvents::at(&c, 120),
            IterationEvents { display: true, save_result: false, print: true, save_latest: true }
        );
        assert_eq!(
            IterationEvents::at(&c, 240),
            IterationEvents { display: true, save_result: true, print: true, save_latest: true }
        );
        assert_eq!(IterationEvents::at(&c, 7), IterationEvents::default());
    }

    #[test]
    fn test_zero_frequency_never_fires() {
        assert!(!due(0, 0));
        assert!(!due(100, 0));
        assert!(due(100, 25));
    }

    #[test]
    fn test_iteration_tag() {
        assert_eq!(iteration_tag(false, 5000), CheckpointTag::Latest);
        assert_eq!(iteration_tag(true, 5000).to_string(), "iter_5000");
    }

    #[test]
    fn test_epoch_tags_respect_min_epoch() {
        let mut c = CadenceParams::default();
        assert_eq!(epoch_tags(60, &c), vec![CheckpointTag::Latest]);

        c.save_iter_model = true;
        assert_eq!(epoch_tags(54, &c), vec![CheckpointTag::Latest]);
        assert_eq!(
            epoch_tags(55, &c),
            vec![CheckpointTag::Latest, CheckpointTag::Epoch(55)]
        );
    }
}
