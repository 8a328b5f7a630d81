//! Acquisition progress tracking.
//!
//! Exposures run in the background on the detector and finish by pushing an
//! unsolicited completion notice down the control connection. Whether an
//! acquisition is still in flight is therefore discovered lazily: a
//! zero-timeout poll either finds the notice and clears the state, or finds
//! nothing and leaves it running.

use crate::camserver::response::{COMPLETION_ERR, COMPLETION_OK};

/// Whether an exposure is in flight on the detector.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum AcquisitionState {
    /// No exposure is in flight. Any command may be sent.
    Idle,
    /// An exposure is in flight. Only a stop may be sent.
    Running,
}

/// The meaning of a line found while polling for a completion notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    /// The acquisition finished successfully.
    Done,
    /// The detector reported the acquisition failed.
    Failed,
    /// The line was not a completion notice at all.
    Unrelated,
}

impl Completion {
    /// Classify a line received while an acquisition was thought to be
    /// running.
    ///
    /// The failure check comes first: a `7 ERR` line also begins with `7`,
    /// and must never be mistaken for a success.
    pub(crate) fn classify(line: &str) -> Completion {
        if line.starts_with(COMPLETION_ERR) {
            Completion::Failed
        } else if line.starts_with(COMPLETION_OK) {
            Completion::Done
        } else {
            Completion::Unrelated
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn completion_lines_are_classified() {
        assert_eq!(
            Completion::classify("7 OK /data/scan_0001.cbf"),
            Completion::Done
        );
        assert_eq!(Completion::classify("7 ERR aborted"), Completion::Failed);
        assert_eq!(
            Completion::classify("15 OK N images set to: 1"),
            Completion::Unrelated
        );
        assert_eq!(Completion::classify(""), Completion::Unrelated);
    }
}
