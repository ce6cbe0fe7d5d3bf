use std::fmt;

use thiserror::Error;

/// Stages of a single input unit's pipeline.
///
/// DISCOVERED → UPLOADING → UPLOADED → JOB_CREATING → JOB_CREATED → POLLING → COMPLETED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Discovered,
    Uploading,
    Uploaded,
    JobCreating,
    JobCreated,
    Polling,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// Whether a unit in this stage occupies a concurrency slot.
    pub fn is_in_flight(self) -> bool {
        (Stage::Uploading..=Stage::Polling).contains(&self)
    }

    fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Discovered, Uploading)
                | (Uploading, Uploaded)
                | (Uploading, Failed)
                | (Uploaded, JobCreating)
                | (JobCreating, JobCreated)
                | (JobCreating, Failed)
                | (JobCreated, Polling)
                | (Polling, Completed)
                | (Polling, Failed)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discovered => "DISCOVERED",
            Stage::Uploading => "UPLOADING",
            Stage::Uploaded => "UPLOADED",
            Stage::JobCreating => "JOB_CREATING",
            Stage::JobCreated => "JOB_CREATED",
            Stage::Polling => "POLLING",
            Stage::Completed => "COMPLETED",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid pipeline transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: Stage,
    pub to: Stage,
}

/// Tracks one unit's position in the pipeline and rejects out-of-order moves.
#[derive(Debug, Clone)]
pub struct UnitTracker {
    stage: Stage,
    history: Vec<Stage>,
}

impl Default for UnitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitTracker {
    pub fn new() -> Self {
        Self {
            stage: Stage::Discovered,
            history: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage visited so far, current stage last.
    pub fn history(&self) -> Vec<Stage> {
        let mut stages = self.history.clone();
        stages.push(self.stage);
        stages
    }

    /// Move to `next` if the pipeline graph allows it. Terminal stages never move.
    pub fn advance(&mut self, next: Stage) -> Result<(), InvalidTransition> {
        if !self.stage.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.history.push(self.stage);
        self.stage = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_all_stages() {
        let mut tracker = UnitTracker::new();
        for next in [
            Stage::Uploading,
            Stage::Uploaded,
            Stage::JobCreating,
            Stage::JobCreated,
            Stage::Polling,
            Stage::Completed,
        ] {
            tracker.advance(next).unwrap();
        }
        assert_eq!(
            tracker.history(),
            vec![
                Stage::Discovered,
                Stage::Uploading,
                Stage::Uploaded,
                Stage::JobCreating,
                Stage::JobCreated,
                Stage::Polling,
                Stage::Completed
            ]
        );
    }

    #[test]
    fn upload_failure_skips_polling() {
        let mut tracker = UnitTracker::new();
        tracker.advance(Stage::Uploading).unwrap();
        tracker.advance(Stage::Failed).unwrap();
        assert!(tracker.stage().is_terminal());
        assert!(!tracker.history().contains(&Stage::Polling));
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut tracker = UnitTracker::new();
        let err = tracker.advance(Stage::Polling).unwrap_err();
        assert_eq!(
            err,
            InvalidTransition {
                from: Stage::Discovered,
                to: Stage::Polling
            }
        );
        assert_eq!(tracker.stage(), Stage::Discovered);
    }

    #[test]
    fn terminal_stages_do_not_move() {
        let mut tracker = UnitTracker::new();
        tracker.advance(Stage::Uploading).unwrap();
        tracker.advance(Stage::Failed).unwrap();
        assert!(tracker.advance(Stage::Uploading).is_err());
    }

    #[test]
    fn uploaded_cannot_fail_directly() {
        let mut tracker = UnitTracker::new();
        tracker.advance(Stage::Uploading).unwrap();
        tracker.advance(Stage::Uploaded).unwrap();
        assert!(tracker.advance(Stage::Failed).is_err());
    }

    #[test]
    fn in_flight_range() {
        assert!(!Stage::Discovered.is_in_flight());
        assert!(Stage::Uploading.is_in_flight());
        assert!(Stage::Polling.is_in_flight());
        assert!(!Stage::Completed.is_in_flight());
        assert!(!Stage::Failed.is_in_flight());
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::JobCreating.to_string(), "JOB_CREATING");
        assert_eq!(Stage::Polling.to_string(), "POLLING");
    }
}
