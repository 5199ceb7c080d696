//! Guided calibration as an explicit state machine.
//!
//! Stages run `Config → Collecting → Verifying → Calibrated → Analysis`.
//! Every transition borrows the current value and returns a new one, so a
//! rejected step leaves the caller's workflow untouched and earlier values
//! stay valid snapshots. Images and artifacts are shared through `Arc`, which
//! keeps the copies cheap.

use crate::error::{CalibError, WorkflowError};
use camcal_chessboard::{detect_batch, BatchOptions, ChessboardDetector};
use camcal_core::{
    current_timestamp, BoardGeometry, CalibrationArtifact, CalibrationImage, CornerSet,
    GrayImageView,
};
use camcal_solver::{solve, CalibrationSolution, SolverOptions, DEFAULT_MIN_VIEWS};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Config,
    Collecting,
    Verifying,
    Calibrated,
    Analysis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "Config",
            Stage::Collecting => "Collecting",
            Stage::Verifying => "Verifying",
            Stage::Calibrated => "Calibrated",
            Stage::Analysis => "Analysis",
        };
        f.write_str(name)
    }
}

/// Thresholds enforced by the transition guards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowPolicy {
    /// Images required to start verification, and valid approved images
    /// required to calibrate.
    pub min_images: usize,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            min_images: DEFAULT_MIN_VIEWS,
        }
    }
}

/// One successful solve and what it was computed from.
#[derive(Clone, Debug)]
pub struct CalibrationRecord {
    pub artifact: Arc<CalibrationArtifact>,
    pub solution: Arc<CalibrationSolution>,
    /// Indices of the images that went into the solve.
    pub images: Vec<usize>,
    pub fix_k3: bool,
}

#[derive(Clone, Debug)]
pub struct CalibrationWorkflow {
    stage: Stage,
    policy: WorkflowPolicy,
    board: Option<BoardGeometry>,
    fix_k3: bool,
    images: Vec<Arc<CalibrationImage>>,
    corners: Arc<Vec<Option<CornerSet>>>,
    approved: Vec<bool>,
    calibration: Option<CalibrationRecord>,
    history: Vec<Arc<CalibrationArtifact>>,
}

impl Default for CalibrationWorkflow {
    fn default() -> Self {
        Self::new(WorkflowPolicy::default())
    }
}

impl CalibrationWorkflow {
    pub fn new(policy: WorkflowPolicy) -> Self {
        Self {
            stage: Stage::Config,
            policy,
            board: None,
            fix_k3: false,
            images: Vec::new(),
            corners: Arc::new(Vec::new()),
            approved: Vec::new(),
            calibration: None,
            history: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    pub fn board(&self) -> Option<&BoardGeometry> {
        self.board.as_ref()
    }

    pub fn fix_k3(&self) -> bool {
        self.fix_k3
    }

    pub fn images(&self) -> &[Arc<CalibrationImage>] {
        &self.images
    }

    /// Detector verdict per image. Empty before verification.
    pub fn valid(&self) -> Vec<bool> {
        self.corners.iter().map(Option::is_some).collect()
    }

    pub fn corners(&self, index: usize) -> Option<&CornerSet> {
        self.corners.get(index).and_then(Option::as_ref)
    }

    pub fn approved(&self) -> &[bool] {
        &self.approved
    }

    /// Indices that are both valid and approved.
    pub fn accepted(&self) -> Vec<usize> {
        self.approved
            .iter()
            .enumerate()
            .filter(|&(i, &ok)| ok && self.corners(i).is_some())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn calibration(&self) -> Option<&CalibrationRecord> {
        self.calibration.as_ref()
    }

    /// Latest artifact, if any solve has succeeded.
    pub fn artifact(&self) -> Option<&Arc<CalibrationArtifact>> {
        self.calibration.as_ref().map(|c| &c.artifact)
    }

    /// Every artifact produced so far, oldest first.
    pub fn history(&self) -> &[Arc<CalibrationArtifact>] {
        &self.history
    }

    fn require(&self, action: &'static str, allowed: &[Stage]) -> Result<(), WorkflowError> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(WorkflowError::NotAllowed {
                action,
                stage: self.stage,
            })
        }
    }

    fn check_index(&self, index: usize) -> Result<(), WorkflowError> {
        if index < self.images.len() {
            Ok(())
        } else {
            Err(WorkflowError::IndexOutOfRange {
                index,
                len: self.images.len(),
            })
        }
    }

    fn with_stage(&self, stage: Stage) -> Self {
        debug!("workflow {} -> {}", self.stage, stage);
        Self {
            stage,
            ..self.clone()
        }
    }

    /// Fix the board and the k3 policy. `Config → Collecting`.
    pub fn configure(&self, board: BoardGeometry, fix_k3: bool) -> Result<Self, CalibError> {
        self.require("configure", &[Stage::Config])?;
        board.validate()?;
        let mut next = self.with_stage(Stage::Collecting);
        next.board = Some(board);
        next.fix_k3 = fix_k3;
        Ok(next)
    }

    pub fn add_image(&self, image: CalibrationImage) -> Result<Self, WorkflowError> {
        self.require("add_image", &[Stage::Collecting])?;
        let mut next = self.clone();
        next.images.push(Arc::new(image));
        Ok(next)
    }

    pub fn remove_image(&self, index: usize) -> Result<Self, WorkflowError> {
        self.require("remove_image", &[Stage::Collecting])?;
        self.check_index(index)?;
        let mut next = self.clone();
        next.images.remove(index);
        Ok(next)
    }

    /// Run the detector over every collected image. `Collecting → Verifying`.
    ///
    /// Nothing is approved yet; the caller decides per image.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(images = self.images.len()))
    )]
    pub fn verify(
        &self,
        detector: &ChessboardDetector,
        batch: &BatchOptions,
    ) -> Result<Self, CalibError> {
        self.require("verify", &[Stage::Collecting])?;
        if self.images.len() < self.policy.min_images {
            return Err(WorkflowError::NotEnoughImages {
                available: self.images.len(),
                required: self.policy.min_images,
            }
            .into());
        }
        let board = self.configured_board()?;

        let views: Vec<GrayImageView<'_>> = self.images.iter().map(|img| img.view()).collect();
        let corners: Vec<Option<CornerSet>> = detect_batch(detector, &views, &board, batch)
            .into_iter()
            .zip(&self.images)
            .map(|(result, img)| match result {
                Ok(set) => Some(set),
                Err(failure) => {
                    debug!("image {} rejected: {failure}", img.id);
                    None
                }
            })
            .collect();
        let found = corners.iter().flatten().count();
        info!(
            "verification: board found in {found} of {} images",
            self.images.len()
        );

        let mut next = self.with_stage(Stage::Verifying);
        next.approved = vec![false; corners.len()];
        next.corners = Arc::new(corners);
        Ok(next)
    }

    /// Mark one image as approved or not. Only valid images can be approved.
    pub fn set_approved(&self, index: usize, approved: bool) -> Result<Self, WorkflowError> {
        self.require("set_approved", &[Stage::Verifying, Stage::Analysis])?;
        self.check_index(index)?;
        if approved && self.corners(index).is_none() {
            return Err(WorkflowError::NotValid { index });
        }
        let mut next = self.clone();
        next.approved[index] = approved;
        Ok(next)
    }

    pub fn approve_all_valid(&self) -> Result<Self, WorkflowError> {
        self.require("approve_all_valid", &[Stage::Verifying, Stage::Analysis])?;
        let mut next = self.clone();
        next.approved = self.corners.iter().map(Option::is_some).collect();
        Ok(next)
    }

    /// Solve on the accepted images. `Verifying → Calibrated`.
    pub fn calibrate(&self, options: &SolverOptions) -> Result<Self, CalibError> {
        self.require("calibrate", &[Stage::Verifying])?;
        let record = self.solve_accepted(self.fix_k3, options)?;
        let mut next = self.with_stage(Stage::Calibrated);
        next.history.push(Arc::clone(&record.artifact));
        next.calibration = Some(record);
        Ok(next)
    }

    /// `Calibrated → Analysis`.
    pub fn analyze(&self) -> Result<Self, WorkflowError> {
        self.require("analyze", &[Stage::Calibrated])?;
        Ok(self.with_stage(Stage::Analysis))
    }

    /// Solve again from `Analysis` with a new k3 policy or approval set.
    ///
    /// Produces a new artifact; the previous one stays in `history`.
    pub fn recalibrate(&self, fix_k3: bool, options: &SolverOptions) -> Result<Self, CalibError> {
        self.require("recalibrate", &[Stage::Analysis])?;
        if let Some(prev) = &self.calibration {
            if prev.fix_k3 == fix_k3 && prev.images == self.accepted() {
                return Err(WorkflowError::Unchanged.into());
            }
        }
        let record = self.solve_accepted(fix_k3, options)?;
        let mut next = self.clone();
        next.fix_k3 = fix_k3;
        next.history.push(Arc::clone(&record.artifact));
        next.calibration = Some(record);
        Ok(next)
    }

    /// Drop detection results and go back to collecting images.
    ///
    /// Artifacts already produced stay available.
    pub fn collect_more(&self) -> Result<Self, WorkflowError> {
        self.require(
            "collect_more",
            &[Stage::Verifying, Stage::Calibrated, Stage::Analysis],
        )?;
        let mut next = self.with_stage(Stage::Collecting);
        next.corners = Arc::new(Vec::new());
        next.approved.clear();
        Ok(next)
    }

    /// Start over with the same policy.
    pub fn reset(&self) -> Self {
        Self::new(self.policy.clone())
    }

    fn configured_board(&self) -> Result<BoardGeometry, WorkflowError> {
        self.board.ok_or(WorkflowError::NotAllowed {
            action: "verify",
            stage: Stage::Config,
        })
    }

    fn solve_accepted(
        &self,
        fix_k3: bool,
        options: &SolverOptions,
    ) -> Result<CalibrationRecord, CalibError> {
        let accepted = self.accepted();
        if accepted.len() < self.policy.min_images {
            return Err(WorkflowError::NotEnoughApproved {
                available: accepted.len(),
                required: self.policy.min_images,
            }
            .into());
        }
        let board = self.configured_board()?;
        let sets: Vec<CornerSet> = accepted
            .iter()
            .filter_map(|&i| self.corners(i).cloned())
            .collect();

        let options = options.clone().with_fix_k3(fix_k3);
        let solution = solve(&sets, &board, &options)?;
        let artifact = solution.into_artifact(&board, current_timestamp());
        info!(
            "workflow calibration {} from {} images (rms {:.4}px)",
            artifact.id(),
            sets.len(),
            artifact.rms()
        );

        Ok(CalibrationRecord {
            artifact: Arc::new(artifact),
            solution: Arc::new(solution),
            images: accepted,
            fix_k3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camcal_core::GrayImage;

    fn board() -> BoardGeometry {
        BoardGeometry::new(8, 6, 30.0).expect("board")
    }

    fn blank(i: usize) -> CalibrationImage {
        CalibrationImage::new(format!("blank-{i}"), GrayImage::new(64, 48))
    }

    fn collecting(n: usize) -> CalibrationWorkflow {
        let mut wf = CalibrationWorkflow::default()
            .configure(board(), false)
            .expect("configure");
        for i in 0..n {
            wf = wf.add_image(blank(i)).expect("add");
        }
        wf
    }

    #[test]
    fn starts_in_config() {
        let wf = CalibrationWorkflow::default();
        assert_eq!(wf.stage(), Stage::Config);
        assert_eq!(wf.policy().min_images, 10);
        assert!(wf.artifact().is_none());
    }

    #[test]
    fn images_only_accepted_while_collecting() {
        let wf = CalibrationWorkflow::default();
        let err = wf.add_image(blank(0)).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::NotAllowed {
                action: "add_image",
                stage: Stage::Config
            }
        );
    }

    #[test]
    fn invalid_board_is_rejected_before_collecting() {
        let wf = CalibrationWorkflow::default();
        let bad = BoardGeometry {
            columns: 2,
            rows: 6,
            square_size: 30.0,
        };
        assert!(matches!(
            wf.configure(bad, false),
            Err(CalibError::Geometry(_))
        ));
        assert_eq!(wf.stage(), Stage::Config);
    }

    #[test]
    fn transitions_leave_the_source_untouched() {
        let wf = collecting(2);
        let fewer = wf.remove_image(0).expect("remove");
        assert_eq!(wf.images().len(), 2);
        assert_eq!(fewer.images().len(), 1);
        assert_eq!(fewer.images()[0].id.0, "blank-1");
    }

    #[test]
    fn remove_out_of_range() {
        let wf = collecting(1);
        assert_eq!(
            wf.remove_image(3).unwrap_err(),
            WorkflowError::IndexOutOfRange { index: 3, len: 1 }
        );
    }

    #[test]
    fn verification_needs_min_images() {
        let wf = collecting(9);
        let err = wf
            .verify(&ChessboardDetector::default(), &BatchOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CalibError::Workflow(WorkflowError::NotEnoughImages {
                available: 9,
                required: 10
            })
        ));
    }

    #[test]
    fn invalid_images_cannot_be_approved_or_calibrated() {
        let wf = collecting(10)
            .verify(&ChessboardDetector::default(), &BatchOptions::default())
            .expect("verify");
        assert_eq!(wf.stage(), Stage::Verifying);
        assert_eq!(wf.valid(), vec![false; 10]);
        assert_eq!(wf.approved(), &[false; 10][..]);

        assert_eq!(
            wf.set_approved(0, true).unwrap_err(),
            WorkflowError::NotValid { index: 0 }
        );
        let wf = wf.approve_all_valid().expect("approve");
        assert!(wf.accepted().is_empty());

        let err = wf.calibrate(&SolverOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            CalibError::Workflow(WorkflowError::NotEnoughApproved {
                available: 0,
                required: 10
            })
        ));
    }

    #[test]
    fn analysis_requires_a_calibration() {
        let wf = collecting(10)
            .verify(&ChessboardDetector::default(), &BatchOptions::default())
            .expect("verify");
        assert!(wf.analyze().is_err());
        assert!(matches!(
            wf.recalibrate(true, &SolverOptions::default()),
            Err(CalibError::Workflow(WorkflowError::NotAllowed { .. }))
        ));
    }

    #[test]
    fn collect_more_drops_detections() {
        let wf = collecting(10)
            .verify(&ChessboardDetector::default(), &BatchOptions::default())
            .expect("verify")
            .collect_more()
            .expect("back");
        assert_eq!(wf.stage(), Stage::Collecting);
        assert!(wf.valid().is_empty());
        assert_eq!(wf.images().len(), 10);
    }

    #[test]
    fn reset_keeps_policy() {
        let policy = WorkflowPolicy { min_images: 4 };
        let wf = CalibrationWorkflow::new(policy.clone())
            .configure(board(), true)
            .expect("configure")
            .reset();
        assert_eq!(wf.stage(), Stage::Config);
        assert_eq!(wf.policy(), &policy);
        assert!(wf.board().is_none());
    }
}
