//! Levenberg–Marquardt refinement of a [`PlanarProblem`].

use crate::error::SolverError;
use crate::options::SolverOptions;
use crate::problem::PlanarProblem;
use levenberg_marquardt::{LevenbergMarquardt, TerminationReason};
use log::debug;
use serde::{Deserialize, Serialize};

/// How the refinement ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LmReport {
    /// Residual evaluations spent.
    pub evaluations: usize,
    /// `½‖r‖²` at the returned parameters.
    pub final_cost: f64,
    /// `false` when the evaluation budget ran out before a tolerance was met.
    pub converged: bool,
}

/// Run the minimiser from the problem's current parameters.
///
/// Running out of budget still yields the best point found. Every other
/// abnormal stop, including non-finite residuals, is `DidNotConverge`.
pub(crate) fn refine<'a>(
    problem: PlanarProblem<'a>,
    options: &SolverOptions,
) -> Result<(PlanarProblem<'a>, LmReport), SolverError> {
    let lm = LevenbergMarquardt::new()
        .with_xtol(options.xtol)
        .with_ftol(options.ftol)
        .with_gtol(options.gtol)
        .with_stepbound(options.stepbound)
        .with_patience(options.patience.max(1));

    let (problem, report) = lm.minimize(problem);
    debug!(
        "lm stopped after {} evaluations: {:?}, cost {:.6e}",
        report.number_of_evaluations, report.termination, report.objective_function
    );

    let converged = report.termination.was_successful();
    if !converged && !matches!(report.termination, TerminationReason::LostPatience) {
        return Err(SolverError::diverged(format!(
            "refinement stopped: {:?}",
            report.termination
        )));
    }
    if !report.objective_function.is_finite() {
        return Err(SolverError::diverged("non-finite cost"));
    }

    Ok((
        problem,
        LmReport {
            evaluations: report.number_of_evaluations,
            final_cost: report.objective_function,
            converged,
        },
    ))
}
