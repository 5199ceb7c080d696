use serde::{Deserialize, Serialize};

/// Number of accepted views a solve insists on.
pub const DEFAULT_MIN_VIEWS: usize = 10;

/// Solver configuration.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Hold k3 at exactly zero and leave it out of the optimisation.
    pub fix_k3: bool,
    /// Fewer accepted views than this is `InsufficientData`.
    pub min_views: usize,
    /// Evaluation budget in units of `parameter count + 1`.
    pub patience: usize,
    /// Relative parameter-update tolerance.
    pub xtol: f64,
    /// Relative cost-decrease tolerance.
    pub ftol: f64,
    /// Gradient orthogonality tolerance; 0 disables the test.
    pub gtol: f64,
    /// Initial trust-region bound, relative to the scaled parameter norm.
    pub stepbound: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            fix_k3: false,
            min_views: DEFAULT_MIN_VIEWS,
            patience: 100,
            xtol: 1e-10,
            ftol: 1e-12,
            gtol: 0.0,
            stepbound: 100.0,
        }
    }
}

impl SolverOptions {
    pub fn with_fix_k3(mut self, fix_k3: bool) -> Self {
        self.fix_k3 = fix_k3;
        self
    }
}
