use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by up-front parameter validation. All of these are surfaced
/// before any graph construction or solving is attempted.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Kernel scale phi must be strictly positive, but was {0}.")]
    NonPositivePhi(f64),

    #[error("Neighbor count k must be at least 1, but was 0 for the {0} axis.")]
    ZeroNeighbors(&'static str),

    #[error("ADMM step size rho must be strictly positive, but was {0}.")]
    NonPositiveRho(f64),

    #[error("Convergence tolerance must be strictly positive, but was {0}.")]
    NonPositiveTolerance(f64),

    #[error("Maximum iteration count must be at least 1.")]
    ZeroMaxIterations,

    #[error("Fusion tolerance must be non-negative and finite, but was {0}.")]
    InvalidFusionTolerance(f64),

    #[error(
        "Penalty sequence must be non-negative and strictly increasing; entry {index} ({value}) violates this."
    )]
    InvalidPenaltySequence { index: usize, value: f64 },

    #[error("Penalty sequence must contain at least one strength.")]
    EmptyPenaltySequence,

    #[error("Hold-out fraction must lie strictly between 0 and 1, but was {0}.")]
    InvalidHoldoutFraction(f64),
}

/// Tuning parameters for one biclustering run.
///
/// `phi` scales the Gaussian affinity kernel used when weighting k-NN edges;
/// `k_row`/`k_col` are the per-axis neighbor counts. The remaining fields
/// control the ADMM iteration: `rho` is the fixed augmented-Lagrangian step
/// size, `tolerance` bounds the primal and dual residuals at convergence,
/// and `fusion_tolerance` is the norm below which a shrunk edge difference
/// counts as exactly fused.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiclusterConfig {
    pub phi: f64,
    pub k_row: usize,
    pub k_col: usize,
    pub rho: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
    pub fusion_tolerance: f64,
}

impl Default for BiclusterConfig {
    fn default() -> Self {
        BiclusterConfig {
            phi: 0.5,
            k_row: 5,
            k_col: 5,
            rho: 1.0,
            tolerance: 1e-5,
            max_iterations: 1000,
            fusion_tolerance: 1e-9,
        }
    }
}

impl BiclusterConfig {
    /// Checks every parameter constraint, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.phi > 0.0) || !self.phi.is_finite() {
            return Err(ConfigError::NonPositivePhi(self.phi));
        }
        if self.k_row == 0 {
            return Err(ConfigError::ZeroNeighbors("row"));
        }
        if self.k_col == 0 {
            return Err(ConfigError::ZeroNeighbors("column"));
        }
        if !(self.rho > 0.0) || !self.rho.is_finite() {
            return Err(ConfigError::NonPositiveRho(self.rho));
        }
        if !(self.tolerance > 0.0) || !self.tolerance.is_finite() {
            return Err(ConfigError::NonPositiveTolerance(self.tolerance));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroMaxIterations);
        }
        if !(self.fusion_tolerance >= 0.0) || !self.fusion_tolerance.is_finite() {
            return Err(ConfigError::InvalidFusionTolerance(self.fusion_tolerance));
        }
        Ok(())
    }
}

/// An ordered sequence of fusion penalty strengths.
///
/// Construction enforces the path contract: every strength is finite and
/// non-negative, and the sequence is strictly increasing, so warm starts
/// along the path are always from a less-penalized solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltySequence(Vec<f64>);

impl PenaltySequence {
    pub fn new(gammas: Vec<f64>) -> Result<Self, ConfigError> {
        if gammas.is_empty() {
            return Err(ConfigError::EmptyPenaltySequence);
        }
        let mut prev = f64::NEG_INFINITY;
        for (index, &value) in gammas.iter().enumerate() {
            if !value.is_finite() || value < 0.0 || value <= prev {
                return Err(ConfigError::InvalidPenaltySequence { index, value });
            }
            prev = value;
        }
        Ok(PenaltySequence(gammas))
    }

    /// A log-spaced sequence from `min` to `max` inclusive, a common choice
    /// for fusion paths. `min` must be positive for the log spacing to exist.
    pub fn log_spaced(min: f64, max: f64, count: usize) -> Result<Self, ConfigError> {
        if count == 0 {
            return Err(ConfigError::EmptyPenaltySequence);
        }
        if !(min > 0.0) || !(max > min) {
            return Err(ConfigError::InvalidPenaltySequence {
                index: 0,
                value: min,
            });
        }
        if count == 1 {
            return PenaltySequence::new(vec![min]);
        }
        let (log_min, log_max) = (min.ln(), max.ln());
        let step = (log_max - log_min) / (count as f64 - 1.0);
        let gammas = (0..count)
            .map(|i| (log_min + step * i as f64).exp())
            .collect();
        PenaltySequence::new(gammas)
    }

    pub fn strengths(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
