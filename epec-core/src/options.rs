//! Engine configuration and run statistics.

use std::time::Duration;

/// Solution status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpecStatus {
    /// The solve has not started.
    #[default]
    Uninitialized,

    /// A Nash equilibrium was found.
    NashEqFound,

    /// The instance was proven to admit no equilibrium.
    NashEqNotFound,

    /// The wall-clock limit was reached before a conclusion.
    TimeLimit,

    /// Numerical issues stopped the run.
    Numerical,
}

impl std::fmt::Display for EpecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpecStatus::Uninitialized => write!(f, "Uninitialized"),
            EpecStatus::NashEqFound => write!(f, "NashEqFound"),
            EpecStatus::NashEqNotFound => write!(f, "NashEqNotFound"),
            EpecStatus::TimeLimit => write!(f, "TimeLimit"),
            EpecStatus::Numerical => write!(f, "Numerical"),
        }
    }
}

/// The algorithms the façade can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Branch-and-cut over complementarity encodings with value cuts and a
    /// separation oracle.
    #[default]
    OuterApproximation,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EpecOptions {
    /// Algorithm selection.
    pub algorithm: Algorithm,

    /// Numerical tolerance for deviation and containment checks.
    pub deviation_tolerance: f64,

    /// Model complementarities with indicator constraints; otherwise use
    /// big-M linearizations.
    pub indicator_constraints: bool,

    /// Wall-clock cap for the whole solve. `None` disables the limit.
    pub time_limit: Option<f64>,

    /// Thread hint passed through to the optimizer.
    pub threads: usize,

    /// Seek a pure-strategy equilibrium only.
    pub pure_nash_equilibrium: bool,

    /// Seed for randomized tie-breaking, recorded with the run.
    pub random_seed: u64,

    /// Cap primal variables of the master problem by `bound_big_m`.
    pub bound_primals: bool,

    /// The cap applied when `bound_primals` is set.
    pub bound_big_m: f64,

    /// Big-M constant for complementarity linearizations.
    pub big_m: f64,
}

impl Default for EpecOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            deviation_tolerance: 5.1e-4,
            indicator_constraints: true,
            time_limit: None,
            threads: 0,
            pure_nash_equilibrium: false,
            random_seed: 42,
            bound_primals: false,
            bound_big_m: 1e5,
            big_m: 1e5,
        }
    }
}

impl EpecOptions {
    /// Set the wall-clock limit in seconds. Negative values disable it.
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = if seconds > 0.0 { Some(seconds) } else { None };
        self
    }

    /// Choose between indicator constraints and big-M linearizations.
    pub fn with_indicators(mut self, value: bool) -> Self {
        self.indicator_constraints = value;
        self
    }

    /// Set the deviation tolerance.
    pub fn with_deviation_tolerance(mut self, tol: f64) -> Self {
        self.deviation_tolerance = tol;
        self
    }

    /// Request a pure-strategy equilibrium.
    pub fn with_pure_nash(mut self, value: bool) -> Self {
        self.pure_nash_equilibrium = value;
        self
    }
}

/// Statistics of a run, readable through `Epec::get_statistics`.
#[derive(Debug, Clone, Default)]
pub struct EpecStatistics {
    /// Termination status.
    pub status: EpecStatus,

    /// Number of outer iterations performed.
    pub num_iterations: usize,

    /// Wall-clock time of the solve.
    pub wall_clock_time: Duration,

    /// True if numerical issues were detected during any iteration.
    pub numerical_issues: bool,

    /// True if the returned equilibrium is a pure strategy profile.
    pub pure_nash_equilibrium: bool,

    /// Variable count of the last master model.
    pub num_var: usize,

    /// Constraint count of the last master model.
    pub num_constraints: usize,

    /// Nonzero count of the last master model.
    pub num_nonzero: usize,

    /// Complementarities pinned per player at termination.
    pub outer_complementarities: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let opts = EpecOptions::default();
        assert!((opts.deviation_tolerance - 5.1e-4).abs() < 1e-12);
        assert!(opts.indicator_constraints);
        assert_eq!(opts.time_limit, None);
        assert_eq!(opts.random_seed, 42);
        assert!((opts.big_m - 1e5).abs() < 1e-12);
    }

    #[test]
    fn test_negative_time_limit_disables() {
        let opts = EpecOptions::default().with_time_limit(-1.0);
        assert_eq!(opts.time_limit, None);
        let opts = EpecOptions::default().with_time_limit(2.5);
        assert_eq!(opts.time_limit, Some(2.5));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(EpecStatus::NashEqFound.to_string(), "NashEqFound");
        assert_eq!(EpecStatus::Uninitialized.to_string(), "Uninitialized");
    }
}
