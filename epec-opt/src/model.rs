//! Model-building API.
//!
//! A [`Model`] is a mutable description of an LP / MILP / convex MIQP:
//! variables with bounds and types, linear constraints, indicator
//! constraints, and a linear or convex quadratic objective. Solving is
//! dispatched to the simplex, Lemke, or branch-and-bound routines depending
//! on what the model contains.
//!
//! Models are short-lived: they are created from an [`Env`], mutated, solved
//! and dropped. The environment only carries default solve parameters.

use std::time::Duration;

use sprs::CsMat;

use crate::branch;
use crate::error::{OptError, OptResult};
use crate::lemke;
use crate::simplex;

/// Variable type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    /// Continuous variable.
    Continuous,
    /// Binary variable (0 or 1).
    Binary,
}

/// Constraint sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    /// a^T x <= rhs
    Less,
    /// a^T x = rhs
    Equal,
    /// a^T x >= rhs
    Greater,
}

/// Objective sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjSense {
    /// Minimize the objective.
    Minimize,
    /// Maximize the objective.
    Maximize,
}

/// Termination status of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Optimal solution found.
    Optimal,
    /// The model is infeasible.
    Infeasible,
    /// The model is unbounded (a ray is available).
    Unbounded,
    /// Wall-clock limit hit; the incumbent (if any) is returned.
    TimeLimit,
    /// Pivoting iteration cap hit.
    IterLimit,
}

/// A variable with bounds and an objective coefficient.
#[derive(Debug, Clone, Copy)]
pub struct Var {
    /// Lower bound (may be `f64::NEG_INFINITY`).
    pub lb: f64,
    /// Upper bound (may be `f64::INFINITY`).
    pub ub: f64,
    /// Linear objective coefficient.
    pub obj: f64,
    /// Variable type.
    pub vtype: VarType,
}

/// A linear constraint.
#[derive(Debug, Clone)]
pub struct LinConstr {
    /// Sparse coefficients as (variable, value) pairs.
    pub coefs: Vec<(usize, f64)>,
    /// Constraint sense.
    pub sense: Sense,
    /// Right-hand side.
    pub rhs: f64,
}

impl LinConstr {
    /// Evaluate the violation of this constraint at `x` (positive = violated).
    pub fn violation(&self, x: &[f64]) -> f64 {
        let lhs: f64 = self.coefs.iter().map(|&(j, a)| a * x[j]).sum();
        match self.sense {
            Sense::Less => lhs - self.rhs,
            Sense::Greater => self.rhs - lhs,
            Sense::Equal => (lhs - self.rhs).abs(),
        }
    }
}

/// An indicator constraint: `bin = active_value` implies a linear constraint.
#[derive(Debug, Clone)]
pub struct Indicator {
    /// Controlling binary variable.
    pub bin: usize,
    /// Value of the binary that activates the constraint.
    pub active_value: bool,
    /// The implied linear constraint.
    pub constr: LinConstr,
}

/// Per-solve parameters, inherited from the [`Env`] and overridable per model.
#[derive(Debug, Clone)]
pub struct SolveParams {
    /// Wall-clock limit for this solve.
    pub time_limit: Option<Duration>,
    /// Thread-count hint. The backend is single-threaded; the hint is kept
    /// so callers can pass it through unchanged.
    pub threads: usize,
    /// Emit per-solve debug logging.
    pub output_flag: bool,
    /// Keep infeasible/unbounded outcomes distinguishable. The backend
    /// always distinguishes them; the flag is accepted for compatibility.
    pub dual_reductions: bool,
    /// Stop branch-and-bound after this many pool entries.
    pub solution_limit: usize,
    /// Seed for randomized tie-breaking. Tie-breaking here is
    /// deterministic; the seed is stored so repeated runs report it.
    pub random_seed: u64,
}

impl Default for SolveParams {
    fn default() -> Self {
        Self {
            time_limit: None,
            threads: 0,
            output_flag: false,
            dual_reductions: true,
            solution_limit: 32,
            random_seed: 42,
        }
    }
}

/// Scoped solver environment.
///
/// Holds the default [`SolveParams`] handed to every model created from it.
/// One environment is created per engine and dropped with it.
#[derive(Debug, Clone, Default)]
pub struct Env {
    params: SolveParams,
}

impl Env {
    /// Create an environment with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an environment with the given defaults.
    pub fn with_params(params: SolveParams) -> Self {
        Self { params }
    }

    /// Default parameters for models of this environment.
    pub fn params(&self) -> &SolveParams {
        &self.params
    }

    /// Mutable access to the default parameters.
    pub fn params_mut(&mut self) -> &mut SolveParams {
        &mut self.params
    }

    /// Create an empty model inheriting this environment's parameters.
    pub fn model(&self) -> Model {
        Model {
            vars: Vec::new(),
            constrs: Vec::new(),
            indicators: Vec::new(),
            quad: None,
            obj_sense: ObjSense::Minimize,
            params: self.params.clone(),
        }
    }
}

/// One entry of the solution pool.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    /// Primal values.
    pub x: Vec<f64>,
    /// Objective value.
    pub obj: f64,
}

/// Result of [`Model::optimize`].
#[derive(Debug, Clone)]
pub struct Solution {
    /// Termination status.
    pub status: Status,
    /// Primal values (empty if no point is available).
    pub x: Vec<f64>,
    /// Objective value at `x` (meaningless unless a point is available).
    pub obj: f64,
    /// Constraint duals, reported as d(obj)/d(rhs) in the user's
    /// orientation. Only available for continuous LPs.
    pub duals: Option<Vec<f64>>,
    /// Unbounded ray (only when `status == Unbounded`).
    pub ray: Option<Vec<f64>>,
    /// Feasible integer points encountered during branch-and-bound,
    /// best first. Empty for continuous models.
    pub pool: Vec<PoolEntry>,
}

impl Solution {
    /// True if a usable primal point is available.
    pub fn has_point(&self) -> bool {
        matches!(self.status, Status::Optimal)
            || (matches!(self.status, Status::TimeLimit | Status::IterLimit)
                && !self.x.is_empty())
    }

    pub(crate) fn infeasible(n: usize) -> Self {
        Self {
            status: Status::Infeasible,
            x: vec![0.0; n],
            obj: f64::INFINITY,
            duals: None,
            ray: None,
            pool: Vec::new(),
        }
    }
}

/// An optimization model.
#[derive(Debug, Clone)]
pub struct Model {
    pub(crate) vars: Vec<Var>,
    pub(crate) constrs: Vec<LinConstr>,
    pub(crate) indicators: Vec<Indicator>,
    /// Optional quadratic objective term (1/2) x^T Q x, Q symmetric PSD.
    pub(crate) quad: Option<CsMat<f64>>,
    pub(crate) obj_sense: ObjSense,
    /// Solve parameters for this model.
    pub params: SolveParams,
}

impl Model {
    /// Add a variable, returning its index.
    pub fn add_var(&mut self, lb: f64, ub: f64, obj: f64, vtype: VarType) -> usize {
        let (lb, ub) = match vtype {
            VarType::Binary => (lb.max(0.0), ub.min(1.0)),
            VarType::Continuous => (lb, ub),
        };
        self.vars.push(Var { lb, ub, obj, vtype });
        self.vars.len() - 1
    }

    /// Add a linear constraint, returning its row index.
    pub fn add_constr(&mut self, coefs: &[(usize, f64)], sense: Sense, rhs: f64) -> usize {
        self.constrs.push(LinConstr {
            coefs: coefs.to_vec(),
            sense,
            rhs,
        });
        self.constrs.len() - 1
    }

    /// Add an indicator constraint: `bin = active_value` implies the
    /// given linear constraint.
    pub fn add_indicator(
        &mut self,
        bin: usize,
        active_value: bool,
        coefs: &[(usize, f64)],
        sense: Sense,
        rhs: f64,
    ) {
        self.indicators.push(Indicator {
            bin,
            active_value,
            constr: LinConstr {
                coefs: coefs.to_vec(),
                sense,
                rhs,
            },
        });
    }

    /// Replace the objective with the given linear function.
    ///
    /// Any quadratic term is cleared, matching the convention that setting
    /// an objective replaces the previous one entirely.
    pub fn set_objective(&mut self, coefs: &[(usize, f64)], sense: ObjSense) {
        for v in &mut self.vars {
            v.obj = 0.0;
        }
        for &(j, a) in coefs {
            self.vars[j].obj += a;
        }
        self.quad = None;
        self.obj_sense = sense;
    }

    /// Add a quadratic term (1/2) x^T Q x on top of the current linear
    /// objective. `Q` is the full symmetric matrix (both triangles), must
    /// be positive semidefinite, and is only supported for minimization.
    pub fn set_quadratic_objective(&mut self, q: CsMat<f64>) {
        self.quad = Some(q);
        self.obj_sense = ObjSense::Minimize;
    }

    /// Update the bounds of a variable.
    pub fn set_var_bounds(&mut self, var: usize, lb: f64, ub: f64) {
        self.vars[var].lb = lb;
        self.vars[var].ub = ub;
    }

    /// Fix a variable to a value.
    pub fn fix_var(&mut self, var: usize, val: f64) {
        self.set_var_bounds(var, val, val);
    }

    /// Number of variables.
    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    /// Number of linear constraints (excluding indicators).
    pub fn num_constrs(&self) -> usize {
        self.constrs.len()
    }

    /// Number of nonzero coefficients across linear constraints.
    pub fn num_nonzeros(&self) -> usize {
        self.constrs.iter().map(|c| c.coefs.len()).sum()
    }

    /// True if the model has binary variables or indicator constraints.
    pub fn is_mip(&self) -> bool {
        !self.indicators.is_empty() || self.vars.iter().any(|v| v.vtype == VarType::Binary)
    }

    /// Objective value of the model at a point, in the user's orientation.
    pub fn eval_objective(&self, x: &[f64]) -> f64 {
        let mut val: f64 = self.vars.iter().zip(x).map(|(v, xi)| v.obj * xi).sum();
        if let Some(ref q) = self.quad {
            let mut quad = 0.0;
            for (v, (i, j)) in q.iter() {
                quad += v * x[i] * x[j];
            }
            val += 0.5 * quad;
        }
        val
    }

    /// Linear objective coefficients, in the user's orientation.
    pub fn objective_coefs(&self) -> Vec<f64> {
        self.vars.iter().map(|v| v.obj).collect()
    }

    /// Build the feasibility relaxation of this model: every linear
    /// constraint gets a nonnegative violation slack and the objective
    /// becomes the total violation.
    ///
    /// Indicator constraints are not relaxed; bounds are kept.
    pub fn feas_relax(&self) -> Model {
        let mut relaxed = self.clone();
        relaxed.quad = None;
        for v in &mut relaxed.vars {
            v.obj = 0.0;
        }
        relaxed.obj_sense = ObjSense::Minimize;
        let base = relaxed.vars.len();
        for i in 0..relaxed.constrs.len() {
            let s = relaxed.add_var(0.0, f64::INFINITY, 1.0, VarType::Continuous);
            debug_assert!(s >= base);
            match relaxed.constrs[i].sense {
                Sense::Less => relaxed.constrs[i].coefs.push((s, -1.0)),
                Sense::Greater => relaxed.constrs[i].coefs.push((s, 1.0)),
                Sense::Equal => {
                    // One slack in each direction.
                    relaxed.constrs[i].coefs.push((s, -1.0));
                    let s2 = relaxed.add_var(0.0, f64::INFINITY, 1.0, VarType::Continuous);
                    relaxed.constrs[i].coefs.push((s2, 1.0));
                }
            }
        }
        relaxed
    }

    fn validate(&self) -> OptResult<()> {
        let n = self.vars.len();
        for (r, c) in self.constrs.iter().enumerate() {
            for &(j, _) in &c.coefs {
                if j >= n {
                    return Err(OptError::InvalidModel(format!(
                        "constraint {} references variable {} but model has {}",
                        r, j, n
                    )));
                }
            }
        }
        for ind in &self.indicators {
            if ind.bin >= n {
                return Err(OptError::InvalidModel(format!(
                    "indicator references variable {} but model has {}",
                    ind.bin, n
                )));
            }
            if self.vars[ind.bin].vtype != VarType::Binary {
                return Err(OptError::InvalidModel(format!(
                    "indicator variable {} is not binary",
                    ind.bin
                )));
            }
            for &(j, _) in &ind.constr.coefs {
                if j >= n {
                    return Err(OptError::InvalidModel(format!(
                        "indicator constraint references variable {} but model has {}",
                        j, n
                    )));
                }
            }
        }
        if let Some(ref q) = self.quad {
            if q.rows() != n || q.cols() != n {
                return Err(OptError::InvalidModel(format!(
                    "quadratic term is {}x{} but model has {} variables",
                    q.rows(),
                    q.cols(),
                    n
                )));
            }
        }
        for (j, v) in self.vars.iter().enumerate() {
            if v.lb > v.ub + 1e-12 {
                // Empty variable domain: the model is trivially infeasible,
                // reported through optimize() rather than as an error.
                log::debug!("variable {} has empty domain [{}, {}]", j, v.lb, v.ub);
            }
        }
        Ok(())
    }

    /// Solve the model.
    pub fn optimize(&self) -> OptResult<Solution> {
        self.validate()?;
        if self.vars.iter().any(|v| v.lb > v.ub + 1e-12) {
            return Ok(Solution::infeasible(self.vars.len()));
        }
        if self.is_mip() {
            branch::solve_mip(self)
        } else if self.quad.is_some() {
            lemke::solve_qp_model(self)
        } else {
            simplex::solve_lp_model(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feas_relax_measures_violation() {
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
        // x <= 1 and x >= 3 is infeasible by 2.
        m.add_constr(&[(x, 1.0)], Sense::Less, 1.0);
        m.add_constr(&[(x, 1.0)], Sense::Greater, 3.0);

        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Infeasible);

        let relaxed = m.feas_relax();
        let sol = relaxed.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.obj - 2.0).abs() < 1e-7, "total violation = {}", sol.obj);
    }

    #[test]
    fn test_empty_var_domain_is_infeasible() {
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, f64::INFINITY, 1.0, VarType::Continuous);
        m.fix_var(x, 2.0);
        m.set_var_bounds(x, 3.0, 2.0);
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Infeasible);
    }

    #[test]
    fn test_set_objective_replaces() {
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, 10.0, 5.0, VarType::Continuous);
        m.set_objective(&[(x, 1.0)], ObjSense::Maximize);
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.x[x] - 10.0).abs() < 1e-7);
        assert!((sol.obj - 10.0).abs() < 1e-7);
    }
}
