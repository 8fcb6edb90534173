//! Branch-and-bound over binary variables.
//!
//! Depth-first search with best-bound pruning and a most-fractional
//! branching rule. Node relaxations drop integrality and enforce an
//! indicator constraint only once its controlling binary is fixed at the
//! active value; an integral candidate that violates an indicator through a
//! merely-integral (not fixed) binary forces a branch on that binary, which
//! keeps the relaxation valid without big-M rows.

use std::time::Instant;

use crate::error::{OptError, OptResult};
use crate::model::{
    Indicator, Model, ObjSense, PoolEntry, Solution, Status, VarType,
};

const INT_TOL: f64 = 1e-6;
const FEAS_TOL: f64 = 1e-7;
const OBJ_TOL: f64 = 1e-9;

/// A bound tightening applied on the path from the root.
#[derive(Debug, Clone, Copy)]
struct BoundFix {
    var: usize,
    lb: f64,
    ub: f64,
}

/// One open node of the search.
#[derive(Debug, Clone)]
struct SearchNode {
    fixes: Vec<BoundFix>,
    depth: usize,
}

impl SearchNode {
    fn root() -> Self {
        Self {
            fixes: Vec::new(),
            depth: 0,
        }
    }

    fn child(&self, fix: BoundFix) -> Self {
        let mut fixes = self.fixes.clone();
        fixes.push(fix);
        Self {
            fixes,
            depth: self.depth + 1,
        }
    }
}

/// Build the continuous relaxation of `model` at a node.
fn node_relaxation(model: &Model, node: &SearchNode) -> Model {
    let mut relax = model.clone();
    relax.indicators.clear();
    for v in &mut relax.vars {
        v.vtype = VarType::Continuous;
    }
    for f in &node.fixes {
        relax.set_var_bounds(f.var, f.lb, f.ub);
    }
    // Indicators whose binary is pinned at the active value become rows.
    for ind in &model.indicators {
        let v = relax.vars[ind.bin];
        if is_fixed_at(v.lb, v.ub, ind.active_value) {
            relax.add_constr(&ind.constr.coefs, ind.constr.sense, ind.constr.rhs);
        }
    }
    relax
}

fn is_fixed_at(lb: f64, ub: f64, active: bool) -> bool {
    let target = if active { 1.0 } else { 0.0 };
    (lb - target).abs() < INT_TOL && (ub - target).abs() < INT_TOL
}

/// A violated indicator whose binary sits at the active value without being
/// fixed there; returns the binary to branch on.
fn violated_indicator(model: &Model, relax: &Model, x: &[f64]) -> Option<usize> {
    for Indicator {
        bin,
        active_value,
        constr,
    } in &model.indicators
    {
        let v = relax.vars[*bin];
        if is_fixed_at(v.lb, v.ub, *active_value) {
            continue; // Enforced as a row already.
        }
        let target = if *active_value { 1.0 } else { 0.0 };
        if (x[*bin] - target).abs() < INT_TOL && constr.violation(x) > FEAS_TOL {
            return Some(*bin);
        }
    }
    None
}

/// Most-fractional unfixed binary, if any.
fn most_fractional(model: &Model, relax: &Model, x: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (j, v) in model.vars.iter().enumerate() {
        if v.vtype != VarType::Binary {
            continue;
        }
        let (lb, ub) = (relax.vars[j].lb, relax.vars[j].ub);
        if (ub - lb).abs() < INT_TOL {
            continue; // Fixed.
        }
        let frac = (x[j] - x[j].round()).abs();
        if frac > INT_TOL {
            let score = 0.5 - (frac - 0.5).abs();
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((j, score));
            }
        }
    }
    best
}

/// Solve a model containing binaries or indicator constraints.
pub(crate) fn solve_mip(model: &Model) -> OptResult<Solution> {
    let start = Instant::now();
    let sense_sign = match model.obj_sense {
        ObjSense::Minimize => 1.0,
        ObjSense::Maximize => -1.0,
    };

    let mut stack = vec![SearchNode::root()];
    let mut incumbent: Option<(Vec<f64>, f64)> = None; // (x, internal obj)
    let mut pool: Vec<PoolEntry> = Vec::new();
    let mut nodes_explored = 0u64;
    let mut hit_time = false;

    while let Some(node) = stack.pop() {
        if let Some(limit) = model.params.time_limit {
            if start.elapsed() >= limit {
                hit_time = true;
                break;
            }
        }
        nodes_explored += 1;

        let relax = node_relaxation(model, &node);
        let sol = relax.optimize()?;
        match sol.status {
            Status::Infeasible => continue,
            Status::Unbounded => {
                // An unbounded node relaxation with a feasible point means
                // the integer problem inherits the ray.
                return Ok(Solution {
                    status: Status::Unbounded,
                    x: sol.x,
                    obj: sense_sign * f64::NEG_INFINITY,
                    duals: None,
                    ray: sol.ray,
                    pool,
                });
            }
            Status::IterLimit => return Err(OptError::IterationLimit("node relaxation")),
            Status::TimeLimit => {
                hit_time = true;
                break;
            }
            Status::Optimal => {}
        }
        let bound = sense_sign * sol.obj;
        if let Some((_, inc)) = &incumbent {
            if bound >= inc - OBJ_TOL {
                continue; // Dominated subtree.
            }
        }

        let branch_var = match most_fractional(model, &relax, &sol.x) {
            Some((j, _)) => Some(j),
            None => violated_indicator(model, &relax, &sol.x),
        };

        match branch_var {
            Some(j) => {
                // Explore the side suggested by the relaxation first (DFS
                // pops last-pushed).
                let zero = node.child(BoundFix {
                    var: j,
                    lb: 0.0,
                    ub: 0.0,
                });
                let one = node.child(BoundFix {
                    var: j,
                    lb: 1.0,
                    ub: 1.0,
                });
                if sol.x[j] >= 0.5 {
                    stack.push(zero);
                    stack.push(one);
                } else {
                    stack.push(one);
                    stack.push(zero);
                }
            }
            None => {
                // Integer feasible with all indicators honored.
                let mut x = sol.x.clone();
                for (j, v) in model.vars.iter().enumerate() {
                    if v.vtype == VarType::Binary {
                        x[j] = x[j].round();
                    }
                }
                let obj_internal = sense_sign * model.eval_objective(&x);
                let duplicate = pool.iter().any(|p| {
                    p.x.iter()
                        .zip(&x)
                        .all(|(a, b)| (a - b).abs() < 1e-7)
                });
                if !duplicate {
                    pool.push(PoolEntry {
                        x: x.clone(),
                        obj: sense_sign * obj_internal,
                    });
                }
                let improved = incumbent
                    .as_ref()
                    .map(|(_, inc)| obj_internal < inc - OBJ_TOL)
                    .unwrap_or(true);
                if improved {
                    if model.params.output_flag {
                        log::debug!(
                            "b&b incumbent {:.6e} after {} nodes",
                            sense_sign * obj_internal,
                            nodes_explored
                        );
                    }
                    incumbent = Some((x, obj_internal));
                }
                if pool.len() >= model.params.solution_limit {
                    break;
                }
            }
        }
    }

    // Best-first pool order in the user's orientation.
    pool.sort_by(|a, b| {
        let ka = sense_sign * a.obj;
        let kb = sense_sign * b.obj;
        ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
    });

    let status = if hit_time {
        Status::TimeLimit
    } else if incumbent.is_some() {
        Status::Optimal
    } else {
        Status::Infeasible
    };
    match incumbent {
        Some((x, obj_internal)) => Ok(Solution {
            status,
            obj: sense_sign * obj_internal,
            x,
            duals: None,
            ray: None,
            pool,
        }),
        None => Ok(Solution {
            status,
            // No usable point: an empty primal keeps has_point() honest.
            x: Vec::new(),
            obj: sense_sign * f64::INFINITY,
            duals: None,
            ray: None,
            pool,
        }),
    }
}
