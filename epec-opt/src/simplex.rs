//! Dense two-phase primal simplex.
//!
//! The models this backend sees are small (tens of variables), so a dense
//! tableau with Bland's rule is the robust choice: no cycling, no basis
//! factorization to maintain, and duals and unbounded rays fall out of the
//! final tableau directly.
//!
//! Internally every problem is rewritten as
//!
//! ```text
//! minimize c~^T x~   subject to  A~ x~ = b~,  x~ >= 0,  b~ >= 0
//! ```
//!
//! by shifting finitely-bounded variables, splitting free variables, turning
//! finite upper bounds into rows, and adding slack/surplus and artificial
//! columns. Phase 1 minimizes the artificial sum; phase 2 the objective.

use crate::error::{OptError, OptResult};
use crate::model::{Model, ObjSense, Sense, Solution, Status};

const PIVOT_TOL: f64 = 1e-9;
const FEAS_TOL: f64 = 1e-7;

/// How a model variable maps into internal columns.
#[derive(Debug, Clone, Copy)]
enum ColMap {
    /// x = lb + x~[col]
    Shifted { col: usize, lb: f64 },
    /// x = x~[pos] - x~[neg]
    Split { pos: usize, neg: usize },
}

/// The standard-form problem plus the bookkeeping needed to map a solution
/// back to the user's variables and constraints.
struct StandardForm {
    /// Tableau rows: coefficients over all internal columns, then rhs.
    rows: Vec<Vec<f64>>,
    /// Internal objective (length = total columns).
    costs: Vec<f64>,
    /// Initial basis column of each row (slack or artificial).
    ident_col: Vec<usize>,
    /// Sign applied to each row during rhs normalization.
    flip: Vec<f64>,
    /// Columns that are artificial.
    artificial: Vec<bool>,
    /// Map from model variables to internal columns.
    col_map: Vec<ColMap>,
    /// Number of original model constraints (leading rows).
    n_orig: usize,
}

fn build_standard_form(model: &Model) -> StandardForm {
    let n = model.vars.len();
    let sign = match model.obj_sense {
        ObjSense::Minimize => 1.0,
        ObjSense::Maximize => -1.0,
    };

    // Assign structural columns and collect bound rows.
    let mut col_map = Vec::with_capacity(n);
    let mut n_struct = 0usize;
    // (coefs over structural cols, sense, rhs) for upper bounds.
    let mut bound_rows: Vec<(Vec<(usize, f64)>, f64)> = Vec::new();
    for v in &model.vars {
        if v.lb.is_finite() {
            let col = n_struct;
            n_struct += 1;
            col_map.push(ColMap::Shifted { col, lb: v.lb });
            if v.ub.is_finite() {
                bound_rows.push((vec![(col, 1.0)], v.ub - v.lb));
            }
        } else {
            let pos = n_struct;
            let neg = n_struct + 1;
            n_struct += 2;
            col_map.push(ColMap::Split { pos, neg });
            if v.ub.is_finite() {
                bound_rows.push((vec![(pos, 1.0), (neg, -1.0)], v.ub));
            }
        }
    }

    // Structural costs.
    let mut costs = vec![0.0; n_struct];
    for (v, &cm) in model.vars.iter().zip(&col_map) {
        let c = sign * v.obj;
        match cm {
            ColMap::Shifted { col, .. } => costs[col] += c,
            ColMap::Split { pos, neg } => {
                costs[pos] += c;
                costs[neg] -= c;
            }
        }
    }

    // Collect rows: original constraints (rhs shifted by lower bounds),
    // then bound rows (all <=).
    struct RawRow {
        coefs: Vec<(usize, f64)>,
        sense: Sense,
        rhs: f64,
    }
    let mut raw: Vec<RawRow> = Vec::new();
    for c in &model.constrs {
        let mut coefs = Vec::with_capacity(c.coefs.len() + 1);
        let mut rhs = c.rhs;
        for &(j, a) in &c.coefs {
            match col_map[j] {
                ColMap::Shifted { col, lb } => {
                    coefs.push((col, a));
                    rhs -= a * lb;
                }
                ColMap::Split { pos, neg } => {
                    coefs.push((pos, a));
                    coefs.push((neg, -a));
                }
            }
        }
        raw.push(RawRow {
            coefs,
            sense: c.sense,
            rhs,
        });
    }
    let n_orig = raw.len();
    for (coefs, rhs) in bound_rows {
        raw.push(RawRow {
            coefs,
            sense: Sense::Less,
            rhs,
        });
    }

    // Normalize rhs signs, then add slack/surplus and artificial columns.
    let m = raw.len();
    let mut flip = vec![1.0; m];
    for (i, r) in raw.iter_mut().enumerate() {
        if r.rhs < 0.0 {
            flip[i] = -1.0;
            r.rhs = -r.rhs;
            for (_, a) in r.coefs.iter_mut() {
                *a = -*a;
            }
            r.sense = match r.sense {
                Sense::Less => Sense::Greater,
                Sense::Greater => Sense::Less,
                Sense::Equal => Sense::Equal,
            };
        }
    }

    // Column counting: slack/surplus first, then artificials.
    let mut total = n_struct;
    let mut slack_col = vec![None; m];
    for (i, r) in raw.iter().enumerate() {
        match r.sense {
            Sense::Less | Sense::Greater => {
                slack_col[i] = Some(total);
                total += 1;
            }
            Sense::Equal => {}
        }
    }
    let mut ident_col = vec![0usize; m];
    let mut art_of_row = vec![None; m];
    for (i, r) in raw.iter().enumerate() {
        match r.sense {
            Sense::Less => ident_col[i] = slack_col[i].unwrap(),
            Sense::Greater | Sense::Equal => {
                art_of_row[i] = Some(total);
                ident_col[i] = total;
                total += 1;
            }
        }
    }

    let mut artificial = vec![false; total];
    for a in art_of_row.iter().flatten() {
        artificial[*a] = true;
    }
    costs.resize(total, 0.0);

    let mut rows = Vec::with_capacity(m);
    for (i, r) in raw.iter().enumerate() {
        let mut row = vec![0.0; total + 1];
        for &(j, a) in &r.coefs {
            row[j] += a;
        }
        if let Some(s) = slack_col[i] {
            row[s] = match r.sense {
                Sense::Less => 1.0,
                Sense::Greater => -1.0,
                Sense::Equal => unreachable!(),
            };
        }
        if let Some(a) = art_of_row[i] {
            row[a] = 1.0;
        }
        row[total] = r.rhs;
        rows.push(row);
    }

    StandardForm {
        rows,
        costs,
        ident_col,
        flip,
        artificial,
        col_map,
        n_orig,
    }
}

enum CoreOutcome {
    Optimal,
    /// Entering column with no blocking row.
    Unbounded(usize),
    IterLimit,
}

/// Run Bland-rule simplex iterations on the tableau in place.
///
/// `costs` is the objective used for pricing; `enterable` masks columns
/// allowed to enter the basis.
fn simplex_core(
    rows: &mut [Vec<f64>],
    basis: &mut [usize],
    costs: &[f64],
    enterable: &[bool],
    max_iter: usize,
) -> CoreOutcome {
    let m = rows.len();
    let total = costs.len();
    for _ in 0..max_iter {
        // Reduced costs via y = c_B^T B^-1 applied column-wise.
        let mut entering = None;
        for j in 0..total {
            if !enterable[j] || basis.contains(&j) {
                continue;
            }
            let mut r = costs[j];
            for k in 0..m {
                r -= costs[basis[k]] * rows[k][j];
            }
            if r < -PIVOT_TOL {
                entering = Some(j);
                break; // Bland: first improving index.
            }
        }
        let Some(j) = entering else {
            return CoreOutcome::Optimal;
        };

        // Ratio test, Bland tie-break on the leaving variable index.
        let mut leave: Option<(usize, f64)> = None;
        for k in 0..m {
            if rows[k][j] > PIVOT_TOL {
                let ratio = rows[k][total] / rows[k][j];
                match leave {
                    None => leave = Some((k, ratio)),
                    Some((bk, br)) => {
                        if ratio < br - PIVOT_TOL
                            || ((ratio - br).abs() <= PIVOT_TOL && basis[k] < basis[bk])
                        {
                            leave = Some((k, ratio));
                        }
                    }
                }
            }
        }
        let Some((k, _)) = leave else {
            return CoreOutcome::Unbounded(j);
        };
        pivot(rows, k, j);
        basis[k] = j;
    }
    CoreOutcome::IterLimit
}

fn pivot(rows: &mut [Vec<f64>], k: usize, j: usize) {
    let piv = rows[k][j];
    for a in rows[k].iter_mut() {
        *a /= piv;
    }
    let pivot_row = rows[k].clone();
    for (i, row) in rows.iter_mut().enumerate() {
        if i == k {
            continue;
        }
        let factor = row[j];
        if factor.abs() > 0.0 {
            for (a, p) in row.iter_mut().zip(&pivot_row) {
                *a -= factor * p;
            }
            row[j] = 0.0;
        }
    }
}

/// Solve a continuous LP model.
pub(crate) fn solve_lp_model(model: &Model) -> OptResult<Solution> {
    let n = model.vars.len();
    let sf = build_standard_form(model);
    let m = sf.rows.len();
    let total = sf.costs.len();
    let max_iter = 200 * (m + total + 10);

    let mut rows = sf.rows;
    let mut basis = sf.ident_col.clone();

    // Phase 1: minimize the artificial sum.
    let have_artificials = sf.artificial.iter().any(|&a| a);
    if have_artificials {
        let ph1_costs: Vec<f64> = sf
            .artificial
            .iter()
            .map(|&a| if a { 1.0 } else { 0.0 })
            .collect();
        let enterable = vec![true; total];
        match simplex_core(&mut rows, &mut basis, &ph1_costs, &enterable, max_iter) {
            CoreOutcome::Optimal => {}
            CoreOutcome::Unbounded(_) => {
                return Err(OptError::Numerical(
                    "phase-1 objective unbounded".to_string(),
                ))
            }
            CoreOutcome::IterLimit => return Err(OptError::IterationLimit("simplex phase 1")),
        }
        let infeas: f64 = basis
            .iter()
            .enumerate()
            .filter(|(_, &b)| sf.artificial[b])
            .map(|(k, _)| rows[k][total])
            .sum();
        if infeas > FEAS_TOL {
            if model.params.output_flag {
                log::debug!("simplex: infeasible, phase-1 objective {:.3e}", infeas);
            }
            return Ok(Solution::infeasible(n));
        }
        // Drive basic artificials out where possible; rows where no pivot
        // exists are redundant and stay inert with the artificial at zero.
        for k in 0..m {
            if sf.artificial[basis[k]] {
                if let Some(j) =
                    (0..total).find(|&j| !sf.artificial[j] && rows[k][j].abs() > PIVOT_TOL)
                {
                    pivot(&mut rows, k, j);
                    basis[k] = j;
                }
            }
        }
    }

    // Phase 2: the real objective, artificials barred from entering.
    let enterable: Vec<bool> = sf.artificial.iter().map(|&a| !a).collect();
    let outcome = simplex_core(&mut rows, &mut basis, &sf.costs, &enterable, max_iter);

    let extract_x = |rows: &[Vec<f64>], basis: &[usize]| -> Vec<f64> {
        let mut xt = vec![0.0; total];
        for k in 0..m {
            xt[basis[k]] = rows[k][total];
        }
        let mut x = vec![0.0; n];
        for (j, &cm) in sf.col_map.iter().enumerate() {
            x[j] = match cm {
                ColMap::Shifted { col, lb } => lb + xt[col],
                ColMap::Split { pos, neg } => xt[pos] - xt[neg],
            };
        }
        x
    };

    match outcome {
        CoreOutcome::Optimal => {
            let x = extract_x(&rows, &basis);
            let obj = model.eval_objective(&x);

            // Duals from the identity columns of the final tableau:
            // y = c_B^T B^-1, mapped through the row sign normalization.
            let dual_sign = match model.obj_sense {
                ObjSense::Minimize => 1.0,
                ObjSense::Maximize => -1.0,
            };
            let mut duals = vec![0.0; sf.n_orig];
            for (i, d) in duals.iter_mut().enumerate() {
                let mut y = 0.0;
                for k in 0..m {
                    y += sf.costs[basis[k]] * rows[k][sf.ident_col[i]];
                }
                *d = dual_sign * sf.flip[i] * y;
            }
            Ok(Solution {
                status: Status::Optimal,
                x,
                obj,
                duals: Some(duals),
                ray: None,
                pool: Vec::new(),
            })
        }
        CoreOutcome::Unbounded(j) => {
            // Direction: entering column j grows, basics adjust.
            let mut dt = vec![0.0; total];
            dt[j] = 1.0;
            for k in 0..m {
                dt[basis[k]] = -rows[k][j];
            }
            let mut ray = vec![0.0; n];
            for (v, &cm) in ray.iter_mut().zip(&sf.col_map) {
                *v = match cm {
                    ColMap::Shifted { col, .. } => dt[col],
                    ColMap::Split { pos, neg } => dt[pos] - dt[neg],
                };
            }
            let x = extract_x(&rows, &basis);
            Ok(Solution {
                status: Status::Unbounded,
                obj: match model.obj_sense {
                    ObjSense::Minimize => f64::NEG_INFINITY,
                    ObjSense::Maximize => f64::INFINITY,
                },
                x,
                duals: None,
                ray: Some(ray),
                pool: Vec::new(),
            })
        }
        CoreOutcome::IterLimit => {
            let x = extract_x(&rows, &basis);
            let obj = model.eval_objective(&x);
            Ok(Solution {
                status: Status::IterLimit,
                x,
                obj,
                duals: None,
                ray: None,
                pool: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Env, ObjSense, Sense, Status, VarType};

    #[test]
    fn test_basic_lp() {
        // min -x - 2y s.t. x + y <= 4, x <= 2, x,y >= 0 -> (2, 2), obj -6.
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, f64::INFINITY, -1.0, VarType::Continuous);
        let y = m.add_var(0.0, f64::INFINITY, -2.0, VarType::Continuous);
        m.add_constr(&[(x, 1.0), (y, 1.0)], Sense::Less, 4.0);
        m.add_constr(&[(x, 1.0)], Sense::Less, 2.0);
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.obj + 6.0).abs() < 1e-7);
        assert!((sol.x[x] - 2.0).abs() < 1e-7);
        assert!((sol.x[y] - 2.0).abs() < 1e-7);
    }

    #[test]
    fn test_equality_and_free_vars() {
        // min x + y s.t. x + y = 1, x free, y >= 0 -> unbounded? No:
        // obj = x + y = 1 on the feasible line, so any point is optimal.
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(f64::NEG_INFINITY, f64::INFINITY, 1.0, VarType::Continuous);
        let y = m.add_var(0.0, f64::INFINITY, 1.0, VarType::Continuous);
        m.add_constr(&[(x, 1.0), (y, 1.0)], Sense::Equal, 1.0);
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.obj - 1.0).abs() < 1e-7);
    }

    #[test]
    fn test_infeasible() {
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, f64::INFINITY, 1.0, VarType::Continuous);
        m.add_constr(&[(x, 1.0)], Sense::Less, -1.0);
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Infeasible);
    }

    #[test]
    fn test_unbounded_with_ray() {
        // min -x, x >= 0, no constraints.
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, f64::INFINITY, -1.0, VarType::Continuous);
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Unbounded);
        let ray = sol.ray.unwrap();
        assert!(ray[x] > 0.5);
    }

    #[test]
    fn test_duals_of_binding_rows() {
        // min -x s.t. x <= 3: dual of the row is d(obj)/d(rhs) = -1.
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, f64::INFINITY, -1.0, VarType::Continuous);
        m.add_constr(&[(x, 1.0)], Sense::Less, 3.0);
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        let duals = sol.duals.unwrap();
        assert!((duals[0] + 1.0).abs() < 1e-7, "dual = {}", duals[0]);
    }

    #[test]
    fn test_duals_max_orientation() {
        // max x s.t. x <= 3: dual = +1 in the user's orientation.
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
        m.add_constr(&[(x, 1.0)], Sense::Less, 3.0);
        m.set_objective(&[(x, 1.0)], ObjSense::Maximize);
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.obj - 3.0).abs() < 1e-7);
        let duals = sol.duals.unwrap();
        assert!((duals[0] - 1.0).abs() < 1e-7, "dual = {}", duals[0]);
    }

    #[test]
    fn test_negative_lower_bound() {
        // min x, -5 <= x <= 5 -> x = -5.
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(-5.0, 5.0, 1.0, VarType::Continuous);
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.x[x] + 5.0).abs() < 1e-7);
    }

    #[test]
    fn test_greater_sense_rows() {
        // min x + y s.t. x + 2y >= 4, x >= 0, y >= 0 -> (0, 2), obj 2.
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, f64::INFINITY, 1.0, VarType::Continuous);
        let y = m.add_var(0.0, f64::INFINITY, 1.0, VarType::Continuous);
        m.add_constr(&[(x, 1.0), (y, 2.0)], Sense::Greater, 4.0);
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.obj - 2.0).abs() < 1e-7);
        assert!((sol.x[y] - 2.0).abs() < 1e-7);
    }
}
