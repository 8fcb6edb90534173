//! Convex QP via Lemke complementary pivoting.
//!
//! A continuous QP with PSD quadratic term is solved through its KKT
//! conditions, which form a linear complementarity problem
//!
//! ```text
//! w = M z + q >= 0,  z >= 0,  z^T w = 0,
//! M = [[Q, G^T], [-G, 0]],  q = [c; h]
//! ```
//!
//! for the inequality form `G x <= h, x >= 0`. Lemke's algorithm with a unit
//! covering ray either produces a complementary basis or terminates on a
//! secondary ray, which for this block structure means the QP is infeasible
//! or unbounded; the two are told apart with an LP probe.

use crate::error::{OptError, OptResult};
use crate::model::{Model, ObjSense, Sense, Solution, Status};

const PIVOT_TOL: f64 = 1e-9;

/// Outcome of a raw LCP solve.
pub(crate) enum LcpOutcome {
    /// Complementary solution found.
    Solved(Vec<f64>),
    /// Secondary ray termination (no solution for copositive-plus M).
    Ray,
}

/// Solve `w = M z + q, w,z >= 0, z^T w = 0` by Lemke's method.
///
/// `m` is dense row-major, square.
pub(crate) fn solve_lcp(m: &[Vec<f64>], q: &[f64], max_iter: usize) -> OptResult<LcpOutcome> {
    let n = q.len();
    if n == 0 {
        return Ok(LcpOutcome::Solved(Vec::new()));
    }

    // Trivial solution.
    if q.iter().all(|&v| v >= -PIVOT_TOL) {
        return Ok(LcpOutcome::Solved(vec![0.0; n]));
    }

    // Tableau columns: w_0..w_{n-1}, z_0..z_{n-1}, z0, rhs.
    // Rows represent w - M z - e z0 = q with basis starting at w.
    let cols = 2 * n + 2;
    let z0 = 2 * n;
    let rhs = 2 * n + 1;
    let mut t = vec![vec![0.0; cols]; n];
    for i in 0..n {
        t[i][i] = 1.0;
        for j in 0..n {
            t[i][n + j] = -m[i][j];
        }
        t[i][z0] = -1.0;
        t[i][rhs] = q[i];
    }
    let mut basis: Vec<usize> = (0..n).collect();

    // First pivot: z0 enters on the most negative rhs row.
    let mut r = 0;
    for i in 1..n {
        if t[i][rhs] < t[r][rhs] {
            r = i;
        }
    }
    let mut driving = complement(basis[r], n);
    pivot(&mut t, r, z0);
    basis[r] = z0;

    for _ in 0..max_iter {
        // Ratio test on the driving column.
        let mut leave: Option<usize> = None;
        for k in 0..n {
            if t[k][driving] > PIVOT_TOL {
                let ratio = t[k][rhs] / t[k][driving];
                match leave {
                    None => leave = Some(k),
                    Some(bk) => {
                        let best = t[bk][rhs] / t[bk][driving];
                        // Prefer letting z0 leave on ties so the run ends.
                        if ratio < best - PIVOT_TOL
                            || (ratio <= best + PIVOT_TOL && basis[k] == z0)
                        {
                            leave = Some(k);
                        }
                    }
                }
            }
        }
        let Some(k) = leave else {
            return Ok(LcpOutcome::Ray);
        };
        let leaving = basis[k];
        pivot(&mut t, k, driving);
        basis[k] = driving;
        if leaving == z0 {
            // Complementary basis reached.
            let mut z = vec![0.0; n];
            for (row, &b) in basis.iter().enumerate() {
                if b >= n && b < 2 * n {
                    z[b - n] = t[row][rhs];
                }
            }
            return Ok(LcpOutcome::Solved(z));
        }
        driving = complement(leaving, n);
    }
    Err(OptError::IterationLimit("lemke"))
}

/// Complement of a w/z column index.
fn complement(col: usize, n: usize) -> usize {
    if col < n {
        col + n
    } else {
        col - n
    }
}

fn pivot(t: &mut [Vec<f64>], k: usize, j: usize) {
    let piv = t[k][j];
    for a in t[k].iter_mut() {
        *a /= piv;
    }
    let pivot_row = t[k].clone();
    for (i, row) in t.iter_mut().enumerate() {
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

/// Affine map from internal nonnegative variables to model variables:
/// x = S x~ + shift, where free variables are split.
struct VarMap {
    /// For each model var: (positive column, optional negative column, shift).
    map: Vec<(usize, Option<usize>, f64)>,
    /// Internal column count.
    n_int: usize,
}

fn build_var_map(model: &Model) -> VarMap {
    let mut map = Vec::with_capacity(model.vars.len());
    let mut n_int = 0;
    for v in &model.vars {
        if v.lb.is_finite() {
            map.push((n_int, None, v.lb));
            n_int += 1;
        } else {
            map.push((n_int, Some(n_int + 1), 0.0));
            n_int += 2;
        }
    }
    VarMap { map, n_int }
}

/// Solve a continuous convex QP model through Lemke's algorithm.
pub(crate) fn solve_qp_model(model: &Model) -> OptResult<Solution> {
    if model.obj_sense == ObjSense::Maximize {
        return Err(OptError::Unsupported(
            "quadratic maximization is not supported".to_string(),
        ));
    }
    let n = model.vars.len();
    let Some(quad) = model.quad.as_ref() else {
        return Err(OptError::InvalidModel(
            "QP path invoked without a quadratic term".to_string(),
        ));
    };
    let vm = build_var_map(model);
    let ni = vm.n_int;

    // Dense Q over model vars. The model stores the full symmetric matrix;
    // averaging repairs any residual asymmetry.
    let mut qd = vec![vec![0.0; n]; n];
    for (v, (i, j)) in quad.iter() {
        qd[i][j] += *v;
    }
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (qd[i][j] + qd[j][i]);
            qd[i][j] = avg;
            qd[j][i] = avg;
        }
    }

    // Q~ = S^T Q S and c~ = S^T (c + Q * shift) for x = S x~ + shift.
    let shift: Vec<f64> = vm.map.iter().map(|&(_, _, s)| s).collect();
    let mut c_shift = vec![0.0; n];
    for i in 0..n {
        let mut acc = model.vars[i].obj;
        for j in 0..n {
            acc += qd[i][j] * shift[j];
        }
        c_shift[i] = acc;
    }
    let mut qt = vec![vec![0.0; ni]; ni];
    let mut ct = vec![0.0; ni];
    let col_sign = |i: usize| -> Vec<(usize, f64)> {
        let (p, neg, _) = vm.map[i];
        match neg {
            None => vec![(p, 1.0)],
            Some(nc) => vec![(p, 1.0), (nc, -1.0)],
        }
    };
    for i in 0..n {
        for (ci, si) in col_sign(i) {
            ct[ci] += si * c_shift[i];
            for j in 0..n {
                if qd[i][j] != 0.0 {
                    for (cj, sj) in col_sign(j) {
                        qt[ci][cj] += si * sj * qd[i][j];
                    }
                }
            }
        }
    }

    // Inequality rows G x~ <= h: model constraints (= becomes two rows)
    // plus finite upper bounds.
    let mut g: Vec<Vec<f64>> = Vec::new();
    let mut h: Vec<f64> = Vec::new();
    let mut push_row = |coefs: &[(usize, f64)], rhs: f64, negate: bool| {
        let s = if negate { -1.0 } else { 1.0 };
        let mut row = vec![0.0; ni];
        let mut r = s * rhs;
        for &(j, a) in coefs {
            let (p, neg, sh) = vm.map[j];
            row[p] += s * a;
            if let Some(nc) = neg {
                row[nc] -= s * a;
            }
            r -= s * a * sh;
        }
        g.push(row);
        h.push(r);
    };
    for c in &model.constrs {
        match c.sense {
            Sense::Less => push_row(&c.coefs, c.rhs, false),
            Sense::Greater => push_row(&c.coefs, c.rhs, true),
            Sense::Equal => {
                push_row(&c.coefs, c.rhs, false);
                push_row(&c.coefs, c.rhs, true);
            }
        }
    }
    for (j, v) in model.vars.iter().enumerate() {
        if v.ub.is_finite() {
            push_row(&[(j, 1.0)], v.ub, false);
        }
    }
    let mi = g.len();

    // LCP blocks.
    let dim = ni + mi;
    let mut lm = vec![vec![0.0; dim]; dim];
    let mut lq = vec![0.0; dim];
    for i in 0..ni {
        for j in 0..ni {
            lm[i][j] = qt[i][j];
        }
        for (r, row) in g.iter().enumerate() {
            lm[i][ni + r] = row[i];
        }
        lq[i] = ct[i];
    }
    for (r, row) in g.iter().enumerate() {
        for j in 0..ni {
            lm[ni + r][j] = -row[j];
        }
        lq[ni + r] = h[r];
    }

    match solve_lcp(&lm, &lq, 2000 + 50 * dim)? {
        LcpOutcome::Solved(z) => {
            let mut x = vec![0.0; n];
            for (j, &(p, neg, sh)) in vm.map.iter().enumerate() {
                x[j] = sh + z[p] - neg.map(|nc| z[nc]).unwrap_or(0.0);
            }
            let obj = model.eval_objective(&x);
            Ok(Solution {
                status: Status::Optimal,
                x,
                obj,
                duals: None,
                ray: None,
                pool: Vec::new(),
            })
        }
        LcpOutcome::Ray => {
            // Feasible + ray termination means unbounded; otherwise infeasible.
            let mut probe = model.clone();
            probe.quad = None;
            for v in &mut probe.vars {
                v.obj = 0.0;
            }
            probe.obj_sense = ObjSense::Minimize;
            let feas = probe.optimize()?;
            if feas.status == Status::Infeasible {
                return Ok(Solution::infeasible(n));
            }
            // Recover a descent ray from the linear part if one exists.
            let mut lp = model.clone();
            lp.quad = None;
            let lin = lp.optimize()?;
            let ray = if lin.status == Status::Unbounded {
                lin.ray
            } else {
                None
            };
            Ok(Solution {
                status: Status::Unbounded,
                x: feas.x,
                obj: f64::NEG_INFINITY,
                duals: None,
                ray,
                pool: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Env, Sense, Status, VarType};
    use sprs::TriMat;

    #[test]
    fn test_lcp_trivial() {
        // q >= 0 -> z = 0.
        let m = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let q = vec![1.0, 2.0];
        match solve_lcp(&m, &q, 100).unwrap() {
            LcpOutcome::Solved(z) => assert!(z.iter().all(|&v| v.abs() < 1e-9)),
            LcpOutcome::Ray => panic!("expected solution"),
        }
    }

    #[test]
    fn test_lcp_simple() {
        // w = z - 1 >= 0, z >= 0, z*w = 0 -> z = 1.
        let m = vec![vec![1.0]];
        let q = vec![-1.0];
        match solve_lcp(&m, &q, 100).unwrap() {
            LcpOutcome::Solved(z) => assert!((z[0] - 1.0).abs() < 1e-9),
            LcpOutcome::Ray => panic!("expected solution"),
        }
    }

    #[test]
    fn test_qp_unconstrained_minimum_inside() {
        // min (x-2)^2 = x^2 - 4x + 4 over x >= 0 -> x = 2.
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, f64::INFINITY, -4.0, VarType::Continuous);
        let mut q = TriMat::new((1, 1));
        q.add_triplet(0, 0, 2.0);
        m.set_quadratic_objective(q.to_csc());
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.x[x] - 2.0).abs() < 1e-7, "x = {}", sol.x[x]);
    }

    #[test]
    fn test_qp_active_constraint() {
        // min x^2 + y^2 s.t. x + y >= 2 -> (1, 1).
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
        let y = m.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
        m.add_constr(&[(x, 1.0), (y, 1.0)], Sense::Greater, 2.0);
        let mut q = TriMat::new((2, 2));
        q.add_triplet(0, 0, 2.0);
        q.add_triplet(1, 1, 2.0);
        m.set_quadratic_objective(q.to_csc());
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.x[x] - 1.0).abs() < 1e-6);
        assert!((sol.x[y] - 1.0).abs() < 1e-6);
        assert!((sol.obj - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_qp_infeasible() {
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
        m.add_constr(&[(x, 1.0)], Sense::Less, -2.0);
        let mut q = TriMat::new((1, 1));
        q.add_triplet(0, 0, 2.0);
        m.set_quadratic_objective(q.to_csc());
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Infeasible);
    }

    #[test]
    fn test_qp_free_variable() {
        // min (x+3)^2 with x free -> x = -3.
        let env = Env::new();
        let mut m = env.model();
        let x = m.add_var(f64::NEG_INFINITY, f64::INFINITY, 6.0, VarType::Continuous);
        let mut q = TriMat::new((1, 1));
        q.add_triplet(0, 0, 2.0);
        m.set_quadratic_objective(q.to_csc());
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.x[x] + 3.0).abs() < 1e-6, "x = {}", sol.x[x]);
    }
}
