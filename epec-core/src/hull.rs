//! Balas extended formulation for the convex hull of a union of polyhedra.
//!
//! Given polyhedra `P_i = { y : A_i y <= b_i, y >= 0 }` and optional common
//! constraints `(Acom, bcom)`, the builder emits the lifted system over
//! `[y | y_1 .. y_k | delta_1 .. delta_k]`:
//!
//! 1. `A_i y_i - b_i delta_i <= 0` and `Acom y_i - bcom delta_i <= 0`;
//! 2. `y = sum_i y_i`, written as two inequality blocks;
//! 3. `sum_i delta_i = 1`, written as two inequality rows.
//!
//! The projection of the lifted feasible set onto `y` is
//! `conv(union of P_i)` intersected with the common constraints.

use sprs::{CsMat, TriMat};

use crate::error::{EpecError, EpecResult};

/// Build the extended-formulation system; returns (A, b) with the variable
/// layout `[y | y_1 .. y_k | delta_1 .. delta_k]`.
pub fn convex_hull(
    ai: &[CsMat<f64>],
    bi: &[Vec<f64>],
    common: Option<(&CsMat<f64>, &[f64])>,
) -> EpecResult<(CsMat<f64>, Vec<f64>)> {
    let n_poly = ai.len();
    if n_poly == 0 {
        return Err(EpecError::Assertion("there are no polyhedra".to_string()));
    }
    if bi.len() != n_poly {
        return Err(EpecError::Assertion(format!(
            "{} constraint matrices but {} right-hand sides",
            n_poly,
            bi.len()
        )));
    }
    let n_c = ai[0].cols();
    let (acom_rows, acom) = match common {
        Some((a, b)) => {
            if a.cols() != n_c {
                return Err(EpecError::Assertion(format!(
                    "common constraints have {} columns, expected {}",
                    a.cols(),
                    n_c
                )));
            }
            if a.rows() != b.len() {
                return Err(EpecError::Assertion(format!(
                    "common constraints have {} rows but {} right-hand sides",
                    a.rows(),
                    b.len()
                )));
            }
            (a.rows(), Some((a, b)))
        }
        None => (0, None),
    };

    let mut n_fin_cons = 0usize;
    for (i, a) in ai.iter().enumerate() {
        if a.cols() != n_c {
            return Err(EpecError::Assertion(format!(
                "polyhedron {} has {} columns, expected {}",
                i,
                a.cols(),
                n_c
            )));
        }
        if a.rows() != bi[i].len() {
            return Err(EpecError::Assertion(format!(
                "polyhedron {} has {} rows but {} right-hand sides",
                i,
                a.rows(),
                bi[i].len()
            )));
        }
        n_fin_cons += a.rows();
    }
    n_fin_cons += n_poly * acom_rows;
    let first_link = n_fin_cons;
    n_fin_cons += 2 * n_c; // y = sum y_i as two blocks
    n_fin_cons += 2; // sum delta = 1 as two rows

    let n_fin_var = n_c + n_poly * n_c + n_poly;
    let delta_col = |i: usize| n_c + n_poly * n_c + i;
    let copy_col = |i: usize, j: usize| n_c + i * n_c + j;

    // Batch triplet construction keeps the build O(nnz).
    let mut tri = TriMat::new((n_fin_cons, n_fin_var));
    let mut b = vec![0.0; n_fin_cons];

    let mut row_count = 0usize;
    for (i, a) in ai.iter().enumerate() {
        for (v, (r, j)) in a.iter() {
            tri.add_triplet(row_count + r, copy_col(i, j), *v);
        }
        for (r, bv) in bi[i].iter().enumerate() {
            if *bv != 0.0 {
                tri.add_triplet(row_count + r, delta_col(i), -bv);
            }
        }
        row_count += a.rows();
        if let Some((acom, bcom)) = acom {
            for (v, (r, j)) in acom.iter() {
                tri.add_triplet(row_count + r, copy_col(i, j), *v);
            }
            for (r, bv) in bcom.iter().enumerate() {
                if *bv != 0.0 {
                    tri.add_triplet(row_count + r, delta_col(i), -bv);
                }
            }
            row_count += acom_rows;
        }
    }
    debug_assert_eq!(row_count, first_link);

    // y - sum y_i <= 0 and -y + sum y_i <= 0.
    for j in 0..n_c {
        tri.add_triplet(first_link + 2 * j, j, -1.0);
        tri.add_triplet(first_link + 2 * j + 1, j, 1.0);
        for i in 0..n_poly {
            tri.add_triplet(first_link + 2 * j, copy_col(i, j), 1.0);
            tri.add_triplet(first_link + 2 * j + 1, copy_col(i, j), -1.0);
        }
    }

    // sum delta <= 1 and -sum delta <= -1.
    for i in 0..n_poly {
        tri.add_triplet(first_link + 2 * n_c, delta_col(i), 1.0);
        tri.add_triplet(first_link + 2 * n_c + 1, delta_col(i), -1.0);
    }
    b[first_link + 2 * n_c] = 1.0;
    b[first_link + 2 * n_c + 1] = -1.0;

    Ok((tri.to_csc(), b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::{from_triplets, lp_probe, to_dense};
    use epec_opt::{Env, ObjSense, Sense, Status, VarType};

    /// Solve max c^T y over the lifted system with y >= 0 on all lifted
    /// variables, returning the y-part of the optimum.
    fn maximize_over_hull(a: &CsMat<f64>, b: &[f64], c: &[f64], n_c: usize) -> Vec<f64> {
        let env = Env::new();
        let mut m = env.model();
        for _ in 0..a.cols() {
            m.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
        }
        let dense = to_dense(a);
        for (row, rhs) in dense.iter().zip(b) {
            let coefs: Vec<(usize, f64)> = row
                .iter()
                .enumerate()
                .filter(|(_, v)| **v != 0.0)
                .map(|(j, v)| (j, *v))
                .collect();
            m.add_constr(&coefs, Sense::Less, *rhs);
        }
        let obj: Vec<(usize, f64)> = c.iter().enumerate().map(|(j, v)| (j, *v)).collect();
        m.set_objective(&obj, ObjSense::Maximize);
        let sol = m.optimize().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        sol.x[..n_c].to_vec()
    }

    #[test]
    fn test_hull_of_two_intervals() {
        // P1 = [0, 1], P2 = [2, 3] on the line: hull = [0, 3].
        let a1 = from_triplets(1, 1, vec![(0, 0, 1.0)]);
        let b1 = vec![1.0];
        let a2 = from_triplets(2, 1, vec![(0, 0, 1.0), (1, 0, -1.0)]);
        let b2 = vec![3.0, -2.0];
        let (a, b) = convex_hull(&[a1, a2], &[b1, b2], None).unwrap();

        assert_eq!(a.cols(), 1 + 2 * 1 + 2);
        let y = maximize_over_hull(&a, &b, &[1.0], 1);
        assert!((y[0] - 3.0).abs() < 1e-6, "max y = {}", y[0]);
        let y = maximize_over_hull(&a, &b, &[-1.0], 1);
        assert!(y[0].abs() < 1e-6, "min y = {}", y[0]);
    }

    #[test]
    fn test_hull_point_between_polyhedra() {
        // The hull of [0,1] and [2,3] contains 1.5, which neither piece does.
        let a1 = from_triplets(1, 1, vec![(0, 0, 1.0)]);
        let a2 = from_triplets(2, 1, vec![(0, 0, 1.0), (1, 0, -1.0)]);
        let (a, b) = convex_hull(&[a1, a2], &[vec![1.0], vec![3.0, -2.0]], None).unwrap();

        // Feasibility of { lifted system, y = 1.5 } via an LP probe.
        let env = Env::new();
        let y_fix = from_triplets(2, a.cols(), vec![(0, 0, 1.0), (1, 0, -1.0)]);
        let full = crate::numeric::vstack(&a, &y_fix);
        let mut rhs = b.clone();
        rhs.extend_from_slice(&[1.5, -1.5]);
        let c = vec![0.0; a.cols()];
        let (_, status) = lp_probe(&env, &full, &rhs, &c, true).unwrap();
        assert_eq!(status, Status::Optimal);
    }

    #[test]
    fn test_hull_rejects_bad_dims() {
        let a1 = from_triplets(1, 2, vec![(0, 0, 1.0)]);
        let bad = from_triplets(1, 1, vec![(0, 0, 1.0)]);
        let out = convex_hull(&[a1.clone()], &[vec![1.0]], Some((&bad, &[1.0][..])));
        assert!(out.is_err());

        let out = convex_hull(&[a1, bad], &[vec![1.0], vec![1.0]], None);
        assert!(out.is_err());
    }

    #[test]
    fn test_hull_common_constraints_apply() {
        // Pieces [0,1] and [2,3] with common constraint y <= 2.5: the
        // lifted system cannot reach y = 3 any more.
        let a1 = from_triplets(1, 1, vec![(0, 0, 1.0)]);
        let a2 = from_triplets(2, 1, vec![(0, 0, 1.0), (1, 0, -1.0)]);
        let acom = from_triplets(1, 1, vec![(0, 0, 1.0)]);
        let (a, b) = convex_hull(
            &[a1, a2],
            &[vec![1.0], vec![3.0, -2.0]],
            Some((&acom, &[2.5][..])),
        )
        .unwrap();
        let y = maximize_over_hull(&a, &b, &[1.0], 1);
        assert!(y[0] <= 2.5 + 1e-6, "max y = {}", y[0]);
    }
}
