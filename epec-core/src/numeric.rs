//! Numeric primitives: sparse-matrix patches, containment tests, the
//! complementarity-encoding codec, and the LP feasibility probe.
//!
//! Every comparison takes an explicit tolerance; nothing here relies on a
//! matrix library's implicit zero-threshold.

use sprs::{CsMat, TriMat};

use crate::error::{EpecError, EpecResult};

/// Build a sparse CSC matrix from (row, col, value) triplets.
pub fn from_triplets<I>(nrows: usize, ncols: usize, triplets: I) -> CsMat<f64>
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((nrows, ncols));
    for (i, j, v) in triplets {
        if v != 0.0 {
            tri.add_triplet(i, j, v);
        }
    }
    tri.to_csc()
}

/// An all-zero sparse matrix.
pub fn zeros(nrows: usize, ncols: usize) -> CsMat<f64> {
    TriMat::new((nrows, ncols)).to_csc()
}

/// Dense row-major copy of a sparse matrix.
pub fn to_dense(a: &CsMat<f64>) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0.0; a.cols()]; a.rows()];
    for (v, (i, j)) in a.iter() {
        out[i][j] += *v;
    }
    out
}

/// Sparse matrix-vector product y = A x.
pub fn spmv(a: &CsMat<f64>, x: &[f64]) -> Vec<f64> {
    debug_assert_eq!(a.cols(), x.len());
    let mut y = vec![0.0; a.rows()];
    for (v, (i, j)) in a.iter() {
        y[i] += v * x[j];
    }
    y
}

/// Stack two sparse matrices vertically: [A; B].
pub fn vstack(a: &CsMat<f64>, b: &CsMat<f64>) -> CsMat<f64> {
    assert_eq!(a.cols(), b.cols(), "vstack requires equal column counts");
    let mut tri = TriMat::new((a.rows() + b.rows(), a.cols()));
    for (v, (i, j)) in a.iter() {
        tri.add_triplet(i, j, *v);
    }
    for (v, (i, j)) in b.iter() {
        tri.add_triplet(a.rows() + i, j, *v);
    }
    tri.to_csc()
}

/// Resize a sparse matrix, preserving entries and filling new cells with
/// exact zeros. Shrinking keeps the leading submatrix. Growing one
/// dimension while shrinking the other fails with `OutOfRange`.
pub fn resize_patch(mat: &CsMat<f64>, n_rows: usize, n_cols: usize) -> EpecResult<CsMat<f64>> {
    let grow = n_rows >= mat.rows() && n_cols >= mat.cols();
    let shrink = n_rows <= mat.rows() && n_cols <= mat.cols();
    if !grow && !shrink {
        return Err(EpecError::OutOfRange(
            "resize must grow or shrink both dimensions".to_string(),
        ));
    }
    let mut tri = TriMat::new((n_rows, n_cols));
    for (v, (i, j)) in mat.iter() {
        if i < n_rows && j < n_cols {
            tri.add_triplet(i, j, *v);
        }
    }
    Ok(tri.to_csc())
}

/// Resize a dense vector, zero-filling on growth and truncating on shrink.
pub fn resize_vec(v: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n];
    let keep = v.len().min(n);
    out[..keep].copy_from_slice(&v[..keep]);
    out
}

/// True iff some row of `a` matches `row` within `tol` (infinity norm).
pub fn contains_row(a: &CsMat<f64>, row: &[f64], tol: f64) -> bool {
    if row.len() != a.cols() {
        return false;
    }
    let dense = to_dense(a);
    dense
        .iter()
        .any(|r| r.iter().zip(row).all(|(x, y)| (x - y).abs() <= tol))
}

/// Dense-storage variant of [`contains_row`].
pub fn contains_row_dense(rows: &[Vec<f64>], row: &[f64], tol: f64) -> bool {
    rows.iter().any(|r| {
        r.len() == row.len() && r.iter().zip(row).all(|(x, y)| (x - y).abs() <= tol)
    })
}

/// True iff some element of `b` equals `element` within `tol`.
pub fn contains_element(b: &[f64], element: f64, tol: f64) -> bool {
    b.iter().any(|x| (x - element).abs() <= tol)
}

/// True iff some row i of the system (A, b) satisfies
/// `||A[i,:] - lhs||_inf <= tol` and `|b[i] - rhs| <= tol`.
pub fn contains_constraint(
    a: &CsMat<f64>,
    b: &[f64],
    lhs: &[f64],
    rhs: f64,
    tol: f64,
) -> bool {
    if lhs.len() != a.cols() {
        return false;
    }
    let dense = to_dense(a);
    dense.iter().zip(b).any(|(row, bi)| {
        (bi - rhs).abs() <= tol && row.iter().zip(lhs).all(|(x, y)| (x - y).abs() <= tol)
    })
}

/// True iff every entry of the matrix is within `tol` of zero.
pub fn is_zero_mat(a: &CsMat<f64>, tol: f64) -> bool {
    a.iter().all(|(v, _)| v.abs() <= tol)
}

/// True iff every entry of the vector is within `tol` of zero.
pub fn is_zero_vec(v: &[f64], tol: f64) -> bool {
    v.iter().all(|x| x.abs() <= tol)
}

/// Map a vector over {-1, +1} to the integer whose bits, MSB first, are
/// `(enc[i] + 1) / 2`.
pub fn encoding_to_num(enc: &[i8]) -> u64 {
    let mut number = 0u64;
    for &e in enc {
        number = (number << 1) | u64::from(e > 0);
    }
    number
}

/// Inverse of [`encoding_to_num`]: produce the length-`k` vector of ±1
/// entries in MSB-first order.
pub fn num_to_encoding(mut number: u64, k: usize) -> Vec<i8> {
    let mut enc = vec![-1i8; k];
    for i in (0..k).rev() {
        enc[i] = if number % 2 == 1 { 1 } else { -1 };
        number /= 2;
    }
    enc
}

/// Feasibility/direction probe: minimize c^T x subject to A x <= b, with
/// x >= 0 when `positivity` is set and x free otherwise. Returns the point
/// and the solver status.
pub fn lp_probe(
    env: &epec_opt::Env,
    a: &CsMat<f64>,
    b: &[f64],
    c: &[f64],
    positivity: bool,
) -> EpecResult<(Vec<f64>, epec_opt::Status)> {
    if c.len() != a.cols() {
        return Err(EpecError::Assertion(format!(
            "objective has {} entries for {} columns",
            c.len(),
            a.cols()
        )));
    }
    if b.len() != a.rows() {
        return Err(EpecError::Assertion(format!(
            "rhs has {} entries for {} rows",
            b.len(),
            a.rows()
        )));
    }
    let mut model = env.model();
    let lb = if positivity { 0.0 } else { f64::NEG_INFINITY };
    for &cj in c {
        model.add_var(lb, f64::INFINITY, cj, epec_opt::VarType::Continuous);
    }
    let dense = to_dense(a);
    for (row, &rhs) in dense.iter().zip(b) {
        let coefs: Vec<(usize, f64)> = row
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(j, v)| (j, *v))
            .collect();
        model.add_constr(&coefs, epec_opt::Sense::Less, rhs);
    }
    let sol = model.optimize()?;
    Ok((sol.x, sol.status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_patch_grow_and_shrink() {
        let m = from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 2.0)]);
        let grown = resize_patch(&m, 3, 4).unwrap();
        assert_eq!(grown.rows(), 3);
        assert_eq!(grown.cols(), 4);
        let d = to_dense(&grown);
        assert_eq!(d[0][0], 1.0);
        assert_eq!(d[1][1], 2.0);
        assert_eq!(d[2][3], 0.0);

        let shrunk = resize_patch(&grown, 1, 2).unwrap();
        let d = to_dense(&shrunk);
        assert_eq!(d, vec![vec![1.0, 0.0]]);
    }

    #[test]
    fn test_resize_patch_mixed_fails() {
        let m = from_triplets(2, 2, vec![(0, 0, 1.0)]);
        assert!(matches!(
            resize_patch(&m, 3, 1),
            Err(EpecError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_contains_row_and_constraint() {
        let a = from_triplets(2, 3, vec![(0, 0, 1.0), (0, 2, -1.0), (1, 1, 2.0)]);
        assert!(contains_row(&a, &[1.0, 0.0, -1.0], 1e-6));
        assert!(contains_row(&a, &[1.0 + 1e-7, 0.0, -1.0], 1e-6));
        assert!(!contains_row(&a, &[1.0, 0.1, -1.0], 1e-6));
        assert!(!contains_row(&a, &[1.0, 0.0], 1e-6));

        let b = vec![5.0, 7.0];
        assert!(contains_constraint(&a, &b, &[0.0, 2.0, 0.0], 7.0, 1e-6));
        assert!(!contains_constraint(&a, &b, &[0.0, 2.0, 0.0], 5.0, 1e-6));
    }

    #[test]
    fn test_containment_monotone_under_augment() {
        let a = from_triplets(1, 2, vec![(0, 0, 1.0)]);
        let row = [1.0, 0.0];
        assert!(contains_row(&a, &row, 1e-6));
        let extra = from_triplets(1, 2, vec![(0, 1, 3.0)]);
        let bigger = vstack(&a, &extra);
        assert!(contains_row(&bigger, &row, 1e-6));
    }

    #[test]
    fn test_encoding_roundtrip() {
        for k in 1..=10usize {
            for n in 0..(1u64 << k) {
                let enc = num_to_encoding(n, k);
                assert!(enc.iter().all(|&e| e == 1 || e == -1));
                assert_eq!(encoding_to_num(&enc), n);
            }
        }
    }

    #[test]
    fn test_encoding_msb_first() {
        // 0b10 over two complementarities: first entry is the MSB.
        assert_eq!(num_to_encoding(2, 2), vec![1, -1]);
        assert_eq!(encoding_to_num(&[1, -1]), 2);
    }

    #[test]
    fn test_lp_probe_feasible_and_infeasible() {
        let env = epec_opt::Env::new();
        // x <= 2, minimize x with x >= 0.
        let a = from_triplets(1, 1, vec![(0, 0, 1.0)]);
        let (x, status) = lp_probe(&env, &a, &[2.0], &[1.0], true).unwrap();
        assert_eq!(status, epec_opt::Status::Optimal);
        assert!(x[0].abs() < 1e-7);

        // x <= -1 with x >= 0 is empty.
        let (_, status) = lp_probe(&env, &a, &[-1.0], &[1.0], true).unwrap();
        assert_eq!(status, epec_opt::Status::Infeasible);

        // x <= -1 with x free is fine.
        let (x, status) = lp_probe(&env, &a, &[-1.0], &[0.0], false).unwrap();
        assert_eq!(status, epec_opt::Status::Optimal);
        assert!(x[0] <= -1.0 + 1e-7);
    }

    #[test]
    fn test_is_zero_with_tolerance() {
        let m = from_triplets(2, 2, vec![(0, 1, 1e-8)]);
        assert!(is_zero_mat(&m, 1e-6));
        assert!(!is_zero_mat(&m, 1e-9));
        assert!(is_zero_vec(&[0.0, 1e-9], 1e-6));
        assert!(!is_zero_vec(&[0.0, 1e-3], 1e-6));
    }
}
