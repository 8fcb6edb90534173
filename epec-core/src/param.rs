//! Parameterized quadratic programs.
//!
//! An [`MpParam`] holds the data of a quadratic program whose variables are
//! split into own decisions `y` and parameters `x`:
//!
//! ```text
//! minimize_y  (1/2) y^T Q y + (C x + c)^T y
//! subject to  A x + B y <= b,  y >= 0
//! ```
//!
//! The data is mutated through `set` and `add_dummy` and frozen by the
//! dimensional checks they run; `solve_fixed` instantiates the program for a
//! concrete parameter vector, and `kkt` assembles the complementarity
//! system used by the game layers.

use sprs::{CsMat, TriMat};

use crate::error::{EpecError, EpecResult};
use crate::numeric::{self, resize_patch, resize_vec, spmv, to_dense, zeros};

/// Objective data (Q, C, c) of a parameterized QP.
#[derive(Debug, Clone)]
pub struct QpObjective {
    /// Quadratic term Q, symmetric PSD, shape (ny, ny).
    pub q: CsMat<f64>,
    /// Cross term C, shape (ny, nx).
    pub c_x: CsMat<f64>,
    /// Linear term c, length ny.
    pub c: Vec<f64>,
}

impl QpObjective {
    /// An all-zero objective over `ny` variables and `nx` parameters.
    pub fn empty(ny: usize, nx: usize) -> Self {
        Self {
            q: zeros(ny, ny),
            c_x: zeros(ny, nx),
            c: vec![0.0; ny],
        }
    }

    /// Objective value (1/2) y^T Q y + (C x + c)^T y.
    pub fn value(&self, x: &[f64], y: &[f64]) -> f64 {
        let mut quad = 0.0;
        for (v, (i, j)) in self.q.iter() {
            quad += v * y[i] * y[j];
        }
        let lin: f64 = spmv(&self.c_x, x)
            .iter()
            .zip(&self.c)
            .zip(y)
            .map(|((cx, c), yi)| (cx + c) * yi)
            .sum();
        0.5 * quad + lin
    }
}

/// Constraint data (A, B, b) of a parameterized QP.
#[derive(Debug, Clone)]
pub struct QpConstraints {
    /// Parameter block A, shape (m, nx).
    pub a: CsMat<f64>,
    /// Variable block B, shape (m, ny).
    pub b_y: CsMat<f64>,
    /// Right-hand side b, length m.
    pub b: Vec<f64>,
}

impl QpConstraints {
    /// All-zero constraints over `ny` variables and `nx` parameters.
    pub fn empty(m: usize, ny: usize, nx: usize) -> Self {
        Self {
            a: zeros(m, nx),
            b_y: zeros(m, ny),
            b: vec![0.0; m],
        }
    }
}

/// A parameterized quadratic program.
#[derive(Debug, Clone)]
pub struct MpParam {
    obj: QpObjective,
    cons: QpConstraints,
    ny: usize,
    nx: usize,
    ncons: usize,
}

impl Default for MpParam {
    fn default() -> Self {
        Self {
            obj: QpObjective::empty(0, 0),
            cons: QpConstraints::empty(0, 0, 0),
            ny: 0,
            nx: 0,
            ncons: 0,
        }
    }
}

impl MpParam {
    /// An empty program; populate it with [`MpParam::set`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the data, recomputing and validating dimensions.
    pub fn set(&mut self, obj: QpObjective, cons: QpConstraints) -> EpecResult<&mut Self> {
        self.obj = obj;
        self.cons = cons;
        self.size();
        if !self.data_check(false) {
            return Err(EpecError::InvalidData(
                "parameterized program dimensions are inconsistent".to_string(),
            ));
        }
        Ok(self)
    }

    /// Recompute (ny, nx, ncons) from the stored data and return them.
    pub fn size(&mut self) -> (usize, usize, usize) {
        self.ny = if self.obj.q.rows() >= 1 {
            self.obj.q.rows()
        } else {
            self.obj.c.len()
        };
        self.nx = self.obj.c_x.cols();
        self.ncons = self.cons.b.len();
        (self.ny, self.nx, self.ncons)
    }

    /// Number of own variables y.
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Number of parameters x.
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Number of constraints.
    pub fn ncons(&self) -> usize {
        self.ncons
    }

    /// Objective data.
    pub fn obj(&self) -> &QpObjective {
        &self.obj
    }

    /// Constraint data.
    pub fn cons(&self) -> &QpConstraints {
        &self.cons
    }

    /// Validate the dimensional invariants.
    ///
    /// - Q is (ny, ny) when present, C is (ny, nx), c has length ny;
    /// - A is (m, nx) when present, B is (m, ny), b has length m;
    /// - with `force_symmetry`, Q must be symmetric within 1e-9.
    pub fn data_check(&self, force_symmetry: bool) -> bool {
        if force_symmetry {
            let d = to_dense(&self.obj.q);
            for i in 0..d.len() {
                for j in 0..i {
                    if (d[i][j] - d[j][i]).abs() > 1e-9 {
                        return false;
                    }
                }
            }
        }
        if self.obj.q.cols() > 0 && self.obj.q.cols() != self.ny {
            return false;
        }
        if self.cons.a.cols() > 0 && self.cons.a.cols() != self.nx {
            return false;
        }
        if self.cons.b_y.cols() != self.ny {
            return false;
        }
        if self.obj.c_x.rows() != self.ny {
            return false;
        }
        if self.obj.c.len() != self.ny {
            return false;
        }
        if self.cons.a.rows() > 0 && self.cons.a.rows() != self.ncons {
            return false;
        }
        if self.cons.b_y.rows() != self.ncons {
            return false;
        }
        true
    }

    /// Extend the program by `pars` parameters and `vars` variables.
    ///
    /// Variables are appended; `position` places the new parameter columns:
    /// -1 appends, 0 prepends, any other value inserts at that column. All
    /// new rows and columns are exact zeros, so evaluating the extended
    /// program with the original values in the unchanged slots reproduces
    /// the original program.
    pub fn add_dummy(&mut self, pars: usize, vars: usize, position: i64) -> EpecResult<&mut Self> {
        if position > self.nx as i64 || position < -1 {
            return Err(EpecError::OutOfRange(format!(
                "parameter position {} with {} parameters",
                position, self.nx
            )));
        }
        let new_ny = self.ny + vars;
        let new_nx = self.nx + pars;

        if vars > 0 {
            self.obj.q = resize_patch(&self.obj.q, new_ny, new_ny)?;
            self.cons.b_y = resize_patch(&self.cons.b_y, self.ncons, new_ny)?;
            self.obj.c = resize_vec(&self.obj.c, new_ny);
            self.obj.c_x = resize_patch(&self.obj.c_x, new_ny, self.obj.c_x.cols())?;
        }
        if pars > 0 {
            let at = match position {
                -1 => self.nx,
                p => p as usize,
            };
            self.cons.a = insert_zero_cols(&self.cons.a, self.ncons, self.nx, at, pars);
            self.obj.c_x = insert_zero_cols(&self.obj.c_x, new_ny, self.nx, at, pars);
        }

        self.ny = new_ny;
        self.nx = new_nx;
        debug_assert!(self.data_check(false));
        Ok(self)
    }

    /// Instantiate the program with the parameter vector frozen to `x`.
    ///
    /// With `enforce_positivity` the variables keep their y >= 0 bounds;
    /// otherwise they are free. Callers may further constrain or
    /// re-objective the returned model.
    pub fn solve_fixed(
        &self,
        env: &epec_opt::Env,
        x: &[f64],
        enforce_positivity: bool,
    ) -> EpecResult<epec_opt::Model> {
        if x.len() != self.nx {
            return Err(EpecError::OutOfRange(format!(
                "parameter vector has {} entries, expected {}",
                x.len(),
                self.nx
            )));
        }
        let lin = spmv(&self.obj.c_x, x);
        let mut model = env.model();
        let lb = if enforce_positivity {
            0.0
        } else {
            f64::NEG_INFINITY
        };
        for j in 0..self.ny {
            model.add_var(
                lb,
                f64::INFINITY,
                lin[j] + self.obj.c[j],
                epec_opt::VarType::Continuous,
            );
        }
        let ax = spmv(&self.cons.a, x);
        let rows = to_dense(&self.cons.b_y);
        for (r, row) in rows.iter().enumerate() {
            let coefs: Vec<(usize, f64)> = row
                .iter()
                .enumerate()
                .filter(|(_, v)| **v != 0.0)
                .map(|(j, v)| (j, *v))
                .collect();
            model.add_constr(&coefs, epec_opt::Sense::Less, self.cons.b[r] - ax[r]);
        }
        if self.obj.q.nnz() > 0 {
            model.set_quadratic_objective(self.obj.q.clone());
        }
        Ok(model)
    }

    /// Assemble the KKT complementarity system of the program:
    ///
    /// ```text
    /// M = [[Q, B^T], [-B, 0]],  N = [[C], [-A]],  q = [c; b]
    /// ```
    ///
    /// so that `w = M [y; lambda] + N x + q >= 0` paired with
    /// `[y; lambda] >= 0` expresses stationarity and primal feasibility.
    pub fn kkt(&self) -> EpecResult<(CsMat<f64>, CsMat<f64>, Vec<f64>)> {
        if !self.data_check(true) {
            return Err(EpecError::InvalidData(
                "KKT assembly requires consistent data with symmetric Q".to_string(),
            ));
        }
        let dim = self.ny + self.ncons;

        let mut m = TriMat::new((dim, dim));
        for (v, (i, j)) in self.obj.q.iter() {
            m.add_triplet(i, j, *v);
        }
        for (v, (r, j)) in self.cons.b_y.iter() {
            // B^T in the stationarity block, -B in the feasibility block.
            m.add_triplet(j, self.ny + r, *v);
            m.add_triplet(self.ny + r, j, -*v);
        }

        let mut n = TriMat::new((dim, self.nx));
        for (v, (i, j)) in self.obj.c_x.iter() {
            n.add_triplet(i, j, *v);
        }
        for (v, (r, j)) in self.cons.a.iter() {
            n.add_triplet(self.ny + r, j, -*v);
        }

        let mut q = Vec::with_capacity(dim);
        q.extend_from_slice(&self.obj.c);
        q.extend_from_slice(&self.cons.b);
        Ok((m.to_csc(), n.to_csc(), q))
    }

    /// Objective value at (x, y).
    pub fn objective_value(&self, x: &[f64], y: &[f64]) -> f64 {
        self.obj.value(x, y)
    }
}

/// Insert `count` zero columns at column `at` of a (rows x cols) matrix.
fn insert_zero_cols(
    mat: &CsMat<f64>,
    rows: usize,
    cols: usize,
    at: usize,
    count: usize,
) -> CsMat<f64> {
    numeric::from_triplets(
        rows,
        cols + count,
        mat.iter().map(|(v, (i, j))| {
            let col = if j >= at { j + count } else { j };
            (i, col, *v)
        }),
    )
}
