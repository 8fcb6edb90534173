//! Linear complementarity systems with a spliced-in leader block.
//!
//! An [`Lcp`] holds the system
//!
//! ```text
//! w = M x + q >= 0,  x >= 0,  x_{pos(i)} * w_i = 0 for every row i,
//! ```
//!
//! where the column range `[l_start, l_start + num_leader)` holds leader
//! variables that carry no complementarity of their own:
//! `pos(i) = i` for `i < l_start` and `pos(i) = i + num_leader` otherwise.
//! A cut pool of valid inequalities `A_cut x <= b_cut` travels with the
//! system and is injected into every model built from it.

pub mod poly;

pub use poly::PolyLcp;

use sprs::CsMat;

use crate::error::{EpecError, EpecResult};
use crate::numeric::{contains_constraint, from_triplets, spmv, to_dense, vstack, zeros};
use crate::param::MpParam;
use epec_opt::{Env, Model, ObjSense, Sense, Solution, VarType};

/// Default complementarity tolerance.
pub const DEFAULT_TOLERANCE: f64 = 5.1e-4;

/// Default big-M for complementarity linearizations.
pub const DEFAULT_BIG_M: f64 = 1e5;

/// A linear complementarity system over `num_cols` nonnegative variables
/// with `num_rows` complementarity pairs and a cut pool.
#[derive(Debug, Clone)]
pub struct Lcp {
    /// System matrix M, shape (num_rows, num_cols).
    m: CsMat<f64>,
    /// Affine term q, length num_rows.
    q: Vec<f64>,
    /// First leader column.
    l_start: usize,
    /// Number of leader columns.
    num_leader: usize,
    /// Cut pool left-hand sides, shape (*, num_cols).
    a_cut: CsMat<f64>,
    /// Cut pool right-hand sides.
    b_cut: Vec<f64>,
    /// Complementarity tolerance.
    tolerance: f64,
    /// Big-M for linearized complementarities.
    big_m: f64,
    /// Model complementarities with indicator constraints.
    use_indicators: bool,
}

impl Lcp {
    /// Create a system from (M, q) and the leader splice.
    pub fn new(
        m: CsMat<f64>,
        q: Vec<f64>,
        l_start: usize,
        num_leader: usize,
    ) -> EpecResult<Self> {
        if m.rows() != q.len() {
            return Err(EpecError::InvalidData(format!(
                "M has {} rows but q has {} entries",
                m.rows(),
                q.len()
            )));
        }
        if m.cols() != m.rows() + num_leader {
            return Err(EpecError::InvalidData(format!(
                "M has {} columns, expected {} rows + {} leaders",
                m.cols(),
                m.rows(),
                num_leader
            )));
        }
        if l_start > m.rows() {
            return Err(EpecError::OutOfRange(format!(
                "leader start {} beyond {} rows",
                l_start,
                m.rows()
            )));
        }
        let cols = m.cols();
        Ok(Self {
            m,
            q,
            l_start,
            num_leader,
            a_cut: zeros(0, cols),
            b_cut: Vec::new(),
            tolerance: DEFAULT_TOLERANCE,
            big_m: DEFAULT_BIG_M,
            use_indicators: true,
        })
    }

    /// Assemble the complementarity system of a player: the lower level's
    /// KKT with the leader's own variables (the first `num_leader`
    /// parameters of `mp`) spliced in as free-of-complementarity columns
    /// after the follower block.
    pub fn from_mp_param(mp: &MpParam, num_leader: usize) -> EpecResult<Self> {
        if num_leader > mp.nx() {
            return Err(EpecError::InvalidData(format!(
                "{} leader variables but the program has {} parameters",
                num_leader,
                mp.nx()
            )));
        }
        let (kkt_m, kkt_n, kkt_q) = mp.kkt()?;
        let ny = mp.ny();
        let rows = kkt_m.rows();
        let cols = rows + num_leader;

        // Columns: [y | leaders | lambda]; the leader block reuses the
        // first `num_leader` columns of N.
        let mut triplets: Vec<(usize, usize, f64)> = Vec::new();
        for (v, (i, j)) in kkt_m.iter() {
            let col = if j < ny { j } else { j + num_leader };
            triplets.push((i, col, *v));
        }
        for (v, (i, j)) in kkt_n.iter() {
            if j < num_leader {
                triplets.push((i, ny + j, *v));
            }
        }
        Self::new(from_triplets(rows, cols, triplets), kkt_q, ny, num_leader)
    }

    /// Number of complementarity pairs.
    pub fn num_rows(&self) -> usize {
        self.m.rows()
    }

    /// Number of variables.
    pub fn num_cols(&self) -> usize {
        self.m.cols()
    }

    /// First leader column.
    pub fn l_start(&self) -> usize {
        self.l_start
    }

    /// Number of leader columns.
    pub fn num_leader(&self) -> usize {
        self.num_leader
    }

    /// System matrix.
    pub fn m(&self) -> &CsMat<f64> {
        &self.m
    }

    /// Affine term.
    pub fn q(&self) -> &[f64] {
        &self.q
    }

    /// Complementarity tolerance.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Set the complementarity tolerance.
    pub fn set_tolerance(&mut self, tol: f64) {
        self.tolerance = tol;
    }

    /// Set the big-M constant.
    pub fn set_big_m(&mut self, big_m: f64) {
        self.big_m = big_m;
    }

    /// Choose indicator constraints or big-M linearizations.
    pub fn set_indicators(&mut self, value: bool) {
        self.use_indicators = value;
    }

    /// Variable paired with complementarity row `i`.
    pub fn var_pos(&self, i: usize) -> usize {
        if i < self.l_start {
            i
        } else {
            i + self.num_leader
        }
    }

    /// Cut pool as (LHS, RHS).
    pub fn cut_pool(&self) -> (&CsMat<f64>, &[f64]) {
        (&self.a_cut, &self.b_cut)
    }

    /// True iff the pool already holds a cut matching (lhs, rhs) within the
    /// system tolerance.
    pub fn contains_cut(&self, lhs: &[f64], rhs: f64) -> bool {
        contains_constraint(&self.a_cut, &self.b_cut, lhs, rhs, self.tolerance)
    }

    /// Add the cuts `lhs x <= rhs` to the pool, skipping duplicates.
    /// Returns the number of cuts actually added.
    pub fn add_custom_cuts(&mut self, lhs: &CsMat<f64>, rhs: &[f64]) -> EpecResult<usize> {
        if lhs.cols() != self.num_cols() {
            return Err(EpecError::InvalidData(format!(
                "cut has {} columns, expected {}",
                lhs.cols(),
                self.num_cols()
            )));
        }
        if lhs.rows() != rhs.len() {
            return Err(EpecError::InvalidData(format!(
                "{} cut rows but {} right-hand sides",
                lhs.rows(),
                rhs.len()
            )));
        }
        let dense = to_dense(lhs);
        let mut added = 0;
        for (row, &r) in dense.iter().zip(rhs) {
            if self.contains_cut(row, r) {
                log::debug!("cut already present in the pool, skipping");
                continue;
            }
            let one = from_triplets(
                1,
                self.num_cols(),
                row.iter().enumerate().map(|(j, v)| (0, j, *v)),
            );
            self.a_cut = vstack(&self.a_cut, &one);
            self.b_cut.push(r);
            added += 1;
        }
        Ok(added)
    }

    /// Recover the slack side w = M x + q from a primal point.
    pub fn z_from_x(&self, x: &[f64]) -> Vec<f64> {
        let mut z = spmv(&self.m, x);
        for (zi, qi) in z.iter_mut().zip(&self.q) {
            *zi += qi;
        }
        z
    }

    /// Sign-encode a primal point: per pair +1 if the variable side is
    /// active, -1 if the slack side is active, 0 otherwise.
    pub fn sol_encode(&self, x: &[f64]) -> Vec<i8> {
        let z = self.z_from_x(x);
        self.sol_encode_zx(&z, x)
    }

    /// Sign-encode from explicit (z, x).
    pub fn sol_encode_zx(&self, z: &[f64], x: &[f64]) -> Vec<i8> {
        (0..self.num_rows())
            .map(|i| {
                let xv = x[self.var_pos(i)];
                let zv = z[i];
                if xv > self.tolerance && zv <= self.tolerance {
                    1
                } else if zv > self.tolerance && xv <= self.tolerance {
                    -1
                } else {
                    0
                }
            })
            .collect()
    }

    /// Index of variable `j` in models built by [`Lcp::as_mip`].
    pub fn x_index(&self, j: usize) -> usize {
        j
    }

    /// Index of slack `i` in models built by [`Lcp::as_mip`].
    pub fn z_index(&self, i: usize) -> usize {
        self.num_cols() + i
    }

    /// Build a model of the system. With `relax` the complementarity
    /// coupling is dropped, leaving the polyhedral relaxation
    /// `{ x >= 0, M x + q >= 0, cuts }`; otherwise each pair is modeled
    /// with an indicator pair or a big-M linearization on an auxiliary
    /// binary, per the configuration.
    pub fn as_mip(&self, env: &Env, relax: bool) -> Model {
        let n = self.num_cols();
        let k = self.num_rows();
        let mut model = env.model();
        for _ in 0..n {
            model.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
        }
        for _ in 0..k {
            model.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
        }

        // z_i - M[i,:] x = q_i.
        let dense = to_dense(&self.m);
        for (i, row) in dense.iter().enumerate() {
            let mut coefs: Vec<(usize, f64)> = row
                .iter()
                .enumerate()
                .filter(|(_, v)| **v != 0.0)
                .map(|(j, v)| (j, -*v))
                .collect();
            coefs.push((self.z_index(i), 1.0));
            model.add_constr(&coefs, Sense::Equal, self.q[i]);
        }

        // Cut pool.
        let cuts = to_dense(&self.a_cut);
        for (row, &rhs) in cuts.iter().zip(&self.b_cut) {
            let coefs: Vec<(usize, f64)> = row
                .iter()
                .enumerate()
                .filter(|(_, v)| **v != 0.0)
                .map(|(j, v)| (j, *v))
                .collect();
            model.add_constr(&coefs, Sense::Less, rhs);
        }

        if !relax {
            for i in 0..k {
                let xp = self.x_index(self.var_pos(i));
                let zp = self.z_index(i);
                let u = model.add_var(0.0, 1.0, 0.0, VarType::Binary);
                if self.use_indicators {
                    model.add_indicator(u, true, &[(xp, 1.0)], Sense::Less, 0.0);
                    model.add_indicator(u, false, &[(zp, 1.0)], Sense::Less, 0.0);
                } else {
                    // x <= M (1 - u) and z <= M u.
                    model.add_constr(&[(xp, 1.0), (u, self.big_m)], Sense::Less, self.big_m);
                    model.add_constr(&[(zp, 1.0), (u, -self.big_m)], Sense::Less, 0.0);
                }
            }
        }
        model
    }

    /// Build the MPEC `min (1/2) y^T Q y + (C x_other + c)^T y` over the
    /// complementarity system, where y is the leading block of x. Passing
    /// `positivity = false` frees the leader columns.
    pub fn mpec_as_miqp(
        &self,
        env: &Env,
        q: Option<&CsMat<f64>>,
        c_x: &CsMat<f64>,
        c: &[f64],
        x_other: &[f64],
        positivity: bool,
    ) -> EpecResult<Model> {
        let ny = c.len();
        if ny > self.num_cols() {
            return Err(EpecError::InvalidData(format!(
                "objective over {} variables but the system has {} columns",
                ny,
                self.num_cols()
            )));
        }
        if c_x.rows() != ny || c_x.cols() != x_other.len() {
            return Err(EpecError::InvalidData(format!(
                "cross term is {}x{} for {} variables and {} parameters",
                c_x.rows(),
                c_x.cols(),
                ny,
                x_other.len()
            )));
        }
        let mut model = self.as_mip(env, false);
        if !positivity {
            for j in self.l_start..self.l_start + self.num_leader {
                model.set_var_bounds(j, f64::NEG_INFINITY, f64::INFINITY);
            }
        }
        let lin = spmv(c_x, x_other);
        let coefs: Vec<(usize, f64)> = (0..ny).map(|j| (j, lin[j] + c[j])).collect();
        model.set_objective(&coefs, ObjSense::Minimize);
        if let Some(qmat) = q {
            if qmat.nnz() > 0 {
                if qmat.rows() != ny || qmat.cols() != ny {
                    return Err(EpecError::InvalidData(format!(
                        "quadratic term is {}x{} for {} variables",
                        qmat.rows(),
                        qmat.cols(),
                        ny
                    )));
                }
                let expanded = from_triplets(
                    model.num_vars(),
                    model.num_vars(),
                    qmat.iter().map(|(v, (i, j))| (i, j, *v)),
                );
                model.set_quadratic_objective(expanded);
            }
        }
        Ok(model)
    }

    /// Linear-objective specialization of [`Lcp::mpec_as_miqp`].
    pub fn mpec_as_milp(
        &self,
        env: &Env,
        c_x: &CsMat<f64>,
        c: &[f64],
        x_other: &[f64],
        positivity: bool,
    ) -> EpecResult<Model> {
        self.mpec_as_miqp(env, None, c_x, c, x_other, positivity)
    }

    /// Read (z, x) out of a solved model of this system. Returns `None`
    /// when the solve produced no usable point.
    pub fn extract_sols(&self, sol: &Solution) -> Option<(Vec<f64>, Vec<f64>)> {
        if !sol.has_point() || sol.x.len() < self.num_cols() + self.num_rows() {
            return None;
        }
        let x = sol.x[..self.num_cols()].to_vec();
        let z = sol.x[self.num_cols()..self.num_cols() + self.num_rows()].to_vec();
        Some((z, x))
    }
}
