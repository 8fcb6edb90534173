//! Disjunctive outer approximation of a complementarity system.
//!
//! A [`PolyLcp`] maintains, on top of the base [`Lcp`], the polyhedral
//! approximation selected by a complementarity encoding. A branched pair
//! is enforced exactly, as the disjunction of its two one-sided polyhedra;
//! an unbranched pair is dropped and replaced by the linear relaxation.
//! For a set of branched pairs the active polyhedra are therefore all
//! ±1 sign patterns over that set: +1 keeps the variable side active
//! (slack row tight), -1 keeps the slack side active (variable pinned to
//! zero). `make_qp` rebuilds a player's convex approximation as the Balas
//! hull of the active polyhedra, with the cut pool as common constraints.

use std::ops::{Deref, DerefMut};

use sprs::CsMat;

use super::Lcp;
use crate::error::{EpecError, EpecResult};
use crate::hull::convex_hull;
use crate::numeric::{
    from_triplets, lp_probe, num_to_encoding, resize_patch, resize_vec, vstack,
};
use crate::param::{MpParam, QpConstraints, QpObjective};
use epec_opt::Env;

/// Outer-approximation state over a complementarity system.
#[derive(Debug, Clone)]
pub struct PolyLcp {
    lcp: Lcp,
    /// Sign patterns (one entry per complementarity pair: +1, -1 or 0)
    /// whose polyhedra form the current approximation. Only non-empty
    /// polyhedra are kept.
    active_enc: Vec<Vec<i8>>,
    /// Result of the last `outer_approximate` feasibility probe.
    feas_outer_app: bool,
}

impl PolyLcp {
    /// Wrap a complementarity system.
    pub fn new(lcp: Lcp) -> Self {
        Self {
            lcp,
            active_enc: Vec::new(),
            feas_outer_app: false,
        }
    }

    /// The active sign patterns.
    pub fn active_encodings(&self) -> &[Vec<i8>] {
        &self.active_enc
    }

    /// Result of the last feasibility probe.
    pub fn feas_outer_app(&self) -> bool {
        self.feas_outer_app
    }

    /// The polyhedron of a sign pattern, as rows `A x <= b` (nonnegativity
    /// is implied downstream). A +1 entry keeps the variable side active by
    /// making the slack row tight; a -1 entry pins the paired variable to
    /// zero; a 0 entry leaves the pair relaxed. The cut pool is not
    /// included.
    fn polyhedron(&self, signs: &[i8]) -> (CsMat<f64>, Vec<f64>) {
        let k = self.lcp.num_rows();
        let n = self.lcp.num_cols();
        let extra = signs.iter().filter(|&&s| s != 0).count();
        let mut triplets: Vec<(usize, usize, f64)> = Vec::new();
        // M x + q >= 0 as -M x <= q.
        for (v, (i, j)) in self.lcp.m().iter() {
            triplets.push((i, j, -*v));
        }
        let mut b = self.lcp.q().to_vec();
        b.reserve(extra);
        let rows = crate::numeric::to_dense(self.lcp.m());
        let mut row = k;
        for (i, &s) in signs.iter().enumerate() {
            match s {
                1 => {
                    // Slack row tight: M[i,:] x <= -q_i.
                    for (j, &v) in rows[i].iter().enumerate() {
                        if v != 0.0 {
                            triplets.push((row, j, v));
                        }
                    }
                    b.push(-self.lcp.q()[i]);
                    row += 1;
                }
                -1 => {
                    triplets.push((row, self.lcp.var_pos(i), 1.0));
                    b.push(0.0);
                    row += 1;
                }
                _ => {}
            }
        }
        (from_triplets(k + extra, n, triplets), b)
    }

    /// Probe one sign pattern (with the cut pool) for emptiness.
    fn pattern_feasible(&self, env: &Env, signs: &[i8]) -> EpecResult<bool> {
        let (a, mut b) = self.polyhedron(signs);
        let (a_cut, b_cut) = self.lcp.cut_pool();
        let probe_a = if a_cut.rows() > 0 {
            b.extend_from_slice(b_cut);
            vstack(&a, a_cut)
        } else {
            a
        };
        let c = vec![0.0; probe_a.cols()];
        let (_, status) = lp_probe(env, &probe_a, &b, &c, true)?;
        Ok(status == epec_opt::Status::Optimal)
    }

    /// Rebuild the approximation for `encoding`: every branched (true) bit
    /// is enforced as the disjunction of its two one-sided polyhedra,
    /// unbranched bits stay fully relaxed. The active set receives the
    /// non-empty polyhedra of all sign patterns over the branched bits.
    ///
    /// Returns true iff at least one pattern is non-empty; the result is
    /// also stored in `feas_outer_app`. With `recompute` the active set is
    /// cleared first.
    pub fn outer_approximate(
        &mut self,
        env: &Env,
        encoding: &[bool],
        recompute: bool,
    ) -> EpecResult<bool> {
        if encoding.len() != self.lcp.num_rows() {
            return Err(EpecError::OutOfRange(format!(
                "encoding has {} bits for {} complementarities",
                encoding.len(),
                self.lcp.num_rows()
            )));
        }
        if recompute {
            self.active_enc.clear();
        }
        let branched: Vec<usize> = encoding
            .iter()
            .enumerate()
            .filter(|(_, &b)| b)
            .map(|(i, _)| i)
            .collect();
        if branched.len() >= u64::BITS as usize {
            return Err(EpecError::OutOfRange(format!(
                "{} branched complementarities exceed the pattern range",
                branched.len()
            )));
        }
        let mut feasible = false;
        for pattern in 0..(1u64 << branched.len()) {
            let choice = num_to_encoding(pattern, branched.len());
            let mut signs = vec![0i8; encoding.len()];
            for (&bit, &side) in branched.iter().zip(&choice) {
                signs[bit] = side;
            }
            if self.pattern_feasible(env, &signs)? {
                feasible = true;
                if !self.active_enc.iter().any(|e| e == &signs) {
                    self.active_enc.push(signs);
                }
            }
        }
        self.feas_outer_app = feasible;
        if !feasible {
            log::debug!("outer approximation infeasible for encoding {:?}", encoding);
        }
        Ok(feasible)
    }

    /// Rebuild `out` as the player's convex approximation: the objective
    /// `obj` (over the system's columns) on the Balas hull of the active
    /// polyhedra, with the cut pool as common constraints. The hull's
    /// auxiliary copies and multipliers extend the variable space; the
    /// objective is zero on them.
    pub fn make_qp(&self, obj: &QpObjective, out: &mut MpParam) -> EpecResult<()> {
        if self.active_enc.is_empty() {
            return Err(EpecError::Assertion(
                "no active polyhedra to approximate".to_string(),
            ));
        }
        let n = self.lcp.num_cols();
        if obj.c.len() != n || obj.c_x.rows() != n {
            return Err(EpecError::InvalidData(format!(
                "objective over {} variables for a system with {} columns",
                obj.c.len(),
                n
            )));
        }

        let mut ai = Vec::with_capacity(self.active_enc.len());
        let mut bi = Vec::with_capacity(self.active_enc.len());
        for enc in &self.active_enc {
            let (a, b) = self.polyhedron(enc);
            ai.push(a);
            bi.push(b);
        }
        let (a_cut, b_cut) = self.lcp.cut_pool();
        let common = if a_cut.rows() > 0 {
            Some((a_cut, b_cut))
        } else {
            None
        };
        let (b_hull, rhs_hull) = convex_hull(&ai, &bi, common)?;
        let n_ext = b_hull.cols();

        out.set(
            QpObjective {
                q: resize_patch(&obj.q, n_ext, n_ext)?,
                c_x: resize_patch(&obj.c_x, n_ext, obj.c_x.cols())?,
                c: resize_vec(&obj.c, n_ext),
            },
            QpConstraints {
                a: crate::numeric::zeros(b_hull.rows(), obj.c_x.cols()),
                b_y: b_hull,
                b: rhs_hull,
            },
        )?;
        Ok(())
    }
}

impl Deref for PolyLcp {
    type Target = Lcp;

    fn deref(&self) -> &Lcp {
        &self.lcp
    }
}

impl DerefMut for PolyLcp {
    fn deref_mut(&mut self) -> &mut Lcp {
        &mut self.lcp
    }
}
