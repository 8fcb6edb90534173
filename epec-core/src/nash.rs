//! The master game: stacked per-player KKT systems plus market clearing.
//!
//! A [`NashGame`] composes one parameterized QP per player into a single
//! complementarity system whose solutions are simultaneous KKT points, i.e.
//! Nash equilibria of the convex approximation. The global variable layout
//! is
//!
//! ```text
//! [ y_1 .. y_N | mu | lambda_1 .. lambda_N ]
//! ```
//!
//! with stationarity rows paired with the y blocks, market-clearing rows
//! `MC y <= rhs` paired with their multipliers `mu`, and primal
//! feasibility rows paired with the `lambda` blocks. Each player's
//! parameters are wired into the global space through an explicit map.

use sprs::{CsMat, TriMat};

use crate::error::{EpecError, EpecResult};
use crate::lcp::Lcp;
use crate::param::MpParam;

/// The stacked game.
#[derive(Debug, Clone)]
pub struct NashGame {
    players: Vec<MpParam>,
    mc: CsMat<f64>,
    mc_rhs: Vec<f64>,
    /// Per player: parameter index -> global variable index (over primals
    /// and market-clearing variables).
    param_map: Vec<Vec<usize>>,
    primal_loc: Vec<usize>,
    n_primal: usize,
}

impl NashGame {
    /// Stack the players' programs with market-clearing rows.
    ///
    /// `mc` has one column per global primal variable; `param_map[i]` maps
    /// player i's parameter indices into `[0, n_primal + n_mc)`.
    pub fn new(
        players: Vec<MpParam>,
        mc: CsMat<f64>,
        mc_rhs: Vec<f64>,
        param_map: Vec<Vec<usize>>,
    ) -> EpecResult<Self> {
        if players.is_empty() {
            return Err(EpecError::InvalidData("a game needs players".to_string()));
        }
        if param_map.len() != players.len() {
            return Err(EpecError::InvalidData(format!(
                "{} parameter maps for {} players",
                param_map.len(),
                players.len()
            )));
        }
        let mut primal_loc = Vec::with_capacity(players.len());
        let mut n_primal = 0usize;
        for p in &players {
            primal_loc.push(n_primal);
            n_primal += p.ny();
        }
        if mc.rows() != mc_rhs.len() {
            return Err(EpecError::InvalidData(format!(
                "{} market-clearing rows but {} right-hand sides",
                mc.rows(),
                mc_rhs.len()
            )));
        }
        if mc.rows() > 0 && mc.cols() != n_primal {
            return Err(EpecError::InvalidData(format!(
                "market clearing spans {} columns for {} primals",
                mc.cols(),
                n_primal
            )));
        }
        let n_shared = n_primal + mc_rhs.len();
        for (i, (p, map)) in players.iter().zip(&param_map).enumerate() {
            if map.len() != p.nx() {
                return Err(EpecError::InvalidData(format!(
                    "player {} has {} parameters but a map of {}",
                    i,
                    p.nx(),
                    map.len()
                )));
            }
            if map.iter().any(|&g| g >= n_shared) {
                return Err(EpecError::OutOfRange(format!(
                    "parameter map of player {} leaves the shared space",
                    i
                )));
            }
        }
        Ok(Self {
            players,
            mc,
            mc_rhs,
            param_map,
            primal_loc,
            n_primal,
        })
    }

    /// Number of players.
    pub fn num_players(&self) -> usize {
        self.players.len()
    }

    /// Offset of player `i`'s primal block in the stacked variable vector.
    pub fn get_primal_loc(&self, i: usize) -> usize {
        self.primal_loc[i]
    }

    /// Total primal variables across players.
    pub fn num_primal(&self) -> usize {
        self.n_primal
    }

    /// Number of market-clearing rows (and multipliers).
    pub fn num_mc(&self) -> usize {
        self.mc_rhs.len()
    }

    /// Assemble the stacked complementarity system. Every variable is
    /// paired with a row; there is no leader block.
    pub fn formulate_lcp(&self) -> EpecResult<Lcp> {
        let n_mc = self.num_mc();
        let mut dual_loc = Vec::with_capacity(self.players.len());
        let mut n_dual = 0usize;
        for p in &self.players {
            dual_loc.push(self.n_primal + n_mc + n_dual);
            n_dual += p.ncons();
        }
        let dim = self.n_primal + n_mc + n_dual;

        let mut tri = TriMat::new((dim, dim));
        let mut q = vec![0.0; dim];

        for (i, p) in self.players.iter().enumerate() {
            let obj = p.obj();
            let cons = p.cons();
            let y0 = self.primal_loc[i];
            let l0 = dual_loc[i];

            // Stationarity: Q y + C x_other + c + B^T lambda, paired with y.
            for (v, (r, c)) in obj.q.iter() {
                tri.add_triplet(y0 + r, y0 + c, *v);
            }
            for (v, (r, c)) in obj.c_x.iter() {
                tri.add_triplet(y0 + r, self.param_map[i][c], *v);
            }
            for (v, (r, c)) in cons.b_y.iter() {
                tri.add_triplet(y0 + c, l0 + r, *v);
            }
            for (j, &cv) in obj.c.iter().enumerate() {
                q[y0 + j] = cv;
            }

            // Primal feasibility: b - A x_other - B y, paired with lambda.
            for (v, (r, c)) in cons.b_y.iter() {
                tri.add_triplet(l0 + r, y0 + c, -*v);
            }
            for (v, (r, c)) in cons.a.iter() {
                tri.add_triplet(l0 + r, self.param_map[i][c], -*v);
            }
            for (r, &bv) in cons.b.iter().enumerate() {
                q[l0 + r] = bv;
            }
        }

        // Market clearing: rhs - MC y >= 0, paired with mu.
        for (v, (r, c)) in self.mc.iter() {
            tri.add_triplet(self.n_primal + r, c, -*v);
        }
        for (r, &bv) in self.mc_rhs.iter().enumerate() {
            q[self.n_primal + r] = bv;
        }

        Lcp::new(tri.to_csc(), q, dim, 0)
    }

    /// Each player's objective value at the stacked point `x`
    /// (primals followed by market-clearing variables).
    pub fn compute_qp_objective_values(&self, x: &[f64]) -> Vec<f64> {
        self.players
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let y = &x[self.primal_loc[i]..self.primal_loc[i] + p.ny()];
                let params: Vec<f64> = self.param_map[i].iter().map(|&g| x[g]).collect();
                p.objective_value(&params, y)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::{from_triplets, to_dense, zeros};
    use crate::param::{MpParam, QpConstraints, QpObjective};

    /// Two players on [0, 1] with opposed linear objectives:
    /// player 0 minimizes -y0 + y1, player 1 minimizes y0 - y1.
    fn opposed_players() -> (Vec<MpParam>, Vec<Vec<usize>>) {
        let mut players = Vec::new();
        for own in 0..2usize {
            let mut mp = MpParam::new();
            mp.set(
                QpObjective {
                    q: zeros(1, 1),
                    c_x: from_triplets(1, 1, vec![(0, 0, if own == 0 { 1.0 } else { -1.0 })]),
                    c: vec![if own == 0 { -1.0 } else { 1.0 }],
                },
                QpConstraints {
                    a: zeros(1, 1),
                    b_y: from_triplets(1, 1, vec![(0, 0, 1.0)]),
                    b: vec![1.0],
                },
            )
            .unwrap();
            players.push(mp);
        }
        let maps = vec![vec![1], vec![0]];
        (players, maps)
    }

    #[test]
    fn test_layout_and_locs() {
        let (players, maps) = opposed_players();
        let game = NashGame::new(players, zeros(0, 2), vec![], maps).unwrap();
        assert_eq!(game.num_players(), 2);
        assert_eq!(game.get_primal_loc(0), 0);
        assert_eq!(game.get_primal_loc(1), 1);
        assert_eq!(game.num_primal(), 2);
        assert_eq!(game.num_mc(), 0);
    }

    #[test]
    fn test_formulate_lcp_blocks() {
        let (players, maps) = opposed_players();
        let game = NashGame::new(players, zeros(0, 2), vec![], maps).unwrap();
        let lcp = game.formulate_lcp().unwrap();
        assert_eq!(lcp.num_rows(), 4);
        assert_eq!(lcp.num_cols(), 4);
        assert_eq!(lcp.num_leader(), 0);

        // Layout [y0, y1, l0, l1]; stationarity of y0: y1 + l0 - 1.
        let d = to_dense(lcp.m());
        assert_eq!(d[0], vec![0.0, 1.0, 1.0, 0.0]);
        assert_eq!(lcp.q()[0], -1.0);
        // Feasibility of player 0: 1 - y0 >= 0.
        assert_eq!(d[2], vec![-1.0, 0.0, 0.0, 0.0]);
        assert_eq!(lcp.q()[2], 1.0);
    }

    #[test]
    fn test_stacked_solution_is_equilibrium() {
        // Two players each minimizing -y over [0, 1]: the stacked KKT
        // system forces y0 = y1 = 1 with unit multipliers.
        let env = epec_opt::Env::new();
        let mut players = Vec::new();
        for _ in 0..2 {
            let mut mp = MpParam::new();
            mp.set(
                QpObjective {
                    q: zeros(1, 1),
                    c_x: zeros(1, 1),
                    c: vec![-1.0],
                },
                QpConstraints {
                    a: zeros(1, 1),
                    b_y: from_triplets(1, 1, vec![(0, 0, 1.0)]),
                    b: vec![1.0],
                },
            )
            .unwrap();
            players.push(mp);
        }
        let maps = vec![vec![1], vec![0]];
        let game = NashGame::new(players, zeros(0, 2), vec![], maps).unwrap();
        let lcp = game.formulate_lcp().unwrap();
        let sol = lcp.as_mip(&env, false).optimize().unwrap();
        let (_, x) = lcp.extract_sols(&sol).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-5, "y0 = {}", x[0]);
        assert!((x[1] - 1.0).abs() < 1e-5, "y1 = {}", x[1]);

        let payoffs = game.compute_qp_objective_values(&x[..2]);
        assert!((payoffs[0] + 1.0).abs() < 1e-5);
        assert!((payoffs[1] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_market_clearing_rows() {
        // One shared row y0 + y1 <= 1 with multiplier mu.
        let (players, maps) = opposed_players();
        let mc = from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]);
        let game = NashGame::new(players, mc, vec![1.0], maps).unwrap();
        let lcp = game.formulate_lcp().unwrap();
        assert_eq!(lcp.num_rows(), 5);
        let d = to_dense(lcp.m());
        // Row 2 is the market-clearing row: 1 - y0 - y1 >= 0, paired mu.
        assert_eq!(d[2][0], -1.0);
        assert_eq!(d[2][1], -1.0);
        assert_eq!(lcp.q()[2], 1.0);
    }

    #[test]
    fn test_new_rejects_bad_maps() {
        let (players, _) = opposed_players();
        let bad = vec![vec![5], vec![0]];
        assert!(NashGame::new(players, zeros(0, 2), vec![], bad).is_err());
    }
}
