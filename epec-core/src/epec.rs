//! The EPEC façade.
//!
//! An [`Epec`] owns the per-player data (lower-level program, leader
//! objective, complementarity system), the market-clearing coupling, the
//! solver environment, and the joint solution vector. `finalize` wires the
//! players together, `find_nash_eq` dispatches to the configured algorithm,
//! and the accessors expose the solution and run statistics.

use std::time::Instant;

use sprs::CsMat;

use crate::error::{EpecError, EpecResult};
use crate::lcp::{Lcp, PolyLcp};
use crate::nash::NashGame;
use crate::numeric::{from_triplets, resize_vec, spmv, zeros};
use crate::options::{Algorithm, EpecOptions, EpecStatistics, EpecStatus};
use crate::outer;
use crate::param::{MpParam, QpObjective};
use epec_opt::{Env, Model, SolveParams};

/// A pure callback run around `finalize`.
pub type FinalizeHook = Box<dyn Fn(&Epec)>;

/// One player's input data.
pub(crate) struct PlayerData {
    pub lower_level: MpParam,
    pub num_leader: usize,
}

/// An equilibrium problem with equilibrium constraints.
pub struct Epec {
    pub(crate) env: Env,
    pub(crate) options: EpecOptions,
    pub(crate) stats: EpecStatistics,

    players: Vec<PlayerData>,
    mc: CsMat<f64>,
    mc_rhs: Vec<f64>,
    pub(crate) num_mc: usize,

    pub(crate) poly_lcps: Vec<PolyLcp>,
    pub(crate) players_qp: Vec<MpParam>,
    pub(crate) leader_objective: Vec<QpObjective>,

    pub(crate) leader_locations: Vec<usize>,
    pub(crate) loc_ends: Vec<usize>,
    pub(crate) sizes_without_hull: Vec<usize>,
    pub(crate) convex_hull_variables: Vec<usize>,
    pub(crate) num_variables: usize,

    pub(crate) solution_x: Vec<f64>,
    pub(crate) solution_z: Vec<f64>,
    pub(crate) nash_equilibrium: bool,
    pub(crate) nash_game: Option<NashGame>,

    pub(crate) init_time: Option<Instant>,
    pub(crate) solved_feasible: bool,
    finalized: bool,

    pre_finalize: Option<FinalizeHook>,
    post_finalize: Option<FinalizeHook>,
}

impl Epec {
    /// Create an engine with the given options. The solver environment is
    /// acquired here and released when the engine is dropped.
    pub fn new(options: EpecOptions) -> Self {
        let params = SolveParams {
            threads: options.threads,
            random_seed: options.random_seed,
            ..SolveParams::default()
        };
        Self {
            env: Env::with_params(params),
            options,
            stats: EpecStatistics::default(),
            players: Vec::new(),
            mc: zeros(0, 0),
            mc_rhs: Vec::new(),
            num_mc: 0,
            poly_lcps: Vec::new(),
            players_qp: Vec::new(),
            leader_objective: Vec::new(),
            leader_locations: Vec::new(),
            loc_ends: Vec::new(),
            sizes_without_hull: Vec::new(),
            convex_hull_variables: Vec::new(),
            num_variables: 0,
            solution_x: Vec::new(),
            solution_z: Vec::new(),
            nash_equilibrium: false,
            nash_game: None,
            init_time: None,
            solved_feasible: false,
            finalized: false,
            pre_finalize: None,
            post_finalize: None,
        }
    }

    /// Add a player: its lower-level program (whose first `num_leader`
    /// parameters are the player's own upper-level decisions) and its
    /// leader objective over the player's full variable block.
    pub fn add_player(
        &mut self,
        lower_level: MpParam,
        num_leader: usize,
        leader_objective: QpObjective,
    ) -> EpecResult<usize> {
        if self.finalized {
            return Err(EpecError::InvalidQuery(
                "cannot add players after finalize".to_string(),
            ));
        }
        if num_leader > lower_level.nx() {
            return Err(EpecError::InvalidData(format!(
                "{} leader variables but the lower level has {} parameters",
                num_leader,
                lower_level.nx()
            )));
        }
        self.players.push(PlayerData {
            lower_level,
            num_leader,
        });
        self.leader_objective.push(leader_objective);
        Ok(self.players.len() - 1)
    }

    /// Set the market-clearing rows `MC y <= rhs` over the concatenated
    /// original player variables.
    pub fn set_market_clearing(&mut self, mc: CsMat<f64>, rhs: Vec<f64>) -> EpecResult<()> {
        if self.finalized {
            return Err(EpecError::InvalidQuery(
                "cannot change market clearing after finalize".to_string(),
            ));
        }
        if mc.rows() != rhs.len() {
            return Err(EpecError::InvalidData(format!(
                "{} market-clearing rows but {} right-hand sides",
                mc.rows(),
                rhs.len()
            )));
        }
        self.num_mc = rhs.len();
        self.mc = mc;
        self.mc_rhs = rhs;
        Ok(())
    }

    /// Install a callback run before `finalize` does its work.
    pub fn set_pre_finalize(&mut self, hook: FinalizeHook) {
        self.pre_finalize = Some(hook);
    }

    /// Install a callback run after `finalize` completes.
    pub fn set_post_finalize(&mut self, hook: FinalizeHook) {
        self.post_finalize = Some(hook);
    }

    /// Number of players.
    pub fn num_players(&self) -> usize {
        self.players.len()
    }

    /// Number of variables in the joint solution vector.
    pub fn num_variables(&self) -> usize {
        self.num_variables
    }

    /// The joint solution vector (player blocks followed by
    /// market-clearing variables).
    pub fn solution(&self) -> &[f64] {
        &self.solution_x
    }

    /// Wire the players together: compute block locations, pad the lower
    /// levels with dummy parameters for the other players and the
    /// market-clearing variables, build the complementarity systems, and
    /// validate the leader objectives. Re-entry warns and rebuilds.
    pub fn finalize(&mut self) -> EpecResult<()> {
        if self.finalized {
            log::warn!("model already finalized, rebuilding");
        }
        if self.players.is_empty() {
            return Err(EpecError::InvalidData("the game has no players".to_string()));
        }
        if let Some(hook) = self.pre_finalize.take() {
            hook(self);
            self.pre_finalize = Some(hook);
        }

        let n = self.players.len();
        self.sizes_without_hull = self
            .players
            .iter()
            .map(|p| p.lower_level.ny() + p.num_leader + p.lower_level.ncons())
            .collect();
        self.convex_hull_variables = vec![0; n];
        self.loc_ends = self.sizes_without_hull.clone();
        self.compute_leader_locations();

        if self.num_mc > 0 {
            let orig_total: usize = self.sizes_without_hull.iter().sum();
            if self.mc.cols() != orig_total {
                return Err(EpecError::InvalidData(format!(
                    "market clearing spans {} columns for {} player variables",
                    self.mc.cols(),
                    orig_total
                )));
            }
        }

        self.poly_lcps.clear();
        self.players_qp.clear();
        for i in 0..n {
            // Dummy parameters for everyone else's variables and the
            // market-clearing variables, appended after the leader block.
            let target_nx =
                self.players[i].num_leader + self.num_variables - self.sizes_without_hull[i];
            let current = self.players[i].lower_level.nx();
            if target_nx < current {
                return Err(EpecError::InvalidData(format!(
                    "player {} has {} parameters, more than the game provides",
                    i, current
                )));
            }
            self.players[i]
                .lower_level
                .add_dummy(target_nx - current, 0, -1)?;

            let mut lcp = Lcp::from_mp_param(
                &self.players[i].lower_level,
                self.players[i].num_leader,
            )?;
            lcp.set_tolerance(self.options.deviation_tolerance);
            lcp.set_big_m(self.options.big_m);
            lcp.set_indicators(self.options.indicator_constraints);
            self.poly_lcps.push(PolyLcp::new(lcp));
            self.players_qp.push(MpParam::new());

            let obj = &self.leader_objective[i];
            let expect_ny = self.sizes_without_hull[i];
            let expect_nx = self.num_variables - expect_ny;
            if obj.c.len() != expect_ny
                || obj.c_x.rows() != expect_ny
                || obj.c_x.cols() != expect_nx
            {
                return Err(EpecError::InvalidData(format!(
                    "leader objective of player {} is {}x{}, expected {}x{}",
                    i,
                    obj.c_x.rows(),
                    obj.c_x.cols(),
                    expect_ny,
                    expect_nx
                )));
            }
        }

        self.solution_x = vec![0.0; self.num_variables];
        self.solution_z.clear();
        self.finalized = true;
        if let Some(hook) = self.post_finalize.take() {
            hook(self);
            self.post_finalize = Some(hook);
        }
        Ok(())
    }

    /// `LeaderLocations[i] = sum of earlier players' block sizes`; the
    /// total adds the market-clearing variables.
    pub(crate) fn compute_leader_locations(&mut self) {
        self.leader_locations = Vec::with_capacity(self.loc_ends.len());
        let mut acc = 0usize;
        for &end in &self.loc_ends {
            self.leader_locations.push(acc);
            acc += end;
        }
        self.num_variables = acc + self.num_mc;
    }

    pub(crate) fn check_finalized(&self) -> EpecResult<()> {
        if !self.finalized {
            return Err(EpecError::InvalidQuery("model not finalized".to_string()));
        }
        Ok(())
    }

    /// Slice player `i` out of a joint vector, with or without the
    /// convex-hull auxiliaries.
    pub fn get_x_of_i(&self, x: &[f64], i: usize, hull: bool) -> EpecResult<Vec<f64>> {
        self.check_player(i)?;
        let vars = if hull {
            self.loc_ends[i]
        } else {
            self.loc_ends[i] - self.convex_hull_variables[i]
        };
        let start = self.leader_locations[i];
        if x.len() < start + vars {
            return Err(EpecError::OutOfRange(format!(
                "joint vector has {} entries, need {}",
                x.len(),
                start + vars
            )));
        }
        Ok(x[start..start + vars].to_vec())
    }

    /// Everyone else's variables (without hull auxiliaries) followed by
    /// the market-clearing variables.
    pub fn get_x_minus_i(&self, x: &[f64], i: usize) -> EpecResult<Vec<f64>> {
        self.check_player(i)?;
        let mut out = Vec::new();
        for j in 0..self.players.len() {
            if j == i {
                continue;
            }
            let current = self.loc_ends[j] - self.convex_hull_variables[j];
            let start = self.leader_locations[j];
            out.extend_from_slice(&x[start..start + current]);
        }
        out.extend_from_slice(&x[self.num_variables - self.num_mc..self.num_variables]);
        Ok(out)
    }

    /// The joint vector with every player's hull auxiliaries removed; the
    /// market-clearing tail is not included.
    pub fn get_x_without_hull(&self, x: &[f64]) -> Vec<f64> {
        let mut out = Vec::new();
        for j in 0..self.players.len() {
            let current = self.loc_ends[j] - self.convex_hull_variables[j];
            let start = self.leader_locations[j];
            out.extend_from_slice(&x[start..start + current]);
        }
        out
    }

    fn check_player(&self, i: usize) -> EpecResult<()> {
        if i >= self.players.len() {
            return Err(EpecError::InvalidQuery(format!(
                "player {} of {}",
                i,
                self.players.len()
            )));
        }
        Ok(())
    }

    /// The model computing player `i`'s best response to `x`: its MPEC
    /// over the full complementarity system with the others' strategies
    /// fixed.
    pub fn respond(&self, i: usize, x: &[f64]) -> EpecResult<Model> {
        self.check_finalized()?;
        self.check_player(i)?;
        let x_other = self.get_x_minus_i(x, i)?;
        let obj = &self.leader_objective[i];
        if obj.q.nnz() > 0 {
            self.poly_lcps[i].mpec_as_miqp(&self.env, Some(&obj.q), &obj.c_x, &obj.c, &x_other, true)
        } else {
            self.poly_lcps[i].mpec_as_milp(&self.env, &obj.c_x, &obj.c, &x_other, true)
        }
    }

    /// Solve player `i`'s best response to `x` and return its value;
    /// the optimal strategy lands in `sol`.
    ///
    /// An infeasible response returns +infinity. An unbounded response
    /// walks from `prev_dev` along the model's unbounded ray until the
    /// objective strictly improves; without a previous deviation it
    /// returns -infinity.
    pub fn respond_sol(
        &self,
        sol: &mut Vec<f64>,
        i: usize,
        x: &[f64],
        prev_dev: Option<&[f64]>,
    ) -> EpecResult<f64> {
        let model = self.respond(i, x)?;
        let out = model.optimize()?;
        let n_x = self.poly_lcps[i].num_cols();
        match out.status {
            epec_opt::Status::Optimal => {
                *sol = out.x[..n_x].to_vec();
                Ok(out.obj)
            }
            epec_opt::Status::Unbounded => {
                log::warn!("deviation of player {} is unbounded", i);
                *sol = out.x[..n_x].to_vec();
                let Some(prev) = prev_dev else {
                    return Ok(f64::NEG_INFINITY);
                };
                let Some(ray) = out.ray else {
                    return Ok(f64::NEG_INFINITY);
                };
                // Objective coefficients, sized from the model before the
                // walk so every index is in range.
                let coefs = model.objective_coefs();
                let dot = |p: &[f64]| -> f64 {
                    p.iter().zip(&coefs).map(|(a, b)| a * b).sum()
                };
                let target = dot(&prev[..prev.len().min(n_x)]);
                for _ in 0..1000 {
                    for (s, r) in sol.iter_mut().zip(&ray) {
                        *s += r;
                    }
                    let val = dot(sol);
                    if val < target {
                        return Ok(val);
                    }
                }
                log::warn!("ray walk for player {} failed to improve", i);
                Ok(f64::NEG_INFINITY)
            }
            epec_opt::Status::Infeasible => Ok(f64::INFINITY),
            epec_opt::Status::TimeLimit | epec_opt::Status::IterLimit => {
                if out.has_point() {
                    *sol = out.x[..n_x].to_vec();
                    Ok(out.obj)
                } else {
                    Ok(f64::INFINITY)
                }
            }
        }
    }

    /// Rebuild player `i`'s convex approximation from its active
    /// polyhedra.
    pub(crate) fn make_player_qp(&mut self, i: usize) -> EpecResult<()> {
        self.check_finalized()?;
        self.check_player(i)?;
        let obj = self.leader_objective[i].clone();
        let qp = &mut self.players_qp[i];
        self.poly_lcps[i].make_qp(&obj, qp)
    }

    /// Rebuild every player's approximation and re-wire the joint
    /// variable layout for the new hull auxiliaries.
    pub(crate) fn make_players_qps(&mut self) -> EpecResult<()> {
        for i in 0..self.players.len() {
            self.make_player_qp(i)?;
        }
        for i in 0..self.players.len() {
            let hull_count = self.players_qp[i].ny() - self.sizes_without_hull[i];
            self.convex_hull_variables[i] = hull_count;
            log::debug!("player {} gained {} hull variables", i, hull_count);
            for j in 0..self.players.len() {
                if i == j {
                    continue;
                }
                let at = self.players_qp[j].nx() - self.num_mc;
                self.players_qp[j].add_dummy(hull_count, 0, at as i64)?;
            }
        }
        for i in 0..self.players.len() {
            self.loc_ends[i] = self.players_qp[i].ny();
        }
        self.compute_leader_locations();
        Ok(())
    }

    /// Per-player maps from approximation-QP parameter indices to global
    /// variable indices: the other players' original blocks in index
    /// order, their hull blocks in index order, then the market-clearing
    /// variables.
    pub(crate) fn build_param_maps(&self) -> Vec<Vec<usize>> {
        let n_primal: usize = self.loc_ends.iter().sum();
        let n = self.players.len();
        let mut maps = Vec::with_capacity(n);
        for j in 0..n {
            let mut map = Vec::new();
            for k in 0..n {
                if k == j {
                    continue;
                }
                for o in 0..self.sizes_without_hull[k] {
                    map.push(self.leader_locations[k] + o);
                }
            }
            for k in 0..n {
                if k == j {
                    continue;
                }
                for o in 0..self.convex_hull_variables[k] {
                    map.push(self.leader_locations[k] + self.sizes_without_hull[k] + o);
                }
            }
            for t in 0..self.num_mc {
                map.push(n_primal + t);
            }
            maps.push(map);
        }
        maps
    }

    /// Market-clearing matrix remapped onto the current global primal
    /// layout (zero columns for hull auxiliaries).
    pub(crate) fn remapped_mc(&self) -> CsMat<f64> {
        let n_primal: usize = self.loc_ends.iter().sum();
        if self.num_mc == 0 {
            return zeros(0, n_primal);
        }
        let mut orig_loc = Vec::with_capacity(self.players.len());
        let mut acc = 0usize;
        for &s in &self.sizes_without_hull {
            orig_loc.push(acc);
            acc += s;
        }
        from_triplets(
            self.num_mc,
            n_primal,
            self.mc.iter().map(|(v, (r, c))| {
                let k = orig_loc
                    .iter()
                    .rposition(|&start| start <= c)
                    .unwrap_or(0);
                (r, self.leader_locations[k] + (c - orig_loc[k]), *v)
            }),
        )
    }

    /// Solve the master complementarity system of the current
    /// approximations. Returns true iff a joint KKT point was found; the
    /// point lands in `solution`. Solver failures are logged and recorded
    /// as a numerical outcome rather than propagated.
    pub(crate) fn compute_nash_eq(&mut self, local_time_limit: Option<f64>) -> EpecResult<bool> {
        self.nash_equilibrium = false;
        let game = NashGame::new(
            self.players_qp.clone(),
            self.remapped_mc(),
            self.mc_rhs.clone(),
            self.build_param_maps(),
        )?;
        let mut master = game.formulate_lcp()?;
        master.set_tolerance(self.options.deviation_tolerance);
        master.set_big_m(self.options.big_m);
        master.set_indicators(self.options.indicator_constraints);

        let mut model = master.as_mip(&self.env, false);
        if let Some(seconds) = local_time_limit {
            model.params.time_limit =
                Some(std::time::Duration::from_secs_f64(seconds.max(1e-3)));
        }
        if self.options.bound_primals {
            for c in 0..game.num_primal() {
                model.set_var_bounds(c, 0.0, self.options.bound_big_m);
            }
        }
        self.stats.num_var = model.num_vars();
        self.stats.num_constraints = model.num_constrs();
        self.stats.num_nonzero = model.num_nonzeros();

        match model.optimize() {
            Ok(sol) => {
                if let Some((z, x)) = master.extract_sols(&sol) {
                    let n_shared = game.num_primal() + game.num_mc();
                    self.solution_x = x[..n_shared].to_vec();
                    self.solution_z = z;
                    self.nash_equilibrium = true;
                    log::info!("an equilibrium of the approximation was found");
                } else {
                    log::info!("no equilibrium of the approximation exists");
                    self.stats.status = match sol.status {
                        epec_opt::Status::TimeLimit => EpecStatus::TimeLimit,
                        _ => EpecStatus::NashEqNotFound,
                    };
                }
            }
            Err(e) => {
                log::error!("master solve failed: {}", e);
                self.stats.status = EpecStatus::Numerical;
                self.stats.numerical_issues = true;
            }
        }
        self.nash_game = Some(game);
        Ok(self.nash_equilibrium)
    }

    /// Seconds left before the wall-clock limit; `None` when no limit is
    /// configured.
    pub(crate) fn time_remaining(&self) -> Option<f64> {
        let limit = self.options.time_limit?;
        let elapsed = self
            .init_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        Some(limit - elapsed)
    }

    /// Compute a Nash equilibrium with the configured algorithm.
    pub fn find_nash_eq(&mut self) -> EpecResult<()> {
        self.check_finalized()?;
        if self.stats.status != EpecStatus::Uninitialized {
            log::warn!("find_nash_eq was already called on this instance");
        }
        self.init_time = Some(Instant::now());
        self.stats.num_iterations = 0;
        self.solved_feasible = false;

        let result = match self.options.algorithm {
            Algorithm::OuterApproximation => outer::solve(self),
        };
        if let Some(t) = self.init_time {
            self.stats.wall_clock_time = t.elapsed();
        }
        match &result {
            Ok(()) => log::info!(
                "outer approximation finished with status {}",
                self.stats.status
            ),
            Err(e) => log::error!("outer approximation failed: {}", e),
        }
        result
    }

    /// Run statistics.
    pub fn get_statistics(&self) -> EpecStatistics {
        self.stats.clone()
    }

    /// True if the last solve certified an equilibrium of the original
    /// game.
    pub fn is_solved(&self) -> bool {
        self.solved_feasible
    }

    /// True if the certified equilibrium is a pure-strategy profile.
    pub fn is_pure_strategy(&self) -> bool {
        self.solved_feasible && self.stats.pure_nash_equilibrium
    }

    /// Value of player `i`'s `j`-th follower variable in the solution.
    pub fn get_val_lead_foll(&self, i: usize, j: usize) -> EpecResult<f64> {
        self.check_player(i)?;
        if self.solution_x.is_empty() {
            return Err(EpecError::InvalidQuery(
                "no solution is available".to_string(),
            ));
        }
        if j >= self.poly_lcps[i].l_start() {
            return Err(EpecError::OutOfRange(format!(
                "follower variable {} of {}",
                j,
                self.poly_lcps[i].l_start()
            )));
        }
        Ok(self.solution_x[self.leader_locations[i] + j])
    }

    /// Value of player `i`'s `j`-th own (leader) variable in the solution.
    pub fn get_val_lead_lead(&self, i: usize, j: usize) -> EpecResult<f64> {
        self.check_player(i)?;
        if self.solution_x.is_empty() {
            return Err(EpecError::InvalidQuery(
                "no solution is available".to_string(),
            ));
        }
        if j >= self.poly_lcps[i].num_leader() {
            return Err(EpecError::OutOfRange(format!(
                "leader variable {} of {}",
                j,
                self.poly_lcps[i].num_leader()
            )));
        }
        Ok(self.solution_x[self.leader_locations[i] + self.poly_lcps[i].l_start() + j])
    }

    /// The linear payoff gradient of player `i` at the others' strategies:
    /// `C x_other + c`, resized to the player's complementarity columns.
    pub(crate) fn leader_payoff_gradient(&self, i: usize, x_minus_i: &[f64]) -> Vec<f64> {
        let obj = &self.leader_objective[i];
        let mut lhs = spmv(&obj.c_x, x_minus_i);
        for (l, c) in lhs.iter_mut().zip(&obj.c) {
            *l += c;
        }
        resize_vec(&lhs, self.poly_lcps[i].num_cols())
    }

    #[cfg(test)]
    pub(crate) fn inject_poly_lcp(&mut self, i: usize, poly: PolyLcp) {
        self.poly_lcps[i] = poly;
    }
}
