//! The outer-approximation algorithm.
//!
//! Branch-and-cut over complementarity encodings: each iteration branches
//! the players' trees, rebuilds the convex approximations, seeks a joint
//! KKT point of the approximated game, and verifies it against true best
//! responses. Disagreements feed back as value cuts, oracle cuts, or new
//! vertices; infeasibility of every remaining branch certifies that no
//! equilibrium exists.

mod tree;

pub use tree::{Node, OuterTree};

use crate::epec::Epec;
use crate::error::{EpecError, EpecResult};
use crate::numeric::{from_triplets, is_zero_vec, resize_vec};
use crate::options::EpecStatus;
use epec_opt::{Env, Model, ObjSense, Status};

/// Oracle iteration budget per feasibility check.
const ORACLE_BUDGET: usize = 15;

/// Sentinel: no branching candidate.
const NO_CANDIDATE: i64 = -1;

/// Sentinel: every remaining branch is infeasible for this player.
const PLAYER_INFEASIBLE: i64 = -2;

/// Run the outer-approximation algorithm on a finalized instance.
pub(crate) fn solve(epec: &mut Epec) -> EpecResult<()> {
    let mut state = OuterApproximation::init(epec);
    state.run(epec)
}

/// How a candidate payoff relates to the true best-response value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deviation {
    /// Payoff strictly below the true best-response value: the candidate
    /// lies outside the true feasible set and a value cut applies.
    BelowBestResponse,
    /// Payoff strictly above the true best-response value: impossible for
    /// an outer relaxation, so the run has gone numerically wrong.
    AboveBestResponse,
    /// Payoffs agree within tolerance.
    Equal,
}

fn classify_deviation(payoff: f64, best_response: f64, tol: f64) -> Deviation {
    if (payoff - best_response).abs() <= tol {
        Deviation::Equal
    } else if payoff < best_response {
        Deviation::BelowBestResponse
    } else {
        Deviation::AboveBestResponse
    }
}

/// Algorithm state: one tree and incumbent node per player.
pub(crate) struct OuterApproximation {
    trees: Vec<OuterTree>,
    incumbent: Vec<usize>,
    feasible: bool,
    timed_out: bool,
    tolerance: f64,
}

impl OuterApproximation {
    fn init(epec: &mut Epec) -> Self {
        let trees: Vec<OuterTree> = epec
            .poly_lcps
            .iter()
            .map(|p| OuterTree::new(p.num_rows()))
            .collect();
        let incumbent = trees.iter().map(|t| t.root()).collect();
        Self {
            trees,
            incumbent,
            feasible: false,
            timed_out: false,
            tolerance: epec.options.deviation_tolerance,
        }
    }

    fn run(&mut self, epec: &mut Epec) -> EpecResult<()> {
        let env = epec.env.clone();
        let n = epec.num_players();
        epec.solution_x = vec![0.0; epec.num_variables()];
        let mut branch = true;

        loop {
            if self.out_of_time(epec) {
                epec.stats.status = EpecStatus::TimeLimit;
                self.after(epec);
                return Ok(());
            }
            epec.stats.num_iterations += 1;
            let iteration = epec.stats.num_iterations;
            log::info!("outer approximation iteration {}", iteration);

            let candidates: Vec<usize> = (0..n)
                .map(|j| {
                    self.trees[j].encoding_size()
                        - self
                            .trees[j]
                            .node(self.incumbent[j])
                            .map(|nd| nd.cumulative_branches)
                            .unwrap_or(0)
                })
                .collect();
            let cumulative: usize = candidates.iter().sum();

            let mut locations = vec![NO_CANDIDATE; n];
            if branch {
                let mut infeasibility = false;
                for j in 0..n {
                    if candidates[j] == 0 {
                        continue;
                    }
                    let loc = if iteration == 1 {
                        self.first_branch_location(epec, &env, j)?
                    } else {
                        self.hybrid_branching(epec, &env, j)?
                    };
                    if (iteration == 1 && loc < 0) || loc == PLAYER_INFEASIBLE {
                        log::info!("branching proves infeasibility for player {}", j);
                        infeasibility = true;
                        break;
                    }
                    locations[j] = loc;
                }
                if infeasibility {
                    log::info!("solved without any equilibrium: proven infeasibility");
                    epec.stats.status = EpecStatus::NashEqNotFound;
                    self.after(epec);
                    return Ok(());
                }
                if cumulative == 0 {
                    log::info!("solved without any equilibrium: no branching candidates");
                    epec.stats.status = EpecStatus::NashEqNotFound;
                    self.after(epec);
                    return Ok(());
                }
                if locations.iter().all(|&l| l < 0) {
                    // No rule produced a candidate; fall back to the plain
                    // complementarity pick before giving up.
                    self.print_current_approx();
                    for (j, loc) in locations.iter_mut().enumerate() {
                        *loc = self.first_branch_location(epec, &env, j)?;
                    }
                    if locations.iter().all(|&l| l < 0) {
                        log::info!("no more branching candidates");
                        epec.stats.status = EpecStatus::NashEqNotFound;
                        self.after(epec);
                        return Ok(());
                    }
                }
            }

            for j in 0..n {
                if locations[j] > NO_CANDIDATE {
                    if !self.apply_branch(epec, &env, j, locations[j] as usize)? {
                        // Every child of this node is empty; the candidate
                        // accounting above catches the player next round.
                        log::info!("player {} has no non-empty branch left", j);
                    }
                } else {
                    // Keep the stored approximation in sync with the
                    // incumbent node.
                    let enc = self.trees[j].node(self.incumbent[j])?.encoding.clone();
                    epec.poly_lcps[j].outer_approximate(&env, &enc, true)?;
                }
            }

            self.print_current_approx();
            epec.make_players_qps()?;

            let budget = epec.time_remaining().map(|remaining| {
                if cumulative > 1 {
                    (remaining * 0.2) / (cumulative - 1) as f64
                } else {
                    remaining * 0.98
                }
            });
            if let Some(b) = budget {
                log::info!(
                    "allocating {:.3}s for this iteration ({} complementarities left)",
                    b,
                    cumulative
                );
            }
            epec.compute_nash_eq(budget)?;
            if epec.stats.status == EpecStatus::Numerical {
                self.after(epec);
                return Ok(());
            }

            if epec.nash_equilibrium {
                let mut added_cuts = false;
                if self.is_feasible(epec, &env, &mut added_cuts)? {
                    self.feasible = true;
                    epec.stats.status = EpecStatus::NashEqFound;
                    log::info!("solved");
                    self.after(epec);
                    return Ok(());
                }
                if added_cuts {
                    log::info!("cuts were added, skipping the next branching phase");
                }
                branch = !added_cuts;
            } else {
                branch = true;
            }

            if self.timed_out || self.out_of_time(epec) {
                epec.stats.status = EpecStatus::TimeLimit;
                self.after(epec);
                return Ok(());
            }
        }
    }

    fn out_of_time(&self, epec: &Epec) -> bool {
        epec.time_remaining().map(|r| r <= 0.0).unwrap_or(false)
    }

    /// Branch player `j` on `loc`, retrying with fresh candidates while the
    /// child polyhedron is empty. Returns false when no non-empty child
    /// exists.
    fn apply_branch(
        &mut self,
        epec: &mut Epec,
        env: &Env,
        j: usize,
        loc: usize,
    ) -> EpecResult<bool> {
        let mut next = Some(loc);
        while let Some(l) = next {
            let Some(child) = self.trees[j].single_branch(l, self.incumbent[j])? else {
                break;
            };
            let enc = self.trees[j].node(child)?.encoding.clone();
            if epec.poly_lcps[j].outer_approximate(env, &enc, true)? {
                self.incumbent[j] = child;
                log::info!("branching candidate for player {} is {}", j, l);
                return Ok(true);
            }
            self.trees[j].deny_branching_location(self.incumbent[j], l)?;
            let fallback = self.first_branch_location(epec, env, j)?;
            next = if fallback >= 0 {
                Some(fallback as usize)
            } else {
                None
            };
        }
        // Restore the incumbent's relaxation for the approximation step.
        let enc = self.trees[j].node(self.incumbent[j])?.encoding.clone();
        epec.poly_lcps[j].outer_approximate(env, &enc, true)?;
        Ok(false)
    }

    /// Verify the candidate equilibrium against true best responses.
    ///
    /// Visits players in ascending order and stops at the first player that
    /// fails; `added_cuts` reports whether any oracle cut entered a pool.
    fn is_feasible(
        &mut self,
        epec: &mut Epec,
        env: &Env,
        added_cuts: &mut bool,
    ) -> EpecResult<bool> {
        if !epec.nash_equilibrium {
            return Ok(false);
        }
        let x = epec.solution_x.clone();
        let payoffs = epec
            .nash_game
            .as_ref()
            .ok_or_else(|| EpecError::Assertion("no stacked game available".to_string()))?
            .compute_qp_objective_values(&x);

        for i in 0..epec.num_players() {
            if self.out_of_time(epec) {
                self.timed_out = true;
                return Ok(false);
            }
            log::info!("payoff of player {} is {}", i, payoffs[i]);
            self.trees[i].reset_feasibility();

            let mut best_response = Vec::new();
            let val = epec.respond_sol(&mut best_response, i, &x, None)?;
            if !val.is_finite() {
                log::info!("unusable deviation for player {}", i);
                *added_cuts = false;
                return Ok(false);
            }

            match classify_deviation(payoffs[i], val, self.tolerance) {
                Deviation::AboveBestResponse => {
                    log::warn!(
                        "player {} payoff {} exceeds its best response {}",
                        i,
                        payoffs[i],
                        val
                    );
                    return Err(EpecError::Numeric(
                        "relaxation payoff above the true best-response value".to_string(),
                    ));
                }
                Deviation::BelowBestResponse => {
                    let x_other = epec.get_x_minus_i(&x, i)?;
                    self.add_value_cut(epec, i, val, &x_other)?;
                    log::info!("value cut for player {}", i);
                    return Ok(false);
                }
                Deviation::Equal => {
                    let x_of_i = epec.get_x_of_i(&x, i, false)?;
                    let vertex = best_response[..x_of_i.len()].to_vec();
                    if self.trees[i].add_vertex(&vertex, self.tolerance)? {
                        log::info!("adding best-response vertex for player {}", i);
                    } else {
                        log::info!("already known best response for player {}", i);
                    }
                    let diff: Vec<f64> = x_of_i
                        .iter()
                        .zip(&vertex)
                        .map(|(a, b)| a - b)
                        .collect();
                    if is_zero_vec(&diff, self.tolerance) {
                        self.trees[i].set_feasible();
                        self.trees[i].set_pure();
                        log::info!("feasible pure strategy for player {}", i);
                    } else if !self.separation_oracle(
                        epec,
                        env,
                        i,
                        &x_of_i,
                        &x,
                        ORACLE_BUDGET,
                        added_cuts,
                    )? {
                        log::info!("the oracle gave a negative answer for player {}", i);
                        return Ok(false);
                    }
                }
            }
        }

        if epec.options.pure_nash_equilibrium && !self.trees.iter().all(|t| t.pure()) {
            log::info!("mixed certificate while a pure equilibrium was requested");
            return Ok(false);
        }
        Ok(true)
    }

    /// Decide whether `x_of_i` lies in the convex hull of player `i`'s
    /// known best responses, or refine the knowledge: either a new vertex
    /// or ray is learned and the test repeats, or a separating hyperplane
    /// becomes a cut and the answer is negative.
    #[allow(clippy::too_many_arguments)]
    fn separation_oracle(
        &mut self,
        epec: &mut Epec,
        env: &Env,
        player: usize,
        x_of_i: &[f64],
        x: &[f64],
        budget: usize,
        added_cuts: &mut bool,
    ) -> EpecResult<bool> {
        for round in 0..budget {
            let (objective, direction, support) = {
                let (model, v_rows) = self.trees[player].update_membership(env, x_of_i)?;
                let sol = model.optimize()?;
                if sol.status != Status::Optimal {
                    return Err(EpecError::Assertion(format!(
                        "unexpected membership status {:?} for player {}",
                        sol.status, player
                    )));
                }
                let direction = sol.x[..x_of_i.len()].to_vec();
                let support = sol.duals.as_ref().map(|duals| {
                    v_rows
                        .iter()
                        .filter(|&&r| duals[r].abs() > self.tolerance)
                        .count()
                });
                (sol.obj, direction, support)
            };

            if objective.abs() <= self.tolerance
                && direction.iter().all(|d| d.abs() <= self.tolerance)
            {
                log::info!(
                    "point of player {} is a convex combination of known points",
                    player
                );
                self.trees[player].set_feasible();
                if support == Some(1) {
                    self.trees[player].set_pure();
                }
                return Ok(true);
            }

            // The membership optimum is positive: `direction` separates the
            // point from the known hull. Price it on the true set.
            log::info!(
                "point of player {} is not a known convex combination ({} rounds left)",
                player,
                budget - round - 1
            );
            let mut leader = epec.respond(player, x)?;
            let coefs: Vec<(usize, f64)> = direction
                .iter()
                .enumerate()
                .filter(|(_, v)| **v != 0.0)
                .map(|(j, v)| (j, *v))
                .collect();
            leader.set_objective(&coefs, ObjSense::Maximize);
            leader.params.dual_reductions = false;
            leader.params.output_flag = false;
            let lsol = leader.optimize()?;

            match lsol.status {
                Status::Optimal => {
                    let cut_v = lsol.obj;
                    let here: f64 = direction.iter().zip(x_of_i).map(|(a, b)| a * b).sum();
                    if cut_v < here - self.tolerance {
                        // Violated valid inequality: keep it as a cut.
                        let lhs = resize_vec(&direction, epec.poly_lcps[player].num_cols());
                        if epec.poly_lcps[player].contains_cut(&lhs, cut_v) {
                            log::info!("cut already known for player {}", player);
                            return Ok(false);
                        }
                        let row = from_triplets(
                            1,
                            lhs.len(),
                            lhs.iter().enumerate().map(|(j, v)| (0, j, *v)),
                        );
                        epec.poly_lcps[player].add_custom_cuts(&row, &[cut_v])?;
                        log::info!("adding an oracle cut for player {}", player);
                        *added_cuts = true;
                        return Ok(false);
                    }
                    // The maximizer is a new extreme point of the true set.
                    let vertex = lsol.x[..x_of_i.len()].to_vec();
                    if self.trees[player].add_vertex(&vertex, self.tolerance)? {
                        log::info!("adding a vertex for player {}", player);
                    } else {
                        log::warn!("duplicate vertex for player {}", player);
                    }
                }
                Status::Unbounded => {
                    let ray = lsol
                        .ray
                        .map(|r| r[..x_of_i.len()].to_vec())
                        .unwrap_or_else(|| direction.clone());
                    if self.trees[player].add_ray(&ray, self.tolerance)? {
                        log::warn!("new ray for player {}", player);
                    } else {
                        log::warn!("duplicate ray for player {}", player);
                    }
                }
                other => {
                    return Err(EpecError::Assertion(format!(
                        "unexpected best-response status {:?} for player {}",
                        other, player
                    )));
                }
            }
        }
        Ok(false)
    }

    /// Inject the value cut `(C x_other + c)^T y >= rhs` into player
    /// `i`'s pool (in <= form), unless already present.
    fn add_value_cut(
        &mut self,
        epec: &mut Epec,
        player: usize,
        rhs: f64,
        x_other: &[f64],
    ) -> EpecResult<()> {
        let gradient = epec.leader_payoff_gradient(player, x_other);
        let neg: Vec<f64> = gradient.iter().map(|v| -v).collect();
        if epec.poly_lcps[player].contains_cut(&neg, -rhs) {
            log::info!("value cut already present for player {}", player);
            return Ok(());
        }
        let row = from_triplets(
            1,
            neg.len(),
            neg.iter().enumerate().map(|(j, v)| (0, j, *v)),
        );
        epec.poly_lcps[player].add_custom_cuts(&row, &[-rhs])?;
        Ok(())
    }

    /// Fallback branching: solve the full complementarity model and pick
    /// the eligible pair with the largest `max(x, z)`. Returns the
    /// no-candidate sentinel when the model is infeasible (denying every
    /// bit on the node) or no bit is eligible.
    fn first_branch_location(
        &mut self,
        epec: &mut Epec,
        env: &Env,
        player: usize,
    ) -> EpecResult<i64> {
        let node_id = self.incumbent[player];
        let node = self.trees[player].node(node_id)?;
        if node.cumulative_branches == self.trees[player].encoding_size() {
            return Ok(NO_CANDIDATE);
        }
        let allowed = node.allowed_branchings.clone();
        let poly = &epec.poly_lcps[player];
        let sol = poly.as_mip(env, false).optimize()?;
        let Some((z, x)) = poly.extract_sols(&sol) else {
            log::info!(
                "player {} has an infeasible complementarity system",
                player
            );
            for bit in 0..self.trees[player].encoding_size() {
                self.trees[player].deny_branching_location(node_id, bit)?;
            }
            return Ok(NO_CANDIDATE);
        };

        let mut best_x: Option<(usize, f64)> = None;
        let mut best_z: Option<(usize, f64)> = None;
        for i in 0..poly.num_rows() {
            if !allowed[i] {
                continue;
            }
            let xv = x[poly.var_pos(i)];
            if best_x.map(|(_, v)| xv > v).unwrap_or(true) {
                best_x = Some((i, xv));
            }
            let zv = z[i];
            if best_z.map(|(_, v)| zv > v).unwrap_or(true) {
                best_z = Some((i, zv));
            }
        }
        Ok(match (best_x, best_z) {
            (Some((ix, vx)), Some((iz, vz))) => {
                if vz > vx {
                    iz as i64
                } else {
                    ix as i64
                }
            }
            _ => NO_CANDIDATE,
        })
    }

    /// Most-violated branching: among unbranched pairs with both sides
    /// positive in the candidate solution, the one maximizing `x + z`.
    fn infeasible_branching(&self, epec: &Epec, player: usize) -> EpecResult<i64> {
        if !epec.nash_equilibrium {
            return Ok(NO_CANDIDATE);
        }
        let node = self.trees[player].node(self.incumbent[player])?;
        let x = epec.get_x_of_i(&epec.solution_x, player, false)?;
        let poly = &epec.poly_lcps[player];
        let z = poly.z_from_x(&x);
        let encoding = poly.sol_encode(&x);

        let mut best = NO_CANDIDATE;
        let mut max_infeas = 0.0;
        for i in 0..poly.num_rows() {
            let xv = x[poly.var_pos(i)];
            if xv > 0.0 && z[i] > 0.0 && node.allowed_branchings[i] && encoding[i] == 0 {
                let score = xv + z[i];
                if score > max_infeas {
                    max_infeas = score;
                    best = i as i64;
                }
            }
        }
        Ok(best)
    }

    /// Deviation branching: a pair active in the best response but not in
    /// the candidate solution.
    fn deviation_branching(&self, epec: &Epec, player: usize) -> EpecResult<i64> {
        if !epec.nash_equilibrium {
            return Ok(NO_CANDIDATE);
        }
        let node = self.trees[player].node(self.incumbent[player])?;
        let x = epec.get_x_of_i(&epec.solution_x, player, false)?;
        let poly = &epec.poly_lcps[player];
        let current = poly.sol_encode(&x);

        let mut deviation = Vec::new();
        epec.respond_sol(&mut deviation, player, &epec.solution_x, None)?;
        let dev_encoding = poly.sol_encode(&deviation);

        let mut result = NO_CANDIDATE;
        for i in 0..poly.num_rows() {
            if dev_encoding[i] > 0 && node.allowed_branchings[i] && current[i] == 0 {
                result = i as i64;
            }
        }
        Ok(result)
    }

    /// Hybrid branching: tentatively pin each eligible pair; empty
    /// tentative relaxations deny the bit (all empty means the player is
    /// infeasible), and among the rest the bit whose approximation most
    /// violates the candidate strategy (measured by a feasibility
    /// relaxation) wins.
    fn hybrid_branching(&mut self, epec: &mut Epec, env: &Env, player: usize) -> EpecResult<i64> {
        log::info!("hybrid branching for player {}", player);
        if !epec.nash_equilibrium {
            return Ok(NO_CANDIDATE);
        }
        let x = epec.get_x_of_i(&epec.solution_x, player, false)?;
        if x.len() != epec.leader_objective[player].c.len() {
            return Err(EpecError::Assertion(
                "candidate strategy has the wrong dimension".to_string(),
            ));
        }
        let node_id = self.incumbent[player];
        let node = self.trees[player].node(node_id)?;
        let current = node.encoding.clone();
        let allowed = node.allowed_branchings.clone();

        let mut best_id = NO_CANDIDATE;
        let mut best_score = -1.0;
        let mut any_feasible = false;
        let mut denied = Vec::new();

        for (i, &open) in allowed.iter().enumerate() {
            if !open {
                continue;
            }
            let mut tentative = current.clone();
            tentative[i] = true;
            if !epec.poly_lcps[player].outer_approximate(env, &tentative, true)? {
                log::info!(
                    "player {} is infeasible when pinning complementarity {}",
                    player,
                    i
                );
                denied.push(i);
                continue;
            }
            any_feasible = true;
            epec.make_player_qp(player)?;
            let model = self.feasibility_qp(epec, player, &x)?;
            let sol = model.optimize()?;
            if sol.status == Status::Infeasible {
                let relaxed = model.feas_relax().optimize()?;
                if relaxed.status == Status::Optimal && relaxed.obj > best_score {
                    best_score = relaxed.obj;
                    best_id = i as i64;
                    log::info!(
                        "player {} has violation {} with complementarity {}",
                        player,
                        best_score,
                        i
                    );
                }
            } else {
                log::info!(
                    "player {} has no violation with complementarity {}",
                    player,
                    i
                );
            }
        }

        for i in denied {
            self.trees[player].deny_branching_location(node_id, i)?;
        }
        // Leave the stored approximation at the incumbent encoding.
        epec.poly_lcps[player].outer_approximate(env, &current, true)?;

        if allowed.iter().any(|&a| a) && !any_feasible {
            return Ok(PLAYER_INFEASIBLE);
        }
        Ok(best_id)
    }

    /// The feasibility program pinning the candidate strategy inside the
    /// player's current approximation (hull auxiliaries stay free).
    fn feasibility_qp(&self, epec: &Epec, player: usize, x: &[f64]) -> EpecResult<Model> {
        let qp = &epec.players_qp[player];
        let zeros = vec![0.0; qp.nx()];
        let mut model = qp.solve_fixed(&epec.env, &zeros, true)?;
        for (j, &v) in x.iter().enumerate() {
            model.add_constr(&[(j, 1.0)], epec_opt::Sense::Equal, v);
        }
        model.set_objective(&[], ObjSense::Minimize);
        Ok(model)
    }

    /// All four branching rules in order, for diagnostics: infeasible,
    /// deviation, hybrid, and (only when the first three fail) the plain
    /// fallback.
    #[allow(dead_code)]
    pub(crate) fn get_next_branch_location(
        &mut self,
        epec: &mut Epec,
        env: &Env,
        player: usize,
    ) -> EpecResult<[i64; 4]> {
        let mut decisions = [NO_CANDIDATE; 4];
        decisions[0] = self.infeasible_branching(epec, player)?;
        decisions[1] = self.deviation_branching(epec, player)?;
        decisions[2] = self.hybrid_branching(epec, env, player)?;
        if decisions[..3].iter().all(|&d| d < 0) {
            decisions[3] = self.first_branch_location(epec, env, player)?;
        }
        log::info!(
            "branching candidates: infeasible={} deviation={} hybrid={} first={}",
            decisions[0],
            decisions[1],
            decisions[2],
            decisions[3]
        );
        Ok(decisions)
    }

    fn print_current_approx(&self) {
        log::info!("current node approximation:");
        for (p, tree) in self.trees.iter().enumerate() {
            if let Ok(node) = tree.node(self.incumbent[p]) {
                let enc: Vec<u8> = node.encoding.iter().map(|&b| u8::from(b)).collect();
                log::info!("\tplayer {}: {:?}", p, enc);
            }
        }
    }

    /// Record end-of-run statistics.
    fn after(&self, epec: &mut Epec) {
        let pure = self.trees.iter().all(|t| t.pure());
        epec.stats.pure_nash_equilibrium = self.feasible && pure;
        epec.stats.outer_complementarities = self
            .incumbent
            .iter()
            .zip(&self.trees)
            .map(|(&id, t)| {
                t.node(id)
                    .map(|n| n.cumulative_branches)
                    .unwrap_or(0)
            })
            .collect();
        epec.solved_feasible = self.feasible;
        log::debug!("post-processing results");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcp::{Lcp, PolyLcp};
    use crate::numeric::{from_triplets, zeros};
    use crate::options::EpecOptions;
    use crate::param::{MpParam, QpConstraints, QpObjective};

    #[test]
    fn test_classify_deviation_boundaries() {
        let tol = 5.1e-4;
        // A 0.05 gap below the best response is far beyond the tolerance:
        // the candidate is outside the true set and gets a value cut.
        assert_eq!(
            classify_deviation(0.95, 1.0, tol),
            Deviation::BelowBestResponse
        );
        // The impossible direction raises the numeric fault upstream.
        assert_eq!(
            classify_deviation(1.05, 1.0, tol),
            Deviation::AboveBestResponse
        );
        // Inside the tolerance band the payoffs agree.
        assert_eq!(classify_deviation(1.0 + 4.0e-4, 1.0, tol), Deviation::Equal);
        assert_eq!(classify_deviation(1.0 - 4.0e-4, 1.0, tol), Deviation::Equal);
    }

    /// A single player with follower bound y <= 1 and objective -y.
    fn single_player_epec() -> Epec {
        let mut epec = Epec::new(EpecOptions::default());
        let mut lower = MpParam::new();
        lower
            .set(
                QpObjective::empty(1, 0),
                QpConstraints {
                    a: zeros(1, 0),
                    b_y: from_triplets(1, 1, vec![(0, 0, 1.0)]),
                    b: vec![1.0],
                },
            )
            .unwrap();
        let leader = QpObjective {
            q: zeros(2, 2),
            c_x: zeros(2, 0),
            c: vec![-1.0, 0.0],
        };
        epec.add_player(lower, 0, leader).unwrap();
        epec.finalize().unwrap();
        epec
    }

    #[test]
    fn test_value_cut_added_once() {
        let mut epec = single_player_epec();
        let mut state = OuterApproximation::init(&mut epec);
        state.add_value_cut(&mut epec, 0, -1.0, &[]).unwrap();
        let (a_cut, b_cut) = epec.poly_lcps[0].cut_pool();
        assert_eq!(a_cut.rows(), 1);
        assert_eq!(b_cut, &[1.0]);
        // The payoff gradient is (-1, 0); negated for the <= pool.
        assert!(epec.poly_lcps[0].contains_cut(&[1.0, 0.0], 1.0));

        // A second identical cut is deduplicated.
        state.add_value_cut(&mut epec, 0, -1.0, &[]).unwrap();
        assert_eq!(epec.poly_lcps[0].cut_pool().0.rows(), 1);
    }

    #[test]
    fn test_first_branch_location_on_feasible_system() {
        let mut epec = single_player_epec();
        let env = epec.env.clone();
        let mut state = OuterApproximation::init(&mut epec);
        let loc = state.first_branch_location(&mut epec, &env, 0).unwrap();
        assert!(loc >= 0, "expected a candidate, got {}", loc);
    }

    #[test]
    fn test_first_branch_denies_on_infeasible_system() {
        // Lower level with y <= -1: the complementarity system is empty.
        let mut epec = Epec::new(EpecOptions::default());
        let mut lower = MpParam::new();
        lower
            .set(
                QpObjective::empty(1, 0),
                QpConstraints {
                    a: zeros(1, 0),
                    b_y: from_triplets(1, 1, vec![(0, 0, 1.0)]),
                    b: vec![-1.0],
                },
            )
            .unwrap();
        let leader = QpObjective {
            q: zeros(2, 2),
            c_x: zeros(2, 0),
            c: vec![1.0, 0.0],
        };
        epec.add_player(lower, 0, leader).unwrap();
        epec.finalize().unwrap();

        let env = epec.env.clone();
        let mut state = OuterApproximation::init(&mut epec);
        let loc = state.first_branch_location(&mut epec, &env, 0).unwrap();
        assert_eq!(loc, NO_CANDIDATE);
        let node = state.trees[0].node(0).unwrap();
        assert!(node.allowed_branchings.iter().all(|&a| !a));
    }

    #[test]
    fn test_hybrid_branching_detects_player_infeasibility() {
        // Inject a system whose relaxation keeps both sides of every pair
        // strictly positive: w_i = x_i - 2 with cuts x_i >= 3. Enforcing
        // any complementarity empties both branches, so hybrid branching
        // must prove the player infeasible.
        let mut epec = single_player_epec();
        let m = from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]);
        let mut forced = PolyLcp::new(Lcp::new(m, vec![-2.0, -2.0], 2, 0).unwrap());
        let cuts = from_triplets(2, 2, vec![(0, 0, -1.0), (1, 1, -1.0)]);
        forced.add_custom_cuts(&cuts, &[-3.0, -3.0]).unwrap();
        epec.inject_poly_lcp(0, forced);

        epec.nash_equilibrium = true;
        epec.solution_x = vec![0.0, 0.0];

        let env = epec.env.clone();
        let mut state = OuterApproximation::init(&mut epec);
        let out = state.hybrid_branching(&mut epec, &env, 0).unwrap();
        assert_eq!(out, PLAYER_INFEASIBLE);
        let node = state.trees[0].node(0).unwrap();
        assert!(node.allowed_branchings.iter().all(|&a| !a));
    }

    #[test]
    fn test_infeasible_branching_requires_equilibrium() {
        let mut epec = single_player_epec();
        let state = OuterApproximation::init(&mut epec);
        assert_eq!(state.infeasible_branching(&epec, 0).unwrap(), NO_CANDIDATE);
    }

    /// One player whose follower pushes y to its bound while the leader
    /// prefers it small: the relaxation admits y = 0 with payoff 0.05
    /// below the true best-response value, so a value cut must fire.
    fn tension_epec() -> Epec {
        let mut epec = Epec::new(EpecOptions::default());
        let mut lower = MpParam::new();
        lower
            .set(
                QpObjective {
                    q: zeros(1, 1),
                    c_x: zeros(1, 0),
                    c: vec![-1.0],
                },
                QpConstraints {
                    a: zeros(1, 0),
                    b_y: from_triplets(1, 1, vec![(0, 0, 1.0)]),
                    b: vec![1.0],
                },
            )
            .unwrap();
        let leader = QpObjective {
            q: zeros(2, 2),
            c_x: zeros(2, 0),
            c: vec![0.05, 0.0],
        };
        epec.add_player(lower, 0, leader).unwrap();
        epec.finalize().unwrap();
        epec
    }

    #[test]
    fn test_value_cut_fires_and_tightens_the_relaxation() {
        let mut epec = tension_epec();
        let env = epec.env.clone();
        let mut state = OuterApproximation::init(&mut epec);

        // At the fully-relaxed root the master picks y = 0, undercutting
        // the true best-response value 0.05 by exactly 0.05.
        epec.poly_lcps[0]
            .outer_approximate(&env, &[false, false], true)
            .unwrap();
        epec.make_players_qps().unwrap();
        assert!(epec.compute_nash_eq(None).unwrap());
        assert!(epec.get_val_lead_foll(0, 0).unwrap().abs() < 1e-6);

        let mut added = false;
        assert!(!state.is_feasible(&mut epec, &env, &mut added).unwrap());
        let (pool, rhs) = epec.poly_lcps[0].cut_pool();
        assert_eq!(pool.rows(), 1, "exactly one value cut expected");
        assert!((rhs[0] + 0.05).abs() < 1e-9);
        assert!(epec.poly_lcps[0].contains_cut(&[-0.05, 0.0], -0.05));

        // A second pass over the same candidate deduplicates the cut.
        state.add_value_cut(&mut epec, 0, 0.05, &[]).unwrap();
        assert_eq!(epec.poly_lcps[0].cut_pool().0.rows(), 1);

        // With the cut in place the relaxation only admits the true
        // response.
        epec.poly_lcps[0]
            .outer_approximate(&env, &[false, false], true)
            .unwrap();
        epec.make_players_qps().unwrap();
        assert!(epec.compute_nash_eq(None).unwrap());
        assert!((epec.get_val_lead_foll(0, 0).unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_driver_recovers_from_a_value_cut() {
        let mut epec = tension_epec();
        epec.find_nash_eq().unwrap();
        let stats = epec.get_statistics();
        assert_eq!(stats.status, crate::options::EpecStatus::NashEqFound);
        assert!(epec.is_solved());
        assert!((epec.get_val_lead_foll(0, 0).unwrap() - 1.0).abs() < 1e-5);
        assert!(epec.poly_lcps[0].cut_pool().0.rows() >= 1);
        assert!(stats.num_iterations >= 2);
    }
}
