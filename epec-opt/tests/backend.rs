//! Integration tests exercising the backend capability set end to end.

use epec_opt::{Env, ObjSense, Sense, Status, VarType};
use sprs::TriMat;

#[test]
fn test_lp_primal_dual_consistency() {
    // min -3x - 5y s.t. x <= 4, 2y <= 12, 3x + 2y <= 18 (a classic):
    // optimum (2, 6) with objective -36, duals (0, -3/2, -1).
    let env = Env::new();
    let mut m = env.model();
    let x = m.add_var(0.0, f64::INFINITY, -3.0, VarType::Continuous);
    let y = m.add_var(0.0, f64::INFINITY, -5.0, VarType::Continuous);
    m.add_constr(&[(x, 1.0)], Sense::Less, 4.0);
    m.add_constr(&[(y, 2.0)], Sense::Less, 12.0);
    m.add_constr(&[(x, 3.0), (y, 2.0)], Sense::Less, 18.0);

    let sol = m.optimize().unwrap();
    assert_eq!(sol.status, Status::Optimal);
    assert!((sol.x[x] - 2.0).abs() < 1e-7);
    assert!((sol.x[y] - 6.0).abs() < 1e-7);
    assert!((sol.obj + 36.0).abs() < 1e-7);

    let duals = sol.duals.unwrap();
    assert!(duals[0].abs() < 1e-7);
    assert!((duals[1] + 1.5).abs() < 1e-7);
    assert!((duals[2] + 1.0).abs() < 1e-7);

    // Strong duality: b^T pi equals the objective.
    let bound = 4.0 * duals[0] + 12.0 * duals[1] + 18.0 * duals[2];
    assert!((bound - sol.obj).abs() < 1e-7);
}

#[test]
fn test_milp_with_big_m_complementarity() {
    // Linearized complementarity x * s = 0 with x + s >= 1 and
    // max 2x + s: the x side wins.
    let env = Env::new();
    let big_m = 1e5;
    let mut m = env.model();
    let x = m.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
    let s = m.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
    let u = m.add_var(0.0, 1.0, 0.0, VarType::Binary);
    m.add_constr(&[(x, 1.0), (s, 1.0)], Sense::Greater, 1.0);
    m.add_constr(&[(x, 1.0)], Sense::Less, 2.0);
    m.add_constr(&[(s, 1.0)], Sense::Less, 2.0);
    m.add_constr(&[(x, 1.0), (u, -big_m)], Sense::Less, 0.0);
    m.add_constr(&[(s, 1.0), (u, big_m)], Sense::Less, big_m);
    m.set_objective(&[(x, 2.0), (s, 1.0)], ObjSense::Maximize);

    let sol = m.optimize().unwrap();
    assert_eq!(sol.status, Status::Optimal);
    assert!((sol.obj - 4.0).abs() < 1e-5, "obj = {}", sol.obj);
    assert!(sol.x[s].abs() < 1e-5);
}

#[test]
fn test_miqp_rounds_to_the_better_branch() {
    // min (x - 1.4)^2 + 10 u with x = u (indicator-free coupling):
    // u = 0 gives 1.96, u = 1 gives 0.16 + 10. Branching must pick u = 0.
    let env = Env::new();
    let mut m = env.model();
    let x = m.add_var(0.0, f64::INFINITY, -2.8, VarType::Continuous);
    let u = m.add_var(0.0, 1.0, 10.0, VarType::Binary);
    m.add_constr(&[(x, 1.0), (u, -1.0)], Sense::Equal, 0.0);
    let mut q = TriMat::new((2, 2));
    q.add_triplet(0, 0, 2.0);
    m.set_quadratic_objective(q.to_csc());

    let sol = m.optimize().unwrap();
    assert_eq!(sol.status, Status::Optimal);
    assert!(sol.x[u] < 0.5, "u = {}", sol.x[u]);
    // Objective reported without the constant 1.4^2 term.
    assert!((sol.obj - 0.0).abs() < 1e-5, "obj = {}", sol.obj);
}

#[test]
fn test_indicator_pair_models_complementarity() {
    // u = 1 -> x <= 0, u = 0 -> s <= 0, with x + s = 1: exactly one of
    // x, s survives; minimizing x forces the x side to zero.
    let env = Env::new();
    let mut m = env.model();
    let x = m.add_var(0.0, f64::INFINITY, 1.0, VarType::Continuous);
    let s = m.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
    let u = m.add_var(0.0, 1.0, 0.0, VarType::Binary);
    m.add_constr(&[(x, 1.0), (s, 1.0)], Sense::Equal, 1.0);
    m.add_indicator(u, true, &[(x, 1.0)], Sense::Less, 0.0);
    m.add_indicator(u, false, &[(s, 1.0)], Sense::Less, 0.0);

    let sol = m.optimize().unwrap();
    assert_eq!(sol.status, Status::Optimal);
    assert!(sol.x[x].abs() < 1e-6);
    assert!((sol.x[s] - 1.0).abs() < 1e-6);
}

#[test]
fn test_unbounded_mip_exposes_a_ray() {
    let env = Env::new();
    let mut m = env.model();
    let x = m.add_var(0.0, f64::INFINITY, -1.0, VarType::Continuous);
    let u = m.add_var(0.0, 1.0, 0.0, VarType::Binary);
    m.add_constr(&[(u, 1.0)], Sense::Less, 1.0);

    let sol = m.optimize().unwrap();
    assert_eq!(sol.status, Status::Unbounded);
    let ray = sol.ray.unwrap();
    assert!(ray[x] > 0.5);
}

#[test]
fn test_time_limit_is_honored() {
    // A model with many binaries and a zero-second budget stops early.
    let env = Env::new();
    let mut m = env.model();
    let vars: Vec<usize> = (0..12)
        .map(|_| m.add_var(0.0, 1.0, 1.0, VarType::Binary))
        .collect();
    let coefs: Vec<(usize, f64)> = vars.iter().map(|&v| (v, 1.0)).collect();
    m.add_constr(&coefs, Sense::Greater, 6.0);
    m.params.time_limit = Some(std::time::Duration::from_nanos(1));

    let sol = m.optimize().unwrap();
    assert_eq!(sol.status, Status::TimeLimit);
}
