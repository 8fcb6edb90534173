//! Separation-oracle mechanics over a known polytope.
//!
//! Drives the membership LP and the best-response pricing step by hand on
//! a triangle whose vertex set is only partially known, the way the oracle
//! does during a feasibility check.

use epec_core::OuterTree;
use epec_opt::{Env, ObjSense, Sense, Status, VarType};

/// Maximize `direction` over the triangle with vertices (0,0), (1,0), (0,1).
fn price_over_triangle(env: &Env, direction: &[f64]) -> (Vec<f64>, f64) {
    let mut m = env.model();
    let a = m.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
    let b = m.add_var(0.0, f64::INFINITY, 0.0, VarType::Continuous);
    m.add_constr(&[(a, 1.0), (b, 1.0)], Sense::Less, 1.0);
    m.set_objective(
        &[(a, direction[0]), (b, direction[1])],
        ObjSense::Maximize,
    );
    let sol = m.optimize().unwrap();
    assert_eq!(sol.status, Status::Optimal);
    (sol.x, sol.obj)
}

#[test]
fn test_oracle_discovers_the_missing_vertex() {
    let env = Env::new();
    let mut tree = OuterTree::new(1);
    tree.add_vertex(&[0.0, 0.0], 1e-6).unwrap();
    tree.add_vertex(&[1.0, 0.0], 1e-6).unwrap();

    let candidate = [1.0 / 3.0, 1.0 / 3.0];

    // Round one: the candidate is outside conv{A, B}, so the membership
    // LP exposes a separating direction.
    let (model, _) = tree.update_membership(&env, &candidate).unwrap();
    let sol = model.optimize().unwrap();
    assert_eq!(sol.status, Status::Optimal);
    assert!(sol.obj > 1e-6, "expected separation, got {}", sol.obj);
    let direction = sol.x[..2].to_vec();

    // Pricing the direction over the true polytope cannot yield a cut
    // (the candidate is inside the true set); it yields the missing
    // vertex instead.
    let (vertex, value) = price_over_triangle(&env, &direction);
    let here: f64 = direction
        .iter()
        .zip(&candidate)
        .map(|(d, c)| d * c)
        .sum();
    assert!(value >= here - 1e-6, "a valid point must not be cut off");
    assert!(tree.add_vertex(&vertex[..2], 1e-6).unwrap());
    assert!((vertex[1] - 1.0).abs() < 1e-6, "expected (0, 1), got {:?}", vertex);

    // Round two: with all three vertices known, membership certifies the
    // candidate with full support.
    let (model, v_rows) = tree.update_membership(&env, &candidate).unwrap();
    let v_rows = v_rows.to_vec();
    let sol = model.optimize().unwrap();
    assert_eq!(sol.status, Status::Optimal);
    assert!(sol.obj.abs() <= 1e-6, "expected membership, got {}", sol.obj);
    assert!(sol.x[..2].iter().all(|y| y.abs() <= 1e-6));

    let duals = sol.duals.unwrap();
    let support = v_rows.iter().filter(|&&r| duals[r].abs() > 1e-6).count();
    assert_eq!(support, 3, "the centroid uses every vertex");
}

#[test]
fn test_single_vertex_support_is_pure() {
    let env = Env::new();
    let mut tree = OuterTree::new(1);
    tree.add_vertex(&[0.0, 0.0], 1e-6).unwrap();
    tree.add_vertex(&[1.0, 0.0], 1e-6).unwrap();

    // The candidate coincides with vertex B.
    let (model, v_rows) = tree.update_membership(&env, &[1.0, 0.0]).unwrap();
    let v_rows = v_rows.to_vec();
    let sol = model.optimize().unwrap();
    assert_eq!(sol.status, Status::Optimal);
    assert!(sol.obj.abs() <= 1e-6);

    let duals = sol.duals.unwrap();
    let support = v_rows.iter().filter(|&&r| duals[r].abs() > 1e-6).count();
    assert_eq!(support, 1);
}
