//! Finite-difference gradient tests for the elastic model and the
//! incremental potential.
//!
//! Tests build a two-tet mesh with one fixed vertex, deform it with a
//! deterministic perturbation, and compare every component of the analytic
//! gradient against a central-difference estimate:
//!
//!     dΦ/dq_i  ≈  [ Φ(q + δ e_i) − Φ(q − δ e_i) ] / 2δ
//!
//! Both the elastic gradient ∇U and the full objective gradient ∇Φ
//! (inertial + elastic + external terms) are exercised, component-wise,
//! within 1e-4 relative tolerance.

use galatea::mass::MassMatrix;
use galatea::mesh::TetMesh;
use galatea::neohookean::NeohookeanModel;
use galatea::objective::IncrementalPotential;
use galatea::types::Material;
use ndarray::Array2;

// ─────────────────────────────────────────────────────────────
//  Helpers: build small test meshes
// ─────────────────────────────────────────────────────────────

/// Soft test material, so energies stay O(1)–O(100) on unit geometry.
fn test_material() -> Material {
    Material {
        youngs_modulus: 1e4,
        poisson_ratio: 0.4,
        density: 100.0,
    }
}

/// Two tetrahedra sharing the face (1, 2, 3), vertex 0 fixed.
///
///     0 = (0,0,0)   fixed
///     1 = (1,0,0)
///     2 = (0,1,0)
///     3 = (0,0,1)
///     4 = (1,1,1)
fn two_tet_mesh() -> TetMesh {
    let vertices = Array2::from_shape_vec(
        (5, 3),
        vec![
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0, //
            1.0, 1.0, 1.0, //
        ],
    )
    .unwrap();
    let tets = vec![[0, 1, 2, 3], [1, 2, 3, 4]];
    TetMesh::new(vertices, tets, vec![0]).unwrap()
}

/// Deterministic small perturbation of a configuration.  `seed` decorrelates
/// the perturbations of q_prev / q_cur / q_new.
fn perturbed(q: &[f64], scale: f64, seed: f64) -> Vec<f64> {
    q.iter()
        .enumerate()
        .map(|(i, &x)| x + scale * (seed + 0.7 * i as f64).sin())
        .collect()
}

/// Per-component relative comparison of analytic vs central-difference
/// gradients.
fn assert_gradient_matches(analytic: &[f64], fd: &[f64], label: &str) {
    for (i, (&a, &f)) in analytic.iter().zip(fd).enumerate() {
        let denom = a.abs().max(f.abs()).max(1.0);
        let rel = (a - f).abs() / denom;
        assert!(
            rel < 1e-4,
            "{label}: component {i}: analytic = {a:.9e}, fd = {f:.9e}, rel = {rel:.3e}",
        );
    }
}

// ─────────────────────────────────────────────────────────────
//  Elastic model gradient
// ─────────────────────────────────────────────────────────────

/// ∇U against central differences of U at a deformed configuration.
#[test]
fn elastic_gradient_matches_finite_differences() {
    let model = NeohookeanModel::new(two_tet_mesh(), test_material()).unwrap();
    let q = perturbed(&model.rest_configuration(), 0.02, 0.3);

    let analytic = model.gradient(&q).unwrap();

    let delta = 1e-6;
    let mut fd = vec![0.0; q.len()];
    for i in 0..q.len() {
        let mut plus = q.clone();
        let mut minus = q.clone();
        plus[i] += delta;
        minus[i] -= delta;
        fd[i] =
            (model.energy(&plus).unwrap() - model.energy(&minus).unwrap()) / (2.0 * delta);
    }

    assert_gradient_matches(&analytic, &fd, "elastic");
}

/// The rest configuration is the zero-energy, zero-gradient point.
#[test]
fn elastic_rest_state_is_stress_free() {
    let model = NeohookeanModel::new(two_tet_mesh(), test_material()).unwrap();
    let rest = model.rest_configuration();

    let u = model.energy(&rest).unwrap();
    assert!(u.abs() < 1e-10, "rest energy = {u:.3e}, expected 0");

    let grad = model.gradient(&rest).unwrap();
    for (i, &g) in grad.iter().enumerate() {
        assert!(g.abs() < 1e-8, "rest gradient component {i} = {g:.3e}");
    }
}

// ─────────────────────────────────────────────────────────────
//  Incremental potential gradient
// ─────────────────────────────────────────────────────────────

/// ∇Φ (inertial + elastic + external) against central differences of Φ.
#[test]
fn objective_gradient_matches_finite_differences() {
    let model = NeohookeanModel::new(two_tet_mesh(), test_material()).unwrap();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();

    let rest = model.rest_configuration();
    let q_prev = perturbed(&rest, 0.01, 1.1);
    let q_cur = perturbed(&rest, 0.01, 2.2);
    let q_new = perturbed(&rest, 0.02, 3.3);

    let potential =
        IncrementalPotential::new(&model, &mass, &q_cur, &q_prev, 0.02, [0.0, -9.8, 0.0])
            .unwrap();

    let (_, analytic) = potential.evaluate(&q_new).unwrap();

    let delta = 1e-6;
    let mut fd = vec![0.0; q_new.len()];
    for i in 0..q_new.len() {
        let mut plus = q_new.clone();
        let mut minus = q_new.clone();
        plus[i] += delta;
        minus[i] -= delta;
        let (vp, _) = potential.evaluate(&plus).unwrap();
        let (vm, _) = potential.evaluate(&minus).unwrap();
        fd[i] = (vp - vm) / (2.0 * delta);
    }

    assert_gradient_matches(&analytic, &fd, "objective");
}

/// With zero gravity and a stationary history at rest, the objective's
/// gradient vanishes at rest: the equations of motion hold trivially.
#[test]
fn objective_gradient_vanishes_at_equilibrium() {
    let model = NeohookeanModel::new(two_tet_mesh(), test_material()).unwrap();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let rest = model.rest_configuration();

    let potential =
        IncrementalPotential::new(&model, &mass, &rest, &rest, 0.05, [0.0, 0.0, 0.0]).unwrap();
    let (_, grad) = potential.evaluate(&rest).unwrap();

    for (i, &g) in grad.iter().enumerate() {
        assert!(g.abs() < 1e-8, "equilibrium gradient component {i} = {g:.3e}");
    }
}
