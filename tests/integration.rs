//! Integration tests — end-to-end variational stepping on small tet meshes.
//!
//! These verify the full pipeline (mesh → model + mass → incremental
//! potential → L-BFGS → commit) and the contract properties of the stepper:
//! equilibrium as a fixed point, gravity sag, the h → 0 boundary,
//! convergence monotonicity in the iteration cap, construction idempotence,
//! energy dissipation, and history-pair integrity under each recovery
//! policy.

use approx::assert_abs_diff_eq;
use galatea::mass::MassMatrix;
use galatea::mesh::TetMesh;
use galatea::neohookean::NeohookeanModel;
use galatea::objective::IncrementalPotential;
use galatea::optimizer::minimize;
use galatea::stepper::VariationalStepper;
use galatea::types::{
    Material, RecoveryPolicy, SimError, SolverOptions, StepPhase, StepperConfig,
};
use ndarray::Array2;

// ─────────────────────────────────────────────────────────────
//  Helpers (shared fixture construction)
// ─────────────────────────────────────────────────────────────

/// Soft, light material: forces and gradients stay O(1) on unit geometry,
/// so no line-search probe ever leaves the invertibility region.
fn test_material() -> Material {
    Material {
        youngs_modulus: 50.0,
        poisson_ratio: 0.4,
        density: 1.0,
    }
}

/// Unit tetrahedron, vertex 0 fixed: 9 free DOFs.
fn single_tet_model() -> NeohookeanModel {
    let vertices = Array2::from_shape_vec(
        (4, 3),
        vec![
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0, //
        ],
    )
    .unwrap();
    let mesh = TetMesh::new(vertices, vec![[0, 1, 2, 3]], vec![0]).unwrap();
    NeohookeanModel::new(mesh, test_material()).unwrap()
}

fn test_config(h: f64, gravity: [f64; 3]) -> StepperConfig {
    StepperConfig {
        h,
        gravity,
        solver: SolverOptions {
            epsilon: 1e-4,
            max_iterations: 100,
            ..SolverOptions::default()
        },
        recovery: RecoveryPolicy::Abort,
    }
}

fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

// ─────────────────────────────────────────────────────────────
//  Test: equilibrium is a fixed point
// ─────────────────────────────────────────────────────────────

/// Zero gravity, zero initial velocity, rest configuration: one step must
/// return the rest configuration within solver tolerance.
#[test]
fn equilibrium_is_a_fixed_point() {
    let model = single_tet_model();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let mut stepper = VariationalStepper::new(&model, test_config(0.05, [0.0, 0.0, 0.0]));

    let rest = model.rest_configuration();
    let report = stepper.step_once(&model, &mass).unwrap();

    assert!(report.converged);
    assert_eq!(stepper.phase(), StepPhase::Converged);
    assert!(
        max_abs_diff(&stepper.state().q_cur, &rest) < 1e-6,
        "rest configuration drifted by {:.3e}",
        max_abs_diff(&stepper.state().q_cur, &rest),
    );

    eprintln!(
        "equilibrium: {} iterations, |∇Φ| = {:.3e}",
        report.iterations, report.gradient_norm,
    );
}

// ─────────────────────────────────────────────────────────────
//  Test: gravity sag  (the end-to-end scenario)
// ─────────────────────────────────────────────────────────────

/// Single tet, vertex 0 fixed, gravity on, h = 0.05: after one step every
/// free node has moved downward and the solve converged within 100
/// iterations.
#[test]
fn free_nodes_sag_under_gravity() {
    let model = single_tet_model();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let mut stepper = VariationalStepper::new(&model, test_config(0.05, [0.0, -9.8, 0.0]));

    let rest = model.rest_configuration();
    let report = stepper.step_once(&model, &mass).unwrap();

    assert!(report.converged, "gravity step did not converge");
    assert!(report.iterations <= 100);

    let q = &stepper.state().q_cur;
    let free_count = q.len() / 3;
    for f in 0..free_count {
        let dy = q[3 * f + 1] - rest[3 * f + 1];
        assert!(
            dy < 0.0,
            "free node {f}: y-displacement = {dy:.3e}, expected negative",
        );
    }

    eprintln!(
        "gravity sag: {} iterations, Φ = {:.6e}",
        report.iterations, report.value,
    );
}

// ─────────────────────────────────────────────────────────────
//  Test: h → 0 boundary
// ─────────────────────────────────────────────────────────────

/// As h → 0 the inertial term dominates and q_next → q_cur.
#[test]
fn vanishing_timestep_freezes_the_configuration() {
    let model = single_tet_model();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let mut stepper = VariationalStepper::new(&model, test_config(1e-5, [0.0, -9.8, 0.0]));

    let before = stepper.state().q_cur.clone();
    stepper.step_once(&model, &mass).unwrap();

    let moved = max_abs_diff(&stepper.state().q_cur, &before);
    assert!(moved < 1e-6, "h = 1e-5 moved the configuration by {moved:.3e}");
}

// ─────────────────────────────────────────────────────────────
//  Test: convergence monotonicity in the iteration cap
// ─────────────────────────────────────────────────────────────

/// Raising `max_iterations` (epsilon fixed) never increases the final
/// objective value.
#[test]
fn objective_value_is_monotone_in_iteration_cap() {
    let model = single_tet_model();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let rest = model.rest_configuration();

    let potential =
        IncrementalPotential::new(&model, &mass, &rest, &rest, 0.05, [0.0, -9.8, 0.0]).unwrap();

    let value_at_cap = |cap: usize| -> f64 {
        let options = SolverOptions {
            epsilon: 1e-10,
            max_iterations: cap,
            ..SolverOptions::default()
        };
        match minimize(&potential, &rest, &options) {
            Ok(min) => min.value,
            Err(SimError::DidNotConverge { best }) => best.value,
            Err(SimError::LineSearchFailure { best: Some(best) }) => best.value,
            Err(e) => panic!("unexpected failure at cap {cap}: {e}"),
        }
    };

    let v3 = value_at_cap(3);
    let v10 = value_at_cap(10);
    let v100 = value_at_cap(100);

    let slack = 1e-9 * v3.abs().max(1.0);
    assert!(v10 <= v3 + slack, "v10 = {v10:.9e} > v3 = {v3:.9e}");
    assert!(v100 <= v10 + slack, "v100 = {v100:.9e} > v10 = {v10:.9e}");
}

// ─────────────────────────────────────────────────────────────
//  Test: construction idempotence
// ─────────────────────────────────────────────────────────────

/// Two objectives built from identical inputs agree exactly at the same
/// trial point.
#[test]
fn objective_construction_is_idempotent() {
    let model = single_tet_model();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let rest = model.rest_configuration();

    let q_cur: Vec<f64> = rest.iter().map(|x| x + 0.01).collect();
    let q_new: Vec<f64> = rest.iter().map(|x| x + 0.02).collect();

    let a = IncrementalPotential::new(&model, &mass, &q_cur, &rest, 0.05, [0.0, -9.8, 0.0])
        .unwrap();
    let b = IncrementalPotential::new(&model, &mass, &q_cur, &rest, 0.05, [0.0, -9.8, 0.0])
        .unwrap();

    let (va, ga) = a.evaluate(&q_new).unwrap();
    let (vb, gb) = b.evaluate(&q_new).unwrap();

    assert_eq!(va, vb);
    assert_eq!(ga, gb);
}

// ─────────────────────────────────────────────────────────────
//  Test: energy dissipation
// ─────────────────────────────────────────────────────────────

/// Pure elastic system (no gravity), small h: total mechanical energy
/// (kinetic + strain) does not increase across a step.
#[test]
fn implicit_step_does_not_gain_energy() {
    let model = single_tet_model();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let rest = model.rest_configuration();

    // Stretched start, zero velocity.
    let stretched: Vec<f64> = rest.iter().map(|x| x * 1.02).collect();
    let h = 0.01;
    let config = test_config(h, [0.0, 0.0, 0.0]);
    let mut stepper = VariationalStepper::with_state(
        config,
        galatea::types::SimState::at_rest(stretched.clone()),
    );

    let e_before = model.energy(&stretched).unwrap();

    let report = stepper.step_once(&model, &mass).unwrap();
    assert!(report.converged);

    let q_next = &stepper.state().q_cur;
    let v: Vec<f64> = q_next
        .iter()
        .zip(&stretched)
        .map(|(n, c)| (n - c) / h)
        .collect();
    let mv = mass.apply(&v).unwrap();
    let kinetic: f64 = 0.5 * v.iter().zip(&mv).map(|(a, b)| a * b).sum::<f64>();
    let e_after = kinetic + model.energy(q_next).unwrap();

    assert!(
        e_after <= e_before * (1.0 + 1e-6) + 1e-9,
        "energy grew: {e_before:.9e} → {e_after:.9e}",
    );

    eprintln!("dissipation: U₀ = {e_before:.6e}, E₁ = {e_after:.6e}");
}

// ─────────────────────────────────────────────────────────────
//  Test: multi-step run advances the clock
// ─────────────────────────────────────────────────────────────

/// Three accepted steps advance time by 3h and the frame counter by 3.
#[test]
fn advance_commits_each_accepted_step() {
    let model = single_tet_model();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let mut stepper = VariationalStepper::new(&model, test_config(0.05, [0.0, -9.8, 0.0]));

    let reports = stepper.advance(&model, &mass, 3).unwrap();
    assert_eq!(reports.len(), 3);
    assert_eq!(stepper.state().frame, 3);
    assert_abs_diff_eq!(stepper.state().time, 0.15, epsilon = 1e-12);

    // History invariant: q_prev is the accepted solution of step 2.
    assert!(stepper.state().q_prev != stepper.state().q_cur);
}

// ─────────────────────────────────────────────────────────────
//  Test: recovery policies and history integrity
// ─────────────────────────────────────────────────────────────

/// An unreachable tolerance plus a one-iteration cap forces
/// `DidNotConverge` deterministically.
fn strangled_config(recovery: RecoveryPolicy) -> StepperConfig {
    StepperConfig {
        h: 0.05,
        gravity: [0.0, -9.8, 0.0],
        solver: SolverOptions {
            epsilon: 1e-14,
            max_iterations: 1,
            ..SolverOptions::default()
        },
        recovery,
    }
}

/// `Abort` propagates the failure and leaves the committed state untouched.
#[test]
fn rejected_step_preserves_history() {
    let model = single_tet_model();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let mut stepper =
        VariationalStepper::new(&model, strangled_config(RecoveryPolicy::Abort));

    let q_cur_before = stepper.state().q_cur.clone();
    let q_prev_before = stepper.state().q_prev.clone();

    let err = stepper.step_once(&model, &mass).unwrap_err();
    assert!(matches!(err, SimError::DidNotConverge { .. }), "got {err}");
    assert_eq!(stepper.phase(), StepPhase::Failed);
    assert_eq!(stepper.state().q_cur, q_cur_before);
    assert_eq!(stepper.state().q_prev, q_prev_before);
    assert_eq!(stepper.state().frame, 0);
    assert_eq!(stepper.state().time, 0.0);
}

/// `AcceptBestEffort` commits the best iterate and flags it unconverged.
#[test]
fn best_effort_policy_commits_flagged_result() {
    let model = single_tet_model();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let mut stepper = VariationalStepper::new(
        &model,
        strangled_config(RecoveryPolicy::AcceptBestEffort),
    );

    let report = stepper.step_once(&model, &mass).unwrap();
    assert!(!report.converged);
    assert_eq!(stepper.phase(), StepPhase::Converged);
    assert_eq!(stepper.state().frame, 1);
}

/// `RetryHalved` re-attempts with h/2, h/4, then propagates the failure
/// with history intact.
#[test]
fn retry_policy_exhausts_then_propagates() {
    let model = single_tet_model();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let mut stepper = VariationalStepper::new(
        &model,
        strangled_config(RecoveryPolicy::RetryHalved { max_retries: 2 }),
    );

    let err = stepper.step_once(&model, &mass).unwrap_err();
    assert!(matches!(err, SimError::DidNotConverge { .. }), "got {err}");
    assert_eq!(stepper.phase(), StepPhase::Failed);
    assert_eq!(stepper.state().frame, 0);
}

// ─────────────────────────────────────────────────────────────
//  Test: construction validation
// ─────────────────────────────────────────────────────────────

/// Malformed inputs are rejected at construction with `InvalidArgument`.
#[test]
fn objective_construction_validates_inputs() {
    let model = single_tet_model();
    let mass = MassMatrix::consistent(model.mesh(), test_material().density).unwrap();
    let rest = model.rest_configuration();

    let zero_h =
        IncrementalPotential::new(&model, &mass, &rest, &rest, 0.0, [0.0, -9.8, 0.0]);
    assert!(matches!(zero_h, Err(SimError::InvalidArgument(_))));

    let short = vec![0.0; rest.len() - 1];
    let mismatched =
        IncrementalPotential::new(&model, &mass, &short, &rest, 0.05, [0.0, -9.8, 0.0]);
    assert!(matches!(mismatched, Err(SimError::InvalidArgument(_))));
}
