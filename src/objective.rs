//! The per-step incremental potential.
//!
//! One implicit timestep is recast as an unconstrained minimization.  With
//! a = q_new − 2 q_cur + q_prev (the discrete acceleration, h² absorbed):
//!
//! ```text
//!     Φ(q_new) = ½ aᵀ M a / h²  +  U(q_new)  −  F_extᵀ q_new
//!     ∇Φ(q_new) = M a / h²  +  ∇U(q_new)  −  F_ext
//! ```
//!
//! The stationarity condition  M a / h² + ∇U(q_new) = F_ext  is exactly the
//! backward-Euler equation of motion, so the minimizer is the next
//! configuration.  One instance is constructed per timestep and is immutable
//! during the solve that consumes it; the only cached quantity is
//! F_ext = M · g.

use crate::mass::MassMatrix;
use crate::neohookean::NeohookeanModel;
use crate::types::SimError;

// ─────────────────────────────────────────────────────────────
//  IncrementalPotential
// ─────────────────────────────────────────────────────────────

/// Scalar objective and analytic gradient for one implicit timestep.
pub struct IncrementalPotential<'a> {
    model: &'a NeohookeanModel,
    mass: &'a MassMatrix,
    q_cur: Vec<f64>,
    q_prev: Vec<f64>,
    f_ext: Vec<f64>,
    h: f64,
}

impl<'a> IncrementalPotential<'a> {
    /// Build the objective for one step.
    ///
    /// `gravity` is the per-node acceleration from which the cached external
    /// force F_ext = M · g is derived.  Fails with `InvalidArgument` when
    /// h is not positive and finite or when any vector length disagrees
    /// with the mass matrix dimension.
    pub fn new(
        model: &'a NeohookeanModel,
        mass: &'a MassMatrix,
        q_cur: &[f64],
        q_prev: &[f64],
        h: f64,
        gravity: [f64; 3],
    ) -> Result<Self, SimError> {
        if !(h > 0.0) || !h.is_finite() {
            return Err(SimError::InvalidArgument(format!(
                "timestep must be positive and finite, got {h}",
            )));
        }
        let dim = mass.dimension();
        if model.dimension() != dim {
            return Err(SimError::InvalidArgument(format!(
                "model dimension {} disagrees with mass matrix dimension {dim}",
                model.dimension(),
            )));
        }
        if q_cur.len() != dim || q_prev.len() != dim {
            return Err(SimError::InvalidArgument(format!(
                "history pair has lengths ({}, {}), mass matrix dimension is {dim}",
                q_cur.len(),
                q_prev.len(),
            )));
        }

        let f_ext = mass.gravity_force(gravity)?;
        Ok(Self {
            model,
            mass,
            q_cur: q_cur.to_vec(),
            q_prev: q_prev.to_vec(),
            f_ext,
            h,
        })
    }

    /// Number of generalized coordinates.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.mass.dimension()
    }

    /// Timestep this objective was built for.
    #[inline]
    pub fn h(&self) -> f64 {
        self.h
    }

    /// Evaluate Φ and ∇Φ at a trial configuration.
    ///
    /// Callable repeatedly, once per optimizer iteration.  NaN or Inf in the
    /// elastic energy or its gradient is reported as `NumericalFailure`,
    /// never clamped.
    pub fn evaluate(&self, q_new: &[f64]) -> Result<(f64, Vec<f64>), SimError> {
        let dim = self.dimension();
        if q_new.len() != dim {
            return Err(SimError::InvalidArgument(format!(
                "trial configuration has length {}, expected {dim}",
                q_new.len(),
            )));
        }

        let a: Vec<f64> = (0..dim)
            .map(|i| q_new[i] - 2.0 * self.q_cur[i] + self.q_prev[i])
            .collect();
        let ma = self.mass.apply(&a)?;
        let h2 = self.h * self.h;

        let inertial: f64 = 0.5 * dot(&a, &ma) / h2;
        let elastic = self.model.energy(q_new)?;
        let external = dot(&self.f_ext, q_new);
        let value = inertial + elastic - external;

        let grad_u = self.model.gradient(q_new)?;
        let mut grad = Vec::with_capacity(dim);
        for i in 0..dim {
            grad.push(ma[i] / h2 + grad_u[i] - self.f_ext[i]);
        }

        if !value.is_finite() {
            return Err(SimError::NumericalFailure(format!(
                "objective value is {value} (elastic energy {elastic})",
            )));
        }
        if let Some(i) = grad.iter().position(|g| !g.is_finite()) {
            return Err(SimError::NumericalFailure(format!(
                "gradient component {i} is {}",
                grad[i],
            )));
        }

        Ok((value, grad))
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
