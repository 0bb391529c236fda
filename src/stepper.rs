//! Time-stepper loop: repeated variational implicit-Euler steps.
//!
//! Each step builds a fresh [`IncrementalPotential`] from the committed
//! history pair, minimizes it warm-started at `q_cur`, and commits the
//! minimizer.  The state machine is
//!
//! ```text
//!     Idle → Stepping → { Converged, Failed }
//! ```
//!
//! A rejected step leaves the history pair, clock and frame counter
//! untouched; what happens on rejection is the configured
//! [`RecoveryPolicy`], not hardwired behavior.

use crate::mass::MassMatrix;
use crate::neohookean::NeohookeanModel;
use crate::objective::IncrementalPotential;
use crate::optimizer::minimize;
use crate::types::{
    Minimization, RecoveryPolicy, SimError, SimState, StepPhase, StepReport, StepperConfig,
};
use log::{debug, warn};

// ─────────────────────────────────────────────────────────────
//  VariationalStepper
// ─────────────────────────────────────────────────────────────

/// Orchestrates repeated stepping over a model + mass-matrix pair.
///
/// Owns the committed simulation state; the model and mass matrix are
/// passed per call so the stepper never outlives or mutates them.
#[derive(Debug)]
pub struct VariationalStepper {
    config: StepperConfig,
    state: SimState,
    phase: StepPhase,
}

impl VariationalStepper {
    /// Stepper at the model's rest configuration with zero initial velocity.
    pub fn new(model: &NeohookeanModel, config: StepperConfig) -> Self {
        Self {
            state: SimState::at_rest(model.rest_configuration()),
            config,
            phase: StepPhase::Idle,
        }
    }

    /// Stepper from an explicit pre-existing state (e.g. a resumed run).
    pub fn with_state(config: StepperConfig, state: SimState) -> Self {
        Self {
            config,
            state,
            phase: StepPhase::Idle,
        }
    }

    /// Committed simulation state.
    #[inline]
    pub fn state(&self) -> &SimState {
        &self.state
    }

    /// Current phase of the step state machine.
    #[inline]
    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    /// Configuration in use.
    #[inline]
    pub fn config(&self) -> &StepperConfig {
        &self.config
    }

    /// Drop all history and return to the rest configuration.
    pub fn reset(&mut self, model: &NeohookeanModel) {
        self.state = SimState::at_rest(model.rest_configuration());
        self.phase = StepPhase::Idle;
    }

    /// Advance the simulation by one accepted timestep.
    ///
    /// On success the history pair shifts (`q_prev ← q_cur`,
    /// `q_cur ← q_next`) and time advances by the `h` actually used.  On
    /// failure the committed state is untouched and the error propagates
    /// after the recovery policy is exhausted.
    pub fn step_once(
        &mut self,
        model: &NeohookeanModel,
        mass: &MassMatrix,
    ) -> Result<StepReport, SimError> {
        self.phase = StepPhase::Stepping;

        let max_retries = match self.config.recovery {
            RecoveryPolicy::RetryHalved { max_retries } => max_retries,
            _ => 0,
        };

        let mut attempt = 0;
        loop {
            let h = self.config.h / f64::powi(2.0, attempt as i32);
            let potential = match IncrementalPotential::new(
                model,
                mass,
                &self.state.q_cur,
                &self.state.q_prev,
                h,
                self.config.gravity,
            ) {
                Ok(p) => p,
                Err(e) => {
                    // Construction failures are structural, never retried.
                    self.phase = StepPhase::Failed;
                    return Err(e);
                }
            };

            match minimize(&potential, &self.state.q_cur, &self.config.solver) {
                Ok(min) => {
                    return Ok(self.accept(min, h, attempt, true));
                }
                Err(e) => {
                    if !is_recoverable(&e) {
                        self.phase = StepPhase::Failed;
                        return Err(e);
                    }
                    match self.config.recovery {
                        RecoveryPolicy::Abort => {
                            self.phase = StepPhase::Failed;
                            return Err(e);
                        }
                        RecoveryPolicy::AcceptBestEffort => match take_best(e) {
                            Ok(best) => {
                                warn!(
                                    "step {}: accepting best-effort iterate, |∇Φ| = {:.3e}",
                                    self.state.frame, best.gradient_norm,
                                );
                                return Ok(self.accept(best, h, attempt, false));
                            }
                            Err(e) => {
                                self.phase = StepPhase::Failed;
                                return Err(e);
                            }
                        },
                        RecoveryPolicy::RetryHalved { .. } => {
                            if attempt < max_retries {
                                attempt += 1;
                                warn!(
                                    "step {}: solve failed ({e}), retrying with h = {:.3e}",
                                    self.state.frame,
                                    self.config.h / f64::powi(2.0, attempt as i32),
                                );
                                continue;
                            }
                            self.phase = StepPhase::Failed;
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Run `steps` accepted timesteps, stopping at the first failure.
    pub fn advance(
        &mut self,
        model: &NeohookeanModel,
        mass: &MassMatrix,
        steps: usize,
    ) -> Result<Vec<StepReport>, SimError> {
        let mut reports = Vec::with_capacity(steps);
        for _ in 0..steps {
            reports.push(self.step_once(model, mass)?);
        }
        Ok(reports)
    }

    /// Commit an accepted solve and produce its report.
    fn accept(
        &mut self,
        min: Minimization,
        h: f64,
        retries: usize,
        converged: bool,
    ) -> StepReport {
        let report = StepReport {
            h,
            iterations: min.iterations,
            value: min.value,
            gradient_norm: min.gradient_norm,
            converged,
            retries,
        };
        self.state.commit(min.q, h);
        self.phase = StepPhase::Converged;
        debug!(
            "step {} committed: t = {:.4}s, h = {:.3e}, {} iterations, Φ = {:.6e}",
            self.state.frame, self.state.time, h, report.iterations, report.value,
        );
        report
    }
}

/// Whether the recovery policy applies to this failure.
/// Construction and I/O errors are structural and always propagate.
fn is_recoverable(e: &SimError) -> bool {
    matches!(
        e,
        SimError::DidNotConverge { .. }
            | SimError::LineSearchFailure { .. }
            | SimError::NumericalFailure(_)
    )
}

/// Pull the best-effort iterate out of a recoverable failure, or give the
/// failure back when there is nothing to commit.
fn take_best(e: SimError) -> Result<Minimization, SimError> {
    match e {
        SimError::DidNotConverge { best } => Ok(best),
        SimError::LineSearchFailure { best: Some(best) } => Ok(best),
        other => Err(other),
    }
}
