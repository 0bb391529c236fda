//! L-BFGS minimization driver via the `argmin` crate.
//!
//! Wraps [`IncrementalPotential::evaluate`] into argmin's `CostFunction` +
//! `Gradient` traits, then runs L-BFGS with a More–Thuente line search.
//!
//! Uses `Vec<f64>` as the argmin parameter type.  argmin calls `cost(θ)` and
//! `gradient(θ)` separately at the same θ each iteration, so the wrapper
//! caches the last `(θ, value, gradient)` and the full evaluation runs only
//! once per unique θ.  The best accepted iterate and the first typed
//! evaluation error are parked in the wrapper as well: argmin stringifies
//! errors and discards solver state on abort, and those two cells are what
//! lets `DidNotConverge` / `LineSearchFailure` carry a usable best-effort
//! result out.

use crate::objective::IncrementalPotential;
use crate::types::{Minimization, SimError, SolverOptions};
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use std::cell::{Cell, RefCell};

// ─────────────────────────────────────────────────────────────
//  argmin problem wrapper
// ─────────────────────────────────────────────────────────────

/// Bookkeeping around an [`IncrementalPotential`] for one solve.
///
/// `RefCell` is used because argmin's traits take `&self`; the solve is
/// single-threaded, so the borrows never actually conflict.
struct TracedPotential<'a> {
    potential: &'a IncrementalPotential<'a>,
    /// Cached (θ, value, gradient) from the last evaluation.
    last: RefCell<Option<(Vec<f64>, f64, Vec<f64>)>>,
    /// Best (θ, value, |∇Φ|) seen so far.
    best: RefCell<Option<(Vec<f64>, f64, f64)>>,
    /// First typed evaluation error, recovered after `run()` aborts.
    failure: RefCell<Option<SimError>>,
    /// Count of full evaluations (cache misses).
    evaluations: Cell<usize>,
}

impl<'a> TracedPotential<'a> {
    fn new(potential: &'a IncrementalPotential<'a>) -> Self {
        Self {
            potential,
            last: RefCell::new(None),
            best: RefCell::new(None),
            failure: RefCell::new(None),
            evaluations: Cell::new(0),
        }
    }

    /// Ensure the cache contains results for `theta`; no-op when θ matches
    /// the cached point.
    fn ensure_evaluated(&self, theta: &[f64]) -> Result<(), argmin::core::Error> {
        {
            let cached = self.last.borrow();
            if let Some((ref t, _, _)) = *cached {
                if t == theta {
                    return Ok(());
                }
            }
        }
        match self.potential.evaluate(theta) {
            Ok((value, grad)) => {
                self.evaluations.set(self.evaluations.get() + 1);
                let mut best = self.best.borrow_mut();
                if best.as_ref().map_or(true, |(_, v, _)| value < *v) {
                    *best = Some((theta.to_vec(), value, norm2(&grad)));
                }
                *self.last.borrow_mut() = Some((theta.to_vec(), value, grad));
                Ok(())
            }
            Err(e) => {
                let msg = e.to_string();
                let mut failure = self.failure.borrow_mut();
                if failure.is_none() {
                    *failure = Some(e);
                }
                Err(argmin::core::Error::msg(msg))
            }
        }
    }
}

impl CostFunction for &TracedPotential<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        self.ensure_evaluated(theta)?;
        let cached = self.last.borrow();
        Ok(cached.as_ref().unwrap().1)
    }
}

impl Gradient for &TracedPotential<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, theta: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        self.ensure_evaluated(theta)?;
        let cached = self.last.borrow();
        Ok(cached.as_ref().unwrap().2.clone())
    }
}

// ─────────────────────────────────────────────────────────────
//  Minimization entry point
// ─────────────────────────────────────────────────────────────

/// Minimize the incremental potential from `initial` (the warm start —
/// the stepper passes the previous accepted configuration).
///
/// Returns `Ok` only when the gradient 2-norm fell below
/// `options.epsilon`.  Hitting the iteration cap yields `DidNotConverge`
/// with the best iterate; a line-search abort yields `LineSearchFailure`;
/// NaN/Inf during evaluation surfaces as `NumericalFailure`.  Caller-owned
/// state is never mutated.
pub fn minimize(
    potential: &IncrementalPotential,
    initial: &[f64],
    options: &SolverOptions,
) -> Result<Minimization, SimError> {
    if initial.len() != potential.dimension() {
        return Err(SimError::InvalidArgument(format!(
            "initial guess has length {}, objective dimension is {}",
            initial.len(),
            potential.dimension(),
        )));
    }
    if !(options.epsilon > 0.0) {
        return Err(SimError::InvalidArgument(format!(
            "epsilon must be positive, got {}",
            options.epsilon,
        )));
    }
    if options.history_size == 0 {
        return Err(SimError::InvalidArgument(
            "history_size must be at least 1".into(),
        ));
    }

    // Warm starts frequently begin at (near-)stationarity — an equilibrium
    // step, or h so small the inertial term pins the solution.  Skip the
    // solver entirely then: a zero gradient is not a descent direction and
    // would abort the line search.
    let (value0, grad0) = potential.evaluate(initial)?;
    let norm0 = norm2(&grad0);
    if norm0 <= options.epsilon {
        return Ok(Minimization {
            q: initial.to_vec(),
            value: value0,
            gradient_norm: norm0,
            iterations: 0,
        });
    }

    let traced = TracedPotential::new(potential);

    let linesearch = MoreThuenteLineSearch::new()
        .with_c(options.sufficient_decrease, options.curvature)
        .map_err(|e| SimError::InvalidArgument(format!("line search constants: {e}")))?;
    let solver = LBFGS::new(linesearch, options.history_size)
        .with_tolerance_grad(options.epsilon)
        .map_err(|e| SimError::InvalidArgument(format!("gradient tolerance: {e}")))?;

    let executor = Executor::new(&traced, solver).configure(|config| {
        config
            .param(initial.to_vec())
            .max_iters(options.max_iterations as u64)
            .target_cost(f64::NEG_INFINITY)
    });

    match executor.run() {
        Ok(result) => {
            let iterations = result.state().get_iter() as usize;
            let q = result
                .state()
                .get_best_param()
                .cloned()
                .unwrap_or_else(|| initial.to_vec());

            // Re-evaluate at the returned point so value and gradient norm
            // are reported consistently.
            let (value, grad) = potential.evaluate(&q)?;
            let gradient_norm = norm2(&grad);
            let best = Minimization {
                q,
                value,
                gradient_norm,
                iterations,
            };

            let converged = matches!(
                result.state().get_termination_reason(),
                Some(TerminationReason::SolverConverged)
            ) || gradient_norm <= options.epsilon;

            log::debug!(
                "L-BFGS: {} iterations, Φ = {:.6e}, |∇Φ| = {:.3e}, converged = {}",
                best.iterations,
                best.value,
                best.gradient_norm,
                converged,
            );

            if converged {
                Ok(best)
            } else {
                Err(SimError::DidNotConverge { best })
            }
        }
        Err(e) => {
            if let Some(err) = traced.failure.borrow_mut().take() {
                return Err(err);
            }
            let best = traced.best.borrow().clone().map(|(q, value, gradient_norm)| {
                Minimization {
                    q,
                    value,
                    gradient_norm,
                    iterations: traced.evaluations.get(),
                }
            });
            let msg = e.to_string();
            if is_line_search_abort(&msg) {
                Err(SimError::LineSearchFailure { best })
            } else {
                Err(SimError::NumericalFailure(format!(
                    "optimizer aborted: {msg}",
                )))
            }
        }
    }
}

/// argmin stringifies solver errors; the line-search family is recognized
/// by message.
fn is_line_search_abort(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("line search") || lower.contains("linesearch") || lower.contains("descent")
}

#[inline]
fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}
