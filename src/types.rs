use std::fmt;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Every function in the public API returns `Result<T, SimError>` instead of
/// panicking.  Solver failures that still produced a usable iterate carry it
/// as a [`Minimization`] payload so the stepper's recovery policy can decide
/// whether to commit a best-effort step.
#[derive(Debug)]
pub enum SimError {
    /// Malformed dimensions or parameters, detected at construction.
    InvalidArgument(String),
    /// NaN or Inf encountered during an energy / gradient evaluation.
    NumericalFailure(String),
    /// Iteration cap hit before the gradient-norm tolerance was met.
    DidNotConverge { best: Minimization },
    /// The line search found no admissible step.  `best` is the last
    /// accepted iterate, if any evaluation succeeded before the abort.
    LineSearchFailure { best: Option<Minimization> },
    /// Filesystem error while reading a mesh or writing output.
    Io(std::io::Error),
    /// Malformed mesh file contents.
    Parse(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::NumericalFailure(msg) => write!(f, "numerical failure: {msg}"),
            Self::DidNotConverge { best } => write!(
                f,
                "did not converge: |∇Φ| = {:.3e} after {} iterations",
                best.gradient_norm, best.iterations,
            ),
            Self::LineSearchFailure { best } => match best {
                Some(b) => write!(
                    f,
                    "line search failed after {} evaluations (best Φ = {:.6e})",
                    b.iterations, b.value,
                ),
                None => write!(f, "line search failed before any evaluation succeeded"),
            },
            Self::Io(e) => write!(f, "i/o error: {e}"),
            Self::Parse(msg) => write!(f, "mesh parse error: {msg}"),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ─────────────────────────────────────────────────────────────
//  Constants
// ─────────────────────────────────────────────────────────────

/// Gravitational acceleration applied per node unless overridden (Y-up).
pub const DEFAULT_GRAVITY: [f64; 3] = [0.0, -9.8, 0.0];

/// Default timestep size in seconds.
pub const DEFAULT_TIME_STEP: f64 = 0.05;

// ─────────────────────────────────────────────────────────────
//  Material parameters
// ─────────────────────────────────────────────────────────────

/// Neohookean material parameters.
///
/// Young's modulus and Poisson ratio are converted to the Lamé pair (μ, λ)
/// used by the energy density.
#[derive(Debug, Clone, Copy)]
pub struct Material {
    /// Young's modulus E, in Pa.
    pub youngs_modulus: f64,
    /// Poisson ratio ν, dimensionless, in [0, 0.5).
    pub poisson_ratio: f64,
    /// Mass density ρ, in kg/m³.
    pub density: f64,
}

impl Material {
    /// First Lamé parameter (shear modulus):  μ = E / 2(1 + ν).
    #[inline]
    pub fn mu(&self) -> f64 {
        self.youngs_modulus / (2.0 * (1.0 + self.poisson_ratio))
    }

    /// Second Lamé parameter:  λ = Eν / (1 + ν)(1 − 2ν).
    #[inline]
    pub fn lambda(&self) -> f64 {
        let nu = self.poisson_ratio;
        self.youngs_modulus * nu / ((1.0 + nu) * (1.0 - 2.0 * nu))
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            youngs_modulus: 1e5,
            poisson_ratio: 0.45,
            density: 1000.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Solver options
// ─────────────────────────────────────────────────────────────

/// Options for the L-BFGS minimization of the incremental potential.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Gradient 2-norm convergence threshold.
    pub epsilon: f64,
    /// Hard cap on L-BFGS iterations.
    pub max_iterations: usize,
    /// Number of correction pairs retained by L-BFGS.
    pub history_size: usize,
    /// Sufficient-decrease (Armijo) constant c₁ for the line search.
    pub sufficient_decrease: f64,
    /// Curvature constant c₂ for the line search.
    pub curvature: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            max_iterations: 100,
            history_size: 8,
            sufficient_decrease: 1e-4,
            curvature: 0.9,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Stepper configuration
// ─────────────────────────────────────────────────────────────

/// What the stepper does when a solve fails
/// (`DidNotConverge` / `LineSearchFailure` / `NumericalFailure`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Propagate the failure; the history pair is left untouched.
    Abort,
    /// Commit the best iterate the solver produced, flagged as
    /// unconverged in the [`StepReport`].
    AcceptBestEffort,
    /// Re-attempt the step with h/2, h/4, … up to `max_retries` times,
    /// then propagate the last failure.
    RetryHalved { max_retries: usize },
}

/// Configuration for [`crate::stepper::VariationalStepper`].
#[derive(Debug, Clone)]
pub struct StepperConfig {
    /// Timestep size h, seconds.  Positive, fixed for the run (only the
    /// retry policy may transiently halve it).
    pub h: f64,
    /// Per-node gravitational acceleration.
    pub gravity: [f64; 3],
    /// Options handed to the minimizer each step.
    pub solver: SolverOptions,
    /// Failure recovery policy.
    pub recovery: RecoveryPolicy,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            h: DEFAULT_TIME_STEP,
            gravity: DEFAULT_GRAVITY,
            solver: SolverOptions::default(),
            recovery: RecoveryPolicy::Abort,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Stepper state machine
// ─────────────────────────────────────────────────────────────

/// Phase of the time-stepper loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// No step has been requested yet.
    Idle,
    /// A minimize call is in flight.
    Stepping,
    /// The most recent step was accepted and committed.
    Converged,
    /// The most recent step failed and was rejected.
    Failed,
}

// ─────────────────────────────────────────────────────────────
//  Simulation state  (the committed history pair)
// ─────────────────────────────────────────────────────────────

/// The two most recent accepted configurations, plus clock bookkeeping.
///
/// Invariant: at the start of step k, `q_cur` is the accepted solution of
/// step k−1 and `q_prev` the accepted solution of step k−2.  Only the
/// stepper writes these, and only after a step is accepted — a rejected
/// step leaves the pair unchanged.
#[derive(Debug, Clone)]
pub struct SimState {
    /// Accepted configuration of step k−2.
    pub q_prev: Vec<f64>,
    /// Accepted configuration of step k−1.
    pub q_cur: Vec<f64>,
    /// Accumulated simulation time, seconds.
    pub time: f64,
    /// Number of accepted steps.
    pub frame: usize,
}

impl SimState {
    /// History pair at rest: both entries equal the given configuration
    /// (zero initial velocity).
    pub fn at_rest(q0: Vec<f64>) -> Self {
        Self {
            q_prev: q0.clone(),
            q_cur: q0,
            time: 0.0,
            frame: 0,
        }
    }

    /// Shift the history pair after an accepted solve.
    pub fn commit(&mut self, q_next: Vec<f64>, h: f64) {
        self.q_prev = std::mem::replace(&mut self.q_cur, q_next);
        self.time += h;
        self.frame += 1;
    }
}

// ─────────────────────────────────────────────────────────────
//  Result records
// ─────────────────────────────────────────────────────────────

/// Outcome of one L-BFGS minimization.
#[derive(Debug, Clone)]
pub struct Minimization {
    /// Minimizer (best iterate found).
    pub q: Vec<f64>,
    /// Objective value at `q`.
    pub value: f64,
    /// Gradient 2-norm at `q`.
    pub gradient_norm: f64,
    /// Solver iterations performed.  When the solver aborted inside a line
    /// search this is the count of objective evaluations instead, which is
    /// the only progress measure still observable.
    pub iterations: usize,
}

/// Outcome of one accepted timestep.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Timestep actually used (may be smaller than configured under
    /// [`RecoveryPolicy::RetryHalved`]).
    pub h: f64,
    /// L-BFGS iterations of the accepted solve.
    pub iterations: usize,
    /// Final objective value.
    pub value: f64,
    /// Final gradient 2-norm.
    pub gradient_norm: f64,
    /// False when the step was committed best-effort without meeting the
    /// gradient tolerance.
    pub converged: bool,
    /// Number of halved re-attempts before acceptance.
    pub retries: usize,
}
