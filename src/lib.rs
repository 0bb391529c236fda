//! **Galatea** — variational implicit-Euler dynamics for Neohookean
//! tetrahedral finite elements.
//!
//! One timestep is an unconstrained minimization: with the committed
//! history pair (q_prev, q_cur), mass matrix M and timestep h, the next
//! configuration minimizes the incremental potential
//! Φ(q) = ½aᵀMa/h² + U(q) − F_extᵀq with a = q − 2q_cur + q_prev.
//!
//! 1. **Mesh** (`mesh`): tetrahedra, Dirichlet set, free-DOF numbering,
//!    Medit `.mesh` reading.
//! 2. **Elasticity** (`neohookean`): Neohookean strain energy and its
//!    hand-coded analytic gradient.
//! 3. **Mass** (`mass`): sparse consistent mass matrix over the free DOFs.
//! 4. **Objective** (`objective`): the per-step incremental potential.
//! 5. **Optimizer** (`optimizer`): L-BFGS via `argmin`, warm-started.
//! 6. **Stepper** (`stepper`): commit loop, state machine, failure
//!    recovery policy.
//! 7. **Output** (`output`): per-frame displacement DMAT files.

pub mod mass;
pub mod mesh;
pub mod neohookean;
pub mod objective;
pub mod optimizer;
pub mod output;
pub mod stepper;
pub mod types;
