//! Neohookean elasticity over tetrahedral finite elements.
//!
//! Energy density per element, with F the deformation gradient and
//! J = det F:
//!
//! ```text
//!     Ψ(F) = μ/2 (I₁ − 3) − μ ln J + λ/2 (ln J)²
//! ```
//!
//! First Piola–Kirchhoff stress (the F-derivative of Ψ):
//!
//! ```text
//!     P(F) = μ (F − F⁻ᵀ) + λ ln J · F⁻ᵀ
//! ```
//!
//! All derivatives are hand-coded — no AD.  Inverted elements (J ≤ 0)
//! produce non-finite values that propagate to the caller unclamped; the
//! optimizer reports them as `NumericalFailure`.

use crate::mesh::{signed_tet_volume, TetMesh};
use crate::types::{Material, SimError};

// ─────────────────────────────────────────────────────────────
//  3×3 helpers  (column-major: m[c] is column c)
// ─────────────────────────────────────────────────────────────

type Mat3 = [[f64; 3]; 3];

#[inline]
fn det3(m: &Mat3) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[1][0] * (m[0][1] * m[2][2] - m[0][2] * m[2][1])
        + m[2][0] * (m[0][1] * m[1][2] - m[0][2] * m[1][1])
}

/// Inverse via the adjugate.  A singular input yields non-finite entries.
#[inline]
fn inv3(m: &Mat3) -> Mat3 {
    let d = det3(m);
    [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / d,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / d,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / d,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / d,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / d,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / d,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / d,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / d,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / d,
        ],
    ]
}

/// a · b
#[inline]
fn mul3(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (c, col) in b.iter().enumerate() {
        for r in 0..3 {
            out[c][r] = a[0][r] * col[0] + a[1][r] * col[1] + a[2][r] * col[2];
        }
    }
    out
}

/// a · bᵀ
#[inline]
fn mul3_t(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for c in 0..3 {
        for r in 0..3 {
            out[c][r] = a[0][r] * b[0][c] + a[1][r] * b[1][c] + a[2][r] * b[2][c];
        }
    }
    out
}

#[inline]
fn transpose3(m: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for c in 0..3 {
        for r in 0..3 {
            out[c][r] = m[r][c];
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────
//  Elastic model
// ─────────────────────────────────────────────────────────────

/// Neohookean finite-element model over a [`TetMesh`].
///
/// Owns the mesh and material; precomputes the rest-shape inverse Dm⁻¹ and
/// rest volume per element.  Exposes the strain energy and its analytic
/// gradient with respect to the free-node generalized coordinates.
#[derive(Debug, Clone)]
pub struct NeohookeanModel {
    mesh: TetMesh,
    material: Material,
    /// Per-element inverse rest-shape matrix.
    dm_inv: Vec<Mat3>,
    /// Per-element unsigned rest volume.
    rest_volumes: Vec<f64>,
}

impl NeohookeanModel {
    /// Build the model, validating the material and precomputing
    /// per-element quantities.
    pub fn new(mesh: TetMesh, material: Material) -> Result<Self, SimError> {
        if !(material.youngs_modulus > 0.0) || !material.youngs_modulus.is_finite() {
            return Err(SimError::InvalidArgument(format!(
                "Young's modulus must be positive and finite, got {}",
                material.youngs_modulus,
            )));
        }
        if !(0.0..0.5).contains(&material.poisson_ratio) {
            return Err(SimError::InvalidArgument(format!(
                "Poisson ratio must lie in [0, 0.5), got {}",
                material.poisson_ratio,
            )));
        }
        if !(material.density > 0.0) || !material.density.is_finite() {
            return Err(SimError::InvalidArgument(format!(
                "density must be positive and finite, got {}",
                material.density,
            )));
        }

        let mut dm_inv = Vec::with_capacity(mesh.tets.len());
        let mut rest_volumes = Vec::with_capacity(mesh.tets.len());
        for tet in &mesh.tets {
            let dm = shape_matrix_from_rest(&mesh, tet);
            dm_inv.push(inv3(&dm));
            rest_volumes.push(signed_tet_volume(&mesh.vertices, tet).abs());
        }

        Ok(Self {
            mesh,
            material,
            dm_inv,
            rest_volumes,
        })
    }

    /// The mesh this model was built over.
    #[inline]
    pub fn mesh(&self) -> &TetMesh {
        &self.mesh
    }

    /// Material parameters.
    #[inline]
    pub fn material(&self) -> &Material {
        &self.material
    }

    /// Number of generalized coordinates:  3 × |free nodes|.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.mesh.dimension()
    }

    /// Rest configuration of the free nodes (the zero-energy point).
    pub fn rest_configuration(&self) -> Vec<f64> {
        self.mesh.rest_free_positions()
    }

    /// Total strain energy  U(q) = Σₑ Vₑ Ψ(Fₑ).
    ///
    /// May be non-finite for inverted elements; never clamped here.
    pub fn energy(&self, q: &[f64]) -> Result<f64, SimError> {
        self.check_dimension(q)?;
        let full = self.mesh.assemble_full(q);
        let (mu, lambda) = (self.material.mu(), self.material.lambda());

        let mut u = 0.0;
        for (e, tet) in self.mesh.tets.iter().enumerate() {
            let f = self.deformation_gradient(&full, e, tet);
            let j = det3(&f);
            let log_j = j.ln();
            let i1: f64 = f.iter().flatten().map(|x| x * x).sum();
            let psi = 0.5 * mu * (i1 - 3.0) - mu * log_j + 0.5 * lambda * log_j * log_j;
            u += self.rest_volumes[e] * psi;
        }
        Ok(u)
    }

    /// Analytic gradient  ∇U(q)  over the free DOFs.
    ///
    /// Per element the position-gradient block is  Vₑ · P(Fₑ) · Dm⁻ᵀ, whose
    /// columns belong to vertices 1–3; vertex 0 receives the negated column
    /// sum (translation invariance).  Fixed-node contributions are dropped.
    pub fn gradient(&self, q: &[f64]) -> Result<Vec<f64>, SimError> {
        self.check_dimension(q)?;
        let full = self.mesh.assemble_full(q);
        let (mu, lambda) = (self.material.mu(), self.material.lambda());

        let mut grad = vec![0.0; self.dimension()];
        for (e, tet) in self.mesh.tets.iter().enumerate() {
            let f = self.deformation_gradient(&full, e, tet);
            let j = det3(&f);
            let log_j = j.ln();
            let f_inv_t = transpose3(&inv3(&f));

            // P = μ (F − F⁻ᵀ) + λ ln J · F⁻ᵀ
            let mut p = [[0.0; 3]; 3];
            for c in 0..3 {
                for r in 0..3 {
                    p[c][r] = mu * (f[c][r] - f_inv_t[c][r]) + lambda * log_j * f_inv_t[c][r];
                }
            }

            // G = Vₑ · P · Dm⁻ᵀ
            let g = mul3_t(&p, &self.dm_inv[e]);
            let vol = self.rest_volumes[e];

            let mut g0 = [0.0; 3];
            for c in 0..3 {
                let node = tet[c + 1];
                for d in 0..3 {
                    let gv = vol * g[c][d];
                    g0[d] -= gv;
                    if let Some(fi) = self.mesh.node_to_free[node] {
                        grad[3 * fi + d] += gv;
                    }
                }
            }
            if let Some(fi) = self.mesh.node_to_free[tet[0]] {
                for d in 0..3 {
                    grad[3 * fi + d] += g0[d];
                }
            }
        }
        Ok(grad)
    }

    /// F = Ds · Dm⁻¹ from the current full configuration.
    #[inline]
    fn deformation_gradient(&self, full: &[f64], e: usize, tet: &[usize; 4]) -> Mat3 {
        let mut ds = [[0.0; 3]; 3];
        for c in 0..3 {
            for d in 0..3 {
                ds[c][d] = full[3 * tet[c + 1] + d] - full[3 * tet[0] + d];
            }
        }
        mul3(&ds, &self.dm_inv[e])
    }

    fn check_dimension(&self, q: &[f64]) -> Result<(), SimError> {
        if q.len() != self.dimension() {
            return Err(SimError::InvalidArgument(format!(
                "configuration has length {}, model dimension is {}",
                q.len(),
                self.dimension(),
            )));
        }
        Ok(())
    }
}

/// Rest-shape matrix Dm with columns  xⱼ − x₀,  j = 1..3.
#[inline]
fn shape_matrix_from_rest(mesh: &TetMesh, tet: &[usize; 4]) -> Mat3 {
    let mut dm = [[0.0; 3]; 3];
    for c in 0..3 {
        for d in 0..3 {
            dm[c][d] = mesh.vertices[[tet[c + 1], d]] - mesh.vertices[[tet[0], d]];
        }
    }
    dm
}
