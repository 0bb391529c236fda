//! Consistent mass matrix over the free degrees of freedom.
//!
//! Per element the consistent tetrahedral mass couples vertex pairs as
//! ρVₑ/20 · (1 + δ_ab) on each coordinate, giving a sparse symmetric
//! positive-definite matrix.  Rows and columns of fixed (Dirichlet) nodes
//! are dropped at assembly, so the matrix lives entirely on the free DOFs.

use crate::mesh::{signed_tet_volume, TetMesh};
use crate::types::SimError;
use sprs::{CsMat, TriMat};

// ─────────────────────────────────────────────────────────────
//  MassMatrix
// ─────────────────────────────────────────────────────────────

/// Sparse SPD mass matrix, constant across steps.
#[derive(Debug, Clone)]
pub struct MassMatrix {
    matrix: CsMat<f64>,
    dimension: usize,
}

impl MassMatrix {
    /// Assemble the consistent mass matrix for `mesh` at the given density.
    pub fn consistent(mesh: &TetMesh, density: f64) -> Result<Self, SimError> {
        if !(density > 0.0) || !density.is_finite() {
            return Err(SimError::InvalidArgument(format!(
                "density must be positive and finite, got {density}",
            )));
        }
        let dim = mesh.dimension();
        if dim == 0 {
            return Err(SimError::InvalidArgument(
                "mesh has no free nodes, mass matrix would be empty".into(),
            ));
        }

        let mut tri = TriMat::new((dim, dim));
        for tet in &mesh.tets {
            let vol = signed_tet_volume(&mesh.vertices, tet).abs();
            let me = density * vol / 20.0;
            for (a, &na) in tet.iter().enumerate() {
                let Some(fa) = mesh.node_to_free[na] else {
                    continue;
                };
                for (b, &nb) in tet.iter().enumerate() {
                    let Some(fb) = mesh.node_to_free[nb] else {
                        continue;
                    };
                    let coeff = if a == b { 2.0 * me } else { me };
                    for d in 0..3 {
                        tri.add_triplet(3 * fa + d, 3 * fb + d, coeff);
                    }
                }
            }
        }

        Ok(Self {
            matrix: tri.to_csc(),
            dimension: dim,
        })
    }

    /// Matrix dimension (3 × |free nodes|).
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The assembled CSC matrix.
    #[inline]
    pub fn matrix(&self) -> &CsMat<f64> {
        &self.matrix
    }

    /// Sparse matrix–vector product  M · v.
    ///
    /// Fails with `InvalidArgument` on length mismatch.
    pub fn apply(&self, v: &[f64]) -> Result<Vec<f64>, SimError> {
        if v.len() != self.dimension {
            return Err(SimError::InvalidArgument(format!(
                "vector has length {}, mass matrix dimension is {}",
                v.len(),
                self.dimension,
            )));
        }
        let mut out = vec![0.0; self.dimension];
        for col in 0..self.dimension {
            let start = self.matrix.indptr().raw_storage()[col];
            let end_ = self.matrix.indptr().raw_storage()[col + 1];
            for nz in start..end_ {
                let row = self.matrix.indices()[nz];
                out[row] += self.matrix.data()[nz] * v[col];
            }
        }
        Ok(out)
    }

    /// External force of a uniform per-node acceleration:  F = M · g
    /// with `g` tiled across the free nodes.
    pub fn gravity_force(&self, g: [f64; 3]) -> Result<Vec<f64>, SimError> {
        let tiled: Vec<f64> = (0..self.dimension).map(|i| g[i % 3]).collect();
        self.apply(&tiled)
    }
}
