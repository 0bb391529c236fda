//! DMAT output for per-frame displacements and base configurations.
//!
//! The ASCII DMAT layout is a `ncols nrows` header line followed by the
//! values in column-major order, one per line.  File naming follows the
//! training-data convention: `displacements_<frame>.dmat` per frame plus
//! one-time `base_verts.dmat` / `base_tets.dmat` dumps.

use crate::mesh::TetMesh;
use crate::types::SimError;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

// ─────────────────────────────────────────────────────────────
//  DMAT writer
// ─────────────────────────────────────────────────────────────

/// Write a dense matrix as ASCII DMAT.
pub fn write_dmat<P: AsRef<Path>>(path: P, matrix: &Array2<f64>) -> Result<(), SimError> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "{} {}", matrix.ncols(), matrix.nrows())?;
    for col in 0..matrix.ncols() {
        for row in 0..matrix.nrows() {
            writeln!(file, "{:.17e}", matrix[[row, col]])?;
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────
//  Simulation snapshots
// ─────────────────────────────────────────────────────────────

/// Nodal displacements (nn × 3) of the configuration `q` relative to rest.
/// Fixed nodes are pinned at rest, so their rows are zero.
pub fn displacements(mesh: &TetMesh, q: &[f64]) -> Array2<f64> {
    let full = mesh.assemble_full(q);
    let nn = mesh.num_vertices();
    let mut d = Array2::zeros((nn, 3));
    for node in 0..nn {
        for dim in 0..3 {
            d[[node, dim]] = full[3 * node + dim] - mesh.vertices[[node, dim]];
        }
    }
    d
}

/// Write `displacements_<frame>.dmat` into `dir`.
pub fn save_displacements<P: AsRef<Path>>(
    dir: P,
    frame: usize,
    mesh: &TetMesh,
    q: &[f64],
) -> Result<(), SimError> {
    let path = dir.as_ref().join(format!("displacements_{frame}.dmat"));
    write_dmat(path, &displacements(mesh, q))
}

/// Write the rest configuration once: `base_verts.dmat` with the vertex
/// positions and `base_tets.dmat` with the connectivity (as doubles, which
/// is what DMAT stores).
pub fn save_base_configuration<P: AsRef<Path>>(dir: P, mesh: &TetMesh) -> Result<(), SimError> {
    let dir = dir.as_ref();
    write_dmat(dir.join("base_verts.dmat"), &mesh.vertices)?;

    let mut tets = Array2::zeros((mesh.tets.len(), 4));
    for (t, tet) in mesh.tets.iter().enumerate() {
        for k in 0..4 {
            tets[[t, k]] = tet[k] as f64;
        }
    }
    write_dmat(dir.join("base_tets.dmat"), &tets)
}
