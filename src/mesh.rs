//! Tetrahedral mesh with Dirichlet (fixed-node) boundary conditions.
//!
//! Generalized coordinates cover the **free** nodes only:  q has length
//! 3 × |free|, interleaved x/y/z.  Fixed nodes are held at their rest
//! positions and carry no DOFs; [`TetMesh::assemble_full`] expands a
//! free-DOF vector back into a full nn × 3 configuration.

use crate::types::SimError;
use ndarray::Array2;
use std::fs;
use std::path::Path;

// ─────────────────────────────────────────────────────────────
//  TetMesh
// ─────────────────────────────────────────────────────────────

/// Rest geometry, connectivity and the free/fixed node split.
#[derive(Debug, Clone)]
pub struct TetMesh {
    /// Rest vertex positions  (nn × 3).
    pub vertices: Array2<f64>,
    /// Tetrahedra as vertex index quadruples.
    pub tets: Vec<[usize; 4]>,
    /// Fixed (Dirichlet) node indices, sorted ascending.
    pub fixed_nodes: Vec<usize>,
    /// Free node indices, sorted ascending.
    pub free_nodes: Vec<usize>,
    /// Global-node → free-index mapping  (`None` if fixed).
    pub node_to_free: Vec<Option<usize>>,
}

impl TetMesh {
    /// Build a mesh and validate its connectivity.
    ///
    /// `fixed_nodes` may be unsorted and contain duplicates; it is
    /// normalized.  Fails with `InvalidArgument` on out-of-range indices or
    /// degenerate (zero-volume) elements.
    pub fn new(
        vertices: Array2<f64>,
        tets: Vec<[usize; 4]>,
        fixed_nodes: Vec<usize>,
    ) -> Result<Self, SimError> {
        let nn = vertices.nrows();
        if nn == 0 {
            return Err(SimError::InvalidArgument("mesh has no vertices".into()));
        }
        if vertices.ncols() != 3 {
            return Err(SimError::InvalidArgument(format!(
                "vertices must be nn × 3, got nn × {}",
                vertices.ncols(),
            )));
        }

        for (t, tet) in tets.iter().enumerate() {
            for &v in tet {
                if v >= nn {
                    return Err(SimError::InvalidArgument(format!(
                        "tet {t} references vertex {v}, mesh has {nn}",
                    )));
                }
            }
            let vol = signed_tet_volume(&vertices, tet);
            if vol == 0.0 || !vol.is_finite() {
                return Err(SimError::InvalidArgument(format!(
                    "tet {t} is degenerate (signed volume = {vol})",
                )));
            }
        }

        let mut fixed = fixed_nodes;
        fixed.sort_unstable();
        fixed.dedup();
        if let Some(&v) = fixed.last() {
            if v >= nn {
                return Err(SimError::InvalidArgument(format!(
                    "fixed node {v} out of range, mesh has {nn}",
                )));
            }
        }

        let mut mesh = Self {
            vertices,
            tets,
            fixed_nodes: fixed,
            free_nodes: Vec::new(),
            node_to_free: Vec::new(),
        };
        mesh.rebuild_dof_map();
        Ok(mesh)
    }

    /// Recompute `free_nodes` / `node_to_free` from `fixed_nodes`.
    fn rebuild_dof_map(&mut self) {
        let nn = self.vertices.nrows();
        self.node_to_free = vec![None; nn];
        self.free_nodes.clear();
        let mut fixed_it = self.fixed_nodes.iter().peekable();
        for node in 0..nn {
            if fixed_it.peek() == Some(&&node) {
                fixed_it.next();
            } else {
                self.node_to_free[node] = Some(self.free_nodes.len());
                self.free_nodes.push(node);
            }
        }
    }

    /// Pin every node whose coordinate along `axis` (0 = x, 1 = y, 2 = z)
    /// lies within `tol` of the minimum.  Replaces the current fixed set.
    pub fn fix_min_along(&mut self, axis: usize, tol: f64) {
        let nn = self.vertices.nrows();
        let min = (0..nn)
            .map(|i| self.vertices[[i, axis]])
            .fold(f64::INFINITY, f64::min);
        self.fixed_nodes = (0..nn)
            .filter(|&i| self.vertices[[i, axis]] <= min + tol)
            .collect();
        self.rebuild_dof_map();
    }

    /// Number of vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.vertices.nrows()
    }

    /// Number of generalized coordinates:  3 × |free nodes|.
    #[inline]
    pub fn dimension(&self) -> usize {
        3 * self.free_nodes.len()
    }

    /// Free-node rest positions, gathered into DOF order.
    pub fn rest_free_positions(&self) -> Vec<f64> {
        let mut q = Vec::with_capacity(self.dimension());
        for &node in &self.free_nodes {
            for d in 0..3 {
                q.push(self.vertices[[node, d]]);
            }
        }
        q
    }

    /// Expand a free-DOF vector into a full configuration (length 3·nn),
    /// fixed nodes at their rest positions.
    pub fn assemble_full(&self, q: &[f64]) -> Vec<f64> {
        let nn = self.num_vertices();
        let mut full = Vec::with_capacity(3 * nn);
        for node in 0..nn {
            match self.node_to_free[node] {
                Some(fi) => full.extend_from_slice(&q[3 * fi..3 * fi + 3]),
                None => {
                    for d in 0..3 {
                        full.push(self.vertices[[node, d]]);
                    }
                }
            }
        }
        full
    }

    // ── Medit .mesh reader ────────────────────────────────

    /// Read an ASCII Medit `.mesh` file (the format `igl::readMESH`
    /// consumes).  `Triangles`, `Edges` and `Corners` sections are skipped;
    /// only `Vertices` and `Tetrahedra` are retained.  The mesh starts with
    /// an empty fixed set.
    pub fn from_mesh_file<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let text = fs::read_to_string(path)?;
        Self::from_mesh_str(&text)
    }

    /// Parse Medit `.mesh` contents.  Split out from [`Self::from_mesh_file`]
    /// so tests can feed strings directly.
    pub fn from_mesh_str(text: &str) -> Result<Self, SimError> {
        let mut tokens = text
            .lines()
            .map(|l| match l.find('#') {
                Some(pos) => &l[..pos],
                None => l,
            })
            .flat_map(|l| l.split_whitespace());

        let mut vertices: Option<Array2<f64>> = None;
        let mut tets: Vec<[usize; 4]> = Vec::new();

        while let Some(tok) = tokens.next() {
            match tok {
                "MeshVersionFormatted" => {
                    next_token(&mut tokens, "MeshVersionFormatted value")?;
                }
                "Dimension" => {
                    let dim: usize = parse_next(&mut tokens, "Dimension value")?;
                    if dim != 3 {
                        return Err(SimError::Parse(format!(
                            "only 3D meshes are supported, file declares dimension {dim}",
                        )));
                    }
                }
                "Vertices" => {
                    let n: usize = parse_next(&mut tokens, "vertex count")?;
                    let mut data = Vec::with_capacity(3 * n);
                    for i in 0..n {
                        for d in 0..3 {
                            let v: f64 =
                                parse_next(&mut tokens, &format!("vertex {i} coordinate {d}"))?;
                            data.push(v);
                        }
                        // trailing reference tag
                        next_token(&mut tokens, &format!("vertex {i} reference"))?;
                    }
                    let arr = Array2::from_shape_vec((n, 3), data)
                        .map_err(|e| SimError::Parse(e.to_string()))?;
                    vertices = Some(arr);
                }
                "Tetrahedra" => {
                    let n: usize = parse_next(&mut tokens, "tetrahedron count")?;
                    tets.reserve(n);
                    for i in 0..n {
                        let mut tet = [0usize; 4];
                        for (k, slot) in tet.iter_mut().enumerate() {
                            let one_based: usize =
                                parse_next(&mut tokens, &format!("tet {i} vertex {k}"))?;
                            if one_based == 0 {
                                return Err(SimError::Parse(format!(
                                    "tet {i} uses 0 in 1-based vertex list",
                                )));
                            }
                            *slot = one_based - 1;
                        }
                        next_token(&mut tokens, &format!("tet {i} reference"))?;
                        tets.push(tet);
                    }
                }
                "Triangles" => skip_rows(&mut tokens, 4, "Triangles")?,
                "Edges" => skip_rows(&mut tokens, 3, "Edges")?,
                "Corners" => skip_rows(&mut tokens, 1, "Corners")?,
                "End" => break,
                other => {
                    return Err(SimError::Parse(format!("unsupported section `{other}`")));
                }
            }
        }

        let vertices =
            vertices.ok_or_else(|| SimError::Parse("file has no Vertices section".into()))?;
        if tets.is_empty() {
            return Err(SimError::Parse("file has no Tetrahedra section".into()));
        }
        Self::new(vertices, tets, Vec::new())
    }
}

// ─────────────────────────────────────────────────────────────
//  Geometry helper
// ─────────────────────────────────────────────────────────────

/// Signed volume of a tetrahedron:  det([x₁−x₀, x₂−x₀, x₃−x₀]) / 6.
#[inline]
pub fn signed_tet_volume(vertices: &Array2<f64>, tet: &[usize; 4]) -> f64 {
    let e = |a: usize, b: usize, d: usize| vertices[[tet[a], d]] - vertices[[tet[b], d]];
    let (ax, ay, az) = (e(1, 0, 0), e(1, 0, 1), e(1, 0, 2));
    let (bx, by, bz) = (e(2, 0, 0), e(2, 0, 1), e(2, 0, 2));
    let (cx, cy, cz) = (e(3, 0, 0), e(3, 0, 1), e(3, 0, 2));
    (ax * (by * cz - bz * cy) - ay * (bx * cz - bz * cx) + az * (bx * cy - by * cx)) / 6.0
}

// ─────────────────────────────────────────────────────────────
//  Token helpers
// ─────────────────────────────────────────────────────────────

fn next_token<'a, I: Iterator<Item = &'a str>>(
    tokens: &mut I,
    what: &str,
) -> Result<&'a str, SimError> {
    tokens
        .next()
        .ok_or_else(|| SimError::Parse(format!("unexpected end of file, expected {what}")))
}

fn parse_next<'a, T, I>(tokens: &mut I, what: &str) -> Result<T, SimError>
where
    T: std::str::FromStr,
    I: Iterator<Item = &'a str>,
{
    let tok = next_token(tokens, what)?;
    tok.parse()
        .map_err(|_| SimError::Parse(format!("expected {what}, got `{tok}`")))
}

fn skip_rows<'a, I: Iterator<Item = &'a str>>(
    tokens: &mut I,
    row_len: usize,
    section: &str,
) -> Result<(), SimError> {
    let n: usize = parse_next(tokens, &format!("{section} count"))?;
    for _ in 0..n * row_len {
        next_token(tokens, &format!("{section} entry"))?;
    }
    Ok(())
}
