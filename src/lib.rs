//! `tsurf` is a constrained Delaunay-style triangular mesh engine for 2.5-D
//! surfaces: every mesh node carries an `(x, y, z)` where `z` is a scalar
//! attribute, typically elevation.
//!
//! The engine builds topologically consistent meshes of nodes, edges and
//! triangles from scattered points or rectangular grids, honours polyline
//! constraints (boundaries, faults, discontinuities) exactly or
//! approximately, repairs degenerate topology, drapes polylines and points
//! onto the surface, and exchanges data with rectangular grids in both
//! directions.
//!
//! ```rust
//! use tsurf::MeshEngine;
//!
//! let xs = [0.0, 1.0, 1.0, 0.0];
//! let ys = [0.0, 0.0, 1.0, 1.0];
//! let zs = [0.0, 0.0, 0.0, 0.0];
//! let mut engine = MeshEngine::new();
//! engine.triangulate_points(&xs, &ys, &zs)?;
//! let mesh = engine.mesh();
//! assert_eq!(mesh.live_nodes().count(), 4);
//! assert_eq!(mesh.live_triangles().count(), 2);
//! # Ok::<(), tsurf::Error>(())
//! ```

pub mod algorithms;
pub mod data;
pub mod engine;
pub mod geometry;
pub mod grid;
pub mod index;
pub mod io;

pub use data::{ClientTag, Edge, EdgeFlag, EdgeId, Node, NodeId, TriId, TriMesh, Triangle};
pub use engine::{MeshEngine, Outcome, Polyline, SwapMode};
pub use geometry::{Orientation, Point3, PointLocation};
pub use grid::{BilinearOps, Grid, GridOps};

/// Crate-wide error type.
///
/// The engine reports invalid input eagerly and leaves its state untouched;
/// non-fatal anomalies (grazing points, colinear triples met mid-operation)
/// are repaired locally and never surface as errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
  #[error("bad argument: {0}")]
  BadArgument(&'static str),
  #[error("degenerate geometry")]
  DegenerateGeometry,
  #[error("grid dimensions too small: {nc}x{nr}")]
  BadGridDimensions { nc: usize, nr: usize },
  #[error("point lies outside the mesh")]
  OutsideMesh,
  #[error("topology invariant violated: {0}")]
  InvariantViolation(&'static str),
  #[error("trimesh format error at line {line}: {msg}")]
  Format { line: usize, msg: String },
  #[error("i/o: {0}")]
  Io(String),
}

impl From<std::io::Error> for Error {
  fn from(err: std::io::Error) -> Error {
    Error::Io(err.to_string())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
