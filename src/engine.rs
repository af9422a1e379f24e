//! The engine facade: one instance owns a mesh, the configuration toggles
//! that were process-wide in older surface toolkits, the cached spatial
//! index, and the bug-location list. Every public operation runs to
//! completion on the calling thread; an engine instance must not be
//! shared across threads.

use std::env;
use std::path::Path;

use log::warn;

use crate::algorithms::constraint::{self, ConstraintOptions};
use crate::algorithms::{drape, repair, smooth, swap, triangulate};
use crate::data::{EdgeId, NodeId, TriMesh, Trim};
use crate::geometry::Point3;
use crate::grid::{self, Grid, GridMeshStyle, GridOps};
use crate::index::TriangleIndexCache;
use crate::io;
use crate::{Error, Result};

pub use crate::algorithms::constraint::Polyline;
pub use crate::algorithms::swap::SwapMode;

/// Distinguishes "did something" from "nothing to do" for operations where
/// both are successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Changed,
  Unchanged,
}

/// Most bug locations retained for caller inspection.
const MAX_BUG_LOCATIONS: usize = 10;

#[derive(Debug)]
pub struct MeshEngine {
  mesh: TriMesh,
  /// Chop constraint segments to the ambient average edge length.
  pub chop_lines: bool,
  /// Close small open constraint loops into polygons.
  pub polygonalize_constraints: bool,
  /// Treat z = 0 as null and strip it after triangulation.
  pub remove_zero_flag: bool,
  /// Split overly long edges during refinement.
  pub split_long_flag: bool,
  /// Use cell-diagonal style instead of equilateral style for grid
  /// seeding.
  pub dont_do_equilateral: bool,
  /// Re-order constraint lines head-to-tail before insertion.
  pub organize_lines_flag: bool,
  /// Force corner points out through the hull before removal.
  pub convex_hull_flag: bool,
  /// Policy for explicit swap passes.
  pub swap_mode: SwapMode,
  graze_override: Option<f64>,
  skinny_mult: f64,
  validate_topo: bool,
  bug_locations: Vec<(f64, f64)>,
  cache: TriangleIndexCache,
}

impl Default for MeshEngine {
  fn default() -> MeshEngine {
    MeshEngine::new()
  }
}

impl MeshEngine {
  pub fn new() -> MeshEngine {
    let validate_topo = env::var("GRD_VALIDATE_TRIMESH_TOPO")
      .map(|v| !v.is_empty() && v != "0")
      .unwrap_or(false);
    let skinny_mult = env::var("GRD_SKINNY_MULT")
      .ok()
      .and_then(|v| v.parse::<f64>().ok())
      .filter(|v| *v > 0.0)
      .unwrap_or(1.0);
    MeshEngine {
      mesh: TriMesh::new(),
      chop_lines: false,
      polygonalize_constraints: false,
      remove_zero_flag: false,
      split_long_flag: false,
      dont_do_equilateral: false,
      organize_lines_flag: false,
      convex_hull_flag: false,
      swap_mode: SwapMode::Any,
      graze_override: None,
      skinny_mult,
      validate_topo,
      bug_locations: Vec::new(),
      cache: TriangleIndexCache::new(),
    }
  }

  ///////////////////////////////////////////////////////////////////////////
  // State access

  pub fn mesh(&self) -> &TriMesh {
    &self.mesh
  }

  pub fn mesh_mut(&mut self) -> &mut TriMesh {
    &mut self.mesh
  }

  /// Detach and return the mesh, leaving the engine empty.
  pub fn take_mesh(&mut self) -> TriMesh {
    self.cache.release();
    self.bug_locations.clear();
    std::mem::take(&mut self.mesh)
  }

  /// Override the operation-wide grazing distance (`None` restores the
  /// perimeter-derived default).
  pub fn set_graze_distance(&mut self, graze: Option<f64>) {
    self.graze_override = graze;
  }

  pub fn graze(&self) -> f64 {
    self.graze_override.unwrap_or_else(|| self.mesh.default_graze())
  }

  /// Up to ten (x, y) pairs where non-fatal anomalies were repaired.
  pub fn bug_locations(&self) -> &[(f64, f64)] {
    &self.bug_locations
  }

  /// Drop the cached triangle index. Must be called by owners of
  /// long-lived engines when the mesh they drape against goes away.
  pub fn release_index(&mut self) {
    self.cache.release();
  }

  ///////////////////////////////////////////////////////////////////////////
  // Build operations

  /// Triangulate a scattered point set.
  pub fn triangulate_points(&mut self, xs: &[f64], ys: &[f64], zs: &[f64]) -> Result<()> {
    self.load_points(xs, ys, zs)?;
    let result = triangulate::triangulate_raw_points(&mut self.mesh, self.convex_hull_flag, false);
    if let Err(err) = result {
      self.mesh.clear();
      return Err(err);
    }
    if self.split_long_flag {
      self.split_long_edges();
    }
    self.finish_build();
    Ok(())
  }

  /// Triangulate a scattered point set and honour constraint polylines.
  /// `exact` asks for exact honouring: each constraint segment becomes
  /// exactly one live edge.
  pub fn triangulate_with_lines(
    &mut self,
    xs: &[f64],
    ys: &[f64],
    zs: &[f64],
    lines: &[Polyline],
    exact: bool,
  ) -> Result<()> {
    self.load_points(xs, ys, zs)?;
    for line in lines {
      for p in &line.points {
        self.mesh.add_raw_point(p.x, p.y, p.z);
      }
    }
    if self.mesh.raw_points().is_empty() {
      self.mesh.clear();
      return Err(Error::BadArgument("no points and no line vertices"));
    }
    let result = triangulate::triangulate_raw_points(&mut self.mesh, self.convex_hull_flag, true);
    if let Err(err) = result {
      self.mesh.clear();
      return Err(err);
    }
    if self.split_long_flag {
      self.split_long_edges();
    }
    let lines = self.organized(lines);
    let opts = self.constraint_options(exact);
    let graze = self.graze();
    constraint::insert_constraints(&mut self.mesh, &lines, &opts, graze)?;
    self.finish_build();
    Ok(())
  }

  /// Insert constraint polylines into the mesh already held by the engine.
  pub fn add_constraint_lines(&mut self, lines: &[Polyline], exact: bool) -> Result<Outcome> {
    if self.mesh.is_empty() {
      return Err(Error::BadArgument("engine holds no mesh"));
    }
    if lines.is_empty() {
      return Ok(Outcome::Unchanged);
    }
    let lines = self.organized(lines);
    let opts = self.constraint_options(exact);
    let graze = self.graze();
    constraint::insert_constraints(&mut self.mesh, &lines, &opts, graze)?;
    self.finish_build();
    Ok(Outcome::Changed)
  }

  /// Seed a mesh from a rectangular grid, optionally with fault lines.
  pub fn from_grid(
    &mut self,
    grid: &Grid,
    faults: &[Polyline],
    ops: &dyn GridOps,
  ) -> Result<()> {
    if !self.mesh.is_empty() {
      return Err(Error::BadArgument("engine already holds a mesh"));
    }
    let style = if self.dont_do_equilateral {
      GridMeshStyle::CellDiagonals
    } else {
      GridMeshStyle::Equilateral
    };
    let fault_paths: Vec<Vec<Point3>> = faults.iter().map(|l| l.points.clone()).collect();
    grid::grid_to_mesh(&mut self.mesh, grid, style, ops, &fault_paths)?;
    if !faults.is_empty() {
      let opts = self.constraint_options(false);
      let graze = self.graze();
      constraint::insert_constraints(&mut self.mesh, faults, &opts, graze)?;
      self.mesh.remove_deleted();
      self.mesh.mark_borders();
    }
    self.note_sliver_bugs();
    if self.validate_topo {
      self.mesh.validate(self.graze());
    }
    Ok(())
  }

  /// Rasterise the mesh onto a grid. The bounding box defaults to the
  /// mesh's own.
  pub fn to_grid(&self, nc: usize, nr: usize, bbox: Option<[f64; 4]>) -> Result<Grid> {
    let bbox = match bbox.or_else(|| self.mesh.bbox()) {
      Some(bbox) => bbox,
      None => return Err(Error::BadArgument("engine holds no mesh")),
    };
    grid::mesh_to_grid(&self.mesh, nc, nr, bbox)
  }

  ///////////////////////////////////////////////////////////////////////////
  // Repair operations

  /// Strip null-valued regions from the mesh. No live node carries a null
  /// z afterwards.
  pub fn remove_nulls_from_trimesh(&mut self) -> Result<Outcome> {
    if self.mesh.is_empty() {
      return Err(Error::BadArgument("engine holds no mesh"));
    }
    let graze = self.graze();
    let removed = grid::remove_nulls(&mut self.mesh, graze);
    if removed == 0 {
      return Ok(Outcome::Unchanged);
    }
    self.finish_build();
    Ok(Outcome::Changed)
  }

  /// Fill null nodes instead of deleting them: from a grid collaborator
  /// when one is supplied, by plane extrapolation otherwise.
  pub fn fill_null_nodes(
    &mut self,
    source: Option<(&Grid, &dyn GridOps, &[Polyline])>,
  ) -> usize {
    match source {
      Some((grid, ops, faults)) => {
        let paths: Vec<Vec<Point3>> = faults.iter().map(|l| l.points.clone()).collect();
        grid::fill_nulls_from_grid(&mut self.mesh, grid, ops, &paths)
      }
      None => grid::fill_nulls_by_extrapolation(&mut self.mesh),
    }
  }

  /// Zero-length and zero-area repair plus compaction; a second call is a
  /// no-op.
  pub fn reshape_triangles(&mut self) -> Result<Outcome> {
    if self.mesh.is_empty() {
      return Err(Error::BadArgument("engine holds no mesh"));
    }
    let count = repair::reshape_triangles(&mut self.mesh);
    self.note_sliver_bugs();
    if self.validate_topo {
      self.mesh.validate(self.graze());
    }
    Ok(if count > 0 {
      Outcome::Changed
    } else {
      Outcome::Unchanged
    })
  }

  /// Remove one node and re-triangulate the hole it leaves.
  pub fn remove_node(&mut self, node: NodeId) -> Result<Outcome> {
    if node.0 >= self.mesh.nodes().len() {
      return Err(Error::BadArgument("node id out of range"));
    }
    let graze = self.graze();
    if !repair::remove_node(&mut self.mesh, node, graze) {
      return Ok(Outcome::Unchanged);
    }
    self.finish_build();
    Ok(Outcome::Changed)
  }

  /// One explicit swap sweep under the engine's `swap_mode`.
  pub fn swap_edges(&mut self) -> usize {
    let graze = self.graze();
    swap::swap_loop(
      &mut self.mesh,
      self.swap_mode,
      1.0,
      graze,
      grid::NULL_Z * 0.1,
    )
  }

  ///////////////////////////////////////////////////////////////////////////
  // Drape / clip

  /// Drape a polyline onto the mesh. `key` identifies the cached triangle
  /// index; reuse the same key across calls against the same mesh.
  pub fn drape_polyline(
    &mut self,
    key: (i64, i64),
    line: &[Point3],
  ) -> Result<Vec<Vec<Point3>>> {
    let graze = self.graze();
    let index = self
      .cache
      .get_or_build(key, &self.mesh)
      .ok_or(Error::BadArgument("engine holds no mesh"))?;
    Ok(drape::drape_polyline(&self.mesh, index, line, graze))
  }

  /// Drape loose points onto the mesh; `None` for points off the mesh.
  pub fn drape_points(
    &mut self,
    key: (i64, i64),
    points: &[[f64; 2]],
  ) -> Result<Vec<Option<f64>>> {
    let graze = self.graze();
    let index = self
      .cache
      .get_or_build(key, &self.mesh)
      .ok_or(Error::BadArgument("engine holds no mesh"))?;
    Ok(drape::drape_points(&self.mesh, index, points, graze))
  }

  /// Clip a polyline to the mesh footprint without draping.
  pub fn clip_polyline(
    &mut self,
    key: (i64, i64),
    line: &[Point3],
  ) -> Result<Vec<Vec<Point3>>> {
    let graze = self.graze();
    let index = self
      .cache
      .get_or_build(key, &self.mesh)
      .ok_or(Error::BadArgument("engine holds no mesh"))?;
    Ok(drape::clip_polyline_to_mesh(&self.mesh, index, line, graze))
  }

  /// Boundary rings of the mesh (outer ring plus one ring per hole).
  pub fn outline_boundary(&self) -> Vec<Vec<NodeId>> {
    drape::outline_boundary(&self.mesh)
  }

  /// Clip the mesh to a polygon, keeping the inside or the outside.
  pub fn clip_to_polygon(&mut self, ring: &[[f64; 2]], keep_inside: bool) -> Result<Outcome> {
    if self.mesh.is_empty() {
      return Err(Error::BadArgument("engine holds no mesh"));
    }
    let graze = self.graze();
    let before = self.mesh.live_edges().count();
    drape::clip_mesh_to_polygon(&mut self.mesh, ring, keep_inside, graze);
    let changed = self.mesh.live_edges().count() != before;
    self.finish_build();
    Ok(if changed {
      Outcome::Changed
    } else {
      Outcome::Unchanged
    })
  }

  ///////////////////////////////////////////////////////////////////////////
  // Smoothing

  /// Grid-mediated smoothing of the z field through the supplied grid
  /// collaborator.
  pub fn smooth(&mut self, ops: &dyn GridOps, factor: f64) -> Result<()> {
    smooth::smooth_mesh(&mut self.mesh, ops, factor)
  }

  /// Recompute triangle and node normals.
  pub fn compute_normals(&mut self) {
    smooth::compute_normals(&mut self.mesh);
  }

  ///////////////////////////////////////////////////////////////////////////
  // I/O and diagnostics

  pub fn save_text(&self, path: &Path) -> Result<()> {
    io::save_trimesh(&self.mesh, None, path)
  }

  pub fn load_text(&mut self, path: &Path) -> Result<()> {
    let file = io::load_trimesh(path)?;
    self.cache.release();
    self.mesh = file.mesh;
    self.mesh.mark_borders();
    Ok(())
  }

  /// Run the self-diagnostic topology validator; returns the number of
  /// problems found (all logged, none fatal).
  pub fn validate_topology(&self) -> usize {
    self.mesh.validate(self.graze())
  }

  ///////////////////////////////////////////////////////////////////////////
  // Internals

  fn load_points(&mut self, xs: &[f64], ys: &[f64], zs: &[f64]) -> Result<()> {
    if xs.len() != ys.len() || xs.len() != zs.len() {
      return Err(Error::BadArgument("point array lengths differ"));
    }
    if !self.mesh.is_empty() {
      return Err(Error::BadArgument("engine already holds a mesh"));
    }
    self.mesh.clear();
    self.bug_locations.clear();
    self.cache.release();
    for i in 0..xs.len() {
      self.mesh.add_raw_point(xs[i], ys[i], zs[i]);
    }
    Ok(())
  }

  fn constraint_options(&self, exact: bool) -> ConstraintOptions {
    ConstraintOptions {
      exact,
      chop_lines: self.chop_lines,
      polygonalize: self.polygonalize_constraints,
      skinny_mult: self.skinny_mult,
    }
  }

  /// Head-to-tail ordering of constraint lines so chains insert end to
  /// end.
  fn organized(&self, lines: &[Polyline]) -> Vec<Polyline> {
    if !self.organize_lines_flag || lines.len() < 2 {
      return lines.to_vec();
    }
    let mut rest: Vec<Polyline> = lines.to_vec();
    let mut out = vec![rest.remove(0)];
    while !rest.is_empty() {
      let tail = out[out.len() - 1]
        .points
        .last()
        .copied()
        .unwrap_or(Point3::new(0.0, 0.0, 0.0));
      let next = rest
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
          let da = a.points.first().map_or(f64::MAX, |p| p.dist2d(&tail));
          let db = b.points.first().map_or(f64::MAX, |p| p.dist2d(&tail));
          da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
      out.push(rest.remove(next));
    }
    out
  }

  /// Compact, refresh borders, strip zero-z when configured, and validate
  /// under the diagnostic gate.
  fn finish_build(&mut self) {
    if self.remove_zero_flag {
      let nulled: Vec<NodeId> = self
        .mesh
        .live_nodes()
        .filter(|(_, n)| n.z == 0.0)
        .map(|(id, _)| id)
        .collect();
      if !nulled.is_empty() {
        for id in nulled {
          self.mesh.node_mut(id).z = grid::NULL_Z;
        }
        let graze = self.graze();
        grid::remove_nulls(&mut self.mesh, graze);
      }
    }
    self.mesh.remove_deleted();
    self.mesh.mark_borders();
    self.cache.release();
    self.note_sliver_bugs();
    if self.validate_topo {
      let problems = self.mesh.validate(self.graze());
      if problems > 0 {
        warn!("topology validation found {} problems", problems);
      }
    }
  }

  /// Split edges much longer than the ambient average at their midpoints
  /// and re-swap. Two rounds bound the work; constraint edges are left
  /// alone.
  fn split_long_edges(&mut self) {
    let graze = self.graze();
    for _ in 0..2 {
      let avg = self.mesh.average_edge_length(Trim::Top(0.25));
      if avg <= 0.0 {
        return;
      }
      let long: Vec<EdgeId> = self
        .mesh
        .live_edges()
        .filter(|(_, e)| e.length > 2.0 * avg && !e.flag.is_constraint_class())
        .map(|(id, _)| id)
        .collect();
      if long.is_empty() {
        return;
      }
      for e in long {
        if self.mesh.edge(e).deleted {
          continue;
        }
        let mid = self.mesh.edge_midpoint(e);
        let (n1, n2) = (self.mesh.edge(e).node1, self.mesh.edge(e).node2);
        let z = (self.mesh.node(n1).z + self.mesh.node(n2).z) / 2.0;
        constraint::split_from_edge(&mut self.mesh, e, Point3::new(mid[0], mid[1], z), graze);
      }
      swap::swap_loop(&mut self.mesh, SwapMode::Any, 1.0, graze, grid::NULL_Z);
    }
  }

  /// Record centroids of any surviving sliver triangles for the caller.
  fn note_sliver_bugs(&mut self) {
    let graze = self.graze();
    let slivers: Vec<(f64, f64)> = self
      .mesh
      .live_triangles()
      .filter(|(t, _)| self.mesh.tri_area(*t) <= graze * graze)
      .map(|(t, _)| {
        let c = self.mesh.tri_centroid(t);
        (c[0], c[1])
      })
      .collect();
    for loc in slivers {
      if self.bug_locations.len() >= MAX_BUG_LOCATIONS {
        break;
      }
      self.bug_locations.push(loc);
    }
  }
}

///////////////////////////////////////////////////////////////////////////////
// Tests
