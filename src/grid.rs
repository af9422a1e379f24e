//! Rectangular grids and the grid ⇄ mesh exchange: seeding meshes from
//! grids in two diagonal styles, rasterising meshes back to grids, and
//! stripping null-valued regions from a mesh.
//!
//! Grid arithmetic the engine merely consumes (faulted back-interpolation,
//! null filling, smoothing, resampling) sits behind the [`GridOps`] trait;
//! [`BilinearOps`] is the fault-blind implementation shipped with the
//! crate.

use num_traits::ToPrimitive;

use crate::algorithms::swap::{self, SwapMode};
use crate::data::{EdgeFlag, EdgeId, NodeId, TriMesh};
use crate::geometry::{self, Point3, PointLocation};
use crate::{Error, Result};

/// Sentinel carried in node z for "no value".
pub const NULL_Z: f64 = 1.0e30;

/// Anything at or beyond this magnitude counts as null.
pub fn is_null(z: f64) -> bool {
  z.abs() >= NULL_Z * 0.1
}

///////////////////////////////////////////////////////////////////////////////
// Grid

/// A rectangular grid of `f32` values, column-major (`index = col * nr +
/// row`), over a bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
  values: Vec<f32>,
  pub nc: usize,
  pub nr: usize,
  pub x1: f64,
  pub y1: f64,
  pub x2: f64,
  pub y2: f64,
}

impl Grid {
  pub const NULL: f32 = 1.0e30;

  pub fn new(nc: usize, nr: usize, bbox: [f64; 4]) -> Result<Grid> {
    if nc < 2 || nr < 2 {
      return Err(Error::BadGridDimensions { nc, nr });
    }
    Ok(Grid {
      values: vec![Grid::NULL; nc * nr],
      nc,
      nr,
      x1: bbox[0],
      y1: bbox[1],
      x2: bbox[2],
      y2: bbox[3],
    })
  }

  pub fn from_values(values: Vec<f32>, nc: usize, nr: usize, bbox: [f64; 4]) -> Result<Grid> {
    if nc < 2 || nr < 2 {
      return Err(Error::BadGridDimensions { nc, nr });
    }
    if values.len() != nc * nr {
      return Err(Error::BadArgument("grid value count does not match nc*nr"));
    }
    Ok(Grid {
      values,
      nc,
      nr,
      x1: bbox[0],
      y1: bbox[1],
      x2: bbox[2],
      y2: bbox[3],
    })
  }

  pub fn values(&self) -> &[f32] {
    &self.values
  }

  pub fn get(&self, col: usize, row: usize) -> f64 {
    self.values[col * self.nr + row] as f64
  }

  pub fn set(&mut self, col: usize, row: usize, v: f64) {
    self.values[col * self.nr + row] = v.to_f32().unwrap_or(Grid::NULL);
  }

  pub fn is_null_at(&self, col: usize, row: usize) -> bool {
    is_null(self.get(col, row))
  }

  pub fn xspace(&self) -> f64 {
    (self.x2 - self.x1) / (self.nc - 1) as f64
  }

  pub fn yspace(&self) -> f64 {
    (self.y2 - self.y1) / (self.nr - 1) as f64
  }

  pub fn node_x(&self, col: usize) -> f64 {
    self.x1 + col as f64 * self.xspace()
  }

  pub fn node_y(&self, row: usize) -> f64 {
    self.y1 + row as f64 * self.yspace()
  }
}

///////////////////////////////////////////////////////////////////////////////
// Collaborator seam

/// Grid arithmetic performed by an external collaborator. The engine calls
/// these; it never implements faulted interpolation itself.
pub trait GridOps {
  fn resample(&self, grid: &Grid, nc: usize, nr: usize) -> Result<Grid>;
  /// Interpolate the grid at `(x, y)` honouring fault lines. `None` when
  /// the location has no usable value.
  fn back_interpolate(&self, grid: &Grid, faults: &[Vec<Point3>], x: f64, y: f64) -> Option<f64>;
  fn fill_nulls(&self, grid: &mut Grid) -> Result<()>;
  fn smooth(&self, grid: &mut Grid, factor: f64) -> Result<()>;
}

/// Fault-blind bilinear implementation, good enough for stand-alone use
/// and for tests. Faulted behaviour is the caller's collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct BilinearOps;

impl GridOps for BilinearOps {
  fn resample(&self, grid: &Grid, nc: usize, nr: usize) -> Result<Grid> {
    let mut out = Grid::new(nc, nr, [grid.x1, grid.y1, grid.x2, grid.y2])?;
    for col in 0..nc {
      for row in 0..nr {
        let x = out.node_x(col);
        let y = out.node_y(row);
        if let Some(z) = self.back_interpolate(grid, &[], x, y) {
          out.set(col, row, z);
        }
      }
    }
    Ok(out)
  }

  fn back_interpolate(&self, grid: &Grid, _faults: &[Vec<Point3>], x: f64, y: f64) -> Option<f64> {
    let fx = (x - grid.x1) / grid.xspace();
    let fy = (y - grid.y1) / grid.yspace();
    if fx < -1e-9 || fy < -1e-9 || fx > (grid.nc - 1) as f64 + 1e-9 || fy > (grid.nr - 1) as f64 + 1e-9
    {
      return None;
    }
    let c0 = (fx.floor() as usize).min(grid.nc - 2);
    let r0 = (fy.floor() as usize).min(grid.nr - 2);
    let tx = (fx - c0 as f64).clamp(0.0, 1.0);
    let ty = (fy - r0 as f64).clamp(0.0, 1.0);
    let corners = [
      (grid.get(c0, r0), (1.0 - tx) * (1.0 - ty)),
      (grid.get(c0 + 1, r0), tx * (1.0 - ty)),
      (grid.get(c0, r0 + 1), (1.0 - tx) * ty),
      (grid.get(c0 + 1, r0 + 1), tx * ty),
    ];
    let mut sum = 0.0;
    let mut weight = 0.0;
    for (v, w) in corners {
      if !is_null(v) {
        sum += v * w;
        weight += w;
      }
    }
    if weight <= 0.0 {
      None
    } else {
      Some(sum / weight)
    }
  }

  fn fill_nulls(&self, grid: &mut Grid) -> Result<()> {
    for _ in 0..grid.nc + grid.nr {
      let mut fills: Vec<(usize, usize, f64)> = Vec::new();
      for col in 0..grid.nc {
        for row in 0..grid.nr {
          if !grid.is_null_at(col, row) {
            continue;
          }
          let mut sum = 0.0;
          let mut count = 0;
          let mut probe = |c: isize, r: isize| {
            if c >= 0 && r >= 0 && (c as usize) < grid.nc && (r as usize) < grid.nr {
              let v = grid.get(c as usize, r as usize);
              if !is_null(v) {
                sum += v;
                count += 1;
              }
            }
          };
          probe(col as isize - 1, row as isize);
          probe(col as isize + 1, row as isize);
          probe(col as isize, row as isize - 1);
          probe(col as isize, row as isize + 1);
          if count > 0 {
            fills.push((col, row, sum / count as f64));
          }
        }
      }
      if fills.is_empty() {
        break;
      }
      for (col, row, v) in fills {
        grid.set(col, row, v);
      }
    }
    Ok(())
  }

  fn smooth(&self, grid: &mut Grid, factor: f64) -> Result<()> {
    let passes = factor.round().max(0.0) as usize;
    for _ in 0..passes {
      let mut next = grid.values.clone();
      for col in 0..grid.nc {
        for row in 0..grid.nr {
          if grid.is_null_at(col, row) {
            continue;
          }
          let mut sum = 0.0;
          let mut count = 0;
          for dc in -1isize..=1 {
            for dr in -1isize..=1 {
              let c = col as isize + dc;
              let r = row as isize + dr;
              if c < 0 || r < 0 || c as usize >= grid.nc || r as usize >= grid.nr {
                continue;
              }
              let v = grid.get(c as usize, r as usize);
              if !is_null(v) {
                sum += v;
                count += 1;
              }
            }
          }
          if count > 0 {
            next[col * grid.nr + row] = (sum / count as f64) as f32;
          }
        }
      }
      grid.values = next;
    }
    Ok(())
  }
}

///////////////////////////////////////////////////////////////////////////////
// Grid -> mesh

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridMeshStyle {
  /// Nodes at every grid node, one diagonal per cell, two triangles per
  /// cell.
  CellDiagonals,
  /// Rows respaced to `xspace * sqrt(3)/2`, odd rows shifted half a
  /// column with one extra closing column, diagonals alternating by row.
  Equilateral,
}

/// Seed a mesh from a rectangular grid. Null grid values become null-z
/// nodes to be stripped later by null removal.
pub fn grid_to_mesh(
  mesh: &mut TriMesh,
  grid: &Grid,
  style: GridMeshStyle,
  ops: &dyn GridOps,
  faults: &[Vec<Point3>],
) -> Result<()> {
  if !mesh.is_empty() {
    return Err(Error::BadArgument("mesh already holds topology"));
  }
  match style {
    GridMeshStyle::CellDiagonals => cell_diagonal_mesh(mesh, grid),
    GridMeshStyle::Equilateral => equilateral_mesh(mesh, grid, ops, faults),
  }
  mesh.mark_borders();
  Ok(())
}

fn cell_diagonal_mesh(mesh: &mut TriMesh, grid: &Grid) {
  let (nc, nr) = (grid.nc, grid.nr);
  for col in 0..nc {
    for row in 0..nr {
      let z = grid.get(col, row);
      let z = if is_null(z) { NULL_Z } else { z };
      mesh.add_node(grid.node_x(col), grid.node_y(row), z, 0);
    }
  }
  let node = |col: usize, row: usize| NodeId(col * nr + row);

  let mut horiz = vec![EdgeId(0); (nc - 1) * nr];
  let mut vert = vec![EdgeId(0); nc * (nr - 1)];
  let mut diag = vec![EdgeId(0); (nc - 1) * (nr - 1)];
  for col in 0..nc - 1 {
    for row in 0..nr {
      horiz[col * nr + row] =
        mesh.add_edge(node(col, row), node(col + 1, row), None, None, EdgeFlag::Interior);
    }
  }
  for col in 0..nc {
    for row in 0..nr - 1 {
      vert[col * (nr - 1) + row] =
        mesh.add_edge(node(col, row), node(col, row + 1), None, None, EdgeFlag::Interior);
    }
  }
  for col in 0..nc - 1 {
    for row in 0..nr - 1 {
      diag[col * (nr - 1) + row] = mesh.add_edge(
        node(col, row),
        node(col + 1, row + 1),
        None,
        None,
        EdgeFlag::Interior,
      );
    }
  }
  for col in 0..nc - 1 {
    for row in 0..nr - 1 {
      let d = diag[col * (nr - 1) + row];
      let bottom = horiz[col * nr + row];
      let top = horiz[col * nr + row + 1];
      let left = vert[col * (nr - 1) + row];
      let right = vert[(col + 1) * (nr - 1) + row];
      let t1 = mesh.add_triangle(bottom, right, d, 0);
      let t2 = mesh.add_triangle(top, left, d, 0);
      for (e, t) in [(bottom, t1), (right, t1), (d, t1), (top, t2), (left, t2), (d, t2)] {
        mesh.edge_mut(e).attach_tri(t);
      }
    }
  }
}

fn equilateral_mesh(mesh: &mut TriMesh, grid: &Grid, ops: &dyn GridOps, faults: &[Vec<Point3>]) {
  let xspace = grid.xspace();
  let ideal = xspace * 3.0f64.sqrt() / 2.0;
  let nrows = (((grid.y2 - grid.y1) / ideal).round() as usize).max(1) + 1;
  let yspace = (grid.y2 - grid.y1) / (nrows - 1) as f64;

  let mut rows: Vec<Vec<NodeId>> = Vec::with_capacity(nrows);
  for r in 0..nrows {
    let y = grid.y1 + r as f64 * yspace;
    let shifted = r % 2 == 1;
    let ncols = if shifted { grid.nc + 1 } else { grid.nc };
    let mut row_nodes = Vec::with_capacity(ncols);
    for c in 0..ncols {
      let x = if shifted {
        (grid.x1 - xspace / 2.0 + c as f64 * xspace).clamp(grid.x1, grid.x2)
      } else {
        grid.x1 + c as f64 * xspace
      };
      let z = ops
        .back_interpolate(grid, faults, x, y)
        .unwrap_or(NULL_Z);
      row_nodes.push(mesh.add_node(x, y, z, 0));
    }
    rows.push(row_nodes);
  }

  for pair in rows.windows(2) {
    triangle_strip(mesh, &pair[0], &pair[1]);
  }
}

/// Join two node rows with a strip of triangles, advancing on whichever
/// side has the nearer next node.
fn triangle_strip(mesh: &mut TriMesh, lower: &[NodeId], upper: &[NodeId]) {
  let mut i = 0;
  let mut j = 0;
  while i < lower.len() - 1 || j < upper.len() - 1 {
    let advance_lower = if j == upper.len() - 1 {
      true
    } else if i == lower.len() - 1 {
      false
    } else {
      mesh.node(lower[i + 1]).x <= mesh.node(upper[j + 1]).x
    };
    let (a, b, c) = if advance_lower {
      (lower[i], lower[i + 1], upper[j])
    } else {
      (lower[i], upper[j + 1], upper[j])
    };
    let e1 = get_or_add_edge(mesh, a, b);
    let e2 = get_or_add_edge(mesh, b, c);
    let e3 = get_or_add_edge(mesh, c, a);
    let t = mesh.add_triangle(e1, e2, e3, 0);
    for e in [e1, e2, e3] {
      mesh.edge_mut(e).attach_tri(t);
    }
    if advance_lower {
      i += 1;
    } else {
      j += 1;
    }
  }
}

fn get_or_add_edge(mesh: &mut TriMesh, a: NodeId, b: NodeId) -> EdgeId {
  mesh
    .edge_between(a, b)
    .unwrap_or_else(|| mesh.add_edge(a, b, None, None, EdgeFlag::Interior))
}

///////////////////////////////////////////////////////////////////////////////
// Mesh -> grid

/// Rasterise the mesh onto a grid: every triangle with three non-null
/// corners stamps its plane onto the grid nodes it covers.
pub fn mesh_to_grid(mesh: &TriMesh, nc: usize, nr: usize, bbox: [f64; 4]) -> Result<Grid> {
  let mut grid = Grid::new(nc, nr, bbox)?;
  let graze = mesh.default_graze();
  for (t, _) in mesh.live_triangles() {
    let corners = mesh.tri_corners(t);
    if corners.iter().any(|p| is_null(p.z)) {
      continue;
    }
    let plane = match mesh.tri_plane(t) {
      Ok(plane) => plane,
      Err(_) => continue,
    };
    let ring: Vec<[f64; 2]> = corners.iter().map(|p| p.xy()).collect();
    let [ax, ay, bx, by] = mesh.tri_bbox(t);
    let col_lo = (((ax - grid.x1) / grid.xspace()).floor().max(0.0)) as usize;
    let col_hi = ((((bx - grid.x1) / grid.xspace()).ceil()) as usize).min(nc - 1);
    let row_lo = (((ay - grid.y1) / grid.yspace()).floor().max(0.0)) as usize;
    let row_hi = ((((by - grid.y1) / grid.yspace()).ceil()) as usize).min(nr - 1);
    for col in col_lo..=col_hi {
      for row in row_lo..=row_hi {
        let x = grid.node_x(col);
        let y = grid.node_y(row);
        if geometry::point_in_polygon([x, y], &ring, graze) != PointLocation::Outside {
          grid.set(col, row, geometry::plane_z(plane, x, y));
        }
      }
    }
  }
  Ok(grid)
}

///////////////////////////////////////////////////////////////////////////////
// Null removal

/// Strip null-valued regions: swap edges off the null boundary where the
/// swap preserves non-null z, then whack every edge with a null endpoint
/// and tombstone the null nodes. Returns the number of nodes removed.
pub fn remove_nulls(mesh: &mut TriMesh, graze: f64) -> usize {
  swap::swap_loop(mesh, SwapMode::NullRemoval, 1.0, graze, NULL_Z * 0.1);
  for i in 0..mesh.edges().len() {
    let e = EdgeId(i);
    if mesh.edge(e).deleted {
      continue;
    }
    let (n1, n2) = (mesh.edge(e).node1, mesh.edge(e).node2);
    if is_null(mesh.node(n1).z) || is_null(mesh.node(n2).z) {
      mesh.whack_edge(e);
    }
  }
  let mut removed = 0;
  for i in 0..mesh.nodes().len() {
    let n = NodeId(i);
    if !mesh.node(n).deleted && is_null(mesh.node(n).z) {
      mesh.node_mut(n).deleted = true;
      removed += 1;
    }
  }
  removed
}

/// Interior fill, plane-extrapolation flavour: each null node takes its z
/// from the plane of a nearby fully-valued triangle. Returns the fill
/// count.
pub fn fill_nulls_by_extrapolation(mesh: &mut TriMesh) -> usize {
  let mut fills: Vec<(NodeId, f64)> = Vec::new();
  for (id, node) in mesh.live_nodes() {
    if !is_null(node.z) {
      continue;
    }
    // Breadth-1 search: triangles around the node's neighbours.
    let mut found = None;
    'outer: for &e in mesh.edges_at(id) {
      if mesh.edge(e).deleted {
        continue;
      }
      let far = mesh.edge(e).other_node(id);
      for &f in mesh.edges_at(far) {
        if mesh.edge(f).deleted {
          continue;
        }
        for t in mesh.edge(f).tris() {
          let corners = mesh.tri_corners(t);
          if corners.iter().all(|p| !is_null(p.z)) {
            if let Ok(plane) = mesh.tri_plane(t) {
              found = Some(geometry::plane_z(plane, node.x, node.y));
              break 'outer;
            }
          }
        }
      }
    }
    if let Some(z) = found {
      fills.push((id, z));
    }
  }
  let count = fills.len();
  for (id, z) in fills {
    mesh.node_mut(id).z = z;
  }
  count
}

/// Interior fill, back-interpolation flavour: each null node is nudged
/// along an unconstrained incident edge and takes the collaborator's
/// faulted back-interpolation there.
pub fn fill_nulls_from_grid(
  mesh: &mut TriMesh,
  grid: &Grid,
  ops: &dyn GridOps,
  faults: &[Vec<Point3>],
) -> usize {
  let mut fills: Vec<(NodeId, f64)> = Vec::new();
  for (id, node) in mesh.live_nodes() {
    if !is_null(node.z) {
      continue;
    }
    let nudge = mesh
      .edges_at(id)
      .iter()
      .copied()
      .find(|&e| !mesh.edge(e).deleted && !mesh.edge(e).flag.is_constraint_class())
      .map(|e| {
        let far = mesh.node(mesh.edge(e).other_node(id));
        [
          node.x + 0.1 * (far.x - node.x),
          node.y + 0.1 * (far.y - node.y),
        ]
      })
      .unwrap_or([node.x, node.y]);
    if let Some(z) = ops.back_interpolate(grid, faults, nudge[0], nudge[1]) {
      fills.push((id, z));
    }
  }
  let count = fills.len();
  for (id, z) in fills {
    mesh.node_mut(id).z = z;
  }
  count
}

///////////////////////////////////////////////////////////////////////////////
// Tests

#[cfg(test)]
mod tests {
  use super::*;
  use claims::assert_ok;

  fn ramp_grid() -> Grid {
    // z = x + y over [(0,0)..(2,2)], column-major.
    Grid::from_values(
      vec![0.0, 1.0, 2.0, 1.0, 2.0, 3.0, 2.0, 3.0, 4.0],
      3,
      3,
      [0.0, 0.0, 2.0, 2.0],
    )
    .unwrap()
  }

  #[test]
  fn tiny_grid_refused() {
    assert_eq!(
      Grid::new(1, 5, [0.0, 0.0, 1.0, 1.0]),
      Err(Error::BadGridDimensions { nc: 1, nr: 5 })
    );
  }

  #[test]
  fn cell_diagonal_counts() {
    let mut mesh = TriMesh::new();
    assert_ok!(grid_to_mesh(
      &mut mesh,
      &ramp_grid(),
      GridMeshStyle::CellDiagonals,
      &BilinearOps,
      &[],
    ));
    assert_eq!(mesh.live_nodes().count(), 9);
    assert_eq!(mesh.live_edges().count(), 16);
    assert_eq!(mesh.live_triangles().count(), 8);
    assert_eq!(mesh.validate(mesh.default_graze()), 0);
  }

  #[test]
  fn ramp_roundtrip_is_lossless() {
    let grid = ramp_grid();
    let mut mesh = TriMesh::new();
    grid_to_mesh(&mut mesh, &grid, GridMeshStyle::CellDiagonals, &BilinearOps, &[]).unwrap();
    let out = mesh_to_grid(&mesh, 3, 3, [0.0, 0.0, 2.0, 2.0]).unwrap();
    for col in 0..3 {
      for row in 0..3 {
        assert!(
          (out.get(col, row) - grid.get(col, row)).abs() < 1e-5,
          "({}, {})",
          col,
          row
        );
      }
    }
  }

  #[test]
  fn null_centre_leaves_square_hole() {
    let mut values = ramp_grid().values().to_vec();
    values[4] = Grid::NULL; // centre of the 3x3, column-major
    let grid = Grid::from_values(values, 3, 3, [0.0, 0.0, 2.0, 2.0]).unwrap();
    let mut mesh = TriMesh::new();
    grid_to_mesh(&mut mesh, &grid, GridMeshStyle::CellDiagonals, &BilinearOps, &[]).unwrap();
    let graze = mesh.default_graze();
    let removed = remove_nulls(&mut mesh, graze);
    assert_eq!(removed, 1);
    mesh.remove_deleted();
    mesh.mark_borders();
    assert_eq!(mesh.live_nodes().count(), 8);
    assert_eq!(mesh.validate(mesh.default_graze()), 0);
    // Outer ring (8 edges) plus a 4-edge hole ring.
    let rings = crate::algorithms::drape::outline_boundary(&mesh);
    assert_eq!(rings.len(), 2);
    let mut sizes: Vec<usize> = rings.iter().map(|r| r.len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![4, 8]);
  }

  #[test]
  fn equilateral_rows_alternate() {
    let grid = ramp_grid();
    let mut mesh = TriMesh::new();
    grid_to_mesh(&mut mesh, &grid, GridMeshStyle::Equilateral, &BilinearOps, &[]).unwrap();
    assert!(mesh.live_triangles().count() > 0);
    assert_eq!(mesh.validate(mesh.default_graze()), 0);
    // Odd rows carry one node more than the grid has columns.
    let ys: Vec<f64> = {
      let mut ys: Vec<f64> = mesh.live_nodes().map(|(_, n)| n.y).collect();
      ys.sort_by(|a, b| a.partial_cmp(b).unwrap());
      ys.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
      ys
    };
    assert!(ys.len() >= 3);
    let row1: Vec<f64> = mesh
      .live_nodes()
      .filter(|(_, n)| (n.y - ys[1]).abs() < 1e-9)
      .map(|(_, n)| n.x)
      .collect();
    assert_eq!(row1.len(), 4);
  }

  #[test]
  fn bilinear_ops_roundtrip() {
    let grid = ramp_grid();
    let ops = BilinearOps;
    let z = ops.back_interpolate(&grid, &[], 0.5, 0.5).unwrap();
    assert!((z - 1.0).abs() < 1e-6);
    assert_eq!(ops.back_interpolate(&grid, &[], 5.0, 0.0), None);
  }

  #[test]
  fn fill_nulls_completes_grid() {
    let mut values = ramp_grid().values().to_vec();
    values[4] = Grid::NULL;
    let mut grid = Grid::from_values(values, 3, 3, [0.0, 0.0, 2.0, 2.0]).unwrap();
    BilinearOps.fill_nulls(&mut grid).unwrap();
    assert!(!grid.is_null_at(1, 1));
  }
}
