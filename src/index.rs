//! Uniform-grid spatial indices: raw points for the incremental
//! triangulator, triangles for drape/clip lookups.

use crate::data::{RawPoint, TriId, TriMesh};
use crate::geometry::{self, PointLocation};

/// Target number of items per cell when sizing an index.
const TARGET_OCCUPANCY: f64 = 3.0;

///////////////////////////////////////////////////////////////////////////////
// Cell grid

/// Rectangular array of cells over a bounding box, each cell holding item
/// ids. Shared machinery for both indices.
#[derive(Debug, Clone)]
struct CellGrid {
  x1: f64,
  y1: f64,
  ncol: usize,
  nrow: usize,
  xspace: f64,
  yspace: f64,
  cells: Vec<Vec<usize>>,
}

impl CellGrid {
  fn sized_for(bbox: [f64; 4], count: usize) -> CellGrid {
    let [x1, y1, x2, y2] = bbox;
    let width = (x2 - x1).max(f64::MIN_POSITIVE);
    let height = (y2 - y1).max(f64::MIN_POSITIVE);
    let cells = (count as f64 / TARGET_OCCUPANCY).max(1.0);
    let ncol = ((cells * width / height).sqrt().round() as usize).max(1);
    let nrow = ((cells / ncol as f64).round() as usize).max(1);
    CellGrid {
      x1,
      y1,
      ncol,
      nrow,
      xspace: width / ncol as f64,
      yspace: height / nrow as f64,
      cells: vec![Vec::new(); ncol * nrow],
    }
  }

  fn col_of(&self, x: f64) -> usize {
    (((x - self.x1) / self.xspace) as isize).clamp(0, self.ncol as isize - 1) as usize
  }

  fn row_of(&self, y: f64) -> usize {
    (((y - self.y1) / self.yspace) as isize).clamp(0, self.nrow as isize - 1) as usize
  }

  fn cell(&self, col: usize, row: usize) -> &[usize] {
    &self.cells[row * self.ncol + col]
  }

  fn insert(&mut self, col: usize, row: usize, id: usize) {
    self.cells[row * self.ncol + col].push(id);
  }
}

///////////////////////////////////////////////////////////////////////////////
// Raw-point index

/// Uniform grid over the raw input points. The triangulator asks it for an
/// unused point inside a triangle via an expanding ring search centred on
/// the triangle centroid and bounded by the triangle bounding box.
#[derive(Debug, Clone)]
pub struct PointIndex {
  grid: CellGrid,
}

impl PointIndex {
  pub fn build(points: &[RawPoint]) -> Option<PointIndex> {
    if points.is_empty() {
      return None;
    }
    let mut bbox = [f64::MAX, f64::MAX, f64::MIN, f64::MIN];
    for p in points {
      bbox[0] = bbox[0].min(p.x);
      bbox[1] = bbox[1].min(p.y);
      bbox[2] = bbox[2].max(p.x);
      bbox[3] = bbox[3].max(p.y);
    }
    let mut grid = CellGrid::sized_for(bbox, points.len());
    for (id, p) in points.iter().enumerate() {
      let (col, row) = (grid.col_of(p.x), grid.row_of(p.y));
      grid.insert(col, row, id);
    }
    Some(PointIndex { grid })
  }

  /// Mark every raw point that grazes an earlier raw point as used, so the
  /// triangulator never tries to insert it. Returns the duplicate count.
  pub fn mark_duplicates(&self, points: &mut [RawPoint], graze: f64) -> usize {
    let mut duplicates = 0;
    for id in 0..points.len() {
      if points[id].used {
        continue;
      }
      let p = [points[id].x, points[id].y];
      let col = self.grid.col_of(p[0]);
      let row = self.grid.row_of(p[1]);
      'probe: for nrow in row.saturating_sub(1)..=(row + 1).min(self.grid.nrow - 1) {
        for ncol in col.saturating_sub(1)..=(col + 1).min(self.grid.ncol - 1) {
          for &other in self.grid.cell(ncol, nrow) {
            if other < id
              && !points[other].used
              && geometry::points_graze(p, [points[other].x, points[other].y], graze)
            {
              points[id].used = true;
              duplicates += 1;
              break 'probe;
            }
          }
        }
      }
    }
    duplicates
  }

  /// Find an unused raw point strictly usable inside triangle `t`
  /// (boundary grazes count; the split routine delegates those).
  pub fn unused_point_in_triangle(
    &self,
    mesh: &TriMesh,
    points: &[RawPoint],
    t: TriId,
    graze: f64,
  ) -> Option<usize> {
    let [ax, ay, bx, by] = mesh.tri_bbox(t);
    let [cx, cy] = mesh.tri_centroid(t);
    let corners: Vec<[f64; 2]> = mesh
      .tri_nodes(t)
      .iter()
      .map(|&n| mesh.node(n).xy())
      .collect();

    let col0 = self.grid.col_of(cx);
    let row0 = self.grid.row_of(cy);
    let col_lo = self.grid.col_of(ax);
    let col_hi = self.grid.col_of(bx);
    let row_lo = self.grid.row_of(ay);
    let row_hi = self.grid.row_of(by);
    let max_radius = (col0 - col_lo)
      .max(col_hi - col0)
      .max(row0 - row_lo)
      .max(row_hi - row0);

    for radius in 0..=max_radius {
      for row in row0.saturating_sub(radius)..=(row0 + radius).min(self.grid.nrow - 1) {
        for col in col0.saturating_sub(radius)..=(col0 + radius).min(self.grid.ncol - 1) {
          let on_ring = row + radius == row0
            || row == row0 + radius
            || col + radius == col0
            || col == col0 + radius;
          if !on_ring || col < col_lo || col > col_hi || row < row_lo || row > row_hi {
            continue;
          }
          for &id in self.grid.cell(col, row) {
            let p = &points[id];
            if p.used {
              continue;
            }
            if geometry::point_in_polygon([p.x, p.y], &corners, graze) != PointLocation::Outside {
              return Some(id);
            }
          }
        }
      }
    }
    None
  }
}

///////////////////////////////////////////////////////////////////////////////
// Triangle index

/// Uniform grid over mesh triangles: each triangle is registered in every
/// cell its bounding box overlaps.
#[derive(Debug, Clone)]
pub struct TriangleIndex {
  grid: CellGrid,
}

impl TriangleIndex {
  pub fn build(mesh: &TriMesh) -> Option<TriangleIndex> {
    let bbox = mesh.bbox()?;
    let count = mesh.live_triangles().count();
    if count == 0 {
      return None;
    }
    let mut grid = CellGrid::sized_for(bbox, count);
    for (id, _) in mesh.live_triangles() {
      let [ax, ay, bx, by] = mesh.tri_bbox(id);
      for row in grid.row_of(ay)..=grid.row_of(by) {
        for col in grid.col_of(ax)..=grid.col_of(bx) {
          grid.insert(col, row, id.0);
        }
      }
    }
    Some(TriangleIndex { grid })
  }

  /// The live triangle containing `(x, y)`, boundary included.
  pub fn triangle_containing(
    &self,
    mesh: &TriMesh,
    x: f64,
    y: f64,
    graze: f64,
  ) -> Option<TriId> {
    let col = self.grid.col_of(x);
    let row = self.grid.row_of(y);
    self
      .probe_cell(mesh, col, row, x, y, graze)
      .or_else(|| self.probe_neighbours(mesh, col, row, x, y, graze))
  }

  fn probe_cell(
    &self,
    mesh: &TriMesh,
    col: usize,
    row: usize,
    x: f64,
    y: f64,
    graze: f64,
  ) -> Option<TriId> {
    for &id in self.grid.cell(col, row) {
      let t = TriId(id);
      if mesh.tri(t).deleted {
        continue;
      }
      let corners: Vec<[f64; 2]> = mesh
        .tri_nodes(t)
        .iter()
        .map(|&n| mesh.node(n).xy())
        .collect();
      if geometry::point_in_polygon([x, y], &corners, graze) != PointLocation::Outside {
        return Some(t);
      }
    }
    None
  }

  // A point grazing a cell border can land in the wrong cell after
  // rounding; one ring of neighbours settles it.
  fn probe_neighbours(
    &self,
    mesh: &TriMesh,
    col: usize,
    row: usize,
    x: f64,
    y: f64,
    graze: f64,
  ) -> Option<TriId> {
    for dr in -1i64..=1 {
      for dc in -1i64..=1 {
        if dr == 0 && dc == 0 {
          continue;
        }
        let ncol = col as i64 + dc;
        let nrow = row as i64 + dr;
        if ncol < 0 || nrow < 0 || ncol >= self.grid.ncol as i64 || nrow >= self.grid.nrow as i64 {
          continue;
        }
        if let Some(t) = self.probe_cell(mesh, ncol as usize, nrow as usize, x, y, graze) {
          return Some(t);
        }
      }
    }
    None
  }

  /// All live triangles whose cells overlap the given box, deduplicated.
  pub fn triangles_in_bbox(&self, mesh: &TriMesh, bbox: [f64; 4]) -> Vec<TriId> {
    let [ax, ay, bx, by] = bbox;
    let mut seen = vec![false; mesh.triangles().len()];
    let mut out = Vec::new();
    for row in self.grid.row_of(ay)..=self.grid.row_of(by) {
      for col in self.grid.col_of(ax)..=self.grid.col_of(bx) {
        for &id in self.grid.cell(col, row) {
          if !seen[id] && !mesh.tri(TriId(id)).deleted {
            seen[id] = true;
            out.push(TriId(id));
          }
        }
      }
    }
    out
  }
}

///////////////////////////////////////////////////////////////////////////////
// Cache

/// Caller-keyed cache so repeated drape/lookup calls against the same mesh
/// reuse one index. The key is an opaque `(id1, id2)` pair chosen by the
/// caller; releasing is explicit because the engine cannot know when the
/// external mesh arrays go out of scope.
#[derive(Debug, Default)]
pub struct TriangleIndexCache {
  key: Option<(i64, i64)>,
  index: Option<TriangleIndex>,
}

impl TriangleIndexCache {
  pub fn new() -> TriangleIndexCache {
    TriangleIndexCache::default()
  }

  pub fn get_or_build(&mut self, key: (i64, i64), mesh: &TriMesh) -> Option<&TriangleIndex> {
    if self.key != Some(key) || self.index.is_none() {
      self.index = TriangleIndex::build(mesh);
      self.key = Some(key);
    }
    self.index.as_ref()
  }

  pub fn release(&mut self) {
    self.key = None;
    self.index = None;
  }
}

///////////////////////////////////////////////////////////////////////////////
// Tests

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::EdgeFlag;

  fn raw(points: &[(f64, f64)]) -> Vec<RawPoint> {
    points
      .iter()
      .map(|&(x, y)| RawPoint::new(x, y, 0.0))
      .collect()
  }

  fn square_mesh() -> TriMesh {
    let mut mesh = TriMesh::new();
    let n0 = mesh.add_node(0.0, 0.0, 0.0, 0);
    let n1 = mesh.add_node(1.0, 0.0, 0.0, 0);
    let n2 = mesh.add_node(1.0, 1.0, 0.0, 0);
    let n3 = mesh.add_node(0.0, 1.0, 0.0, 0);
    let e0 = mesh.add_edge(n0, n1, None, None, EdgeFlag::Interior);
    let e1 = mesh.add_edge(n1, n2, None, None, EdgeFlag::Interior);
    let e2 = mesh.add_edge(n2, n3, None, None, EdgeFlag::Interior);
    let e3 = mesh.add_edge(n3, n0, None, None, EdgeFlag::Interior);
    let diag = mesh.add_edge(n0, n2, None, None, EdgeFlag::Interior);
    let t0 = mesh.add_triangle(e0, e1, diag, 0);
    let t1 = mesh.add_triangle(e2, e3, diag, 0);
    for (e, t) in [(e0, t0), (e1, t0), (diag, t0), (e2, t1), (e3, t1), (diag, t1)] {
      mesh.edge_mut(e).attach_tri(t);
    }
    mesh
  }

  #[test]
  fn point_index_finds_interior_point() {
    let mesh = square_mesh();
    let points = raw(&[(0.7, 0.2), (0.2, 0.7)]);
    let index = PointIndex::build(&points).unwrap();
    // Lower-right triangle holds (0.7, 0.2).
    let found = index.unused_point_in_triangle(&mesh, &points, TriId(0), 1e-9);
    assert_eq!(found, Some(0));
  }

  #[test]
  fn point_index_skips_used() {
    let mesh = square_mesh();
    let mut points = raw(&[(0.7, 0.2)]);
    points[0].used = true;
    let index = PointIndex::build(&points).unwrap();
    assert_eq!(
      index.unused_point_in_triangle(&mesh, &points, TriId(0), 1e-9),
      None
    );
  }

  #[test]
  fn triangle_lookup() {
    let mesh = square_mesh();
    let index = TriangleIndex::build(&mesh).unwrap();
    assert_eq!(
      index.triangle_containing(&mesh, 0.7, 0.2, 1e-9),
      Some(TriId(0))
    );
    assert_eq!(
      index.triangle_containing(&mesh, 0.2, 0.7, 1e-9),
      Some(TriId(1))
    );
    assert_eq!(index.triangle_containing(&mesh, 2.0, 2.0, 1e-9), None);
  }

  #[test]
  fn bbox_query_dedups() {
    let mesh = square_mesh();
    let index = TriangleIndex::build(&mesh).unwrap();
    let hits = index.triangles_in_bbox(&mesh, [0.0, 0.0, 1.0, 1.0]);
    assert_eq!(hits.len(), 2);
  }

  #[test]
  fn cache_reuses_by_key() {
    let mesh = square_mesh();
    let mut cache = TriangleIndexCache::new();
    assert!(cache.get_or_build((1, 2), &mesh).is_some());
    let first = cache.index.as_ref().unwrap() as *const TriangleIndex;
    assert!(cache.get_or_build((1, 2), &mesh).is_some());
    let second = cache.index.as_ref().unwrap() as *const TriangleIndex;
    assert_eq!(first, second);
    cache.release();
    assert!(cache.index.is_none());
  }
}
