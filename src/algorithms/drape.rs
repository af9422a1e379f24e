//! Draping and clipping against the mesh: polyline clipping to the mesh
//! footprint, triangle-walking drape, boundary outlines, and clipping the
//! mesh itself to a polygon.

use ordered_float::OrderedFloat;

use crate::data::{EdgeId, NodeId, TriMesh};
use crate::geometry::{self, Point3, PointLocation, SegSeg};
use crate::index::TriangleIndex;

/// Hard cap on triangle-walk steps per draped segment.
const MAX_WALK: usize = 10_000;

///////////////////////////////////////////////////////////////////////////////
// Boundary outline

/// Walk the boundary rings of the mesh: every edge with a single triangle,
/// chained node to node through the only unused boundary edge at each
/// stop. A mesh with holes yields one ring per hole plus the outer ring.
pub fn outline_boundary(mesh: &TriMesh) -> Vec<Vec<NodeId>> {
  let mut visited = vec![false; mesh.edges().len()];
  let mut rings = Vec::new();
  for i in 0..mesh.edges().len() {
    let e = EdgeId(i);
    if visited[i] || mesh.edge(e).deleted || !mesh.edge(e).is_boundary() {
      continue;
    }
    let start = mesh.edge(e).node1;
    let mut ring = Vec::new();
    let mut node = start;
    let mut edge = e;
    loop {
      visited[edge.0] = true;
      ring.push(node);
      let next = mesh.edge(edge).other_node(node);
      if next == start {
        break;
      }
      let follow = mesh.edges_at(next).iter().copied().find(|&f| {
        !visited[f.0] && !mesh.edge(f).deleted && mesh.edge(f).is_boundary()
      });
      match follow {
        Some(f) => {
          node = next;
          edge = f;
        }
        None => break,
      }
    }
    rings.push(ring);
  }
  rings
}

///////////////////////////////////////////////////////////////////////////////
// Clip polyline to mesh

/// Clip a polyline against the mesh footprint. Each returned piece is a
/// maximal run of the input that stays on the mesh (boundary contact
/// included); z values are carried linearly from the input.
pub fn clip_polyline_to_mesh(
  mesh: &TriMesh,
  index: &TriangleIndex,
  line: &[Point3],
  graze: f64,
) -> Vec<Vec<Point3>> {
  let boundary: Vec<([f64; 2], [f64; 2])> = mesh
    .live_edges()
    .filter(|(_, e)| e.is_boundary())
    .map(|(_, e)| (mesh.node(e.node1).xy(), mesh.node(e.node2).xy()))
    .collect();

  let mut pieces: Vec<Vec<Point3>> = Vec::new();
  let mut current: Vec<Point3> = Vec::new();
  let mut open = false;

  for w in line.windows(2) {
    let (a, b) = (w[0], w[1]);
    let len = a.dist2d(&b);
    if len <= graze {
      continue;
    }
    let eps = graze / len;

    let mut ts: Vec<f64> = vec![0.0, 1.0];
    for &(e1, e2) in &boundary {
      match geometry::segment_intersection(a.xy(), b.xy(), e1, e2, graze) {
        Ok(SegSeg::Crossing { x, y }) => {
          ts.push((geometry::dist2(a.xy(), [x, y]) / len).clamp(0.0, 1.0));
        }
        Ok(SegSeg::Overlap) | Ok(SegSeg::Identical) => {
          // Colinear run along the boundary: cut at the projections of the
          // boundary edge's endpoints.
          for p in [e1, e2] {
            if let Ok((_, t)) = geometry::perp_foot(p, a.xy(), b.xy()) {
              if t > 0.0 && t < 1.0 {
                ts.push(t);
              }
            }
          }
        }
        _ => {}
      }
    }
    ts.sort_by_key(|&t| OrderedFloat(t));
    ts.dedup_by(|x, first| (*x - *first).abs() <= eps);

    let at = |t: f64| -> Point3 {
      Point3::new(
        a.x + t * (b.x - a.x),
        a.y + t * (b.y - a.y),
        a.z + t * (b.z - a.z),
      )
    };
    for pair in ts.windows(2) {
      let (t0, t1) = (pair[0], pair[1]);
      if t1 - t0 <= eps {
        continue;
      }
      let mid = at((t0 + t1) / 2.0);
      let inside = index
        .triangle_containing(mesh, mid.x, mid.y, graze)
        .is_some();
      if !inside {
        if open {
          pieces.push(std::mem::take(&mut current));
          open = false;
        }
        continue;
      }
      if open && t0 <= eps {
        current.push(at(t1));
      } else {
        if open {
          pieces.push(std::mem::take(&mut current));
        }
        current = vec![at(t0), at(t1)];
      }
      open = t1 >= 1.0 - eps;
      if !open {
        pieces.push(std::mem::take(&mut current));
      }
    }
  }
  if !current.is_empty() {
    pieces.push(current);
  }
  pieces
}

///////////////////////////////////////////////////////////////////////////////
// Drape

/// Drape single points: triangle lookup plus plane interpolation. `None`
/// for points off the mesh.
pub fn drape_points(
  mesh: &TriMesh,
  index: &TriangleIndex,
  points: &[[f64; 2]],
  graze: f64,
) -> Vec<Option<f64>> {
  points
    .iter()
    .map(|&[x, y]| {
      index
        .triangle_containing(mesh, x, y, graze)
        .and_then(|t| mesh.tri_plane(t).ok())
        .map(|plane| geometry::plane_z(plane, x, y))
    })
    .collect()
}

/// Drape a polyline onto the mesh: clip to the footprint, then walk each
/// piece triangle to triangle, emitting a vertex at every edge crossing
/// and at every input vertex, with z from the triangle planes.
pub fn drape_polyline(
  mesh: &TriMesh,
  index: &TriangleIndex,
  line: &[Point3],
  graze: f64,
) -> Vec<Vec<Point3>> {
  clip_polyline_to_mesh(mesh, index, line, graze)
    .into_iter()
    .map(|piece| drape_piece(mesh, index, &piece, graze))
    .filter(|piece| piece.len() >= 2)
    .collect()
}

fn drape_piece(
  mesh: &TriMesh,
  index: &TriangleIndex,
  piece: &[Point3],
  graze: f64,
) -> Vec<Point3> {
  let mut out: Vec<Point3> = Vec::new();
  for (i, w) in piece.windows(2).enumerate() {
    walk_drape_segment(mesh, index, w[0], w[1], graze, i == 0, &mut out);
  }
  out
}

fn walk_drape_segment(
  mesh: &TriMesh,
  index: &TriangleIndex,
  a: Point3,
  b: Point3,
  graze: f64,
  emit_start: bool,
  out: &mut Vec<Point3>,
) {
  let len = a.dist2d(&b);
  if len <= graze {
    return;
  }
  let dir = [(b.x - a.x) / len, (b.y - a.y) / len];
  let mut tri = match locate_with_nudge(mesh, index, a.xy(), dir, graze) {
    Some(t) => t,
    None => return,
  };
  let mut plane = match mesh.tri_plane(tri) {
    Ok(p) => p,
    Err(_) => return,
  };
  if emit_start {
    out.push(Point3::new(a.x, a.y, geometry::plane_z(plane, a.x, a.y)));
  }

  let eps = graze / len;
  let mut entry: Option<EdgeId> = None;
  let mut tcur = 0.0;
  for _ in 0..MAX_WALK {
    // Done when the current triangle holds the segment end.
    let corners: Vec<[f64; 2]> = mesh
      .tri_nodes(tri)
      .iter()
      .map(|&n| mesh.node(n).xy())
      .collect();
    if geometry::point_in_polygon(b.xy(), &corners, graze) != PointLocation::Outside {
      out.push(Point3::new(b.x, b.y, geometry::plane_z(plane, b.x, b.y)));
      return;
    }
    // Exit through whichever non-entry edge the remaining segment crosses.
    let mut exit: Option<(EdgeId, f64, [f64; 2])> = None;
    for &e in &mesh.tri(tri).edges {
      if Some(e) == entry {
        continue;
      }
      let p1 = mesh.node(mesh.edge(e).node1).xy();
      let p2 = mesh.node(mesh.edge(e).node2).xy();
      if let Ok(SegSeg::Crossing { x, y }) =
        geometry::segment_intersection(a.xy(), b.xy(), p1, p2, graze)
      {
        let t = geometry::dist2(a.xy(), [x, y]) / len;
        if t > tcur + eps && exit.map_or(true, |(_, bt, _)| t < bt) {
          exit = Some((e, t, [x, y]));
        }
      }
    }
    let (e, t, hit) = match exit {
      Some(hit) => hit,
      None => {
        // Grazing a node; nudge past it and relocate.
        let next = [
          a.x + (tcur + 2.0 * eps) * (b.x - a.x),
          a.y + (tcur + 2.0 * eps) * (b.y - a.y),
        ];
        match locate_with_nudge(mesh, index, next, dir, graze) {
          Some(t2) if t2 != tri => {
            tri = t2;
            plane = match mesh.tri_plane(tri) {
              Ok(p) => p,
              Err(_) => return,
            };
            entry = None;
            tcur += 2.0 * eps;
            continue;
          }
          _ => {
            out.push(Point3::new(b.x, b.y, geometry::plane_z(plane, b.x, b.y)));
            return;
          }
        }
      }
    };
    out.push(Point3::new(
      hit[0],
      hit[1],
      geometry::plane_z(plane, hit[0], hit[1]),
    ));
    tri = match mesh.other_tri(e, tri) {
      Some(next) => next,
      None => return, // exited through the mesh boundary
    };
    plane = match mesh.tri_plane(tri) {
      Ok(p) => p,
      Err(_) => return,
    };
    entry = Some(e);
    tcur = t;
  }
}

/// Triangle lookup with a small forward nudge when the start point grazes
/// a node or edge and the raw lookup misses.
fn locate_with_nudge(
  mesh: &TriMesh,
  index: &TriangleIndex,
  p: [f64; 2],
  dir: [f64; 2],
  graze: f64,
) -> Option<crate::data::TriId> {
  index
    .triangle_containing(mesh, p[0], p[1], graze)
    .or_else(|| {
      let nudged = [p[0] + dir[0] * 2.0 * graze, p[1] + dir[1] * 2.0 * graze];
      index.triangle_containing(mesh, nudged[0], nudged[1], graze)
    })
}

///////////////////////////////////////////////////////////////////////////////
// Clip mesh to polygon

/// Whack every edge whose midpoint falls on the wrong side of the polygon
/// (`keep_inside` decides which side is wrong), then delete every node
/// strictly on the wrong side.
pub fn clip_mesh_to_polygon(
  mesh: &mut TriMesh,
  ring: &[[f64; 2]],
  keep_inside: bool,
  graze: f64,
) {
  for i in 0..mesh.edges().len() {
    let e = EdgeId(i);
    if mesh.edge(e).deleted {
      continue;
    }
    let mid = mesh.edge_midpoint(e);
    let loc = geometry::point_in_polygon(mid, ring, graze);
    let wrong = if keep_inside {
      loc == PointLocation::Outside
    } else {
      loc == PointLocation::Inside
    };
    if wrong {
      mesh.whack_edge(e);
    }
  }
  for i in 0..mesh.nodes().len() {
    let n = NodeId(i);
    if mesh.node(n).deleted {
      continue;
    }
    let loc = geometry::point_in_polygon(mesh.node(n).xy(), ring, graze);
    let wrong = if keep_inside {
      loc == PointLocation::Outside
    } else {
      loc == PointLocation::Inside
    };
    if wrong {
      mesh.whack_node(n);
    }
  }
}

///////////////////////////////////////////////////////////////////////////////
// Tests

#[cfg(test)]
mod tests {
  use super::*;
  use crate::algorithms::triangulate::triangulate_raw_points;
  use crate::index::TriangleIndex;

  fn planar_mesh() -> TriMesh {
    // z = 1 + 2x - y over a 3x3 block.
    let mut mesh = TriMesh::new();
    for i in 0..3 {
      for j in 0..3 {
        let (x, y) = (i as f64, j as f64);
        mesh.add_raw_point(x, y, 1.0 + 2.0 * x - y);
      }
    }
    triangulate_raw_points(&mut mesh, false, false).unwrap();
    mesh.remove_deleted();
    mesh.mark_borders();
    mesh
  }

  #[test]
  fn outline_is_single_ring() {
    let mesh = planar_mesh();
    let rings = outline_boundary(&mesh);
    assert_eq!(rings.len(), 1);
    assert_eq!(rings[0].len(), 8);
    // Every ring node is a border node.
    for &n in &rings[0] {
      assert!(mesh.node(n).on_border);
    }
  }

  #[test]
  fn drape_point_matches_plane() {
    let mesh = planar_mesh();
    let index = TriangleIndex::build(&mesh).unwrap();
    let zs = drape_points(&mesh, &index, &[[0.5, 0.5], [1.7, 1.2], [5.0, 5.0]], 1e-9);
    assert!((zs[0].unwrap() - (1.0 + 1.0 - 0.5)).abs() < 1e-9);
    assert!((zs[1].unwrap() - (1.0 + 3.4 - 1.2)).abs() < 1e-9);
    assert_eq!(zs[2], None);
  }

  #[test]
  fn clip_crossing_line() {
    let mesh = planar_mesh();
    let index = TriangleIndex::build(&mesh).unwrap();
    let line = [Point3::new(-1.0, 1.0, 0.0), Point3::new(3.0, 1.0, 0.0)];
    let pieces = clip_polyline_to_mesh(&mesh, &index, &line, mesh.default_graze());
    assert_eq!(pieces.len(), 1);
    let piece = &pieces[0];
    assert!((piece[0].x - 0.0).abs() < 1e-6);
    assert!((piece[piece.len() - 1].x - 2.0).abs() < 1e-6);
  }

  #[test]
  fn clip_outside_line_is_empty() {
    let mesh = planar_mesh();
    let index = TriangleIndex::build(&mesh).unwrap();
    let line = [Point3::new(-1.0, -1.0, 0.0), Point3::new(3.0, -1.0, 0.0)];
    let pieces = clip_polyline_to_mesh(&mesh, &index, &line, mesh.default_graze());
    assert!(pieces.is_empty());
  }

  #[test]
  fn drape_crossing_line_is_planar() {
    let mesh = planar_mesh();
    let index = TriangleIndex::build(&mesh).unwrap();
    let line = [Point3::new(-1.0, 0.5, 0.0), Point3::new(3.0, 0.5, 0.0)];
    let pieces = drape_polyline(&mesh, &index, &line, mesh.default_graze());
    assert_eq!(pieces.len(), 1);
    let piece = &pieces[0];
    assert!(piece.len() >= 3, "expected crossings, got {:?}", piece);
    for p in piece {
      let want = 1.0 + 2.0 * p.x - p.y;
      assert!(
        (p.z - want).abs() < 1e-9,
        "z at ({}, {}) = {} want {}",
        p.x,
        p.y,
        p.z,
        want
      );
    }
    // Crossings advance monotonically.
    for w in piece.windows(2) {
      assert!(w[1].x >= w[0].x - 1e-12);
    }
  }

  #[test]
  fn clip_mesh_keep_inside() {
    let mut mesh = planar_mesh();
    let ring = [[-0.5, -0.5], [1.5, -0.5], [1.5, 2.5], [-0.5, 2.5]];
    let graze = mesh.default_graze();
    clip_mesh_to_polygon(&mut mesh, &ring, true, graze);
    mesh.remove_deleted();
    // The x = 2 column is gone.
    assert!(mesh.live_nodes().all(|(_, n)| n.x < 1.6));
    assert_eq!(mesh.validate(mesh.default_graze()), 0);
  }
}
