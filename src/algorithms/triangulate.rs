//! Unconstrained triangulation: an inflated seed quadrilateral is refined
//! by incremental point insertion, then edge-swapped to local optimality
//! and stripped of its contrived corner nodes.

use log::warn;

use crate::algorithms::constraint::split_from_edge;
use crate::algorithms::swap::{self, SwapMode, CORNER_BIAS};
use crate::data::{EdgeFlag, NodeId, TriId, TriMesh, CORNER_POINT};
use crate::geometry::{self, Point3};
use crate::grid::NULL_Z;
use crate::index::PointIndex;
use crate::{Error, Result};

/// Seed quadrilateral inflation as a fraction of the larger bbox side.
const BBOX_INFLATE: f64 = 0.05;

/// Lower bound on the refinement-pass safety cap.
const MIN_REFINE_PASSES: usize = 4;

/// Triangulate the raw points already loaded into the mesh. The mesh must
/// hold no topology yet; on success it holds a triangulation covering
/// every non-duplicate raw point, corner scaffolding removed, tombstones
/// not yet compacted.
///
/// `allow_degenerate` accepts colinear point sets (which cannot carry a
/// surface on their own) by retaining the corner frame instead of failing;
/// constraint insertion needs this when the only geometry is a line.
pub fn triangulate_raw_points(
  mesh: &mut TriMesh,
  convex_hull: bool,
  allow_degenerate: bool,
) -> Result<()> {
  if !mesh.nodes().is_empty() {
    return Err(Error::BadArgument("mesh already holds topology"));
  }
  let min_points = if allow_degenerate { 1 } else { 3 };
  if mesh.raw_points().len() < min_points {
    return Err(Error::BadArgument("triangulation needs at least 3 points"));
  }

  let n_points = mesh.raw_points().len();
  let (bbox, mean_z, colinear) = raw_bbox(mesh)?;
  if colinear && !allow_degenerate {
    return Err(Error::DegenerateGeometry);
  }
  seed_quadrilateral(mesh, bbox, mean_z);
  let graze = mesh.default_graze();

  let index = match PointIndex::build(mesh.raw_points()) {
    Some(index) => index,
    None => return Err(Error::DegenerateGeometry),
  };
  let duplicates = index.mark_duplicates(&mut mesh.raw_points, graze);

  let cap = (n_points - duplicates)
    .saturating_sub(1)
    .max(MIN_REFINE_PASSES);
  let mut passes = 0;
  loop {
    let mut inserted = 0;
    let mut t = 0;
    while t < mesh.triangles().len() {
      let tid = TriId(t);
      t += 1;
      if mesh.tri(tid).deleted {
        continue;
      }
      let rp = match index.unused_point_in_triangle(mesh, &mesh.raw_points, tid, graze) {
        Some(rp) => rp,
        None => continue,
      };
      mesh.raw_points[rp].used = true;
      let p = {
        let raw = &mesh.raw_points[rp];
        Point3::new(raw.x, raw.y, raw.z)
      };
      let before = mesh.nodes().len();
      let node = insert_point(mesh, tid, p, graze);
      if mesh.nodes().len() > before {
        inserted += 1;
        if mesh.node(node).rp.is_none() {
          mesh.node_mut(node).rp = Some(rp);
        }
      }
      mesh.raw_points[rp].node = Some(node);
    }
    if inserted == 0 {
      break;
    }
    swap::swap_loop(mesh, SwapMode::Any, 1.0, graze, NULL_Z);
    passes += 1;
    if passes >= cap {
      warn!(
        "triangulation refinement capped after {} passes; returning partial result",
        passes
      );
      break;
    }
  }

  // Final pass penalises triangles still clinging to the corner frame.
  swap::swap_loop(mesh, SwapMode::Any, CORNER_BIAS, graze, NULL_Z);
  if convex_hull {
    push_corners_out(mesh);
  }
  if !colinear {
    remove_corner_nodes(mesh);
    swap::swap_loop(mesh, SwapMode::Any, 1.0, graze, NULL_Z);
  }
  Ok(())
}

/// Insert `p`, known to be inside or on the boundary of triangle `t`.
/// Grazing an existing node returns that node; grazing an edge splits the
/// edge on both sides; otherwise the triangle splits three ways.
pub fn insert_point(mesh: &mut TriMesh, t: TriId, p: Point3, graze: f64) -> NodeId {
  for n in mesh.tri_nodes(t) {
    if geometry::points_graze(p.xy(), mesh.node(n).xy(), graze) {
      return n;
    }
  }
  let edges = mesh.tri(t).edges;
  for e in edges {
    let edge = mesh.edge(e);
    let a = mesh.node(edge.node1).xy();
    let b = mesh.node(edge.node2).xy();
    if geometry::dist_to_segment(p.xy(), a, b) <= graze {
      return split_from_edge(mesh, e, p, graze);
    }
  }
  split_triangle_interior(mesh, t, p)
}

/// 3-way split of triangle `t` at an interior node.
fn split_triangle_interior(mesh: &mut TriMesh, t: TriId, p: Point3) -> NodeId {
  let [e1, e2, e3] = mesh.tri(t).edges;
  let corners = mesh.tri_nodes(t);
  let np = mesh.add_node(p.x, p.y, p.z, 0);

  let mut spokes = [(corners[0], None); 3];
  for (slot, &corner) in spokes.iter_mut().zip(corners.iter()) {
    *slot = (
      corner,
      Some(mesh.add_edge(np, corner, None, None, EdgeFlag::Interior)),
    );
  }
  let spoke_of = |c: NodeId| -> crate::data::EdgeId {
    spokes
      .iter()
      .find(|(corner, _)| *corner == c)
      .and_then(|(_, e)| *e)
      .expect("corner without spoke")
  };

  // `t` keeps e1 plus the two spokes to e1's endpoints.
  let (a, b) = (mesh.edge(e1).node1, mesh.edge(e1).node2);
  let (sa, sb) = (spoke_of(a), spoke_of(b));
  mesh.tri_mut(t).edges = [e1, sa, sb];
  mesh.edge_mut(sa).attach_tri(t);
  mesh.edge_mut(sb).attach_tri(t);

  for e in [e2, e3] {
    let (c, d) = (mesh.edge(e).node1, mesh.edge(e).node2);
    let (sc, sd) = (spoke_of(c), spoke_of(d));
    let nt = mesh.add_triangle(e, sc, sd, 0);
    mesh.edge_mut(e).replace_tri(t, nt);
    mesh.edge_mut(sc).attach_tri(nt);
    mesh.edge_mut(sd).attach_tri(nt);
  }
  np
}

fn raw_bbox(mesh: &TriMesh) -> Result<([f64; 4], f64, bool)> {
  let mut bbox = [f64::MAX, f64::MAX, f64::MIN, f64::MIN];
  let mut z_sum = 0.0;
  for p in mesh.raw_points() {
    bbox[0] = bbox[0].min(p.x);
    bbox[1] = bbox[1].min(p.y);
    bbox[2] = bbox[2].max(p.x);
    bbox[3] = bbox[3].max(p.y);
    z_sum += p.z;
  }
  let perimeter = 2.0 * ((bbox[2] - bbox[0]) + (bbox[3] - bbox[1]));
  if perimeter <= 0.0 {
    return Err(Error::DegenerateGeometry);
  }
  // A point set that is colinear within grazing tolerance cannot carry a
  // surface on its own.
  let graze = perimeter / geometry::GRAZE_PERIMETER_DIVISOR;
  let p0 = [mesh.raw_points()[0].x, mesh.raw_points()[0].y];
  let far = mesh
    .raw_points()
    .iter()
    .max_by(|a, b| {
      let da = geometry::dist2(p0, [a.x, a.y]);
      let db = geometry::dist2(p0, [b.x, b.y]);
      da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    })
    .map(|p| [p.x, p.y])
    .unwrap_or(p0);
  let spread = mesh
    .raw_points()
    .iter()
    .map(|p| geometry::dist_to_segment([p.x, p.y], p0, far))
    .fold(0.0f64, f64::max);
  let colinear = spread <= graze;
  Ok((bbox, z_sum / mesh.raw_points().len() as f64, colinear))
}

/// Four corner nodes (ids 0..3), five edges, two triangles tiling the
/// inflated bounding rectangle.
fn seed_quadrilateral(mesh: &mut TriMesh, bbox: [f64; 4], z: f64) {
  let [x1, y1, x2, y2] = bbox;
  let pad = BBOX_INFLATE * (x2 - x1).max(y2 - y1);
  let c0 = mesh.add_node(x1 - pad, y1 - pad, z, CORNER_POINT);
  let c1 = mesh.add_node(x2 + pad, y1 - pad, z, CORNER_POINT);
  let c2 = mesh.add_node(x2 + pad, y2 + pad, z, CORNER_POINT);
  let c3 = mesh.add_node(x1 - pad, y2 + pad, z, CORNER_POINT);
  let e0 = mesh.add_edge(c0, c1, None, None, EdgeFlag::Interior);
  let e1 = mesh.add_edge(c1, c2, None, None, EdgeFlag::Interior);
  let e2 = mesh.add_edge(c2, c3, None, None, EdgeFlag::Interior);
  let e3 = mesh.add_edge(c3, c0, None, None, EdgeFlag::Interior);
  let diag = mesh.add_edge(c0, c2, None, None, EdgeFlag::Interior);
  let t0 = mesh.add_triangle(e0, e1, diag, 0);
  let t1 = mesh.add_triangle(e2, e3, diag, 0);
  for (e, t) in [(e0, t0), (e1, t0), (diag, t0), (e2, t1), (e3, t1), (diag, t1)] {
    mesh.edge_mut(e).attach_tri(t);
  }
}

fn push_corners_out(mesh: &mut TriMesh) {
  loop {
    let mut changed = 0;
    for i in 0..mesh.edges().len() {
      if swap::swap_corner_out(mesh, crate::data::EdgeId(i)) {
        changed += 1;
      }
    }
    if changed == 0 {
      break;
    }
  }
}

fn remove_corner_nodes(mesh: &mut TriMesh) {
  for i in 0..mesh.nodes().len() {
    let id = NodeId(i);
    if !mesh.node(id).deleted && mesh.node(id).is_corner() {
      mesh.whack_node(id);
    }
  }
}

///////////////////////////////////////////////////////////////////////////////
// Tests

#[cfg(test)]
mod tests {
  use super::*;
  use claims::assert_ok;
  use proptest::prelude::*;

  fn load(mesh: &mut TriMesh, pts: &[(f64, f64, f64)]) {
    for &(x, y, z) in pts {
      mesh.add_raw_point(x, y, z);
    }
  }

  #[test]
  fn four_point_square() {
    let mut mesh = TriMesh::new();
    load(
      &mut mesh,
      &[
        (0.0, 0.0, 0.0),
        (1.0, 0.0, 0.0),
        (1.0, 1.0, 0.0),
        (0.0, 1.0, 0.0),
      ],
    );
    assert_ok!(triangulate_raw_points(&mut mesh, false, false));
    mesh.remove_deleted();
    assert_eq!(mesh.live_nodes().count(), 4);
    assert_eq!(mesh.live_edges().count(), 5);
    assert_eq!(mesh.live_triangles().count(), 2);
    assert_eq!(mesh.validate(mesh.default_graze()), 0);
    // The diagonal joins an opposite pair.
    let diag = mesh
      .live_edges()
      .find(|(_, e)| e.length > 1.1)
      .map(|(_, e)| (e.node1, e.node2))
      .expect("no diagonal");
    let d = (mesh.node(diag.0).xy(), mesh.node(diag.1).xy());
    let spans = (d.0[0] - d.1[0]).abs() > 0.9 && (d.0[1] - d.1[1]).abs() > 0.9;
    assert!(spans, "diagonal {:?} does not span the square", d);
  }

  #[test]
  fn duplicate_points_are_skipped() {
    let mut mesh = TriMesh::new();
    load(
      &mut mesh,
      &[
        (0.0, 0.0, 0.0),
        (1.0, 0.0, 0.0),
        (1.0, 1.0, 0.0),
        (0.0, 1.0, 0.0),
        (1.0, 1.0, 5.0),
      ],
    );
    assert_ok!(triangulate_raw_points(&mut mesh, false, false));
    mesh.remove_deleted();
    assert_eq!(mesh.live_nodes().count(), 4);
  }

  #[test]
  fn colinear_input_is_degenerate() {
    let mut mesh = TriMesh::new();
    load(
      &mut mesh,
      &[(0.0, 0.0, 0.0), (1.0, 0.0, 0.0), (2.0, 0.0, 0.0)],
    );
    assert_eq!(
      triangulate_raw_points(&mut mesh, false, false),
      Err(crate::Error::DegenerateGeometry)
    );
  }

  #[test]
  fn coincident_input_refused() {
    let mut mesh = TriMesh::new();
    load(
      &mut mesh,
      &[(1.0, 1.0, 0.0), (1.0, 1.0, 1.0), (1.0, 1.0, 2.0)],
    );
    assert!(triangulate_raw_points(&mut mesh, false, false).is_err());
  }

  #[test]
  fn interior_point_gets_full_fan() {
    let mut mesh = TriMesh::new();
    load(
      &mut mesh,
      &[
        (0.0, 0.0, 0.0),
        (2.0, 0.0, 0.0),
        (2.0, 2.0, 0.0),
        (0.0, 2.0, 0.0),
        (1.0, 1.0, 1.0),
      ],
    );
    assert_ok!(triangulate_raw_points(&mut mesh, false, false));
    mesh.remove_deleted();
    assert_eq!(mesh.live_nodes().count(), 5);
    assert_eq!(mesh.live_edges().count(), 8);
    assert_eq!(mesh.live_triangles().count(), 4);
    assert_eq!(mesh.validate(mesh.default_graze()), 0);
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]
    #[test]
    fn scattered_points_triangulate_cleanly(
      pts in prop::collection::hash_set((0i32..12, 0i32..12), 4..24)
    ) {
      let mut mesh = TriMesh::new();
      for &(x, y) in &pts {
        mesh.add_raw_point(x as f64, y as f64, (x + y) as f64);
      }
      prop_assume!(triangulate_raw_points(&mut mesh, false, false).is_ok());
      mesh.remove_deleted();
      prop_assert_eq!(mesh.validate(mesh.default_graze()), 0);
      // Every input point surfaced as a live node.
      prop_assert_eq!(mesh.live_nodes().count(), pts.len());
      // Euler characteristic for a disc-like mesh: V - E + T = 1.
      let v = mesh.live_nodes().count() as i64;
      let e = mesh.live_edges().count() as i64;
      let t = mesh.live_triangles().count() as i64;
      if t > 0 {
        prop_assert_eq!(v - e + t, 1);
      }
    }
  }
}
