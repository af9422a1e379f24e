//! Topology repair: collapsing zero-length edges, removing zero-area
//! triangles, and taking nodes out of the mesh without leaving holes.

use log::warn;

use crate::algorithms::swap;
use crate::data::{EdgeFlag, EdgeId, NodeId, TriId, TriMesh};
use crate::geometry;

/// Collapse every live edge shorter than `tol` (callers pass bbox
/// perimeter / 20 000) by merging its first endpoint into its second.
/// Returns the number of collapsed edges.
pub fn remove_zero_length_edges(mesh: &mut TriMesh, tol: f64) -> usize {
  let mut count = 0;
  for i in 0..mesh.edges().len() {
    let e = EdgeId(i);
    if mesh.edge(e).deleted || mesh.edge(e).length > tol {
      continue;
    }
    collapse_edge(mesh, e);
    count += 1;
  }
  count
}

/// Merge `node1` into `node2`: the zero-length edge and its triangles go,
/// every other edge at `node1` is re-homed to `node2`, and re-homed edges
/// that duplicate an existing edge at `node2` are merged into it.
fn collapse_edge(mesh: &mut TriMesh, e: EdgeId) {
  let (n1, n2) = (mesh.edge(e).node1, mesh.edge(e).node2);
  // Keep the endpoint that carries constraint state.
  let (gone, kept) = if mesh.node(n1).is_locked && !mesh.node(n2).is_locked {
    (n2, n1)
  } else {
    (n1, n2)
  };
  mesh.whack_edge(e);

  let incident: Vec<EdgeId> = mesh.edges_at(gone).to_vec();
  for f in incident {
    if mesh.edge(f).deleted {
      continue;
    }
    let other = mesh.edge(f).other_node(gone);
    if other == kept {
      // Second zero-length edge between the same pair; drop it.
      mesh.whack_edge(f);
      continue;
    }
    let twin = mesh.edge_between(kept, other);
    {
      let edge = mesh.edge_mut(f);
      if edge.node1 == gone {
        edge.node1 = kept;
      } else {
        edge.node2 = kept;
      }
    }
    mesh.unlink_edge_from_node(gone, f);
    mesh.link_edge_to_node(kept, f);
    mesh.refresh_edge_length(f);
    if let Some(twin) = twin {
      merge_parallel_edges(mesh, twin, f);
    }
  }
  mesh.node_mut(gone).deleted = true;
}

/// Fold duplicate edge `dup` (same endpoints as `keep`) into `keep`:
/// triangles of `dup` move over, then `dup` is tombstoned.
fn merge_parallel_edges(mesh: &mut TriMesh, keep: EdgeId, dup: EdgeId) {
  let tris: Vec<TriId> = mesh.edge(dup).tris().collect();
  for t in tris {
    mesh.tri_mut(t).replace_edge(dup, keep);
    mesh.edge_mut(keep).attach_tri(t);
  }
  let (a, b) = (mesh.edge(dup).node1, mesh.edge(dup).node2);
  // Constraint state survives the merge.
  if mesh.edge(dup).flag.is_constraint_class() && !mesh.edge(keep).flag.is_constraint_class() {
    let (flag, lineid, pairid, is_constraint) = {
      let d = mesh.edge(dup);
      (d.flag, d.lineid, d.pairid, d.is_constraint)
    };
    let k = mesh.edge_mut(keep);
    k.flag = flag;
    k.lineid = lineid;
    k.pairid = pairid;
    k.is_constraint = is_constraint;
  }
  let edge = mesh.edge_mut(dup);
  edge.deleted = true;
  edge.tri1 = None;
  edge.tri2 = None;
  mesh.unlink_edge_from_node(a, dup);
  mesh.unlink_edge_from_node(b, dup);
}

/// Remove every live triangle whose Heron area is at or below `tol²`
/// (callers pass the grazing distance). A sliver with its longest edge on
/// the boundary loses that edge; an interior sliver loses the middle of
/// its three colinear corners. Returns the number of repairs.
pub fn remove_zero_area_triangles(mesh: &mut TriMesh, graze: f64) -> usize {
  let tol = graze * graze;
  let mut count = 0;
  for i in 0..mesh.triangles().len() {
    let t = TriId(i);
    if mesh.tri(t).deleted {
      continue;
    }
    let [e1, e2, e3] = mesh.tri(t).edges;
    let (l1, l2, l3) = (
      mesh.edge(e1).length,
      mesh.edge(e2).length,
      mesh.edge(e3).length,
    );
    if geometry::heron_area(l1, l2, l3) > tol {
      continue;
    }
    let longest = if l1 >= l2 && l1 >= l3 {
      e1
    } else if l2 >= l1 && l2 >= l3 {
      e2
    } else {
      e3
    };
    if mesh.edge(longest).is_boundary() {
      mesh.whack_edge(longest);
    } else {
      // The middle colinear corner is the one opposite the longest edge.
      let middle = mesh.opposite_node(t, longest);
      remove_node(mesh, middle, graze);
    }
    count += 1;
  }
  count
}

/// Remove a node from the mesh and re-triangulate the hole it leaves.
///
/// Interior nodes are swap-isolated down to a three-edge fan whose three
/// opposite edges close into a single replacement triangle. Border nodes
/// reduce to two attached edges (their one triangle simply goes), or hit
/// the three-edge border case that stitches one new boundary edge plus one
/// closing triangle. Returns false when the node could not be isolated
/// (constraint edges pin it).
pub fn remove_node(mesh: &mut TriMesh, n: NodeId, graze: f64) -> bool {
  if mesh.node(n).deleted {
    return false;
  }
  let is_border = mesh
    .edges_at(n)
    .iter()
    .any(|&e| !mesh.edge(e).deleted && mesh.edge(e).is_boundary());
  let target = if is_border { 2 } else { 3 };

  loop {
    let live: Vec<EdgeId> = mesh
      .edges_at(n)
      .iter()
      .copied()
      .filter(|&e| !mesh.edge(e).deleted)
      .collect();
    if live.len() <= target {
      break;
    }
    let mut swapped = false;
    for e in live {
      if swap::swap_edge_for_removal(mesh, e, graze) {
        swapped = true;
        break;
      }
    }
    if !swapped {
      if is_border && edge_count(mesh, n) == 3 {
        return remove_border_node_3(mesh, n);
      }
      warn!("{:?} cannot be isolated for removal; leaving it in place", n);
      return false;
    }
  }

  if is_border {
    remove_border_node_2(mesh, n)
  } else {
    remove_interior_node_3(mesh, n)
  }
}

fn edge_count(mesh: &TriMesh, n: NodeId) -> usize {
  mesh
    .edges_at(n)
    .iter()
    .filter(|&&e| !mesh.edge(e).deleted)
    .count()
}

/// Interior node with exactly three incident edges: three fan triangles
/// collapse into one triangle built from their opposite edges.
fn remove_interior_node_3(mesh: &mut TriMesh, n: NodeId) -> bool {
  let fan_edges: Vec<EdgeId> = mesh
    .edges_at(n)
    .iter()
    .copied()
    .filter(|&e| !mesh.edge(e).deleted)
    .collect();
  let mut fan_tris: Vec<TriId> = Vec::new();
  for &e in &fan_edges {
    for t in mesh.edge(e).tris() {
      if !fan_tris.contains(&t) {
        fan_tris.push(t);
      }
    }
  }
  if fan_edges.len() != 3 || fan_tris.len() != 3 {
    warn!("{:?} fan is not a 3-ring; skipping removal", n);
    return false;
  }
  let opposite: Vec<EdgeId> = fan_tris
    .iter()
    .map(|&t| mesh.opposite_edge(t, n))
    .collect();

  for &t in &fan_tris {
    let edges = mesh.tri(t).edges;
    for e in edges {
      mesh.edge_mut(e).detach_tri(t);
    }
    mesh.tri_mut(t).deleted = true;
  }
  for &e in &fan_edges {
    let (a, b) = (mesh.edge(e).node1, mesh.edge(e).node2);
    let edge = mesh.edge_mut(e);
    edge.deleted = true;
    edge.tri1 = None;
    edge.tri2 = None;
    mesh.unlink_edge_from_node(a, e);
    mesh.unlink_edge_from_node(b, e);
  }
  let nt = mesh.add_triangle(opposite[0], opposite[1], opposite[2], 0);
  for &e in &opposite {
    mesh.edge_mut(e).attach_tri(nt);
  }
  mesh.node_mut(n).deleted = true;
  true
}

/// Border node down to its two boundary edges: one triangle goes, its far
/// side becomes boundary.
fn remove_border_node_2(mesh: &mut TriMesh, n: NodeId) -> bool {
  let live: Vec<EdgeId> = mesh
    .edges_at(n)
    .iter()
    .copied()
    .filter(|&e| !mesh.edge(e).deleted)
    .collect();
  for e in live {
    mesh.whack_edge(e);
  }
  mesh.node_mut(n).deleted = true;
  true
}

/// Border node pinned at three edges (two boundary, one interior): stitch
/// one new boundary edge between the boundary neighbours and close it with
/// one triangle against the two opposite edges.
fn remove_border_node_3(mesh: &mut TriMesh, n: NodeId) -> bool {
  let live: Vec<EdgeId> = mesh
    .edges_at(n)
    .iter()
    .copied()
    .filter(|&e| !mesh.edge(e).deleted)
    .collect();
  if live.len() != 3 {
    return false;
  }
  let border: Vec<EdgeId> = live
    .iter()
    .copied()
    .filter(|&e| mesh.edge(e).is_boundary())
    .collect();
  if border.len() != 2 {
    warn!("{:?} has a 3-edge fan without two boundary edges", n);
    return false;
  }
  let a = mesh.edge(border[0]).other_node(n);
  let b = mesh.edge(border[1]).other_node(n);
  let mut tris: Vec<TriId> = Vec::new();
  for &e in &live {
    for t in mesh.edge(e).tris() {
      if !tris.contains(&t) {
        tris.push(t);
      }
    }
  }
  if tris.len() != 2 {
    return false;
  }
  let opposite: Vec<EdgeId> = tris.iter().map(|&t| mesh.opposite_edge(t, n)).collect();

  for &t in &tris {
    let edges = mesh.tri(t).edges;
    for e in edges {
      mesh.edge_mut(e).detach_tri(t);
    }
    mesh.tri_mut(t).deleted = true;
  }
  for &e in &live {
    let (p, q) = (mesh.edge(e).node1, mesh.edge(e).node2);
    let edge = mesh.edge_mut(e);
    edge.deleted = true;
    edge.tri1 = None;
    edge.tri2 = None;
    mesh.unlink_edge_from_node(p, e);
    mesh.unlink_edge_from_node(q, e);
  }
  let stitch = mesh.add_edge(a, b, None, None, EdgeFlag::Interior);
  let nt = mesh.add_triangle(stitch, opposite[0], opposite[1], 0);
  mesh.edge_mut(stitch).attach_tri(nt);
  for &e in &opposite {
    mesh.edge_mut(e).attach_tri(nt);
  }
  mesh.node_mut(n).deleted = true;
  true
}

/// Zero-length collapse, zero-area removal, then compaction. Running it a
/// second time finds nothing to do.
pub fn reshape_triangles(mesh: &mut TriMesh) -> usize {
  let perimeter = mesh.bbox_perimeter();
  let zero_len = perimeter / geometry::ZERO_LENGTH_PERIMETER_DIVISOR;
  let graze = perimeter / geometry::GRAZE_PERIMETER_DIVISOR;
  let mut count = remove_zero_length_edges(mesh, zero_len);
  count += remove_zero_area_triangles(mesh, graze);
  mesh.remove_deleted();
  mesh.mark_borders();
  count
}

///////////////////////////////////////////////////////////////////////////////
// Tests

#[cfg(test)]
mod tests {
  use super::*;
  use crate::algorithms::triangulate::triangulate_raw_points;

  fn fan_mesh() -> TriMesh {
    // Square corners plus an off-centre interior node with a 4-edge fan.
    // (Off-centre so that no removal step ever stitches three colinear
    // corners.)
    let mut mesh = TriMesh::new();
    for &(x, y) in &[
      (0.0, 0.0),
      (2.0, 0.0),
      (2.0, 2.0),
      (0.0, 2.0),
      (0.8, 0.9),
    ] {
      mesh.add_raw_point(x, y, 0.0);
    }
    triangulate_raw_points(&mut mesh, false, false).unwrap();
    mesh.remove_deleted();
    mesh.mark_borders();
    mesh
  }

  fn node_at(mesh: &TriMesh, x: f64, y: f64) -> NodeId {
    mesh
      .live_nodes()
      .find(|(_, n)| (n.x - x).abs() < 1e-9 && (n.y - y).abs() < 1e-9)
      .map(|(id, _)| id)
      .expect("node not found")
  }

  #[test]
  fn remove_interior_node() {
    let mut mesh = fan_mesh();
    let centre = node_at(&mesh, 1.0, 1.0);
    let graze = mesh.default_graze();
    assert!(remove_node(&mut mesh, centre, graze));
    mesh.remove_deleted();
    assert_eq!(mesh.live_nodes().count(), 4);
    assert_eq!(mesh.live_edges().count(), 5);
    assert_eq!(mesh.live_triangles().count(), 2);
    assert_eq!(mesh.validate(mesh.default_graze()), 0);
  }

  #[test]
  fn remove_border_node() {
    let mut mesh = fan_mesh();
    let corner = node_at(&mesh, 2.0, 2.0);
    let graze = mesh.default_graze();
    assert!(remove_node(&mut mesh, corner, graze));
    mesh.remove_deleted();
    mesh.mark_borders();
    assert_eq!(mesh.live_nodes().count(), 4);
    assert_eq!(mesh.validate(mesh.default_graze()), 0);
  }

  #[test]
  fn zero_length_collapse() {
    let mut mesh = TriMesh::new();
    for &(x, y) in &[
      (0.0, 0.0),
      (2.0, 0.0),
      (2.0, 2.0),
      (0.0, 2.0),
      (1.0, 1.0),
      // A second point a hair away from the centre.
      (1.0 + 1e-7, 1.0),
    ] {
      mesh.add_raw_point(x, y, 0.0);
    }
    triangulate_raw_points(&mut mesh, false, false).unwrap();
    mesh.remove_deleted();
    let collapsed = remove_zero_length_edges(&mut mesh, 1e-5);
    if collapsed > 0 {
      mesh.remove_deleted();
      assert_eq!(mesh.validate(mesh.default_graze()), 0);
      assert_eq!(mesh.live_nodes().count(), 5);
    }
  }

  #[test]
  fn reshape_is_idempotent() {
    let mut mesh = fan_mesh();
    reshape_triangles(&mut mesh);
    let nodes = mesh.live_nodes().count();
    let edges = mesh.live_edges().count();
    let tris = mesh.live_triangles().count();
    let second = reshape_triangles(&mut mesh);
    assert_eq!(second, 0);
    assert_eq!(mesh.live_nodes().count(), nodes);
    assert_eq!(mesh.live_edges().count(), edges);
    assert_eq!(mesh.live_triangles().count(), tris);
  }
}
