//! Constraint insertion: polyline cleaning and chopping, the segment walk
//! that threads constraints through the mesh, edge splitting, the
//! exactness passes, and fault-polygon whacking.

use log::{debug, warn};

use crate::algorithms::repair;
use crate::algorithms::swap::{self, SwapMode};
use crate::algorithms::triangulate::insert_point;
use crate::data::{EdgeFlag, EdgeId, NodeId, TriId, TriMesh, Trim};
use crate::geometry::{self, Point3, PointLocation, SegSeg};
use crate::grid::NULL_Z;
use crate::Result;

/// Cap on walk steps per constraint segment. The source bounded its mutual
/// recursion the same way; overflow returns a partial result and logs.
pub const MAX_NCALL: usize = 1000;

/// Snap radius as a fraction of the ambient average edge length.
const SNAP_DIVISOR: f64 = 2.5;

/// Exactness corridor: nodes perpendicular-closer than this fraction of a
/// constraint segment's length are removed around it.
const PERP_FRACTION: f64 = 0.4;

/// Upper bound on the chop target as a fraction of the mesh bbox
/// diagonal.
const CHOP_DIAGONAL_DIVISOR: f64 = 5.0;

/// One constraint polyline with its class and source line id.
#[derive(Debug, Clone)]
pub struct Polyline {
  pub points: Vec<Point3>,
  pub flag: EdgeFlag,
  pub lineid: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ConstraintOptions {
  /// Honour constraints exactly: each input segment ends up as exactly one
  /// live edge.
  pub exact: bool,
  /// Chop long segments to the ambient average edge length first.
  pub chop_lines: bool,
  /// Close small open loops into polygons.
  pub polygonalize: bool,
  /// Scales the polygonalisation gap test (`GRD_SKINNY_MULT`).
  pub skinny_mult: f64,
}

impl Default for ConstraintOptions {
  fn default() -> ConstraintOptions {
    ConstraintOptions {
      exact: false,
      chop_lines: false,
      polygonalize: false,
      skinny_mult: 1.0,
    }
  }
}

///////////////////////////////////////////////////////////////////////////////
// Split from edge

/// Split edge `e` at an interior point `p`, splitting one or both incident
/// triangles. The point is pulled onto the edge line first; a point that
/// grazes an endpoint returns that endpoint unchanged. The constraint
/// class of `e` is preserved on both halves.
pub fn split_from_edge(mesh: &mut TriMesh, e: EdgeId, p: Point3, graze: f64) -> NodeId {
  let (n1, n2) = (mesh.edge(e).node1, mesh.edge(e).node2);
  let a = mesh.node(n1).xy();
  let b = mesh.node(n2).xy();
  if geometry::points_graze(p.xy(), a, graze) {
    return n1;
  }
  if geometry::points_graze(p.xy(), b, graze) {
    return n2;
  }
  let foot = match geometry::perp_foot(p.xy(), a, b) {
    Ok((foot, t)) if t > 0.0 && t < 1.0 => foot,
    _ => return n1,
  };

  // Gather the per-triangle sides before any mutation.
  let tris: Vec<TriId> = mesh.edge(e).tris().collect();
  let mut fans: Vec<(TriId, NodeId, EdgeId, EdgeId)> = Vec::with_capacity(2);
  for &t in &tris {
    let c = mesh.opposite_node(t, e);
    let mut s1 = None;
    let mut s2 = None;
    for &side in &mesh.tri(t).edges {
      if side == e {
        continue;
      }
      if mesh.edge(side).has_node(n1) {
        s1 = Some(side);
      } else {
        s2 = Some(side);
      }
    }
    match (s1, s2) {
      (Some(s1), Some(s2)) => fans.push((t, c, s1, s2)),
      _ => return n1,
    }
  }

  let np = mesh.add_node(foot[0], foot[1], p.z, 0);
  if mesh.edge(e).is_constraint {
    let crp = mesh.add_constraint_point(foot[0], foot[1], p.z);
    mesh.node_mut(np).crp = Some(crp);
  }

  // Second half inherits the first half's constraint identity.
  let (flag, lineid, pairid, is_constraint, number) = {
    let edge = mesh.edge(e);
    (
      edge.flag,
      edge.lineid,
      edge.pairid,
      edge.is_constraint,
      edge.number,
    )
  };
  let e2 = mesh.add_edge(np, n2, None, None, flag);
  {
    let half = mesh.edge_mut(e2);
    half.lineid = lineid;
    half.pairid = pairid;
    half.is_constraint = is_constraint;
    half.number = number;
  }

  // Shorten e to n1..np.
  mesh.unlink_edge_from_node(n2, e);
  mesh.edge_mut(e).node2 = np;
  mesh.link_edge_to_node(np, e);
  mesh.refresh_edge_length(e);

  for (t, c, s1, s2) in fans {
    let spoke = mesh.add_edge(np, c, None, None, EdgeFlag::Interior);
    mesh.tri_mut(t).edges = [e, s1, spoke];
    mesh.edge_mut(spoke).attach_tri(t);
    let nt = mesh.add_triangle(e2, spoke, s2, 0);
    mesh.edge_mut(s2).replace_tri(t, nt);
    mesh.edge_mut(spoke).attach_tri(nt);
    mesh.edge_mut(e2).attach_tri(nt);
  }
  np
}

///////////////////////////////////////////////////////////////////////////////
// Polyline cleaning

fn dedupe_points(points: &[Point3], graze: f64) -> Vec<Point3> {
  let mut out: Vec<Point3> = Vec::with_capacity(points.len());
  for &p in points {
    if out
      .last()
      .map_or(true, |last| !geometry::points_graze(last.xy(), p.xy(), graze))
    {
      out.push(p);
    }
  }
  out
}

/// Close an open line whose endpoint gap is small relative to its own
/// average vertex spacing, scaled by `skinny_mult`.
fn polygonalize(points: Vec<Point3>, skinny_mult: f64, graze: f64) -> Vec<Point3> {
  if points.len() < 3 {
    return points;
  }
  let first = points[0];
  let last = points[points.len() - 1];
  if geometry::points_graze(first.xy(), last.xy(), graze) {
    return points; // already closed
  }
  let spacing: f64 = points
    .windows(2)
    .map(|w| w[0].dist2d(&w[1]))
    .sum::<f64>()
    / (points.len() - 1) as f64;
  let mut points = points;
  if first.dist2d(&last) <= spacing * skinny_mult {
    points.push(first);
  } else {
    debug!("open constraint line left unclosed by polygonalisation");
  }
  points
}

/// Explode a self-intersecting polyline into non-intersecting pieces, cut
/// at every crossing.
fn explode_self_intersections(points: &[Point3], graze: f64) -> Vec<Vec<Point3>> {
  let nseg = points.len().saturating_sub(1);
  // Crossing parameters per segment.
  let mut cuts: Vec<Vec<(f64, Point3)>> = vec![Vec::new(); nseg];
  for i in 0..nseg {
    for j in (i + 2)..nseg {
      // Skip the wrap-around adjacency of a closed line.
      if i == 0 && j == nseg - 1 && points[0] == points[points.len() - 1] {
        continue;
      }
      let (a1, a2) = (points[i], points[i + 1]);
      let (b1, b2) = (points[j], points[j + 1]);
      if let Ok(SegSeg::Crossing { x, y }) =
        geometry::segment_intersection(a1.xy(), a2.xy(), b1.xy(), b2.xy(), graze)
      {
        if geometry::points_graze([x, y], a1.xy(), graze)
          || geometry::points_graze([x, y], a2.xy(), graze)
          || geometry::points_graze([x, y], b1.xy(), graze)
          || geometry::points_graze([x, y], b2.xy(), graze)
        {
          continue; // touching at a shared vertex is not a crossing
        }
        let la = a1.dist2d(&a2);
        let lb = b1.dist2d(&b2);
        let ta = geometry::dist2(a1.xy(), [x, y]) / la;
        let tb = geometry::dist2(b1.xy(), [x, y]) / lb;
        let za = a1.z + ta * (a2.z - a1.z);
        let zb = b1.z + tb * (b2.z - b1.z);
        cuts[i].push((ta, Point3::new(x, y, za)));
        cuts[j].push((tb, Point3::new(x, y, zb)));
      }
    }
  }
  if cuts.iter().all(|c| c.is_empty()) {
    return vec![points.to_vec()];
  }
  let mut pieces = Vec::new();
  let mut piece: Vec<Point3> = vec![points[0]];
  for i in 0..nseg {
    cuts[i].sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    for &(_, cut) in &cuts[i] {
      piece.push(cut);
      pieces.push(std::mem::replace(&mut piece, vec![cut]));
    }
    piece.push(points[i + 1]);
  }
  if piece.len() > 1 {
    pieces.push(piece);
  }
  pieces
}

/// Subdivide long segments so the average inserted length is commensurate
/// with `target`.
fn chop_polyline(points: &[Point3], target: f64) -> Vec<Point3> {
  if target <= 0.0 {
    return points.to_vec();
  }
  let mut out = Vec::with_capacity(points.len());
  for w in points.windows(2) {
    let (a, b) = (w[0], w[1]);
    out.push(a);
    let len = a.dist2d(&b);
    if len > 1.5 * target {
      let pieces = (len / target).ceil() as usize;
      for k in 1..pieces {
        let t = k as f64 / pieces as f64;
        out.push(Point3::new(
          a.x + t * (b.x - a.x),
          a.y + t * (b.y - a.y),
          a.z + t * (b.z - a.z),
        ));
      }
    }
  }
  out.push(points[points.len() - 1]);
  out
}

///////////////////////////////////////////////////////////////////////////////
// Endpoint location and the segment walk

/// Mark an edge as part of a constraint chain.
fn mark_constraint(mesh: &mut TriMesh, e: EdgeId, flag: EdgeFlag, lineid: u32, number: i32) {
  {
    let edge = mesh.edge_mut(e);
    if flag != EdgeFlag::Interior {
      edge.flag = flag;
    }
    edge.lineid = Some(lineid);
    edge.is_constraint = true;
    edge.number = number;
  }
  let (n1, n2) = (mesh.edge(e).node1, mesh.edge(e).node2);
  for n in [n1, n2] {
    if mesh.node(n).crp.is_none() {
      let (x, y, z) = {
        let node = mesh.node(n);
        (node.x, node.y, node.z)
      };
      let crp = mesh.add_constraint_point(x, y, z);
      mesh.node_mut(n).crp = Some(crp);
    }
  }
}

/// Move a snapped node onto a constraint point, retaining its original
/// location so later candidates can compete for it.
fn adjust_node(mesh: &mut TriMesh, n: NodeId, p: Point3) {
  {
    let node = mesh.node_mut(n);
    if node.orig.is_none() {
      node.orig = Some([node.x, node.y, node.z]);
    }
    node.x = p.x;
    node.y = p.y;
    node.z = p.z;
    node.is_locked = true;
    node.shifted = true;
  }
  let incident: Vec<EdgeId> = mesh.edges_at(n).to_vec();
  for e in incident {
    if !mesh.edge(e).deleted {
      mesh.refresh_edge_length(e);
    }
  }
}

/// Locate the node for a constraint point: snap to an existing node within
/// the snap radius (locked nodes compete on distance to their original
/// position), or insert a new node into the containing triangle. `None`
/// when the point lies outside the mesh.
fn locate_or_insert(mesh: &mut TriMesh, p: Point3, snap: f64, graze: f64) -> Option<NodeId> {
  let mut best: Option<(NodeId, f64)> = None;
  for (id, node) in mesh.live_nodes() {
    let d = geometry::dist2(node.xy(), p.xy());
    if d <= snap && best.map_or(true, |(_, bd)| d < bd) {
      best = Some((id, d));
    }
  }
  if let Some((id, d)) = best {
    if d <= graze {
      return Some(id);
    }
    let wins = match mesh.node(id).orig {
      None => !mesh.node(id).is_locked,
      Some(orig) => {
        let cur = mesh.node(id).xy();
        geometry::dist2(p.xy(), [orig[0], orig[1]]) < geometry::dist2(cur, [orig[0], orig[1]])
      }
    };
    if wins {
      adjust_node(mesh, id, p);
      return Some(id);
    }
  }
  let containing = mesh
    .live_triangles()
    .map(|(t, _)| t)
    .find(|&t| {
      let corners: Vec<[f64; 2]> = mesh
        .tri_nodes(t)
        .iter()
        .map(|&n| mesh.node(n).xy())
        .collect();
      geometry::point_in_polygon(p.xy(), &corners, graze) != PointLocation::Outside
    });
  containing.map(|t| insert_point(mesh, t, p, graze))
}

/// Thread a constraint segment from node `n1` to node `n2`, splitting
/// crossed edges as it goes and marking every chain edge.
fn walk_segment(
  mesh: &mut TriMesh,
  n1: NodeId,
  n2: NodeId,
  flag: EdgeFlag,
  lineid: u32,
  number: i32,
  graze: f64,
) {
  let mut current = n1;
  let mut ncall = 0;
  while current != n2 {
    ncall += 1;
    if ncall > MAX_NCALL {
      warn!(
        "constraint walk capped after {} steps on line {}; partial chain kept",
        MAX_NCALL, lineid
      );
      return;
    }
    if let Some(e) = mesh.edge_between(current, n2) {
      mark_constraint(mesh, e, flag, lineid, number);
      return;
    }
    let cp = mesh.node(current).point();
    let q = mesh.node(n2).point();

    // A neighbour that already lies on the segment extends the chain.
    let mut advanced = false;
    let incident: Vec<EdgeId> = mesh.edges_at(current).to_vec();
    for e in incident {
      if mesh.edge(e).deleted {
        continue;
      }
      let far = mesh.edge(e).other_node(current);
      let fp = mesh.node(far).xy();
      if geometry::dist_to_segment(fp, cp.xy(), q.xy()) <= graze
        && geometry::dist2(fp, q.xy()) < geometry::dist2(cp.xy(), q.xy())
      {
        mark_constraint(mesh, e, flag, lineid, number);
        current = far;
        advanced = true;
        break;
      }
    }
    if advanced {
      continue;
    }

    // Otherwise the segment leaves through the opposite edge of one of the
    // triangles around `current`: split it at the crossing.
    let mut tris: Vec<TriId> = Vec::new();
    for &e in mesh.edges_at(current) {
      if mesh.edge(e).deleted {
        continue;
      }
      for t in mesh.edge(e).tris() {
        if !tris.contains(&t) {
          tris.push(t);
        }
      }
    }
    for t in tris {
      let opp = mesh.opposite_edge(t, current);
      let (oa, ob) = (mesh.edge(opp).node1, mesh.edge(opp).node2);
      let a = mesh.node(oa).xy();
      let b = mesh.node(ob).xy();
      let hit = match geometry::segment_intersection(cp.xy(), q.xy(), a, b, graze) {
        Ok(SegSeg::Crossing { x, y }) => Some([x, y]),
        _ => None,
      };
      let hit = match hit {
        Some(hit) if !geometry::points_graze(hit, cp.xy(), graze) => hit,
        _ => continue,
      };
      let seg_len = cp.dist2d(&q);
      let tpar = if seg_len > 0.0 {
        geometry::dist2(cp.xy(), hit) / seg_len
      } else {
        0.0
      };
      let z = cp.z + tpar * (q.z - cp.z);
      let np = split_from_edge(mesh, opp, Point3::new(hit[0], hit[1], z), graze);
      if np == current {
        continue;
      }
      if let Some(e) = mesh.edge_between(current, np) {
        mark_constraint(mesh, e, flag, lineid, number);
      }
      current = np;
      advanced = true;
      break;
    }
    if advanced {
      continue;
    }

    // No crossing: the segment runs outside the mesh. A notch between two
    // boundary fans can be closed with one new triangle.
    if close_boundary_notch(mesh, current, n2, flag, lineid, number) {
      return;
    }
    warn!("constraint segment on line {} left unmatched", lineid);
    return;
  }
}

/// Form a new boundary triangle across a notch using the common opposite
/// node of boundary edges at the two chain ends.
fn close_boundary_notch(
  mesh: &mut TriMesh,
  n1: NodeId,
  n2: NodeId,
  flag: EdgeFlag,
  lineid: u32,
  number: i32,
) -> bool {
  let boundary_at = |mesh: &TriMesh, n: NodeId| -> Vec<EdgeId> {
    mesh
      .edges_at(n)
      .iter()
      .copied()
      .filter(|&e| !mesh.edge(e).deleted && mesh.edge(e).is_boundary())
      .collect()
  };
  for e1 in boundary_at(mesh, n1) {
    let c = mesh.edge(e1).other_node(n1);
    for e2 in boundary_at(mesh, n2) {
      if mesh.edge(e2).other_node(n2) != c {
        continue;
      }
      let ne = mesh.add_edge(n1, n2, None, None, flag);
      let nt = mesh.add_triangle(ne, e1, e2, 0);
      mesh.edge_mut(ne).attach_tri(nt);
      mesh.edge_mut(e1).attach_tri(nt);
      mesh.edge_mut(e2).attach_tri(nt);
      mark_constraint(mesh, ne, flag, lineid, number);
      return true;
    }
  }
  false
}

///////////////////////////////////////////////////////////////////////////////
// Exactness passes

fn constraint_segments(lines: &[Polyline]) -> Vec<(Point3, Point3, u32)> {
  let mut segs = Vec::new();
  for line in lines {
    for w in line.points.windows(2) {
      segs.push((w[0], w[1], line.lineid));
    }
  }
  segs
}

/// Pass (a): remove plain nodes perpendicular-closer than 0.4 segment
/// lengths to any constraint segment, clearing a corridor.
fn predelete_near_nodes(mesh: &mut TriMesh, segs: &[(Point3, Point3, u32)], graze: f64) {
  for &(p, q, _) in segs {
    let len = p.dist2d(&q);
    if len <= graze {
      continue;
    }
    let victims: Vec<NodeId> = mesh
      .live_nodes()
      .filter(|(_, node)| node.crp.is_none() && !node.is_locked && !node.is_corner())
      .filter(|(_, node)| {
        match geometry::perp_foot(node.xy(), p.xy(), q.xy()) {
          Ok((foot, t)) => {
            t > 0.0 && t < 1.0 && geometry::dist2(node.xy(), foot) < PERP_FRACTION * len
          }
          Err(_) => false,
        }
      })
      .map(|(id, _)| id)
      .collect();
    for n in victims {
      repair::remove_node(mesh, n, graze);
    }
  }
}

/// Pass (b): swap every edge that crosses a constraint segment, repeating
/// so chains of crossings untangle.
fn swap_crossing_edges(mesh: &mut TriMesh, segs: &[(Point3, Point3, u32)], graze: f64) {
  for _ in 0..10 {
    let mut changed = 0;
    for i in 0..mesh.edges().len() {
      let e = EdgeId(i);
      {
        let edge = mesh.edge(e);
        if edge.deleted || edge.flag.is_constraint_class() || edge.is_constraint {
          continue;
        }
      }
      let a = mesh.node(mesh.edge(e).node1).xy();
      let b = mesh.node(mesh.edge(e).node2).xy();
      let crosses = segs.iter().any(|&(p, q, _)| {
        matches!(
          geometry::segment_intersection(a, b, p.xy(), q.xy(), graze),
          Ok(SegSeg::Crossing { x, y })
            if !geometry::points_graze([x, y], a, graze)
              && !geometry::points_graze([x, y], b, graze)
              && !geometry::points_graze([x, y], p.xy(), graze)
              && !geometry::points_graze([x, y], q.xy(), graze)
        )
      });
      if crosses && swap::swap_edge(mesh, e, SwapMode::Force, 1.0, graze, NULL_Z) {
        changed += 1;
      }
    }
    if changed == 0 {
      break;
    }
  }
}

/// Pass (d): remove every node sitting in the interior of a constraint
/// segment, re-stitching a single edge across the gap.
fn remove_chain_nodes(mesh: &mut TriMesh, segs: &[(Point3, Point3, u32)], graze: f64) {
  for &(p, q, _) in segs {
    loop {
      let victim = mesh
        .live_nodes()
        .find(|(id, node)| {
          !geometry::points_graze(node.xy(), p.xy(), graze)
            && !geometry::points_graze(node.xy(), q.xy(), graze)
            && geometry::dist_to_segment(node.xy(), p.xy(), q.xy()) <= graze
            && chain_edges_at(mesh, *id).len() == 2
        })
        .map(|(id, _)| id);
      match victim {
        Some(n) => {
          if !remove_chain_node(mesh, n, graze) {
            break;
          }
        }
        None => break,
      }
    }
  }
}

fn chain_edges_at(mesh: &TriMesh, n: NodeId) -> Vec<EdgeId> {
  mesh
    .edges_at(n)
    .iter()
    .copied()
    .filter(|&e| {
      let edge = mesh.edge(e);
      !edge.deleted && edge.is_constraint
    })
    .collect()
}

/// Remove a node pinned inside a constraint chain: swap its plain edges
/// away until only 4 (interior) or 3 (border) remain, then replace the
/// fan with one through-going constraint edge and the 1 or 2 surviving
/// triangles.
fn remove_chain_node(mesh: &mut TriMesh, n: NodeId, graze: f64) -> bool {
  let chain = chain_edges_at(mesh, n);
  if chain.len() != 2 {
    return false;
  }
  let is_border = mesh
    .edges_at(n)
    .iter()
    .any(|&e| !mesh.edge(e).deleted && mesh.edge(e).is_boundary());
  let target = if is_border { 3 } else { 4 };

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
      if !mesh.edge(e).is_constraint && swap::swap_edge_for_removal(mesh, e, graze) {
        swapped = true;
        break;
      }
    }
    if !swapped {
      warn!("{:?} on a constraint chain cannot be isolated", n);
      return false;
    }
  }

  let live: Vec<EdgeId> = mesh
    .edges_at(n)
    .iter()
    .copied()
    .filter(|&e| !mesh.edge(e).deleted)
    .collect();
  let a = mesh.edge(chain[0]).other_node(n);
  let b = mesh.edge(chain[1]).other_node(n);
  let mut tris: Vec<TriId> = Vec::new();
  for &e in &live {
    for t in mesh.edge(e).tris() {
      if !tris.contains(&t) {
        tris.push(t);
      }
    }
  }
  let expected_tris = if is_border { 2 } else { live.len() };
  if tris.len() != expected_tris {
    warn!("{:?} chain fan has unexpected shape; leaving node", n);
    return false;
  }
  let (flag, lineid, pairid, number) = {
    let c = mesh.edge(chain[0]);
    (c.flag, c.lineid, c.pairid, c.number)
  };

  // Ring edges opposite `n`, one per fan triangle, survive the rebuild.
  let opposite: Vec<EdgeId> = tris.iter().map(|&t| mesh.opposite_edge(t, n)).collect();
  for &t in &tris {
    let edges = mesh.tri(t).edges;
    for e in edges {
      mesh.edge_mut(e).detach_tri(t);
    }
    mesh.tri_mut(t).deleted = true;
  }
  for &e in &live {
    let (p1, p2) = (mesh.edge(e).node1, mesh.edge(e).node2);
    let edge = mesh.edge_mut(e);
    edge.deleted = true;
    edge.tri1 = None;
    edge.tri2 = None;
    mesh.unlink_edge_from_node(p1, e);
    mesh.unlink_edge_from_node(p2, e);
  }

  let stitch = mesh.add_edge(a, b, None, None, flag);
  {
    let edge = mesh.edge_mut(stitch);
    edge.lineid = lineid;
    edge.pairid = pairid;
    edge.is_constraint = true;
    edge.number = number;
  }
  // The surviving ring edges regroup into triangles on each side of the
  // stitched edge.
  let mut built = 0;
  for side in [true, false] {
    let ring: Vec<EdgeId> = opposite
      .iter()
      .copied()
      .filter(|&e| !mesh.edge(e).deleted)
      .filter(|&e| {
        let mid = mesh.edge_midpoint(e);
        let sa = mesh.node(a).xy();
        let sb = mesh.node(b).xy();
        let o = geometry::Orientation::new(sa, sb, mid);
        if side {
          o == geometry::Orientation::CounterClockWise
        } else {
          o == geometry::Orientation::ClockWise
        }
      })
      .collect();
    if ring.len() == 2 {
      let nt = mesh.add_triangle(stitch, ring[0], ring[1], 0);
      mesh.edge_mut(stitch).attach_tri(nt);
      mesh.edge_mut(ring[0]).attach_tri(nt);
      mesh.edge_mut(ring[1]).attach_tri(nt);
      built += 1;
    }
  }
  if built == 0 {
    warn!("chain node removal stitched no triangle at {:?}", n);
  }
  mesh.node_mut(n).deleted = true;
  true
}

/// Pass (e): remove opposite nodes of constraint triangles that sit
/// perpendicular-closer than 0.4 edge lengths to the constraint edge.
fn remove_close_opposite_nodes(mesh: &mut TriMesh, graze: f64) {
  let candidates: Vec<(NodeId, EdgeId)> = mesh
    .live_edges()
    .filter(|(_, e)| e.is_constraint)
    .flat_map(|(id, e)| e.tris().map(move |t| (id, t)))
    .filter_map(|(e, t)| {
      let o = mesh.opposite_node(t, e);
      let node = mesh.node(o);
      if node.crp.is_some() || node.is_locked {
        return None;
      }
      let edge = mesh.edge(e);
      let a = mesh.node(edge.node1).xy();
      let b = mesh.node(edge.node2).xy();
      let d = geometry::dist_to_segment(node.xy(), a, b);
      if d < PERP_FRACTION * edge.length {
        Some((o, e))
      } else {
        None
      }
    })
    .collect();
  for (n, _) in candidates {
    repair::remove_node(mesh, n, graze);
  }
}

///////////////////////////////////////////////////////////////////////////////
// Fault polygon whacking

/// Follow every fault/discontinuity chain by shared endpoints and matching
/// line id; when a chain closes, whack every non-fault edge whose midpoint
/// lies strictly inside the polygon, opening a hole along the fault.
pub fn whack_fault_polygons(mesh: &mut TriMesh, graze: f64) {
  for i in 0..mesh.edges().len() {
    mesh.edge_mut(EdgeId(i)).tflag2 = false;
  }
  for i in 0..mesh.edges().len() {
    let e = EdgeId(i);
    {
      let edge = mesh.edge(e);
      if edge.deleted || !edge.flag.is_fault_class() || edge.tflag2 {
        continue;
      }
    }
    let lineid = mesh.edge(e).lineid;
    mesh.edge_mut(e).tflag2 = true;
    let mut ring = vec![mesh.edge(e).node1, mesh.edge(e).node2];
    extend_chain(mesh, &mut ring, lineid, false);
    let closed = ring.len() > 3 && ring[0] == ring[ring.len() - 1];
    if !closed {
      extend_chain(mesh, &mut ring, lineid, true);
    }
    let closed = ring.len() > 3 && ring[0] == ring[ring.len() - 1];
    if !closed {
      continue;
    }
    let poly: Vec<[f64; 2]> = ring[..ring.len() - 1]
      .iter()
      .map(|&n| mesh.node(n).xy())
      .collect();
    for j in 0..mesh.edges().len() {
      let f = EdgeId(j);
      {
        let edge = mesh.edge(f);
        if edge.deleted || edge.flag.is_fault_class() {
          continue;
        }
      }
      let mid = mesh.edge_midpoint(f);
      if geometry::point_in_polygon(mid, &poly, graze) == PointLocation::Inside {
        mesh.whack_edge(f);
      }
    }
  }
}

/// Grow a fault chain from its last (or, reversed, first) node.
fn extend_chain(mesh: &mut TriMesh, ring: &mut Vec<NodeId>, lineid: Option<u32>, reversed: bool) {
  loop {
    let tip = if reversed { ring[0] } else { ring[ring.len() - 1] };
    let next = mesh
      .edges_at(tip)
      .iter()
      .copied()
      .find(|&f| {
        let edge = mesh.edge(f);
        !edge.deleted && edge.flag.is_fault_class() && !edge.tflag2 && edge.lineid == lineid
      });
    match next {
      Some(f) => {
        mesh.edge_mut(f).tflag2 = true;
        let far = mesh.edge(f).other_node(tip);
        if reversed {
          ring.insert(0, far);
        } else {
          ring.push(far);
        }
        if ring[0] == ring[ring.len() - 1] {
          return;
        }
      }
      None => return,
    }
  }
}

///////////////////////////////////////////////////////////////////////////////
// Driver

/// Clean, chop and insert a set of constraint polylines into an existing
/// mesh.
pub fn insert_constraints(
  mesh: &mut TriMesh,
  lines: &[Polyline],
  opts: &ConstraintOptions,
  graze: f64,
) -> Result<()> {
  let avg = mesh.average_edge_length(Trim::Top(0.25));
  // Sparse meshes (a handful of nodes in a large frame) would otherwise
  // yield a chop target as long as the lines themselves; the bbox
  // diagonal bounds it.
  let diag = mesh
    .bbox()
    .map(|[x1, y1, x2, y2]| ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt())
    .unwrap_or(0.0);
  let chop_target = if avg > 0.0 {
    avg.min(diag / CHOP_DIAGONAL_DIVISOR)
  } else {
    diag / CHOP_DIAGONAL_DIVISOR
  };
  let mut cleaned: Vec<Polyline> = Vec::new();
  for line in lines {
    let points = dedupe_points(&line.points, graze);
    if points.len() < 2 {
      continue;
    }
    let points = if opts.polygonalize {
      polygonalize(points, opts.skinny_mult, graze)
    } else {
      points
    };
    for piece in explode_self_intersections(&points, graze) {
      let piece = if opts.chop_lines && chop_target > 0.0 {
        chop_polyline(&piece, chop_target)
      } else {
        piece
      };
      cleaned.push(Polyline {
        points: piece,
        flag: line.flag,
        lineid: line.lineid,
      });
    }
  }

  let segs = constraint_segments(&cleaned);
  if opts.exact {
    predelete_near_nodes(mesh, &segs, graze);
    swap_crossing_edges(mesh, &segs, graze);
  }

  let snap = if avg > 0.0 { avg / SNAP_DIVISOR } else { graze };
  for line in &cleaned {
    for (number, w) in line.points.windows(2).enumerate() {
      let (p, q) = (w[0], w[1]);
      let n1 = match locate_or_insert(mesh, p, snap, graze) {
        Some(n) => n,
        None => {
          warn!("constraint point outside mesh on line {}", line.lineid);
          continue;
        }
      };
      let n2 = match locate_or_insert(mesh, q, snap, graze) {
        Some(n) => n,
        None => {
          warn!("constraint point outside mesh on line {}", line.lineid);
          continue;
        }
      };
      if n1 == n2 {
        continue;
      }
      walk_segment(mesh, n1, n2, line.flag, line.lineid, number as i32, graze);
    }
  }

  if opts.exact {
    remove_chain_nodes(mesh, &segs, graze);
    remove_close_opposite_nodes(mesh, graze);
    swap::swap_loop(mesh, SwapMode::Any, 1.0, graze, NULL_Z);
  }
  if cleaned.iter().any(|l| l.flag.is_fault_class()) {
    whack_fault_polygons(mesh, graze);
  }
  Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Tests

#[cfg(test)]
mod tests {
  use super::*;
  use crate::algorithms::triangulate::triangulate_raw_points;
  use claims::assert_ok;

  fn mesh_of(points: &[(f64, f64, f64)]) -> TriMesh {
    let mut mesh = TriMesh::new();
    for &(x, y, z) in points {
      mesh.add_raw_point(x, y, z);
    }
    triangulate_raw_points(&mut mesh, false, false).unwrap();
    mesh.remove_deleted();
    mesh.mark_borders();
    mesh
  }

  fn line(points: &[(f64, f64, f64)], flag: EdgeFlag) -> Polyline {
    Polyline {
      points: points.iter().map(|&(x, y, z)| Point3::new(x, y, z)).collect(),
      flag,
      lineid: 1,
    }
  }

  #[test]
  fn split_edge_midpoint() {
    let mut mesh = mesh_of(&[
      (0.0, 0.0, 0.0),
      (1.0, 0.0, 0.0),
      (1.0, 1.0, 0.0),
      (0.0, 1.0, 0.0),
    ]);
    let diag = mesh
      .live_edges()
      .find(|(_, e)| e.length > 1.1)
      .map(|(id, _)| id)
      .unwrap();
    let mid = mesh.edge_midpoint(diag);
    let graze = mesh.default_graze();
    let np = split_from_edge(&mut mesh, diag, Point3::new(mid[0], mid[1], 0.5), graze);
    assert!(!mesh.node(np).deleted);
    mesh.remove_deleted();
    assert_eq!(mesh.live_nodes().count(), 5);
    assert_eq!(mesh.live_edges().count(), 8);
    assert_eq!(mesh.live_triangles().count(), 4);
    assert_eq!(mesh.validate(mesh.default_graze()), 0);
  }

  #[test]
  fn split_edge_at_endpoint_is_identity() {
    let mut mesh = mesh_of(&[
      (0.0, 0.0, 0.0),
      (1.0, 0.0, 0.0),
      (1.0, 1.0, 0.0),
      (0.0, 1.0, 0.0),
    ]);
    let e = EdgeId(0);
    let n1 = mesh.edge(e).node1;
    let p = mesh.node(n1).point();
    let graze = mesh.default_graze();
    assert_eq!(split_from_edge(&mut mesh, e, p, graze), n1);
  }

  #[test]
  fn diagonal_through_existing_node() {
    // Five points: centre node sits on the constraint diagonal; both
    // halves end up marked.
    let mut mesh = mesh_of(&[
      (0.0, 0.0, 0.0),
      (1.0, 0.0, 0.0),
      (1.0, 1.0, 0.0),
      (0.0, 1.0, 0.0),
      (0.5, 0.5, 0.0),
    ]);
    let lines = [line(
      &[(0.0, 0.0, 0.0), (1.0, 1.0, 0.0)],
      EdgeFlag::Discontinuity,
    )];
    let graze = mesh.default_graze();
    assert_ok!(insert_constraints(
      &mut mesh,
      &lines,
      &ConstraintOptions::default(),
      graze,
    ));
    mesh.remove_deleted();
    assert_eq!(mesh.live_nodes().count(), 5);
    assert_eq!(mesh.live_edges().count(), 8);
    assert_eq!(mesh.live_triangles().count(), 4);
    let marked: Vec<_> = mesh
      .live_edges()
      .filter(|(_, e)| e.flag == EdgeFlag::Discontinuity)
      .collect();
    assert_eq!(marked.len(), 2);
    assert_eq!(mesh.validate(mesh.default_graze()), 0);
  }

  #[test]
  fn crossing_constraint_splits_opposing_diagonal() {
    let mut mesh = mesh_of(&[
      (0.0, 0.0, 0.0),
      (1.0, 0.0, 0.0),
      (1.0, 1.0, 0.0),
      (0.0, 1.0, 0.0),
    ]);
    // Constrain whichever diagonal the triangulation did NOT pick.
    let diag = mesh
      .live_edges()
      .find(|(_, e)| e.length > 1.1)
      .map(|(id, _)| id)
      .unwrap();
    let n1 = mesh.edge(diag).node1;
    let missing: Vec<Point3> = mesh
      .live_nodes()
      .filter(|(id, _)| !mesh.edge(diag).has_node(*id))
      .map(|(_, n)| n.point())
      .collect();
    assert_eq!(missing.len(), 2);
    assert!(!mesh.node(n1).deleted);

    let lines = [Polyline {
      points: missing.clone(),
      flag: EdgeFlag::Fault,
      lineid: 7,
    }];
    let graze = mesh.default_graze();
    assert_ok!(insert_constraints(
      &mut mesh,
      &lines,
      &ConstraintOptions::default(),
      graze,
    ));
    mesh.remove_deleted();
    // The walk split the opposing diagonal at the centre.
    assert_eq!(mesh.live_nodes().count(), 5);
    assert_eq!(
      mesh
        .live_edges()
        .filter(|(_, e)| e.flag == EdgeFlag::Fault)
        .count(),
      2
    );
    assert_eq!(mesh.validate(mesh.default_graze()), 0);
  }

  #[test]
  fn exact_mode_restores_single_edge() {
    let mut mesh = mesh_of(&[
      (0.0, 0.0, 0.0),
      (1.0, 0.0, 0.0),
      (1.0, 1.0, 0.0),
      (0.0, 1.0, 0.0),
    ]);
    let diag = mesh
      .live_edges()
      .find(|(_, e)| e.length > 1.1)
      .map(|(id, _)| id)
      .unwrap();
    let missing: Vec<Point3> = mesh
      .live_nodes()
      .filter(|(id, _)| !mesh.edge(diag).has_node(*id))
      .map(|(_, n)| n.point())
      .collect();
    let lines = [Polyline {
      points: missing.clone(),
      flag: EdgeFlag::Fault,
      lineid: 3,
    }];
    let opts = ConstraintOptions {
      exact: true,
      ..ConstraintOptions::default()
    };
    let graze = mesh.default_graze();
    assert_ok!(insert_constraints(&mut mesh, &lines, &opts, graze));
    mesh.remove_deleted();
    // Exactly one live edge joins the two constraint points.
    let hits = mesh
      .live_edges()
      .filter(|(_, e)| {
        let a = mesh.node(e.node1).xy();
        let b = mesh.node(e.node2).xy();
        (geometry::points_graze(a, missing[0].xy(), graze)
          && geometry::points_graze(b, missing[1].xy(), graze))
          || (geometry::points_graze(b, missing[0].xy(), graze)
            && geometry::points_graze(a, missing[1].xy(), graze))
      })
      .count();
    assert_eq!(hits, 1);
    assert_eq!(mesh.validate(graze), 0);
  }

  #[test]
  fn chop_subdivides_long_segments() {
    let pts = [Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 10.0)];
    let out = chop_polyline(&pts, 2.0);
    assert!(out.len() >= 5);
    // z interpolates linearly along the chop.
    for p in &out {
      assert!((p.z - p.x).abs() < 1e-9);
    }
  }

  #[test]
  fn explode_cuts_bowtie() {
    let pts = [
      Point3::new(0.0, 0.0, 0.0),
      Point3::new(2.0, 2.0, 0.0),
      Point3::new(2.0, 0.0, 0.0),
      Point3::new(0.0, 2.0, 0.0),
    ];
    let pieces = explode_self_intersections(&pts, 1e-9);
    assert_eq!(pieces.len(), 3);
    // All pieces chain through the crossing at (1, 1).
    assert!(pieces[0]
      .last()
      .map(|p| (p.x - 1.0).abs() < 1e-9 && (p.y - 1.0).abs() < 1e-9)
      .unwrap_or(false));
  }

  #[test]
  fn fault_polygon_opens_hole() {
    // 5x5 lattice, fault square through the middle ring.
    let mut pts = Vec::new();
    for i in 0..5 {
      for j in 0..5 {
        pts.push((i as f64, j as f64, 0.0));
      }
    }
    let mut mesh = mesh_of(&pts);
    let lines = [line(
      &[
        (1.0, 1.0, 0.0),
        (3.0, 1.0, 0.0),
        (3.0, 3.0, 0.0),
        (1.0, 3.0, 0.0),
        (1.0, 1.0, 0.0),
      ],
      EdgeFlag::Fault,
    )];
    let graze = mesh.default_graze();
    assert_ok!(insert_constraints(
      &mut mesh,
      &lines,
      &ConstraintOptions::default(),
      graze,
    ));
    mesh.remove_deleted();
    mesh.mark_borders();
    // The centre node (2,2) lost every edge: everything strictly inside
    // the fault ring is gone.
    let centre_alive = mesh
      .live_nodes()
      .filter(|(id, n)| {
        (n.x - 2.0).abs() < 1e-9
          && (n.y - 2.0).abs() < 1e-9
          && !mesh.edges_at(*id).is_empty()
      })
      .count();
    assert_eq!(centre_alive, 0);
  }
}
