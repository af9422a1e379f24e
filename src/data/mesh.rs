use log::warn;

use super::edge::{Edge, EdgeFlag, EdgeId};
use super::node::{Node, NodeId};
use super::triangle::{TriId, Triangle};
use crate::geometry::{self, Point3, SegSeg};
use crate::{Error, Result};

/// An input sample point, before it is (or is not) promoted to a mesh node.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPoint {
  pub x: f64,
  pub y: f64,
  pub z: f64,
  pub node: Option<NodeId>,
  pub used: bool,
}

impl RawPoint {
  pub fn new(x: f64, y: f64, z: f64) -> RawPoint {
    RawPoint {
      x,
      y,
      z,
      node: None,
      used: false,
    }
  }
}

/// How the average edge length treats outliers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trim {
  None,
  /// Drop the longest `fraction` of edges before averaging.
  Top(f64),
  /// Drop the shortest `fraction` of edges before averaging.
  Bottom(f64),
}

/// The topology store: three parallel dense arrays plus per-node incident
/// edge lists and the raw-point tables.
///
/// Elements are append-only while a mesh is being built; deletion is a
/// tombstone (`deleted = true`) plus removal from incident lists. Indices
/// stay stable until [`TriMesh::remove_deleted`] compacts the arrays and
/// rewrites every cross-reference. External callers never see tombstones.
#[derive(Debug, Clone, Default)]
pub struct TriMesh {
  pub(crate) nodes: Vec<Node>,
  pub(crate) edges: Vec<Edge>,
  pub(crate) triangles: Vec<Triangle>,
  pub(crate) node_edges: Vec<Vec<EdgeId>>,
  pub(crate) raw_points: Vec<RawPoint>,
  pub(crate) constraint_points: Vec<RawPoint>,
}

impl TriMesh {
  pub fn new() -> TriMesh {
    TriMesh::default()
  }

  pub fn clear(&mut self) {
    self.nodes.clear();
    self.edges.clear();
    self.triangles.clear();
    self.node_edges.clear();
    self.raw_points.clear();
    self.constraint_points.clear();
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  ///////////////////////////////////////////////////////////////////////////
  // Element access

  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  pub fn triangles(&self) -> &[Triangle] {
    &self.triangles
  }

  pub fn node(&self, id: NodeId) -> &Node {
    &self.nodes[id.0]
  }

  pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
    &mut self.nodes[id.0]
  }

  pub fn edge(&self, id: EdgeId) -> &Edge {
    &self.edges[id.0]
  }

  pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
    &mut self.edges[id.0]
  }

  pub fn tri(&self, id: TriId) -> &Triangle {
    &self.triangles[id.0]
  }

  pub fn tri_mut(&mut self, id: TriId) -> &mut Triangle {
    &mut self.triangles[id.0]
  }

  pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
    self
      .nodes
      .iter()
      .enumerate()
      .filter(|(_, n)| !n.deleted)
      .map(|(i, n)| (NodeId(i), n))
  }

  pub fn live_edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
    self
      .edges
      .iter()
      .enumerate()
      .filter(|(_, e)| !e.deleted)
      .map(|(i, e)| (EdgeId(i), e))
  }

  pub fn live_triangles(&self) -> impl Iterator<Item = (TriId, &Triangle)> {
    self
      .triangles
      .iter()
      .enumerate()
      .filter(|(_, t)| !t.deleted)
      .map(|(i, t)| (TriId(i), t))
  }

  pub fn raw_points(&self) -> &[RawPoint] {
    &self.raw_points
  }

  pub fn constraint_points(&self) -> &[RawPoint] {
    &self.constraint_points
  }

  ///////////////////////////////////////////////////////////////////////////
  // Append

  pub fn add_node(&mut self, x: f64, y: f64, z: f64, flag: i32) -> NodeId {
    let id = NodeId(self.nodes.len());
    self.nodes.push(Node::new(x, y, z, flag));
    self.node_edges.push(Vec::new());
    id
  }

  pub fn add_edge(
    &mut self,
    n1: NodeId,
    n2: NodeId,
    t1: Option<TriId>,
    t2: Option<TriId>,
    flag: EdgeFlag,
  ) -> EdgeId {
    let id = EdgeId(self.edges.len());
    let mut edge = Edge::new(n1, n2, t1, t2);
    edge.flag = flag;
    edge.length = self.node(n1).point().dist2d(&self.node(n2).point());
    self.edges.push(edge);
    self.node_edges[n1.0].push(id);
    self.node_edges[n2.0].push(id);
    id
  }

  pub fn add_triangle(&mut self, e1: EdgeId, e2: EdgeId, e3: EdgeId, flag: i32) -> TriId {
    let id = TriId(self.triangles.len());
    self.triangles.push(Triangle::new(e1, e2, e3, flag));
    id
  }

  pub fn add_raw_point(&mut self, x: f64, y: f64, z: f64) -> usize {
    self.raw_points.push(RawPoint::new(x, y, z));
    self.raw_points.len() - 1
  }

  pub fn add_constraint_point(&mut self, x: f64, y: f64, z: f64) -> usize {
    self.constraint_points.push(RawPoint::new(x, y, z));
    self.constraint_points.len() - 1
  }

  ///////////////////////////////////////////////////////////////////////////
  // Incident lists

  pub fn edges_at(&self, n: NodeId) -> &[EdgeId] {
    &self.node_edges[n.0]
  }

  pub(crate) fn unlink_edge_from_node(&mut self, n: NodeId, e: EdgeId) {
    let list = &mut self.node_edges[n.0];
    if let Some(pos) = list.iter().position(|&x| x == e) {
      list.swap_remove(pos);
    }
  }

  pub(crate) fn link_edge_to_node(&mut self, n: NodeId, e: EdgeId) {
    let list = &mut self.node_edges[n.0];
    if !list.contains(&e) {
      list.push(e);
    }
  }

  /// The live edge joining two nodes, if any.
  pub fn edge_between(&self, n1: NodeId, n2: NodeId) -> Option<EdgeId> {
    self
      .node_edges[n1.0]
      .iter()
      .copied()
      .find(|&e| !self.edge(e).deleted && self.edge(e).has_node(n2))
  }

  ///////////////////////////////////////////////////////////////////////////
  // Topology lookups

  /// The three distinct corner nodes of a triangle.
  pub fn tri_nodes(&self, t: TriId) -> [NodeId; 3] {
    let [e1, e2, _] = self.tri(t).edges;
    let a = self.edge(e1).node1;
    let b = self.edge(e1).node2;
    let e2 = self.edge(e2);
    let c = if e2.node1 == a || e2.node1 == b {
      e2.node2
    } else {
      e2.node1
    };
    [a, b, c]
  }

  /// The corner of `t` that is not an endpoint of `e`.
  pub fn opposite_node(&self, t: TriId, e: EdgeId) -> NodeId {
    let [a, b, c] = self.tri_nodes(t);
    let edge = self.edge(e);
    if !edge.has_node(a) {
      a
    } else if !edge.has_node(b) {
      b
    } else {
      c
    }
  }

  /// The edge of `t` that does not touch `n`.
  pub fn opposite_edge(&self, t: TriId, n: NodeId) -> EdgeId {
    let tri = self.tri(t);
    for &e in &tri.edges {
      if !self.edge(e).has_node(n) {
        return e;
      }
    }
    // Three distinct corners make this unreachable for a well-formed
    // triangle; fall back to the first edge rather than panic mid-repair.
    tri.edges[0]
  }

  /// The triangle on the far side of `e` from `t`.
  pub fn other_tri(&self, e: EdgeId, t: TriId) -> Option<TriId> {
    let edge = self.edge(e);
    if edge.tri1 == Some(t) {
      edge.tri2
    } else if edge.tri2 == Some(t) {
      edge.tri1
    } else {
      None
    }
  }

  pub fn tri_centroid(&self, t: TriId) -> [f64; 2] {
    let [a, b, c] = self.tri_nodes(t);
    let (pa, pb, pc) = (self.node(a), self.node(b), self.node(c));
    [(pa.x + pb.x + pc.x) / 3.0, (pa.y + pb.y + pc.y) / 3.0]
  }

  pub fn tri_bbox(&self, t: TriId) -> [f64; 4] {
    let [a, b, c] = self.tri_nodes(t);
    let (pa, pb, pc) = (self.node(a), self.node(b), self.node(c));
    [
      pa.x.min(pb.x).min(pc.x),
      pa.y.min(pb.y).min(pc.y),
      pa.x.max(pb.x).max(pc.x),
      pa.y.max(pb.y).max(pc.y),
    ]
  }

  pub fn tri_area(&self, t: TriId) -> f64 {
    let [a, b, c] = self.tri_nodes(t);
    geometry::triangle_area(self.node(a).xy(), self.node(b).xy(), self.node(c).xy())
  }

  pub fn tri_corners(&self, t: TriId) -> [Point3; 3] {
    let [a, b, c] = self.tri_nodes(t);
    [
      self.node(a).point(),
      self.node(b).point(),
      self.node(c).point(),
    ]
  }

  /// Plane through the triangle's three corners as `z = a + b*x + c*y`.
  pub fn tri_plane(&self, t: TriId) -> Result<[f64; 3]> {
    geometry::fit_plane(&self.tri_corners(t))
  }

  pub fn edge_midpoint(&self, e: EdgeId) -> [f64; 2] {
    let edge = self.edge(e);
    let (a, b) = (self.node(edge.node1), self.node(edge.node2));
    [(a.x + b.x) / 2.0, (a.y + b.y) / 2.0]
  }

  pub(crate) fn refresh_edge_length(&mut self, e: EdgeId) {
    let (n1, n2) = (self.edge(e).node1, self.edge(e).node2);
    self.edges[e.0].length = self.node(n1).point().dist2d(&self.node(n2).point());
  }

  ///////////////////////////////////////////////////////////////////////////
  // Deletion

  /// Tombstone an edge: detach and delete its adjacent triangles (a
  /// triangle cannot survive the loss of a side), demote the surviving
  /// neighbours' edges to boundary where the deleted triangle was their
  /// second triangle, and unlink the edge from both endpoints.
  pub fn whack_edge(&mut self, e: EdgeId) {
    if self.edge(e).deleted {
      return;
    }
    let tris: Vec<TriId> = self.edge(e).tris().collect();
    for t in tris {
      self.delete_triangle(t, e);
    }
    let (n1, n2) = (self.edge(e).node1, self.edge(e).node2);
    let edge = self.edge_mut(e);
    edge.deleted = true;
    edge.tri1 = None;
    edge.tri2 = None;
    self.unlink_edge_from_node(n1, e);
    self.unlink_edge_from_node(n2, e);
  }

  /// Delete triangle `t`, detaching it from every edge except `skip`.
  pub(crate) fn delete_triangle(&mut self, t: TriId, skip: EdgeId) {
    if self.tri(t).deleted {
      return;
    }
    let edges = self.tri(t).edges;
    for e in edges {
      if e != skip {
        self.edge_mut(e).detach_tri(t);
      }
    }
    self.tri_mut(t).deleted = true;
  }

  /// Delete every edge and triangle touching `n` and tombstone the node.
  pub fn whack_node(&mut self, n: NodeId) {
    let incident: Vec<EdgeId> = self.node_edges[n.0].clone();
    for e in incident {
      self.whack_edge(e);
    }
    self.node_mut(n).deleted = true;
  }

  ///////////////////////////////////////////////////////////////////////////
  // Compaction

  /// Compact the three arrays, dropping tombstones, and rewrite every
  /// cross-reference through old→new lookup tables (returned for callers
  /// holding external ids). Edges whose both triangles vanished and
  /// triangles missing any edge are dropped too. Idempotent.
  pub fn remove_deleted(
    &mut self,
  ) -> (Vec<Option<usize>>, Vec<Option<usize>>, Vec<Option<usize>>) {
    // Settle cascading deletions first: an edge is only as alive as one of
    // its triangles, a triangle only as alive as all three edges.
    loop {
      let mut changed = false;
      for i in 0..self.edges.len() {
        if self.edges[i].deleted {
          continue;
        }
        let t1 = self.edges[i].tri1.filter(|t| !self.triangles[t.0].deleted);
        let t2 = self.edges[i].tri2.filter(|t| !self.triangles[t.0].deleted);
        let (t1, t2) = match (t1, t2) {
          (None, t2 @ Some(_)) => (t2, None),
          other => other,
        };
        if self.edges[i].tri1 != t1 || self.edges[i].tri2 != t2 {
          self.edges[i].tri1 = t1;
          self.edges[i].tri2 = t2;
          changed = true;
        }
        if t1.is_none() {
          let (n1, n2) = (self.edges[i].node1, self.edges[i].node2);
          self.edges[i].deleted = true;
          self.unlink_edge_from_node(n1, EdgeId(i));
          self.unlink_edge_from_node(n2, EdgeId(i));
          changed = true;
        }
      }
      for i in 0..self.triangles.len() {
        if self.triangles[i].deleted {
          continue;
        }
        if self.triangles[i]
          .edges
          .iter()
          .any(|e| self.edges[e.0].deleted)
        {
          let id = TriId(i);
          let edges = self.triangles[i].edges;
          for e in edges {
            self.edges[e.0].detach_tri(id);
          }
          self.triangles[i].deleted = true;
          changed = true;
        }
      }
      if !changed {
        break;
      }
    }

    let node_map = compaction_map(self.nodes.iter().map(|n| n.deleted));
    let edge_map = compaction_map(self.edges.iter().map(|e| e.deleted));
    let tri_map = compaction_map(self.triangles.iter().map(|t| t.deleted));

    let mut nodes = Vec::with_capacity(self.nodes.len());
    let mut node_edges = Vec::with_capacity(self.nodes.len());
    for (i, node) in self.nodes.drain(..).enumerate() {
      if node_map[i].is_some() {
        let mut node = node;
        node.adjusting_node = node
          .adjusting_node
          .and_then(|n| node_map[n.0].map(NodeId));
        nodes.push(node);
        node_edges.push(
          self.node_edges[i]
            .iter()
            .filter_map(|e| edge_map[e.0].map(EdgeId))
            .collect(),
        );
      }
    }
    self.nodes = nodes;
    self.node_edges = node_edges;

    let mut edges = Vec::with_capacity(self.edges.len());
    for (i, edge) in self.edges.drain(..).enumerate() {
      if edge_map[i].is_some() {
        let mut edge = edge;
        edge.node1 = NodeId(node_map[edge.node1.0].expect("live edge with deleted endpoint"));
        edge.node2 = NodeId(node_map[edge.node2.0].expect("live edge with deleted endpoint"));
        edge.tri1 = edge.tri1.and_then(|t| tri_map[t.0].map(TriId));
        edge.tri2 = edge.tri2.and_then(|t| tri_map[t.0].map(TriId));
        edges.push(edge);
      }
    }
    self.edges = edges;

    let mut triangles = Vec::with_capacity(self.triangles.len());
    for (i, tri) in self.triangles.drain(..).enumerate() {
      if tri_map[i].is_some() {
        let mut tri = tri;
        for e in tri.edges.iter_mut() {
          *e = EdgeId(edge_map[e.0].expect("live triangle with deleted edge"));
        }
        triangles.push(tri);
      }
    }
    self.triangles = triangles;

    for rp in self
      .raw_points
      .iter_mut()
      .chain(self.constraint_points.iter_mut())
    {
      rp.node = rp.node.and_then(|n| node_map[n.0].map(NodeId));
    }

    (node_map, edge_map, tri_map)
  }

  /// Refresh `on_border` for every live edge and node.
  pub fn mark_borders(&mut self) {
    for node in self.nodes.iter_mut() {
      node.on_border = false;
    }
    for i in 0..self.edges.len() {
      if self.edges[i].deleted {
        continue;
      }
      let border = self.edges[i].tri2.is_none();
      self.edges[i].on_border = border;
      if border {
        let (n1, n2) = (self.edges[i].node1, self.edges[i].node2);
        self.nodes[n1.0].on_border = true;
        self.nodes[n2.0].on_border = true;
      }
    }
  }

  ///////////////////////////////////////////////////////////////////////////
  // Mesh-wide measures

  /// Bounding box over live nodes as `[xmin, ymin, xmax, ymax]`.
  pub fn bbox(&self) -> Option<[f64; 4]> {
    let mut it = self.live_nodes();
    let (_, first) = it.next()?;
    let mut b = [first.x, first.y, first.x, first.y];
    for (_, n) in it {
      b[0] = b[0].min(n.x);
      b[1] = b[1].min(n.y);
      b[2] = b[2].max(n.x);
      b[3] = b[3].max(n.y);
    }
    Some(b)
  }

  pub fn bbox_perimeter(&self) -> f64 {
    match self.bbox() {
      Some([x1, y1, x2, y2]) => 2.0 * ((x2 - x1) + (y2 - y1)),
      None => 0.0,
    }
  }

  /// Operation-wide grazing distance: bbox perimeter / 200 000.
  pub fn default_graze(&self) -> f64 {
    self.bbox_perimeter() / geometry::GRAZE_PERIMETER_DIVISOR
  }

  /// Average live-edge length. `Trim::Top`/`Trim::Bottom` drop a tail of
  /// the length distribution through a 64-bin histogram before averaging.
  pub fn average_edge_length(&self, trim: Trim) -> f64 {
    let lengths: Vec<f64> = self.live_edges().map(|(_, e)| e.length).collect();
    if lengths.is_empty() {
      return 0.0;
    }
    let (lo, hi) = lengths
      .iter()
      .fold((f64::MAX, f64::MIN), |(lo, hi), &l| (lo.min(l), hi.max(l)));
    let fraction = match trim {
      Trim::None => {
        return lengths.iter().sum::<f64>() / lengths.len() as f64;
      }
      Trim::Top(f) | Trim::Bottom(f) => f.clamp(0.0, 0.9),
    };
    if hi <= lo {
      return lo;
    }
    const BINS: usize = 64;
    let mut histo = [0usize; BINS];
    let width = (hi - lo) / BINS as f64;
    for &l in &lengths {
      let bin = (((l - lo) / width) as usize).min(BINS - 1);
      histo[bin] += 1;
    }
    let to_drop = (fraction * lengths.len() as f64) as usize;
    let mut dropped = 0;
    let mut cut = match trim {
      Trim::Top(_) => hi,
      _ => lo,
    };
    match trim {
      Trim::Top(_) => {
        for (bin, &count) in histo.iter().enumerate().rev() {
          if dropped + count > to_drop {
            cut = lo + (bin + 1) as f64 * width;
            break;
          }
          dropped += count;
        }
        let kept: Vec<f64> = lengths.iter().copied().filter(|&l| l <= cut).collect();
        kept.iter().sum::<f64>() / kept.len().max(1) as f64
      }
      Trim::Bottom(_) => {
        for (bin, &count) in histo.iter().enumerate() {
          if dropped + count > to_drop {
            cut = lo + bin as f64 * width;
            break;
          }
          dropped += count;
        }
        let kept: Vec<f64> = lengths.iter().copied().filter(|&l| l >= cut).collect();
        kept.iter().sum::<f64>() / kept.len().max(1) as f64
      }
      Trim::None => unreachable!(),
    }
  }

  ///////////////////////////////////////////////////////////////////////////
  // Diagnostic validation

  /// Self-diagnostic topology validation. Logs every violation and returns
  /// the number found; never panics or aborts. Gated by the caller (the
  /// engine honours `GRD_VALIDATE_TRIMESH_TOPO`).
  pub fn validate(&self, graze: f64) -> usize {
    let mut problems = 0;

    for (id, edge) in self.live_edges() {
      if edge.tri1.is_none() {
        warn!("{:?} has no first triangle", id);
        problems += 1;
      }
      for t in edge.tris() {
        if self.tri(t).deleted {
          warn!("{:?} references deleted {:?}", id, t);
          problems += 1;
        } else if !self.tri(t).has_edge(id) {
          warn!("{:?} references {:?} which does not list it", id, t);
          problems += 1;
        }
      }
      if edge.is_constraint && !edge.flag.is_constraint_class() {
        warn!("{:?} marked constraint without a constraint class", id);
        problems += 1;
      }
    }

    for (id, tri) in self.live_triangles() {
      let [a, b, c] = self.tri_nodes(id);
      if a == b || b == c || a == c {
        warn!("{:?} has fewer than three distinct nodes", id);
        problems += 1;
        continue;
      }
      for &e in &tri.edges {
        if self.edge(e).deleted {
          warn!("{:?} uses deleted {:?}", id, e);
          problems += 1;
        } else if !self.edge(e).has_tri(id) {
          warn!("{:?} uses {:?} which does not point back", id, e);
          problems += 1;
        }
      }
    }

    for (id, _) in self.live_nodes() {
      for &e in self.edges_at(id) {
        if self.edge(e).deleted {
          warn!("incident list of {:?} holds deleted {:?}", id, e);
          problems += 1;
        } else if !self.edge(e).has_node(id) {
          warn!("incident list of {:?} holds foreign {:?}", id, e);
          problems += 1;
        }
      }
    }

    problems += self.validate_planarity(graze);
    problems
  }

  /// No two live edges intersect except at shared endpoints. Quadratic;
  /// only run under the diagnostic gate.
  fn validate_planarity(&self, graze: f64) -> usize {
    let live: Vec<(EdgeId, &Edge)> = self.live_edges().collect();
    let mut problems = 0;
    for i in 0..live.len() {
      for j in (i + 1)..live.len() {
        let (ia, ea) = live[i];
        let (ib, eb) = live[j];
        if ea.has_node(eb.node1) || ea.has_node(eb.node2) {
          continue;
        }
        let a1 = self.node(ea.node1).xy();
        let a2 = self.node(ea.node2).xy();
        let b1 = self.node(eb.node1).xy();
        let b2 = self.node(eb.node2).xy();
        match geometry::segment_intersection(a1, a2, b1, b2, graze) {
          Ok(SegSeg::Disjoint) | Err(_) => {}
          Ok(hit) => {
            warn!("{:?} and {:?} intersect: {:?}", ia, ib, hit);
            problems += 1;
          }
        }
      }
    }
    problems
  }

  /// Validate and convert the problem count into a hard error; used by
  /// tests and the gated engine paths.
  pub fn require_valid(&self, graze: f64) -> Result<()> {
    if self.validate(graze) == 0 {
      Ok(())
    } else {
      Err(Error::InvariantViolation("topology validation failed"))
    }
  }
}

fn compaction_map(deleted: impl Iterator<Item = bool>) -> Vec<Option<usize>> {
  let mut next = 0;
  deleted
    .map(|dead| {
      if dead {
        None
      } else {
        let id = next;
        next += 1;
        Some(id)
      }
    })
    .collect()
}

///////////////////////////////////////////////////////////////////////////////
// Tests

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::EdgeFlag;

  /// Two triangles over a unit square, diagonal from (0,0) to (1,1).
  pub(crate) fn square_mesh() -> TriMesh {
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
  fn square_topology() {
    let mesh = square_mesh();
    assert_eq!(mesh.live_nodes().count(), 4);
    assert_eq!(mesh.live_edges().count(), 5);
    assert_eq!(mesh.live_triangles().count(), 2);
    assert_eq!(mesh.validate(1e-9), 0);
  }

  #[test]
  fn opposite_lookups() {
    let mesh = square_mesh();
    let diag = EdgeId(4);
    let t0 = TriId(0);
    let opp = mesh.opposite_node(t0, diag);
    assert_eq!(opp, NodeId(1));
    assert_eq!(mesh.opposite_edge(t0, opp), diag);
    assert_eq!(mesh.other_tri(diag, t0), Some(TriId(1)));
  }

  #[test]
  fn whack_diagonal() {
    let mut mesh = square_mesh();
    mesh.whack_edge(EdgeId(4));
    assert_eq!(mesh.live_triangles().count(), 0);
    let (_, edge_map, tri_map) = mesh.remove_deleted();
    // Without triangles every remaining edge is dropped too.
    assert!(edge_map.iter().all(|m| m.is_none()));
    assert!(tri_map.iter().all(|m| m.is_none()));
  }

  #[test]
  fn whack_boundary_edge_keeps_other_triangle() {
    let mut mesh = square_mesh();
    mesh.whack_edge(EdgeId(0));
    assert_eq!(mesh.live_triangles().count(), 1);
    let diag = mesh.edge(EdgeId(4));
    assert_eq!(diag.tris().count(), 1);
    mesh.remove_deleted();
    assert_eq!(mesh.live_triangles().count(), 1);
    assert_eq!(mesh.live_edges().count(), 3);
    assert_eq!(mesh.validate(1e-9), 0);
  }

  #[test]
  fn compaction_is_idempotent() {
    let mut mesh = square_mesh();
    mesh.whack_edge(EdgeId(0));
    mesh.remove_deleted();
    let before = mesh.clone();
    let (n, e, t) = mesh.remove_deleted();
    assert_eq!(mesh.nodes, before.nodes);
    assert_eq!(mesh.edges, before.edges);
    assert_eq!(mesh.triangles, before.triangles);
    assert!(n.iter().enumerate().all(|(i, m)| *m == Some(i)));
    assert!(e.iter().enumerate().all(|(i, m)| *m == Some(i)));
    assert!(t.iter().enumerate().all(|(i, m)| *m == Some(i)));
  }

  #[test]
  fn borders_marked() {
    let mut mesh = square_mesh();
    mesh.mark_borders();
    assert!(!mesh.edge(EdgeId(4)).on_border);
    assert!(mesh.edge(EdgeId(0)).on_border);
    assert!(mesh.node(NodeId(0)).on_border);
  }

  #[test]
  fn average_edge_length_trimmed() {
    let mesh = square_mesh();
    let plain = mesh.average_edge_length(Trim::None);
    assert!(plain > 1.0 && plain < 1.2);
    // Dropping the top tail removes the sqrt(2) diagonal.
    let trimmed = mesh.average_edge_length(Trim::Top(0.25));
    assert!((trimmed - 1.0).abs() < 1e-12);
  }

  #[test]
  fn graze_default() {
    let mesh = square_mesh();
    let g = mesh.default_graze();
    assert!((g - 4.0 / 200_000.0).abs() < 1e-15);
  }
}
