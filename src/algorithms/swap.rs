//! Edge swapping: the quality engine behind the triangulator, the
//! constraint untangler and null removal.

use log::debug;

use crate::data::{EdgeId, NodeId, TriId, TriMesh};
use crate::geometry::{self, Orientation};

/// Penalty divisor applied to the equilateralness of triangles that still
/// use one of the contrived corner nodes, so corner-using triangles lose
/// ties and the corners migrate to the hull.
pub const CORNER_BIAS: f64 = 1.5;

/// Swap policy for a swap pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapMode {
  /// Never swap.
  None,
  /// Swap any non-constraint edge that improves shape quality.
  #[default]
  Any,
  /// Swap exactly the edges whose `tflag` is set.
  AsFlagged,
  /// Swap only when the move replaces a null-z diagonal with a non-null
  /// one.
  NullRemoval,
  /// Swap unconditionally whenever the diagonals cross.
  Force,
}

/// The quadrilateral around a swappable interior edge.
#[derive(Clone, Copy)]
struct Quad {
  t1: TriId,
  t2: TriId,
  /// Current diagonal endpoints.
  n1: NodeId,
  n3: NodeId,
  /// Opposite nodes; the alternative diagonal.
  n2: NodeId,
  n4: NodeId,
}

fn quad_of(mesh: &TriMesh, e: EdgeId) -> Option<Quad> {
  let edge = mesh.edge(e);
  let t1 = edge.tri1?;
  let t2 = edge.tri2?;
  Some(Quad {
    t1,
    t2,
    n1: edge.node1,
    n3: edge.node2,
    n2: mesh.opposite_node(t1, e),
    n4: mesh.opposite_node(t2, e),
  })
}

fn opposite_strict(a: Orientation, b: Orientation) -> bool {
  matches!(
    (a, b),
    (Orientation::CounterClockWise, Orientation::ClockWise)
      | (Orientation::ClockWise, Orientation::CounterClockWise)
  )
}

/// Do the current and alternative diagonals cross? The endpoints of the
/// current diagonal must fall strictly on opposite sides of the
/// alternative; the opposite nodes may graze the current diagonal (that is
/// the degenerate triangle a swap repairs), but must not fall strictly on
/// the same side of it.
fn diagonals_cross(mesh: &TriMesh, quad: &Quad) -> bool {
  let p1 = mesh.node(quad.n1).xy();
  let p2 = mesh.node(quad.n2).xy();
  let p3 = mesh.node(quad.n3).xy();
  let p4 = mesh.node(quad.n4).xy();
  let o2 = Orientation::new(p1, p3, p2);
  let o4 = Orientation::new(p1, p3, p4);
  let o1 = Orientation::new(p2, p4, p1);
  let o3 = Orientation::new(p2, p4, p3);
  let same_side = o2 == o4 && o2 != Orientation::CoLinear;
  opposite_strict(o1, o3) && !same_side
}

fn tri_eps(mesh: &TriMesh, a: NodeId, b: NodeId, c: NodeId, corner_bias: f64) -> f64 {
  let (pa, pb, pc) = (mesh.node(a), mesh.node(b), mesh.node(c));
  let la = pa.point().dist2d(&pb.point());
  let lb = pb.point().dist2d(&pc.point());
  let lc = pc.point().dist2d(&pa.point());
  let mut eps = geometry::equilateralness(la, lb, lc);
  if pa.is_corner() || pb.is_corner() || pc.is_corner() {
    eps /= corner_bias;
  }
  eps
}

fn tri_degenerate(mesh: &TriMesh, a: NodeId, b: NodeId, c: NodeId, graze: f64) -> bool {
  geometry::triangle_area(
    mesh.node(a).xy(),
    mesh.node(b).xy(),
    mesh.node(c).xy(),
  ) <= graze * graze
}

/// Quality decision: current pair (n1 n3 n2), (n1 n3 n4) against the
/// swapped pair (n2 n4 n1), (n2 n4 n3). The thresholds (10% on the worst
/// triangle, 1% on the pair sum) stop marginal swaps from ping-ponging.
fn quality_wants_swap(mesh: &TriMesh, quad: &Quad, corner_bias: f64, graze: f64) -> bool {
  let cur1 = tri_eps(mesh, quad.n1, quad.n3, quad.n2, corner_bias);
  let cur2 = tri_eps(mesh, quad.n1, quad.n3, quad.n4, corner_bias);
  let alt1 = tri_eps(mesh, quad.n2, quad.n4, quad.n1, corner_bias);
  let alt2 = tri_eps(mesh, quad.n2, quad.n4, quad.n3, corner_bias);

  if tri_degenerate(mesh, quad.n1, quad.n3, quad.n2, graze)
    || tri_degenerate(mesh, quad.n1, quad.n3, quad.n4, graze)
  {
    return true;
  }
  let cur_worst = cur1.min(cur2);
  let alt_worst = alt1.min(alt2);
  if alt_worst >= cur_worst * 1.10 && alt_worst > cur_worst {
    return true;
  }
  alt1 + alt2 >= (cur1 + cur2) * 1.01 && alt1 + alt2 > cur1 + cur2
}

fn null_removal_wants_swap(mesh: &TriMesh, quad: &Quad, null_z: f64) -> bool {
  let is_null = |n: NodeId| mesh.node(n).z.abs() >= null_z;
  (is_null(quad.n1) || is_null(quad.n3)) && !is_null(quad.n2) && !is_null(quad.n4)
}

/// Attempt to swap one edge under the given mode. Returns true when the
/// edge moved.
pub fn swap_edge(
  mesh: &mut TriMesh,
  e: EdgeId,
  mode: SwapMode,
  corner_bias: f64,
  graze: f64,
  null_z: f64,
) -> bool {
  if mode == SwapMode::None {
    return false;
  }
  {
    let edge = mesh.edge(e);
    if edge.deleted || edge.flag.is_constraint_class() || edge.is_constraint {
      return false;
    }
  }
  let quad = match quad_of(mesh, e) {
    Some(q) => q,
    None => return false, // boundary edge
  };
  if !diagonals_cross(mesh, &quad) {
    return false;
  }
  let wanted = match mode {
    SwapMode::None => false,
    SwapMode::Any => quality_wants_swap(mesh, &quad, corner_bias, graze),
    SwapMode::AsFlagged => mesh.edge(e).tflag,
    SwapMode::NullRemoval => null_removal_wants_swap(mesh, &quad, null_z),
    SwapMode::Force => true,
  };
  if !wanted {
    return false;
  }
  execute_swap(mesh, e, &quad);
  true
}

/// Looser variant used while isolating a node for removal: swaps whenever
/// the diagonals cross and the result is not itself degenerate. The wider
/// degeneracy tolerance keeps near-colinear fans from wedging.
pub fn swap_edge_for_removal(mesh: &mut TriMesh, e: EdgeId, graze: f64) -> bool {
  {
    let edge = mesh.edge(e);
    if edge.deleted || edge.flag.is_constraint_class() || edge.is_constraint {
      return false;
    }
  }
  let quad = match quad_of(mesh, e) {
    Some(q) => q,
    None => return false,
  };
  if !diagonals_cross(mesh, &quad) {
    return false;
  }
  let loose = graze * 10.0;
  if tri_degenerate(mesh, quad.n2, quad.n4, quad.n1, loose)
    || tri_degenerate(mesh, quad.n2, quad.n4, quad.n3, loose)
  {
    return false;
  }
  execute_swap(mesh, e, &quad);
  true
}

/// Convex-hull helper: force a corner node off the current diagonal when
/// the alternative diagonal is corner-free. Each success strictly reduces
/// the number of corner-incident interior edges, so the caller's loop
/// terminates.
pub fn swap_corner_out(mesh: &mut TriMesh, e: EdgeId) -> bool {
  {
    let edge = mesh.edge(e);
    if edge.deleted || edge.flag.is_constraint_class() || edge.is_constraint {
      return false;
    }
  }
  let quad = match quad_of(mesh, e) {
    Some(q) => q,
    None => return false,
  };
  let corner_on_diag = mesh.node(quad.n1).is_corner() || mesh.node(quad.n3).is_corner();
  let alt_is_clean = !mesh.node(quad.n2).is_corner() && !mesh.node(quad.n4).is_corner();
  if !(corner_on_diag && alt_is_clean && diagonals_cross(mesh, &quad)) {
    return false;
  }
  execute_swap(mesh, e, &quad);
  true
}

/// Move `e` from diagonal (n1, n3) to (n2, n4): rewrite both triangles,
/// migrate the incident lists, and re-home the two outer edges that change
/// triangle.
fn execute_swap(mesh: &mut TriMesh, e: EdgeId, quad: &Quad) {
  let Quad {
    t1,
    t2,
    n1,
    n2,
    n3,
    n4,
  } = *quad;

  // Outer edges of the quad.
  let a12 = find_side(mesh, t1, n1, n2);
  let a23 = find_side(mesh, t1, n2, n3);
  let b34 = find_side(mesh, t2, n3, n4);
  let b41 = find_side(mesh, t2, n4, n1);

  // New t1 = (n1, n2, n4), new t2 = (n3, n2, n4).
  mesh.tri_mut(t1).edges = [e, a12, b41];
  mesh.tri_mut(t2).edges = [e, a23, b34];

  // a23 moves from t1 to t2, b41 from t2 to t1.
  mesh.edge_mut(a23).replace_tri(t1, t2);
  mesh.edge_mut(b41).replace_tri(t2, t1);

  let edge = mesh.edge_mut(e);
  edge.node1 = n2;
  edge.node2 = n4;
  mesh.refresh_edge_length(e);
  mesh.unlink_edge_from_node(n1, e);
  mesh.unlink_edge_from_node(n3, e);
  mesh.link_edge_to_node(n2, e);
  mesh.link_edge_to_node(n4, e);
}

fn find_side(mesh: &TriMesh, t: TriId, a: NodeId, b: NodeId) -> EdgeId {
  for &e in &mesh.tri(t).edges {
    let edge = mesh.edge(e);
    if edge.has_node(a) && edge.has_node(b) {
      return e;
    }
  }
  unreachable!("triangle {:?} has no side {:?}-{:?}", t, a, b)
}

/// One pass over every live edge. Returns the number of swaps executed.
pub fn swap_pass(
  mesh: &mut TriMesh,
  mode: SwapMode,
  corner_bias: f64,
  graze: f64,
  null_z: f64,
) -> usize {
  let mut count = 0;
  for i in 0..mesh.edges().len() {
    if swap_edge(mesh, EdgeId(i), mode, corner_bias, graze, null_z) {
      count += 1;
    }
  }
  count
}

/// Repeat swap passes until quiescent. Near-colinear constraint
/// configurations can oscillate, so the loop also stops as soon as a pass
/// fails to improve on the previous pass's swap count.
pub fn swap_loop(
  mesh: &mut TriMesh,
  mode: SwapMode,
  corner_bias: f64,
  graze: f64,
  null_z: f64,
) -> usize {
  let mut last = usize::MAX;
  let mut total = 0;
  loop {
    let count = swap_pass(mesh, mode, corner_bias, graze, null_z);
    total += count;
    if count == 0 {
      break;
    }
    if count >= last {
      debug!("edge swap stopped oscillating at {} swaps per pass", count);
      break;
    }
    last = count;
  }
  total
}

///////////////////////////////////////////////////////////////////////////////
// Tests

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::EdgeFlag;

  /// A quad with a long skinny current diagonal and a short healthy
  /// alternative: n1=(-1,0) n3=(1,0) diagonal, n2=(0,-h) n4=(0,h).
  fn skinny_quad(h: f64) -> (TriMesh, EdgeId) {
    let mut mesh = TriMesh::new();
    let n1 = mesh.add_node(-1.0, 0.0, 0.0, 0);
    let n3 = mesh.add_node(1.0, 0.0, 0.0, 0);
    let n2 = mesh.add_node(0.0, -h, 0.0, 0);
    let n4 = mesh.add_node(0.0, h, 0.0, 0);
    let diag = mesh.add_edge(n1, n3, None, None, EdgeFlag::Interior);
    let a12 = mesh.add_edge(n1, n2, None, None, EdgeFlag::Interior);
    let a23 = mesh.add_edge(n2, n3, None, None, EdgeFlag::Interior);
    let b34 = mesh.add_edge(n3, n4, None, None, EdgeFlag::Interior);
    let b41 = mesh.add_edge(n4, n1, None, None, EdgeFlag::Interior);
    let t1 = mesh.add_triangle(diag, a12, a23, 0);
    let t2 = mesh.add_triangle(diag, b34, b41, 0);
    for (e, t) in [
      (diag, t1),
      (a12, t1),
      (a23, t1),
      (diag, t2),
      (b34, t2),
      (b41, t2),
    ] {
      mesh.edge_mut(e).attach_tri(t);
    }
    (mesh, diag)
  }

  #[test]
  fn quality_swap_improves_skinny_pair() {
    let (mut mesh, diag) = skinny_quad(0.1);
    assert!(swap_edge(&mut mesh, diag, SwapMode::Any, 1.0, 1e-9, 1e30));
    let edge = mesh.edge(diag);
    assert_eq!(
      [edge.node1, edge.node2],
      [NodeId(2), NodeId(3)],
      "diagonal should now join the two apex nodes"
    );
    assert_eq!(mesh.validate(1e-9), 0);
  }

  #[test]
  fn good_diagonal_left_alone() {
    let (mut mesh, diag) = skinny_quad(2.0);
    assert!(!swap_edge(&mut mesh, diag, SwapMode::Any, 1.0, 1e-9, 1e30));
  }

  #[test]
  fn constraint_edge_never_swapped() {
    let (mut mesh, diag) = skinny_quad(0.1);
    mesh.edge_mut(diag).flag = EdgeFlag::Fault;
    assert!(!swap_edge(&mut mesh, diag, SwapMode::Any, 1.0, 1e-9, 1e30));
  }

  #[test]
  fn boundary_edge_never_swapped() {
    let (mut mesh, _) = skinny_quad(0.1);
    assert!(!swap_edge(&mut mesh, EdgeId(1), SwapMode::Any, 1.0, 1e-9, 1e30));
  }

  #[test]
  fn force_swaps_good_diagonal() {
    let (mut mesh, diag) = skinny_quad(2.0);
    assert!(swap_edge(&mut mesh, diag, SwapMode::Force, 1.0, 1e-9, 1e30));
    assert_eq!(mesh.validate(1e-9), 0);
  }

  #[test]
  fn as_flagged_honours_tflag() {
    let (mut mesh, diag) = skinny_quad(2.0);
    assert!(!swap_edge(&mut mesh, diag, SwapMode::AsFlagged, 1.0, 1e-9, 1e30));
    mesh.edge_mut(diag).tflag = true;
    assert!(swap_edge(&mut mesh, diag, SwapMode::AsFlagged, 1.0, 1e-9, 1e30));
  }

  #[test]
  fn null_removal_requires_null_diagonal() {
    let (mut mesh, diag) = skinny_quad(0.5);
    assert!(!swap_edge(
      &mut mesh,
      diag,
      SwapMode::NullRemoval,
      1.0,
      1e-9,
      1e30
    ));
    mesh.node_mut(NodeId(0)).z = 1e30;
    // Null endpoint on the current diagonal, both apexes valid: swap.
    assert!(swap_edge(
      &mut mesh,
      diag,
      SwapMode::NullRemoval,
      1.0,
      1e-9,
      1e30
    ));
  }

  #[test]
  fn concave_quad_refused() {
    // n4 pulled inside triangle (n1, n3, n2): diagonals no longer cross.
    let mut mesh = TriMesh::new();
    let n1 = mesh.add_node(-1.0, 0.0, 0.0, 0);
    let n3 = mesh.add_node(1.0, 0.0, 0.0, 0);
    let n2 = mesh.add_node(0.0, -2.0, 0.0, 0);
    let n4 = mesh.add_node(0.1, -0.5, 0.0, 0);
    let diag = mesh.add_edge(n1, n3, None, None, EdgeFlag::Interior);
    let a12 = mesh.add_edge(n1, n2, None, None, EdgeFlag::Interior);
    let a23 = mesh.add_edge(n2, n3, None, None, EdgeFlag::Interior);
    let b34 = mesh.add_edge(n3, n4, None, None, EdgeFlag::Interior);
    let b41 = mesh.add_edge(n4, n1, None, None, EdgeFlag::Interior);
    let t1 = mesh.add_triangle(diag, a12, a23, 0);
    let t2 = mesh.add_triangle(diag, b34, b41, 0);
    for (e, t) in [
      (diag, t1),
      (a12, t1),
      (a23, t1),
      (diag, t2),
      (b34, t2),
      (b41, t2),
    ] {
      mesh.edge_mut(e).attach_tri(t);
    }
    assert!(!swap_edge(&mut mesh, diag, SwapMode::Force, 1.0, 1e-9, 1e30));
  }

  #[test]
  fn swap_loop_terminates() {
    let (mut mesh, _) = skinny_quad(0.1);
    let swaps = swap_loop(&mut mesh, SwapMode::Any, 1.0, 1e-9, 1e30);
    assert_eq!(swaps, 1);
    assert_eq!(mesh.validate(1e-9), 0);
  }
}
