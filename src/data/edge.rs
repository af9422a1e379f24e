use super::node::{ClientTag, NodeId};
use super::triangle::TriId;

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct EdgeId(pub usize);

impl std::fmt::Debug for EdgeId {
  fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(fmt, "e{}", self.0)
  }
}

/// Constraint class of an edge. `Interior` is the unconstrained default;
/// everything else survives quality swapping untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeFlag {
  #[default]
  Interior,
  Boundary,
  Fault,
  ZeroFault,
  Discontinuity,
  ZeroDiscontinuity,
  Limit,
  DontSwap,
}

impl EdgeFlag {
  /// Any class that pins the edge against quality swapping.
  pub fn is_constraint_class(self) -> bool {
    self != EdgeFlag::Interior
  }

  /// Classes the fault chain follower walks (§fault polygon whacking).
  pub fn is_fault_class(self) -> bool {
    matches!(
      self,
      EdgeFlag::Fault | EdgeFlag::ZeroFault | EdgeFlag::Discontinuity | EdgeFlag::ZeroDiscontinuity
    )
  }

  /// Zero-offset variants come in coincident pairs linked by `pairid`.
  pub fn is_zero_pair(self) -> bool {
    matches!(self, EdgeFlag::ZeroFault | EdgeFlag::ZeroDiscontinuity)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
  pub node1: NodeId,
  pub node2: NodeId,
  /// First adjacent triangle. Always `Some` for a live edge between atomic
  /// operations; transiently `None` while topology is being rebuilt.
  pub tri1: Option<TriId>,
  /// Second adjacent triangle; `None` iff the edge is a boundary edge.
  pub tri2: Option<TriId>,
  pub length: f64,
  pub flag: EdgeFlag,
  pub number: i32,
  /// Constraint line the edge came from.
  pub lineid: Option<u32>,
  /// Links the two sides of a zero-offset fault (1-based in the source).
  pub pairid: Option<u32>,
  pub deleted: bool,
  pub tflag: bool,
  pub tflag2: bool,
  pub on_border: bool,
  /// True when both endpoints are constraint nodes.
  pub is_constraint: bool,
  pub client: ClientTag,
}

impl Edge {
  pub fn new(node1: NodeId, node2: NodeId, tri1: Option<TriId>, tri2: Option<TriId>) -> Edge {
    Edge {
      node1,
      node2,
      tri1,
      tri2,
      length: 0.0,
      flag: EdgeFlag::Interior,
      number: 0,
      lineid: None,
      pairid: None,
      deleted: false,
      tflag: false,
      tflag2: false,
      on_border: false,
      is_constraint: false,
      client: ClientTag::None,
    }
  }

  pub fn has_node(&self, n: NodeId) -> bool {
    self.node1 == n || self.node2 == n
  }

  /// The endpoint that is not `n`. Panics if `n` is not an endpoint.
  pub fn other_node(&self, n: NodeId) -> NodeId {
    if self.node1 == n {
      self.node2
    } else {
      debug_assert_eq!(self.node2, n);
      self.node1
    }
  }

  pub fn is_boundary(&self) -> bool {
    self.tri2.is_none()
  }

  pub fn tris(&self) -> impl Iterator<Item = TriId> {
    self.tri1.into_iter().chain(self.tri2)
  }

  pub fn has_tri(&self, t: TriId) -> bool {
    self.tri1 == Some(t) || self.tri2 == Some(t)
  }

  /// Attach `t` to the first free triangle slot.
  pub fn attach_tri(&mut self, t: TriId) {
    if self.tri1.is_none() {
      self.tri1 = Some(t);
    } else if self.tri2.is_none() && self.tri1 != Some(t) {
      self.tri2 = Some(t);
    }
  }

  /// Drop `t` from whichever slot holds it, shifting `tri2` down so that
  /// `tri1` stays the valid slot.
  pub fn detach_tri(&mut self, t: TriId) {
    if self.tri2 == Some(t) {
      self.tri2 = None;
    } else if self.tri1 == Some(t) {
      self.tri1 = self.tri2.take();
    }
  }

  /// Replace triangle reference `old` with `new` in place.
  pub fn replace_tri(&mut self, old: TriId, new: TriId) {
    if self.tri1 == Some(old) {
      self.tri1 = Some(new);
    } else if self.tri2 == Some(old) {
      self.tri2 = Some(new);
    }
  }
}
