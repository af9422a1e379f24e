use crate::geometry::Point3;

/// Flag for the four contrived nodes that seed the initial quadrilateral.
/// They are swapped to the outside and removed before a mesh is returned.
pub const CORNER_POINT: i32 = 1;

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct NodeId(pub usize);

impl std::fmt::Debug for NodeId {
  fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(fmt, "n{}", self.0)
  }
}

/// Opaque per-element client data. The variants cover the uses the source
/// put its `void*` slots to; the core never interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientTag {
  #[default]
  None,
  /// Crossing-node accumulator used by ridge/drainage processing.
  Crossings(u32),
  /// Caller-owned handle.
  External(u64),
}

/// Unit normal plus the number of triangle normals accumulated into it,
/// so incremental recomputation can continue the running mean.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeNormal {
  pub nx: f64,
  pub ny: f64,
  pub nz: f64,
  pub count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
  pub x: f64,
  pub y: f64,
  pub z: f64,
  /// Original location of a node that has been snapped to a constraint;
  /// kept so later constraint candidates can compete for the node.
  pub orig: Option<[f64; 3]>,
  /// Index into the raw-point table.
  pub rp: Option<usize>,
  /// Index into the constraint-raw-point table.
  pub crp: Option<usize>,
  /// Chains a shifted node back to the node whose move created it.
  pub adjusting_node: Option<NodeId>,
  pub spillnum: i32,
  pub flag: i32,
  pub deleted: bool,
  pub shifted: bool,
  pub bflag: u8,
  /// The node lies on an outer boundary (an edge with one triangle).
  pub on_border: bool,
  pub is_locked: bool,
  pub client: ClientTag,
  pub norm: Option<NodeNormal>,
}

impl Node {
  pub fn new(x: f64, y: f64, z: f64, flag: i32) -> Node {
    Node {
      x,
      y,
      z,
      orig: None,
      rp: None,
      crp: None,
      adjusting_node: None,
      spillnum: 0,
      flag,
      deleted: false,
      shifted: false,
      bflag: 0,
      on_border: false,
      is_locked: false,
      client: ClientTag::None,
      norm: None,
    }
  }

  pub fn xy(&self) -> [f64; 2] {
    [self.x, self.y]
  }

  pub fn point(&self) -> Point3 {
    Point3::new(self.x, self.y, self.z)
  }

  pub fn is_corner(&self) -> bool {
    self.flag & CORNER_POINT != 0
  }
}
