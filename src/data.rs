mod edge;
mod mesh;
mod node;
mod triangle;

pub use edge::{Edge, EdgeFlag, EdgeId};
pub use mesh::{RawPoint, TriMesh, Trim};
pub use node::{ClientTag, Node, NodeId, NodeNormal, CORNER_POINT};
pub use triangle::{TriId, Triangle};
