//! Normals, cubic Bézier-triangle patches, and the grid-mediated mesh
//! smoother.

use std::collections::HashMap;

use crate::data::{NodeId, NodeNormal, TriId, TriMesh, Trim};
use crate::geometry::{self, Point3};
use crate::grid::{self, GridOps};
use crate::Result;

///////////////////////////////////////////////////////////////////////////////
// Normals

/// Unit normal of a triangle in 3-D, flipped so `z >= 0`.
pub fn triangle_normal(mesh: &TriMesh, t: TriId) -> [f64; 3] {
  let [p1, p2, p3] = mesh.tri_corners(t);
  let v1 = [p2.x - p1.x, p2.y - p1.y, p2.z - p1.z];
  let v2 = [p3.x - p1.x, p3.y - p1.y, p3.z - p1.z];
  let mut n = [
    v1[1] * v2[2] - v1[2] * v2[1],
    v1[2] * v2[0] - v1[0] * v2[2],
    v1[0] * v2[1] - v1[1] * v2[0],
  ];
  let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
  if len <= 0.0 {
    return [0.0, 0.0, 1.0];
  }
  for v in n.iter_mut() {
    *v /= len;
  }
  if n[2] < 0.0 {
    for v in n.iter_mut() {
      *v = -*v;
    }
  }
  n
}

/// Recompute every triangle normal and every node normal (arithmetic mean
/// of the adjacent triangle normals, count kept for incremental updates).
pub fn compute_normals(mesh: &mut TriMesh) {
  let mut acc: Vec<([f64; 3], u32)> = vec![([0.0; 3], 0); mesh.nodes().len()];
  let tris: Vec<TriId> = mesh.live_triangles().map(|(t, _)| t).collect();
  for t in tris {
    let n = triangle_normal(mesh, t);
    mesh.tri_mut(t).norm = Some(n);
    for corner in mesh.tri_nodes(t) {
      let slot = &mut acc[corner.0];
      for k in 0..3 {
        slot.0[k] += n[k];
      }
      slot.1 += 1;
    }
  }
  for (i, (sum, count)) in acc.into_iter().enumerate() {
    let node = &mut mesh.nodes[i];
    if node.deleted || count == 0 {
      node.norm = None;
      continue;
    }
    let mean = [
      sum[0] / count as f64,
      sum[1] / count as f64,
      sum[2] / count as f64,
    ];
    let len = (mean[0] * mean[0] + mean[1] * mean[1] + mean[2] * mean[2]).sqrt();
    let unit = if len > 0.0 {
      [mean[0] / len, mean[1] / len, mean[2] / len]
    } else {
      [0.0, 0.0, 1.0]
    };
    node.norm = Some(NodeNormal {
      nx: unit[0],
      ny: unit[1],
      nz: unit[2],
      count,
    });
  }
}

/// z of the tangent plane at `origin` with normal `n`, evaluated at
/// `(x, y)`. Falls back to the origin z when the normal is horizontal.
fn normal_plane_z(origin: Point3, n: [f64; 3], x: f64, y: f64) -> f64 {
  if n[2].abs() <= 1e-12 {
    return origin.z;
  }
  origin.z - (n[0] * (x - origin.x) + n[1] * (y - origin.y)) / n[2]
}

///////////////////////////////////////////////////////////////////////////////
// Bézier triangle

/// The ten control values of a cubic triangular Bézier patch over one
/// triangle. Corner controls are the corner z values; edge controls sit
/// 1/3 and 2/3 along each side on the tangent plane of the nearest
/// corner's normal; the central control balances the patch.
///
/// Control indexing: multi-indices (i, j, k) with i + j + k = 3, stored as
/// `[300, 030, 003, 210, 120, 021, 012, 102, 201, 111]`.
#[derive(Debug, Clone)]
pub struct BezierTriangle {
  corners: [Point3; 3],
  controls: [f64; 10],
}

impl BezierTriangle {
  /// Build the patch for a triangle. Node normals must be present (see
  /// [`compute_normals`]); a missing normal falls back to the triangle's
  /// own normal.
  pub fn from_triangle(mesh: &TriMesh, t: TriId) -> BezierTriangle {
    let corners = mesh.tri_corners(t);
    let ids = mesh.tri_nodes(t);
    let tn = triangle_normal(mesh, t);
    let normal_of = |n: NodeId| -> [f64; 3] {
      match mesh.node(n).norm {
        Some(nn) => [nn.nx, nn.ny, nn.nz],
        None => tn,
      }
    };

    let edge_control = |from: usize, to: usize| -> f64 {
      let a = corners[from];
      let b = corners[to];
      let x = a.x + (b.x - a.x) / 3.0;
      let y = a.y + (b.y - a.y) / 3.0;
      normal_plane_z(a, normal_of(ids[from]), x, y)
    };

    let b210 = edge_control(0, 1);
    let b120 = edge_control(1, 0);
    let b021 = edge_control(1, 2);
    let b012 = edge_control(2, 1);
    let b102 = edge_control(2, 0);
    let b201 = edge_control(0, 2);
    let edge_sum = b210 + b120 + b021 + b012 + b102 + b201;
    let corner_sum = corners[0].z + corners[1].z + corners[2].z;
    let b111 = edge_sum / 4.0 - corner_sum / 6.0;

    BezierTriangle {
      corners,
      controls: [
        corners[0].z,
        corners[1].z,
        corners[2].z,
        b210,
        b120,
        b021,
        b012,
        b102,
        b201,
        b111,
      ],
    }
  }

  pub fn corners(&self) -> &[Point3; 3] {
    &self.corners
  }

  /// Evaluate z at barycentric `(u, v, w)` by de Casteljau's algorithm.
  pub fn eval(&self, u: f64, v: f64, w: f64) -> f64 {
    // Layout by (i, j, k): cubic level has 10 entries, quadratic 6,
    // linear 3.
    let c = &self.controls;
    let cubic = |i: usize, j: usize, k: usize| -> f64 {
      match (i, j, k) {
        (3, 0, 0) => c[0],
        (0, 3, 0) => c[1],
        (0, 0, 3) => c[2],
        (2, 1, 0) => c[3],
        (1, 2, 0) => c[4],
        (0, 2, 1) => c[5],
        (0, 1, 2) => c[6],
        (1, 0, 2) => c[7],
        (2, 0, 1) => c[8],
        (1, 1, 1) => c[9],
        _ => unreachable!(),
      }
    };
    let mut quad = [0.0; 6];
    let quad_idx: [(usize, usize, usize); 6] =
      [(2, 0, 0), (0, 2, 0), (0, 0, 2), (1, 1, 0), (0, 1, 1), (1, 0, 1)];
    for (slot, &(i, j, k)) in quad.iter_mut().zip(quad_idx.iter()) {
      *slot = u * cubic(i + 1, j, k) + v * cubic(i, j + 1, k) + w * cubic(i, j, k + 1);
    }
    let q = |i: usize, j: usize, k: usize| -> f64 {
      let pos = quad_idx.iter().position(|&x| x == (i, j, k)).unwrap();
      quad[pos]
    };
    let l100 = u * q(2, 0, 0) + v * q(1, 1, 0) + w * q(1, 0, 1);
    let l010 = u * q(1, 1, 0) + v * q(0, 2, 0) + w * q(0, 1, 1);
    let l001 = u * q(1, 0, 1) + v * q(0, 1, 1) + w * q(0, 0, 2);
    u * l100 + v * l010 + w * l001
  }
}

///////////////////////////////////////////////////////////////////////////////
// Grid-mediated smoother

/// Smooth the mesh z field through a grid intermediary: rasterise at about
/// the average edge length, fill and smooth the grid through the
/// collaborator, pull the smoothed values back onto non-fault nodes,
/// rebuild fault-adjacent z from neighbouring normals, and force each
/// zero-offset fault pair exactly coincident in z.
pub fn smooth_mesh(mesh: &mut TriMesh, ops: &dyn GridOps, factor: f64) -> Result<()> {
  let avg = mesh.average_edge_length(Trim::None);
  let bbox = match mesh.bbox() {
    Some(bbox) if avg > 0.0 => bbox,
    _ => return Ok(()),
  };
  let nc = (((bbox[2] - bbox[0]) / avg).ceil() as usize + 1).max(2);
  let nr = (((bbox[3] - bbox[1]) / avg).ceil() as usize + 1).max(2);
  let mut raster = grid::mesh_to_grid(mesh, nc, nr, bbox)?;
  ops.fill_nulls(&mut raster)?;
  ops.smooth(&mut raster, factor)?;

  compute_normals(mesh);

  // A node is fault-touching when any incident edge carries a fault class;
  // fault-adjacent when a neighbour is.
  let mut touching = vec![false; mesh.nodes().len()];
  for (_, edge) in mesh.live_edges() {
    if edge.flag.is_fault_class() {
      touching[edge.node1.0] = true;
      touching[edge.node2.0] = true;
    }
  }
  let mut near = vec![false; mesh.nodes().len()];
  for (id, _) in mesh.live_nodes() {
    if touching[id.0] {
      near[id.0] = true;
      continue;
    }
    near[id.0] = mesh.edges_at(id).iter().any(|&e| {
      !mesh.edge(e).deleted && touching[mesh.edge(e).other_node(id).0]
    });
  }

  let plain: Vec<(NodeId, f64)> = mesh
    .live_nodes()
    .filter(|(id, _)| !near[id.0])
    .filter_map(|(id, node)| {
      ops
        .back_interpolate(&raster, &[], node.x, node.y)
        .map(|z| (id, z))
    })
    .collect();
  for (id, z) in plain {
    mesh.node_mut(id).z = z;
  }

  // Fault-side nodes take the mean of their same-side neighbours' tangent
  // planes, which never reaches across the break.
  let faulted: Vec<(NodeId, f64)> = mesh
    .live_nodes()
    .filter(|(id, _)| near[id.0])
    .filter_map(|(id, node)| {
      let mut sum = 0.0;
      let mut count = 0;
      for &e in mesh.edges_at(id) {
        let edge = mesh.edge(e);
        if edge.deleted || edge.flag.is_fault_class() {
          continue;
        }
        let far = edge.other_node(id);
        if let Some(nn) = mesh.node(far).norm {
          sum += normal_plane_z(
            mesh.node(far).point(),
            [nn.nx, nn.ny, nn.nz],
            node.x,
            node.y,
          );
          count += 1;
        }
      }
      if count > 0 {
        Some((id, sum / count as f64))
      } else {
        None
      }
    })
    .collect();
  for (id, z) in faulted {
    mesh.node_mut(id).z = z;
  }

  average_zero_pairs(mesh);
  Ok(())
}

/// Average z across each zero-offset fault pair so the two sides coincide
/// exactly.
pub fn average_zero_pairs(mesh: &mut TriMesh) {
  let mut by_pair: HashMap<u32, Vec<crate::data::EdgeId>> = HashMap::new();
  for (id, edge) in mesh.live_edges() {
    if edge.flag.is_zero_pair() {
      if let Some(pairid) = edge.pairid {
        by_pair.entry(pairid).or_default().push(id);
      }
    }
  }
  let graze = mesh.default_graze();
  for edges in by_pair.values() {
    if edges.len() != 2 {
      continue;
    }
    let (a, b) = (edges[0], edges[1]);
    let a_nodes = [mesh.edge(a).node1, mesh.edge(a).node2];
    let b_nodes = [mesh.edge(b).node1, mesh.edge(b).node2];
    for &na in &a_nodes {
      let pa = mesh.node(na).xy();
      for &nb in &b_nodes {
        if na == nb {
          continue;
        }
        if geometry::points_graze(pa, mesh.node(nb).xy(), graze) {
          let mean = (mesh.node(na).z + mesh.node(nb).z) / 2.0;
          mesh.node_mut(na).z = mean;
          mesh.node_mut(nb).z = mean;
        }
      }
    }
  }
}

///////////////////////////////////////////////////////////////////////////////
// Tests

#[cfg(test)]
mod tests {
  use super::*;
  use crate::algorithms::triangulate::triangulate_raw_points;
  use crate::grid::BilinearOps;

  fn plane_mesh(coef: [f64; 3]) -> TriMesh {
    let mut mesh = TriMesh::new();
    for i in 0..3 {
      for j in 0..3 {
        let (x, y) = (i as f64, j as f64);
        mesh.add_raw_point(x, y, coef[0] + coef[1] * x + coef[2] * y);
      }
    }
    triangulate_raw_points(&mut mesh, false, false).unwrap();
    mesh.remove_deleted();
    mesh.mark_borders();
    mesh
  }

  #[test]
  fn flat_mesh_normals_point_up() {
    let mut mesh = plane_mesh([2.0, 0.0, 0.0]);
    compute_normals(&mut mesh);
    for (_, node) in mesh.live_nodes() {
      let n = node.norm.unwrap();
      assert!((n.nz - 1.0).abs() < 1e-12);
      assert!(n.count > 0);
    }
  }

  #[test]
  fn tilted_normal_is_unit() {
    let mut mesh = plane_mesh([0.0, 1.0, 0.0]);
    compute_normals(&mut mesh);
    let (_, node) = mesh.live_nodes().next().unwrap();
    let n = node.norm.unwrap();
    let len = (n.nx * n.nx + n.ny * n.ny + n.nz * n.nz).sqrt();
    assert!((len - 1.0).abs() < 1e-12);
    // Gradient along +x tilts the normal toward -x.
    assert!(n.nx < 0.0);
    assert!((n.ny).abs() < 1e-12);
  }

  #[test]
  fn bezier_reproduces_plane() {
    let mut mesh = plane_mesh([1.0, 2.0, -1.0]);
    compute_normals(&mut mesh);
    let t = mesh.live_triangles().next().unwrap().0;
    let patch = BezierTriangle::from_triangle(&mesh, t);
    for &(u, v) in &[(1.0, 0.0), (0.0, 1.0), (0.0, 0.0), (0.3, 0.3), (0.2, 0.5)] {
      let w = 1.0 - u - v;
      let [p0, p1, p2] = *patch.corners();
      let x = u * p0.x + v * p1.x + w * p2.x;
      let y = u * p0.y + v * p1.y + w * p2.y;
      let want = 1.0 + 2.0 * x - y;
      let got = patch.eval(u, v, w);
      assert!(
        (got - want).abs() < 1e-9,
        "at ({}, {}, {}): {} want {}",
        u,
        v,
        w,
        got,
        want
      );
    }
  }

  #[test]
  fn zero_factor_smoothing_preserves_planes() {
    let mut mesh = plane_mesh([0.0, 1.0, 1.0]);
    smooth_mesh(&mut mesh, &BilinearOps, 0.0).unwrap();
    for (_, node) in mesh.live_nodes() {
      let want = node.x + node.y;
      assert!(
        (node.z - want).abs() < 1e-5,
        "z drifted to {} at ({}, {})",
        node.z,
        node.x,
        node.y
      );
    }
  }

  #[test]
  fn smoother_stays_bounded() {
    let mut mesh = plane_mesh([0.0, 1.0, 1.0]);
    smooth_mesh(&mut mesh, &BilinearOps, 1.0).unwrap();
    for (_, node) in mesh.live_nodes() {
      let want = node.x + node.y;
      // A 3x3 mean filter pulls the raster boundary inward by at most one
      // cell's worth of gradient.
      assert!(
        (node.z - want).abs() < 1.5,
        "z drifted to {} at ({}, {})",
        node.z,
        node.x,
        node.y
      );
    }
  }
}
