//! Text trimesh snapshots: a small line-oriented format used for debug
//! dumps and round-tripping.
//!
//! ```text
//! !TXT_TMESH 1.00
//! <vused> <vbase[0..5]>
//! <numnodes> <numedges> <numtris>
//! <x> <y> <z> <flag>             one line per node
//! <n1> <n2> <t1> <t2> <flag>     one line per edge
//! <e1> <e2> <e3> <flag>          one line per triangle
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::data::{EdgeFlag, EdgeId, NodeId, TriId, TriMesh};
use crate::{Error, Result};

const MAGIC: &str = "!TXT_TMESH";
const VERSION: &str = "1.00";

/// A parsed trimesh file: the mesh plus the optional 6-value transform
/// baseline.
#[derive(Debug)]
pub struct TrimeshFile {
  pub mesh: TriMesh,
  pub baseline: Option<[f64; 6]>,
}

fn flag_to_int(flag: EdgeFlag) -> i32 {
  match flag {
    EdgeFlag::Interior => 0,
    EdgeFlag::Boundary => 1,
    EdgeFlag::Fault => 2,
    EdgeFlag::ZeroFault => 3,
    EdgeFlag::Discontinuity => 4,
    EdgeFlag::ZeroDiscontinuity => 5,
    EdgeFlag::Limit => 6,
    EdgeFlag::DontSwap => 7,
  }
}

fn flag_from_int(v: i32) -> EdgeFlag {
  match v {
    1 => EdgeFlag::Boundary,
    2 => EdgeFlag::Fault,
    3 => EdgeFlag::ZeroFault,
    4 => EdgeFlag::Discontinuity,
    5 => EdgeFlag::ZeroDiscontinuity,
    6 => EdgeFlag::Limit,
    7 => EdgeFlag::DontSwap,
    _ => EdgeFlag::Interior,
  }
}

///////////////////////////////////////////////////////////////////////////////
// Writing

/// Write a compact mesh. Tombstoned meshes are refused: compact first.
pub fn write_trimesh<W: Write>(
  mesh: &TriMesh,
  baseline: Option<[f64; 6]>,
  out: &mut W,
) -> Result<()> {
  let dirty = mesh.nodes().iter().any(|n| n.deleted)
    || mesh.edges().iter().any(|e| e.deleted)
    || mesh.triangles().iter().any(|t| t.deleted);
  if dirty {
    return Err(Error::BadArgument("mesh holds tombstones; compact first"));
  }

  writeln!(out, "{} {}", MAGIC, VERSION)?;
  match baseline {
    Some(b) => writeln!(out, "1 {} {} {} {} {} {}", b[0], b[1], b[2], b[3], b[4], b[5])?,
    None => writeln!(out, "0 0 0 0 0 0 0")?,
  }
  writeln!(
    out,
    "{} {} {}",
    mesh.nodes().len(),
    mesh.edges().len(),
    mesh.triangles().len()
  )?;
  for node in mesh.nodes() {
    writeln!(out, "{} {} {} {}", node.x, node.y, node.z, node.flag)?;
  }
  for edge in mesh.edges() {
    let t1 = edge.tri1.map(|t| t.0 as i64).unwrap_or(-1);
    let t2 = edge.tri2.map(|t| t.0 as i64).unwrap_or(-1);
    writeln!(
      out,
      "{} {} {} {} {}",
      edge.node1.0,
      edge.node2.0,
      t1,
      t2,
      flag_to_int(edge.flag)
    )?;
  }
  for tri in mesh.triangles() {
    writeln!(
      out,
      "{} {} {} {}",
      tri.edges[0].0, tri.edges[1].0, tri.edges[2].0, tri.flag
    )?;
  }
  Ok(())
}

pub fn save_trimesh(mesh: &TriMesh, baseline: Option<[f64; 6]>, path: &Path) -> Result<()> {
  let file = File::create(path)?;
  let mut out = BufWriter::new(file);
  write_trimesh(mesh, baseline, &mut out)
}

///////////////////////////////////////////////////////////////////////////////
// Reading

struct LineReader<R> {
  inner: R,
  line: usize,
}

impl<R: BufRead> LineReader<R> {
  fn next_line(&mut self) -> Result<String> {
    let mut buf = String::new();
    loop {
      buf.clear();
      self.line += 1;
      let n = self.inner.read_line(&mut buf)?;
      if n == 0 {
        return Err(Error::Format {
          line: self.line,
          msg: "unexpected end of file".to_string(),
        });
      }
      if !buf.trim().is_empty() {
        return Ok(buf.trim().to_string());
      }
    }
  }

  fn fail<T>(&self, msg: &str) -> Result<T> {
    Err(Error::Format {
      line: self.line,
      msg: msg.to_string(),
    })
  }

  fn fields<T: std::str::FromStr>(&mut self, want: usize) -> Result<Vec<T>> {
    let line = self.next_line()?;
    let parsed: std::result::Result<Vec<T>, _> =
      line.split_whitespace().map(str::parse::<T>).collect();
    match parsed {
      Ok(v) if v.len() == want => Ok(v),
      Ok(v) => self.fail(&format!("expected {} fields, found {}", want, v.len())),
      Err(_) => self.fail("unparseable number"),
    }
  }
}

pub fn read_trimesh<R: BufRead>(input: R) -> Result<TrimeshFile> {
  let mut reader = LineReader {
    inner: input,
    line: 0,
  };

  let header = reader.next_line()?;
  let mut parts = header.split_whitespace();
  if parts.next() != Some(MAGIC) {
    return reader.fail("missing !TXT_TMESH header");
  }
  match parts.next() {
    Some(version) if version.starts_with("1.") => {}
    _ => return reader.fail("unsupported trimesh version"),
  }

  let base: Vec<f64> = reader.fields(7)?;
  let baseline = if base[0] != 0.0 {
    Some([base[1], base[2], base[3], base[4], base[5], base[6]])
  } else {
    None
  };

  let counts: Vec<i64> = reader.fields(3)?;
  if counts.iter().any(|&c| c < 0) {
    return reader.fail("negative element count");
  }
  let (nn, ne, nt) = (counts[0] as usize, counts[1] as usize, counts[2] as usize);

  let mut mesh = TriMesh::new();
  for _ in 0..nn {
    let f: Vec<f64> = reader.fields(4)?;
    mesh.add_node(f[0], f[1], f[2], f[3] as i32);
  }
  for _ in 0..ne {
    let f: Vec<i64> = reader.fields(5)?;
    let (n1, n2) = (f[0], f[1]);
    if n1 < 0 || n2 < 0 || n1 as usize >= nn || n2 as usize >= nn {
      return reader.fail("edge references unknown node");
    }
    let e = mesh.add_edge(
      NodeId(n1 as usize),
      NodeId(n2 as usize),
      None,
      None,
      flag_from_int(f[4] as i32),
    );
    let edge = mesh.edge_mut(e);
    edge.tri1 = (f[2] >= 0).then(|| TriId(f[2] as usize));
    edge.tri2 = (f[3] >= 0).then(|| TriId(f[3] as usize));
    edge.is_constraint = edge.flag.is_constraint_class();
  }
  for _ in 0..nt {
    let f: Vec<i64> = reader.fields(4)?;
    for &e in &f[..3] {
      if e < 0 || e as usize >= ne {
        return reader.fail("triangle references unknown edge");
      }
    }
    mesh.add_triangle(
      EdgeId(f[0] as usize),
      EdgeId(f[1] as usize),
      EdgeId(f[2] as usize),
      f[3] as i32,
    );
  }
  for edge in mesh.edges() {
    for t in edge.tris() {
      if t.0 >= nt {
        return Err(Error::Format {
          line: 0,
          msg: "edge references unknown triangle".to_string(),
        });
      }
    }
  }
  mesh.mark_borders();
  Ok(TrimeshFile { mesh, baseline })
}

pub fn load_trimesh(path: &Path) -> Result<TrimeshFile> {
  let file = File::open(path)?;
  read_trimesh(BufReader::new(file))
}

///////////////////////////////////////////////////////////////////////////////
// Tests

#[cfg(test)]
mod tests {
  use super::*;
  use crate::algorithms::triangulate::triangulate_raw_points;
  use claims::assert_ok;

  fn sample_mesh() -> TriMesh {
    let mut mesh = TriMesh::new();
    for &(x, y, z) in &[
      (0.0, 0.0, 1.0),
      (1.0, 0.0, 2.0),
      (1.0, 1.0, 3.0),
      (0.0, 1.0, 4.0),
    ] {
      mesh.add_raw_point(x, y, z);
    }
    triangulate_raw_points(&mut mesh, false, false).unwrap();
    mesh.remove_deleted();
    mesh.mark_borders();
    mesh
  }

  #[test]
  fn roundtrip() {
    let mesh = sample_mesh();
    let mut buf = Vec::new();
    assert_ok!(write_trimesh(&mesh, None, &mut buf));
    let file = read_trimesh(buf.as_slice()).unwrap();
    assert_eq!(file.baseline, None);
    assert_eq!(file.mesh.nodes().len(), mesh.nodes().len());
    assert_eq!(file.mesh.edges().len(), mesh.edges().len());
    assert_eq!(file.mesh.triangles().len(), mesh.triangles().len());
    for (a, b) in mesh.nodes().iter().zip(file.mesh.nodes()) {
      assert_eq!((a.x, a.y, a.z, a.flag), (b.x, b.y, b.z, b.flag));
    }
    for (a, b) in mesh.edges().iter().zip(file.mesh.edges()) {
      assert_eq!((a.node1, a.node2, a.tri1, a.tri2, a.flag), (b.node1, b.node2, b.tri1, b.tri2, b.flag));
    }
    assert_eq!(file.mesh.validate(file.mesh.default_graze()), 0);
  }

  #[test]
  fn baseline_roundtrip() {
    let mesh = sample_mesh();
    let base = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let mut buf = Vec::new();
    assert_ok!(write_trimesh(&mesh, Some(base), &mut buf));
    let file = read_trimesh(buf.as_slice()).unwrap();
    assert_eq!(file.baseline, Some(base));
  }

  #[test]
  fn tombstoned_mesh_refused() {
    let mut mesh = sample_mesh();
    let first = mesh.live_edges().next().unwrap().0;
    mesh.whack_edge(first);
    let mut buf = Vec::new();
    assert!(write_trimesh(&mesh, None, &mut buf).is_err());
  }

  #[test]
  fn bad_header_rejected() {
    let text = "!TXT_WRONG 1.00\n0 0 0 0 0 0 0\n0 0 0\n";
    assert!(matches!(
      read_trimesh(text.as_bytes()),
      Err(Error::Format { line: 1, .. })
    ));
  }

  #[test]
  fn truncated_file_rejected() {
    let text = "!TXT_TMESH 1.00\n0 0 0 0 0 0 0\n2 0 0\n0 0 0 0\n";
    assert!(matches!(
      read_trimesh(text.as_bytes()),
      Err(Error::Format { .. })
    ));
  }
}
