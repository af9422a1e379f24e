use geometry_predicates::orient2d;

use crate::{Error, Result};

/// Default grazing distance is the mesh bounding-box perimeter divided by
/// this. Two points closer than the grazing distance are treated as
/// coincident.
pub const GRAZE_PERIMETER_DIVISOR: f64 = 200_000.0;

/// Edges shorter than perimeter / this are collapsed by topology repair.
/// The ratio to [`GRAZE_PERIMETER_DIVISOR`] is empirical; see the repair
/// module.
pub const ZERO_LENGTH_PERIMETER_DIVISOR: f64 = 20_000.0;

///////////////////////////////////////////////////////////////////////////////
// Point3

/// A mesh-space point: `(x, y)` position plus the `z` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3 {
  pub x: f64,
  pub y: f64,
  pub z: f64,
}

impl Point3 {
  pub const fn new(x: f64, y: f64, z: f64) -> Point3 {
    Point3 { x, y, z }
  }

  pub fn xy(&self) -> [f64; 2] {
    [self.x, self.y]
  }

  /// Distance in the xy projection.
  pub fn dist2d(&self, other: &Point3) -> f64 {
    dist2(self.xy(), other.xy())
  }
}

impl From<[f64; 3]> for Point3 {
  fn from(a: [f64; 3]) -> Point3 {
    Point3::new(a[0], a[1], a[2])
  }
}

///////////////////////////////////////////////////////////////////////////////
// Orientation

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
  CounterClockWise,
  ClockWise,
  CoLinear,
}

impl Orientation {
  /// Robust turn direction of `p -> q -> r`.
  pub fn new(p: [f64; 2], q: [f64; 2], r: [f64; 2]) -> Orientation {
    let det = orient2d(p, q, r);
    if det > 0.0 {
      Orientation::CounterClockWise
    } else if det < 0.0 {
      Orientation::ClockWise
    } else {
      Orientation::CoLinear
    }
  }

  pub fn reverse(self) -> Orientation {
    match self {
      Orientation::CounterClockWise => Orientation::ClockWise,
      Orientation::ClockWise => Orientation::CounterClockWise,
      Orientation::CoLinear => Orientation::CoLinear,
    }
  }

  pub fn is_ccw(self) -> bool {
    self == Orientation::CounterClockWise
  }

  pub fn is_colinear(self) -> bool {
    self == Orientation::CoLinear
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PointLocation {
  Inside,
  OnBoundary,
  Outside,
}

///////////////////////////////////////////////////////////////////////////////
// Scalar helpers

pub fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
  let dx = b[0] - a[0];
  let dy = b[1] - a[1];
  (dx * dx + dy * dy).sqrt()
}

/// Are two points within grazing distance of each other?
pub fn points_graze(p: [f64; 2], q: [f64; 2], graze: f64) -> bool {
  dist2(p, q) <= graze
}

fn cross(o: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
  (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

/// Unsigned area of the triangle `a b c` in the xy plane.
pub fn triangle_area(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
  cross(a, b, c).abs() / 2.0
}

/// Heron's formula from the three side lengths. Returns zero for side
/// lengths that violate the triangle inequality (they arise from colinear
/// corners plus rounding).
pub fn heron_area(a: f64, b: f64, c: f64) -> f64 {
  let s = (a + b + c) / 2.0;
  let t = s * (s - a) * (s - b) * (s - c);
  if t <= 0.0 {
    0.0
  } else {
    t.sqrt()
  }
}

/// Shape metric in `[0, 1]`: (sum of the two shortest sides − longest) /
/// longest. 1 = equilateral, 0 = degenerate.
pub fn equilateralness(a: f64, b: f64, c: f64) -> f64 {
  let longest = a.max(b).max(c);
  if longest <= 0.0 {
    return 0.0;
  }
  ((a + b + c - 2.0 * longest) / longest).clamp(0.0, 1.0)
}

/// Are three points colinear within the grazing distance? The test is the
/// perpendicular distance of each point from the segment between the other
/// two, using the longest pair as the base.
pub fn colinear(a: [f64; 2], b: [f64; 2], c: [f64; 2], graze: f64) -> bool {
  let ab = dist2(a, b);
  let bc = dist2(b, c);
  let ca = dist2(c, a);
  let (base1, base2, apex) = if ab >= bc && ab >= ca {
    (a, b, c)
  } else if bc >= ab && bc >= ca {
    (b, c, a)
  } else {
    (c, a, b)
  };
  dist_to_segment(apex, base1, base2) <= graze
}

/// Distance from `p` to the closed segment `a b`.
pub fn dist_to_segment(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
  let len = dist2(a, b);
  if len == 0.0 {
    return dist2(p, a);
  }
  let t = ((p[0] - a[0]) * (b[0] - a[0]) + (p[1] - a[1]) * (b[1] - a[1])) / (len * len);
  let t = t.clamp(0.0, 1.0);
  dist2(p, [a[0] + t * (b[0] - a[0]), a[1] + t * (b[1] - a[1])])
}

///////////////////////////////////////////////////////////////////////////////
// Perpendicular foot

/// Perpendicular foot of `p` on the infinite line through `a b`, plus the
/// signed parameter along `a -> b` (0 at `a`, 1 at `b`, outside `[0, 1]`
/// when the foot falls beyond an endpoint).
pub fn perp_foot(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> Result<([f64; 2], f64)> {
  let dx = b[0] - a[0];
  let dy = b[1] - a[1];
  let len2 = dx * dx + dy * dy;
  if len2 == 0.0 {
    return Err(Error::DegenerateGeometry);
  }
  let t = ((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len2;
  Ok(([a[0] + t * dx, a[1] + t * dy], t))
}

///////////////////////////////////////////////////////////////////////////////
// Segment / segment intersection

/// Result of intersecting two closed segments under a grazing distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegSeg {
  Disjoint,
  /// The segments meet at a single point (endpoint touches count).
  Crossing { x: f64, y: f64 },
  /// The segments are colinear and share more than a grazing length.
  Overlap,
  /// The segments have the same endpoints (in either order).
  Identical,
}

/// Intersect segments `a1 a2` and `b1 b2`.
///
/// Fails with [`Error::DegenerateGeometry`] when either segment is shorter
/// than the grazing distance.
pub fn segment_intersection(
  a1: [f64; 2],
  a2: [f64; 2],
  b1: [f64; 2],
  b2: [f64; 2],
  graze: f64,
) -> Result<SegSeg> {
  let la = dist2(a1, a2);
  let lb = dist2(b1, b2);
  if la <= graze || lb <= graze {
    return Err(Error::DegenerateGeometry);
  }

  if (points_graze(a1, b1, graze) && points_graze(a2, b2, graze))
    || (points_graze(a1, b2, graze) && points_graze(a2, b1, graze))
  {
    return Ok(SegSeg::Identical);
  }

  // Colinear handling goes through perpendicular distances so the grazing
  // distance, not the exact predicate, decides.
  let d_b1 = dist_to_line(b1, a1, a2);
  let d_b2 = dist_to_line(b2, a1, a2);
  if d_b1 <= graze && d_b2 <= graze {
    let (_, t1) = perp_foot(b1, a1, a2)?;
    let (_, t2) = perp_foot(b2, a1, a2)?;
    let (lo, hi) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
    let eps = graze / la;
    let start = lo.max(0.0);
    let end = hi.min(1.0);
    if end < start - eps {
      return Ok(SegSeg::Disjoint);
    }
    if end - start <= eps {
      let t = ((start + end) / 2.0).clamp(0.0, 1.0);
      return Ok(SegSeg::Crossing {
        x: a1[0] + t * (a2[0] - a1[0]),
        y: a1[1] + t * (a2[1] - a1[1]),
      });
    }
    return Ok(SegSeg::Overlap);
  }

  let da = [a2[0] - a1[0], a2[1] - a1[1]];
  let db = [b2[0] - b1[0], b2[1] - b1[1]];
  let denom = da[0] * db[1] - da[1] * db[0];
  if denom == 0.0 {
    return Ok(SegSeg::Disjoint);
  }
  let t = ((b1[0] - a1[0]) * db[1] - (b1[1] - a1[1]) * db[0]) / denom;
  let u = ((b1[0] - a1[0]) * da[1] - (b1[1] - a1[1]) * da[0]) / denom;
  let eps_a = graze / la;
  let eps_b = graze / lb;
  if t < -eps_a || t > 1.0 + eps_a || u < -eps_b || u > 1.0 + eps_b {
    return Ok(SegSeg::Disjoint);
  }
  let tc = t.clamp(0.0, 1.0);
  Ok(SegSeg::Crossing {
    x: a1[0] + tc * da[0],
    y: a1[1] + tc * da[1],
  })
}

fn dist_to_line(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
  let len = dist2(a, b);
  if len == 0.0 {
    return dist2(p, a);
  }
  (cross(a, b, p) / len).abs()
}

///////////////////////////////////////////////////////////////////////////////
// Plane fit

/// Fit `z = a + b*x + c*y` to three or more points by least squares.
///
/// The normal-equation system is centred before solving; a near-singular
/// system (points colinear in xy) falls back to a gradient along the
/// dominant direction of xy spread, and a point cloud with no xy spread at
/// all yields the horizontal plane through the mean z.
pub fn fit_plane(pts: &[Point3]) -> Result<[f64; 3]> {
  if pts.len() < 3 {
    return Err(Error::BadArgument("fit_plane needs at least 3 points"));
  }
  let n = pts.len() as f64;
  let mx = pts.iter().map(|p| p.x).sum::<f64>() / n;
  let my = pts.iter().map(|p| p.y).sum::<f64>() / n;
  let mz = pts.iter().map(|p| p.z).sum::<f64>() / n;

  let mut sxx = 0.0;
  let mut sxy = 0.0;
  let mut syy = 0.0;
  let mut sxz = 0.0;
  let mut syz = 0.0;
  for p in pts {
    let dx = p.x - mx;
    let dy = p.y - my;
    let dz = p.z - mz;
    sxx += dx * dx;
    sxy += dx * dy;
    syy += dy * dy;
    sxz += dx * dz;
    syz += dy * dz;
  }

  let det = sxx * syy - sxy * sxy;
  let scale = (sxx + syy).max(f64::MIN_POSITIVE);
  if det.abs() > 1e-12 * scale * scale {
    let b = (sxz * syy - syz * sxy) / det;
    let c = (syz * sxx - sxz * sxy) / det;
    let a = mz - b * mx - c * my;
    return Ok([a, b, c]);
  }

  // Points are colinear in xy: gradient along the dominant direction only.
  if sxx <= f64::MIN_POSITIVE && syy <= f64::MIN_POSITIVE {
    return Ok([mz, 0.0, 0.0]);
  }
  let (dx, dy) = if sxx >= syy {
    (1.0, sxy / sxx)
  } else {
    (sxy / syy, 1.0)
  };
  let norm = (dx * dx + dy * dy).sqrt();
  let (ux, uy) = (dx / norm, dy / norm);
  let mut ss = 0.0;
  let mut sz = 0.0;
  for p in pts {
    let s = (p.x - mx) * ux + (p.y - my) * uy;
    ss += s * s;
    sz += s * (p.z - mz);
  }
  if ss <= f64::MIN_POSITIVE {
    return Ok([mz, 0.0, 0.0]);
  }
  let m = sz / ss;
  let b = m * ux;
  let c = m * uy;
  Ok([mz - b * mx - c * my, b, c])
}

/// Evaluate plane coefficients from [`fit_plane`].
pub fn plane_z(coef: [f64; 3], x: f64, y: f64) -> f64 {
  coef[0] + coef[1] * x + coef[2] * y
}

///////////////////////////////////////////////////////////////////////////////
// Point in polygon

/// Locate `p` against a closed polygon ring (a trailing repeat of the first
/// vertex is tolerated). Boundary means within the grazing distance of an
/// edge.
pub fn point_in_polygon(p: [f64; 2], ring: &[[f64; 2]], graze: f64) -> PointLocation {
  let n = effective_ring_len(ring);
  if n < 3 {
    return PointLocation::Outside;
  }
  for i in 0..n {
    let a = ring[i];
    let b = ring[(i + 1) % n];
    if dist_to_segment(p, a, b) <= graze {
      return PointLocation::OnBoundary;
    }
  }
  let mut inside = false;
  for i in 0..n {
    let a = ring[i];
    let b = ring[(i + 1) % n];
    if (a[1] > p[1]) != (b[1] > p[1]) {
      let x = a[0] + (p[1] - a[1]) / (b[1] - a[1]) * (b[0] - a[0]);
      if x > p[0] {
        inside = !inside;
      }
    }
  }
  if inside {
    PointLocation::Inside
  } else {
    PointLocation::Outside
  }
}

fn effective_ring_len(ring: &[[f64; 2]]) -> usize {
  let n = ring.len();
  if n > 1 && ring[0] == ring[n - 1] {
    n - 1
  } else {
    n
  }
}

///////////////////////////////////////////////////////////////////////////////
// Tests

#[cfg(test)]
mod tests {
  use super::*;
  use claims::{assert_err, assert_ok};
  use proptest::prelude::*;

  #[test]
  fn crossing_1() {
    let r = segment_intersection([0.0, 0.0], [2.0, 2.0], [0.0, 2.0], [2.0, 0.0], 1e-9).unwrap();
    match r {
      SegSeg::Crossing { x, y } => {
        assert!((x - 1.0).abs() < 1e-12);
        assert!((y - 1.0).abs() < 1e-12);
      }
      other => panic!("expected crossing, got {:?}", other),
    }
  }

  #[test]
  fn disjoint_1() {
    let r = segment_intersection([0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0], 1e-9).unwrap();
    assert_eq!(r, SegSeg::Disjoint);
  }

  #[test]
  fn overlap_1() {
    let r = segment_intersection([0.0, 0.0], [2.0, 0.0], [1.0, 0.0], [3.0, 0.0], 1e-9).unwrap();
    assert_eq!(r, SegSeg::Overlap);
  }

  #[test]
  fn identical_1() {
    let r = segment_intersection([0.0, 0.0], [1.0, 1.0], [1.0, 1.0], [0.0, 0.0], 1e-9).unwrap();
    assert_eq!(r, SegSeg::Identical);
  }

  #[test]
  fn endpoint_touch_is_crossing() {
    let r = segment_intersection([0.0, 0.0], [1.0, 0.0], [1.0, 0.0], [2.0, 1.0], 1e-9).unwrap();
    assert!(matches!(r, SegSeg::Crossing { .. }));
  }

  #[test]
  fn zero_length_is_degenerate() {
    assert_err!(segment_intersection(
      [0.0, 0.0],
      [0.0, 0.0],
      [0.0, 1.0],
      [1.0, 1.0],
      1e-9
    ));
  }

  #[test]
  fn perp_foot_1() {
    let (foot, t) = perp_foot([1.0, 1.0], [0.0, 0.0], [2.0, 0.0]).unwrap();
    assert_eq!(foot, [1.0, 0.0]);
    assert!((t - 0.5).abs() < 1e-12);
  }

  #[test]
  fn perp_foot_beyond_end() {
    let (_, t) = perp_foot([3.0, 5.0], [0.0, 0.0], [2.0, 0.0]).unwrap();
    assert!(t > 1.0);
  }

  #[test]
  fn plane_fit_exact() {
    let pts = [
      Point3::new(0.0, 0.0, 1.0),
      Point3::new(1.0, 0.0, 3.0),
      Point3::new(0.0, 1.0, 0.0),
      Point3::new(1.0, 1.0, 2.0),
    ];
    let c = assert_ok!(fit_plane(&pts));
    // z = 1 + 2x - y
    assert!((c[0] - 1.0).abs() < 1e-9);
    assert!((c[1] - 2.0).abs() < 1e-9);
    assert!((c[2] + 1.0).abs() < 1e-9);
  }

  #[test]
  fn plane_fit_colinear_fallback() {
    let pts = [
      Point3::new(0.0, 0.0, 0.0),
      Point3::new(1.0, 0.0, 1.0),
      Point3::new(2.0, 0.0, 2.0),
    ];
    let c = assert_ok!(fit_plane(&pts));
    assert!((plane_z(c, 1.5, 0.0) - 1.5).abs() < 1e-9);
  }

  #[test]
  fn point_in_polygon_square() {
    let ring = [[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]];
    assert_eq!(
      point_in_polygon([1.0, 1.0], &ring, 1e-9),
      PointLocation::Inside
    );
    assert_eq!(
      point_in_polygon([3.0, 1.0], &ring, 1e-9),
      PointLocation::Outside
    );
    assert_eq!(
      point_in_polygon([2.0, 1.0], &ring, 1e-9),
      PointLocation::OnBoundary
    );
  }

  #[test]
  fn equilateralness_range() {
    assert!((equilateralness(1.0, 1.0, 1.0) - 1.0).abs() < 1e-12);
    assert!(equilateralness(1.0, 1.0, 2.0) < 1e-12);
    let mid = equilateralness(3.0, 4.0, 5.0);
    assert!(mid > 0.0 && mid < 1.0);
  }

  proptest! {
    #[test]
    fn intersection_is_symmetric(
      a in prop::array::uniform4(-100.0f64..100.0),
      b in prop::array::uniform4(-100.0f64..100.0),
    ) {
      let s1 = segment_intersection([a[0], a[1]], [a[2], a[3]], [b[0], b[1]], [b[2], b[3]], 1e-9);
      let s2 = segment_intersection([b[0], b[1]], [b[2], b[3]], [a[0], a[1]], [a[2], a[3]], 1e-9);
      match (s1, s2) {
        (Ok(SegSeg::Crossing { x: x1, y: y1 }), Ok(SegSeg::Crossing { x: x2, y: y2 })) => {
          prop_assert!((x1 - x2).abs() < 1e-6);
          prop_assert!((y1 - y2).abs() < 1e-6);
        }
        (r1, r2) => prop_assert_eq!(r1, r2),
      }
    }

    #[test]
    fn plane_fit_reproduces_plane(
      coef in prop::array::uniform3(-10.0f64..10.0),
      pts in prop::collection::vec((-50.0f64..50.0, -50.0f64..50.0), 3..20),
    ) {
      let pts: Vec<Point3> = pts
        .iter()
        .map(|&(x, y)| Point3::new(x, y, coef[0] + coef[1] * x + coef[2] * y))
        .collect();
      // Skip badly conditioned xy configurations; the fallback path is
      // covered by its own unit test.
      let n = pts.len() as f64;
      let mx = pts.iter().map(|p| p.x).sum::<f64>() / n;
      let my = pts.iter().map(|p| p.y).sum::<f64>() / n;
      let sxx: f64 = pts.iter().map(|p| (p.x - mx) * (p.x - mx)).sum();
      let syy: f64 = pts.iter().map(|p| (p.y - my) * (p.y - my)).sum();
      let sxy: f64 = pts.iter().map(|p| (p.x - mx) * (p.y - my)).sum();
      let scale = sxx + syy;
      prop_assume!(sxx * syy - sxy * sxy > 1e-4 * scale * scale);
      let fitted = fit_plane(&pts).unwrap();
      for p in &pts {
        let z = plane_z(fitted, p.x, p.y);
        prop_assert!((z - p.z).abs() < 1e-5 * (1.0 + p.z.abs()));
      }
    }
  }
}
