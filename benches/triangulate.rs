use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tsurf::MeshEngine;

fn scatter(n: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
  let mut rng = SmallRng::seed_from_u64(7);
  let mut xs = Vec::with_capacity(n);
  let mut ys = Vec::with_capacity(n);
  let mut zs = Vec::with_capacity(n);
  for _ in 0..n {
    let x: f64 = rng.gen_range(0.0..100.0);
    let y: f64 = rng.gen_range(0.0..100.0);
    xs.push(x);
    ys.push(y);
    zs.push((x / 10.0).sin() + (y / 10.0).cos());
  }
  (xs, ys, zs)
}

fn bench_triangulate(c: &mut Criterion) {
  let mut group = c.benchmark_group("triangulate_points");
  for &n in &[100usize, 500, 2000] {
    let (xs, ys, zs) = scatter(n);
    group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
      b.iter(|| {
        let mut engine = MeshEngine::new();
        engine.triangulate_points(&xs, &ys, &zs).unwrap();
        engine.mesh().live_triangles().count()
      })
    });
  }
  group.finish();
}

criterion_group!(benches, bench_triangulate);
criterion_main!(benches);
