//! Seeded Lloyd's k-means with restarts.
//!
//! All randomness flows through [`StageRng`], so a fixed seed gives a
//! byte-identical model on every run and every platform. Restarts are
//! scored by inertia and the best model wins.

use crate::config::ClusteringParams;
use crate::rng::StageRng;

/// Centroid-shift threshold below which an init is considered converged.
const CONVERGENCE_TOL: f64 = 1e-6;

/// Replacement for non-finite feature values before standardization.
const NON_FINITE_FILL: f64 = 999.0;

#[derive(Debug, Clone)]
pub struct KMeansModel {
    pub centroids: Vec<Vec<f64>>,
    pub assignments: Vec<usize>,
    pub inertia: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// NaN becomes 0, infinities become the fill value.
pub fn sanitize(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else if value.is_infinite() {
        NON_FINITE_FILL
    } else {
        value
    }
}

/// In-place column z-score. A zero-variance column standardizes to all
/// zeros rather than dividing by zero.
pub fn standardize(matrix: &mut [Vec<f64>]) {
    let Some(dims) = matrix.first().map(Vec::len) else { return };
    let n = matrix.len() as f64;
    for col in 0..dims {
        for row in matrix.iter_mut() {
            row[col] = sanitize(row[col]);
        }
        let mean = matrix.iter().map(|r| r[col]).sum::<f64>() / n;
        let var = matrix.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        for row in matrix.iter_mut() {
            row[col] = if std > 0.0 { (row[col] - mean) / std } else { 0.0 };
        }
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Nearest centroid, ties to the lowest cluster index.
pub fn assign(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0usize;
    let mut best_dist = f64::INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = squared_distance(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = idx;
        }
    }
    best
}

/// Forgy init: k distinct row indices drawn without replacement.
fn initial_centroids(points: &[Vec<f64>], k: usize, rng: &mut StageRng) -> Vec<Vec<f64>> {
    let mut chosen: Vec<usize> = Vec::with_capacity(k);
    while chosen.len() < k {
        let idx = rng.next_u64_below(points.len() as u64) as usize;
        if !chosen.contains(&idx) {
            chosen.push(idx);
        }
    }
    chosen.into_iter().map(|i| points[i].clone()).collect()
}

fn lloyd_once(points: &[Vec<f64>], k: usize, max_iter: usize, rng: &mut StageRng) -> KMeansModel {
    let mut centroids = initial_centroids(points, k, rng);
    let mut assignments = vec![0usize; points.len()];
    let mut iterations = 0usize;
    let mut converged = false;

    while iterations < max_iter {
        iterations += 1;
        for (i, point) in points.iter().enumerate() {
            assignments[i] = assign(point, &centroids);
        }

        let dims = centroids[0].len();
        let mut sums = vec![vec![0.0f64; dims]; k];
        let mut counts = vec![0usize; k];
        for (point, &cluster) in points.iter().zip(&assignments) {
            counts[cluster] += 1;
            for (d, v) in point.iter().enumerate() {
                sums[cluster][d] += v;
            }
        }

        let mut shift = 0.0f64;
        for cluster in 0..k {
            // An empty cluster reseeds from the point farthest from its
            // current centroid, so no cluster ever stays vacant.
            if counts[cluster] == 0 {
                let farthest = points
                    .iter()
                    .zip(&assignments)
                    .max_by(|(a, &ca), (b, &cb)| {
                        squared_distance(a, &centroids[ca])
                            .total_cmp(&squared_distance(b, &centroids[cb]))
                    })
                    .map(|(p, _)| p.clone());
                if let Some(point) = farthest {
                    shift += squared_distance(&centroids[cluster], &point);
                    centroids[cluster] = point;
                }
                continue;
            }
            for d in 0..dims {
                sums[cluster][d] /= counts[cluster] as f64;
            }
            shift += squared_distance(&centroids[cluster], &sums[cluster]);
            centroids[cluster] = std::mem::take(&mut sums[cluster]);
        }

        if shift < CONVERGENCE_TOL {
            converged = true;
            break;
        }
    }

    // The loop updates centroids after assigning, so one more pass pins
    // every point to its nearest final centroid before inertia is read.
    for (i, point) in points.iter().enumerate() {
        assignments[i] = assign(point, &centroids);
    }
    let inertia = points
        .iter()
        .zip(&assignments)
        .map(|(p, &c)| squared_distance(p, &centroids[c]))
        .sum();

    KMeansModel { centroids, assignments, inertia, iterations, converged }
}

/// Fit with `num_inits` random restarts, keeping the lowest-inertia
/// model. Strictly-lower inertia wins, so equal-quality restarts
/// resolve to the earliest init and the result stays deterministic.
pub fn fit(points: &[Vec<f64>], params: &ClusteringParams, rng: &mut StageRng) -> KMeansModel {
    debug_assert!(points.len() >= params.k);
    let mut best: Option<KMeansModel> = None;
    for init in 0..params.num_inits {
        let model = lloyd_once(points, params.k, params.max_iter, rng);
        log::debug!(
            "kmeans init={init} inertia={:.4} iters={} converged={}",
            model.inertia,
            model.iterations,
            model.converged
        );
        if best.as_ref().map(|b| model.inertia < b.inertia).unwrap_or(true) {
            best = Some(model);
        }
    }
    best.expect("num_inits is validated to be nonzero")
}
