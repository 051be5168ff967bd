//! k-means clustering for the IVF coarse quantizer.
//!
//! k-means++ seeding followed by Lloyd iterations until no assignment changes or the
//! iteration cap is reached. Empty clusters are re-seeded by splitting the largest one.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config;
use crate::metric::{simd, MetricType};

/// Relative perturbation applied when splitting a cluster.
const SPLIT_EPS: f32 = 1.0 / 1024.0;

/// Cluster `data` (row-major, `dim` wide, at least `k` rows) into `k` centroids.
pub fn kmeans(data: &[f32], dim: usize, k: usize, metric: MetricType) -> Vec<f32> {
    let n = data.len() / dim;
    debug_assert!(n >= k && k > 0);
    let mut rng = StdRng::seed_from_u64(config::KMEANS_SEED);
    let mut centroids = seed_plus_plus(data, dim, k, &mut rng);

    let mut assignments = vec![usize::MAX; n];
    for iteration in 0..config::KMEANS_MAX_ITERATIONS {
        let next = assign(data, dim, &centroids, k, metric);
        let changed = next
            .iter()
            .zip(&assignments)
            .filter(|(a, b)| a != b)
            .count();
        assignments = next;

        update_centroids(data, dim, k, &assignments, &mut centroids);
        let split = split_empty_clusters(dim, k, &mut assignments, &mut centroids);
        tracing::debug!(iteration, changed, split, "k-means iteration");
        if changed == 0 && split == 0 {
            break;
        }
    }
    centroids
}

fn row(data: &[f32], dim: usize, i: usize) -> &[f32] {
    &data[i * dim..(i + 1) * dim]
}

/// k-means++: each new seed is drawn with probability proportional to its squared
/// distance from the nearest existing seed.
fn seed_plus_plus(data: &[f32], dim: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len() / dim;
    let mut centroids = Vec::with_capacity(k * dim);
    let first = rng.gen_range(0..n);
    centroids.extend_from_slice(row(data, dim, first));

    let mut nearest = vec![f32::INFINITY; n];
    for c in 1..k {
        let last = &centroids[(c - 1) * dim..c * dim];
        nearest
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, best)| *best = best.min(simd::l2_sq(row(data, dim, i), last)));
        let total: f64 = nearest.iter().map(|&d| d as f64).sum();

        let chosen = if total <= f64::EPSILON {
            rng.gen_range(0..n)
        } else {
            let threshold = rng.gen::<f64>() * total;
            let mut cumulative = 0.0f64;
            nearest
                .iter()
                .position(|&d| {
                    cumulative += d as f64;
                    cumulative >= threshold
                })
                .unwrap_or(n - 1)
        };
        centroids.extend_from_slice(row(data, dim, chosen));
    }
    centroids
}

fn assign(data: &[f32], dim: usize, centroids: &[f32], k: usize, metric: MetricType) -> Vec<usize> {
    data.par_chunks(dim)
        .map(|point| {
            let mut best = 0;
            let mut best_dist = f32::INFINITY;
            for c in 0..k {
                let d = metric.distance(point, row(centroids, dim, c));
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            best
        })
        .collect()
}

fn update_centroids(data: &[f32], dim: usize, k: usize, assignments: &[usize], centroids: &mut [f32]) {
    let mut counts = vec![0usize; k];
    let mut sums = vec![0.0f64; k * dim];
    for (i, &c) in assignments.iter().enumerate() {
        counts[c] += 1;
        for (acc, &x) in sums[c * dim..(c + 1) * dim].iter_mut().zip(row(data, dim, i)) {
            *acc += x as f64;
        }
    }
    for c in 0..k {
        if counts[c] == 0 {
            continue;
        }
        let inv = 1.0 / counts[c] as f64;
        for (dst, &s) in centroids[c * dim..(c + 1) * dim]
            .iter_mut()
            .zip(&sums[c * dim..(c + 1) * dim])
        {
            *dst = (s * inv) as f32;
        }
    }
}

/// Give every empty cluster half of the currently largest one. Returns how many were split.
fn split_empty_clusters(
    dim: usize,
    k: usize,
    assignments: &mut [usize],
    centroids: &mut [f32],
) -> usize {
    let mut counts = vec![0usize; k];
    for &c in assignments.iter() {
        counts[c] += 1;
    }

    let mut split = 0;
    for empty in 0..k {
        if counts[empty] != 0 {
            continue;
        }
        let Some((largest, &size)) = counts.iter().enumerate().max_by_key(|&(_, &c)| c) else {
            break;
        };
        if size < 2 {
            break;
        }
        tracing::warn!(cluster = empty, donor = largest, "k-means cluster empty, splitting largest");

        for j in 0..dim {
            let v = centroids[largest * dim + j];
            let (up, down) = if j % 2 == 0 {
                (1.0 + SPLIT_EPS, 1.0 - SPLIT_EPS)
            } else {
                (1.0 - SPLIT_EPS, 1.0 + SPLIT_EPS)
            };
            centroids[empty * dim + j] = v * up;
            centroids[largest * dim + j] = v * down;
        }

        // Hand every other member of the donor to the new cluster.
        let mut moved = 0;
        for (i, a) in assignments.iter_mut().enumerate() {
            if *a == largest && i % 2 == 1 {
                *a = empty;
                moved += 1;
            }
        }
        if moved == 0 {
            if let Some(a) = assignments.iter_mut().find(|a| **a == largest) {
                *a = empty;
                moved = 1;
            }
        }
        counts[largest] -= moved;
        counts[empty] = moved;
        split += 1;
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(9);
        let mut data = Vec::new();
        for center in [[0.0f32, 0.0], [10.0, 10.0], [-10.0, 10.0]] {
            for _ in 0..50 {
                data.push(center[0] + rng.gen_range(-0.5..0.5));
                data.push(center[1] + rng.gen_range(-0.5..0.5));
            }
        }
        data
    }

    #[test]
    fn test_recovers_separated_blobs() {
        let centroids = kmeans(&blobs(), 2, 3, MetricType::L2);
        let mut found: Vec<(i32, i32)> = centroids
            .chunks(2)
            .map(|c| (c[0].round() as i32, c[1].round() as i32))
            .collect();
        found.sort();
        assert_eq!(found, vec![(-10, 10), (0, 0), (10, 10)]);
    }

    #[test]
    fn test_is_deterministic() {
        let data = blobs();
        assert_eq!(kmeans(&data, 2, 3, MetricType::L2), kmeans(&data, 2, 3, MetricType::L2));
    }

    #[test]
    fn test_k_equals_n() {
        let data = [0.0, 0.0, 5.0, 5.0, 9.0, 1.0];
        let mut centroids: Vec<Vec<f32>> = kmeans(&data, 2, 3, MetricType::L2)
            .chunks(2)
            .map(|c| c.to_vec())
            .collect();
        centroids.sort_by(|a, b| a[0].total_cmp(&b[0]));
        assert_eq!(centroids, vec![vec![0.0, 0.0], vec![5.0, 5.0], vec![9.0, 1.0]]);
    }

    #[test]
    fn test_split_fills_empty_cluster() {
        let mut assignments = vec![0, 0, 0, 0];
        let mut centroids = vec![1.0, 1.0, 0.0, 0.0];
        let split = split_empty_clusters(2, 2, &mut assignments, &mut centroids);
        assert_eq!(split, 1);
        assert_eq!(assignments.iter().filter(|&&a| a == 1).count(), 2);
        assert!(centroids[2] > 0.9);
    }
}
