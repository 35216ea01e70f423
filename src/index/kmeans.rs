//! Seeded k-means with k-means++ initialization over flat row-major data.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::{RagError, Result};
use crate::vector::l2_squared;

/// Rows at or above this count are assigned on the rayon pool.
const PARALLEL_ROWS: usize = 1024;

/// Parameters for [`kmeans`].
#[derive(Debug, Clone, Copy)]
pub struct KMeansConfig {
    pub k: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

/// Cluster `data` (`n` rows of `dim` floats) into at most `config.k`
/// centroids.
///
/// Returns the centroids flattened row-major. Fewer than `k` centroids are
/// returned when there are fewer than `k` rows. The result only depends on
/// the input and the seed.
pub fn kmeans(data: &[f32], dim: usize, config: &KMeansConfig) -> Result<Vec<f32>> {
    if dim == 0 || data.len() % dim != 0 {
        return Err(RagError::invalid_argument(format!(
            "k-means input of {} floats is not a whole number of {dim}-dim rows",
            data.len()
        )));
    }
    let n = data.len() / dim;
    if n == 0 {
        return Err(RagError::invalid_operation(
            "Cannot train centroids on empty vector set",
        ));
    }
    let k = config.k.clamp(1, n);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centroids = init_plus_plus(data, dim, k, &mut rng);
    let mut assignments = vec![usize::MAX; n];

    for iteration in 0..config.max_iterations {
        let nearest_all = assign(data, dim, &centroids);
        let changed = nearest_all
            .iter()
            .zip(&assignments)
            .filter(|((c, _), prev)| c != *prev)
            .count();
        assignments = nearest_all.iter().map(|(c, _)| *c).collect();

        update_centroids(data, dim, k, &assignments, &mut centroids);
        reseed_empty(data, dim, &nearest_all, &assignments, &mut centroids);

        if changed == 0 {
            log::debug!("k-means converged after {} iterations", iteration + 1);
            break;
        }
    }

    Ok(centroids)
}

/// Index and squared distance of the centroid nearest to `v`.
#[inline]
pub fn nearest(centroids: &[f32], dim: usize, v: &[f32]) -> (usize, f32) {
    centroids
        .chunks_exact(dim)
        .enumerate()
        .map(|(i, c)| (i, l2_squared(v, c)))
        .fold((0, f32::INFINITY), |best, cur| {
            if cur.1 < best.1 { cur } else { best }
        })
}

/// Nearest centroid for every row of `data`.
pub fn assign(data: &[f32], dim: usize, centroids: &[f32]) -> Vec<(usize, f32)> {
    if data.len() / dim >= PARALLEL_ROWS {
        data.par_chunks_exact(dim)
            .map(|row| nearest(centroids, dim, row))
            .collect()
    } else {
        data.chunks_exact(dim)
            .map(|row| nearest(centroids, dim, row))
            .collect()
    }
}

fn init_plus_plus(data: &[f32], dim: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len() / dim;
    let mut centroids = Vec::with_capacity(k * dim);
    let first = rng.random_range(0..n);
    centroids.extend_from_slice(row(data, dim, first));

    let mut min_dist: Vec<f32> = data
        .par_chunks_exact(dim)
        .map(|r| l2_squared(r, row(&centroids, dim, 0)))
        .collect();

    for c in 1..k {
        let total: f64 = min_dist.iter().map(|d| *d as f64).sum();
        let pick = if total <= 0.0 {
            rng.random_range(0..n)
        } else {
            let target = rng.random::<f64>() * total;
            let mut cumsum = 0.0;
            min_dist
                .iter()
                .position(|d| {
                    cumsum += *d as f64;
                    cumsum >= target
                })
                .unwrap_or(n - 1)
        };
        centroids.extend_from_slice(row(data, dim, pick));

        let newest = row(&centroids, dim, c).to_vec();
        min_dist
            .par_iter_mut()
            .zip(data.par_chunks_exact(dim))
            .for_each(|(d, r)| *d = d.min(l2_squared(r, &newest)));
    }
    centroids
}

fn update_centroids(
    data: &[f32],
    dim: usize,
    k: usize,
    assignments: &[usize],
    centroids: &mut [f32],
) {
    let mut sums = vec![0.0f64; k * dim];
    let mut counts = vec![0usize; k];
    for (r, &cluster) in data.chunks_exact(dim).zip(assignments) {
        counts[cluster] += 1;
        for (s, v) in sums[cluster * dim..(cluster + 1) * dim].iter_mut().zip(r) {
            *s += *v as f64;
        }
    }
    for cluster in 0..k {
        if counts[cluster] == 0 {
            continue;
        }
        let inv = 1.0 / counts[cluster] as f64;
        for (c, s) in centroids[cluster * dim..(cluster + 1) * dim]
            .iter_mut()
            .zip(&sums[cluster * dim..(cluster + 1) * dim])
        {
            *c = (*s * inv) as f32;
        }
    }
}

/// Move every empty centroid onto the row farthest from its own centroid.
fn reseed_empty(
    data: &[f32],
    dim: usize,
    nearest_all: &[(usize, f32)],
    assignments: &[usize],
    centroids: &mut [f32],
) {
    let k = centroids.len() / dim;
    let mut counts = vec![0usize; k];
    for &c in assignments {
        counts[c] += 1;
    }
    let empty: Vec<usize> = (0..k).filter(|c| counts[*c] == 0).collect();
    if empty.is_empty() {
        return;
    }

    let mut by_distance: Vec<usize> = (0..nearest_all.len()).collect();
    by_distance.sort_by(|a, b| {
        nearest_all[*b]
            .1
            .total_cmp(&nearest_all[*a].1)
            .then(a.cmp(b))
    });
    for (cluster, donor) in empty.into_iter().zip(by_distance) {
        centroids[cluster * dim..(cluster + 1) * dim].copy_from_slice(row(data, dim, donor));
    }
}

#[inline]
fn row(data: &[f32], dim: usize, i: usize) -> &[f32] {
    &data[i * dim..(i + 1) * dim]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Vec<f32> {
        let mut data = Vec::new();
        for i in 0..50 {
            let jitter = (i as f32 * 0.013).sin() * 0.05;
            data.extend_from_slice(&[jitter, 1.0 + jitter]);
            data.extend_from_slice(&[10.0 + jitter, -jitter]);
        }
        data
    }

    #[test]
    fn test_separates_blobs() {
        let data = two_blobs();
        let config = KMeansConfig {
            k: 2,
            max_iterations: 20,
            seed: 7,
        };
        let centroids = kmeans(&data, 2, &config).unwrap();
        assert_eq!(centroids.len(), 4);
        let (a, _) = nearest(&centroids, 2, &[0.0, 1.0]);
        let (b, _) = nearest(&centroids, 2, &[10.0, 0.0]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let data = two_blobs();
        let config = KMeansConfig {
            k: 5,
            max_iterations: 10,
            seed: 42,
        };
        assert_eq!(
            kmeans(&data, 2, &config).unwrap(),
            kmeans(&data, 2, &config).unwrap()
        );
    }

    #[test]
    fn test_k_is_clamped_to_rows() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let config = KMeansConfig {
            k: 10,
            max_iterations: 5,
            seed: 1,
        };
        assert_eq!(kmeans(&data, 2, &config).unwrap().len(), 4);
    }

    #[test]
    fn test_rejects_ragged_input() {
        let config = KMeansConfig {
            k: 1,
            max_iterations: 1,
            seed: 0,
        };
        assert!(kmeans(&[1.0, 2.0, 3.0], 2, &config).is_err());
        assert!(kmeans(&[], 2, &config).is_err());
    }
}
