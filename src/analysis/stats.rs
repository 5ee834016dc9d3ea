//! Small statistics helpers used by the classifier.

use rand::seq::SliceRandom;
use rand::Rng;

/// Median of `values`, averaging the two middle values for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Mean of `b - a` over every pair drawn from the two samples.
pub fn mean_pairwise_difference(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let sum: f64 = a.iter().map(|x| b.iter().map(|y| y - x).sum::<f64>()).sum();
    Some(sum / (a.len() * b.len()) as f64)
}

/// Absolute pairwise gap between two classes, relative to the larger median
/// (floored at 1%).
pub fn relative_gap(class1: &[f64], class2: &[f64]) -> Option<f64> {
    let gap = mean_pairwise_difference(class1, class2)?.abs();
    let reference = median(class1)?.max(median(class2)?).max(0.01);
    Some(gap / reference)
}

const EMPTY_CENTROID: f64 = 1.0e99;

fn assign(points: &[f64], centroids: &[f64]) -> Vec<usize> {
    points
        .iter()
        .map(|&point| {
            let mut best = 0;
            let mut best_dist = (centroids[0] - point).abs();
            for (c, &centroid) in centroids.iter().enumerate().skip(1) {
                let dist = (centroid - point).abs();
                if dist < best_dist {
                    best = c;
                    best_dist = dist;
                }
            }
            best
        })
        .collect()
}

fn centroids(points: &[f64], clusters: &[usize], k: usize) -> Vec<f64> {
    let mut sums = vec![0.0; k];
    let mut counts = vec![0usize; k];
    for (&point, &cluster) in points.iter().zip(clusters) {
        sums[cluster] += point;
        counts[cluster] += 1;
    }
    let mut result: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(&sum, &count)| if count > 0 { sum / count as f64 } else { EMPTY_CENTROID })
        .collect();
    result.sort_by(f64::total_cmp);
    result
}

/// One-dimensional k-means (Lloyd's algorithm) with random initial centroids
/// drawn from the points.
///
/// Centroids are kept sorted, so cluster `k - 1` always has the largest
/// centroid. Empty clusters get a far-away centroid and stay empty. Stops when
/// assignments no longer change or after `max_iterations` updates.
pub fn kmeans_1d<R: Rng + ?Sized>(
    points: &[f64],
    k: usize,
    max_iterations: usize,
    rng: &mut R,
) -> Vec<usize> {
    if points.is_empty() || k == 0 {
        return vec![0; points.len()];
    }

    let order = shuffled_indices(points.len(), rng);
    let mut initial: Vec<f64> = (0..k)
        .map(|c| order.get(c).map_or(EMPTY_CENTROID, |&i| points[i]))
        .collect();
    initial.sort_by(f64::total_cmp);

    let mut clusters = assign(points, &initial);
    for iteration in 0..max_iterations {
        let updated = centroids(points, &clusters, k);
        let next = assign(points, &updated);
        if next == clusters {
            log::trace!("k-means converged after {} iterations", iteration + 1);
            break;
        }
        clusters = next;
    }
    clusters
}

/// Repeats two-cluster k-means `runs` times and takes a per-point majority.
///
/// A point lands in cluster 1 (the high cluster) only if more than half of the
/// runs put it there. Returns the consensus and every individual run.
pub fn kmeans_consensus<R: Rng + ?Sized>(
    points: &[f64],
    runs: usize,
    max_iterations: usize,
    rng: &mut R,
) -> (Vec<usize>, Vec<Vec<usize>>) {
    let all_runs: Vec<Vec<usize>> = (0..runs)
        .map(|_| kmeans_1d(points, 2, max_iterations, rng))
        .collect();
    let consensus = (0..points.len())
        .map(|i| {
            let votes: usize = all_runs.iter().map(|run| run[i]).sum();
            usize::from(votes > runs / 2)
        })
        .collect();
    (consensus, all_runs)
}

/// Fisher-Yates shuffle of `0..n`.
pub fn shuffled_indices<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices
}
