//! Density-based clustering of detections over (x, y, z, velocity).
//!
//! # Algorithm
//! 1. Two detections are neighbors when they are within `eps_xyz` on every
//!    spatial axis and within `eps_doppler_bins · doppler_resolution` in
//!    velocity. A detection's neighborhood includes itself.
//! 2. Detections with at least `min_samples` neighbors are core points.
//! 3. Neighboring core points are merged (union-find).
//! 4. Border points join the cluster of their lowest-index core neighbor.
//! 5. Remaining noise points become size-1 clusters when `keep_noise` is set.
//!
//! Clusters are ordered by member count (descending), then centroid range.

use std::collections::BTreeMap;

use sensor_models::ClusterParams;

use crate::types::{Cluster, DetectionCandidate};

// ---------------------------------------------------------------------------
// Union-Find (path halving + union by rank)
// ---------------------------------------------------------------------------

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]]; // path halving
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Clusterer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Clusterer {
    pub params: ClusterParams,
    /// Velocity per Doppler bin (m/s)
    pub doppler_resolution: f64,
    pub doppler_bins: usize,
}

impl Clusterer {
    pub fn new(params: ClusterParams, doppler_resolution: f64, doppler_bins: usize) -> Self {
        Self {
            params,
            doppler_resolution,
            doppler_bins,
        }
    }

    pub fn cluster(&self, candidates: &[DetectionCandidate]) -> Vec<Cluster> {
        cluster(
            candidates,
            self.doppler_resolution,
            self.doppler_bins,
            &self.params,
        )
    }
}

/// Radial velocity of a candidate (m/s).
fn velocity(c: &DetectionCandidate, doppler_resolution: f64, doppler_bins: usize) -> f64 {
    c.signed_doppler(doppler_bins) as f64 * doppler_resolution
}

pub fn cluster(
    candidates: &[DetectionCandidate],
    doppler_resolution: f64,
    doppler_bins: usize,
    params: &ClusterParams,
) -> Vec<Cluster> {
    let n = candidates.len();
    let velocities: Vec<f64> = candidates
        .iter()
        .map(|c| velocity(c, doppler_resolution, doppler_bins))
        .collect();
    let eps_v = params.eps_doppler_bins * doppler_resolution;

    let is_neighbor = |i: usize, j: usize| {
        let (a, b) = (&candidates[i].location, &candidates[j].location);
        (0..3).all(|k| (a[k] - b[k]).abs() <= params.eps_xyz)
            && (velocities[i] - velocities[j]).abs() <= eps_v
    };

    let neighbors: Vec<Vec<usize>> = (0..n)
        .map(|i| (0..n).filter(|&j| is_neighbor(i, j)).collect())
        .collect();
    let core: Vec<bool> = neighbors
        .iter()
        .map(|nb| nb.len() >= params.min_samples.max(1))
        .collect();

    let mut uf = UnionFind::new(n);
    for i in (0..n).filter(|&i| core[i]) {
        for &j in neighbors[i].iter().filter(|&&j| core[j]) {
            uf.union(i, j);
        }
    }

    // root → member indices; BTreeMap keeps the grouping deterministic
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut noise = Vec::new();
    for i in 0..n {
        let owner = if core[i] {
            Some(i)
        } else {
            neighbors[i].iter().copied().find(|&j| core[j])
        };
        match owner {
            Some(o) => groups.entry(uf.find(o)).or_default().push(i),
            None => noise.push(i),
        }
    }

    let mut clusters: Vec<Cluster> = groups
        .into_values()
        .map(|members| summarize(&members, candidates, &velocities))
        .collect();
    if params.keep_noise {
        clusters.extend(noise.iter().map(|&i| summarize(&[i], candidates, &velocities)));
    }

    clusters.sort_by(|a, b| {
        b.member_count
            .cmp(&a.member_count)
            .then_with(|| a.range().total_cmp(&b.range()))
    });
    clusters
}

fn summarize(members: &[usize], candidates: &[DetectionCandidate], velocities: &[f64]) -> Cluster {
    let count = members.len() as f64;
    let mut centroid = [0.0; 3];
    let mut doppler = 0.0;
    let mut peak_snr = f64::MIN;
    for &i in members {
        for (acc, v) in centroid.iter_mut().zip(candidates[i].location) {
            *acc += v;
        }
        doppler += velocities[i];
        peak_snr = peak_snr.max(candidates[i].snr);
    }
    Cluster {
        centroid: centroid.map(|v| v / count),
        member_count: members.len(),
        average_doppler: doppler / count,
        peak_snr,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn point(x: f64, y: f64, z: f64, doppler_idx: usize) -> DetectionCandidate {
        let mut c = DetectionCandidate::new(0, doppler_idx, 10.0, 5.0);
        c.location = [x, y, z];
        c
    }

    fn params(keep_noise: bool) -> ClusterParams {
        ClusterParams {
            eps_xyz: 0.3,
            eps_doppler_bins: 2.0,
            min_samples: 3,
            keep_noise,
        }
    }

    fn tight_group() -> Vec<DetectionCandidate> {
        vec![
            point(1.00, 2.00, 0.0, 10),
            point(1.05, 2.02, 0.0, 10),
            point(0.98, 1.97, 0.0, 11),
            point(1.02, 2.05, 0.0, 9),
            point(1.01, 1.99, 0.0, 10),
        ]
    }

    #[test]
    fn tight_group_and_outlier() {
        let mut cands = tight_group();
        cands.push(point(-4.0, 6.0, 0.0, 40));
        let out = cluster(&cands, 0.05, 64, &params(true));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].member_count, 5);
        assert_eq!(out[1].member_count, 1);
        assert_abs_diff_eq!(out[0].centroid[0], 1.012, epsilon = 1e-9);
        assert_abs_diff_eq!(out[0].average_doppler, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn noise_can_be_dropped() {
        let mut cands = tight_group();
        cands.push(point(-4.0, 6.0, 0.0, 40));
        let out = cluster(&cands, 0.05, 64, &params(false));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].member_count, 5);
    }

    #[test]
    fn velocity_separates_colocated_points() {
        let mut cands = tight_group();
        // same place, opposite motion (bin 54 → −10)
        cands.extend([
            point(1.0, 2.0, 0.0, 54),
            point(1.0, 2.01, 0.0, 54),
            point(1.01, 2.0, 0.0, 55),
        ]);
        let out = cluster(&cands, 0.05, 64, &params(false));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].member_count, 5);
        assert_eq!(out[1].member_count, 3);
        assert!(out[1].average_doppler < 0.0);
    }

    #[test]
    fn border_point_joins_cluster() {
        let mut cands = tight_group();
        // reaches only some of the group, not enough to be core
        cands.push(point(1.32, 2.0, 0.0, 10));
        let out = cluster(&cands, 0.05, 64, &params(true));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].member_count, 6);
    }

    #[test]
    fn equal_sizes_order_by_range() {
        let far: Vec<_> = (0..3).map(|i| point(0.0, 8.0 + 0.01 * i as f64, 0.0, 5)).collect();
        let near: Vec<_> = (0..3).map(|i| point(0.0, 3.0 + 0.01 * i as f64, 0.0, 5)).collect();
        let cands: Vec<_> = far.into_iter().chain(near).collect();
        let out = cluster(&cands, 0.05, 64, &params(false));
        assert_eq!(out.len(), 2);
        assert!(out[0].range() < out[1].range());
    }
}
