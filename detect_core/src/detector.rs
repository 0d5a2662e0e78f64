//! 2D detector over the Doppler matrix.
//!
//! # Processing steps
//! 1. CA-CFAR along Doppler (each range row) and along range (each Doppler column)
//! 2. AND of both masks; SNR = value − range-axis noise floor
//! 3. Peak pruning against the matrix neighbors (range ±1, Doppler ±1 circular)
//! 4. Grouping of circularly adjacent Doppler detections in one range bin
//! 5. Range-bin limits and the range-bucketed SNR / peak table
//!
//! # Tie-break
//! Cell `a` dominates cell `b` when `a` has the strictly larger value, or
//! equal value and a lower range index, or equal value and range and a lower
//! Doppler index. Pruning and grouping only ever keep non-dominated cells.

use std::cmp::Ordering;

use sensor_models::{DetectionParams, RangeBucket};

use crate::cfar::ca_cfar;
use crate::types::{DetectionCandidate, DopplerMatrix};

/// Candidate counts after each stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub cfar: usize,
    pub peaks: usize,
    pub grouped: usize,
    pub final_count: usize,
}

#[derive(Clone, Debug)]
pub struct Detector {
    pub params: DetectionParams,
    /// Meters per range bin
    pub range_resolution: f64,
    buckets: Vec<RangeBucket>,
}

impl Detector {
    pub fn new(params: DetectionParams, range_resolution: f64) -> Self {
        let mut buckets = params.range_buckets.clone();
        buckets.sort_by(|a, b| a.max_range_m.total_cmp(&b.max_range_m));
        Self {
            params,
            range_resolution,
            buckets,
        }
    }

    pub fn detect(&self, matrix: &DopplerMatrix) -> Vec<DetectionCandidate> {
        self.detect_with_counts(matrix).0
    }

    /// Run every stage, also reporting how many candidates each one left.
    pub fn detect_with_counts(&self, matrix: &DopplerMatrix) -> (Vec<DetectionCandidate>, StageCounts) {
        let mut counts = StageCounts::default();

        // ----------------------------------------------------------------
        // Step 1-2: CFAR on both axes, AND of masks
        // ----------------------------------------------------------------
        let raw = cfar_2d(matrix, &self.params);
        counts.cfar = raw.len();

        // ----------------------------------------------------------------
        // Step 3: Peak pruning
        // ----------------------------------------------------------------
        let peaks = prune_to_peaks(raw, matrix, self.params.reserve_neighbor);
        counts.peaks = peaks.len();

        // ----------------------------------------------------------------
        // Step 4: Doppler grouping
        // ----------------------------------------------------------------
        let grouped = group_along_doppler(peaks, matrix.ncols());
        counts.grouped = grouped.len();

        // ----------------------------------------------------------------
        // Step 5: Range limits and bucket table
        // ----------------------------------------------------------------
        let max_bin = self.params.max_range_bin.unwrap_or(usize::MAX);
        let mut out: Vec<DetectionCandidate> = grouped
            .into_iter()
            .filter(|c| c.range_idx >= self.params.min_range_bin && c.range_idx <= max_bin)
            .filter(|c| self.passes_bucket(c))
            .collect();
        out.sort_by_key(|c| (c.range_idx, c.doppler_idx));
        counts.final_count = out.len();

        tracing::trace!(?counts, "detector stages");
        (out, counts)
    }

    /// Bucket for a range: first with `range < max_range_m`, else the last one.
    pub fn bucket_for(&self, range_m: f64) -> Option<&RangeBucket> {
        self.buckets
            .iter()
            .find(|b| range_m < b.max_range_m)
            .or_else(|| self.buckets.last())
    }

    fn passes_bucket(&self, c: &DetectionCandidate) -> bool {
        match self.bucket_for(c.range_idx as f64 * self.range_resolution) {
            Some(b) => c.snr > b.min_snr && c.peak_value >= b.min_peak,
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// CFAR
// ---------------------------------------------------------------------------

/// Cells passing both the Doppler-axis and range-axis CFAR tests.
pub fn cfar_2d(matrix: &DopplerMatrix, params: &DetectionParams) -> Vec<DetectionCandidate> {
    let (n_range, n_dop) = matrix.shape();
    if n_range == 0 || n_dop == 0 {
        return Vec::new();
    }

    let doppler_pass: Vec<_> = (0..n_range)
        .map(|r| {
            let row: Vec<f64> = matrix.row(r).iter().copied().collect();
            ca_cfar(&row, &params.doppler_cfar)
        })
        .collect();
    let range_pass: Vec<_> = (0..n_dop)
        .map(|d| {
            let col: Vec<f64> = matrix.column(d).iter().copied().collect();
            ca_cfar(&col, &params.range_cfar)
        })
        .collect();

    let mut out = Vec::new();
    for r in 0..n_range {
        for d in 0..n_dop {
            if doppler_pass[r].detections[d] && range_pass[d].detections[r] {
                let value = matrix[(r, d)];
                out.push(DetectionCandidate::new(
                    r,
                    d,
                    value,
                    value - range_pass[d].noise_floor[r],
                ));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Pruning & grouping
// ---------------------------------------------------------------------------

/// Strict total order used by every tie-break.
#[inline]
pub fn dominates(a_val: f64, a_pos: (usize, usize), b_val: f64, b_pos: (usize, usize)) -> bool {
    match a_val.total_cmp(&b_val) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => a_pos < b_pos,
    }
}

/// Keep candidates that are local maxima of the matrix.
///
/// Range neighbors (no wrap) must not dominate the cell. Along Doppler
/// (circular) the cell must dominate both neighbors; `reserve_neighbor`
/// also keeps a cell that dominates one neighbor plus the cell two steps
/// past the other.
pub fn prune_to_peaks(
    candidates: Vec<DetectionCandidate>,
    matrix: &DopplerMatrix,
    reserve_neighbor: bool,
) -> Vec<DetectionCandidate> {
    let (n_range, n_dop) = matrix.shape();
    candidates
        .into_iter()
        .filter(|c| {
            let (r, d) = (c.range_idx, c.doppler_idx);
            let v = matrix[(r, d)];
            let beats = |rr: usize, dd: usize| dominates(v, (r, d), matrix[(rr, dd)], (rr, dd));

            if r > 0 && !beats(r - 1, d) {
                return false;
            }
            if r + 1 < n_range && !beats(r + 1, d) {
                return false;
            }
            if n_dop < 2 {
                return true;
            }

            let at = |offset: isize| (d as isize + offset).rem_euclid(n_dop as isize) as usize;
            let (prev, next) = (beats(r, at(-1)), beats(r, at(1)));
            if reserve_neighbor {
                (prev && next) || (prev && beats(r, at(2))) || (beats(r, at(-2)) && next)
            } else {
                prev && next
            }
        })
        .collect()
}

/// Collapse runs of circularly adjacent Doppler bins in one range bin to
/// their dominating member.
pub fn group_along_doppler(
    mut candidates: Vec<DetectionCandidate>,
    n_dop: usize,
) -> Vec<DetectionCandidate> {
    candidates.sort_by_key(|c| (c.range_idx, c.doppler_idx));
    let mut out = Vec::with_capacity(candidates.len());

    let mut start = 0;
    while start < candidates.len() {
        let r = candidates[start].range_idx;
        let mut end = start;
        while end < candidates.len() && candidates[end].range_idx == r {
            end += 1;
        }
        out.extend(group_row(&candidates[start..end], n_dop));
        start = end;
    }
    out.sort_by_key(|c| (c.range_idx, c.doppler_idx));
    out
}

/// Group one range bin; `row` is sorted by Doppler index.
fn group_row(row: &[DetectionCandidate], n_dop: usize) -> Vec<DetectionCandidate> {
    let mut runs: Vec<Vec<&DetectionCandidate>> = Vec::new();
    for c in row {
        match runs.last_mut() {
            Some(run) if run.last().is_some_and(|p| p.doppler_idx + 1 == c.doppler_idx) => {
                run.push(c)
            }
            _ => runs.push(vec![c]),
        }
    }
    // join the run ending at the last bin with the run starting at bin 0
    if runs.len() > 1 {
        let first_starts_at_zero = runs[0][0].doppler_idx == 0;
        let last_ends_at_top = runs
            .last()
            .and_then(|run| run.last())
            .is_some_and(|c| c.doppler_idx + 1 == n_dop);
        if first_starts_at_zero && last_ends_at_top {
            if let Some(tail) = runs.pop() {
                runs[0].extend(tail);
            }
        }
    }

    runs.into_iter()
        .filter_map(|run| {
            run.into_iter()
                .reduce(|best, c| {
                    if dominates(
                        c.peak_value,
                        (c.range_idx, c.doppler_idx),
                        best.peak_value,
                        (best.range_idx, best.doppler_idx),
                    ) {
                        c
                    } else {
                        best
                    }
                })
                .cloned()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
