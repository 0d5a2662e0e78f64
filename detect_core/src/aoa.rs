//! Angle-of-arrival and position estimation.
//!
//! # Coarse estimate
//! Zero-padded FFT over the azimuth row; the peak bin `k` gives
//! `u = 2k / N`. With an elevated row, the phase between the elevation and
//! azimuth spectra at that bin gives `w`. `y = sqrt(1 − u² − w²)`, with
//! `(u, w)` renormalised when that would go negative.
//!
//! # Refined estimate (MVDR / Capon)
//! The covariance `R` is built from every Doppler bin of the candidate's
//! range bin, diagonally loaded. The candidate snapshot `x` is scanned over
//! an azimuth × elevation grid with the MVDR output power
//! `|aᴴ R⁻¹ x|² / (aᴴ R⁻¹ a)²`, and the peak direction is converted to
//! Cartesian at the candidate range. If `x` carries no energy or `R` is not
//! positive-definite the candidate is degenerate and keeps the coarse estimate.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use sensor_models::antenna::{direction_cosines, to_cartesian, ELEVATION_ROW_OFFSET};
use sensor_models::{AoaParams, ArrayGeometry};

use crate::error::{DetectError, Result};
use crate::types::{AoaInput, DetectionCandidate};

/// One direction of the beamformer scan grid.
struct ScanPoint {
    azimuth: f64,
    elevation: f64,
    steering: DVector<Complex64>,
}

/// Outcome counts of one [`AngleEstimator::estimate`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AoaStats {
    pub refined: usize,
    pub degenerate: usize,
}

pub struct AngleEstimator {
    geometry: ArrayGeometry,
    params: AoaParams,
    range_resolution: f64,
    fft: Arc<dyn Fft<f64>>,
    scan: Vec<ScanPoint>,
}

impl std::fmt::Debug for AngleEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AngleEstimator")
            .field("antennas", &self.geometry.len())
            .field("fft_size", &self.params.fft_size)
            .field("scan_points", &self.scan.len())
            .finish()
    }
}

impl AngleEstimator {
    pub fn new(geometry: ArrayGeometry, params: AoaParams, range_resolution: f64) -> Self {
        let fft_size = params.fft_size.max(geometry.azimuth_len()).max(1);
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let scan = build_scan(&geometry, &params);
        Self {
            geometry,
            params: AoaParams { fft_size, ..params },
            range_resolution,
            fft,
            scan,
        }
    }

    /// Fill `location` (and the coarse/refined fields) of every candidate.
    pub fn estimate(&self, candidates: &mut [DetectionCandidate], aoa: &AoaInput) -> Result<AoaStats> {
        let (n_range, n_va, n_dop) = aoa.shape();
        if n_va != self.geometry.len() {
            return Err(DetectError::ShapeMismatch {
                stage: "aoa antennas",
                expected: vec![self.geometry.len()],
                actual: vec![n_va],
            });
        }
        if let Some(c) = candidates
            .iter()
            .find(|c| c.range_idx >= n_range || c.doppler_idx >= n_dop)
        {
            return Err(DetectError::ShapeMismatch {
                stage: "aoa candidate",
                expected: vec![n_range, n_dop],
                actual: vec![c.range_idx, c.doppler_idx],
            });
        }

        candidates.par_iter_mut().for_each(|c| {
            let range = c.range_idx as f64 * self.range_resolution;
            let snapshot = aoa.snapshot(c.range_idx, c.doppler_idx);
            let [u, y, w] = self.coarse_direction(&snapshot);
            c.coarse_location = [range * u, range * y, range * w];
            c.location = c.coarse_location;
            c.refined = false;
            c.azimuth = None;
            c.elevation = None;

            if let Some((az, el)) = self.capon_direction(aoa, c.range_idx, &snapshot) {
                c.location = to_cartesian(range, az, el);
                c.azimuth = Some(az);
                c.elevation = Some(el);
                c.refined = true;
            }
        });

        let refined = candidates.iter().filter(|c| c.refined).count();
        let stats = AoaStats {
            refined,
            degenerate: candidates.len() - refined,
        };
        if stats.degenerate > 0 {
            tracing::debug!(degenerate = stats.degenerate, "kept coarse angle estimates");
        }
        Ok(stats)
    }

    /// Direction cosines `[u, y, w]` from the FFT triangulation.
    pub fn coarse_direction(&self, snapshot: &[Complex64]) -> [f64; 3] {
        let n = self.params.fft_size;
        let az_len = self.geometry.azimuth_len().min(snapshot.len());

        let mut az = vec![Complex64::new(0.0, 0.0); n];
        az[..az_len].copy_from_slice(&snapshot[..az_len]);
        self.fft.process(&mut az);

        let k_max = az
            .iter()
            .enumerate()
            .fold(0, |best, (i, v)| if v.norm() > az[best].norm() { i } else { best });
        let k = if k_max + 1 > n / 2 { k_max as f64 - n as f64 } else { k_max as f64 };
        let wx = std::f64::consts::TAU * k / n as f64;
        let mut u = wx / std::f64::consts::PI;

        let mut w = 0.0;
        let el_range = self.geometry.elevation_range();
        if !el_range.is_empty() && el_range.end <= snapshot.len() {
            let mut el = vec![Complex64::new(0.0, 0.0); n];
            el[..el_range.len()].copy_from_slice(&snapshot[el_range.clone()]);
            self.fft.process(&mut el);
            let shift = Complex64::from_polar(1.0, -ELEVATION_ROW_OFFSET * wx);
            let wz = (el[k_max] * az[k_max].conj() * shift).arg();
            w = wz / std::f64::consts::PI;
        }

        let mut y2 = 1.0 - u * u - w * w;
        if y2 < 0.0 {
            let norm = (u * u + w * w).sqrt();
            u /= norm;
            w /= norm;
            y2 = 0.0;
        }
        [u, y2.sqrt(), w]
    }

    /// Peak (azimuth, elevation) of the MVDR scan, `None` when degenerate.
    pub fn capon_direction(
        &self,
        aoa: &AoaInput,
        range_idx: usize,
        snapshot: &[Complex64],
    ) -> Option<(f64, f64)> {
        let (_, n_va, n_dop) = aoa.shape();
        if snapshot.iter().all(|x| x.norm_sqr() == 0.0) || n_dop == 0 {
            return None;
        }

        let x = DMatrix::from_row_slice(n_va, n_dop, aoa.range_slice(range_idx));
        let mut r = &x * x.adjoint() / Complex64::new(n_dop as f64, 0.0);
        let trace: f64 = (0..n_va).map(|i| r[(i, i)].re).sum();
        if trace.is_nan() || trace <= 0.0 {
            return None;
        }
        let loading = self.params.diagonal_loading * trace / n_va as f64;
        for i in 0..n_va {
            r[(i, i)] += Complex64::new(loading, 0.0);
        }
        let chol = r.cholesky()?;

        let snap = DVector::from_column_slice(snapshot);
        let r_inv_x = chol.solve(&snap);

        let mut best: Option<(f64, &ScanPoint)> = None;
        for p in &self.scan {
            let r_inv_a = chol.solve(&p.steering);
            let denom = p.steering.dotc(&r_inv_a).re;
            if denom.is_nan() || denom <= 0.0 {
                continue;
            }
            let power = p.steering.dotc(&r_inv_x).norm_sqr() / (denom * denom);
            if best.map_or(true, |(bp, _)| power > bp) {
                best = Some((power, p));
            }
        }
        best.map(|(_, p)| (p.azimuth, p.elevation))
    }
}

fn build_scan(geometry: &ArrayGeometry, params: &AoaParams) -> Vec<ScanPoint> {
    let azimuths = grid(params.azimuth_span_deg, params.azimuth_step_deg);
    let elevations = if geometry.has_elevation() {
        grid(params.elevation_span_deg, params.elevation_step_deg)
    } else {
        vec![0.0]
    };

    let mut scan = Vec::with_capacity(azimuths.len() * elevations.len());
    for &el in &elevations {
        for &az in &azimuths {
            let (u, w) = direction_cosines(az, el);
            let steering = DVector::from_iterator(
                geometry.len(),
                geometry
                    .steering_phases(u, w)
                    .into_iter()
                    .map(|ph| Complex64::from_polar(1.0, ph)),
            );
            scan.push(ScanPoint {
                azimuth: az,
                elevation: el,
                steering,
            });
        }
    }
    scan
}

/// Symmetric grid `[-span, span]` in radians, stepped in degrees.
fn grid(span_deg: f64, step_deg: f64) -> Vec<f64> {
    if step_deg.is_nan() || span_deg.is_nan() || step_deg <= 0.0 || span_deg <= 0.0 {
        return vec![0.0];
    }
    let steps = (span_deg / step_deg).floor() as i64;
    (-steps..=steps)
        .map(|i| (i as f64 * step_deg).to_radians())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const N_DOP: usize = 16;

    /// Single source at (az, el) in every Doppler bin of `range`, with a
    /// weak deterministic second component so R is well conditioned.
    fn source_input(geometry: &ArrayGeometry, range: usize, az_deg: f64, el_deg: f64) -> AoaInput {
        let mut aoa = AoaInput::zeros(16, geometry.len(), N_DOP);
        let (u, w) = direction_cosines(az_deg.to_radians(), el_deg.to_radians());
        let phases = geometry.steering_phases(u, w);
        for d in 0..N_DOP {
            let s = Complex64::from_polar(100.0, 0.7 * d as f64);
            for (v, ph) in phases.iter().enumerate() {
                let jitter = Complex64::from_polar(1.0, 1.3 * (v * 7 + d * 3) as f64);
                aoa.set(range, v, d, s * Complex64::from_polar(1.0, *ph) + jitter);
            }
        }
        aoa
    }

    fn estimator(num_tx: usize) -> AngleEstimator {
        AngleEstimator::new(
            ArrayGeometry::for_topology(num_tx, 4),
            AoaParams::default(),
            0.1,
        )
    }

    #[test]
    fn coarse_azimuth_from_fft_peak() {
        let est = estimator(2);
        let aoa = source_input(&est.geometry, 10, 20.0, 0.0);
        let [u, y, w] = est.coarse_direction(&aoa.snapshot(10, 3));
        assert_abs_diff_eq!(u, 20f64.to_radians().sin(), epsilon = 2.0 / 64.0);
        assert_abs_diff_eq!(w, 0.0);
        assert_abs_diff_eq!(u * u + y * y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn capon_refines_azimuth() {
        let est = estimator(2);
        let aoa = source_input(&est.geometry, 10, -25.0, 0.0);
        let mut cands = vec![DetectionCandidate::new(10, 3, 1.0, 1.0)];
        let stats = est.estimate(&mut cands, &aoa).unwrap();
        assert_eq!(stats, AoaStats { refined: 1, degenerate: 0 });
        let c = &cands[0];
        assert!(c.refined);
        assert_abs_diff_eq!(c.azimuth.unwrap().to_degrees(), -25.0, epsilon = 1.5);
        let range = 10.0 * 0.1;
        assert_abs_diff_eq!(c.location[0], range * (-25f64).to_radians().sin(), epsilon = 0.04);
        assert!(c.location[1] > 0.0);
    }

    #[test]
    fn elevation_row_resolves_height() {
        let est = estimator(3);
        let aoa = source_input(&est.geometry, 10, 10.0, 14.0);
        let [_, _, w] = est.coarse_direction(&aoa.snapshot(10, 3));
        assert_abs_diff_eq!(w, 14f64.to_radians().sin(), epsilon = 0.1);

        let mut cands = vec![DetectionCandidate::new(10, 3, 1.0, 1.0)];
        est.estimate(&mut cands, &aoa).unwrap();
        assert_abs_diff_eq!(cands[0].elevation.unwrap().to_degrees(), 14.0, epsilon = 2.5);
        assert!(cands[0].location[2] > 0.0);
    }

    #[test]
    fn degenerate_snapshot_keeps_coarse() {
        let est = estimator(2);
        let aoa = source_input(&est.geometry, 10, 20.0, 0.0);
        let mut cands = vec![
            DetectionCandidate::new(4, 2, 1.0, 1.0),
            DetectionCandidate::new(10, 3, 1.0, 1.0),
        ];
        let stats = est.estimate(&mut cands, &aoa).unwrap();
        assert_eq!(stats.degenerate, 1);
        // order preserved, empty range bin stays coarse
        assert_eq!(cands[0].range_idx, 4);
        assert!(!cands[0].refined);
        assert_eq!(cands[0].location, cands[0].coarse_location);
        assert!(cands[1].refined);
    }

    #[test]
    fn wrong_antenna_count_is_shape_error() {
        let est = estimator(2);
        let aoa = AoaInput::zeros(16, 4, N_DOP);
        let mut cands = vec![DetectionCandidate::new(1, 1, 1.0, 1.0)];
        assert!(matches!(
            est.estimate(&mut cands, &aoa),
            Err(DetectError::ShapeMismatch { .. })
        ));
    }
}
