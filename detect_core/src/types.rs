//! Fundamental data types flowing between the detection stages.

use nalgebra::DMatrix;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{DetectError, Result};

/// Real (range bins × Doppler bins) power matrix.
pub type DopplerMatrix = DMatrix<f64>;

// ---------------------------------------------------------------------------
// RadarCube
// ---------------------------------------------------------------------------

/// Complex samples shaped (chirps, rx, samples), row-major:
/// element `(c, r, s)` lives at `(c · rx + r) · samples + s`.
#[derive(Clone, Debug, PartialEq)]
pub struct RadarCube {
    chirps: usize,
    rx: usize,
    samples: usize,
    data: Vec<Complex64>,
}

impl RadarCube {
    pub fn zeros(chirps: usize, rx: usize, samples: usize) -> Self {
        Self {
            chirps,
            rx,
            samples,
            data: vec![Complex64::new(0.0, 0.0); chirps * rx * samples],
        }
    }

    /// Wrap a flat buffer; its length must equal `chirps · rx · samples`.
    pub fn from_vec(
        chirps: usize,
        rx: usize,
        samples: usize,
        data: Vec<Complex64>,
    ) -> Result<Self> {
        if data.len() != chirps * rx * samples {
            return Err(DetectError::ShapeMismatch {
                stage: "radar cube",
                expected: vec![chirps * rx * samples],
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            chirps,
            rx,
            samples,
            data,
        })
    }

    /// (chirps, rx, samples)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.chirps, self.rx, self.samples)
    }

    #[inline]
    pub fn index(&self, chirp: usize, rx: usize, sample: usize) -> usize {
        (chirp * self.rx + rx) * self.samples + sample
    }

    #[inline]
    pub fn get(&self, chirp: usize, rx: usize, sample: usize) -> Complex64 {
        self.data[self.index(chirp, rx, sample)]
    }

    #[inline]
    pub fn set(&mut self, chirp: usize, rx: usize, sample: usize, value: Complex64) {
        let i = self.index(chirp, rx, sample);
        self.data[i] = value;
    }

    /// Samples of one (chirp, rx) row.
    pub fn row(&self, chirp: usize, rx: usize) -> &[Complex64] {
        let start = self.index(chirp, rx, 0);
        &self.data[start..start + self.samples]
    }

    pub fn as_slice(&self) -> &[Complex64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Complex64] {
        &mut self.data
    }
}

// ---------------------------------------------------------------------------
// AoaInput
// ---------------------------------------------------------------------------

/// Complex Doppler spectra per virtual antenna, shaped
/// (range bins, virtual antennas, Doppler bins):
/// element `(k, v, d)` lives at `(k · antennas + v) · doppler_bins + d`.
#[derive(Clone, Debug, PartialEq)]
pub struct AoaInput {
    range_bins: usize,
    antennas: usize,
    doppler_bins: usize,
    data: Vec<Complex64>,
}

impl AoaInput {
    pub fn zeros(range_bins: usize, antennas: usize, doppler_bins: usize) -> Self {
        Self {
            range_bins,
            antennas,
            doppler_bins,
            data: vec![Complex64::new(0.0, 0.0); range_bins * antennas * doppler_bins],
        }
    }

    /// (range bins, virtual antennas, Doppler bins)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.range_bins, self.antennas, self.doppler_bins)
    }

    #[inline]
    pub fn get(&self, range: usize, antenna: usize, doppler: usize) -> Complex64 {
        self.data[(range * self.antennas + antenna) * self.doppler_bins + doppler]
    }

    #[inline]
    pub fn set(&mut self, range: usize, antenna: usize, doppler: usize, value: Complex64) {
        let i = (range * self.antennas + antenna) * self.doppler_bins + doppler;
        self.data[i] = value;
    }

    /// Per-antenna samples at one (range, Doppler) cell.
    pub fn snapshot(&self, range: usize, doppler: usize) -> Vec<Complex64> {
        (0..self.antennas)
            .map(|v| self.get(range, v, doppler))
            .collect()
    }

    /// All data belonging to one range bin: `antennas × doppler_bins`, row-major.
    pub fn range_slice(&self, range: usize) -> &[Complex64] {
        let n = self.antennas * self.doppler_bins;
        &self.data[range * n..(range + 1) * n]
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Complex64] {
        &mut self.data
    }
}

// ---------------------------------------------------------------------------
// Detection outputs
// ---------------------------------------------------------------------------

/// One (range, Doppler) cell that survived detection and pruning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionCandidate {
    pub range_idx: usize,
    pub doppler_idx: usize,
    pub peak_value: f64,
    /// Peak value minus the range-axis noise floor
    pub snr: f64,
    /// Best position estimate (m); refined when `refined` is set
    pub location: [f64; 3],
    /// Direct FFT triangulation (m)
    pub coarse_location: [f64; 3],
    /// Beamformer azimuth (rad), set only when refined
    pub azimuth: Option<f64>,
    /// Beamformer elevation (rad), set only when refined
    pub elevation: Option<f64>,
    pub refined: bool,
}

impl DetectionCandidate {
    pub fn new(range_idx: usize, doppler_idx: usize, peak_value: f64, snr: f64) -> Self {
        Self {
            range_idx,
            doppler_idx,
            peak_value,
            snr,
            location: [0.0; 3],
            coarse_location: [0.0; 3],
            azimuth: None,
            elevation: None,
            refined: false,
        }
    }

    /// Doppler index mapped to a signed bin (FFT bins above N/2 are negative).
    pub fn signed_doppler(&self, doppler_bins: usize) -> i64 {
        signed_bin(self.doppler_idx, doppler_bins)
    }
}

/// Map an unshifted FFT bin to its signed frequency index.
pub fn signed_bin(bin: usize, n: usize) -> i64 {
    if bin < n.div_ceil(2) {
        bin as i64
    } else {
        bin as i64 - n as i64
    }
}

/// A group of detections reported as one object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Mean position of the members (m)
    pub centroid: [f64; 3],
    pub member_count: usize,
    /// Mean radial velocity of the members (m/s)
    pub average_doppler: f64,
    pub peak_snr: f64,
}

impl Cluster {
    /// Distance of the centroid from the sensor (m).
    pub fn range(&self) -> f64 {
        let [x, y, z] = self.centroid;
        (x * x + y * y + z * z).sqrt()
    }
}

/// Output of the range-window presence check.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceResult {
    pub detected: bool,
    pub distance: Option<f64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
