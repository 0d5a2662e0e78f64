//! Pipeline orchestrator: one full detection cycle for one radar cube.
//!
//! # Processing steps per frame
//! 1. Range FFT + Doppler FFT (with clutter removal)
//! 2. Presence check on the first chirp's range profile
//! 3. 2D CFAR, peak pruning, Doppler grouping, range-bucket pruning
//! 4. Coarse + MVDR angle estimation per candidate
//! 5. Density clustering over (x, y, z, velocity)
//! 6. Collect debug counts and timings
//!
//! Every stage is a pure function of the cube; the pipeline holds only
//! configuration and precomputed FFT plans, so `process` takes `&self`.

use std::time::Instant;

use sensor_models::{ArrayGeometry, PresenceParams, RadarConfig};

use crate::{
    aoa::AngleEstimator,
    clustering::Clusterer,
    decoder::FrameDecoder,
    detector::Detector,
    error::Result,
    presence::detect_presence_with,
    range_doppler::{range_axis, RangeDopplerProcessor},
    types::{Cluster, DetectionCandidate, PresenceResult, RadarCube},
};

// ---------------------------------------------------------------------------
// Debug Data
// ---------------------------------------------------------------------------

/// Intermediate counts and timings of one cycle.
#[derive(Clone, Debug, Default)]
pub struct PipelineDebugData {
    /// Cells passing both CFAR axes
    pub cfar_hits: usize,
    /// Survivors of peak pruning
    pub after_peak_pruning: usize,
    /// Survivors of Doppler grouping
    pub after_grouping: usize,
    /// Candidates with a beamformer estimate
    pub refined: usize,
    /// Candidates left at the coarse estimate
    pub degenerate: usize,
    /// Timings in microseconds
    pub timing_range_doppler_us: u64,
    pub timing_detect_us: u64,
    pub timing_aoa_us: u64,
    pub timing_cluster_us: u64,
}

/// Outputs of one pipeline cycle.
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub clusters: Vec<Cluster>,
    pub presence: PresenceResult,
    /// Final candidates with locations filled in
    pub candidates: Vec<DetectionCandidate>,
    pub debug: PipelineDebugData,
    /// Wall-clock time of processing
    pub total_time_us: u64,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The detection pipeline for one radar configuration.
#[derive(Debug)]
pub struct Pipeline {
    pub config: RadarConfig,
    decoder: FrameDecoder,
    range_doppler: RangeDopplerProcessor,
    detector: Detector,
    estimator: AngleEstimator,
    clusterer: Clusterer,
    presence: PresenceParams,
    range_axis: Vec<f64>,
}

impl Pipeline {
    /// Build a pipeline; rejects inconsistent configurations and lane layouts.
    pub fn new(config: RadarConfig) -> Result<Self> {
        config.validate()?;
        let decoder = FrameDecoder::new(&config)?;
        let range_res = config.range_resolution();
        let geometry = ArrayGeometry::for_topology(config.num_tx, config.num_rx);
        Ok(Self {
            decoder,
            range_doppler: RangeDopplerProcessor::new(&config),
            detector: Detector::new(config.detection.clone(), range_res),
            estimator: AngleEstimator::new(geometry, config.aoa.clone(), range_res),
            clusterer: Clusterer::new(
                config.cluster.clone(),
                config.doppler_resolution(),
                config.num_doppler_bins(),
            ),
            presence: config.presence.clone(),
            range_axis: range_axis(&config),
            config,
        })
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    pub fn range_axis(&self) -> &[f64] {
        &self.range_axis
    }

    /// Decode a raw frame and process it.
    pub fn process_raw(&self, raw: &[i16]) -> Result<PipelineOutput> {
        let cube = self.decoder.decode(raw)?;
        self.process(&cube)
    }

    /// Process one radar cube. Returns full pipeline output.
    pub fn process(&self, cube: &RadarCube) -> Result<PipelineOutput> {
        let start_total = Instant::now();
        let mut debug = PipelineDebugData::default();

        // ----------------------------------------------------------------
        // Step 1: Range + Doppler compression
        // ----------------------------------------------------------------
        let t0 = Instant::now();
        let rd = self.range_doppler.process(cube)?;
        debug.timing_range_doppler_us = t0.elapsed().as_micros() as u64;

        // ----------------------------------------------------------------
        // Step 2: Presence on the range profile
        // ----------------------------------------------------------------
        let presence = detect_presence_with(&rd.range_profile_db, &self.range_axis, &self.presence)?;

        // ----------------------------------------------------------------
        // Step 3: Detection
        // ----------------------------------------------------------------
        let t0 = Instant::now();
        let (mut candidates, counts) = self.detector.detect_with_counts(&rd.doppler);
        debug.cfar_hits = counts.cfar;
        debug.after_peak_pruning = counts.peaks;
        debug.after_grouping = counts.grouped;
        debug.timing_detect_us = t0.elapsed().as_micros() as u64;

        // ----------------------------------------------------------------
        // Step 4: Angle / position
        // ----------------------------------------------------------------
        let t0 = Instant::now();
        let aoa_stats = self.estimator.estimate(&mut candidates, &rd.aoa)?;
        debug.refined = aoa_stats.refined;
        debug.degenerate = aoa_stats.degenerate;
        debug.timing_aoa_us = t0.elapsed().as_micros() as u64;

        // ----------------------------------------------------------------
        // Step 5: Clustering
        // ----------------------------------------------------------------
        let t0 = Instant::now();
        let clusters = self.clusterer.cluster(&candidates);
        debug.timing_cluster_us = t0.elapsed().as_micros() as u64;

        let total_time_us = start_total.elapsed().as_micros() as u64;
        tracing::debug!(
            candidates = candidates.len(),
            clusters = clusters.len(),
            presence = presence.detected,
            total_time_us,
            "pipeline cycle"
        );

        Ok(PipelineOutput {
            clusters,
            presence,
            candidates,
            debug,
            total_time_us,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectError;
    use rustfft::num_complex::Complex64;
    use sensor_models::antenna::direction_cosines;
    use sensor_models::CfarParams;

    fn small_config() -> RadarConfig {
        let mut cfg = RadarConfig::with_dimensions(64, 4, 2, 32);
        let cfar = CfarParams {
            guard_len: 2,
            noise_len: 6,
            l_bound: 1.1,
        };
        cfg.detection.range_cfar = cfar;
        cfg.detection.doppler_cfar = cfar;
        cfg.detection.range_buckets.clear();
        cfg.presence.min_range_m = 0.0;
        cfg.presence.max_range_m = 10.0;
        cfg.presence.threshold_db = 60.0;
        cfg.cluster.min_samples = 1;
        cfg
    }

    /// Point target at an exact range / Doppler bin and azimuth, plus
    /// a deterministic low-level background.
    fn target_cube(cfg: &RadarConfig, range_bin: f64, doppler_bin: f64, az_deg: f64) -> RadarCube {
        let geometry = ArrayGeometry::for_topology(cfg.num_tx, cfg.num_rx);
        let (u, w) = direction_cosines(az_deg.to_radians(), 0.0);
        let phases = geometry.steering_phases(u, w);
        let (samples, loops) = (cfg.num_adc_samples as f64, cfg.num_loops_per_frame as f64);
        let mut cube = RadarCube::zeros(cfg.chirps_per_frame(), cfg.num_rx, cfg.num_adc_samples);
        for c in 0..cfg.chirps_per_frame() {
            let (l, t) = (c / cfg.num_tx, c % cfg.num_tx);
            for r in 0..cfg.num_rx {
                let va = t * cfg.num_rx + r;
                for s in 0..cfg.num_adc_samples {
                    let phase = std::f64::consts::TAU
                        * (range_bin * s as f64 / samples + doppler_bin * l as f64 / loops)
                        + phases[va];
                    let hash = ((c * 131 + r * 31 + s * 7) % 97) as f64 / 97.0;
                    let bg = Complex64::from_polar(2.0, std::f64::consts::TAU * hash);
                    cube.set(c, r, s, Complex64::from_polar(1000.0, phase) + bg);
                }
            }
        }
        cube
    }

    #[test]
    fn single_target_end_to_end() {
        let cfg = small_config();
        let range_res = cfg.range_resolution();
        let pipeline = Pipeline::new(cfg.clone()).unwrap();
        let out = pipeline.process(&target_cube(&cfg, 20.0, 6.0, 15.0)).unwrap();

        assert!(out.debug.cfar_hits >= 1);
        let best = out
            .candidates
            .iter()
            .find(|c| c.range_idx == 20 && c.doppler_idx == 6)
            .expect("target cell detected");
        assert!(best.refined);
        let range = (best.location.iter().map(|v| v * v).sum::<f64>()).sqrt();
        approx::assert_abs_diff_eq!(range, 20.0 * range_res, epsilon = 1e-6);
        assert!(best.location[0] > 0.0, "positive azimuth maps to +x");

        assert!(!out.clusters.is_empty());
        assert!(out.presence.detected);
    }

    #[test]
    fn process_is_idempotent() {
        let cfg = small_config();
        let pipeline = Pipeline::new(cfg.clone()).unwrap();
        let cube = target_cube(&cfg, 12.0, 3.0, -10.0);
        let a = pipeline.process(&cube).unwrap();
        let b = pipeline.process(&cube).unwrap();
        assert_eq!(a.candidates, b.candidates);
        assert_eq!(a.clusters, b.clusters);
        assert_eq!(a.presence, b.presence);
    }

    #[test]
    fn rejects_bad_topology_and_shape() {
        let cfg = RadarConfig {
            num_lvds_lanes: 4,
            ..small_config()
        };
        assert!(matches!(
            Pipeline::new(cfg),
            Err(DetectError::UnsupportedTopology { lanes: 4 })
        ));

        let pipeline = Pipeline::new(small_config()).unwrap();
        let wrong = RadarCube::zeros(8, 4, 64);
        assert!(matches!(
            pipeline.process(&wrong),
            Err(DetectError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            pipeline.process_raw(&[0i16; 10]),
            Err(DetectError::ShapeMismatch { .. })
        ));
    }
}
