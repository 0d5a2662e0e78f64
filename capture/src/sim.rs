//! Synthetic capture stream.
//!
//! Renders point targets into a raw frame the way the radar front end would
//! (beat tone per range, phase ramp across loops per velocity, steering
//! phase per virtual antenna), encodes it to the LVDS word stream, and cuts
//! it into data packets with sequence numbers and byte counters.
//! Packet loss and reordering are drawn from a seeded RNG.

use std::collections::VecDeque;
use std::time::Duration;

use detect_core::{FrameDecoder, RadarCube};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rustfft::num_complex::Complex64;
use sensor_models::antenna::direction_cosines;
use sensor_models::{ArrayGeometry, RadarConfig};
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::packet::Packet;
use crate::transport::PacketSource;

/// Point reflector seen by the simulated front end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimTarget {
    pub range_m: f64,
    /// Radial velocity (m/s), positive away from the sensor
    pub velocity_mps: f64,
    pub azimuth_deg: f64,
    #[serde(default)]
    pub elevation_deg: f64,
    /// Peak ADC amplitude in counts
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
}

fn default_amplitude() -> f64 {
    1000.0
}

impl SimTarget {
    pub fn new(range_m: f64, velocity_mps: f64, azimuth_deg: f64) -> Self {
        Self {
            range_m,
            velocity_mps,
            azimuth_deg,
            elevation_deg: 0.0,
            amplitude: default_amplitude(),
        }
    }
}

/// Link impairments and receiver noise.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSimConfig {
    /// Uniform noise half-width in ADC counts (I and Q independently)
    pub noise_amplitude: f64,
    /// Probability that a packet never arrives
    pub loss_probability: f64,
    /// Probability that a packet swaps places with its successor
    pub reorder_probability: f64,
}

impl Default for StreamSimConfig {
    fn default() -> Self {
        Self {
            noise_amplitude: 4.0,
            loss_probability: 0.0,
            reorder_probability: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// StreamSimulator
// ---------------------------------------------------------------------------

pub struct StreamSimulator {
    config: RadarConfig,
    pub impairments: StreamSimConfig,
    encoder: FrameDecoder,
    geometry: ArrayGeometry,
    rng: ChaCha8Rng,
    frame_index: u64,
}

impl StreamSimulator {
    pub fn new(config: RadarConfig, impairments: StreamSimConfig, seed: u64) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CaptureError::Decode(e.into()))?;
        let encoder = FrameDecoder::new(&config)?;
        let geometry = ArrayGeometry::for_topology(config.num_tx, config.num_rx);
        Ok(Self {
            config,
            impairments,
            encoder,
            geometry,
            rng: ChaCha8Rng::seed_from_u64(seed),
            frame_index: 0,
        })
    }

    pub fn config(&self) -> &RadarConfig {
        &self.config
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_index
    }

    /// Complex cube for one frame of the given targets plus receiver noise.
    pub fn render_cube(&mut self, targets: &[SimTarget]) -> RadarCube {
        let cfg = &self.config;
        let (chirps, rx, samples) = (cfg.chirps_per_frame(), cfg.num_rx, cfg.num_adc_samples);
        let (range_res, doppler_res) = (cfg.range_resolution(), cfg.doppler_resolution());
        let loops = cfg.num_loops_per_frame as f64;
        let mut cube = RadarCube::zeros(chirps, rx, samples);

        for target in targets {
            let range_bin = target.range_m / range_res;
            let doppler_bin = target.velocity_mps / doppler_res;
            let (u, w) = direction_cosines(
                target.azimuth_deg.to_radians(),
                target.elevation_deg.to_radians(),
            );
            let steering = self.geometry.steering_phases(u, w);

            for c in 0..chirps {
                let (l, t) = (c / cfg.num_tx, c % cfg.num_tx);
                let slow = std::f64::consts::TAU * doppler_bin * l as f64 / loops;
                for r in 0..rx {
                    let spatial = steering[t * rx + r];
                    for s in 0..samples {
                        let fast = std::f64::consts::TAU * range_bin * s as f64 / samples as f64;
                        let idx = cube.index(c, r, s);
                        cube.as_mut_slice()[idx] +=
                            Complex64::from_polar(target.amplitude, fast + slow + spatial);
                    }
                }
            }
        }

        let noise = self.impairments.noise_amplitude;
        if noise > 0.0 {
            for x in cube.as_mut_slice() {
                *x += Complex64::new(
                    self.rng.gen_range(-noise..=noise),
                    self.rng.gen_range(-noise..=noise),
                );
            }
        }
        cube
    }

    /// Raw LVDS words for one frame, `bytes_in_frame / 2` long.
    pub fn render_frame(&mut self, targets: &[SimTarget]) -> Result<Vec<i16>> {
        let cube = self.render_cube(targets);
        Ok(self.encoder.encode(&cube)?)
    }

    /// Cut a raw frame into the packets the card would send, then apply
    /// loss and reordering. Advances the frame counter.
    pub fn packetize(&mut self, words: &[i16]) -> Vec<Packet> {
        let ppf = self.config.packets_per_frame() as u64;
        let wpp = self.config.words_per_packet();
        let bip = self.config.bytes_in_packet as u64;
        let first = self.frame_index * ppf;
        self.frame_index += 1;

        let mut packets: Vec<Packet> = words
            .chunks_exact(wpp)
            .take(ppf as usize)
            .enumerate()
            .map(|(p, chunk)| {
                let n = first + p as u64;
                Packet {
                    seq: (n + 1) as u32,
                    byte_count: n * bip,
                    payload: chunk.to_vec(),
                }
            })
            .collect();

        let imp = &self.impairments;
        if imp.reorder_probability > 0.0 {
            for i in 0..packets.len().saturating_sub(1) {
                if self.rng.gen_bool(imp.reorder_probability.clamp(0.0, 1.0)) {
                    packets.swap(i, i + 1);
                }
            }
        }
        if imp.loss_probability > 0.0 {
            let p_loss = imp.loss_probability.clamp(0.0, 1.0);
            packets.retain(|_| !self.rng.gen_bool(p_loss));
        }
        packets
    }

    pub fn next_frame_packets(&mut self, targets: &[SimTarget]) -> Result<Vec<Packet>> {
        let words = self.render_frame(targets)?;
        Ok(self.packetize(&words))
    }
}

// ---------------------------------------------------------------------------
// SimulatedSource
// ---------------------------------------------------------------------------

/// Packet source backed by a [`StreamSimulator`]; closes after
/// `max_frames` frames when a limit is given.
pub struct SimulatedSource {
    sim: StreamSimulator,
    targets: Vec<SimTarget>,
    max_frames: Option<u64>,
    queue: VecDeque<Packet>,
}

impl SimulatedSource {
    pub fn new(sim: StreamSimulator, targets: Vec<SimTarget>, max_frames: Option<u64>) -> Self {
        Self {
            sim,
            targets,
            max_frames,
            queue: VecDeque::new(),
        }
    }
}

impl PacketSource for SimulatedSource {
    fn recv_packet(&mut self, _timeout: Duration) -> Result<Packet> {
        loop {
            if let Some(p) = self.queue.pop_front() {
                return Ok(p);
            }
            if self
                .max_frames
                .is_some_and(|max| self.sim.frames_generated() >= max)
            {
                return Err(CaptureError::Disconnected);
            }
            let packets = self.sim.next_frame_packets(&self.targets)?;
            if packets.is_empty() {
                return Err(CaptureError::Timeout);
            }
            self.queue.extend(packets);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FrameAssembler, ScriptedSource};
    use detect_core::Pipeline;
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
        cfg.cluster.min_samples = 1;
        cfg
    }

    #[test]
    fn packets_cover_clipped_frame() {
        let cfg = small_config();
        let mut sim = StreamSimulator::new(cfg.clone(), StreamSimConfig::default(), 7).unwrap();
        let p0 = sim.next_frame_packets(&[]).unwrap();
        let p1 = sim.next_frame_packets(&[]).unwrap();
        assert_eq!(p0.len(), cfg.packets_per_frame());
        assert_eq!(p0[0].seq, 1);
        assert_eq!(p0[0].byte_count, 0);
        assert_eq!(p1[0].byte_count, cfg.bytes_in_frame_clipped() as u64);
        assert!(p0.iter().all(|p| p.payload.len() == cfg.words_per_packet()));
    }

    #[test]
    fn lossless_stream_reassembles_exactly() {
        let cfg = small_config();
        let mut sim = StreamSimulator::new(cfg.clone(), StreamSimConfig::default(), 3).unwrap();
        let targets = [SimTarget::new(2.0, 1.0, 10.0)];
        let words = sim.render_frame(&targets).unwrap();
        let packets = sim.packetize(&words);

        let mut asm = FrameAssembler::new(ScriptedSource::new(packets), &cfg);
        let frame = asm.assemble_frame(Duration::from_millis(1)).unwrap();
        assert_eq!(frame.data.len(), cfg.bytes_in_frame / 2);
        assert_eq!(frame.stats.lost, 0);
        let clipped = cfg.bytes_in_frame_clipped() / 2;
        assert_eq!(frame.data[..clipped], words[..clipped]);
    }

    #[test]
    fn total_loss_drops_every_packet() {
        let cfg = small_config();
        let imp = StreamSimConfig {
            loss_probability: 1.0,
            ..Default::default()
        };
        let mut sim = StreamSimulator::new(cfg.clone(), imp, 1).unwrap();
        assert!(sim.next_frame_packets(&[]).unwrap().is_empty());

        let mut asm = FrameAssembler::new(ScriptedSource::default(), &cfg);
        let frame = asm.assemble_frame(Duration::from_millis(1)).unwrap();
        assert!(frame.data.iter().all(|w| *w == 0));
        assert_eq!(frame.stats.lost, frame.stats.packets_expected);
    }

    #[test]
    fn same_seed_same_stream() {
        let cfg = small_config();
        let imp = StreamSimConfig {
            loss_probability: 0.2,
            reorder_probability: 0.2,
            ..Default::default()
        };
        let targets = [SimTarget::new(1.5, -0.5, 0.0)];
        let mut a = StreamSimulator::new(cfg.clone(), imp.clone(), 42).unwrap();
        let mut b = StreamSimulator::new(cfg, imp, 42).unwrap();
        assert_eq!(
            a.next_frame_packets(&targets).unwrap(),
            b.next_frame_packets(&targets).unwrap()
        );
    }

    #[test]
    fn simulated_target_survives_full_chain() {
        let cfg = small_config();
        let range_bin = 20.0;
        let doppler_bin = 6.0;
        let target_range = range_bin * cfg.range_resolution();
        let target = SimTarget::new(
            target_range,
            doppler_bin * cfg.doppler_resolution(),
            15.0,
        );
        let sim = StreamSimulator::new(cfg.clone(), StreamSimConfig::default(), 11).unwrap();
        let source = SimulatedSource::new(sim, vec![target], Some(1));
        let mut asm = FrameAssembler::new(source, &cfg);
        let frame = asm.assemble_frame(Duration::from_millis(1)).unwrap();
        assert_eq!(frame.stats.lost, 0);

        let pipeline = Pipeline::new(cfg).unwrap();
        let out = pipeline.process_raw(&frame.data).unwrap();
        let hit = out
            .candidates
            .iter()
            .find(|c| c.range_idx == 20 && c.doppler_idx == 6)
            .expect("target cell detected");
        let range = hit.location.iter().map(|v| v * v).sum::<f64>().sqrt();
        approx::assert_abs_diff_eq!(range, target_range, epsilon = 1e-6);
        assert!(!out.clusters.is_empty());
    }
}
