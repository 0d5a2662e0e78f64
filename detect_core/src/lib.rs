//! `detect_core` — FMCW radar detection chain, from raw frame to objects.
//!
//! # Module layout
//! - [`types`]         — Radar cube, Doppler matrix, AoA tensor, detections, clusters
//! - [`decoder`]       — Two-lane LVDS de-interleave into a complex cube
//! - [`range_doppler`] — Windowed range FFT, clutter removal, Doppler FFT
//! - [`cfar`]          — Cell-averaging CFAR along one axis
//! - [`detector`]      — 2D CFAR, peak pruning, Doppler grouping, range buckets
//! - [`aoa`]           — FFT triangulation and MVDR beamforming
//! - [`clustering`]    — DBSCAN over position and velocity
//! - [`presence`]      — Range-window threshold on the range profile
//! - [`pipeline`]      — Full detection cycle orchestrator

pub mod aoa;
pub mod cfar;
pub mod clustering;
pub mod decoder;
pub mod detector;
pub mod error;
pub mod pipeline;
pub mod presence;
pub mod range_doppler;
pub mod types;

pub use decoder::{decode, CubeDims, FrameDecoder, LaneLayout};
pub use detector::Detector;
pub use error::DetectError;
pub use pipeline::{Pipeline, PipelineDebugData, PipelineOutput};
pub use presence::detect_presence;
pub use types::{
    AoaInput, Cluster, DetectionCandidate, DopplerMatrix, PresenceResult, RadarCube,
};
