//! `sensor_models` — mmWave front-end configuration and virtual array geometry.

pub mod antenna;
pub mod radar;

pub use antenna::{ArrayGeometry, VirtualElement};
pub use radar::{
    AoaParams, CfarParams, ClusterParams, ConfigIssue, DetectionParams, PresenceParams,
    RadarConfig, RangeBucket,
};
