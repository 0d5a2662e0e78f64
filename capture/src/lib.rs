//! `capture` — capture-card link: packets, frame reassembly, control
//! commands and the acquisition thread.
//!
//! # Module layout
//! - [`packet`]      — Data datagram header and payload
//! - [`transport`]   — Packet sources and the frame assembler
//! - [`control`]     — Control command framing and UDP client
//! - [`acquisition`] — Producer thread, bounded queue, detection consumer
//! - [`sim`]         — Synthetic packet stream with loss and reordering

pub mod acquisition;
pub mod control;
pub mod error;
pub mod packet;
pub mod sim;
pub mod transport;

pub use acquisition::{
    Acquisition, AcquisitionConfig, AcquisitionHandle, CycleOutput, FrameMessage, LinkStatus,
    StopReason,
};
pub use control::{CommandCode, ControlClient, ControlCommand, ControlResponse};
pub use error::CaptureError;
pub use packet::Packet;
pub use sim::{SimTarget, SimulatedSource, StreamSimConfig, StreamSimulator};
pub use transport::{
    AssembledFrame, FrameAssembler, FrameStats, PacketSource, ScriptedSource, UdpPacketSource,
};
