//! Frame transport: packet sources and frame reassembly.
//!
//! # Reassembly rules
//! - A packet whose byte counter is a multiple of the clipped frame size
//!   starts a frame. Before the first such packet everything is discarded.
//! - A frame-start packet arriving while a frame is being collected closes
//!   that frame; the packet is carried over as the first of the next one.
//! - Every other packet goes to slot `(seq − 1) mod packets_per_frame`;
//!   a repeated slot is overwritten and counted as a duplicate.
//! - A payload that would run past the frame buffer is dropped and counted.
//! - A frame is emitted as soon as every slot is written, when the next
//!   frame starts, or when a read times out. Unwritten slots stay zero.
//! - After a frame closes with every slot written, packets are dropped and
//!   counted until the next frame-start packet, so late duplicates of the
//!   finished frame never open a frame of their own.

use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sensor_models::RadarConfig;

use crate::error::{CaptureError, Result};
use crate::packet::Packet;

// ---------------------------------------------------------------------------
// Packet sources
// ---------------------------------------------------------------------------

/// Anything that yields data packets with a bounded wait.
pub trait PacketSource: Send {
    /// Next packet, or [`CaptureError::Timeout`] when none arrives in time.
    fn recv_packet(&mut self, timeout: Duration) -> Result<Packet>;
}

/// Data socket of the capture card.
pub struct UdpPacketSource {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpPacketSource {
    pub fn bind(addr: SocketAddr, max_packet_size: usize) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|source| CaptureError::Bind { addr, source })?;
        tracing::info!(%addr, "data socket bound");
        Ok(Self {
            socket,
            buf: vec![0u8; max_packet_size.max(crate::packet::HEADER_LEN)],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl PacketSource for UdpPacketSource {
    fn recv_packet(&mut self, timeout: Duration) -> Result<Packet> {
        self.socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match self.socket.recv_from(&mut self.buf) {
            Ok((len, _)) => Packet::parse(&self.buf[..len]),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(CaptureError::Timeout)
            }
            Err(e) => Err(CaptureError::Io(e)),
        }
    }
}

/// In-memory packet queue. Once drained it reports a timeout, or
/// [`CaptureError::Disconnected`] when built with [`ScriptedSource::closing`].
#[derive(Debug, Default)]
pub struct ScriptedSource {
    packets: VecDeque<Packet>,
    close_when_drained: bool,
}

impl ScriptedSource {
    pub fn new(packets: impl IntoIterator<Item = Packet>) -> Self {
        Self {
            packets: packets.into_iter().collect(),
            close_when_drained: false,
        }
    }

    pub fn closing(packets: impl IntoIterator<Item = Packet>) -> Self {
        Self {
            close_when_drained: true,
            ..Self::new(packets)
        }
    }

    pub fn push(&mut self, packet: Packet) {
        self.packets.push_back(packet);
    }

    pub fn remaining(&self) -> usize {
        self.packets.len()
    }
}

impl PacketSource for ScriptedSource {
    fn recv_packet(&mut self, _timeout: Duration) -> Result<Packet> {
        match self.packets.pop_front() {
            Some(p) => Ok(p),
            None if self.close_when_drained => Err(CaptureError::Disconnected),
            None => Err(CaptureError::Timeout),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame layout & stats
// ---------------------------------------------------------------------------

/// Packet/frame sizing derived from the config.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    pub words_per_frame: usize,
    pub words_per_packet: usize,
    pub packets_per_frame: usize,
    pub clipped_bytes: u64,
}

impl FrameLayout {
    pub fn from_config(config: &RadarConfig) -> Self {
        let packets = config
            .bytes_in_frame
            .checked_div(config.bytes_in_packet)
            .unwrap_or(0);
        Self {
            words_per_frame: config.words_per_frame(),
            words_per_packet: config.words_per_packet(),
            packets_per_frame: packets.max(1),
            clipped_bytes: (packets * config.bytes_in_packet).max(1) as u64,
        }
    }

    pub fn is_frame_start(&self, packet: &Packet) -> bool {
        packet.byte_count % self.clipped_bytes == 0
    }

    pub fn slot(&self, seq: u32) -> usize {
        (seq.wrapping_sub(1) as usize) % self.packets_per_frame
    }
}

/// Per-frame reassembly diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStats {
    pub packets_expected: usize,
    /// Packets applied, duplicates included
    pub packets_observed: usize,
    pub duplicates: usize,
    /// Packets dropped for overflowing the buffer or being malformed
    pub dropped: usize,
    /// Slots never written (never negative)
    pub lost: usize,
    /// The frame was closed by a read timeout
    pub timed_out: bool,
}

/// One reassembled frame.
#[derive(Clone, Debug)]
pub struct AssembledFrame {
    pub index: u64,
    /// Always `bytes_in_frame / 2` words
    pub data: Vec<i16>,
    pub stats: FrameStats,
}

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

pub struct FrameAssembler<S: PacketSource> {
    source: S,
    layout: FrameLayout,
    synced: bool,
    /// Last frame closed complete; wait for the next frame start
    awaiting_start: bool,
    carry: Option<Packet>,
    next_index: u64,
}

impl<S: PacketSource> FrameAssembler<S> {
    pub fn new(source: S, config: &RadarConfig) -> Self {
        Self {
            source,
            layout: FrameLayout::from_config(config),
            synced: false,
            awaiting_start: false,
            carry: None,
            next_index: 0,
        }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Read one packet from the underlying source.
    pub fn receive_packet(&mut self, timeout: Duration) -> Result<Packet> {
        self.source.recv_packet(timeout)
    }

    /// Collect packets until a frame closes. Never fails on loss; only
    /// non-transient source errors are returned.
    pub fn assemble_frame(&mut self, timeout: Duration) -> Result<AssembledFrame> {
        let layout = self.layout;
        let mut frame = FrameBuffer::new(layout);

        if let Some(p) = self.carry.take() {
            frame.apply(&p);
        }

        while !frame.is_complete() {
            let packet = match self.source.recv_packet(timeout) {
                Ok(p) => p,
                Err(CaptureError::Timeout) => {
                    frame.stats.timed_out = true;
                    break;
                }
                Err(CaptureError::Malformed(reason)) => {
                    tracing::debug!(%reason, "dropping malformed packet");
                    frame.stats.dropped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if layout.is_frame_start(&packet) {
                self.awaiting_start = false;
                if !self.synced {
                    self.synced = true;
                    tracing::debug!(seq = packet.seq, "synchronized on frame start");
                } else if frame.stats.packets_observed > 0 {
                    self.carry = Some(packet);
                    break;
                }
            } else if !self.synced {
                continue;
            } else if self.awaiting_start {
                tracing::trace!(seq = packet.seq, "dropping packet between frames");
                frame.stats.dropped += 1;
                continue;
            }
            frame.apply(&packet);
        }
        if frame.is_complete() {
            self.awaiting_start = true;
        }

        let index = self.next_index;
        self.next_index += 1;
        let stats = frame.finish();
        if stats.lost > 0 {
            tracing::debug!(index, lost = stats.lost, timed_out = stats.timed_out, "incomplete frame");
        }
        Ok(AssembledFrame {
            index,
            data: frame.data,
            stats,
        })
    }
}

struct FrameBuffer {
    layout: FrameLayout,
    data: Vec<i16>,
    written: Vec<bool>,
    distinct: usize,
    stats: FrameStats,
}

impl FrameBuffer {
    fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            data: vec![0; layout.words_per_frame],
            written: vec![false; layout.packets_per_frame],
            distinct: 0,
            stats: FrameStats {
                packets_expected: layout.packets_per_frame,
                ..Default::default()
            },
        }
    }

    fn apply(&mut self, packet: &Packet) {
        let slot = self.layout.slot(packet.seq);
        let offset = slot * self.layout.words_per_packet;
        let end = offset + packet.payload.len();
        if end > self.data.len() {
            self.stats.dropped += 1;
            return;
        }
        self.data[offset..end].copy_from_slice(&packet.payload);
        self.stats.packets_observed += 1;
        if self.written[slot] {
            self.stats.duplicates += 1;
        } else {
            self.written[slot] = true;
            self.distinct += 1;
        }
    }

    fn is_complete(&self) -> bool {
        self.distinct == self.layout.packets_per_frame
    }

    fn finish(&mut self) -> FrameStats {
        self.stats.lost = self.stats.packets_expected.saturating_sub(self.distinct);
        self.stats.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
