//! Producer/consumer acquisition.
//!
//! A named producer thread owns the packet source: it assembles frames,
//! decodes them into cubes and pushes them onto a bounded channel,
//! blocking while the consumer is behind. The consumer side
//! ([`AcquisitionHandle::drain`]) runs the detection pipeline on every
//! frame and hands the result to a callback.
//!
//! # Shutdown
//! [`AcquisitionHandle::stop`] raises a flag; the producer finishes the
//! frame in hand, sends [`FrameMessage::Stop`] and exits. A fatal decode
//! error or a closed source ends the producer the same way.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use detect_core::{Cluster, FrameDecoder, Pipeline, PresenceResult, RadarCube};
use sensor_models::RadarConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::transport::{FrameAssembler, FrameStats, PacketSource};

#[derive(Clone, Debug)]
pub struct AcquisitionConfig {
    /// Frames buffered between producer and consumer
    pub queue_depth: usize,
    /// Read timeout per packet; also bounds a partial frame
    pub packet_timeout: Duration,
    /// Consecutive empty reads before the link is reported degraded
    pub degraded_after: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            queue_depth: 2,
            packet_timeout: Duration::from_secs(1),
            degraded_after: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Healthy,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Requested,
    SourceClosed,
    Fatal(String),
}

/// A reassembled frame decoded into a cube.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub index: u64,
    pub cube: RadarCube,
    pub stats: FrameStats,
}

#[derive(Clone, Debug)]
pub enum FrameMessage {
    Frame(DecodedFrame),
    Stop(StopReason),
}

/// Result of one detection cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleOutput {
    pub frame_index: u64,
    pub clusters: Vec<Cluster>,
    pub presence: PresenceResult,
    pub stats: FrameStats,
}

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

pub struct Acquisition;

impl Acquisition {
    /// Start the producer thread for `source`.
    pub fn spawn<S>(source: S, radar: &RadarConfig, config: AcquisitionConfig) -> Result<AcquisitionHandle>
    where
        S: PacketSource + 'static,
    {
        radar.validate().map_err(|e| CaptureError::Decode(e.into()))?;
        let decoder = FrameDecoder::new(radar)?;
        let assembler = FrameAssembler::new(source, radar);
        let (tx, rx) = channel::bounded(config.queue_depth.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let degraded = Arc::new(AtomicBool::new(false));

        let producer = Producer {
            assembler,
            decoder,
            config,
            stop: Arc::clone(&stop),
            degraded: Arc::clone(&degraded),
            tx,
        };
        let thread = std::thread::Builder::new()
            .name("mmw-acquisition".into())
            .spawn(move || producer.run())?;
        tracing::info!("acquisition started");

        Ok(AcquisitionHandle {
            stop,
            degraded,
            receiver: rx,
            thread: Some(thread),
        })
    }
}

struct Producer<S: PacketSource> {
    assembler: FrameAssembler<S>,
    decoder: FrameDecoder,
    config: AcquisitionConfig,
    stop: Arc<AtomicBool>,
    degraded: Arc<AtomicBool>,
    tx: Sender<FrameMessage>,
}

impl<S: PacketSource> Producer<S> {
    fn run(mut self) {
        let mut idle_reads = 0u32;
        let reason = loop {
            if self.stop.load(Ordering::Acquire) {
                break StopReason::Requested;
            }

            let frame = match self.assembler.assemble_frame(self.config.packet_timeout) {
                Ok(f) => f,
                Err(CaptureError::Disconnected) => break StopReason::SourceClosed,
                Err(e) => break StopReason::Fatal(e.to_string()),
            };

            if frame.stats.packets_observed == 0 {
                idle_reads = idle_reads.saturating_add(1);
                if idle_reads == self.config.degraded_after {
                    self.degraded.store(true, Ordering::Release);
                    tracing::warn!(idle_reads, "no data from capture card, link degraded");
                }
                continue;
            }
            if self.degraded.swap(false, Ordering::AcqRel) {
                tracing::info!("link recovered");
            }
            idle_reads = 0;

            let cube = match self.decoder.decode(&frame.data) {
                Ok(c) => c,
                Err(e) => break StopReason::Fatal(e.to_string()),
            };
            tracing::debug!(
                index = frame.index,
                lost = frame.stats.lost,
                duplicates = frame.stats.duplicates,
                "frame decoded"
            );
            let msg = FrameMessage::Frame(DecodedFrame {
                index: frame.index,
                cube,
                stats: frame.stats,
            });
            if self.tx.send(msg).is_err() {
                tracing::debug!("consumer gone, producer exiting");
                return;
            }
        };

        match &reason {
            StopReason::Fatal(msg) => tracing::warn!(%msg, "acquisition stopped"),
            other => tracing::info!(reason = ?other, "acquisition stopped"),
        }
        let _ = self.tx.send(FrameMessage::Stop(reason));
    }
}

// ---------------------------------------------------------------------------
// AcquisitionHandle
// ---------------------------------------------------------------------------

pub struct AcquisitionHandle {
    stop: Arc<AtomicBool>,
    degraded: Arc<AtomicBool>,
    receiver: Receiver<FrameMessage>,
    thread: Option<JoinHandle<()>>,
}

impl AcquisitionHandle {
    pub fn link_status(&self) -> LinkStatus {
        if self.degraded.load(Ordering::Acquire) {
            LinkStatus::Degraded
        } else {
            LinkStatus::Healthy
        }
    }

    /// Ask the producer to stop after its current frame.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Next message, or `None` if nothing arrived within `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<FrameMessage>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Disconnected),
        }
    }

    /// Stop the producer, discard queued frames and join the thread.
    pub fn stop(mut self) -> StopReason {
        self.request_stop();
        self.finish()
    }

    /// Run `pipeline` on every frame until the producer stops or the
    /// callback breaks. Returns why acquisition ended.
    pub fn drain<F>(mut self, pipeline: &Pipeline, recv_timeout: Duration, mut on_cycle: F) -> Result<StopReason>
    where
        F: FnMut(CycleOutput) -> ControlFlow<()>,
    {
        loop {
            let frame = match self.receiver.recv_timeout(recv_timeout) {
                Ok(FrameMessage::Frame(f)) => f,
                Ok(FrameMessage::Stop(reason)) => {
                    self.join();
                    return Ok(reason);
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::trace!("waiting for frame");
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.join();
                    return Err(CaptureError::Disconnected);
                }
            };

            let out = match pipeline.process(&frame.cube) {
                Ok(out) => out,
                Err(e) => {
                    self.request_stop();
                    self.finish();
                    return Err(e.into());
                }
            };
            let cycle = CycleOutput {
                frame_index: frame.index,
                clusters: out.clusters,
                presence: out.presence,
                stats: frame.stats,
            };
            if on_cycle(cycle).is_break() {
                self.request_stop();
                return Ok(self.finish());
            }
        }
    }

    fn finish(&mut self) -> StopReason {
        let reason = loop {
            match self.receiver.recv() {
                Ok(FrameMessage::Stop(reason)) => break reason,
                Ok(FrameMessage::Frame(_)) => continue,
                Err(_) => break StopReason::SourceClosed,
            }
        };
        self.join();
        reason
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("acquisition thread panicked");
            }
        }
    }
}

impl Drop for AcquisitionHandle {
    /// Stops and joins the producer unless `stop` or `drain` already did.
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.request_stop();
            self.finish();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
