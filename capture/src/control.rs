//! Capture-card control channel.
//!
//! Every command is a single UDP datagram:
//!
//! ```text
//! 5a a5 | code u16 LE | body length u16 LE | body | aa ee
//! ```
//!
//! and the card answers with an 8-byte status frame
//! `5a a5 | code u16 LE | status u16 LE | aa ee` (status 0 is success).

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::{CaptureError, Result};

pub const HEADER: [u8; 2] = [0x5a, 0xa5];
pub const FOOTER: [u8; 2] = [0xaa, 0xee];

/// Default addresses of the evaluation capture card and its host.
pub const DEFAULT_HOST_IP: [u8; 4] = [192, 168, 33, 30];
pub const DEFAULT_CARD_IP: [u8; 4] = [192, 168, 33, 180];
pub const DEFAULT_CONFIG_PORT: u16 = 4096;
pub const DEFAULT_DATA_PORT: u16 = 4098;

/// FPGA setup: raw logging, 2-lane LVDS, ethernet transfer, 16-bit, 30 s timer.
pub const FPGA_CONFIG_BODY: [u8; 6] = [0x01, 0x02, 0x01, 0x02, 0x03, 0x1e];

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandCode {
    ResetFpga = 0x01,
    ResetRadar = 0x02,
    ConfigFpga = 0x03,
    ConfigEeprom = 0x04,
    RecordStart = 0x05,
    RecordStop = 0x06,
    PlaybackStart = 0x07,
    PlaybackStop = 0x08,
    SystemConnect = 0x09,
    SystemError = 0x0a,
    ConfigPacketData = 0x0b,
    ConfigRadarDataMode = 0x0c,
    InitFpgaPlayback = 0x0d,
    ReadFpgaVersion = 0x0e,
}

impl CommandCode {
    pub const ALL: [CommandCode; 14] = [
        CommandCode::ResetFpga,
        CommandCode::ResetRadar,
        CommandCode::ConfigFpga,
        CommandCode::ConfigEeprom,
        CommandCode::RecordStart,
        CommandCode::RecordStop,
        CommandCode::PlaybackStart,
        CommandCode::PlaybackStop,
        CommandCode::SystemConnect,
        CommandCode::SystemError,
        CommandCode::ConfigPacketData,
        CommandCode::ConfigRadarDataMode,
        CommandCode::InitFpgaPlayback,
        CommandCode::ReadFpgaVersion,
    ];

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| *c as u16 == value)
    }

    /// Kebab-case name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            CommandCode::ResetFpga => "reset-fpga",
            CommandCode::ResetRadar => "reset-radar",
            CommandCode::ConfigFpga => "config-fpga",
            CommandCode::ConfigEeprom => "config-eeprom",
            CommandCode::RecordStart => "record-start",
            CommandCode::RecordStop => "record-stop",
            CommandCode::PlaybackStart => "playback-start",
            CommandCode::PlaybackStop => "playback-stop",
            CommandCode::SystemConnect => "connect",
            CommandCode::SystemError => "system-error",
            CommandCode::ConfigPacketData => "config-packet",
            CommandCode::ConfigRadarDataMode => "config-data-mode",
            CommandCode::InitFpgaPlayback => "init-playback",
            CommandCode::ReadFpgaVersion => "fpga-version",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlCommand {
    pub code: CommandCode,
    pub body: Vec<u8>,
}

impl ControlCommand {
    pub fn new(code: CommandCode) -> Self {
        Self { code, body: Vec::new() }
    }

    pub fn with_body(code: CommandCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            body: body.into(),
        }
    }

    pub fn config_fpga() -> Self {
        Self::with_body(CommandCode::ConfigFpga, FPGA_CONFIG_BODY)
    }

    /// Packet size in bytes and inter-packet delay in the card's timer units.
    pub fn config_packet(packet_size: u16, delay: u16) -> Self {
        let mut body = Vec::with_capacity(6);
        body.extend_from_slice(&packet_size.to_le_bytes());
        body.extend_from_slice(&delay.to_le_bytes());
        body.extend_from_slice(&[0, 0]);
        Self::with_body(CommandCode::ConfigPacketData, body)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.body.len());
        out.extend_from_slice(&HEADER);
        out.extend_from_slice(&(self.code as u16).to_le_bytes());
        out.extend_from_slice(&(self.body.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.body);
        out.extend_from_slice(&FOOTER);
        out
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlResponse {
    pub code: u16,
    pub status: u16,
}

impl ControlResponse {
    pub const LEN: usize = 8;

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::LEN || bytes[..2] != HEADER || bytes[6..] != FOOTER {
            return Err(CaptureError::Malformed(format!(
                "bad control response {bytes:02x?}"
            )));
        }
        Ok(Self {
            code: u16::from_le_bytes([bytes[2], bytes[3]]),
            status: u16::from_le_bytes([bytes[4], bytes[5]]),
        })
    }

    pub fn command(&self) -> Option<CommandCode> {
        CommandCode::from_u16(self.code)
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ControlClient {
    socket: UdpSocket,
    card: SocketAddr,
    timeout: Duration,
}

impl ControlClient {
    pub fn bind(local: SocketAddr, card: SocketAddr, timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(local).map_err(|source| CaptureError::Bind {
            addr: local,
            source,
        })?;
        tracing::info!(%local, %card, "control socket bound");
        Ok(Self {
            socket,
            card,
            timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send one command and return the raw reply. A reply that does not
    /// arrive in time yields an empty buffer.
    pub fn send_command(&self, command: &ControlCommand) -> Result<Vec<u8>> {
        self.socket
            .set_read_timeout(Some(self.timeout.max(Duration::from_millis(1))))?;
        self.socket.send_to(&command.encode(), self.card)?;

        let mut buf = [0u8; 64];
        match self.socket.recv_from(&mut buf) {
            Ok((len, _)) => Ok(buf[..len].to_vec()),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                tracing::warn!(command = command.code.name(), "no control response");
                Ok(Vec::new())
            }
            Err(e) => Err(CaptureError::Io(e)),
        }
    }

    /// Connect, read the FPGA version, configure the FPGA and packet format.
    pub fn configure(&self, packet_size: u16, packet_delay: u16) -> Result<Vec<Vec<u8>>> {
        let sequence = [
            ControlCommand::new(CommandCode::SystemConnect),
            ControlCommand::new(CommandCode::ReadFpgaVersion),
            ControlCommand::config_fpga(),
            ControlCommand::config_packet(packet_size, packet_delay),
        ];
        let mut replies = Vec::with_capacity(sequence.len());
        for command in &sequence {
            let reply = self.send_command(command)?;
            match ControlResponse::parse(&reply) {
                Ok(r) => tracing::info!(command = command.code.name(), status = r.status, "control ack"),
                Err(_) if reply.is_empty() => {}
                Err(e) => tracing::warn!(command = command.code.name(), error = %e, "unexpected reply"),
            }
            replies.push(reply);
        }
        Ok(replies)
    }

    pub fn record_start(&self) -> Result<Vec<u8>> {
        self.send_command(&ControlCommand::new(CommandCode::RecordStart))
    }

    pub fn record_stop(&self) -> Result<Vec<u8>> {
        self.send_command(&ControlCommand::new(CommandCode::RecordStop))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
