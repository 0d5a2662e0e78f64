//! `mmw` CLI: live capture, synthetic runs, capture-card control.

use anyhow::{bail, Context, Result};
use capture::acquisition::{Acquisition, AcquisitionConfig, CycleOutput, StopReason};
use capture::control::{
    CommandCode, ControlClient, ControlCommand, ControlResponse, DEFAULT_CARD_IP,
    DEFAULT_CONFIG_PORT, DEFAULT_DATA_PORT, DEFAULT_HOST_IP,
};
use capture::sim::{SimTarget, SimulatedSource, StreamSimConfig, StreamSimulator};
use capture::transport::{PacketSource, UdpPacketSource};
use clap::{Args, Parser, Subcommand};
use detect_core::Pipeline;
use sensor_models::RadarConfig;
use serde::Serialize;
use std::io::{BufReader, BufWriter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "mmw", about = "mmWave capture and detection CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct LinkArgs {
    /// Address of this host on the capture network
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::from(DEFAULT_HOST_IP)))]
    host_ip: IpAddr,
    /// Address of the capture card
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::from(DEFAULT_CARD_IP)))]
    card_ip: IpAddr,
    #[arg(long, default_value_t = DEFAULT_CONFIG_PORT)]
    config_port: u16,
    #[arg(long, default_value_t = DEFAULT_DATA_PORT)]
    data_port: u16,
    /// Socket timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

impl LinkArgs {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn control_client(&self) -> Result<ControlClient> {
        let local = SocketAddr::new(self.host_ip, self.config_port);
        let card = SocketAddr::new(self.card_ip, self.config_port);
        Ok(ControlClient::bind(local, card, self.timeout())?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Capture frames from the card and run detection on each.
    Listen {
        #[command(flatten)]
        link: LinkArgs,
        /// Radar configuration JSON (defaults apply to missing fields)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Send the connect / FPGA / packet configuration sequence first
        #[arg(long)]
        configure: bool,
        /// Packet size announced to the card
        #[arg(long, default_value_t = 1472)]
        packet_size: u16,
        /// Inter-packet delay announced to the card
        #[arg(long, default_value_t = 3125)]
        packet_delay: u16,
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,
        /// Write every cycle to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run synthetic targets through packetization, reassembly and detection.
    Simulate {
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Target list JSON; two moving reflectors when omitted
        #[arg(long)]
        targets: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        frames: u64,
        /// Packet loss probability
        #[arg(long, default_value_t = 0.0)]
        loss: f64,
        /// Packet reorder probability
        #[arg(long, default_value_t = 0.0)]
        reorder: f64,
        /// Receiver noise half-width in ADC counts
        #[arg(long, default_value_t = 4.0)]
        noise: f64,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Send a single control command and print the reply.
    Control {
        /// Command name, e.g. connect, fpga-version, record-stop
        command: String,
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Write the default radar configuration as JSON.
    DefaultConfig { output: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Listen {
            link,
            config,
            configure,
            packet_size,
            packet_delay,
            frames,
            output,
        } => {
            let radar = load_config(config.as_deref())?;
            run_listen(&link, radar, configure, (packet_size, packet_delay), frames, output.as_deref())?;
        }
        Commands::Simulate {
            seed,
            targets,
            config,
            frames,
            loss,
            reorder,
            noise,
            output,
        } => {
            let radar = load_config(config.as_deref())?;
            let targets = match targets {
                Some(path) => load_json(&path)?,
                None => default_targets(&radar),
            };
            let impairments = StreamSimConfig {
                noise_amplitude: noise,
                loss_probability: loss,
                reorder_probability: reorder,
            };
            run_simulate(radar, targets, impairments, seed, frames, output.as_deref())?;
        }
        Commands::Control { command, link } => {
            run_control(&command, &link)?;
        }
        Commands::DefaultConfig { output } => {
            save_json(&RadarConfig::default(), &output)?;
            println!("Default config saved to {}", output.display());
        }
    }

    Ok(())
}

fn run_listen(
    link: &LinkArgs,
    radar: RadarConfig,
    configure: bool,
    (packet_size, packet_delay): (u16, u16),
    frames: Option<u64>,
    output_path: Option<&Path>,
) -> Result<()> {
    let control = if configure {
        let client = link.control_client()?;
        let replies = client.configure(packet_size, packet_delay)?;
        let acked = replies.iter().filter(|r| !r.is_empty()).count();
        tracing::info!(acked, sent = replies.len(), "capture card configured");
        Some(client)
    } else {
        None
    };

    let data_addr = SocketAddr::new(link.host_ip, link.data_port);
    let source = UdpPacketSource::bind(data_addr, radar.max_packet_size)?;
    println!("Listening for frames on {data_addr}...");

    let acq = AcquisitionConfig {
        packet_timeout: link.timeout(),
        ..Default::default()
    };
    let (cycles, reason, elapsed) = run_acquisition(source, radar, acq, frames)?;

    if let Some(client) = control {
        client.record_stop()?;
    }
    report(&cycles, &reason, elapsed, output_path)
}

fn run_simulate(
    radar: RadarConfig,
    targets: Vec<SimTarget>,
    impairments: StreamSimConfig,
    seed: u64,
    frames: u64,
    output_path: Option<&Path>,
) -> Result<()> {
    println!(
        "Simulating {} target(s) for {} frames (seed={}, loss={:.2})...",
        targets.len(),
        frames,
        seed,
        impairments.loss_probability
    );
    let sim = StreamSimulator::new(radar.clone(), impairments, seed)?;
    let source = SimulatedSource::new(sim, targets, Some(frames));
    let acq = AcquisitionConfig {
        packet_timeout: Duration::from_millis(10),
        ..Default::default()
    };
    let (cycles, reason, elapsed) = run_acquisition(source, radar, acq, Some(frames))?;
    report(&cycles, &reason, elapsed, output_path)
}

fn run_acquisition<S: PacketSource + 'static>(
    source: S,
    radar: RadarConfig,
    acq: AcquisitionConfig,
    frames: Option<u64>,
) -> Result<(Vec<CycleOutput>, StopReason, Duration)> {
    let pipeline = Pipeline::new(radar.clone())?;
    let handle = Acquisition::spawn(source, &radar, acq)?;

    let start = Instant::now();
    let mut cycles = Vec::new();
    let reason = handle.drain(&pipeline, Duration::from_secs(5), |cycle| {
        println!(
            "frame {:>5}: {} cluster(s), presence={} ({}), lost {}/{}",
            cycle.frame_index,
            cycle.clusters.len(),
            cycle.presence.detected,
            cycle
                .presence
                .distance
                .map_or_else(|| "-".to_string(), |d| format!("{d:.2} m")),
            cycle.stats.lost,
            cycle.stats.packets_expected,
        );
        cycles.push(cycle);
        match frames {
            Some(n) if cycles.len() as u64 >= n => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    })?;
    Ok((cycles, reason, start.elapsed()))
}

fn report(
    cycles: &[CycleOutput],
    reason: &StopReason,
    elapsed: Duration,
    output_path: Option<&Path>,
) -> Result<()> {
    let lost: usize = cycles.iter().map(|c| c.stats.lost).sum();
    println!(
        "Done: {} frames, {} packets lost, stop={:?}, elapsed={:.2}s",
        cycles.len(),
        lost,
        reason,
        elapsed.as_secs_f64(),
    );
    if let StopReason::Fatal(msg) = reason {
        bail!("acquisition failed: {msg}");
    }

    if let Some(opath) = output_path {
        let json = serde_json::json!({
            "frames": cycles.len(),
            "packets_lost": lost,
            "elapsed_s": elapsed.as_secs_f64(),
            "cycles": cycles,
        });
        save_json(&json, opath)?;
        println!("Cycles saved to {}", opath.display());
    }
    Ok(())
}

fn run_control(name: &str, link: &LinkArgs) -> Result<()> {
    let Some(code) = CommandCode::from_name(name) else {
        let names: Vec<&str> = CommandCode::ALL.iter().map(|c| c.name()).collect();
        bail!("unknown command '{name}', expected one of: {}", names.join(", "));
    };
    let command = match code {
        CommandCode::ConfigFpga => ControlCommand::config_fpga(),
        CommandCode::ConfigPacketData => ControlCommand::config_packet(1472, 3125),
        other => ControlCommand::new(other),
    };

    let client = link.control_client()?;
    let reply = client.send_command(&command)?;
    if reply.is_empty() {
        println!("{}: no reply within {} ms", code.name(), link.timeout_ms);
        return Ok(());
    }
    match ControlResponse::parse(&reply) {
        Ok(r) => println!(
            "{}: status {} ({})",
            code.name(),
            r.status,
            if r.is_success() { "ok" } else { "error" }
        ),
        Err(_) => println!("{}: raw reply {:02x?}", code.name(), reply),
    }
    Ok(())
}

fn default_targets(radar: &RadarConfig) -> Vec<SimTarget> {
    let range_res = radar.range_resolution();
    let doppler_res = radar.doppler_resolution();
    vec![
        SimTarget::new(60.0 * range_res, 8.0 * doppler_res, 20.0),
        SimTarget::new(140.0 * range_res, -12.0 * doppler_res, -30.0),
    ]
}

fn load_config(path: Option<&Path>) -> Result<RadarConfig> {
    let config: RadarConfig = match path {
        Some(p) => load_json(p)?,
        None => RadarConfig::default(),
    };
    config.validate().context("invalid radar configuration")?;
    Ok(config)
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}
