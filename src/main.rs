// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command line entry point.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use rfmonitor::alert_sink::BellSink;
use rfmonitor::config::AppConfig;
use rfmonitor::controller::{ControlError, Controller};
use rfmonitor::sdr::demo_source::DemoReceiver;
use rfmonitor::sdr::{list_devices, probe_gains, receiver_factory, ReceiverKind};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Default monitor threshold in dB
const DEFAULT_THRESHOLD: f32 = -40.0;

#[derive(Parser, Debug)]
#[command(author, version, about = "Monitor RF activity on a set of frequencies")]
struct Cli {
    /// Open a .rfmon session file
    #[arg(long)]
    open: Option<PathBuf>,

    /// Save the session to this file on exit
    #[arg(long)]
    save: Option<PathBuf>,

    /// Use the synthetic demo receiver instead of hardware
    #[arg(long, default_value_t = false)]
    demo: bool,

    /// RTL-SDR device index
    #[arg(long)]
    device: Option<u32>,

    /// Centre frequency in MHz
    #[arg(short, long)]
    frequency: Option<f64>,

    /// Tuner gain in dB (automatic if omitted)
    #[arg(short, long)]
    gain: Option<f32>,

    /// Frequency correction in ppm
    #[arg(long)]
    calibration: Option<f32>,

    /// Monitor as FREQ[:THRESHOLD[:alert]], e.g. 100.1:-45:alert
    #[arg(short, long = "monitor", value_parser = parse_monitor)]
    monitors: Vec<MonitorArg>,

    /// Start recording immediately
    #[arg(short, long, default_value_t = false)]
    record: bool,

    /// gpsd address (enables GPS)
    #[arg(long)]
    gps: Option<String>,

    /// Export server address (enables export)
    #[arg(long)]
    server: Option<String>,

    /// List RTL-SDR devices and exit
    #[arg(long, default_value_t = false)]
    list_devices: bool,

    /// Store the effective settings as the new defaults
    #[arg(long, default_value_t = false)]
    save_config: bool,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

impl Cli {
    /// Override persisted settings for this run.
    fn apply(&self, config: &mut AppConfig) {
        if self.demo {
            config.receiver = ReceiverKind::Demo;
        } else if let Some(device_index) = self.device {
            config.receiver = ReceiverKind::RtlSdr { device_index };
        }
        if let Some(frequency) = self.frequency {
            config.frequency = frequency;
        }
        if self.gain.is_some() {
            config.gain = self.gain;
        }
        if let Some(calibration) = self.calibration {
            config.calibration = calibration;
        }
        if let Some(address) = &self.gps {
            config.gps.enabled = true;
            config.gps.address.clone_from(address);
        }
        if let Some(address) = &self.server {
            config.server.enabled = true;
            config.server.address.clone_from(address);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct MonitorArg {
    frequency: f64,
    threshold: f32,
    alert: bool,
}

fn parse_monitor(value: &str) -> Result<MonitorArg, String> {
    let mut parts = value.split(':');
    let frequency = parts
        .next()
        .unwrap_or_default()
        .parse::<f64>()
        .map_err(|e| format!("invalid frequency '{value}': {e}"))?;
    let threshold = match parts.next() {
        Some(t) if !t.is_empty() => t
            .parse::<f32>()
            .map_err(|e| format!("invalid threshold '{t}': {e}"))?,
        _ => DEFAULT_THRESHOLD,
    };
    let alert = match parts.next() {
        None => false,
        Some("alert") => true,
        Some(other) => return Err(format!("unknown monitor flag '{other}'")),
    };
    if parts.next().is_some() {
        return Err(format!("too many fields in '{value}'"));
    }
    Ok(MonitorArg {
        frequency,
        threshold,
        alert,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.list_devices {
        let devices = list_devices();
        if devices.is_empty() {
            warn!("No RTL-SDR devices found");
        }
        for device in devices {
            info!("[{}] {} (SN: {})", device.index, device.name, device.serial);
        }
        return Ok(());
    }

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });
    cli.apply(&mut config);
    config.validate().context("invalid settings")?;

    if cli.save_config {
        config.save().context("saving config")?;
        if let Ok(path) = AppConfig::get_config_path() {
            info!("Saved settings to {}", path.display());
        }
    }

    let gains = probe_gains(&config.receiver, config.sample_rate).context("No radio found")?;
    info!("Receiver gains (dB): {gains:?}");
    if config.receiver == ReceiverKind::Demo {
        info!(
            "Demo carriers at {:?} Hz from {:.4} MHz",
            DemoReceiver::carrier_offsets(),
            config.frequency
        );
    }

    let factory = receiver_factory(config.receiver.clone(), config.sample_rate);
    let sink = Box::new(BellSink::new(!config.alert_enabled));
    let mut controller = Controller::new(config, factory, sink);

    if let Some(path) = &cli.open {
        controller.open(path)?;
    }
    for monitor in &cli.monitors {
        controller.add_monitor(monitor.frequency, monitor.threshold, monitor.alert);
    }

    controller.start_gps();
    controller.start_exporter();
    if cli.record {
        controller.set_recording(true)?;
    } else {
        controller.start_scan()?;
    }
    info!("{} running, Ctrl-C to stop", controller.title());

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    let duration = cli.duration.map(Duration::from_secs);
    tokio::spawn(async move {
        let limit = async {
            match duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Ctrl-C handler failed: {e}");
                }
            }
            () = limit => info!("Run time elapsed"),
        }
        trigger.cancel();
    });

    controller.run(shutdown).await;
    controller.log_status();

    if !controller.is_saved() {
        match controller.save(cli.save.as_deref()) {
            Ok(()) => {}
            Err(ControlError::NoFilename) => {
                warn!("Session not saved, pass --save to keep it");
            }
            Err(e) => return Err(e).context("saving session"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_monitor() {
        assert_eq!(
            parse_monitor("100.1").unwrap(),
            MonitorArg {
                frequency: 100.1,
                threshold: DEFAULT_THRESHOLD,
                alert: false
            }
        );
        assert_eq!(
            parse_monitor("433.92:-55.5:alert").unwrap(),
            MonitorArg {
                frequency: 433.92,
                threshold: -55.5,
                alert: true
            }
        );
        assert_eq!(parse_monitor("144::alert").unwrap().threshold, DEFAULT_THRESHOLD);
        assert!(parse_monitor("abc").is_err());
        assert!(parse_monitor("100:-40:beep").is_err());
        assert!(parse_monitor("100:-40:alert:x").is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "rfmonitor",
            "--demo",
            "-f",
            "433.92",
            "--gps",
            "gpshost:2947",
            "-m",
            "433.9:-50",
            "-m",
            "433.95",
        ]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.receiver, ReceiverKind::Demo);
        assert_eq!(config.frequency, 433.92);
        assert!(config.gps.enabled);
        assert_eq!(config.gps.address, "gpshost:2947");
        assert!(!config.server.enabled);
        assert_eq!(config.gain, None);
        assert_eq!(cli.monitors.len(), 2);
    }
}
