mod config;
mod timefmt;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::Config;
use dialoguer::{Confirm, theme::ColorfulTheme};
use log::{info, warn};
use rrrc_i2c::control::PortTypes;
use rrrc_i2c::monitor::SlotMonitor;
use rrrc_i2c::{Control, Updater};
use rrrc_protocol::commands::OperationMode;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use timefmt::{MonitorClock, Stamp};

/// Diagnostic tool for the RRRC MCU on the Raspberry Pi I2C bus.
#[derive(Parser, Debug)]
#[command(name = "rrrc-i2c", version)]
struct Cli {
    /// Address the bootloader instead of the application firmware.
    #[arg(short = 'b', long)]
    bootloader: bool,
    /// Log every frame.
    #[arg(short = 'v', long)]
    verbose: bool,
    /// Print the pid and wait for confirmation before talking to the MCU.
    #[arg(short = 'd', long)]
    debug_attach: bool,
    /// Configuration file (default: ./rrrc-i2c.toml if present).
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
    /// I2C bus index, overrides the configuration.
    #[arg(long)]
    bus: Option<u8>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Check that the MCU answers.
    Ping,
    /// Read the hardware version string.
    Readhw,
    /// Read the firmware version string.
    Readfw,
    /// Reboot into the bootloader.
    Runbl,
    /// Start the application from the bootloader.
    Runapp,
    /// Show whether the application or the bootloader is running.
    Getop,
    /// Read the CRC-32 of the installed application.
    Getappcrc,
    /// Announce an image (bootloader only).
    Updinit {
        #[arg(value_parser = parse_u32)]
        size: u32,
        #[arg(value_parser = parse_u32)]
        crc: u32,
    },
    /// Stream an image after `updinit` (bootloader only).
    Updwrite { file: PathBuf },
    /// Full firmware update: enter bootloader, program, run.
    Upd { file: PathBuf },
    /// List the driver types the MCU supports.
    Porttypes {
        /// Motor ports instead of sensor ports.
        #[arg(long)]
        motor: bool,
    },
    /// Enable status slots and print their records as JSON lines.
    Monitor {
        /// Slot ids to enable besides the ones of configured ports.
        slots: Vec<u8>,
        /// Auto-stop after duration, e.g. 30s/2m (0 = unlimited).
        #[arg(long, value_parser = humantime::parse_duration, default_value = "0")]
        duration: Duration,
        /// Auto-stop after N records (0 = unlimited).
        #[arg(long, default_value = "0")]
        lines: usize,
        /// Poll interval.
        #[arg(long, value_parser = humantime::parse_duration, default_value = "100ms")]
        interval: Duration,
    },
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s:?}: {e}"))
}

struct Session {
    control: Control,
    #[cfg(target_os = "linux")]
    _lock: rrrc_i2c::bus::linux::BusLock,
}

#[cfg(target_os = "linux")]
fn open(bus: u8, address: u8, cfg: &Config) -> Result<Session> {
    use rrrc_i2c::Transport;

    let (dev, lock) = rrrc_i2c::bus::linux::open(bus, &cfg.bus.lock_dir)
        .with_context(|| format!("opening i2c bus {bus}"))?;
    let transport = Transport::new(dev, linux_embedded_hal::Delay, address)
        .with_retry(cfg.retry.policy());
    Ok(Session {
        control: Control::new(transport),
        _lock: lock,
    })
}

#[cfg(not(target_os = "linux"))]
fn open(_bus: u8, _address: u8, _cfg: &Config) -> Result<Session> {
    bail!("no I2C backend on this platform")
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn confirm_attach() -> Result<()> {
    let go = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("pid {}: attach debugger, then continue?", std::process::id()))
        .default(true)
        .interact()?;
    if !go {
        bail!("aborted");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = Config::load(cli.config.as_deref())?;
    let bus = cli.bus.unwrap_or(cfg.bus.index);
    let address = if cli.bootloader {
        cfg.bus.bootloader_address
    } else {
        cfg.bus.application_address
    };
    info!("i2c bus {bus}, address {address:#04x}");

    if cli.debug_attach {
        confirm_attach()?;
    }

    let session = open(bus, address, &cfg)?;
    run(cli.cmd, &session.control, &cfg)
}

fn run(cmd: Cmd, control: &Control, cfg: &Config) -> Result<()> {
    match cmd {
        Cmd::Ping => {
            control.ping()?;
            println!("ping: ok");
        }
        Cmd::Readhw => println!("hardware version: {}", control.read_hardware_version()?),
        Cmd::Readfw => println!("firmware version: {}", control.read_firmware_version()?),
        Cmd::Runbl => {
            control.run_bootloader()?;
            println!("bootloader requested");
        }
        Cmd::Runapp => {
            control.run_application()?;
            println!("application requested");
        }
        Cmd::Getop => {
            let mode = control.operation_mode()?;
            let name = match mode {
                OperationMode::Application => "APPLICATION",
                OperationMode::Bootloader => "BOOTLOADER",
            };
            println!("operation mode: {name} ({:#04x})", mode.to_byte());
        }
        Cmd::Getappcrc => {
            let crc = control.read_application_crc()?;
            println!("application crc: 0x{crc:08x}");
        }
        Cmd::Updinit { size, crc } => {
            control
                .update_init(size, crc)
                .context("update init failed, update not done")?;
            println!("update init: {size} bytes, crc 0x{crc:08x}");
        }
        Cmd::Updwrite { file } => {
            let image = read_image(&file)?;
            let chunks = updater(control, cfg)
                .write_chunks(&image)
                .context("failed to write all chunks, update not done")?;
            println!("wrote {chunks} chunks");
        }
        Cmd::Upd { file } => {
            let image = read_image(&file)?;
            let report = updater(control, cfg).update(&image)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Cmd::Porttypes { motor } => {
            let types: PortTypes = if motor {
                control.motor_port_types()?
            } else {
                control.sensor_port_types()?
            };
            for (name, id) in &types {
                println!("{id}:{name}");
            }
        }
        Cmd::Monitor {
            slots,
            duration,
            lines,
            interval,
        } => monitor(control, cfg, &slots, duration, lines, interval)?,
    }
    Ok(())
}

fn updater(control: &Control, cfg: &Config) -> Updater {
    Updater::new(control.clone())
        .with_reset_wait(cfg.update.reset_wait())
        .with_addresses(cfg.bus.application_address, cfg.bus.bootloader_address)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    let image = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if image.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(image)
}

fn monitor(
    control: &Control,
    cfg: &Config,
    extra_slots: &[u8],
    duration: Duration,
    lines: usize,
    interval: Duration,
) -> Result<()> {
    let motor_ports = cfg.motor_ports()?;
    let sensor_ports = cfg.sensor_ports()?;

    let mut session = SlotMonitor::new(control.clone());
    let result = session
        .setup(&motor_ports, &sensor_ports, extra_slots)
        .context("monitor setup")
        .and_then(|()| stream(&mut session, control, duration, lines, interval));
    session.teardown();
    result
}

#[derive(Serialize)]
struct MonitorLine<'a> {
    #[serde(flatten)]
    stamp: Stamp,
    slot: u8,
    data: String,
    value: &'a serde_json::Value,
}

/// Print one JSON line per slot record until `duration` (0 = forever) or
/// `lines` (0 = unlimited) runs out.
fn stream(
    session: &mut SlotMonitor,
    control: &Control,
    duration: Duration,
    lines: usize,
    interval: Duration,
) -> Result<()> {
    let clock = MonitorClock::start();
    let deadline = (!duration.is_zero()).then(|| Instant::now() + duration);
    let mut printed = 0usize;
    while deadline.is_none_or(|d| Instant::now() < d) {
        match session.poll() {
            Ok(events) => {
                for event in &events {
                    let line = MonitorLine {
                        stamp: clock.stamp(),
                        slot: event.slot,
                        data: hex(&event.data),
                        value: &event.value,
                    };
                    println!("{}", serde_json::to_string(&line)?);
                    printed += 1;
                    if lines != 0 && printed >= lines {
                        return Ok(());
                    }
                }
            }
            Err(e) => warn!("read slots: {e}"),
        }
        control.pause(interval);
    }
    Ok(())
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_accept_hex_and_decimal() {
        assert_eq!(parse_u32("300"), Ok(300));
        assert_eq!(parse_u32("0x12345678"), Ok(0x1234_5678));
        assert_eq!(parse_u32("0XFF"), Ok(255));
        assert!(parse_u32("0xZZ").is_err());
        assert!(parse_u32("-1").is_err());
    }

    #[test]
    fn cli_parses_flags_and_subcommands() {
        let cli =
            Cli::try_parse_from(["rrrc-i2c", "-b", "-v", "updinit", "300", "0xcbf43926"]).unwrap();
        assert!(cli.bootloader);
        assert!(cli.verbose);
        assert!(matches!(cli.cmd, Cmd::Updinit { size: 300, crc: 0xCBF4_3926 }));

        let cli = Cli::try_parse_from([
            "rrrc-i2c", "--bus", "3", "monitor", "6", "10", "--duration", "30s", "--lines", "5",
        ])
        .unwrap();
        assert_eq!(cli.bus, Some(3));
        match cli.cmd {
            Cmd::Monitor {
                slots,
                duration,
                lines,
                interval,
            } => {
                assert_eq!(slots, vec![6, 10]);
                assert_eq!(duration, Duration::from_secs(30));
                assert_eq!(lines, 5);
                assert_eq!(interval, Duration::from_millis(100));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn updinit_requires_both_arguments() {
        assert!(Cli::try_parse_from(["rrrc-i2c", "updinit", "300"]).is_err());
    }

    #[test]
    fn hex_dump() {
        assert_eq!(hex(&[0x00, 0xab, 0x10]), "00ab10");
    }
}
