use anyhow::{Context, Result, bail};
use rrrc_i2c::ports::DriverConfig;
use rrrc_i2c::transport::RetryPolicy;
use rrrc_protocol::commands::{APPLICATION_ADDRESS, BOOTLOADER_ADDRESS};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PATH: &str = "rrrc-i2c.toml";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    /// Port number (1-based) to driver, applied by `monitor`.
    #[serde(default)]
    pub motor: BTreeMap<String, DriverConfig>,
    #[serde(default)]
    pub sensor: BTreeMap<String, DriverConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BusConfig {
    #[serde(default = "BusConfig::default_index")]
    pub index: u8,
    #[serde(default = "BusConfig::default_application_address")]
    pub application_address: u8,
    #[serde(default = "BusConfig::default_bootloader_address")]
    pub bootloader_address: u8,
    #[serde(default = "BusConfig::default_lock_dir")]
    pub lock_dir: PathBuf,
}

impl BusConfig {
    fn default_index() -> u8 {
        1
    }
    fn default_application_address() -> u8 {
        APPLICATION_ADDRESS
    }
    fn default_bootloader_address() -> u8 {
        BOOTLOADER_ADDRESS
    }
    fn default_lock_dir() -> PathBuf {
        PathBuf::from("/tmp")
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            index: Self::default_index(),
            application_address: Self::default_application_address(),
            bootloader_address: Self::default_bootloader_address(),
            lock_dir: Self::default_lock_dir(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_attempts")]
    pub attempts: u32,
    #[serde(default = "RetryConfig::default_delay_ms")]
    pub delay_ms: u64,
}

impl RetryConfig {
    fn default_attempts() -> u32 {
        5
    }
    fn default_delay_ms() -> u64 {
        100
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts,
            delay: Duration::from_millis(self.delay_ms),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: Self::default_attempts(),
            delay_ms: Self::default_delay_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpdateConfig {
    #[serde(default = "UpdateConfig::default_reset_wait_ms")]
    pub reset_wait_ms: u64,
}

impl UpdateConfig {
    fn default_reset_wait_ms() -> u64 {
        500
    }

    pub fn reset_wait(&self) -> Duration {
        Duration::from_millis(self.reset_wait_ms)
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            reset_wait_ms: Self::default_reset_wait_ms(),
        }
    }
}

impl Config {
    /// Load `path`, or `rrrc-i2c.toml` in the working directory when no
    /// path is given. Only an explicitly named file has to exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_PATH), false),
        };
        if !path.exists() {
            if explicit {
                bail!("config file {} not found", path.display());
            }
            return Ok(Config::default());
        }
        let txt = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&txt).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(txt: &str) -> Result<Self> {
        let mut cfg: Config = toml::from_str(txt)?;
        if cfg.bus.application_address == 0 {
            cfg.bus.application_address = BusConfig::default_application_address();
        }
        if cfg.bus.bootloader_address == 0 {
            cfg.bus.bootloader_address = BusConfig::default_bootloader_address();
        }
        if cfg.bus.lock_dir.as_os_str().is_empty() {
            cfg.bus.lock_dir = BusConfig::default_lock_dir();
        }
        if cfg.retry.attempts == 0 {
            cfg.retry.attempts = RetryConfig::default_attempts();
        }
        if cfg.retry.delay_ms == 0 {
            cfg.retry.delay_ms = RetryConfig::default_delay_ms();
        }
        if cfg.update.reset_wait_ms == 0 {
            cfg.update.reset_wait_ms = UpdateConfig::default_reset_wait_ms();
        }
        Ok(cfg)
    }

    pub fn motor_ports(&self) -> Result<Vec<(u8, DriverConfig)>> {
        port_table("motor", &self.motor)
    }

    pub fn sensor_ports(&self) -> Result<Vec<(u8, DriverConfig)>> {
        port_table("sensor", &self.sensor)
    }
}

fn port_table(
    section: &str,
    table: &BTreeMap<String, DriverConfig>,
) -> Result<Vec<(u8, DriverConfig)>> {
    let mut ports = table
        .iter()
        .map(|(key, cfg)| {
            let port: u8 = key
                .parse()
                .with_context(|| format!("[{section}] key {key:?} is not a port number"))?;
            if port == 0 {
                bail!("[{section}] ports are numbered from 1");
            }
            Ok((port, cfg.clone()))
        })
        .collect::<Result<Vec<_>>>()?;
    ports.sort_by_key(|(port, _)| *port);
    Ok(ports)
}
