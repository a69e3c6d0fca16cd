use chrono::{Local, SecondsFormat};
use serde::Serialize;
use std::time::Instant;

/// Stamps monitor lines with wall-clock time and milliseconds since start.
#[derive(Clone, Copy, Debug)]
pub struct MonitorClock {
    started: Instant,
}

#[derive(Clone, Debug, Serialize)]
pub struct Stamp {
    /// RFC 3339, local offset, millisecond precision.
    pub ts: String,
    pub t_ms: u64,
}

impl MonitorClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn stamp(&self) -> Stamp {
        Stamp {
            ts: Local::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            t_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}
