//! Pluggable collectors.
//!
//! A collector contributes one named field to the status record a party
//! publishes before each round, so the peer can observe it without a
//! dedicated channel.

use std::time::Instant;

use serde_json::{json, Value};

/// A source of auxiliary information published alongside the handshake
/// status.
///
/// Collectors run right before the own status record is written. Their
/// names become top-level fields of that record, which is why the
/// record's own field names are reserved.
pub trait Collector: Send {
    fn name(&self) -> &str;

    fn collect(&mut self) -> Value;
}

/// The built-in collector: process id and session uptime.
pub struct SystemInfo {
    started: Instant,
}

impl SystemInfo {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for SystemInfo {
    fn name(&self) -> &str {
        "system"
    }

    fn collect(&mut self) -> Value {
        json!({
            "pid": std::process::id(),
            "uptime_secs": self.started.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_info_reports_pid() {
        let mut collector = SystemInfo::new();
        let value = collector.collect();
        assert_eq!(value["pid"], std::process::id());
        assert!(value["uptime_secs"].as_f64().unwrap() >= 0.0);
    }
}
