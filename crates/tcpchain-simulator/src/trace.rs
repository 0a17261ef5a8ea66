use serde::Serialize;
use tcpchain_abstract::{Lifecycle, SimConfig, SimTime};

use crate::engine::LinkEventSummary;

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationSummary {
    pub lifecycle: Lifecycle,
    pub packets_sent: u32,
    pub start: SimTime,
    pub stop: SimTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkSummary {
    pub node: usize,
    pub port: u16,
    pub bytes_received: u64,
    pub segments_received: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub duration: SimTime,
    pub applications: Vec<ApplicationSummary>,
    pub sinks: Vec<SinkSummary>,
    pub frames_transmitted: u64,
    pub congestion_samples: u64,
    pub link_drops: u64,
    /// Telemetry write failures; the run carried on regardless.
    pub sink_errors: Vec<String>,
    pub link_events: Vec<LinkEventSummary>,
}

impl SimulationReport {
    pub fn packets_sent(&self) -> u32 {
        self.applications.iter().map(|app| app.packets_sent).sum()
    }

    pub fn bytes_delivered(&self) -> u64 {
        self.sinks.iter().map(|sink| sink.bytes_received).sum()
    }
}
