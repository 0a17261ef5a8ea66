use crate::config::SimConfig;
use crate::units::{DataRate, SimTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A scenario file: a named simulation setup plus where to write its traces.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ScenarioFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: SimConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Destinations for the two telemetry channels. `None` disables a channel.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    pub cwnd: Option<PathBuf>,
    pub pcap: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            cwnd: Some(PathBuf::from("sixth.cwnd")),
            pcap: Some(PathBuf::from("sixth.pcap")),
        }
    }
}

/// Command-line overrides layered on top of a scenario file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub packet_size: Option<u32>,
    pub packets: Option<u32>,
    pub rate: Option<DataRate>,
    pub loss_rate: Option<f64>,
    pub seed: Option<u64>,
    pub stop_time: Option<SimTime>,
    pub nodes: Option<usize>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.packet_size {
            config.generator.packet_size = v;
        }
        if let Some(v) = self.packets {
            config.generator.packets = v;
        }
        if let Some(v) = self.rate {
            config.generator.rate = v;
        }
        if let Some(v) = self.loss_rate {
            config.loss.rate = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.stop_time {
            config.stop_time = v;
        }
        if let Some(v) = self.nodes {
            config.topology.nodes = v;
        }
    }
}
