use serde::{Deserialize, Serialize};
use std::net::SocketAddrV4;

use crate::error::ConfigError;
use crate::units::{DataRate, SimTime};

/// Everything a traffic generator needs, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficGeneratorConfig {
    pub peer: SocketAddrV4,
    pub packet_size: u32,
    pub total_packets: u32,
    pub rate: DataRate,
}

impl TrafficGeneratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_size == 0 {
            return Err(ConfigError::ZeroPacketSize);
        }
        if self.total_packets == 0 {
            return Err(ConfigError::ZeroPacketCount);
        }
        if self.rate.is_zero() {
            return Err(ConfigError::ZeroRate);
        }
        Ok(())
    }

    /// Gap between consecutive sends: `packet_size * 8 / rate`.
    pub fn pacing_interval(&self) -> Result<SimTime, ConfigError> {
        self.validate()?;
        self.rate
            .tx_time(u64::from(self.packet_size))
            .ok_or(ConfigError::ZeroRate)
    }

    /// [`TrafficGeneratorConfig::pacing_interval`] in floating point seconds.
    pub fn pacing_interval_secs(&self) -> Result<f64, ConfigError> {
        self.validate()?;
        self.rate
            .tx_secs(u64::from(self.packet_size))
            .ok_or(ConfigError::ZeroRate)
    }
}

/// A point-to-point link: capacity and one-way propagation delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub data_rate: DataRate,
    pub delay: SimTime,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            data_rate: DataRate::from_bps(5_000_000),
            delay: SimTime::from_millis(2),
        }
    }
}

/// A line of `nodes` hosts joined by `nodes - 1` identical links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub nodes: usize,
    pub link: LinkConfig,
    /// Maximum segment size used by the transport, in bytes.
    pub mss: u32,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            nodes: 4,
            link: LinkConfig::default(),
            mss: 536,
        }
    }
}

/// Rate error model attached to the receive side of one device.
/// The device is identified by its link and the node it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub link: usize,
    pub node: usize,
    pub rate: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            link: 0,
            node: 1,
            rate: 0.00001,
        }
    }
}

impl LossConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.rate) {
            return Err(ConfigError::InvalidLossRate(self.rate));
        }
        Ok(())
    }
}

/// Host-side installation of the traffic generator and its sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSetup {
    pub source_node: usize,
    pub sink_node: usize,
    pub port: u16,
    pub packet_size: u32,
    pub packets: u32,
    pub rate: DataRate,
    pub start: SimTime,
    pub stop: SimTime,
}

impl Default for GeneratorSetup {
    fn default() -> Self {
        Self {
            source_node: 0,
            sink_node: 3,
            port: 1090,
            packet_size: 1040,
            packets: 1000,
            rate: DataRate::from_bps(1_000_000),
            start: SimTime::ZERO,
            stop: SimTime::from_secs(20),
        }
    }
}

impl GeneratorSetup {
    /// The active window must not end before it begins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stop < self.start {
            return Err(ConfigError::InvalidWindow {
                start: self.start,
                stop: self.stop,
            });
        }
        Ok(())
    }

    pub fn generator_config(&self, peer: SocketAddrV4) -> TrafficGeneratorConfig {
        TrafficGeneratorConfig {
            peer,
            packet_size: self.packet_size,
            total_packets: self.packets,
            rate: self.rate,
        }
    }
}

/// Full simulation parameters. Defaults reproduce the reference chain:
/// four nodes, 5 Mbps / 2 ms links, loss 1e-5 on node 1's receive side of
/// link 0, and a 1 Mbps generator sending 1000 packets of 1040 bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub topology: TopologyConfig,
    pub loss: LossConfig,
    pub generator: GeneratorSetup,
    pub stop_time: SimTime,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            topology: TopologyConfig::default(),
            loss: LossConfig::default(),
            generator: GeneratorSetup::default(),
            stop_time: SimTime::from_secs(20),
            seed: 0,
        }
    }
}
