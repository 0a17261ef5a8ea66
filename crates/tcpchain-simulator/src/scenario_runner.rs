use anyhow::Context;
use std::fs;
use std::path::Path;
use tcpchain_abstract::{ChainError, ScenarioFile, SimConfig};
use tcpchain_core::{CongestionTraceWriter, LINKTYPE_PPP, PcapWriter, TrafficGenerator};
use tracing::info;

use crate::engine::{AppId, Simulator};
use crate::socket::SocketId;
use crate::topology::{DeviceId, NodeId};
use crate::trace::SimulationReport;

/// A built chain with the generator installed but no traces attached yet.
pub struct ChainSetup {
    pub sim: Simulator,
    pub socket: SocketId,
    pub app: AppId,
}

impl ChainSetup {
    /// The device carrying the configured receive error model.
    pub fn lossy_device(&self) -> DeviceId {
        let loss = &self.sim.config().loss;
        DeviceId {
            link: loss.link,
            node: NodeId(loss.node),
        }
    }
}

pub fn load_scenario(path: &Path) -> anyhow::Result<ScenarioFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse scenario {}", path.display()))
}

/// Build the chain, install a sink on the sink node and the traffic
/// generator on a fresh socket of the source node.
pub fn build_chain(config: &SimConfig) -> Result<ChainSetup, ChainError> {
    let setup = &config.generator;
    setup.validate()?;
    let mut sim = Simulator::new(config.clone())?;

    let peer = sim.install_sink(NodeId(setup.sink_node), setup.port)?;
    let generator_config = setup.generator_config(peer);
    generator_config.validate()?;

    let socket = sim.create_socket(NodeId(setup.source_node))?;
    let app = sim.install_app(
        Box::new(TrafficGenerator::new(generator_config)),
        socket,
        setup.start,
        setup.stop,
    );
    Ok(ChainSetup { sim, socket, app })
}

/// Run a scenario to its stop time, writing the trace files it names.
pub fn run_scenario(scenario: &ScenarioFile) -> anyhow::Result<SimulationReport> {
    if !scenario.name.is_empty() {
        info!("Running Scenario: {}", scenario.name);
    }
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }

    let mut chain = build_chain(&scenario.config).context("Invalid scenario configuration")?;

    if let Some(path) = &scenario.output.cwnd {
        let writer = CongestionTraceWriter::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        chain
            .sim
            .trace_congestion_window(chain.socket, Box::new(writer))?;
    }
    if let Some(path) = &scenario.output.pcap {
        let writer = PcapWriter::create(path, LINKTYPE_PPP)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let device = chain.lossy_device();
        chain.sim.trace_rx_drop(device, Box::new(writer))?;
    }

    let stop = scenario.config.stop_time;
    chain
        .sim
        .run_until(stop)
        .with_context(|| format!("Simulation aborted before {}", stop))?;
    chain.sim.finish();

    let report = chain.sim.export_report();
    info!(
        "Finished at {}: {} packets sent, {} bytes delivered, {} drops",
        report.duration,
        report.packets_sent(),
        report.bytes_delivered(),
        report.link_drops
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcpchain_abstract::{ConfigError, DataRate, OutputConfig, SimTime};

    #[test]
    fn build_chain_rejects_zero_rate_before_running() {
        let mut config = SimConfig::default();
        config.generator.rate = DataRate::from_bps(0);
        assert!(matches!(
            build_chain(&config),
            Err(ChainError::Config(ConfigError::ZeroRate))
        ));
    }

    #[test]
    fn build_chain_rejects_missing_nodes() {
        let mut config = SimConfig::default();
        config.generator.sink_node = 9;
        assert!(build_chain(&config).is_err());
    }

    #[test]
    fn build_chain_rejects_stop_before_start() {
        let mut config = SimConfig::default();
        config.generator.start = SimTime::from_secs(5);
        config.generator.stop = SimTime::from_secs(1);
        assert!(matches!(
            build_chain(&config),
            Err(ChainError::Config(ConfigError::InvalidWindow { .. }))
        ));
    }

    #[test]
    fn build_chain_rejects_mss_beyond_one_frame() {
        let mut config = SimConfig::default();
        config.topology.mss = 70_000;
        config.generator.packet_size = 70_000;
        assert!(matches!(
            build_chain(&config),
            Err(ChainError::Config(ConfigError::InvalidTopology(_)))
        ));
    }

    #[test]
    fn reference_scenario_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scenarios/reference.toml");
        let scenario = load_scenario(&path).unwrap();
        assert_eq!(scenario.name, "reference-chain");
        assert_eq!(scenario.config, SimConfig::default());
        assert_eq!(scenario.output, OutputConfig::default());
    }

    #[test]
    fn scenario_file_parses_with_defaults() {
        let dir = std::env::temp_dir().join(format!("tcpchain-scenario-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("short.toml");
        fs::write(
            &path,
            r#"
name = "short"

[config]
stop_time = "2s"

[config.generator]
packets = 10
"#,
        )
        .unwrap();

        let scenario = load_scenario(&path).unwrap();
        assert_eq!(scenario.name, "short");
        assert_eq!(scenario.config.generator.packets, 10);
        assert_eq!(scenario.config.generator.packet_size, 1040);
        assert_eq!(scenario.config.stop_time, SimTime::from_secs(2));
        fs::remove_dir_all(&dir).ok();
    }
}
