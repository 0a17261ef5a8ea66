use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use tcpchain_abstract::{DataRate, ScenarioFile, SimConfigOverride, SimTime};
use tcpchain_simulator::SimulationReport;
use tcpchain_simulator::scenario_runner::{load_scenario, run_scenario};

#[derive(Parser, Debug)]
#[command(author, version, about = "Rate-paced traffic over a lossy point-to-point chain")]
struct Args {
    /// Load a scenario from disk. Without one, the reference chain runs.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Bytes per application packet.
    #[arg(long)]
    packet_size: Option<u32>,

    /// Number of packets to send.
    #[arg(long)]
    packets: Option<u32>,

    /// Generator rate, e.g. `1Mbps`.
    #[arg(long)]
    rate: Option<DataRate>,

    /// Per-frame loss probability on the lossy device.
    #[arg(long)]
    loss_rate: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Simulation end time, e.g. `20s`.
    #[arg(long)]
    stop: Option<SimTime>,

    /// Number of nodes in the chain.
    #[arg(long)]
    nodes: Option<usize>,

    /// Congestion window trace file.
    #[arg(long)]
    cwnd_out: Option<PathBuf>,

    /// Capture file for frames dropped on receive.
    #[arg(long)]
    pcap_out: Option<PathBuf>,

    /// Write a JSON report of the finished simulation.
    #[arg(long)]
    report_out: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> SimConfigOverride {
        SimConfigOverride {
            packet_size: self.packet_size,
            packets: self.packets,
            rate: self.rate,
            loss_rate: self.loss_rate,
            seed: self.seed,
            stop_time: self.stop,
            nodes: self.nodes,
        }
    }

    fn scenario(&self) -> Result<ScenarioFile> {
        let mut scenario = match &self.scenario {
            Some(path) => load_scenario(path)?,
            None => ScenarioFile {
                name: "reference-chain".into(),
                ..Default::default()
            },
        };
        self.overrides().apply_to(&mut scenario.config);
        if let Some(path) = &self.cwnd_out {
            scenario.output.cwnd = Some(path.clone());
        }
        if let Some(path) = &self.pcap_out {
            scenario.output.pcap = Some(path.clone());
        }
        Ok(scenario)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("tcpchain-sim starting…");

    let scenario = args.scenario()?;
    let report = run_scenario(&scenario)?;

    if let Some(path) = &args.report_out {
        write_report(path, &report)?;
    }
    for err in &report.sink_errors {
        eprintln!("warning: {err}");
    }

    Ok(())
}

fn write_report(path: &Path, report: &SimulationReport) -> Result<()> {
    let data =
        serde_json::to_vec_pretty(report).context("Failed to serialize simulation report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!("Simulation report written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_scenario() {
        let args = Args::parse_from([
            "tcpchain-sim",
            "--packets",
            "10",
            "--rate",
            "2Mbps",
            "--stop",
            "1s",
            "--cwnd-out",
            "out.cwnd",
        ]);
        let scenario = args.scenario().unwrap();
        assert_eq!(scenario.config.generator.packets, 10);
        assert_eq!(scenario.config.generator.rate, DataRate::from_bps(2_000_000));
        assert_eq!(scenario.config.stop_time, SimTime::from_secs(1));
        assert_eq!(scenario.output.cwnd, Some(PathBuf::from("out.cwnd")));
        assert_eq!(scenario.output.pcap, Some(PathBuf::from("sixth.pcap")));
    }

    #[test]
    fn bad_rate_is_rejected_by_the_parser() {
        assert!(Args::try_parse_from(["tcpchain-sim", "--rate", "fast"]).is_err());
    }
}
