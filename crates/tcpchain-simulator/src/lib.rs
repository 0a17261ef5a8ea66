//! Discrete-event model of a point-to-point chain: links with rate-based
//! loss, a reference stream socket, packet sinks, and trace taps feeding
//! the congestion-window and pcap writers.

pub mod engine;
pub mod link;
pub mod queue;
pub mod scenario_runner;
pub mod socket;
pub mod topology;
pub mod trace;

pub use engine::{AppId, LinkEventSummary, Simulator};
pub use link::{PointToPointLink, RateErrorModel};
pub use queue::EventQueue;
pub use socket::{PacketSink, SimSocket, SocketId};
pub use topology::{ChainTopology, DeviceId, NodeId};
pub use trace::{ApplicationSummary, SimulationReport, SinkSummary};
