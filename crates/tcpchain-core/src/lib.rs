//! The traffic generator state machine and the telemetry sink that records
//! what the transport and link layers report while it runs.

pub mod generator;
pub mod telemetry;

pub use generator::TrafficGenerator;
pub use telemetry::{CongestionTraceWriter, LINKTYPE_PPP, PcapWriter, RecordingObserver};
