pub mod config;
pub mod error;
pub mod interface;
pub mod packet;
pub mod scenario;
pub mod units;

pub use config::{
    GeneratorSetup, LinkConfig, LossConfig, SimConfig, TopologyConfig, TrafficGeneratorConfig,
};
pub use error::{ChainError, ConfigError, LifecycleError, SinkError, TransportError};
pub use interface::{
    Application, EventHandle, Lifecycle, Scheduler, TelemetryRecord, TraceObserver,
    TransportEndpoint,
};
pub use packet::{MAX_SEGMENT_PAYLOAD, Segment, TcpHeader};

pub use scenario::{OutputConfig, ScenarioFile, SimConfigOverride};
pub use units::{DataRate, SimTime};
