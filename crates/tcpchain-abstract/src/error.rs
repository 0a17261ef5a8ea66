use std::net::{Ipv4Addr, SocketAddrV4};

use thiserror::Error;

use crate::interface::Lifecycle;
use crate::units::SimTime;

/// Invalid configuration, detected before any traffic is generated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("packet size must be greater than zero")]
    ZeroPacketSize,
    #[error("total packet count must be greater than zero")]
    ZeroPacketCount,
    #[error("data rate must be greater than zero")]
    ZeroRate,
    #[error("invalid data rate `{0}`")]
    InvalidDataRate(String),
    #[error("invalid time value `{0}`")]
    InvalidTime(String),
    #[error("loss rate {0} is outside [0, 1]")]
    InvalidLossRate(f64),
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error("application stops at {stop}, before it starts at {start}")]
    InvalidWindow { start: SimTime, stop: SimTime },
}

/// An operation that is not allowed in the generator's current lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {operation} an application that is {state}")]
pub struct LifecycleError {
    pub operation: &'static str,
    pub state: Lifecycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("socket is already bound")]
    AlreadyBound,
    #[error("socket is not bound")]
    NotBound,
    #[error("socket is already connected to {0}")]
    AlreadyConnected(SocketAddrV4),
    #[error("socket is not connected")]
    NotConnected,
    #[error("socket is closed")]
    Closed,
    #[error("no route to host {0}")]
    NoRoute(Ipv4Addr),
    #[error("unknown socket #{0}")]
    UnknownSocket(usize),
}

/// Telemetry persistence failure. Never alters traffic generation.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("trace I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("record at {got} is older than the previous record at {last}")]
    OutOfOrder { last: SimTime, got: SimTime },
    #[error("frame of {0} bytes does not fit a capture record")]
    FrameTooLarge(usize),
    #[error("timestamp {0} does not fit a capture record")]
    TimestampOutOfRange(SimTime),
}

/// Any error surfaced by the core to its host.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}
