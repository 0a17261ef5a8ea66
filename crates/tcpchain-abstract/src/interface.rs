use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddrV4;

use crate::error::{ChainError, SinkError, TransportError};
use crate::units::SimTime;

/// Handle to an event owned by a [`Scheduler`].
///
/// A handle is an index into the scheduler's slot table plus the generation
/// the slot had when the event was scheduled. Once the event fires or is
/// cancelled the slot's generation moves on, so a stale handle can never
/// reach a newer event that reuses the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    index: u32,
    generation: u32,
}

impl EventHandle {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub const fn index(&self) -> u32 {
        self.index
    }

    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

/// The virtual clock and event dispatch, as seen by an application.
/// Events scheduled here come back to the caller through [`Application::on_event`].
pub trait Scheduler {
    /// Current virtual time.
    fn now(&self) -> SimTime;

    /// Schedule a wake-up `delay` after [`Scheduler::now`].
    fn schedule(&mut self, delay: SimTime) -> EventHandle;

    /// Cancel a pending event. Stale, fired or unknown handles are ignored.
    fn cancel(&mut self, handle: EventHandle);

    /// Whether `handle` still refers to an event that has neither fired nor been cancelled.
    fn is_pending(&self, handle: EventHandle) -> bool;
}

/// Connection-oriented send side of a transport protocol.
pub trait TransportEndpoint {
    fn bind(&mut self) -> Result<(), TransportError>;

    fn connect(&mut self, peer: SocketAddrV4) -> Result<(), TransportError>;

    /// Hand `payload` to the transport. Returns the number of bytes accepted.
    fn send(&mut self, payload: &[u8]) -> Result<usize, TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

/// Lifecycle of an installed application. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Running => "running",
            Lifecycle::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Something the host installs on a node with a start and stop time.
///
/// The endpoint is lent on every call; the host owns it.
pub trait Application {
    fn start(
        &mut self,
        scheduler: &mut dyn Scheduler,
        endpoint: &mut dyn TransportEndpoint,
    ) -> Result<(), ChainError>;

    fn stop(
        &mut self,
        scheduler: &mut dyn Scheduler,
        endpoint: &mut dyn TransportEndpoint,
    ) -> Result<(), ChainError>;

    /// Called when an event previously scheduled by this application fires.
    fn on_event(
        &mut self,
        scheduler: &mut dyn Scheduler,
        endpoint: &mut dyn TransportEndpoint,
        handle: EventHandle,
    ) -> Result<(), ChainError>;

    fn lifecycle(&self) -> Lifecycle;

    fn packets_sent(&self) -> u32 {
        0
    }
}

/// A single observation captured by the telemetry taps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryRecord {
    /// Congestion window moved from `old` to `new` bytes.
    CongestionSample { time: SimTime, old: u32, new: u32 },
    /// A link device discarded `frame`.
    LinkDrop { time: SimTime, frame: Bytes },
}

impl TelemetryRecord {
    pub fn time(&self) -> SimTime {
        match self {
            TelemetryRecord::CongestionSample { time, .. } => *time,
            TelemetryRecord::LinkDrop { time, .. } => *time,
        }
    }
}

/// Subscriber to trace taps. An observer only overrides the taps it cares about.
pub trait TraceObserver {
    fn on_congestion_window_change(
        &mut self,
        _time: SimTime,
        _old: u32,
        _new: u32,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_receive_drop(&mut self, _time: SimTime, _frame: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Route a record to the matching typed hook.
    fn observe(&mut self, record: &TelemetryRecord) -> Result<(), SinkError> {
        match record {
            TelemetryRecord::CongestionSample { time, old, new } => {
                self.on_congestion_window_change(*time, *old, *new)
            }
            TelemetryRecord::LinkDrop { time, frame } => self.on_receive_drop(*time, frame),
        }
    }
}
