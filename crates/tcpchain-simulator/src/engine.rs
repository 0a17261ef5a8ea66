use crate::link::{PointToPointLink, RateErrorModel};
use crate::queue::EventQueue;
use crate::socket::{Outbox, PacketSink, SimSocket, SocketId};
use crate::topology::{ChainTopology, DeviceId, NodeId};
use crate::trace::{ApplicationSummary, SimulationReport, SinkSummary};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddrV4;
use tcpchain_abstract::packet::{IPV4_HEADER_LEN, PPP_HEADER_LEN, TCP_HEADER_LEN};
use tcpchain_abstract::{
    Application, ChainError, ConfigError, EventHandle, Lifecycle, Scheduler, Segment, SimConfig,
    SimTime, TelemetryRecord, TraceObserver, TransportEndpoint, TransportError,
};
use tracing::{debug, info, warn};

/// Size of a bare acknowledgement on the wire.
const ACK_WIRE_LEN: u64 = (PPP_HEADER_LEN + IPV4_HEADER_LEN + TCP_HEADER_LEN) as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppId(pub usize);

#[derive(Debug)]
pub enum EventType {
    AppStart(AppId),
    AppStop(AppId),
    AppTimer(AppId),
    FrameArrival {
        link: usize,
        to: NodeId,
        segment: Segment,
        frame: Bytes,
    },
    AckArrival {
        socket: SocketId,
        acked: u32,
        loss: bool,
    },
    Inject {
        from: NodeId,
        segment: Segment,
    },
}

/// A compact textual summary of notable events: drops and application lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: SimTime,
    pub description: String,
}

#[derive(Clone, Copy)]
enum AppCall {
    Start,
    Stop,
    Timer(EventHandle),
}

struct AppSlot {
    app: Box<dyn Application>,
    socket: SocketId,
    start: SimTime,
    stop: SimTime,
}

/// Scheduler view handed to an application: its events come back to it.
struct AppScheduler<'a> {
    queue: &'a mut EventQueue<EventType>,
    app: AppId,
}

impl Scheduler for AppScheduler<'_> {
    fn now(&self) -> SimTime {
        self.queue.now()
    }

    fn schedule(&mut self, delay: SimTime) -> EventHandle {
        self.queue.push_after(delay, EventType::AppTimer(self.app))
    }

    fn cancel(&mut self, handle: EventHandle) {
        if !self.queue.cancel(handle) {
            debug!("cancel of {:?} had nothing to do", handle);
        }
    }

    fn is_pending(&self, handle: EventHandle) -> bool {
        self.queue.is_pending(handle)
    }
}

/// Endpoint view of one socket, lent to an application for a single call.
struct SocketPort<'a> {
    socket: &'a mut SimSocket,
    topology: &'a ChainTopology,
    bindings: &'a mut HashMap<SocketAddrV4, SocketId>,
    outbox: &'a mut Outbox,
    now: SimTime,
}

impl TransportEndpoint for SocketPort<'_> {
    fn bind(&mut self) -> Result<(), TransportError> {
        let addr = self
            .topology
            .node_address(self.socket.node())
            .ok_or(TransportError::UnknownSocket(self.socket.id().0))?;
        let local = self.socket.bind(addr)?;
        self.bindings.insert(local, self.socket.id());
        Ok(())
    }

    fn connect(&mut self, peer: SocketAddrV4) -> Result<(), TransportError> {
        let reachable = self.topology.node_for(*peer.ip()).is_some();
        self.socket.connect(peer, reachable, self.now, self.outbox)
    }

    fn send(&mut self, payload: &[u8]) -> Result<usize, TransportError> {
        self.socket.send(payload, self.outbox)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.socket.close()
    }
}

/// Nodes, links, sockets and sinks.
struct Network {
    topology: ChainTopology,
    links: Vec<PointToPointLink>,
    sockets: Vec<SimSocket>,
    bindings: HashMap<SocketAddrV4, SocketId>,
    sinks: Vec<PacketSink>,
    outbox: Outbox,
    ip_identification: u16,
}

impl Network {
    fn port(&mut self, id: SocketId, now: SimTime) -> Result<SocketPort<'_>, TransportError> {
        let socket = self
            .sockets
            .get_mut(id.0)
            .ok_or(TransportError::UnknownSocket(id.0))?;
        Ok(SocketPort {
            socket,
            topology: &self.topology,
            bindings: &mut self.bindings,
            outbox: &mut self.outbox,
            now,
        })
    }

    /// Move `segment` one hop from `at`, or hand it to the local sink.
    fn forward(&mut self, queue: &mut EventQueue<EventType>, at: NodeId, segment: Segment) {
        let Some(dst) = self.topology.node_for(*segment.dst.ip()) else {
            debug!("no route to {}, discarding segment", segment.dst);
            return;
        };
        if dst == at {
            self.deliver(queue, at, segment);
            return;
        }
        let Some((link, next)) = self.topology.next_hop(at, dst) else {
            return;
        };
        self.ip_identification = self.ip_identification.wrapping_add(1);
        let Some(frame) = segment.encode_frame(self.ip_identification) else {
            warn!("segment of {} bytes does not fit a frame, discarding", segment.len());
            return;
        };
        let Some(arrival) = self.links[link].transmit(at, frame.len(), queue.now()) else {
            return;
        };
        queue.push(
            arrival,
            EventType::FrameArrival {
                link,
                to: next,
                segment,
                frame,
            },
        );
    }

    fn deliver(&mut self, queue: &mut EventQueue<EventType>, node: NodeId, segment: Segment) {
        let port = segment.dst.port();
        let Some(sink) = self
            .sinks
            .iter_mut()
            .find(|s| s.node() == node && s.port() == port)
        else {
            debug!("nothing listening on {}, discarding segment", segment.dst);
            return;
        };
        let (acked, loss) = sink.receive(&segment);
        if acked == 0 {
            return;
        }
        let Some(&socket) = self.bindings.get(&segment.src) else {
            return;
        };
        let Some(sender) = self.sockets.get(socket.0).map(SimSocket::node) else {
            return;
        };
        let delay = self.ack_delay(node, sender);
        queue.push_after(
            delay,
            EventType::AckArrival {
                socket,
                acked,
                loss,
            },
        );
    }

    /// Acknowledgements travel back unqueued and are never lost.
    fn ack_delay(&self, from: NodeId, to: NodeId) -> SimTime {
        self.topology
            .path(from, to)
            .into_iter()
            .filter_map(|link| self.topology.link(link))
            .map(|link| link.data_rate.tx_time(ACK_WIRE_LEN).unwrap_or(SimTime::ZERO) + link.delay)
            .fold(SimTime::ZERO, |acc, hop| acc + hop)
    }
}

/// Trace subscriptions and what happened to them.
#[derive(Default)]
struct TraceBus {
    congestion: HashMap<SocketId, Vec<Box<dyn TraceObserver>>>,
    drops: HashMap<DeviceId, Vec<Box<dyn TraceObserver>>>,
    congestion_samples: u64,
    link_drops: u64,
    sink_errors: Vec<String>,
}

impl TraceBus {
    fn publish_congestion(&mut self, socket: SocketId, record: &TelemetryRecord) {
        self.congestion_samples += 1;
        if let Some(observers) = self.congestion.get_mut(&socket) {
            Self::deliver(observers, record, &mut self.sink_errors);
        }
    }

    fn publish_drop(&mut self, device: DeviceId, record: &TelemetryRecord) {
        self.link_drops += 1;
        if let Some(observers) = self.drops.get_mut(&device) {
            Self::deliver(observers, record, &mut self.sink_errors);
        }
    }

    fn deliver(
        observers: &mut [Box<dyn TraceObserver>],
        record: &TelemetryRecord,
        errors: &mut Vec<String>,
    ) {
        for observer in observers.iter_mut() {
            if let Err(err) = observer.observe(record) {
                warn!("telemetry write failed at {}: {}", record.time(), err);
                errors.push(err.to_string());
            }
        }
    }

    fn flush(&mut self) {
        let observers = self
            .congestion
            .values_mut()
            .chain(self.drops.values_mut())
            .flat_map(|list| list.iter_mut());
        for observer in observers {
            if let Err(err) = observer.flush() {
                warn!("telemetry flush failed: {}", err);
                self.sink_errors.push(err.to_string());
            }
        }
    }
}

/// Single-threaded discrete-event driver for the chain: applications, links,
/// sockets and trace taps, dispatched in virtual-time order.
pub struct Simulator {
    queue: EventQueue<EventType>,
    config: SimConfig,
    network: Network,
    apps: Vec<AppSlot>,
    traces: TraceBus,

    /// Timeline of drops and application lifecycle changes.
    pub link_events: Vec<LinkEventSummary>,
}

impl Simulator {
    /// Build the chain described by `config`, with its loss model attached.
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        let topology = ChainTopology::build(&config.topology)?;
        config.loss.validate()?;

        let mut links: Vec<PointToPointLink> = topology
            .links()
            .iter()
            .enumerate()
            .map(|(i, link)| PointToPointLink::new(*link, NodeId(i)))
            .collect();

        if config.loss.rate > 0.0 {
            let model = RateErrorModel::new(config.loss.rate, config.seed)?;
            let attached = links
                .get_mut(config.loss.link)
                .is_some_and(|link| link.set_receive_error_model(NodeId(config.loss.node), model));
            if !attached {
                return Err(ConfigError::InvalidTopology(format!(
                    "node {} has no device on link {}",
                    config.loss.node, config.loss.link
                )));
            }
        }

        Ok(Self {
            queue: EventQueue::new(),
            config,
            network: Network {
                topology,
                links,
                sockets: Vec::new(),
                bindings: HashMap::new(),
                sinks: Vec::new(),
                outbox: Outbox::default(),
                ip_identification: 0,
            },
            apps: Vec::new(),
            traces: TraceBus::default(),
            link_events: Vec::new(),
        })
    }

    /// Expose current simulation config (for diagnostics)
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn topology(&self) -> &ChainTopology {
        &self.network.topology
    }

    pub fn create_socket(&mut self, node: NodeId) -> Result<SocketId, ConfigError> {
        if !self.network.topology.contains(node) {
            return Err(ConfigError::InvalidTopology(format!("no node {}", node.0)));
        }
        let id = SocketId(self.network.sockets.len());
        self.network
            .sockets
            .push(SimSocket::new(id, node, self.config.topology.mss));
        Ok(id)
    }

    pub fn socket(&self, id: SocketId) -> Option<&SimSocket> {
        self.network.sockets.get(id.0)
    }

    /// Listen on `port` at `node`; returns the address peers should connect to.
    pub fn install_sink(&mut self, node: NodeId, port: u16) -> Result<SocketAddrV4, ConfigError> {
        let addr = self
            .network
            .topology
            .node_address(node)
            .ok_or_else(|| ConfigError::InvalidTopology(format!("no node {}", node.0)))?;
        self.network.sinks.push(PacketSink::new(node, port));
        Ok(SocketAddrV4::new(addr, port))
    }

    pub fn sinks(&self) -> &[PacketSink] {
        &self.network.sinks
    }

    /// Install `app` on `socket`, started at `start` and stopped at `stop`.
    pub fn install_app(
        &mut self,
        app: Box<dyn Application>,
        socket: SocketId,
        start: SimTime,
        stop: SimTime,
    ) -> AppId {
        let id = AppId(self.apps.len());
        self.apps.push(AppSlot {
            app,
            socket,
            start,
            stop,
        });
        self.queue.push(start, EventType::AppStart(id));
        self.queue.push(stop, EventType::AppStop(id));
        id
    }

    pub fn app(&self, id: AppId) -> Option<&dyn Application> {
        self.apps.get(id.0).map(|slot| slot.app.as_ref())
    }

    /// Subscribe to congestion window changes of `socket`.
    pub fn trace_congestion_window(
        &mut self,
        socket: SocketId,
        observer: Box<dyn TraceObserver>,
    ) -> Result<(), TransportError> {
        if self.network.sockets.get(socket.0).is_none() {
            return Err(TransportError::UnknownSocket(socket.0));
        }
        self.traces
            .congestion
            .entry(socket)
            .or_default()
            .push(observer);
        Ok(())
    }

    /// Subscribe to frames discarded on receive by `device`.
    pub fn trace_rx_drop(
        &mut self,
        device: DeviceId,
        observer: Box<dyn TraceObserver>,
    ) -> Result<(), ConfigError> {
        if self.network.topology.device_address(device).is_none() {
            return Err(ConfigError::InvalidTopology(format!(
                "node {} has no device on link {}",
                device.node.0, device.link
            )));
        }
        self.traces.drops.entry(device).or_default().push(observer);
        Ok(())
    }

    /// Put a raw segment on the network at `at`, as if `from` had routed it.
    pub fn schedule_segment(&mut self, at: SimTime, from: NodeId, segment: Segment) {
        self.queue.push(at, EventType::Inject { from, segment });
    }

    pub fn peek_next_event_time(&mut self) -> Option<SimTime> {
        self.queue.peek_time()
    }

    pub fn current_time(&self) -> SimTime {
        self.queue.now()
    }

    pub fn remaining_events(&self) -> usize {
        self.queue.len()
    }

    pub fn sink_errors(&self) -> &[String] {
        &self.traces.sink_errors
    }

    /// Process the next event. Returns `Ok(false)` once the queue is empty.
    ///
    /// Application errors are returned to the caller; telemetry failures are
    /// only collected (see [`Simulator::sink_errors`]).
    pub fn step(&mut self) -> Result<bool, ChainError> {
        let Some((time, handle, event)) = self.queue.pop() else {
            return Ok(false);
        };
        debug!("Processing event at {}: {:?}", time, event);

        match event {
            EventType::AppStart(app) => self.dispatch_app(app, AppCall::Start)?,
            EventType::AppStop(app) => self.dispatch_app(app, AppCall::Stop)?,
            EventType::AppTimer(app) => self.dispatch_app(app, AppCall::Timer(handle))?,
            EventType::FrameArrival {
                link,
                to,
                segment,
                frame,
            } => {
                if self.network.links[link].receive_corrupts(to) {
                    self.link_events.push(LinkEventSummary {
                        time,
                        description: format!(
                            "[link {} -> node {}] DROP (rate error model) seq={} len={}",
                            link,
                            to.0,
                            segment.header.seq_num,
                            frame.len()
                        ),
                    });
                    debug!("Frame dropped on receive at node {}", to.0);
                    let device = DeviceId { link, node: to };
                    self.traces
                        .publish_drop(device, &TelemetryRecord::LinkDrop { time, frame });
                } else {
                    self.network.forward(&mut self.queue, to, segment);
                }
            }
            EventType::AckArrival {
                socket,
                acked,
                loss,
            } => {
                if let Some(sock) = self.network.sockets.get_mut(socket.0) {
                    sock.on_ack(acked, loss, time, &mut self.network.outbox);
                }
                self.flush_outbox();
            }
            EventType::Inject { from, segment } => {
                self.network.forward(&mut self.queue, from, segment);
            }
        }
        Ok(true)
    }

    /// Run every event up to and including `stop`, then park the clock there.
    pub fn run_until(&mut self, stop: SimTime) -> Result<(), ChainError> {
        while let Some(next) = self.queue.peek_time() {
            if next > stop {
                break;
            }
            self.step()?;
        }
        self.queue.advance_to(stop);
        Ok(())
    }

    pub fn run_until_complete(&mut self) -> Result<(), ChainError> {
        while self.step()? {}
        Ok(())
    }

    /// Flush every trace observer. Call once at teardown.
    pub fn finish(&mut self) {
        self.traces.flush();
    }

    fn dispatch_app(&mut self, id: AppId, call: AppCall) -> Result<(), ChainError> {
        let now = self.queue.now();
        let Some(slot) = self.apps.get_mut(id.0) else {
            return Ok(());
        };
        let result = {
            let mut scheduler = AppScheduler {
                queue: &mut self.queue,
                app: id,
            };
            let mut endpoint = self.network.port(slot.socket, now)?;
            match call {
                AppCall::Start => slot.app.start(&mut scheduler, &mut endpoint),
                AppCall::Stop => slot.app.stop(&mut scheduler, &mut endpoint),
                AppCall::Timer(handle) => slot.app.on_event(&mut scheduler, &mut endpoint, handle),
            }
        };

        match (&call, &result) {
            (AppCall::Start, Ok(())) => self.note_app(now, id, "started"),
            (AppCall::Stop, Ok(())) => self.note_app(now, id, "stopped"),
            (_, Err(err)) => {
                warn!("application {} failed at {}: {}", id.0, now, err);
                self.note_app(now, id, &format!("failed: {err}"));
            }
            _ => {}
        }
        self.flush_outbox();
        result
    }

    fn note_app(&mut self, time: SimTime, id: AppId, what: &str) {
        info!("application {} {} at {}", id.0, what, time);
        self.link_events.push(LinkEventSummary {
            time,
            description: format!("[app {}] {}", id.0, what),
        });
    }

    /// Apply what sockets produced during the last callback.
    fn flush_outbox(&mut self) {
        let outbox = std::mem::take(&mut self.network.outbox);
        for (socket, record) in &outbox.records {
            self.traces.publish_congestion(*socket, record);
        }
        for (node, segment) in outbox.segments {
            self.network.forward(&mut self.queue, node, segment);
        }
    }

    /// Produce a serializable snapshot of the current simulation state.
    pub fn export_report(&self) -> SimulationReport {
        SimulationReport {
            config: self.config.clone(),
            duration: self.queue.now(),
            applications: self
                .apps
                .iter()
                .map(|slot| ApplicationSummary {
                    lifecycle: slot.app.lifecycle(),
                    packets_sent: slot.app.packets_sent(),
                    start: slot.start,
                    stop: slot.stop,
                })
                .collect(),
            sinks: self
                .network
                .sinks
                .iter()
                .map(|sink| SinkSummary {
                    node: sink.node().0,
                    port: sink.port(),
                    bytes_received: sink.bytes_received(),
                    segments_received: sink.segments_received(),
                })
                .collect(),
            frames_transmitted: self
                .network
                .links
                .iter()
                .map(PointToPointLink::frames_transmitted)
                .sum(),
            congestion_samples: self.traces.congestion_samples,
            link_drops: self.traces.link_drops,
            sink_errors: self.traces.sink_errors.clone(),
            link_events: self.link_events.clone(),
        }
    }

    /// Lifecycle of every installed application, in installation order.
    pub fn app_states(&self) -> Vec<Lifecycle> {
        self.apps.iter().map(|slot| slot.app.lifecycle()).collect()
    }
}
