use bytes::BytesMut;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use tcpchain_abstract::{Segment, SimTime, TelemetryRecord, TransportError};
use tracing::debug;

use crate::topology::NodeId;

/// First data sequence number on every connection.
pub const INITIAL_SEQ: u32 = 1;
const INITIAL_SSTHRESH: u32 = 65_535;
/// Receiver window advertised by every sink.
const RECEIVE_WINDOW: u32 = 65_535;
const EPHEMERAL_PORT_BASE: u16 = 49_153;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Fresh,
    Bound,
    Connected,
    Closed,
}

/// Work produced while a socket was being driven, applied by the engine afterwards.
#[derive(Debug, Default)]
pub struct Outbox {
    pub segments: Vec<(NodeId, Segment)>,
    pub records: Vec<(SocketId, TelemetryRecord)>,
}

/// Sending half of a stream connection.
///
/// Stands in for a real TCP: bytes are cut into MSS-sized segments and
/// released while the congestion window allows. The window follows a plain
/// additive-increase / multiplicative-decrease rule so that the congestion
/// window trace has something to record. Lost segments are not retransmitted.
#[derive(Debug)]
pub struct SimSocket {
    id: SocketId,
    node: NodeId,
    state: SocketState,
    local: Option<SocketAddrV4>,
    peer: Option<SocketAddrV4>,
    mss: u32,
    cwnd: u32,
    ssthresh: u32,
    next_seq: u32,
    in_flight: u32,
    pending: BytesMut,
    bytes_accepted: u64,
    segments_sent: u64,
}

impl SimSocket {
    pub fn new(id: SocketId, node: NodeId, mss: u32) -> Self {
        Self {
            id,
            node,
            state: SocketState::Fresh,
            local: None,
            peer: None,
            mss,
            cwnd: 0,
            ssthresh: INITIAL_SSTHRESH,
            next_seq: INITIAL_SEQ,
            in_flight: 0,
            pending: BytesMut::new(),
            bytes_accepted: 0,
            segments_sent: 0,
        }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn local(&self) -> Option<SocketAddrV4> {
        self.local
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn bytes_accepted(&self) -> u64 {
        self.bytes_accepted
    }

    pub fn segments_sent(&self) -> u64 {
        self.segments_sent
    }

    pub fn bind(&mut self, addr: Ipv4Addr) -> Result<SocketAddrV4, TransportError> {
        match self.state {
            SocketState::Fresh => {}
            SocketState::Closed => return Err(TransportError::Closed),
            _ => return Err(TransportError::AlreadyBound),
        }
        let port = EPHEMERAL_PORT_BASE.wrapping_add(self.id.0 as u16);
        let local = SocketAddrV4::new(addr, port);
        self.local = Some(local);
        self.state = SocketState::Bound;
        Ok(local)
    }

    pub fn connect(
        &mut self,
        peer: SocketAddrV4,
        reachable: bool,
        now: SimTime,
        outbox: &mut Outbox,
    ) -> Result<(), TransportError> {
        match self.state {
            SocketState::Bound => {}
            SocketState::Fresh => return Err(TransportError::NotBound),
            SocketState::Connected => {
                return Err(TransportError::AlreadyConnected(
                    self.peer.unwrap_or(peer),
                ));
            }
            SocketState::Closed => return Err(TransportError::Closed),
        }
        if !reachable {
            return Err(TransportError::NoRoute(*peer.ip()));
        }
        self.peer = Some(peer);
        self.state = SocketState::Connected;
        debug!("socket {:?} connected to {}", self.id, peer);
        self.set_cwnd(self.mss, now, outbox);
        Ok(())
    }

    pub fn send(&mut self, payload: &[u8], outbox: &mut Outbox) -> Result<usize, TransportError> {
        match self.state {
            SocketState::Connected => {}
            SocketState::Closed => return Err(TransportError::Closed),
            _ => return Err(TransportError::NotConnected),
        }
        self.pending.extend_from_slice(payload);
        self.bytes_accepted += payload.len() as u64;
        self.transmit(outbox);
        Ok(payload.len())
    }

    /// Stop accepting data. Bytes already queued keep draining.
    pub fn close(&mut self) -> Result<(), TransportError> {
        if self.state == SocketState::Closed {
            return Err(TransportError::Closed);
        }
        self.state = SocketState::Closed;
        Ok(())
    }

    /// `acked` bytes left the network; `loss` reports a sequence gap seen by the receiver.
    pub fn on_ack(&mut self, acked: u32, loss: bool, now: SimTime, outbox: &mut Outbox) {
        self.in_flight = self.in_flight.saturating_sub(acked);
        let next = if loss {
            self.ssthresh = (self.cwnd / 2).max(2 * self.mss);
            self.ssthresh
        } else if self.cwnd < self.ssthresh {
            self.cwnd.saturating_add(self.mss)
        } else {
            let step = u64::from(self.mss) * u64::from(self.mss) / u64::from(self.cwnd.max(1));
            self.cwnd.saturating_add(step.max(1) as u32)
        };
        self.set_cwnd(next, now, outbox);
        self.transmit(outbox);
    }

    fn set_cwnd(&mut self, new: u32, now: SimTime, outbox: &mut Outbox) {
        if new == self.cwnd {
            return;
        }
        let old = self.cwnd;
        self.cwnd = new;
        outbox.records.push((
            self.id,
            TelemetryRecord::CongestionSample {
                time: now,
                old,
                new,
            },
        ));
    }

    fn transmit(&mut self, outbox: &mut Outbox) {
        let (Some(local), Some(peer)) = (self.local, self.peer) else {
            return;
        };
        let window = self.cwnd.min(RECEIVE_WINDOW);
        while !self.pending.is_empty() {
            let len = self.pending.len().min(self.mss as usize) as u32;
            if self.in_flight > 0 && self.in_flight + len > window {
                break;
            }
            let payload = self.pending.split_to(len as usize).freeze();
            let segment = Segment::data(local, peer, self.next_seq, payload);
            self.next_seq = self.next_seq.wrapping_add(len);
            self.in_flight += len;
            self.segments_sent += 1;
            outbox.segments.push((self.node, segment));
        }
    }
}

/// Passive receiver bound to a port, counting what arrives.
#[derive(Debug)]
pub struct PacketSink {
    node: NodeId,
    port: u16,
    bytes_received: u64,
    segments_received: u64,
    expected: HashMap<SocketAddrV4, u32>,
}

impl PacketSink {
    pub fn new(node: NodeId, port: u16) -> Self {
        Self {
            node,
            port,
            bytes_received: 0,
            segments_received: 0,
            expected: HashMap::new(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn segments_received(&self) -> u64 {
        self.segments_received
    }

    /// Accept a segment. Returns the bytes to acknowledge, missing ones
    /// included, and whether a gap was detected.
    pub fn receive(&mut self, segment: &Segment) -> (u32, bool) {
        let len = segment.len() as u32;
        let expected = self.expected.entry(segment.src).or_insert(INITIAL_SEQ);
        let gap = segment.header.seq_num.wrapping_sub(*expected);
        // Anything "behind" the expected sequence wraps to a huge gap: a duplicate.
        if gap > u32::MAX / 2 {
            return (0, false);
        }
        *expected = segment.header.seq_num.wrapping_add(len);
        self.bytes_received += u64::from(len);
        self.segments_received += 1;
        (len + gap, gap > 0)
    }
}
