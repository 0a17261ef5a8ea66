use tcpchain_abstract::{
    Application, ChainError, EventHandle, Lifecycle, LifecycleError, Scheduler,
    TrafficGeneratorConfig, TransportEndpoint,
};
use tracing::{debug, info, warn};

/// Sends `total_packets` packets of `packet_size` bytes to a peer at a fixed
/// bit rate, one packet every `packet_size * 8 / rate` seconds.
///
/// Idle -> Running on [`TrafficGenerator::start`], -> Stopped on
/// [`TrafficGenerator::stop`]. At most one send event is outstanding, and only
/// while running with packets left to send.
#[derive(Debug)]
pub struct TrafficGenerator {
    config: TrafficGeneratorConfig,
    lifecycle: Lifecycle,
    packets_sent: u32,
    send_event: Option<EventHandle>,
}

impl TrafficGenerator {
    pub fn new(config: TrafficGeneratorConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::Idle,
            packets_sent: 0,
            send_event: None,
        }
    }

    pub fn config(&self) -> &TrafficGeneratorConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn packets_sent(&self) -> u32 {
        self.packets_sent
    }

    pub fn pending_event(&self) -> Option<EventHandle> {
        self.send_event
    }

    /// Bind and connect the endpoint, then send the first packet immediately.
    pub fn start(
        &mut self,
        scheduler: &mut dyn Scheduler,
        endpoint: &mut dyn TransportEndpoint,
    ) -> Result<(), ChainError> {
        if self.lifecycle != Lifecycle::Idle {
            return Err(LifecycleError {
                operation: "start",
                state: self.lifecycle,
            }
            .into());
        }
        let interval = self.config.pacing_interval()?;

        let peer = self.config.peer;
        if let Err(err) = endpoint.bind().and_then(|()| endpoint.connect(peer)) {
            warn!("could not open endpoint to {}: {}", peer, err);
            self.halt(endpoint);
            return Err(err.into());
        }

        self.packets_sent = 0;
        self.lifecycle = Lifecycle::Running;
        info!(
            "generator started at {}: {} x {} bytes to {} every {}",
            scheduler.now(),
            self.config.total_packets,
            self.config.packet_size,
            self.config.peer,
            interval
        );
        self.send_packet(scheduler, endpoint)
    }

    /// Send one packet and schedule the next one. Does nothing unless running.
    pub fn send_packet(
        &mut self,
        scheduler: &mut dyn Scheduler,
        endpoint: &mut dyn TransportEndpoint,
    ) -> Result<(), ChainError> {
        if self.lifecycle != Lifecycle::Running {
            debug!("send ignored while {}", self.lifecycle);
            return Ok(());
        }
        // Whatever event brought us here has been consumed.
        self.send_event = None;

        let payload = vec![0u8; self.config.packet_size as usize];
        if let Err(err) = endpoint.send(&payload) {
            warn!("send failed at {}: {}", scheduler.now(), err);
            self.halt(endpoint);
            return Err(err.into());
        }
        self.packets_sent += 1;
        debug!(
            "sent packet {}/{} at {}",
            self.packets_sent,
            self.config.total_packets,
            scheduler.now()
        );

        if self.packets_sent < self.config.total_packets {
            let interval = self.config.pacing_interval()?;
            self.send_event = Some(scheduler.schedule(interval));
        } else {
            info!(
                "generator finished all {} packets at {}",
                self.packets_sent,
                scheduler.now()
            );
        }
        Ok(())
    }

    /// Cancel the pending send and close the endpoint. Calling it again is a no-op.
    pub fn stop(
        &mut self,
        scheduler: &mut dyn Scheduler,
        endpoint: &mut dyn TransportEndpoint,
    ) -> Result<(), ChainError> {
        match self.lifecycle {
            Lifecycle::Stopped => Ok(()),
            Lifecycle::Idle => {
                // Never started, so the endpoint was never opened.
                self.lifecycle = Lifecycle::Stopped;
                Ok(())
            }
            Lifecycle::Running => {
                if let Some(handle) = self.send_event.take() {
                    scheduler.cancel(handle);
                }
                self.lifecycle = Lifecycle::Stopped;
                info!(
                    "generator stopped at {} after {} packets",
                    scheduler.now(),
                    self.packets_sent
                );
                endpoint.close()?;
                Ok(())
            }
        }
    }

    /// Terminal transition after a transport failure in `start` or
    /// `send_packet`. The failure itself is returned to the caller, so a close
    /// error here is only logged.
    fn halt(&mut self, endpoint: &mut dyn TransportEndpoint) {
        self.lifecycle = Lifecycle::Stopped;
        self.send_event = None;
        if let Err(err) = endpoint.close() {
            debug!("close after failed send: {}", err);
        }
    }
}

impl Application for TrafficGenerator {
    fn start(
        &mut self,
        scheduler: &mut dyn Scheduler,
        endpoint: &mut dyn TransportEndpoint,
    ) -> Result<(), ChainError> {
        TrafficGenerator::start(self, scheduler, endpoint)
    }

    fn stop(
        &mut self,
        scheduler: &mut dyn Scheduler,
        endpoint: &mut dyn TransportEndpoint,
    ) -> Result<(), ChainError> {
        TrafficGenerator::stop(self, scheduler, endpoint)
    }

    fn on_event(
        &mut self,
        scheduler: &mut dyn Scheduler,
        endpoint: &mut dyn TransportEndpoint,
        handle: EventHandle,
    ) -> Result<(), ChainError> {
        if self.send_event != Some(handle) {
            debug!("ignoring stale event {:?}", handle);
            return Ok(());
        }
        self.send_packet(scheduler, endpoint)
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn packets_sent(&self) -> u32 {
        self.packets_sent
    }
}
