use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tcpchain_abstract::{ConfigError, LinkConfig, SimTime};

use crate::topology::NodeId;

/// Drops whole frames with a fixed probability.
#[derive(Debug)]
pub struct RateErrorModel {
    rate: f64,
    rng: StdRng,
}

impl RateErrorModel {
    pub fn new(rate: f64, seed: u64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::InvalidLossRate(rate));
        }
        Ok(Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_corrupt(&mut self) -> bool {
        self.rate > 0.0 && self.rng.random::<f64>() < self.rate
    }
}

/// A full-duplex point-to-point link between node `left` and node `left + 1`.
///
/// Each direction serialises one frame at a time at the link rate, then the
/// frame propagates for the link delay.
#[derive(Debug)]
pub struct PointToPointLink {
    config: LinkConfig,
    left: NodeId,
    busy_until: [SimTime; 2],
    receive_error: [Option<RateErrorModel>; 2],
    frames: u64,
}

impl PointToPointLink {
    pub fn new(config: LinkConfig, left: NodeId) -> Self {
        Self {
            config,
            left,
            busy_until: [SimTime::ZERO; 2],
            receive_error: [None, None],
            frames: 0,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn frames_transmitted(&self) -> u64 {
        self.frames
    }

    /// 0 for the left device, 1 for the right one.
    fn side(&self, node: NodeId) -> Option<usize> {
        if node == self.left {
            Some(0)
        } else if node.0 == self.left.0 + 1 {
            Some(1)
        } else {
            None
        }
    }

    /// Attach an error model to the receive side of `node`'s device.
    pub fn set_receive_error_model(&mut self, node: NodeId, model: RateErrorModel) -> bool {
        match self.side(node) {
            Some(side) => {
                self.receive_error[side] = Some(model);
                true
            }
            None => false,
        }
    }

    /// Queue `bytes` for transmission from `from`; returns when the last bit
    /// reaches the other end.
    pub fn transmit(&mut self, from: NodeId, bytes: usize, now: SimTime) -> Option<SimTime> {
        let side = self.side(from)?;
        let tx = self.config.data_rate.tx_time(bytes as u64)?;
        let start = now.max(self.busy_until[side]);
        let done = start + tx;
        self.busy_until[side] = done;
        self.frames += 1;
        Some(done + self.config.delay)
    }

    /// Whether `node`'s device discards the frame it is receiving.
    pub fn receive_corrupts(&mut self, node: NodeId) -> bool {
        self.side(node)
            .and_then(|side| self.receive_error[side].as_mut())
            .is_some_and(RateErrorModel::is_corrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcpchain_abstract::DataRate;

    fn link() -> PointToPointLink {
        PointToPointLink::new(
            LinkConfig {
                data_rate: DataRate::from_bps(5_000_000),
                delay: SimTime::from_millis(2),
            },
            NodeId(0),
        )
    }

    #[test]
    fn frames_serialise_then_propagate() {
        let mut link = link();
        // 625 bytes at 5 Mbps take 1 ms on the wire.
        let first = link.transmit(NodeId(0), 625, SimTime::ZERO).unwrap();
        let second = link.transmit(NodeId(0), 625, SimTime::ZERO).unwrap();
        assert_eq!(first, SimTime::from_millis(3));
        assert_eq!(second, SimTime::from_millis(4));
        // The other direction is independent.
        let back = link.transmit(NodeId(1), 625, SimTime::ZERO).unwrap();
        assert_eq!(back, SimTime::from_millis(3));
        assert!(link.transmit(NodeId(2), 625, SimTime::ZERO).is_none());
        assert_eq!(link.frames_transmitted(), 3);
    }

    #[test]
    fn error_model_only_affects_its_device() {
        let mut link = link();
        assert!(link.set_receive_error_model(NodeId(1), RateErrorModel::new(1.0, 0).unwrap()));
        assert!(link.receive_corrupts(NodeId(1)));
        assert!(!link.receive_corrupts(NodeId(0)));
        assert!(!link.set_receive_error_model(NodeId(5), RateErrorModel::new(1.0, 0).unwrap()));
    }

    #[test]
    fn zero_rate_never_drops_and_seed_is_deterministic() {
        let mut quiet = RateErrorModel::new(0.0, 1).unwrap();
        assert_eq!(quiet.rate(), 0.0);
        assert!((0..1000).all(|_| !quiet.is_corrupt()));

        let mut a = RateErrorModel::new(0.3, 9).unwrap();
        let mut b = RateErrorModel::new(0.3, 9).unwrap();
        let run_a: Vec<bool> = (0..100).map(|_| a.is_corrupt()).collect();
        let run_b: Vec<bool> = (0..100).map(|_| b.is_corrupt()).collect();
        assert_eq!(run_a, run_b);
        assert!(RateErrorModel::new(-0.1, 0).is_err());
    }
}
