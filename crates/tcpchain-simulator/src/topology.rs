use std::net::Ipv4Addr;
use tcpchain_abstract::{ConfigError, LinkConfig, MAX_SEGMENT_PAYLOAD, TopologyConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// One end of a link: the network device `node` has on link `link`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub link: usize,
    pub node: NodeId,
}

/// Nodes `0..n` in a line; link `i` joins node `i` and node `i + 1`.
///
/// Link `i` owns subnet `10.0.i.0/24`: the left device is `.1`, the right
/// device `.2`. Routing is static, one hop at a time toward the destination.
#[derive(Debug, Clone)]
pub struct ChainTopology {
    nodes: usize,
    links: Vec<LinkConfig>,
}

impl ChainTopology {
    pub fn build(config: &TopologyConfig) -> Result<Self, ConfigError> {
        if config.nodes < 2 {
            return Err(ConfigError::InvalidTopology(format!(
                "a chain needs at least 2 nodes, got {}",
                config.nodes
            )));
        }
        if config.nodes > 257 {
            return Err(ConfigError::InvalidTopology(format!(
                "{} nodes exceed the 10.0.x.0/24 address plan",
                config.nodes
            )));
        }
        if config.link.data_rate.is_zero() {
            return Err(ConfigError::ZeroRate);
        }
        if config.mss == 0 {
            return Err(ConfigError::InvalidTopology("mss must be greater than zero".into()));
        }
        if config.mss as usize > MAX_SEGMENT_PAYLOAD {
            return Err(ConfigError::InvalidTopology(format!(
                "mss {} exceeds the largest frame payload {}",
                config.mss, MAX_SEGMENT_PAYLOAD
            )));
        }
        Ok(Self {
            nodes: config.nodes,
            links: vec![config.link; config.nodes - 1],
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn link(&self, index: usize) -> Option<&LinkConfig> {
        self.links.get(index)
    }

    pub fn links(&self) -> &[LinkConfig] {
        &self.links
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node.0 < self.nodes
    }

    /// Address of `device`, if that node really sits on that link.
    pub fn device_address(&self, device: DeviceId) -> Option<Ipv4Addr> {
        if device.link >= self.links.len() {
            return None;
        }
        let host = if device.node.0 == device.link {
            1
        } else if device.node.0 == device.link + 1 {
            2
        } else {
            return None;
        };
        Some(Ipv4Addr::new(10, 0, device.link as u8, host))
    }

    /// Primary address of a node: its left device, or its only device for node 0.
    pub fn node_address(&self, node: NodeId) -> Option<Ipv4Addr> {
        if !self.contains(node) {
            return None;
        }
        let device = match node.0 {
            0 => DeviceId { link: 0, node },
            n => DeviceId { link: n - 1, node },
        };
        self.device_address(device)
    }

    pub fn node_for(&self, addr: Ipv4Addr) -> Option<NodeId> {
        let [a, b, link, host] = addr.octets();
        if a != 10 || b != 0 || link as usize >= self.links.len() {
            return None;
        }
        match host {
            1 => Some(NodeId(link as usize)),
            2 => Some(NodeId(link as usize + 1)),
            _ => None,
        }
    }

    /// The link and neighbour a frame at `from` takes toward `to`.
    pub fn next_hop(&self, from: NodeId, to: NodeId) -> Option<(usize, NodeId)> {
        if !self.contains(from) || !self.contains(to) || from == to {
            return None;
        }
        if to.0 > from.0 {
            Some((from.0, NodeId(from.0 + 1)))
        } else {
            Some((from.0 - 1, NodeId(from.0 - 1)))
        }
    }

    /// Links crossed between two nodes, in order.
    pub fn path(&self, from: NodeId, to: NodeId) -> Vec<usize> {
        let mut hops = Vec::new();
        let mut at = from;
        while let Some((link, next)) = self.next_hop(at, to) {
            hops.push(link);
            at = next;
        }
        hops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(nodes: usize) -> ChainTopology {
        ChainTopology::build(&TopologyConfig {
            nodes,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn addresses_follow_link_subnets() {
        let topo = chain(4);
        assert_eq!(topo.link_count(), 3);
        assert_eq!(topo.node_address(NodeId(0)), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(topo.node_address(NodeId(1)), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(topo.node_address(NodeId(3)), Some(Ipv4Addr::new(10, 0, 2, 2)));
        assert_eq!(
            topo.device_address(DeviceId { link: 1, node: NodeId(1) }),
            Some(Ipv4Addr::new(10, 0, 1, 1))
        );
        assert_eq!(topo.device_address(DeviceId { link: 1, node: NodeId(3) }), None);
        assert_eq!(topo.node_for(Ipv4Addr::new(10, 0, 1, 1)), Some(NodeId(1)));
        assert_eq!(topo.node_for(Ipv4Addr::new(10, 0, 2, 2)), Some(NodeId(3)));
        assert_eq!(topo.node_for(Ipv4Addr::new(10, 0, 3, 1)), None);
        assert_eq!(topo.node_for(Ipv4Addr::new(192, 168, 0, 1)), None);
    }

    #[test]
    fn routes_walk_the_line() {
        let topo = chain(4);
        assert_eq!(topo.next_hop(NodeId(0), NodeId(3)), Some((0, NodeId(1))));
        assert_eq!(topo.next_hop(NodeId(3), NodeId(0)), Some((2, NodeId(2))));
        assert_eq!(topo.path(NodeId(0), NodeId(3)), vec![0, 1, 2]);
        assert_eq!(topo.path(NodeId(3), NodeId(1)), vec![2, 1]);
        assert!(topo.path(NodeId(2), NodeId(2)).is_empty());
    }

    #[test]
    fn rejects_degenerate_chains() {
        let err = ChainTopology::build(&TopologyConfig {
            nodes: 1,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTopology(_)));
    }

    #[test]
    fn mss_must_fit_a_single_frame() {
        let oversized = ChainTopology::build(&TopologyConfig {
            mss: 70_000,
            ..Default::default()
        });
        assert!(matches!(oversized, Err(ConfigError::InvalidTopology(_))));

        let largest = ChainTopology::build(&TopologyConfig {
            mss: MAX_SEGMENT_PAYLOAD as u32,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(largest.node_count(), 4);
    }
}
