use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A CIDR selected by a rule's peer, less any excluded networks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpBlock {
    pub cidr: IpNet,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except: Vec<IpNet>,
}

// === impl IpBlock ===

impl IpBlock {
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.cidr.contains(&addr) && !self.except.iter().any(|net| net.contains(&addr))
    }
}

impl From<IpAddr> for IpBlock {
    fn from(addr: IpAddr) -> Self {
        IpNet::from(addr).into()
    }
}

impl From<IpNet> for IpBlock {
    fn from(cidr: IpNet) -> Self {
        Self {
            cidr,
            except: vec![],
        }
    }
}

impl From<Ipv4Net> for IpBlock {
    fn from(net: Ipv4Net) -> Self {
        IpNet::from(net).into()
    }
}

impl From<Ipv6Net> for IpBlock {
    fn from(net: Ipv6Net) -> Self {
        IpNet::from(net).into()
    }
}
