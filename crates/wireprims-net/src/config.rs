use std::net::{IpAddr, Ipv4Addr};

use wireprims_frame::DEFAULT_MAX_PAYLOAD;

/// Default datagram send ceiling: typical Ethernet MTU.
pub const DEFAULT_MTU: usize = 1500;

/// Configuration for a client TCP session.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Set `TCP_NODELAY` on the connected socket. Default: true.
    pub no_delay: bool,
    /// Largest message accepted in either direction, in bytes. Outgoing
    /// sends above it fail synchronously; an incoming declared length
    /// above it is treated as stream corruption. Both peers must agree
    /// on it. Default: [`DEFAULT_MAX_PAYLOAD`].
    pub max_message_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            no_delay: true,
            max_message_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Configuration for a TCP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address to bind the listener to. Default: all interfaces.
    pub bind_addr: IpAddr,
    /// Set `TCP_NODELAY` on every accepted socket. Default: true.
    pub no_delay: bool,
    /// Largest message accepted in either direction on accepted
    /// sessions, in bytes. Default: [`DEFAULT_MAX_PAYLOAD`].
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            no_delay: true,
            max_message_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Configuration for a UDP endpoint.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Local address to bind to. Default: all interfaces.
    pub bind_addr: IpAddr,
    /// Hard per-datagram send ceiling in bytes. Default: [`DEFAULT_MTU`].
    pub mtu: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            mtu: DEFAULT_MTU,
        }
    }
}

/// Configuration for a multicast endpoint.
///
/// TTL and loopback are OS socket options applied once at construction;
/// they are not mutable afterward.
#[derive(Debug, Clone)]
pub struct MulticastConfig {
    /// Hop-count scope for outgoing datagrams: 0 = host-local,
    /// 1 = subnet-local, up to 255 = unrestricted. Default: 1.
    pub ttl: u32,
    /// Deliver own datagrams back to the sending host. Default: false.
    pub loopback: bool,
    /// Network interface for IGMP membership and outgoing datagrams.
    /// Unspecified leaves the choice to the kernel. Default: unspecified.
    pub interface: Ipv4Addr,
    /// Hard per-datagram send ceiling in bytes. Default: [`DEFAULT_MTU`].
    pub mtu: usize,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            ttl: 1,
            loopback: false,
            interface: Ipv4Addr::UNSPECIFIED,
            mtu: DEFAULT_MTU,
        }
    }
}
