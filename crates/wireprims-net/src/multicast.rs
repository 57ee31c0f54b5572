use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callback::MulticastCallback;
use crate::config::MulticastConfig;
use crate::controller::{Controller, EndpointId};
use crate::error::{NetError, Result};
use crate::lock;

const RECV_BUFFER_SIZE: usize = 64 * 1024;

struct Outgoing {
    target: SocketAddr,
    payload: Bytes,
}

/// An IPv4 multicast endpoint: a datagram socket plus a mutable set of
/// group memberships.
///
/// TTL, loopback, and the outgoing interface are fixed at construction
/// (see [`MulticastConfig`]); group membership changes over the
/// endpoint's lifetime through [`join`] and [`leave`].
///
/// [`join`]: MulticastEndpoint::join
/// [`leave`]: MulticastEndpoint::leave
pub struct MulticastEndpoint {
    id: EndpointId,
    local_addr: SocketAddr,
    controller: Arc<Controller>,
    callback: Arc<dyn MulticastCallback>,
    socket: Arc<UdpSocket>,
    groups: Mutex<HashSet<Ipv4Addr>>,
    interface: Ipv4Addr,
    mtu: usize,
    closing: AtomicBool,
    outbound: UnboundedSender<Outgoing>,
    shutdown: CancellationToken,
}

impl MulticastEndpoint {
    /// Bind a multicast-capable socket on `port` and start receiving.
    ///
    /// The socket binds to the wildcard address so datagrams for any
    /// joined group arrive on it; no groups are joined yet.
    pub fn bind(
        controller: &Arc<Controller>,
        port: u16,
        callback: Arc<dyn MulticastCallback>,
        config: MulticastConfig,
    ) -> Result<Arc<Self>> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        let options = config.clone();
        let socket = controller
            .run_setup(async move {
                let std_socket = bind_socket(addr, &options)?;
                UdpSocket::from_std(std_socket)
            })?
            .map_err(|source| NetError::Bind { addr, source })?;
        let local_addr = socket.local_addr().map_err(NetError::Io)?;
        let socket = Arc::new(socket);

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let endpoint = Arc::new(Self {
            id: controller.register("multicast"),
            local_addr,
            controller: Arc::clone(controller),
            callback,
            socket: Arc::clone(&socket),
            groups: Mutex::new(HashSet::new()),
            interface: config.interface,
            mtu: config.mtu,
            closing: AtomicBool::new(false),
            outbound,
            shutdown: CancellationToken::new(),
        });
        info!(%local_addr, ttl = config.ttl, "multicast endpoint bound");

        controller
            .handle()
            .spawn(recv_loop(Arc::clone(&endpoint), Arc::clone(&socket)));
        controller
            .handle()
            .spawn(send_loop(Arc::clone(&endpoint), socket, outbound_rx));
        endpoint.callback.on_started(&endpoint);
        Ok(endpoint)
    }

    /// Join `group` on the configured interface.
    ///
    /// Joining a group the endpoint is already a member of is a no-op,
    /// including when two threads race on the same group; `on_join`
    /// fires only when membership was actually established.
    pub fn join(self: &Arc<Self>, group: Ipv4Addr) -> Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(NetError::Closed);
        }
        if !group.is_multicast() {
            return Err(NetError::NotMulticast(group));
        }
        {
            // setsockopt does not block, so the membership check, the OS
            // call, and the insert stay under one guard: a concurrent
            // join of the same group sees the recorded membership.
            let mut groups = lock(&self.groups);
            if groups.contains(&group) {
                return Ok(());
            }
            self.socket.join_multicast_v4(group, self.interface)?;
            groups.insert(group);
        }
        debug!(id = self.id, %group, "joined group");
        self.callback.on_join(self, group);
        Ok(())
    }

    /// Leave `group`.
    ///
    /// Leaving a group the endpoint is not a member of is a no-op;
    /// `on_leave` fires only when a membership was actually dropped.
    pub fn leave(self: &Arc<Self>, group: Ipv4Addr) -> Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(NetError::Closed);
        }
        if !lock(&self.groups).remove(&group) {
            return Ok(());
        }
        self.socket.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
        debug!(id = self.id, %group, "left group");
        self.callback.on_leave(self, group);
        Ok(())
    }

    /// Snapshot of the groups this endpoint is currently a member of.
    pub fn groups(&self) -> Vec<Ipv4Addr> {
        lock(&self.groups).iter().copied().collect()
    }

    /// Enqueue one datagram to `target:port`.
    ///
    /// The target may be a multicast group (membership not required) or
    /// a plain unicast address; this is ordinary datagram send, scoped
    /// by the construction-time TTL for group targets. A payload over
    /// the configured MTU is rejected synchronously.
    pub fn send(&self, target: Ipv4Addr, port: u16, payload: &[u8]) -> Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(NetError::Closed);
        }
        if payload.len() > self.mtu {
            return Err(NetError::PayloadTooLarge {
                size: payload.len(),
                max: self.mtu,
            });
        }
        self.outbound
            .send(Outgoing {
                target: SocketAddr::V4(SocketAddrV4::new(target, port)),
                payload: Bytes::copy_from_slice(payload),
            })
            .map_err(|_| NetError::Closed)
    }

    /// Drop all memberships and release the socket. Idempotent.
    ///
    /// `on_leave` fires for every group the endpoint was still a member
    /// of, then `on_stopped` fires exactly once. Membership drops are
    /// best effort: the kernel releases them with the socket regardless.
    pub fn close(self: &Arc<Self>) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(local_addr = %self.local_addr, "multicast endpoint closing");
        self.shutdown.cancel();

        let groups: Vec<_> = lock(&self.groups).drain().collect();
        for group in groups {
            if let Err(err) = self.socket.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                warn!(id = self.id, %group, error = %err, "failed to leave group");
            }
            self.callback.on_leave(self, group);
        }
        self.controller.deregister(self.id);
        self.callback.on_stopped(self);
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Address the socket is bound to, with the OS-assigned port when the
    /// endpoint was bound on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Per-datagram send ceiling in bytes.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

/// Build the multicast socket: address reuse (plus `SO_REUSEPORT` where
/// the platform has it, so several processes can listen on one group
/// port), then the construction-time multicast options.
fn bind_socket(addr: SocketAddr, config: &MulticastConfig) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    if let Err(err) = socket.set_reuse_port(true) {
        warn!(error = %err, "SO_REUSEPORT unavailable");
    }
    socket.set_multicast_ttl_v4(config.ttl)?;
    socket.set_multicast_loop_v4(config.loopback)?;
    if config.interface != Ipv4Addr::UNSPECIFIED {
        socket.set_multicast_if_v4(&config.interface)?;
    }
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

async fn recv_loop(endpoint: Arc<MulticastEndpoint>, socket: Arc<UdpSocket>) {
    let token = endpoint.shutdown.clone();
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, remote)) => {
                    let payload = Bytes::copy_from_slice(&buf[..len]);
                    endpoint.callback.on_received(&endpoint, remote, payload);
                }
                Err(err) => {
                    debug!(id = endpoint.id, error = %err, "recv failed");
                }
            }
        }
    }
}

async fn send_loop(
    endpoint: Arc<MulticastEndpoint>,
    socket: Arc<UdpSocket>,
    mut outbound: UnboundedReceiver<Outgoing>,
) {
    let token = endpoint.shutdown.clone();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            next = outbound.recv() => {
                let Some(out) = next else { break };
                if let Err(err) = socket.send_to(&out.payload, out.target).await {
                    warn!(id = endpoint.id, target = %out.target, error = %err,
                          "send failed");
                }
            }
        }
    }
}
