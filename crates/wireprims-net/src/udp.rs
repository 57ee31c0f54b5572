use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callback::DatagramCallback;
use crate::config::UdpConfig;
use crate::controller::{Controller, EndpointId};
use crate::error::{NetError, Result};

/// Receive buffer sized for the largest possible UDP datagram.
const RECV_BUFFER_SIZE: usize = 64 * 1024;

struct Outgoing {
    host: String,
    port: u16,
    payload: Bytes,
}

/// A connectionless UDP endpoint.
///
/// Datagrams are inherently discrete, so no framing is applied in either
/// direction; the configured MTU bounds outgoing payloads instead.
pub struct UdpEndpoint {
    id: EndpointId,
    local_addr: SocketAddr,
    controller: Arc<Controller>,
    callback: Arc<dyn DatagramCallback>,
    mtu: usize,
    closing: AtomicBool,
    outbound: UnboundedSender<Outgoing>,
    shutdown: CancellationToken,
}

impl UdpEndpoint {
    /// Bind a UDP socket on `port` and start receiving.
    ///
    /// A bind failure is returned as an error. The socket is built with
    /// `SO_REUSEADDR` and `SO_BROADCAST` so broadcast targets work
    /// without further setup.
    pub fn bind(
        controller: &Arc<Controller>,
        port: u16,
        callback: Arc<dyn DatagramCallback>,
        config: UdpConfig,
    ) -> Result<Arc<Self>> {
        let addr = SocketAddr::new(config.bind_addr, port);
        let socket = controller
            .run_setup(async move {
                let std_socket = bind_socket(addr)?;
                UdpSocket::from_std(std_socket)
            })?
            .map_err(|source| NetError::Bind { addr, source })?;
        let local_addr = socket.local_addr().map_err(NetError::Io)?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let endpoint = Arc::new(Self {
            id: controller.register("udp"),
            local_addr,
            controller: Arc::clone(controller),
            callback,
            mtu: config.mtu,
            closing: AtomicBool::new(false),
            outbound,
            shutdown: CancellationToken::new(),
        });
        info!(%local_addr, "udp endpoint bound");

        let socket = Arc::new(socket);
        controller
            .handle()
            .spawn(recv_loop(Arc::clone(&endpoint), Arc::clone(&socket)));
        controller
            .handle()
            .spawn(send_loop(Arc::clone(&endpoint), socket, outbound_rx));
        endpoint.callback.on_started(&endpoint);
        Ok(endpoint)
    }

    /// Enqueue one datagram to `host:port`.
    ///
    /// Datagrams leave in call order. A payload over the configured MTU
    /// is rejected synchronously instead of being fragmented or silently
    /// truncated somewhere down the network path.
    pub fn send(&self, host: &str, port: u16, payload: &[u8]) -> Result<()> {
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
                host: host.to_owned(),
                port,
                payload: Bytes::copy_from_slice(payload),
            })
            .map_err(|_| NetError::Closed)
    }

    /// Release the socket. Idempotent; `on_stopped` fires exactly once.
    pub fn close(self: &Arc<Self>) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(local_addr = %self.local_addr, "udp endpoint closing");
        self.shutdown.cancel();
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

/// Build the datagram socket with `SO_REUSEADDR` and `SO_BROADCAST` set
/// before bind.
fn bind_socket(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

async fn recv_loop(endpoint: Arc<UdpEndpoint>, socket: Arc<UdpSocket>) {
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
                    // Receive errors on UDP are transient (e.g. ICMP port
                    // unreachable surfacing from an earlier send).
                    debug!(id = endpoint.id, error = %err, "recv failed");
                }
            }
        }
    }
}

async fn send_loop(
    endpoint: Arc<UdpEndpoint>,
    socket: Arc<UdpSocket>,
    mut outbound: UnboundedReceiver<Outgoing>,
) {
    let token = endpoint.shutdown.clone();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            next = outbound.recv() => {
                let Some(out) = next else { break };
                let target = (out.host.as_str(), out.port);
                if let Err(err) = socket.send_to(&out.payload, target).await {
                    warn!(id = endpoint.id, host = %out.host, port = out.port,
                          error = %err, "send failed");
                }
            }
        }
    }
}
