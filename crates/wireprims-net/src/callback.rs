//! Callback capability contracts implemented by the application.
//!
//! Callbacks are invoked from the shared event-loop thread, except the
//! connection-result and lifecycle-start notifications, which fire on
//! the thread constructing the endpoint. Callback bodies must not block
//! and must not construct new endpoints (endpoint construction drives
//! the loop to completion for its setup step and would wait on itself).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::NetError;
use crate::multicast::MulticastEndpoint;
use crate::server::TcpServer;
use crate::session::TcpSession;
use crate::udp::UdpEndpoint;

/// Outcome of one framed write, reported through `on_sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Success,
    Failed,
}

/// Events of one TCP connection (client-initiated or server-accepted).
pub trait ConnectionCallback: Send + Sync + 'static {
    /// Connection setup finished. `error` is `None` on success; a failed
    /// client connect delivers the error here together with an
    /// already-closed session handle.
    fn on_new_connection(&self, session: &Arc<TcpSession>, error: Option<NetError>);

    /// One complete reassembled message, in wire-arrival order.
    fn on_received(&self, session: &Arc<TcpSession>, message: Bytes);

    /// One framed write completed (or failed at the transport).
    fn on_sent(&self, session: &Arc<TcpSession>, status: SendStatus, message: Bytes);

    /// The session tore down. Fired exactly once, whether the close came
    /// from the peer, an I/O error, or the application.
    fn on_disconnect(&self, session: &Arc<TcpSession>);
}

/// Lifecycle events of a TCP server.
pub trait ServerCallback: Send + Sync + 'static {
    fn on_started(&self, server: &Arc<TcpServer>);

    /// An admitted connection became a live session.
    fn on_accepted(&self, server: &Arc<TcpServer>, session: &Arc<TcpSession>);

    /// The server tore down. Fired exactly once.
    fn on_stopped(&self, server: &Arc<TcpServer>);
}

/// Admission policy consulted for every inbound TCP connection.
pub trait Acceptor: Send + Sync + 'static {
    /// Return `false` to reject: the transport is closed immediately and
    /// no session is created.
    fn on_accept(&self, server: &Arc<TcpServer>, remote: SocketAddr) -> bool;

    /// Callback wired into each accepted session.
    fn session_callback(&self) -> Arc<dyn ConnectionCallback>;
}

/// Events of a connectionless UDP endpoint.
pub trait DatagramCallback: Send + Sync + 'static {
    fn on_started(&self, endpoint: &Arc<UdpEndpoint>);

    /// One received datagram with its source address. Datagrams are
    /// already discrete; no reassembly happens.
    fn on_received(&self, endpoint: &Arc<UdpEndpoint>, remote: SocketAddr, payload: Bytes);

    /// The endpoint tore down. Fired exactly once.
    fn on_stopped(&self, endpoint: &Arc<UdpEndpoint>);
}

/// Events of a multicast endpoint: datagram events plus group membership.
pub trait MulticastCallback: Send + Sync + 'static {
    fn on_started(&self, endpoint: &Arc<MulticastEndpoint>);

    fn on_received(&self, endpoint: &Arc<MulticastEndpoint>, remote: SocketAddr, payload: Bytes);

    fn on_stopped(&self, endpoint: &Arc<MulticastEndpoint>);

    /// Membership in `group` was established.
    fn on_join(&self, endpoint: &Arc<MulticastEndpoint>, group: Ipv4Addr);

    /// Membership in `group` was dropped (explicitly or during close).
    fn on_leave(&self, endpoint: &Arc<MulticastEndpoint>, group: Ipv4Addr);
}
