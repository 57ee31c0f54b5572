//! End-to-end exercises across the facade: framed TCP request/response
//! and mixed endpoint types sharing one event loop.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use wireprims::net::{
    Acceptor, ConnectionCallback, Controller, DatagramCallback, NetError, SendStatus,
    ServerCallback, ServerConfig, TcpConfig, TcpServer, TcpSession, UdpConfig, UdpEndpoint,
};

const WAIT: Duration = Duration::from_secs(5);

struct SilentServer;

impl ServerCallback for SilentServer {
    fn on_started(&self, _server: &Arc<TcpServer>) {}
    fn on_accepted(&self, _server: &Arc<TcpServer>, _session: &Arc<TcpSession>) {}
    fn on_stopped(&self, _server: &Arc<TcpServer>) {}
}

/// Server side: prefix every received message and send it back.
struct Reverser;

impl ConnectionCallback for Reverser {
    fn on_new_connection(&self, _session: &Arc<TcpSession>, _error: Option<NetError>) {}

    fn on_received(&self, session: &Arc<TcpSession>, message: Bytes) {
        let mut reply = message.to_vec();
        reply.reverse();
        let _ = session.send(&reply);
    }

    fn on_sent(&self, _session: &Arc<TcpSession>, _status: SendStatus, _message: Bytes) {}
    fn on_disconnect(&self, _session: &Arc<TcpSession>) {}
}

struct AdmitAll;

impl Acceptor for AdmitAll {
    fn on_accept(&self, _server: &Arc<TcpServer>, _remote: SocketAddr) -> bool {
        true
    }

    fn session_callback(&self) -> Arc<dyn ConnectionCallback> {
        Arc::new(Reverser)
    }
}

struct Client {
    replies: Sender<Bytes>,
    connected: Sender<bool>,
}

impl ConnectionCallback for Client {
    fn on_new_connection(&self, _session: &Arc<TcpSession>, error: Option<NetError>) {
        let _ = self.connected.send(error.is_none());
    }

    fn on_received(&self, _session: &Arc<TcpSession>, message: Bytes) {
        let _ = self.replies.send(message);
    }

    fn on_sent(&self, _session: &Arc<TcpSession>, _status: SendStatus, _message: Bytes) {}
    fn on_disconnect(&self, _session: &Arc<TcpSession>) {}
}

struct Sink {
    datagrams: Sender<Bytes>,
}

impl DatagramCallback for Sink {
    fn on_started(&self, _endpoint: &Arc<UdpEndpoint>) {}

    fn on_received(&self, _endpoint: &Arc<UdpEndpoint>, _remote: SocketAddr, payload: Bytes) {
        let _ = self.datagrams.send(payload);
    }

    fn on_stopped(&self, _endpoint: &Arc<UdpEndpoint>) {}
}

fn local_server_config() -> ServerConfig {
    ServerConfig {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        ..ServerConfig::default()
    }
}

fn connect_client(controller: &Arc<Controller>, port: u16) -> (Arc<TcpSession>, Receiver<Bytes>) {
    let (replies_tx, replies) = channel();
    let (connected_tx, connected) = channel();
    let session = TcpSession::connect(
        controller,
        "127.0.0.1",
        port,
        Arc::new(Client {
            replies: replies_tx,
            connected: connected_tx,
        }),
        TcpConfig::default(),
    );
    assert!(connected.recv_timeout(WAIT).unwrap(), "connect failed");
    (session, replies)
}

#[test]
fn framed_request_response_preserves_order() {
    let controller = Controller::new().unwrap();
    let server = TcpServer::start(
        &controller,
        0,
        Arc::new(SilentServer),
        Arc::new(AdmitAll),
        local_server_config(),
    )
    .unwrap();

    let (client, replies) = connect_client(&controller, server.local_addr().port());

    let requests: [&[u8]; 3] = [b"alpha", b"beta", b"gamma"];
    for request in requests {
        client.send(request).unwrap();
    }
    for request in requests {
        let mut expected = request.to_vec();
        expected.reverse();
        let reply = replies.recv_timeout(WAIT).unwrap();
        assert_eq!(reply.as_ref(), expected.as_slice());
    }

    client.close();
    server.close();
    controller.shutdown();
}

#[test]
fn large_messages_survive_stream_fragmentation() {
    let controller = Controller::new().unwrap();
    let server = TcpServer::start(
        &controller,
        0,
        Arc::new(SilentServer),
        Arc::new(AdmitAll),
        local_server_config(),
    )
    .unwrap();

    let (client, replies) = connect_client(&controller, server.local_addr().port());

    // Well past any single read or socket buffer.
    let request: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    client.send(&request).unwrap();

    let mut expected = request;
    expected.reverse();
    let reply = replies.recv_timeout(WAIT).unwrap();
    assert_eq!(reply.as_ref(), expected.as_slice());

    client.close();
    server.close();
    controller.shutdown();
}

#[test]
fn tcp_and_udp_endpoints_share_one_loop() {
    let controller = Controller::new().unwrap();

    let server = TcpServer::start(
        &controller,
        0,
        Arc::new(SilentServer),
        Arc::new(AdmitAll),
        local_server_config(),
    )
    .unwrap();
    let (client, replies) = connect_client(&controller, server.local_addr().port());

    let (datagrams_tx, datagrams) = channel();
    let udp_config = UdpConfig {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        ..UdpConfig::default()
    };
    let receiver = UdpEndpoint::bind(
        &controller,
        0,
        Arc::new(Sink {
            datagrams: datagrams_tx,
        }),
        udp_config.clone(),
    )
    .unwrap();
    let sender = UdpEndpoint::bind(
        &controller,
        0,
        Arc::new(Sink {
            datagrams: channel().0,
        }),
        udp_config,
    )
    .unwrap();

    client.send(b"stream").unwrap();
    sender
        .send("127.0.0.1", receiver.local_addr().port(), b"datagram")
        .unwrap();

    assert_eq!(replies.recv_timeout(WAIT).unwrap().as_ref(), b"maerts");
    assert_eq!(datagrams.recv_timeout(WAIT).unwrap().as_ref(), b"datagram");

    client.close();
    server.close();
    sender.close();
    receiver.close();
    assert_eq!(controller.endpoint_count(), 0);
    controller.shutdown();
}
