use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wireprims_frame::{encode_message, FrameAssembler};

use crate::callback::{ConnectionCallback, SendStatus};
use crate::config::TcpConfig;
use crate::controller::{Controller, EndpointId};
use crate::error::{NetError, Result};
use crate::server::TcpServer;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// One established TCP connection plus its framing state.
///
/// Client-initiated and server-accepted connections share this type;
/// server-accepted sessions additionally know their owning server so that
/// teardown removes them from its live set.
///
/// A session runs one reader task (feeding the frame assembler) and one
/// writer task (draining the ordered send queue) on the shared loop.
pub struct TcpSession {
    id: EndpointId,
    peer_addr: Option<SocketAddr>,
    callback: Arc<dyn ConnectionCallback>,
    controller: Arc<Controller>,
    server: Option<Weak<TcpServer>>,
    closing: AtomicBool,
    max_message: usize,
    outbound: UnboundedSender<Bytes>,
    shutdown: CancellationToken,
}

impl TcpSession {
    /// Connect to a remote TCP endpoint.
    ///
    /// Construction always completes and yields a session handle; the
    /// connect outcome (including DNS failure and connection refused) is
    /// delivered through `on_new_connection`, never as an error from this
    /// function. A failed connect yields an already-closed handle.
    pub fn connect(
        controller: &Arc<Controller>,
        host: &str,
        port: u16,
        callback: Arc<dyn ConnectionCallback>,
        config: TcpConfig,
    ) -> Arc<Self> {
        let target = format!("{host}:{port}");
        let setup = {
            let target = target.clone();
            async move { TcpStream::connect(target).await }
        };
        let connected = match controller.run_setup(setup) {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(NetError::Connect {
                addr: target.clone(),
                source,
            }),
            Err(err) => Err(err),
        };

        match connected {
            Ok(stream) => {
                if config.no_delay {
                    if let Err(err) = stream.set_nodelay(true) {
                        warn!(%target, error = %err, "failed to set TCP_NODELAY");
                    }
                }
                let peer_addr = stream.peer_addr().ok();
                debug!(%target, "connected");
                Self::spawn(
                    controller,
                    stream,
                    peer_addr,
                    None,
                    callback,
                    config.max_message_size,
                )
            }
            Err(err) => {
                debug!(%target, error = %err, "connect failed");
                let session = Self::dead(controller, callback);
                session.callback.on_new_connection(&session, Some(err));
                session
            }
        }
    }

    /// Wrap a server-accepted connection. Called from the accept loop.
    pub(crate) fn accepted(
        controller: &Arc<Controller>,
        server: &Arc<TcpServer>,
        stream: TcpStream,
        peer_addr: SocketAddr,
        callback: Arc<dyn ConnectionCallback>,
        no_delay: bool,
        max_message: usize,
    ) -> Arc<Self> {
        if no_delay {
            if let Err(err) = stream.set_nodelay(true) {
                warn!(%peer_addr, error = %err, "failed to set TCP_NODELAY");
            }
        }
        Self::spawn(
            controller,
            stream,
            Some(peer_addr),
            Some(server),
            callback,
            max_message,
        )
    }

    fn spawn(
        controller: &Arc<Controller>,
        stream: TcpStream,
        peer_addr: Option<SocketAddr>,
        server: Option<&Arc<TcpServer>>,
        callback: Arc<dyn ConnectionCallback>,
        max_message: usize,
    ) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: controller.register("tcp-session"),
            peer_addr,
            callback,
            controller: Arc::clone(controller),
            server: server.map(Arc::downgrade),
            closing: AtomicBool::new(false),
            // The preamble length field bounds what can be framed at all.
            max_message: max_message.min(u32::MAX as usize),
            outbound,
            shutdown: CancellationToken::new(),
        });
        // Enter the owning server's live set and notify before the I/O
        // tasks start: no session event can precede the connection
        // notification, and a close from inside it finds the set entry.
        if let Some(server) = server {
            server.admit_session(Arc::clone(&session));
        }
        session.callback.on_new_connection(&session, None);
        controller
            .handle()
            .spawn(read_loop(Arc::clone(&session), read_half));
        controller
            .handle()
            .spawn(write_loop(Arc::clone(&session), write_half, outbound_rx));
        session
    }

    /// Handle for a connect that never became a live connection: already
    /// closed, never registered, sends rejected.
    fn dead(controller: &Arc<Controller>, callback: Arc<dyn ConnectionCallback>) -> Arc<Self> {
        let (outbound, _) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: 0,
            peer_addr: None,
            callback,
            controller: Arc::clone(controller),
            server: None,
            closing: AtomicBool::new(true),
            max_message: 0,
            outbound,
            shutdown: CancellationToken::new(),
        })
    }

    /// Frame and enqueue a message for sending.
    ///
    /// Messages are written in call order and never interleaved at the
    /// byte level. The write outcome is reported asynchronously through
    /// `on_sent`; a transport failure routes the session into `close`.
    ///
    /// Payloads above the configured message ceiling are rejected here:
    /// the receiving end enforces the same ceiling, so a larger message
    /// would be discarded as corruption by its assembler.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(NetError::Closed);
        }
        if payload.len() > self.max_message {
            return Err(NetError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_message,
            });
        }
        self.outbound
            .send(Bytes::copy_from_slice(payload))
            .map_err(|_| NetError::Closed)
    }

    /// Tear the session down. Idempotent; safe from any thread and from
    /// within loop callbacks.
    ///
    /// Peer-initiated disconnects, I/O errors, and explicit application
    /// closes all converge here: the transport is released, the session
    /// leaves its owning server's live set and the coordinator registry,
    /// and `on_disconnect` fires exactly once.
    pub fn close(self: &Arc<Self>) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(id = self.id, peer = ?self.peer_addr, "session closing");
        self.shutdown.cancel();
        if let Some(server) = self.server.as_ref().and_then(Weak::upgrade) {
            server.discard_session(self.id);
        }
        self.controller.deregister(self.id);
        self.callback.on_disconnect(self);
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Remote address. `None` only for a client connect that failed.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

async fn read_loop(session: Arc<TcpSession>, mut read_half: OwnedReadHalf) {
    let token = session.shutdown.clone();
    let mut assembler = FrameAssembler::with_max_payload(session.max_message);
    let mut chunk = BytesMut::with_capacity(READ_CHUNK_SIZE);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            result = read_half.read_buf(&mut chunk) => match result {
                Ok(0) => {
                    debug!(id = session.id, "peer closed connection");
                    session.close();
                    break;
                }
                Ok(_) => {
                    for message in assembler.feed(&chunk) {
                        session.callback.on_received(&session, message);
                    }
                    chunk.clear();
                }
                Err(err) => {
                    debug!(id = session.id, error = %err, "read failed");
                    session.close();
                    break;
                }
            }
        }
    }
}

async fn write_loop(
    session: Arc<TcpSession>,
    mut write_half: OwnedWriteHalf,
    mut outbound: UnboundedReceiver<Bytes>,
) {
    let token = session.shutdown.clone();
    let mut wire = BytesMut::with_capacity(READ_CHUNK_SIZE);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            next = outbound.recv() => {
                let Some(payload) = next else { break };
                wire.clear();
                if encode_message(&payload, &mut wire).is_err() {
                    // send() bounds the payload; unreachable in practice.
                    session.callback.on_sent(&session, SendStatus::Failed, payload);
                    continue;
                }
                match write_half.write_all(&wire).await {
                    Ok(()) => {
                        session.callback.on_sent(&session, SendStatus::Success, payload);
                    }
                    Err(err) => {
                        warn!(id = session.id, error = %err, "write failed");
                        session.callback.on_sent(&session, SendStatus::Failed, payload);
                        session.close();
                        break;
                    }
                }
            }
        }
    }
}
