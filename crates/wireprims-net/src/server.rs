use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callback::{Acceptor, ServerCallback};
use crate::config::ServerConfig;
use crate::controller::{Controller, EndpointId};
use crate::error::{NetError, Result};
use crate::lock;
use crate::session::TcpSession;

/// Pending-connection queue depth handed to `listen(2)`.
const LISTEN_BACKLOG: i32 = 5;

/// A listening TCP endpoint that owns the set of sessions it accepted.
///
/// Every inbound connection passes the [`Acceptor`] admission policy
/// before a session is created; rejected transports are closed without
/// ever becoming visible as sessions.
pub struct TcpServer {
    id: EndpointId,
    local_addr: SocketAddr,
    controller: Arc<Controller>,
    callback: Arc<dyn ServerCallback>,
    sessions: Mutex<HashMap<EndpointId, Arc<TcpSession>>>,
    closing: AtomicBool,
    shutdown: CancellationToken,
}

impl TcpServer {
    /// Bind a listener on `port` and start accepting.
    ///
    /// Unlike client connects, a bind failure is returned as an error:
    /// there is no remote party to wait for, so the caller learns the
    /// outcome synchronously.
    pub fn start(
        controller: &Arc<Controller>,
        port: u16,
        callback: Arc<dyn ServerCallback>,
        acceptor: Arc<dyn Acceptor>,
        config: ServerConfig,
    ) -> Result<Arc<Self>> {
        let addr = SocketAddr::new(config.bind_addr, port);
        let listener = controller
            .run_setup(async move {
                let std_listener = bind_listener(addr)?;
                TcpListener::from_std(std_listener)
            })?
            .map_err(|source| NetError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(NetError::Io)?;

        let server = Arc::new(Self {
            id: controller.register("tcp-server"),
            local_addr,
            controller: Arc::clone(controller),
            callback,
            sessions: Mutex::new(HashMap::new()),
            closing: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        info!(%local_addr, "server listening");

        controller.handle().spawn(accept_loop(
            Arc::clone(&server),
            listener,
            acceptor,
            config,
        ));
        server.callback.on_started(&server);
        Ok(server)
    }

    /// Snapshot of the currently live accepted sessions.
    ///
    /// The set reflects admissions and teardowns completed so far; it is
    /// not invalidated by sessions closing after the call.
    pub fn sessions(&self) -> Vec<Arc<TcpSession>> {
        lock(&self.sessions).values().cloned().collect()
    }

    /// Remove a torn-down session from the live set.
    pub(crate) fn discard_session(&self, id: EndpointId) {
        lock(&self.sessions).remove(&id);
    }

    /// Enter a freshly accepted session into the live set.
    ///
    /// The `closing` flag is re-checked under the set lock: a connection
    /// that raced server close is torn down here instead of being
    /// inserted after `close` drained the set, so no session outlives
    /// `on_stopped`.
    pub(crate) fn admit_session(&self, session: Arc<TcpSession>) {
        let admitted = {
            let mut sessions = lock(&self.sessions);
            if self.closing.load(Ordering::SeqCst) {
                false
            } else {
                sessions.insert(session.id(), Arc::clone(&session));
                true
            }
        };
        if !admitted {
            debug!(id = session.id(), "admission raced server close");
            session.close();
        }
    }

    /// Tear down every accepted session while continuing to listen.
    ///
    /// Teardown iterates a snapshot, so sessions admitted concurrently
    /// with this call survive it.
    pub fn shutdown_all(&self) {
        let sessions: Vec<_> = lock(&self.sessions).drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close();
        }
    }

    /// Stop listening and tear down every accepted session. Idempotent.
    ///
    /// Each session's `on_disconnect` fires before `on_stopped`. The
    /// listening socket itself is released by the accept task when it
    /// observes the cancellation, shortly after this returns; an
    /// immediate rebind of the same port can need a brief retry.
    pub fn close(self: &Arc<Self>) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(local_addr = %self.local_addr, "server closing");
        self.shutdown.cancel();
        self.shutdown_all();
        self.controller.deregister(self.id);
        self.callback.on_stopped(self);
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Address the listener is bound to, with the OS-assigned port when
    /// the server was started on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

/// Build the listening socket with `SO_REUSEADDR` set before bind.
fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

async fn accept_loop(
    server: Arc<TcpServer>,
    listener: TcpListener,
    acceptor: Arc<dyn Acceptor>,
    config: ServerConfig,
) {
    let token = server.shutdown.clone();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, remote)) => {
                    if server.is_closing() {
                        break;
                    }
                    if !acceptor.on_accept(&server, remote) {
                        debug!(%remote, "connection rejected");
                        drop(stream);
                        continue;
                    }
                    let session = TcpSession::accepted(
                        &server.controller,
                        &server,
                        stream,
                        remote,
                        acceptor.session_callback(),
                        config.no_delay,
                        config.max_message_size,
                    );
                    // Admission may have raced a close and torn the
                    // session back down; a stopped server announces no
                    // new sessions.
                    if !session.is_closing() {
                        server.callback.on_accepted(&server, &session);
                    }
                }
                Err(err) => {
                    // Transient accept failures (e.g. the peer resetting
                    // while queued) do not take the server down.
                    warn!(error = %err, "accept failed");
                }
            }
        }
    }
    debug!(local_addr = %server.local_addr, "accept loop stopped");
}
