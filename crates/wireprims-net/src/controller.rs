use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{NetError, Result};
use crate::lock;

/// Process-unique identity of a live endpoint.
pub type EndpointId = u64;

/// Endpoint coordinator: the process-wide registry of live endpoints and
/// the owner of the shared event loop.
///
/// One dedicated thread drives a single-threaded tokio runtime that hosts
/// every endpoint's I/O tasks. Endpoint construction submits its blocking
/// setup step (bind, connect, loop attachment) through [`run_setup`],
/// which serializes setups across all endpoint types behind one gate
/// while normal I/O dispatch for established endpoints keeps running.
///
/// [`run_setup`]: Controller::run_setup
pub struct Controller {
    handle: Handle,
    registry: Mutex<HashMap<EndpointId, &'static str>>,
    setup_gate: Mutex<()>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    loop_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    /// Start the shared event loop on its own thread.
    pub fn new() -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let loop_thread = std::thread::Builder::new()
            .name("wireprims-loop".into())
            .spawn(move || {
                runtime.block_on(token.cancelled());
                debug!("event loop stopped");
            })?;
        info!("event loop started");

        Ok(Arc::new(Self {
            handle,
            registry: Mutex::new(HashMap::new()),
            setup_gate: Mutex::new(()),
            next_id: AtomicU64::new(1),
            shutdown,
            loop_thread: Mutex::new(Some(loop_thread)),
        }))
    }

    /// Add a freshly constructed endpoint to the live registry.
    ///
    /// Ids are never reused, so no entry can be added twice.
    pub(crate) fn register(&self, kind: &'static str) -> EndpointId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.registry).insert(id, kind);
        debug!(id, kind, "endpoint registered");
        id
    }

    /// Remove an endpoint from the live registry on teardown.
    pub(crate) fn deregister(&self, id: EndpointId) {
        if lock(&self.registry).remove(&id).is_some() {
            debug!(id, "endpoint deregistered");
        } else {
            warn!(id, "deregistered unknown endpoint");
        }
    }

    /// Number of currently live endpoints.
    pub fn endpoint_count(&self) -> usize {
        lock(&self.registry).len()
    }

    /// Whether the endpoint with this id is currently live.
    pub fn is_registered(&self, id: EndpointId) -> bool {
        lock(&self.registry).contains_key(&id)
    }

    /// Run one blocking endpoint-setup step to completion on the loop.
    ///
    /// Acquires the global setup gate, submits the future to the loop,
    /// and blocks the calling thread until it finishes. Setup steps are
    /// strictly serialized with respect to each other. Must not be called
    /// from a loop callback: the loop would wait on itself.
    pub(crate) fn run_setup<F, T>(&self, setup: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(NetError::LoopUnavailable);
        }
        let _gate = lock(&self.setup_gate);
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.handle.spawn(async move {
            let _ = tx.send(setup.await);
        });
        rx.recv().map_err(|_| NetError::LoopUnavailable)
    }

    /// Handle for spawning endpoint I/O tasks onto the loop.
    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Stop the event loop and join the loop thread.
    ///
    /// Live endpoints lose their I/O tasks; close them first for orderly
    /// teardown notifications. Must not be called from a loop callback.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(thread) = lock(&self.loop_thread).take() {
            if thread.join().is_err() {
                warn!("event loop thread panicked");
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
