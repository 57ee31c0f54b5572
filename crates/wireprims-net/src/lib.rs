//! Asynchronous socket endpoints behind a callback-driven surface.
//!
//! All endpoints share one event loop owned by a [`Controller`]; the
//! application talks to them through plain blocking constructors and
//! send/close methods, and hears back through the callback traits in
//! [`callback`]. TCP endpoints exchange length-prefixed messages using
//! the `wireprims-frame` codec; datagram endpoints carry payloads
//! unframed.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod callback;
pub mod config;
pub mod controller;
pub mod error;
pub mod multicast;
pub mod server;
pub mod session;
pub mod udp;

pub use callback::{
    Acceptor, ConnectionCallback, DatagramCallback, MulticastCallback, SendStatus, ServerCallback,
};
pub use config::{MulticastConfig, ServerConfig, TcpConfig, UdpConfig, DEFAULT_MTU};
pub use controller::{Controller, EndpointId};
pub use error::{NetError, Result};
pub use multicast::MulticastEndpoint;
pub use server::TcpServer;
pub use session::TcpSession;
pub use udp::UdpEndpoint;

/// Lock a mutex, continuing with the inner value if a holder panicked.
/// Guarded state here stays consistent across any single operation.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
