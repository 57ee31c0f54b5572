//! Facade over the wireprims crates.
//!
//! Re-exports the message framing layer and the socket endpoint layer so
//! applications can depend on a single crate:
//!
//! - [`frame`]: preamble codec and stream reassembly.
//! - [`net`]: event-loop controller, TCP sessions and servers, UDP and
//!   multicast endpoints, and their callback contracts.

pub mod frame {
    pub use wireprims_frame::*;
}

pub mod net {
    pub use wireprims_net::*;
}
