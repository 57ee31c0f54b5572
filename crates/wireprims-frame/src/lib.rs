//! Length-prefixed message framing with stream resynchronization.
//!
//! This is the leaf layer of wireprims. Every TCP message is framed with:
//! - A 2-byte magic number ("WF") for stream synchronization
//! - A 4-byte little-endian body length
//!
//! The [`FrameAssembler`] reassembles complete messages from arbitrarily
//! chunked reads and recovers from corrupted streams by scanning forward
//! to the next plausible preamble instead of failing.

pub mod assembler;
pub mod codec;
pub mod error;

pub use assembler::{FrameAssembler, Messages};
pub use codec::{
    decode_length, encode_length, encode_message, find_preamble, DEFAULT_MAX_PAYLOAD, MAGIC,
    PREAMBLE_SIZE,
};
pub use error::{FrameError, Result};
