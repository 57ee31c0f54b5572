use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use crate::codec::{decode_length, find_preamble, DEFAULT_MAX_PAYLOAD, PREAMBLE_SIZE};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

#[derive(Debug, Clone, Copy)]
enum Phase {
    AwaitingLength,
    AwaitingBody { expected: usize },
}

/// Per-connection receive state machine.
///
/// Consumes raw byte chunks in arrival order and reassembles complete
/// messages. Exactly one message is in flight at a time; partial chunks
/// only update the running counters.
///
/// Malformed input is never fatal: a window that does not open with a
/// valid preamble degrades to a resynchronization scan that skips forward
/// to the next plausible preamble start. Single-writer discipline — one
/// assembler per connection, fed from that connection's read path only.
pub struct FrameAssembler {
    buf: BytesMut,
    phase: Phase,
    max_payload: usize,
}

impl FrameAssembler {
    /// Create an assembler with the default plausibility ceiling.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create an assembler with an explicit plausibility ceiling.
    ///
    /// A decoded body length above the ceiling is treated as corruption
    /// and triggers resynchronization, same as a bad magic.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            phase: Phase::AwaitingLength,
            max_payload,
        }
    }

    /// Feed one raw chunk and iterate the complete messages it unlocks.
    ///
    /// Every chunk must be fed exactly once, in arrival order. The
    /// returned iterator is lazy and finite; dropping it early leaves the
    /// undrained messages buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Messages<'_> {
        self.buf.extend_from_slice(chunk);
        Messages { assembler: self }
    }

    /// Bytes currently buffered but not yet emitted.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn next_message(&mut self) -> Option<Bytes> {
        loop {
            match self.phase {
                Phase::AwaitingLength => {
                    let preamble = self.buf.first_chunk::<PREAMBLE_SIZE>()?;
                    match decode_length(preamble) {
                        Some(len) if len as usize <= self.max_payload => {
                            self.buf.advance(PREAMBLE_SIZE);
                            self.phase = Phase::AwaitingBody {
                                expected: len as usize,
                            };
                        }
                        // Bad magic or implausible length: corrupt stream.
                        _ => self.resynchronize(),
                    }
                }
                Phase::AwaitingBody { expected } => {
                    if self.buf.len() < expected {
                        return None;
                    }
                    let message = self.buf.split_to(expected).freeze();
                    self.phase = Phase::AwaitingLength;
                    return Some(message);
                }
            }
        }
    }

    /// Skip the unparseable window head and retain only from the next
    /// plausible preamble start. Bounded by the buffered window length.
    fn resynchronize(&mut self) {
        self.buf.advance(1);
        let skipped = match find_preamble(&self.buf) {
            Some(offset) => {
                self.buf.advance(offset);
                offset + 1
            }
            None => {
                let dropped = self.buf.len() + 1;
                self.buf.clear();
                dropped
            }
        };
        debug!(skipped, "resynchronizing corrupted stream");
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy, finite iterator over the messages unlocked by one `feed` call.
pub struct Messages<'a> {
    assembler: &'a mut FrameAssembler,
}

impl Iterator for Messages<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.assembler.next_message()
    }
}
