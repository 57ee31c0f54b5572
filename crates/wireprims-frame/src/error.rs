/// Errors that can occur while encoding messages.
///
/// Decoding never errors: a malformed window degrades to the assembler's
/// resynchronization scan instead.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds what the fixed-width preamble can describe.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
