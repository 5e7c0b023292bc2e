mod tools;
pub mod lz4;
pub mod inflate;

/// Codec Errors
///
/// Every failure is detected synchronously and aborts the current call.
/// Nothing is retried internally; after `OutputTooSmall` the caller may
/// re-run the same call with a larger buffer.
#[derive(thiserror::Error,Debug,PartialEq,Eq)]
pub enum Error {
    /// input ended before a complete unit could be read, offset is where the
    /// shortfall was detected
    #[error("input truncated at offset {0}")]
    Truncated(usize),
    /// structurally invalid input, offset is where the violation was detected
    #[error("malformed input at offset {0}: {1}")]
    Malformed(usize,&'static str),
    /// caller-supplied output capacity is insufficient, retry with more
    #[error("output buffer too small")]
    OutputTooSmall,
    /// programmer error in the arguments, not an input-data condition
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
