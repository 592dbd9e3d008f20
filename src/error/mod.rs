// Error types for the metronome engine
//
// This module defines the error taxonomy for decoding, parameter validation,
// renderer lifecycle and clock queries, with numeric codes suitable for
// reporting across an FFI or IPC boundary.

mod metronome;

pub use metronome::{log_metronome_error, MetronomeError, MetronomeErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// host bindings.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
