//! Error types for tilebench
//!
//! Every error is fatal: the binary reports it on stderr and exits with a
//! failure status. Nothing here is retried.

use std::time::Duration;

use thiserror::Error;

use crate::backends::BufferId;

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, BenchError>;

/// Failures raised by a [`Device`](crate::backends::Device) implementation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// No adapter matched the request
    #[error("no GPU adapter found")]
    AdapterNotFound,

    /// The adapter refused to create a device
    #[error("failed to create device: {0}")]
    RequestDevice(String),

    /// A buffer handle that was never allocated or was already freed
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),

    /// Upload or download length does not fit the buffer
    #[error("buffer {buffer:?} holds {capacity} bytes, access needs {requested}")]
    SizeMismatch {
        /// Buffer being accessed
        buffer: BufferId,
        /// Allocated size in bytes
        capacity: usize,
        /// Bytes the access needs
        requested: usize,
    },

    /// Allocation of zero bytes or beyond the device limit
    #[error("cannot allocate {bytes} bytes for {label}")]
    Allocation {
        /// Buffer label
        label: &'static str,
        /// Requested size
        bytes: usize,
    },

    /// A validation error reported by the driver layer
    #[error("validation failed: {0}")]
    Validation(String),

    /// Mapping a staging buffer for readback failed
    #[error("buffer mapping failed: {0}")]
    Map(String),

    /// The kernel needs a capability this device lacks
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Errors that abort a check or benchmark run
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BenchError {
    /// A device operation failed
    #[error("{call} failed at {location}: {source}")]
    Device {
        /// Source text of the failing call
        call: &'static str,
        /// `file:line` of the call site
        location: String,
        /// Underlying device failure
        #[source]
        source: DeviceError,
    },

    /// The kernel under test disagrees with the reference
    #[error(
        "{kernel}: mismatch at C[{row}, {col}] (outer tile M={tile_m}, N={tile_n}): \
         got {actual}, expected {expected}"
    )]
    Mismatch {
        /// Kernel name
        kernel: String,
        /// Outer tile index along M
        tile_m: usize,
        /// Outer tile index along N
        tile_n: usize,
        /// Output row
        row: usize,
        /// Output column
        col: usize,
        /// Value produced by the kernel
        actual: String,
        /// Value produced by the reference
        expected: String,
    },

    /// The iteration search exceeded its cap without reaching the minimum time
    #[error(
        "{kernel}: {iterations} iterations took only {elapsed:?}; \
         the kernel was probably optimized away"
    )]
    DegenerateKernel {
        /// Kernel name
        kernel: String,
        /// Iteration count at which the search gave up
        iterations: u64,
        /// Time measured for that count
        elapsed: Duration,
    },

    /// An environment variable could not be parsed
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidConfig {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
        /// What was expected
        reason: String,
    },

    /// The kernel cannot run on the selected device
    #[error("{kernel} cannot run here: {reason}")]
    UnsupportedKernel {
        /// Kernel name
        kernel: String,
        /// Why
        reason: String,
    },
}

impl DeviceError {
    /// Attach the failing call's source text and location
    pub fn at(self, call: &'static str, file: &'static str, line: u32) -> BenchError {
        BenchError::Device {
            call,
            location: format!("{file}:{line}"),
            source: self,
        }
    }
}

/// Run a device call and turn its error into [`BenchError::Device`],
/// recording the call's source text and location.
#[macro_export]
macro_rules! device_call {
    ($call:expr) => {
        $call.map_err(|e: $crate::error::DeviceError| e.at(stringify!($call), file!(), line!()))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display() {
        let err = DeviceError::SizeMismatch {
            buffer: BufferId(3),
            capacity: 16,
            requested: 20,
        };
        assert_eq!(
            err.to_string(),
            "buffer BufferId(3) holds 16 bytes, access needs 20"
        );
    }

    #[test]
    fn test_device_call_records_call_site() {
        fn failing() -> std::result::Result<(), DeviceError> {
            Err(DeviceError::AdapterNotFound)
        }

        let err = device_call!(failing()).unwrap_err();
        match err {
            BenchError::Device {
                call,
                location,
                source,
            } => {
                assert_eq!(call, "failing()");
                assert!(location.starts_with(file!()), "location={location}");
                assert_eq!(source, DeviceError::AdapterNotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_mismatch_display() {
        let err = BenchError::Mismatch {
            kernel: "naive".to_string(),
            tile_m: 1,
            tile_n: 0,
            row: 70,
            col: 0,
            actual: "3".to_string(),
            expected: "4".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "naive: mismatch at C[70, 0] (outer tile M=1, N=0): got 3, expected 4"
        );
    }

    #[test]
    fn test_invalid_config_display() {
        let err = BenchError::InvalidConfig {
            key: "M",
            value: "abc".to_string(),
            reason: "expected an unsigned integer".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value \"abc\" for M: expected an unsigned integer"
        );
    }
}
