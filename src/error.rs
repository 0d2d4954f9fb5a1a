use crate::params::{ParameterKey, ParameterKeys};
use std::fmt;

/// Errors that can occur when driving a Capistrano probe.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("No Capistrano hardware detected and user-probe fallback is disabled")]
    DeviceNotFound,

    #[error("No probe attached to the Capistrano board")]
    NoProbeAttached,

    #[error("Unknown probe id {0}")]
    UnknownProbe(u8),

    #[error("Invalid pulse frequency {0} MHz (valid: 10, 12, 16, 18, 20, 25, 30, 35, 45, 50)")]
    UnknownPulseFrequency(f32),

    #[error("Invalid {key} value: {reason}")]
    InvalidParameter { key: ParameterKey, reason: String },

    #[error("Failed to apply imaging parameters: {0:?}")]
    ParametersNotApplied(ParameterKeys),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Device not connected")]
    NotConnected,

    #[error("Acquisition halted: {0}")]
    AcquisitionHalted(String),

    #[error("Output sink rejected frame {0}")]
    SinkRejected(u64),

    #[error("Output sink full, dropped frame {0}")]
    SinkFull(u64),

    #[error("Frame stream stopped")]
    StreamStopped,

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("Driver state lock poisoned")]
    LockPoisoned,

    #[error("Failed to spawn acquisition thread: {0}")]
    ThreadSpawn(String),
}

impl ProbeError {
    pub(crate) fn invalid(key: ParameterKey, reason: impl Into<String>) -> Self {
        ProbeError::InvalidParameter {
            key,
            reason: reason.into(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for ProbeError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        ProbeError::LockPoisoned
    }
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &ProbeError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
