//! Classification of transport status codes into recovery actions.

/// Status codes reported by the transport after each frame wait.
pub mod status {
    pub const SUCCESS: u32 = 0;
    pub const FAILED: u32 = 1;
    pub const TIMEOUT_2A: u32 = 2;
    pub const TIMEOUT_2B: u32 = 3;
    pub const TIMEOUT_6A: u32 = 4;
    pub const TIMEOUT_6B: u32 = 5;
    /// Frames arrived out of sequence: probe synchronization lost.
    pub const NOT_SEQUENTIAL: u32 = 6;
    pub const STOPPED: u32 = 7;
}

/// Recovery action for a transport status.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Success; keep polling.
    Continue,
    /// Recoverable hiccup; log and keep polling.
    TransientWarning,
    /// Requires a freeze/unfreeze cycle before polling continues.
    LostSynchronization,
    /// Polling must stop and the error is surfaced to the caller.
    Fatal,
}

/// Maps status codes to [`StatusClass`] and logs them once per episode.
///
/// The suppression flag is per instance and cleared by the next `Continue`.
#[derive(Debug, Default)]
pub struct ErrorClassifier {
    reported: Option<u32>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure status mapping.
    pub fn classify(code: u32) -> StatusClass {
        match code {
            status::SUCCESS => StatusClass::Continue,
            status::FAILED => StatusClass::Fatal,
            status::TIMEOUT_2A | status::TIMEOUT_2B | status::TIMEOUT_6A | status::TIMEOUT_6B => {
                StatusClass::TransientWarning
            }
            status::STOPPED => StatusClass::TransientWarning,
            status::NOT_SEQUENTIAL => StatusClass::LostSynchronization,
            _ => StatusClass::LostSynchronization,
        }
    }

    /// Classify `code` and log it unless the same code was just reported.
    ///
    /// Timeouts are only worth a warning when the next frame is already
    /// ready; otherwise the board is simply running synchronized.
    pub fn observe(&mut self, code: u32, next_frame_ready: bool) -> StatusClass {
        let class = Self::classify(code);
        if class == StatusClass::Continue {
            self.reported = None;
            return class;
        }

        let is_timeout = matches!(
            code,
            status::TIMEOUT_2A | status::TIMEOUT_2B | status::TIMEOUT_6A | status::TIMEOUT_6B
        );
        if is_timeout && !next_frame_ready {
            return class;
        }

        if self.reported != Some(code) {
            self.reported = Some(code);
            match code {
                status::FAILED => log::error!("USB failure, probe was removed?"),
                status::NOT_SEQUENTIAL => {
                    log::error!("Lost probe synchronization, check probe cables")
                }
                status::STOPPED => log::error!("USB stopped, check probe and restart"),
                _ if is_timeout => log::warn!("USB timeout (status {})", code),
                _ => log::error!("Unknown USB error: {}", code),
            }
        }
        class
    }

    /// Whether a message for the current error episode was already logged.
    pub fn has_reported(&self) -> bool {
        self.reported.is_some()
    }
}
