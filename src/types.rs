/// Lifecycle state of the probe driver.
///
/// `Frozen` and `Recording` both imply an open session on the transport.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    #[default]
    Disconnected = 0,
    /// Session open, imaging never started since connect.
    Connected = 1,
    Frozen = 2,
    Recording = 3,
}

impl DeviceState {
    /// True for every state that holds an open transport session.
    pub fn is_connected(self) -> bool {
        !matches!(self, DeviceState::Disconnected)
    }
}

/// Image dimensions in pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of 8-bit pixels in one frame.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which probe handle the transport should drive.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSelection {
    /// The first hardware probe found on the bus.
    Hardware = 0,
    /// The SDK's software "user probe", used when no hardware is present.
    UserProbe = 1,
}

/// One acquired B-mode frame.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// 8-bit brightness pixels, row-major, `size.pixel_count()` long.
    pub pixels: Vec<u8>,
    /// 1-based frame number since the last unfreeze.
    pub index: u64,
    /// Host timestamp in seconds since the driver was created.
    pub timestamp_s: f64,
    pub size: FrameSize,
    /// Element spacing in millimetres [x, y, z].
    pub pixel_spacing_mm: [f64; 3],
}
