//! Boundaries between the driver core and the outside world.
//!
//! [`Transport`] is the probe SDK / USB layer, [`OutputSink`] receives the
//! acquired frames.

use crate::catalog::{ProbeParameters, PulserTiming};
use crate::curves::{GainCurve, LookupTable};
use crate::types::{FrameRecord, FrameSize, ProbeSelection};
use crate::Result;
use std::time::Duration;

/// A single device-side setting pushed through [`Transport::apply`].
///
/// The image size is not a setting; it goes through
/// [`Transport::allocate_frame_buffer`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSetting {
    /// Sample clock divider selecting the scan depth.
    SampleClockDivider(u8),
    /// Probe transmit frequency (MHz).
    ProbeFrequency(f32),
    Pulser(PulserTiming),
    GainCurve(GainCurve),
    LookupTable(LookupTable),
    Zoom(f64),
    /// Sound velocity (m/s).
    SoundVelocity(f32),
    /// Pulse voltage (V).
    PulseVoltage(f32),
    Bidirectional(bool),
}

impl DeviceSetting {
    /// Short name used in logs and failure injection.
    pub fn kind(&self) -> SettingKind {
        match self {
            DeviceSetting::SampleClockDivider(_) => SettingKind::SampleClockDivider,
            DeviceSetting::ProbeFrequency(_) => SettingKind::ProbeFrequency,
            DeviceSetting::Pulser(_) => SettingKind::Pulser,
            DeviceSetting::GainCurve(_) => SettingKind::GainCurve,
            DeviceSetting::LookupTable(_) => SettingKind::LookupTable,
            DeviceSetting::Zoom(_) => SettingKind::Zoom,
            DeviceSetting::SoundVelocity(_) => SettingKind::SoundVelocity,
            DeviceSetting::PulseVoltage(_) => SettingKind::PulseVoltage,
            DeviceSetting::Bidirectional(_) => SettingKind::Bidirectional,
        }
    }
}

/// Discriminant of [`DeviceSetting`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKind {
    SampleClockDivider = 0,
    ProbeFrequency = 1,
    Pulser = 2,
    GainCurve = 3,
    LookupTable = 4,
    Zoom = 5,
    SoundVelocity = 6,
    PulseVoltage = 7,
    Bidirectional = 8,
}

/// Result of one bounded frame wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameWait {
    /// The next frame was ready when the wait returned.
    pub next_frame_ready: bool,
    /// Transport status code, see [`crate::classify::status`].
    pub status: u32,
}

/// Probe SDK / USB boundary.
///
/// All calls come from one thread at a time; the driver serializes access.
pub trait Transport: Send {
    /// Detect attached boards; returns how many were found.
    fn find_device(&mut self) -> Result<usize>;

    /// Whether real probe hardware is present.
    fn hardware_detected(&self) -> bool;

    /// Catalog id of the attached probe, `None` when no probe is attached.
    fn attached_probe_id(&mut self) -> Option<u8>;

    fn select_device(&mut self, selection: ProbeSelection) -> Result<()>;

    /// Program servo, filter, clock and pulser constants for a probe.
    fn configure_probe(&mut self, probe: &ProbeParameters, pulser: &PulserTiming) -> Result<()>;

    fn apply(&mut self, setting: &DeviceSetting) -> Result<()>;

    /// Allocate cine and display buffers for frames of `size`.
    fn allocate_frame_buffer(&mut self, size: FrameSize, cine_buffers: u32) -> Result<()>;

    /// Free everything allocated since `find_device`.
    fn release(&mut self);

    /// Start imaging.
    fn run(&mut self) -> Result<()>;

    /// Stop imaging.
    fn stop(&mut self);

    fn clear_buffers(&mut self);

    /// Block until the next frame or the transport's own timeout.
    fn wait_for_frame(&mut self, timeout_hint: Duration) -> FrameWait;

    /// Copy the current frame into `dest` (one byte per pixel).
    fn read_frame(&mut self, dest: &mut [u8]) -> Result<()>;

    fn probe_name(&self) -> String {
        String::new()
    }

    fn sdk_version(&self) -> String {
        String::new()
    }
}

/// Consumer of acquired frames.
pub trait OutputSink: Send {
    /// Take ownership of a frame. An error drops the frame but never stops
    /// acquisition.
    fn accept(&mut self, frame: FrameRecord) -> Result<()>;

    /// Frames currently held; zero marks the first frame of a session.
    fn item_count(&self) -> usize;

    /// Drop held frames, called when a new session starts.
    fn clear(&mut self) {}
}
