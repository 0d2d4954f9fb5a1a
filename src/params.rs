//! Requested imaging parameters and their set/pending bookkeeping.
//!
//! Every setter validates its input first. A rejected value never reaches
//! the set, so the pending flags only ever describe valid requests.

use crate::catalog;
use crate::error::ProbeError;
use crate::types::FrameSize;
use crate::Result;

/// Scan depth step in millimetres; valid depths are 1..=4 steps.
pub const DEPTH_STEP_MM: f64 = 18.0;
pub const MAX_DEPTH_STEPS: i32 = 4;

/// One imaging parameter.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKey {
    Depth,
    Frequency,
    TimeGainCompensation,
    Intensity,
    Contrast,
    Zoom,
    SoundVelocity,
    ProbeVoltage,
    ImageSize,
    /// Center and width of the lookup-table window.
    LutWindow,
}

impl ParameterKey {
    pub const ALL: [ParameterKey; 10] = [
        ParameterKey::Depth,
        ParameterKey::Frequency,
        ParameterKey::TimeGainCompensation,
        ParameterKey::Intensity,
        ParameterKey::Contrast,
        ParameterKey::Zoom,
        ParameterKey::SoundVelocity,
        ParameterKey::ProbeVoltage,
        ParameterKey::ImageSize,
        ParameterKey::LutWindow,
    ];

    pub fn flag(self) -> ParameterKeys {
        match self {
            ParameterKey::Depth => ParameterKeys::DEPTH,
            ParameterKey::Frequency => ParameterKeys::FREQUENCY,
            ParameterKey::TimeGainCompensation => ParameterKeys::TGC,
            ParameterKey::Intensity => ParameterKeys::INTENSITY,
            ParameterKey::Contrast => ParameterKeys::CONTRAST,
            ParameterKey::Zoom => ParameterKeys::ZOOM,
            ParameterKey::SoundVelocity => ParameterKeys::SOUND_VELOCITY,
            ParameterKey::ProbeVoltage => ParameterKeys::PROBE_VOLTAGE,
            ParameterKey::ImageSize => ParameterKeys::IMAGE_SIZE,
            ParameterKey::LutWindow => ParameterKeys::LUT_WINDOW,
        }
    }
}

impl std::fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParameterKey::Depth => "depth",
            ParameterKey::Frequency => "frequency",
            ParameterKey::TimeGainCompensation => "time gain compensation",
            ParameterKey::Intensity => "intensity",
            ParameterKey::Contrast => "contrast",
            ParameterKey::Zoom => "zoom",
            ParameterKey::SoundVelocity => "sound velocity",
            ParameterKey::ProbeVoltage => "probe voltage",
            ParameterKey::ImageSize => "image size",
            ParameterKey::LutWindow => "LUT window",
        };
        f.write_str(name)
    }
}

bitflags::bitflags! {
    /// A set of [`ParameterKey`]s.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[repr(C)]
    pub struct ParameterKeys: u32 {
        const DEPTH          = 1 << 0;
        const FREQUENCY      = 1 << 1;
        const TGC            = 1 << 2;
        const INTENSITY      = 1 << 3;
        const CONTRAST       = 1 << 4;
        const ZOOM           = 1 << 5;
        const SOUND_VELOCITY = 1 << 6;
        const PROBE_VOLTAGE  = 1 << 7;
        const IMAGE_SIZE     = 1 << 8;
        const LUT_WINDOW     = 1 << 9;

        /// Keys that feed the brightness lookup table.
        const LUT_GROUP = Self::INTENSITY.bits() | Self::CONTRAST.bits() | Self::LUT_WINDOW.bits();
    }
}

impl From<ParameterKey> for ParameterKeys {
    fn from(key: ParameterKey) -> Self {
        key.flag()
    }
}

/// Requested imaging values.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagingValues {
    pub depth_mm: f64,
    pub frequency_mhz: f64,
    /// Initial, middle and far gain in percent.
    pub tgc_percent: [f64; 3],
    pub intensity: f64,
    pub contrast: f64,
    pub zoom_factor: f64,
    pub sound_velocity: f64,
    pub probe_voltage: f64,
    pub image_size: FrameSize,
    pub lut_center: f64,
    pub lut_window: f64,
}

impl Default for ImagingValues {
    fn default() -> Self {
        Self {
            depth_mm: 0.0,
            frequency_mhz: 0.0,
            tgc_percent: [0.0; 3],
            intensity: 0.0,
            contrast: 0.0,
            zoom_factor: 1.0,
            sound_velocity: 0.0,
            probe_voltage: 0.0,
            image_size: FrameSize::new(0, 0),
            lut_center: 128.0,
            lut_window: 256.0,
        }
    }
}

/// Imaging parameters with per-key `set` and `pending` flags.
///
/// `pending` is only raised by a setter and only cleared by
/// [`clear_pending`](Self::clear_pending) after a confirmed transport apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImagingParameterSet {
    values: ImagingValues,
    set: ParameterKeys,
    pending: ParameterKeys,
}

fn finite(key: ParameterKey, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ProbeError::invalid(key, format!("{} is not a finite number", value)))
    }
}

fn positive(key: ParameterKey, value: f64) -> Result<f64> {
    if finite(key, value)? > 0.0 {
        Ok(value)
    } else {
        Err(ProbeError::invalid(key, format!("{} must be greater than zero", value)))
    }
}

/// Number of 18 mm steps a depth maps to, if it is supported.
pub fn depth_steps(depth_mm: f64) -> Option<i32> {
    if !depth_mm.is_finite() {
        return None;
    }
    let steps = (depth_mm / DEPTH_STEP_MM) as i32;
    (1..=MAX_DEPTH_STEPS).contains(&steps).then_some(steps)
}

impl ImagingParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &ImagingValues {
        &self.values
    }

    pub fn is_set(&self, key: ParameterKey) -> bool {
        self.set.contains(key.flag())
    }

    pub fn is_pending(&self, key: ParameterKey) -> bool {
        self.pending.contains(key.flag())
    }

    pub fn set_keys(&self) -> ParameterKeys {
        self.set
    }

    pub fn pending(&self) -> ParameterKeys {
        self.pending
    }

    /// Keys that are both set and pending, i.e. due for the next apply pass.
    pub fn due(&self) -> ParameterKeys {
        self.set & self.pending
    }

    /// Clear `keys` after they were applied to the device.
    pub fn clear_pending(&mut self, keys: ParameterKeys) {
        self.pending.remove(keys);
    }

    /// Mark every set key pending again, e.g. for a freshly opened session.
    pub fn mark_all_pending(&mut self) {
        self.pending |= self.set;
    }

    /// Replace the requested depth with the depth the device actually uses.
    pub(crate) fn store_applied_depth(&mut self, depth_mm: f64) {
        self.values.depth_mm = depth_mm;
    }

    fn touch(&mut self, key: ParameterKey) {
        self.set |= key.flag();
        self.pending |= key.flag();
    }

    /// Depth in millimetres; must fall on 1 to 4 steps of 18 mm.
    pub fn set_depth_mm(&mut self, depth_mm: f64) -> Result<()> {
        if depth_steps(depth_mm).is_none() {
            return Err(ProbeError::invalid(
                ParameterKey::Depth,
                format!("{} mm is outside {}..{} mm", depth_mm, DEPTH_STEP_MM, DEPTH_STEP_MM * 5.0),
            ));
        }
        self.values.depth_mm = depth_mm;
        self.touch(ParameterKey::Depth);
        Ok(())
    }

    /// Pulse frequency in MHz; must have pulser timing in the catalog.
    pub fn set_frequency_mhz(&mut self, frequency_mhz: f64) -> Result<()> {
        let f = finite(ParameterKey::Frequency, frequency_mhz)?;
        if catalog::lookup_pulser(f as f32).is_none() {
            return Err(ProbeError::UnknownPulseFrequency(f as f32));
        }
        self.values.frequency_mhz = f;
        self.touch(ParameterKey::Frequency);
        Ok(())
    }

    /// Initial, middle and far gain in percent; each must be non-negative.
    pub fn set_tgc_percent(&mut self, percent: [f64; 3]) -> Result<()> {
        for p in percent {
            if finite(ParameterKey::TimeGainCompensation, p)? < 0.0 {
                return Err(ProbeError::invalid(
                    ParameterKey::TimeGainCompensation,
                    format!("{} % is negative", p),
                ));
            }
        }
        self.values.tgc_percent = percent;
        self.touch(ParameterKey::TimeGainCompensation);
        Ok(())
    }

    pub fn set_intensity(&mut self, intensity: f64) -> Result<()> {
        self.values.intensity = finite(ParameterKey::Intensity, intensity)?;
        self.touch(ParameterKey::Intensity);
        Ok(())
    }

    /// Contrast; negative values would invert the lookup table.
    pub fn set_contrast(&mut self, contrast: f64) -> Result<()> {
        if finite(ParameterKey::Contrast, contrast)? < 0.0 {
            return Err(ProbeError::invalid(ParameterKey::Contrast, "contrast is negative"));
        }
        self.values.contrast = contrast;
        self.touch(ParameterKey::Contrast);
        Ok(())
    }

    pub fn set_zoom_factor(&mut self, zoom: f64) -> Result<()> {
        self.values.zoom_factor = positive(ParameterKey::Zoom, zoom)?;
        self.touch(ParameterKey::Zoom);
        Ok(())
    }

    /// Sound velocity in m/s.
    pub fn set_sound_velocity(&mut self, velocity: f64) -> Result<()> {
        self.values.sound_velocity = positive(ParameterKey::SoundVelocity, velocity)?;
        self.touch(ParameterKey::SoundVelocity);
        Ok(())
    }

    /// Pulse voltage in volts.
    pub fn set_probe_voltage(&mut self, voltage: f64) -> Result<()> {
        self.values.probe_voltage = positive(ParameterKey::ProbeVoltage, voltage)?;
        self.touch(ParameterKey::ProbeVoltage);
        Ok(())
    }

    pub fn set_image_size(&mut self, size: FrameSize) -> Result<()> {
        if size.width == 0 || size.height == 0 {
            return Err(ProbeError::invalid(
                ParameterKey::ImageSize,
                format!("{} has a zero dimension", size),
            ));
        }
        self.values.image_size = size;
        self.touch(ParameterKey::ImageSize);
        Ok(())
    }

    /// Lookup-table window center and width, in raw intensity units.
    pub fn set_lut_window(&mut self, center: f64, window: f64) -> Result<()> {
        let center = finite(ParameterKey::LutWindow, center)?;
        let window = positive(ParameterKey::LutWindow, window)?;
        self.values.lut_center = center;
        self.values.lut_window = window;
        self.touch(ParameterKey::LutWindow);
        Ok(())
    }
}
