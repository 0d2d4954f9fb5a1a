use crate::catalog::{self, ProbeParameters, PulserTiming, MASTER_CLOCK_MHZ};
use crate::config::ProbeOverrides;
use crate::curves::SAMPLES_PER_LINE;
use crate::error::ProbeError;
use crate::types::{FrameSize, ProbeSelection};
use crate::Result;

/// Probe state of one open connection.
///
/// Starts as a copy of the catalog record with configuration overrides
/// applied; derived acquisition values are recomputed whenever depth,
/// image size or sound velocity change.
#[derive(Debug, Clone)]
pub struct ProbeSession {
    pub probe: ProbeParameters,
    pub selection: ProbeSelection,
    pub pulser: PulserTiming,
    pub clock_divider: u8,
    /// Effective sample frequency (MHz).
    pub sample_frequency: f32,
    /// Samples per line divided by image height.
    pub oversample_rate: f32,
    /// Pivot to face distance expressed in samples.
    pub pivot_face_samples: f32,
    pub image_size: FrameSize,
}

impl ProbeSession {
    /// Open a session for `probe_id`.
    ///
    /// Fails when the id or the probe's pulse frequency is not in the catalog;
    /// nothing is substituted on a miss.
    pub fn open(
        probe_id: u8,
        selection: ProbeSelection,
        overrides: &ProbeOverrides,
        image_size: FrameSize,
    ) -> Result<ProbeSession> {
        let mut probe = catalog::lookup(probe_id)
            .ok_or(ProbeError::UnknownProbe(probe_id))?
            .clone();
        overrides.apply(&mut probe);

        let pulser = catalog::lookup_pulser(probe.pulse_frequency)
            .ok_or(ProbeError::UnknownPulseFrequency(probe.pulse_frequency))?;

        let clock_divider = probe.sample_clock_divider().max(1);
        let mut session = ProbeSession {
            probe,
            selection,
            pulser,
            clock_divider,
            sample_frequency: 0.0,
            oversample_rate: 0.0,
            pivot_face_samples: 0.0,
            image_size,
        };
        session.update_depth_mode();
        Ok(session)
    }

    /// Recompute the values that depend on clock divider, image height and
    /// sound velocity.
    pub fn update_depth_mode(&mut self) {
        self.oversample_rate = SAMPLES_PER_LINE as f32 / self.image_size.height.max(1) as f32;
        self.sample_frequency = MASTER_CLOCK_MHZ / self.clock_divider.max(1) as f32;
        self.pivot_face_samples = self.probe.pivot_face_distance * 1000.0 * self.sample_frequency
            / (0.5 * self.probe.sound_velocity);
    }

    pub fn set_clock_divider(&mut self, divider: u8) {
        self.clock_divider = divider;
        self.update_depth_mode();
    }

    pub fn set_sound_velocity(&mut self, velocity: f32) {
        self.probe.sound_velocity = velocity;
        self.update_depth_mode();
    }

    pub fn set_image_size(&mut self, size: FrameSize) {
        self.image_size = size;
        self.update_depth_mode();
    }

    /// Switch the pulser to `frequency_mhz`.
    pub fn set_pulse_frequency(&mut self, frequency_mhz: f32) -> Result<PulserTiming> {
        let pulser = catalog::lookup_pulser(frequency_mhz)
            .ok_or(ProbeError::UnknownPulseFrequency(frequency_mhz))?;
        self.probe.pulse_frequency = frequency_mhz;
        self.pulser = pulser;
        Ok(pulser)
    }

    /// Axial depth covered by one sample (mm/sample).
    pub fn depth_scale_mm(&self) -> f32 {
        self.probe.sound_velocity / (2.0 * self.sample_frequency * 1000.0)
    }
}
