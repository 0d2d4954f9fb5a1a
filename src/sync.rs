//! Pushes pending imaging parameters to the device.

use crate::catalog;
use crate::curves::{build_lookup_table, gain_curve_from_percent};
use crate::error::ProbeError;
use crate::params::{depth_steps, ImagingParameterSet, ImagingValues, ParameterKey, ParameterKeys, DEPTH_STEP_MM};
use crate::session::ProbeSession;
use crate::transport::{DeviceSetting, Transport};
use crate::Result;

/// Borrowed view of everything one synchronization pass touches.
pub struct ParameterSynchronizer<'a, T: Transport> {
    pub transport: &'a mut T,
    pub session: &'a mut ProbeSession,
    /// Local pixel buffer, resized when the image size changes.
    pub frame_buffer: &'a mut Vec<u8>,
    pub cine_buffers: u32,
}

impl<'a, T: Transport> ParameterSynchronizer<'a, T> {
    /// Apply every key that is both set and pending.
    ///
    /// Keys are applied in a fixed order: depth, frequency, TGC, lookup table,
    /// zoom, sound velocity, probe voltage, image size. A failing key stays
    /// pending and does not stop the keys after it.
    pub fn apply_pending(&mut self, params: &mut ImagingParameterSet) -> Result<()> {
        let due = params.due();
        if due.is_empty() {
            return Ok(());
        }
        let values = params.values().clone();
        let mut applied = ParameterKeys::empty();
        let mut failed = ParameterKeys::empty();

        if due.contains(ParameterKeys::DEPTH) {
            match self.apply_depth(values.depth_mm) {
                Ok(depth) => {
                    params.store_applied_depth(depth);
                    applied |= ParameterKeys::DEPTH;
                }
                Err(e) => record_failure(ParameterKey::Depth, e, &mut failed),
            }
        }

        if due.contains(ParameterKeys::FREQUENCY) {
            let result = self.apply_frequency(values.frequency_mhz);
            settle(ParameterKey::Frequency, result, &mut applied, &mut failed);
        }

        if due.contains(ParameterKeys::TGC) {
            let curve = gain_curve_from_percent(values.tgc_percent);
            let result = self.transport.apply(&DeviceSetting::GainCurve(curve));
            settle(ParameterKey::TimeGainCompensation, result, &mut applied, &mut failed);
        }

        let lut_ready = params
            .set_keys()
            .contains(ParameterKeys::INTENSITY | ParameterKeys::CONTRAST);
        if lut_ready && due.intersects(ParameterKeys::LUT_GROUP) {
            let pending_lut = due & ParameterKeys::LUT_GROUP;
            match self.apply_lookup_table(&values) {
                Ok(()) => applied |= pending_lut,
                Err(e) => {
                    log::error!("Failed to upload lookup table: {}", e);
                    failed |= pending_lut;
                }
            }
        }

        if due.contains(ParameterKeys::ZOOM) {
            let result = self.transport.apply(&DeviceSetting::Zoom(values.zoom_factor));
            settle(ParameterKey::Zoom, result, &mut applied, &mut failed);
        }

        if due.contains(ParameterKeys::SOUND_VELOCITY) {
            let velocity = values.sound_velocity as f32;
            let result = self
                .transport
                .apply(&DeviceSetting::SoundVelocity(velocity))
                .map(|()| self.session.set_sound_velocity(velocity));
            settle(ParameterKey::SoundVelocity, result, &mut applied, &mut failed);
        }

        if due.contains(ParameterKeys::PROBE_VOLTAGE) {
            let result = self
                .transport
                .apply(&DeviceSetting::PulseVoltage(values.probe_voltage as f32));
            settle(ParameterKey::ProbeVoltage, result, &mut applied, &mut failed);
        }

        if due.contains(ParameterKeys::IMAGE_SIZE) {
            let size = values.image_size;
            let result = self
                .transport
                .allocate_frame_buffer(size, self.cine_buffers)
                .map(|()| {
                    self.frame_buffer.resize(size.pixel_count(), 0);
                    self.session.set_image_size(size);
                });
            settle(ParameterKey::ImageSize, result, &mut applied, &mut failed);
        }

        params.clear_pending(applied);
        log::debug!("Applied imaging parameters: {:?}", applied);

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ProbeError::ParametersNotApplied(failed))
        }
    }

    /// Returns the depth snapped to the selected step.
    fn apply_depth(&mut self, depth_mm: f64) -> Result<f64> {
        let steps = depth_steps(depth_mm).ok_or_else(|| {
            ProbeError::invalid(ParameterKey::Depth, format!("{} mm is not a supported depth", depth_mm))
        })?;
        self.transport
            .apply(&DeviceSetting::SampleClockDivider(steps as u8))?;
        self.session.set_clock_divider(steps as u8);
        self.transport.clear_buffers();
        let snapped = steps as f64 * DEPTH_STEP_MM;
        log::debug!(
            "Depth {} mm applied as {} mm (clock divider {}, fs {} MHz)",
            depth_mm,
            snapped,
            steps,
            self.session.sample_frequency
        );
        Ok(snapped)
    }

    fn apply_frequency(&mut self, frequency_mhz: f64) -> Result<()> {
        let frequency = frequency_mhz as f32;
        let pulser =
            catalog::lookup_pulser(frequency).ok_or(ProbeError::UnknownPulseFrequency(frequency))?;
        self.transport.apply(&DeviceSetting::ProbeFrequency(frequency))?;
        self.transport.apply(&DeviceSetting::Pulser(pulser))?;
        self.session.set_pulse_frequency(frequency)?;
        Ok(())
    }

    fn apply_lookup_table(&mut self, values: &ImagingValues) -> Result<()> {
        let lut = build_lookup_table(
            values.intensity,
            values.contrast,
            values.lut_center,
            values.lut_window,
        );
        self.transport.apply(&DeviceSetting::LookupTable(lut))
    }
}

fn record_failure(key: ParameterKey, err: ProbeError, failed: &mut ParameterKeys) {
    log::error!("Failed to set {}: {}", key, err);
    *failed |= key.flag();
}

fn settle(key: ParameterKey, result: Result<()>, applied: &mut ParameterKeys, failed: &mut ParameterKeys) {
    match result {
        Ok(()) => *applied |= key.flag(),
        Err(e) => record_failure(key, e, failed),
    }
}
