use crate::catalog::ProbeParameters;
use crate::types::FrameSize;
use std::time::Duration;

/// Optional per-installation overrides of catalog probe constants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeOverrides {
    pub jitter_compensation: Option<u8>,
    pub position_scale: Option<u8>,
    pub sweep_angle: Option<f32>,
    pub servo_gain: Option<u8>,
    pub overscan: Option<u8>,
    pub derivative_compensation: Option<u8>,
    pub pulse_frequency: Option<f32>,
    pub sample_frequency: Option<f32>,
}

impl ProbeOverrides {
    /// Apply the overrides to a session copy of a catalog record.
    pub fn apply(&self, probe: &mut ProbeParameters) {
        if let Some(v) = self.jitter_compensation {
            probe.servo.jitter_compensation = v;
        }
        if let Some(v) = self.position_scale {
            probe.servo.position_scale = v;
        }
        if let Some(v) = self.sweep_angle {
            probe.servo.sweep_angle = v;
        }
        if let Some(v) = self.servo_gain {
            probe.servo.servo_gain = v;
        }
        if let Some(v) = self.overscan {
            probe.servo.overscan = v;
        }
        if let Some(v) = self.derivative_compensation {
            probe.servo.derivative_compensation = v;
        }
        if let Some(v) = self.pulse_frequency {
            probe.pulse_frequency = v;
        }
        if let Some(v) = self.sample_frequency.filter(|f| *f > 0.0) {
            probe.sample_frequency = v;
        }
    }
}

/// Driver configuration.
///
/// Imaging defaults are requested (set and pending) when the driver is
/// created; everything else shapes connect and the acquisition loop.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// Number of cine buffers the board allocates.
    pub cine_buffers: u32,
    /// Use the SDK user probe when no hardware is detected.
    pub user_probe_fallback: bool,
    /// Catalog id used with the user probe or when no probe id is reported.
    pub fallback_probe_id: u8,
    pub bidirectional: bool,
    /// Timeout hint passed to each frame wait.
    pub poll_timeout: Duration,
    /// Poll rate while not recording, in Hz.
    pub acquisition_rate: f64,
    /// Delay after stopping imaging before resources are released.
    pub stop_settle: Duration,
    /// Push each setter call to the device immediately while connected.
    pub apply_on_set: bool,
    pub image_size: FrameSize,
    pub intensity: f64,
    pub contrast: f64,
    pub probe_voltage: f64,
    pub lut_center: f64,
    pub lut_window: f64,
    pub pixel_spacing_mm: [f64; 3],
    pub probe_overrides: ProbeOverrides,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cine_buffers: 32,
            user_probe_fallback: false,
            fallback_probe_id: 3,
            bidirectional: false,
            poll_timeout: Duration::from_millis(100),
            acquisition_rate: 30.0,
            stop_settle: Duration::from_millis(250),
            apply_on_set: true,
            image_size: FrameSize::new(640, 800),
            intensity: 128.0,
            contrast: 256.0,
            probe_voltage: 30.0,
            lut_center: 128.0,
            lut_window: 256.0,
            pixel_spacing_mm: [1.0, 1.0, 1.0],
            probe_overrides: ProbeOverrides::default(),
        }
    }
}

impl DriverConfig {
    /// Defaults with `CAPISTRANO_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.cine_buffers = read_env_u64("CAPISTRANO_CINE_BUFFERS", config.cine_buffers as u64) as u32;
        config.user_probe_fallback =
            read_env_bool("CAPISTRANO_USER_PROBE_FALLBACK", config.user_probe_fallback);
        config.fallback_probe_id = read_env_u8("CAPISTRANO_FALLBACK_PROBE_ID", config.fallback_probe_id);
        config.bidirectional = read_env_bool("CAPISTRANO_BIDIRECTIONAL", config.bidirectional);
        config.poll_timeout = Duration::from_millis(read_env_u64(
            "CAPISTRANO_POLL_TIMEOUT_MS",
            config.poll_timeout.as_millis() as u64,
        ));
        config.acquisition_rate =
            read_env_f32("CAPISTRANO_ACQUISITION_RATE", config.acquisition_rate as f32) as f64;
        config.apply_on_set = read_env_bool("CAPISTRANO_APPLY_ON_SET", config.apply_on_set);
        if let Some(f) = read_env_opt_f32("CAPISTRANO_PULSE_FREQUENCY") {
            config.probe_overrides.pulse_frequency = Some(f);
        }

        log::debug!(
            "Driver config: cineBuffers={} userProbeFallback={} fallbackProbeId={} bidirectional={} pollTimeout={:?} rate={}Hz applyOnSet={}",
            config.cine_buffers,
            config.user_probe_fallback,
            config.fallback_probe_id,
            config.bidirectional,
            config.poll_timeout,
            config.acquisition_rate,
            config.apply_on_set,
        );
        config
    }

    /// Sleep between polls while not recording.
    pub fn idle_interval(&self) -> Duration {
        if self.acquisition_rate > 0.0 {
            Duration::from_secs_f64(1.0 / self.acquisition_rate)
        } else {
            self.poll_timeout
        }
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        })
        .unwrap_or(default)
}

fn read_env_u8(name: &str, default: u8) -> u8 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u8>().ok())
        .unwrap_or(default)
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_env_opt_f32(name: &str) -> Option<f32> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite())
}

fn read_env_f32(name: &str, default: f32) -> f32 {
    read_env_opt_f32(name).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    #[test]
    fn test_defaults() {
        let c = DriverConfig::default();
        assert_eq!(c.image_size, FrameSize::new(640, 800));
        assert_eq!(c.intensity, 128.0);
        assert_eq!(c.contrast, 256.0);
        assert!(!c.user_probe_fallback);
        assert!((c.idle_interval().as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_env_helpers() {
        std::env::set_var("CAPISTRANO_TEST_BOOL", " Yes ");
        std::env::set_var("CAPISTRANO_TEST_U8", "300");
        std::env::set_var("CAPISTRANO_TEST_F32", "12.5");
        assert!(read_env_bool("CAPISTRANO_TEST_BOOL", false));
        assert_eq!(read_env_u8("CAPISTRANO_TEST_U8", 7), 7);
        assert_eq!(read_env_f32("CAPISTRANO_TEST_F32", 0.0), 12.5);
        assert_eq!(read_env_u64("CAPISTRANO_TEST_MISSING", 42), 42);
    }

    #[test]
    fn test_overrides_apply() {
        let mut probe = catalog::lookup(0).unwrap().clone();
        let overrides = ProbeOverrides {
            overscan: Some(100),
            sweep_angle: Some(40.0),
            sample_frequency: Some(0.0),
            ..Default::default()
        };
        overrides.apply(&mut probe);
        assert_eq!(probe.servo.overscan, 100);
        assert_eq!(probe.servo.sweep_angle, 40.0);
        assert_eq!(probe.sample_frequency, 80.0);
        assert_eq!(probe.overscan_code(), 15);
    }
}
