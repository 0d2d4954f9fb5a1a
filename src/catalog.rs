//! Built-in probe and pulser tables.
//!
//! Both tables are immutable data. The driver copies a record into its
//! session at connect time and never writes back.

/// Master clock of the Capistrano board in MHz.
pub const MASTER_CLOCK_MHZ: f32 = 80.0;

/// Servo constants of a mechanically swept probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeServo {
    pub jitter_compensation: u8,
    pub position_scale: u8,
    /// Sweep angle in degrees.
    pub sweep_angle: f32,
    pub servo_gain: u8,
    /// Overscan in percent.
    pub overscan: u8,
    pub derivative_compensation: u8,
}

/// Physical constants of one probe model.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeParameters {
    pub id: u8,
    pub name: &'static str,
    /// Pivot to face distance (mm).
    pub pivot_face_distance: f32,
    /// Transducer face to probe face distance (mm).
    pub face_face_distance: f32,
    /// Assumed sound velocity (m/s).
    pub sound_velocity: f32,
    /// Scan vectors per sweep.
    pub vectors: u16,
    /// Samples per scan line.
    pub samples: u16,
    /// Nominal pulse frequency (MHz), key into the pulser table.
    pub pulse_frequency: f32,
    /// Receive filter cut-off (MHz), 0 = off.
    pub filter_mhz: u8,
    /// Sample frequency (MHz).
    pub sample_frequency: f32,
    pub a_mode: bool,
    pub preamp: bool,
    /// Display half-angle from center (rad).
    pub display_angle: f32,
    pub display_offset: u8,
    /// Pulse voltage (V).
    pub pulse_voltage: f32,
    pub servo: ProbeServo,
}

impl ProbeParameters {
    /// Receive filter matching `filter_mhz`.
    pub fn filter(&self) -> Filter {
        Filter::from_mhz(self.filter_mhz)
    }

    /// Sample clock divider giving `sample_frequency` from the master clock.
    pub fn sample_clock_divider(&self) -> u8 {
        (MASTER_CLOCK_MHZ / self.sample_frequency) as u8
    }

    /// Overscan register code: `trunc(overscan / 6.25) - 1`.
    pub fn overscan_code(&self) -> i32 {
        (self.servo.overscan as f32 / 6.25) as i32 - 1
    }
}

/// Pulser delays for one nominal pulse frequency.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulserTiming {
    pub min_delay: u16,
    pub mid_delay: u16,
    pub max_delay: u16,
}

/// Receive filter settings supported by the board.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Off = 0,
    Mhz8 = 8,
    Mhz11 = 11,
    Mhz15 = 15,
    Mhz18 = 18,
    Mhz22 = 22,
    Mhz25 = 25,
}

impl Filter {
    /// Unknown cut-offs select the 22 MHz filter.
    pub fn from_mhz(mhz: u8) -> Filter {
        match mhz {
            0 => Filter::Off,
            8 => Filter::Mhz8,
            11 => Filter::Mhz11,
            15 => Filter::Mhz15,
            18 => Filter::Mhz18,
            25 => Filter::Mhz25,
            _ => Filter::Mhz22,
        }
    }
}

// Half of a 30 and a 60 degree sector, in radians.
const HALF_SECTOR_30: f32 = 0.261_799_4;
const HALF_SECTOR_60: f32 = 0.523_598_8;

static PROBES: [ProbeParameters; 4] = [
    ProbeParameters {
        id: 0,
        name: "WP",
        pivot_face_distance: 20.0,
        face_face_distance: 1.0,
        sound_velocity: 1532.0,
        vectors: 255,
        samples: 2048,
        pulse_frequency: 35.0,
        filter_mhz: 22,
        sample_frequency: 80.0,
        a_mode: false,
        preamp: false,
        display_angle: HALF_SECTOR_30,
        display_offset: 0,
        pulse_voltage: 100.0,
        servo: ProbeServo {
            jitter_compensation: 25,
            position_scale: 60,
            sweep_angle: 36.0,
            servo_gain: 60,
            overscan: 50,
            derivative_compensation: 100,
        },
    },
    ProbeParameters {
        id: 1,
        name: "OP10",
        pivot_face_distance: 4.94,
        face_face_distance: 3.15,
        sound_velocity: 1532.0,
        vectors: 255,
        samples: 2048,
        pulse_frequency: 12.0,
        filter_mhz: 8,
        sample_frequency: 40.0,
        a_mode: false,
        preamp: false,
        display_angle: HALF_SECTOR_60,
        display_offset: 128,
        pulse_voltage: 75.0,
        servo: ProbeServo {
            jitter_compensation: 35,
            position_scale: 14,
            sweep_angle: 70.0,
            servo_gain: 70,
            overscan: 25,
            derivative_compensation: 30,
        },
    },
    ProbeParameters {
        id: 2,
        name: "OP20",
        pivot_face_distance: 4.94,
        face_face_distance: 3.15,
        sound_velocity: 1532.0,
        vectors: 255,
        samples: 2048,
        pulse_frequency: 16.0,
        filter_mhz: 8,
        sample_frequency: 40.0,
        a_mode: false,
        preamp: false,
        display_angle: HALF_SECTOR_60,
        display_offset: 132,
        pulse_voltage: 100.0,
        servo: ProbeServo {
            jitter_compensation: 0,
            position_scale: 14,
            sweep_angle: 72.0,
            servo_gain: 30,
            overscan: 25,
            derivative_compensation: 20,
        },
    },
    ProbeParameters {
        id: 3,
        name: "NoProbe",
        pivot_face_distance: 4.94,
        face_face_distance: 3.15,
        sound_velocity: 1532.0,
        vectors: 255,
        samples: 2048,
        pulse_frequency: 16.0,
        filter_mhz: 11,
        sample_frequency: 40.0,
        a_mode: false,
        preamp: false,
        display_angle: HALF_SECTOR_60,
        display_offset: 0,
        pulse_voltage: 100.0,
        servo: ProbeServo {
            jitter_compensation: 25,
            position_scale: 14,
            sweep_angle: 70.0,
            servo_gain: 40,
            overscan: 25,
            derivative_compensation: 30,
        },
    },
];

// (pulse frequency MHz, timing)
static PULSERS: [(f32, PulserTiming); 10] = [
    (10.0, PulserTiming { min_delay: 93, mid_delay: 94, max_delay: 184 }),
    (12.0, PulserTiming { min_delay: 13, mid_delay: 13, max_delay: 13 }),
    (16.0, PulserTiming { min_delay: 55, mid_delay: 56, max_delay: 109 }),
    (18.0, PulserTiming { min_delay: 49, mid_delay: 50, max_delay: 96 }),
    (20.0, PulserTiming { min_delay: 43, mid_delay: 44, max_delay: 85 }),
    (25.0, PulserTiming { min_delay: 33, mid_delay: 34, max_delay: 65 }),
    (30.0, PulserTiming { min_delay: 27, mid_delay: 28, max_delay: 52 }),
    (35.0, PulserTiming { min_delay: 23, mid_delay: 24, max_delay: 48 }),
    (45.0, PulserTiming { min_delay: 19, mid_delay: 20, max_delay: 35 }),
    (50.0, PulserTiming { min_delay: 15, mid_delay: 16, max_delay: 29 }),
];

const FREQUENCY_TOLERANCE_MHZ: f32 = 1e-3;

/// Look up the constants of a probe model.
pub fn lookup(probe_id: u8) -> Option<&'static ProbeParameters> {
    PROBES.iter().find(|p| p.id == probe_id)
}

/// Look up the pulser timing for a nominal pulse frequency in MHz.
pub fn lookup_pulser(frequency_mhz: f32) -> Option<PulserTiming> {
    PULSERS
        .iter()
        .find(|(f, _)| (f - frequency_mhz).abs() < FREQUENCY_TOLERANCE_MHZ)
        .map(|(_, timing)| *timing)
}

/// All known probe models.
pub fn probes() -> impl Iterator<Item = &'static ProbeParameters> {
    PROBES.iter()
}

/// All pulse frequencies with pulser timing.
pub fn pulse_frequencies() -> impl Iterator<Item = f32> {
    PULSERS.iter().map(|(f, _)| *f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_probes() {
        let op10 = lookup(1).unwrap();
        assert_eq!(op10.name, "OP10");
        assert_eq!(op10.pulse_frequency, 12.0);
        assert_eq!(op10.servo.position_scale, 14);
        assert_eq!(lookup(3).unwrap().name, "NoProbe");
    }

    #[test]
    fn test_lookup_miss() {
        assert!(lookup(4).is_none());
        assert!(lookup(255).is_none());
        assert!(lookup_pulser(11.0).is_none());
        assert!(lookup_pulser(0.0).is_none());
    }

    #[test]
    fn test_every_probe_has_pulser() {
        for probe in probes() {
            assert!(
                lookup_pulser(probe.pulse_frequency).is_some(),
                "{} has no pulser timing",
                probe.name
            );
        }
    }

    #[test]
    fn test_pulser_values() {
        let t = lookup_pulser(35.0).unwrap();
        assert_eq!((t.min_delay, t.mid_delay, t.max_delay), (23, 24, 48));
        assert_eq!(lookup_pulser(10.0005).unwrap().max_delay, 184);
        assert_eq!(pulse_frequencies().count(), 10);
    }

    #[test]
    fn test_derived_constants() {
        let wp = lookup(0).unwrap();
        assert_eq!(wp.sample_clock_divider(), 1);
        assert_eq!(wp.overscan_code(), 7);
        assert_eq!(wp.filter(), Filter::Mhz22);

        let op20 = lookup(2).unwrap();
        assert_eq!(op20.sample_clock_divider(), 2);
        assert_eq!(op20.overscan_code(), 3);
        assert_eq!(op20.filter(), Filter::Mhz8);
        assert!((op20.display_angle - 30f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn test_filter_fallback() {
        assert_eq!(Filter::from_mhz(0), Filter::Off);
        assert_eq!(Filter::from_mhz(13), Filter::Mhz22);
    }
}
