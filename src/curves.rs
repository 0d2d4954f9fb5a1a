//! Time-gain compensation curve and brightness lookup table generation.

/// Samples per scan line on the Capistrano board; length of the TGC curve.
pub const SAMPLES_PER_LINE: usize = 2048;

/// Full-scale span of the TGC register range used by the percent conversion.
pub const MAXIMUM_TGC: f64 = 512.0;

/// Per-sample gain values along one scan line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GainCurve(pub Vec<i32>);

impl GainCurve {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }
}

/// 256-entry remapping from raw sample intensity to display intensity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable(pub [u8; 256]);

impl LookupTable {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Display value for a raw sample.
    pub fn map(&self, raw: u8) -> u8 {
        self.0[raw as usize]
    }
}

/// Build a two-segment linear gain curve.
///
/// The first `sample_count / 2` samples run from `start_gain` towards
/// `mid_gain`, the rest from `mid_gain` towards `end_gain`. Both segments use
/// `(end - start) / (sample_count / 2)` as slope and truncate toward zero.
/// Values are not clamped, except that they saturate at the `i32` limits.
pub fn build_gain_curve(start_gain: i32, mid_gain: i32, end_gain: i32, sample_count: usize) -> GainCurve {
    let half = sample_count / 2;
    let span = half.max(1) as f64;
    let (start, mid, end) = (start_gain as f64, mid_gain as f64, end_gain as f64);
    let first_slope = (mid - start) / span;
    let second_slope = (end - mid) / span;

    // `as i32` saturates, so extreme gains cannot overflow.
    let curve = (0..sample_count)
        .map(|x| {
            if x < half {
                ((first_slope * x as f64).trunc() + start) as i32
            } else {
                ((second_slope * (x - half) as f64).trunc() + mid) as i32
            }
        })
        .collect();

    GainCurve(curve)
}

/// Convert a TGC percentage into a gain register value.
///
/// `-255 + percent * 512 / 100`, truncated toward zero.
pub fn tgc_percent_to_gain(percent: f64) -> i32 {
    (-255.0 + percent * MAXIMUM_TGC / 100.0) as i32
}

/// Build the gain curve for a `[initial, mid, far]` TGC percent triple.
pub fn gain_curve_from_percent(percent: [f64; 3]) -> GainCurve {
    build_gain_curve(
        tgc_percent_to_gain(percent[0]),
        tgc_percent_to_gain(percent[1]),
        tgc_percent_to_gain(percent[2]),
        SAMPLES_PER_LINE,
    )
}

/// Build the brightness lookup table.
///
/// Each raw value `x` maps to `round(contrast / 256 * (x - 128) + intensity)`.
/// Raw values left of `center_level - window_width / 2` map to 0, values right
/// of `center_level + window_width / 2` map to 255; everything else keeps the
/// linear value, saturated into 0..=255.
pub fn build_lookup_table(intensity: f64, contrast: f64, center_level: f64, window_width: f64) -> LookupTable {
    let left = center_level - window_width / 2.0;
    let right = center_level + window_width / 2.0;

    let mut lut = [0u8; 256];
    for (x, entry) in lut.iter_mut().enumerate() {
        let xf = x as f64;
        *entry = if xf < left {
            0
        } else if xf > right {
            255
        } else {
            let y = (contrast / 256.0 * (xf - 128.0) + intensity).round();
            y.clamp(0.0, 255.0) as u8
        };
    }
    LookupTable(lut)
}
