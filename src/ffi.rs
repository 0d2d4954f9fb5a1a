//! C FFI layer for the Capistrano driver.
//!
//! The vendor SDK is reached through a table of C callbacks
//! ([`XcTransportVTable`]); acquired frames are handed back through an
//! [`XcFrameCallback`]. The generated C header is written to
//! `include/capistrano.h` by cbindgen.

use crate::catalog::{Filter, ProbeParameters, PulserTiming};
use crate::config::DriverConfig;
use crate::device::ProbeDevice;
use crate::error::LastError;
use crate::transport::{DeviceSetting, FrameWait, OutputSink, SettingKind, Transport};
use crate::types::{FrameRecord, FrameSize, ProbeSelection};
use crate::{ProbeError, Result};
use std::ffi::{c_char, c_int, c_void};
use std::time::Duration;

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Probe constants handed to `configure_probe`.
#[repr(C)]
pub struct XcProbeConfig {
    pub id: u8,
    pub pivot_face_distance: f32,
    pub face_face_distance: f32,
    pub sound_velocity: f32,
    pub vectors: u16,
    pub samples: u16,
    pub pulse_frequency: f32,
    pub filter: Filter,
    pub sample_clock_divider: u8,
    pub a_mode: bool,
    pub preamp: bool,
    pub display_angle: f32,
    pub display_offset: u8,
    pub pulse_voltage: f32,
    pub jitter_compensation: u8,
    pub position_scale: u8,
    pub sweep_angle: f32,
    pub servo_gain: u8,
    pub overscan_code: i32,
    pub derivative_compensation: u8,
    pub pulser: PulserTiming,
}

impl XcProbeConfig {
    fn new(probe: &ProbeParameters, pulser: &PulserTiming) -> Self {
        XcProbeConfig {
            id: probe.id,
            pivot_face_distance: probe.pivot_face_distance,
            face_face_distance: probe.face_face_distance,
            sound_velocity: probe.sound_velocity,
            vectors: probe.vectors,
            samples: probe.samples,
            pulse_frequency: probe.pulse_frequency,
            filter: probe.filter(),
            sample_clock_divider: probe.sample_clock_divider(),
            a_mode: probe.a_mode,
            preamp: probe.preamp,
            display_angle: probe.display_angle,
            display_offset: probe.display_offset,
            pulse_voltage: probe.pulse_voltage,
            jitter_compensation: probe.servo.jitter_compensation,
            position_scale: probe.servo.position_scale,
            sweep_angle: probe.servo.sweep_angle,
            servo_gain: probe.servo.servo_gain,
            overscan_code: probe.overscan_code(),
            derivative_compensation: probe.servo.derivative_compensation,
            pulser: *pulser,
        }
    }
}

/// One device setting in C layout.
///
/// `kind` selects which payload field is meaningful: `scalar` for divider,
/// frequency, zoom, sound velocity, voltage and bidirectional (0/1);
/// `pulser`; `gain_curve` / `lut` with `len` entries.
#[repr(C)]
pub struct XcSetting {
    pub kind: SettingKind,
    pub scalar: f64,
    pub pulser: PulserTiming,
    pub gain_curve: *const i32,
    pub lut: *const u8,
    pub len: usize,
}

impl XcSetting {
    /// Borrowing view of `setting`; pointers live as long as `setting`.
    fn view(setting: &DeviceSetting) -> Self {
        let mut out = XcSetting {
            kind: setting.kind(),
            scalar: 0.0,
            pulser: PulserTiming {
                min_delay: 0,
                mid_delay: 0,
                max_delay: 0,
            },
            gain_curve: std::ptr::null(),
            lut: std::ptr::null(),
            len: 0,
        };
        match setting {
            DeviceSetting::SampleClockDivider(d) => out.scalar = *d as f64,
            DeviceSetting::ProbeFrequency(f)
            | DeviceSetting::SoundVelocity(f)
            | DeviceSetting::PulseVoltage(f) => out.scalar = *f as f64,
            DeviceSetting::Zoom(z) => out.scalar = *z,
            DeviceSetting::Bidirectional(b) => out.scalar = if *b { 1.0 } else { 0.0 },
            DeviceSetting::Pulser(p) => out.pulser = *p,
            DeviceSetting::GainCurve(curve) => {
                out.gain_curve = curve.as_slice().as_ptr();
                out.len = curve.len();
            }
            DeviceSetting::LookupTable(lut) => {
                out.lut = lut.as_slice().as_ptr();
                out.len = lut.as_slice().len();
            }
        }
        out
    }
}

/// Result of `wait_for_frame` in C layout.
#[repr(C)]
pub struct XcFrameWait {
    pub next_frame_ready: bool,
    pub status: u32,
}

/// Transport callbacks supplied by the C side.
///
/// Every function pointer must be valid. Functions returning `c_int` return
/// 0 on success and non-zero on failure, except `find_device` (board count,
/// negative on failure) and `attached_probe_id` (negative when no probe).
#[repr(C)]
pub struct XcTransportVTable {
    pub user_data: *mut c_void,
    pub find_device: extern "C" fn(*mut c_void) -> c_int,
    pub hardware_detected: extern "C" fn(*mut c_void) -> bool,
    pub attached_probe_id: extern "C" fn(*mut c_void) -> c_int,
    pub select_device: extern "C" fn(*mut c_void, ProbeSelection) -> c_int,
    pub configure_probe: extern "C" fn(*mut c_void, *const XcProbeConfig) -> c_int,
    pub apply: extern "C" fn(*mut c_void, *const XcSetting) -> c_int,
    pub allocate_frame_buffer: extern "C" fn(*mut c_void, FrameSize, u32) -> c_int,
    pub release: extern "C" fn(*mut c_void),
    pub run: extern "C" fn(*mut c_void) -> c_int,
    pub stop: extern "C" fn(*mut c_void),
    pub clear_buffers: extern "C" fn(*mut c_void),
    pub wait_for_frame: extern "C" fn(*mut c_void, u32) -> XcFrameWait,
    pub read_frame: extern "C" fn(*mut c_void, *mut u8, usize) -> c_int,
}

/// Borrowed frame passed to [`XcFrameCallback`]; valid for the call only.
#[repr(C)]
pub struct XcFrame {
    pub pixels: *const u8,
    pub len: usize,
    pub index: u64,
    pub timestamp_s: f64,
    pub size: FrameSize,
    pub pixel_spacing_mm: [f64; 3],
}

/// Frame consumer. Return 0 to accept, non-zero to reject the frame.
pub type XcFrameCallback = extern "C" fn(*mut c_void, *const XcFrame) -> c_int;

/// [`Transport`] over a C callback table.
pub struct CTransport {
    vtable: XcTransportVTable,
}

// The C side promises the callbacks may be called from the acquisition
// thread; calls are serialized by the driver.
unsafe impl Send for CTransport {}

fn check(code: c_int, what: &str) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(ProbeError::Transport(format!("{} failed with code {}", what, code)))
    }
}

impl Transport for CTransport {
    fn find_device(&mut self) -> Result<usize> {
        let boards = (self.vtable.find_device)(self.vtable.user_data);
        usize::try_from(boards)
            .map_err(|_| ProbeError::Transport(format!("find_device failed with code {}", boards)))
    }

    fn hardware_detected(&self) -> bool {
        (self.vtable.hardware_detected)(self.vtable.user_data)
    }

    fn attached_probe_id(&mut self) -> Option<u8> {
        u8::try_from((self.vtable.attached_probe_id)(self.vtable.user_data)).ok()
    }

    fn select_device(&mut self, selection: ProbeSelection) -> Result<()> {
        check((self.vtable.select_device)(self.vtable.user_data, selection), "select_device")
    }

    fn configure_probe(&mut self, probe: &ProbeParameters, pulser: &PulserTiming) -> Result<()> {
        let config = XcProbeConfig::new(probe, pulser);
        check(
            (self.vtable.configure_probe)(self.vtable.user_data, &config),
            "configure_probe",
        )
    }

    fn apply(&mut self, setting: &DeviceSetting) -> Result<()> {
        let view = XcSetting::view(setting);
        check((self.vtable.apply)(self.vtable.user_data, &view), "apply")
    }

    fn allocate_frame_buffer(&mut self, size: FrameSize, cine_buffers: u32) -> Result<()> {
        check(
            (self.vtable.allocate_frame_buffer)(self.vtable.user_data, size, cine_buffers),
            "allocate_frame_buffer",
        )
    }

    fn release(&mut self) {
        (self.vtable.release)(self.vtable.user_data)
    }

    fn run(&mut self) -> Result<()> {
        check((self.vtable.run)(self.vtable.user_data), "run")
    }

    fn stop(&mut self) {
        (self.vtable.stop)(self.vtable.user_data)
    }

    fn clear_buffers(&mut self) {
        (self.vtable.clear_buffers)(self.vtable.user_data)
    }

    fn wait_for_frame(&mut self, timeout_hint: Duration) -> FrameWait {
        let timeout_ms = timeout_hint.as_millis().min(u32::MAX as u128) as u32;
        let wait = (self.vtable.wait_for_frame)(self.vtable.user_data, timeout_ms);
        FrameWait {
            next_frame_ready: wait.next_frame_ready,
            status: wait.status,
        }
    }

    fn read_frame(&mut self, dest: &mut [u8]) -> Result<()> {
        check(
            (self.vtable.read_frame)(self.vtable.user_data, dest.as_mut_ptr(), dest.len()),
            "read_frame",
        )
    }
}

/// [`OutputSink`] over a C callback.
pub struct CSink {
    callback: XcFrameCallback,
    user_data: *mut c_void,
    accepted: usize,
}

unsafe impl Send for CSink {}

impl OutputSink for CSink {
    fn accept(&mut self, frame: FrameRecord) -> Result<()> {
        let view = XcFrame {
            pixels: frame.pixels.as_ptr(),
            len: frame.pixels.len(),
            index: frame.index,
            timestamp_s: frame.timestamp_s,
            size: frame.size,
            pixel_spacing_mm: frame.pixel_spacing_mm,
        };
        if (self.callback)(self.user_data, &view) != 0 {
            return Err(ProbeError::SinkRejected(frame.index));
        }
        self.accepted += 1;
        Ok(())
    }

    fn item_count(&self) -> usize {
        self.accepted
    }

    fn clear(&mut self) {
        self.accepted = 0;
    }
}

/// Opaque device handle for C consumers.
pub struct XcDevice(ProbeDevice<CTransport, CSink>);

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Run `f` on the device behind `dev`; -1 when `dev` is null.
unsafe fn with_device(dev: *mut XcDevice, f: impl FnOnce(&mut XcDevice) -> Result<()>) -> c_int {
    match dev.as_mut() {
        Some(dev) => status(f(dev)),
        None => -1,
    }
}

/// Create a driver over the given transport callbacks.
/// Configuration is read from the `CAPISTRANO_*` environment variables.
/// Returns NULL on error (check xc_last_error()).
///
/// # Safety
/// `vtable` must point to a valid `XcTransportVTable`, or be null. `user_data`
/// is passed unchanged to `on_frame`.
#[no_mangle]
pub unsafe extern "C" fn xc_device_new(
    vtable: *const XcTransportVTable,
    on_frame: XcFrameCallback,
    user_data: *mut c_void,
) -> *mut XcDevice {
    if vtable.is_null() {
        return std::ptr::null_mut();
    }
    let transport = CTransport {
        vtable: std::ptr::read(vtable),
    };
    let sink = CSink {
        callback: on_frame,
        user_data,
        accepted: 0,
    };
    match ProbeDevice::new(transport, sink, DriverConfig::from_env()) {
        Ok(device) => Box::into_raw(Box::new(XcDevice(device))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Disconnect and free a device.
///
/// # Safety
/// `dev` must be a pointer returned by `xc_device_new`, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_device_free(dev: *mut XcDevice) {
    if !dev.is_null() {
        drop(Box::from_raw(dev));
    }
}

/// Connect to the probe and start the acquisition thread.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_connect(dev: *mut XcDevice) -> c_int {
    with_device(dev, |d| d.0.connect())
}

/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_disconnect(dev: *mut XcDevice) -> c_int {
    with_device(dev, |d| d.0.disconnect())
}

/// Start (`true`) or stop (`false`) recording.
///
/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_set_recording(dev: *mut XcDevice, recording: bool) -> c_int {
    with_device(dev, |d| d.0.freeze(!recording))
}

/// Returns 1 when frozen, 0 when recording, -1 on error.
///
/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_is_frozen(dev: *const XcDevice) -> c_int {
    let Some(dev) = dev.as_ref() else {
        return -1;
    };
    match dev.0.is_frozen() {
        Ok(frozen) => frozen as c_int,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_apply_pending(dev: *mut XcDevice) -> c_int {
    with_device(dev, |d| d.0.apply_pending())
}

/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_set_depth_mm(dev: *mut XcDevice, depth_mm: f64) -> c_int {
    with_device(dev, |d| d.0.set_depth_mm(depth_mm))
}

/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_set_frequency_mhz(dev: *mut XcDevice, frequency_mhz: f64) -> c_int {
    with_device(dev, |d| d.0.set_frequency_mhz(frequency_mhz))
}

/// Set the initial, middle and far gain in percent.
///
/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_set_tgc_percent(
    dev: *mut XcDevice,
    initial: f64,
    middle: f64,
    far: f64,
) -> c_int {
    with_device(dev, |d| d.0.set_tgc_percent([initial, middle, far]))
}

/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_set_intensity(dev: *mut XcDevice, intensity: f64) -> c_int {
    with_device(dev, |d| d.0.set_intensity(intensity))
}

/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_set_contrast(dev: *mut XcDevice, contrast: f64) -> c_int {
    with_device(dev, |d| d.0.set_contrast(contrast))
}

/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_set_zoom(dev: *mut XcDevice, zoom: f64) -> c_int {
    with_device(dev, |d| d.0.set_zoom_factor(zoom))
}

/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_set_sound_velocity(dev: *mut XcDevice, velocity: f64) -> c_int {
    with_device(dev, |d| d.0.set_sound_velocity(velocity))
}

/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_set_probe_voltage(dev: *mut XcDevice, voltage: f64) -> c_int {
    with_device(dev, |d| d.0.set_probe_voltage(voltage))
}

/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn xc_set_image_size(dev: *mut XcDevice, width: u32, height: u32) -> c_int {
    with_device(dev, |d| d.0.set_image_size(FrameSize::new(width, height)))
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next failing call.
#[no_mangle]
pub extern "C" fn xc_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::status;
    use std::ffi::CStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeBoard {
        luts: AtomicUsize,
        released: AtomicUsize,
        configured_id: AtomicUsize,
    }

    fn board(user_data: *mut c_void) -> &'static FakeBoard {
        unsafe { &*(user_data as *const FakeBoard) }
    }

    extern "C" fn find_device(_: *mut c_void) -> c_int {
        1
    }
    extern "C" fn hardware_detected(_: *mut c_void) -> bool {
        true
    }
    extern "C" fn attached_probe_id(_: *mut c_void) -> c_int {
        2
    }
    extern "C" fn select_device(_: *mut c_void, _: ProbeSelection) -> c_int {
        0
    }
    extern "C" fn configure_probe(user_data: *mut c_void, config: *const XcProbeConfig) -> c_int {
        let config = unsafe { &*config };
        board(user_data)
            .configured_id
            .store(config.id as usize, Ordering::SeqCst);
        0
    }
    extern "C" fn apply(user_data: *mut c_void, setting: *const XcSetting) -> c_int {
        let setting = unsafe { &*setting };
        match setting.kind {
            SettingKind::LookupTable => {
                assert_eq!(setting.len, 256);
                assert!(!setting.lut.is_null());
                board(user_data).luts.fetch_add(1, Ordering::SeqCst);
                0
            }
            SettingKind::Zoom if setting.scalar > 4.0 => 1,
            _ => 0,
        }
    }
    extern "C" fn allocate_frame_buffer(_: *mut c_void, _: FrameSize, _: u32) -> c_int {
        0
    }
    extern "C" fn release(user_data: *mut c_void) {
        board(user_data).released.fetch_add(1, Ordering::SeqCst);
    }
    extern "C" fn run(_: *mut c_void) -> c_int {
        0
    }
    extern "C" fn noop(_: *mut c_void) {}
    extern "C" fn wait_for_frame(_: *mut c_void, timeout_ms: u32) -> XcFrameWait {
        std::thread::sleep(Duration::from_millis(timeout_ms.min(2) as u64));
        XcFrameWait {
            next_frame_ready: true,
            status: status::SUCCESS,
        }
    }
    extern "C" fn read_frame(_: *mut c_void, dest: *mut u8, len: usize) -> c_int {
        unsafe { std::ptr::write_bytes(dest, 7, len) };
        0
    }
    extern "C" fn on_frame(_: *mut c_void, frame: *const XcFrame) -> c_int {
        let frame = unsafe { &*frame };
        assert_eq!(frame.len, frame.size.width as usize * frame.size.height as usize);
        0
    }

    fn vtable(fake: &FakeBoard) -> XcTransportVTable {
        XcTransportVTable {
            user_data: fake as *const FakeBoard as *mut c_void,
            find_device,
            hardware_detected,
            attached_probe_id,
            select_device,
            configure_probe,
            apply,
            allocate_frame_buffer,
            release,
            run,
            stop: noop,
            clear_buffers: noop,
            wait_for_frame,
            read_frame,
        }
    }

    #[test]
    fn test_c_device_lifecycle() {
        let fake: &'static FakeBoard = Box::leak(Box::default());
        let table = vtable(fake);
        unsafe {
            let dev = xc_device_new(&table, on_frame, std::ptr::null_mut());
            assert!(!dev.is_null());
            assert_eq!(xc_connect(dev), 0);
            assert_eq!(fake.configured_id.load(Ordering::SeqCst), 2);
            assert_eq!(fake.luts.load(Ordering::SeqCst), 1);
            assert_eq!(xc_is_frozen(dev), 1);

            assert_eq!(xc_set_intensity(dev, 64.0), 0);
            assert_eq!(fake.luts.load(Ordering::SeqCst), 2);

            assert_eq!(xc_set_zoom(dev, 8.0), -1);
            let msg = CStr::from_ptr(xc_last_error()).to_string_lossy();
            assert!(msg.contains("Failed to apply"), "{}", msg);

            assert_eq!(xc_set_depth_mm(dev, 500.0), -1);
            assert_eq!(xc_set_recording(dev, true), 0);
            assert_eq!(xc_is_frozen(dev), 0);
            assert_eq!(xc_disconnect(dev), 0);
            xc_device_free(dev);
        }
        assert_eq!(fake.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_null_handles() {
        unsafe {
            assert!(xc_device_new(std::ptr::null(), on_frame, std::ptr::null_mut()).is_null());
            assert_eq!(xc_connect(std::ptr::null_mut()), -1);
            assert_eq!(xc_is_frozen(std::ptr::null()), -1);
            xc_device_free(std::ptr::null_mut());
        }
    }
}
