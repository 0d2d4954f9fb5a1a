use crate::acquisition::AcquisitionLoop;
use crate::catalog::ProbeParameters;
use crate::config::DriverConfig;
use crate::params::{ImagingParameterSet, ParameterKeys};
use crate::session::ProbeSession;
use crate::sync::ParameterSynchronizer;
use crate::transport::{DeviceSetting, OutputSink, Transport};
use crate::types::{DeviceState, FrameSize, ProbeSelection};
use crate::{ProbeError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// State shared between the control thread and the acquisition thread.
pub(crate) struct Shared<T, S> {
    pub(crate) core: Mutex<Core<T>>,
    pub(crate) sink: Mutex<S>,
    /// Zero point of frame timestamps.
    pub(crate) epoch: Instant,
}

impl<T: Transport, S: OutputSink> Shared<T, S> {
    pub(crate) fn new(core: Core<T>, sink: S) -> Self {
        Shared {
            core: Mutex::new(core),
            sink: Mutex::new(sink),
            epoch: Instant::now(),
        }
    }
}

/// Lock the transport, taking over a poisoned lock. Transport calls leave
/// no driver state half-written.
pub(crate) fn lock_transport<T>(transport: &Mutex<T>) -> MutexGuard<'_, T> {
    transport.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything guarded by the session lock.
///
/// The transport has its own lock so the acquisition thread can wait for a
/// frame without holding the session. Lock order is session, then transport.
pub(crate) struct Core<T> {
    pub(crate) transport: Arc<Mutex<T>>,
    pub(crate) config: DriverConfig,
    pub(crate) params: ImagingParameterSet,
    pub(crate) session: Option<ProbeSession>,
    pub(crate) state: DeviceState,
    pub(crate) frame_buffer: Vec<u8>,
    /// Frames forwarded since the last unfreeze.
    pub(crate) frame_index: u64,
    pub(crate) bidirectional: bool,
    /// Set by a fatal transport status; cleared by disconnect.
    pub(crate) halted: bool,
    pub(crate) acquisition_error: Option<ProbeError>,
}

impl<T: Transport> Core<T> {
    /// Build the core with the configured imaging defaults requested.
    pub(crate) fn new(transport: T, config: DriverConfig) -> Result<Core<T>> {
        let mut params = ImagingParameterSet::new();
        params.set_image_size(config.image_size)?;
        params.set_intensity(config.intensity)?;
        params.set_contrast(config.contrast)?;
        params.set_probe_voltage(config.probe_voltage)?;
        params.set_lut_window(config.lut_center, config.lut_window)?;

        Ok(Core {
            transport: Arc::new(Mutex::new(transport)),
            bidirectional: config.bidirectional,
            config,
            params,
            session: None,
            state: DeviceState::Disconnected,
            frame_buffer: Vec::new(),
            frame_index: 0,
            halted: false,
            acquisition_error: None,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        let boards = lock_transport(&self.transport).find_device()?;
        if let Err(e) = self.bring_up(boards) {
            log::error!("Capistrano connect failed: {}", e);
            lock_transport(&self.transport).release();
            self.session = None;
            self.frame_buffer = Vec::new();
            return Err(e);
        }
        self.state = DeviceState::Connected;
        Ok(())
    }

    fn bring_up(&mut self, boards: usize) -> Result<()> {
        let hardware = lock_transport(&self.transport).hardware_detected();
        let selection = if hardware && boards > 0 {
            ProbeSelection::Hardware
        } else if self.config.user_probe_fallback {
            log::warn!("No Capistrano hardware detected, using the user probe");
            ProbeSelection::UserProbe
        } else {
            return Err(ProbeError::DeviceNotFound);
        };
        if boards > 1 {
            log::warn!("{} Capistrano boards found, using the first one", boards);
        }

        let probe_id = match selection {
            ProbeSelection::Hardware => match lock_transport(&self.transport).attached_probe_id() {
                Some(id) => id,
                None if self.config.user_probe_fallback => {
                    log::warn!(
                        "No probe id reported, falling back to probe {}",
                        self.config.fallback_probe_id
                    );
                    self.config.fallback_probe_id
                }
                None => return Err(ProbeError::NoProbeAttached),
            },
            ProbeSelection::UserProbe => self.config.fallback_probe_id,
        };

        let image_size = self.params.values().image_size;
        let session = ProbeSession::open(
            probe_id,
            selection,
            &self.config.probe_overrides,
            image_size,
        )?;

        {
            let mut transport = lock_transport(&self.transport);
            transport.select_device(selection)?;
            transport.configure_probe(&session.probe, &session.pulser)?;
            transport.apply(&DeviceSetting::Bidirectional(self.bidirectional))?;
            transport.allocate_frame_buffer(image_size, self.config.cine_buffers)?;
        }
        self.frame_buffer = vec![0; image_size.pixel_count()];

        log::info!(
            "Capistrano probe {} (id {}) selected via {:?}, fs={} MHz, pulser {} MHz, {} cine buffers",
            session.probe.name,
            probe_id,
            selection,
            session.sample_frequency,
            session.probe.pulse_frequency,
            self.config.cine_buffers
        );

        self.session = Some(session);
        self.frame_index = 0;
        self.halted = false;
        self.acquisition_error = None;

        // The frame buffer above already has the requested size.
        self.params.mark_all_pending();
        self.params.clear_pending(ParameterKeys::IMAGE_SIZE);
        self.apply_pending()
    }

    /// Stop imaging, release the transport and drop session state.
    pub(crate) fn teardown(&mut self) {
        if self.state == DeviceState::Disconnected {
            return;
        }
        let mut transport = lock_transport(&self.transport);
        if matches!(self.state, DeviceState::Recording | DeviceState::Frozen) {
            transport.stop();
            if !self.config.stop_settle.is_zero() {
                std::thread::sleep(self.config.stop_settle);
            }
        }
        transport.release();
        drop(transport);
        self.session = None;
        self.frame_buffer = Vec::new();
        self.halted = false;
        self.state = DeviceState::Disconnected;
        log::info!("Capistrano device disconnected");
    }

    /// Push pending parameters; a no-op without an open session.
    pub(crate) fn apply_pending(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let mut transport = lock_transport(&self.transport);
        ParameterSynchronizer {
            transport: &mut *transport,
            session,
            frame_buffer: &mut self.frame_buffer,
            cine_buffers: self.config.cine_buffers,
        }
        .apply_pending(&mut self.params)
    }

    pub(crate) fn set_frozen(&mut self, freeze: bool) -> Result<()> {
        match (self.state, freeze) {
            (DeviceState::Disconnected, _) => Err(ProbeError::NotConnected),
            (DeviceState::Frozen, true) | (DeviceState::Recording, false) => Ok(()),
            (DeviceState::Recording, true) => {
                lock_transport(&self.transport).stop();
                self.state = DeviceState::Frozen;
                log::debug!("Capistrano frozen");
                Ok(())
            }
            (DeviceState::Connected, true) => {
                self.state = DeviceState::Frozen;
                Ok(())
            }
            (DeviceState::Connected | DeviceState::Frozen, false) => {
                if self.halted {
                    return Err(ProbeError::AcquisitionHalted(
                        "fatal transport status, reconnect required".into(),
                    ));
                }
                lock_transport(&self.transport).clear_buffers();
                self.frame_index = 0;
                if let Err(e) = self.apply_pending() {
                    log::warn!("Resuming with parameters still pending: {}", e);
                }
                lock_transport(&self.transport).run()?;
                self.state = DeviceState::Recording;
                log::debug!("Capistrano recording");
                Ok(())
            }
        }
    }

    /// Freeze/unfreeze cycle after a synchronization loss.
    pub(crate) fn resync(&mut self) -> Result<()> {
        self.set_frozen(true)?;
        self.set_frozen(false)
    }

    /// Stop imaging for good after a fatal transport status.
    pub(crate) fn halt(&mut self, err: ProbeError) {
        log::error!("Capistrano acquisition halted: {}", err);
        lock_transport(&self.transport).stop();
        self.state = DeviceState::Frozen;
        self.halted = true;
        self.acquisition_error = Some(err);
    }
}

/// A Capistrano probe driver.
///
/// Owns the transport and the output sink. Control calls may come from any
/// thread; frames are produced by a background acquisition thread started at
/// [`connect`](Self::connect) and joined at [`disconnect`](Self::disconnect).
pub struct ProbeDevice<T: Transport + 'static, S: OutputSink + 'static> {
    shared: Arc<Shared<T, S>>,
    acquisition: Option<AcquisitionLoop>,
}

impl<T: Transport + 'static, S: OutputSink + 'static> ProbeDevice<T, S> {
    /// Create a disconnected driver. Imaging defaults from `config` are
    /// requested and applied at connect.
    pub fn new(transport: T, sink: S, config: DriverConfig) -> Result<Self> {
        let core = Core::new(transport, config)?;
        Ok(ProbeDevice {
            shared: Arc::new(Shared::new(core, sink)),
            acquisition: None,
        })
    }

    /// Detect the board, open the probe session and start the acquisition
    /// thread. Leaves the device `Disconnected` on any failure.
    pub fn connect(&mut self) -> Result<()> {
        let idle_interval = {
            let mut core = self.shared.core.lock()?;
            if core.state.is_connected() {
                log::debug!("Capistrano already connected");
                return Ok(());
            }
            core.connect()?;
            core.config.idle_interval()
        };
        self.shared.sink.lock()?.clear();

        match AcquisitionLoop::start(self.shared.clone(), idle_interval) {
            Ok(acquisition) => {
                self.acquisition = Some(acquisition);
                Ok(())
            }
            Err(e) => {
                self.shared.core.lock()?.teardown();
                Err(e)
            }
        }
    }

    /// Stop acquisition and release the transport. Safe to call repeatedly.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(acquisition) = self.acquisition.take() {
            acquisition.stop();
        }
        self.shared.core.lock()?.teardown();
        Ok(())
    }

    /// Freeze (`true`) or resume (`false`) imaging.
    pub fn freeze(&self, freeze: bool) -> Result<()> {
        self.shared.core.lock()?.set_frozen(freeze)
    }

    pub fn start_recording(&self) -> Result<()> {
        self.freeze(false)
    }

    pub fn stop_recording(&self) -> Result<()> {
        self.freeze(true)
    }

    /// True unless frames are being acquired.
    pub fn is_frozen(&self) -> Result<bool> {
        Ok(self.state()? != DeviceState::Recording)
    }

    pub fn state(&self) -> Result<DeviceState> {
        Ok(self.shared.core.lock()?.state)
    }

    /// Push every pending parameter to the device.
    pub fn apply_pending(&self) -> Result<()> {
        let mut core = self.shared.core.lock()?;
        if !core.state.is_connected() {
            return Err(ProbeError::NotConnected);
        }
        core.apply_pending()
    }

    /// Run several setters and synchronize once.
    ///
    /// ```no_run
    /// # use capistrano::{ProbeDevice, SimulatedTransport, DriverConfig, frame_channel};
    /// # let (sink, _frames) = frame_channel(8);
    /// # let device = ProbeDevice::new(SimulatedTransport::new(), sink, DriverConfig::default()).unwrap();
    /// device.update_parameters(|p| {
    ///     p.set_intensity(90.0)?;
    ///     p.set_contrast(180.0)
    /// }).unwrap();
    /// ```
    pub fn update_parameters<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut ImagingParameterSet) -> Result<()>,
    {
        let mut core = self.shared.core.lock()?;
        update(&mut core.params)?;
        if core.state.is_connected() && core.config.apply_on_set {
            core.apply_pending()?;
        }
        Ok(())
    }

    /// Snapshot of the requested parameters.
    pub fn parameters(&self) -> Result<ImagingParameterSet> {
        Ok(self.shared.core.lock()?.params.clone())
    }

    pub fn set_depth_mm(&self, depth_mm: f64) -> Result<()> {
        self.update_parameters(|p| p.set_depth_mm(depth_mm))
    }

    pub fn depth_mm(&self) -> Result<f64> {
        Ok(self.parameters()?.values().depth_mm)
    }

    pub fn set_frequency_mhz(&self, frequency_mhz: f64) -> Result<()> {
        self.update_parameters(|p| p.set_frequency_mhz(frequency_mhz))
    }

    pub fn frequency_mhz(&self) -> Result<f64> {
        Ok(self.parameters()?.values().frequency_mhz)
    }

    /// Initial, middle and far gain in percent.
    pub fn set_tgc_percent(&self, percent: [f64; 3]) -> Result<()> {
        self.update_parameters(|p| p.set_tgc_percent(percent))
    }

    pub fn tgc_percent(&self) -> Result<[f64; 3]> {
        Ok(self.parameters()?.values().tgc_percent)
    }

    pub fn set_intensity(&self, intensity: f64) -> Result<()> {
        self.update_parameters(|p| p.set_intensity(intensity))
    }

    pub fn intensity(&self) -> Result<f64> {
        Ok(self.parameters()?.values().intensity)
    }

    pub fn set_contrast(&self, contrast: f64) -> Result<()> {
        self.update_parameters(|p| p.set_contrast(contrast))
    }

    pub fn contrast(&self) -> Result<f64> {
        Ok(self.parameters()?.values().contrast)
    }

    pub fn set_zoom_factor(&self, zoom: f64) -> Result<()> {
        self.update_parameters(|p| p.set_zoom_factor(zoom))
    }

    pub fn zoom_factor(&self) -> Result<f64> {
        Ok(self.parameters()?.values().zoom_factor)
    }

    pub fn set_sound_velocity(&self, velocity: f64) -> Result<()> {
        self.update_parameters(|p| p.set_sound_velocity(velocity))
    }

    pub fn sound_velocity(&self) -> Result<f64> {
        Ok(self.parameters()?.values().sound_velocity)
    }

    pub fn set_probe_voltage(&self, voltage: f64) -> Result<()> {
        self.update_parameters(|p| p.set_probe_voltage(voltage))
    }

    pub fn probe_voltage(&self) -> Result<f64> {
        Ok(self.parameters()?.values().probe_voltage)
    }

    pub fn set_image_size(&self, size: FrameSize) -> Result<()> {
        self.update_parameters(|p| p.set_image_size(size))
    }

    pub fn image_size(&self) -> Result<FrameSize> {
        Ok(self.parameters()?.values().image_size)
    }

    pub fn set_lut_window(&self, center: f64, window: f64) -> Result<()> {
        self.update_parameters(|p| p.set_lut_window(center, window))
    }

    /// Lookup-table window as `(center, width)`.
    pub fn lut_window(&self) -> Result<(f64, f64)> {
        let params = self.parameters()?;
        Ok((params.values().lut_center, params.values().lut_window))
    }

    /// Switch between unidirectional and bidirectional sweeps.
    pub fn set_bidirectional(&self, enabled: bool) -> Result<()> {
        let mut core = self.shared.core.lock()?;
        if core.state.is_connected() {
            lock_transport(&core.transport).apply(&DeviceSetting::Bidirectional(enabled))?;
        }
        core.bidirectional = enabled;
        Ok(())
    }

    /// Probe record of the open session, overrides included.
    pub fn probe(&self) -> Result<Option<ProbeParameters>> {
        Ok(self
            .shared
            .core
            .lock()?
            .session
            .as_ref()
            .map(|s| s.probe.clone()))
    }

    /// Probe name as reported by the transport, else the catalog name.
    pub fn probe_name(&self) -> Result<String> {
        let core = self.shared.core.lock()?;
        let name = lock_transport(&core.transport).probe_name();
        if !name.is_empty() {
            return Ok(name);
        }
        Ok(core
            .session
            .as_ref()
            .map(|s| s.probe.name.to_string())
            .unwrap_or_default())
    }

    pub fn sdk_version(&self) -> Result<String> {
        let core = self.shared.core.lock()?;
        let version = lock_transport(&core.transport).sdk_version();
        Ok(version)
    }

    /// Effective sample frequency (MHz) of the open session.
    pub fn sample_frequency_mhz(&self) -> Result<Option<f32>> {
        Ok(self
            .shared
            .core
            .lock()?
            .session
            .as_ref()
            .map(|s| s.sample_frequency))
    }

    /// Index of the last forwarded frame; zero right after an unfreeze.
    pub fn frame_index(&self) -> Result<u64> {
        Ok(self.shared.core.lock()?.frame_index)
    }

    /// The error that halted acquisition, if any. Returned once.
    pub fn take_acquisition_error(&self) -> Result<Option<ProbeError>> {
        Ok(self.shared.core.lock()?.acquisition_error.take())
    }
}

impl<T: Transport + 'static, S: OutputSink + 'static> Drop for ProbeDevice<T, S> {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            log::warn!("Capistrano disconnect on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::status;
    use crate::sim::SimulatedTransport;
    use crate::sink::{frame_channel, FrameStream};
    use crate::transport::SettingKind;
    use crate::ChannelSink;
    use std::time::Duration;

    fn config() -> DriverConfig {
        DriverConfig {
            stop_settle: Duration::ZERO,
            acquisition_rate: 500.0,
            poll_timeout: Duration::from_millis(20),
            image_size: FrameSize::new(8, 10),
            ..DriverConfig::default()
        }
    }

    fn device(sim: &SimulatedTransport) -> (ProbeDevice<SimulatedTransport, ChannelSink>, FrameStream) {
        let _ = env_logger::builder().is_test(true).try_init();
        let (sink, frames) = frame_channel(64);
        let device = ProbeDevice::new(sim.clone(), sink, config()).unwrap();
        (device, frames)
    }

    #[test]
    fn test_connect_applies_defaults() {
        let sim = SimulatedTransport::new();
        let (mut device, _frames) = device(&sim);
        device.connect().unwrap();

        assert_eq!(device.state().unwrap(), DeviceState::Connected);
        assert!(device.is_frozen().unwrap());
        assert_eq!(device.probe().unwrap().unwrap().name, "OP10");
        assert_eq!(sim.applied_count(SettingKind::LookupTable), 1);
        assert_eq!(sim.applied_count(SettingKind::PulseVoltage), 1);
        assert_eq!(sim.state().allocated, Some(FrameSize::new(8, 10)));
        assert_eq!(sim.state().selection, Some(ProbeSelection::Hardware));
        assert!(device.parameters().unwrap().pending().is_empty());
        device.disconnect().unwrap();
    }

    #[test]
    fn test_connect_unknown_probe_stays_disconnected() {
        let sim = SimulatedTransport::new().with_probe_id(Some(9));
        let (mut device, _frames) = device(&sim);
        let err = device.connect().unwrap_err();
        assert!(matches!(err, ProbeError::UnknownProbe(9)));
        assert_eq!(device.state().unwrap(), DeviceState::Disconnected);
        assert_eq!(sim.state().releases, 1);
    }

    #[test]
    fn test_connect_without_hardware() {
        let sim = SimulatedTransport::without_hardware();
        let (mut device, _frames) = device(&sim);
        assert!(matches!(device.connect(), Err(ProbeError::DeviceNotFound)));
        assert_eq!(device.state().unwrap(), DeviceState::Disconnected);
    }

    #[test]
    fn test_user_probe_fallback() {
        let sim = SimulatedTransport::without_hardware();
        let (sink, _frames) = frame_channel(4);
        let mut device = ProbeDevice::new(
            sim.clone(),
            sink,
            DriverConfig {
                user_probe_fallback: true,
                ..config()
            },
        )
        .unwrap();
        device.connect().unwrap();
        assert_eq!(sim.state().selection, Some(ProbeSelection::UserProbe));
        assert_eq!(device.probe().unwrap().unwrap().name, "NoProbe");
    }

    #[test]
    fn test_setters_before_connect_stay_pending() {
        let sim = SimulatedTransport::new();
        let (mut device, _frames) = device(&sim);
        device.set_depth_mm(72.0).unwrap();
        device.set_zoom_factor(1.5).unwrap();
        assert!(sim.state().applied.is_empty());
        assert!(matches!(device.apply_pending(), Err(ProbeError::NotConnected)));

        device.connect().unwrap();
        assert_eq!(sim.last_applied(SettingKind::Zoom), Some(DeviceSetting::Zoom(1.5)));
        assert_eq!(device.sample_frequency_mhz().unwrap(), Some(20.0));
        assert_eq!(device.depth_mm().unwrap(), 72.0);
    }

    #[test]
    fn test_invalid_setter_rejected_before_pending() {
        let sim = SimulatedTransport::new();
        let (device, _frames) = device(&sim);
        assert!(device.set_depth_mm(200.0).is_err());
        assert!(!device
            .parameters()
            .unwrap()
            .is_set(crate::ParameterKey::Depth));
    }

    #[test]
    fn test_extreme_tgc_keeps_device_usable() {
        let sim = SimulatedTransport::new();
        let (mut device, _frames) = device(&sim);
        device.connect().unwrap();
        device.set_tgc_percent([0.0, 1.0e10, 0.0]).unwrap();
        device.apply_pending().unwrap();
        assert_eq!(sim.applied_count(SettingKind::GainCurve), 1);
        assert_eq!(device.state().unwrap(), DeviceState::Connected);
        device.disconnect().unwrap();
        assert_eq!(sim.state().releases, 1);
    }

    #[test]
    fn test_intensity_and_contrast_batch_builds_one_lut() {
        let sim = SimulatedTransport::new();
        let (mut device, _frames) = device(&sim);
        device.connect().unwrap();
        let before = sim.applied_count(SettingKind::LookupTable);
        device
            .update_parameters(|p| {
                p.set_intensity(90.0)?;
                p.set_contrast(180.0)
            })
            .unwrap();
        assert_eq!(sim.applied_count(SettingKind::LookupTable), before + 1);
    }

    #[test]
    fn test_freeze_is_idempotent() {
        let sim = SimulatedTransport::new();
        let (mut device, _frames) = device(&sim);
        device.connect().unwrap();
        device.start_recording().unwrap();
        device.freeze(true).unwrap();
        let stops = sim.state().stops;
        device.freeze(true).unwrap();
        assert_eq!(sim.state().stops, stops);
        assert_eq!(device.state().unwrap(), DeviceState::Frozen);
    }

    #[test]
    fn test_freeze_requires_connection() {
        let sim = SimulatedTransport::new();
        let (device, _frames) = device(&sim);
        assert!(matches!(device.freeze(false), Err(ProbeError::NotConnected)));
    }

    #[test]
    fn test_recording_forwards_indexed_frames() {
        let sim = SimulatedTransport::new();
        let (mut device, frames) = device(&sim);
        device.connect().unwrap();
        device.start_recording().unwrap();

        let first = frames.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = frames.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(second.index, 2);
        assert_eq!(first.pixels.len(), 80);
        assert_eq!(first.size, FrameSize::new(8, 10));
        assert!(second.timestamp_s >= first.timestamp_s);

        device.disconnect().unwrap();
    }

    #[test]
    fn test_unfreeze_resets_frame_index() {
        let sim = SimulatedTransport::new();
        let mut core = Core::new(sim.clone(), config()).unwrap();
        core.connect().unwrap();

        core.frame_index = 17;
        core.set_frozen(false).unwrap();
        assert_eq!(core.frame_index, 0);
        assert_eq!(core.state, DeviceState::Recording);

        core.frame_index = 5;
        core.set_frozen(true).unwrap();
        assert_eq!(core.frame_index, 5);
        core.set_frozen(false).unwrap();
        assert_eq!(core.frame_index, 0);
        assert_eq!(sim.state().clears, 2);
        assert_eq!(sim.state().runs, 2);
    }

    #[test]
    fn test_resync_runs_one_cycle() {
        let sim = SimulatedTransport::new();
        let mut core = Core::new(sim.clone(), config()).unwrap();
        core.connect().unwrap();
        core.set_frozen(false).unwrap();
        core.resync().unwrap();
        assert_eq!(sim.state().stops, 1);
        assert_eq!(sim.state().runs, 2);
        assert_eq!(core.state, DeviceState::Recording);
    }

    #[test]
    fn test_unfreeze_applies_parameters_changed_while_frozen() {
        let sim = SimulatedTransport::new();
        let (sink, _frames) = frame_channel(4);
        let mut device = ProbeDevice::new(
            sim.clone(),
            sink,
            DriverConfig {
                apply_on_set: false,
                ..config()
            },
        )
        .unwrap();
        device.connect().unwrap();
        device.set_zoom_factor(3.0).unwrap();
        assert_eq!(sim.applied_count(SettingKind::Zoom), 0);
        device.start_recording().unwrap();
        assert_eq!(sim.last_applied(SettingKind::Zoom), Some(DeviceSetting::Zoom(3.0)));
    }

    #[test]
    fn test_double_disconnect_releases_once() {
        let sim = SimulatedTransport::new();
        let (mut device, _frames) = device(&sim);
        device.connect().unwrap();
        device.start_recording().unwrap();
        device.disconnect().unwrap();
        device.disconnect().unwrap();
        drop(device);
        assert_eq!(sim.state().releases, 1);
        assert!(!sim.state().running);
    }

    #[test]
    fn test_fatal_status_halts_until_reconnect() {
        let sim = SimulatedTransport::new();
        let (mut device, frames) = device(&sim);
        device.connect().unwrap();
        sim.push_wait(status::FAILED, false);
        device.start_recording().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while device.state().unwrap() == DeviceState::Recording && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(device.state().unwrap(), DeviceState::Frozen);
        assert!(frames.try_recv().is_none());
        assert!(matches!(
            device.take_acquisition_error().unwrap(),
            Some(ProbeError::AcquisitionHalted(_))
        ));
        assert!(matches!(device.start_recording(), Err(ProbeError::AcquisitionHalted(_))));

        device.disconnect().unwrap();
        device.connect().unwrap();
        device.start_recording().unwrap();
        assert!(frames.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_bidirectional_and_names() {
        let sim = SimulatedTransport::new();
        let (mut device, _frames) = device(&sim);
        device.connect().unwrap();
        device.set_bidirectional(true).unwrap();
        assert_eq!(
            sim.last_applied(SettingKind::Bidirectional),
            Some(DeviceSetting::Bidirectional(true))
        );
        assert_eq!(device.probe_name().unwrap(), "OP10");
        assert_eq!(device.sdk_version().unwrap(), "simulated");
    }
}
