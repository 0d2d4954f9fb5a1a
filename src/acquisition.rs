use crate::classify::{ErrorClassifier, StatusClass};
use crate::device::{lock_transport, Core, Shared};
use crate::error::ProbeError;
use crate::transport::{OutputSink, Transport};
use crate::types::{DeviceState, FrameRecord};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

/// Handle to the background acquisition thread.
///
/// The thread polls the transport while the device is recording and sleeps
/// otherwise. It exits when the handle is stopped or after a fatal status.
pub(crate) struct AcquisitionLoop {
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

/// What one poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    /// Not recording; nothing was polled.
    Idle,
    Forwarded,
    /// A frame was read but could not be delivered.
    Dropped,
    /// Synchronization was lost and a freeze/unfreeze cycle ran.
    Resynchronized,
    /// Acquisition stopped for good.
    Halted,
}

impl AcquisitionLoop {
    pub(crate) fn start<T, S>(shared: Arc<Shared<T, S>>, idle_interval: Duration) -> Result<AcquisitionLoop>
    where
        T: Transport + 'static,
        S: OutputSink + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();

        let thread = std::thread::Builder::new()
            .name("capistrano-acq".into())
            .spawn(move || {
                acquisition_loop(&shared, &stop_clone, idle_interval);
            })
            .map_err(|e| ProbeError::ThreadSpawn(e.to_string()))?;

        Ok(AcquisitionLoop {
            stop_flag,
            thread: Some(thread),
        })
    }

    /// Stop the loop and wait for the thread to finish.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Acquisition thread panicked");
            }
        }
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn acquisition_loop<T: Transport, S: OutputSink>(
    shared: &Shared<T, S>,
    stop_flag: &AtomicBool,
    idle_interval: Duration,
) {
    let mut classifier = ErrorClassifier::new();
    log::info!("Acquisition thread started");

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            log::info!("Acquisition thread stopping (stop flag set)");
            break;
        }
        match poll_once(shared, &mut classifier) {
            PollOutcome::Idle => std::thread::sleep(idle_interval),
            PollOutcome::Halted => break,
            PollOutcome::Forwarded | PollOutcome::Dropped | PollOutcome::Resynchronized => {}
        }
    }
}

/// Run one acquisition step.
///
/// The frame wait holds only the transport lock. The session lock is taken
/// afterwards and the recording state checked again, so a freeze from the
/// control thread always lands before the next read. The sink is called
/// after the session lock is released.
pub(crate) fn poll_once<T: Transport, S: OutputSink>(
    shared: &Shared<T, S>,
    classifier: &mut ErrorClassifier,
) -> PollOutcome {
    let (transport, timeout) = {
        let Some(core) = lock_session(shared) else {
            return PollOutcome::Halted;
        };
        if core.state != DeviceState::Recording {
            return PollOutcome::Idle;
        }
        (core.transport.clone(), core.config.poll_timeout)
    };

    let wait = lock_transport(&transport).wait_for_frame(timeout);

    let (frame, setup) = {
        let Some(mut core) = lock_session(shared) else {
            return PollOutcome::Halted;
        };
        if core.state != DeviceState::Recording {
            log::debug!("Frozen during frame wait, status {} dropped", wait.status);
            return PollOutcome::Idle;
        }

        match classifier.observe(wait.status, wait.next_frame_ready) {
            StatusClass::Continue | StatusClass::TransientWarning => {}
            StatusClass::LostSynchronization => {
                return match core.resync() {
                    Ok(()) => PollOutcome::Resynchronized,
                    Err(e) => {
                        core.halt(e);
                        PollOutcome::Halted
                    }
                };
            }
            StatusClass::Fatal => {
                core.halt(ProbeError::AcquisitionHalted(format!(
                    "transport reported status {}",
                    wait.status
                )));
                return PollOutcome::Halted;
            }
        }

        let core = &mut *core;
        let Some(session) = core.session.as_ref() else {
            return PollOutcome::Idle;
        };
        if let Err(e) = lock_transport(&core.transport).read_frame(&mut core.frame_buffer) {
            log::warn!("Failed to read frame: {}", e);
            return PollOutcome::Dropped;
        }
        core.frame_index += 1;

        let size = session.image_size;
        let setup = (core.frame_index == 1).then(|| {
            format!(
                "Frame size: {}, probe name: {}, sample frequency: {} MHz, display zoom: {}, depth scale: {} mm/sample",
                size,
                session.probe.name,
                session.sample_frequency,
                core.params.values().zoom_factor,
                session.depth_scale_mm()
            )
        });

        let frame = FrameRecord {
            pixels: core.frame_buffer.clone(),
            index: core.frame_index,
            timestamp_s: shared.epoch.elapsed().as_secs_f64(),
            size,
            pixel_spacing_mm: core.config.pixel_spacing_mm,
        };
        (frame, setup)
    };

    let mut sink = match shared.sink.lock() {
        Ok(sink) => sink,
        Err(_) => {
            log::error!("Output sink lock poisoned, stopping acquisition");
            return PollOutcome::Halted;
        }
    };
    if let Some(setup) = setup.filter(|_| sink.item_count() == 0) {
        log::info!("{}", setup);
    }
    let index = frame.index;
    match sink.accept(frame) {
        Ok(()) => PollOutcome::Forwarded,
        Err(e) => {
            log::warn!("Frame {} dropped: {}", index, e);
            PollOutcome::Dropped
        }
    }
}

fn lock_session<T, S>(shared: &Shared<T, S>) -> Option<MutexGuard<'_, Core<T>>> {
    match shared.core.lock() {
        Ok(core) => Some(core),
        Err(_) => {
            log::error!("Session lock poisoned, stopping acquisition");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::status;
    use crate::config::DriverConfig;
    use crate::sim::SimulatedTransport;
    use crate::sink::{frame_channel, ChannelSink, FrameStream};
    use crate::types::FrameSize;

    fn recording(sim: &SimulatedTransport, capacity: usize) -> (Shared<SimulatedTransport, ChannelSink>, FrameStream) {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = DriverConfig {
            stop_settle: Duration::ZERO,
            poll_timeout: Duration::from_millis(5),
            image_size: FrameSize::new(4, 4),
            ..DriverConfig::default()
        };
        let mut core = Core::new(sim.clone(), config).unwrap();
        core.connect().unwrap();
        core.set_frozen(false).unwrap();
        let (sink, frames) = frame_channel(capacity);
        (Shared::new(core, sink), frames)
    }

    #[test]
    fn test_idle_when_not_recording() {
        let sim = SimulatedTransport::new();
        let (shared, _frames) = recording(&sim, 4);
        shared.core.lock().unwrap().set_frozen(true).unwrap();
        let waits = sim.state().waits;
        assert_eq!(poll_once(&shared, &mut ErrorClassifier::new()), PollOutcome::Idle);
        assert_eq!(sim.state().waits, waits);
    }

    #[test]
    fn test_forwards_frames_with_increasing_index() {
        let sim = SimulatedTransport::new();
        let (shared, frames) = recording(&sim, 4);
        let mut classifier = ErrorClassifier::new();
        assert_eq!(poll_once(&shared, &mut classifier), PollOutcome::Forwarded);
        assert_eq!(poll_once(&shared, &mut classifier), PollOutcome::Forwarded);
        let first = frames.try_recv().unwrap();
        let second = frames.try_recv().unwrap();
        assert_eq!((first.index, second.index), (1, 2));
        assert_eq!(first.pixels.len(), 16);
        assert_ne!(first.pixels, second.pixels);
    }

    #[test]
    fn test_transient_status_still_forwards() {
        let sim = SimulatedTransport::new();
        let (shared, frames) = recording(&sim, 4);
        sim.push_wait(status::TIMEOUT_2A, false);
        assert_eq!(poll_once(&shared, &mut ErrorClassifier::new()), PollOutcome::Forwarded);
        assert!(frames.try_recv().is_some());
    }

    #[test]
    fn test_each_lost_sync_runs_one_cycle() {
        let sim = SimulatedTransport::new();
        let (shared, frames) = recording(&sim, 8);
        let mut classifier = ErrorClassifier::new();
        let (stops, runs) = { let s = sim.state(); (s.stops, s.runs) };

        sim.push_wait(status::NOT_SEQUENTIAL, true);
        sim.push_wait(status::NOT_SEQUENTIAL, true);
        sim.push_wait(0xdead, true);
        for _ in 0..3 {
            assert_eq!(poll_once(&shared, &mut classifier), PollOutcome::Resynchronized);
        }
        assert_eq!(sim.state().stops, stops + 3);
        assert_eq!(sim.state().runs, runs + 3);
        assert!(frames.try_recv().is_none());

        assert_eq!(poll_once(&shared, &mut classifier), PollOutcome::Forwarded);
        assert_eq!(frames.try_recv().unwrap().index, 1);
    }

    #[test]
    fn test_fatal_stops_without_forwarding() {
        let sim = SimulatedTransport::new();
        let (shared, frames) = recording(&sim, 4);
        sim.push_wait(status::FAILED, false);
        assert_eq!(poll_once(&shared, &mut ErrorClassifier::new()), PollOutcome::Halted);
        assert!(frames.try_recv().is_none());
        let core = shared.core.lock().unwrap();
        assert_eq!(core.state, DeviceState::Frozen);
        assert!(core.halted);
        assert!(!sim.state().running);
    }

    #[test]
    fn test_failed_resume_after_lost_sync_halts() {
        let sim = SimulatedTransport::new();
        let (shared, frames) = recording(&sim, 4);
        sim.state().fail_run = true;
        sim.push_wait(status::NOT_SEQUENTIAL, true);
        assert_eq!(poll_once(&shared, &mut ErrorClassifier::new()), PollOutcome::Halted);
        assert!(frames.try_recv().is_none());

        let mut core = shared.core.lock().unwrap();
        assert_eq!(core.state, DeviceState::Frozen);
        assert!(core.halted);
        assert!(core.acquisition_error.take().is_some());
        assert!(!sim.state().running);
    }

    #[test]
    fn test_session_free_during_frame_wait() {
        let sim = SimulatedTransport::new();
        sim.state().frame_interval = Duration::from_millis(300);
        let (shared, frames) = recording(&sim, 4);
        shared.core.lock().unwrap().config.poll_timeout = Duration::from_secs(1);
        let shared = Arc::new(shared);

        let poller = {
            let shared = shared.clone();
            std::thread::spawn(move || poll_once(&shared, &mut ErrorClassifier::new()))
        };
        std::thread::sleep(Duration::from_millis(50));

        // The poll is inside its wait; the session is still available.
        let started = std::time::Instant::now();
        assert_eq!(shared.core.lock().unwrap().state, DeviceState::Recording);
        assert!(started.elapsed() < Duration::from_millis(150));

        // Freezing waits for the transport, then the poll sees the new state.
        shared.core.lock().unwrap().set_frozen(true).unwrap();
        assert_eq!(poller.join().unwrap(), PollOutcome::Idle);
        assert!(frames.try_recv().is_none());
        assert_eq!(sim.state().frames_read, 0);
    }

    #[test]
    fn test_full_sink_drops_and_continues() {
        let sim = SimulatedTransport::new();
        let (shared, frames) = recording(&sim, 1);
        let mut classifier = ErrorClassifier::new();
        assert_eq!(poll_once(&shared, &mut classifier), PollOutcome::Forwarded);
        assert_eq!(poll_once(&shared, &mut classifier), PollOutcome::Dropped);
        assert_eq!(frames.recv().unwrap().index, 1);
        assert_eq!(poll_once(&shared, &mut classifier), PollOutcome::Forwarded);
        assert_eq!(frames.recv().unwrap().index, 3);
    }

    #[test]
    fn test_loop_thread_stops_on_request() {
        let sim = SimulatedTransport::new();
        let (shared, frames) = recording(&sim, 64);
        let acquisition = AcquisitionLoop::start(Arc::new(shared), Duration::from_millis(1)).unwrap();
        assert!(frames.recv_timeout(Duration::from_secs(2)).is_ok());
        acquisition.stop();
    }
}
