//! In-process transport that behaves like a Capistrano board.
//!
//! Used by the demos and the test-suite. Clones share one state, so a caller
//! can hand a clone to the driver and keep another for inspection and
//! scripting.

use crate::catalog::{ProbeParameters, PulserTiming};
use crate::classify::status;
use crate::error::ProbeError;
use crate::transport::{DeviceSetting, FrameWait, SettingKind, Transport};
use crate::types::{FrameSize, ProbeSelection};
use crate::Result;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Observable state of a [`SimulatedTransport`].
#[derive(Debug)]
pub struct SimState {
    pub boards: usize,
    pub hardware: bool,
    pub probe_id: Option<u8>,
    pub probe_name: String,
    /// Settings whose `apply` fails.
    pub failing: HashSet<SettingKind>,
    pub fail_allocation: bool,
    /// `run` fails while set.
    pub fail_run: bool,
    /// Wait outcomes returned before falling back to steady frames.
    pub script: VecDeque<FrameWait>,
    pub frame_interval: Duration,
    /// Every setting successfully applied, in order.
    pub applied: Vec<DeviceSetting>,
    pub selection: Option<ProbeSelection>,
    pub configured: Option<(u8, PulserTiming)>,
    pub allocated: Option<FrameSize>,
    pub running: bool,
    pub runs: usize,
    pub stops: usize,
    pub clears: usize,
    pub releases: usize,
    pub waits: u64,
    pub frames_read: u64,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            boards: 1,
            hardware: true,
            probe_id: Some(1),
            probe_name: "OP10".into(),
            failing: HashSet::new(),
            fail_allocation: false,
            fail_run: false,
            script: VecDeque::new(),
            frame_interval: Duration::from_millis(2),
            applied: Vec::new(),
            selection: None,
            configured: None,
            allocated: None,
            running: false,
            runs: 0,
            stops: 0,
            clears: 0,
            releases: 0,
            waits: 0,
            frames_read: 0,
        }
    }
}

/// Scriptable simulated probe transport.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTransport {
    /// A board with an OP10 probe attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// No board and no hardware on the bus.
    pub fn without_hardware() -> Self {
        let sim = Self::default();
        sim.with_state(|s| {
            s.boards = 0;
            s.hardware = false;
            s.probe_id = None;
            s.probe_name.clear();
        });
        sim
    }

    pub fn with_probe_id(self, probe_id: Option<u8>) -> Self {
        self.with_state(|s| s.probe_id = probe_id);
        self
    }

    /// Lock the shared state.
    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        f(&mut self.state())
    }

    /// Make every future `apply` of `kind` fail.
    pub fn fail_setting(&self, kind: SettingKind) {
        self.with_state(|s| {
            s.failing.insert(kind);
        });
    }

    pub fn clear_failures(&self) {
        self.with_state(|s| {
            s.failing.clear();
            s.fail_allocation = false;
            s.fail_run = false;
        });
    }

    /// Queue one wait outcome.
    pub fn push_wait(&self, status: u32, next_frame_ready: bool) {
        self.with_state(|s| {
            s.script.push_back(FrameWait {
                next_frame_ready,
                status,
            })
        });
    }

    /// Number of successful applies of `kind`.
    pub fn applied_count(&self, kind: SettingKind) -> usize {
        self.with_state(|s| s.applied.iter().filter(|a| a.kind() == kind).count())
    }

    /// Most recent successful apply of `kind`.
    pub fn last_applied(&self, kind: SettingKind) -> Option<DeviceSetting> {
        self.with_state(|s| s.applied.iter().rev().find(|a| a.kind() == kind).cloned())
    }
}

impl Transport for SimulatedTransport {
    fn find_device(&mut self) -> Result<usize> {
        Ok(self.state().boards)
    }

    fn hardware_detected(&self) -> bool {
        self.state().hardware
    }

    fn attached_probe_id(&mut self) -> Option<u8> {
        self.state().probe_id
    }

    fn select_device(&mut self, selection: ProbeSelection) -> Result<()> {
        self.state().selection = Some(selection);
        Ok(())
    }

    fn configure_probe(&mut self, probe: &ProbeParameters, pulser: &PulserTiming) -> Result<()> {
        self.state().configured = Some((probe.id, *pulser));
        Ok(())
    }

    fn apply(&mut self, setting: &DeviceSetting) -> Result<()> {
        let mut s = self.state();
        if s.failing.contains(&setting.kind()) {
            return Err(ProbeError::Transport(format!("{:?} rejected", setting.kind())));
        }
        s.applied.push(setting.clone());
        Ok(())
    }

    fn allocate_frame_buffer(&mut self, size: FrameSize, _cine_buffers: u32) -> Result<()> {
        let mut s = self.state();
        if s.fail_allocation {
            return Err(ProbeError::Transport("Could not allocate cine buffers".into()));
        }
        s.allocated = Some(size);
        Ok(())
    }

    fn release(&mut self) {
        let mut s = self.state();
        s.releases += 1;
        s.allocated = None;
        s.running = false;
    }

    fn run(&mut self) -> Result<()> {
        let mut s = self.state();
        if s.fail_run {
            return Err(ProbeError::Transport("Could not start imaging".into()));
        }
        s.running = true;
        s.runs += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let mut s = self.state();
        s.running = false;
        s.stops += 1;
    }

    fn clear_buffers(&mut self) {
        self.state().clears += 1;
    }

    fn wait_for_frame(&mut self, timeout_hint: Duration) -> FrameWait {
        let interval = self.state().frame_interval.min(timeout_hint);
        std::thread::sleep(interval);

        let mut s = self.state();
        s.waits += 1;
        if let Some(outcome) = s.script.pop_front() {
            return outcome;
        }
        if s.running {
            FrameWait {
                next_frame_ready: true,
                status: status::SUCCESS,
            }
        } else {
            FrameWait {
                next_frame_ready: false,
                status: status::STOPPED,
            }
        }
    }

    fn read_frame(&mut self, dest: &mut [u8]) -> Result<()> {
        let mut s = self.state();
        let size = s
            .allocated
            .ok_or_else(|| ProbeError::Transport("No frame buffer allocated".into()))?;
        if dest.len() != size.pixel_count() {
            return Err(ProbeError::Transport(format!(
                "Frame buffer holds {} bytes, expected {}",
                dest.len(),
                size.pixel_count()
            )));
        }
        let seed = s.frames_read as usize;
        for (i, px) in dest.iter_mut().enumerate() {
            *px = (i + seed) as u8;
        }
        s.frames_read += 1;
        Ok(())
    }

    fn probe_name(&self) -> String {
        self.state().probe_name.clone()
    }

    fn sdk_version(&self) -> String {
        "simulated".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let sim = SimulatedTransport::new();
        let mut driver_side = sim.clone();
        driver_side.apply(&DeviceSetting::Zoom(2.0)).unwrap();
        assert_eq!(sim.applied_count(SettingKind::Zoom), 1);
        assert_eq!(sim.last_applied(SettingKind::Zoom), Some(DeviceSetting::Zoom(2.0)));
    }

    #[test]
    fn test_failure_injection() {
        let mut sim = SimulatedTransport::new();
        sim.fail_setting(SettingKind::Zoom);
        assert!(sim.apply(&DeviceSetting::Zoom(2.0)).is_err());
        assert_eq!(sim.applied_count(SettingKind::Zoom), 0);
        sim.clear_failures();
        assert!(sim.apply(&DeviceSetting::Zoom(2.0)).is_ok());
    }

    #[test]
    fn test_script_then_steady_frames() {
        let mut sim = SimulatedTransport::new();
        sim.run().unwrap();
        sim.push_wait(status::NOT_SEQUENTIAL, true);
        let first = sim.wait_for_frame(Duration::from_millis(10));
        assert_eq!(first.status, status::NOT_SEQUENTIAL);
        let second = sim.wait_for_frame(Duration::from_millis(10));
        assert_eq!(second.status, status::SUCCESS);
        assert!(second.next_frame_ready);
    }

    #[test]
    fn test_read_frame_needs_matching_buffer() {
        let mut sim = SimulatedTransport::new();
        let mut buf = vec![0u8; 16];
        assert!(sim.read_frame(&mut buf).is_err());
        sim.allocate_frame_buffer(FrameSize::new(4, 4), 8).unwrap();
        sim.read_frame(&mut buf).unwrap();
        assert_eq!(buf[3], 3);
        sim.read_frame(&mut buf).unwrap();
        assert_eq!(buf[3], 4);
    }

    #[test]
    fn test_without_hardware() {
        let mut sim = SimulatedTransport::without_hardware();
        assert!(!sim.hardware_detected());
        assert_eq!(sim.find_device().unwrap(), 0);
        assert_eq!(sim.attached_probe_id(), None);
    }
}
