//! # capistrano - Rust driver for Capistrano Labs USB ultrasound probes
//!
//! Drives mechanically swept B-mode probes through the vendor SDK. Provides:
//! - Built-in probe and pulser tables
//! - TGC curve and brightness lookup-table generation
//! - Imaging parameter bookkeeping with deferred device synchronization
//! - Connect/freeze/disconnect lifecycle with a background acquisition thread
//! - C FFI for integration with C/C++ hosts
//!
//! ## Quick Start
//! ```no_run
//! use capistrano::{frame_channel, DriverConfig, ProbeDevice, SimulatedTransport};
//! use std::time::Duration;
//!
//! let (sink, frames) = frame_channel(64);
//! let mut device = ProbeDevice::new(SimulatedTransport::new(), sink, DriverConfig::from_env()).unwrap();
//! device.connect().unwrap();
//! device.set_depth_mm(54.0).unwrap();
//! device.start_recording().unwrap();
//! for _ in 0..10 {
//!     let frame = frames.recv_timeout(Duration::from_secs(1)).unwrap();
//!     println!("frame {} ({})", frame.index, frame.size);
//! }
//! device.disconnect().unwrap();
//! ```

pub mod error;
pub mod types;
pub mod catalog;
pub mod curves;
pub mod classify;
pub mod params;
pub mod session;
pub mod config;
pub mod transport;
pub mod sync;
pub mod sink;
pub mod sim;
mod acquisition;
pub mod device;
pub mod ffi;

pub use error::ProbeError;
pub use types::*;
pub use classify::{ErrorClassifier, StatusClass};
pub use config::{DriverConfig, ProbeOverrides};
pub use params::{ImagingParameterSet, ParameterKey, ParameterKeys};
pub use transport::{DeviceSetting, FrameWait, OutputSink, SettingKind, Transport};
pub use sink::{frame_channel, ChannelSink, FrameStream};
pub use sim::SimulatedTransport;
pub use device::ProbeDevice;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, ProbeError>;
