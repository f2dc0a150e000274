//! The narrow, consumed GPU driver boundary.
//!
//! The tuning engine only needs four things from a driver: load compiled
//! bytes, launch a function, time a span of stream work, and identify the
//! device. Everything else stays behind these traits.

use std::sync::Arc;

use thiserror::Error;

use gridtune_compile::Module;

use crate::args::KernelArg;
use crate::dim::Dim3;

/// An opaque error from the GPU driver.
#[derive(Debug, Clone, Error)]
#[error("GPU driver error: {message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        DriverError {
            message: message.into(),
        }
    }
}

/// An opaque stream handle, passed through to the driver untouched.
///
/// `Stream::DEFAULT` is the driver's null stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Stream(u64);

impl Stream {
    pub const DEFAULT: Stream = Stream(0);

    pub fn from_raw(raw: u64) -> Self {
        Stream(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Identity of the device tuning results are valid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_name: String,
    pub compute_capability: (u32, u32),
    pub driver_version: u32,
}

/// Module loading, timing and identity queries of one device.
pub trait DeviceApi: Send + Sync {
    fn identity(&self) -> Result<DeviceIdentity, DriverError>;

    /// Load compiled module bytes and resolve the entry symbol.
    fn load(&self, module: &Module) -> Result<Arc<dyn DeviceKernel>, DriverError>;

    /// A fresh before/after timer pair.
    fn timer(&self) -> Result<Box<dyn GpuTimer>, DriverError>;
}

/// A loaded, launchable kernel function.
pub trait DeviceKernel: Send + Sync {
    fn launch(
        &self,
        grid: Dim3,
        block: Dim3,
        shared_mem: u32,
        stream: Stream,
        args: &[KernelArg],
    ) -> Result<(), DriverError>;
}

/// A before/after event pair on a stream.
///
/// `record_start` and `record_stop` enqueue the two events;
/// `synchronize` waits for the stop event; `elapsed_seconds` reports the
/// span between them.
pub trait GpuTimer: Send {
    fn record_start(&mut self, stream: Stream) -> Result<(), DriverError>;
    fn record_stop(&mut self, stream: Stream) -> Result<(), DriverError>;
    fn synchronize(&mut self) -> Result<(), DriverError>;
    fn elapsed_seconds(&mut self) -> Result<f64, DriverError>;
}
