//! An in-process device for CPU-only tests and demos.
//!
//! Launches execute nothing; instead a caller-supplied latency model
//! decides how many simulated seconds each launch costs, and timers read
//! the per-stream simulated clock. This keeps the whole tuning engine
//! exercisable without a GPU.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use gridtune_compile::Module;

use crate::args::KernelArg;
use crate::dim::Dim3;
use crate::driver::{DeviceApi, DeviceIdentity, DeviceKernel, DriverError, GpuTimer, Stream};

/// One simulated launch, as seen by the latency model.
#[derive(Debug, Clone)]
pub struct SimLaunch {
    pub symbol: String,
    pub image: Vec<u8>,
    pub grid: Dim3,
    pub block: Dim3,
    pub shared_mem: u32,
}

type LatencyModel = dyn Fn(&SimLaunch) -> f64 + Send + Sync;

struct SimState {
    model: Box<LatencyModel>,
    clocks: Mutex<HashMap<u64, f64>>,
    launches: Mutex<u64>,
}

/// The simulation device.
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<SimState>,
}

impl SimDevice {
    /// A device where every launch costs one simulated millisecond.
    pub fn new() -> Self {
        SimDevice::with_model(|_| 1e-3)
    }

    /// A device with a custom latency model.
    pub fn with_model(model: impl Fn(&SimLaunch) -> f64 + Send + Sync + 'static) -> Self {
        SimDevice {
            state: Arc::new(SimState {
                model: Box::new(model),
                clocks: Mutex::new(HashMap::new()),
                launches: Mutex::new(0),
            }),
        }
    }

    /// Total launches since creation.
    pub fn launch_count(&self) -> u64 {
        *self
            .state
            .launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        SimDevice::new()
    }
}

impl DeviceApi for SimDevice {
    fn identity(&self) -> Result<DeviceIdentity, DriverError> {
        Ok(DeviceIdentity {
            device_name: "Simulated Device".to_owned(),
            compute_capability: (0, 0),
            driver_version: 0,
        })
    }

    fn load(&self, module: &Module) -> Result<Arc<dyn DeviceKernel>, DriverError> {
        Ok(Arc::new(SimKernel {
            symbol: module.symbol.clone(),
            image: module.image.clone(),
            state: Arc::clone(&self.state),
        }))
    }

    fn timer(&self) -> Result<Box<dyn GpuTimer>, DriverError> {
        Ok(Box::new(SimTimer {
            state: Arc::clone(&self.state),
            start: None,
            stop: None,
        }))
    }
}

struct SimKernel {
    symbol: String,
    image: Vec<u8>,
    state: Arc<SimState>,
}

impl DeviceKernel for SimKernel {
    fn launch(
        &self,
        grid: Dim3,
        block: Dim3,
        shared_mem: u32,
        stream: Stream,
        _args: &[KernelArg],
    ) -> Result<(), DriverError> {
        let launch = SimLaunch {
            symbol: self.symbol.clone(),
            image: self.image.clone(),
            grid,
            block,
            shared_mem,
        };
        let cost = (self.state.model)(&launch);
        if !cost.is_finite() || cost < 0.0 {
            return Err(DriverError::new(format!(
                "latency model produced {cost} for `{}`",
                self.symbol
            )));
        }

        let mut clocks = self
            .state
            .clocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *clocks.entry(stream.raw()).or_insert(0.0) += cost;

        let mut launches = self
            .state
            .launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *launches += 1;
        Ok(())
    }
}

struct SimTimer {
    state: Arc<SimState>,
    start: Option<f64>,
    stop: Option<f64>,
}

impl SimTimer {
    fn clock(&self, stream: Stream) -> f64 {
        self.state
            .clocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stream.raw())
            .copied()
            .unwrap_or(0.0)
    }
}

impl GpuTimer for SimTimer {
    fn record_start(&mut self, stream: Stream) -> Result<(), DriverError> {
        self.start = Some(self.clock(stream));
        Ok(())
    }

    fn record_stop(&mut self, stream: Stream) -> Result<(), DriverError> {
        self.stop = Some(self.clock(stream));
        Ok(())
    }

    fn synchronize(&mut self) -> Result<(), DriverError> {
        // simulated work completes instantly
        Ok(())
    }

    fn elapsed_seconds(&mut self) -> Result<f64, DriverError> {
        match (self.start, self.stop) {
            (Some(start), Some(stop)) => Ok(stop - start),
            _ => Err(DriverError::new("timer events were not recorded")),
        }
    }
}
