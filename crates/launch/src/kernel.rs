//! Launchable kernels: the raw descriptor and its compiled wrapper.

use std::sync::Arc;

use thiserror::Error;

use gridtune_compile::{CompileError, Compiler, CType, ModuleFuture};
use gridtune_space::{CastError, Config, SpaceError};

use crate::args::KernelArg;
use crate::builder::KernelBuilder;
use crate::dim::Dim3;
use crate::driver::{DeviceApi, DeviceKernel, DriverError, Stream};

#[derive(Debug, Error)]
pub enum LaunchError {
    /// The module is still compiling; launch again once it is ready.
    #[error("kernel module is not ready")]
    NotReady,

    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error("macro `{0}` is already defined")]
    DuplicateDefine(String),

    #[error(transparent)]
    Space(#[from] SpaceError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl From<CastError> for LaunchError {
    fn from(err: CastError) -> Self {
        LaunchError::Space(SpaceError::Cast(err))
    }
}

/// A kernel descriptor produced by one compile submission.
///
/// Starts out *compiling*; the first successful await loads the module
/// into the device and the kernel becomes *ready*. Launching computes the
/// grid as `ceil(problem_i / grid_divisor_i)` per axis.
pub struct RawKernel {
    future: ModuleFuture,
    loaded: Option<Arc<dyn DeviceKernel>>,
    device: Arc<dyn DeviceApi>,
    block_size: Dim3,
    grid_divisors: Dim3,
    shared_mem: u32,
}

impl RawKernel {
    pub(crate) fn new(
        future: ModuleFuture,
        block_size: Dim3,
        grid_divisors: Dim3,
        shared_mem: u32,
        device: Arc<dyn DeviceApi>,
    ) -> Self {
        RawKernel {
            future,
            loaded: None,
            device,
            block_size,
            grid_divisors,
            shared_mem,
        }
    }

    /// Whether the compile has resolved (successfully or not). Never blocks.
    pub fn ready(&mut self) -> bool {
        self.loaded.is_some() || self.future.ready()
    }

    /// Block until compiled and loaded.
    pub fn wait_ready(&mut self) -> Result<(), LaunchError> {
        self.ensure_loaded()?;
        Ok(())
    }

    pub fn block_size(&self) -> Dim3 {
        self.block_size
    }

    pub fn shared_mem(&self) -> u32 {
        self.shared_mem
    }

    /// The launch grid for a problem size.
    pub fn grid_for(&self, problem: Dim3) -> Dim3 {
        Dim3::new(
            problem.x.div_ceil(self.grid_divisors.x),
            problem.y.div_ceil(self.grid_divisors.y),
            problem.z.div_ceil(self.grid_divisors.z),
        )
    }

    /// Launch without blocking; fails with [`LaunchError::NotReady`] while
    /// the module is still compiling.
    pub fn try_launch(
        &mut self,
        stream: Stream,
        problem: Dim3,
        args: &[KernelArg],
    ) -> Result<(), LaunchError> {
        if !self.ready() {
            return Err(LaunchError::NotReady);
        }
        self.launch(stream, problem, args)
    }

    /// Launch, awaiting the compile first if necessary.
    pub fn launch(
        &mut self,
        stream: Stream,
        problem: Dim3,
        args: &[KernelArg],
    ) -> Result<(), LaunchError> {
        let grid = self.grid_for(problem);
        let block = self.block_size;
        let shared_mem = self.shared_mem;
        let kernel = self.ensure_loaded()?;
        kernel
            .launch(grid, block, shared_mem, stream, args)
            .map_err(LaunchError::from)
    }

    fn ensure_loaded(&mut self) -> Result<&Arc<dyn DeviceKernel>, LaunchError> {
        if self.loaded.is_none() {
            let module = self.future.wait()?;
            let kernel = self.device.load(module)?;
            self.loaded = Some(kernel);
        }
        match &self.loaded {
            Some(kernel) => Ok(kernel),
            None => unreachable!("module loaded above"),
        }
    }
}

impl std::fmt::Debug for RawKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawKernel")
            .field("future", &self.future)
            .field("loaded", &self.loaded.is_some())
            .field("block_size", &self.block_size)
            .field("grid_divisors", &self.grid_divisors)
            .field("shared_mem", &self.shared_mem)
            .finish()
    }
}

/// A kernel compiled for one fixed configuration.
#[derive(Debug)]
pub struct Kernel {
    raw: RawKernel,
}

impl Kernel {
    pub fn compile(
        builder: &KernelBuilder,
        config: &Config,
        parameter_types: &[CType],
        compiler: &dyn Compiler,
        device: &Arc<dyn DeviceApi>,
    ) -> Result<Self, LaunchError> {
        let raw = builder.compile(config, parameter_types, compiler, device)?;
        Ok(Kernel { raw })
    }

    pub fn launch(
        &mut self,
        stream: Stream,
        problem: impl Into<Dim3>,
        args: &[KernelArg],
    ) -> Result<(), LaunchError> {
        self.raw.launch(stream, problem.into(), args)
    }

    pub fn raw(&mut self) -> &mut RawKernel {
        &mut self.raw
    }
}
