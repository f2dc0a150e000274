//! Kernel builders and the consumed GPU driver boundary.
//!
//! A [`KernelBuilder`] couples a configuration space with a kernel source
//! and expression-valued launch attributes; compiling it against a concrete
//! configuration yields a launchable [`RawKernel`]. The driver itself is
//! consumed through the narrow [`DeviceApi`] family of traits, with a CUDA
//! implementation behind the `cuda` feature and an in-process simulation
//! backend for CPU-only tests and demos.

pub mod args;
pub mod builder;
pub mod dim;
pub mod driver;
pub mod kernel;
pub mod sim;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use args::KernelArg;
pub use builder::KernelBuilder;
pub use dim::Dim3;
pub use driver::{DeviceApi, DeviceIdentity, DeviceKernel, DriverError, GpuTimer, Stream};
pub use kernel::{Kernel, LaunchError, RawKernel};
pub use sim::{SimDevice, SimLaunch};

#[cfg(feature = "cuda")]
pub use cuda::CudaApi;
