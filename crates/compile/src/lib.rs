//! The compiler boundary of the gridtune autotuner.
//!
//! Compilation is consumed through the [`Compiler`] trait: a job goes in,
//! an awaitable [`ModuleFuture`] comes out. The NVRTC backend (behind the
//! `cuda` feature) compiles synchronously; [`AsyncCompiler`] moves any
//! inner compiler onto a background thread so tuning can overlap with
//! execution.

pub mod compiler;
pub mod error;
pub mod module;
pub mod source;
pub mod types;

#[cfg(feature = "cuda")]
pub mod nvrtc;

pub use compiler::{kernel_symbol, AsyncCompiler, CompileJob, Compiler, SimCompiler};
pub use error::CompileError;
pub use module::{Module, ModuleFuture};
pub use source::KernelSource;
pub use types::{CType, CTypeOf, TemplateArg};

#[cfg(feature = "cuda")]
pub use nvrtc::NvrtcCompiler;
