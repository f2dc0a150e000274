//! Errors surfaced by the tuning layer.

use thiserror::Error;

use gridtune_compile::CompileError;
use gridtune_launch::{DriverError, LaunchError};
use gridtune_space::SpaceError;

use crate::cache::CacheError;

#[derive(Debug, Error)]
pub enum TuneError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Space(#[from] SpaceError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The strategy produced no initial configuration (empty space).
    #[error("search strategy failed to initialize")]
    StrategyInit,

    /// Tuning finished without a single configuration that compiled and ran.
    #[error("tuning finished without a working kernel")]
    NoViableKernel,

    /// Internal state-machine invariant violated.
    #[error("tune kernel is in an invalid state")]
    InvalidState,
}
