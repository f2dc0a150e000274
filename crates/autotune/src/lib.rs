//! Autotuning for gridtune kernels.
//!
//! Strategies produce configurations, the cache makes results durable, the
//! aggregator turns raw timings into throughput, and [`TuneKernel`]
//! multiplexes all of it behind an ordinary launch call.

pub mod cache;
pub mod error;
pub mod measure;
pub mod strategy;
pub mod tune;

pub use cache::{CacheError, TuningCache};
pub use error::TuneError;
pub use measure::PerfAggregator;
pub use strategy::{
    CachingStrategy, HillClimbingStrategy, LimitStrategy, RandomStrategy, Strategy, TuningProblem,
};
pub use tune::{tune_with, TuneKernel};
