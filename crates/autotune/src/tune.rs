//! The tune-kernel state machine.
//!
//! A [`TuneKernel`] lets the host issue launches normally while tuning
//! proceeds underneath: candidate kernels compile in the background, each
//! launch of the current candidate is timed, the aggregator folds timings
//! into a throughput estimate, and the strategy picks the next candidate.
//! The best kernel found so far always remains launchable, so a host
//! launch never blocks on compilation once one exists.

use std::path::Path;
use std::sync::Arc;

use gridtune_compile::{Compiler, CType};
use gridtune_launch::{
    DeviceApi, Dim3, GpuTimer, KernelArg, KernelBuilder, LaunchError, RawKernel, Stream,
};
use gridtune_space::Config;

use crate::cache::TuningCache;
use crate::error::TuneError;
use crate::measure::PerfAggregator;
use crate::strategy::{Strategy, TuningProblem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TuneState {
    Compiling,
    Tuning,
    Measuring,
    Finished,
}

/// A per-call-site tuning driver.
pub struct TuneKernel {
    state: TuneState,
    builder: Option<KernelBuilder>,
    strategy: Option<Box<dyn Strategy>>,
    compiler: Option<Arc<dyn Compiler>>,
    device: Arc<dyn DeviceApi>,
    parameter_types: Vec<CType>,
    timer: Box<dyn GpuTimer>,
    aggregator: PerfAggregator,
    best_performance: f64,
    best_kernel: Option<RawKernel>,
    current_config: Option<Config>,
    current_kernel: Option<RawKernel>,
    current_problem: Dim3,
}

impl TuneKernel {
    pub fn new(
        builder: KernelBuilder,
        parameter_types: Vec<CType>,
        strategy: impl Strategy + 'static,
        compiler: impl Compiler + 'static,
        device: Arc<dyn DeviceApi>,
    ) -> Result<Self, TuneError> {
        TuneKernel::with_aggregator(
            builder,
            parameter_types,
            strategy,
            compiler,
            device,
            PerfAggregator::default(),
        )
    }

    pub fn with_aggregator(
        builder: KernelBuilder,
        parameter_types: Vec<CType>,
        strategy: impl Strategy + 'static,
        compiler: impl Compiler + 'static,
        device: Arc<dyn DeviceApi>,
        aggregator: PerfAggregator,
    ) -> Result<Self, TuneError> {
        let mut strategy: Box<dyn Strategy> = Box::new(strategy);
        let identity = device.identity()?;
        let first = {
            let problem = TuningProblem::new(&builder, identity);
            strategy.init(&problem)?
        };
        let Some(first) = first else {
            return Err(TuneError::StrategyInit);
        };

        let timer = device.timer()?;
        let mut tune = TuneKernel {
            state: TuneState::Compiling,
            builder: Some(builder),
            strategy: Some(strategy),
            compiler: Some(Arc::new(compiler)),
            device,
            parameter_types,
            timer,
            aggregator,
            best_performance: f64::NEG_INFINITY,
            best_kernel: None,
            current_config: None,
            current_kernel: None,
            current_problem: Dim3::ONE,
        };
        tune.advance(first)?;
        Ok(tune)
    }

    /// Whether tuning has converged and only the best kernel launches.
    pub fn finished(&self) -> bool {
        self.state == TuneState::Finished
    }

    pub fn best_performance(&self) -> Option<f64> {
        if self.best_kernel.is_some() {
            Some(self.best_performance)
        } else {
            None
        }
    }

    /// Step the state machine and perform one host launch.
    pub fn launch(
        &mut self,
        stream: Stream,
        problem: impl Into<Dim3>,
        args: &[KernelArg],
    ) -> Result<(), TuneError> {
        let problem = problem.into();
        loop {
            match self.state {
                // tuning is over: only the best kernel runs
                TuneState::Finished => {
                    let best = self
                        .best_kernel
                        .as_mut()
                        .ok_or(TuneError::NoViableKernel)?;
                    best.launch(stream, problem, args)?;
                    return Ok(());
                }

                // the previous launch of the candidate is in flight; collect
                // its timing and decide what happens next
                TuneState::Measuring => {
                    self.timer.synchronize()?;
                    let seconds = self.timer.elapsed_seconds()?;
                    self.aggregator.add(self.current_problem, seconds);
                    self.state = TuneState::Tuning;

                    if let Some(performance) = self.aggregator.collect() {
                        if performance > self.best_performance {
                            self.best_performance = performance;
                            self.best_kernel = self.current_kernel.take();
                        }

                        let config =
                            self.current_config.take().ok_or(TuneError::InvalidState)?;
                        let strategy =
                            self.strategy.as_mut().ok_or(TuneError::InvalidState)?;
                        match strategy.submit(performance, config)? {
                            Some(next) => self.advance(next)?,
                            None => self.finish(),
                        }
                    }
                }

                // launch the candidate under timing
                TuneState::Tuning => {
                    let kernel = self
                        .current_kernel
                        .as_mut()
                        .ok_or(TuneError::InvalidState)?;
                    self.timer.record_start(stream)?;
                    kernel.launch(stream, problem, args)?;
                    self.timer.record_stop(stream)?;
                    self.current_problem = problem;
                    self.state = TuneState::Measuring;
                    return Ok(());
                }

                // candidate still compiling: run it if ready, otherwise fall
                // back to the best kernel, otherwise wait
                TuneState::Compiling => {
                    let ready = self
                        .current_kernel
                        .as_mut()
                        .ok_or(TuneError::InvalidState)?
                        .ready();

                    if ready {
                        self.resolve_current()?;
                    } else if let Some(best) = self.best_kernel.as_mut() {
                        best.launch(stream, problem, args)?;
                        return Ok(());
                    } else {
                        // nothing to fall back to: block on the compile
                        self.resolve_current()?;
                    }
                }
            }
        }
    }

    /// Await the current candidate's module. A compile failure skips the
    /// configuration; every other error propagates.
    fn resolve_current(&mut self) -> Result<(), TuneError> {
        let kernel = self
            .current_kernel
            .as_mut()
            .ok_or(TuneError::InvalidState)?;
        match kernel.wait_ready() {
            Ok(()) => {
                self.state = TuneState::Tuning;
                Ok(())
            }
            Err(LaunchError::Compile(err)) => {
                tracing::warn!(error = %err, "candidate kernel failed to compile; skipping");
                let config = self.current_config.take().ok_or(TuneError::InvalidState)?;
                let strategy = self.strategy.as_mut().ok_or(TuneError::InvalidState)?;
                match strategy.submit(f64::NEG_INFINITY, config)? {
                    Some(next) => self.advance(next),
                    None => {
                        self.finish();
                        Ok(())
                    }
                }
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Submit the compile for the next candidate configuration.
    fn advance(&mut self, config: Config) -> Result<(), TuneError> {
        let builder = self.builder.as_ref().ok_or(TuneError::InvalidState)?;
        let compiler = self.compiler.as_ref().ok_or(TuneError::InvalidState)?;
        let kernel =
            builder.compile(&config, &self.parameter_types, compiler.as_ref(), &self.device)?;

        self.current_kernel = Some(kernel);
        self.current_config = Some(config);
        self.aggregator.reset();
        self.state = TuneState::Compiling;
        Ok(())
    }

    /// Enter the terminal state and release everything tuning needed.
    fn finish(&mut self) {
        self.state = TuneState::Finished;
        self.builder = None;
        self.strategy = None;
        self.compiler = None;
        self.current_kernel = None;
        self.current_config = None;
        if self.best_kernel.is_some() {
            tracing::info!(
                best_performance = self.best_performance,
                "tuning finished"
            );
        } else {
            tracing::warn!("tuning finished without a working kernel");
        }
    }
}

/// Offline tuning: drive `measure` through a strategy and a cache.
///
/// Configurations with recorded performances are never re-measured. If the
/// cache already knows a best configuration, it is returned immediately.
pub fn tune_with<F>(
    path: impl AsRef<Path>,
    mut strategy: impl Strategy,
    problem: &TuningProblem<'_>,
    mut measure: F,
) -> Result<Config, TuneError>
where
    F: FnMut(&Config) -> Result<f64, TuneError>,
{
    let (mut cache, best_known) = TuningCache::open(path, problem)?;
    if let Some(best) = best_known {
        return Ok(best);
    }

    let mut current = strategy.init(problem)?.ok_or(TuneError::StrategyInit)?;
    let mut best_config = current.clone();
    let mut best_performance = f64::NEG_INFINITY;

    loop {
        let performance = match cache.find(&current) {
            Some(recorded) => recorded,
            None => {
                let measured = measure(&current)?;
                cache.append(&current, measured);
                measured
            }
        };

        if performance > best_performance {
            best_performance = performance;
            best_config = current.clone();
        }

        match strategy.submit(performance, current)? {
            Some(next) => current = next,
            None => break,
        }
    }

    Ok(best_config)
}
