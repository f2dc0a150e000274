//! Search strategies over a configuration space.
//!
//! A strategy produces the next configuration to evaluate and consumes the
//! measured performance of the previous one. Performance is a positive
//! scalar where larger is better (throughput); candidates that failed to
//! compile are reported as `f64::NEG_INFINITY` so they can never become
//! the incumbent. Strategies compose by wrapping an inner strategy.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gridtune_launch::{DeviceIdentity, KernelBuilder};
use gridtune_space::{Config, ConfigIterator, ConfigSpace, Param, Value};

use crate::cache::TuningCache;
use crate::error::TuneError;

/// The builder under tuning together with the device identity; everything
/// a strategy (and the cache header) may need.
#[derive(Debug)]
pub struct TuningProblem<'a> {
    builder: &'a KernelBuilder,
    device: DeviceIdentity,
}

impl<'a> TuningProblem<'a> {
    pub fn new(builder: &'a KernelBuilder, device: DeviceIdentity) -> Self {
        TuningProblem { builder, device }
    }

    pub fn builder(&self) -> &KernelBuilder {
        self.builder
    }

    pub fn space(&self) -> &ConfigSpace {
        self.builder.space()
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }
}

/// The uniform strategy contract.
pub trait Strategy: Send {
    /// The first configuration to evaluate, or `None` for an empty space.
    fn init(&mut self, problem: &TuningProblem<'_>) -> Result<Option<Config>, TuneError>;

    /// Consume the measured performance of `config` and produce the next
    /// configuration, or `None` to terminate the search.
    fn submit(&mut self, performance: f64, config: Config) -> Result<Option<Config>, TuneError>;
}

/// Visits valid configurations in random order, each exactly once.
#[derive(Debug, Default)]
pub struct RandomStrategy {
    iter: Option<ConfigIterator>,
    seed: Option<u64>,
}

impl RandomStrategy {
    pub fn new() -> Self {
        RandomStrategy::default()
    }

    /// Deterministic visit order for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        RandomStrategy {
            iter: None,
            seed: Some(seed),
        }
    }
}

impl Strategy for RandomStrategy {
    fn init(&mut self, problem: &TuningProblem<'_>) -> Result<Option<Config>, TuneError> {
        let mut iter = match self.seed {
            Some(seed) => ConfigIterator::with_seed(problem.space(), seed)?,
            None => problem.space().iterate()?,
        };
        let first = iter.next()?;
        self.iter = Some(iter);
        Ok(first)
    }

    fn submit(&mut self, _performance: f64, _config: Config) -> Result<Option<Config>, TuneError> {
        match &mut self.iter {
            Some(iter) => Ok(iter.next()?),
            None => Ok(None),
        }
    }
}

/// Terminates the inner strategy after a fixed number of evaluations.
pub struct LimitStrategy {
    max_evals: u64,
    evals: u64,
    inner: Box<dyn Strategy>,
}

impl LimitStrategy {
    pub fn new(max_evals: u64, inner: impl Strategy + 'static) -> Self {
        LimitStrategy {
            max_evals,
            evals: 0,
            inner: Box::new(inner),
        }
    }
}

impl Strategy for LimitStrategy {
    fn init(&mut self, problem: &TuningProblem<'_>) -> Result<Option<Config>, TuneError> {
        self.evals = 0;
        self.inner.init(problem)
    }

    fn submit(&mut self, performance: f64, config: Config) -> Result<Option<Config>, TuneError> {
        let next = self.inner.submit(performance, config)?;
        self.evals += 1;
        if self.evals >= self.max_evals {
            return Ok(None);
        }
        Ok(next)
    }
}

/// Local search: mutate one parameter at a time, keep improvements, restart
/// from the inner strategy once the neighborhood is exhausted.
pub struct HillClimbingStrategy {
    inner: Box<dyn Strategy>,
    rng: StdRng,
    seed: Option<u64>,
    space: ConfigSpace,
    /// Every `(parameter, candidate value)` pair of the space.
    neighbors: Vec<(Param, Value)>,
    attempted: Vec<bool>,
    attempted_count: usize,
    best_performance: f64,
    best_config: Option<Config>,
}

impl HillClimbingStrategy {
    pub fn new(inner: impl Strategy + 'static) -> Self {
        HillClimbingStrategy {
            inner: Box::new(inner),
            rng: StdRng::from_entropy(),
            seed: None,
            space: ConfigSpace::new(),
            neighbors: Vec::new(),
            attempted: Vec::new(),
            attempted_count: 0,
            best_performance: f64::NEG_INFINITY,
            best_config: None,
        }
    }

    pub fn with_seed(seed: u64, inner: impl Strategy + 'static) -> Self {
        let mut strategy = HillClimbingStrategy::new(inner);
        strategy.seed = Some(seed);
        strategy
    }

    fn adopt(&mut self, performance: f64, config: &Config) {
        self.attempted.iter_mut().for_each(|seen| *seen = false);
        self.attempted_count = 0;
        self.best_performance = performance;
        self.best_config = Some(config.clone());
    }
}

impl Strategy for HillClimbingStrategy {
    fn init(&mut self, problem: &TuningProblem<'_>) -> Result<Option<Config>, TuneError> {
        self.rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.space = problem.space().clone();
        self.neighbors.clear();
        for param in self.space.params() {
            for value in param.values() {
                self.neighbors.push((param.clone(), value.clone()));
            }
        }
        self.attempted = vec![false; self.neighbors.len()];
        self.attempted_count = 0;

        match self.inner.init(problem)? {
            Some(config) => {
                self.adopt(f64::NEG_INFINITY, &config);
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    fn submit(&mut self, performance: f64, config: Config) -> Result<Option<Config>, TuneError> {
        let mut config = config;
        if performance > self.best_performance {
            self.adopt(performance, &config);
        } else if let Some(best) = &self.best_config {
            // fall back to the incumbent as the working point
            config = best.clone();
        }

        while self.attempted_count < self.neighbors.len() {
            let index = self.rng.gen_range(0..self.neighbors.len());
            if self.attempted[index] {
                continue;
            }
            self.attempted[index] = true;
            self.attempted_count += 1;

            let (param, new_value) = &self.neighbors[index];
            let Some(old_value) = config.get(param).cloned() else {
                continue;
            };
            if old_value == *new_value {
                continue;
            }

            config.insert(param.clone(), new_value.clone());
            if !self.space.is_valid(&config) {
                config.insert(param.clone(), old_value);
                continue;
            }

            return Ok(Some(config));
        }

        // neighborhood exhausted without improvement: restart
        match self.inner.submit(performance, config)? {
            Some(fresh) => {
                self.adopt(f64::NEG_INFINITY, &fresh);
                Ok(Some(fresh))
            }
            None => Ok(None),
        }
    }
}

/// Wraps an inner strategy with a persistent [`TuningCache`].
///
/// On `init` the cache is opened for the builder; a best-known
/// configuration is replayed first, and configurations whose performance is
/// already recorded are skipped by feeding the cached value back into the
/// inner strategy.
pub struct CachingStrategy {
    path: PathBuf,
    inner: Box<dyn Strategy>,
    cache: Option<TuningCache>,
    first_run: bool,
    first_config: Option<Config>,
}

impl CachingStrategy {
    pub fn new(path: impl Into<PathBuf>, inner: impl Strategy + 'static) -> Self {
        CachingStrategy {
            path: path.into(),
            inner: Box::new(inner),
            cache: None,
            first_run: false,
            first_config: None,
        }
    }

    /// Advance past configurations that already have a recorded
    /// performance, replaying the records into the inner strategy.
    fn skip_known(&mut self, config: Config) -> Result<Option<Config>, TuneError> {
        let mut config = config;
        loop {
            let known = self
                .cache
                .as_ref()
                .and_then(|cache| cache.find(&config));
            match known {
                None => return Ok(Some(config)),
                Some(performance) => match self.inner.submit(performance, config)? {
                    Some(next) => config = next,
                    None => return Ok(None),
                },
            }
        }
    }
}

impl Strategy for CachingStrategy {
    fn init(&mut self, problem: &TuningProblem<'_>) -> Result<Option<Config>, TuneError> {
        let Some(first) = self.inner.init(problem)? else {
            return Ok(None);
        };

        let (cache, best) = TuningCache::open(&self.path, problem)?;
        self.cache = Some(cache);

        if let Some(best) = best {
            // evaluate the best known configuration first; the inner
            // strategy's own starting point is replayed afterwards
            self.first_run = true;
            self.first_config = Some(first);
            return Ok(Some(best));
        }

        self.first_run = false;
        self.skip_known(first)
    }

    fn submit(&mut self, performance: f64, config: Config) -> Result<Option<Config>, TuneError> {
        if self.first_run {
            self.first_run = false;
            let Some(stashed) = self.first_config.take() else {
                return Ok(None);
            };
            return self.skip_known(stashed);
        }

        if let Some(cache) = self.cache.as_mut() {
            cache.append(&config, performance);
        }
        match self.inner.submit(performance, config)? {
            Some(next) => self.skip_known(next),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridtune_compile::KernelSource;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            device_name: "Test Device".to_owned(),
            compute_capability: (8, 6),
            driver_version: 12000,
        }
    }

    fn line_builder() -> (KernelBuilder, Param) {
        let mut builder = KernelBuilder::new(
            KernelSource::inline("k.cu", "__global__ void k();"),
            "k",
        );
        let x = builder
            .tune("x", vec![1, 2, 3, 4, 5, 6, 7, 8])
            .unwrap();
        (builder, x)
    }

    #[test]
    fn random_strategy_visits_each_valid_config_once() {
        let (builder, x) = line_builder();
        let problem = TuningProblem::new(&builder, identity());

        let mut strategy = RandomStrategy::with_seed(11);
        let mut seen = std::collections::HashSet::new();

        let mut current = strategy.init(&problem).unwrap();
        while let Some(config) = current {
            let value = config.at(&x).unwrap().to::<i64>().unwrap();
            assert!(seen.insert(value));
            current = strategy.submit(1.0, config).unwrap();
        }
        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn limit_strategy_caps_the_evaluation_count() {
        let (builder, _x) = line_builder();
        let problem = TuningProblem::new(&builder, identity());

        let mut strategy = LimitStrategy::new(3, RandomStrategy::with_seed(5));
        let mut count = 0;
        let mut current = strategy.init(&problem).unwrap();
        while let Some(config) = current {
            count += 1;
            current = strategy.submit(1.0, config).unwrap();
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn hill_climbing_finds_the_peak() {
        let (builder, x) = line_builder();
        let problem = TuningProblem::new(&builder, identity());

        // unimodal oracle peaking at x = 5
        let oracle =
            |config: &Config| -(config.at(&x).unwrap().to::<i64>().unwrap() - 5).abs() as f64 + 10.0;

        let mut strategy =
            HillClimbingStrategy::with_seed(21, LimitStrategy::new(1, RandomStrategy::with_seed(3)));

        let mut best_seen = f64::NEG_INFINITY;
        let mut best_x = 0;
        let mut current = strategy.init(&problem).unwrap();
        // the neighbor list covers the whole domain, so the peak is
        // evaluated before the neighborhood can exhaust
        for _ in 0..64 {
            let Some(config) = current else { break };
            let performance = oracle(&config);
            if performance > best_seen {
                best_seen = performance;
                best_x = config.at(&x).unwrap().to::<i64>().unwrap();
            }
            current = strategy.submit(performance, config).unwrap();
        }

        assert_eq!(best_x, 5);
        assert_eq!(best_seen, 10.0);
    }

    #[test]
    fn hill_climbing_best_is_monotone() {
        let (builder, x) = line_builder();
        let problem = TuningProblem::new(&builder, identity());

        let oracle = |config: &Config| {
            let v = config.at(&x).unwrap().to::<i64>().unwrap();
            (v * v) as f64
        };

        let mut strategy = HillClimbingStrategy::with_seed(9, RandomStrategy::with_seed(4));
        let mut previous_best = f64::NEG_INFINITY;
        let mut best = f64::NEG_INFINITY;

        let mut current = strategy.init(&problem).unwrap();
        for _ in 0..24 {
            let Some(config) = current else { break };
            let performance = oracle(&config);
            best = best.max(performance);
            assert!(best >= previous_best);
            previous_best = best;
            current = strategy.submit(performance, config).unwrap();
        }
    }

    #[test]
    fn caching_strategy_skips_recorded_configs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        // first run measures everything
        let mut measured_first = 0;
        {
            let (builder, x) = line_builder();
            let problem = TuningProblem::new(&builder, identity());
            let mut strategy = CachingStrategy::new(&path, RandomStrategy::with_seed(2));
            let mut current = strategy.init(&problem).unwrap();
            while let Some(config) = current {
                measured_first += 1;
                let performance = config.at(&x).unwrap().to::<i64>().unwrap() as f64;
                current = strategy.submit(performance, config).unwrap();
            }
        }
        assert_eq!(measured_first, 8);

        // second run replays the best first and never re-measures
        let (builder, x) = line_builder();
        let problem = TuningProblem::new(&builder, identity());
        let mut strategy = CachingStrategy::new(&path, RandomStrategy::with_seed(13));
        let first = strategy.init(&problem).unwrap().unwrap();
        assert_eq!(first.at(&x).unwrap().to::<i64>().unwrap(), 8);

        let mut measured_second = 0;
        let mut current = strategy.submit(8.0, first).unwrap();
        while let Some(config) = current {
            measured_second += 1;
            current = strategy.submit(0.0, config).unwrap();
        }
        assert_eq!(measured_second, 0);
    }
}
