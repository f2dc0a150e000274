//! End-to-end tuning scenarios on the simulation backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gridtune_autotune::{
    tune_with, CachingStrategy, LimitStrategy, PerfAggregator, RandomStrategy, Strategy,
    TuneKernel, TuningProblem,
};
use gridtune_compile::{CompileJob, Compiler, CType, KernelSource, ModuleFuture, SimCompiler};
use gridtune_launch::{DeviceApi, KernelBuilder, SimDevice, Stream};

const PROBLEM: u32 = 1024;

/// A builder tuning one block-size axis.
fn vector_add_builder() -> KernelBuilder {
    let mut builder = KernelBuilder::new(
        KernelSource::inline(
            "vector_add.cu",
            "template<typename T> __global__ void vector_add(T* c, const T* a, const T* b, int n);",
        ),
        "vector_add",
    );
    let block = builder
        .tune("block_size_x", vec![32u32, 64, 128, 256])
        .unwrap();
    builder.block_size(&block, 1u32, 1u32);
    builder.template_type::<f32>();
    builder
}

/// Simulated latency: fastest at a 128-wide block.
fn latency_model(launch: &gridtune_launch::SimLaunch) -> f64 {
    let block = launch.block.x as f64;
    1e-4 + (block - 128.0).abs() * 1e-6
}

#[test]
fn tuning_converges_on_the_simulated_optimum() {
    let device: Arc<dyn DeviceApi> = Arc::new(SimDevice::with_model(latency_model));
    let mut tune = TuneKernel::with_aggregator(
        vector_add_builder(),
        vec![
            CType::of::<*mut f32>(),
            CType::of::<*const f32>(),
            CType::of::<*const f32>(),
            CType::of::<i32>(),
        ],
        RandomStrategy::with_seed(17),
        SimCompiler::new(),
        Arc::clone(&device),
        PerfAggregator::new(1, 2, 10.0, 0),
    )
    .unwrap();

    for _ in 0..100 {
        tune.launch(Stream::DEFAULT, PROBLEM, &[]).unwrap();
        if tune.finished() {
            break;
        }
    }

    assert!(tune.finished());
    let best = tune.best_performance().unwrap();
    let expected = PROBLEM as f64 / 1e-4;
    assert!(
        (best - expected).abs() / expected < 1e-9,
        "best {best}, expected {expected}"
    );

    // finished kernels keep launching the winner
    tune.launch(Stream::DEFAULT, PROBLEM, &[]).unwrap();
}

/// A compiler whose first job resolves immediately and whose later jobs
/// take `delay` on a background thread.
struct SlowCompiler {
    delay: Duration,
    first: AtomicBool,
}

impl SlowCompiler {
    fn new(delay: Duration) -> Self {
        SlowCompiler {
            delay,
            first: AtomicBool::new(true),
        }
    }
}

impl Compiler for SlowCompiler {
    fn compile(&self, job: CompileJob) -> ModuleFuture {
        if self.first.swap(false, Ordering::SeqCst) {
            return SimCompiler::new().compile(job);
        }
        let delay = self.delay;
        ModuleFuture::spawn(move || {
            std::thread::sleep(delay);
            SimCompiler::new().compile(job).wait_owned()
        })
    }
}

#[test]
fn host_launches_never_block_once_a_best_kernel_exists() {
    let sim = SimDevice::with_model(latency_model);
    let device: Arc<dyn DeviceApi> = Arc::new(sim.clone());

    // two candidates: the first compiles instantly, the second slowly
    let mut tune = TuneKernel::with_aggregator(
        vector_add_builder(),
        vec![CType::of::<*mut f32>()],
        LimitStrategy::new(2, RandomStrategy::with_seed(3)),
        SlowCompiler::new(Duration::from_millis(300)),
        device,
        PerfAggregator::new(1, 1, 10.0, 0),
    )
    .unwrap();

    // first candidate compiles instantly; two launches measure it
    tune.launch(Stream::DEFAULT, PROBLEM, &[]).unwrap();
    tune.launch(Stream::DEFAULT, PROBLEM, &[]).unwrap();

    // the second candidate is now compiling slowly; every host launch must
    // fall back to the best kernel without waiting for the compile
    let launches_before = sim.launch_count();
    for _ in 0..100 {
        let start = Instant::now();
        tune.launch(Stream::DEFAULT, PROBLEM, &[]).unwrap();
        assert!(
            start.elapsed() < Duration::from_millis(100),
            "host launch blocked on compilation"
        );
    }
    assert_eq!(sim.launch_count() - launches_before, 100);

    // once the compile lands, tuning resumes and eventually finishes
    std::thread::sleep(Duration::from_millis(400));
    for _ in 0..100 {
        tune.launch(Stream::DEFAULT, PROBLEM, &[]).unwrap();
        if tune.finished() {
            break;
        }
    }
    assert!(tune.finished());
}

#[test]
fn offline_tuning_reuses_the_cache_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vector_add.cache");

    let builder = vector_add_builder();
    let block = builder.space().at("block_size_x").unwrap().clone();
    let identity = SimDevice::new().identity().unwrap();

    let oracle = |config: &gridtune_space::Config| {
        let width = config.at(&block).unwrap().to::<u32>().unwrap() as f64;
        Ok(1.0 / (1e-4 + (width - 128.0).abs() * 1e-6))
    };

    let mut measured = 0;
    let problem = TuningProblem::new(&builder, identity.clone());
    let best = tune_with(&path, RandomStrategy::with_seed(5), &problem, |config| {
        measured += 1;
        oracle(config)
    })
    .unwrap();
    assert_eq!(measured, 4);
    assert_eq!(best.at(&block).unwrap().to::<u32>().unwrap(), 128);

    // a second run never measures: the cache already knows the best
    let mut measured_again = 0;
    let problem = TuningProblem::new(&builder, identity);
    let best_again = tune_with(&path, RandomStrategy::with_seed(23), &problem, |config| {
        measured_again += 1;
        oracle(config)
    })
    .unwrap();
    assert_eq!(measured_again, 0);
    assert_eq!(best_again, best);
}

#[test]
fn caching_strategy_survives_interrupted_tuning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resume.cache");

    let builder = vector_add_builder();
    let block = builder.space().at("block_size_x").unwrap().clone();
    let identity = SimDevice::new().identity().unwrap();

    let oracle = |config: &gridtune_space::Config| {
        config.at(&block).unwrap().to::<u32>().unwrap() as f64
    };

    // first session evaluates only two configurations, then stops
    {
        let problem = TuningProblem::new(&builder, identity.clone());
        let mut strategy = CachingStrategy::new(
            &path,
            LimitStrategy::new(2, RandomStrategy::with_seed(7)),
        );
        let mut current = strategy.init(&problem).unwrap();
        while let Some(config) = current {
            let performance = oracle(&config);
            current = strategy.submit(performance, config).unwrap();
        }
    }

    // the resumed session replays the recorded best first and only
    // measures configurations the first session never reached
    let problem = TuningProblem::new(&builder, identity);
    let mut strategy = CachingStrategy::new(&path, RandomStrategy::with_seed(41));
    let mut fresh = 0;
    let mut current = strategy.init(&problem).unwrap();
    let mut first = true;
    while let Some(config) = current {
        if !first {
            fresh += 1;
        }
        first = false;
        let performance = oracle(&config);
        current = strategy.submit(performance, config).unwrap();
    }
    assert_eq!(fresh, 2, "two of the four configurations were already cached");
}
