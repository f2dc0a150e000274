//! Demo harness for the gridtune autotuner.
//!
//! `simulate` tunes a synthetic kernel on the in-process simulation device
//! and runs anywhere; `vector-add` (with `--features cuda`) tunes a real
//! CUDA kernel through NVRTC.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use gridtune_autotune::{CachingStrategy, PerfAggregator, RandomStrategy, TuneKernel};
use gridtune_compile::{CType, KernelSource, SimCompiler};
use gridtune_launch::{DeviceApi, KernelBuilder, SimDevice, Stream};

#[derive(Parser)]
#[command(name = "gridtune-bench", about = "gridtune demo harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tune a synthetic kernel on the simulation device.
    Simulate {
        /// Problem size (elements).
        #[arg(long, default_value_t = 1 << 20)]
        n: u32,

        /// Persist results to this tuning cache file.
        #[arg(long)]
        cache: Option<PathBuf>,
    },

    /// Tune a real CUDA vector-add kernel (requires `--features cuda`).
    #[cfg(feature = "cuda")]
    VectorAdd {
        /// Problem size (elements).
        #[arg(long, default_value_t = 1 << 20)]
        n: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Simulate { n, cache } => simulate(n, cache),
        #[cfg(feature = "cuda")]
        Command::VectorAdd { n } => cuda::vector_add(n),
    }
}

fn demo_builder() -> Result<KernelBuilder> {
    let mut builder = KernelBuilder::new(
        KernelSource::inline(
            "vector_add.cu",
            include_str!("vector_add.cu"),
        ),
        "vector_add",
    );
    let block = builder.tune("block_size_x", vec![32u32, 64, 128, 256, 512, 1024])?;
    let unroll = builder.tune_define("UNROLL", vec![1, 2, 4])?;
    builder.block_size(&block, 1u32, 1u32);
    builder.template_type::<f32>();
    builder.restrict((block.expr() * unroll.expr()).le(2048));
    Ok(builder)
}

fn simulate(n: u32, cache: Option<PathBuf>) -> Result<()> {
    // a latency model with a sweet spot at 256-wide blocks
    let sim = SimDevice::with_model(|launch| {
        let block = launch.block.x as f64;
        let imbalance = (block.log2() - 8.0).abs();
        1e-4 + imbalance * 2e-5
    });
    let device: Arc<dyn DeviceApi> = Arc::new(sim.clone());

    let builder = demo_builder()?;
    let parameter_types = vec![
        CType::of::<*mut f32>(),
        CType::of::<*const f32>(),
        CType::of::<*const f32>(),
        CType::of::<i32>(),
    ];
    let aggregator = PerfAggregator::new(2, 5, 0.5, 1);

    let mut tune = match cache {
        Some(path) => TuneKernel::with_aggregator(
            builder,
            parameter_types,
            CachingStrategy::new(path, RandomStrategy::new()),
            SimCompiler::new(),
            device,
            aggregator,
        )?,
        None => TuneKernel::with_aggregator(
            builder,
            parameter_types,
            RandomStrategy::new(),
            SimCompiler::new(),
            device,
            aggregator,
        )?,
    };

    let mut launches = 0u64;
    while !tune.finished() && launches < 100_000 {
        tune.launch(Stream::DEFAULT, n, &[])?;
        launches += 1;
    }

    let best = tune
        .best_performance()
        .context("tuning ended without a working kernel")?;
    println!(
        "tuned after {} host launches ({} simulated kernel launches)",
        launches,
        sim.launch_count()
    );
    println!("best throughput: {best:.3e} elements/s");
    Ok(())
}

#[cfg(feature = "cuda")]
mod cuda {
    use super::*;

    use gridtune_compile::{AsyncCompiler, NvrtcCompiler};
    use gridtune_launch::{CudaApi, KernelArg};

    pub fn vector_add(n: u32) -> Result<()> {
        let api = CudaApi::new(0).context("no CUDA device")?;
        let identity = api.identity()?;
        println!(
            "tuning on {} (compute {}.{})",
            identity.device_name, identity.compute_capability.0, identity.compute_capability.1
        );

        let cuda = cudarc::driver::CudaDevice::new(0)?;
        let a = cuda.alloc_zeros::<f32>(n as usize)?;
        let b = cuda.alloc_zeros::<f32>(n as usize)?;
        let c = cuda.alloc_zeros::<f32>(n as usize)?;

        let device: Arc<dyn DeviceApi> = Arc::new(api);
        let mut tune = TuneKernel::new(
            demo_builder()?,
            vec![
                CType::of::<*mut f32>(),
                CType::of::<*const f32>(),
                CType::of::<*const f32>(),
                CType::of::<i32>(),
            ],
            RandomStrategy::new(),
            AsyncCompiler::new(NvrtcCompiler::new()),
            device,
        )?;

        use cudarc::driver::DevicePtr;
        let args = [
            KernelArg::ptr(*c.device_ptr()),
            KernelArg::ptr(*a.device_ptr()),
            KernelArg::ptr(*b.device_ptr()),
            KernelArg::from(n as i32),
        ];

        let mut launches = 0u64;
        while !tune.finished() && launches < 50_000 {
            tune.launch(Stream::DEFAULT, n, &args)?;
            launches += 1;
        }
        cuda.synchronize()?;

        let best = tune
            .best_performance()
            .context("tuning ended without a working kernel")?;
        println!("best throughput: {best:.3e} elements/s after {launches} launches");
        Ok(())
    }
}
