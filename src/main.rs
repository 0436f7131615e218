//! tilebench CLI
//!
//! Enumerates the kernel variants the selected device can run, checks each
//! one against the host reference and benchmarks it over a fixed list of
//! matrix-vector shapes. All settings come from the environment, see
//! [`BenchConfig::from_env`].

use std::process::ExitCode;

use tilebench::backends::sim::SimDevice;
use tilebench::config::{BackendChoice, BenchConfig};
use tilebench::harness::{benchmark, check};
use tilebench::kernels::registry;
use tilebench::{Device, Result, Shape3D};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Shapes every kernel is timed on: square, tall, deep and small matvec
const BENCH_SHAPES: [Shape3D; 4] = [
    Shape3D::new(4096, 1, 4096),
    Shape3D::new(16384, 1, 4096),
    Shape3D::new(4096, 1, 16384),
    Shape3D::new(1024, 1, 1024),
];

fn main() -> ExitCode {
    let config = match BenchConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &BenchConfig) -> Result<()> {
    let mut device = open_device(config)?;
    info!(device = %device.name(), subgroup_size = ?device.subgroup_size(), "device selected");

    let kernels: Vec<_> = registry(device.subgroup_size())
        .into_iter()
        .filter(|kernel| config.selects(&kernel.name))
        .collect();
    if kernels.is_empty() {
        warn!(filter = ?config.filter, "no kernel matches the filter");
    }

    for kernel in &kernels {
        if config.skip_check {
            info!(kernel = %kernel.name, "check skipped");
        } else {
            let report = check(device.as_mut(), kernel, config.check_shape, config)?;
            info!(
                kernel = %report.kernel,
                tiles = report.tiles,
                elements = report.elements,
                "check passed"
            );
        }

        for shape in BENCH_SHAPES {
            let report = benchmark(device.as_mut(), kernel, shape, config)?;
            println!("{report}");
        }
    }
    Ok(())
}

fn open_device(config: &BenchConfig) -> Result<Box<dyn Device>> {
    let sim = || -> Box<dyn Device> { Box::new(SimDevice::new(config.sim_subgroup_size as usize)) };

    match config.backend {
        BackendChoice::Sim => Ok(sim()),
        BackendChoice::Gpu => open_gpu(),
        BackendChoice::Auto => match open_gpu() {
            Ok(device) => Ok(device),
            Err(e) => {
                warn!(error = %e, "GPU unavailable, falling back to the host emulator");
                Ok(sim())
            }
        },
    }
}

#[cfg(feature = "gpu")]
fn open_gpu() -> Result<Box<dyn Device>> {
    let device = tilebench::device_call!(tilebench::backends::gpu::GpuDevice::new())?;
    Ok(Box::new(device))
}

#[cfg(not(feature = "gpu"))]
fn open_gpu() -> Result<Box<dyn Device>> {
    Err(tilebench::BenchError::InvalidConfig {
        key: "BACKEND",
        value: "gpu".to_string(),
        reason: "built without the `gpu` feature".to_string(),
    })
}
