//! Iteration search and throughput report

use std::fmt;
use std::time::Duration;

use tracing::{debug, instrument};

use super::OperandBuffers;
use crate::backends::Device;
use crate::config::BenchConfig;
use crate::device_call;
use crate::error::{BenchError, Result};
use crate::kernels::KernelDescriptor;
use crate::random::{fill, Lcg};
use crate::shape::{ProblemProperties, Shape3D};

/// Iteration count beyond which a kernel that still finishes under the
/// minimum time is reported as degenerate
pub const MAX_ITERATIONS: u32 = 1 << 20;

/// One timed region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Launches inside the region
    pub iterations: u32,
    /// Duration of the region
    pub elapsed: Duration,
}

/// Find an iteration count whose timed region lasts at least `min_time`
///
/// `measure(n)` times `n` back-to-back launches. Counts double from 1.
/// With `fixed`, exactly that count is measured once.
///
/// # Errors
///
/// Whatever `measure` returns, or [`BenchError::DegenerateKernel`] when
/// [`MAX_ITERATIONS`] launches still finish under `min_time`.
pub fn search_iterations<F>(
    kernel: &str,
    min_time: Duration,
    fixed: Option<u32>,
    mut measure: F,
) -> Result<Measurement>
where
    F: FnMut(u32) -> Result<Duration>,
{
    if let Some(iterations) = fixed {
        let elapsed = measure(iterations)?;
        return Ok(Measurement {
            iterations,
            elapsed,
        });
    }

    let mut iterations = 1;
    loop {
        let elapsed = measure(iterations)?;
        debug!(iterations, ?elapsed, "timed");
        if elapsed >= min_time {
            return Ok(Measurement {
                iterations,
                elapsed,
            });
        }
        if iterations >= MAX_ITERATIONS {
            return Err(BenchError::DegenerateKernel {
                kernel: kernel.to_string(),
                iterations: u64::from(iterations),
                elapsed,
            });
        }
        iterations *= 2;
    }
}

/// Throughput of one kernel on one shape
#[derive(Debug, Clone, PartialEq)]
pub struct BenchReport {
    /// Kernel name
    pub kernel: String,
    /// Problem shape
    pub shape: Shape3D,
    /// Launches in the timed region
    pub iterations: u32,
    /// Duration of the timed region
    pub elapsed: Duration,
    /// Time per launch
    pub latency: Duration,
    /// A and B bytes read per second, in GB/s
    pub bandwidth_gbps: f64,
    /// `2·M·N·K` operations per second, in GFLOP/s
    pub gflops: f64,
}

impl BenchReport {
    /// Derive per-launch figures from a measurement
    pub fn new(kernel: &str, problem: &ProblemProperties, measurement: Measurement) -> Self {
        let Measurement {
            iterations,
            elapsed,
        } = measurement;
        let latency = elapsed / iterations.max(1);
        // A launch never takes less than a nanosecond
        let seconds = latency.as_secs_f64().max(1e-9);
        let bytes = (problem.a_bytes() + problem.b_bytes()) as f64;
        let flops = 2.0 * problem.total.macs() as f64;

        Self {
            kernel: kernel.to_string(),
            shape: problem.total,
            iterations,
            elapsed,
            latency,
            bandwidth_gbps: bytes / seconds / 1e9,
            gflops: flops / seconds / 1e9,
        }
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<40} {:>16} {:>8} iters {:>12.3} us {:>10.2} GB/s {:>10.2} GFLOP/s",
            self.kernel,
            self.shape.to_string(),
            self.iterations,
            self.latency.as_secs_f64() * 1e6,
            self.bandwidth_gbps,
            self.gflops
        )
    }
}

/// Time `kernel` over `total`
///
/// Operands are generated and uploaded once; C is never read back.
#[instrument(skip(device, kernel, config), fields(kernel = %kernel.name))]
pub fn benchmark<D: Device + ?Sized>(
    device: &mut D,
    kernel: &KernelDescriptor,
    total: Shape3D,
    config: &BenchConfig,
) -> Result<BenchReport> {
    let problem = kernel.problem(total);

    let mut rng = Lcg::new(config.seed);
    let a = fill(problem.kinds.a, problem.a_elements(), &mut rng);
    let b = fill(problem.kinds.b, problem.b_elements(), &mut rng);
    let c = vec![0u8; problem.c_bytes()];

    let buffers = OperandBuffers::allocate(device, &problem)?;
    let result = buffers.upload(device, &a, &b, &c).and_then(|()| {
        let launch = buffers.launch(kernel, &problem);
        search_iterations(&kernel.name, config.min_time, config.fixed_iterations, |n| {
            device_call!(device.launch_timed(&launch, n))
        })
    });
    buffers.release(device);

    Ok(BenchReport::new(&kernel.name, &problem, result?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;
    use crate::shape::{compute_problem, OperandKinds};

    /// Each launch takes 1 ms
    fn linear(n: u32) -> Result<Duration> {
        Ok(Duration::from_millis(u64::from(n)))
    }

    #[test]
    fn test_doubling_stops_at_min_time() {
        let mut seen = Vec::new();
        let m = search_iterations("k", Duration::from_millis(10), None, |n| {
            seen.push(n);
            linear(n)
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2, 4, 8, 16]);
        assert_eq!(m.iterations, 16);
        assert_eq!(m.elapsed, Duration::from_millis(16));
    }

    #[test]
    fn test_fixed_count_measured_once() {
        let mut calls = 0;
        let m = search_iterations("k", Duration::from_secs(3600), Some(3), |n| {
            calls += 1;
            linear(n)
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(m.iterations, 3);
    }

    #[test]
    fn test_zero_time_kernel_is_degenerate() {
        let mut last = 0;
        let err = search_iterations("empty", Duration::from_millis(1), None, |n| {
            assert!(n > last);
            last = n;
            Ok(Duration::ZERO)
        })
        .unwrap_err();
        assert_eq!(last, MAX_ITERATIONS);
        assert!(
            matches!(err, BenchError::DegenerateKernel { iterations, .. } if iterations == u64::from(MAX_ITERATIONS))
        );
    }

    #[test]
    fn test_measure_error_propagates() {
        let err = search_iterations("k", Duration::from_millis(1), None, |_| {
            Err(BenchError::InvalidConfig {
                key: "X",
                value: String::new(),
                reason: "boom".to_string(),
            })
        })
        .unwrap_err();
        assert!(matches!(err, BenchError::InvalidConfig { .. }));
    }

    #[test]
    fn test_report_throughput() {
        let problem = compute_problem(
            OperandKinds::widening(ElementKind::Float32),
            Shape3D::new(4, 1, 4),
            Shape3D::new(1000, 1, 1000),
        );
        let report = BenchReport::new(
            "k",
            &problem,
            Measurement {
                iterations: 10,
                elapsed: Duration::from_millis(10),
            },
        );
        assert_eq!(report.latency, Duration::from_millis(1));
        // (1000·1000 + 1000) f32 elements in 1 ms
        assert!((report.bandwidth_gbps - 4.004).abs() < 1e-9);
        // 2·10^6 flops in 1 ms
        assert!((report.gflops - 2.0).abs() < 1e-9);

        let line = report.to_string();
        assert!(line.starts_with("k "), "{line}");
        assert!(line.contains("1000x1x1000"), "{line}");
        assert!(line.ends_with("GFLOP/s"), "{line}");
    }
}
