//! Run configuration
//!
//! Read once from the process environment and passed down explicitly.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{BenchError, Result};
use crate::random::DEFAULT_SEED;
use crate::shape::Shape3D;

/// Which device executes the kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    /// GPU when compiled in and an adapter exists, else the emulator
    #[default]
    Auto,
    /// wgpu; fails if unavailable
    Gpu,
    /// Host emulation of the kernel schedules
    Sim,
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendChoice::Auto),
            "gpu" | "wgpu" => Ok(BackendChoice::Gpu),
            "sim" | "cpu" => Ok(BackendChoice::Sim),
            _ => Err("expected auto, gpu or sim".to_string()),
        }
    }
}

/// Which output tiles the checker recomputes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckCoverage {
    /// First, middle and last tile along M and N
    #[default]
    Sampled,
    /// Every outer tile
    Exhaustive,
}

/// Configuration threaded into the checker and benchmark runner
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    /// Problem shape used by correctness checks
    pub check_shape: Shape3D,
    /// Print problem details before each check
    pub debug: bool,
    /// Skip correctness checks entirely
    pub skip_check: bool,
    /// Tiles the checker visits
    pub coverage: CheckCoverage,
    /// Minimum duration of the timed region
    pub min_time: Duration,
    /// Exact iteration count instead of the doubling search
    pub fixed_iterations: Option<u32>,
    /// Only kernels whose name contains this substring
    pub filter: Option<String>,
    /// Seed for operand generation
    pub seed: u64,
    /// Execution device
    pub backend: BackendChoice,
    /// Subgroup width of the host emulator
    pub sim_subgroup_size: u32,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            check_shape: Shape3D::new(4096, 1, 4096),
            debug: false,
            skip_check: false,
            coverage: CheckCoverage::Sampled,
            min_time: Duration::from_millis(100),
            fixed_iterations: None,
            filter: None,
            seed: DEFAULT_SEED,
            backend: BackendChoice::Auto,
            sim_subgroup_size: 32,
        }
    }
}

impl BenchConfig {
    /// Build from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let check_shape = Shape3D::new(
            parse_or(&lookup, "M", defaults.check_shape.m)?,
            parse_or(&lookup, "N", defaults.check_shape.n)?,
            parse_or(&lookup, "K", defaults.check_shape.k)?,
        );
        let debug = parse_or::<i64, _>(&lookup, "DEBUG", 0)? != 0;
        let skip_check = lookup("SKIP_CHECK").is_some();
        let coverage = if lookup("EXHAUSTIVE_CHECK").is_some() {
            CheckCoverage::Exhaustive
        } else {
            CheckCoverage::Sampled
        };
        let min_time = Duration::from_millis(parse_or(
            &lookup,
            "BENCHMARK_MIN_MS",
            defaults.min_time.as_millis() as u64,
        )?);
        let fixed_iterations = match parse_or::<u32, _>(&lookup, "FIXED_ITERATIONS", 0)? {
            0 => None,
            n => Some(n),
        };
        let filter = lookup("FILTER").filter(|f| !f.is_empty());
        let seed = parse_or(&lookup, "SEED", defaults.seed)?;
        let backend = parse_or(&lookup, "BACKEND", defaults.backend)?;

        let sim_subgroup_size: u32 =
            parse_or(&lookup, "SIM_SUBGROUP_SIZE", defaults.sim_subgroup_size)?;
        if !sim_subgroup_size.is_power_of_two() || sim_subgroup_size < 2 {
            return Err(BenchError::InvalidConfig {
                key: "SIM_SUBGROUP_SIZE",
                value: sim_subgroup_size.to_string(),
                reason: "expected a power of two of at least 2".to_string(),
            });
        }

        Ok(Self {
            check_shape,
            debug,
            skip_check,
            coverage,
            min_time,
            fixed_iterations,
            filter,
            seed,
            backend,
            sim_subgroup_size,
        })
    }

    /// Whether a kernel passes the name filter
    pub fn selects(&self, kernel_name: &str) -> bool {
        self.filter
            .as_deref()
            .map_or(true, |needle| kernel_name.contains(needle))
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| BenchError::InvalidConfig {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
