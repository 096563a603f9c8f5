mod fork_join;
#[cfg(feature = "gpu")]
mod gpu;
mod region;
mod sequential;
mod thread_pool;
mod vectorized;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    agent::{Agent, World},
    error::{ConfigurationError, SimulationError},
    motion::{AgentUpdate, Snapshot},
    ModelOptions,
};

pub use self::{
    fork_join::ForkJoinStrategy,
    region::{RegionPartition, RegionStrategy},
    sequential::SequentialStrategy,
    thread_pool::ThreadPoolStrategy,
    vectorized::VectorizedStrategy,
};

#[cfg(feature = "gpu")]
pub use self::gpu::GpuStrategy;

/// Parallelization scheme used for every tick of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Sequential,
    ForkJoin,
    ThreadPool,
    Vectorized,
    GpuOffload,
    RegionParallel,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::Sequential,
        Strategy::ForkJoin,
        Strategy::ThreadPool,
        Strategy::Vectorized,
        Strategy::GpuOffload,
        Strategy::RegionParallel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::ForkJoin => "fork-join",
            Strategy::ThreadPool => "thread-pool",
            Strategy::Vectorized => "vectorized",
            Strategy::GpuOffload => "gpu-offload",
            Strategy::RegionParallel => "region-parallel",
        }
    }

    /// Whether the thread hint affects this strategy.
    pub fn uses_threads(self) -> bool {
        matches!(
            self,
            Strategy::ForkJoin | Strategy::ThreadPool | Strategy::RegionParallel
        )
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('_', "-");
        let strategy = match key.as_str() {
            "sequential" | "seq" => Strategy::Sequential,
            "fork-join" | "omp" => Strategy::ForkJoin,
            "thread-pool" | "pthread" => Strategy::ThreadPool,
            "vectorized" | "vector" | "simd" => Strategy::Vectorized,
            "gpu-offload" | "gpu" | "cuda" | "opencl" => Strategy::GpuOffload,
            "region-parallel" | "region" => Strategy::RegionParallel,
            _ => return Err(ConfigurationError::UnrecognizedStrategy(s.to_owned())),
        };
        Ok(strategy)
    }
}

/// One interchangeable way of running the motion update over all agents.
///
/// `step` must compute every update against `snapshot` before any of them
/// becomes visible to another update, and leave `agents` in index order.
pub trait ExecutionStrategy: Send {
    fn kind(&self) -> Strategy;

    fn step(&mut self, agents: &mut Vec<Agent>, snapshot: &Snapshot)
        -> Result<(), SimulationError>;

    /// Apply a new worker count. Strategies without workers ignore it.
    fn set_threads(&mut self, _threads: usize, _agents: &[Agent]) -> Result<(), SimulationError> {
        Ok(())
    }

    /// Device time of the last kernel launch in seconds, if any.
    fn kernel_time(&self) -> Option<f64> {
        None
    }

    /// Agents handed between regions during the last tick, if tracked.
    fn handoffs(&self) -> Option<usize> {
        None
    }
}

/// Construct the strategy object for a model. Called once per model.
pub fn build(
    strategy: Strategy,
    threads: usize,
    world: &World,
    agents: &[Agent],
    options: &ModelOptions,
) -> Result<Box<dyn ExecutionStrategy>, SimulationError> {
    let boxed: Box<dyn ExecutionStrategy> = match strategy {
        Strategy::Sequential => Box::new(SequentialStrategy),
        Strategy::ForkJoin => Box::new(ForkJoinStrategy::new(threads)?),
        Strategy::ThreadPool => Box::new(ThreadPoolStrategy::new(threads)?),
        Strategy::Vectorized => Box::new(VectorizedStrategy::default()),
        Strategy::GpuOffload => build_gpu(world, options)?,
        Strategy::RegionParallel => Box::new(RegionStrategy::new(
            world,
            agents,
            threads,
            options.region_grid,
        )?),
    };
    Ok(boxed)
}

#[cfg(feature = "gpu")]
fn build_gpu(
    world: &World,
    options: &ModelOptions,
) -> Result<Box<dyn ExecutionStrategy>, SimulationError> {
    Ok(Box::new(GpuStrategy::new(world, options.gpu_work_size)?))
}

#[cfg(not(feature = "gpu"))]
fn build_gpu(
    _world: &World,
    _options: &ModelOptions,
) -> Result<Box<dyn ExecutionStrategy>, SimulationError> {
    Err(SimulationError::ResourceUnavailable(
        "built without the `gpu` feature".to_owned(),
    ))
}

/// Commit `updates` to the agents they were computed for.
pub(crate) fn commit_all(
    agents: &mut [Agent],
    updates: impl IntoIterator<Item = AgentUpdate>,
    world: &World,
) {
    for (agent, update) in agents.iter_mut().zip(updates) {
        agent.commit(update, world.policy);
    }
}
