use thiserror::Error;

/// Malformed or inconsistent scenario input. Fatal to setup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("scenario contains no agents")]
    EmptyAgents,
    #[error("agent {agent} has no waypoints")]
    NoWaypoints { agent: u32 },
    #[error("agent {agent} references unknown waypoint {waypoint}")]
    UnknownWaypoint { agent: u32, waypoint: u32 },
    #[error("waypoint id {0} is defined more than once")]
    DuplicateWaypoint(u32),
    #[error("agent {agent} starts at ({x}, {y}) outside of the {width}x{height} world")]
    OutOfWorld {
        agent: u32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    #[error("world size {width}x{height} must be positive")]
    InvalidWorld { width: i32, height: i32 },
    #[error("unrecognized strategy {0:?}")]
    UnrecognizedStrategy(String),
    #[error("invalid option: {0}")]
    InvalidOption(&'static str),
    #[error("agent group {group}: {reason}")]
    InvalidGroup { group: usize, reason: &'static str },
}

/// Errors surfaced by [`crate::Model::setup`] and [`crate::Model::tick`].
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The requested backend cannot run here. Never downgraded silently.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[cfg(feature = "gpu")]
    #[error("accelerator failure: {0}")]
    Accelerator(#[from] ocl::Error),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("{0}")]
    Layout(&'static str),
    #[error("worker thread panicked during tick")]
    WorkerPanicked,
    /// A previous tick failed; the model no longer advances.
    #[error("model aborted after a failed tick")]
    Aborted,
    /// An agent was lost or duplicated while moving between regions.
    #[error("agent ownership violated: {0}")]
    Ownership(String),
}

/// Non-fatal: a non-positive thread hint was replaced by a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("thread count {requested} is not positive, falling back to {fallback}")]
pub struct InvalidThreadCountWarning {
    pub requested: i32,
    pub fallback: usize,
}
