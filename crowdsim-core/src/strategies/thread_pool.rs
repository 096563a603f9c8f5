use std::panic::{self, AssertUnwindSafe};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{
    agent::Agent,
    error::SimulationError,
    motion::{self, AgentUpdate, Snapshot},
};

use super::{commit_all, ExecutionStrategy, Strategy};

/// Fixed set of long-lived workers, one contiguous chunk of agents each.
///
/// Workers compute their chunk against the snapshot; the join of the compute
/// scope is the barrier, after which every chunk is committed.
pub struct ThreadPoolStrategy {
    pool: ThreadPool,
    updates: Vec<Vec<AgentUpdate>>,
}

impl ThreadPoolStrategy {
    pub fn new(threads: usize) -> Result<Self, SimulationError> {
        Ok(ThreadPoolStrategy {
            pool: build_pool(threads)?,
            updates: Vec::new(),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

/// Named worker pool shared by the chunked and region strategies.
pub(crate) fn build_pool(threads: usize) -> Result<ThreadPool, SimulationError> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("crowdsim-worker-{i}"))
        .build()?;
    Ok(pool)
}

impl ExecutionStrategy for ThreadPoolStrategy {
    fn kind(&self) -> Strategy {
        Strategy::ThreadPool
    }

    fn step(&mut self, agents: &mut Vec<Agent>, snapshot: &Snapshot) -> Result<(), SimulationError> {
        if agents.is_empty() {
            return Ok(());
        }

        let agent_count = agents.len();
        let chunk_size = agent_count.div_ceil(self.threads());
        let world = &snapshot.world;
        let pool = &self.pool;
        let updates = &mut self.updates;
        updates.resize_with(agent_count.div_ceil(chunk_size), Vec::new);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.scope(|s| {
                for (c, out) in updates.iter_mut().enumerate() {
                    s.spawn(move |_| {
                        let start = c * chunk_size;
                        let end = (start + chunk_size).min(agent_count);
                        out.clear();
                        out.extend((start..end).map(|i| motion::next_position(i, snapshot)));
                    });
                }
            });

            pool.scope(|s| {
                for (chunk, out) in agents.chunks_mut(chunk_size).zip(updates.iter_mut()) {
                    s.spawn(move |_| commit_all(chunk, out.drain(..), world));
                }
            });
        }));

        result.map_err(|_| SimulationError::WorkerPanicked)
    }

    fn set_threads(&mut self, threads: usize, _agents: &[Agent]) -> Result<(), SimulationError> {
        if threads.max(1) != self.threads() {
            self.pool = build_pool(threads)?;
        }
        Ok(())
    }
}
