use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};

use crate::{agent::Agent, error::SimulationError, motion, motion::Snapshot};

use super::{ExecutionStrategy, Strategy};

/// Work-stealing fork-join over the agent range on a dedicated rayon pool.
pub struct ForkJoinStrategy {
    pool: ThreadPool,
}

impl ForkJoinStrategy {
    pub fn new(threads: usize) -> Result<Self, SimulationError> {
        let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
        Ok(ForkJoinStrategy { pool })
    }
}

impl ExecutionStrategy for ForkJoinStrategy {
    fn kind(&self) -> Strategy {
        Strategy::ForkJoin
    }

    fn step(&mut self, agents: &mut Vec<Agent>, snapshot: &Snapshot) -> Result<(), SimulationError> {
        let policy = snapshot.world.policy;

        self.pool.install(|| {
            let updates: Vec<_> = (0..agents.len())
                .into_par_iter()
                .map(|i| motion::next_position(i, snapshot))
                .collect();

            agents
                .par_iter_mut()
                .zip(updates)
                .for_each(|(agent, update)| agent.commit(update, policy));
        });

        Ok(())
    }

    fn set_threads(&mut self, threads: usize, _agents: &[Agent]) -> Result<(), SimulationError> {
        if threads != self.pool.current_num_threads() {
            *self = ForkJoinStrategy::new(threads)?;
        }
        Ok(())
    }
}
