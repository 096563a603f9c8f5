use crate::{agent::Agent, error::SimulationError, motion, motion::Snapshot};

use super::{commit_all, ExecutionStrategy, Strategy};

/// Single-threaded baseline.
pub struct SequentialStrategy;

impl ExecutionStrategy for SequentialStrategy {
    fn kind(&self) -> Strategy {
        Strategy::Sequential
    }

    fn step(&mut self, agents: &mut Vec<Agent>, snapshot: &Snapshot) -> Result<(), SimulationError> {
        let updates: Vec<_> = (0..agents.len())
            .map(|i| motion::next_position(i, snapshot))
            .collect();

        commit_all(agents, updates, &snapshot.world);
        Ok(())
    }
}
