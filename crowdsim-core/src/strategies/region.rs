use std::panic::{self, AssertUnwindSafe};

use glam::{ivec2, IVec2};
use log::{debug, error};
use rayon::ThreadPool;

use crate::{
    agent::{Agent, World},
    error::SimulationError,
    motion::{self, AgentUpdate, Snapshot},
};

use super::{thread_pool::build_pool, ExecutionStrategy, Strategy};

/// Static grid of disjoint rectangles covering the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionPartition {
    width: i32,
    height: i32,
    columns: i32,
    rows: i32,
}

impl RegionPartition {
    pub fn new(width: i32, height: i32, columns: usize, rows: usize) -> Self {
        RegionPartition {
            width,
            height,
            columns: (columns as i32).clamp(1, width.max(1)),
            rows: (rows as i32).clamp(1, height.max(1)),
        }
    }

    /// Close-to-square grid with one region per thread.
    pub fn for_threads(width: i32, height: i32, threads: usize) -> Self {
        let threads = threads.max(1);
        let mut rows = (threads as f64).sqrt() as usize;
        while rows > 1 && threads % rows != 0 {
            rows -= 1;
        }
        let rows = rows.max(1);

        RegionPartition::new(width, height, threads / rows, rows)
    }

    pub fn len(&self) -> usize {
        (self.columns * self.rows) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (columns, rows)
    pub fn grid(&self) -> (usize, usize) {
        (self.columns as usize, self.rows as usize)
    }

    /// Region owning `cell`. Cells outside the world belong to the nearest edge region.
    pub fn region_of(&self, cell: IVec2) -> usize {
        let x = cell.x.clamp(0, self.width - 1) as i64;
        let y = cell.y.clamp(0, self.height - 1) as i64;
        let column = x * self.columns as i64 / self.width as i64;
        let row = y * self.rows as i64 / self.height as i64;

        (row * self.columns as i64 + column) as usize
    }

    /// Inclusive lower and exclusive upper corner of `region`.
    pub fn bounds(&self, region: usize) -> (IVec2, IVec2) {
        let column = region as i32 % self.columns;
        let row = region as i32 / self.columns;
        let start = |i: i32, size: i32, parts: i32| (i * size + parts - 1) / parts;

        (
            ivec2(
                start(column, self.width, self.columns),
                start(row, self.height, self.rows),
            ),
            ivec2(
                start(column + 1, self.width, self.columns),
                start(row + 1, self.height, self.rows),
            ),
        )
    }
}

/// Non-owning view of the agents a region is responsible for.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: usize,
    pub min: IVec2,
    pub max: IVec2,
    /// Indices of the owned agents, ascending.
    pub members: Vec<u32>,
}

impl Region {
    pub fn contains(&self, cell: IVec2) -> bool {
        cell.x >= self.min.x && cell.y >= self.min.y && cell.x < self.max.x && cell.y < self.max.y
    }
}

/// Agent moving to another region, committed by the receiving worker.
struct Handoff {
    index: u32,
    agent: Agent,
    update: AgentUpdate,
}

/// Spatially partitioned strategy, one worker per region.
///
/// Each tick runs as two scopes on a pool with one worker per region; the
/// join of the first scope is the barrier. In the first phase a worker
/// computes the updates of the agents it owns, commits those that stay inside
/// its region and sends the others to their new owner. In the second phase
/// every worker drains its inbox and commits the received agents. An agent
/// value is held by exactly one worker or one channel at any time.
pub struct RegionStrategy {
    partition: RegionPartition,
    regions: Vec<Region>,
    fixed_grid: Option<[usize; 2]>,
    pool: ThreadPool,
    handoffs: usize,
}

impl RegionStrategy {
    pub fn new(
        world: &World,
        agents: &[Agent],
        threads: usize,
        fixed_grid: Option<[usize; 2]>,
    ) -> Result<Self, SimulationError> {
        let partition = RegionPartition::for_threads(world.width, world.height, threads);
        let mut strategy = RegionStrategy {
            partition,
            regions: Vec::new(),
            fixed_grid,
            pool: build_pool(partition.len())?,
            handoffs: 0,
        };
        strategy.repartition(world.width, world.height, threads, agents)?;

        Ok(strategy)
    }

    pub fn partition(&self) -> &RegionPartition {
        &self.partition
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Worker count of the pool, one per region.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn repartition(
        &mut self,
        width: i32,
        height: i32,
        threads: usize,
        agents: &[Agent],
    ) -> Result<(), SimulationError> {
        self.partition = match self.fixed_grid {
            Some([columns, rows]) => RegionPartition::new(width, height, columns, rows),
            None => RegionPartition::for_threads(width, height, threads),
        };

        self.regions = (0..self.partition.len())
            .map(|id| {
                let (min, max) = self.partition.bounds(id);
                Region {
                    id,
                    min,
                    max,
                    members: Vec::new(),
                }
            })
            .collect();

        for (i, agent) in agents.iter().enumerate() {
            let region = self.partition.region_of(agent.position);
            self.regions[region].members.push(i as u32);
        }

        if self.workers() != self.partition.len() {
            self.pool = build_pool(self.partition.len())?;
        }

        let (columns, rows) = self.partition.grid();
        debug!("Partitioned world into {columns}x{rows} regions");
        Ok(())
    }

    /// Move every agent out of `agents` into the bucket of its owning region.
    fn distribute(&self, agents: &mut Vec<Agent>) -> Result<Vec<Vec<(u32, Agent)>>, SimulationError> {
        let mut slots: Vec<Option<Agent>> = agents.drain(..).map(Some).collect();

        let buckets = self
            .regions
            .iter()
            .map(|region| {
                region
                    .members
                    .iter()
                    .map(|&i| {
                        let agent = slots.get_mut(i as usize).and_then(Option::take).ok_or_else(|| {
                            SimulationError::Ownership(format!(
                                "agent {i} is owned by more than one region"
                            ))
                        })?;
                        Ok((i, agent))
                    })
                    .collect::<Result<Vec<_>, SimulationError>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(i) = slots.iter().position(Option::is_some) {
            return Err(SimulationError::Ownership(format!(
                "agent {i} is not owned by any region"
            )));
        }

        Ok(buckets)
    }
}

impl ExecutionStrategy for RegionStrategy {
    fn kind(&self) -> Strategy {
        Strategy::RegionParallel
    }

    fn step(&mut self, agents: &mut Vec<Agent>, snapshot: &Snapshot) -> Result<(), SimulationError> {
        let agent_count = agents.len();
        let buckets = self.distribute(agents)?;

        let (senders, inboxes): (Vec<_>, Vec<_>) = (0..buckets.len())
            .map(|_| flume::unbounded::<Handoff>())
            .unzip();
        let mut owned: Vec<(Vec<(u32, Agent)>, usize)> =
            (0..buckets.len()).map(|_| (Vec::new(), 0)).collect();
        let partition = &self.partition;
        let pool = &self.pool;
        let policy = snapshot.world.policy;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.scope(|s| {
                for (r, (bucket, (kept, sent))) in buckets.into_iter().zip(owned.iter_mut()).enumerate() {
                    let senders = &senders;

                    s.spawn(move |_| {
                        let updates: Vec<_> = bucket
                            .iter()
                            .map(|(i, _)| motion::next_position(*i as usize, snapshot))
                            .collect();

                        kept.reserve(bucket.len());
                        for ((index, mut agent), update) in bucket.into_iter().zip(updates) {
                            let destination = partition.region_of(update.position);
                            if destination == r {
                                agent.commit(update, policy);
                                kept.push((index, agent));
                            } else {
                                let handoff = Handoff {
                                    index,
                                    agent,
                                    update,
                                };
                                if senders[destination].send(handoff).is_err() {
                                    error!("Region {destination} inbox closed, agent {index} dropped");
                                }
                                *sent += 1;
                            }
                        }
                    });
                }
            });

            pool.scope(|s| {
                for (inbox, (kept, _)) in inboxes.iter().zip(owned.iter_mut()) {
                    s.spawn(move |_| {
                        for Handoff {
                            index,
                            mut agent,
                            update,
                        } in inbox.try_iter()
                        {
                            agent.commit(update, policy);
                            kept.push((index, agent));
                        }
                    });
                }
            });
        }));
        result.map_err(|_| SimulationError::WorkerPanicked)?;

        let mut restored: Vec<Option<Agent>> = (0..agent_count).map(|_| None).collect();
        self.handoffs = 0;

        for (region, (kept, sent)) in self.regions.iter_mut().zip(owned) {
            self.handoffs += sent;

            region.members.clear();
            for (index, agent) in kept {
                region.members.push(index);
                let slot = restored.get_mut(index as usize).ok_or_else(|| {
                    SimulationError::Ownership(format!("agent index {index} out of range"))
                })?;
                if slot.replace(agent).is_some() {
                    return Err(SimulationError::Ownership(format!(
                        "agent {index} returned by two regions"
                    )));
                }
            }
            region.members.sort_unstable();
        }

        for (i, agent) in restored.into_iter().enumerate() {
            let agent = agent.ok_or_else(|| {
                SimulationError::Ownership(format!("agent {i} was lost during handoff"))
            })?;
            agents.push(agent);
        }

        debug!("{} agents changed region", self.handoffs);
        Ok(())
    }

    fn set_threads(&mut self, threads: usize, agents: &[Agent]) -> Result<(), SimulationError> {
        let (width, height) = (self.partition.width, self.partition.height);
        self.repartition(width, height, threads, agents)
    }

    fn handoffs(&self) -> Option<usize> {
        Some(self.handoffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        motion::tests::{agent, world},
        strategies::SequentialStrategy,
    };

    #[test]
    fn test_partition_covers_world() {
        let partition = RegionPartition::new(10, 7, 3, 2);
        assert_eq!(partition.len(), 6);

        for y in 0..7 {
            for x in 0..10 {
                let cell = ivec2(x, y);
                let owners: Vec<_> = (0..partition.len())
                    .filter(|&r| {
                        let (min, max) = partition.bounds(r);
                        cell.cmpge(min).all() && cell.cmplt(max).all()
                    })
                    .collect();
                assert_eq!(owners, vec![partition.region_of(cell)]);
            }
        }
    }

    #[test]
    fn test_partition_for_threads() {
        assert_eq!(RegionPartition::for_threads(100, 100, 4).grid(), (2, 2));
        assert_eq!(RegionPartition::for_threads(100, 100, 6).grid(), (3, 2));
        assert_eq!(RegionPartition::for_threads(100, 100, 7).grid(), (7, 1));
        assert_eq!(RegionPartition::for_threads(100, 100, 1).grid(), (1, 1));
        assert_eq!(RegionPartition::for_threads(2, 2, 16).grid(), (2, 2));
    }

    #[test]
    fn test_handoff_keeps_every_agent_once() {
        // Agents sweep across the vertical split at x = 5 in both directions.
        let world = world(10, &[(9.0, 5.0, 0.5), (0.0, 5.0, 0.5)]);
        let mut agents: Vec<_> = (0..10)
            .map(|i| agent(i, 3 + (i as i32 % 4), i as i32, &[(i % 2) as usize, 1 - (i % 2) as usize]))
            .collect();
        let mut reference = agents.clone();

        let mut region = RegionStrategy::new(&world, &agents, 2, Some([2, 1])).unwrap();
        let mut sequential = SequentialStrategy;
        let mut snapshot = Snapshot::new(world.clone());
        let mut total_handoffs = 0;

        for _ in 0..12 {
            snapshot.capture(&agents);
            region.step(&mut agents, &snapshot).unwrap();
            total_handoffs += region.handoffs().unwrap();

            snapshot.capture(&reference);
            sequential.step(&mut reference, &snapshot).unwrap();

            assert_eq!(agents, reference);

            let mut owned: Vec<u32> = region
                .regions()
                .iter()
                .flat_map(|r| r.members.iter().copied())
                .collect();
            owned.sort_unstable();
            assert_eq!(owned, (0..agents.len() as u32).collect::<Vec<_>>());

            for r in region.regions() {
                for &i in &r.members {
                    assert!(r.contains(agents[i as usize].position));
                }
            }
        }

        assert!(total_handoffs > 0);
    }

    #[test]
    fn test_set_threads_repartitions() {
        let world = world(8, &[(0.0, 0.0, 0.5)]);
        let agents = vec![agent(0, 1, 1, &[0]), agent(1, 6, 6, &[0])];

        let mut region = RegionStrategy::new(&world, &agents, 1, None).unwrap();
        assert_eq!(region.regions().len(), 1);

        assert_eq!(region.workers(), 1);

        region.set_threads(4, &agents).unwrap();
        assert_eq!(region.partition().grid(), (2, 2));
        assert_eq!(region.workers(), 4);
        assert_eq!(region.regions()[0].members, vec![0]);
        assert_eq!(region.regions()[3].members, vec![1]);
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let world = world(8, &[(0.0, 0.0, 0.5)]);
        let mut agents: Vec<_> = (0..6).map(|i| agent(i, i as i32, i as i32, &[0])).collect();
        let mut region = RegionStrategy::new(&world, &agents, 2, Some([2, 1])).unwrap();

        // Stale snapshot: the worker owning agents 2.. indexes past its end.
        let mut snapshot = Snapshot::new(world);
        snapshot.capture(&agents[..2]);

        let result = region.step(&mut agents, &snapshot);
        assert!(matches!(result, Err(SimulationError::WorkerPanicked)));
    }
}
