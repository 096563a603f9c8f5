use glam::{ivec2, IVec2};
use ndarray::{Array1, Zip};
use rustc_hash::FxHashMap;

use crate::{
    agent::Agent,
    error::SimulationError,
    motion::{self, AgentUpdate, Plan, Snapshot},
};

use super::{commit_all, ExecutionStrategy, Strategy};

/// Structure-of-arrays variant.
///
/// Destinations and desired cells are computed with element-wise array
/// operations over all agents at once. Agents whose desired cell is free and
/// wanted by nobody else commit straight away; the rest go through the
/// scalar conflict resolution.
#[derive(Default)]
pub struct VectorizedStrategy {
    plans: Vec<Plan>,
    claims: FxHashMap<IVec2, u32>,
}

/// Per-agent columns gathered from the snapshot.
struct Lanes {
    x: Array1<f32>,
    y: Array1<f32>,
    target_x: Array1<f32>,
    target_y: Array1<f32>,
    reach: Array1<f32>,
    next_x: Array1<f32>,
    next_y: Array1<f32>,
}

impl Lanes {
    fn gather(snapshot: &Snapshot) -> Self {
        let agents = &snapshot.agents;
        let waypoints = &snapshot.world.waypoints;
        let column = |f: &dyn Fn(usize) -> f32| Array1::from_iter((0..agents.len()).map(f));

        Lanes {
            x: column(&|i| agents[i].position.x as f32),
            y: column(&|i| agents[i].position.y as f32),
            target_x: column(&|i| waypoints[agents[i].waypoint].position.x),
            target_y: column(&|i| waypoints[agents[i].waypoint].position.y),
            reach: column(&|i| waypoints[agents[i].waypoint].radius + agents[i].radius),
            next_x: column(&|i| waypoints[agents[i].next_waypoint].position.x),
            next_y: column(&|i| waypoints[agents[i].next_waypoint].position.y),
        }
    }

    /// Desired cells and arrival flags for every lane.
    fn desired(&self) -> (Array1<i32>, Array1<i32>, Array1<bool>) {
        let mut dx = &self.target_x - &self.x;
        let mut dy = &self.target_y - &self.y;
        let mut length = (&dx * &dx + &dy * &dy).mapv(f32::sqrt);
        let reached = Zip::from(&length)
            .and(&self.reach)
            .map_collect(|&length, &reach| length <= reach);

        let next_dx = &self.next_x - &self.x;
        let next_dy = &self.next_y - &self.y;
        let next_length = (&next_dx * &next_dx + &next_dy * &next_dy).mapv(f32::sqrt);

        Zip::from(&mut dx)
            .and(&next_dx)
            .and(&reached)
            .for_each(|d, &next, &r| {
                if r {
                    *d = next
                }
            });
        Zip::from(&mut dy)
            .and(&next_dy)
            .and(&reached)
            .for_each(|d, &next, &r| {
                if r {
                    *d = next
                }
            });
        Zip::from(&mut length)
            .and(&next_length)
            .and(&reached)
            .for_each(|l, &next, &r| {
                if r {
                    *l = next
                }
            });

        let step = |p: &f32, d: &f32, l: &f32| {
            if *l == 0.0 {
                *p as i32
            } else {
                (*p + *d / *l).round() as i32
            }
        };
        let desired_x = Zip::from(&self.x).and(&dx).and(&length).map_collect(step);
        let desired_y = Zip::from(&self.y).and(&dy).and(&length).map_collect(step);

        (desired_x, desired_y, reached)
    }
}

impl ExecutionStrategy for VectorizedStrategy {
    fn kind(&self) -> Strategy {
        Strategy::Vectorized
    }

    fn step(&mut self, agents: &mut Vec<Agent>, snapshot: &Snapshot) -> Result<(), SimulationError> {
        let (desired_x, desired_y, reached) = Lanes::gather(snapshot).desired();

        self.plans.clear();
        self.plans.extend(snapshot.agents.iter().enumerate().map(|(i, state)| {
            Plan::step(state.position, ivec2(desired_x[i], desired_y[i]), reached[i])
        }));

        self.claims.clear();
        for plan in &self.plans {
            for &cell in plan.candidates() {
                if snapshot.is_free(cell) {
                    *self.claims.entry(cell).or_default() += 1;
                }
            }
        }

        let plans = &self.plans;
        let updates: Vec<_> = plans
            .iter()
            .enumerate()
            .map(|(i, plan)| {
                let uncontested = plan.candidates().first().is_some_and(|&cell| {
                    snapshot.is_free(cell) && self.claims.get(&cell) == Some(&1)
                });
                let position = if uncontested {
                    plan.desired
                } else {
                    motion::resolve(i, plan, snapshot, |j| plans[j])
                };

                AgentUpdate {
                    position,
                    desired: plan.desired,
                    reached: plan.reached,
                }
            })
            .collect();

        commit_all(agents, updates, &snapshot.world);
        Ok(())
    }
}
