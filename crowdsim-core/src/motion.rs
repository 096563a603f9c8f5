//! Per-agent motion update shared by every execution strategy.
//!
//! An update reads only the previous tick through [`Snapshot`] and returns an
//! [`AgentUpdate`]; strategies commit updates after every agent of the tick
//! has been computed. Conflicts over a free cell are settled in favour of the
//! lowest agent id, so the outcome does not depend on processing order.

use std::sync::Arc;

use glam::{ivec2, IVec2, Vec2};

use crate::{
    agent::{Agent, World},
    occupancy::OccupancyGrid,
};

/// Agents farther apart than this (Chebyshev) can never want the same cell.
pub const CONTEST_RANGE: i32 = 2;

/// Previous-tick state of one agent, as seen by every update of the current tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentState {
    pub id: u32,
    pub position: IVec2,
    pub waypoint: usize,
    pub next_waypoint: usize,
    pub radius: f32,
}

impl From<&Agent> for AgentState {
    fn from(agent: &Agent) -> Self {
        AgentState {
            id: agent.id,
            position: agent.position,
            waypoint: agent.current_waypoint(),
            next_waypoint: agent.next_waypoint(),
            radius: agent.radius,
        }
    }
}

/// Immutable view of the previous tick.
pub struct Snapshot {
    pub world: Arc<World>,
    pub agents: Vec<AgentState>,
    pub occupancy: OccupancyGrid,
}

impl Snapshot {
    pub fn new(world: Arc<World>) -> Self {
        let occupancy = OccupancyGrid::new(world.shape());

        Snapshot {
            world,
            agents: Vec::new(),
            occupancy,
        }
    }

    /// Overwrite the snapshot with the committed state of `agents`.
    pub fn capture(&mut self, agents: &[Agent]) {
        self.agents.clear();
        self.agents.extend(agents.iter().map(AgentState::from));
        self.occupancy
            .update(self.agents.iter().map(|state| state.position));
    }

    /// Inside the world and not occupied during the previous tick.
    pub fn is_free(&self, cell: IVec2) -> bool {
        self.world.contains(cell) && !self.occupancy.is_occupied(cell)
    }
}

/// Where an agent wants to go, derived from its own previous state only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plan {
    pub reached: bool,
    pub desired: IVec2,
    candidates: [IVec2; 3],
    count: usize,
}

impl Plan {
    fn stay(position: IVec2, reached: bool) -> Self {
        Plan {
            reached,
            desired: position,
            candidates: [position; 3],
            count: 0,
        }
    }

    /// Build the candidate list for a one-cell step from `position` to `desired`.
    pub fn step(position: IVec2, desired: IVec2, reached: bool) -> Self {
        let step = desired - position;
        let candidates = if step == IVec2::ZERO {
            return Plan::stay(position, reached);
        } else if step.x != 0 && step.y != 0 {
            [
                desired,
                position + ivec2(step.x, 0),
                position + ivec2(0, step.y),
            ]
        } else if step.x == 0 {
            [
                desired,
                position + ivec2(1, step.y),
                position + ivec2(-1, step.y),
            ]
        } else {
            [
                desired,
                position + ivec2(step.x, 1),
                position + ivec2(step.x, -1),
            ]
        };

        Plan {
            reached,
            desired,
            candidates,
            count: 3,
        }
    }

    /// Destination cells in order of preference.
    pub fn candidates(&self) -> &[IVec2] {
        &self.candidates[..self.count]
    }
}

/// Result of one agent's motion update, committed by the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentUpdate {
    pub position: IVec2,
    pub desired: IVec2,
    pub reached: bool,
}

/// Offset from a cell to a target and its length.
#[inline]
pub fn offset(position: IVec2, target: Vec2) -> (f32, f32, f32) {
    let dx = target.x - position.x as f32;
    let dy = target.y - position.y as f32;
    (dx, dy, (dx * dx + dy * dy).sqrt())
}

/// One coordinate of `position + direction`, rounded to a cell.
#[inline]
pub fn step_coordinate(position: i32, delta: f32, length: f32) -> i32 {
    (position as f32 + delta / length).round() as i32
}

pub fn plan(state: &AgentState, world: &World) -> Plan {
    let position = state.position;
    let waypoint = &world.waypoints[state.waypoint];

    let (mut dx, mut dy, mut length) = offset(position, waypoint.position);
    let reached = length <= waypoint.radius + state.radius;
    if reached {
        (dx, dy, length) = offset(position, world.waypoints[state.next_waypoint].position);
    }

    if length == 0.0 {
        return Plan::stay(position, reached);
    }

    let desired = ivec2(
        step_coordinate(position.x, dx, length),
        step_coordinate(position.y, dy, length),
    );
    Plan::step(position, desired, reached)
}

/// Pick the cell agent `index` moves to, given its own plan.
///
/// `plan_of` yields the plan of any other agent; callers either recompute it
/// or look it up from a precomputed table.
pub fn resolve(
    index: usize,
    own: &Plan,
    snapshot: &Snapshot,
    plan_of: impl Fn(usize) -> Plan,
) -> IVec2 {
    let state = &snapshot.agents[index];

    own.candidates()
        .iter()
        .copied()
        .find(|&cell| snapshot.is_free(cell) && !is_contested(cell, state, snapshot, &plan_of))
        .unwrap_or(state.position)
}

/// Whether a lower-id agent also lists the free `cell` as a candidate.
fn is_contested(
    cell: IVec2,
    state: &AgentState,
    snapshot: &Snapshot,
    plan_of: &impl Fn(usize) -> Plan,
) -> bool {
    for y in -CONTEST_RANGE..=CONTEST_RANGE {
        for x in -CONTEST_RANGE..=CONTEST_RANGE {
            let neighbors = snapshot.occupancy.agents_at(state.position + ivec2(x, y));
            for &j in neighbors {
                let j = j as usize;
                if snapshot.agents[j].id < state.id && plan_of(j).candidates().contains(&cell) {
                    return true;
                }
            }
        }
    }

    false
}

/// Motion update of agent `index` against the previous tick.
pub fn next_position(index: usize, snapshot: &Snapshot) -> AgentUpdate {
    let world = &snapshot.world;
    let own = plan(&snapshot.agents[index], world);
    let position = resolve(index, &own, snapshot, |j| plan(&snapshot.agents[j], world));

    AgentUpdate {
        position,
        desired: own.desired,
        reached: own.reached,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use glam::vec2;

    use super::*;
    use crate::agent::{Waypoint, WaypointPolicy};

    pub fn world(size: i32, waypoints: &[(f32, f32, f32)]) -> Arc<World> {
        Arc::new(World {
            width: size,
            height: size,
            waypoints: waypoints
                .iter()
                .enumerate()
                .map(|(id, &(x, y, radius))| Waypoint {
                    id: id as u32,
                    position: vec2(x, y),
                    radius,
                })
                .collect(),
            policy: WaypointPolicy::Repeat,
        })
    }

    pub fn agent(id: u32, x: i32, y: i32, waypoints: &[usize]) -> Agent {
        Agent {
            id,
            position: ivec2(x, y),
            desired: ivec2(x, y),
            waypoints: waypoints.iter().copied().collect::<VecDeque<_>>(),
            radius: 0.0,
        }
    }

    fn snapshot(world: Arc<World>, agents: &[Agent]) -> Snapshot {
        let mut snapshot = Snapshot::new(world);
        snapshot.capture(agents);
        snapshot
    }

    #[test]
    fn test_free_path() {
        let snapshot = snapshot(world(10, &[(5.0, 0.0, 0.5)]), &[agent(0, 0, 0, &[0])]);

        let own = plan(&snapshot.agents[0], &snapshot.world);
        assert_eq!(own.desired, ivec2(1, 0));
        assert_eq!(own.candidates(), &[ivec2(1, 0), ivec2(1, 1), ivec2(1, -1)]);

        let update = next_position(0, &snapshot);
        assert_eq!(update.position, ivec2(1, 0));
        assert!(!update.reached);
    }

    #[test]
    fn test_diagonal_candidates() {
        let own = Plan::step(ivec2(2, 2), ivec2(3, 1), false);
        assert_eq!(own.candidates(), &[ivec2(3, 1), ivec2(3, 2), ivec2(2, 1)]);

        let own = Plan::step(ivec2(2, 2), ivec2(2, 1), false);
        assert_eq!(own.candidates(), &[ivec2(2, 1), ivec2(3, 1), ivec2(1, 1)]);
    }

    #[test]
    fn test_occupied_cell_falls_back() {
        let snapshot = snapshot(
            world(10, &[(5.0, 0.0, 0.5), (1.0, 5.0, 0.5)]),
            &[agent(0, 0, 0, &[0]), agent(1, 1, 0, &[1])],
        );

        // (1, 0) is taken, so agent 0 steps to its first alternative.
        assert_eq!(next_position(0, &snapshot).position, ivec2(1, 1));
        // Agent 1 wants (1, 1) too but yields to the lower id.
        let update = next_position(1, &snapshot);
        assert_eq!(update.desired, ivec2(1, 1));
        assert_eq!(update.position, ivec2(2, 1));
    }

    #[test]
    fn test_lower_id_wins_every_candidate() {
        let snapshot = snapshot(
            world(10, &[(9.0, 1.0, 0.5), (0.0, 1.0, 0.5)]),
            &[agent(0, 0, 1, &[0]), agent(1, 2, 1, &[1])],
        );

        assert_eq!(next_position(0, &snapshot).position, ivec2(1, 1));
        assert_eq!(next_position(1, &snapshot).position, ivec2(2, 1));
    }

    #[test]
    fn test_blocked_by_world_edge() {
        let snapshot = snapshot(world(10, &[(-5.0, 0.0, 0.5)]), &[agent(0, 0, 0, &[0])]);

        let update = next_position(0, &snapshot);
        assert_eq!(update.desired, ivec2(-1, 0));
        assert_eq!(update.position, ivec2(0, 0));
    }

    #[test]
    fn test_reached_waypoint_heads_to_next() {
        let snapshot = snapshot(
            world(10, &[(3.5, 3.0, 1.0), (3.0, 8.0, 1.0)]),
            &[agent(0, 3, 3, &[0, 1])],
        );

        let update = next_position(0, &snapshot);
        assert!(update.reached);
        assert_eq!(update.desired, ivec2(3, 4));
        assert_eq!(update.position, ivec2(3, 4));
    }

    #[test]
    fn test_standing_on_waypoint() {
        let snapshot = snapshot(world(10, &[(4.0, 4.0, 1.0)]), &[agent(0, 4, 4, &[0])]);

        let update = next_position(0, &snapshot);
        assert!(update.reached);
        assert_eq!(update.position, ivec2(4, 4));
    }

    #[test]
    fn test_update_is_order_independent() {
        let agents: Vec<_> = (0..6)
            .map(|i| agent(i, 2 + (i as i32 % 3), 2 + (i as i32 / 3), &[(i % 2) as usize]))
            .collect();
        let snapshot = snapshot(world(8, &[(7.0, 7.0, 0.5), (0.0, 0.0, 0.5)]), &agents);

        let forward: Vec<_> = (0..agents.len())
            .map(|i| next_position(i, &snapshot))
            .collect();
        let mut backward: Vec<_> = (0..agents.len())
            .rev()
            .map(|i| next_position(i, &snapshot))
            .collect();
        backward.reverse();

        assert_eq!(forward, backward);

        let mut cells: Vec<_> = forward.iter().map(|u| (u.position.x, u.position.y)).collect();
        cells.sort();
        cells.dedup();
        assert_eq!(cells.len(), agents.len());
    }
}
