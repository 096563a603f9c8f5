use std::collections::VecDeque;

use glam::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

use crate::motion::AgentUpdate;

/// Circular target region agents navigate toward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: u32,
    pub position: Vec2,
    pub radius: f32,
}

/// What happens to a waypoint once its agent reaches it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointPolicy {
    /// Move the reached waypoint to the tail of the queue.
    #[default]
    Repeat,
    /// Drop the reached waypoint unless it is the last one left.
    Discard,
}

/// Agent as supplied by the scenario loader. Waypoints are referenced by id.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub position: IVec2,
    pub waypoints: Vec<u32>,
    pub radius: f32,
}

/// Pedestrian instance
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    /// Priority for conflict resolution, lower wins.
    pub id: u32,
    pub position: IVec2,
    /// Cell the agent wanted to step into during the last tick.
    pub desired: IVec2,
    /// Indices into [`World::waypoints`], head is the current destination.
    pub waypoints: VecDeque<usize>,
    /// Added to the waypoint radius when testing arrival.
    pub radius: f32,
}

impl Agent {
    /// Waypoint index the agent is currently heading to.
    pub fn current_waypoint(&self) -> usize {
        self.waypoints[0]
    }

    /// Waypoint index that becomes current once the head is reached.
    pub fn next_waypoint(&self) -> usize {
        self.waypoints
            .get(1)
            .copied()
            .unwrap_or(self.waypoints[0])
    }

    /// Apply the result of the motion update.
    pub fn commit(&mut self, update: AgentUpdate, policy: WaypointPolicy) {
        self.position = update.position;
        self.desired = update.desired;

        if update.reached {
            match policy {
                WaypointPolicy::Repeat => self.waypoints.rotate_left(1),
                WaypointPolicy::Discard => {
                    if self.waypoints.len() > 1 {
                        self.waypoints.pop_front();
                    }
                }
            }
        }
    }
}

/// Static part of the simulation shared by all agents.
#[derive(Debug, Clone)]
pub struct World {
    pub width: i32,
    pub height: i32,
    pub waypoints: Vec<Waypoint>,
    pub policy: WaypointPolicy,
}

impl World {
    pub fn contains(&self, cell: IVec2) -> bool {
        cell.x >= 0 && cell.y >= 0 && cell.x < self.width && cell.y < self.height
    }

    /// Shape of a cell grid covering the world (rows, columns).
    pub fn shape(&self) -> (usize, usize) {
        (self.height as usize, self.width as usize)
    }
}
