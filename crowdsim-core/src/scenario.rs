use glam::{ivec2, IVec2, Vec2};
use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::{
    agent::{AgentSpec, Waypoint, WaypointPolicy},
    error::ConfigurationError,
    ModelOptions,
};

/// Random draws per agent before scanning the spread rectangle in order.
const SPAWN_ATTEMPTS: usize = 32;

const fn one() -> u32 {
    1
}

/// Scenario data
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub world: WorldConfig,
    pub waypoints: Vec<WaypointConfig>,
    pub agents: Vec<AgentGroupConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct WorldConfig {
    /// [width, height] in cells.
    pub size: Option<[i32; 2]>,
    #[serde(default)]
    pub policy: WaypointPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaypointConfig {
    pub id: u32,
    pub position: Vec2,
    pub radius: f32,
}

/// `count` agents placed on distinct cells within `spread` cells of `position`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentGroupConfig {
    pub position: IVec2,
    pub waypoints: Vec<u32>,
    #[serde(default = "one")]
    pub count: u32,
    #[serde(default)]
    pub spread: IVec2,
    #[serde(default)]
    pub radius: f32,
}

impl AgentGroupConfig {
    /// `position` if free, else a random free cell within `spread`, else the
    /// first free cell in row-major order. `None` once the rectangle is full.
    fn spawn_cell(&self, rng: &mut fastrand::Rng, taken: &FxHashSet<IVec2>) -> Option<IVec2> {
        let spread = self.spread;
        if !taken.contains(&self.position) {
            return Some(self.position);
        }

        (0..SPAWN_ATTEMPTS)
            .map(|_| {
                self.position
                    + ivec2(
                        rng.i32(-spread.x..=spread.x),
                        rng.i32(-spread.y..=spread.y),
                    )
            })
            .find(|cell| !taken.contains(cell))
            .or_else(|| {
                (-spread.y..=spread.y)
                    .flat_map(|y| (-spread.x..=spread.x).map(move |x| ivec2(x, y)))
                    .map(|offset| self.position + offset)
                    .find(|cell| !taken.contains(cell))
            })
    }
}

impl Scenario {
    /// Expand agent groups, one free cell per agent. Placement is seeded,
    /// so the same scenario always yields the same agents.
    pub fn agents(&self) -> Result<Vec<AgentSpec>, ConfigurationError> {
        let mut rng = fastrand::Rng::with_seed(0);
        let mut taken = FxHashSet::default();
        let mut agents = Vec::new();

        for (g, group) in self.agents.iter().enumerate() {
            if group.spread.cmplt(IVec2::ZERO).any() {
                return Err(ConfigurationError::InvalidGroup {
                    group: g,
                    reason: "spread must not be negative",
                });
            }

            for _ in 0..group.count {
                let position = group.spawn_cell(&mut rng, &taken).ok_or(
                    ConfigurationError::InvalidGroup {
                        group: g,
                        reason: "not enough free cells within spread",
                    },
                )?;
                taken.insert(position);

                agents.push(AgentSpec {
                    position,
                    waypoints: group.waypoints.clone(),
                    radius: group.radius,
                });
            }
        }

        Ok(agents)
    }

    pub fn waypoints(&self) -> Vec<Waypoint> {
        self.waypoints
            .iter()
            .map(|w| Waypoint {
                id: w.id,
                position: w.position,
                radius: w.radius,
            })
            .collect()
    }

    /// Default options carrying the world settings of this scenario.
    pub fn options(&self) -> ModelOptions {
        ModelOptions {
            world_size: self.world.size,
            policy: self.world.policy,
            ..Default::default()
        }
    }
}
