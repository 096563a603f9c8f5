pub mod agent;
pub mod benchmark;
pub mod diagnostic;
pub mod error;
pub mod heatmap;
pub mod motion;
pub mod occupancy;
pub mod scenario;
pub mod strategies;
pub mod util;

use std::{sync::Arc, time::Instant};

use glam::{ivec2, IVec2};
use log::{info, warn};
use rustc_hash::FxHashMap;

use agent::{Agent, AgentSpec, Waypoint, WaypointPolicy, World};
use diagnostic::{DiagnosticLog, HeatmapTimings, StepMetrics};
use error::{ConfigurationError, InvalidThreadCountWarning, SimulationError};
use heatmap::{Heatmap, HeatmapBackend, StageBackends, DEFAULT_SCALE};
use motion::Snapshot;
use strategies::{ExecutionStrategy, Strategy};

/// Crowd model bound to one execution strategy for its whole lifetime.
pub struct Model {
    world: Arc<World>,
    agents: Vec<Agent>,
    snapshot: Snapshot,
    strategy: Box<dyn ExecutionStrategy>,
    threads: usize,
    heatmap: Option<Heatmap>,
    tick_count: u64,
    aborted: bool,
    diagnostic_log: DiagnosticLog,
}

impl Model {
    /// Validate the scenario input and build the strategy. No partial model
    /// is returned on failure.
    pub fn setup(
        agents: Vec<AgentSpec>,
        waypoints: Vec<Waypoint>,
        strategy: Strategy,
        options: ModelOptions,
    ) -> Result<Self, SimulationError> {
        let instant = Instant::now();

        let agents = resolve_agents(agents, &waypoints)?;
        let world = Arc::new(build_world(&agents, waypoints, &options)?);

        let threads = match options.threads {
            Some(hint) => {
                let (threads, warning) = util::resolve_thread_count(hint);
                if let Some(warning) = warning {
                    warn!("{warning}");
                }
                threads
            }
            None => util::resolve_thread_count(0).0,
        };

        let executor = strategies::build(strategy, threads, &world, &agents, &options)?;

        let heatmap = match options.heatmap {
            true => {
                let backends = options
                    .heatmap_backends
                    .unwrap_or_else(|| StageBackends::uniform(HeatmapBackend::for_strategy(strategy)));
                Some(Heatmap::new(
                    world.shape(),
                    options.heatmap_scale,
                    backends,
                    options.gpu_work_size,
                )?)
            }
            false => None,
        };

        let mut diagnostic_log = DiagnosticLog::new(strategy, threads, agents.len());
        diagnostic_log.setup_metrics.time_setup = instant.elapsed().as_secs_f64();

        info!(
            "Model setup finished: {} agents, {} waypoints, {}x{} world",
            agents.len(),
            world.waypoints.len(),
            world.width,
            world.height
        );
        info!("Strategy: {strategy}, threads: {threads}");
        if let Some(heatmap) = &heatmap {
            info!("Heatmap backends: {:?}, scale: {}", heatmap.backends(), heatmap.scale());
        }

        Ok(Model {
            snapshot: Snapshot::new(world.clone()),
            world,
            agents,
            strategy: executor,
            threads,
            heatmap,
            tick_count: 0,
            aborted: false,
            diagnostic_log,
        })
    }

    /// Apply a worker count hint. Non-positive hints fall back to the
    /// hardware thread count; the returned warning has already been logged.
    pub fn set_thread_num(
        &mut self,
        hint: i32,
    ) -> Result<Option<InvalidThreadCountWarning>, SimulationError> {
        let (threads, warning) = util::resolve_thread_count(hint);
        if let Some(warning) = &warning {
            warn!("{warning}");
        }

        self.strategy.set_threads(threads, &self.agents)?;
        self.threads = threads;
        self.diagnostic_log.threads = threads;

        Ok(warning)
    }

    /// Advance every agent by one step, then rebuild the heatmap.
    pub fn tick(&mut self) -> Result<StepMetrics, SimulationError> {
        if self.aborted {
            return Err(SimulationError::Aborted);
        }

        let result = self.advance();
        if result.is_err() {
            self.aborted = true;
        }
        result
    }

    fn advance(&mut self) -> Result<StepMetrics, SimulationError> {
        let instant = Instant::now();
        self.snapshot.capture(&self.agents);
        let time_snapshot = instant.elapsed().as_secs_f64();

        let instant = Instant::now();
        self.strategy.step(&mut self.agents, &self.snapshot)?;
        let time_step = instant.elapsed().as_secs_f64();

        let instant = Instant::now();
        if let Some(heatmap) = &mut self.heatmap {
            let positions: Vec<IVec2> = self.agents.iter().map(|a| a.position).collect();
            heatmap.update(&positions, &mut self.diagnostic_log.heatmap_timings)?;
        }
        let time_heatmap = instant.elapsed().as_secs_f64();

        self.tick_count += 1;

        let metrics = StepMetrics {
            agent_count: self.agents.len(),
            time_snapshot,
            time_step,
            time_kernel: self.strategy.kernel_time(),
            time_heatmap,
            handoffs: self.strategy.handoffs(),
        };
        self.diagnostic_log.push(metrics.clone());

        Ok(metrics)
    }

    /// Run `ticks` ticks back to back.
    pub fn run(&mut self, ticks: u64) -> Result<(), SimulationError> {
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn positions(&self) -> impl Iterator<Item = IVec2> + '_ {
        self.agents.iter().map(|a| a.position)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy.kind()
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Heatmap of the last completed tick. `None` when disabled.
    pub fn heatmap(&self) -> Option<&Heatmap> {
        self.heatmap.as_ref()
    }

    /// Cumulative heatmap stage times since setup, in milliseconds.
    pub fn timings(&self) -> &HeatmapTimings {
        &self.diagnostic_log.heatmap_timings
    }

    pub fn diagnostic_log(&self) -> &DiagnosticLog {
        &self.diagnostic_log
    }
}

/// Map waypoint ids to indices and check every reference.
fn resolve_agents(
    specs: Vec<AgentSpec>,
    waypoints: &[Waypoint],
) -> Result<Vec<Agent>, ConfigurationError> {
    if specs.is_empty() {
        return Err(ConfigurationError::EmptyAgents);
    }

    let mut index = FxHashMap::default();
    for (i, waypoint) in waypoints.iter().enumerate() {
        if index.insert(waypoint.id, i).is_some() {
            return Err(ConfigurationError::DuplicateWaypoint(waypoint.id));
        }
    }

    specs
        .into_iter()
        .enumerate()
        .map(|(i, spec)| {
            let id = i as u32;
            if spec.waypoints.is_empty() {
                return Err(ConfigurationError::NoWaypoints { agent: id });
            }
            let queue = spec
                .waypoints
                .iter()
                .map(|waypoint| {
                    index
                        .get(waypoint)
                        .copied()
                        .ok_or(ConfigurationError::UnknownWaypoint {
                            agent: id,
                            waypoint: *waypoint,
                        })
                })
                .collect::<Result<_, _>>()?;

            Ok(Agent {
                id,
                position: spec.position,
                desired: spec.position,
                waypoints: queue,
                radius: spec.radius,
            })
        })
        .collect()
}

fn build_world(
    agents: &[Agent],
    waypoints: Vec<Waypoint>,
    options: &ModelOptions,
) -> Result<World, ConfigurationError> {
    let [width, height] = match options.world_size {
        Some(size) => size,
        None => {
            let extent = agents
                .iter()
                .map(|a| a.position)
                .chain(
                    waypoints
                        .iter()
                        .map(|w| ivec2(w.position.x.ceil() as i32, w.position.y.ceil() as i32)),
                )
                .fold(IVec2::ZERO, IVec2::max);
            [extent.x + 1, extent.y + 1]
        }
    };
    if width <= 0 || height <= 0 {
        return Err(ConfigurationError::InvalidWorld { width, height });
    }

    let world = World {
        width,
        height,
        waypoints,
        policy: options.policy,
    };
    if let Some(agent) = agents.iter().find(|a| !world.contains(a.position)) {
        return Err(ConfigurationError::OutOfWorld {
            agent: agent.id,
            x: agent.position.x,
            y: agent.position.y,
            width,
            height,
        });
    }

    Ok(world)
}

/// Model options.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// World size in cells, [width, height]. Derived from the scenario extent when absent.
    pub world_size: Option<[i32; 2]>,
    /// What happens to a waypoint once it is reached.
    pub policy: WaypointPolicy,
    /// Worker count hint. Hardware thread count when absent.
    pub threads: Option<i32>,
    /// Whether to build the heatmap every tick.
    pub heatmap: bool,
    /// Integer upscaling factor of the heatmap.
    pub heatmap_scale: usize,
    /// Heatmap backend per stage. Chosen from the strategy when absent.
    pub heatmap_backends: Option<StageBackends>,
    /// Local workgroup size of GPU kernels.
    pub gpu_work_size: usize,
    /// Region grid as [columns, rows]. Chosen from the thread count when absent.
    pub region_grid: Option<[usize; 2]>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        ModelOptions {
            world_size: None,
            policy: WaypointPolicy::Repeat,
            threads: None,
            heatmap: true,
            heatmap_scale: DEFAULT_SCALE,
            heatmap_backends: None,
            gpu_work_size: 64,
            region_grid: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;

    use super::*;

    fn waypoints() -> Vec<Waypoint> {
        vec![
            Waypoint {
                id: 7,
                position: vec2(9.0, 9.0),
                radius: 1.0,
            },
            Waypoint {
                id: 3,
                position: vec2(0.0, 4.0),
                radius: 1.0,
            },
        ]
    }

    fn spec(x: i32, y: i32, waypoints: &[u32]) -> AgentSpec {
        AgentSpec {
            position: ivec2(x, y),
            waypoints: waypoints.to_vec(),
            radius: 0.0,
        }
    }

    fn config_error(result: Result<Model, SimulationError>) -> ConfigurationError {
        match result {
            Err(SimulationError::Configuration(err)) => err,
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("setup succeeded"),
        }
    }

    #[test]
    fn test_setup_validation() {
        let options = ModelOptions::default;

        let err = Model::setup(Vec::new(), waypoints(), Strategy::Sequential, options());
        assert_eq!(config_error(err), ConfigurationError::EmptyAgents);

        let err = Model::setup(vec![spec(0, 0, &[7, 5])], waypoints(), Strategy::Sequential, options());
        assert_eq!(
            config_error(err),
            ConfigurationError::UnknownWaypoint {
                agent: 0,
                waypoint: 5
            }
        );

        let err = Model::setup(vec![spec(0, 0, &[])], waypoints(), Strategy::Sequential, options());
        assert_eq!(config_error(err), ConfigurationError::NoWaypoints { agent: 0 });

        let mut duplicated = waypoints();
        duplicated[1].id = 7;
        let err = Model::setup(vec![spec(0, 0, &[7])], duplicated, Strategy::Sequential, options());
        assert_eq!(config_error(err), ConfigurationError::DuplicateWaypoint(7));

        let sized = ModelOptions {
            world_size: Some([5, 5]),
            ..options()
        };
        let err = Model::setup(vec![spec(6, 1, &[7])], waypoints(), Strategy::Sequential, sized);
        assert!(matches!(config_error(err), ConfigurationError::OutOfWorld { agent: 0, .. }));

        let empty = ModelOptions {
            world_size: Some([0, 5]),
            ..options()
        };
        let err = Model::setup(vec![spec(0, 0, &[7])], waypoints(), Strategy::Sequential, empty);
        assert!(matches!(config_error(err), ConfigurationError::InvalidWorld { .. }));
    }

    #[test]
    fn test_world_from_extent() {
        let model = Model::setup(
            vec![spec(2, 12, &[3, 7])],
            waypoints(),
            Strategy::Sequential,
            ModelOptions::default(),
        )
        .unwrap();

        assert_eq!((model.world().width, model.world().height), (10, 13));
        assert_eq!(model.agents()[0].waypoints, [1, 0]);
    }

    #[test]
    fn test_tick_records_metrics() {
        let mut model = Model::setup(
            vec![spec(0, 0, &[7]), spec(5, 5, &[3])],
            waypoints(),
            Strategy::Sequential,
            ModelOptions::default(),
        )
        .unwrap();

        for expected in 1..=3 {
            let metrics = model.tick().unwrap();
            assert_eq!(model.tick_count(), expected);
            assert_eq!(metrics.agent_count, 2);
            assert_eq!(metrics.handoffs, None);
        }

        let heatmap = model.heatmap().unwrap();
        assert_eq!(heatmap.splats(), 2);
        assert_eq!(model.timings().ticks, 3);
        assert_eq!(model.diagnostic_log().total_steps, 3);
    }

    #[test]
    fn test_set_thread_num_warns_on_non_positive() {
        let mut model = Model::setup(
            vec![spec(0, 0, &[7])],
            waypoints(),
            Strategy::ThreadPool,
            ModelOptions {
                threads: Some(2),
                heatmap: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(model.threads(), 2);
        assert!(model.heatmap().is_none());

        assert_eq!(model.set_thread_num(3).unwrap(), None);
        assert_eq!(model.threads(), 3);

        let warning = model.set_thread_num(-1).unwrap().unwrap();
        assert_eq!(warning.requested, -1);
        assert_eq!(model.threads(), warning.fallback);
        model.tick().unwrap();
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn test_gpu_unavailable_fails_setup() {
        let result = Model::setup(
            vec![spec(0, 0, &[7])],
            waypoints(),
            Strategy::GpuOffload,
            ModelOptions::default(),
        );
        assert!(matches!(result, Err(SimulationError::ResourceUnavailable(_))));
    }
}
