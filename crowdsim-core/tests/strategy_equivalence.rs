use crowdsim_core::{
    agent::{AgentSpec, Waypoint},
    error::{ConfigurationError, SimulationError},
    heatmap::{HeatmapBackend, StageBackends},
    scenario::Scenario,
    strategies::Strategy,
    Model, ModelOptions,
};
use glam::{ivec2, vec2, IVec2};

fn corners() -> (Vec<AgentSpec>, Vec<Waypoint>) {
    let waypoints = [(0.0, 0.0), (9.0, 0.0), (0.0, 9.0), (9.0, 9.0)]
        .iter()
        .enumerate()
        .map(|(id, &(x, y))| Waypoint {
            id: id as u32,
            position: vec2(x, y),
            radius: 1.0,
        })
        .collect();
    let agents = [(4, 4), (5, 4), (4, 5), (5, 5)]
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| AgentSpec {
            position: ivec2(x, y),
            waypoints: vec![i as u32],
            radius: 0.0,
        })
        .collect();
    (agents, waypoints)
}

fn crowd() -> Scenario {
    toml::from_str(
        r#"
        [world]
        size = [48, 32]

        [[waypoints]]
        id = 10
        position = [3.0, 3.0]
        radius = 2.0

        [[waypoints]]
        id = 20
        position = [44.0, 28.0]
        radius = 2.0

        [[waypoints]]
        id = 30
        position = [44.0, 3.0]
        radius = 1.5

        [[agents]]
        position = [12, 16]
        waypoints = [20, 30]
        count = 120
        spread = [8, 10]

        [[agents]]
        position = [36, 16]
        waypoints = [10, 20]
        count = 120
        spread = [8, 10]

        [[agents]]
        position = [24, 8]
        waypoints = [30, 10, 20]
        count = 60
        spread = [12, 4]
        "#,
    )
    .unwrap()
}

fn run(scenario: &Scenario, strategy: Strategy, threads: i32, ticks: u64) -> Vec<IVec2> {
    let options = ModelOptions {
        threads: Some(threads),
        ..scenario.options()
    };
    let mut model = Model::setup(scenario.agents().unwrap(), scenario.waypoints(), strategy, options).unwrap();
    model.run(ticks).unwrap();
    assert_eq!(model.tick_count(), ticks);
    model.positions().collect()
}

#[test]
fn test_corner_scenario_sequential_matches_thread_pool() {
    let mut results = Vec::new();

    for (strategy, threads) in [(Strategy::Sequential, 1), (Strategy::ThreadPool, 4)] {
        let (agents, waypoints) = corners();
        let options = ModelOptions {
            world_size: Some([10, 10]),
            threads: Some(threads),
            ..Default::default()
        };
        let mut model = Model::setup(agents, waypoints, strategy, options).unwrap();

        for _ in 0..10 {
            model.tick().unwrap();
            assert_eq!(model.heatmap().unwrap().splats(), 4);
        }
        assert_eq!(model.tick_count(), 10);
        results.push(model.positions().collect::<Vec<_>>());
    }

    assert_eq!(results[0], results[1]);
    for (position, corner) in results[0].iter().zip([(0, 0), (9, 0), (0, 9), (9, 9)]) {
        let distance = (*position - IVec2::from(corner)).abs();
        assert!(distance.max_element() <= 1, "{position} is not near {corner:?}");
    }
}

#[test]
fn test_cpu_strategies_are_equivalent() {
    let scenario = crowd();
    let reference = run(&scenario, Strategy::Sequential, 1, 40);

    for strategy in [
        Strategy::ForkJoin,
        Strategy::ThreadPool,
        Strategy::Vectorized,
        Strategy::RegionParallel,
    ] {
        for threads in [2, 3, 8] {
            let positions = run(&scenario, strategy, threads, 40);
            assert_eq!(positions, reference, "{strategy} with {threads} threads");
        }
    }
}

#[test]
fn test_no_two_agents_share_a_cell() {
    let scenario = crowd();
    let mut model = Model::setup(
        scenario.agents().unwrap(),
        scenario.waypoints(),
        Strategy::RegionParallel,
        ModelOptions {
            threads: Some(6),
            ..scenario.options()
        },
    )
    .unwrap();

    let distinct = |model: &Model| {
        let mut cells: Vec<_> = model.positions().map(|p| (p.x, p.y)).collect();
        cells.sort_unstable();
        cells.dedup();
        cells.len()
    };
    assert_eq!(distinct(&model), 300);

    for tick in 1..=30 {
        model.tick().unwrap();
        assert_eq!(model.agents().len(), 300);
        assert_eq!(distinct(&model), 300, "tick {tick}");
    }
}

#[test]
fn test_heatmap_backends_agree() {
    let scenario = crowd();
    let mut filtered = Vec::new();

    for backend in [HeatmapBackend::Sequential, HeatmapBackend::Parallel] {
        let options = ModelOptions {
            heatmap_backends: Some(StageBackends::uniform(backend)),
            heatmap_scale: 3,
            ..scenario.options()
        };
        let mut model =
            Model::setup(scenario.agents().unwrap(), scenario.waypoints(), Strategy::Sequential, options).unwrap();
        model.run(5).unwrap();

        let heatmap = model.heatmap().unwrap();
        assert_eq!(heatmap.splats(), 300);
        filtered.push(heatmap.filtered().clone());
    }

    assert_eq!(filtered[0], filtered[1]);
}

#[test]
fn test_tick_count_is_monotonic() {
    let (agents, waypoints) = corners();
    let mut model = Model::setup(agents, waypoints, Strategy::Vectorized, ModelOptions::default()).unwrap();

    for expected in 1..=25 {
        model.tick().unwrap();
        assert_eq!(model.tick_count(), expected);
    }
}

#[test]
fn test_setup_rejects_dangling_waypoint() {
    let (mut agents, waypoints) = corners();
    agents[2].waypoints.push(99);

    let result = Model::setup(agents, waypoints, Strategy::ThreadPool, ModelOptions::default());
    assert!(matches!(
        result,
        Err(SimulationError::Configuration(ConfigurationError::UnknownWaypoint {
            agent: 2,
            waypoint: 99
        }))
    ));
}
