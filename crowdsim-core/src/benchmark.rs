//! Reference-versus-target timing runs.

use std::{fmt, time::Instant};

use log::info;

use crate::{
    diagnostic::{HeatmapTimings, StageTotals},
    error::SimulationError,
    scenario::Scenario,
    strategies::Strategy,
    Model, ModelOptions,
};

pub const DEFAULT_TICKS: u64 = 10;

/// Outcome of one timed model run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub strategy: Strategy,
    pub threads: usize,
    pub ticks: u64,
    pub elapsed_ms: f64,
    pub timings: HeatmapTimings,
}

impl RunReport {
    pub fn fps(&self) -> f64 {
        self.ticks as f64 / self.elapsed_ms * 1000.0
    }
}

/// Per-stage ratio of reference sequential average to target accelerated
/// average. `None` when the target never ran that stage accelerated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageSpeedups {
    pub creation: Option<f64>,
    pub scaling: Option<f64>,
    pub filtering: Option<f64>,
}

impl StageSpeedups {
    pub fn new(reference: StageTotals, target: StageTotals) -> Self {
        let ratio = |seq: f64, accel: f64| (accel > 0.0).then(|| seq / accel);
        StageSpeedups {
            creation: ratio(reference.creation, target.creation),
            scaling: ratio(reference.scaling, target.scaling),
            filtering: ratio(reference.filtering, target.filtering),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub reference: RunReport,
    pub target: RunReport,
    /// Only reported for region-parallel targets.
    pub stages: Option<StageSpeedups>,
}

impl BenchmarkReport {
    pub fn new(reference: RunReport, target: RunReport) -> Self {
        let stages = (target.strategy == Strategy::RegionParallel).then(|| {
            StageSpeedups::new(
                reference.timings.sequential_averages(),
                target.timings.accelerated_averages(),
            )
        });
        BenchmarkReport {
            reference,
            target,
            stages,
        }
    }

    pub fn speedup(&self) -> f64 {
        self.target.fps() / self.reference.fps()
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Reference time: {:.3} milliseconds, {:.2} Frames Per Second.",
            self.reference.elapsed_ms,
            self.reference.fps()
        )?;
        writeln!(
            f,
            "Target time ({}, {} threads): {:.3} milliseconds, {:.2} Frames Per Second.",
            self.target.strategy,
            self.target.threads,
            self.target.elapsed_ms,
            self.target.fps()
        )?;
        write!(f, "\nSpeedup: {:.3}", self.speedup())?;

        if let Some(stages) = &self.stages {
            let seq = self.reference.timings.sequential_averages();
            let accel = self.target.timings.accelerated_averages();
            let speedup = |s: Option<f64>| s.map_or_else(|| "n/a".to_owned(), |s| format!("{s:.3}"));

            writeln!(f, "\n[Result]")?;
            writeln!(
                f,
                "\t[Sequential Average ] Creation: {:.6}ms, Scaling: {:.6}ms, Filter: {:.6}ms",
                seq.creation, seq.scaling, seq.filtering
            )?;
            writeln!(
                f,
                "\t[Accelerated Average] Creation: {:.6}ms, Scaling: {:.6}ms, Filter: {:.6}ms",
                accel.creation, accel.scaling, accel.filtering
            )?;
            write!(
                f,
                "\t[      Speedup      ] Creation: {}, Scaling: {}, Filter: {}",
                speedup(stages.creation),
                speedup(stages.scaling),
                speedup(stages.filtering)
            )?;
        }

        Ok(())
    }
}

/// Run `ticks` ticks on a fresh model and time them.
pub fn time_run(
    scenario: &Scenario,
    strategy: Strategy,
    ticks: u64,
    options: ModelOptions,
) -> Result<RunReport, SimulationError> {
    let mut model = Model::setup(scenario.agents()?, scenario.waypoints(), strategy, options)?;

    let instant = Instant::now();
    model.run(ticks)?;
    let elapsed_ms = (instant.elapsed().as_secs_f64() * 1000.0).max(1e-3);

    Ok(RunReport {
        strategy,
        threads: model.threads(),
        ticks: model.tick_count(),
        elapsed_ms,
        timings: *model.timings(),
    })
}

/// Time a sequential reference run against `target` on the same scenario.
///
/// The reference always uses the sequential heatmap so its stage totals are
/// comparable with the target's accelerated totals.
pub fn run(
    scenario: &Scenario,
    target: Strategy,
    thread_hint: Option<i32>,
    ticks: u64,
    options: &ModelOptions,
) -> Result<BenchmarkReport, SimulationError> {
    info!("Running reference version...");
    let reference_options = ModelOptions {
        threads: None,
        heatmap_backends: None,
        ..options.clone()
    };
    let reference = time_run(scenario, Strategy::Sequential, ticks, reference_options)?;

    info!("Running target version...");
    let target_options = ModelOptions {
        threads: thread_hint,
        ..options.clone()
    };
    let target = time_run(scenario, target, ticks, target_options)?;

    Ok(BenchmarkReport::new(reference, target))
}
