use std::fmt::Debug;

use serde::Serialize;

use crate::{heatmap::HeatmapBackend, strategies::Strategy};

/// Per-run record of every tick, exported as JSON by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticLog {
    pub strategy: Strategy,
    pub threads: usize,
    pub agent_count: usize,
    pub total_steps: usize,
    pub setup_metrics: SetupMetrics,
    pub step_metrics: StepMetricsCollection,
    pub heatmap_timings: HeatmapTimings,
}

impl DiagnosticLog {
    pub fn new(strategy: Strategy, threads: usize, agent_count: usize) -> Self {
        DiagnosticLog {
            strategy,
            threads,
            agent_count,
            total_steps: 0,
            setup_metrics: SetupMetrics::default(),
            step_metrics: StepMetricsCollection::default(),
            heatmap_timings: HeatmapTimings::default(),
        }
    }

    pub fn push(&mut self, step_metrics: StepMetrics) {
        self.step_metrics.push(step_metrics);
        self.total_steps += 1;
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct StepMetricsCollection {
    pub agent_count: Vec<usize>,
    pub time_snapshot: Vec<f64>,
    pub time_step: Vec<f64>,
    pub time_kernel: Vec<Option<f64>>,
    pub time_heatmap: Vec<f64>,
    pub handoffs: Vec<Option<usize>>,
}

impl StepMetricsCollection {
    pub fn push(&mut self, metrics: StepMetrics) {
        self.agent_count.push(metrics.agent_count);
        self.time_snapshot.push(metrics.time_snapshot);
        self.time_step.push(metrics.time_step);
        self.time_kernel.push(metrics.time_kernel);
        self.time_heatmap.push(metrics.time_heatmap);
        self.handoffs.push(metrics.handoffs);
    }

    pub fn len(&self) -> usize {
        self.time_step.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_step.is_empty()
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SetupMetrics {
    pub time_setup: f64,
}

/// Wall times of one tick, in seconds.
#[derive(Debug, Default, Clone, Serialize)]
pub struct StepMetrics {
    pub agent_count: usize,
    pub time_snapshot: f64,
    pub time_step: f64,
    pub time_kernel: Option<f64>,
    pub time_heatmap: f64,
    pub handoffs: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Creation,
    Scaling,
    Filtering,
}

impl Stage {
    /// Pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Creation, Stage::Scaling, Stage::Filtering];
}

/// Accumulated milliseconds per heatmap stage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct StageTotals {
    pub creation: f64,
    pub scaling: f64,
    pub filtering: f64,
}

impl StageTotals {
    pub fn get(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Creation => self.creation,
            Stage::Scaling => self.scaling,
            Stage::Filtering => self.filtering,
        }
    }

    fn get_mut(&mut self, stage: Stage) -> &mut f64 {
        match stage {
            Stage::Creation => &mut self.creation,
            Stage::Scaling => &mut self.scaling,
            Stage::Filtering => &mut self.filtering,
        }
    }

    pub fn total(&self) -> f64 {
        self.creation + self.scaling + self.filtering
    }

    /// Per-tick averages. All zero when no tick was recorded.
    pub fn averages(&self, ticks: usize) -> StageTotals {
        if ticks == 0 {
            return StageTotals::default();
        }
        let n = ticks as f64;
        StageTotals {
            creation: self.creation / n,
            scaling: self.scaling / n,
            filtering: self.filtering / n,
        }
    }
}

/// Heatmap stage times split by backend kind. Accumulates over the life of a
/// model; never reset implicitly.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct HeatmapTimings {
    pub sequential: StageTotals,
    pub accelerated: StageTotals,
    /// Heatmap updates recorded so far.
    pub ticks: usize,
}

impl HeatmapTimings {
    pub fn record(&mut self, stage: Stage, backend: HeatmapBackend, millis: f64) {
        let totals = match backend.is_accelerated() {
            true => &mut self.accelerated,
            false => &mut self.sequential,
        };
        *totals.get_mut(stage) += millis;

        if stage == Stage::Filtering {
            self.ticks += 1;
        }
    }

    pub fn sequential_averages(&self) -> StageTotals {
        self.sequential.averages(self.ticks)
    }

    pub fn accelerated_averages(&self) -> StageTotals {
        self.accelerated.averages(self.ticks)
    }
}
