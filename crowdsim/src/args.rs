use std::path::PathBuf;

use crowdsim_core::{
    agent::WaypointPolicy,
    heatmap::{HeatmapBackend, StageBackends},
    scenario::Scenario,
    strategies::Strategy,
    ModelOptions,
};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum Policy {
    Repeat,
    Discard,
}

#[derive(Debug, clap::Parser)]
pub struct Args {
    /// Path to scenario file
    #[arg(default_value = "scenarios/default.toml")]
    pub scenario: PathBuf,
    /// Time a sequential reference run against the selected implementation
    #[arg(long)]
    pub timing_mode: bool,
    /// Worker count hint, non-positive values fall back to the hardware thread count
    #[arg(long, allow_negative_numbers = true)]
    pub threads: Option<i32>,
    /// Implementation: SEQ, OMP, PTHREAD, VECTOR, CUDA, REGION or a descriptive name
    #[arg(long = "impl", default_value = "SEQ")]
    pub implementation: Strategy,
    /// Number of ticks to run (10 in timing mode, unlimited otherwise)
    #[arg(long)]
    pub ticks: Option<u64>,
    /// Override the waypoint policy of the scenario
    #[arg(value_enum, long)]
    pub policy: Option<Policy>,

    /// Heatmap backend for all stages
    #[arg(long)]
    pub heatmap_backend: Option<HeatmapBackend>,
    /// Do not build the heatmap
    #[arg(long)]
    pub no_heatmap: bool,
    /// Upscaling factor of the heatmap
    #[arg(long)]
    pub heatmap_scale: Option<usize>,
    /// Local work size of GPU kernels
    #[arg(long)]
    pub work_size: Option<usize>,
    /// Region grid as COLUMNSxROWS
    #[arg(long, value_parser = parse_grid)]
    pub regions: Option<[usize; 2]>,
    /// Export the diagnostic log as JSON when the run ends
    #[arg(long)]
    pub export_log: bool,
}

impl Args {
    /// Thread hint given for a strategy that has no worker threads.
    pub fn ignored_threads(&self) -> Option<i32> {
        self.threads.filter(|_| !self.implementation.uses_threads())
    }

    pub fn to_model_options(&self, scenario: &Scenario) -> ModelOptions {
        let mut options = ModelOptions {
            heatmap: !self.no_heatmap,
            heatmap_backends: self.heatmap_backend.map(StageBackends::uniform),
            region_grid: self.regions,
            ..scenario.options()
        };

        if let Some(policy) = self.policy {
            options.policy = match policy {
                Policy::Repeat => WaypointPolicy::Repeat,
                Policy::Discard => WaypointPolicy::Discard,
            };
        }
        if let Some(scale) = self.heatmap_scale {
            options.heatmap_scale = scale;
        }
        if let Some(work_size) = self.work_size {
            options.gpu_work_size = work_size;
        }

        options
    }
}

fn parse_grid(s: &str) -> Result<[usize; 2], String> {
    let (columns, rows) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected COLUMNSxROWS, got {s:?}"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<usize>()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| format!("invalid region count {v:?}"))
    };
    Ok([parse(columns)?, parse(rows)?])
}
