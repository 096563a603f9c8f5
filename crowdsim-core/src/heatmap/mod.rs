//! Density heatmap: splat agent positions, upscale, blur.
//!
//! Each of the three stages can run on its own backend. Stage times are
//! reported to [`HeatmapTimings`] under the sequential or the accelerated
//! bucket depending on which backend ran them.

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;

use std::{fmt, str::FromStr, time::Instant};

use glam::IVec2;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    diagnostic::{HeatmapTimings, Stage},
    error::{ConfigurationError, SimulationError},
    strategies::Strategy,
};

/// Weights an agent deposits on the 3x3 block around its cell.
pub const SPLAT: [[u32; 3]; 3] = [[1, 2, 1], [2, 4, 2], [1, 2, 1]];
/// Sum of [`SPLAT`]. Every agent adds exactly this much to the density grid.
pub const SPLAT_WEIGHT: u32 = 16;

pub const FILTER: [[u32; 5]; 5] = [
    [1, 4, 7, 4, 1],
    [4, 16, 26, 16, 4],
    [7, 26, 41, 26, 7],
    [4, 16, 26, 16, 4],
    [1, 4, 7, 4, 1],
];
pub const FILTER_WEIGHT: u32 = 273;

pub const DEFAULT_SCALE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatmapBackend {
    Sequential,
    Parallel,
    Gpu,
}

impl HeatmapBackend {
    pub fn is_accelerated(self) -> bool {
        !matches!(self, HeatmapBackend::Sequential)
    }

    /// Backend paired with a motion strategy when none is configured.
    pub fn for_strategy(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Sequential | Strategy::Vectorized => HeatmapBackend::Sequential,
            Strategy::ForkJoin | Strategy::ThreadPool | Strategy::RegionParallel => {
                HeatmapBackend::Parallel
            }
            Strategy::GpuOffload => HeatmapBackend::Gpu,
        }
    }
}

impl fmt::Display for HeatmapBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HeatmapBackend::Sequential => "sequential",
            HeatmapBackend::Parallel => "parallel",
            HeatmapBackend::Gpu => "gpu",
        })
    }
}

impl FromStr for HeatmapBackend {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" | "cpu" => Ok(HeatmapBackend::Sequential),
            "parallel" | "par" => Ok(HeatmapBackend::Parallel),
            "gpu" | "cuda" | "opencl" => Ok(HeatmapBackend::Gpu),
            _ => Err(ConfigurationError::InvalidOption(
                "heatmap backend must be sequential, parallel or gpu",
            )),
        }
    }
}

/// Backend chosen for each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBackends {
    pub creation: HeatmapBackend,
    pub scaling: HeatmapBackend,
    pub filtering: HeatmapBackend,
}

impl StageBackends {
    pub fn uniform(backend: HeatmapBackend) -> Self {
        StageBackends {
            creation: backend,
            scaling: backend,
            filtering: backend,
        }
    }

    pub fn get(&self, stage: Stage) -> HeatmapBackend {
        match stage {
            Stage::Creation => self.creation,
            Stage::Scaling => self.scaling,
            Stage::Filtering => self.filtering,
        }
    }

    fn uses_gpu(&self) -> bool {
        [self.creation, self.scaling, self.filtering].contains(&HeatmapBackend::Gpu)
    }
}

pub struct Heatmap {
    backends: StageBackends,
    factor: usize,
    density: Array2<u32>,
    scaled: Array2<u32>,
    filtered: Array2<u32>,
    #[cfg(feature = "gpu")]
    gpu: Option<gpu::GpuHeatmap>,
}

impl Heatmap {
    /// `shape` is the world as (rows, columns). `factor` must be positive.
    pub fn new(
        shape: (usize, usize),
        factor: usize,
        backends: StageBackends,
        work_size: usize,
    ) -> Result<Self, SimulationError> {
        if factor == 0 {
            return Err(ConfigurationError::InvalidOption("heatmap scale must be positive").into());
        }
        let scaled_shape = (shape.0 * factor, shape.1 * factor);

        #[cfg(feature = "gpu")]
        let gpu = match backends.uses_gpu() {
            true => Some(gpu::GpuHeatmap::new(shape, scaled_shape, work_size)?),
            false => None,
        };
        #[cfg(not(feature = "gpu"))]
        {
            let _ = work_size;
            if backends.uses_gpu() {
                return Err(gpu_missing());
            }
        }

        Ok(Heatmap {
            backends,
            factor,
            density: Array2::zeros(shape),
            scaled: Array2::zeros(scaled_shape),
            filtered: Array2::zeros(scaled_shape),
            #[cfg(feature = "gpu")]
            gpu,
        })
    }

    /// Rebuild all three grids from `positions`, timing each stage.
    pub fn update(
        &mut self,
        positions: &[IVec2],
        timings: &mut HeatmapTimings,
    ) -> Result<(), SimulationError> {
        for stage in Stage::ALL {
            let start = Instant::now();
            match stage {
                Stage::Creation => self.create(positions)?,
                Stage::Scaling => self.scale_up()?,
                Stage::Filtering => self.blur()?,
            }
            timings.record(stage, self.backends.get(stage), elapsed_ms(start));
        }

        Ok(())
    }

    fn create(&mut self, positions: &[IVec2]) -> Result<(), SimulationError> {
        match self.backends.creation {
            HeatmapBackend::Sequential => cpu::create_sequential(positions, &mut self.density),
            HeatmapBackend::Parallel => cpu::create_parallel(positions, &mut self.density),
            #[cfg(feature = "gpu")]
            HeatmapBackend::Gpu => self
                .gpu
                .as_mut()
                .ok_or_else(gpu_missing)?
                .create(positions, &mut self.density)?,
            #[cfg(not(feature = "gpu"))]
            HeatmapBackend::Gpu => return Err(gpu_missing()),
        }
        Ok(())
    }

    fn scale_up(&mut self) -> Result<(), SimulationError> {
        match self.backends.scaling {
            HeatmapBackend::Sequential => {
                cpu::scale_sequential(&self.density, &mut self.scaled, self.factor)
            }
            HeatmapBackend::Parallel => {
                cpu::scale_parallel(&self.density, &mut self.scaled, self.factor)
            }
            #[cfg(feature = "gpu")]
            HeatmapBackend::Gpu => self.gpu.as_mut().ok_or_else(gpu_missing)?.scale(
                &self.density,
                &mut self.scaled,
                self.factor,
            )?,
            #[cfg(not(feature = "gpu"))]
            HeatmapBackend::Gpu => return Err(gpu_missing()),
        }
        Ok(())
    }

    fn blur(&mut self) -> Result<(), SimulationError> {
        match self.backends.filtering {
            HeatmapBackend::Sequential => cpu::filter_sequential(&self.scaled, &mut self.filtered),
            HeatmapBackend::Parallel => cpu::filter_parallel(&self.scaled, &mut self.filtered),
            #[cfg(feature = "gpu")]
            HeatmapBackend::Gpu => self
                .gpu
                .as_mut()
                .ok_or_else(gpu_missing)?
                .filter(&self.scaled, &mut self.filtered)?,
            #[cfg(not(feature = "gpu"))]
            HeatmapBackend::Gpu => return Err(gpu_missing()),
        }
        Ok(())
    }

    pub fn backends(&self) -> StageBackends {
        self.backends
    }

    pub fn scale(&self) -> usize {
        self.factor
    }

    /// Per-cell density, world resolution.
    pub fn density(&self) -> &Array2<u32> {
        &self.density
    }

    pub fn scaled(&self) -> &Array2<u32> {
        &self.scaled
    }

    pub fn filtered(&self) -> &Array2<u32> {
        &self.filtered
    }

    /// Number of agents splatted into the density grid.
    pub fn splats(&self) -> u32 {
        self.density.sum() / SPLAT_WEIGHT
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn gpu_missing() -> SimulationError {
    SimulationError::ResourceUnavailable("GPU heatmap backend is not available".to_owned())
}

#[cfg(test)]
mod tests {
    use glam::ivec2;

    use super::*;

    fn positions() -> Vec<IVec2> {
        vec![
            ivec2(0, 0),
            ivec2(5, 3),
            ivec2(5, 3),
            ivec2(9, 7),
            ivec2(2, 7),
            ivec2(9, 0),
        ]
    }

    #[test]
    fn test_kernel_weights() {
        assert_eq!(SPLAT.iter().flatten().sum::<u32>(), SPLAT_WEIGHT);
        assert_eq!(FILTER.iter().flatten().sum::<u32>(), FILTER_WEIGHT);
    }

    #[test]
    fn test_update_conserves_mass() {
        let mut timings = HeatmapTimings::default();
        let mut heatmap = Heatmap::new(
            (8, 10),
            DEFAULT_SCALE,
            StageBackends::uniform(HeatmapBackend::Sequential),
            64,
        )
        .unwrap();
        heatmap.update(&positions(), &mut timings).unwrap();

        assert_eq!(heatmap.splats(), 6);
        assert_eq!(heatmap.scaled().dim(), (40, 50));
        assert_eq!(heatmap.filtered().dim(), (40, 50));
        assert_eq!(
            heatmap.scaled().sum(),
            heatmap.density().sum() * (DEFAULT_SCALE * DEFAULT_SCALE) as u32
        );
        assert_eq!(timings.ticks, 1);
        assert_eq!(timings.accelerated.total(), 0.0);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut timings = HeatmapTimings::default();
        let mut sequential = Heatmap::new(
            (8, 10),
            3,
            StageBackends::uniform(HeatmapBackend::Sequential),
            64,
        )
        .unwrap();
        let mut parallel =
            Heatmap::new((8, 10), 3, StageBackends::uniform(HeatmapBackend::Parallel), 64).unwrap();

        sequential.update(&positions(), &mut timings).unwrap();
        parallel.update(&positions(), &mut timings).unwrap();

        assert_eq!(sequential.density(), parallel.density());
        assert_eq!(sequential.scaled(), parallel.scaled());
        assert_eq!(sequential.filtered(), parallel.filtered());
    }

    #[test]
    fn test_mixed_backends_recorded_per_stage() {
        let backends = StageBackends {
            creation: HeatmapBackend::Parallel,
            scaling: HeatmapBackend::Sequential,
            filtering: HeatmapBackend::Parallel,
        };
        let mut timings = HeatmapTimings::default();
        let mut heatmap = Heatmap::new((4, 4), 2, backends, 64).unwrap();
        heatmap.update(&[ivec2(1, 1)], &mut timings).unwrap();

        assert_eq!(timings.sequential.creation, 0.0);
        assert_eq!(timings.accelerated.scaling, 0.0);
        assert_eq!(timings.sequential.filtering, 0.0);
        assert_eq!(heatmap.backends(), backends);
        assert_eq!(backends.get(Stage::Scaling), HeatmapBackend::Sequential);
        assert_eq!(backends.get(Stage::Filtering), HeatmapBackend::Parallel);
    }

    #[test]
    fn test_zero_scale_rejected() {
        let result = Heatmap::new((4, 4), 0, StageBackends::uniform(HeatmapBackend::Sequential), 64);
        assert!(matches!(
            result,
            Err(SimulationError::Configuration(ConfigurationError::InvalidOption(_)))
        ));
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!("SEQ".parse::<HeatmapBackend>(), Ok(HeatmapBackend::Sequential));
        assert_eq!("parallel".parse::<HeatmapBackend>(), Ok(HeatmapBackend::Parallel));
        assert_eq!("CUDA".parse::<HeatmapBackend>(), Ok(HeatmapBackend::Gpu));
        assert!("fpga".parse::<HeatmapBackend>().is_err());
        assert_eq!(
            HeatmapBackend::for_strategy(Strategy::RegionParallel),
            HeatmapBackend::Parallel
        );
    }
}
