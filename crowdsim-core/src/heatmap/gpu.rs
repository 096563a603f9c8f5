use glam::IVec2;
use ndarray::Array2;
use ocl::{prm::Int2, Buffer, Event, Kernel, MemFlags, ProQue};

use crate::{error::SimulationError, util::ToOcl};

/// Device-side heatmap stages. Grid buffers are allocated once; every stage
/// uploads its host input and reads its output back.
pub struct GpuHeatmap {
    pq: ProQue,
    local_work_size: usize,
    density_buffer: Buffer<u32>,
    scaled_buffer: Buffer<u32>,
    filtered_buffer: Buffer<u32>,
}

impl GpuHeatmap {
    pub fn new(
        shape: (usize, usize),
        scaled_shape: (usize, usize),
        local_work_size: usize,
    ) -> Result<Self, SimulationError> {
        let source = include_str!("heatmap.cl");
        let pq = ProQue::builder()
            .src(source)
            .dims(1)
            .build()
            .map_err(|err| SimulationError::ResourceUnavailable(format!("OpenCL: {err}")))?;

        let density_buffer = pq
            .buffer_builder()
            .flags(MemFlags::READ_WRITE)
            .len(shape.0 * shape.1)
            .build()?;
        let scaled_buffer = pq
            .buffer_builder()
            .flags(MemFlags::READ_WRITE)
            .len(scaled_shape.0 * scaled_shape.1)
            .build()?;
        let filtered_buffer = pq
            .buffer_builder()
            .flags(MemFlags::READ_WRITE)
            .len(scaled_shape.0 * scaled_shape.1)
            .build()?;

        Ok(GpuHeatmap {
            pq,
            local_work_size: local_work_size.max(1),
            density_buffer,
            scaled_buffer,
            filtered_buffer,
        })
    }

    fn global_work_size(&self, items: usize) -> usize {
        items.div_ceil(self.local_work_size) * self.local_work_size
    }

    /// Enqueue `kernel` and block until the device has finished it.
    fn run(kernel: &Kernel) -> ocl::Result<()> {
        let mut event = Event::empty();
        unsafe {
            kernel.cmd().enew(&mut event).enq()?;
        }
        event.wait_for()
    }

    pub fn create(
        &mut self,
        positions: &[IVec2],
        density: &mut Array2<u32>,
    ) -> Result<(), SimulationError> {
        let (rows, columns) = density.dim();
        let cells = rows * columns;

        let clear = self
            .pq
            .kernel_builder("clear_grid")
            .arg(&(cells as u32))
            .arg(&self.density_buffer)
            .global_work_size(self.global_work_size(cells))
            .local_work_size(self.local_work_size)
            .build()?;
        Self::run(&clear)?;

        if !positions.is_empty() {
            let positions: Vec<Int2> = positions.iter().map(|p| p.to_ocl()).collect();
            let position_buffer = self
                .pq
                .buffer_builder()
                .flags(MemFlags::READ_ONLY)
                .len(positions.len())
                .copy_host_slice(&positions)
                .build()?;

            let splat = self
                .pq
                .kernel_builder("splat")
                .arg(&(positions.len() as u32))
                .arg(&Int2::new(columns as i32, rows as i32))
                .arg(&position_buffer)
                .arg(&self.density_buffer)
                .global_work_size(self.global_work_size(positions.len()))
                .local_work_size(self.local_work_size)
                .build()?;
            Self::run(&splat)?;
        }

        self.density_buffer.read(host_slice_mut(density)?).enq()?;
        Ok(())
    }

    pub fn scale(
        &mut self,
        density: &Array2<u32>,
        scaled: &mut Array2<u32>,
        factor: usize,
    ) -> Result<(), SimulationError> {
        let (rows, columns) = scaled.dim();
        self.density_buffer.write(host_slice(density)?).enq()?;

        let kernel = self
            .pq
            .kernel_builder("scale")
            .arg(&Int2::new(columns as i32, rows as i32))
            .arg(&(factor as u32))
            .arg(&(density.ncols() as u32))
            .arg(&self.density_buffer)
            .arg(&self.scaled_buffer)
            .global_work_size(self.global_work_size(rows * columns))
            .local_work_size(self.local_work_size)
            .build()?;
        Self::run(&kernel)?;

        self.scaled_buffer.read(host_slice_mut(scaled)?).enq()?;
        Ok(())
    }

    pub fn filter(
        &mut self,
        scaled: &Array2<u32>,
        filtered: &mut Array2<u32>,
    ) -> Result<(), SimulationError> {
        let (rows, columns) = filtered.dim();
        self.scaled_buffer.write(host_slice(scaled)?).enq()?;

        let kernel = self
            .pq
            .kernel_builder("filter")
            .arg(&Int2::new(columns as i32, rows as i32))
            .arg(&self.scaled_buffer)
            .arg(&self.filtered_buffer)
            .global_work_size(self.global_work_size(rows * columns))
            .local_work_size(self.local_work_size)
            .build()?;
        Self::run(&kernel)?;

        self.filtered_buffer.read(host_slice_mut(filtered)?).enq()?;
        Ok(())
    }
}

fn host_slice(grid: &Array2<u32>) -> Result<&[u32], SimulationError> {
    grid.as_slice().ok_or(SimulationError::Layout("heatmap grid is not contiguous"))
}

fn host_slice_mut(grid: &mut Array2<u32>) -> Result<&mut [u32], SimulationError> {
    grid.as_slice_mut()
        .ok_or(SimulationError::Layout("heatmap grid is not contiguous"))
}

#[cfg(test)]
mod tests {
    use glam::ivec2;

    use super::*;
    use crate::heatmap::cpu;

    #[test]
    fn test_gpu_stages_match_cpu() {
        let Ok(mut gpu) = GpuHeatmap::new((12, 16), (36, 48), 64) else {
            eprintln!("No OpenCL device, skipping");
            return;
        };

        let positions: Vec<_> = (0..300).map(|i| ivec2(i % 16, (i * 5) % 12)).collect();
        let mut expected = Array2::zeros((12, 16));
        let mut density = Array2::zeros((12, 16));
        cpu::create_sequential(&positions, &mut expected);
        gpu.create(&positions, &mut density).unwrap();
        assert_eq!(density, expected);

        let mut expected_scaled = Array2::zeros((36, 48));
        let mut scaled = Array2::zeros((36, 48));
        cpu::scale_sequential(&density, &mut expected_scaled, 3);
        gpu.scale(&density, &mut scaled, 3).unwrap();
        assert_eq!(scaled, expected_scaled);

        let mut expected_filtered = Array2::zeros((36, 48));
        let mut filtered = Array2::zeros((36, 48));
        cpu::filter_sequential(&scaled, &mut expected_filtered);
        gpu.filter(&scaled, &mut filtered).unwrap();
        assert_eq!(filtered, expected_filtered);
    }
}
