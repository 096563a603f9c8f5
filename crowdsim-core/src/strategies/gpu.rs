use std::time::Duration;

use log::info;
use ocl::{
    core::ProfilingInfo,
    prm::{Float4, Int2},
    Buffer, Event, MemFlags, ProQue,
};

use crate::{
    agent::{Agent, World},
    error::SimulationError,
    motion::{AgentUpdate, Snapshot},
    util::{circle_to_ocl, ToGlam, ToOcl},
};

use super::{commit_all, ExecutionStrategy, Strategy};

/// Runs the motion update as an OpenCL kernel, one work item per agent.
pub struct GpuStrategy {
    pq: ProQue,
    local_work_size: usize,
    waypoint_buffer: Buffer<Float4>,
    kernel_time: Option<f64>,
}

impl GpuStrategy {
    pub fn new(world: &World, local_work_size: usize) -> Result<Self, SimulationError> {
        let source = include_str!("gpu.cl");
        let pq = ProQue::builder()
            .src(source)
            .queue_properties(ocl::core::QUEUE_PROFILING_ENABLE)
            .dims(1)
            .build()
            .map_err(|err| SimulationError::ResourceUnavailable(format!("OpenCL: {err}")))?;
        info!("OpenCL device: {}", pq.device().name()?);

        let waypoints: Vec<Float4> = world
            .waypoints
            .iter()
            .map(|w| circle_to_ocl(w.position, w.radius))
            .collect();
        let waypoint_buffer = pq
            .buffer_builder()
            .flags(MemFlags::READ_ONLY)
            .len(waypoints.len())
            .copy_host_slice(&waypoints)
            .build()?;

        Ok(GpuStrategy {
            pq,
            local_work_size: local_work_size.max(1),
            waypoint_buffer,
            kernel_time: None,
        })
    }

    fn run_kernel(&mut self, snapshot: &Snapshot) -> ocl::Result<Vec<AgentUpdate>> {
        let agents = &snapshot.agents;
        let agent_count = agents.len();
        if agent_count == 0 {
            return Ok(Vec::new());
        }

        let ids: Vec<u32> = agents.iter().map(|a| a.id).collect();
        let positions: Vec<Int2> = agents.iter().map(|a| a.position.to_ocl()).collect();
        let current_waypoints: Vec<u32> = agents.iter().map(|a| a.waypoint as u32).collect();
        let next_waypoints: Vec<u32> = agents.iter().map(|a| a.next_waypoint as u32).collect();
        let radii: Vec<f32> = agents.iter().map(|a| a.radius).collect();
        let (cell_starts, cell_agents) = snapshot.occupancy.to_compressed();

        let pq = &self.pq;
        let global_work_size = agent_count.div_ceil(self.local_work_size) * self.local_work_size;

        let id_buffer = pq
            .buffer_builder()
            .flags(MemFlags::READ_ONLY)
            .len(agent_count)
            .copy_host_slice(&ids)
            .build()?;
        let position_buffer = pq
            .buffer_builder()
            .flags(MemFlags::READ_ONLY)
            .len(agent_count)
            .copy_host_slice(&positions)
            .build()?;
        let current_buffer = pq
            .buffer_builder()
            .flags(MemFlags::READ_ONLY)
            .len(agent_count)
            .copy_host_slice(&current_waypoints)
            .build()?;
        let next_buffer = pq
            .buffer_builder()
            .flags(MemFlags::READ_ONLY)
            .len(agent_count)
            .copy_host_slice(&next_waypoints)
            .build()?;
        let radius_buffer = pq
            .buffer_builder()
            .flags(MemFlags::READ_ONLY)
            .len(agent_count)
            .copy_host_slice(&radii)
            .build()?;
        let cell_start_buffer = pq
            .buffer_builder()
            .flags(MemFlags::READ_ONLY)
            .len(cell_starts.len())
            .copy_host_slice(&cell_starts)
            .build()?;
        let cell_agent_buffer = pq
            .buffer_builder()
            .flags(MemFlags::READ_ONLY)
            .len(cell_agents.len())
            .copy_host_slice(&cell_agents)
            .build()?;
        let out_position_buffer: Buffer<Int2> = pq
            .buffer_builder()
            .flags(MemFlags::WRITE_ONLY)
            .len(agent_count)
            .build()?;
        let out_desired_buffer: Buffer<Int2> = pq
            .buffer_builder()
            .flags(MemFlags::WRITE_ONLY)
            .len(agent_count)
            .build()?;
        let out_reached_buffer: Buffer<i32> = pq
            .buffer_builder()
            .flags(MemFlags::WRITE_ONLY)
            .len(agent_count)
            .build()?;

        let world = Int2::new(snapshot.world.width, snapshot.world.height);
        let kernel = pq
            .kernel_builder("next_position")
            .arg(&(agent_count as u32))
            .arg(&world)
            .arg(&id_buffer)
            .arg(&position_buffer)
            .arg(&current_buffer)
            .arg(&next_buffer)
            .arg(&radius_buffer)
            .arg(&self.waypoint_buffer)
            .arg(&cell_start_buffer)
            .arg(&cell_agent_buffer)
            .arg(&out_position_buffer)
            .arg(&out_desired_buffer)
            .arg(&out_reached_buffer)
            .global_work_size(global_work_size)
            .local_work_size(self.local_work_size)
            .build()?;

        let mut event = Event::empty();
        unsafe {
            kernel.cmd().enew(&mut event).enq()?;
        }
        event.wait_for()?;
        let start = event.profiling_info(ProfilingInfo::Start)?.time()?;
        let end = event.profiling_info(ProfilingInfo::End)?.time()?;
        self.kernel_time = Some(Duration::from_nanos(end.saturating_sub(start)).as_secs_f64());

        let mut out_positions = vec![Int2::zero(); agent_count];
        let mut out_desired = vec![Int2::zero(); agent_count];
        let mut out_reached = vec![0i32; agent_count];
        out_position_buffer.read(&mut out_positions).enq()?;
        out_desired_buffer.read(&mut out_desired).enq()?;
        out_reached_buffer.read(&mut out_reached).enq()?;

        let updates = out_positions
            .into_iter()
            .zip(out_desired)
            .zip(out_reached)
            .map(|((position, desired), reached)| AgentUpdate {
                position: position.to_glam(),
                desired: desired.to_glam(),
                reached: reached != 0,
            })
            .collect();

        Ok(updates)
    }
}

impl ExecutionStrategy for GpuStrategy {
    fn kind(&self) -> Strategy {
        Strategy::GpuOffload
    }

    fn step(&mut self, agents: &mut Vec<Agent>, snapshot: &Snapshot) -> Result<(), SimulationError> {
        let updates = self.run_kernel(snapshot)?;
        commit_all(agents, updates, &snapshot.world);
        Ok(())
    }

    fn kernel_time(&self) -> Option<f64> {
        self.kernel_time
    }
}
