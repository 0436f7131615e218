//! GPU device initialization and management

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::{padded_size, Params};
use crate::backends::{
    validate_launch, AllocationStats, BufferId, Device, DeviceResult, Launch,
};
use crate::error::DeviceError;
use crate::kernels::KernelDescriptor;

struct DeviceBuffer {
    buffer: wgpu::Buffer,
    bytes: usize,
}

/// wgpu device, its queue and every resource the harness created on it
pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    limits: wgpu::Limits,
    subgroup_size: Option<usize>,
    timestamps: bool,
    host_timing_warned: bool,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<String, wgpu::ComputePipeline>,
    buffers: BTreeMap<BufferId, DeviceBuffer>,
    next_id: u32,
    stats: AllocationStats,
}

impl GpuDevice {
    /// Open the high-performance adapter
    ///
    /// Subgroup operations and timestamp queries are requested when the
    /// adapter offers them. Subgroup kernels are only enabled when the
    /// adapter reports a single fixed subgroup width.
    pub fn new() -> DeviceResult<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> DeviceResult<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(DeviceError::AdapterNotFound)?;

        let available = adapter.features();
        let wanted = wgpu::Features::SUBGROUP | wgpu::Features::TIMESTAMP_QUERY;
        let required_features = available & wanted;
        let limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("tilebench device"),
                    required_features,
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| DeviceError::RequestDevice(e.to_string()))?;

        let subgroup_size = if required_features.contains(wgpu::Features::SUBGROUP)
            && limits.min_subgroup_size == limits.max_subgroup_size
            && limits.min_subgroup_size > 0
        {
            Some(limits.min_subgroup_size as usize)
        } else {
            None
        };
        let timestamps = required_features.contains(wgpu::Features::TIMESTAMP_QUERY);
        let adapter_name = adapter.get_info().name;
        info!(
            adapter = %adapter_name,
            ?subgroup_size,
            timestamps,
            "GPU device ready"
        );

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("operands"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("operands"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            device,
            queue,
            adapter_name,
            limits,
            subgroup_size,
            timestamps,
            host_timing_warned: false,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            buffers: BTreeMap::new(),
            next_id: 0,
            stats: AllocationStats::default(),
        })
    }

    /// Check if a GPU adapter is present
    pub fn is_available() -> bool {
        pollster::block_on(async {
            let instance = wgpu::Instance::default();
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .is_some()
        })
    }

    fn raw(&self, id: BufferId) -> DeviceResult<&DeviceBuffer> {
        self.buffers.get(&id).ok_or(DeviceError::UnknownBuffer(id))
    }

    /// Run `f` inside a validation error scope
    fn scoped<T>(&self, f: impl FnOnce(&Self) -> T) -> DeviceResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(self);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(DeviceError::Validation(err.to_string())),
            None => Ok(value),
        }
    }

    fn ensure_pipeline(&mut self, kernel: &KernelDescriptor) -> DeviceResult<()> {
        if self.pipelines.contains_key(&kernel.name) {
            return Ok(());
        }
        let source = kernel.wgsl();
        let pipeline = self.scoped(|gpu| {
            let module = gpu
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(kernel.name.as_str()),
                    source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
                });
            gpu.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(kernel.name.as_str()),
                    layout: Some(&gpu.pipeline_layout),
                    module: &module,
                    entry_point: kernel.entry_point(),
                    compilation_options: Default::default(),
                    cache: None,
                })
        })?;
        debug!(kernel = %kernel.name, "pipeline compiled");
        self.pipelines.insert(kernel.name.clone(), pipeline);
        Ok(())
    }

    fn check(&mut self, launch: &Launch<'_>) -> DeviceResult<()> {
        validate_launch(launch, self.subgroup_size, |id| {
            self.buffers.get(&id).map(|b| b.bytes)
        })?;

        let [x, y, z] = launch.kernel.workgroups(launch.problem);
        let max = self.limits.max_compute_workgroups_per_dimension;
        if x > max || y > max || z > max {
            return Err(DeviceError::Unsupported(format!(
                "dispatch grid {x}x{y}x{z} exceeds {max} workgroups per dimension"
            )));
        }
        let shared = launch.kernel.shared_memory_bytes(launch.problem);
        if shared > self.limits.max_compute_workgroup_storage_size as usize {
            return Err(DeviceError::Unsupported(format!(
                "{shared} bytes of workgroup memory exceeds {}",
                self.limits.max_compute_workgroup_storage_size
            )));
        }
        self.ensure_pipeline(launch.kernel)
    }

    /// Record `iterations` dispatches of the kernel into one compute pass
    fn encode(
        &self,
        launch: &Launch<'_>,
        iterations: u32,
        query_set: Option<&wgpu::QuerySet>,
    ) -> DeviceResult<wgpu::CommandEncoder> {
        let pipeline = self.pipelines.get(&launch.kernel.name).ok_or_else(|| {
            DeviceError::Unsupported(format!("{} has no pipeline", launch.kernel.name))
        })?;
        let total = launch.problem.total;
        let params = Params {
            m: total.m as u32,
            n: total.n as u32,
            k: total.k as u32,
            pad: 0,
        };
        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("params"),
            size: std::mem::size_of::<Params>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(launch.kernel.name.as_str()),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.raw(launch.a)?.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.raw(launch.b)?.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.raw(launch.c)?.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(launch.kernel.name.as_str()),
            });
        {
            let timestamp_writes = query_set.map(|query_set| wgpu::ComputePassTimestampWrites {
                query_set,
                beginning_of_pass_write_index: Some(0),
                end_of_pass_write_index: Some(1),
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(launch.kernel.name.as_str()),
                timestamp_writes,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let [x, y, z] = launch.kernel.workgroups(launch.problem);
            for _ in 0..iterations {
                pass.dispatch_workgroups(x, y, z);
            }
        }
        Ok(encoder)
    }

    fn submit_and_wait(&self, encoder: wgpu::CommandEncoder) -> DeviceResult<()> {
        self.scoped(|gpu| {
            gpu.queue.submit(Some(encoder.finish()));
            gpu.device.poll(wgpu::Maintain::Wait);
        })
    }

    /// Copy `size` bytes of `source` into a mappable buffer and read them back
    fn read_back(&self, source: &wgpu::Buffer, size: u64) -> DeviceResult<Vec<u8>> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.submit_and_wait(encoder)?;

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);

        pollster::block_on(receiver.receive())
            .ok_or_else(|| DeviceError::Map("mapping callback dropped".to_string()))?
            .map_err(|e| DeviceError::Map(e.to_string()))?;

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }

    fn launch_with_timestamps(
        &mut self,
        launch: &Launch<'_>,
        iterations: u32,
    ) -> DeviceResult<Duration> {
        let query_set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("pass timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp resolve"),
            size: 16,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let mut encoder = self.encode(launch, iterations, Some(&query_set))?;
        encoder.resolve_query_set(&query_set, 0..2, &resolve, 0);
        self.submit_and_wait(encoder)?;

        let raw = self.read_back(&resolve, 16)?;
        let begin: u64 = bytemuck::pod_read_unaligned(&raw[0..8]);
        let end: u64 = bytemuck::pod_read_unaligned(&raw[8..16]);
        let delta = end.saturating_sub(begin);
        let nanos = delta as f64 * f64::from(self.queue.get_timestamp_period());
        Ok(Duration::from_nanos(nanos as u64))
    }

    fn launch_with_host_clock(
        &mut self,
        launch: &Launch<'_>,
        iterations: u32,
    ) -> DeviceResult<Duration> {
        if !self.host_timing_warned {
            warn!(
                adapter = %self.adapter_name,
                "timestamp queries unavailable; timing includes submission overhead"
            );
            self.host_timing_warned = true;
        }
        let encoder = self.encode(launch, iterations, None)?;
        let start = Instant::now();
        self.submit_and_wait(encoder)?;
        Ok(start.elapsed())
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl Device for GpuDevice {
    fn name(&self) -> String {
        self.adapter_name.clone()
    }

    fn subgroup_size(&self) -> Option<usize> {
        self.subgroup_size
    }

    fn alloc(&mut self, label: &'static str, bytes: usize) -> DeviceResult<BufferId> {
        let size = padded_size(bytes);
        let max = self
            .limits
            .max_buffer_size
            .min(u64::from(self.limits.max_storage_buffer_binding_size));
        if bytes == 0 || size > max {
            return Err(DeviceError::Allocation { label, bytes });
        }
        let buffer = self.scoped(|gpu| {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;

        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(id, DeviceBuffer { buffer, bytes });
        self.stats.allocated += 1;
        debug!(?id, label, bytes, "alloc");
        Ok(id)
    }

    fn upload(&mut self, buffer: BufferId, data: &[u8]) -> DeviceResult<()> {
        let dst = self.raw(buffer)?;
        if data.len() > dst.bytes {
            return Err(DeviceError::SizeMismatch {
                buffer,
                capacity: dst.bytes,
                requested: data.len(),
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        if data.len() % 4 == 0 {
            self.queue.write_buffer(&dst.buffer, 0, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(padded_size(data.len()) as usize, 0);
            self.queue.write_buffer(&dst.buffer, 0, &padded);
        }
        Ok(())
    }

    fn download(&mut self, buffer: BufferId, bytes: usize) -> DeviceResult<Vec<u8>> {
        let src = self.raw(buffer)?;
        if bytes > src.bytes {
            return Err(DeviceError::SizeMismatch {
                buffer,
                capacity: src.bytes,
                requested: bytes,
            });
        }
        let mut data = self.read_back(&src.buffer, padded_size(bytes))?;
        data.truncate(bytes);
        Ok(data)
    }

    fn free(&mut self, buffer: BufferId) -> DeviceResult<()> {
        let raw = self
            .buffers
            .remove(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;
        raw.buffer.destroy();
        self.stats.freed += 1;
        debug!(id = ?buffer, "free");
        Ok(())
    }

    #[instrument(skip_all, fields(kernel = %launch.kernel.name))]
    fn launch(&mut self, launch: &Launch<'_>) -> DeviceResult<()> {
        self.check(launch)?;
        let encoder = self.encode(launch, 1, None)?;
        self.submit_and_wait(encoder)
    }

    #[instrument(skip(self, launch), fields(kernel = %launch.kernel.name))]
    fn launch_timed(&mut self, launch: &Launch<'_>, iterations: u32) -> DeviceResult<Duration> {
        self.check(launch)?;
        if self.timestamps {
            self.launch_with_timestamps(launch, iterations)
        } else {
            self.launch_with_host_clock(launch, iterations)
        }
    }

    fn stats(&self) -> AllocationStats {
        self.stats
    }
}
