//! wgpu compute device
//!
//! The body lives in storage buffers in single precision. A batch of steps is
//! recorded into one command encoder (four dispatches per step) and submitted
//! once; wgpu orders the dispatches, so no host round trip happens inside a
//! batch. Readback goes through staging buffers and only happens on
//! [`download`](ComputeDevice::download).

pub mod buffers;
pub mod context;
pub mod layout;

use std::sync::Arc;

use log::debug;

use self::buffers::{ArrayBuffer, UniformBuffer};
use self::context::GpuContext;
use self::layout::{
    constraint_records, to_vec4s, widen_into, GpuConstraint, GpuJointPoint, GpuMassInfo, GpuParams,
    WORKGROUP_SIZE,
};
use super::traits::ComputeDevice;
use crate::config::SimConfig;
use crate::constraint::ConstraintTable;
use crate::engine::{Clock, SpringIncidence, StepParams};
use crate::error::{SimError, SimResult};
use crate::math::{IndexPair, ZERO3};
use crate::state::{BodyShape, BodyState};

const SHADER: &str = include_str!("shaders/step.wgsl");

/// The four step kernels in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KernelKind {
    Spring,
    Anchor,
    Point,
    Mass,
}

impl KernelKind {
    const ALL: [KernelKind; 4] = [
        KernelKind::Spring,
        KernelKind::Anchor,
        KernelKind::Point,
        KernelKind::Mass,
    ];

    fn entry_point(self) -> &'static str {
        match self {
            KernelKind::Spring => "spring_pass",
            KernelKind::Anchor => "anchor_pass",
            KernelKind::Point => "point_pass",
            KernelKind::Mass => "mass_pass",
        }
    }

    /// Bindings the entry point statically uses; auto layouts contain only
    /// these.
    fn bindings(self) -> &'static [u32] {
        match self {
            KernelKind::Spring => &[0, 2, 3, 6, 7, 8],
            KernelKind::Anchor => &[0, 2, 11, 12, 13, 14],
            KernelKind::Point => &[0, 2, 11, 12, 13, 15],
            KernelKind::Mass => &[0, 1, 2, 3, 4, 5, 8, 9, 10],
        }
    }

    fn count(self, shape: &BodyShape) -> usize {
        match self {
            KernelKind::Spring => shape.springs,
            KernelKind::Anchor => shape.joints.anchors,
            KernelKind::Point => shape.joints.points,
            KernelKind::Mass => shape.masses,
        }
    }
}

struct Kernel {
    kind: KernelKind,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    workgroups: u32,
}

/// Device-resident body, one buffer per field.
struct StateBuffers {
    mass_info: ArrayBuffer<GpuMassInfo>,
    pos: ArrayBuffer<[f32; 4]>,
    vel: ArrayBuffer<[f32; 4]>,
    acc: ArrayBuffer<[f32; 4]>,
    force_extern: ArrayBuffer<[f32; 4]>,
    spring_params: ArrayBuffer<[f32; 4]>,
    spring_ends: ArrayBuffer<IndexPair>,
    spring_force: ArrayBuffer<[f32; 4]>,
    incidence: ArrayBuffer<u32>,
    constraints: ArrayBuffer<GpuConstraint>,
    anchor_ends: ArrayBuffer<IndexPair>,
    anchor_dir: ArrayBuffer<[f32; 4]>,
    anchor_theta: ArrayBuffer<f32>,
    anchor_angle: ArrayBuffer<f32>,
    joint_points: ArrayBuffer<GpuJointPoint>,
}

impl StateBuffers {
    fn new(device: &wgpu::Device, shape: &BodyShape) -> Self {
        let (m, s, j) = (shape.masses, shape.springs, shape.joints);
        Self {
            mass_info: ArrayBuffer::new(device, "mass info", m),
            pos: ArrayBuffer::new(device, "mass pos", m),
            vel: ArrayBuffer::new(device, "mass vel", m),
            acc: ArrayBuffer::new(device, "mass acc", m),
            force_extern: ArrayBuffer::new(device, "mass force_extern", m),
            spring_params: ArrayBuffer::new(device, "spring params", s),
            spring_ends: ArrayBuffer::new(device, "spring ends", s),
            spring_force: ArrayBuffer::new(device, "spring force", s),
            incidence: ArrayBuffer::new(device, "spring incidence", m + 1 + 2 * s),
            constraints: ArrayBuffer::new(device, "constraints", 0),
            anchor_ends: ArrayBuffer::new(device, "anchor ends", j.anchors),
            anchor_dir: ArrayBuffer::new(device, "anchor dir", j.anchors),
            anchor_theta: ArrayBuffer::new(device, "anchor theta", j.anchors),
            anchor_angle: ArrayBuffer::new(device, "anchor angle", j.anchors),
            joint_points: ArrayBuffer::new(device, "joint points", j.points),
        }
    }

    fn resource(&self, binding: u32) -> Option<wgpu::BindingResource<'_>> {
        Some(match binding {
            1 => self.mass_info.binding(),
            2 => self.pos.binding(),
            3 => self.vel.binding(),
            4 => self.acc.binding(),
            5 => self.force_extern.binding(),
            6 => self.spring_params.binding(),
            7 => self.spring_ends.binding(),
            8 => self.spring_force.binding(),
            9 => self.incidence.binding(),
            10 => self.constraints.binding(),
            11 => self.anchor_ends.binding(),
            12 => self.anchor_dir.binding(),
            13 => self.anchor_theta.binding(),
            14 => self.anchor_angle.binding(),
            15 => self.joint_points.binding(),
            _ => return None,
        })
    }
}

/// GPU device holding a single-precision copy of the body.
pub struct GpuDevice {
    ctx: GpuContext,
    name: String,
    shape: BodyShape,
    params: UniformBuffer<GpuParams>,
    buffers: StateBuffers,
    kernels: Vec<Kernel>,
    constraint_version: Option<u64>,
    num_constraints: usize,
    theta: Vec<f64>,
    clock: Clock,
}

impl GpuDevice {
    pub fn new(shape: BodyShape, config: &SimConfig) -> SimResult<Self> {
        Self::with_context(GpuContext::new()?, shape, config)
    }

    pub fn with_context(ctx: GpuContext, shape: BodyShape, config: &SimConfig) -> SimResult<Self> {
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("step kernels"),
                source: wgpu::ShaderSource::Wgsl(SHADER.into()),
            });
        let params = UniformBuffer::new(&ctx.device);
        let buffers = StateBuffers::new(&ctx.device, &shape);
        let kernels = KernelKind::ALL
            .iter()
            .map(|&kind| {
                let pipeline = ctx
                    .device
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(kind.entry_point()),
                        layout: None,
                        module: &module,
                        entry_point: Some(kind.entry_point()),
                        compilation_options: Default::default(),
                        cache: None,
                    });
                let bind_group = bind_kernel(&ctx.device, &pipeline, kind, &params, &buffers)?;
                let workgroups = (kind.count(&shape) as u32).div_ceil(WORKGROUP_SIZE);
                Ok(Kernel {
                    kind,
                    pipeline,
                    bind_group,
                    workgroups,
                })
            })
            .collect::<SimResult<Vec<_>>>()?;
        if let Some(e) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(SimError::DeviceUnavailable(format!("kernel setup failed: {e}")));
        }

        Ok(Self {
            name: format!("gpu ({})", ctx.adapter_name),
            ctx,
            shape,
            params,
            buffers,
            kernels,
            constraint_version: None,
            num_constraints: 0,
            theta: vec![0.0; shape.joints.anchors],
            clock: Clock::new(0.0, config.dt),
        })
    }

    fn rebind(&mut self, kind: KernelKind) -> SimResult<()> {
        if let Some(kernel) = self.kernels.iter_mut().find(|k| k.kind == kind) {
            kernel.bind_group = bind_kernel(
                &self.ctx.device,
                &kernel.pipeline,
                kind,
                &self.params,
                &self.buffers,
            )?;
        }
        Ok(())
    }
}

fn bind_kernel(
    device: &wgpu::Device,
    pipeline: &wgpu::ComputePipeline,
    kind: KernelKind,
    params: &UniformBuffer<GpuParams>,
    buffers: &StateBuffers,
) -> SimResult<wgpu::BindGroup> {
    let entries = kind
        .bindings()
        .iter()
        .map(|&binding| {
            let resource = if binding == 0 {
                params.binding()
            } else {
                buffers.resource(binding).ok_or_else(|| {
                    SimError::Device(format!("no buffer for binding {binding}"))
                })?
            };
            Ok(wgpu::BindGroupEntry { binding, resource })
        })
        .collect::<SimResult<Vec<_>>>()?;
    Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(kind.entry_point()),
        layout: &pipeline.get_bind_group_layout(0),
        entries: &entries,
    }))
}

impl ComputeDevice for GpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn upload(&mut self, host: &BodyState) -> SimResult<()> {
        let queue = &self.ctx.queue;
        let b = &self.buffers;
        let masses = &host.masses;
        let info: Vec<GpuMassInfo> = (0..masses.len())
            .map(|i| GpuMassInfo::new(masses.m[i], masses.fixed[i], masses.constrain[i]))
            .collect();
        b.mass_info.write(queue, &info)?;
        b.pos.write(queue, &to_vec4s(&masses.pos))?;
        b.vel.write(queue, &to_vec4s(&masses.vel))?;
        b.acc.write(queue, &to_vec4s(&masses.acc))?;
        b.force_extern.write(queue, &to_vec4s(&masses.force_extern))?;

        let springs = &host.springs;
        let spring_params: Vec<[f32; 4]> = (0..springs.len())
            .map(|s| {
                [
                    springs.k[s] as f32,
                    springs.rest[s] as f32,
                    springs.damping[s] as f32,
                    0.0,
                ]
            })
            .collect();
        b.spring_params.write(queue, &spring_params)?;
        b.spring_ends.write(queue, &springs.ends)?;
        let incidence = SpringIncidence::build(springs, masses.len());
        let mut flat = incidence.offsets;
        flat.extend_from_slice(&incidence.entries);
        b.incidence.write(queue, &flat)?;

        let anchors = &host.joints.anchors;
        b.anchor_ends.write(queue, &anchors.ends)?;
        b.anchor_dir.write(queue, &to_vec4s(&anchors.dir))?;
        let theta: Vec<f32> = anchors.theta.iter().map(|&t| t as f32).collect();
        b.anchor_theta.write(queue, &theta)?;
        let angle: Vec<f32> = anchors.angle.iter().map(|&a| a as f32).collect();
        b.anchor_angle.write(queue, &angle)?;
        let points = &host.joints.points;
        let joint_points: Vec<GpuJointPoint> = (0..points.mass.len())
            .map(|p| GpuJointPoint {
                mass: points.mass[p],
                anchor: points.anchor[p],
                side: i32::from(points.side[p]),
                _pad: 0,
            })
            .collect();
        b.joint_points.write(queue, &joint_points)?;

        self.theta.clone_from(&anchors.theta);
        self.clock.reset(host.time);
        Ok(())
    }

    fn download(&mut self, host: &mut BodyState) -> SimResult<()> {
        if host.shape() != self.shape {
            return Err(SimError::ShapeMismatch {
                container: "body",
                expected: self.shape.masses,
                found: host.masses.len(),
            });
        }
        let b = &self.buffers;
        widen_into(&mut host.masses.pos, &b.pos.read(&self.ctx)?);
        widen_into(&mut host.masses.vel, &b.vel.read(&self.ctx)?);
        widen_into(&mut host.masses.acc, &b.acc.read(&self.ctx)?);
        host.masses.force.fill(ZERO3);
        widen_into(&mut host.joints.anchors.dir, &b.anchor_dir.read(&self.ctx)?);
        for (dst, src) in host
            .joints
            .anchors
            .angle
            .iter_mut()
            .zip(b.anchor_angle.read(&self.ctx)?)
        {
            *dst = f64::from(src);
        }
        host.joints.anchors.theta.clone_from(&self.theta);
        host.time = self.clock.now();
        Ok(())
    }

    fn ensure_constraints(&mut self, table: &Arc<ConstraintTable>) -> SimResult<()> {
        if self.constraint_version == Some(table.version) {
            return Ok(());
        }
        let records = constraint_records(table);
        debug!(
            "GPU device: uploading {} constraints (v{})",
            records.len(),
            table.version
        );
        self.buffers.constraints = ArrayBuffer::with_data(&self.ctx.device, "constraints", &records);
        self.num_constraints = records.len();
        self.constraint_version = Some(table.version);
        self.rebind(KernelKind::Mass)
    }

    fn set_joint_increments(&mut self, theta: &[f64]) -> SimResult<()> {
        if theta.len() != self.theta.len() {
            return Err(SimError::ShapeMismatch {
                container: "joint increments",
                expected: self.theta.len(),
                found: theta.len(),
            });
        }
        let narrow: Vec<f32> = theta.iter().map(|&t| t as f32).collect();
        self.buffers.anchor_theta.write(&self.ctx.queue, &narrow)?;
        self.theta.copy_from_slice(theta);
        Ok(())
    }

    fn launch(&mut self, params: &StepParams, steps: u64) -> SimResult<()> {
        if steps == 0 {
            return Ok(());
        }
        let uniforms = GpuParams::new(params, &self.shape, self.num_constraints);
        self.params.update(&self.ctx.queue, &uniforms);

        self.ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("step batch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("step batch"),
                timestamp_writes: None,
            });
            for _ in 0..steps {
                for kernel in self.kernels.iter().filter(|k| k.workgroups > 0) {
                    pass.set_pipeline(&kernel.pipeline);
                    pass.set_bind_group(0, &kernel.bind_group, &[]);
                    pass.dispatch_workgroups(kernel.workgroups, 1, 1);
                }
            }
        }
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        if let Some(e) = pollster::block_on(self.ctx.device.pop_error_scope()) {
            return Err(SimError::Device(format!("step dispatch failed: {e}")));
        }
        self.clock.advance(steps);
        Ok(())
    }

    fn synchronize(&mut self) -> SimResult<()> {
        self.ctx.wait()
    }

    fn time(&self) -> f64 {
        self.clock.now()
    }
}
