//! Typed wgpu buffers for the step kernels

use std::marker::PhantomData;

use bytemuck::Pod;
use wgpu::util::DeviceExt;

use super::context::GpuContext;
use crate::error::{SimError, SimResult};

fn short_name<T>() -> &'static str {
    let name = std::any::type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}

/// A single uniform value, re-written only when it changes.
pub struct UniformBuffer<T> {
    buffer: wgpu::Buffer,
    previous: Vec<u8>,
    _content: PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    pub fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("uniform: {}", short_name::<T>())),
            size: std::mem::size_of::<T>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            previous: Vec::new(),
            _content: PhantomData,
        }
    }

    pub fn update(&mut self, queue: &wgpu::Queue, content: &T) {
        let bytes = bytemuck::bytes_of(content);
        if self.previous == bytes {
            return;
        }
        queue.write_buffer(&self.buffer, 0, bytes);
        self.previous = bytes.to_vec();
    }

    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }
}

/// Storage array of `len` elements. Never smaller than one element, since
/// wgpu rejects zero-sized bindings.
pub struct ArrayBuffer<T> {
    buffer: wgpu::Buffer,
    len: usize,
    _content: PhantomData<T>,
}

impl<T: Pod> ArrayBuffer<T> {
    const USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
        .union(wgpu::BufferUsages::COPY_DST)
        .union(wgpu::BufferUsages::COPY_SRC);

    pub fn new(device: &wgpu::Device, label: &str, len: usize) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (len.max(1) * std::mem::size_of::<T>()) as u64,
            usage: Self::USAGE,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            len,
            _content: PhantomData,
        }
    }

    pub fn with_data(device: &wgpu::Device, label: &str, data: &[T]) -> Self {
        if data.is_empty() {
            return Self::new(device, label, 0);
        }
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage: Self::USAGE,
        });
        Self {
            buffer,
            len: data.len(),
            _content: PhantomData,
        }
    }

    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }

    /// Overwrite the whole array.
    pub fn write(&self, queue: &wgpu::Queue, data: &[T]) -> SimResult<()> {
        if data.len() != self.len {
            return Err(SimError::ShapeMismatch {
                container: short_name::<T>(),
                expected: self.len,
                found: data.len(),
            });
        }
        if !data.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(data));
        }
        Ok(())
    }

    /// Copy the array back to the host through a staging buffer. Blocks.
    pub fn read(&self, ctx: &GpuContext) -> SimResult<Vec<T>> {
        if self.len == 0 {
            return Ok(Vec::new());
        }
        let size = (self.len * std::mem::size_of::<T>()) as u64;
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, size);
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        ctx.wait()?;

        match futures::executor::block_on(rx) {
            Ok(Ok(())) => {
                let mapped = slice.get_mapped_range();
                let data: Vec<T> = bytemuck::cast_slice(&mapped).to_vec();
                drop(mapped);
                staging.unmap();
                Ok(data)
            }
            Ok(Err(e)) => Err(SimError::Device(format!("buffer map failed: {e}"))),
            Err(_) => Err(SimError::Device("buffer map callback dropped".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name() {
        assert_eq!(short_name::<ArrayBuffer<u32>>(), "ArrayBuffer<u32>");
        assert_eq!(short_name::<u32>(), "u32");
    }
}
