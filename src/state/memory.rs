//! Memory spaces, allocation policies and copy streams
//!
//! Every state container is created through an [`Allocator`], which fixes the
//! container's [`MemorySpace`] for its whole lifetime. Bulk copies between two
//! containers are scheduled on a [`Stream`]: each field is copied as its own
//! task so independent fields overlap.

use std::sync::Arc;

use bytemuck::Zeroable;
use rayon::prelude::*;
use rayon::{Scope, ThreadPool, ThreadPoolBuilder};

use crate::error::{SimError, SimResult};

/// Where a container's buffers live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    /// Owned by the controller; read and edited by callers.
    Host,
    /// Owned by the compute device; only touched by the step passes.
    Device,
}

/// Allocation policy chosen when a container is constructed.
pub trait Allocator {
    /// Memory space of every buffer this allocator produces.
    fn space(&self) -> MemorySpace;

    /// Allocate `len` zero-initialized elements for the named field.
    fn zeroed<T>(&self, field: &'static str, len: usize) -> SimResult<Vec<T>>
    where
        T: Zeroable + Clone + Send + Sync;
}

fn reserve<T>(field: &'static str, len: usize) -> SimResult<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| SimError::Allocation { field, len })?;
    Ok(buffer)
}

/// Plain host allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostAllocator;

impl Allocator for HostAllocator {
    fn space(&self) -> MemorySpace {
        MemorySpace::Host
    }

    fn zeroed<T>(&self, field: &'static str, len: usize) -> SimResult<Vec<T>>
    where
        T: Zeroable + Clone + Send + Sync,
    {
        let mut buffer = reserve(field, len)?;
        buffer.resize(len, T::zeroed());
        Ok(buffer)
    }
}

/// Device allocation for the CPU compute device.
///
/// Buffers are zero-filled by the device's own worker threads so pages are
/// first touched by the threads that will later step them.
#[derive(Clone)]
pub struct DeviceAllocator {
    pool: Arc<ThreadPool>,
}

impl DeviceAllocator {
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        Self { pool }
    }
}

impl Allocator for DeviceAllocator {
    fn space(&self) -> MemorySpace {
        MemorySpace::Device
    }

    fn zeroed<T>(&self, field: &'static str, len: usize) -> SimResult<Vec<T>>
    where
        T: Zeroable + Clone + Send + Sync,
    {
        let mut buffer = reserve(field, len)?;
        self.pool
            .install(|| buffer.par_extend((0..len).into_par_iter().map(|_| T::zeroed())));
        Ok(buffer)
    }
}

/// An execution stream: a named pool on which copy tasks are issued.
///
/// Work issued inside one [`Stream::scope`] call may run concurrently and is
/// complete when the call returns.
#[derive(Clone)]
pub struct Stream {
    label: Arc<str>,
    pool: Arc<ThreadPool>,
}

impl Stream {
    /// Create a stream backed by `threads` workers.
    pub fn new(label: &str, threads: usize) -> SimResult<Self> {
        let name: Arc<str> = Arc::from(label);
        let thread_label = name.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(move |i| format!("{thread_label}-{i}"))
            .build()
            .map_err(|e| SimError::DeviceUnavailable(format!("stream `{label}`: {e}")))?;
        Ok(Self {
            label: name,
            pool: Arc::new(pool),
        })
    }

    /// Stream name, used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The pool executing this stream's work.
    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    /// Issue a group of tasks and wait for all of them.
    pub fn scope<'scope, F>(&self, issue: F)
    where
        F: FnOnce(&Scope<'scope>) + Send,
    {
        self.pool.scope(issue);
    }

    /// Run `work` on this stream's threads.
    pub fn install<R, F>(&self, work: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(work)
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("label", &self.label)
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

/// Queue one field copy on `scope`.
pub(crate) fn copy_field<'scope, T>(scope: &Scope<'scope>, dst: &'scope mut [T], src: &'scope [T])
where
    T: Copy + Send + Sync,
{
    scope.spawn(move |_| dst.copy_from_slice(src));
}

/// Fail with [`SimError::ShapeMismatch`] unless the lengths agree.
pub(crate) fn check_shape(container: &'static str, expected: usize, found: usize) -> SimResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(SimError::ShapeMismatch {
            container,
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_allocator_zeroes() {
        let buffer: Vec<[f64; 3]> = HostAllocator.zeroed("pos", 5).unwrap();
        assert_eq!(buffer, vec![[0.0; 3]; 5]);
        assert_eq!(HostAllocator.space(), MemorySpace::Host);
    }

    #[test]
    fn test_device_allocator_zeroes() {
        let stream = Stream::new("alloc", 2).unwrap();
        let allocator = DeviceAllocator::new(stream.pool().clone());
        let flags: Vec<bool> = allocator.zeroed("fixed", 1000).unwrap();
        assert_eq!(flags.len(), 1000);
        assert!(flags.iter().all(|f| !f));
        assert_eq!(allocator.space(), MemorySpace::Device);
    }

    #[test]
    fn test_stream_copies_fields() {
        let stream = Stream::new("copy", 2).unwrap();
        let src_a = vec![1.0_f64, 2.0, 3.0];
        let src_b = vec![7_u32, 8];
        let mut dst_a = vec![0.0_f64; 3];
        let mut dst_b = vec![0_u32; 2];
        let (a, b) = (&mut dst_a, &mut dst_b);
        let (from_a, from_b) = (&src_a, &src_b);
        stream.scope(move |s| {
            copy_field(s, a, from_a);
            copy_field(s, b, from_b);
        });
        assert_eq!(dst_a, src_a);
        assert_eq!(dst_b, src_b);
    }

    #[test]
    fn test_check_shape() {
        assert!(check_shape("masses", 3, 3).is_ok());
        assert_eq!(
            check_shape("masses", 3, 4),
            Err(SimError::ShapeMismatch {
                container: "masses",
                expected: 3,
                found: 4
            })
        );
    }
}
