//! Command recorder: accumulates compute dispatches and issues exactly one
//! queue submission per `submit()` call.
//!
//! Dispatches accumulate directly against a live `wgpu::CommandEncoder`
//! rather than an intermediate replayed command list, since every dispatch
//! here is a compute dispatch with no render-pass state machine to defer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DopplerError, Result};
use crate::gpu::device::Device;
use crate::gpu::pool::{BufferPool, PooledBuffer};

/// A handle returned by `submit()`. Awaiting it (native: a blocking device
/// poll loop; wasm32: a real future) indicates GPU completion and releases
/// every temporary this recorder tracked back to the pool.
pub struct SubmitCompletion<'a> {
    pool: &'a BufferPool,
    tracked: Vec<Arc<PooledBuffer>>,
    done: Arc<AtomicBool>,
}

impl<'a> SubmitCompletion<'a> {
    /// Blocks (native) or awaits (wasm32) until the submission completes,
    /// then releases all tracked temporaries.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn wait(self, device: &Device) -> Result<()> {
        device.check_alive()?;
        while !self.done.load(Ordering::Acquire) {
            let poll_result = device.raw().poll(wgpu::PollType::Wait);
            if poll_result.is_err() {
                return Err(DopplerError::DeviceLost {
                    reason: "device poll failed while waiting on submission".into(),
                });
            }
        }
        for buf in self.tracked {
            self.pool.release(buf);
        }
        Ok(())
    }

    #[cfg(target_arch = "wasm32")]
    pub async fn wait(self, device: &Device) -> Result<()> {
        device.check_alive()?;
        let _ = device.raw().poll(wgpu::PollType::Poll);
        while !self.done.load(Ordering::Acquire) {
            wasm_bindgen_futures::JsFuture::from(js_sys::Promise::resolve(&wasm_bindgen::JsValue::NULL))
                .await
                .ok();
        }
        for buf in self.tracked {
            self.pool.release(buf);
        }
        Ok(())
    }
}

/// Accumulates dispatches between `begin()` and `submit()`. Invariant: every
/// dispatch recorded in that window executes in a single queue submission —
/// there is no implicit split.
pub struct CommandRecorder<'a> {
    device: &'a Device,
    pool: &'a BufferPool,
    encoder: Option<wgpu::CommandEncoder>,
    tracked: Vec<Arc<PooledBuffer>>,
    pipeline_label: String,
    dispatch_count: u32,
}

impl<'a> CommandRecorder<'a> {
    pub fn begin(device: &'a Device, pool: &'a BufferPool, label: &str) -> Result<Self> {
        device.check_alive()?;
        let encoder = device
            .raw()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Ok(CommandRecorder {
            device,
            pool,
            encoder: Some(encoder),
            tracked: Vec::new(),
            pipeline_label: String::new(),
            dispatch_count: 0,
        })
    }

    /// Records one compute dispatch. `workgroups` is already 2-D-folded by the
    /// caller when the 1-D count would exceed
    /// `max_compute_workgroups_per_dimension` (kernel-invocation validation).
    pub fn dispatch(
        &mut self,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        workgroups: [u32; 3],
        label: &str,
    ) -> Result<()> {
        self.device.check_alive()?;
        let max = self.device.capabilities.max_compute_workgroups_per_dimension;
        for (axis, &count) in workgroups.iter().enumerate() {
            if count > max {
                return Err(DopplerError::DispatchExceedsLimit {
                    requested: count,
                    max,
                });
            }
            let _ = axis;
        }

        self.pipeline_label = label.to_string();
        let encoder = self.encoder.as_mut().expect("recorder used after submit");
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        drop(pass);
        self.dispatch_count += 1;
        Ok(())
    }

    /// Records a device-side buffer-to-buffer copy (e.g. a KV-cache write at
    /// a known offset) without going through a compute pipeline.
    pub fn copy_buffer(
        &mut self,
        src: &wgpu::Buffer,
        src_offset: u64,
        dst: &wgpu::Buffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.device.check_alive()?;
        let encoder = self.encoder.as_mut().expect("recorder used after submit");
        encoder.copy_buffer_to_buffer(src, src_offset, dst, dst_offset, size);
        Ok(())
    }

    /// Registers a temporary buffer for release once this recorder's
    /// submission completes.
    pub fn track_temporary(&mut self, buffer: Arc<PooledBuffer>) {
        self.pool.mark_tracked(&buffer);
        self.tracked.push(buffer);
    }

    pub fn dispatch_count(&self) -> u32 {
        self.dispatch_count
    }

    /// Issues exactly one queue submission containing every dispatch recorded
    /// since `begin()`.
    pub fn submit(mut self) -> Result<SubmitCompletion<'a>> {
        self.device.check_alive()?;
        let encoder = self.encoder.take().expect("submit called twice");
        let buffer = encoder.finish();
        let done = Arc::new(AtomicBool::new(false));
        let done_clone = done.clone();
        self.device
            .queue()
            .on_submitted_work_done(move || done_clone.store(true, Ordering::Release));
        self.device.queue().submit(std::iter::once(buffer));

        Ok(SubmitCompletion {
            pool: self.pool,
            tracked: std::mem::take(&mut self.tracked),
            done,
        })
    }
}
