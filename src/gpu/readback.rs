//! GPU → CPU buffer readback.
//!
//! A MAP_READ staging buffer, a device-side copy, one queue submission, then
//! block (native) or await (wasm32) on `map_async` before copying the mapped
//! range out. This is the final-logits suspension point; a MoE router-logits
//! readback uses the same helper and is documented in DESIGN.md as a fourth,
//! model-class-specific suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{DopplerError, Result};
use crate::gpu::device::Device;

#[cfg(not(target_arch = "wasm32"))]
pub fn read_buffer_f32(device: &Device, source: &wgpu::Buffer, byte_len: u64) -> Result<Vec<f32>> {
    device.check_alive()?;
    let staging = device.raw().create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size: byte_len,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device
        .raw()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_copy"),
        });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, byte_len);
    device.queue().submit(std::iter::once(encoder.finish()));

    let mapped = Arc::new(AtomicBool::new(false));
    let map_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let mapped_clone = mapped.clone();
    let map_error_clone = map_error.clone();
    staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        if let Err(e) = result {
            *map_error_clone.lock().expect("readback map-error mutex poisoned") = Some(e.to_string());
        }
        mapped_clone.store(true, Ordering::Release);
    });

    while !mapped.load(Ordering::Acquire) {
        let poll_result = device.raw().poll(wgpu::PollType::Wait);
        if poll_result.is_err() {
            return Err(DopplerError::DeviceLost {
                reason: "device poll failed while waiting on buffer readback".into(),
            });
        }
    }
    if let Some(message) = map_error.lock().expect("readback map-error mutex poisoned").take() {
        return Err(DopplerError::validation(
            format!("buffer readback mapping failed: {message}"),
            &[],
            &[],
        ));
    }

    let view = staging.slice(..).get_mapped_range();
    let floats: &[f32] = bytemuck::cast_slice(&view);
    let result = floats.to_vec();
    drop(view);
    staging.unmap();
    Ok(result)
}

#[cfg(target_arch = "wasm32")]
pub async fn read_buffer_f32(device: &Device, source: &wgpu::Buffer, byte_len: u64) -> Result<Vec<f32>> {
    device.check_alive()?;
    let staging = device.raw().create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size: byte_len,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device
        .raw()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_copy"),
        });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, byte_len);
    device.queue().submit(std::iter::once(encoder.finish()));

    let mapped = Arc::new(AtomicBool::new(false));
    let map_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let mapped_clone = mapped.clone();
    let map_error_clone = map_error.clone();
    staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        if let Err(e) = result {
            *map_error_clone.lock().expect("readback map-error mutex poisoned") = Some(e.to_string());
        }
        mapped_clone.store(true, Ordering::Release);
    });

    let _ = device.raw().poll(wgpu::PollType::Poll);
    while !mapped.load(Ordering::Acquire) {
        wasm_bindgen_futures::JsFuture::from(js_sys::Promise::resolve(&wasm_bindgen::JsValue::NULL))
            .await
            .ok();
    }
    if let Some(message) = map_error.lock().expect("readback map-error mutex poisoned").take() {
        return Err(DopplerError::validation(
            format!("buffer readback mapping failed: {message}"),
            &[],
            &[],
        ));
    }

    let view = staging.slice(..).get_mapped_range();
    let floats: &[f32] = bytemuck::cast_slice(&view);
    let result = floats.to_vec();
    drop(view);
    staging.unmap();
    Ok(result)
}
