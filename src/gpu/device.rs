//! Device acquisition.
//!
//! Native uses `pollster::block_on` around the adapter/device request,
//! wasm32 uses real `async`/`.await`, and both paths install a device-lost
//! callback that surfaces as a first-class error instead of a bare log line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DopplerError, Result};

/// Boolean features exposed by the GPU device, captured once at acquisition
/// time.
#[derive(Clone, Copy, Debug)]
pub struct DeviceCapabilities {
    pub has_f16: bool,
    pub has_subgroups: bool,
    pub has_timestamp_query: bool,
    pub max_compute_workgroups_per_dimension: u32,
    pub max_compute_workgroup_storage_size: u32,
    pub storage_alignment: u64,
}

/// Shared device-lost flag. Cloned into the callback closure and polled by
/// the pipeline before every forward pass; once set it never clears — a
/// device loss is terminal for the device.
#[derive(Clone, Default)]
pub struct DeviceLostFlag(Arc<AtomicBool>);

impl DeviceLostFlag {
    pub fn is_lost(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn mark_lost(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// A live GPU device handle: queue submission, pipeline compilation,
/// bind-group-layout creation, buffer allocation, and capability query.
pub struct Device {
    pub(crate) raw: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub capabilities: DeviceCapabilities,
    pub lost: DeviceLostFlag,
    pub(crate) adapter_name: String,
}

impl Device {
    pub fn raw(&self) -> &wgpu::Device {
        &self.raw
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Fails fast with [`DopplerError::DeviceLost`] if the device has already
    /// reported a loss; every entry point that touches the GPU calls this
    /// first.
    pub fn check_alive(&self) -> Result<()> {
        if self.lost.is_lost() {
            return Err(DopplerError::DeviceLost {
                reason: format!("device `{}` was lost", self.adapter_name),
            });
        }
        Ok(())
    }

    pub fn create_bind_group_layout(
        &self,
        desc: &wgpu::BindGroupLayoutDescriptor,
    ) -> wgpu::BindGroupLayout {
        self.raw.create_bind_group_layout(desc)
    }
}

fn capabilities_from(adapter: &wgpu::Adapter, device: &wgpu::Device) -> DeviceCapabilities {
    let features = adapter.features();
    let limits = device.limits();
    DeviceCapabilities {
        has_f16: features.contains(wgpu::Features::SHADER_F16),
        has_subgroups: features.contains(wgpu::Features::SUBGROUP),
        has_timestamp_query: features.contains(wgpu::Features::TIMESTAMP_QUERY),
        max_compute_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
        max_compute_workgroup_storage_size: limits.max_compute_workgroup_storage_size,
        storage_alignment: limits.min_storage_buffer_offset_alignment as u64,
    }
}

fn install_device_lost_callback(device: &wgpu::Device, lost: DeviceLostFlag) {
    device.set_device_lost_callback(move |reason, message| {
        log::error!("GPU device lost: {:?} - {}", reason, message);
        lost.mark_lost();
    });
}

/// Requests a `SHADER_F16` + `SUBGROUP` + `TIMESTAMP_QUERY` feature set,
/// falling back progressively if the adapter rejects it, mirroring the
/// selector's own capability-fallback philosophy.
async fn request_device_with_fallback(
    adapter: &wgpu::Adapter,
) -> std::result::Result<(wgpu::Device, wgpu::Queue), wgpu::RequestDeviceError> {
    let tiers: [wgpu::Features; 4] = [
        wgpu::Features::SHADER_F16 | wgpu::Features::SUBGROUP | wgpu::Features::TIMESTAMP_QUERY,
        wgpu::Features::SHADER_F16 | wgpu::Features::SUBGROUP,
        wgpu::Features::SHADER_F16,
        wgpu::Features::empty(),
    ];
    let mut last_err = None;
    for features in tiers {
        let result = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("doppler device"),
                required_features: features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await;
        match result {
            Ok(pair) => return Ok(pair),
            Err(e) => {
                log::debug!("device request with features {features:?} rejected: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("tiers is non-empty"))
}

#[cfg(not(target_arch = "wasm32"))]
pub fn acquire_device() -> Result<Device> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .map_err(|e| DopplerError::Configuration(format!("no suitable GPU adapter: {e}")))?;

    let (raw, queue) = pollster::block_on(request_device_with_fallback(&adapter))
        .map_err(|e| DopplerError::Configuration(format!("device request failed: {e}")))?;

    let capabilities = capabilities_from(&adapter, &raw);
    let lost = DeviceLostFlag::default();
    install_device_lost_callback(&raw, lost.clone());

    Ok(Device {
        adapter_name: adapter.get_info().name,
        raw,
        queue,
        capabilities,
        lost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_flag_starts_alive() {
        let flag = DeviceLostFlag::default();
        assert!(!flag.is_lost());
    }

    #[test]
    fn device_lost_flag_is_terminal_once_marked() {
        let flag = DeviceLostFlag::default();
        flag.mark_lost();
        assert!(flag.is_lost());
        // a second loss report (or a spurious re-check) must not un-mark it
        flag.mark_lost();
        assert!(flag.is_lost());
    }

    #[test]
    fn device_lost_flag_clones_share_state() {
        let flag = DeviceLostFlag::default();
        let clone = flag.clone();
        clone.mark_lost();
        assert!(flag.is_lost());
    }
}

#[cfg(target_arch = "wasm32")]
pub async fn acquire_device() -> Result<Device> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::BROWSER_WEBGPU,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| DopplerError::Configuration(format!("no suitable GPU adapter: {e}")))?;

    let (raw, queue) = request_device_with_fallback(&adapter)
        .await
        .map_err(|e| DopplerError::Configuration(format!("device request failed: {e}")))?;

    let capabilities = capabilities_from(&adapter, &raw);
    let lost = DeviceLostFlag::default();
    install_device_lost_callback(&raw, lost.clone());

    Ok(Device {
        adapter_name: adapter.get_info().name,
        raw,
        queue,
        capabilities,
        lost,
    })
}
