//! Generic dispatch helper shared by every pipeline call site.
//!
//! Building one bind group per kernel call inline repeats the same
//! `create_bind_group` + `dispatch_workgroups` shape at every call site.
//! Since the registry already carries each variant's binding layout as data
//! ([`KernelVariant::bindings`]), that boilerplate collapses into one
//! function: callers supply buffers in binding-index order and an element
//! count, this resolves the compiled pipeline, builds the bind group, folds
//! the dispatch into the device's per-dimension limit, and records it.

use crate::error::Result;
use crate::gpu::device::Device;
use crate::gpu::pool::PooledBuffer;
use crate::gpu::recorder::CommandRecorder;
use crate::kernel::registry::{KernelRegistry, Operation};
use crate::kernel::validate::fold_dispatch_1d;

/// One bind-group slot: a buffer and whether it's bound as a uniform.
pub enum Binding<'a> {
    Storage(&'a PooledBuffer),
    Uniform(&'a PooledBuffer),
}

/// Resolves `(operation, variant_name)` to a compiled pipeline, builds a bind
/// group from `bindings` in declared order, folds `total_elements` into a
/// dispatch grid sized by the variant's workgroup size, and records it.
#[cfg(not(target_arch = "wasm32"))]
pub fn dispatch_kernel(
    device: &Device,
    registry: &KernelRegistry,
    recorder: &mut CommandRecorder<'_>,
    operation: Operation,
    variant_name: &'static str,
    bindings: &[Binding<'_>],
    total_elements: u64,
    label: &str,
) -> Result<()> {
    let compiled = registry.get_or_compile(device, operation, variant_name)?;
    let entries: Vec<wgpu::BindGroupEntry> = bindings
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let buffer = match b {
                Binding::Storage(buf) => &buf.raw,
                Binding::Uniform(buf) => &buf.raw,
            };
            wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            }
        })
        .collect();
    let bind_group = device.raw().create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &compiled.bind_group_layout,
        entries: &entries,
    });

    let workgroup_elems = compiled.workgroup_size[0] as u64;
    let total_workgroups = total_elements.div_ceil(workgroup_elems.max(1));
    let (x, y) = fold_dispatch_1d(
        total_workgroups,
        device.capabilities.max_compute_workgroups_per_dimension,
    )?;

    recorder.dispatch(&compiled.pipeline, &bind_group, [x, y, 1], label)
}

#[cfg(target_arch = "wasm32")]
pub async fn dispatch_kernel(
    device: &Device,
    registry: &KernelRegistry,
    recorder: &mut CommandRecorder<'_>,
    operation: Operation,
    variant_name: &'static str,
    bindings: &[Binding<'_>],
    total_elements: u64,
    label: &str,
) -> Result<()> {
    let compiled = registry.get_or_compile(device, operation, variant_name).await?;
    let entries: Vec<wgpu::BindGroupEntry> = bindings
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let buffer = match b {
                Binding::Storage(buf) => &buf.raw,
                Binding::Uniform(buf) => &buf.raw,
            };
            wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            }
        })
        .collect();
    let bind_group = device.raw().create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &compiled.bind_group_layout,
        entries: &entries,
    });

    let workgroup_elems = compiled.workgroup_size[0] as u64;
    let total_workgroups = total_elements.div_ceil(workgroup_elems.max(1));
    let (x, y) = fold_dispatch_1d(
        total_workgroups,
        device.capabilities.max_compute_workgroups_per_dimension,
    )?;

    recorder.dispatch(&compiled.pipeline, &bind_group, [x, y, 1], label)
}
