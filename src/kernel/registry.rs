//! Static kernel table plus a lazy, cached pipeline compiler.
//!
//! Pushes a validation error scope around `create_compute_pipeline`, pops it
//! synchronously on native via `pollster::block_on`, and skips the pop on
//! wasm32 since error-scope pop ordering isn't guaranteed across futures
//! there. Pipelines compile lazily and are cached by `(operation, variant)`
//! instead of a single shader name, since one operation has many variants.

use std::collections::HashMap;
use std::sync::Mutex;

use bitflags::bitflags;

use crate::error::{DopplerError, Result};
use crate::gpu::device::Device;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Capability: u32 {
        const F16             = 0b001;
        const SUBGROUPS       = 0b010;
        const TIMESTAMP_QUERY = 0b100;
    }
}

impl Capability {
    pub fn satisfied_by(self, caps: &crate::gpu::DeviceCapabilities) -> bool {
        if self.contains(Capability::F16) && !caps.has_f16 {
            return false;
        }
        if self.contains(Capability::SUBGROUPS) && !caps.has_subgroups {
            return false;
        }
        if self.contains(Capability::TIMESTAMP_QUERY) && !caps.has_timestamp_query {
            return false;
        }
        true
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Matmul,
    Attention,
    RmsNorm,
    Dequant,
    Softmax,
    Gather,
    Residual,
    Activation,
    Sample,
    Rope,
    ScatterAdd,
    FusedMatmulNorm,
    FusedFfn,
}

/// A single binding slot in a kernel's bind group layout.
#[derive(Clone, Debug)]
pub struct BindingDescriptor {
    pub index: u32,
    pub kind: BindingKind,
    pub read_only: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BindingKind {
    StorageBuffer,
    UniformBuffer,
}

/// A reference to WGSL source. The shader text itself is out of this
/// implementation's scope (shaders excluded); this
/// holds the label the pipeline cache keys on and the entry point name.
#[derive(Clone, Debug)]
pub struct ShaderSource {
    pub label: &'static str,
    pub wgsl: &'static str,
}

/// One variant of one operation: which shader, which entry point, its
/// dispatch shape, the capabilities it needs, and its binding layout.
#[derive(Clone, Debug)]
pub struct KernelVariant {
    pub operation: Operation,
    pub name: &'static str,
    pub shader: ShaderSource,
    pub entry_point: &'static str,
    pub workgroup_size: [u32; 3],
    pub required_capabilities: Capability,
    pub bindings: Vec<BindingDescriptor>,
    pub shared_memory_bytes: u32,
}

/// A compiled pipeline plus the bind-group layout it was built from.
pub struct CompiledKernel {
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub workgroup_size: [u32; 3],
}

fn build_bind_group_layout(device: &Device, variant: &KernelVariant) -> wgpu::BindGroupLayout {
    let entries: Vec<wgpu::BindGroupLayoutEntry> = variant
        .bindings
        .iter()
        .map(|b| wgpu::BindGroupLayoutEntry {
            binding: b.index,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: match b.kind {
                    BindingKind::StorageBuffer => wgpu::BufferBindingType::Storage {
                        read_only: b.read_only,
                    },
                    BindingKind::UniformBuffer => wgpu::BufferBindingType::Uniform,
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(variant.shader.label),
        entries: &entries,
    })
}

#[cfg(not(target_arch = "wasm32"))]
fn compile_with_error_scope(
    device: &Device,
    variant: &KernelVariant,
) -> Result<CompiledKernel> {
    let raw = device.raw();
    raw.push_error_scope(wgpu::ErrorFilter::Validation);

    let module = raw.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(variant.shader.label),
        source: wgpu::ShaderSource::Wgsl(variant.shader.wgsl.into()),
    });
    let bind_group_layout = build_bind_group_layout(device, variant);
    let pipeline_layout = raw.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(variant.shader.label),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    let pipeline = raw.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(variant.shader.label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some(variant.entry_point),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });

    let error = pollster::block_on(raw.pop_error_scope());
    if let Some(e) = error {
        return Err(DopplerError::PipelineCompilation {
            label: variant.shader.label.to_string(),
            source_message: e.to_string(),
        });
    }

    Ok(CompiledKernel {
        pipeline,
        bind_group_layout,
        workgroup_size: variant.workgroup_size,
    })
}

#[cfg(target_arch = "wasm32")]
async fn compile_with_error_scope(
    device: &Device,
    variant: &KernelVariant,
) -> Result<CompiledKernel> {
    // wgpu requires error scopes to be popped in reverse order, and async
    // futures don't guarantee ordering across concurrent compiles on wasm32;
    // error scopes are skipped entirely on wasm32 and devtools takes over
    // surfacing compile failures there.
    let raw = device.raw();
    let module = raw.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(variant.shader.label),
        source: wgpu::ShaderSource::Wgsl(variant.shader.wgsl.into()),
    });
    let bind_group_layout = build_bind_group_layout(device, variant);
    let pipeline_layout = raw.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(variant.shader.label),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    let pipeline = raw.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(variant.shader.label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some(variant.entry_point),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });

    Ok(CompiledKernel {
        pipeline,
        bind_group_layout,
        workgroup_size: variant.workgroup_size,
    })
}

/// Static operation → variant table, plus the lazy pipeline cache.
pub struct KernelRegistry {
    variants: HashMap<(Operation, &'static str), KernelVariant>,
    cache: Mutex<HashMap<(Operation, &'static str), std::sync::Arc<CompiledKernel>>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        KernelRegistry {
            variants: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, variant: KernelVariant) {
        self.variants.insert((variant.operation, variant.name), variant);
    }

    pub fn variant(&self, operation: Operation, name: &str) -> Option<&KernelVariant> {
        self.variants
            .iter()
            .find(|((op, n), _)| *op == operation && *n == name)
            .map(|(_, v)| v)
    }

    /// Cache hits are synchronous; a miss compiles (the one cooperative
    /// suspension point charged to "pipeline compilation miss").
    #[cfg(not(target_arch = "wasm32"))]
    pub fn get_or_compile(
        &self,
        device: &Device,
        operation: Operation,
        name: &'static str,
    ) -> Result<std::sync::Arc<CompiledKernel>> {
        if let Some(hit) = self.cache.lock().unwrap().get(&(operation, name)) {
            return Ok(hit.clone());
        }
        let variant = self
            .variants
            .iter()
            .find(|((op, n), _)| *op == operation && *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| {
                DopplerError::Configuration(format!(
                    "no registered kernel variant `{name}` for {operation:?}"
                ))
            })?;
        if !variant.required_capabilities.satisfied_by(&device.capabilities) {
            return Err(DopplerError::Capability {
                capability: "variant-specific capability bitmask",
                fallback_variant: None,
            });
        }
        let compiled = std::sync::Arc::new(compile_with_error_scope(device, variant)?);
        self.cache
            .lock()
            .unwrap()
            .insert((operation, name), compiled.clone());
        log::debug!("kernel registry: compiled {operation:?}/{name}");
        Ok(compiled)
    }

    #[cfg(target_arch = "wasm32")]
    pub async fn get_or_compile(
        &self,
        device: &Device,
        operation: Operation,
        name: &'static str,
    ) -> Result<std::sync::Arc<CompiledKernel>> {
        if let Some(hit) = self.cache.lock().unwrap().get(&(operation, name)) {
            return Ok(hit.clone());
        }
        let variant = self
            .variants
            .iter()
            .find(|((op, n), _)| *op == operation && *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| {
                DopplerError::Configuration(format!(
                    "no registered kernel variant `{name}` for {operation:?}"
                ))
            })?;
        if !variant.required_capabilities.satisfied_by(&device.capabilities) {
            return Err(DopplerError::Capability {
                capability: "variant-specific capability bitmask",
                fallback_variant: None,
            });
        }
        let compiled = std::sync::Arc::new(compile_with_error_scope(device, variant).await?);
        self.cache
            .lock()
            .unwrap()
            .insert((operation, name), compiled.clone());
        Ok(compiled)
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_variant(op: Operation, name: &'static str, caps: Capability) -> KernelVariant {
        KernelVariant {
            operation: op,
            name,
            shader: ShaderSource {
                label: name,
                wgsl: "",
            },
            entry_point: "main",
            workgroup_size: [64, 1, 1],
            required_capabilities: caps,
            bindings: vec![],
            shared_memory_bytes: 0,
        }
    }

    #[test]
    fn capability_satisfied_by_checks_each_bit() {
        let caps = crate::gpu::DeviceCapabilities {
            has_f16: true,
            has_subgroups: false,
            has_timestamp_query: false,
            max_compute_workgroups_per_dimension: 65535,
            max_compute_workgroup_storage_size: 16384,
            storage_alignment: 256,
        };
        assert!(Capability::F16.satisfied_by(&caps));
        assert!(!Capability::SUBGROUPS.satisfied_by(&caps));
        assert!(!(Capability::F16 | Capability::SUBGROUPS).satisfied_by(&caps));
    }

    #[test]
    fn registry_lookup_by_operation_and_name() {
        let mut reg = KernelRegistry::new();
        reg.register(dummy_variant(Operation::Matmul, "gemv", Capability::empty()));
        assert!(reg.variant(Operation::Matmul, "gemv").is_some());
        assert!(reg.variant(Operation::Matmul, "missing").is_none());
        assert!(reg.variant(Operation::Attention, "gemv").is_none());
    }
}
