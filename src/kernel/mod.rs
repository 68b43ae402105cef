//! Kernel library: the operation/variant registry, the capability-driven
//! selector, and shared dispatch validation.

pub mod dispatch;
pub mod registry;
pub mod selector;
pub mod validate;

pub use dispatch::{dispatch_kernel, Binding};
pub use registry::{
    BindingDescriptor, BindingKind, Capability, CompiledKernel, KernelRegistry, KernelVariant,
    Operation, ShaderSource,
};
